/*!
Security events as delivered by upstream producers
*/

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ValidationError};

/// Kind of security observation carried by an event.
///
/// The aliases accept the names emitted by the synthetic log generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    #[serde(alias = "successful_login")]
    LoginSuccess,
    #[serde(alias = "failed_login")]
    LoginFailure,
    #[serde(alias = "privilege_escalation")]
    PrivEscalation,
    DataDownload,
    NewCountryLogin,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::LoginSuccess => "login_success",
            EventType::LoginFailure => "login_failure",
            EventType::PrivEscalation => "priv_escalation",
            EventType::DataDownload => "data_download",
            EventType::NewCountryLogin => "new_country_login",
        }
    }
}

/// One atomic security observation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// ISO-8601 timestamp as supplied by the producer
    pub timestamp: String,
    pub user: String,
    pub event_type: EventType,
    #[serde(alias = "ip")]
    pub source_ip: String,
    pub location: String,
    pub asset: String,
}

impl SecurityEvent {
    pub fn new(
        timestamp: impl Into<String>,
        user: impl Into<String>,
        event_type: EventType,
        source_ip: impl Into<String>,
        location: impl Into<String>,
        asset: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: timestamp.into(),
            user: user.into(),
            event_type,
            source_ip: source_ip.into(),
            location: location.into(),
            asset: asset.into(),
        }
    }

    /// Decode and validate a single JSON event.
    pub fn from_json(input: &str) -> Result<Self, ValidationError> {
        let event: SecurityEvent = serde_json::from_str(input)?;
        event.validate()?;
        Ok(event)
    }

    /// Reject events missing the fields detection and attribution rely on.
    ///
    /// The timestamp is only checked for presence here; whether it parses is
    /// the engine's concern.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.timestamp.trim().is_empty() {
            return Err(ValidationError::EmptyField("timestamp"));
        }
        if self.user.trim().is_empty() {
            return Err(ValidationError::EmptyField("user"));
        }
        if self.source_ip.trim().is_empty() {
            return Err(ValidationError::EmptyField("source_ip"));
        }
        Ok(())
    }

    pub fn parsed_timestamp(&self) -> Result<DateTime<Utc>, ParseError> {
        parse_timestamp(&self.timestamp)
    }
}

/// Parse an ISO-8601 timestamp.
///
/// RFC 3339 values (`Z` or explicit offset) are converted to UTC; naive
/// date-times without an offset are taken to be UTC already.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, ParseError> {
    let trimmed = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(naive.and_utc());
        }
    }

    Err(ParseError {
        value: value.to_string(),
    })
}
