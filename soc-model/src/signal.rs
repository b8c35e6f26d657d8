/*!
Detection signals emitted by the correlation rules
*/

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::SecurityEvent;

/// String-keyed metadata attached to signals and alerts
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Alert severity, ordered `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    /// Case-insensitive
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Severity::ALL
            .into_iter()
            .find(|severity| severity.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown severity {:?}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalType {
    BruteForce,
    SuspiciousLogin,
    InsiderThreat,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::BruteForce => "BRUTE_FORCE",
            SignalType::SuspiciousLogin => "SUSPICIOUS_LOGIN",
            SignalType::InsiderThreat => "INSIDER_THREAT",
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The engine's assertion that a pattern of events is a candidate threat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionSignal {
    pub signal_id: String,
    pub signal_type: SignalType,
    pub user: String,
    pub severity: Severity,
    /// Contributing events in causal order
    pub events: Vec<SecurityEvent>,
    pub detected_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
    /// Set once by the dispatch loop, never cleared
    #[serde(default)]
    pub processed: bool,
}

impl DetectionSignal {
    /// Build an unprocessed signal with a fresh id, stamped with the current time.
    pub fn new(
        signal_type: SignalType,
        user: impl Into<String>,
        severity: Severity,
        events: Vec<SecurityEvent>,
        metadata: Metadata,
    ) -> Self {
        Self {
            signal_id: Uuid::new_v4().to_string(),
            signal_type,
            user: user.into(),
            severity,
            events,
            detected_at: Utc::now(),
            metadata,
            processed: false,
        }
    }
}
