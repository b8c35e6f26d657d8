/*!
Read-only query surface over store snapshots
*/

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use soc_model::{Alert, SecurityEvent, Severity};

use crate::core::signal_store::{MetricsSummary, SignalStats, SignalStore};

pub const SERVICE_NAME: &str = "soc-correlator";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("alert {0} not found")]
    NotFound(String),
    #[error("invalid severity level {0:?}")]
    InvalidSeverity(String),
}

impl QueryError {
    /// HTTP status a request surface should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            QueryError::NotFound(_) => 404,
            QueryError::InvalidSeverity(_) => 400,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone)]
pub struct QueryService {
    store: Arc<SignalStore>,
}

impl QueryService {
    pub fn new(store: Arc<SignalStore>) -> Self {
        Self { store }
    }

    /// Newest `limit` alerts in ledger order, optionally of one severity.
    pub async fn list_alerts(
        &self,
        severity: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Alert>, QueryError> {
        let mut alerts = match severity {
            Some(raw) => {
                let severity: Severity = raw
                    .parse()
                    .map_err(|_| QueryError::InvalidSeverity(raw.to_string()))?;
                self.store.alerts_by_severity(severity).await
            }
            None => self.store.alerts().await,
        };

        let skip = alerts.len().saturating_sub(limit);
        alerts.drain(..skip);
        Ok(alerts)
    }

    pub async fn get_alert(&self, alert_id: &str) -> Result<Alert, QueryError> {
        self.store
            .alert(alert_id)
            .await
            .ok_or_else(|| QueryError::NotFound(alert_id.to_string()))
    }

    pub async fn metrics(&self) -> MetricsSummary {
        self.store.metrics().await
    }

    pub async fn recent_events(&self, limit: usize) -> Vec<SecurityEvent> {
        self.store.recent_events(limit).await
    }

    pub async fn signal_stats(&self) -> SignalStats {
        self.store.signal_stats().await
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            status: "healthy".to_string(),
            service: SERVICE_NAME.to_string(),
            timestamp: Utc::now(),
        }
    }
}
