/*!
Enriched alerts, the final record derived from exactly one signal
*/

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::SecurityEvent;
use crate::signal::{DetectionSignal, Metadata, Severity};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: String,
    pub timestamp: DateTime<Utc>,
    pub user: String,
    pub threat_type: String,
    pub severity: Severity,
    pub explanation: String,
    pub recommendation: String,
    /// Ordered names of the enrichment stages that produced this alert
    pub agent_trace: Vec<String>,
    pub raw_events: Vec<SecurityEvent>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Alert {
    /// Derive an alert from its originating signal.
    ///
    /// Severity, user and contributing events are copied from the signal
    /// as-is. The signal's metadata is carried over and tagged with the
    /// signal id.
    pub fn from_signal(
        signal: &DetectionSignal,
        explanation: String,
        recommendation: String,
        agent_trace: Vec<String>,
    ) -> Self {
        let mut metadata = signal.metadata.clone();
        metadata.insert("signal_id".into(), signal.signal_id.clone().into());

        Self {
            alert_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            user: signal.user.clone(),
            threat_type: signal.signal_type.as_str().to_string(),
            severity: signal.severity,
            explanation,
            recommendation,
            agent_trace,
            raw_events: signal.events.clone(),
            metadata,
        }
    }

    pub fn signal_id(&self) -> Option<&str> {
        self.metadata.get("signal_id").and_then(|v| v.as_str())
    }
}
