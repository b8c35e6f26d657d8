/*!
Concurrency-safe store for the event log, the pending-signal queue and the
alert ledger, with JSON persistence of the ledger
*/

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use soc_model::{Alert, DetectionSignal, SecurityEvent, Severity};

use crate::core::config::StoreConfig;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read alert ledger {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("alert ledger {path:?} is malformed: {source}")]
    CorruptLedger {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to persist alert ledger to {path:?}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Aggregate view computed from one consistent snapshot of the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    /// Events currently retained in the event log
    pub total_logs: usize,
    /// Events appended since startup, including ones trimmed from the log
    pub events_ingested: u64,
    pub total_alerts: usize,
    /// Every severity is present, zero when no alert has it
    pub alerts_by_severity: BTreeMap<Severity, usize>,
    /// Most recent alerts, oldest first
    pub recent_activity: Vec<Alert>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalStats {
    pub pending: usize,
    pub total: usize,
}

#[derive(Default)]
struct StoreState {
    events: VecDeque<SecurityEvent>,
    events_ingested: u64,
    signals: Vec<DetectionSignal>,
    alerts: Vec<Alert>,
}

/// Holds all mutable correlator state behind a single lock.
///
/// Every read hands back owned copies; nothing outside the store holds a
/// reference into live state.
pub struct SignalStore {
    config: StoreConfig,
    state: RwLock<StoreState>,
    /// Set while a dispatch loop owns this store
    dispatcher: AtomicBool,
}

impl SignalStore {
    /// Open the store, reloading the alert ledger if one exists.
    ///
    /// A missing ledger starts empty. A ledger that does not decode is an
    /// error the caller should treat as fatal.
    pub async fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let alerts = load_ledger(&config.alerts_path).await?;

        info!(
            "Signal store initialized with {} alerts from {:?}",
            alerts.len(),
            config.alerts_path
        );

        Ok(Self {
            config,
            state: RwLock::new(StoreState {
                alerts,
                ..Default::default()
            }),
            dispatcher: AtomicBool::new(false),
        })
    }

    /// Take the single dispatcher slot. Returns false if another loop holds it.
    pub(crate) fn claim_dispatcher(&self) -> bool {
        self.dispatcher
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn release_dispatcher(&self) {
        self.dispatcher.store(false, Ordering::Release);
    }

    pub fn alerts_path(&self) -> &Path {
        &self.config.alerts_path
    }

    /// Record an ingested event, trimming the oldest beyond capacity.
    pub async fn append_event(&self, event: SecurityEvent) {
        let mut state = self.state.write().await;
        state.events.push_back(event);
        state.events_ingested += 1;
        while state.events.len() > self.config.event_log_capacity {
            state.events.pop_front();
        }
    }

    /// Queue a signal for dispatch. It always enters unprocessed.
    pub async fn enqueue_signal(&self, mut signal: DetectionSignal) {
        signal.processed = false;
        debug!("Queued signal {} ({})", signal.signal_id, signal.signal_type);
        self.state.write().await.signals.push(signal);
    }

    /// Unprocessed signals in enqueue order.
    pub async fn list_pending(&self) -> Vec<DetectionSignal> {
        self.state
            .read()
            .await
            .signals
            .iter()
            .filter(|s| !s.processed)
            .cloned()
            .collect()
    }

    /// Flip a signal to processed. Returns whether this call made the transition;
    /// unknown or already processed ids are a no-op.
    pub(crate) async fn mark_processed(&self, signal_id: &str) -> bool {
        let mut state = self.state.write().await;
        match state
            .signals
            .iter_mut()
            .find(|s| s.signal_id == signal_id && !s.processed)
        {
            Some(signal) => {
                signal.processed = true;
                true
            }
            None => false,
        }
    }

    /// Append an alert and rewrite the persisted ledger before returning.
    ///
    /// The in-memory ledger keeps the alert even when the write fails; the
    /// next successful append persists the full snapshot including it.
    pub(crate) async fn append_alert(&self, alert: Alert) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.alerts.push(alert);

        // Serialized and written under the write lock so the file order
        // always matches the in-memory order.
        let bytes = serde_json::to_vec_pretty(&state.alerts).map_err(|e| StoreError::Persistence {
            path: self.config.alerts_path.clone(),
            source: std::io::Error::other(e),
        })?;
        write_atomically(&self.config.alerts_path, &bytes).await?;

        debug!("Persisted {} alerts", state.alerts.len());
        Ok(())
    }

    /// Drop the oldest processed signals beyond the retention limit.
    pub(crate) async fn prune_processed(&self) -> usize {
        let mut state = self.state.write().await;
        let processed = state.signals.iter().filter(|s| s.processed).count();
        let excess = processed.saturating_sub(self.config.processed_signal_retention);
        if excess == 0 {
            return 0;
        }

        let mut dropped = 0;
        state.signals.retain(|s| {
            if s.processed && dropped < excess {
                dropped += 1;
                false
            } else {
                true
            }
        });
        debug!("Pruned {} processed signals", dropped);
        dropped
    }

    pub async fn alerts(&self) -> Vec<Alert> {
        self.state.read().await.alerts.clone()
    }

    pub async fn alert(&self, alert_id: &str) -> Option<Alert> {
        self.state
            .read()
            .await
            .alerts
            .iter()
            .find(|a| a.alert_id == alert_id)
            .cloned()
    }

    pub async fn alerts_by_severity(&self, severity: Severity) -> Vec<Alert> {
        self.state
            .read()
            .await
            .alerts
            .iter()
            .filter(|a| a.severity == severity)
            .cloned()
            .collect()
    }

    /// Most recent events, oldest first.
    pub async fn recent_events(&self, limit: usize) -> Vec<SecurityEvent> {
        let state = self.state.read().await;
        let skip = state.events.len().saturating_sub(limit);
        state.events.iter().skip(skip).cloned().collect()
    }

    pub async fn events_for_user(&self, user: &str, limit: usize) -> Vec<SecurityEvent> {
        let state = self.state.read().await;
        let matching: Vec<&SecurityEvent> = state.events.iter().filter(|e| e.user == user).collect();
        let skip = matching.len().saturating_sub(limit);
        matching.into_iter().skip(skip).cloned().collect()
    }

    pub async fn signal_stats(&self) -> SignalStats {
        let state = self.state.read().await;
        SignalStats {
            pending: state.signals.iter().filter(|s| !s.processed).count(),
            total: state.signals.len(),
        }
    }

    pub async fn metrics(&self) -> MetricsSummary {
        let state = self.state.read().await;

        let mut alerts_by_severity: BTreeMap<Severity, usize> =
            Severity::ALL.into_iter().map(|s| (s, 0)).collect();
        for alert in &state.alerts {
            *alerts_by_severity.entry(alert.severity).or_default() += 1;
        }

        let skip = state.alerts.len().saturating_sub(self.config.recent_alerts);

        MetricsSummary {
            total_logs: state.events.len(),
            events_ingested: state.events_ingested,
            total_alerts: state.alerts.len(),
            alerts_by_severity,
            recent_activity: state.alerts[skip..].to_vec(),
        }
    }
}

async fn load_ledger(path: &Path) -> Result<Vec<Alert>, StoreError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    if content.trim().is_empty() {
        warn!("Alert ledger {:?} is empty, starting fresh", path);
        return Ok(Vec::new());
    }

    serde_json::from_str(&content).map_err(|source| StoreError::CorruptLedger {
        path: path.to_path_buf(),
        source,
    })
}

/// Write to a sibling temp file, then rename over the target.
async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let persistence = |source| StoreError::Persistence {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(persistence)?;
    }

    let mut temp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);

    tokio::fs::write(&temp_path, bytes).await.map_err(persistence)?;
    tokio::fs::rename(&temp_path, path).await.map_err(persistence)?;
    Ok(())
}
