/*!
Background dispatch loop bridging pending signals to the analyzer and the
alert ledger
*/

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_stream::{StreamExt, wrappers::IntervalStream};
use tracing::{debug, error, info, warn};

use soc_model::{Alert, DetectionSignal};

use crate::core::{
    analyzer::{Analyzer, AnalyzerError, AnalyzerOutput},
    config::DispatchConfig,
    signal_store::SignalStore,
};

pub const DEFAULT_RECOMMENDATION: &str = "Review immediately and verify user identity";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("a dispatch loop is already running for {0:?}")]
    AlreadyRunning(std::path::PathBuf),
}

/// Outcomes reported by the dispatch loop
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    /// Alert appended and persisted, signal marked processed
    AlertCommitted {
        signal_id: String,
        alert_id: String,
        enriched: bool,
    },
    /// Alert appended in memory but the ledger write failed; signal still processed
    PersistenceFailed {
        signal_id: String,
        alert_id: String,
        error: String,
    },
    /// Shutdown arrived during the analyzer call; nothing was written
    Abandoned { signal_id: String },
    /// One pass over the pending queue finished
    TickComplete { processed: usize, pruned: usize },
}

/// The single writer of alerts and of the `processed` flag.
///
/// A loop claims its store on construction and releases it when dropped;
/// building a second loop over the same store fails.
pub struct DispatchLoop {
    store: Arc<SignalStore>,
    analyzer: Arc<dyn Analyzer>,
    config: DispatchConfig,
    shutdown: watch::Receiver<bool>,
}

impl DispatchLoop {
    pub fn new(
        store: Arc<SignalStore>,
        analyzer: Arc<dyn Analyzer>,
        config: DispatchConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, DispatchError> {
        if !store.claim_dispatcher() {
            return Err(DispatchError::AlreadyRunning(store.alerts_path().to_path_buf()));
        }

        Ok(Self {
            store,
            analyzer,
            config,
            shutdown,
        })
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Process every signal pending at the start of the tick, oldest first.
    ///
    /// The store lock is only held while taking the snapshot and while
    /// committing; the analyzer runs with no lock held.
    pub async fn run_once(&mut self) -> Vec<DispatchEvent> {
        let pending = self.store.list_pending().await;
        let mut events = Vec::new();
        let mut processed = 0;

        if !pending.is_empty() {
            debug!("Dispatching {} pending signals", pending.len());
        }

        for signal in pending {
            if self.shutdown_requested() {
                break;
            }

            let analyzer = Arc::clone(&self.analyzer);
            let timeout = self.config.analyzer_timeout();
            let request = signal.clone();
            // Spawned so a panicking analyzer surfaces as a JoinError, not a dead loop.
            let mut call = tokio::spawn(async move {
                call_analyzer(analyzer.as_ref(), &request, timeout).await
            });

            let outcome = tokio::select! {
                joined = &mut call => joined.unwrap_or_else(|e| {
                    Err(AnalyzerError::Failed(format!("analyzer task failed: {}", e)))
                }),
                _ = wait_for_shutdown(&mut self.shutdown) => {
                    call.abort();
                    events.push(DispatchEvent::Abandoned { signal_id: signal.signal_id });
                    break;
                }
            };

            events.push(self.commit(&signal, outcome).await);
            processed += 1;
        }

        let pruned = self.store.prune_processed().await;
        events.push(DispatchEvent::TickComplete { processed, pruned });
        events
    }

    async fn commit(
        &self,
        signal: &DetectionSignal,
        outcome: Result<AnalyzerOutput, AnalyzerError>,
    ) -> DispatchEvent {
        let alert = build_alert(signal, outcome);
        let alert_id = alert.alert_id.clone();
        let enriched = alert
            .metadata
            .get("agent_success")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let committed = self.store.append_alert(alert).await;
        // Processed regardless of the disk write: the in-memory ledger has the alert.
        if !self.store.mark_processed(&signal.signal_id).await {
            warn!("Signal {} was already processed or is gone", signal.signal_id);
        }

        match committed {
            Ok(()) => DispatchEvent::AlertCommitted {
                signal_id: signal.signal_id.clone(),
                alert_id,
                enriched,
            },
            Err(e) => DispatchEvent::PersistenceFailed {
                signal_id: signal.signal_id.clone(),
                alert_id,
                error: e.to_string(),
            },
        }
    }

    /// Tick on the configured interval until shutdown, yielding every outcome.
    pub fn events(mut self) -> impl Stream<Item = DispatchEvent> {
        let mut interval = tokio::time::interval(self.config.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = IntervalStream::new(interval);

        async_stream::stream! {
            loop {
                tokio::select! {
                    tick = ticks.next() => {
                        if tick.is_none() {
                            break;
                        }
                    }
                    _ = wait_for_shutdown(&mut self.shutdown) => break,
                }

                for event in self.run_once().await {
                    yield event;
                }

                if self.shutdown_requested() {
                    break;
                }
            }
        }
    }

    /// Drive the loop for the life of the process, logging each outcome.
    pub async fn run(self) {
        info!(
            "Starting dispatch loop (every {:?}, analyzer {})",
            self.config.interval(),
            self.analyzer.name()
        );

        let mut events = Box::pin(self.events());
        while let Some(event) = events.next().await {
            match event {
                DispatchEvent::AlertCommitted {
                    signal_id,
                    alert_id,
                    enriched,
                } => {
                    info!(
                        "✅ Alert {} created from signal {}{}",
                        alert_id,
                        signal_id,
                        if enriched { "" } else { " (rule-based fallback)" }
                    );
                }
                DispatchEvent::PersistenceFailed {
                    signal_id,
                    alert_id,
                    error,
                } => {
                    error!(
                        "Alert {} for signal {} not persisted: {}",
                        alert_id, signal_id, error
                    );
                }
                DispatchEvent::Abandoned { signal_id } => {
                    warn!("Abandoned analysis of signal {} on shutdown", signal_id);
                }
                DispatchEvent::TickComplete { processed, pruned } => {
                    if processed > 0 || pruned > 0 {
                        debug!("Tick processed {} signals, pruned {}", processed, pruned);
                    }
                }
            }
        }

        info!("🛑 Dispatch loop stopped");
    }
}

impl Drop for DispatchLoop {
    fn drop(&mut self) {
        self.store.release_dispatcher();
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender also means stop.
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn call_analyzer(
    analyzer: &dyn Analyzer,
    signal: &DetectionSignal,
    timeout: Option<Duration>,
) -> Result<AnalyzerOutput, AnalyzerError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, analyzer.analyze(signal))
            .await
            .map_err(|_| AnalyzerError::Timeout(limit))?,
        None => analyzer.analyze(signal).await,
    }
}

/// Turn an analyzer outcome into the alert for `signal`.
///
/// Severity is always the signal's own. Any failure, including a reported
/// `success = false`, produces a degraded alert whose trace ends with the
/// failure.
pub fn build_alert(
    signal: &DetectionSignal,
    outcome: Result<AnalyzerOutput, AnalyzerError>,
) -> Alert {
    let (explanation, trace, failure) = match outcome {
        Ok(output) if output.success => (output.narrative, output.trace, None),
        Ok(output) => {
            let reason = output
                .error
                .unwrap_or_else(|| "no error reported".to_string());
            (String::new(), output.trace, Some(AnalyzerError::Unsuccessful(reason)))
        }
        Err(e) => (String::new(), Vec::new(), Some(e)),
    };

    let mut alert = match failure {
        None => Alert::from_signal(signal, explanation, DEFAULT_RECOMMENDATION.into(), trace),
        Some(error) => {
            warn!(
                "Enrichment failed for signal {}, falling back to rule output: {}",
                signal.signal_id, error
            );
            let mut trace = trace;
            trace.push(format!("enrichment failed: {}", error));
            let mut alert = Alert::from_signal(
                signal,
                format!("Alert generated by detection rule: {}", signal.signal_type),
                DEFAULT_RECOMMENDATION.into(),
                trace,
            );
            alert
                .metadata
                .insert("agent_error".into(), error.to_string().into());
            alert
        }
    };

    let success = !alert.metadata.contains_key("agent_error");
    alert
        .metadata
        .insert("agent_success".into(), success.into());
    alert
}

/// Owns a running dispatch loop and stops it cleanly
pub struct DispatchHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DispatchHandle {
    pub fn spawn(
        store: Arc<SignalStore>,
        analyzer: Arc<dyn Analyzer>,
        config: DispatchConfig,
    ) -> Result<Self, DispatchError> {
        let (shutdown, receiver) = watch::channel(false);
        let dispatch = DispatchLoop::new(store, analyzer, config, receiver)?;
        let task = tokio::spawn(dispatch.run());
        Ok(Self { shutdown, task })
    }

    /// Signal shutdown and wait for the loop to exit.
    ///
    /// An in-flight analyzer call is abandoned; its signal stays pending.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!("Dispatch loop ended abnormally: {}", e);
        }
    }
}
