/*!
Coordinator wiring ingestion, detection, storage and dispatch together
*/

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use soc_model::{SecurityEvent, SignalType, ValidationError};

use crate::core::{
    analyzer::{self, Analyzer},
    config::{ConfigError, CorrelatorConfig},
    detection_engine::DetectionEngine,
    dispatch::{DispatchError, DispatchHandle},
    query::QueryService,
    signal_store::{SignalStore, StoreError},
};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("rejected event: {0}")]
    Invalid(#[from] ValidationError),
}

/// Answer to a single ingestion call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestResponse {
    Ok,
    Detected {
        signal_type: SignalType,
        signal_id: String,
    },
}

/// Owns the engine and store for one process.
///
/// Ingestion may be called concurrently from any number of tasks. Only one
/// dispatch loop can run at a time; starting another fails until the first
/// has shut down.
pub struct Correlator {
    config: CorrelatorConfig,
    engine: DetectionEngine,
    store: Arc<SignalStore>,
}

impl Correlator {
    /// Build the engine and open the store. Invalid settings or a corrupt
    /// alert ledger fail here.
    pub async fn new(config: CorrelatorConfig) -> Result<Self, StartupError> {
        info!("Initializing correlator...");

        config.validate()?;
        let engine = DetectionEngine::new(&config.detection)?;
        let store = Arc::new(SignalStore::open(config.store.clone()).await?);

        Ok(Self {
            config,
            engine,
            store,
        })
    }

    pub fn store(&self) -> Arc<SignalStore> {
        Arc::clone(&self.store)
    }

    pub fn query(&self) -> QueryService {
        QueryService::new(self.store())
    }

    /// Log the event, run detection and queue any resulting signal.
    ///
    /// An event whose timestamp cannot be parsed is still logged; detection
    /// is skipped for it and the caller gets `Ok`.
    pub async fn ingest(&self, event: SecurityEvent) -> Result<IngestResponse, IngestError> {
        event.validate()?;

        self.store.append_event(event.clone()).await;

        let signal = match self.engine.analyze(&event) {
            Ok(signal) => signal,
            Err(e) => {
                warn!("Skipping detection for event from {}: {}", event.user, e);
                return Ok(IngestResponse::Ok);
            }
        };

        match signal {
            Some(signal) => {
                info!("🚨 Detection: {} for {}", signal.signal_type, signal.user);
                let response = IngestResponse::Detected {
                    signal_type: signal.signal_type,
                    signal_id: signal.signal_id.clone(),
                };
                self.store.enqueue_signal(signal).await;
                Ok(response)
            }
            None => {
                debug!("No detection for {} event from {}", event.event_type.as_str(), event.user);
                Ok(IngestResponse::Ok)
            }
        }
    }

    /// Decode one JSON event and ingest it
    pub async fn ingest_json(&self, input: &str) -> Result<IngestResponse, IngestError> {
        let event = SecurityEvent::from_json(input)?;
        self.ingest(event).await
    }

    /// Start the dispatch loop with the analyzer chosen in configuration
    pub fn start_dispatch(&self) -> Result<DispatchHandle, DispatchError> {
        let analyzer: Arc<dyn Analyzer> = Arc::from(analyzer::from_config(&self.config.analyzer));
        self.start_dispatch_with(analyzer)
    }

    /// Start the dispatch loop with an explicit analyzer
    pub fn start_dispatch_with(
        &self,
        analyzer: Arc<dyn Analyzer>,
    ) -> Result<DispatchHandle, DispatchError> {
        DispatchHandle::spawn(self.store(), analyzer, self.config.dispatch.clone())
    }
}
