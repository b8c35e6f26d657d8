/*!
Real-time correlation of security events into enriched alerts.

Events enter through [`Correlator::ingest`], which logs them and runs the
detection rules. Signals wait in the store until the dispatch loop hands
them to an [`Analyzer`] and commits the resulting alert.
*/

pub mod core;
pub mod source;

pub use crate::core::{
    analyzer::{Analyzer, AnalyzerError, AnalyzerOutput, PipelineAnalyzer, WebhookAnalyzer},
    config::{ConfigError, CorrelatorConfig, load_config},
    detection_engine::DetectionEngine,
    dispatch::{DispatchError, DispatchEvent, DispatchHandle, DispatchLoop},
    query::{QueryError, QueryService},
    signal_store::{MetricsSummary, SignalStats, SignalStore, StoreError},
    tracker::{Correlator, IngestError, IngestResponse, StartupError},
};
