//! Integration tests for the read-only query surface.

use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::watch;

use soc_correlator::core::config::DispatchConfig;
use soc_correlator::{
    Analyzer, AnalyzerError, AnalyzerOutput, Correlator, CorrelatorConfig, DispatchLoop,
    QueryError,
};
use soc_model::{DetectionSignal, EventType, SecurityEvent, Severity};

/// Echoes the signal type back as the narrative
struct EchoAnalyzer;

#[async_trait]
impl Analyzer for EchoAnalyzer {
    fn name(&self) -> &'static str {
        "Echo"
    }

    async fn analyze(&self, signal: &DetectionSignal) -> Result<AnalyzerOutput, AnalyzerError> {
        Ok(AnalyzerOutput {
            success: true,
            narrative: format!("echo {}", signal.signal_type),
            trace: vec!["Echo".into()],
            error: None,
        })
    }
}

/// Correlator with one HIGH (suspicious login) and one CRITICAL (insider) alert committed
async fn populated(dir: &TempDir) -> Correlator {
    let mut config = CorrelatorConfig::default();
    config.store.alerts_path = dir.path().join("alerts.json");
    let correlator = Correlator::new(config).await.unwrap();

    let events = [
        ("c", EventType::LoginSuccess, "Iran"),
        ("b", EventType::PrivEscalation, "Canada"),
        ("b", EventType::DataDownload, "Canada"),
    ];
    for (user, event_type, location) in events {
        correlator
            .ingest(SecurityEvent::new(
                "2025-06-02T14:00:00Z",
                user,
                event_type,
                "192.0.2.77",
                location,
                "customer-db",
            ))
            .await
            .unwrap();
    }

    let (_tx, rx) = watch::channel(false);
    let analyzer: Arc<dyn Analyzer> = Arc::new(EchoAnalyzer);
    let mut dispatch =
        DispatchLoop::new(correlator.store(), analyzer, DispatchConfig::default(), rx).unwrap();
    dispatch.run_once().await;
    correlator
}

#[tokio::test]
async fn list_filters_by_severity_case_insensitively() {
    let dir = TempDir::new().unwrap();
    let query = populated(&dir).await.query();

    let critical = query.list_alerts(Some("critical"), 100).await.unwrap();
    assert_eq!(critical.len(), 1);
    assert_eq!(critical[0].severity, Severity::Critical);
    assert_eq!(critical[0].explanation, "echo INSIDER_THREAT");

    assert_eq!(query.list_alerts(None, 100).await.unwrap().len(), 2);
    assert!(query.list_alerts(Some("LOW"), 100).await.unwrap().is_empty());
}

#[tokio::test]
async fn limit_keeps_newest() {
    let dir = TempDir::new().unwrap();
    let query = populated(&dir).await.query();

    let newest = query.list_alerts(None, 1).await.unwrap();
    assert_eq!(newest.len(), 1);
    assert_eq!(newest[0].threat_type, "INSIDER_THREAT");
}

#[tokio::test]
async fn invalid_severity_and_missing_alert() {
    let dir = TempDir::new().unwrap();
    let query = populated(&dir).await.query();

    let invalid = query.list_alerts(Some("urgent"), 10).await.unwrap_err();
    assert_eq!(invalid.status_code(), 400);

    let missing = query.get_alert("nope").await.unwrap_err();
    assert_eq!(missing, QueryError::NotFound("nope".into()));
    assert_eq!(missing.status_code(), 404);

    let any = &query.list_alerts(None, 1).await.unwrap()[0];
    assert_eq!(query.get_alert(&any.alert_id).await.unwrap(), *any);
}

#[tokio::test]
async fn metrics_and_health() {
    let dir = TempDir::new().unwrap();
    let query = populated(&dir).await.query();

    let metrics = query.metrics().await;
    assert_eq!(metrics.total_logs, 3);
    assert_eq!(metrics.total_alerts, 2);
    assert_eq!(metrics.alerts_by_severity[&Severity::High], 1);
    assert_eq!(metrics.alerts_by_severity[&Severity::Critical], 1);
    assert_eq!(metrics.recent_activity.len(), 2);

    let encoded = serde_json::to_value(&metrics).unwrap();
    assert_eq!(encoded["alerts_by_severity"]["MEDIUM"], 0);

    assert_eq!(query.recent_events(2).await.len(), 2);
    assert_eq!(query.signal_stats().await.total, 2);

    let health = query.health();
    assert_eq!(health.status, "healthy");
    assert_eq!(health.service, "soc-correlator");
}
