/*!
Enrichment capabilities that turn a detection signal into a narrative and a
processing trace
*/

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use soc_model::{DetectionSignal, EventType, SignalType};

use crate::core::config::AnalyzerConfig;

/// What an analyzer hands back for one signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerOutput {
    pub success: bool,
    pub narrative: String,
    /// Ordered names of the stages that ran
    pub trace: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("analysis failed: {0}")]
    Failed(String),
    #[error("enrichment request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("analyzer did not answer within {0:?}")]
    Timeout(std::time::Duration),
    #[error("analyzer reported failure: {0}")]
    Unsuccessful(String),
}

/// Trait for enrichment capabilities.
///
/// Implementations must be safe to call repeatedly with the same signal;
/// the dispatch loop decides what happens with the outcome.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Name of the analyzer
    fn name(&self) -> &'static str;

    /// Enrich a single signal
    async fn analyze(&self, signal: &DetectionSignal) -> Result<AnalyzerOutput, AnalyzerError>;
}

/// Build the analyzer selected in configuration
pub fn from_config(config: &AnalyzerConfig) -> Box<dyn Analyzer> {
    let analyzer: Box<dyn Analyzer> = match config {
        AnalyzerConfig::Pipeline => Box::new(PipelineAnalyzer::default()),
        AnalyzerConfig::Webhook { url, auth_token } => {
            Box::new(WebhookAnalyzer::new(url.clone(), auth_token.clone()))
        }
    };
    info!("Using {} analyzer", analyzer.name());
    analyzer
}

/// Context threaded through the pipeline; each stage appends its findings.
#[derive(Debug, Default)]
pub struct AnalysisContext {
    pub sections: Vec<(String, String)>,
}

impl AnalysisContext {
    fn add(&mut self, stage: &str, text: String) {
        self.sections.push((stage.to_string(), text));
    }

    fn narrative(&self) -> String {
        self.sections
            .iter()
            .map(|(stage, text)| format!("[{}] {}", stage, text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One step of the local enrichment pipeline
pub trait AnalysisStage: Send + Sync {
    fn name(&self) -> &'static str;

    fn run(&self, signal: &DetectionSignal, context: &mut AnalysisContext) -> Result<(), AnalyzerError>;
}

/// Runs its stages strictly in order; the only state shared between them is
/// the accumulating context.
pub struct PipelineAnalyzer {
    stages: Vec<Box<dyn AnalysisStage>>,
}

impl PipelineAnalyzer {
    pub fn new(stages: Vec<Box<dyn AnalysisStage>>) -> Self {
        Self { stages }
    }
}

impl Default for PipelineAnalyzer {
    fn default() -> Self {
        Self::new(vec![
            Box::new(OrchestratorStage),
            Box::new(AlertHandlerStage),
            Box::new(ThreatAnalyzerStage),
            Box::new(RootCauseStage),
            Box::new(ComplianceStage),
            Box::new(ResponseStage),
        ])
    }
}

#[async_trait]
impl Analyzer for PipelineAnalyzer {
    fn name(&self) -> &'static str {
        "Pipeline"
    }

    async fn analyze(&self, signal: &DetectionSignal) -> Result<AnalyzerOutput, AnalyzerError> {
        let mut context = AnalysisContext::default();
        let mut trace = Vec::with_capacity(self.stages.len());

        for stage in &self.stages {
            trace.push(stage.name().to_string());
            if let Err(e) = stage.run(signal, &mut context) {
                debug!("Stage {} failed for signal {}: {}", stage.name(), signal.signal_id, e);
                return Ok(AnalyzerOutput {
                    success: false,
                    narrative: context.narrative(),
                    trace,
                    error: Some(e.to_string()),
                });
            }
        }

        Ok(AnalyzerOutput {
            success: true,
            narrative: context.narrative(),
            trace,
            error: None,
        })
    }
}

struct OrchestratorStage;

impl AnalysisStage for OrchestratorStage {
    fn name(&self) -> &'static str {
        "Orchestrator Agent"
    }

    fn run(&self, signal: &DetectionSignal, context: &mut AnalysisContext) -> Result<(), AnalyzerError> {
        context.add(
            self.name(),
            format!(
                "{} signal for {} at severity {}; full investigation opened.",
                signal.signal_type, signal.user, signal.severity
            ),
        );
        Ok(())
    }
}

struct AlertHandlerStage;

impl AnalysisStage for AlertHandlerStage {
    fn name(&self) -> &'static str {
        "Alert Handler Agent"
    }

    fn run(&self, signal: &DetectionSignal, context: &mut AnalysisContext) -> Result<(), AnalyzerError> {
        if signal.events.is_empty() {
            return Err(AnalyzerError::Failed("signal carries no events".into()));
        }

        let mut ips: Vec<&str> = signal.events.iter().map(|e| e.source_ip.as_str()).collect();
        ips.sort_unstable();
        ips.dedup();
        let mut assets: Vec<&str> = signal.events.iter().map(|e| e.asset.as_str()).collect();
        assets.sort_unstable();
        assets.dedup();

        context.add(
            self.name(),
            format!(
                "{} correlated events between {} and {}; source IPs: {}; assets: {}.",
                signal.events.len(),
                signal.events[0].timestamp,
                signal.events[signal.events.len() - 1].timestamp,
                ips.join(", "),
                assets.join(", ")
            ),
        );
        Ok(())
    }
}

struct ThreatAnalyzerStage;

impl AnalysisStage for ThreatAnalyzerStage {
    fn name(&self) -> &'static str {
        "Threat Analyzer Agent"
    }

    fn run(&self, signal: &DetectionSignal, context: &mut AnalysisContext) -> Result<(), AnalyzerError> {
        let (technique, intent) = match signal.signal_type {
            SignalType::BruteForce => ("T1110 Brute Force", "Credential Access"),
            SignalType::SuspiciousLogin => ("T1078 Valid Accounts", "Initial Access"),
            SignalType::InsiderThreat => ("T1567 Exfiltration Over Web Service", "Exfiltration"),
        };
        context.add(
            self.name(),
            format!("Behaviour maps to MITRE ATT&CK {}; likely intent: {}.", technique, intent),
        );
        Ok(())
    }
}

struct RootCauseStage;

impl AnalysisStage for RootCauseStage {
    fn name(&self) -> &'static str {
        "Root Cause Agent"
    }

    fn run(&self, signal: &DetectionSignal, context: &mut AnalysisContext) -> Result<(), AnalyzerError> {
        let cause = match signal.signal_type {
            SignalType::BruteForce => "password guessing against an exposed login surface",
            SignalType::SuspiciousLogin => "credentials used from an unexpected geography",
            SignalType::InsiderThreat => {
                let escalations = signal
                    .events
                    .iter()
                    .filter(|e| e.event_type == EventType::PrivEscalation)
                    .count();
                context.add(
                    self.name(),
                    format!(
                        "{} privilege escalation(s) preceded the download; elevated access was used to reach data.",
                        escalations
                    ),
                );
                return Ok(());
            }
        };
        context.add(self.name(), format!("Probable entry point: {}.", cause));
        Ok(())
    }
}

struct ComplianceStage;

impl AnalysisStage for ComplianceStage {
    fn name(&self) -> &'static str {
        "Compliance Agent"
    }

    fn run(&self, signal: &DetectionSignal, context: &mut AnalysisContext) -> Result<(), AnalyzerError> {
        let touches_data = signal
            .events
            .iter()
            .any(|e| e.event_type == EventType::DataDownload);
        let text = if touches_data {
            "Data left its system of record; treat as potentially reportable (72h deadline)."
        } else {
            "No data movement observed; not reportable unless further access is confirmed."
        };
        context.add(self.name(), text.to_string());
        Ok(())
    }
}

struct ResponseStage;

impl AnalysisStage for ResponseStage {
    fn name(&self) -> &'static str {
        "Response Automation Agent"
    }

    fn run(&self, signal: &DetectionSignal, context: &mut AnalysisContext) -> Result<(), AnalyzerError> {
        let action = match signal.signal_type {
            SignalType::BruteForce => "lock the account and block the offending source IPs",
            SignalType::SuspiciousLogin => "revoke active sessions and force re-authentication",
            SignalType::InsiderThreat => "suspend elevated privileges and preserve download logs",
        };
        context.add(self.name(), format!("Immediate containment: {} for {}.", action, signal.user));
        Ok(())
    }
}

/// Delegates enrichment to a remote service speaking the `AnalyzerOutput` contract
pub struct WebhookAnalyzer {
    url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl WebhookAnalyzer {
    pub fn new(url: String, auth_token: Option<String>) -> Self {
        Self {
            url,
            auth_token,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Analyzer for WebhookAnalyzer {
    fn name(&self) -> &'static str {
        "Webhook"
    }

    async fn analyze(&self, signal: &DetectionSignal) -> Result<AnalyzerOutput, AnalyzerError> {
        let mut request = self.client.post(&self.url);

        if let Some(ref token) = self.auth_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request.json(signal).send().await?;

        if !response.status().is_success() {
            return Err(AnalyzerError::Failed(format!(
                "enrichment service returned {}",
                response.status()
            )));
        }

        Ok(response.json::<AnalyzerOutput>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use soc_model::{Metadata, SecurityEvent, Severity};

    fn insider_signal() -> DetectionSignal {
        let escalation = SecurityEvent::new(
            "2025-03-01T09:00:00Z",
            "b",
            EventType::PrivEscalation,
            "10.1.1.1",
            "Germany",
            "admin-panel",
        );
        let download = SecurityEvent::new(
            "2025-03-01T09:05:00Z",
            "b",
            EventType::DataDownload,
            "10.1.1.1",
            "Germany",
            "customer-db",
        );
        DetectionSignal::new(
            SignalType::InsiderThreat,
            "b",
            Severity::Critical,
            vec![escalation, download],
            Metadata::new(),
        )
    }

    #[tokio::test]
    async fn pipeline_runs_every_stage_in_order() {
        let output = PipelineAnalyzer::default().analyze(&insider_signal()).await.unwrap();

        assert!(output.success);
        assert_eq!(
            output.trace,
            vec![
                "Orchestrator Agent",
                "Alert Handler Agent",
                "Threat Analyzer Agent",
                "Root Cause Agent",
                "Compliance Agent",
                "Response Automation Agent",
            ]
        );
        assert!(output.narrative.contains("T1567"));
        assert!(output.narrative.contains("1 privilege escalation(s)"));
        assert!(output.narrative.contains("reportable (72h deadline)"));
    }

    #[tokio::test]
    async fn pipeline_stops_at_failing_stage() {
        let mut signal = insider_signal();
        signal.events.clear();

        let output = PipelineAnalyzer::default().analyze(&signal).await.unwrap();
        assert!(!output.success);
        assert_eq!(output.trace, vec!["Orchestrator Agent", "Alert Handler Agent"]);
        assert_eq!(
            output.error.as_deref(),
            Some("analysis failed: signal carries no events")
        );
    }

    #[test]
    fn output_contract_decodes_without_error_field() {
        let output: AnalyzerOutput =
            serde_json::from_str(r#"{"success":true,"narrative":"n","trace":["a","b"]}"#).unwrap();
        assert_eq!(output.error, None);
        assert_eq!(output.trace.len(), 2);
    }

    /// Answer a single HTTP request with `status` and `body`, handing back the raw request.
    async fn serve_once(
        status: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/enrich", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 4096];
            while !request_complete(&received) {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
            }

            let reply = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&received).into_owned()
        });

        (url, server)
    }

    fn request_complete(received: &[u8]) -> bool {
        let text = String::from_utf8_lossy(received).to_ascii_lowercase();
        let Some(head_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let body_len = text[..head_end]
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|len| len.trim().parse::<usize>().ok())
            .unwrap_or(0);
        received.len() >= head_end + 4 + body_len
    }

    fn webhook(url: String, auth_token: Option<&str>) -> WebhookAnalyzer {
        WebhookAnalyzer {
            url,
            auth_token: auth_token.map(String::from),
            client: reqwest::Client::builder().no_proxy().build().unwrap(),
        }
    }

    #[tokio::test]
    async fn webhook_posts_signal_with_bearer_token() {
        let (url, server) = serve_once(
            "200 OK",
            r#"{"success":true,"narrative":"remote verdict","trace":["Remote Triage"]}"#,
        )
        .await;
        let signal = insider_signal();

        let output = webhook(url, Some("s3cret")).analyze(&signal).await.unwrap();
        assert!(output.success);
        assert_eq!(output.narrative, "remote verdict");
        assert_eq!(output.trace, vec!["Remote Triage"]);
        assert_eq!(output.error, None);

        let request = server.await.unwrap();
        let lowered = request.to_ascii_lowercase();
        assert!(lowered.starts_with("post /enrich "));
        assert!(lowered.contains("authorization: bearer s3cret"));
        assert!(request.contains(&signal.signal_id));
        assert!(request.contains("INSIDER_THREAT"));
    }

    #[tokio::test]
    async fn webhook_error_status_is_a_failure() {
        let (url, server) = serve_once("503 Service Unavailable", "{}").await;

        let result = webhook(url, None).analyze(&insider_signal()).await;
        assert!(matches!(result, Err(AnalyzerError::Failed(ref msg)) if msg.contains("503")));

        let request = server.await.unwrap();
        assert!(!request.to_ascii_lowercase().contains("authorization:"));
    }
}
