/*!
Configuration management for the correlator
*/

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("detection.brute_force_window_secs = {0} is out of range")]
    WindowOutOfRange(u64),
    #[error("dispatch.interval_ms must be greater than zero")]
    ZeroInterval,
}

impl CorrelatorConfig {
    /// Reject values the engine or the dispatch loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.detection.brute_force_window()?;
        if self.dispatch.interval_ms == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CorrelatorConfig {
    /// Correlation rule settings
    pub detection: DetectionConfig,
    /// Event log, signal queue and alert ledger settings
    pub store: StoreConfig,
    /// Background dispatch settings
    pub dispatch: DispatchConfig,
    /// Which enrichment capability turns signals into alerts
    pub analyzer: AnalyzerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Locations that mark a successful login as suspicious
    pub suspicious_locations: Vec<String>,
    /// BRUTE_FORCE fires when failures in the window exceed this count
    pub brute_force_threshold: usize,
    /// Trailing window for counting failed logins, in seconds
    pub brute_force_window_secs: u64,
    /// Failed logins retained per user
    pub failed_login_capacity: usize,
    /// Privilege escalations retained per user
    pub escalation_capacity: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON file holding the alert ledger
    pub alerts_path: PathBuf,
    /// Events kept for observability
    pub event_log_capacity: usize,
    /// Alerts reported as recent activity in metrics
    pub recent_alerts: usize,
    /// Processed signals kept after dispatch; pending signals are never pruned
    pub processed_signal_retention: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Delay between dispatch ticks in milliseconds
    pub interval_ms: u64,
    /// Upper bound on a single analyzer call; unset means wait indefinitely
    pub analyzer_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalyzerConfig {
    /// Local staged narrative pipeline
    #[default]
    Pipeline,
    /// Remote enrichment service
    Webhook { url: String, auth_token: Option<String> },
}

impl DetectionConfig {
    /// Trailing window for BRUTE_FORCE, as a signed offset from the event time.
    pub fn brute_force_window(&self) -> Result<chrono::Duration, ConfigError> {
        let window = Duration::from_secs(self.brute_force_window_secs);
        chrono::Duration::from_std(window)
            .ok()
            // Keep room for subtracting the window from any parsed timestamp.
            .filter(|w| *w <= chrono::Duration::days(365 * 100))
            .ok_or(ConfigError::WindowOutOfRange(self.brute_force_window_secs))
    }
}

impl DispatchConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn analyzer_timeout(&self) -> Option<Duration> {
        self.analyzer_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            suspicious_locations: [
                "Russia",
                "North Korea",
                "Unknown",
                "Tor Exit Node",
                "Romania",
                "Iran",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            brute_force_threshold: 5,
            brute_force_window_secs: 120,
            failed_login_capacity: 20,
            escalation_capacity: 10,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            alerts_path: PathBuf::from("data/alerts.json"),
            event_log_capacity: 1000,
            recent_alerts: 10,
            processed_signal_retention: 1000,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5000,
            analyzer_timeout_ms: None,
        }
    }
}

/// Read a TOML configuration file. Missing sections fall back to defaults.
pub async fn load_config<P: AsRef<Path>>(
    config_path: P,
) -> Result<CorrelatorConfig, Box<dyn std::error::Error>> {
    debug!("Reading config from {:?}", config_path.as_ref());
    let config_content = tokio::fs::read_to_string(config_path.as_ref()).await?;
    let config: CorrelatorConfig = toml::from_str(&config_content)?;
    config.validate()?;
    info!("Loaded config from {:?}", config_path.as_ref());
    Ok(config)
}
