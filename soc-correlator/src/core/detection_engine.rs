/*!
Stateful correlation rules for identifying multi-event attack patterns
*/

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info};

use soc_model::{
    DetectionSignal, EventType, Metadata, ParseError, SecurityEvent, Severity, SignalType,
};

use crate::core::config::{ConfigError, DetectionConfig};

/// A single correlation rule.
///
/// Each rule owns its per-user state and only ever sees the event types it
/// declares, so no rule can observe another rule's windows.
pub trait CorrelationRule: Send + Sync {
    /// Name of the rule
    fn name(&self) -> &'static str;

    /// Whether this rule consumes events of the given type
    fn handles(&self, event_type: EventType) -> bool;

    /// Fold the event into the rule's state and report a signal if the rule fires.
    ///
    /// `observed_at` is the event's own timestamp, used as "now" for any
    /// time-bounded window.
    fn evaluate(&self, event: &SecurityEvent, observed_at: DateTime<Utc>) -> Option<DetectionSignal>;
}

/// Main detection engine that runs each event through the matching rule
pub struct DetectionEngine {
    rules: Vec<Box<dyn CorrelationRule>>,
}

impl DetectionEngine {
    /// Build the rule set. Fails when a configured window cannot be represented.
    pub fn new(config: &DetectionConfig) -> Result<Self, ConfigError> {
        let rules: Vec<Box<dyn CorrelationRule>> = vec![
            Box::new(BruteForceRule::new(config)?),
            Box::new(SuspiciousLoginRule::new(config)),
            Box::new(InsiderThreatRule::new(config)),
        ];

        info!("Initialized detection engine with {} rules", rules.len());

        Ok(Self { rules })
    }

    /// Analyze one event, returning at most one signal.
    ///
    /// An unparseable timestamp fails the call before any window is touched;
    /// wall-clock time is never substituted.
    pub fn analyze(&self, event: &SecurityEvent) -> Result<Option<DetectionSignal>, ParseError> {
        let observed_at = event.parsed_timestamp()?;

        for rule in self.rules.iter().filter(|rule| rule.handles(event.event_type)) {
            if let Some(signal) = rule.evaluate(event, observed_at) {
                info!(
                    "{} fired for user {} (signal {})",
                    rule.name(),
                    signal.user,
                    signal.signal_id
                );
                return Ok(Some(signal));
            }
            debug!("No detection by {} for user {}", rule.name(), event.user);
        }

        Ok(None)
    }
}

fn lock_windows<T>(windows: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panic mid-update leaves at worst one missing entry; keep correlating.
    windows.lock().unwrap_or_else(PoisonError::into_inner)
}

fn push_bounded<T>(window: &mut VecDeque<T>, capacity: usize, item: T) {
    window.push_back(item);
    while window.len() > capacity {
        window.pop_front();
    }
}

fn describe_window(secs: i64) -> String {
    match secs {
        60 => "1 minute".to_string(),
        s if s % 60 == 0 => format!("{} minutes", s / 60),
        s => format!("{} seconds", s),
    }
}

/// Too many failed logins for one user inside a trailing time window.
///
/// The window is not reset after firing: every further qualifying failure
/// fires again.
struct BruteForceRule {
    threshold: usize,
    window: chrono::Duration,
    capacity: usize,
    failures: Mutex<HashMap<String, VecDeque<(DateTime<Utc>, SecurityEvent)>>>,
}

impl BruteForceRule {
    fn new(config: &DetectionConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            threshold: config.brute_force_threshold,
            window: config.brute_force_window()?,
            capacity: config.failed_login_capacity,
            failures: Mutex::new(HashMap::new()),
        })
    }
}

impl CorrelationRule for BruteForceRule {
    fn name(&self) -> &'static str {
        "BruteForce"
    }

    fn handles(&self, event_type: EventType) -> bool {
        event_type == EventType::LoginFailure
    }

    fn evaluate(&self, event: &SecurityEvent, observed_at: DateTime<Utc>) -> Option<DetectionSignal> {
        let mut failures = lock_windows(&self.failures);
        let window = failures.entry(event.user.clone()).or_default();
        push_bounded(window, self.capacity, (observed_at, event.clone()));

        // Retained entries older than the window stay in memory but never count.
        let cutoff = observed_at - self.window;
        let recent: Vec<SecurityEvent> = window
            .iter()
            .filter(|(at, _)| *at > cutoff)
            .map(|(_, e)| e.clone())
            .collect();

        if recent.len() <= self.threshold {
            return None;
        }

        let source_ips: BTreeSet<&str> = recent.iter().map(|e| e.source_ip.as_str()).collect();
        let mut metadata = Metadata::new();
        metadata.insert("failed_attempts".into(), json!(recent.len()));
        metadata.insert(
            "time_window".into(),
            json!(describe_window(self.window.num_seconds())),
        );
        metadata.insert("ips".into(), json!(source_ips));

        Some(DetectionSignal::new(
            SignalType::BruteForce,
            event.user.clone(),
            Severity::High,
            recent,
            metadata,
        ))
    }
}

/// Successful login from a location on the watch list. Stateless.
struct SuspiciousLoginRule {
    locations: HashSet<String>,
}

impl SuspiciousLoginRule {
    fn new(config: &DetectionConfig) -> Self {
        Self {
            locations: config.suspicious_locations.iter().cloned().collect(),
        }
    }
}

impl CorrelationRule for SuspiciousLoginRule {
    fn name(&self) -> &'static str {
        "SuspiciousLogin"
    }

    fn handles(&self, event_type: EventType) -> bool {
        matches!(
            event_type,
            EventType::LoginSuccess | EventType::NewCountryLogin
        )
    }

    fn evaluate(&self, event: &SecurityEvent, _observed_at: DateTime<Utc>) -> Option<DetectionSignal> {
        if !self.locations.contains(&event.location) {
            return None;
        }

        let mut metadata = Metadata::new();
        metadata.insert("location".into(), json!(event.location));
        metadata.insert("ip".into(), json!(event.source_ip));
        metadata.insert("reason".into(), json!("geographic anomaly"));

        Some(DetectionSignal::new(
            SignalType::SuspiciousLogin,
            event.user.clone(),
            Severity::High,
            vec![event.clone()],
            metadata,
        ))
    }
}

/// Privilege escalation followed by a data download from the same user.
///
/// Escalations are bounded only by count, so an old escalation still
/// correlates with a much later download while it is retained.
struct InsiderThreatRule {
    capacity: usize,
    escalations: Mutex<HashMap<String, VecDeque<SecurityEvent>>>,
}

impl InsiderThreatRule {
    fn new(config: &DetectionConfig) -> Self {
        Self {
            capacity: config.escalation_capacity,
            escalations: Mutex::new(HashMap::new()),
        }
    }
}

impl CorrelationRule for InsiderThreatRule {
    fn name(&self) -> &'static str {
        "InsiderThreat"
    }

    fn handles(&self, event_type: EventType) -> bool {
        matches!(
            event_type,
            EventType::PrivEscalation | EventType::DataDownload
        )
    }

    fn evaluate(&self, event: &SecurityEvent, _observed_at: DateTime<Utc>) -> Option<DetectionSignal> {
        let mut escalations = lock_windows(&self.escalations);

        if event.event_type == EventType::PrivEscalation {
            let window = escalations.entry(event.user.clone()).or_default();
            push_bounded(window, self.capacity, event.clone());
            return None;
        }

        let retained = escalations.get(&event.user).filter(|w| !w.is_empty())?;

        let mut events: Vec<SecurityEvent> = retained.iter().cloned().collect();
        let escalation_count = events.len();
        events.push(event.clone());

        let mut metadata = Metadata::new();
        metadata.insert(
            "pattern".into(),
            json!("priv_escalation → data_download"),
        );
        metadata.insert("asset".into(), json!(event.asset));
        metadata.insert("escalation_count".into(), json!(escalation_count));

        Some(DetectionSignal::new(
            SignalType::InsiderThreat,
            event.user.clone(),
            Severity::Critical,
            events,
            metadata,
        ))
    }
}
