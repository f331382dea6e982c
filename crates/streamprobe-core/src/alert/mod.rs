//! Threshold alerting with hysteresis, deduplication and auto-resolution.
//!
//! State per (stream, alert type) is at most one unresolved [`Alert`].
//! Raising while one is active merges timestamp and metadata instead of
//! creating a new record; resolution keeps the record in history. New raises
//! push an `alert_raised` notification into the webhook channel.
//!
//! The thresholds themselves are composable [`checks::ThresholdCheck`]
//! machines, one per alert type; the engine applies whatever raise/resolve
//! actions they produce.

pub mod checks;

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use crate::webhook::Notification;

use self::checks::{ThresholdAction, ThresholdCheck};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    HealthDegraded,
    HealthCritical,
    HighErrorRate,
    ContinuityErrors,
    HighTtfb,
    SlowDownload,
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HealthDegraded => write!(f, "health_degraded"),
            Self::HealthCritical => write!(f, "health_critical"),
            Self::HighErrorRate => write!(f, "high_error_rate"),
            Self::ContinuityErrors => write!(f, "continuity_errors"),
            Self::HighTtfb => write!(f, "high_ttfb"),
            Self::SlowDownload => write!(f, "slow_download"),
        }
    }
}

/// Threshold constants driving the hysteresis state machines.
pub mod thresholds {
    pub const HEALTH_WARNING: u8 = 60;
    pub const HEALTH_CRITICAL: u8 = 40;
    pub const ERROR_RATE_WARNING: f64 = 1.0;
    pub const ERROR_RATE_CRITICAL: f64 = 5.0;
    pub const CONTINUITY_WARNING: u64 = 5;
    pub const CONTINUITY_CRITICAL: u64 = 20;
    pub const TTFB_WARNING: f64 = 500.0;
    pub const TTFB_CRITICAL: f64 = 1000.0;
    pub const DOWNLOAD_RATIO_WARNING: f64 = 0.8;
    pub const DOWNLOAD_RATIO_CRITICAL: f64 = 0.5;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: String,
    pub stream_id: String,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub acknowledged: bool,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct AlertState {
    /// stream_id -> alert_type -> most recent alert of that type.
    active: HashMap<String, HashMap<AlertType, Alert>>,
    history: Vec<Alert>,
    counter: u64,
}

/// Inputs the engine derives from rolling statistics on every segment.
#[derive(Debug, Clone, Copy)]
pub struct HealthInputs {
    pub health_score: u8,
    pub error_rate: f64,
    pub continuity_errors: u64,
    pub ttfb_avg: f64,
    pub download_ratio: f64,
}

pub struct AlertEngine {
    state: Mutex<AlertState>,
    checks: Vec<Box<dyn ThresholdCheck>>,
    notification_tx: Option<UnboundedSender<Notification>>,
}

impl AlertEngine {
    pub fn new(notification_tx: Option<UnboundedSender<Notification>>) -> Self {
        Self {
            state: Mutex::new(AlertState::default()),
            checks: checks::default_threshold_checks(),
            notification_tx,
        }
    }

    fn next_alert_id(counter: &mut u64) -> String {
        *counter += 1;
        format!("alert_{}_{}", Utc::now().format("%Y%m%d_%H%M%S"), counter)
    }

    /// Raise an alert, deduplicating against an unresolved alert of the same
    /// type. Returns the new alert, or `None` when it merged into an existing
    /// one.
    pub fn raise_alert(
        &self,
        stream_id: &str,
        alert_type: AlertType,
        severity: AlertSeverity,
        message: impl Into<String>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Option<Alert> {
        let mut state = self.state.lock().expect("alert state lock");

        let stream_alerts = state.active.entry(stream_id.to_string()).or_default();
        if let Some(existing) = stream_alerts.get_mut(&alert_type) {
            if !existing.resolved {
                existing.timestamp = Utc::now();
                existing.metadata.extend(metadata);
                return None;
            }
        }

        let message = message.into();
        let alert = Alert {
            alert_id: Self::next_alert_id(&mut state.counter),
            stream_id: stream_id.to_string(),
            alert_type,
            severity,
            message: message.clone(),
            timestamp: Utc::now(),
            metadata,
            acknowledged: false,
            resolved: false,
            resolved_at: None,
        };

        state
            .active
            .entry(stream_id.to_string())
            .or_default()
            .insert(alert_type, alert.clone());
        state.history.push(alert.clone());
        drop(state);

        warn!(stream_id, alert_type = %alert_type, severity = ?severity, "Alert raised: {}", message);

        if let Some(tx) = &self.notification_tx {
            let _ = tx.send(Notification::AlertRaised {
                alert: alert.clone(),
            });
        }

        Some(alert)
    }

    /// Mark the active alert of the given type resolved. The record stays in
    /// history. Returns whether an unresolved alert was found.
    pub fn resolve_alert(&self, stream_id: &str, alert_type: AlertType) -> bool {
        let mut state = self.state.lock().expect("alert state lock");

        let Some(alert) = state
            .active
            .get_mut(stream_id)
            .and_then(|alerts| alerts.get_mut(&alert_type))
        else {
            return false;
        };
        if alert.resolved {
            return false;
        }

        alert.resolved = true;
        alert.resolved_at = Some(Utc::now());
        let resolved_at = alert.resolved_at;
        let alert_id = alert.alert_id.clone();

        // Mirror the resolution into the history record.
        if let Some(entry) = state
            .history
            .iter_mut()
            .rev()
            .find(|a| a.alert_id == alert_id)
        {
            entry.resolved = true;
            entry.resolved_at = resolved_at;
        }

        drop(state);
        info!(stream_id, alert_type = %alert_type, "Alert resolved");
        true
    }

    /// Acknowledge an alert by ID. Returns whether it matched.
    pub fn acknowledge_alert(&self, stream_id: &str, alert_id: &str) -> bool {
        let mut state = self.state.lock().expect("alert state lock");
        let mut matched = false;
        if let Some(alerts) = state.active.get_mut(stream_id) {
            for alert in alerts.values_mut() {
                if alert.alert_id == alert_id {
                    alert.acknowledged = true;
                    matched = true;
                }
            }
        }
        if matched {
            if let Some(entry) = state
                .history
                .iter_mut()
                .rev()
                .find(|a| a.alert_id == alert_id)
            {
                entry.acknowledged = true;
            }
        }
        matched
    }

    /// Unresolved alerts for one stream.
    pub fn active_alerts(&self, stream_id: &str) -> Vec<Alert> {
        let state = self.state.lock().expect("alert state lock");
        state
            .active
            .get(stream_id)
            .map(|alerts| alerts.values().filter(|a| !a.resolved).cloned().collect())
            .unwrap_or_default()
    }

    /// Unresolved alerts across all streams, newest first.
    pub fn all_active_alerts(&self) -> Vec<Alert> {
        let state = self.state.lock().expect("alert state lock");
        let mut alerts: Vec<Alert> = state
            .active
            .values()
            .flat_map(|m| m.values())
            .filter(|a| !a.resolved)
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        alerts
    }

    /// Alert history, newest first, optionally filtered.
    pub fn alert_history(
        &self,
        stream_id: Option<&str>,
        limit: usize,
        include_resolved: bool,
    ) -> Vec<Alert> {
        let state = self.state.lock().expect("alert state lock");
        let mut alerts: Vec<Alert> = state
            .history
            .iter()
            .filter(|a| stream_id.is_none_or(|id| a.stream_id == id))
            .filter(|a| include_resolved || !a.resolved)
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        alerts.truncate(limit);
        alerts
    }

    /// Run every hysteresis state machine against fresh health inputs and
    /// apply the raise/resolve decisions they produce.
    pub fn check_thresholds(&self, stream_id: &str, inputs: HealthInputs) {
        for check in &self.checks {
            for action in check.evaluate(&inputs) {
                match action {
                    ThresholdAction::Raise {
                        alert_type,
                        severity,
                        message,
                        metadata,
                    } => {
                        self.raise_alert(stream_id, alert_type, severity, message, metadata);
                    }
                    ThresholdAction::Resolve(alert_type) => {
                        self.resolve_alert(stream_id, alert_type);
                    }
                }
            }
        }
    }

    /// Evict a removed stream's active alerts. History is untouched.
    pub fn cleanup_stream(&self, stream_id: &str) {
        let mut state = self.state.lock().expect("alert state lock");
        state.active.remove(stream_id);
    }

    /// Drop resolved alerts whose resolution time is older than `max_age`.
    pub fn cleanup_old_alerts(&self, max_age: ChronoDuration) {
        let cutoff = Utc::now() - max_age;
        let mut state = self.state.lock().expect("alert state lock");
        state
            .history
            .retain(|a| !a.resolved || a.resolved_at.is_some_and(|t| t > cutoff));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> AlertEngine {
        AlertEngine::new(None)
    }

    fn inputs(score: u8) -> HealthInputs {
        HealthInputs {
            health_score: score,
            error_rate: 0.0,
            continuity_errors: 0,
            ttfb_avg: 0.0,
            download_ratio: 1.0,
        }
    }

    fn has_active(engine: &AlertEngine, stream: &str, t: AlertType) -> bool {
        engine
            .active_alerts(stream)
            .iter()
            .any(|a| a.alert_type == t)
    }

    #[test]
    fn raise_and_dedup() {
        let e = engine();
        let first = e.raise_alert(
            "s1",
            AlertType::HighTtfb,
            AlertSeverity::Warning,
            "High TTFB",
            HashMap::new(),
        );
        assert!(first.is_some());

        let second = e.raise_alert(
            "s1",
            AlertType::HighTtfb,
            AlertSeverity::Warning,
            "High TTFB again",
            HashMap::from([("ttfb_ms".to_string(), serde_json::json!(900))]),
        );
        assert!(second.is_none(), "same-type raise must merge");

        let active = e.active_alerts("s1");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].metadata["ttfb_ms"], serde_json::json!(900));
        assert_eq!(e.alert_history(Some("s1"), 100, true).len(), 1);
    }

    #[test]
    fn resolve_keeps_history() {
        let e = engine();
        e.raise_alert(
            "s1",
            AlertType::SlowDownload,
            AlertSeverity::Error,
            "slow",
            HashMap::new(),
        );
        assert!(e.resolve_alert("s1", AlertType::SlowDownload));
        assert!(!e.resolve_alert("s1", AlertType::SlowDownload));

        assert!(e.active_alerts("s1").is_empty());
        let history = e.alert_history(Some("s1"), 100, true);
        assert_eq!(history.len(), 1);
        assert!(history[0].resolved);
        assert!(history[0].resolved_at.is_some());
    }

    #[test]
    fn reraise_after_resolution_creates_new_record() {
        let e = engine();
        e.raise_alert(
            "s1",
            AlertType::HighErrorRate,
            AlertSeverity::Warning,
            "elevated",
            HashMap::new(),
        );
        e.resolve_alert("s1", AlertType::HighErrorRate);
        let again = e.raise_alert(
            "s1",
            AlertType::HighErrorRate,
            AlertSeverity::Error,
            "high",
            HashMap::new(),
        );
        assert!(again.is_some());
        assert_eq!(e.alert_history(Some("s1"), 100, true).len(), 2);
        assert_eq!(e.active_alerts("s1").len(), 1);
    }

    #[test]
    fn acknowledge_by_id() {
        let e = engine();
        let alert = e
            .raise_alert(
                "s1",
                AlertType::HealthDegraded,
                AlertSeverity::Warning,
                "degraded",
                HashMap::new(),
            )
            .unwrap();
        assert!(e.acknowledge_alert("s1", &alert.alert_id));
        assert!(!e.acknowledge_alert("s1", "alert_nope_1"));
        assert!(e.active_alerts("s1")[0].acknowledged);
    }

    #[test]
    fn health_hysteresis_sequence() {
        let e = engine();

        e.check_thresholds("s1", inputs(45));
        assert!(has_active(&e, "s1", AlertType::HealthDegraded));
        assert!(!has_active(&e, "s1", AlertType::HealthCritical));

        e.check_thresholds("s1", inputs(35));
        assert!(has_active(&e, "s1", AlertType::HealthDegraded));
        assert!(has_active(&e, "s1", AlertType::HealthCritical));

        e.check_thresholds("s1", inputs(55));
        assert!(has_active(&e, "s1", AlertType::HealthDegraded));
        assert!(!has_active(&e, "s1", AlertType::HealthCritical));

        e.check_thresholds("s1", inputs(70));
        assert!(!has_active(&e, "s1", AlertType::HealthDegraded));
        assert!(!has_active(&e, "s1", AlertType::HealthCritical));
    }

    #[test]
    fn error_rate_thresholds() {
        let e = engine();
        let mut i = inputs(100);

        i.error_rate = 5.0;
        e.check_thresholds("s1", i);
        let active = e.active_alerts("s1");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].severity, AlertSeverity::Error);

        i.error_rate = 0.5;
        e.check_thresholds("s1", i);
        assert!(e.active_alerts("s1").is_empty());
    }

    #[test]
    fn warn_to_error_escalation_merges() {
        let e = engine();
        let mut i = inputs(100);

        i.error_rate = 2.0;
        e.check_thresholds("s1", i);
        i.error_rate = 7.0;
        e.check_thresholds("s1", i);

        // one record, still at its original severity
        let history = e.alert_history(Some("s1"), 100, true);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].severity, AlertSeverity::Warning);
    }

    #[test]
    fn cleanup_stream_evicts_active() {
        let e = engine();
        e.raise_alert(
            "s1",
            AlertType::HighTtfb,
            AlertSeverity::Warning,
            "ttfb",
            HashMap::new(),
        );
        e.cleanup_stream("s1");
        assert!(e.active_alerts("s1").is_empty());
        // history survives
        assert_eq!(e.alert_history(Some("s1"), 100, true).len(), 1);
    }

    #[test]
    fn cleanup_old_alerts_drops_stale_resolved() {
        let e = engine();
        e.raise_alert(
            "s1",
            AlertType::HighTtfb,
            AlertSeverity::Warning,
            "ttfb",
            HashMap::new(),
        );
        e.resolve_alert("s1", AlertType::HighTtfb);
        {
            let mut state = e.state.lock().unwrap();
            state.history[0].resolved_at = Some(Utc::now() - ChronoDuration::hours(48));
        }
        e.cleanup_old_alerts(ChronoDuration::hours(24));
        assert!(e.alert_history(Some("s1"), 100, true).is_empty());

        // unresolved alerts are never dropped
        e.raise_alert(
            "s1",
            AlertType::SlowDownload,
            AlertSeverity::Error,
            "slow",
            HashMap::new(),
        );
        e.cleanup_old_alerts(ChronoDuration::hours(0));
        assert_eq!(e.alert_history(Some("s1"), 100, true).len(), 1);
    }

    #[test]
    fn notification_sent_on_new_raise_only() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let e = AlertEngine::new(Some(tx));
        e.raise_alert(
            "s1",
            AlertType::HighTtfb,
            AlertSeverity::Warning,
            "ttfb",
            HashMap::new(),
        );
        e.raise_alert(
            "s1",
            AlertType::HighTtfb,
            AlertSeverity::Warning,
            "ttfb",
            HashMap::new(),
        );
        let first = rx.try_recv();
        assert!(first.is_ok());
        assert!(rx.try_recv().is_err(), "merged raise must not notify");
    }
}
