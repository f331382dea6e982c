pub mod continuity;
pub mod download_ratio;
pub mod error_rate;
pub mod health_score;
pub mod ttfb;

use std::collections::HashMap;

use super::{AlertSeverity, AlertType, HealthInputs};

/// One raise or resolve decision produced by a threshold check.
#[derive(Debug)]
pub enum ThresholdAction {
    Raise {
        alert_type: AlertType,
        severity: AlertSeverity,
        message: String,
        metadata: HashMap<String, serde_json::Value>,
    },
    Resolve(AlertType),
}

impl ThresholdAction {
    pub(crate) fn raise(
        alert_type: AlertType,
        severity: AlertSeverity,
        message: String,
        key: &str,
        value: serde_json::Value,
    ) -> Self {
        Self::Raise {
            alert_type,
            severity,
            message,
            metadata: HashMap::from([(key.to_string(), value)]),
        }
    }
}

/// Trait for a composable hysteresis state machine over health inputs.
///
/// Checks are stateless: the hysteresis lives in the engine's active-alert
/// map, where raising an already-active type merges and resolving an absent
/// type is a no-op.
pub trait ThresholdCheck: Send + Sync {
    /// Human-readable name of this check.
    fn name(&self) -> &'static str;

    /// Decide what the inputs mean for this check's alert type(s).
    fn evaluate(&self, inputs: &HealthInputs) -> Vec<ThresholdAction>;
}

/// Build the default set of threshold machines, in evaluation order.
pub fn default_threshold_checks() -> Vec<Box<dyn ThresholdCheck>> {
    vec![
        Box::new(health_score::HealthScoreCheck),
        Box::new(error_rate::ErrorRateCheck),
        Box::new(continuity::ContinuityErrorsCheck),
        Box::new(ttfb::TtfbCheck),
        Box::new(download_ratio::DownloadRatioCheck),
    ]
}
