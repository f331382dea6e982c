use crate::alert::thresholds::{ERROR_RATE_CRITICAL, ERROR_RATE_WARNING};
use crate::alert::{AlertSeverity, AlertType, HealthInputs};

use super::{ThresholdAction, ThresholdCheck};

/// Rolling download error rate: ERROR at 5%, WARNING at 1%, resolved below.
pub struct ErrorRateCheck;

impl ThresholdCheck for ErrorRateCheck {
    fn name(&self) -> &'static str {
        "ErrorRate"
    }

    fn evaluate(&self, inputs: &HealthInputs) -> Vec<ThresholdAction> {
        let rate = inputs.error_rate;
        if rate >= ERROR_RATE_CRITICAL {
            vec![ThresholdAction::raise(
                AlertType::HighErrorRate,
                AlertSeverity::Error,
                format!("High error rate: {rate:.2}%"),
                "error_rate",
                rate.into(),
            )]
        } else if rate >= ERROR_RATE_WARNING {
            vec![ThresholdAction::raise(
                AlertType::HighErrorRate,
                AlertSeverity::Warning,
                format!("Elevated error rate: {rate:.2}%"),
                "error_rate",
                rate.into(),
            )]
        } else {
            vec![ThresholdAction::Resolve(AlertType::HighErrorRate)]
        }
    }
}
