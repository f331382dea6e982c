use crate::alert::thresholds::{CONTINUITY_CRITICAL, CONTINUITY_WARNING};
use crate::alert::{AlertSeverity, AlertType, HealthInputs};

use super::{ThresholdAction, ThresholdCheck};

/// Cumulative continuity counter errors: ERROR at 20, WARNING at 5.
pub struct ContinuityErrorsCheck;

impl ThresholdCheck for ContinuityErrorsCheck {
    fn name(&self) -> &'static str {
        "ContinuityErrors"
    }

    fn evaluate(&self, inputs: &HealthInputs) -> Vec<ThresholdAction> {
        let count = inputs.continuity_errors;
        if count >= CONTINUITY_CRITICAL {
            vec![ThresholdAction::raise(
                AlertType::ContinuityErrors,
                AlertSeverity::Error,
                format!("High continuity errors: {count}"),
                "count",
                count.into(),
            )]
        } else if count >= CONTINUITY_WARNING {
            vec![ThresholdAction::raise(
                AlertType::ContinuityErrors,
                AlertSeverity::Warning,
                format!("Continuity errors detected: {count}"),
                "count",
                count.into(),
            )]
        } else {
            vec![ThresholdAction::Resolve(AlertType::ContinuityErrors)]
        }
    }
}
