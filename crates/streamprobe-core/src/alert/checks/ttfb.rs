use crate::alert::thresholds::{TTFB_CRITICAL, TTFB_WARNING};
use crate::alert::{AlertSeverity, AlertType, HealthInputs};

use super::{ThresholdAction, ThresholdCheck};

/// Rolling average time-to-first-byte: ERROR at 1000ms, WARNING at 500ms.
pub struct TtfbCheck;

impl ThresholdCheck for TtfbCheck {
    fn name(&self) -> &'static str {
        "Ttfb"
    }

    fn evaluate(&self, inputs: &HealthInputs) -> Vec<ThresholdAction> {
        let ttfb = inputs.ttfb_avg;
        if ttfb >= TTFB_CRITICAL {
            vec![ThresholdAction::raise(
                AlertType::HighTtfb,
                AlertSeverity::Error,
                format!("Very high TTFB: {ttfb:.0}ms"),
                "ttfb_ms",
                ttfb.into(),
            )]
        } else if ttfb >= TTFB_WARNING {
            vec![ThresholdAction::raise(
                AlertType::HighTtfb,
                AlertSeverity::Warning,
                format!("High TTFB: {ttfb:.0}ms"),
                "ttfb_ms",
                ttfb.into(),
            )]
        } else {
            vec![ThresholdAction::Resolve(AlertType::HighTtfb)]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::checks::test_inputs::healthy;

    fn at(ttfb: f64) -> Vec<ThresholdAction> {
        let mut inputs = healthy();
        inputs.ttfb_avg = ttfb;
        TtfbCheck.evaluate(&inputs)
    }

    #[test]
    fn severity_bands() {
        assert!(matches!(
            &at(1000.0)[0],
            ThresholdAction::Raise {
                severity: AlertSeverity::Error,
                ..
            }
        ));
        assert!(matches!(
            &at(500.0)[0],
            ThresholdAction::Raise {
                severity: AlertSeverity::Warning,
                ..
            }
        ));
        assert!(matches!(
            at(499.0)[0],
            ThresholdAction::Resolve(AlertType::HighTtfb)
        ));
    }
}
