use crate::alert::thresholds::{HEALTH_CRITICAL, HEALTH_WARNING};
use crate::alert::{AlertSeverity, AlertType, HealthInputs};

use super::{ThresholdAction, ThresholdCheck};

/// The coupled HEALTH_CRITICAL / HEALTH_DEGRADED pair. Crossing back above
/// the critical threshold resolves only the critical alert; the degraded
/// alert stays until the score recovers past the warning threshold.
pub struct HealthScoreCheck;

impl ThresholdCheck for HealthScoreCheck {
    fn name(&self) -> &'static str {
        "HealthScore"
    }

    fn evaluate(&self, inputs: &HealthInputs) -> Vec<ThresholdAction> {
        let score = inputs.health_score;
        if score < HEALTH_CRITICAL {
            vec![ThresholdAction::raise(
                AlertType::HealthCritical,
                AlertSeverity::Critical,
                format!("Health score critical: {score}%"),
                "health_score",
                score.into(),
            )]
        } else if score < HEALTH_WARNING {
            vec![
                ThresholdAction::Resolve(AlertType::HealthCritical),
                ThresholdAction::raise(
                    AlertType::HealthDegraded,
                    AlertSeverity::Warning,
                    format!("Health score degraded: {score}%"),
                    "health_score",
                    score.into(),
                ),
            ]
        } else {
            vec![
                ThresholdAction::Resolve(AlertType::HealthCritical),
                ThresholdAction::Resolve(AlertType::HealthDegraded),
            ]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::checks::test_inputs::healthy;

    fn at(score: u8) -> Vec<ThresholdAction> {
        let mut inputs = healthy();
        inputs.health_score = score;
        HealthScoreCheck.evaluate(&inputs)
    }

    #[test]
    fn critical_below_forty() {
        let actions = at(35);
        assert_eq!(actions.len(), 1);
        assert!(matches!(
            &actions[0],
            ThresholdAction::Raise {
                alert_type: AlertType::HealthCritical,
                severity: AlertSeverity::Critical,
                ..
            }
        ));
    }

    #[test]
    fn degraded_band_resolves_critical_and_raises_degraded() {
        let actions = at(45);
        assert!(matches!(
            actions[0],
            ThresholdAction::Resolve(AlertType::HealthCritical)
        ));
        assert!(matches!(
            &actions[1],
            ThresholdAction::Raise {
                alert_type: AlertType::HealthDegraded,
                severity: AlertSeverity::Warning,
                ..
            }
        ));
    }

    #[test]
    fn recovery_resolves_both() {
        let actions = at(60);
        assert_eq!(actions.len(), 2);
        assert!(matches!(
            actions[0],
            ThresholdAction::Resolve(AlertType::HealthCritical)
        ));
        assert!(matches!(
            actions[1],
            ThresholdAction::Resolve(AlertType::HealthDegraded)
        ));
    }
}
