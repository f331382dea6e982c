use crate::alert::thresholds::{DOWNLOAD_RATIO_CRITICAL, DOWNLOAD_RATIO_WARNING};
use crate::alert::{AlertSeverity, AlertType, HealthInputs};

use super::{ThresholdAction, ThresholdCheck};

/// Download throughput relative to the measured bitrate: ERROR at 0.5x,
/// WARNING at 0.8x, resolved above.
pub struct DownloadRatioCheck;

impl ThresholdCheck for DownloadRatioCheck {
    fn name(&self) -> &'static str {
        "DownloadRatio"
    }

    fn evaluate(&self, inputs: &HealthInputs) -> Vec<ThresholdAction> {
        let ratio = inputs.download_ratio;
        if ratio <= DOWNLOAD_RATIO_CRITICAL {
            vec![ThresholdAction::raise(
                AlertType::SlowDownload,
                AlertSeverity::Error,
                format!("Slow download: {ratio:.2}x realtime"),
                "ratio",
                ratio.into(),
            )]
        } else if ratio <= DOWNLOAD_RATIO_WARNING {
            vec![ThresholdAction::raise(
                AlertType::SlowDownload,
                AlertSeverity::Warning,
                format!("Download speed degraded: {ratio:.2}x realtime"),
                "ratio",
                ratio.into(),
            )]
        } else {
            vec![ThresholdAction::Resolve(AlertType::SlowDownload)]
        }
    }
}
