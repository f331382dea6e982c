//! Deterministic stream health scoring.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::Alert;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    Starting,
    Online,
    Offline,
    Error,
}

impl std::fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthColor {
    Green,
    Yellow,
    Red,
}

/// Composite health score: 0-100, a color band, and the applied penalties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthScore {
    pub score: u8,
    pub color: HealthColor,
    pub factors: BTreeMap<String, String>,
}

impl Default for HealthScore {
    fn default() -> Self {
        Self {
            score: 100,
            color: HealthColor::Green,
            factors: BTreeMap::new(),
        }
    }
}

impl HealthScore {
    /// Start at 100 and deduct a capped penalty per factor.
    #[allow(clippy::too_many_arguments)]
    pub fn compute(
        error_rate: f64,
        continuity_errors: u64,
        sync_errors: u64,
        transport_errors: u64,
        ttfb_avg: f64,
        download_ratio: f64,
        manifest_errors: usize,
    ) -> Self {
        let mut score: i64 = 100;
        let mut factors = BTreeMap::new();

        let mut apply = |name: &str, penalty: i64, reason: String| {
            if penalty > 0 {
                score -= penalty;
                factors.insert(name.to_string(), format!("-{} ({})", penalty, reason));
            }
        };

        if error_rate > 0.0 {
            let p = ((error_rate * 10.0) as i64).min(30);
            apply("error_rate", p, format!("rate: {:.1}%", error_rate));
        }
        if continuity_errors > 0 {
            let p = (continuity_errors as i64 * 2).min(20);
            apply(
                "continuity_errors",
                p,
                format!("count: {}", continuity_errors),
            );
        }
        if sync_errors > 0 {
            let p = (sync_errors as i64 * 5).min(25);
            apply("sync_errors", p, format!("count: {}", sync_errors));
        }
        if transport_errors > 0 {
            let p = (transport_errors as i64 * 3).min(15);
            apply("transport_errors", p, format!("count: {}", transport_errors));
        }
        if ttfb_avg > 500.0 {
            let p = (((ttfb_avg - 500.0) / 100.0) as i64).min(10);
            apply("high_ttfb", p, format!("avg: {:.0}ms", ttfb_avg));
        }
        if download_ratio < 1.0 {
            let p = (((1.0 - download_ratio) * 30.0) as i64).min(15);
            apply("slow_download", p, format!("ratio: {:.2}x", download_ratio));
        }
        if manifest_errors > 0 {
            let p = (manifest_errors as i64 * 5).min(10);
            apply("manifest_errors", p, format!("count: {}", manifest_errors));
        }

        let score = score.clamp(0, 100) as u8;
        let color = if score >= 80 {
            HealthColor::Green
        } else if score >= 50 {
            HealthColor::Yellow
        } else {
            HealthColor::Red
        };

        Self {
            score,
            color,
            factors,
        }
    }
}

/// Cumulative TR 101 290 counters for the lifetime of a monitored stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tr101290Totals {
    pub sync_byte_errors: u64,
    pub continuity_errors: u64,
    pub transport_errors: u64,
    pub pat_errors: u64,
    pub pcr_discontinuities: u64,
    pub last_updated: DateTime<Utc>,
}

impl Default for Tr101290Totals {
    fn default() -> Self {
        Self {
            sync_byte_errors: 0,
            continuity_errors: 0,
            transport_errors: 0,
            pat_errors: 0,
            pcr_discontinuities: 0,
            last_updated: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestError {
    pub error_type: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub severity: String,
}

impl ManifestError {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            timestamp: Utc::now(),
            severity: "error".to_string(),
        }
    }
}

/// Live health snapshot for one stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamHealth {
    pub status: StreamStatus,
    pub health_score: HealthScore,
    /// Percentage of failed downloads over the rolling attempt window.
    pub error_rate: f64,
    pub tr101290: Tr101290Totals,
    pub manifest_errors: Vec<ManifestError>,
    pub active_alerts: Vec<Alert>,
    pub last_updated: DateTime<Utc>,
}

impl StreamHealth {
    pub fn new(status: StreamStatus) -> Self {
        Self {
            status,
            health_score: HealthScore::default(),
            error_rate: 0.0,
            tr101290: Tr101290Totals::default(),
            manifest_errors: Vec::new(),
            active_alerts: Vec::new(),
            last_updated: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_inputs_score_100() {
        let hs = HealthScore::compute(0.0, 0, 0, 0, 0.0, 1.0, 0);
        assert_eq!(hs.score, 100);
        assert_eq!(hs.color, HealthColor::Green);
        assert!(hs.factors.is_empty());
    }

    #[test]
    fn error_rate_and_continuity_yield_yellow() {
        let hs = HealthScore::compute(2.0, 10, 0, 0, 200.0, 1.0, 0);
        assert_eq!(hs.score, 60);
        assert_eq!(hs.color, HealthColor::Yellow);
        assert_eq!(hs.factors.len(), 2);
        assert_eq!(hs.factors["error_rate"], "-20 (rate: 2.0%)");
        assert_eq!(hs.factors["continuity_errors"], "-20 (count: 10)");
    }

    #[test]
    fn penalties_are_capped() {
        let hs = HealthScore::compute(100.0, 1000, 1000, 1000, 10_000.0, 0.0, 100);
        // 30 + 20 + 25 + 15 + 10 + 15 + 10 = 115, clamped to 0
        assert_eq!(hs.score, 0);
        assert_eq!(hs.color, HealthColor::Red);
    }

    #[test]
    fn ttfb_below_threshold_is_free() {
        let hs = HealthScore::compute(0.0, 0, 0, 0, 500.0, 1.0, 0);
        assert_eq!(hs.score, 100);
    }

    #[test]
    fn ttfb_penalty_is_floored() {
        let hs = HealthScore::compute(0.0, 0, 0, 0, 799.0, 1.0, 0);
        assert_eq!(hs.score, 98);
        assert_eq!(hs.factors["high_ttfb"], "-2 (avg: 799ms)");
    }

    #[test]
    fn slow_download_penalty() {
        let hs = HealthScore::compute(0.0, 0, 0, 0, 0.0, 0.5, 0);
        assert_eq!(hs.score, 85);
        assert_eq!(hs.factors["slow_download"], "-15 (ratio: 0.50x)");
    }

    #[test]
    fn color_band_edges() {
        assert_eq!(HealthScore::compute(2.0, 0, 0, 0, 0.0, 1.0, 0).score, 80);
        assert_eq!(
            HealthScore::compute(2.0, 0, 0, 0, 0.0, 1.0, 0).color,
            HealthColor::Green
        );
        let yellow = HealthScore::compute(2.1, 0, 0, 0, 0.0, 1.0, 0);
        assert_eq!(yellow.score, 79);
        assert_eq!(yellow.color, HealthColor::Yellow);
        let lower_yellow = HealthScore::compute(10.0, 1000, 0, 0, 0.0, 1.0, 0);
        assert_eq!(lower_yellow.score, 50);
        assert_eq!(lower_yellow.color, HealthColor::Yellow);
        let red = HealthScore::compute(10.0, 1000, 1, 0, 0.0, 1.0, 0);
        assert_eq!(red.score, 45);
        assert_eq!(red.color, HealthColor::Red);
    }

    #[test]
    fn zero_penalty_factors_are_omitted() {
        // 0.05% -> floor(0.5) = 0 penalty, no factor entry
        let hs = HealthScore::compute(0.05, 0, 0, 0, 0.0, 1.0, 0);
        assert_eq!(hs.score, 100);
        assert!(hs.factors.is_empty());
    }
}
