//! Pure segment metric calculations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Measurements for one successfully downloaded media segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentMetrics {
    pub uri: String,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    /// Declared bandwidth from the selected variant, bits/s.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bandwidth: Option<u64>,
    /// Mb/s derived from segment size and duration.
    pub actual_bitrate: f64,
    /// Mb/s derived from segment size and body-read time.
    pub download_speed: f64,
    /// Seconds.
    pub segment_duration: f64,
    /// Milliseconds until response headers arrived.
    pub ttfb: f64,
    /// Milliseconds spent reading the body.
    pub download_time: f64,
    pub segment_size_bytes: u64,
    pub segment_size_mb: f64,
    pub timestamp: DateTime<Utc>,
    pub sequence_number: u64,
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Actual bitrate in Mb/s: `size * 8 / duration / 1e6`. Zero when duration is zero.
pub fn bitrate_mbps(size_bytes: u64, duration_secs: f64) -> f64 {
    if duration_secs <= 0.0 {
        return 0.0;
    }
    round3(size_bytes as f64 * 8.0 / duration_secs / 1_000_000.0)
}

/// Download throughput in Mb/s from a download time in milliseconds.
pub fn download_speed_mbps(size_bytes: u64, download_ms: f64) -> f64 {
    if download_ms <= 0.0 {
        return 0.0;
    }
    round3(size_bytes as f64 * 8.0 / (download_ms / 1000.0) / 1_000_000.0)
}

pub fn bytes_to_mb(size_bytes: u64) -> f64 {
    round3(size_bytes as f64 / (1024.0 * 1024.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitrate_from_size_and_duration() {
        // 3 MB over 6 seconds = 4 Mb/s
        assert_eq!(bitrate_mbps(3_000_000, 6.0), 4.0);
    }

    #[test]
    fn bitrate_zero_duration_is_zero() {
        assert_eq!(bitrate_mbps(3_000_000, 0.0), 0.0);
    }

    #[test]
    fn download_speed_from_millis() {
        // 1 MB in 500ms = 16 Mb/s
        assert_eq!(download_speed_mbps(1_000_000, 500.0), 16.0);
    }

    #[test]
    fn download_speed_zero_time_is_zero() {
        assert_eq!(download_speed_mbps(1_000_000, 0.0), 0.0);
    }

    #[test]
    fn rounds_to_three_decimals() {
        // 1234567 bytes over 6.1s = 1.619... Mb/s
        let v = bitrate_mbps(1_234_567, 6.1);
        assert_eq!(v, (1_234_567.0 * 8.0 / 6.1 / 1e6 * 1000.0_f64).round() / 1000.0);
    }

    #[test]
    fn megabytes_conversion() {
        assert_eq!(bytes_to_mb(1_048_576), 1.0);
        assert_eq!(bytes_to_mb(0), 0.0);
    }
}
