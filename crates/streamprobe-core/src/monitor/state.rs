use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::alert::HealthInputs;
use crate::config::MonitorSettings;
use crate::health::{HealthScore, StreamHealth, StreamStatus};
use crate::manifest::VariantInfo;
use crate::media::LoudnessData;
use crate::metrics::SegmentMetrics;
use crate::ring::Ring;
use crate::ts::TsAnalyzer;

/// Manifest errors older than this stop counting against the health score.
const MANIFEST_ERROR_WINDOW_HOURS: i64 = 1;
/// Rolling statistics cover this many recent segments.
const ROLLING_SEGMENTS: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub id: String,
    pub name: String,
    pub manifest_url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

/// An SCTE-35 sighting inside a downloaded segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scte35Event {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub segment_sequence: u64,
    pub message_count: u64,
    pub pids: Vec<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub splice_command_type: Option<String>,
}

/// Insertion-ordered set of observed segment URIs, bounded with drop-oldest.
/// Live playlists slide forward, so evicted URIs will not legitimately
/// reappear.
pub(crate) struct SeenSegments {
    set: HashSet<String>,
    order: VecDeque<String>,
    limit: usize,
}

impl SeenSegments {
    pub fn new(limit: usize) -> Self {
        Self {
            set: HashSet::new(),
            order: VecDeque::new(),
            limit,
        }
    }

    /// Returns true when the URI was not seen before.
    pub fn insert(&mut self, uri: &str) -> bool {
        if !self.set.insert(uri.to_string()) {
            return false;
        }
        self.order.push_back(uri.to_string());
        while self.order.len() > self.limit {
            if let Some(evicted) = self.order.pop_front() {
                self.set.remove(&evicted);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }
}

/// All mutable per-stream state, owned exclusively by the engine's registry.
pub(crate) struct StreamSlot {
    pub config: StreamConfig,
    pub seen: SeenSegments,
    pub next_sequence: u64,
    pub health: StreamHealth,
    pub current_metrics: Option<SegmentMetrics>,
    pub metrics_history: Ring<SegmentMetrics>,
    pub loudness_history: Ring<LoudnessData>,
    pub scte35_events: Ring<Scte35Event>,
    pub scte35_count: u64,
    pub thumbs_buffer: Vec<(PathBuf, DateTime<Utc>)>,
    /// Variant the pipeline locked onto, for metric enrichment.
    pub variant: Option<VariantInfo>,
    pub last_variant_count: Option<usize>,
    /// Rolling download outcomes, newest last. true = success.
    pub download_window: VecDeque<bool>,
    download_window_limit: usize,
    /// Shared with the TS analysis tasks; serializes per-PID tracker updates.
    pub ts_analyzer: Arc<Mutex<TsAnalyzer>>,
    /// Bounds concurrent segment downloads for this stream.
    pub inflight: Arc<Semaphore>,
}

impl StreamSlot {
    pub fn new(config: StreamConfig, settings: &MonitorSettings) -> Self {
        Self {
            config,
            seen: SeenSegments::new(settings.seen_segment_limit),
            next_sequence: 0,
            health: StreamHealth::new(StreamStatus::Starting),
            current_metrics: None,
            metrics_history: Ring::new(settings.metrics_history_limit),
            loudness_history: Ring::new(settings.loudness_history_limit),
            scte35_events: Ring::new(settings.scte35_event_limit),
            scte35_count: 0,
            thumbs_buffer: Vec::new(),
            variant: None,
            last_variant_count: None,
            download_window: VecDeque::new(),
            download_window_limit: settings.error_window,
            ts_analyzer: Arc::new(Mutex::new(TsAnalyzer::new())),
            inflight: Arc::new(Semaphore::new(settings.max_inflight_downloads)),
        }
    }

    pub fn record_download(&mut self, success: bool) {
        self.download_window.push_back(success);
        while self.download_window.len() > self.download_window_limit {
            self.download_window.pop_front();
        }
    }

    /// Failed downloads as a percentage of the rolling attempt window.
    pub fn error_rate(&self) -> f64 {
        if self.download_window.is_empty() {
            return 0.0;
        }
        let failures = self.download_window.iter().filter(|ok| !**ok).count();
        failures as f64 / self.download_window.len() as f64 * 100.0
    }

    /// Recompute the health score from rolling statistics and return the
    /// inputs the alert engine evaluates. `download_ratio` is capped at 2.0
    /// for both consumers.
    pub fn refresh_health(&mut self) -> HealthInputs {
        let cutoff = Utc::now() - ChronoDuration::hours(MANIFEST_ERROR_WINDOW_HOURS);
        self.health.manifest_errors.retain(|e| e.timestamp > cutoff);

        let recent = self.metrics_history.tail(ROLLING_SEGMENTS);
        let (ttfb_avg, download_ratio) = if recent.is_empty() {
            (0.0, 1.0)
        } else {
            let n = recent.len() as f64;
            let ttfb_avg = recent.iter().map(|m| m.ttfb).sum::<f64>() / n;
            let avg_speed = recent.iter().map(|m| m.download_speed).sum::<f64>() / n;
            let avg_bitrate = recent.iter().map(|m| m.actual_bitrate).sum::<f64>() / n;
            let ratio = if avg_bitrate > 0.0 {
                (avg_speed / avg_bitrate).min(2.0)
            } else {
                1.0
            };
            (ttfb_avg, ratio)
        };

        let error_rate = self.error_rate();
        let tr = &self.health.tr101290;
        let score = HealthScore::compute(
            error_rate,
            tr.continuity_errors,
            tr.sync_byte_errors,
            tr.transport_errors,
            ttfb_avg,
            download_ratio,
            self.health.manifest_errors.len(),
        );

        let inputs = HealthInputs {
            health_score: score.score,
            error_rate,
            continuity_errors: tr.continuity_errors,
            ttfb_avg,
            download_ratio,
        };

        self.health.error_rate = error_rate;
        self.health.health_score = score;
        self.health.last_updated = Utc::now();

        inputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot() -> StreamSlot {
        let config = StreamConfig {
            id: "s1".into(),
            name: "Stream 1".into(),
            manifest_url: "https://example.com/master.m3u8".into(),
            enabled: true,
            tags: vec![],
            created_at: Utc::now(),
        };
        StreamSlot::new(config, &MonitorSettings::default())
    }

    fn metrics(ttfb: f64, speed: f64, bitrate: f64) -> SegmentMetrics {
        SegmentMetrics {
            uri: "https://example.com/seg.ts".into(),
            filename: "s1_0.ts".into(),
            resolution: None,
            bandwidth: None,
            actual_bitrate: bitrate,
            download_speed: speed,
            segment_duration: 6.0,
            ttfb,
            download_time: 100.0,
            segment_size_bytes: 1_000_000,
            segment_size_mb: 0.954,
            timestamp: Utc::now(),
            sequence_number: 0,
        }
    }

    #[test]
    fn seen_segments_dedup_and_bound() {
        let mut seen = SeenSegments::new(3);
        assert!(seen.insert("a"));
        assert!(!seen.insert("a"));
        assert!(seen.insert("b"));
        assert!(seen.insert("c"));
        assert!(seen.insert("d"));
        assert_eq!(seen.len(), 3);
        // oldest was evicted, so it reads as new again
        assert!(seen.insert("a"));
    }

    #[test]
    fn error_rate_over_window() {
        let mut s = slot();
        assert_eq!(s.error_rate(), 0.0);
        for _ in 0..9 {
            s.record_download(true);
        }
        s.record_download(false);
        assert_eq!(s.error_rate(), 10.0);
    }

    #[test]
    fn refresh_health_uses_rolling_ratio() {
        let mut s = slot();
        // downloading at half the bitrate
        for _ in 0..5 {
            s.metrics_history.push(metrics(100.0, 2.0, 4.0));
        }
        let inputs = s.refresh_health();
        assert_eq!(inputs.download_ratio, 0.5);
        assert_eq!(inputs.ttfb_avg, 100.0);
        // slow_download penalty applied
        assert_eq!(s.health.health_score.score, 85);
    }

    #[test]
    fn download_ratio_capped_at_two() {
        let mut s = slot();
        for _ in 0..5 {
            s.metrics_history.push(metrics(50.0, 40.0, 4.0));
        }
        let inputs = s.refresh_health();
        assert_eq!(inputs.download_ratio, 2.0);
    }

    #[test]
    fn empty_history_is_neutral() {
        let mut s = slot();
        let inputs = s.refresh_health();
        assert_eq!(inputs.download_ratio, 1.0);
        assert_eq!(inputs.ttfb_avg, 0.0);
        assert_eq!(s.health.health_score.score, 100);
    }

    #[test]
    fn stale_manifest_errors_age_out() {
        let mut s = slot();
        let mut err = crate::health::ManifestError::new("fetch", "old failure");
        err.timestamp = Utc::now() - ChronoDuration::hours(2);
        s.health.manifest_errors.push(err);
        s.health
            .manifest_errors
            .push(crate::health::ManifestError::new("fetch", "recent failure"));

        s.refresh_health();
        assert_eq!(s.health.manifest_errors.len(), 1);
        // one recent manifest error costs 5 points
        assert_eq!(s.health.health_score.score, 95);
    }
}
