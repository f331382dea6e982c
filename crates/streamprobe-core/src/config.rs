use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the monitoring engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSettings {
    /// Delay between manifest polls per stream (default: 4s, jittered).
    pub poll_interval: Duration,
    /// HTTP timeout for manifest fetches.
    pub manifest_timeout: Duration,
    /// HTTP timeout for segment downloads.
    pub download_timeout: Duration,
    /// Timeout for external media tool invocations.
    pub probe_timeout: Duration,
    /// Retries for failed manifest fetches.
    pub max_retries: u32,
    /// Base backoff for manifest retries (doubled each attempt).
    pub retry_backoff: Duration,
    /// Root for segments/, thumbnails/, sprites/ and logs/.
    pub data_dir: PathBuf,
    /// Segment metrics retained per stream.
    pub metrics_history_limit: usize,
    /// Loudness measurements retained per stream.
    pub loudness_history_limit: usize,
    /// SCTE-35 events retained per stream.
    pub scte35_event_limit: usize,
    /// Thumbnails kept on disk per stream.
    pub thumbnail_keep_count: usize,
    /// Thumbnails buffered before a sprite sheet is composed.
    pub sprite_segment_count: usize,
    pub sprite_grid_width: u32,
    pub sprite_grid_height: u32,
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
    /// Seen segment URIs retained per stream (drop-oldest).
    pub seen_segment_limit: usize,
    /// Concurrent segment downloads per stream.
    pub max_inflight_downloads: usize,
    /// Download attempts considered for the rolling error rate.
    pub error_window: usize,
    pub log_compress_days: i64,
    pub log_delete_days: i64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(4),
            manifest_timeout: Duration::from_secs(10),
            download_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            max_retries: 2,
            retry_backoff: Duration::from_millis(100),
            data_dir: PathBuf::from("data"),
            metrics_history_limit: 500,
            loudness_history_limit: 200,
            scte35_event_limit: 100,
            thumbnail_keep_count: 50,
            sprite_segment_count: 10,
            sprite_grid_width: 5,
            sprite_grid_height: 2,
            thumbnail_width: 320,
            thumbnail_height: 180,
            seen_segment_limit: 2048,
            max_inflight_downloads: 8,
            error_window: 100,
            log_compress_days: 1,
            log_delete_days: 7,
        }
    }
}

impl MonitorSettings {
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval = Duration::from_millis(ms);
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_sprite_segment_count(mut self, count: usize) -> Self {
        self.sprite_segment_count = count.max(1);
        self
    }

    pub fn with_max_inflight_downloads(mut self, max: usize) -> Self {
        self.max_inflight_downloads = max.max(1);
        self
    }

    pub fn with_log_retention(mut self, compress_days: i64, delete_days: i64) -> Self {
        self.log_compress_days = compress_days;
        self.log_delete_days = delete_days;
        self
    }

    pub fn segments_dir(&self) -> PathBuf {
        self.data_dir.join("segments")
    }

    pub fn thumbnails_dir(&self) -> PathBuf {
        self.data_dir.join("thumbnails")
    }

    pub fn sprites_dir(&self) -> PathBuf {
        self.data_dir.join("sprites")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn streams_file(&self) -> PathBuf {
        self.data_dir.join("streams.json")
    }

    pub fn webhooks_file(&self) -> PathBuf {
        self.data_dir.join("webhooks.json")
    }
}

/// Create the data directory tree. The only fatal filesystem error in the
/// system: everything later degrades per-operation instead of aborting.
pub fn ensure_data_dirs(settings: &MonitorSettings) -> std::io::Result<()> {
    for dir in [
        settings.data_dir.clone(),
        settings.segments_dir(),
        settings.thumbnails_dir(),
        settings.sprites_dir(),
        settings.logs_dir(),
    ] {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(())
}
