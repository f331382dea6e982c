//! External multimedia tool integration: segment duration via ffprobe and
//! EBU R128 loudness via ffmpeg.
//!
//! Both tools are optional collaborators. Every invocation carries a timeout
//! and every failure degrades to "no data": a missing binary never takes a
//! pipeline down.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

/// One loudness measurement for a segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoudnessData {
    pub timestamp: DateTime<Utc>,
    pub momentary_lufs: Option<f64>,
    pub shortterm_lufs: Option<f64>,
    pub integrated_lufs: Option<f64>,
    /// Mean-volume fallback when LUFS measurement failed.
    pub rms_db: Option<f64>,
    pub is_approximation: bool,
}

#[derive(Debug, Clone)]
pub struct MediaProbe {
    ffmpeg_path: String,
    ffprobe_path: String,
    timeout: Duration,
}

impl MediaProbe {
    pub fn new(timeout: Duration) -> Self {
        Self {
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
            ffprobe_path: std::env::var("FFPROBE_PATH").unwrap_or_else(|_| "ffprobe".to_string()),
            timeout,
        }
    }

    pub fn with_paths(
        ffmpeg_path: impl Into<String>,
        ffprobe_path: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
            timeout,
        }
    }

    pub fn ffmpeg_path(&self) -> &str {
        &self.ffmpeg_path
    }

    async fn run(&self, program: &str, args: &[&str]) -> Option<std::process::Output> {
        let child = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output();
        match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => Some(output),
            Ok(Err(e)) => {
                debug!(program, error = %e, "Media tool unavailable");
                None
            }
            Err(_) => {
                warn!(program, timeout_ms = self.timeout.as_millis(), "Media tool timed out");
                None
            }
        }
    }

    /// Segment duration in seconds, or `None` when the probe fails.
    pub async fn probe_duration(&self, path: &Path) -> Option<f64> {
        let path = path.to_str()?;
        let output = self
            .run(
                &self.ffprobe_path,
                &[
                    "-v",
                    "error",
                    "-show_entries",
                    "format=duration",
                    "-of",
                    "default=noprint_wrappers=1:nokey=1",
                    path,
                ],
            )
            .await?;
        if !output.status.success() {
            return None;
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let trimmed = stdout.trim();
        if trimmed.is_empty() || trimmed == "N/A" {
            return None;
        }
        trimmed.parse().ok()
    }

    /// Loudness of a segment: ebur128 LUFS measurements first, RMS mean
    /// volume as an approximation fallback. Never fails.
    pub async fn analyze_loudness(&self, path: &Path) -> LoudnessData {
        let timestamp = Utc::now();
        let Some(path) = path.to_str() else {
            return approximation(timestamp, None);
        };

        if let Some(output) = self
            .run(
                &self.ffmpeg_path,
                &[
                    "-i",
                    path,
                    "-filter:a",
                    "ebur128=peak=true",
                    "-f",
                    "null",
                    "-",
                ],
            )
            .await
        {
            if output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                if let Some((momentary, shortterm, integrated)) = parse_ebur128(&stderr) {
                    return LoudnessData {
                        timestamp,
                        momentary_lufs: momentary,
                        shortterm_lufs: shortterm,
                        integrated_lufs: integrated,
                        rms_db: None,
                        is_approximation: false,
                    };
                }
            }
        }

        debug!(path, "LUFS measurement failed, falling back to RMS");
        let rms = match self
            .run(
                &self.ffmpeg_path,
                &["-i", path, "-af", "volumedetect", "-f", "null", "-"],
            )
            .await
        {
            Some(output) => parse_mean_volume(&String::from_utf8_lossy(&output.stderr)),
            None => None,
        };
        approximation(timestamp, rms)
    }
}

fn approximation(timestamp: DateTime<Utc>, rms_db: Option<f64>) -> LoudnessData {
    LoudnessData {
        timestamp,
        momentary_lufs: None,
        shortterm_lufs: None,
        integrated_lufs: None,
        rms_db,
        is_approximation: true,
    }
}

fn value_after<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    line.split(key).nth(1)?.trim().split_whitespace().next()
}

/// Extract (momentary, short-term, integrated) LUFS from ebur128 stderr.
/// Returns `None` when no measurement was found at all.
fn parse_ebur128(stderr: &str) -> Option<(Option<f64>, Option<f64>, Option<f64>)> {
    let mut momentary = None;
    let mut shortterm = None;
    let mut integrated = None;

    for line in stderr.lines() {
        if line.contains("I:") {
            if let Some(v) = value_after(line, "I:").and_then(|v| v.parse().ok()) {
                integrated = Some(v);
            }
        } else if line.contains("M:") {
            if let Some(v) = value_after(line, "M:").and_then(|v| v.parse().ok()) {
                momentary = Some(v);
            }
        } else if line.contains("S:") {
            if let Some(v) = value_after(line, "S:").and_then(|v| v.parse().ok()) {
                shortterm = Some(v);
            }
        }
    }

    if momentary.is_none() && shortterm.is_none() && integrated.is_none() {
        return None;
    }
    Some((momentary, shortterm, integrated))
}

/// `mean_volume` in dB from volumedetect stderr.
fn parse_mean_volume(stderr: &str) -> Option<f64> {
    for line in stderr.lines() {
        if line.contains("mean_volume:") {
            if let Some(v) = value_after(line, "mean_volume:").and_then(|v| v.parse().ok()) {
                return Some(v);
            }
        }
    }
    None
}
