//! Append-only event logs with daily rotation.
//!
//! Layout: `logs/YYYY-MM-DD.log` holds the aggregated view, and each stream
//! gets `logs/{stream_id}/YYYY-MM-DD.log`. Events carrying a stream ID are
//! written to both. Rotation gzips files past the compression age and deletes
//! files past the retention age. All dates are UTC.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub struct LogStore {
    root: PathBuf,
    compress_days: i64,
    delete_days: i64,
    /// One mutex per log file path so concurrent writers append whole lines.
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl LogStore {
    pub fn new(root: impl Into<PathBuf>, compress_days: i64, delete_days: i64) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            compress_days,
            delete_days,
            locks: Mutex::new(HashMap::new()),
        })
    }

    fn global_file(&self, date: NaiveDate) -> PathBuf {
        self.root.join(format!("{}.log", date.format("%Y-%m-%d")))
    }

    fn stream_file(&self, stream_id: &str, date: NaiveDate) -> PathBuf {
        self.root
            .join(stream_id)
            .join(format!("{}.log", date.format("%Y-%m-%d")))
    }

    async fn file_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn append_line(&self, path: &Path, line: &str) {
        let lock = self.file_lock(path).await;
        let _guard = lock.lock().await;

        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!(path = %path.display(), error = %e, "Failed to create log directory");
                return;
            }
        }

        let result = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await?;
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await
        }
        .await;

        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "Failed to write log line");
        }
    }

    /// Write an event, adding `timestamp` (and `stream_id` when given) if
    /// absent. Events with a stream ID land in both the stream file and the
    /// global file.
    pub async fn write_event(&self, mut event: serde_json::Value, stream_id: Option<&str>) {
        let now = Utc::now();
        if let Some(obj) = event.as_object_mut() {
            obj.entry("timestamp")
                .or_insert_with(|| serde_json::json!(now));
            if let Some(id) = stream_id {
                obj.entry("stream_id").or_insert_with(|| serde_json::json!(id));
            }
        }

        let line = match serde_json::to_string(&event) {
            Ok(l) => l,
            Err(e) => {
                warn!(error = %e, "Failed to serialize log event");
                return;
            }
        };

        let date = now.date_naive();
        if let Some(id) = stream_id {
            self.append_line(&self.stream_file(id, date), &line).await;
        }
        self.append_line(&self.global_file(date), &line).await;
    }

    /// Structured convenience wrapper used throughout the engine.
    pub async fn write_stream_event(
        &self,
        stream_id: &str,
        event_type: &str,
        message: &str,
        severity: &str,
        metadata: serde_json::Value,
    ) {
        self.write_event(
            serde_json::json!({
                "stream_id": stream_id,
                "event_type": event_type,
                "message": message,
                "severity": severity,
                "metadata": metadata,
            }),
            Some(stream_id),
        )
        .await;
    }

    /// Read events between `start` and `end` inclusive, iterating days in
    /// order and reading plain then gzipped files as present. Malformed lines
    /// are skipped.
    pub async fn read_events(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        stream_id: Option<&str>,
        event_type: Option<&str>,
        limit: usize,
    ) -> Vec<serde_json::Value> {
        let mut events = Vec::new();
        let mut date = start.date_naive();
        let last = end.date_naive();

        while date <= last && events.len() < limit {
            let base = match stream_id {
                Some(id) => self.stream_file(id, date),
                None => self.global_file(date),
            };

            for path in [base.clone(), base.with_extension("log.gz")] {
                if events.len() >= limit {
                    break;
                }
                let remaining = limit - events.len();
                match read_log_file(&path).await {
                    Some(content) => {
                        collect_matching(&content, stream_id, event_type, remaining, &mut events)
                    }
                    None => continue,
                }
            }

            date = match date.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }

        events
    }

    /// Recent logs for one stream: the last 7 days.
    pub async fn read_stream_logs(&self, stream_id: &str, limit: usize) -> Vec<serde_json::Value> {
        let now = Utc::now();
        self.read_events(now - ChronoDuration::days(7), now, Some(stream_id), None, limit)
            .await
    }

    /// Compress logs past the compression age, delete logs past the retention
    /// age, and drop empty stream directories. Runs on a coarse timer.
    pub async fn rotate(&self) {
        let now = Utc::now();
        let compress_before = (now - ChronoDuration::days(self.compress_days)).date_naive();
        let delete_before = (now - ChronoDuration::days(self.delete_days)).date_naive();

        let root = self.root.clone();
        let result = tokio::task::spawn_blocking(move || {
            rotate_dir(&root, compress_before, delete_before, true)
        })
        .await;

        match result {
            Ok(Ok(())) => info!("Log rotation completed"),
            Ok(Err(e)) => warn!(error = %e, "Log rotation failed"),
            Err(e) => warn!(error = %e, "Log rotation task panicked"),
        }
    }

    /// Remove all log files for a stream.
    pub async fn cleanup_stream_logs(&self, stream_id: &str) {
        let dir = self.root.join(stream_id);
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(stream_id, error = %e, "Failed to remove stream logs");
            }
        }
    }
}

async fn read_log_file(path: &Path) -> Option<String> {
    let bytes = tokio::fs::read(path).await.ok()?;
    if path.extension().is_some_and(|e| e == "gz") {
        let mut decoder = GzDecoder::new(bytes.as_slice());
        let mut content = String::new();
        decoder.read_to_string(&mut content).ok()?;
        Some(content)
    } else {
        String::from_utf8(bytes).ok()
    }
}

fn collect_matching(
    content: &str,
    stream_id: Option<&str>,
    event_type: Option<&str>,
    limit: usize,
    out: &mut Vec<serde_json::Value>,
) {
    for line in content.lines() {
        if out.len() >= limit {
            return;
        }
        let Ok(event) = serde_json::from_str::<serde_json::Value>(line.trim()) else {
            continue;
        };
        if let Some(id) = stream_id {
            if event.get("stream_id").and_then(|v| v.as_str()) != Some(id) {
                continue;
            }
        }
        if let Some(t) = event_type {
            if event.get("event_type").and_then(|v| v.as_str()) != Some(t) {
                continue;
            }
        }
        out.push(event);
    }
}

/// Date encoded in a log filename: `2026-08-01.log` or `2026-08-01.log.gz`.
fn file_date(path: &Path) -> Option<NaiveDate> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(".log.gz").or_else(|| name.strip_suffix(".log"))?;
    NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()
}

fn rotate_dir(
    dir: &Path,
    compress_before: NaiveDate,
    delete_before: NaiveDate,
    recurse: bool,
) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            if recurse {
                rotate_dir(&path, compress_before, delete_before, false)?;
                if std::fs::read_dir(&path)?.next().is_none() {
                    let _ = std::fs::remove_dir(&path);
                }
            }
            continue;
        }

        let Some(date) = file_date(&path) else {
            continue;
        };

        if date < delete_before {
            debug!(path = %path.display(), "Deleting expired log file");
            let _ = std::fs::remove_file(&path);
            continue;
        }

        let is_plain = path.extension().is_some_and(|e| e == "log");
        if is_plain && date < compress_before {
            if let Err(e) = compress_file(&path) {
                warn!(path = %path.display(), error = %e, "Failed to compress log file");
            }
        }
    }
    Ok(())
}

fn compress_file(path: &Path) -> std::io::Result<()> {
    let gz_path = path.with_extension("log.gz");
    if gz_path.exists() {
        return Ok(());
    }
    let content = std::fs::read(path)?;
    let file = std::fs::File::create(&gz_path)?;
    let mut encoder = GzEncoder::new(file, Compression::default());
    std::io::Write::write_all(&mut encoder, &content)?;
    encoder.finish()?;
    std::fs::remove_file(path)?;
    debug!(path = %gz_path.display(), "Compressed log file");
    Ok(())
}
