//! Per-segment thumbnail extraction with caching and bounded retention.
//!
//! Frames are pulled from the segment midpoint with ffmpeg; when extraction
//! fails (no video track, corrupt segment, missing ffmpeg) a gray placeholder
//! with a red cross is rendered instead so the UI always has something to
//! show. The newest thumbnail per stream is cached for 45 seconds and at most
//! `keep_count` files are retained on disk per stream.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use image::{Rgb, RgbImage};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::media::MediaProbe;

pub const CACHE_TTL: Duration = Duration::from_secs(45);

const PLACEHOLDER_BG: Rgb<u8> = Rgb([0x4a, 0x55, 0x68]);
const PLACEHOLDER_CROSS: Rgb<u8> = Rgb([0xe5, 0x3e, 0x3e]);

#[derive(Debug, Clone)]
pub struct ThumbnailInfo {
    pub path: PathBuf,
    pub sequence_number: u64,
    pub is_fresh: bool,
    pub expires_in: Duration,
}

struct CacheEntry {
    path: PathBuf,
    cached_at: Instant,
    sequence: u64,
}

pub struct ThumbnailGenerator {
    dir: PathBuf,
    width: u32,
    height: u32,
    keep_count: usize,
    cache: Mutex<HashMap<String, CacheEntry>>,
    /// stream_id -> sequence -> file, ordered so pruning drops the oldest.
    registry: Mutex<HashMap<String, BTreeMap<u64, PathBuf>>>,
}

impl ThumbnailGenerator {
    pub fn new(
        dir: impl Into<PathBuf>,
        width: u32,
        height: u32,
        keep_count: usize,
    ) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            width,
            height,
            keep_count,
            cache: Mutex::new(HashMap::new()),
            registry: Mutex::new(HashMap::new()),
        })
    }

    /// Produce a thumbnail for a downloaded segment and register it. Always
    /// yields a file: extraction failure produces the error placeholder.
    pub async fn generate_for_segment(
        &self,
        stream_id: &str,
        segment_path: &Path,
        sequence: u64,
        probe: &MediaProbe,
    ) -> PathBuf {
        let output = self.dir.join(format!("{stream_id}_{sequence}.jpg"));

        let midpoint = probe
            .probe_duration(segment_path)
            .await
            .map(|d| d / 2.0)
            .unwrap_or(0.0);

        if !self
            .extract_frame(probe.ffmpeg_path(), segment_path, &output, midpoint)
            .await
        {
            if let Err(e) = self.write_placeholder(&output) {
                warn!(stream_id, sequence, error = %e, "Failed to write placeholder thumbnail");
            }
        }

        {
            let mut cache = self.cache.lock().expect("thumbnail cache lock");
            cache.insert(
                stream_id.to_string(),
                CacheEntry {
                    path: output.clone(),
                    cached_at: Instant::now(),
                    sequence,
                },
            );
        }

        let expired: Vec<PathBuf> = {
            let mut registry = self.registry.lock().expect("thumbnail registry lock");
            let entries = registry.entry(stream_id.to_string()).or_default();
            entries.insert(sequence, output.clone());
            let excess = entries.len().saturating_sub(self.keep_count);
            let drop_keys: Vec<u64> = entries.keys().take(excess).copied().collect();
            drop_keys
                .into_iter()
                .filter_map(|k| entries.remove(&k))
                .collect()
        };
        for path in expired {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    debug!(path = %path.display(), error = %e, "Failed to remove old thumbnail");
                }
            }
        }

        output
    }

    async fn extract_frame(
        &self,
        ffmpeg: &str,
        segment_path: &Path,
        output: &Path,
        at_seconds: f64,
    ) -> bool {
        let Some(segment) = segment_path.to_str() else {
            return false;
        };
        let Some(out) = output.to_str() else {
            return false;
        };

        let result = Command::new(ffmpeg)
            .args([
                "-ss",
                &format!("{at_seconds:.3}"),
                "-i",
                segment,
                "-vframes",
                "1",
                "-vf",
                &format!("scale={}:{}", self.width, self.height),
                "-strict",
                "unofficial",
                "-y",
                out,
            ])
            .kill_on_drop(true)
            .output()
            .await;

        match result {
            Ok(output_status) if output_status.status.success() => true,
            Ok(output_status) => {
                debug!(
                    segment,
                    stderr = %String::from_utf8_lossy(&output_status.stderr).chars().take(200).collect::<String>(),
                    "ffmpeg thumbnail extraction failed"
                );
                false
            }
            Err(e) => {
                debug!(segment, error = %e, "ffmpeg not available for thumbnails");
                false
            }
        }
    }

    /// Gray placeholder with a red cross.
    fn write_placeholder(&self, output: &Path) -> Result<(), image::ImageError> {
        let mut img = RgbImage::from_pixel(self.width, self.height, PLACEHOLDER_BG);

        let cx = self.width as i32 / 2;
        let cy = self.height as i32 / 2;
        for offset in -10..=10 {
            for thickness in -1..=1 {
                for (x, y) in [
                    (cx + offset, cy + offset + thickness),
                    (cx + offset, cy - offset + thickness),
                ] {
                    if x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height {
                        img.put_pixel(x as u32, y as u32, PLACEHOLDER_CROSS);
                    }
                }
            }
        }

        img.save(output)
    }

    /// Latest thumbnail for a stream, only while the cache entry is fresh and
    /// the file still exists.
    pub fn cached_thumbnail(&self, stream_id: &str) -> Option<PathBuf> {
        let cache = self.cache.lock().expect("thumbnail cache lock");
        let entry = cache.get(stream_id)?;
        if entry.cached_at.elapsed() < CACHE_TTL && entry.path.exists() {
            Some(entry.path.clone())
        } else {
            None
        }
    }

    pub fn latest_info(&self, stream_id: &str) -> Option<ThumbnailInfo> {
        let cache = self.cache.lock().expect("thumbnail cache lock");
        let entry = cache.get(stream_id)?;
        if !entry.path.exists() {
            return None;
        }
        let age = entry.cached_at.elapsed();
        Some(ThumbnailInfo {
            path: entry.path.clone(),
            sequence_number: entry.sequence,
            is_fresh: age < CACHE_TTL,
            expires_in: CACHE_TTL.saturating_sub(age),
        })
    }

    /// Drop all state and files for a removed stream.
    pub fn cleanup_stream(&self, stream_id: &str) {
        self.cache
            .lock()
            .expect("thumbnail cache lock")
            .remove(stream_id);

        let paths: Vec<PathBuf> = self
            .registry
            .lock()
            .expect("thumbnail registry lock")
            .remove(stream_id)
            .map(|entries| entries.into_values().collect())
            .unwrap_or_default();
        for path in paths {
            let _ = std::fs::remove_file(path);
        }

        // Sweep stragglers left by earlier runs.
        let prefix = format!("{stream_id}_");
        if let Ok(entries) = std::fs::read_dir(&self.dir) {
            for entry in entries.flatten() {
                let name = entry.file_name();
                if let Some(name) = name.to_str() {
                    if name.starts_with(&prefix) && name.ends_with(".jpg") {
                        let _ = std::fs::remove_file(entry.path());
                    }
                }
            }
        }
        debug!(stream_id, "Cleaned up thumbnails");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn generator(dir: &Path) -> ThumbnailGenerator {
        ThumbnailGenerator::new(dir, 64, 36, 3).unwrap()
    }

    fn unavailable_probe() -> MediaProbe {
        // Points at nonexistent binaries so extraction always falls back.
        MediaProbe::with_paths(
            "/nonexistent/ffmpeg",
            "/nonexistent/ffprobe",
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn placeholder_is_written_when_extraction_fails() {
        let dir = tempfile::tempdir().unwrap();
        let thumbs = generator(dir.path());
        let segment = dir.path().join("seg.ts");
        std::fs::write(&segment, b"not video").unwrap();

        let path = thumbs
            .generate_for_segment("s1", &segment, 0, &unavailable_probe())
            .await;
        assert!(path.exists());

        let img = image::open(&path).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (64, 36));
        // corner keeps the background color
        assert_eq!(img.get_pixel(0, 0), &PLACEHOLDER_BG);
        // center carries the cross
        assert_eq!(img.get_pixel(32, 18), &PLACEHOLDER_CROSS);
    }

    #[tokio::test]
    async fn cache_returns_fresh_thumbnail() {
        let dir = tempfile::tempdir().unwrap();
        let thumbs = generator(dir.path());
        let segment = dir.path().join("seg.ts");
        std::fs::write(&segment, b"x").unwrap();

        assert!(thumbs.cached_thumbnail("s1").is_none());
        thumbs.generate_for_segment("s1", &segment, 7, &unavailable_probe())
            .await;

        let cached = thumbs.cached_thumbnail("s1").unwrap();
        assert!(cached.ends_with("s1_7.jpg"));

        let info = thumbs.latest_info("s1").unwrap();
        assert_eq!(info.sequence_number, 7);
        assert!(info.is_fresh);
    }

    #[tokio::test]
    async fn registry_prunes_to_keep_count() {
        let dir = tempfile::tempdir().unwrap();
        let thumbs = generator(dir.path());
        let segment = dir.path().join("seg.ts");
        std::fs::write(&segment, b"x").unwrap();
        let probe = unavailable_probe();

        for seq in 0..5 {
            thumbs.generate_for_segment("s1", &segment, seq, &probe).await;
        }

        assert!(!dir.path().join("s1_0.jpg").exists());
        assert!(!dir.path().join("s1_1.jpg").exists());
        assert!(dir.path().join("s1_2.jpg").exists());
        assert!(dir.path().join("s1_4.jpg").exists());
    }

    #[tokio::test]
    async fn cleanup_removes_files_and_state() {
        let dir = tempfile::tempdir().unwrap();
        let thumbs = generator(dir.path());
        let segment = dir.path().join("seg.ts");
        std::fs::write(&segment, b"x").unwrap();

        thumbs.generate_for_segment("s1", &segment, 1, &unavailable_probe())
            .await;
        assert!(dir.path().join("s1_1.jpg").exists());

        thumbs.cleanup_stream("s1");
        assert!(!dir.path().join("s1_1.jpg").exists());
        assert!(thumbs.cached_thumbnail("s1").is_none());
        assert!(thumbs.latest_info("s1").is_none());
    }
}
