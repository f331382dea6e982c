//! The per-stream monitoring pipeline supervisor.
//!
//! One supervisor task per stream polls the manifest, locks onto the highest
//! bandwidth variant, discovers new segments and spawns an independent task
//! per segment. Segment tasks download, measure, persist and fan out to the
//! analyzers (TS, loudness, thumbnail). Every stage fails in isolation; the
//! supervisor only exits on cancellation.
//!
//! Locking discipline: registry entries are only held for synchronous state
//! mutation, never across an await point. Spawned tasks re-look up their slot
//! and bail out silently when the stream was removed underneath them.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ads;
use crate::alert::AlertEngine;
use crate::bus::EventBus;
use crate::config::MonitorSettings;
use crate::health::{ManifestError, StreamHealth, StreamStatus};
use crate::loader::StreamLoader;
use crate::logstore::LogStore;
use crate::manifest::{self, ManifestSummary};
use crate::media::{LoudnessData, MediaProbe};
use crate::metrics::{self, SegmentMetrics};
use crate::monitor::event::{EventKind, StreamEvent};
use crate::monitor::state::{Scte35Event, StreamConfig, StreamSlot};
use crate::sprite::SpriteGenerator;
use crate::thumbnail::ThumbnailGenerator;

/// The engine's injected collaborators.
pub struct EngineParts {
    pub loader: Arc<dyn StreamLoader>,
    pub bus: Arc<EventBus>,
    pub alerts: Arc<AlertEngine>,
    pub logs: Arc<LogStore>,
    pub thumbnails: Arc<ThumbnailGenerator>,
    pub sprites: Arc<SpriteGenerator>,
    pub media: Arc<MediaProbe>,
}

pub struct Engine {
    settings: MonitorSettings,
    loader: Arc<dyn StreamLoader>,
    bus: Arc<EventBus>,
    alerts: Arc<AlertEngine>,
    logs: Arc<LogStore>,
    thumbnails: Arc<ThumbnailGenerator>,
    sprites: Arc<SpriteGenerator>,
    media: Arc<MediaProbe>,
    streams: DashMap<String, StreamSlot>,
    tasks: DashMap<String, JoinHandle<()>>,
}

impl Engine {
    pub fn new(settings: MonitorSettings, parts: EngineParts) -> std::io::Result<Self> {
        std::fs::create_dir_all(settings.segments_dir())?;
        Ok(Self {
            settings,
            loader: parts.loader,
            bus: parts.bus,
            alerts: parts.alerts,
            logs: parts.logs,
            thumbnails: parts.thumbnails,
            sprites: parts.sprites,
            media: parts.media,
            streams: DashMap::new(),
            tasks: DashMap::new(),
        })
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn alerts(&self) -> &Arc<AlertEngine> {
        &self.alerts
    }

    pub fn logs(&self) -> &Arc<LogStore> {
        &self.logs
    }

    pub fn thumbnails(&self) -> &Arc<ThumbnailGenerator> {
        &self.thumbnails
    }

    pub fn sprites(&self) -> &Arc<SpriteGenerator> {
        &self.sprites
    }

    /// Register a stream and spawn its pipeline. Idempotent: a duplicate ID
    /// logs a warning and changes nothing.
    pub fn add_stream(self: &Arc<Self>, config: StreamConfig) {
        if self.streams.contains_key(&config.id) {
            warn!(stream_id = %config.id, "Stream already being monitored");
            return;
        }

        let stream_id = config.id.clone();
        let name = config.name.clone();
        let manifest_url = config.manifest_url.clone();

        self.streams.insert(
            stream_id.clone(),
            StreamSlot::new(config, &self.settings),
        );

        let task = tokio::spawn(monitor_loop(
            Arc::clone(self),
            stream_id.clone(),
            manifest_url.clone(),
        ));
        self.tasks.insert(stream_id.clone(), task);

        info!(stream_id = %stream_id, name = %name, "Started monitoring stream");

        self.bus.broadcast(
            &stream_id,
            StreamEvent::new(
                EventKind::StreamAdded,
                &stream_id,
                serde_json::json!({ "name": &name, "manifest_url": &manifest_url }),
            ),
        );

        let logs = Arc::clone(&self.logs);
        let id = stream_id.clone();
        tokio::spawn(async move {
            logs.write_stream_event(
                &id,
                "stream_added",
                &format!("Started monitoring stream: {name}"),
                "info",
                serde_json::json!({ "manifest_url": manifest_url }),
            )
            .await;
        });
    }

    /// Cancel the pipeline and evict all keyed state. Returns immediately;
    /// never waits on in-flight downloads. Segment tasks still running will
    /// find their slot gone and drop their results.
    pub fn remove_stream(&self, stream_id: &str) -> bool {
        if let Some((_, task)) = self.tasks.remove(stream_id) {
            task.abort();
        }
        if self.streams.remove(stream_id).is_none() {
            return false;
        }

        self.alerts.cleanup_stream(stream_id);
        self.thumbnails.cleanup_stream(stream_id);

        self.bus.broadcast(
            stream_id,
            StreamEvent::new(EventKind::StreamRemoved, stream_id, serde_json::json!({})),
        );

        info!(stream_id, "Stopped monitoring stream");

        let logs = Arc::clone(&self.logs);
        let id = stream_id.to_string();
        tokio::spawn(async move {
            logs.write_stream_event(&id, "stream_removed", "Stopped monitoring stream", "info", serde_json::json!({}))
                .await;
        });

        true
    }

    /// Abort every pipeline. Used on shutdown.
    pub fn shutdown(&self) {
        for entry in self.tasks.iter() {
            entry.value().abort();
        }
        self.tasks.clear();
        info!("Monitor engine stopped");
    }

    pub fn contains_stream(&self, stream_id: &str) -> bool {
        self.streams.contains_key(stream_id)
    }

    pub fn list_streams(&self) -> Vec<StreamConfig> {
        let mut configs: Vec<StreamConfig> = self
            .streams
            .iter()
            .map(|entry| entry.config.clone())
            .collect();
        configs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        configs
    }

    pub fn stream_config(&self, stream_id: &str) -> Option<StreamConfig> {
        self.streams.get(stream_id).map(|slot| slot.config.clone())
    }

    /// Health snapshot with the score recomputed from current rolling state.
    pub fn get_health(&self, stream_id: &str) -> Option<StreamHealth> {
        let mut slot = self.streams.get_mut(stream_id)?;
        slot.refresh_health();
        slot.health.active_alerts = self.alerts.active_alerts(stream_id);
        Some(slot.health.clone())
    }

    pub fn current_metrics(&self, stream_id: &str) -> Option<SegmentMetrics> {
        self.streams.get(stream_id)?.current_metrics.clone()
    }

    /// The most recent `limit` metrics, oldest first.
    pub fn get_metrics_history(&self, stream_id: &str, limit: usize) -> Vec<SegmentMetrics> {
        self.streams
            .get(stream_id)
            .map(|slot| slot.metrics_history.tail(limit))
            .unwrap_or_default()
    }

    /// Metrics at or after `threshold`, oldest first.
    pub fn metrics_since(
        &self,
        stream_id: &str,
        threshold: chrono::DateTime<Utc>,
    ) -> Vec<SegmentMetrics> {
        self.streams
            .get(stream_id)
            .map(|slot| {
                slot.metrics_history
                    .iter()
                    .filter(|m| m.timestamp >= threshold)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn loudness_history(&self, stream_id: &str) -> Vec<LoudnessData> {
        self.streams
            .get(stream_id)
            .map(|slot| slot.loudness_history.list_chronological())
            .unwrap_or_default()
    }

    /// SCTE-35 events (oldest first) and the lifetime message count.
    pub fn scte35_events(&self, stream_id: &str) -> (Vec<Scte35Event>, u64) {
        self.streams
            .get(stream_id)
            .map(|slot| (slot.scte35_events.list_chronological(), slot.scte35_count))
            .unwrap_or_default()
    }

    fn broadcast(&self, stream_id: &str, kind: EventKind, data: serde_json::Value) {
        self.bus
            .broadcast(stream_id, StreamEvent::new(kind, stream_id, data));
    }

    async fn record_manifest_failure(&self, stream_id: &str, message: String) {
        warn!(stream_id, "{message}");
        if let Some(mut slot) = self.streams.get_mut(stream_id) {
            slot.health.status = StreamStatus::Error;
            slot.health
                .manifest_errors
                .push(ManifestError::new("manifest", message.clone()));
            // refresh_health prunes by age; bound growth between refreshes too
            let len = slot.health.manifest_errors.len();
            if len > 50 {
                slot.health.manifest_errors.drain(..len - 50);
            }
        } else {
            return;
        }
        self.broadcast(
            stream_id,
            EventKind::Error,
            serde_json::json!({ "message": &message }),
        );
        self.logs
            .write_stream_event(stream_id, "error", &message, "error", serde_json::json!({}))
            .await;
    }
}

fn jittered_ms(base: std::time::Duration) -> u64 {
    let base_ms = base.as_millis() as u64;
    let jitter_range = base_ms / 7;
    if jitter_range == 0 {
        return base_ms.max(1);
    }
    let jitter = rand::thread_rng().gen_range(0..jitter_range * 2) as i64 - jitter_range as i64;
    (base_ms as i64 + jitter).max(1) as u64
}

async fn monitor_loop(engine: Arc<Engine>, stream_id: String, initial_url: String) {
    let mut current_url = initial_url;

    loop {
        if !engine.streams.contains_key(&stream_id) {
            break;
        }

        match engine.loader.fetch_manifest(&current_url).await {
            Ok(body) => match manifest::parse(&body, &current_url) {
                Ok(summary) if summary.is_master() => {
                    if let Some(next_url) = handle_master(&engine, &stream_id, &summary).await {
                        current_url = next_url;
                        // Re-fetch the selected variant right away.
                        continue;
                    }
                }
                Ok(summary) => {
                    handle_media(&engine, &stream_id, &body, &summary).await;
                }
                Err(e) => {
                    engine
                        .record_manifest_failure(
                            &stream_id,
                            format!("Failed to parse manifest {current_url}: {e}"),
                        )
                        .await;
                }
            },
            Err(e) => {
                engine
                    .record_manifest_failure(
                        &stream_id,
                        format!("Failed to fetch manifest: {e}"),
                    )
                    .await;
            }
        }

        tokio::time::sleep(std::time::Duration::from_millis(jittered_ms(
            engine.settings.poll_interval,
        )))
        .await;
    }
}

/// Pick the best variant out of a master playlist. Returns the URL to poll
/// next, or `None` when the playlist listed no usable variant.
async fn handle_master(
    engine: &Arc<Engine>,
    stream_id: &str,
    summary: &ManifestSummary,
) -> Option<String> {
    let best = summary.best_variant()?.clone();

    {
        let mut slot = engine.streams.get_mut(stream_id)?;
        slot.health.status = StreamStatus::Online;
        slot.variant = Some(best.clone());
    }

    info!(
        stream_id,
        bandwidth = best.bandwidth,
        resolution = best.resolution.as_deref().unwrap_or("unknown"),
        "Master playlist: switching to highest-bandwidth variant"
    );

    let variant_json = serde_json::to_value(&best).unwrap_or_default();
    engine.broadcast(
        stream_id,
        EventKind::VariantSelected,
        serde_json::json!({ "variant": &variant_json }),
    );
    engine
        .logs
        .write_event(
            serde_json::json!({
                "event_type": "variant_selected",
                "stream_id": stream_id,
                "variant": variant_json,
            }),
            Some(stream_id),
        )
        .await;

    Some(best.uri)
}

async fn handle_media(
    engine: &Arc<Engine>,
    stream_id: &str,
    body: &str,
    summary: &ManifestSummary,
) {
    for marker in ads::parse_ad_markers(body) {
        engine.broadcast(
            stream_id,
            EventKind::AdDetected,
            serde_json::json!({
                "type": marker.kind.to_string(),
                "timestamp": marker.timestamp,
                "duration": marker.duration,
                "metadata": marker.metadata,
            }),
        );
    }

    // Diff against the seen-set and claim sequence numbers in observation
    // order, then spawn one independent task per new segment.
    let mut new_segments: Vec<(String, u64)> = Vec::new();
    {
        let Some(mut slot) = engine.streams.get_mut(stream_id) else {
            return;
        };
        slot.health.status = StreamStatus::Online;
        for seg in &summary.segments {
            if slot.seen.insert(&seg.uri) {
                let sequence = slot.next_sequence;
                slot.next_sequence += 1;
                new_segments.push((seg.uri.clone(), sequence));
            }
        }
    }

    for (uri, sequence) in new_segments {
        debug!(stream_id, sequence, uri = %uri, "New segment discovered");
        tokio::spawn(process_segment(
            Arc::clone(engine),
            stream_id.to_string(),
            uri,
            sequence,
        ));
    }

    engine.broadcast(
        stream_id,
        EventKind::ManifestUpdated,
        serde_json::json!({
            "variant_count": summary.variants.len(),
            "segment_count": summary.segments.len(),
        }),
    );

    let variant_change = {
        let Some(mut slot) = engine.streams.get_mut(stream_id) else {
            return;
        };
        let previous = slot.last_variant_count.replace(summary.variants.len());
        previous.filter(|&prev| prev != summary.variants.len())
    };
    if let Some(previous) = variant_change {
        engine.broadcast(
            stream_id,
            EventKind::Alarm,
            serde_json::json!({
                "type": "variant_count_changed",
                "description": format!(
                    "Variant count changed from {} to {}",
                    previous,
                    summary.variants.len()
                ),
                "timestamp": Utc::now(),
            }),
        );
    }
}

async fn process_segment(engine: Arc<Engine>, stream_id: String, url: String, sequence: u64) {
    // Per-stream download bound. Acquired here so the poll loop never waits.
    let semaphore = match engine.streams.get(&stream_id) {
        Some(slot) => Arc::clone(&slot.inflight),
        None => return,
    };
    let Ok(_permit) = semaphore.acquire_owned().await else {
        return;
    };

    let download = match engine.loader.fetch_segment(&url).await {
        Ok(d) => d,
        Err(e) => {
            let message = format!("Failed to download segment: {e}");
            warn!(%stream_id, url = %url, "{message}");
            if let Some(mut slot) = engine.streams.get_mut(&stream_id) {
                slot.record_download(false);
            } else {
                return;
            }
            engine.broadcast(
                &stream_id,
                EventKind::Error,
                serde_json::json!({ "message": &message, "segment_url": &url }),
            );
            engine
                .logs
                .write_stream_event(
                    &stream_id,
                    "error",
                    &message,
                    "error",
                    serde_json::json!({ "segment_url": url }),
                )
                .await;
            return;
        }
    };

    let filename = format!("{stream_id}_{sequence}.ts");
    let segment_path = engine.settings.segments_dir().join(&filename);
    if let Err(e) = tokio::fs::write(&segment_path, &download.body).await {
        warn!(%stream_id, path = %segment_path.display(), error = %e, "Failed to persist segment");
        engine.broadcast(
            &stream_id,
            EventKind::Error,
            serde_json::json!({ "message": format!("Failed to persist segment: {e}"), "segment_url": url }),
        );
        return;
    }

    let duration = engine
        .media
        .probe_duration(&segment_path)
        .await
        .unwrap_or(6.0);

    let (resolution, bandwidth) = engine
        .streams
        .get(&stream_id)
        .map(|slot| {
            let v = slot.variant.as_ref();
            (
                v.and_then(|v| v.resolution.clone()),
                v.map(|v| v.bandwidth),
            )
        })
        .unwrap_or((None, None));

    let segment_metrics = SegmentMetrics {
        uri: url.clone(),
        filename,
        resolution,
        bandwidth,
        actual_bitrate: metrics::bitrate_mbps(download.size(), duration),
        download_speed: metrics::download_speed_mbps(download.size(), download.download_ms),
        segment_duration: duration,
        ttfb: download.ttfb_ms,
        download_time: download.download_ms,
        segment_size_bytes: download.size(),
        segment_size_mb: metrics::bytes_to_mb(download.size()),
        timestamp: Utc::now(),
        sequence_number: sequence,
    };

    // Store metrics and recompute health synchronously so subscribers see
    // the metrics before the derived health update.
    let inputs = {
        let Some(mut slot) = engine.streams.get_mut(&stream_id) else {
            let _ = tokio::fs::remove_file(&segment_path).await;
            return;
        };
        slot.record_download(true);
        slot.current_metrics = Some(segment_metrics.clone());
        slot.metrics_history.push(segment_metrics.clone());
        slot.refresh_health()
    };
    engine.alerts.check_thresholds(&stream_id, inputs);
    if let Some(mut slot) = engine.streams.get_mut(&stream_id) {
        slot.health.active_alerts = engine.alerts.active_alerts(&stream_id);
    }

    engine.broadcast(
        &stream_id,
        EventKind::SegmentDownloaded,
        serde_json::to_value(&segment_metrics).unwrap_or_default(),
    );
    engine
        .logs
        .write_event(
            serde_json::json!({
                "event_type": "segment_downloaded",
                "stream_id": &stream_id,
                "segment_url": url,
                "metrics": &segment_metrics,
            }),
            Some(&stream_id),
        )
        .await;

    // Analyzer fan-out. Each runs on its own and fails in isolation.
    tokio::spawn(analyze_ts(
        Arc::clone(&engine),
        stream_id.clone(),
        sequence,
        download.body,
    ));
    tokio::spawn(analyze_loudness(
        Arc::clone(&engine),
        stream_id.clone(),
        segment_path.clone(),
    ));
    tokio::spawn(generate_thumbnail(
        engine,
        stream_id,
        segment_path,
        sequence,
        segment_metrics.timestamp,
    ));
}

fn splice_command_name(command_type: u8) -> &'static str {
    match command_type {
        0x00 => "splice_null",
        0x04 => "splice_schedule",
        0x05 => "splice_insert",
        0x06 => "time_signal",
        0x07 => "bandwidth_reservation",
        0xFF => "private_command",
        _ => "reserved",
    }
}

async fn analyze_ts(engine: Arc<Engine>, stream_id: String, sequence: u64, body: Vec<u8>) {
    let analyzer = match engine.streams.get(&stream_id) {
        Some(slot) => Arc::clone(&slot.ts_analyzer),
        None => return,
    };

    // Byte scanning is CPU-bound; keep it off the async workers. The slot
    // holds only an Arc to the analyzer, so a concurrent removal is safe.
    let ts_metrics = match tokio::task::spawn_blocking(move || {
        let mut analyzer = analyzer.lock().expect("ts analyzer lock");
        analyzer.analyze(&body)
    })
    .await
    {
        Ok(m) => m,
        Err(e) => {
            warn!(%stream_id, error = %e, "TS analysis task failed");
            return;
        }
    };

    let (scte_event, health_json) = {
        let Some(mut slot) = engine.streams.get_mut(&stream_id) else {
            return;
        };

        let tr = &mut slot.health.tr101290;
        tr.sync_byte_errors += ts_metrics.sync_byte_errors;
        tr.continuity_errors += ts_metrics.continuity_errors;
        tr.transport_errors += ts_metrics.transport_errors;
        tr.pat_errors += ts_metrics.pat_errors;
        tr.pcr_discontinuities += ts_metrics.pcr_discontinuities;
        tr.last_updated = Utc::now();

        let scte_event = if ts_metrics.scte35_messages > 0 {
            let event = Scte35Event {
                timestamp: Utc::now(),
                event_type: "scte35_marker".to_string(),
                segment_sequence: sequence,
                message_count: ts_metrics.scte35_messages,
                pids: ts_metrics.scte35_pids.clone(),
                splice_command_type: ts_metrics
                    .scte35_command_types
                    .first()
                    .map(|&c| splice_command_name(c).to_string()),
            };
            slot.scte35_events.push(event.clone());
            slot.scte35_count += ts_metrics.scte35_messages;
            Some(event)
        } else {
            None
        };

        (scte_event, serde_json::to_value(&slot.health).unwrap_or_default())
    };

    if ts_metrics.sync_byte_errors > 0 {
        engine.broadcast(
            &stream_id,
            EventKind::Alarm,
            serde_json::json!({
                "type": "sync_byte_error",
                "description": "Sync byte errors detected",
                "timestamp": Utc::now(),
            }),
        );
    }
    if ts_metrics.continuity_errors > 0 {
        engine.broadcast(
            &stream_id,
            EventKind::Alarm,
            serde_json::json!({
                "type": "continuity_error",
                "description": "Continuity counter errors detected",
                "timestamp": Utc::now(),
            }),
        );
    }

    if let Some(event) = scte_event {
        info!(
            %stream_id,
            messages = event.message_count,
            "SCTE-35 detected"
        );
        engine.broadcast(
            &stream_id,
            EventKind::Scte35Detected,
            serde_json::to_value(&event).unwrap_or_default(),
        );
        engine
            .logs
            .write_event(
                serde_json::json!({
                    "event_type": "scte35_detected",
                    "stream_id": stream_id,
                    "scte35": event,
                }),
                Some(&stream_id),
            )
            .await;
    }

    engine.broadcast(&stream_id, EventKind::HealthUpdate, health_json);
}

async fn analyze_loudness(engine: Arc<Engine>, stream_id: String, segment_path: std::path::PathBuf) {
    let loudness: LoudnessData = engine.media.analyze_loudness(&segment_path).await;

    {
        let Some(mut slot) = engine.streams.get_mut(&stream_id) else {
            return;
        };
        slot.loudness_history.push(loudness.clone());
    }

    let value = serde_json::to_value(&loudness).unwrap_or_default();
    engine.broadcast(&stream_id, EventKind::LoudnessData, value.clone());
    engine
        .logs
        .write_stream_event(
            &stream_id,
            "loudness_analyzed",
            "Loudness analysis complete",
            "info",
            serde_json::json!({ "loudness": value }),
        )
        .await;
}

async fn generate_thumbnail(
    engine: Arc<Engine>,
    stream_id: String,
    segment_path: std::path::PathBuf,
    sequence: u64,
    timestamp: chrono::DateTime<Utc>,
) {
    let thumb_path = engine
        .thumbnails
        .generate_for_segment(&stream_id, &segment_path, sequence, &engine.media)
        .await;

    let relative = thumb_path
        .file_name()
        .map(|n| format!("/data/thumbnails/{}", n.to_string_lossy()))
        .unwrap_or_default();

    let sprite_batch = {
        let Some(mut slot) = engine.streams.get_mut(&stream_id) else {
            return;
        };
        slot.thumbs_buffer.push((thumb_path, timestamp));
        if slot.thumbs_buffer.len() >= engine.settings.sprite_segment_count {
            Some(std::mem::take(&mut slot.thumbs_buffer))
        } else {
            None
        }
    };

    engine.broadcast(
        &stream_id,
        EventKind::ThumbnailGenerated,
        serde_json::json!({ "thumbnail_path": relative, "sequence": sequence }),
    );

    let Some(batch) = sprite_batch else {
        return;
    };

    let sprites = Arc::clone(&engine.sprites);
    let id = stream_id.clone();
    let composed = tokio::task::spawn_blocking(move || sprites.compose(&id, &batch)).await;

    match composed {
        Ok(Ok(info)) => {
            engine.broadcast(
                &stream_id,
                EventKind::SpriteGenerated,
                serde_json::json!({
                    "sprite_id": &info.sprite_id,
                    "sprite_path": &info.sprite_path,
                    "thumbnail_count": info.thumbnail_count,
                }),
            );
            engine
                .logs
                .write_event(
                    serde_json::json!({
                        "event_type": "sprite_generated",
                        "stream_id": stream_id,
                        "sprite": info,
                    }),
                    Some(&stream_id),
                )
                .await;
        }
        Ok(Err(e)) => warn!(%stream_id, error = %e, "Sprite composition failed"),
        Err(e) => warn!(%stream_id, error = %e, "Sprite task failed"),
    }
}
