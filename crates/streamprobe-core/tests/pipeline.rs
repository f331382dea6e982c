//! End-to-end pipeline scenarios against a scripted loader: variant
//! selection, segment discovery and measurement, failure isolation, alert
//! integration, and stream removal.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use streamprobe_core::bus::Subscription;
use streamprobe_core::{
    notification_channel, AlertEngine, Engine, EngineParts, EventBus, LoadError, LogStore,
    MediaProbe, MonitorSettings, SegmentDownload, SpriteGenerator, StreamConfig, StreamLoader,
    ThumbnailGenerator,
};

const MASTER_URL: &str = "https://mock.example.com/live/master.m3u8";
const LOW_URL: &str = "https://mock.example.com/live/low.m3u8";
const HI_URL: &str = "https://mock.example.com/live/hi.m3u8";

const MASTER_PLAYLIST: &str = "\
#EXTM3U
#EXT-X-VERSION:3
#EXT-X-STREAM-INF:BANDWIDTH=1000000,RESOLUTION=640x360
low.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=3000000,RESOLUTION=1280x720
hi.m3u8
";

fn media_playlist(mseq: u64, segments: &[&str]) -> String {
    let mut out = format!(
        "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:6\n#EXT-X-MEDIA-SEQUENCE:{mseq}\n"
    );
    for seg in segments {
        out.push_str("#EXTINF:6.000,\n");
        out.push_str(seg);
        out.push('\n');
    }
    out
}

/// Three valid TS packets on PID 0x100.
fn ts_body() -> Vec<u8> {
    let mut body = Vec::new();
    for cc in 0..3u8 {
        let mut packet = vec![0u8; 188];
        packet[0] = 0x47;
        packet[1] = 0x01;
        packet[2] = 0x00;
        packet[3] = 0x10 | cc;
        body.extend_from_slice(&packet);
    }
    body
}

struct ScriptedLoader {
    /// url -> response sequence; the last entry repeats forever.
    manifests: Mutex<HashMap<String, VecDeque<String>>>,
    segments: Mutex<HashMap<String, Vec<u8>>>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedLoader {
    fn new() -> Self {
        Self {
            manifests: Mutex::new(HashMap::new()),
            segments: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn manifest(self, url: &str, responses: &[String]) -> Self {
        self.manifests
            .lock()
            .unwrap()
            .insert(url.to_string(), responses.iter().cloned().collect());
        self
    }

    fn segment(self, url: &str, body: Vec<u8>) -> Self {
        self.segments
            .lock()
            .unwrap()
            .insert(url.to_string(), body);
        self
    }

    fn requested(&self, prefix: &str) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.starts_with(prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl StreamLoader for ScriptedLoader {
    async fn fetch_manifest(&self, url: &str) -> Result<String, LoadError> {
        self.requests
            .lock()
            .unwrap()
            .push(format!("manifest:{url}"));
        let mut manifests = self.manifests.lock().unwrap();
        let Some(queue) = manifests.get_mut(url) else {
            return Err(LoadError::Http {
                url: url.to_string(),
                status: 404,
                message: "Not Found".to_string(),
            });
        };
        if queue.len() > 1 {
            Ok(queue.pop_front().unwrap())
        } else {
            queue.front().cloned().ok_or(LoadError::Http {
                url: url.to_string(),
                status: 404,
                message: "Not Found".to_string(),
            })
        }
    }

    async fn fetch_segment(&self, url: &str) -> Result<SegmentDownload, LoadError> {
        self.requests
            .lock()
            .unwrap()
            .push(format!("segment:{url}"));
        let segments = self.segments.lock().unwrap();
        match segments.get(url) {
            Some(body) => Ok(SegmentDownload {
                body: body.clone(),
                ttfb_ms: 50.0,
                download_ms: 100.0,
            }),
            None => Err(LoadError::Http {
                url: url.to_string(),
                status: 404,
                message: "Not Found".to_string(),
            }),
        }
    }
}

struct Harness {
    engine: Arc<Engine>,
    loader: Arc<ScriptedLoader>,
    _dir: tempfile::TempDir,
}

fn harness(loader: ScriptedLoader) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let settings = MonitorSettings::default()
        .with_data_dir(dir.path())
        .with_poll_interval(50)
        .with_sprite_segment_count(100);

    let loader = Arc::new(loader);
    let (tx, mut rx) = notification_channel();
    // Drain notifications so senders never observe a closed channel.
    tokio::spawn(async move { while rx.recv().await.is_some() {} });

    let parts = EngineParts {
        loader: Arc::clone(&loader) as Arc<dyn StreamLoader>,
        bus: Arc::new(EventBus::new()),
        alerts: Arc::new(AlertEngine::new(Some(tx))),
        logs: Arc::new(LogStore::new(settings.logs_dir(), 1, 7).unwrap()),
        thumbnails: Arc::new(
            ThumbnailGenerator::new(settings.thumbnails_dir(), 64, 36, 50).unwrap(),
        ),
        sprites: Arc::new(SpriteGenerator::new(settings.sprites_dir(), 5, 2, 64, 36).unwrap()),
        media: Arc::new(MediaProbe::with_paths(
            "/nonexistent/ffmpeg",
            "/nonexistent/ffprobe",
            Duration::from_secs(1),
        )),
    };

    let engine = Arc::new(Engine::new(settings, parts).unwrap());
    Harness {
        engine,
        loader,
        _dir: dir,
    }
}

fn stream_config(id: &str, url: &str) -> StreamConfig {
    StreamConfig {
        id: id.to_string(),
        name: format!("Stream {id}"),
        manifest_url: url.to_string(),
        enabled: true,
        tags: vec![],
        created_at: chrono::Utc::now(),
    }
}

/// Receive bus messages until one of `kind` arrives or the timeout hits.
async fn wait_for_event(sub: &mut Subscription, kind: &str) -> serde_json::Value {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .unwrap_or_else(|| panic!("timed out waiting for {kind} event"));
        let message = tokio::time::timeout(remaining, sub.rx.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {kind} event"))
            .expect("bus closed");
        let event: serde_json::Value = serde_json::from_str(&message).unwrap();
        if event["type"] == kind {
            return event;
        }
    }
}

async fn wait_until<F: Fn() -> bool>(condition: F, what: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting until {what}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn master_playlist_hops_to_best_variant_without_extra_poll() {
    let loader = ScriptedLoader::new()
        .manifest(MASTER_URL, &[MASTER_PLAYLIST.to_string()])
        .manifest(
            HI_URL,
            &[media_playlist(0, &["seg_0.ts", "seg_1.ts"])],
        )
        .segment("https://mock.example.com/live/seg_0.ts", ts_body())
        .segment("https://mock.example.com/live/seg_1.ts", ts_body());
    let h = harness(loader);

    let mut sub = h.engine.bus().subscribe("s1");
    h.engine.add_stream(stream_config("s1", MASTER_URL));

    let selected = wait_for_event(&mut sub, "variant_selected").await;
    assert_eq!(selected["data"]["variant"]["bandwidth"], 3_000_000);
    assert_eq!(selected["data"]["variant"]["uri"], HI_URL);

    let downloaded = wait_for_event(&mut sub, "segment_downloaded").await;
    assert_eq!(downloaded["data"]["bandwidth"], 3_000_000);
    assert_eq!(downloaded["data"]["resolution"], "1280x720");

    // The variant fetch follows the master parse directly; with a manifest
    // for each, the low variant is never polled.
    assert_eq!(h.loader.requested(&format!("manifest:{LOW_URL}")).len(), 0);
    assert!(!h.loader.requested(&format!("manifest:{HI_URL}")).is_empty());

    wait_until(
        || h.engine.get_metrics_history("s1", 100).len() == 2,
        "both segments processed",
    )
    .await;

    let history = h.engine.get_metrics_history("s1", 100);
    let sequences: Vec<u64> = history.iter().map(|m| m.sequence_number).collect();
    assert_eq!(sequences, vec![0, 1]);

    // Metrics invariant: probing is unavailable so duration falls back to 6s.
    let size = ts_body().len() as u64;
    for m in &history {
        assert_eq!(m.segment_duration, 6.0);
        assert_eq!(
            m.actual_bitrate,
            (size as f64 * 8.0 / 6.0 / 1e6 * 1000.0).round() / 1000.0
        );
        assert_eq!(
            m.download_speed,
            (size as f64 * 8.0 / 0.1 / 1e6 * 1000.0).round() / 1000.0
        );
        assert_eq!(m.ttfb, 50.0);
    }

    // Segment files land on disk under the stream's name.
    let segments_dir = h.engine.settings().segments_dir();
    assert!(segments_dir.join("s1_0.ts").exists());
    assert!(segments_dir.join("s1_1.ts").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn repeated_polls_do_not_reprocess_seen_segments() {
    let loader = ScriptedLoader::new()
        .manifest(LOW_URL, &[media_playlist(0, &["a.ts", "b.ts"])])
        .segment("https://mock.example.com/live/a.ts", ts_body())
        .segment("https://mock.example.com/live/b.ts", ts_body());
    let h = harness(loader);

    h.engine.add_stream(stream_config("s1", LOW_URL));

    wait_until(
        || h.engine.get_metrics_history("s1", 100).len() == 2,
        "segments processed",
    )
    .await;

    // Let several more polls happen.
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(h.engine.get_metrics_history("s1", 100).len(), 2);
    let seg_requests = h.loader.requested("segment:");
    assert_eq!(seg_requests.len(), 2, "each segment fetched exactly once");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn manifest_failure_sets_error_status_and_recovers_nothing_else() {
    let loader = ScriptedLoader::new();
    let h = harness(loader);

    let mut sub = h.engine.bus().subscribe("s1");
    h.engine.add_stream(stream_config("s1", LOW_URL));

    let error = wait_for_event(&mut sub, "error").await;
    assert!(error["data"]["message"]
        .as_str()
        .unwrap()
        .contains("Failed to fetch manifest"));

    let health = h.engine.get_health("s1").unwrap();
    assert_eq!(health.status, streamprobe_core::StreamStatus::Error);
    assert!(!health.manifest_errors.is_empty());
    assert!(health.health_score.score < 100);

    // The pipeline survives the failure and keeps polling.
    wait_until(
        || h.loader.requested("manifest:").len() >= 2,
        "pipeline keeps polling after failure",
    )
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_downloads_feed_the_error_rate_alert() {
    let loader = ScriptedLoader::new()
        .manifest(
            LOW_URL,
            &[
                media_playlist(0, &["ok_1.ts"]),
                media_playlist(1, &["ok_1.ts", "missing.ts"]),
                media_playlist(2, &["ok_1.ts", "missing.ts", "ok_2.ts"]),
            ],
        )
        .segment("https://mock.example.com/live/ok_1.ts", ts_body())
        .segment("https://mock.example.com/live/ok_2.ts", ts_body());
    let h = harness(loader);

    h.engine.add_stream(stream_config("s1", LOW_URL));

    wait_until(
        || h.engine.get_metrics_history("s1", 100).len() == 2,
        "both good segments processed",
    )
    .await;

    wait_until(
        || {
            h.engine
                .alerts()
                .active_alerts("s1")
                .iter()
                .any(|a| a.alert_type == streamprobe_core::AlertType::HighErrorRate)
        },
        "high error rate alert raised",
    )
    .await;

    let health = h.engine.get_health("s1").unwrap();
    assert!(health.error_rate > 0.0);
    assert!(health
        .active_alerts
        .iter()
        .any(|a| a.alert_type == streamprobe_core::AlertType::HighErrorRate));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_add_is_idempotent() {
    let loader = ScriptedLoader::new().manifest(LOW_URL, &[media_playlist(0, &[])]);
    let h = harness(loader);

    h.engine.add_stream(stream_config("s1", LOW_URL));
    h.engine.add_stream(stream_config("s1", LOW_URL));

    assert_eq!(h.engine.list_streams().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remove_stream_evicts_everything_and_silences_the_bus() {
    let loader = ScriptedLoader::new()
        .manifest(LOW_URL, &[media_playlist(0, &["a.ts"])])
        .segment("https://mock.example.com/live/a.ts", ts_body());
    let h = harness(loader);

    let mut sub = h.engine.bus().subscribe("s1");
    h.engine.add_stream(stream_config("s1", LOW_URL));

    wait_for_event(&mut sub, "segment_downloaded").await;
    // Let in-flight analyzer tasks drain before removal.
    tokio::time::sleep(Duration::from_millis(300)).await;
    while sub.rx.try_recv().is_ok() {}

    assert!(h.engine.remove_stream("s1"));
    assert!(!h.engine.remove_stream("s1"), "second removal is a no-op");

    assert!(!h.engine.contains_stream("s1"));
    assert!(h.engine.get_health("s1").is_none());
    assert!(h.engine.get_metrics_history("s1", 100).is_empty());
    assert!(h.engine.alerts().active_alerts("s1").is_empty());

    // The removal notice is the last event this stream ever publishes.
    let removed = wait_for_event(&mut sub, "stream_removed").await;
    assert_eq!(removed["stream_id"], "s1");

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(
        sub.rx.try_recv().is_err(),
        "no events after stream_removed"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ad_markers_are_published() {
    let mut playlist = media_playlist(0, &["a.ts"]);
    playlist.push_str("#EXT-X-CUE-OUT:30\n");
    let loader = ScriptedLoader::new()
        .manifest(LOW_URL, &[playlist])
        .segment("https://mock.example.com/live/a.ts", ts_body());
    let h = harness(loader);

    let mut sub = h.engine.bus().subscribe("s1");
    h.engine.add_stream(stream_config("s1", LOW_URL));

    let ad = wait_for_event(&mut sub, "ad_detected").await;
    assert_eq!(ad["data"]["type"], "splice_out");
    assert_eq!(ad["data"]["duration"], 30.0);
}
