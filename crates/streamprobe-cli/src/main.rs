#![forbid(unsafe_code)]

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing_subscriber::{fmt, EnvFilter};

use streamprobe_core::{
    ensure_data_dirs, notification_channel, AlertEngine, Engine, EngineParts, EventBus,
    HttpLoader, LogStore, MediaProbe, MonitorSettings, SpriteGenerator, StreamConfig,
    StreamLoader, ThumbnailGenerator, TsAnalyzer, WebhookDispatcher,
};

fn version_string() -> &'static str {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    const GIT_HASH: &str = env!("GIT_HASH");

    if GIT_HASH.is_empty() {
        // Leak is fine — called once, lives for the program's lifetime.
        Box::leak(VERSION.to_string().into_boxed_str())
    } else {
        Box::leak(format!("{VERSION} ({GIT_HASH})").into_boxed_str())
    }
}

/// OTT stream monitor — watch HLS streams, measure segment quality, raise alerts.
#[derive(Parser)]
#[command(name = "streamprobe", version = version_string(), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server.
    Serve {
        /// Listen address (e.g. 0.0.0.0:8080). Overrides config file.
        #[arg(short, long)]
        listen: Option<SocketAddr>,

        /// Path to TOML config file.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Monitor a single stream from the command line (no API server).
    Watch {
        /// Manifest URL to monitor.
        url: String,

        /// Poll interval in milliseconds.
        #[arg(long, default_value_t = 4000)]
        poll_interval: u64,

        /// Data directory for segments, thumbnails and logs.
        #[arg(long, default_value = "probe-data")]
        data_dir: PathBuf,
    },
    /// Analyze a local MPEG-TS file and report TR 101 290 counters.
    Analyze {
        /// Path to a .ts file.
        file: PathBuf,

        /// Output the report as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { listen, config } => run_serve(listen, config).await,
        Commands::Watch {
            url,
            poll_interval,
            data_dir,
        } => {
            fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
                )
                .init();
            run_watch(url, poll_interval, data_dir).await;
        }
        Commands::Analyze { file, json } => run_analyze(file, json),
    }
}

fn init_tracing(log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_format {
        "json" => {
            fmt().with_env_filter(filter).json().init();
        }
        _ => {
            fmt().with_env_filter(filter).init();
        }
    }
}

/// Wire the engine with its collaborators. The webhook dispatcher task is
/// spawned here and runs until the notification sender side is dropped.
fn build_engine(
    settings: MonitorSettings,
    webhooks: Arc<WebhookDispatcher>,
) -> std::io::Result<Arc<Engine>> {
    ensure_data_dirs(&settings)?;

    let (notification_tx, notification_rx) = notification_channel();
    tokio::spawn(Arc::clone(&webhooks).run(notification_rx));

    let parts = EngineParts {
        loader: Arc::new(HttpLoader::from_settings(&settings)) as Arc<dyn StreamLoader>,
        bus: Arc::new(EventBus::new()),
        alerts: Arc::new(AlertEngine::new(Some(notification_tx))),
        logs: Arc::new(LogStore::new(
            settings.logs_dir(),
            settings.log_compress_days,
            settings.log_delete_days,
        )?),
        thumbnails: Arc::new(ThumbnailGenerator::new(
            settings.thumbnails_dir(),
            settings.thumbnail_width,
            settings.thumbnail_height,
            settings.thumbnail_keep_count,
        )?),
        sprites: Arc::new(SpriteGenerator::new(
            settings.sprites_dir(),
            settings.sprite_grid_width,
            settings.sprite_grid_height,
            settings.thumbnail_width,
            settings.thumbnail_height,
        )?),
        media: Arc::new(MediaProbe::new(settings.probe_timeout)),
    };

    Ok(Arc::new(Engine::new(settings, parts)?))
}

/// Hourly log rotation plus daily cleanup of resolved alerts.
fn spawn_maintenance(engine: Arc<Engine>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            engine.logs().rotate().await;
            engine
                .alerts()
                .cleanup_old_alerts(chrono::Duration::hours(24));
        }
    });
}

async fn run_serve(listen_override: Option<SocketAddr>, config_path: Option<PathBuf>) {
    let app_config = if let Some(ref path) = config_path {
        match config::AppConfig::load(path) {
            Ok(c) => {
                init_tracing(&c.server.log_format);
                tracing::info!(path = %path.display(), "Loaded config file");
                Some(c)
            }
            Err(e) => {
                init_tracing("pretty");
                tracing::error!("{}", e);
                std::process::exit(1);
            }
        }
    } else {
        init_tracing("pretty");
        None
    };

    let listen = listen_override
        .or(app_config.as_ref().map(|c| c.server.listen))
        .unwrap_or_else(|| "0.0.0.0:8080".parse().unwrap());

    let settings = app_config
        .as_ref()
        .map(|c| c.monitor.to_settings())
        .unwrap_or_default();

    let streams_file = settings.streams_file();
    let webhooks = Arc::new(WebhookDispatcher::new(Some(settings.webhooks_file())));

    let engine = match build_engine(settings, Arc::clone(&webhooks)) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize data directories");
            std::process::exit(1);
        }
    };

    for stream in streamprobe_core::persist::load_streams(&streams_file) {
        engine.add_stream(stream);
    }

    if let Some(ref app_config) = app_config {
        for (i, def) in app_config.stream.iter().enumerate() {
            let config = def.to_stream_config(i);
            if engine.contains_stream(&config.id) {
                continue;
            }
            tracing::info!(stream_id = %config.id, "Stream added from config");
            engine.add_stream(config);
        }
        streamprobe_core::persist::save_streams(&streams_file, &engine.list_streams());
    }

    spawn_maintenance(Arc::clone(&engine));

    let state = streamprobe_api::state::AppState::new(Arc::clone(&engine), webhooks)
        .with_streams_file(streams_file);

    tracing::info!(%listen, "Starting streamprobe API server");
    if let Err(e) =
        streamprobe_api::serve_with_state(listen, state, streamprobe_api::shutdown_signal()).await
    {
        tracing::error!(error = %e, "Server failed");
        std::process::exit(1);
    }

    tracing::info!("Shutdown signal received, stopping monitors...");
    engine.shutdown();
    tracing::info!("Shutdown complete");
}

async fn run_watch(url: String, poll_interval: u64, data_dir: PathBuf) {
    let settings = MonitorSettings::default()
        .with_data_dir(data_dir)
        .with_poll_interval(poll_interval);

    let webhooks = Arc::new(WebhookDispatcher::new(None));
    let engine = match build_engine(settings, webhooks) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Failed to initialize data directory: {e}");
            std::process::exit(1);
        }
    };

    let stream_id = "stream_1".to_string();
    let mut subscription = engine.bus().subscribe(&stream_id);

    engine.add_stream(StreamConfig {
        id: stream_id.clone(),
        name: "watch".to_string(),
        manifest_url: url.clone(),
        enabled: true,
        tags: vec![],
        created_at: chrono::Utc::now(),
    });

    let multi = MultiProgress::new();
    let msg_style = ProgressStyle::with_template("{msg}").expect("valid template");

    multi
        .println(format!(
            "{} {}",
            style("streamprobe").bold(),
            style(env!("CARGO_PKG_VERSION")).dim()
        ))
        .ok();
    multi
        .println(format!("  {} {}", style("url: ").dim(), style(&url).bold()))
        .ok();
    multi
        .println(format!("  {} {}ms", style("poll:").dim(), poll_interval))
        .ok();
    multi.println("").ok();
    multi
        .println(format!("{}", style("Press Ctrl+C to stop").dim()))
        .ok();
    multi.println("").ok();

    let status_bar = multi.add(ProgressBar::new_spinner().with_style(msg_style));
    status_bar.set_message(format!("  {}", style("Waiting for first manifest fetch...").dim()));

    let shutdown = streamprobe_api::shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                status_bar.finish_and_clear();
                multi.println(format!("\n{}", style("Monitor stopped.").dim())).ok();
                engine.shutdown();
                return;
            }
            message = subscription.rx.recv() => {
                let Some(message) = message else {
                    return;
                };
                let Ok(event) = serde_json::from_str::<serde_json::Value>(&message) else {
                    continue;
                };
                print_watch_event(&multi, &event);

                if let Some(health) = engine.get_health(&stream_id) {
                    let score = health.health_score.score;
                    let score_styled = match health.health_score.color {
                        streamprobe_core::HealthColor::Green => style(format!("{score}%")).green(),
                        streamprobe_core::HealthColor::Yellow => style(format!("{score}%")).yellow(),
                        streamprobe_core::HealthColor::Red => style(format!("{score}%")).red().bold(),
                    };
                    status_bar.set_message(format!(
                        "  {} {}  {} {}  {} {}",
                        style("status:").dim(),
                        health.status,
                        style("health:").dim(),
                        score_styled,
                        style("alerts:").dim(),
                        health.active_alerts.len(),
                    ));
                }
            }
        }
    }
}

fn print_watch_event(multi: &MultiProgress, event: &serde_json::Value) {
    let kind = event["type"].as_str().unwrap_or("?");
    let ts = event["timestamp"]
        .as_str()
        .and_then(|t| t.parse::<chrono::DateTime<chrono::Utc>>().ok())
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_default();

    let line = match kind {
        "segment_downloaded" => {
            let data = &event["data"];
            format!(
                "  {}  {} seq={} {} Mb/s ttfb={}ms",
                style(ts).dim(),
                style(format!("{kind:<18}")).green(),
                data["sequence_number"],
                data["actual_bitrate"],
                data["ttfb"],
            )
        }
        "variant_selected" => format!(
            "  {}  {} {} @ {} bps",
            style(ts).dim(),
            style(format!("{kind:<18}")).cyan(),
            event["data"]["variant"]["resolution"]
                .as_str()
                .unwrap_or("unknown"),
            event["data"]["variant"]["bandwidth"],
        ),
        "ad_detected" | "scte35_detected" | "alarm" => format!(
            "  {}  {} {}",
            style(ts).dim(),
            style(format!("{kind:<18}")).yellow(),
            event["data"],
        ),
        "error" => format!(
            "  {}  {} {}",
            style(ts).dim(),
            style(format!("{kind:<18}")).red().bold(),
            event["data"]["message"].as_str().unwrap_or(""),
        ),
        // Frequent low-signal events stay off the console.
        "manifest_updated" | "health_update" | "thumbnail_generated" | "loudness_data" => {
            return;
        }
        _ => format!(
            "  {}  {}",
            style(ts).dim(),
            style(format!("{kind:<18}")).dim()
        ),
    };
    multi.println(line).ok();
}

fn run_analyze(file: PathBuf, json: bool) {
    let data = match std::fs::read(&file) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Failed to read {}: {e}", file.display());
            std::process::exit(1);
        }
    };

    let mut analyzer = TsAnalyzer::new();
    let metrics = analyzer.analyze(&data);

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&metrics).expect("TsMetrics is Serialize")
        );
    } else {
        println!("{}", style(format!("{}", file.display())).bold());
        println!("  packets:             {}", metrics.packet_count);
        println!("  PIDs:                {}", metrics.pid_counts.len());
        println!("  null packets:        {}", metrics.null_packet_count);
        println!("  PCR samples:         {}", metrics.pcr_count);

        let counter = |label: &str, count: u64| {
            let value = if count > 0 {
                style(count.to_string()).red().bold()
            } else {
                style(count.to_string()).green()
            };
            println!("  {label:<20} {value}");
        };
        counter("sync byte errors:", metrics.sync_byte_errors);
        counter("continuity errors:", metrics.continuity_errors);
        counter("transport errors:", metrics.transport_errors);
        counter("PAT errors:", metrics.pat_errors);
        counter("PCR discontinuities:", metrics.pcr_discontinuities);

        if metrics.scte35_messages > 0 {
            println!(
                "  {} {} message(s) on PIDs {:?}",
                style("SCTE-35:").yellow().bold(),
                metrics.scte35_messages,
                metrics.scte35_pids,
            );
        }
    }

    let has_errors = metrics.sync_byte_errors
        + metrics.continuity_errors
        + metrics.transport_errors
        + metrics.pat_errors
        > 0;
    std::process::exit(if has_errors { 1 } else { 0 });
}
