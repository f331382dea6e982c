#![forbid(unsafe_code)]

pub mod ads;
pub mod alert;
pub mod bus;
pub mod config;
pub mod health;
pub mod loader;
pub mod logstore;
pub mod manifest;
pub mod media;
pub mod metrics;
pub mod monitor;
pub mod persist;
pub mod ring;
pub mod sprite;
pub mod thumbnail;
pub mod ts;
pub mod webhook;

pub use alert::{Alert, AlertEngine, AlertSeverity, AlertType};
pub use bus::{EventBus, Subscription};
pub use config::{ensure_data_dirs, MonitorSettings};
pub use health::{HealthColor, HealthScore, StreamHealth, StreamStatus};
pub use loader::{HttpLoader, LoadError, SegmentDownload, StreamLoader};
pub use logstore::LogStore;
pub use media::{LoudnessData, MediaProbe};
pub use metrics::SegmentMetrics;
pub use monitor::{Engine, EngineParts, EventKind, Scte35Event, StreamConfig, StreamEvent};
pub use sprite::{SpriteGenerator, SpriteInfo, SpriteMap};
pub use thumbnail::ThumbnailGenerator;
pub use ts::{TsAnalyzer, TsMetrics};
pub use webhook::{notification_channel, Notification, WebhookConfig, WebhookDispatcher};
