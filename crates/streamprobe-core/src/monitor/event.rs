use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything that can be published to a stream's subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StreamAdded,
    StreamRemoved,
    ManifestUpdated,
    VariantSelected,
    SegmentDownloaded,
    ThumbnailGenerated,
    SpriteGenerated,
    AdDetected,
    Scte35Detected,
    LoudnessData,
    Alarm,
    HealthUpdate,
    Error,
    Connected,
    Pong,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::StreamAdded => "stream_added",
            Self::StreamRemoved => "stream_removed",
            Self::ManifestUpdated => "manifest_updated",
            Self::VariantSelected => "variant_selected",
            Self::SegmentDownloaded => "segment_downloaded",
            Self::ThumbnailGenerated => "thumbnail_generated",
            Self::SpriteGenerated => "sprite_generated",
            Self::AdDetected => "ad_detected",
            Self::Scte35Detected => "scte35_detected",
            Self::LoudnessData => "loudness_data",
            Self::Alarm => "alarm",
            Self::HealthUpdate => "health_update",
            Self::Error => "error",
            Self::Connected => "connected",
            Self::Pong => "pong",
        };
        write!(f, "{s}")
    }
}

/// Envelope published on the event bus. `timestamp` is attached at broadcast
/// time when the producer did not set one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub stream_id: String,
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl StreamEvent {
    pub fn new(kind: EventKind, stream_id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind,
            stream_id: stream_id.into(),
            data,
            timestamp: None,
        }
    }
}
