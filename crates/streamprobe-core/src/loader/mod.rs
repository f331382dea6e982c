mod http;

pub use http::HttpLoader;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("HTTP error {status} fetching {url}: {message}")]
    Http {
        url: String,
        status: u16,
        message: String,
    },
    #[error("Network error fetching {url}: {reason}")]
    Network { url: String, reason: String },
    #[error("Timeout fetching {url}")]
    Timeout { url: String },
}

impl LoadError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// A downloaded media segment with its transport measurements.
#[derive(Debug, Clone)]
pub struct SegmentDownload {
    pub body: Vec<u8>,
    /// Milliseconds until response headers arrived.
    pub ttfb_ms: f64,
    /// Milliseconds spent reading the body after the headers.
    pub download_ms: f64,
}

impl SegmentDownload {
    pub fn size(&self) -> u64 {
        self.body.len() as u64
    }
}

/// Trait for fetching HLS manifests and media segments.
///
/// Implementations handle HTTP transport, timeouts and retries. The trait is
/// object-safe and Send + Sync so one loader serves every stream pipeline.
#[async_trait]
pub trait StreamLoader: Send + Sync {
    /// Fetch manifest text. Retried internally; an `Err` is final for this poll.
    async fn fetch_manifest(&self, url: &str) -> Result<String, LoadError>;

    /// Fetch one media segment, measuring TTFB and body-read time separately.
    /// Not retried: a failed segment is simply counted and skipped.
    async fn fetch_segment(&self, url: &str) -> Result<SegmentDownload, LoadError>;
}
