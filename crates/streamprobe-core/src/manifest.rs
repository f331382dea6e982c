//! HLS playlist structure: variants out of a master playlist, media segments
//! out of a media playlist, with URIs resolved against the manifest base URL.

use m3u8_rs::Playlist;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestParseError {
    #[error("Failed to parse playlist: {0}")]
    Invalid(String),
}

/// One rendition listed in a master playlist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantInfo {
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    pub bandwidth: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codecs: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<f64>,
}

/// One media segment reference from a media playlist.
#[derive(Debug, Clone)]
pub struct SegmentRef {
    pub uri: String,
    pub duration: f64,
}

/// Parse result: a master playlist yields variants and no segments, a media
/// playlist yields segments and no variants.
#[derive(Debug, Clone, Default)]
pub struct ManifestSummary {
    pub variants: Vec<VariantInfo>,
    pub segments: Vec<SegmentRef>,
}

impl ManifestSummary {
    pub fn is_master(&self) -> bool {
        self.segments.is_empty() && !self.variants.is_empty()
    }

    /// Highest declared bandwidth wins; ties go to the first occurrence.
    pub fn best_variant(&self) -> Option<&VariantInfo> {
        let mut best: Option<&VariantInfo> = None;
        for v in &self.variants {
            match best {
                Some(b) if v.bandwidth <= b.bandwidth => {}
                _ => best = Some(v),
            }
        }
        best
    }
}

/// Resolve `uri` against the manifest URL it was found in.
pub fn resolve_uri(base_url: &str, uri: &str) -> String {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return uri.to_string();
    }
    match url::Url::parse(base_url).and_then(|b| b.join(uri)) {
        Ok(joined) => joined.to_string(),
        Err(_) => uri.to_string(),
    }
}

pub fn parse(content: &str, base_url: &str) -> Result<ManifestSummary, ManifestParseError> {
    match m3u8_rs::parse_playlist(content.as_bytes()) {
        Ok((_, Playlist::MasterPlaylist(master))) => {
            let variants = master
                .variants
                .iter()
                .filter(|v| !v.is_i_frame)
                .map(|v| VariantInfo {
                    uri: resolve_uri(base_url, &v.uri),
                    resolution: v
                        .resolution
                        .as_ref()
                        .map(|r| format!("{}x{}", r.width, r.height)),
                    bandwidth: v.bandwidth,
                    codecs: v.codecs.clone(),
                    frame_rate: v.frame_rate,
                })
                .collect();
            Ok(ManifestSummary {
                variants,
                segments: Vec::new(),
            })
        }
        Ok((_, Playlist::MediaPlaylist(media))) => {
            let segments = media
                .segments
                .iter()
                .map(|s| SegmentRef {
                    uri: resolve_uri(base_url, &s.uri),
                    duration: s.duration as f64,
                })
                .collect();
            Ok(ManifestSummary {
                variants: Vec::new(),
                segments,
            })
        }
        Err(e) => Err(ManifestParseError::Invalid(e.to_string())),
    }
}
