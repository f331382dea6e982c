//! Ad-insertion marker detection over raw manifest text.
//!
//! The structured playlist parser does not model server-specific cue tags, so
//! ad markers are scanned line by line: `#EXT-X-DATERANGE`, `#EXT-X-CUE-OUT`
//! (with `DURATION=` attribute or `:<seconds>` shorthand), `#EXT-X-CUE-IN`,
//! and custom bandwidth-reservation tags. Malformed lines are skipped; the
//! scan never fails.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdMarkerKind {
    AdInsertion,
    SpliceOut,
    SpliceIn,
    BandwidthReservation,
}

impl std::fmt::Display for AdMarkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AdInsertion => write!(f, "ad_insertion"),
            Self::SpliceOut => write!(f, "splice_out"),
            Self::SpliceIn => write!(f, "splice_in"),
            Self::BandwidthReservation => write!(f, "bandwidth_reservation"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AdMarker {
    pub timestamp: DateTime<Utc>,
    pub kind: AdMarkerKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    pub metadata: HashMap<String, String>,
}

/// Value of `KEY=` within an attribute list, quoted or bare. Matches only at
/// attribute boundaries so `DURATION=` does not hit `PLANNED-DURATION=`.
fn attr_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let needle = format!("{key}=");
    let mut search = 0;
    while let Some(pos) = line[search..].find(&needle) {
        let at = search + pos;
        let boundary = at == 0 || matches!(line.as_bytes()[at - 1], b':' | b',' | b' ');
        if !boundary {
            search = at + needle.len();
            continue;
        }
        let rest = &line[at + needle.len()..];
        return if let Some(quoted) = rest.strip_prefix('"') {
            quoted.split('"').next()
        } else {
            rest.split(',').next()
        };
    }
    None
}

fn parse_daterange(line: &str) -> AdMarker {
    let mut metadata = HashMap::new();
    if let Some(id) = attr_value(line, "ID") {
        metadata.insert("id".to_string(), id.to_string());
    }
    if let Some(class) = attr_value(line, "CLASS") {
        metadata.insert("class".to_string(), class.to_string());
    }

    let timestamp = attr_value(line, "START-DATE")
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    let duration = attr_value(line, "DURATION").and_then(|v| v.parse().ok());

    AdMarker {
        timestamp,
        kind: AdMarkerKind::AdInsertion,
        duration,
        metadata,
    }
}

fn parse_cue_out(line: &str) -> AdMarker {
    let duration = attr_value(line, "DURATION")
        .and_then(|v| v.parse().ok())
        .or_else(|| {
            line.strip_prefix("#EXT-X-CUE-OUT:")
                .and_then(|rest| rest.trim().parse().ok())
        });

    AdMarker {
        timestamp: Utc::now(),
        kind: AdMarkerKind::SpliceOut,
        duration,
        metadata: HashMap::from([("line".to_string(), line.to_string())]),
    }
}

pub fn parse_ad_markers(manifest: &str) -> Vec<AdMarker> {
    let mut markers = Vec::new();

    for raw in manifest.lines() {
        let line = raw.trim();

        if line.starts_with("#EXT-X-DATERANGE") {
            markers.push(parse_daterange(line));
        } else if line.starts_with("#EXT-X-CUE-OUT") && !line.starts_with("#EXT-X-CUE-OUT-CONT") {
            markers.push(parse_cue_out(line));
        } else if line.starts_with("#EXT-X-CUE-IN") {
            markers.push(AdMarker {
                timestamp: Utc::now(),
                kind: AdMarkerKind::SpliceIn,
                duration: None,
                metadata: HashMap::from([("line".to_string(), line.to_string())]),
            });
        } else if line.to_ascii_uppercase().contains("BANDWIDTH-RESERVATION") {
            markers.push(AdMarker {
                timestamp: Utc::now(),
                kind: AdMarkerKind::BandwidthReservation,
                duration: None,
                metadata: HashMap::from([("line".to_string(), line.to_string())]),
            });
        }
    }

    markers
}
