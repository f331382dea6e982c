//! Stream configuration persistence: a JSON array in `streams.json`, saved
//! on every mutation and loaded at startup.

use std::path::Path;

use tracing::{info, warn};

use crate::monitor::StreamConfig;

pub fn load_streams(path: &Path) -> Vec<StreamConfig> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read streams file");
            return Vec::new();
        }
    };
    match serde_json::from_str::<Vec<StreamConfig>>(&content) {
        Ok(streams) => {
            info!(count = streams.len(), "Loaded streams from persistence");
            streams
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to parse streams file");
            Vec::new()
        }
    }
}

pub fn save_streams(path: &Path, streams: &[StreamConfig]) {
    let json = match serde_json::to_string_pretty(streams) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "Failed to serialize streams");
            return;
        }
    };
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(e) = std::fs::write(path, json) {
        warn!(path = %path.display(), error = %e, "Failed to persist streams");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("streams.json");

        assert!(load_streams(&path).is_empty());

        let streams = vec![StreamConfig {
            id: "s1".into(),
            name: "Channel One".into(),
            manifest_url: "https://example.com/master.m3u8".into(),
            enabled: true,
            tags: vec!["news".into()],
            created_at: chrono::Utc::now(),
        }];
        save_streams(&path, &streams);

        let loaded = load_streams(&path);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "s1");
        assert_eq!(loaded[0].tags, vec!["news"]);
    }

    #[test]
    fn malformed_file_yields_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("streams.json");
        std::fs::write(&path, "{broken").unwrap();
        assert!(load_streams(&path).is_empty());
    }
}
