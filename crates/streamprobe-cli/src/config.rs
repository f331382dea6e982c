//! TOML configuration file schema and parsing.
//!
//! Example config file:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:8080"
//! log_format = "json"
//!
//! [monitor]
//! data_dir = "/var/lib/streamprobe"
//! poll_interval_ms = 4000
//! sprite_segment_count = 10
//! log_compress_days = 1
//! log_delete_days = 7
//!
//! [[stream]]
//! id = "channel-1"
//! name = "Channel One"
//! url = "https://cdn.example.com/live/master.m3u8"
//! tags = ["news"]
//! ```

use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;

use streamprobe_core::{MonitorSettings, StreamConfig};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub monitor: MonitorDefaults,

    #[serde(default)]
    pub stream: Vec<StreamDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            log_format: default_log_format(),
        }
    }
}

fn default_listen() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

fn default_log_format() -> String {
    "pretty".into()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MonitorDefaults {
    pub data_dir: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub download_timeout_ms: Option<u64>,
    pub sprite_segment_count: Option<usize>,
    pub max_inflight_downloads: Option<usize>,
    pub log_compress_days: Option<i64>,
    pub log_delete_days: Option<i64>,
}

impl MonitorDefaults {
    pub fn to_settings(&self) -> MonitorSettings {
        let mut settings = MonitorSettings::default();
        if let Some(ref dir) = self.data_dir {
            settings = settings.with_data_dir(dir);
        }
        if let Some(ms) = self.poll_interval_ms {
            settings = settings.with_poll_interval(ms);
        }
        if let Some(ms) = self.download_timeout_ms {
            settings.download_timeout = std::time::Duration::from_millis(ms);
        }
        if let Some(count) = self.sprite_segment_count {
            settings = settings.with_sprite_segment_count(count);
        }
        if let Some(max) = self.max_inflight_downloads {
            settings = settings.with_max_inflight_downloads(max);
        }
        if let (Some(compress), Some(delete)) = (self.log_compress_days, self.log_delete_days) {
            settings = settings.with_log_retention(compress, delete);
        } else if let Some(compress) = self.log_compress_days {
            settings.log_compress_days = compress;
        } else if let Some(delete) = self.log_delete_days {
            settings.log_delete_days = delete;
        }
        settings
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamDef {
    pub id: Option<String>,
    pub name: Option<String>,
    pub url: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl StreamDef {
    pub fn to_stream_config(&self, index: usize) -> StreamConfig {
        let id = self
            .id
            .clone()
            .unwrap_or_else(|| format!("stream_{}", index + 1));
        StreamConfig {
            name: self.name.clone().unwrap_or_else(|| id.clone()),
            id,
            manifest_url: self.url.clone(),
            enabled: true,
            tags: self.tags.clone(),
            created_at: chrono::Utc::now(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file {}: {}", path.display(), e))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        let mut stream_ids = std::collections::HashSet::new();
        for (i, s) in self.stream.iter().enumerate() {
            let parsed = url::Url::parse(&s.url)
                .map_err(|e| format!("Invalid stream URL at index {}: {} ({})", i, s.url, e))?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(format!("Stream URL must use http or https: {}", s.url));
            }
            if let Some(ref id) = s.id {
                if !stream_ids.insert(id.clone()) {
                    return Err(format!("Duplicate stream ID: {id}"));
                }
            }
        }

        match self.server.log_format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(format!(
                    "Invalid log_format '{}': must be 'pretty' or 'json'",
                    other
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let toml = r#"
[[stream]]
url = "https://example.com/master.m3u8"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.stream.len(), 1);
        assert_eq!(config.server.log_format, "pretty");

        let sc = config.stream[0].to_stream_config(0);
        assert_eq!(sc.id, "stream_1");
        assert_eq!(sc.name, "stream_1");
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[server]
listen = "127.0.0.1:9090"
log_format = "json"

[monitor]
data_dir = "/tmp/probe-data"
poll_interval_ms = 2000
sprite_segment_count = 5
log_compress_days = 2
log_delete_days = 14

[[stream]]
id = "channel-1"
name = "Channel One"
url = "https://cdn1.example.com/master.m3u8"
tags = ["news", "hd"]

[[stream]]
url = "https://cdn2.example.com/master.m3u8"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.server.listen.port(), 9090);
        assert_eq!(config.server.log_format, "json");

        let settings = config.monitor.to_settings();
        assert_eq!(settings.poll_interval.as_millis(), 2000);
        assert_eq!(settings.sprite_segment_count, 5);
        assert_eq!(settings.log_compress_days, 2);
        assert_eq!(settings.log_delete_days, 14);
        assert_eq!(settings.data_dir, std::path::PathBuf::from("/tmp/probe-data"));

        let first = config.stream[0].to_stream_config(0);
        assert_eq!(first.id, "channel-1");
        assert_eq!(first.name, "Channel One");
        assert_eq!(first.tags, vec!["news", "hd"]);

        let second = config.stream[1].to_stream_config(1);
        assert_eq!(second.id, "stream_2");
    }

    #[test]
    fn validate_rejects_invalid_url() {
        let toml = r#"
[[stream]]
url = "not-a-url"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("Invalid stream URL"), "{}", err);
    }

    #[test]
    fn validate_rejects_duplicate_ids() {
        let toml = r#"
[[stream]]
id = "same"
url = "https://a.com/m.m3u8"

[[stream]]
id = "same"
url = "https://b.com/m.m3u8"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("Duplicate stream ID"), "{}", err);
    }

    #[test]
    fn validate_rejects_invalid_log_format() {
        let toml = r#"
[server]
log_format = "xml"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("Invalid log_format"), "{}", err);
    }
}
