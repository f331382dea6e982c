//! Sprite-sheet composition from buffered thumbnails.
//!
//! When a stream has accumulated enough thumbnails, they are tiled into one
//! JPEG grid plus a JSON map describing each tile's position and timestamp,
//! the format scrubbing UIs consume.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum SpriteError {
    #[error("No thumbnails provided for sprite generation")]
    Empty,
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Sprite map not found: {0}")]
    MapNotFound(String),
    #[error("Invalid sprite map: {0}")]
    InvalidMap(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpriteTile {
    pub timestamp: DateTime<Utc>,
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    pub index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpriteMap {
    pub sprite_id: String,
    pub sprite_url: String,
    pub grid_width: u32,
    pub grid_height: u32,
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
    pub thumbnails: Vec<SpriteTile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpriteInfo {
    pub sprite_id: String,
    pub sprite_path: PathBuf,
    pub sprite_map_path: PathBuf,
    pub start_timestamp: DateTime<Utc>,
    pub end_timestamp: DateTime<Utc>,
    pub thumbnail_count: usize,
    pub grid_width: u32,
    pub grid_height: u32,
    pub created_at: DateTime<Utc>,
}

pub struct SpriteGenerator {
    dir: PathBuf,
    grid_width: u32,
    grid_height: u32,
    thumb_width: u32,
    thumb_height: u32,
}

impl SpriteGenerator {
    pub fn new(
        dir: impl Into<PathBuf>,
        grid_width: u32,
        grid_height: u32,
        thumb_width: u32,
        thumb_height: u32,
    ) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            grid_width,
            grid_height,
            thumb_width,
            thumb_height,
        })
    }

    /// Tile `thumbnails` into a sprite sheet and write the JPEG + JSON map.
    /// Thumbnails beyond one full grid are ignored; missing or unreadable
    /// files leave a black tile.
    pub fn compose(
        &self,
        stream_id: &str,
        thumbnails: &[(PathBuf, DateTime<Utc>)],
    ) -> Result<SpriteInfo, SpriteError> {
        if thumbnails.is_empty() {
            return Err(SpriteError::Empty);
        }

        let sprite_id = format!("{}_{}", stream_id, Utc::now().format("%Y%m%d_%H%M%S"));

        let per_sheet = (self.grid_width * self.grid_height) as usize;
        let used = &thumbnails[..thumbnails.len().min(per_sheet)];

        let cols = (used.len() as u32).min(self.grid_width);
        let rows = (used.len() as u32).div_ceil(self.grid_width);

        let mut sheet = RgbImage::new(cols * self.thumb_width, rows * self.thumb_height);
        let mut tiles = Vec::with_capacity(used.len());

        for (index, (path, timestamp)) in used.iter().enumerate() {
            let x = (index as u32 % self.grid_width) * self.thumb_width;
            let y = (index as u32 / self.grid_width) * self.thumb_height;

            match image::open(path) {
                Ok(thumb) => {
                    image::imageops::replace(&mut sheet, &thumb.to_rgb8(), x as i64, y as i64);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable thumbnail in sprite");
                }
            }

            tiles.push(SpriteTile {
                timestamp: *timestamp,
                x,
                y,
                w: self.thumb_width,
                h: self.thumb_height,
                index,
            });
        }

        let sprite_path = self.dir.join(format!("{sprite_id}.jpg"));
        sheet.save(&sprite_path)?;

        let map = SpriteMap {
            sprite_id: sprite_id.clone(),
            sprite_url: format!("/data/sprites/{sprite_id}.jpg"),
            grid_width: cols,
            grid_height: rows,
            thumbnail_width: self.thumb_width,
            thumbnail_height: self.thumb_height,
            thumbnails: tiles,
        };
        let map_path = self.dir.join(format!("{sprite_id}.json"));
        std::fs::write(&map_path, serde_json::to_string_pretty(&map)?)?;

        info!(%sprite_id, tiles = used.len(), "Sprite generated");

        Ok(SpriteInfo {
            sprite_id,
            sprite_path,
            sprite_map_path: map_path,
            start_timestamp: used[0].1,
            end_timestamp: used[used.len() - 1].1,
            thumbnail_count: used.len(),
            grid_width: cols,
            grid_height: rows,
            created_at: Utc::now(),
        })
    }

    pub fn load_map(&self, sprite_id: &str) -> Result<SpriteMap, SpriteError> {
        let path = self.dir.join(format!("{sprite_id}.json"));
        let content = std::fs::read_to_string(&path)
            .map_err(|_| SpriteError::MapNotFound(sprite_id.to_string()))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// All sprite maps, optionally filtered to one stream, newest first.
    pub fn list_maps(&self, stream_id: Option<&str>) -> Vec<SpriteMap> {
        let mut maps = Vec::new();
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return maps;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_none_or(|e| e != "json") {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            let Ok(map) = serde_json::from_str::<SpriteMap>(&content) else {
                continue;
            };
            if let Some(id) = stream_id {
                if !map.sprite_id.starts_with(&format!("{id}_")) {
                    continue;
                }
            }
            maps.push(map);
        }
        maps.sort_by(|a, b| b.sprite_id.cmp(&a.sprite_id));
        maps
    }
}
