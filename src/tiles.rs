// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Raster basemap tiles painted under the map layers.
//!
//! Tiles are fetched on the async runtime, cached on disk for a week and
//! uploaded as egui textures.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use airspace_client::render::Camera;
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::runtime::Handle;

use crate::map_view::WebMercator;

const TILE_SIZE: f64 = 256.0;
const MAX_TILE_ZOOM: u8 = 19;
const CACHE_DURATION_DAYS: u64 = 7;
const SUBDOMAINS: [char; 4] = ['a', 'b', 'c', 'd'];

pub const ATTRIBUTION: &str = "© OpenStreetMap contributors, © CARTO";

#[derive(Debug, Error)]
enum TileError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("cache read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub x: u32,
    pub y: u32,
    pub zoom: u8,
}

impl TileCoord {
    pub fn new(x: u32, y: u32, zoom: u8) -> Self {
        Self { x, y, zoom }
    }

    /// Expand `{s}`, `{z}`, `{x}` and `{y}` in a tile URL template.
    pub fn url(&self, template: &str) -> String {
        let subdomain = SUBDOMAINS[((self.x % 4 + self.y % 4) % 4) as usize];
        template
            .replace("{s}", &subdomain.to_string())
            .replace("{z}", &self.zoom.to_string())
            .replace("{x}", &self.x.to_string())
            .replace("{y}", &self.y.to_string())
    }

    fn cache_filename(&self, template: &str) -> String {
        let hash = Sha256::digest(self.url(template).as_bytes());
        format!("{hash:x}.png")
    }
}

enum TileState {
    Loading,
    Loaded(egui::TextureHandle),
    Failed,
}

/// Fetches, caches and hands out basemap tile textures.
pub struct TileManager {
    url_template: String,
    cache_dir: Option<PathBuf>,
    http: reqwest::Client,
    runtime: Option<Handle>,
    tiles: Arc<Mutex<HashMap<TileCoord, TileState>>>,
}

impl std::fmt::Debug for TileManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileManager")
            .field("url_template", &self.url_template)
            .field("cache_dir", &self.cache_dir)
            .finish_non_exhaustive()
    }
}

impl TileManager {
    /// Create a manager for `url_template`. Downloads run on the current
    /// tokio runtime; without one only cached tiles are shown.
    pub fn new(url_template: impl Into<String>) -> Self {
        let cache_dir = dirs::cache_dir().map(|mut path| {
            path.push("airspace-monitor");
            path.push("tiles");
            path
        });

        if let Some(dir) = &cache_dir {
            match fs::create_dir_all(dir) {
                Ok(()) => cleanup_old_tiles(dir),
                Err(e) => warn!("Failed to create tile cache {}: {e}", dir.display()),
            }
        }

        let runtime = Handle::try_current().ok();
        if runtime.is_none() {
            warn!("No async runtime; basemap tiles will not be downloaded");
        }

        let http = reqwest::Client::builder()
            .user_agent(concat!("airspace-monitor/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to build tile HTTP client: {e}");
                reqwest::Client::new()
            });

        Self {
            url_template: url_template.into(),
            cache_dir,
            http,
            runtime,
            tiles: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Texture for `coord` if loaded; otherwise starts loading it.
    pub fn get_tile(&self, coord: TileCoord, ctx: &egui::Context) -> Option<egui::TextureHandle> {
        let Ok(mut tiles) = self.tiles.lock() else {
            return None;
        };

        match tiles.get(&coord) {
            Some(TileState::Loaded(texture)) => return Some(texture.clone()),
            Some(TileState::Loading | TileState::Failed) => return None,
            None => {}
        }

        if let Some(path) = self.cache_path(coord).filter(|p| p.exists()) {
            match fs::read(&path).map_err(TileError::from).and_then(|bytes| load_texture(ctx, coord, &bytes)) {
                Ok(texture) => {
                    tiles.insert(coord, TileState::Loaded(texture.clone()));
                    return Some(texture);
                }
                Err(e) => warn!("Failed to load cached tile {}: {e}", path.display()),
            }
        }

        tiles.insert(coord, TileState::Loading);
        drop(tiles);
        self.queue_download(coord, ctx.clone());
        None
    }

    /// Number of tiles still loading and of tiles that failed.
    pub fn progress(&self) -> (usize, usize) {
        let Ok(tiles) = self.tiles.lock() else {
            return (0, 0);
        };
        tiles.values().fold((0, 0), |(loading, failed), state| match state {
            TileState::Loading => (loading + 1, failed),
            TileState::Failed => (loading, failed + 1),
            TileState::Loaded(_) => (loading, failed),
        })
    }

    fn cache_path(&self, coord: TileCoord) -> Option<PathBuf> {
        let dir = self.cache_dir.as_ref()?;
        Some(dir.join(coord.cache_filename(&self.url_template)))
    }

    fn queue_download(&self, coord: TileCoord, ctx: egui::Context) {
        let tiles = Arc::clone(&self.tiles);
        let Some(runtime) = &self.runtime else {
            if let Ok(mut tiles) = tiles.lock() {
                tiles.insert(coord, TileState::Failed);
            }
            return;
        };

        let http = self.http.clone();
        let url = coord.url(&self.url_template);
        let cache_path = self.cache_path(coord);

        runtime.spawn(async move {
            let state = match fetch_tile(&http, &url, cache_path.as_deref())
                .await
                .and_then(|bytes| load_texture(&ctx, coord, &bytes))
            {
                Ok(texture) => {
                    ctx.request_repaint();
                    TileState::Loaded(texture)
                }
                Err(e) => {
                    warn!("Failed to load tile {url}: {e}");
                    TileState::Failed
                }
            };

            if let Ok(mut tiles) = tiles.lock() {
                tiles.insert(coord, state);
            }
        });
    }
}

async fn fetch_tile(http: &reqwest::Client, url: &str, cache_path: Option<&Path>) -> Result<Vec<u8>, TileError> {
    debug!("Downloading tile: {url}");
    let response = http.get(url).send().await?;
    if !response.status().is_success() {
        return Err(TileError::Status(response.status()));
    }
    let bytes = response.bytes().await?.to_vec();

    if let Some(path) = cache_path {
        if let Err(e) = tokio::fs::write(path, &bytes).await {
            warn!("Failed to save tile to cache: {e}");
        }
    }
    Ok(bytes)
}

fn load_texture(ctx: &egui::Context, coord: TileCoord, bytes: &[u8]) -> Result<egui::TextureHandle, TileError> {
    let rgba = image::load_from_memory(bytes)?.to_rgba8();
    let size = [rgba.width() as usize, rgba.height() as usize];
    let color_image = egui::ColorImage::from_rgba_unmultiplied(size, &rgba.into_raw());

    Ok(ctx.load_texture(
        format!("tile_{}_{}/{}", coord.zoom, coord.x, coord.y),
        color_image,
        egui::TextureOptions::default(),
    ))
}

fn cleanup_old_tiles(cache_dir: &Path) {
    let now = SystemTime::now();
    let max_age = Duration::from_secs(CACHE_DURATION_DAYS * 24 * 60 * 60);

    let Ok(entries) = fs::read_dir(cache_dir) else {
        return;
    };
    let mut removed = 0;
    for entry in entries.flatten() {
        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());
        if age.is_some_and(|age| age > max_age) && fs::remove_file(entry.path()).is_ok() {
            removed += 1;
        }
    }
    if removed > 0 {
        info!("Removed {removed} expired tiles from cache");
    }
}

/// Tiles covering `viewport` for `camera`, with their screen rectangles.
///
/// Fractional zoom levels scale the tiles of the zoom level below.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    reason = "tile indices and screen offsets are small"
)]
pub fn visible_tiles(camera: &Camera, viewport: egui::Rect) -> Vec<(TileCoord, egui::Rect)> {
    let tile_zoom = camera.zoom.floor().clamp(0.0, f64::from(MAX_TILE_ZOOM)) as u8;
    let tile_px = TILE_SIZE * 2_f64.powf(camera.zoom - f64::from(tile_zoom));

    let center_x = WebMercator::lon_to_x(camera.center.lon, f64::from(tile_zoom)) / TILE_SIZE;
    let center_y = WebMercator::lat_to_y(camera.center.lat, f64::from(tile_zoom)) / TILE_SIZE;
    let half_w = f64::from(viewport.width()) / 2.0 / tile_px;
    let half_h = f64::from(viewport.height()) / 2.0 / tile_px;

    let max_tile = 1_i64 << tile_zoom;
    let x_range = (center_x - half_w).floor() as i64..=(center_x + half_w).floor() as i64;
    let y_range = ((center_y - half_h).floor() as i64).max(0)..=((center_y + half_h).floor() as i64).min(max_tile - 1);

    let mut tiles = Vec::new();
    for tile_y in y_range {
        for tile_x in x_range.clone() {
            let (Ok(x), Ok(y)) = (u32::try_from(tile_x.rem_euclid(max_tile)), u32::try_from(tile_y)) else {
                continue;
            };
            let min = viewport.center()
                + egui::vec2(
                    ((tile_x as f64 - center_x) * tile_px) as f32,
                    ((tile_y as f64 - center_y) * tile_px) as f32,
                );
            let rect = egui::Rect::from_min_size(min, egui::Vec2::splat(tile_px as f32));
            tiles.push((TileCoord::new(x, y, tile_zoom), rect));
        }
    }
    tiles
}
