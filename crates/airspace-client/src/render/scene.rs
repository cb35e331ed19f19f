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

//! Retained map scene.
//!
//! Holds sources and styled layers for a renderer to paint each frame.

use std::collections::HashMap;

use log::{info, warn};

use super::geojson::FeatureCollection;
use super::surface::{LayerSpec, RenderSurface};
use crate::protocol::Position;

/// Default map center (Astana).
pub const DEFAULT_CENTER: Position = Position {
    lon: 71.4491,
    lat: 51.1694,
};

pub const DEFAULT_ZOOM: f64 = 12.0;

pub const MIN_ZOOM: f64 = 2.0;
pub const MAX_ZOOM: f64 = 19.0;

/// Map viewport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub center: Position,
    pub zoom: f64,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            center: DEFAULT_CENTER,
            zoom: DEFAULT_ZOOM,
        }
    }
}

impl Camera {
    #[must_use]
    pub fn new(center: Position, zoom: f64) -> Self {
        Self {
            center,
            zoom: zoom.clamp(MIN_ZOOM, MAX_ZOOM),
        }
    }

    /// Zoom by `delta` levels, clamped to the supported range.
    pub fn zoom_by(&mut self, delta: f64) {
        self.zoom = (self.zoom + delta).clamp(MIN_ZOOM, MAX_ZOOM);
    }
}

/// In-memory render surface.
///
/// Starts not ready; the host calls [`MapScene::mark_ready`] once it can
/// draw. The revision counter changes whenever sources or layers do.
#[derive(Debug, Default)]
pub struct MapScene {
    camera: Camera,
    ready: bool,
    sources: HashMap<String, FeatureCollection>,
    layers: Vec<LayerSpec>,
    revision: u64,
}

impl MapScene {
    #[must_use]
    pub fn new(camera: Camera) -> Self {
        Self {
            camera,
            ..Self::default()
        }
    }

    pub fn mark_ready(&mut self) {
        if !self.ready {
            info!(
                "Map ready at {:.4}, {:.4} zoom {}",
                self.camera.center.lon, self.camera.center.lat, self.camera.zoom
            );
            self.ready = true;
        }
    }

    #[must_use]
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    #[must_use]
    pub fn source(&self, id: &str) -> Option<&FeatureCollection> {
        self.sources.get(id)
    }

    /// Layers in paint order.
    #[must_use]
    pub fn layers(&self) -> &[LayerSpec] {
        &self.layers
    }

    #[must_use]
    pub fn layer(&self, id: &str) -> Option<&LayerSpec> {
        self.layers.iter().find(|l| l.id == id)
    }

    /// Layers paired with their source data, in paint order.
    pub fn painted_layers(&self) -> impl Iterator<Item = (&LayerSpec, &FeatureCollection)> {
        self.layers
            .iter()
            .filter_map(|layer| Some((layer, self.sources.get(&layer.source)?)))
    }

    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

impl RenderSurface for MapScene {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn has_source(&self, id: &str) -> bool {
        self.sources.contains_key(id)
    }

    fn add_source(&mut self, id: &str, data: FeatureCollection) {
        if self.sources.contains_key(id) {
            warn!("Source {id} already exists, replacing its data");
        }
        self.sources.insert(id.to_string(), data);
        self.revision += 1;
    }

    fn set_data(&mut self, id: &str, data: FeatureCollection) {
        match self.sources.get_mut(id) {
            Some(source) => {
                *source = data;
                self.revision += 1;
            }
            None => warn!("set_data on unknown source {id}"),
        }
    }

    fn add_layer(&mut self, layer: LayerSpec) {
        if self.layer(&layer.id).is_some() {
            warn!("Layer {} already exists", layer.id);
            return;
        }
        if !self.sources.contains_key(&layer.source) {
            warn!("Layer {} references unknown source {}", layer.id, layer.source);
            return;
        }
        self.layers.push(layer);
        self.revision += 1;
    }
}
