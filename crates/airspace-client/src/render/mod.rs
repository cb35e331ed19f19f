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

//! Geospatial render surface.
//!
//! Converts airspace data into GeoJSON sources with data-driven styled
//! layers, and manages them idempotently on any [`RenderSurface`].

pub mod geojson;
mod hover;
mod scene;
pub mod style;
mod surface;

pub use geojson::{Coord, Feature, FeatureCollection, Geometry, Properties};
pub use hover::{Cursor, HoverController, Popup};
pub use scene::{Camera, MapScene, DEFAULT_CENTER, DEFAULT_ZOOM, MAX_ZOOM, MIN_ZOOM};
pub use style::{Color, Dash, Expression, FillPaint, FillStyle, LinePaint, LineStyle, SymbolPaint, SymbolStyle};
pub use surface::{
    drone_features, ensure_layer, Category, LayerKind, LayerSpec, LayerUpdate, RenderSurface, DRONES_LAYER,
    DRONES_SOURCE, DRONE_ICON, PATHS_LAYER, PATHS_SOURCE, ZONES_FILL_LAYER, ZONES_OUTLINE_LAYER, ZONES_SOURCE,
};
