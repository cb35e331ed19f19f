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

use log::debug;
use serde_json::Value;

use super::geojson::{Coord, Feature, FeatureCollection, Geometry, Properties};
use super::style::{palette, Dash, Expression, FillPaint, LinePaint, SymbolPaint};
use crate::reconciler::AirspaceState;

pub const ZONES_SOURCE: &str = "no-fly-zones";
pub const ZONES_FILL_LAYER: &str = "no-fly-zones-fill";
pub const ZONES_OUTLINE_LAYER: &str = "no-fly-zones-outline";
pub const PATHS_SOURCE: &str = "flight-paths";
pub const PATHS_LAYER: &str = "flight-paths-line";
pub const DRONES_SOURCE: &str = "drones";
pub const DRONES_LAYER: &str = "drones-symbol";

/// Icon used for drone symbols.
pub const DRONE_ICON: &str = "drone";

/// Target of layer management.
///
/// Implemented by [`MapScene`](super::MapScene); tests use a fake.
pub trait RenderSurface {
    /// Whether the surface accepts sources and layers yet.
    fn is_ready(&self) -> bool {
        true
    }

    fn has_source(&self, id: &str) -> bool;

    fn add_source(&mut self, id: &str, data: FeatureCollection);

    /// Replace the data of an existing source.
    fn set_data(&mut self, id: &str, data: FeatureCollection);

    fn add_layer(&mut self, layer: LayerSpec);
}

/// How a layer draws its source.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerKind {
    Fill(FillPaint),
    Line(LinePaint),
    Symbol(SymbolPaint),
}

/// A styled layer bound to a source.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSpec {
    pub id: String,
    pub source: String,
    pub kind: LayerKind,
}

/// The three kinds of map data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// No-fly zone polygons.
    Zones,
    /// Flight request paths.
    Paths,
    /// Live drone positions.
    Drones,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Zones, Category::Paths, Category::Drones];

    #[must_use]
    pub fn source_id(self) -> &'static str {
        match self {
            Self::Zones => ZONES_SOURCE,
            Self::Paths => PATHS_SOURCE,
            Self::Drones => DRONES_SOURCE,
        }
    }

    /// Layers created alongside the source, bottom to top.
    #[must_use]
    pub fn layers(self) -> Vec<LayerSpec> {
        let source = self.source_id().to_string();
        match self {
            Self::Zones => vec![
                LayerSpec {
                    id: ZONES_FILL_LAYER.to_string(),
                    source: source.clone(),
                    kind: LayerKind::Fill(zone_fill()),
                },
                LayerSpec {
                    id: ZONES_OUTLINE_LAYER.to_string(),
                    source,
                    kind: LayerKind::Line(zone_outline()),
                },
            ],
            Self::Paths => vec![LayerSpec {
                id: PATHS_LAYER.to_string(),
                source,
                kind: LayerKind::Line(path_line()),
            }],
            Self::Drones => vec![LayerSpec {
                id: DRONES_LAYER.to_string(),
                source,
                kind: LayerKind::Symbol(drone_symbol()),
            }],
        }
    }
}

/// Outcome of [`ensure_layer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerUpdate {
    /// Surface not ready; nothing was done.
    NotReady,
    /// Source and layers were created.
    Created,
    /// Existing source data was replaced.
    Updated,
}

/// Create the category's source and layers, or replace the source data if
/// they already exist. Layers are never recreated.
pub fn ensure_layer<S: RenderSurface + ?Sized>(
    surface: &mut S,
    category: Category,
    snapshot: FeatureCollection,
) -> LayerUpdate {
    if !surface.is_ready() {
        debug!("Surface not ready, skipping {category:?} update");
        return LayerUpdate::NotReady;
    }

    let source = category.source_id();
    if surface.has_source(source) {
        surface.set_data(source, snapshot);
        return LayerUpdate::Updated;
    }

    debug!("Creating source {source} with {} features", snapshot.len());
    surface.add_source(source, snapshot);
    for layer in category.layers() {
        surface.add_layer(layer);
    }
    LayerUpdate::Created
}

fn zone_fill() -> FillPaint {
    FillPaint {
        color: Expression::Literal(palette::DANGER),
        opacity: 0.3,
    }
}

fn zone_outline() -> LinePaint {
    LinePaint {
        color: Expression::Literal(palette::DANGER),
        width: 2.0,
        dash: Expression::Literal(Dash::SOLID),
    }
}

fn path_line() -> LinePaint {
    LinePaint {
        color: Expression::Match {
            property: "status".to_string(),
            arms: vec![
                ("approved".to_string(), palette::SUCCESS),
                ("pending".to_string(), palette::WARNING),
                ("rejected".to_string(), palette::DANGER),
            ],
            fallback: palette::PRIMARY,
        },
        width: 3.0,
        dash: Expression::Match {
            property: "status".to_string(),
            arms: vec![("pending".to_string(), Dash::DASHED)],
            fallback: Dash::SOLID,
        },
    }
}

fn drone_symbol() -> SymbolPaint {
    SymbolPaint {
        icon: DRONE_ICON.to_string(),
        icon_size: 1.5,
        icon_color: Expression::Case {
            property: "hasViolation".to_string(),
            when_true: palette::DANGER,
            when_false: palette::PRIMARY,
        },
        icon_rotation: Expression::Get {
            property: "heading".to_string(),
            default: 0.0,
        },
        allow_overlap: true,
        label: Expression::Get {
            property: "id".to_string(),
            default: String::new(),
        },
        label_offset: 1.5,
        text_size: 12.0,
        text_color: palette::BLACK,
        halo_color: palette::WHITE,
        halo_width: 1.0,
    }
}

/// Point features for every located drone, sorted by identifier.
#[must_use]
pub fn drone_features(state: &AirspaceState) -> FeatureCollection {
    state
        .drones_sorted()
        .into_iter()
        .filter_map(|drone| {
            let location = drone.location?;

            let mut properties = Properties::new();
            properties.insert("id".into(), Value::from(drone.id.as_str()));
            properties.insert("altitude".into(), Value::from(drone.altitude));
            properties.insert("speed".into(), Value::from(drone.speed));
            properties.insert("heading".into(), Value::from(drone.heading_or_default()));
            properties.insert("status".into(), Value::from(drone.status_label()));
            properties.insert("hasViolation".into(), Value::Bool(drone.has_violation));

            let mut feature = Feature::new(
                Geometry::Point {
                    coordinates: Coord::from(location),
                },
                properties,
            );
            feature.id = Some(Value::from(drone.id.as_str()));
            Some(feature)
        })
        .collect()
}


#[cfg(test)]
mod tests {
    use super::testing::FakeSurface;
    use super::*;
    use crate::protocol::{Position, TelemetryEvent, ViolationEvent};
    use crate::render::style::Color;
    use chrono::Utc;
    use serde_json::json;

    fn path(status: &str) -> Feature {
        let properties = json!({ "status": status }).as_object().cloned().unwrap();
        Feature::new(
            Geometry::LineString {
                coordinates: vec![Coord { lon: 71.0, lat: 51.0 }, Coord { lon: 71.1, lat: 51.1 }],
            },
            properties,
        )
    }

    fn line_paint(surface: &FakeSurface, id: &str) -> LinePaint {
        match &surface.layers.iter().find(|l| l.id == id).unwrap().kind {
            LayerKind::Line(paint) => paint.clone(),
            other => panic!("expected line layer, got {other:?}"),
        }
    }

    fn symbol_paint(surface: &FakeSurface) -> SymbolPaint {
        match &surface.layers.iter().find(|l| l.id == DRONES_LAYER).unwrap().kind {
            LayerKind::Symbol(paint) => paint.clone(),
            other => panic!("expected symbol layer, got {other:?}"),
        }
    }

    #[test]
    fn test_not_ready_is_noop() {
        let mut surface = FakeSurface { not_ready: true, ..Default::default() };
        let result = ensure_layer(&mut surface, Category::Zones, FeatureCollection::default());

        assert_eq!(result, LayerUpdate::NotReady);
        assert!(surface.sources.is_empty());
        assert!(surface.layers.is_empty());
    }

    #[test]
    fn test_ensure_layer_is_idempotent() {
        let mut surface = FakeSurface::default();

        let first = ensure_layer(&mut surface, Category::Paths, FeatureCollection::new(vec![path("approved")]));
        assert_eq!(first, LayerUpdate::Created);

        for _ in 0..4 {
            let next = ensure_layer(&mut surface, Category::Paths, FeatureCollection::new(vec![path("pending")]));
            assert_eq!(next, LayerUpdate::Updated);
        }
        let last = FeatureCollection::new(vec![path("rejected"), path("approved")]);
        ensure_layer(&mut surface, Category::Paths, last.clone());

        assert_eq!(surface.add_source_calls, 1);
        assert_eq!(surface.set_data_calls, 5);
        assert_eq!(surface.layers.len(), 1);
        assert_eq!(surface.sources[PATHS_SOURCE], last);
    }

    #[test]
    fn test_zone_layers() {
        let mut surface = FakeSurface::default();
        ensure_layer(&mut surface, Category::Zones, FeatureCollection::default());
        ensure_layer(&mut surface, Category::Zones, FeatureCollection::default());

        let ids: Vec<_> = surface.layers.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec![ZONES_FILL_LAYER, ZONES_OUTLINE_LAYER]);

        let LayerKind::Fill(fill) = &surface.layers[0].kind else {
            panic!("expected fill layer");
        };
        let style = fill.resolve(&Properties::new());
        assert_eq!(style.color, palette::DANGER);
        assert!((style.opacity - 0.3).abs() < f32::EPSILON);

        let outline = line_paint(&surface, ZONES_OUTLINE_LAYER).resolve(&Properties::new());
        assert_eq!(outline.color, palette::DANGER);
        assert!((outline.width - 2.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_path_styles_by_status() {
        let mut surface = FakeSurface::default();
        ensure_layer(&mut surface, Category::Paths, FeatureCollection::default());
        let paint = line_paint(&surface, PATHS_LAYER);

        let pending = paint.resolve(path("pending").properties());
        assert_eq!(pending.color, Color::from_hex("#FFC107").unwrap());
        assert_eq!(pending.dash, Dash::DASHED);

        let unknown = paint.resolve(path("unknown-value").properties());
        assert_eq!(unknown.color, Color::from_hex("#0056C7").unwrap());
        assert!(unknown.dash.is_solid());

        let approved = paint.resolve(path("approved").properties());
        assert_eq!(approved.color, palette::SUCCESS);
        assert!(approved.dash.is_solid());

        let rejected = paint.resolve(path("rejected").properties());
        assert_eq!(rejected.color, palette::DANGER);
        assert!((rejected.width - 3.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_drone_symbols() {
        let now = Utc::now();
        let state = AirspaceState::new()
            .apply_telemetry(
                TelemetryEvent {
                    location: Some(Position::new(71.4, 51.1)),
                    heading: Some(90.0),
                    altitude: Some(100.0),
                    ..TelemetryEvent::new("D2")
                },
                now,
            )
            .apply_telemetry(
                TelemetryEvent {
                    location: Some(Position::new(71.5, 51.2)),
                    ..TelemetryEvent::new("D1")
                },
                now,
            )
            .apply_telemetry(TelemetryEvent::new("NOWHERE"), now)
            .apply_violation(ViolationEvent {
                drone_id: "D2".into(),
                kind: "no_fly_zone".into(),
                description: "entered zone".into(),
                created_at: now,
            });

        let features = drone_features(&state);
        let ids: Vec<_> = features.features.iter().map(|f| f.property("id").unwrap().clone()).collect();
        assert_eq!(ids, vec![json!("D1"), json!("D2")]);

        let mut surface = FakeSurface::default();
        ensure_layer(&mut surface, Category::Drones, features.clone());
        let paint = symbol_paint(&surface);

        let d1 = paint.resolve(features.features[0].properties());
        assert_eq!(d1.icon_color, palette::PRIMARY);
        assert!(d1.rotation_degrees.abs() < f64::EPSILON);
        assert_eq!(d1.label, "D1");

        let d2 = paint.resolve(features.features[1].properties());
        assert_eq!(d2.icon_color, palette::DANGER);
        assert!((d2.rotation_degrees - 90.0).abs() < f64::EPSILON);
        assert!((d2.icon_size - 1.5).abs() < f32::EPSILON);
        assert_eq!(features.features[1].property("altitude"), Some(&json!(100.0)));
        assert_eq!(features.features[0].property("altitude"), Some(&Value::Null));
        assert_eq!(features.features[0].property("status"), Some(&json!("unknown")));
    }
}
