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

//! Minimal GeoJSON model for map sources.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::protocol::Position;

/// Feature properties.
pub type Properties = Map<String, Value>;

/// A `[lon, lat]` coordinate; extra ordinates (altitude) are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct Coord {
    pub lon: f64,
    pub lat: f64,
}

impl TryFrom<Vec<f64>> for Coord {
    type Error = String;

    fn try_from(values: Vec<f64>) -> Result<Self, Self::Error> {
        match values.as_slice() {
            [lon, lat, ..] => Ok(Self { lon: *lon, lat: *lat }),
            _ => Err(format!("coordinate needs at least 2 values, got {}", values.len())),
        }
    }
}

impl From<Coord> for Vec<f64> {
    fn from(coord: Coord) -> Self {
        vec![coord.lon, coord.lat]
    }
}

impl From<Position> for Coord {
    fn from(position: Position) -> Self {
        Self {
            lon: position.lon,
            lat: position.lat,
        }
    }
}

impl From<Coord> for Position {
    fn from(coord: Coord) -> Self {
        Position::new(coord.lon, coord.lat)
    }
}

/// GeoJSON geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: Coord },
    MultiPoint { coordinates: Vec<Coord> },
    LineString { coordinates: Vec<Coord> },
    MultiLineString { coordinates: Vec<Vec<Coord>> },
    Polygon { coordinates: Vec<Vec<Coord>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Coord>>> },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
enum FeatureTag {
    #[default]
    Feature,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
enum FeatureCollectionTag {
    #[default]
    FeatureCollection,
}

/// GeoJSON feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type", default)]
    tag: FeatureTag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub geometry: Option<Geometry>,
    #[serde(default)]
    pub properties: Option<Properties>,
}

impl Feature {
    /// Create a feature from a geometry and its properties.
    #[must_use]
    pub fn new(geometry: Geometry, properties: Properties) -> Self {
        Self {
            tag: FeatureTag::Feature,
            id: None,
            geometry: Some(geometry),
            properties: Some(properties),
        }
    }

    /// Look up a property.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.as_ref()?.get(name)
    }

    /// Properties, empty when absent.
    #[must_use]
    pub fn properties(&self) -> &Properties {
        static EMPTY: std::sync::OnceLock<Properties> = std::sync::OnceLock::new();
        self.properties
            .as_ref()
            .unwrap_or_else(|| EMPTY.get_or_init(Properties::new))
    }

    /// Coordinate of a point feature.
    #[must_use]
    pub fn point(&self) -> Option<Coord> {
        match self.geometry {
            Some(Geometry::Point { coordinates }) => Some(coordinates),
            _ => None,
        }
    }
}

/// GeoJSON feature collection; the unit of data held by a map source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type", default)]
    tag: FeatureCollectionTag,
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    #[must_use]
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            tag: FeatureCollectionTag::FeatureCollection,
            features,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

impl FromIterator<Feature> for FeatureCollection {
    fn from_iter<I: IntoIterator<Item = Feature>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_feature_collection() {
        let json = r#"{
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "geometry": {"type": "Polygon", "coordinates": [[[71.0, 51.0], [71.1, 51.0], [71.1, 51.1], [71.0, 51.0]]]}, "properties": {"name": "Airport"}},
                {"type": "Feature", "geometry": {"type": "LineString", "coordinates": [[71.0, 51.0, 120.0], [71.2, 51.2, 120.0]]}, "properties": null}
            ]
        }"#;

        let collection: FeatureCollection = serde_json::from_str(json).unwrap();
        assert_eq!(collection.len(), 2);
        assert_eq!(collection.features[0].property("name").unwrap(), "Airport");
        assert!(collection.features[1].properties().is_empty());
        assert!(matches!(
            &collection.features[1].geometry,
            Some(Geometry::LineString { coordinates }) if coordinates[1] == Coord { lon: 71.2, lat: 51.2 }
        ));
    }

    #[test]
    fn test_invalid_coordinate() {
        let result: Result<Geometry, _> =
            serde_json::from_str(r#"{"type": "Point", "coordinates": [71.0]}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_serialize_point_feature() {
        let mut properties = Properties::new();
        properties.insert("id".into(), Value::from("D1"));
        let feature = Feature::new(
            Geometry::Point { coordinates: Coord { lon: 71.0, lat: 51.0 } },
            properties,
        );

        let value = serde_json::to_value(FeatureCollection::new(vec![feature])).unwrap();
        assert_eq!(value["type"], "FeatureCollection");
        assert_eq!(value["features"][0]["type"], "Feature");
        assert_eq!(value["features"][0]["geometry"]["type"], "Point");
        assert_eq!(value["features"][0]["geometry"]["coordinates"][0], 71.0);
    }
}
