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

use serde_json::Value;

use super::geojson::{Coord, Feature};

/// Pointer affordance over the map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Cursor {
    #[default]
    Default,
    Pointer,
}

/// Detail popup anchored at a drone symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct Popup {
    pub drone_id: String,
    pub coordinates: Coord,
    pub lines: Vec<String>,
}

impl Popup {
    /// Build a popup from a drone feature. `None` if it has no point geometry.
    #[must_use]
    pub fn for_drone(feature: &Feature) -> Option<Self> {
        let coordinates = feature.point()?;
        let drone_id = feature
            .property("id")
            .map(display_value)
            .unwrap_or_default();

        Some(Self {
            drone_id,
            coordinates,
            lines: vec![
                format!("Altitude: {}m", number_or_dash(feature.property("altitude"))),
                format!("Speed: {}m/s", number_or_dash(feature.property("speed"))),
                format!(
                    "Status: {}",
                    feature.property("status").map_or_else(|| "unknown".to_string(), display_value)
                ),
            ],
        })
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn number_or_dash(value: Option<&Value>) -> String {
    value
        .and_then(Value::as_f64)
        .map_or_else(|| "-".to_string(), |v| format!("{v:.0}"))
}

/// Hover state for the drone layer: at most one popup at a time.
#[derive(Debug, Default)]
pub struct HoverController {
    popup: Option<Popup>,
    cursor: Cursor,
}

impl HoverController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pointer entered a drone symbol. Replaces any open popup.
    pub fn enter(&mut self, feature: &Feature) {
        if let Some(popup) = Popup::for_drone(feature) {
            self.cursor = Cursor::Pointer;
            self.popup = Some(popup);
        }
    }

    /// Pointer left the drone layer.
    pub fn leave(&mut self) {
        self.popup = None;
        self.cursor = Cursor::Default;
    }

    #[must_use]
    pub fn popup(&self) -> Option<&Popup> {
        self.popup.as_ref()
    }

    #[must_use]
    pub fn cursor(&self) -> Cursor {
        self.cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::geojson::Geometry;
    use serde_json::json;

    fn drone(id: &str, lon: f64) -> Feature {
        let properties = json!({
            "id": id,
            "altitude": 120.4,
            "speed": 7,
            "status": "in_progress",
        })
        .as_object()
        .cloned()
        .unwrap();
        Feature::new(Geometry::Point { coordinates: Coord { lon, lat: 51.0 } }, properties)
    }

    #[test]
    fn test_enter_opens_popup() {
        let mut hover = HoverController::new();
        hover.enter(&drone("D1", 71.0));

        let popup = hover.popup().unwrap();
        assert_eq!(popup.drone_id, "D1");
        assert_eq!(popup.coordinates, Coord { lon: 71.0, lat: 51.0 });
        assert_eq!(popup.lines, vec!["Altitude: 120m", "Speed: 7m/s", "Status: in_progress"]);
        assert_eq!(hover.cursor(), Cursor::Pointer);
    }

    #[test]
    fn test_enter_again_replaces_popup() {
        let mut hover = HoverController::new();
        hover.enter(&drone("D1", 71.0));
        hover.enter(&drone("D2", 72.0));

        let popup = hover.popup().unwrap();
        assert_eq!(popup.drone_id, "D2");
        assert_eq!(popup.coordinates.lon, 72.0);
    }

    #[test]
    fn test_leave_resets() {
        let mut hover = HoverController::new();
        hover.enter(&drone("D1", 71.0));
        hover.leave();
        assert!(hover.popup().is_none());
        assert_eq!(hover.cursor(), Cursor::Default);
    }

    #[test]
    fn test_missing_fields() {
        let feature = Feature::new(
            Geometry::Point { coordinates: Coord { lon: 1.0, lat: 2.0 } },
            json!({"id": "D9", "altitude": null}).as_object().cloned().unwrap(),
        );
        let popup = Popup::for_drone(&feature).unwrap();
        assert_eq!(popup.lines, vec!["Altitude: -m", "Speed: -m/s", "Status: unknown"]);
    }
}
