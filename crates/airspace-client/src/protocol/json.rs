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

//! JSON frame parser.
//!
//! Frame format:
//! ```text
//! {"type": "telemetry", "data": {"drone_id": "D1", "location": [71.0, 51.0], "altitude": 100, ...}}
//! {"type": "violation", "data": {"drone_id": "D1", "type": "altitude_violation", "description": "...", "created_at": "..."}}
//! ```
//!
//! `location` is accepted either as a `[lon, lat]` pair or as a GeoJSON
//! point. Unknown frame types (including `pong`) produce no message.

use chrono::{DateTime, NaiveDateTime, Utc};
use log::debug;
use serde::Deserialize;
use serde_json::Value;

use super::{ParseError, Position, Protocol, StreamEvent, TelemetryEvent, ViolationEvent};

const DEFAULT_VIOLATION_KIND: &str = "other";

/// Parser for JSON text frames from the telemetry stream.
#[derive(Debug, Default)]
pub struct JsonFrameParser;

impl JsonFrameParser {
    /// Create a new JSON frame parser.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Protocol for JsonFrameParser {
    type Message = StreamEvent;
    type Error = ParseError;

    fn parse(&mut self, input: &[u8]) -> Result<Option<StreamEvent>, ParseError> {
        let text = std::str::from_utf8(input)
            .map_err(|e| ParseError::InvalidFormat(format!("invalid UTF-8: {e}")))?;

        parse_frame(text, Utc::now())
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: Option<String>,
    drone_id: Option<String>,
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireLocation {
    Pair([f64; 2]),
    Point { coordinates: [f64; 2] },
}

impl From<WireLocation> for Position {
    fn from(location: WireLocation) -> Self {
        let [lon, lat] = match location {
            WireLocation::Pair(coordinates) | WireLocation::Point { coordinates } => coordinates,
        };
        Position::new(lon, lat)
    }
}

#[derive(Debug, Deserialize)]
struct TelemetryData {
    drone_id: Option<String>,
    location: Option<WireLocation>,
    altitude: Option<f64>,
    speed: Option<f64>,
    heading: Option<f64>,
    status: Option<String>,
    battery_level: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ViolationData {
    drone_id: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    description: Option<String>,
    created_at: Option<String>,
}

/// Parse a single text frame, using `received_at` when the server omits a timestamp.
fn parse_frame(text: &str, received_at: DateTime<Utc>) -> Result<Option<StreamEvent>, ParseError> {
    let envelope: Envelope =
        serde_json::from_str(text).map_err(|e| ParseError::InvalidFormat(e.to_string()))?;

    let kind = envelope.kind.ok_or(ParseError::MissingField("type"))?;

    match kind.as_str() {
        "telemetry" => {
            let data: TelemetryData = decode_data(envelope.data, "telemetry")?;
            let drone_id = non_empty(data.drone_id)
                .or_else(|| non_empty(envelope.drone_id))
                .ok_or(ParseError::MissingField("drone_id"))?;

            Ok(Some(StreamEvent::Telemetry(TelemetryEvent {
                drone_id,
                location: data.location.map(Position::from),
                altitude: data.altitude,
                speed: data.speed,
                heading: data.heading,
                status: data.status,
                battery_level: data.battery_level,
            })))
        }
        "violation" => {
            let data: ViolationData = decode_data(envelope.data, "violation")?;
            let drone_id = non_empty(data.drone_id)
                .or_else(|| non_empty(envelope.drone_id))
                .ok_or(ParseError::MissingField("drone_id"))?;

            let created_at = data
                .created_at
                .as_deref()
                .and_then(parse_timestamp)
                .unwrap_or(received_at);

            Ok(Some(StreamEvent::Violation(ViolationEvent {
                drone_id,
                kind: non_empty(data.kind).unwrap_or_else(|| DEFAULT_VIOLATION_KIND.to_string()),
                description: data.description.unwrap_or_default(),
                created_at,
            })))
        }
        other => {
            debug!("Ignoring stream frame of type '{other}'");
            Ok(None)
        }
    }
}

fn decode_data<T: serde::de::DeserializeOwned>(
    data: Option<Value>,
    field: &'static str,
) -> Result<T, ParseError> {
    let data = data.ok_or(ParseError::MissingField("data"))?;
    T::deserialize(&data).map_err(|e| ParseError::InvalidValue {
        field,
        value: format!("{data} ({e})"),
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Parse an RFC 3339 timestamp, or a naive ISO 8601 one taken as UTC.
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
