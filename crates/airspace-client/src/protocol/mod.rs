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

//! Protocol layer for the telemetry stream.
//!
//! Incoming JSON text frames are decoded into [`StreamEvent`]s, the typed
//! domain events consumed by the reconciler. The transport never leaks into
//! this module, so synthetic events can be built directly in tests.

mod json;

pub use json::JsonFrameParser;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during frame parsing.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid frame format: {0}")]
    InvalidFormat(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid value for field '{field}': {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// WGS84 position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub lon: f64,
    pub lat: f64,
}

impl Position {
    #[must_use]
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    /// Coordinates in GeoJSON order (`[lon, lat]`).
    #[must_use]
    pub fn coordinates(&self) -> [f64; 2] {
        [self.lon, self.lat]
    }
}

/// A position/status update for one drone.
///
/// Every field except the identifier is optional: absent fields leave the
/// previously known value untouched when merged into the drone state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TelemetryEvent {
    /// Stable drone identifier.
    pub drone_id: String,
    /// Current location.
    pub location: Option<Position>,
    /// Altitude in meters.
    pub altitude: Option<f64>,
    /// Ground speed in meters per second.
    pub speed: Option<f64>,
    /// Heading in degrees (0-360, north = 0).
    pub heading: Option<f64>,
    /// Flight status (`active`, `approved`, `pending`, ...).
    pub status: Option<String>,
    /// Battery level in percent.
    pub battery_level: Option<f64>,
}

impl TelemetryEvent {
    /// Create an event carrying only the drone identifier.
    #[must_use]
    pub fn new(drone_id: impl Into<String>) -> Self {
        Self {
            drone_id: drone_id.into(),
            ..Default::default()
        }
    }
}

/// An airspace-rule breach attributed to a drone.
#[derive(Debug, Clone, PartialEq)]
pub struct ViolationEvent {
    /// Identifier of the offending drone (may not be known yet).
    pub drone_id: String,
    /// Violation category (`no_fly_zone`, `altitude_violation`, ...).
    pub kind: String,
    /// Free text description.
    pub description: String,
    /// Server-assigned creation time.
    pub created_at: DateTime<Utc>,
}

/// Typed domain event decoded from the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Telemetry(TelemetryEvent),
    Violation(ViolationEvent),
}

impl StreamEvent {
    /// Get the drone identifier from any event variant.
    #[must_use]
    pub fn drone_id(&self) -> &str {
        match self {
            Self::Telemetry(event) => &event.drone_id,
            Self::Violation(event) => &event.drone_id,
        }
    }
}

/// Messages sent from the client to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMessage {
    /// Subscription intent, sent once per opened connection.
    Subscribe,
    /// Keep-alive; answered by the server with a `pong` frame.
    Ping,
}

impl ClientMessage {
    /// Encode as a JSON text frame.
    #[must_use]
    pub fn to_text(self) -> String {
        let value = match self {
            Self::Subscribe => serde_json::json!({ "action": "subscribe" }),
            Self::Ping => serde_json::json!({ "command": "ping" }),
        };
        value.to_string()
    }
}

/// Trait for frame parsers.
pub trait Protocol {
    /// The message type produced by this parser.
    type Message;
    /// The error type for parsing failures.
    type Error;

    /// Parse input bytes into a message.
    ///
    /// Returns `Ok(Some(message))` if parsing succeeded,
    /// `Ok(None)` if the input is valid but doesn't produce a message,
    /// or `Err(error)` if parsing failed.
    fn parse(&mut self, input: &[u8]) -> Result<Option<Self::Message>, Self::Error>;
}
