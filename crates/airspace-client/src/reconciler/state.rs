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

//! Airspace state and its pure transition functions.
//!
//! [`AirspaceState`] is a value: every transition consumes the current state
//! and returns the next one, so snapshots handed out as `Arc<AirspaceState>`
//! are never mutated in place.

use std::collections::{HashMap, HashSet};
use std::ops::Index;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::protocol::{Position, TelemetryEvent, ViolationEvent};

/// Known state of one drone.
#[derive(Debug, Clone, PartialEq)]
pub struct DroneState {
    /// Stable drone identifier.
    pub id: String,
    /// Last known location.
    pub location: Option<Position>,
    /// Altitude in meters.
    pub altitude: Option<f64>,
    /// Ground speed in meters per second.
    pub speed: Option<f64>,
    /// Heading in degrees (0-360, north = 0).
    pub heading: Option<f64>,
    /// Flight status as reported by the server.
    pub status: Option<String>,
    /// Battery level in percent.
    pub battery_level: Option<f64>,
    /// Whether at least one violation references this drone.
    pub has_violation: bool,
    /// Time the last telemetry event for this drone was applied.
    pub last_seen: DateTime<Utc>,
}

impl DroneState {
    fn from_event(event: TelemetryEvent, has_violation: bool, received_at: DateTime<Utc>) -> Self {
        Self {
            id: event.drone_id,
            location: event.location,
            altitude: event.altitude,
            speed: event.speed,
            heading: event.heading,
            status: event.status,
            battery_level: event.battery_level,
            has_violation,
            last_seen: received_at,
        }
    }

    /// Overwrite every field the event carries; keep the rest.
    fn merge(&mut self, event: TelemetryEvent, received_at: DateTime<Utc>) {
        if event.location.is_some() {
            self.location = event.location;
        }
        if event.altitude.is_some() {
            self.altitude = event.altitude;
        }
        if event.speed.is_some() {
            self.speed = event.speed;
        }
        if event.heading.is_some() {
            self.heading = event.heading;
        }
        if event.status.is_some() {
            self.status = event.status;
        }
        if event.battery_level.is_some() {
            self.battery_level = event.battery_level;
        }
        self.last_seen = received_at;
    }

    /// Heading in degrees, 0 when never reported.
    #[must_use]
    pub fn heading_or_default(&self) -> f64 {
        self.heading.unwrap_or(0.0)
    }

    /// Status string, `unknown` when never reported.
    #[must_use]
    pub fn status_label(&self) -> &str {
        self.status.as_deref().unwrap_or("unknown")
    }
}

/// A recorded airspace-rule breach.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub drone_id: String,
    pub kind: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl Violation {
    /// Human readable category.
    #[must_use]
    pub fn kind_label(&self) -> &str {
        match self.kind.as_str() {
            "no_fly_zone" => "no-fly zone",
            "out_of_path" => "out of path",
            "altitude_violation" => "altitude",
            "unauthorized_flight" => "unauthorized flight",
            other => other,
        }
    }
}

impl From<ViolationEvent> for Violation {
    fn from(event: ViolationEvent) -> Self {
        Self {
            drone_id: event.drone_id,
            kind: event.kind,
            description: event.description,
            created_at: event.created_at,
        }
    }
}

const VIOLATION_CHUNK: usize = 64;

/// Append-only violation log.
///
/// Full chunks are shared between clones, so cloning copies at most one
/// partial chunk regardless of how long the log has grown.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViolationLog {
    sealed: Arc<Vec<Arc<[Violation]>>>,
    tail: Vec<Violation>,
}

impl ViolationLog {
    fn push(&mut self, violation: Violation) {
        self.tail.push(violation);
        if self.tail.len() == VIOLATION_CHUNK {
            let chunk: Arc<[Violation]> = std::mem::take(&mut self.tail).into();
            Arc::make_mut(&mut self.sealed).push(chunk);
        }
    }

    /// Number of recorded violations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sealed.len() * VIOLATION_CHUNK + self.tail.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Violation at `index` in arrival order.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Violation> {
        let chunk = index / VIOLATION_CHUNK;
        match self.sealed.get(chunk) {
            Some(sealed) => sealed.get(index % VIOLATION_CHUNK),
            None if chunk == self.sealed.len() => self.tail.get(index % VIOLATION_CHUNK),
            None => None,
        }
    }

    /// Violations in arrival order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Violation> {
        self.sealed
            .iter()
            .flat_map(|chunk| chunk.iter())
            .chain(self.tail.iter())
    }

    /// Violations from `start` on, in arrival order.
    pub fn iter_from(&self, start: usize) -> impl Iterator<Item = &Violation> {
        (start..self.len()).filter_map(move |i| self.get(i))
    }
}

impl Index<usize> for ViolationLog {
    type Output = Violation;

    fn index(&self, index: usize) -> &Violation {
        match self.get(index) {
            Some(violation) => violation,
            None => panic!("violation index {index} out of range for log of {}", self.len()),
        }
    }
}

/// Drones keyed by identifier plus the append-only violation log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AirspaceState {
    drones: HashMap<String, DroneState>,
    violations: ViolationLog,
    // Identifiers referenced by at least one violation
    flagged: HashSet<String>,
    session: u64,
}

impl AirspaceState {
    /// Create an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty state for the session after this one.
    #[must_use]
    pub fn next_session(&self) -> Self {
        Self {
            session: self.session + 1,
            ..Self::default()
        }
    }

    /// Session counter, bumped every time the state is rebuilt from scratch.
    #[must_use]
    pub fn session(&self) -> u64 {
        self.session
    }

    /// Apply a telemetry event.
    ///
    /// An unseen drone is inserted with its violation flag taken from the
    /// violation log; a known drone is merged field by field.
    #[must_use]
    pub fn apply_telemetry(mut self, event: TelemetryEvent, received_at: DateTime<Utc>) -> Self {
        let flagged = self.flagged.contains(&event.drone_id);

        match self.drones.get_mut(&event.drone_id) {
            Some(drone) => {
                drone.merge(event, received_at);
                drone.has_violation |= flagged;
            }
            None => {
                let drone = DroneState::from_event(event, flagged, received_at);
                self.drones.insert(drone.id.clone(), drone);
            }
        }

        self
    }

    /// Append a violation and flag its drone if present.
    ///
    /// Repeated identical violations are all kept.
    #[must_use]
    pub fn apply_violation(mut self, event: ViolationEvent) -> Self {
        if let Some(drone) = self.drones.get_mut(&event.drone_id) {
            drone.has_violation = true;
        }
        self.flagged.insert(event.drone_id.clone());
        self.violations.push(Violation::from(event));
        self
    }

    /// Drop drones whose last telemetry is at least `max_age` older than `now`.
    ///
    /// Violations are kept, so a returning drone is flagged again.
    #[must_use]
    pub fn expire_stale(mut self, now: DateTime<Utc>, max_age: Duration) -> (Self, Vec<String>) {
        let expired: Vec<String> = self
            .drones
            .values()
            .filter(|d| now - d.last_seen >= max_age)
            .map(|d| d.id.clone())
            .collect();

        for id in &expired {
            self.drones.remove(id);
        }

        (self, expired)
    }

    /// Get a drone by identifier.
    #[must_use]
    pub fn drone(&self, id: &str) -> Option<&DroneState> {
        self.drones.get(id)
    }

    /// All drones, in no particular order.
    pub fn drones(&self) -> impl Iterator<Item = &DroneState> {
        self.drones.values()
    }

    /// All drones sorted by identifier.
    #[must_use]
    pub fn drones_sorted(&self) -> Vec<&DroneState> {
        let mut drones: Vec<_> = self.drones.values().collect();
        drones.sort_by(|a, b| a.id.cmp(&b.id));
        drones
    }

    /// Number of known drones.
    #[must_use]
    pub fn drone_count(&self) -> usize {
        self.drones.len()
    }

    /// Every violation in arrival order.
    #[must_use]
    pub fn violations(&self) -> &ViolationLog {
        &self.violations
    }

    /// Violations referencing one drone, in arrival order.
    pub fn violations_for<'a>(&'a self, drone_id: &'a str) -> impl Iterator<Item = &'a Violation> + 'a {
        self.violations.iter().filter(move |v| v.drone_id == drone_id)
    }

    /// The `limit` most recent violations, newest first.
    pub fn recent_violations(&self, limit: usize) -> impl Iterator<Item = &Violation> {
        self.violations.iter().rev().take(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn telemetry_d1() -> TelemetryEvent {
        TelemetryEvent {
            drone_id: "D1".to_string(),
            location: Some(Position::new(71.0, 51.0)),
            altitude: Some(100.0),
            speed: Some(5.0),
            heading: None,
            status: Some("active".to_string()),
            battery_level: None,
        }
    }

    fn violation(drone_id: &str) -> ViolationEvent {
        ViolationEvent {
            drone_id: drone_id.to_string(),
            kind: "altitude".to_string(),
            description: "exceeded ceiling".to_string(),
            created_at: t(0),
        }
    }

    #[test]
    fn test_telemetry_then_violation() {
        let state = AirspaceState::new()
            .apply_telemetry(telemetry_d1(), t(0))
            .apply_violation(violation("D1"));

        let drone = state.drone("D1").unwrap();
        assert!(drone.has_violation);
        assert_eq!(state.violations().len(), 1);
    }

    #[test]
    fn test_violation_before_first_telemetry() {
        let state = AirspaceState::new().apply_violation(violation("D2"));
        assert!(state.drone("D2").is_none());
        assert_eq!(state.violations().len(), 1);

        let state = state.apply_telemetry(TelemetryEvent::new("D2"), t(1));
        assert!(state.drone("D2").unwrap().has_violation);
    }

    #[test]
    fn test_new_drone_without_violation() {
        let state = AirspaceState::new()
            .apply_violation(violation("OTHER"))
            .apply_telemetry(telemetry_d1(), t(0));
        assert!(!state.drone("D1").unwrap().has_violation);
    }

    #[test]
    fn test_violations_not_deduplicated() {
        let state = AirspaceState::new()
            .apply_telemetry(telemetry_d1(), t(0))
            .apply_violation(violation("D1"))
            .apply_violation(violation("D1"));

        assert_eq!(state.violations().len(), 2);
        assert_eq!(state.violations()[0], state.violations()[1]);
        assert_eq!(state.violations_for("D1").count(), 2);
    }

    #[test]
    fn test_merge_keeps_omitted_fields() {
        let update = TelemetryEvent {
            altitude: Some(120.0),
            heading: Some(45.0),
            ..TelemetryEvent::new("D1")
        };
        let state = AirspaceState::new()
            .apply_telemetry(telemetry_d1(), t(0))
            .apply_telemetry(update, t(5));

        let drone = state.drone("D1").unwrap();
        assert_eq!(drone.altitude, Some(120.0));
        assert_eq!(drone.heading, Some(45.0));
        assert_eq!(drone.location, Some(Position::new(71.0, 51.0)));
        assert_eq!(drone.speed, Some(5.0));
        assert_eq!(drone.status.as_deref(), Some("active"));
        assert_eq!(drone.last_seen, t(5));
    }

    #[test]
    fn test_merge_preserves_violation_flag() {
        let state = AirspaceState::new()
            .apply_telemetry(telemetry_d1(), t(0))
            .apply_violation(violation("D1"))
            .apply_telemetry(telemetry_d1(), t(1));
        assert!(state.drone("D1").unwrap().has_violation);
    }

    #[test]
    fn test_telemetry_idempotent() {
        let once = AirspaceState::new().apply_telemetry(telemetry_d1(), t(0));
        let twice = once.clone().apply_telemetry(telemetry_d1(), t(0));
        assert_eq!(once, twice);
        assert_eq!(twice.drone_count(), 1);
    }

    #[test]
    fn test_last_write_wins_over_sequence() {
        let events = vec![
            TelemetryEvent { altitude: Some(10.0), speed: Some(1.0), ..TelemetryEvent::new("D1") },
            TelemetryEvent { altitude: Some(20.0), status: Some("pending".into()), ..TelemetryEvent::new("D1") },
            TelemetryEvent { speed: Some(3.0), location: Some(Position::new(1.0, 2.0)), ..TelemetryEvent::new("D1") },
            TelemetryEvent { status: Some("approved".into()), ..TelemetryEvent::new("D1") },
            TelemetryEvent { altitude: Some(40.0), ..TelemetryEvent::new("D1") },
        ];

        let mut state = AirspaceState::new();
        for (i, event) in events.into_iter().enumerate() {
            state = state.apply_telemetry(event, t(i64::try_from(i).unwrap()));
        }

        let drone = state.drone("D1").unwrap();
        assert_eq!(drone.altitude, Some(40.0));
        assert_eq!(drone.speed, Some(3.0));
        assert_eq!(drone.status.as_deref(), Some("approved"));
        assert_eq!(drone.location, Some(Position::new(1.0, 2.0)));
        assert_eq!(drone.heading, None);
        assert!((drone.heading_or_default() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_expire_stale_keeps_violations() {
        let state = AirspaceState::new()
            .apply_telemetry(TelemetryEvent::new("OLD"), t(0))
            .apply_telemetry(TelemetryEvent::new("NEW"), t(100))
            .apply_violation(violation("OLD"));

        let (state, expired) = state.expire_stale(t(130), Duration::seconds(60));
        assert_eq!(expired, vec!["OLD".to_string()]);
        assert!(state.drone("OLD").is_none());
        assert!(state.drone("NEW").is_some());
        assert_eq!(state.violations().len(), 1);

        let state = state.apply_telemetry(TelemetryEvent::new("OLD"), t(140));
        assert!(state.drone("OLD").unwrap().has_violation);
    }

    #[test]
    fn test_violation_log_shares_sealed_chunks() {
        let mut state = AirspaceState::new();
        for i in 0..150 {
            state = state.apply_violation(ViolationEvent {
                description: format!("#{i}"),
                ..violation("D1")
            });
        }
        let snapshot = state.clone();
        assert!(Arc::ptr_eq(&snapshot.violations.sealed, &state.violations.sealed));

        let state = state.apply_violation(violation("D2"));
        assert!(Arc::ptr_eq(&snapshot.violations.sealed, &state.violations.sealed));
        assert_eq!(snapshot.violations().len(), 150);
        assert_eq!(state.violations().len(), 151);
        assert_eq!(state.violations()[64].description, "#64");
        assert_eq!(state.violations()[150].drone_id, "D2");
        assert!(state.violations().get(151).is_none());

        let descriptions: Vec<_> = state.violations().iter_from(148).map(|v| v.description.as_str()).collect();
        assert_eq!(descriptions, vec!["#148", "#149", "exceeded ceiling"]);
        assert_eq!(state.recent_violations(2).nth(1).map(|v| v.description.as_str()), Some("#149"));
        assert_eq!(state.violations().iter().count(), 151);
    }

    #[test]
    fn test_next_session_starts_empty() {
        let state = AirspaceState::new()
            .apply_telemetry(telemetry_d1(), t(0))
            .apply_violation(violation("D1"));
        let next = state.next_session();

        assert_eq!(next.session(), state.session() + 1);
        assert_eq!(next.drone_count(), 0);
        assert!(next.violations().is_empty());

        let next = next.apply_telemetry(telemetry_d1(), t(1));
        assert!(!next.drone("D1").unwrap().has_violation);
    }

    #[test]
    fn test_queries() {
        let state = AirspaceState::new()
            .apply_telemetry(TelemetryEvent::new("B"), t(0))
            .apply_telemetry(TelemetryEvent::new("A"), t(0))
            .apply_violation(ViolationEvent { kind: "no_fly_zone".into(), ..violation("A") })
            .apply_violation(violation("B"));

        let ids: Vec<_> = state.drones_sorted().iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);

        let recent: Vec<_> = state.recent_violations(1).map(|v| v.drone_id.as_str()).collect();
        assert_eq!(recent, vec!["B"]);
        assert_eq!(state.violations()[0].kind_label(), "no-fly zone");
        assert_eq!(state.drone("A").unwrap().status_label(), "unknown");
    }
}
