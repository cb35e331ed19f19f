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

//! Drone state reconciliation.
//!
//! The [`Reconciler`] owns the current [`AirspaceState`], applies stream
//! events to it strictly in arrival order, hands out immutable snapshots and
//! emits change events. Every reconnect starts a new session: the state is
//! rebuilt from scratch once the stream is open again.

mod state;

pub use state::{AirspaceState, DroneState, Violation, ViolationLog};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::broadcast;

use crate::protocol::{StreamEvent, TelemetryEvent, ViolationEvent};
use crate::stream::{ConnectionState, StreamHandler};

/// Events emitted by the reconciler when the airspace state changes.
#[derive(Debug, Clone, PartialEq)]
pub enum AirspaceEvent {
    /// A drone was seen for the first time.
    DroneAdded(String),
    /// A known drone received telemetry.
    DroneUpdated(String),
    /// A violation was recorded.
    ViolationRecorded(Violation),
    /// A drone was dropped after its telemetry went stale.
    DroneExpired(String),
    /// All state was discarded and a new session started.
    SessionReset(u64),
}

/// Configuration for the reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Drop drones without telemetry for this long. `None` keeps them for
    /// the whole session.
    pub drone_timeout: Option<Duration>,
    /// Broadcast channel capacity for events.
    pub event_channel_capacity: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            drone_timeout: None,
            event_channel_capacity: 256,
        }
    }
}

/// Stateful owner of the airspace model.
pub struct Reconciler {
    state: Arc<AirspaceState>,
    drone_timeout: Option<Duration>,
    connection_state: ConnectionState,
    // Whether a connection has been open before in this reconciler's life
    opened_before: bool,
    event_tx: broadcast::Sender<AirspaceEvent>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("drone_count", &self.state.drone_count())
            .field("violation_count", &self.state.violations().len())
            .field("connection_state", &self.connection_state)
            .finish_non_exhaustive()
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(ReconcilerConfig::default())
    }
}

impl Reconciler {
    /// Create a new reconciler with the given configuration.
    #[must_use]
    pub fn new(config: ReconcilerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));

        Self {
            state: Arc::new(AirspaceState::new()),
            drone_timeout: config.drone_timeout,
            connection_state: ConnectionState::Connecting,
            opened_before: false,
            event_tx,
        }
    }

    /// Apply one stream event.
    pub fn apply(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Telemetry(event) => self.apply_telemetry(event),
            StreamEvent::Violation(event) => self.apply_violation(event),
        }
    }

    /// Apply a telemetry event.
    pub fn apply_telemetry(&mut self, event: TelemetryEvent) {
        let id = event.drone_id.clone();
        let is_new = self.state.drone(&id).is_none();

        self.transition(|state| state.apply_telemetry(event, Utc::now()));

        if is_new {
            info!("Tracking new drone {id}");
            let _ = self.event_tx.send(AirspaceEvent::DroneAdded(id));
        } else {
            let _ = self.event_tx.send(AirspaceEvent::DroneUpdated(id));
        }
    }

    /// Apply a violation event.
    pub fn apply_violation(&mut self, event: ViolationEvent) {
        warn!(
            "Violation for drone {}: {} ({})",
            event.drone_id, event.kind, event.description
        );
        let violation = Violation::from(event.clone());

        self.transition(|state| state.apply_violation(event));

        let _ = self.event_tx.send(AirspaceEvent::ViolationRecorded(violation));
    }

    /// Remove drones whose telemetry is older than the configured timeout.
    ///
    /// Does nothing when no timeout is configured. Returns the number of
    /// drones removed.
    pub fn expire_stale(&mut self) -> usize {
        let Some(timeout) = self.drone_timeout else {
            return 0;
        };
        let Ok(max_age) = chrono::Duration::from_std(timeout) else {
            return 0;
        };
        if self.state.drone_count() == 0 {
            return 0;
        }

        let mut expired = Vec::new();
        self.transition(|state| {
            let (next, removed) = state.expire_stale(Utc::now(), max_age);
            expired = removed;
            next
        });

        let count = expired.len();
        for id in expired {
            info!("Drone {id} expired after {}s without telemetry", timeout.as_secs());
            let _ = self.event_tx.send(AirspaceEvent::DroneExpired(id));
        }
        count
    }

    /// Discard all state and start a fresh session.
    pub fn reset(&mut self) {
        let next = self.state.next_session();
        info!("Resetting airspace state (session {})", next.session());
        let _ = self.event_tx.send(AirspaceEvent::SessionReset(next.session()));
        self.state = Arc::new(next);
    }

    /// Immutable snapshot of the current state.
    #[must_use]
    pub fn snapshot(&self) -> Arc<AirspaceState> {
        Arc::clone(&self.state)
    }

    /// Last connection state reported by the stream.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    /// Subscribe to state change events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AirspaceEvent> {
        self.event_tx.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<AirspaceEvent> {
        self.event_tx.clone()
    }

    // Snapshots held elsewhere keep the old value; the state is cloned only then.
    fn transition(&mut self, f: impl FnOnce(AirspaceState) -> AirspaceState) {
        let current = std::mem::take(&mut self.state);
        self.state = Arc::new(f(Arc::unwrap_or_clone(current)));
    }
}

impl StreamHandler for Reconciler {
    fn on_event(&mut self, event: StreamEvent) {
        self.apply(event);
    }

    fn on_status_change(&mut self, state: ConnectionState) {
        debug!("Stream status: {state:?}");
        if state == ConnectionState::Open {
            if self.opened_before {
                self.reset();
            }
            self.opened_before = true;
        }
        self.connection_state = state;
    }
}
