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

//! Real-time airspace state engine.
//!
//! Receives drone telemetry and violation events over a WebSocket stream,
//! reconciles them into an immutable airspace snapshot, and keeps map layers
//! for that snapshot up to date. The layers can be used independently or
//! composed together:
//!
//! - **Protocol layer**: JSON stream frames decoded into typed events
//! - **Stream layer**: duplex connection with subscribe-on-open and
//!   fixed-interval reconnection
//! - **Reconciler layer**: drone state merge and violation correlation
//! - **Render layer**: GeoJSON sources with data-driven styled layers
//!
//! # Quick Start
//!
//! Use the [`Client`] type for full-stack operation:
//!
//! ```no_run
//! use airspace_client::{Client, ClientConfig, ConnectionConfig};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let client = Client::connect_websocket(ClientConfig {
//!         connection: ConnectionConfig {
//!             url: "ws://localhost:8000/ws/telemetry".to_string(),
//!             token: Some("secret".to_string()),
//!             ..Default::default()
//!         },
//!         ..Default::default()
//!     });
//!
//!     let mut snapshots = client.watch_snapshots();
//!     while snapshots.changed().await.is_ok() {
//!         let state = snapshots.borrow_and_update().clone();
//!         for drone in state.drones_sorted() {
//!             println!("{}: {:?}", drone.id, drone.location);
//!         }
//!     }
//! }
//! ```
//!
//! # Using Individual Layers
//!
//! ## Protocol Layer Only
//!
//! ```
//! use airspace_client::protocol::{JsonFrameParser, Protocol, StreamEvent};
//!
//! let mut parser = JsonFrameParser::new();
//! let frame = br#"{"type":"telemetry","data":{"drone_id":"D1","location":[71.4,51.1],"altitude":100}}"#;
//! if let Ok(Some(StreamEvent::Telemetry(event))) = parser.parse(frame) {
//!     println!("Got telemetry for {}", event.drone_id);
//! }
//! ```
//!
//! ## Reconciler and Render Layers
//!
//! ```
//! use airspace_client::protocol::{Position, TelemetryEvent};
//! use airspace_client::reconciler::Reconciler;
//! use airspace_client::render::{drone_features, ensure_layer, Camera, Category, MapScene};
//!
//! let mut reconciler = Reconciler::default();
//! reconciler.apply_telemetry(TelemetryEvent {
//!     location: Some(Position::new(71.45, 51.17)),
//!     ..TelemetryEvent::new("D1")
//! });
//!
//! let mut scene = MapScene::new(Camera::default());
//! scene.mark_ready();
//! ensure_layer(&mut scene, Category::Drones, drone_features(&reconciler.snapshot()));
//! ```

pub mod protocol;
pub mod reconciler;
pub mod render;
pub mod stream;

use std::sync::Arc;
use std::time::Duration;

use log::info;
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub use protocol::{ParseError, Position, Protocol, StreamEvent, TelemetryEvent, ViolationEvent};
pub use reconciler::{
    AirspaceEvent, AirspaceState, DroneState, Reconciler, ReconcilerConfig, Violation, ViolationLog,
};
pub use stream::{
    ClientEvent, Connection, ConnectionConfig, ConnectionEvent, ConnectionState, StreamClient, StreamHandler,
    Transport, TransportError, WebSocketTransport,
};

/// Configuration for the full-stack client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Connection configuration.
    pub connection: ConnectionConfig,
    /// Reconciler configuration.
    pub reconciler: ReconcilerConfig,
    /// How often stale drones are checked for (only with a drone timeout).
    pub cleanup_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            reconciler: ReconcilerConfig::default(),
            cleanup_interval: Duration::from_secs(10),
        }
    }
}

/// Full-stack airspace client that wires all layers together.
///
/// A background task owns the stream and the reconciler and applies events
/// in arrival order. Readers get immutable snapshots through a watch channel.
pub struct Client {
    snapshot_rx: watch::Receiver<Arc<AirspaceState>>,
    status_rx: watch::Receiver<ConnectionState>,
    event_tx: broadcast::Sender<AirspaceEvent>,
    cancel_token: CancellationToken,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("connection_state", &*self.status_rx.borrow())
            .field("cancel_token", &self.cancel_token)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Spawn a client over the given transport.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let reconciler = Reconciler::new(config.reconciler);
        let event_tx = reconciler.event_sender();
        let (snapshot_tx, snapshot_rx) = watch::channel(reconciler.snapshot());
        let (status_tx, status_rx) = watch::channel(reconciler.connection_state());
        let cancel_token = CancellationToken::new();

        let stream = StreamClient::connect(config.connection, transport);
        tokio::spawn(run(
            stream,
            reconciler,
            Publisher { snapshot_tx, status_tx },
            config.cleanup_interval,
            cancel_token.clone(),
        ));

        Self {
            snapshot_rx,
            status_rx,
            event_tx,
            cancel_token,
        }
    }

    /// Spawn a client over a real WebSocket.
    #[must_use]
    pub fn connect_websocket(config: ClientConfig) -> Self {
        Self::spawn(config, Arc::new(WebSocketTransport))
    }

    /// Latest airspace snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<AirspaceState> {
        Arc::clone(&self.snapshot_rx.borrow())
    }

    /// Receiver notified on every new snapshot.
    #[must_use]
    pub fn watch_snapshots(&self) -> watch::Receiver<Arc<AirspaceState>> {
        self.snapshot_rx.clone()
    }

    /// Current stream connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        *self.status_rx.borrow()
    }

    /// Subscribe to airspace change events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AirspaceEvent> {
        self.event_tx.subscribe()
    }

    /// Close the stream and stop processing. Idempotent.
    pub fn close(&self) {
        if !self.cancel_token.is_cancelled() {
            info!("Closing airspace client");
            self.cancel_token.cancel();
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

struct Publisher {
    snapshot_tx: watch::Sender<Arc<AirspaceState>>,
    status_tx: watch::Sender<ConnectionState>,
}

impl Publisher {
    fn publish(&self, reconciler: &Reconciler) {
        let snapshot = reconciler.snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            if Arc::ptr_eq(current, &snapshot) {
                false
            } else {
                *current = snapshot;
                true
            }
        });

        let state = reconciler.connection_state();
        self.status_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

async fn run(
    mut stream: StreamClient,
    mut reconciler: Reconciler,
    publisher: Publisher,
    cleanup_interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut cleanup = tokio::time::interval(cleanup_interval.max(Duration::from_millis(100)));
    cleanup.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,
            more = stream.dispatch_next(&mut reconciler) => {
                if !more {
                    break;
                }
            }
            _ = cleanup.tick() => {
                if reconciler.expire_stale() == 0 {
                    continue;
                }
            }
        }
        publisher.publish(&reconciler);
    }

    stream.close();
    info!(
        "Airspace client stopped ({} malformed frames dropped)",
        stream.dropped_frames()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::testing::{FakeTransport, Script};

    fn frames() -> Vec<String> {
        vec![
            r#"{"type":"violation","data":{"drone_id":"D2","type":"no_fly_zone","description":"entered zone"}}"#.to_string(),
            r#"{"type":"telemetry","data":{"drone_id":"D1","location":[71.0,51.0],"altitude":100,"speed":5,"status":"active"}}"#.to_string(),
            "{not json".to_string(),
            r#"{"type":"telemetry","data":{"drone_id":"D2","location":[71.1,51.1],"altitude":80,"speed":4,"status":"active"}}"#.to_string(),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_publishes_snapshots() {
        let transport = FakeTransport::new(vec![Script::open_forever(frames())]);
        let client = Client::spawn(ClientConfig::default(), transport);
        let mut events = client.subscribe();

        let mut snapshots = client.watch_snapshots();
        let state = snapshots
            .wait_for(|s| s.drone_count() == 2)
            .await
            .unwrap()
            .clone();

        assert!(!state.drone("D1").unwrap().has_violation);
        assert!(state.drone("D2").unwrap().has_violation);
        assert_eq!(state.violations().len(), 1);
        assert_eq!(client.connection_state(), ConnectionState::Open);
        assert!(matches!(events.recv().await.unwrap(), AirspaceEvent::ViolationRecorded(_)));
        assert_eq!(events.recv().await.unwrap(), AirspaceEvent::DroneAdded("D1".to_string()));

        client.close();
        client.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_starts_new_session() {
        let transport = FakeTransport::new(vec![
            Script::Open {
                frames: vec![frames().remove(1)],
                hang: false,
            },
            Script::open_forever(vec![]),
        ]);
        let client = Client::spawn(ClientConfig::default(), transport.clone());

        let mut snapshots = client.watch_snapshots();
        snapshots.wait_for(|s| s.drone_count() == 1).await.unwrap();

        let state = snapshots.wait_for(|s| s.session() == 1).await.unwrap().clone();
        assert_eq!(state.drone_count(), 0);
        assert!(state.violations().is_empty());
        assert_eq!(transport.attempts(), 2);
        assert_eq!(client.connection_state(), ConnectionState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_expires_stale_drones() {
        let transport = FakeTransport::new(vec![Script::open_forever(vec![frames().remove(1)])]);
        let client = Client::spawn(
            ClientConfig {
                reconciler: ReconcilerConfig {
                    drone_timeout: Some(Duration::ZERO),
                    ..Default::default()
                },
                cleanup_interval: Duration::from_secs(1),
                ..Default::default()
            },
            transport,
        );

        let mut events = client.subscribe();

        let mut seen = Vec::new();
        loop {
            match events.recv().await.unwrap() {
                AirspaceEvent::SessionReset(_) => {}
                event @ AirspaceEvent::DroneExpired(_) => {
                    seen.push(event);
                    break;
                }
                event => seen.push(event),
            }
        }
        assert_eq!(
            seen,
            vec![
                AirspaceEvent::DroneAdded("D1".to_string()),
                AirspaceEvent::DroneExpired("D1".to_string()),
            ]
        );

        let state = client
            .watch_snapshots()
            .wait_for(|s| s.drone_count() == 0)
            .await
            .unwrap()
            .clone();
        assert!(state.violations().is_empty());
    }
}
