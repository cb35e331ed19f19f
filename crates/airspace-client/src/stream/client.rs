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

use std::sync::Arc;

use log::warn;

use super::{Connection, ConnectionConfig, ConnectionEvent, ConnectionState, Transport};
use crate::protocol::{JsonFrameParser, Protocol, StreamEvent};

/// Typed output of the stream client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Connection status changed.
    Status(ConnectionState),
    /// A decoded domain event.
    Stream(StreamEvent),
}

/// Receiver of dispatched stream events.
pub trait StreamHandler {
    /// Called for every decoded telemetry or violation event, in arrival order.
    fn on_event(&mut self, event: StreamEvent);

    /// Called when the connection status changes.
    fn on_status_change(&mut self, state: ConnectionState) {
        let _ = state;
    }
}

/// Stream client: a managed connection plus frame decoding.
///
/// Malformed frames are logged and dropped; they never end the stream.
pub struct StreamClient {
    connection: Connection,
    parser: JsonFrameParser,
    dropped_frames: u64,
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("connection", &self.connection)
            .field("dropped_frames", &self.dropped_frames)
            .finish_non_exhaustive()
    }
}

impl StreamClient {
    /// Connect to the stream over the given transport.
    #[must_use]
    pub fn connect(config: ConnectionConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            connection: Connection::spawn(config, transport),
            parser: JsonFrameParser::new(),
            dropped_frames: 0,
        }
    }

    /// Receive the next status change or decoded event.
    ///
    /// Returns `None` once the client has been closed and drained.
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        loop {
            match self.connection.recv().await? {
                ConnectionEvent::StateChanged(state) => return Some(ClientEvent::Status(state)),
                ConnectionEvent::FrameReceived(text) => match self.parser.parse(text.as_bytes()) {
                    Ok(Some(event)) => return Some(ClientEvent::Stream(event)),
                    Ok(None) => {}
                    Err(e) => {
                        self.dropped_frames += 1;
                        warn!("Dropping malformed stream frame: {e}");
                    }
                },
            }
        }
    }

    /// Dispatch the next event to `handler`.
    ///
    /// Returns `false` once the client has been closed and drained.
    pub async fn dispatch_next<H: StreamHandler + ?Sized>(&mut self, handler: &mut H) -> bool {
        match self.next_event().await {
            Some(ClientEvent::Status(state)) => handler.on_status_change(state),
            Some(ClientEvent::Stream(event)) => handler.on_event(event),
            None => return false,
        }
        true
    }

    /// Number of frames dropped as malformed.
    #[must_use]
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    /// Close the stream and cancel any pending reconnect. Idempotent.
    pub fn close(&self) {
        self.connection.close();
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{FakeTransport, Script};
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Vec<StreamEvent>,
        states: Vec<ConnectionState>,
    }

    impl StreamHandler for Recorder {
        fn on_event(&mut self, event: StreamEvent) {
            self.events.push(event);
        }

        fn on_status_change(&mut self, state: ConnectionState) {
            self.states.push(state);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_drops_malformed_frames() {
        let frames = vec![
            r#"{"type":"telemetry","data":{"drone_id":"D1","location":[71.0,51.0],"altitude":100,"speed":5,"status":"active"}}"#.to_string(),
            "garbage".to_string(),
            r#"{"data":{"drone_id":"D1"}}"#.to_string(),
            r#"{"type":"pong"}"#.to_string(),
            r#"{"type":"violation","data":{"drone_id":"D1","type":"altitude","description":"exceeded ceiling"}}"#.to_string(),
        ];
        let transport = FakeTransport::new(vec![Script::open_forever(frames)]);
        let mut client = StreamClient::connect(ConnectionConfig::default(), transport);
        let mut recorder = Recorder::default();

        while recorder.events.len() < 2 {
            assert!(client.dispatch_next(&mut recorder).await);
        }

        assert_eq!(recorder.states, vec![ConnectionState::Connecting, ConnectionState::Open]);
        assert!(matches!(recorder.events[0], StreamEvent::Telemetry(_)));
        assert!(matches!(recorder.events[1], StreamEvent::Violation(_)));
        assert_eq!(client.dropped_frames(), 2);

        client.close();
        while client.dispatch_next(&mut recorder).await {}
    }
}
