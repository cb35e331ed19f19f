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

//! Stream connection layer with fixed-interval reconnection.
//!
//! Provides a connection handle that keeps a duplex channel to the telemetry
//! feed open, subscribes on every open, and reconnects after a fixed delay
//! whenever the channel drops. Teardown is idempotent and cancels a pending
//! reconnect.

mod client;
#[cfg(test)]
pub(crate) mod testing;
mod transport;

pub use client::{ClientEvent, StreamClient, StreamHandler};
pub use transport::{url_with_token, FrameChannel, Transport, TransportError, WebSocketTransport};

use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::protocol::ClientMessage;

/// Configuration for the stream connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Stream endpoint, e.g. `ws://localhost:8000/ws/telemetry`.
    pub url: String,
    /// Bearer token, sent as the `token` query parameter.
    pub token: Option<String>,
    /// Delay before reconnecting after the channel drops.
    pub reconnect_delay: Duration,
    /// Keep-alive ping interval while open.
    pub ping_interval: Option<Duration>,
    /// Channel buffer size for received frames.
    pub buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8000/ws/telemetry".to_string(),
            token: None,
            reconnect_delay: Duration::from_secs(5),
            ping_interval: None,
            buffer_size: 1024,
        }
    }
}

impl ConnectionConfig {
    /// Endpoint including the authentication query parameter.
    #[must_use]
    pub fn endpoint(&self) -> String {
        url_with_token(&self.url, self.token.as_deref())
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Attempting to connect.
    Connecting,
    /// Channel open and subscription sent.
    Open,
    /// Channel dropped (a reconnect is scheduled unless closed).
    Closed,
}

/// Events emitted by the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Connection state changed.
    StateChanged(ConnectionState),
    /// One text frame received.
    FrameReceived(String),
}

/// Handle to a managed stream connection.
///
/// The connection runs in a background task and reconnects on disconnect.
/// Dropping the handle closes the connection.
pub struct Connection {
    event_rx: mpsc::Receiver<ConnectionEvent>,
    cancel_token: CancellationToken,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("cancel_token", &self.cancel_token)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Spawn a new connection task over the given transport.
    #[must_use]
    pub fn spawn(config: ConnectionConfig, transport: Arc<dyn Transport>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.buffer_size.max(1));
        let cancel_token = CancellationToken::new();

        let task_cancel = cancel_token.clone();

        tokio::spawn(async move {
            connection_loop(transport, config, event_tx, task_cancel).await;
        });

        Self {
            event_rx,
            cancel_token,
        }
    }

    /// Receive the next event from the connection.
    ///
    /// Returns `None` once the connection task has exited.
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.event_rx.recv().await
    }

    /// Close the connection and cancel any pending reconnect. Idempotent.
    pub fn close(&self) {
        self.cancel_token.cancel();
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

async fn connection_loop(
    transport: Arc<dyn Transport>,
    config: ConnectionConfig,
    event_tx: mpsc::Sender<ConnectionEvent>,
    cancel_token: CancellationToken,
) {
    let endpoint = config.endpoint();

    loop {
        if cancel_token.is_cancelled() {
            info!("Stream connection cancelled");
            return;
        }

        if event_tx
            .send(ConnectionEvent::StateChanged(ConnectionState::Connecting))
            .await
            .is_err()
        {
            return; // Receiver dropped
        }

        info!("Connecting to {}...", config.url);

        match connect_and_process(
            transport.as_ref(),
            &endpoint,
            config.ping_interval,
            &event_tx,
            &cancel_token,
        )
        .await
        {
            Ok(CloseReason::ClosedByServer) => {
                info!("Stream closed by server");
            }
            Ok(CloseReason::Cancelled) => {
                info!("Stream connection cancelled");
                return;
            }
            Err(e) => {
                error!("Stream connection error: {e}");
            }
        }

        if event_tx
            .send(ConnectionEvent::StateChanged(ConnectionState::Closed))
            .await
            .is_err()
        {
            return;
        }

        warn!(
            "Reconnecting in {} seconds...",
            config.reconnect_delay.as_secs()
        );

        tokio::select! {
            () = sleep(config.reconnect_delay) => {}
            () = cancel_token.cancelled() => {
                info!("Stream connection cancelled during reconnect delay");
                return;
            }
        }
    }
}

enum CloseReason {
    ClosedByServer,
    Cancelled,
}

async fn connect_and_process(
    transport: &dyn Transport,
    endpoint: &str,
    ping_interval: Option<Duration>,
    event_tx: &mpsc::Sender<ConnectionEvent>,
    cancel_token: &CancellationToken,
) -> Result<CloseReason, TransportError> {
    let mut channel = tokio::select! {
        result = transport.connect(endpoint) => result?,
        () = cancel_token.cancelled() => return Ok(CloseReason::Cancelled),
    };

    channel.send_text(ClientMessage::Subscribe.to_text()).await?;
    info!("Stream open, subscription sent");

    if event_tx
        .send(ConnectionEvent::StateChanged(ConnectionState::Open))
        .await
        .is_err()
    {
        channel.close().await;
        return Ok(CloseReason::Cancelled);
    }

    let mut ping = ping_interval.map(|period| {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval
    });

    loop {
        tokio::select! {
            frame = channel.next_frame() => {
                match frame {
                    Some(Ok(text)) => {
                        if event_tx.send(ConnectionEvent::FrameReceived(text)).await.is_err() {
                            channel.close().await;
                            return Ok(CloseReason::Cancelled);
                        }
                    }
                    Some(Err(e)) => return Err(e),
                    None => return Ok(CloseReason::ClosedByServer),
                }
            }

            () = next_tick(&mut ping) => {
                channel.send_text(ClientMessage::Ping.to_text()).await?;
            }

            () = cancel_token.cancelled() => {
                channel.close().await;
                return Ok(CloseReason::Cancelled);
            }
        }
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
