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

//! Transport seam for the stream connection.
//!
//! The connection loop only sees [`Transport`] and [`FrameChannel`], so the
//! reconnect policy can be exercised against an in-memory fake. The
//! production implementation is [`WebSocketTransport`].

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Errors raised by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("send failed: {0}")]
    Send(String),
}

/// Opens duplex text-frame channels.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new channel to `url`.
    async fn connect(&self, url: &str) -> Result<Box<dyn FrameChannel>, TransportError>;
}

/// An open duplex channel carrying text frames.
#[async_trait]
pub trait FrameChannel: Send {
    /// Send one text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Receive the next text frame.
    ///
    /// Returns `None` once the remote side has closed the channel.
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>>;

    /// Close the channel. Errors are ignored.
    async fn close(&mut self) {}
}

/// WebSocket transport backed by `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketTransport;

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn FrameChannel>, TransportError> {
        let (stream, response) = tokio_tungstenite::connect_async(url).await?;
        debug!("WebSocket handshake completed with status {}", response.status());
        Ok(Box::new(WebSocketChannel { stream }))
    }
}

struct WebSocketChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FrameChannel for WebSocketChannel {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(e) => debug!("Skipping non-UTF-8 binary frame: {e}"),
                },
                Ok(Message::Close(frame)) => {
                    info!("WebSocket closed by server: {frame:?}");
                    return None;
                }
                // Ping/pong are answered by tungstenite itself
                Ok(_) => {}
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!("Error while closing WebSocket: {e}");
        }
    }
}

/// Append the bearer token as the percent-encoded `token` query parameter.
#[must_use]
pub fn url_with_token(url: &str, token: Option<&str>) -> String {
    match token.filter(|t| !t.is_empty()) {
        Some(token) => {
            let separator = if url.contains('?') { '&' } else { '?' };
            format!("{url}{separator}token={}", urlencoding::encode(token))
        }
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::net::TcpListener;

    use super::super::{Connection, ConnectionConfig, ConnectionEvent, ConnectionState};
    use super::*;
    use crate::protocol::ClientMessage;

    #[test]
    fn test_url_with_token() {
        assert_eq!(
            url_with_token("ws://localhost:8000/ws/telemetry", Some("abc")),
            "ws://localhost:8000/ws/telemetry?token=abc"
        );
        assert_eq!(
            url_with_token("ws://host/ws?x=1", Some("abc")),
            "ws://host/ws?x=1&token=abc"
        );
        assert_eq!(url_with_token("ws://host/ws", None), "ws://host/ws");
        assert_eq!(url_with_token("ws://host/ws", Some("")), "ws://host/ws");
    }

    #[test]
    fn test_url_with_token_is_encoded() {
        assert_eq!(
            url_with_token("ws://host/ws", Some("a+b/c=&d e")),
            "ws://host/ws?token=a%2Bb%2Fc%3D%26d%20e"
        );
    }

    #[tokio::test]
    async fn test_websocket_loopback() {
        let telemetry = r#"{"type":"telemetry","data":{"drone_id":"D1","altitude":100}}"#;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            let subscribe = ws.next().await.unwrap().unwrap();
            ws.send(Message::text(telemetry)).await.unwrap();
            ws.close(None).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
            subscribe
        });

        let mut connection = Connection::spawn(
            ConnectionConfig {
                url: format!("ws://{addr}/ws/telemetry"),
                ..Default::default()
            },
            Arc::new(WebSocketTransport),
        );

        let mut events = Vec::new();
        while let Some(event) = connection.recv().await {
            let closed = event == ConnectionEvent::StateChanged(ConnectionState::Closed);
            events.push(event);
            if closed {
                break;
            }
        }
        connection.close();

        assert_eq!(
            events,
            vec![
                ConnectionEvent::StateChanged(ConnectionState::Connecting),
                ConnectionEvent::StateChanged(ConnectionState::Open),
                ConnectionEvent::FrameReceived(telemetry.to_string()),
                ConnectionEvent::StateChanged(ConnectionState::Closed),
            ]
        );
        assert_eq!(server.await.unwrap(), Message::text(ClientMessage::Subscribe.to_text()));
    }
}
