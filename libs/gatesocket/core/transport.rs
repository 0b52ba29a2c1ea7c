//! Transport socket
//!
//! # Architecture
//!
//! ```text
//! connect(uri) ──> [previous socket closed] ──> new WebSocketStream
//!
//! receive() ──> next data message ──> String
//!                │
//!                ├─ Ping / Pong / raw frames: skipped (tungstenite answers pings)
//!                ├─ Close(code, reason):      SocketError::Closed
//!                └─ stream end / I/O error:   SocketError::Closed / WebSocket
//!
//! send(op, d) ──> {"op": op, "d": d} ──> one text message
//! ```
//!
//! Fragmented frames are reassembled by tungstenite before they surface as a
//! `Message`, so one `receive` always yields one complete logical message.
//! `receive` only awaits `StreamExt::next`, which makes it safe to use as a
//! `tokio::select!` branch.

use crate::traits::{Result, SocketError};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::borrow::Cow;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound on how long `close` waits for the close frame to flush
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Close code used by `close`
pub const NORMAL_CLOSURE: u16 = 1000;

#[derive(Serialize)]
struct Envelope<'a, T: Serialize + ?Sized> {
    op: u8,
    d: &'a T,
}

/// Message counters for one socket owner (survive reconnects)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportMetrics {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub connects: u64,
}

/// Owns at most one WebSocket connection at a time
#[derive(Default)]
pub struct TransportSocket {
    stream: Option<WsStream>,
    url: Option<String>,
    metrics: TransportMetrics,
}

impl TransportSocket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new connection to `url`, closing any previous one first
    pub async fn connect(&mut self, url: &str) -> Result<()> {
        self.close().await;

        debug!("Connecting to {}", url);
        let (stream, _response) =
            connect_async(url)
                .await
                .map_err(|e| SocketError::Connect {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;

        info!("Connected to {}", url);
        self.stream = Some(stream);
        self.url = Some(url.to_string());
        self.metrics.connects += 1;
        Ok(())
    }

    /// Wait for the next complete text or binary message
    ///
    /// Binary messages are decoded as UTF-8. Control frames are consumed
    /// silently.
    pub async fn receive(&mut self) -> Result<String> {
        let stream = self.stream.as_mut().ok_or(SocketError::NotConnected)?;

        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    self.metrics.messages_received += 1;
                    return Ok(text);
                }
                Some(Ok(Message::Binary(data))) => {
                    self.metrics.messages_received += 1;
                    return String::from_utf8(data).map_err(|e| SocketError::Decode(e.to_string()));
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.into_owned()),
                        None => (None, "closed without frame".to_string()),
                    };
                    debug!("Peer closed connection (code: {:?}, reason: {})", code, reason);
                    return Err(SocketError::Closed { code, reason });
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Err(e)) => return Err(SocketError::WebSocket(e.to_string())),
                None => {
                    return Err(SocketError::Closed {
                        code: None,
                        reason: "stream ended".to_string(),
                    })
                }
            }
        }
    }

    /// Serialize `{"op": op, "d": data}` and write it as one message
    pub async fn send<T: Serialize + ?Sized>(&mut self, op: u8, data: &T) -> Result<()> {
        let text = serde_json::to_string(&Envelope { op, d: data })?;
        self.send_text(text).await
    }

    /// Write an already encoded text message
    pub async fn send_text(&mut self, text: String) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(SocketError::NotConnected)?;
        stream
            .send(Message::Text(text))
            .await
            .map_err(|e| SocketError::WebSocket(e.to_string()))?;
        self.metrics.messages_sent += 1;
        Ok(())
    }

    /// Close with a normal closure code
    pub async fn close(&mut self) {
        self.close_with(NORMAL_CLOSURE, "").await;
    }

    /// Attempt a close handshake with `code`; errors are swallowed
    ///
    /// The handle is released whether or not the handshake succeeds.
    pub async fn close_with(&mut self, code: u16, reason: &str) {
        let Some(mut stream) = self.stream.take() else {
            return;
        };

        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: Cow::Owned(reason.to_string()),
        };

        match tokio::time::timeout(CLOSE_TIMEOUT, stream.close(Some(frame))).await {
            Ok(Ok(())) => debug!("Socket closed with code {}", code),
            Ok(Err(e)) => debug!("Ignoring error while closing socket: {}", e),
            Err(_) => debug!("Timed out closing socket, dropping handle"),
        }
    }

    /// Whether a connection is currently held
    #[inline]
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// URL of the most recent successful connect
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn metrics(&self) -> TransportMetrics {
        self.metrics
    }
}
