// The duplex frame seam between a session and its socket. The lobby runtime
// only ever sees WireFrame/EncodedFrame values, so the read loop and the
// broadcast path are exercised the same way over a real WebSocket and over
// the in-memory channel the tests use.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::Mutex;
use warp::ws::{Message, WebSocket};

use protocol::EncodedFrame;

/// Inbound frame as the transport saw it.
#[derive(Debug, Clone, PartialEq)]
pub enum WireFrame {
    Binary(Vec<u8>),
    Text(String),
    /// Anything the protocol has no use for (unsolicited pong payloads etc.)
    Other,
}

#[derive(Debug, Error)]
#[error("transport failure: {0}")]
pub struct TransportError(pub String);

#[async_trait]
pub trait Transport: Send + Sync {
    /// Next inbound frame. None once the peer is gone or the transport was
    /// closed locally.
    async fn recv(&self) -> Option<Result<WireFrame, TransportError>>;

    async fn send(&self, frame: EncodedFrame) -> Result<(), TransportError>;

    async fn close(&self);
}

/// WebSocket-backed transport. The socket is split so the read loop and
/// broadcast writers never contend on one half.
pub struct WsTransport {
    reader: Mutex<SplitStream<WebSocket>>,
    writer: Mutex<SplitSink<WebSocket, Message>>,
}

impl WsTransport {
    pub fn new(socket: WebSocket) -> Self {
        let (writer, reader) = socket.split();
        WsTransport {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn recv(&self) -> Option<Result<WireFrame, TransportError>> {
        let mut reader = self.reader.lock().await;
        loop {
            let msg = match reader.next().await? {
                Ok(msg) => msg,
                Err(e) => return Some(Err(TransportError(e.to_string()))),
            };

            if msg.is_close() {
                return None;
            }
            if msg.is_binary() {
                return Some(Ok(WireFrame::Binary(msg.into_bytes())));
            }
            if msg.is_text() {
                let text = msg.to_str().unwrap_or_default().to_owned();
                return Some(Ok(WireFrame::Text(text)));
            }
            if msg.is_ping() || msg.is_pong() {
                // warp answers pings on its own
                continue;
            }
            return Some(Ok(WireFrame::Other));
        }
    }

    async fn send(&self, frame: EncodedFrame) -> Result<(), TransportError> {
        let msg = match frame {
            EncodedFrame::Binary(bytes) => Message::binary(bytes),
            EncodedFrame::Text(text) => Message::text(text),
        };
        self.writer
            .lock()
            .await
            .send(msg)
            .await
            .map_err(|e| TransportError(e.to_string()))
    }

    async fn close(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.send(Message::close()).await;
        let _ = writer.close().await;
    }
}
