//! Transport abstraction and the WebSocket implementation.
//!
//! A transport opens a bidirectional text-frame channel from a
//! [`ConnectionRequest`]. Inbound frames and the closure notice arrive on an
//! mpsc receiver; outbound frames go through a [`TransportSink`].

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::error::Error as WsError;
use tokio_tungstenite::tungstenite::http::header::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use cl_core::constants::FRAME_CHANNEL_CAPACITY;
use cl_core::error::{ClError, ClResult};

use crate::request::ConnectionRequest;

/// How a transport connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// The peer sent a close frame.
    Graceful,
    /// The stream failed or ended without a close frame.
    Abnormal,
}

/// Something that happened on an open transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Frame(String),
    Closed { kind: CloseKind, reason: String },
}

/// Outbound half of an open connection.
#[async_trait]
pub trait TransportSink: Send {
    async fn send(&mut self, frame: String) -> ClResult<()>;

    /// Close the connection; no further events are produced afterwards.
    async fn close(&mut self) -> ClResult<()>;
}

/// An open connection: inbound events plus the outbound sink.
pub struct TransportConnection {
    pub events: mpsc::Receiver<TransportEvent>,
    pub sink: Box<dyn TransportSink>,
}

/// Opens real-time connections.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a connection. An HTTP 401 during the upgrade maps to
    /// `ClError::AuthFailed`.
    async fn open(&self, request: &ConnectionRequest) -> ClResult<TransportConnection>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport over tokio-tungstenite.
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, request: &ConnectionRequest) -> ClResult<TransportConnection> {
        let mut ws_request = request
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ClError::Transport(format!("failed to build upgrade request: {e}")))?;

        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ClError::Config(format!("invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ClError::Config(format!("invalid header value: {e}")))?;
            ws_request.headers_mut().insert(name, value);
        }

        let (stream, _response) = connect_async(ws_request).await.map_err(map_ws_error)?;
        debug!("websocket opened: {}", request.redacted_url());

        let (sink, mut stream) = stream.split();
        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);

        let reader = tokio::spawn(async move {
            let closed = loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if tx.send(TransportEvent::Frame(text.as_str().to_owned())).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => {
                            if tx.send(TransportEvent::Frame(text)).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => warn!("dropping non-UTF-8 binary frame: {e}"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str()))
                            .unwrap_or_else(|| "closed by server".to_string());
                        break TransportEvent::Closed {
                            kind: CloseKind::Graceful,
                            reason,
                        };
                    }
                    // Pings are answered by tungstenite on the next write.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        break TransportEvent::Closed {
                            kind: CloseKind::Abnormal,
                            reason: e.to_string(),
                        };
                    }
                    None => {
                        break TransportEvent::Closed {
                            kind: CloseKind::Abnormal,
                            reason: "stream ended without close frame".to_string(),
                        };
                    }
                }
            };
            let _ = tx.send(closed).await;
        });

        Ok(TransportConnection {
            events: rx,
            sink: Box::new(WebSocketSink { sink, reader }),
        })
    }
}

fn map_ws_error(e: WsError) -> ClError {
    match e {
        WsError::Http(response) if response.status().as_u16() == 401 => {
            ClError::AuthFailed("handshake rejected with HTTP 401".into())
        }
        WsError::Http(response) => ClError::Transport(format!(
            "handshake rejected with HTTP {}",
            response.status()
        )),
        other => ClError::Transport(other.to_string()),
    }
}

struct WebSocketSink {
    sink: SplitSink<WsStream, Message>,
    reader: JoinHandle<()>,
}

#[async_trait]
impl TransportSink for WebSocketSink {
    async fn send(&mut self, frame: String) -> ClResult<()> {
        self.sink
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| ClError::Transport(format!("send failed: {e}")))
    }

    async fn close(&mut self) -> ClResult<()> {
        self.reader.abort();
        let _ = self.sink.send(Message::Close(None)).await;
        self.sink
            .close()
            .await
            .map_err(|e| ClError::Transport(format!("close failed: {e}")))
    }
}

impl Drop for WebSocketSink {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
