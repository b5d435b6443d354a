//! In-memory transport for tests and offline hosts.
//!
//! Each accepted `open` hands the server side of the connection out as a
//! [`ServerPeer`], which can push frames, close the link, and read what the
//! client sent.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use cl_core::constants::FRAME_CHANNEL_CAPACITY;
use cl_core::error::{ClError, ClResult};

use crate::request::ConnectionRequest;
use crate::transport::{
    CloseKind, Transport, TransportConnection, TransportEvent, TransportSink,
};

/// Scripted result of one `open` call.
#[derive(Debug, Clone)]
pub enum OpenBehavior {
    Accept,
    Fail(ClError),
    /// Never completes; the caller has to give up on it.
    Hang,
}

struct Inner {
    script: Mutex<VecDeque<OpenBehavior>>,
    requests: Mutex<Vec<ConnectionRequest>>,
    peers_tx: mpsc::UnboundedSender<ServerPeer>,
    peers_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ServerPeer>>,
}

/// Transport backed by in-process channels.
#[derive(Clone)]
pub struct ChannelTransport {
    inner: Arc<Inner>,
}

impl Default for ChannelTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelTransport {
    pub fn new() -> Self {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                script: Mutex::new(VecDeque::new()),
                requests: Mutex::new(Vec::new()),
                peers_tx,
                peers_rx: tokio::sync::Mutex::new(peers_rx),
            }),
        }
    }

    /// Queue the outcome of a future `open`. Unscripted opens are accepted.
    pub fn push_behavior(&self, behavior: OpenBehavior) {
        if let Ok(mut script) = self.inner.script.lock() {
            script.push_back(behavior);
        }
    }

    /// Number of `open` calls so far.
    pub fn open_count(&self) -> usize {
        self.inner.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Requests passed to `open`, oldest first.
    pub fn requests(&self) -> Vec<ConnectionRequest> {
        self.inner
            .requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Wait for the next accepted connection.
    pub async fn next_peer(&self) -> Option<ServerPeer> {
        self.inner.peers_rx.lock().await.recv().await
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn open(&self, request: &ConnectionRequest) -> ClResult<TransportConnection> {
        if let Ok(mut requests) = self.inner.requests.lock() {
            requests.push(request.clone());
        }
        let behavior = self
            .inner
            .script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or(OpenBehavior::Accept);

        match behavior {
            OpenBehavior::Accept => {}
            OpenBehavior::Fail(e) => return Err(e),
            OpenBehavior::Hang => std::future::pending::<()>().await,
        }

        let (events_tx, events_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let closed_by_client = Arc::new(AtomicBool::new(false));

        let peer = ServerPeer {
            events_tx,
            sent_rx,
            closed_by_client: closed_by_client.clone(),
        };
        self.inner
            .peers_tx
            .send(peer)
            .map_err(|_| ClError::Transport("in-memory server is gone".into()))?;

        Ok(TransportConnection {
            events: events_rx,
            sink: Box::new(ChannelSink {
                sent_tx,
                closed_by_client,
            }),
        })
    }
}

struct ChannelSink {
    sent_tx: mpsc::UnboundedSender<String>,
    closed_by_client: Arc<AtomicBool>,
}

#[async_trait]
impl TransportSink for ChannelSink {
    async fn send(&mut self, frame: String) -> ClResult<()> {
        if self.closed_by_client.load(Ordering::SeqCst) {
            return Err(ClError::Transport("connection already closed".into()));
        }
        self.sent_tx
            .send(frame)
            .map_err(|_| ClError::Transport("peer went away".into()))
    }

    async fn close(&mut self) -> ClResult<()> {
        self.closed_by_client.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Server side of one in-memory connection.
pub struct ServerPeer {
    events_tx: mpsc::Sender<TransportEvent>,
    sent_rx: mpsc::UnboundedReceiver<String>,
    closed_by_client: Arc<AtomicBool>,
}

impl ServerPeer {
    /// Push a raw text frame to the client.
    pub async fn send_frame(&self, frame: impl Into<String>) -> bool {
        self.events_tx
            .send(TransportEvent::Frame(frame.into()))
            .await
            .is_ok()
    }

    /// Push a JSON event to the client.
    pub async fn send_event(&self, event: Value) -> bool {
        self.send_frame(event.to_string()).await
    }

    /// Complete the handshake with a first health check carrying `me`.
    pub async fn send_health_check(&self, connection_id: &str, me: Value) -> bool {
        self.send_event(json!({
            "type": "health.check",
            "connection_id": connection_id,
            "me": me,
        }))
        .await
    }

    /// Push a structured error frame.
    pub async fn send_error(&self, code: i32, status: u16, message: &str) -> bool {
        self.send_event(json!({
            "error": {"code": code, "message": message, "StatusCode": status}
        }))
        .await
    }

    /// End the connection from the server side.
    pub async fn close(&self, kind: CloseKind, reason: &str) -> bool {
        self.events_tx
            .send(TransportEvent::Closed {
                kind,
                reason: reason.to_string(),
            })
            .await
            .is_ok()
    }

    /// Next frame the client sent, if the connection is still around.
    pub async fn next_sent(&mut self) -> Option<String> {
        self.sent_rx.recv().await
    }

    pub fn is_closed_by_client(&self) -> bool {
        self.closed_by_client.load(Ordering::SeqCst)
    }
}
