//! Real-time connection manager.
//!
//! A single actor task owns the transport, the lifecycle state and every
//! timer (reconnect backoff, handshake deadline, keep-alive, token refresh
//! retry). Public calls are commands sent over an mpsc channel, and the state
//! is published through a watch channel. Inbound events are decoded and
//! dispatched to the subscription registry from inside the actor, so
//! subscribers see them in arrival order.
//!
//! Socket opens and token refreshes run in helper tasks that report back
//! through an internal channel. Every report carries the generation it was
//! started under; reports from an older generation are discarded.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use cl_core::config::ClientConfig;
use cl_core::constants::COMMAND_CHANNEL_CAPACITY;
use cl_core::error::{ClError, ClResult};

use crate::backoff::BackoffPolicy;
use crate::codec::{EventCodec, Frame, JsonEventCodec};
use crate::credentials::{CredentialProvider, Credentials, Token};
use crate::events::{EventKind, HealthCheckPayload};
use crate::registry::SubscriptionRegistry;
use crate::request::ConnectionRequest;
use crate::state::{ConnectionState, SessionInfo};
use crate::transport::{CloseKind, Transport, TransportConnection, TransportEvent, TransportSink};

/// Upper bound on waiting for a transport to close.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

enum Command {
    Connect {
        credentials: Credentials,
        reply: oneshot::Sender<()>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    RefreshToken {
        reply: oneshot::Sender<()>,
    },
    SetHostActive(bool),
    Shutdown,
}

enum Internal {
    Opened {
        generation: u64,
        result: ClResult<TransportConnection>,
    },
    Refreshed {
        generation: u64,
        result: ClResult<Token>,
    },
}

struct Link {
    events: mpsc::Receiver<TransportEvent>,
    sink: Box<dyn TransportSink>,
}

#[derive(Default)]
struct SharedStatus {
    refresh_in_progress: AtomicBool,
    reconnect_attempt: AtomicU32,
}

/// Handle to the connection actor. Cloning shares the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    cmd_tx: mpsc::Sender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    registry: SubscriptionRegistry,
    shared: Arc<SharedStatus>,
}

/// Configures and spawns a [`ConnectionManager`].
pub struct ConnectionManagerBuilder {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    codec: Arc<dyn EventCodec>,
    registry: SubscriptionRegistry,
    provider: Option<Arc<dyn CredentialProvider>>,
}

impl ConnectionManagerBuilder {
    pub fn with_codec(mut self, codec: Arc<dyn EventCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_registry(mut self, registry: SubscriptionRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_credential_provider(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Spawn the actor on the current tokio runtime.
    pub fn spawn(self) -> ConnectionManager {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let shared = Arc::new(SharedStatus::default());

        let actor = ConnectionActor {
            backoff: BackoffPolicy::from_config(&self.config.reconnect),
            config: self.config,
            transport: self.transport,
            codec: self.codec,
            registry: self.registry.clone(),
            provider: self.provider,
            state_tx,
            shared: shared.clone(),
            internal_tx,
            credentials: None,
            generation: 0,
            open_task: None,
            refresh_task: None,
            link: None,
            retry_at: None,
            handshake_deadline: None,
            ping_at: None,
            refresh_retry_at: None,
            retry_paused: false,
            host_active: true,
            reconnect_attempt: 0,
            refresh_attempts: 0,
            last_inbound: Instant::now(),
            connection_id: None,
        };
        tokio::spawn(actor.run(cmd_rx, internal_rx));

        ConnectionManager {
            cmd_tx,
            state_rx,
            registry: self.registry,
            shared,
        }
    }
}

impl ConnectionManager {
    pub fn builder(config: ClientConfig, transport: Arc<dyn Transport>) -> ConnectionManagerBuilder {
        ConnectionManagerBuilder {
            config,
            transport,
            codec: Arc::new(JsonEventCodec),
            registry: SubscriptionRegistry::new(),
            provider: None,
        }
    }

    /// Start connecting with `credentials`.
    ///
    /// Invalid credentials fail here without touching the network. When a
    /// connection exists or is being established the call does nothing.
    /// Returns a receiver over the lifecycle state.
    pub async fn connect(
        &self,
        credentials: Credentials,
    ) -> ClResult<watch::Receiver<ConnectionState>> {
        credentials.validate()?;
        let (reply, done) = oneshot::channel();
        self.send(Command::Connect { credentials, reply }).await?;
        done.await.map_err(|_| actor_gone())?;
        Ok(self.state_rx.clone())
    }

    /// Close the connection and stop every pending retry.
    pub async fn disconnect(&self) {
        let (reply, done) = oneshot::channel();
        if self.send(Command::Disconnect { reply }).await.is_ok() {
            let _ = done.await;
        }
    }

    /// Replace the token and reconnect with it.
    ///
    /// Returns once the refresh has started; the state has left `Connected`
    /// by then unless no connection was active.
    pub async fn refresh_token(&self) -> ClResult<()> {
        let (reply, done) = oneshot::channel();
        self.send(Command::RefreshToken { reply }).await?;
        done.await.map_err(|_| actor_gone())
    }

    /// Tell the manager whether the host is in the foreground. Reconnect
    /// timers are paused while inactive.
    pub async fn set_host_active(&self, active: bool) {
        let _ = self.send(Command::SetHostActive(active)).await;
    }

    /// Stop the actor. The manager is unusable afterwards.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown).await;
    }

    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state_rx.borrow().is_connected()
    }

    pub fn session(&self) -> Option<SessionInfo> {
        self.state_rx.borrow().session().cloned()
    }

    pub fn is_token_refresh_in_progress(&self) -> bool {
        self.shared.refresh_in_progress.load(Ordering::SeqCst)
    }

    /// Reconnection attempts since the last successful handshake.
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.reconnect_attempt.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Wait until the connection is established.
    ///
    /// Fails fast when the manager ends up in `Failed`.
    pub async fn wait_until_connected(&self, timeout: Duration) -> ClResult<SessionInfo> {
        let mut rx = self.state_rx.clone();
        let wait = async move {
            loop {
                {
                    let state = rx.borrow_and_update();
                    match &*state {
                        ConnectionState::Connected(session) => return Ok(session.clone()),
                        ConnectionState::Failed { reason } => {
                            return Err(ClError::FatalConnection(reason.clone()))
                        }
                        _ => {}
                    }
                }
                rx.changed().await.map_err(|_| actor_gone())?;
            }
        };
        tokio::time::timeout(timeout, wait).await.map_err(|_| {
            ClError::Timeout(format!("not connected within {}ms", timeout.as_millis()))
        })?
    }

    async fn send(&self, command: Command) -> ClResult<()> {
        self.cmd_tx.send(command).await.map_err(|_| actor_gone())
    }
}

fn actor_gone() -> ClError {
    ClError::Internal("connection task is not running".into())
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn next_transport_event(link: &mut Option<Link>) -> Option<TransportEvent> {
    match link {
        Some(link) => link.events.recv().await,
        None => std::future::pending().await,
    }
}

struct ConnectionActor {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    codec: Arc<dyn EventCodec>,
    registry: SubscriptionRegistry,
    provider: Option<Arc<dyn CredentialProvider>>,
    backoff: BackoffPolicy,
    state_tx: watch::Sender<ConnectionState>,
    shared: Arc<SharedStatus>,
    internal_tx: mpsc::UnboundedSender<Internal>,

    credentials: Option<Credentials>,
    generation: u64,
    open_task: Option<JoinHandle<()>>,
    refresh_task: Option<JoinHandle<()>>,
    link: Option<Link>,

    retry_at: Option<Instant>,
    handshake_deadline: Option<Instant>,
    ping_at: Option<Instant>,
    refresh_retry_at: Option<Instant>,
    /// A reconnect is due but waits for the host to become active.
    retry_paused: bool,
    host_active: bool,

    reconnect_attempt: u32,
    refresh_attempts: u32,
    last_inbound: Instant,
    connection_id: Option<String>,
}

impl ConnectionActor {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        mut internal_rx: mpsc::UnboundedReceiver<Internal>,
    ) {
        debug!("connection actor started");
        loop {
            let retry_at = self.retry_at;
            let handshake_deadline = self.handshake_deadline;
            let ping_at = self.ping_at;
            let refresh_retry_at = self.refresh_retry_at;

            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Shutdown) | None => break,
                    Some(cmd) => self.handle_command(cmd).await,
                },
                Some(msg) = internal_rx.recv() => self.handle_internal(msg).await,
                event = next_transport_event(&mut self.link) => {
                    self.handle_transport_event(event).await
                }
                _ = sleep_until_opt(retry_at) => {
                    self.retry_at = None;
                    self.start_attempt().await;
                }
                _ = sleep_until_opt(handshake_deadline) => self.on_handshake_timeout().await,
                _ = sleep_until_opt(ping_at) => self.on_ping_tick().await,
                _ = sleep_until_opt(refresh_retry_at) => {
                    self.refresh_retry_at = None;
                    self.start_refresh_fetch().await;
                }
            }
        }

        self.stop_everything().await;
        self.set_state(ConnectionState::Disconnected);
        debug!("connection actor stopped");
    }

    fn current_state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state_tx.send_replace(next.clone());
        if previous != next {
            info!("connection state: {} -> {}", previous, next);
        }
    }

    fn set_refresh_in_progress(&self, value: bool) {
        self.shared
            .refresh_in_progress
            .store(value, Ordering::SeqCst);
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { credentials, reply } => {
                self.connect(credentials).await;
                let _ = reply.send(());
            }
            Command::Disconnect { reply } => {
                self.disconnect().await;
                let _ = reply.send(());
            }
            Command::RefreshToken { reply } => {
                self.request_token_refresh().await;
                let _ = reply.send(());
            }
            Command::SetHostActive(active) => self.set_host_active(active),
            Command::Shutdown => {}
        }
    }

    async fn connect(&mut self, credentials: Credentials) {
        let current = self.current_state();
        if current.is_active() {
            debug!("already connected or connecting ({current}), skipping");
            return;
        }

        info!(
            "connecting as {} ({})",
            credentials.user_id,
            credentials.auth_type()
        );
        self.credentials = Some(credentials);
        self.reconnect_attempt = 0;
        self.refresh_attempts = 0;
        self.shared.reconnect_attempt.store(0, Ordering::SeqCst);
        self.start_attempt().await;
    }

    async fn disconnect(&mut self) {
        if matches!(self.current_state(), ConnectionState::Disconnected) && self.link.is_none() {
            debug!("already disconnected");
            return;
        }

        self.set_state(ConnectionState::Disconnecting);
        self.stop_everything().await;
        self.credentials = None;
        self.set_state(ConnectionState::Disconnected);
        info!("connection closed by request");
    }

    fn set_host_active(&mut self, active: bool) {
        if self.host_active == active {
            return;
        }
        self.host_active = active;
        info!("host became {}", if active { "active" } else { "inactive" });

        if active {
            if self.retry_paused {
                self.retry_paused = false;
                self.retry_at = Some(Instant::now());
            }
        } else if self.retry_at.take().is_some() {
            info!("reconnection paused while host is inactive");
            self.retry_paused = true;
        }
    }

    /// Open a new transport with the current credentials.
    async fn start_attempt(&mut self) {
        let request = match self.credentials.as_ref() {
            Some(credentials) => ConnectionRequest::build(&self.config.connection, credentials),
            None => return,
        };
        let request = match request {
            Ok(request) => request,
            Err(e) => {
                self.fail(e).await;
                return;
            }
        };

        self.generation += 1;
        let generation = self.generation;
        self.abort_open();
        self.set_state(ConnectionState::Connecting);
        debug!(
            "opening connection (generation {generation}): {}",
            request.redacted_url()
        );

        let transport = self.transport.clone();
        let tx = self.internal_tx.clone();
        self.open_task = Some(tokio::spawn(async move {
            let result = transport.open(&request).await;
            let _ = tx.send(Internal::Opened { generation, result });
        }));
        self.handshake_deadline = Some(Instant::now() + self.config.connection.connect_timeout());
    }

    async fn handle_internal(&mut self, msg: Internal) {
        match msg {
            Internal::Opened { generation, result } => {
                if generation != self.generation {
                    if let Ok(mut stale) = result {
                        debug!("closing stale connection from generation {generation}");
                        tokio::spawn(async move {
                            let _ = tokio::time::timeout(CLOSE_TIMEOUT, stale.sink.close()).await;
                        });
                    }
                    return;
                }
                self.open_task = None;
                match result {
                    Ok(conn) => {
                        debug!("transport open, awaiting handshake");
                        self.last_inbound = Instant::now();
                        self.link = Some(Link {
                            events: conn.events,
                            sink: conn.sink,
                        });
                    }
                    Err(e) if e.is_auth_error() => {
                        warn!("handshake rejected: {e}");
                        self.on_token_rejected().await;
                    }
                    Err(e) => {
                        warn!("connection attempt failed: {e}");
                        self.schedule_reconnect(e).await;
                    }
                }
            }
            Internal::Refreshed { generation, result } => {
                if generation != self.generation {
                    debug!("ignoring stale token refresh from generation {generation}");
                    return;
                }
                self.refresh_task = None;
                match result {
                    Ok(token) => {
                        info!("token refreshed, reconnecting");
                        let valid = match self.credentials.as_mut() {
                            Some(credentials) => {
                                credentials.token = Some(token);
                                credentials.validate()
                            }
                            None => Err(ClError::NotConnected),
                        };
                        match valid {
                            Ok(()) => self.start_attempt().await,
                            Err(e) => self.fail(e).await,
                        }
                    }
                    Err(e) => {
                        let max = self.config.auth.max_refresh_attempts;
                        warn!(
                            "token refresh attempt {}/{} failed: {e}",
                            self.refresh_attempts, max
                        );
                        if self.refresh_attempts >= max {
                            self.fail(ClError::FatalConnection(format!(
                                "token refresh failed after {max} attempts: {e}"
                            )))
                            .await;
                        } else {
                            let delay = self.config.auth.refresh_retry_delay()
                                * 2u32.pow(self.refresh_attempts.saturating_sub(1).min(10));
                            self.refresh_retry_at = Some(Instant::now() + delay);
                        }
                    }
                }
            }
        }
    }

    async fn handle_transport_event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Frame(raw)) => self.handle_frame(&raw).await,
            Some(TransportEvent::Closed { kind, reason }) => self.on_closed(kind, reason).await,
            None => {
                self.on_closed(CloseKind::Abnormal, "transport dropped".into())
                    .await
            }
        }
    }

    async fn handle_frame(&mut self, raw: &str) {
        self.last_inbound = Instant::now();

        let frame = match self.codec.decode(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("dropping inbound frame: {e}");
                return;
            }
        };

        match frame {
            Frame::Error(payload) => {
                let error = ClError::from(payload);
                if error.is_auth_error() {
                    warn!("server rejected token: {error}");
                    self.on_token_rejected().await;
                    return;
                }
                let awaiting_handshake = matches!(self.current_state(), ConnectionState::Connecting);
                if !awaiting_handshake {
                    warn!("server error: {error}");
                } else if error.is_retryable() {
                    warn!("handshake failed: {error}");
                    self.schedule_reconnect(error).await;
                } else {
                    self.fail(error).await;
                }
            }
            Frame::Event(event) => {
                let handshake = if event.kind == EventKind::HealthCheck
                    && self.connection_id.is_none()
                    && matches!(self.current_state(), ConnectionState::Connecting)
                {
                    event.as_health_check()
                } else {
                    None
                };

                self.registry.dispatch(&event);

                if let Some(payload) = handshake {
                    self.complete_handshake(payload);
                }
            }
        }
    }

    fn complete_handshake(&mut self, payload: HealthCheckPayload) {
        let Some(connection_id) = payload.connection_id.filter(|id| !id.is_empty()) else {
            warn!("health check without connection id, still waiting for handshake");
            return;
        };
        let Some(credentials) = self.credentials.as_ref() else {
            return;
        };

        let user = payload.me.unwrap_or_else(|| credentials.local_user());
        let session = SessionInfo::new(
            connection_id.clone(),
            user,
            self.config.connection.api_key.clone(),
            credentials.token.clone(),
        );

        if self.reconnect_attempt > 0 {
            info!(
                "reconnected successfully after {} attempt(s)",
                self.reconnect_attempt
            );
        }
        self.connection_id = Some(connection_id);
        self.handshake_deadline = None;
        self.reconnect_attempt = 0;
        self.refresh_attempts = 0;
        self.shared.reconnect_attempt.store(0, Ordering::SeqCst);
        self.ping_at = Some(Instant::now() + self.config.health.interval());
        self.set_refresh_in_progress(false);
        self.set_state(ConnectionState::Connected(session));
    }

    async fn on_closed(&mut self, kind: CloseKind, reason: String) {
        // The peer is gone; dropping the link releases it.
        self.link = None;
        match kind {
            CloseKind::Graceful => info!("connection closed by server: {reason}"),
            CloseKind::Abnormal => warn!("connection lost: {reason}"),
        }
        self.schedule_reconnect(ClError::Transport(reason)).await;
    }

    async fn on_handshake_timeout(&mut self) {
        self.handshake_deadline = None;
        let timeout = self.config.connection.connect_timeout();
        warn!("handshake did not complete within {}ms", timeout.as_millis());
        self.schedule_reconnect(ClError::Timeout(format!(
            "handshake exceeded {}ms",
            timeout.as_millis()
        )))
        .await;
    }

    async fn on_ping_tick(&mut self) {
        let dead_after = self.config.health.dead_after();
        if self.last_inbound.elapsed() > dead_after {
            warn!(
                "no inbound frames for {}ms, connection considered dead",
                dead_after.as_millis()
            );
            self.schedule_reconnect(ClError::Transport("keep-alive timed out".into()))
                .await;
            return;
        }

        let frame = self.codec.encode_health_check(self.connection_id.as_deref());
        if let Some(link) = self.link.as_mut() {
            if let Err(e) = link.sink.send(frame).await {
                warn!("keep-alive send failed: {e}");
                self.schedule_reconnect(e).await;
                return;
            }
        }
        self.ping_at = Some(Instant::now() + self.config.health.interval());
    }

    /// Tear down the current link and wait out the next backoff delay.
    async fn schedule_reconnect(&mut self, cause: ClError) {
        self.generation += 1;
        self.abort_open();
        self.close_link().await;
        self.handshake_deadline = None;
        self.ping_at = None;
        self.connection_id = None;

        self.reconnect_attempt += 1;
        let attempt = self.reconnect_attempt;
        self.shared.reconnect_attempt.store(attempt, Ordering::SeqCst);

        let max = self.config.reconnect.max_attempts;
        if max > 0 && attempt > max {
            error!("max reconnection attempts ({max}) reached");
            self.fail(ClError::FatalConnection(format!(
                "gave up after {max} reconnection attempts: {cause}"
            )))
            .await;
            return;
        }

        let delay = self.backoff.delay(attempt - 1);
        warn!(
            "reconnection attempt {} in {:.1}s ({cause})",
            attempt,
            delay.as_secs_f64()
        );
        self.set_state(ConnectionState::Reconnecting { attempt, delay });

        if self.host_active {
            self.retry_at = Some(Instant::now() + delay);
        } else {
            info!("reconnection paused while host is inactive");
            self.retry_at = None;
            self.retry_paused = true;
        }
    }

    /// Token rejected by the server during the handshake or on a live link.
    async fn on_token_rejected(&mut self) {
        if self.refresh_task.is_some() || self.refresh_retry_at.is_some() {
            debug!("token refresh already running");
            return;
        }
        if self.provider.is_none() {
            self.fail(ClError::FatalConnection(
                "token rejected and no credential provider is configured".into(),
            ))
            .await;
            return;
        }

        self.set_refresh_in_progress(true);
        self.generation += 1;
        self.abort_open();
        self.close_link().await;
        self.handshake_deadline = None;
        self.ping_at = None;
        self.retry_at = None;
        self.retry_paused = false;
        self.connection_id = None;
        self.set_state(ConnectionState::Connecting);
        self.start_refresh_fetch().await;
    }

    /// Refresh requested from outside, e.g. after an authorized request
    /// came back with an auth error.
    async fn request_token_refresh(&mut self) {
        match self.current_state() {
            ConnectionState::Disconnected | ConnectionState::Failed { .. } => {
                debug!("token refresh requested without an active connection, ignoring");
            }
            _ if self.shared.refresh_in_progress.load(Ordering::SeqCst) => {
                debug!("token refresh already in progress");
            }
            _ if self.provider.is_none() => {
                warn!("token refresh requested but no credential provider is configured");
            }
            _ => self.on_token_rejected().await,
        }
    }

    async fn start_refresh_fetch(&mut self) {
        let max = self.config.auth.max_refresh_attempts;
        if self.refresh_attempts >= max {
            self.fail(ClError::FatalConnection(format!(
                "token refresh limit of {max} attempts reached"
            )))
            .await;
            return;
        }
        let Some(provider) = self.provider.clone() else {
            return;
        };

        self.refresh_attempts += 1;
        info!("refreshing token (attempt {}/{max})", self.refresh_attempts);

        let generation = self.generation;
        let tx = self.internal_tx.clone();
        self.refresh_task = Some(tokio::spawn(async move {
            let result = provider.refresh_token().await;
            let _ = tx.send(Internal::Refreshed { generation, result });
        }));
    }

    async fn fail(&mut self, cause: ClError) {
        error!("connection failed: {cause}");
        self.stop_everything().await;
        self.set_state(ConnectionState::Failed {
            reason: cause.to_string(),
        });
    }

    /// Cancel helpers and timers and close the link.
    async fn stop_everything(&mut self) {
        self.generation += 1;
        self.abort_open();
        if let Some(task) = self.refresh_task.take() {
            task.abort();
        }
        self.close_link().await;
        self.retry_at = None;
        self.handshake_deadline = None;
        self.ping_at = None;
        self.refresh_retry_at = None;
        self.retry_paused = false;
        self.connection_id = None;
        self.reconnect_attempt = 0;
        self.refresh_attempts = 0;
        self.shared.reconnect_attempt.store(0, Ordering::SeqCst);
        self.set_refresh_in_progress(false);
    }

    fn abort_open(&mut self) {
        if let Some(task) = self.open_task.take() {
            task.abort();
        }
    }

    async fn close_link(&mut self) {
        if let Some(mut link) = self.link.take() {
            match tokio::time::timeout(CLOSE_TIMEOUT, link.sink.close()).await {
                Ok(Err(e)) => debug!("error while closing transport: {e}"),
                Err(_) => debug!("transport close timed out"),
                Ok(Ok(())) => {}
            }
        }
    }
}
