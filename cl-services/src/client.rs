//! Client context.
//!
//! `ChatClient` owns one connection manager together with the subscription
//! registry, the request coordinator and the derived-state trackers. Hosts
//! create one per logged-in user and pass it around explicitly.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use cl_core::config::ClientConfig;
use cl_core::error::ClResult;
use cl_socket::{
    ChannelId, ConnectionManager, ConnectionState, CredentialProvider, Credentials, Event,
    EventCodec, EventFilter, SessionInfo, SubscriptionHandle, SubscriptionRegistry, Transport,
    WebSocketTransport,
};

use crate::coordinator::RequestCoordinator;
use crate::current_user::CurrentUserTracker;
use crate::service::Service;
use crate::unread::{ChannelUnreadTracker, UnreadCountTracker};
use crate::watchers::WatcherCountTracker;

/// Builder for [`ChatClient`].
pub struct ChatClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    codec: Option<Arc<dyn EventCodec>>,
    provider: Option<Arc<dyn CredentialProvider>>,
}

impl ChatClientBuilder {
    /// Use a transport other than the WebSocket one.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn EventCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Source of refreshed tokens. Without one, a rejected token is fatal.
    pub fn with_credential_provider(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Validate the configuration and start the client's background tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> ClResult<ChatClient> {
        self.config.validate()?;

        let registry = SubscriptionRegistry::new();
        // Trackers register before anything else so they see each event
        // ahead of host subscribers.
        let current_user = Arc::new(CurrentUserTracker::new(&registry));
        let unread = Arc::new(UnreadCountTracker::new(&registry, &current_user));

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(WebSocketTransport::new()),
        };
        let mut builder = ConnectionManager::builder(self.config.clone(), transport)
            .with_registry(registry.clone());
        if let Some(codec) = self.codec {
            builder = builder.with_codec(codec);
        }
        if let Some(provider) = self.provider {
            builder = builder.with_credential_provider(provider);
        }
        let manager = builder.spawn();

        let coordinator =
            RequestCoordinator::new(manager.clone(), self.config.connection.request_timeout());

        let services: Vec<Arc<dyn Service>> = vec![
            current_user.clone(),
            unread.clone(),
            Arc::new(coordinator.clone()),
        ];
        for service in &services {
            info!("registered service: {}", service.name());
        }

        Ok(ChatClient {
            config: self.config,
            registry,
            manager,
            coordinator,
            current_user,
            unread,
            channel_unread: Mutex::new(HashMap::new()),
            watchers: Mutex::new(HashMap::new()),
            services,
        })
    }
}

/// A chat client bound to one server and one user session at a time.
pub struct ChatClient {
    config: ClientConfig,
    registry: SubscriptionRegistry,
    manager: ConnectionManager,
    coordinator: RequestCoordinator,
    current_user: Arc<CurrentUserTracker>,
    unread: Arc<UnreadCountTracker>,
    channel_unread: Mutex<HashMap<ChannelId, Weak<ChannelUnreadTracker>>>,
    watchers: Mutex<HashMap<ChannelId, Weak<WatcherCountTracker>>>,
    /// Services in start order; shut down in reverse.
    services: Vec<Arc<dyn Service>>,
}

impl ChatClient {
    pub fn builder(config: ClientConfig) -> ChatClientBuilder {
        ChatClientBuilder {
            config,
            transport: None,
            codec: None,
            provider: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connect as the user in `credentials`.
    ///
    /// The current user is seeded from the credentials until the server
    /// confirms the session.
    pub async fn connect(
        &self,
        credentials: Credentials,
    ) -> ClResult<watch::Receiver<ConnectionState>> {
        credentials.validate()?;
        if self.current_user.user_id().as_deref() != Some(credentials.user_id.as_str()) {
            self.current_user.set_local_user(credentials.local_user());
        }
        self.manager.connect(credentials).await
    }

    pub async fn disconnect(&self) {
        self.manager.disconnect().await;
    }

    pub async fn refresh_token(&self) -> ClResult<()> {
        self.manager.refresh_token().await
    }

    /// Foreground/background hint from the host.
    pub async fn set_host_active(&self, active: bool) {
        self.manager.set_host_active(active).await;
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.manager.state_receiver()
    }

    pub fn session(&self) -> Option<SessionInfo> {
        self.manager.session()
    }

    pub async fn wait_until_connected(&self, timeout: Duration) -> ClResult<SessionInfo> {
        self.manager.wait_until_connected(timeout).await
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Subscribe to server events matching `filter`.
    pub fn subscribe<F>(&self, filter: EventFilter, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.registry.subscribe(filter, callback)
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Run `operation` against a connected session, waiting for one if
    /// necessary.
    pub async fn run_when_connected<T, F, Fut>(&self, operation: F) -> ClResult<T>
    where
        T: Send + 'static,
        F: Fn(SessionInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ClResult<T>> + Send + 'static,
    {
        self.coordinator.run_when_connected(operation).await
    }

    pub fn coordinator(&self) -> &RequestCoordinator {
        &self.coordinator
    }

    pub fn current_user(&self) -> &CurrentUserTracker {
        &self.current_user
    }

    pub fn unread_count(&self) -> &UnreadCountTracker {
        &self.unread
    }

    /// Unread tracker for `cid`, shared with other callers holding one.
    pub fn channel_unread(&self, cid: &ChannelId) -> Arc<ChannelUnreadTracker> {
        shared_tracker(&self.channel_unread, cid, || {
            ChannelUnreadTracker::new(cid.clone(), &self.registry, &self.current_user)
        })
    }

    /// Watcher count tracker for `cid`, shared with other callers holding one.
    pub fn watcher_count(&self, cid: &ChannelId) -> Arc<WatcherCountTracker> {
        shared_tracker(&self.watchers, cid, || {
            WatcherCountTracker::new(cid.clone(), &self.registry)
        })
    }

    pub fn services(&self) -> &[Arc<dyn Service>] {
        &self.services
    }

    /// True when every owned service reports healthy.
    pub fn is_healthy(&self) -> bool {
        self.services.iter().all(|s| s.is_healthy())
    }

    /// Shut down services in reverse order, then stop the connection.
    pub async fn shutdown(&self) -> ClResult<()> {
        info!("shutting down client");
        for service in self.services.iter().rev() {
            if let Err(e) = service.shutdown() {
                error!("failed to shut down service {}: {e}", service.name());
            }
        }
        self.manager.disconnect().await;
        self.manager.shutdown().await;
        info!("client shut down");
        Ok(())
    }
}

fn shared_tracker<T, F>(
    cache: &Mutex<HashMap<ChannelId, Weak<T>>>,
    cid: &ChannelId,
    create: F,
) -> Arc<T>
where
    F: FnOnce() -> T,
{
    let mut cache = match cache.lock() {
        Ok(cache) => cache,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(existing) = cache.get(cid).and_then(Weak::upgrade) {
        return existing;
    }
    cache.retain(|_, tracker| tracker.strong_count() > 0);
    let tracker = Arc::new(create());
    cache.insert(cid.clone(), Arc::downgrade(&tracker));
    tracker
}
