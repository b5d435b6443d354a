//! Shared test utilities for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cl_core::config::ClientConfig;
use cl_core::error::{ClError, ClResult};
use cl_services::ChatClient;
use cl_socket::{ChannelTransport, CredentialProvider, ServerPeer, Token};
use serde_json::{json, Value};

pub const WAIT: Duration = Duration::from_secs(2);

/// Configuration with short timers so reconnect paths run quickly.
pub fn create_test_config() -> ClientConfig {
    let mut config = ClientConfig::new("ws://localhost:3030", "test-key");
    config.reconnect.base_delay_ms = 10;
    config.reconnect.max_delay_ms = 80;
    config.reconnect.jitter_factor = 0.0;
    config.auth.refresh_retry_delay_ms = 10;
    config
}

/// A client wired to an in-memory transport.
pub fn create_test_client(config: ClientConfig) -> (ChatClient, ChannelTransport) {
    let transport = ChannelTransport::new();
    let client = ChatClient::builder(config)
        .with_transport(Arc::new(transport.clone()))
        .build()
        .expect("failed to build test client");
    (client, transport)
}

/// Same as [`create_test_client`] with a credential provider installed.
pub fn create_test_client_with_provider(
    config: ClientConfig,
    provider: Arc<TestCredentialProvider>,
) -> (ChatClient, ChannelTransport) {
    let transport = ChannelTransport::new();
    let client = ChatClient::builder(config)
        .with_transport(Arc::new(transport.clone()))
        .with_credential_provider(provider)
        .build()
        .expect("failed to build test client");
    (client, transport)
}

/// The `me` object of a first health check.
pub fn me(user_id: &str) -> Value {
    json!({"id": user_id, "name": user_id, "total_unread_count": 0, "unread_channels": 0})
}

/// Accept the next transport open and complete its handshake.
pub async fn accept(transport: &ChannelTransport, connection_id: &str, user: Value) -> ServerPeer {
    let peer = tokio::time::timeout(WAIT, transport.next_peer())
        .await
        .expect("timed out waiting for transport open")
        .expect("transport dropped");
    assert!(peer.send_health_check(connection_id, user).await);
    peer
}

/// Hands out refreshed tokens, or fails when told to.
pub struct TestCredentialProvider {
    tokens: Mutex<Vec<String>>,
    refreshes: AtomicUsize,
    fail: bool,
}

impl TestCredentialProvider {
    /// Yields the given tokens in order on each refresh.
    pub fn with_tokens(tokens: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            tokens: Mutex::new(tokens.iter().rev().map(|t| t.to_string()).collect()),
            refreshes: AtomicUsize::new(0),
            fail: false,
        })
    }

    /// Every refresh fails.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            tokens: Mutex::new(Vec::new()),
            refreshes: AtomicUsize::new(0),
            fail: true,
        })
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for TestCredentialProvider {
    async fn current_token(&self) -> Option<Token> {
        None
    }

    async fn refresh_token(&self) -> ClResult<Token> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ClError::AuthFailed("token endpoint unavailable".into()));
        }
        self.tokens
            .lock()
            .unwrap()
            .pop()
            .map(Token::new)
            .ok_or_else(|| ClError::AuthFailed("no more tokens".into()))
    }
}
