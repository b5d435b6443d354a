//! Chatlink Socket - real-time connection to the chat server.
//!
//! Handles:
//! - WebSocket transport (plus an in-memory transport for tests)
//! - Handshake construction and credential validation
//! - Connection lifecycle with backoff reconnection, keep-alive and token refresh
//! - Frame decoding into typed events
//! - Ordered event dispatch to filtered subscribers

pub mod backoff;
pub mod codec;
pub mod credentials;
pub mod events;
pub mod manager;
pub mod memory;
pub mod registry;
pub mod request;
pub mod state;
pub mod transport;

pub use backoff::BackoffPolicy;
pub use codec::{EventCodec, Frame, JsonEventCodec, ServerErrorPayload};
pub use credentials::{
    AuthType, CredentialProvider, Credentials, StaticCredentialProvider, Token, UserDetails,
};
pub use events::{ChannelId, Event, EventKind, UnreadTotals, UserSnapshot};
pub use manager::{ConnectionManager, ConnectionManagerBuilder};
pub use memory::{ChannelTransport, OpenBehavior, ServerPeer};
pub use registry::{EventFilter, SubscriptionBag, SubscriptionHandle, SubscriptionRegistry};
pub use request::ConnectionRequest;
pub use state::{ConnectionState, SessionInfo};
pub use transport::{CloseKind, Transport, TransportConnection, TransportEvent, TransportSink, WebSocketTransport};
