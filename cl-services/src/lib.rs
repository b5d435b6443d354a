//! Chatlink Services - request coordination, derived state and client context.
//!
//! This crate builds on the socket layer:
//! - Request coordinator (run-when-connected, FIFO replay, one auth retry)
//! - Observable values with replay-current-then-stream delivery
//! - Derived-state trackers (unread totals, per-channel unread, watchers, current user)
//! - Service trait for owned components
//! - `ChatClient` context tying the pieces together

pub mod client;
pub mod coordinator;
pub mod current_user;
pub mod observable;
mod scoped;
pub mod service;
pub mod unread;
pub mod watchers;

pub use client::{ChatClient, ChatClientBuilder};
pub use coordinator::RequestCoordinator;
pub use current_user::CurrentUserTracker;
pub use observable::{Observable, ObserverHandle, WeakObservable};
pub use service::{Service, ServiceState};
pub use unread::{ChannelUnreadTracker, UnreadCountTracker};
pub use watchers::WatcherCountTracker;
