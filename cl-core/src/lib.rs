//! Chatlink Core - Foundation types, error handling, configuration, and logging.
//!
//! This crate provides the shared foundation used by the other Chatlink crates:
//! - Client configuration (endpoint, API key, timeouts, backoff policy)
//! - Error taxonomy covering transport, auth, decode and timeout failures
//! - Structured logging with tracing
//! - Platform detection and client identification
//! - Common constants and wire event names

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod platform;

// Re-export commonly used items at the crate root
pub use config::{ClientConfig, ConfigHandle};
pub use error::{ClError, ClResult, ServerErrorCode};
pub use logging::{init_console_logging, init_logging};
pub use platform::Platform;
