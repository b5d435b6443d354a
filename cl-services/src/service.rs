//! Components owned by a `ChatClient`.
//!
//! The coordinator and the global trackers implement `Service`, so the client
//! can report their health and stop them in one pass on shutdown.

use std::fmt;

use cl_core::error::ClResult;

/// Whether a client-owned component is still doing work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Running,
    /// Shut down; background work and registry subscriptions are gone.
    Stopped,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
        })
    }
}

pub trait Service: Send + Sync {
    /// Stable name used in logs.
    fn name(&self) -> &str;

    fn state(&self) -> ServiceState;

    /// Stop background work and drop registry subscriptions. Idempotent.
    fn shutdown(&self) -> ClResult<()>;

    fn is_healthy(&self) -> bool {
        self.state() == ServiceState::Running
    }
}
