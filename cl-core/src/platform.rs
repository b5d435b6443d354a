//! Platform detection and OS-specific utilities.

use std::path::PathBuf;
use crate::error::{ClError, ClResult};

/// Detected operating system platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
}

impl Platform {
    /// Detect the current platform at compile time.
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }

    /// Get the platform-specific application data directory.
    ///
    /// - Windows: `%APPDATA%/Chatlink`
    /// - macOS: `~/Library/Application Support/Chatlink`
    /// - Linux: `~/.local/share/Chatlink`
    pub fn data_dir() -> ClResult<PathBuf> {
        let base = dirs::data_dir()
            .ok_or_else(|| ClError::Config("could not determine data directory".into()))?;
        Ok(base.join("Chatlink"))
    }

    /// Get the platform-specific configuration directory.
    pub fn config_dir() -> ClResult<PathBuf> {
        let base = dirs::config_dir()
            .ok_or_else(|| ClError::Config("could not determine config directory".into()))?;
        Ok(base.join("Chatlink"))
    }

    /// Get a short platform identifier used in client identification.
    pub fn name(&self) -> &'static str {
        match self {
            Platform::Windows => "windows",
            Platform::MacOs => "macos",
            Platform::Linux => "linux",
        }
    }

    /// Get the system hostname for device identification.
    pub fn hostname() -> String {
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "chatlink-client".to_string())
    }

    /// Value for the client identification header sent on every handshake.
    pub fn client_identifier() -> String {
        format!(
            "{}-rust-v{}|os={}|device={}",
            crate::constants::APP_NAME,
            crate::constants::APP_VERSION,
            Self::current().name(),
            Self::hostname()
        )
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
