//! Client configuration management.
//!
//! Handles loading, saving, validating and sharing the client configuration:
//! server endpoint and API key, timeouts, reconnection policy, keep-alive and
//! token refresh limits. Configuration is persisted as TOML on disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{ClError, ClResult};
use crate::platform::Platform;

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server endpoint and request settings.
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Reconnection backoff policy.
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Keep-alive settings.
    #[serde(default)]
    pub health: HealthCheckConfig,

    /// Token refresh settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Real-time endpoint base (e.g. "wss://chat.example.com").
    #[serde(default)]
    pub base_url: String,

    /// Application API key sent with every handshake.
    #[serde(default)]
    pub api_key: String,

    /// Custom headers attached to the socket upgrade request.
    #[serde(default)]
    pub custom_headers: HashMap<String, String>,

    /// Deadline for opening the socket and receiving the first health check.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Deadline for each connected request.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

/// Reconnection backoff configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Maximum delay cap for exponential backoff.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Maximum number of reconnection attempts (0 = unlimited).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Upward jitter factor (0.0 to 0.99) applied to each delay.
    #[serde(default = "default_jitter")]
    pub jitter_factor: f64,
}

/// Keep-alive configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Interval between outbound health check frames.
    #[serde(default = "default_health_interval")]
    pub interval_ms: u64,

    /// Extra grace after an interval with no inbound frame before the
    /// connection is considered dead.
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_ms: u64,
}

/// Token refresh configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Attempts at refreshing a token before giving up.
    #[serde(default = "default_max_refresh_attempts")]
    pub max_refresh_attempts: u32,

    /// Delay before a failed refresh is retried (doubles each time).
    #[serde(default = "default_refresh_delay")]
    pub refresh_retry_delay_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for log files. If empty, uses default location.
    #[serde(default)]
    pub directory: String,

    /// Enable JSON structured logging output.
    #[serde(default)]
    pub json_output: bool,
}

// Default value functions for serde

fn default_connect_timeout() -> u64 {
    15_000
}

fn default_request_timeout() -> u64 {
    30_000
}

fn default_base_delay() -> u64 {
    500
}

fn default_max_delay() -> u64 {
    25_000
}

fn default_max_attempts() -> u32 {
    0
}

fn default_jitter() -> f64 {
    0.3
}

fn default_health_interval() -> u64 {
    30_000
}

fn default_pong_timeout() -> u64 {
    10_000
}

fn default_max_refresh_attempts() -> u32 {
    3
}

fn default_refresh_delay() -> u64 {
    1_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            custom_headers: HashMap::new(),
            connect_timeout_ms: default_connect_timeout(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            max_attempts: default_max_attempts(),
            jitter_factor: default_jitter(),
        }
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_health_interval(),
            pong_timeout_ms: default_pong_timeout(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            max_refresh_attempts: default_max_refresh_attempts(),
            refresh_retry_delay_ms: default_refresh_delay(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: String::new(),
            json_output: false,
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl ReconnectConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Silence allowed before the connection is declared dead.
    pub fn dead_after(&self) -> Duration {
        Duration::from_millis(self.interval_ms + self.pong_timeout_ms)
    }
}

impl AuthConfig {
    pub fn refresh_retry_delay(&self) -> Duration {
        Duration::from_millis(self.refresh_retry_delay_ms)
    }
}

impl ClientConfig {
    /// Create a configuration for the given endpoint and API key.
    pub fn new(base_url: &str, api_key: &str) -> Self {
        let mut config = Self::default();
        config.connection.base_url = Self::sanitize_base_url(base_url);
        config.connection.api_key = api_key.trim().to_string();
        config
    }

    /// Load configuration from the default config file path.
    pub fn load_default() -> ClResult<Self> {
        let path = Self::default_config_path()?;
        if path.exists() {
            Self::load_from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> ClResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: ClientConfig = toml::from_str(&contents)?;
        config.connection.base_url = Self::sanitize_base_url(&config.connection.base_url);
        Ok(config)
    }

    /// Save configuration to the default config file path.
    pub fn save_default(&self) -> ClResult<()> {
        let path = Self::default_config_path()?;
        self.save_to_file(&path)
    }

    /// Save configuration to a specific file path.
    pub fn save_to_file(&self, path: &Path) -> ClResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ClError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> ClResult<PathBuf> {
        let config_dir = Platform::config_dir()?;
        Ok(config_dir.join("config.toml"))
    }

    /// Get the effective log directory, using the configured path or the default.
    pub fn effective_log_dir(&self) -> ClResult<PathBuf> {
        if self.logging.directory.is_empty() {
            let data_dir = Platform::data_dir()?;
            Ok(data_dir.join("logs"))
        } else {
            Ok(PathBuf::from(&self.logging.directory))
        }
    }

    /// Check that the configuration can be used to open a connection.
    pub fn validate(&self) -> ClResult<()> {
        if self.connection.base_url.is_empty() {
            return Err(ClError::Config("connection.base_url is empty".into()));
        }
        if self.connection.api_key.is_empty() {
            return Err(ClError::Config("connection.api_key is empty".into()));
        }
        if !(0.0..1.0).contains(&self.reconnect.jitter_factor) {
            return Err(ClError::Config(format!(
                "reconnect.jitter_factor must be in [0, 1), got {}",
                self.reconnect.jitter_factor
            )));
        }
        if self.reconnect.base_delay_ms > self.reconnect.max_delay_ms {
            return Err(ClError::Config(
                "reconnect.base_delay_ms exceeds reconnect.max_delay_ms".into(),
            ));
        }
        Ok(())
    }

    /// Sanitize and normalize a real-time endpoint address.
    ///
    /// Maps http(s) schemes to ws(s), defaults bare hosts to wss, and strips
    /// surrounding quotes and trailing slashes.
    pub fn sanitize_base_url(address: &str) -> String {
        let trimmed = address.trim().trim_matches('"').trim();
        if trimmed.is_empty() {
            return String::new();
        }

        let with_scheme = if let Some(rest) = trimmed.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = trimmed.strip_prefix("http://") {
            format!("ws://{rest}")
        } else if trimmed.starts_with("ws://") || trimmed.starts_with("wss://") {
            trimmed.to_string()
        } else if trimmed.starts_with("localhost") || trimmed.starts_with("127.0.0.1") {
            format!("ws://{trimmed}")
        } else {
            format!("wss://{trimmed}")
        };

        with_scheme.trim_end_matches('/').to_string()
    }
}

/// Thread-safe configuration holder for shared access across components.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<ClientConfig>>,
}

impl ConfigHandle {
    /// Create a new configuration handle.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Read the configuration.
    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, ClientConfig> {
        self.inner.read().await
    }

    /// Write/update the configuration.
    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, ClientConfig> {
        self.inner.write().await
    }

    /// Clone out the current configuration.
    pub async fn snapshot(&self) -> ClientConfig {
        self.inner.read().await.clone()
    }

    /// Save the current configuration to disk.
    pub async fn save(&self) -> ClResult<()> {
        let config = self.inner.read().await;
        config.save_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.connection.request_timeout_ms, 30_000);
        assert_eq!(config.reconnect.max_attempts, 0);
        assert_eq!(config.auth.max_refresh_attempts, 3);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sanitize_base_url() {
        assert_eq!(
            ClientConfig::sanitize_base_url("chat.example.com"),
            "wss://chat.example.com"
        );
        assert_eq!(
            ClientConfig::sanitize_base_url("https://chat.example.com/"),
            "wss://chat.example.com"
        );
        assert_eq!(
            ClientConfig::sanitize_base_url("  \"http://10.0.0.2:3030/\"  "),
            "ws://10.0.0.2:3030"
        );
        assert_eq!(
            ClientConfig::sanitize_base_url("localhost:3030"),
            "ws://localhost:3030"
        );
        assert_eq!(ClientConfig::sanitize_base_url("   "), "");
    }

    #[test]
    fn test_validate() {
        let config = ClientConfig::new("chat.example.com", "key-123");
        assert!(config.validate().is_ok());

        let mut bad = config.clone();
        bad.reconnect.jitter_factor = 1.5;
        assert!(matches!(bad.validate(), Err(ClError::Config(_))));

        let mut bad = config;
        bad.reconnect.base_delay_ms = 60_000;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_roundtrip_toml_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = ClientConfig::new("chat.example.com", "key-123");
        config.reconnect.max_attempts = 7;
        config.save_to_file(&path).unwrap();

        let loaded = ClientConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.connection.base_url, "wss://chat.example.com");
        assert_eq!(loaded.reconnect.max_attempts, 7);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: ClientConfig = toml::from_str(
            r#"
            [connection]
            base_url = "wss://chat.example.com"
            api_key = "abc"
            "#,
        )
        .unwrap();
        assert_eq!(config.connection.connect_timeout_ms, 15_000);
        assert_eq!(config.health.interval(), Duration::from_secs(30));
        assert_eq!(config.health.dead_after(), Duration::from_secs(40));
    }

    #[tokio::test]
    async fn test_config_handle_write() {
        let handle = ConfigHandle::new(ClientConfig::default());
        handle.write().await.connection.api_key = "changed".into();
        assert_eq!(handle.snapshot().await.connection.api_key, "changed");
    }
}
