//! Global error types for the Chatlink client core.
//!
//! Every failure category across the workspace is unified into a single
//! `ClError` enum with conversions from underlying library errors.

use thiserror::Error;

/// Convenience type alias for Results using ClError.
pub type ClResult<T> = Result<T, ClError>;

/// Unified error type covering all error categories in Chatlink.
#[derive(Error, Debug, Clone)]
pub enum ClError {
    // -- Configuration errors --
    /// Failed to load, parse or validate configuration.
    #[error("configuration error: {0}")]
    Config(String),

    // -- Connection errors --
    /// Opening, sending on, or closing the socket failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// Credentials were rejected before any connection attempt was made.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The auth token was expired or rejected by the server.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// An inbound frame could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// An operation or handshake exceeded its deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Reconnection or token refresh attempts are exhausted.
    #[error("fatal connection error: {0}")]
    FatalConnection(String),

    /// No active connection and none will be established.
    #[error("not connected")]
    NotConnected,

    /// Server returned a structured error payload.
    #[error("server error {code} (status {status}): {message}")]
    ServerError {
        /// Wire-level error code.
        code: i32,
        /// HTTP-equivalent status code.
        status: u16,
        /// Error message from server.
        message: String,
    },

    // -- File/IO errors --
    /// File system operation failed.
    #[error("io error: {0}")]
    Io(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    // -- Generic --
    /// An unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Wrapped foreign error for interop.
    #[error("{0}")]
    Other(String),
}

impl ClError {
    /// Whether this error means the session credentials must be refreshed.
    pub fn is_auth_error(&self) -> bool {
        match self {
            ClError::AuthFailed(_) => true,
            ClError::ServerError { code, status, .. } => {
                ServerErrorCode::from_code(*code).is_token_error() || *status == 401
            }
            _ => false,
        }
    }

    /// Whether the failure is transient and worth another connection attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClError::Transport(_) | ClError::Timeout(_) => true,
            ClError::ServerError { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Build a `ServerError` from its wire parts.
    pub fn server(code: i32, status: u16, message: impl Into<String>) -> Self {
        ClError::ServerError {
            code,
            status,
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for ClError {
    fn from(e: std::io::Error) -> Self {
        ClError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for ClError {
    fn from(e: serde_json::Error) -> Self {
        ClError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for ClError {
    fn from(e: toml::de::Error) -> Self {
        ClError::Config(e.to_string())
    }
}

impl From<anyhow::Error> for ClError {
    fn from(e: anyhow::Error) -> Self {
        ClError::Other(format!("{e:#}"))
    }
}

/// Server error codes carried in error payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(i32)]
pub enum ServerErrorCode {
    /// Unclassified server-side failure.
    Internal = -1,
    /// Malformed request input.
    InputError = 4,
    /// Too many requests.
    RateLimited = 9,
    /// Referenced resource does not exist.
    NotFound = 16,
    /// The user is not allowed to perform this action.
    NotAllowed = 17,
    /// The auth token has expired.
    TokenExpired = 40,
    /// The token signature did not verify.
    TokenSignatureInvalid = 41,
    /// The token was used before its issue time.
    TokenNotYetValid = 42,
    /// The token is malformed or revoked.
    TokenInvalid = 43,
    /// Unknown error code.
    Unknown = 9999,
}

impl ServerErrorCode {
    /// Convert an integer code to a ServerErrorCode variant.
    pub fn from_code(code: i32) -> Self {
        match code {
            -1 => Self::Internal,
            4 => Self::InputError,
            9 => Self::RateLimited,
            16 => Self::NotFound,
            17 => Self::NotAllowed,
            40 => Self::TokenExpired,
            41 => Self::TokenSignatureInvalid,
            42 => Self::TokenNotYetValid,
            43 => Self::TokenInvalid,
            _ => Self::Unknown,
        }
    }

    /// Get the integer code for this error.
    pub fn code(&self) -> i32 {
        *self as i32
    }

    /// Codes 40..=43 mean the token must be replaced.
    pub fn is_token_error(&self) -> bool {
        matches!(
            self,
            Self::TokenExpired
                | Self::TokenSignatureInvalid
                | Self::TokenNotYetValid
                | Self::TokenInvalid
        )
    }
}
