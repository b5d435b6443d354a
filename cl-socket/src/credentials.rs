//! User credentials and token providers.

use std::fmt;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use cl_core::constants::{AUTH_TYPE_ANONYMOUS, AUTH_TYPE_JWT};
use cl_core::error::{ClError, ClResult};

use crate::events::UserSnapshot;

/// Longest user id the server accepts, in bytes.
pub const MAX_USER_ID_LEN: usize = 255;

lazy_static! {
    static ref USER_ID_PATTERN: Result<Regex, regex::Error> = Regex::new(r"^[\w@.!\-]+$");
}

fn is_valid_user_id(user_id: &str) -> ClResult<bool> {
    let pattern = USER_ID_PATTERN
        .as_ref()
        .map_err(|e| ClError::Internal(format!("user id pattern failed to compile: {e}")))?;
    Ok(user_id.len() <= MAX_USER_ID_LEN && pattern.is_match(user_id))
}

/// Opaque bearer token. Never printed in full.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `user_id` claim, when the token is a JWT that carries one.
    pub fn user_id_claim(&self) -> Option<String> {
        let mut parts = self.0.split('.');
        let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() {
            return None;
        }
        let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
        let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
        claims
            .get("user_id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let visible: String = self.0.chars().take(6).collect();
        write!(f, "Token({visible}...)")
    }
}

/// How a session is authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthType {
    Jwt,
    Anonymous,
}

impl AuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jwt => AUTH_TYPE_JWT,
            Self::Anonymous => AUTH_TYPE_ANONYMOUS,
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Profile fields sent with the handshake.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Identity used to open a connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Credentials {
    pub user_id: String,
    pub details: UserDetails,
    /// `None` opens an anonymous session.
    pub token: Option<Token>,
}

impl Credentials {
    pub fn new(user_id: impl Into<String>, token: Token) -> Self {
        Self {
            user_id: user_id.into(),
            details: UserDetails::default(),
            token: Some(token),
        }
    }

    pub fn anonymous(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            details: UserDetails::default(),
            token: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.details.name = Some(name.into());
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.details.image = Some(image.into());
        self
    }

    pub fn auth_type(&self) -> AuthType {
        if self.token.is_some() {
            AuthType::Jwt
        } else {
            AuthType::Anonymous
        }
    }

    /// Reject credentials that can never produce a session.
    pub fn validate(&self) -> ClResult<()> {
        if !is_valid_user_id(&self.user_id)? {
            return Err(ClError::InvalidCredentials(format!(
                "user id {:?} is empty or contains unsupported characters",
                self.user_id
            )));
        }
        if let Some(token) = &self.token {
            if token.as_str().trim().is_empty() {
                return Err(ClError::InvalidCredentials("token is empty".into()));
            }
            if let Some(claim) = token.user_id_claim() {
                if claim != self.user_id {
                    return Err(ClError::InvalidCredentials(format!(
                        "token was issued for user {claim}, not {}",
                        self.user_id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Locally known user, used until the server sends the authoritative one.
    pub fn local_user(&self) -> UserSnapshot {
        let mut user = UserSnapshot::new(self.user_id.clone());
        user.name = self.details.name.clone();
        user.image = self.details.image.clone();
        user.extra = self.details.extra.clone();
        user
    }
}

/// Source of tokens for an authenticated session.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// The token currently in use, if any.
    async fn current_token(&self) -> Option<Token>;

    /// Obtain a fresh token after the server rejected the current one.
    async fn refresh_token(&self) -> ClResult<Token>;
}

/// Provider for a fixed token that cannot be renewed.
pub struct StaticCredentialProvider {
    token: Token,
}

impl StaticCredentialProvider {
    pub fn new(token: Token) -> Self {
        Self { token }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn current_token(&self) -> Option<Token> {
        Some(self.token.clone())
    }

    async fn refresh_token(&self) -> ClResult<Token> {
        Err(ClError::AuthFailed(
            "static token cannot be refreshed".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt_for(user_id: &str) -> Token {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let claims = URL_SAFE_NO_PAD.encode(format!(r#"{{"user_id":"{user_id}"}}"#));
        Token::new(format!("{header}.{claims}.signature"))
    }

    #[test]
    fn test_user_id_claim() {
        assert_eq!(jwt_for("alice").user_id_claim().as_deref(), Some("alice"));
        assert_eq!(Token::new("opaque-dev-token").user_id_claim(), None);
        assert_eq!(Token::new("a.b.c.d").user_id_claim(), None);
    }

    #[test]
    fn test_validate_accepts_matching_claim() {
        let creds = Credentials::new("alice", jwt_for("alice"));
        assert!(creds.validate().is_ok());
        assert_eq!(creds.auth_type(), AuthType::Jwt);
    }

    #[test]
    fn test_validate_rejects_mismatched_claim() {
        let creds = Credentials::new("alice", jwt_for("mallory"));
        assert!(matches!(
            creds.validate(),
            Err(ClError::InvalidCredentials(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_user_ids() {
        assert!(Credentials::anonymous("").validate().is_err());
        assert!(Credentials::anonymous("has space").validate().is_err());
        assert!(Credentials::anonymous("a/b").validate().is_err());
        assert!(Credentials::anonymous("guest-42@team.io").validate().is_ok());
        assert!(Credentials::anonymous("zoë_ß").validate().is_ok());
    }

    #[test]
    fn test_validate_enforces_user_id_length() {
        let longest = "a".repeat(MAX_USER_ID_LEN);
        assert!(Credentials::anonymous(longest.clone()).validate().is_ok());
        // Repeated calls reuse the compiled pattern.
        assert!(Credentials::anonymous(longest).validate().is_ok());

        let too_long = "a".repeat(MAX_USER_ID_LEN + 1);
        assert!(matches!(
            Credentials::anonymous(too_long).validate(),
            Err(ClError::InvalidCredentials(_))
        ));
    }

    #[test]
    fn test_validate_rejects_blank_token() {
        let creds = Credentials::new("alice", Token::new("  "));
        assert!(creds.validate().is_err());
    }

    #[test]
    fn test_anonymous_auth_type() {
        let creds = Credentials::anonymous("visitor");
        assert_eq!(creds.auth_type(), AuthType::Anonymous);
        assert_eq!(creds.auth_type().to_string(), "anonymous");
    }

    #[test]
    fn test_token_debug_is_redacted() {
        let token = Token::new("supersecretvalue");
        let printed = format!("{token:?}");
        assert!(!printed.contains("secretvalue"));
    }

    #[test]
    fn test_local_user() {
        let user = Credentials::anonymous("visitor")
            .with_name("Visitor")
            .local_user();
        assert_eq!(user.id, "visitor");
        assert_eq!(user.name.as_deref(), Some("Visitor"));
    }

    #[tokio::test]
    async fn test_static_provider_cannot_refresh() {
        let provider = StaticCredentialProvider::new(Token::new("t"));
        assert_eq!(provider.current_token().await, Some(Token::new("t")));
        assert!(provider.refresh_token().await.unwrap_err().is_auth_error());
    }
}
