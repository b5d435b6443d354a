//! Connection lifecycle state and the session produced by a handshake.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::AUTHORIZATION;
use reqwest::RequestBuilder;

use crate::credentials::{AuthType, Token};
use crate::events::UserSnapshot;
use crate::request::AUTH_TYPE_PARAM;

/// Data established by a successful handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    /// Server-assigned connection id.
    pub connection_id: String,
    /// Authoritative current user from the first health check.
    pub user: UserSnapshot,
    pub api_key: String,
    pub auth_type: AuthType,
    pub connected_at: DateTime<Utc>,
    token: Option<Token>,
}

impl SessionInfo {
    pub fn new(
        connection_id: String,
        user: UserSnapshot,
        api_key: String,
        token: Option<Token>,
    ) -> Self {
        let auth_type = if token.is_some() {
            AuthType::Jwt
        } else {
            AuthType::Anonymous
        };
        Self {
            connection_id,
            user,
            api_key,
            auth_type,
            connected_at: Utc::now(),
            token,
        }
    }

    pub fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    /// Attach the session's credentials to an outbound HTTP request.
    pub fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request
            .query(&[
                ("api_key", self.api_key.as_str()),
                ("connection_id", self.connection_id.as_str()),
            ])
            .header(AUTH_TYPE_PARAM, self.auth_type.as_str());
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, token.as_str()),
            None => request,
        }
    }
}

/// Connection lifecycle state, owned by the connection actor.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected(SessionInfo),
    Disconnecting,
    /// Waiting `delay` before attempt number `attempt`.
    Reconnecting { attempt: u32, delay: Duration },
    /// Gave up; only an explicit connect leaves this state.
    Failed { reason: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }

    pub fn session(&self) -> Option<&SessionInfo> {
        match self {
            Self::Connected(session) => Some(session),
            _ => None,
        }
    }

    /// Whether a connection exists or is being worked on.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Connected(_) | Self::Reconnecting { .. }
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected(session) => write!(f, "connected({})", session.connection_id),
            Self::Disconnecting => write!(f, "disconnecting"),
            Self::Reconnecting { attempt, delay } => {
                write!(f, "reconnecting(attempt {attempt}, in {}ms)", delay.as_millis())
            }
            Self::Failed { reason } => write!(f, "failed({reason})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(token: Option<Token>) -> SessionInfo {
        SessionInfo::new(
            "conn-1".into(),
            UserSnapshot::new("alice"),
            "key-123".into(),
            token,
        )
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
        assert_eq!(
            ConnectionState::Connected(session(None)).to_string(),
            "connected(conn-1)"
        );
        assert_eq!(
            ConnectionState::Reconnecting {
                attempt: 2,
                delay: Duration::from_millis(1500)
            }
            .to_string(),
            "reconnecting(attempt 2, in 1500ms)"
        );
    }

    #[test]
    fn test_state_predicates() {
        assert!(ConnectionState::Connecting.is_active());
        assert!(!ConnectionState::Disconnected.is_active());
        assert!(ConnectionState::Failed { reason: "x".into() }.is_failed());
        assert!(ConnectionState::Connected(session(None)).session().is_some());
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_authorize_jwt_session() {
        let client = reqwest::Client::new();
        let request = session(Some(Token::new("tok-abc")))
            .authorize(client.get("https://chat.example.com/channels"))
            .build()
            .unwrap();

        let query = request.url().query().unwrap();
        assert!(query.contains("api_key=key-123"));
        assert!(query.contains("connection_id=conn-1"));
        assert_eq!(request.headers()[AUTHORIZATION], "tok-abc");
        assert_eq!(request.headers()[AUTH_TYPE_PARAM], "jwt");
    }

    #[test]
    fn test_authorize_anonymous_session() {
        let client = reqwest::Client::new();
        let request = session(None)
            .authorize(client.get("https://chat.example.com/channels"))
            .build()
            .unwrap();
        assert!(request.headers().get(AUTHORIZATION).is_none());
        assert_eq!(request.headers()[AUTH_TYPE_PARAM], "anonymous");
    }
}
