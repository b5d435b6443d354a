//! Handshake request construction.

use reqwest::Url;
use serde_json::json;

use cl_core::config::ConnectionConfig;
use cl_core::constants::{CLIENT_HEADER, CONNECT_PATH};
use cl_core::error::{ClError, ClResult};
use cl_core::platform::Platform;

use crate::credentials::Credentials;

/// Query parameter carrying the auth type marker.
pub const AUTH_TYPE_PARAM: &str = "stream-auth-type";

/// Everything a transport needs to open the real-time socket.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionRequest {
    pub url: Url,
    pub headers: Vec<(String, String)>,
}

impl ConnectionRequest {
    /// Build the handshake for `credentials` against the configured endpoint.
    ///
    /// The URL carries the API key, the token (when authenticated), the auth
    /// type marker and a JSON blob describing the connecting user.
    pub fn build(config: &ConnectionConfig, credentials: &Credentials) -> ClResult<Self> {
        if config.base_url.is_empty() {
            return Err(ClError::Config("connection.base_url is empty".into()));
        }
        let mut url = Url::parse(&format!("{}/{CONNECT_PATH}", config.base_url))
            .map_err(|e| ClError::Config(format!("invalid base url {}: {e}", config.base_url)))?;

        let mut user_details = serde_json::to_value(&credentials.details)?;
        if let Some(obj) = user_details.as_object_mut() {
            obj.insert("id".into(), json!(credentials.user_id));
        }
        let payload = json!({
            "user_id": credentials.user_id,
            "user_details": user_details,
            "server_determines_connection_id": true,
        });

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("json", &payload.to_string());
            query.append_pair("api_key", &config.api_key);
            if let Some(token) = &credentials.token {
                query.append_pair("authorization", token.as_str());
            }
            query.append_pair(AUTH_TYPE_PARAM, credentials.auth_type().as_str());
        }

        let mut headers = vec![(CLIENT_HEADER.to_string(), Platform::client_identifier())];
        let mut custom: Vec<_> = config.custom_headers.iter().collect();
        custom.sort();
        headers.extend(custom.into_iter().map(|(k, v)| (k.clone(), v.clone())));

        Ok(Self { url, headers })
    }

    /// Value of a query parameter, for diagnostics and tests.
    pub fn query_value(&self, key: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    /// The URL with the token masked, safe for logs.
    pub fn redacted_url(&self) -> String {
        let mut url = self.url.clone();
        let pairs: Vec<(String, String)> = self
            .url
            .query_pairs()
            .map(|(k, v)| {
                let v = if k == "authorization" {
                    "***".to_string()
                } else {
                    v.into_owned()
                };
                (k.into_owned(), v)
            })
            .collect();
        url.query_pairs_mut().clear().extend_pairs(pairs);
        url.to_string()
    }
}
