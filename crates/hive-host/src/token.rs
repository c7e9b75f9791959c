//! Client-credentials token exchange.

use crate::error::TokenError;
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Response of the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Obtains the credential a host presents to the broker.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self, token_endpoint: &str) -> Result<AccessToken, TokenError>;
}

/// POSTs `grant_type=client_credentials&scope=connect` with HTTP Basic
/// authentication as `(host_id, secret)`.
#[derive(Clone)]
pub struct HttpTokenClient {
    client: reqwest::Client,
    host_id: String,
    secret: String,
}

impl HttpTokenClient {
    /// # Errors
    ///
    /// Returns `TokenError::Network` if the HTTP client cannot be built.
    pub fn new(host_id: impl Into<String>, secret: impl Into<String>) -> Result<Self, TokenError> {
        let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            client,
            host_id: host_id.into(),
            secret: secret.into(),
        })
    }
}

impl fmt::Debug for HttpTokenClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTokenClient")
            .field("host_id", &self.host_id)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl TokenProvider for HttpTokenClient {
    async fn token(&self, token_endpoint: &str) -> Result<AccessToken, TokenError> {
        let response = self
            .client
            .post(token_endpoint)
            .basic_auth(&self.host_id, Some(&self.secret))
            .form(&[("grant_type", "client_credentials"), ("scope", "connect")])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(TokenError::Status(response.status().as_u16()));
        }
        Ok(response.json().await?)
    }
}

/// Hands out a fixed token. Used with the in-process hub.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider(pub String);

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self, _token_endpoint: &str) -> Result<AccessToken, TokenError> {
        Ok(AccessToken {
            access_token: self.0.clone(),
            token_type: Some("Bearer".to_string()),
            expires_in: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_response_tolerates_missing_optional_fields() {
        let token: AccessToken =
            serde_json::from_str(r#"{"access_token":"abc"}"#).expect("should parse");
        assert_eq!(token.access_token, "abc");
        assert_eq!(token.expires_in, None);
    }

    #[test]
    fn debug_output_redacts_secret() {
        let client = HttpTokenClient::new("h1", "hunter2").expect("should build client");
        let debug = format!("{client:?}");
        assert!(debug.contains("h1"));
        assert!(!debug.contains("hunter2"));
    }
}
