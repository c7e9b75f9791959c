//! Authority discovery: where the broker is and where tokens come from.

use crate::error::DiscoveryError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Path of the discovery document, relative to the discovery URL.
pub const DISCOVERY_PATH: &str = "/.well-known/hive-configuration";

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// The discovery document published by an authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryMetadata {
    /// Address hosts connect their broker transport to.
    pub broker_address: String,
    /// Client-credentials token endpoint.
    pub token_endpoint: String,
}

/// Source of discovery metadata.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn fetch(&self) -> Result<DiscoveryMetadata, DiscoveryError>;
}

/// Fetches `{discovery_url}/.well-known/hive-configuration` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpMetadataProvider {
    client: reqwest::Client,
    url: String,
}

impl HttpMetadataProvider {
    /// # Errors
    ///
    /// Returns `DiscoveryError::Network` if the HTTP client cannot be built.
    pub fn new(discovery_url: &str) -> Result<Self, DiscoveryError> {
        let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: format!("{}{}", discovery_url.trim_end_matches('/'), DISCOVERY_PATH),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl MetadataProvider for HttpMetadataProvider {
    async fn fetch(&self) -> Result<DiscoveryMetadata, DiscoveryError> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(DiscoveryError::Status(response.status().as_u16()));
        }
        Ok(response.json().await?)
    }
}

/// Serves metadata known up front, e.g. for an in-process deployment.
#[derive(Debug, Clone)]
pub struct StaticMetadataProvider(pub DiscoveryMetadata);

#[async_trait]
impl MetadataProvider for StaticMetadataProvider {
    async fn fetch(&self) -> Result<DiscoveryMetadata, DiscoveryError> {
        Ok(self.0.clone())
    }
}

/// Exponential retry delays: `initial`, doubling, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(16),
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

/// Handle on one authority, shared by its service and by hosts.
///
/// Discovery metadata is fetched lazily and at most once.
pub struct Authority {
    id: String,
    provider: Arc<dyn MetadataProvider>,
    backoff: Backoff,
    metadata: OnceCell<DiscoveryMetadata>,
}

impl Authority {
    pub fn new(id: impl Into<String>, provider: Arc<dyn MetadataProvider>) -> Self {
        Self {
            id: id.into(),
            provider,
            backoff: Backoff::default(),
            metadata: OnceCell::new(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Fetches discovery metadata, retrying until it succeeds.
    ///
    /// Concurrent callers wait for the same fetch; later calls return the
    /// cached result without touching the provider.
    pub async fn initialize(&self) -> &DiscoveryMetadata {
        self.metadata
            .get_or_init(|| self.fetch_with_retry())
            .await
    }

    /// Metadata, if [`Authority::initialize`] has completed.
    pub fn metadata(&self) -> Option<&DiscoveryMetadata> {
        self.metadata.get()
    }

    pub fn is_initialized(&self) -> bool {
        self.metadata.initialized()
    }

    async fn fetch_with_retry(&self) -> DiscoveryMetadata {
        let mut attempt: u32 = 0;
        loop {
            match self.provider.fetch().await {
                Ok(metadata) => {
                    tracing::info!(
                        authority_id = %self.id,
                        broker_address = %metadata.broker_address,
                        "discovery metadata loaded"
                    );
                    return metadata;
                }
                Err(e) => {
                    let delay = self.backoff.delay(attempt);
                    tracing::warn!(
                        authority_id = %self.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "discovery failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails a fixed number of times, then answers.
    struct FlakyProvider {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl MetadataProvider for FlakyProvider {
        async fn fetch(&self) -> Result<DiscoveryMetadata, DiscoveryError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(DiscoveryError::Status(503));
            }
            Ok(metadata())
        }
    }

    fn metadata() -> DiscoveryMetadata {
        DiscoveryMetadata {
            broker_address: "nats://localhost:4222".into(),
            token_endpoint: "http://localhost:8080/oauth/token".into(),
        }
    }

    #[test]
    fn backoff_doubles_up_to_sixteen_seconds() {
        let backoff = Backoff::default();
        let delays: Vec<u64> = (0..7).map(|a| backoff.delay(a).as_secs()).collect();
        assert_eq!(delays, [1, 2, 4, 8, 16, 16, 16]);
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(16));
    }

    #[test]
    fn http_provider_builds_well_known_url() {
        let provider = HttpMetadataProvider::new("https://auth.example.com/")
            .expect("should build client");
        assert_eq!(
            provider.url(),
            "https://auth.example.com/.well-known/hive-configuration"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn initialize_retries_with_backoff() {
        let provider = Arc::new(FlakyProvider {
            failures: 3,
            calls: AtomicU32::new(0),
        });
        let authority = Authority::new("auth", provider.clone());

        let started = tokio::time::Instant::now();
        let loaded = authority.initialize().await;

        assert_eq!(loaded, &metadata());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
        // 1s + 2s + 4s of backoff.
        assert!(started.elapsed() >= Duration::from_secs(7));
    }

    #[tokio::test]
    async fn initialize_fetches_once() {
        let provider = Arc::new(FlakyProvider {
            failures: 0,
            calls: AtomicU32::new(0),
        });
        let authority = Arc::new(Authority::new("auth", provider.clone()));
        assert!(!authority.is_initialized());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let authority = Arc::clone(&authority);
                tokio::spawn(async move { authority.initialize().await.clone() })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.expect("task should finish"), metadata());
        }
        authority.initialize().await;

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(authority.metadata(), Some(&metadata()));
    }
}
