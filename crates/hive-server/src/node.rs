//! Process wiring: one store, one evaluator, and the authority and host
//! components this process runs.

use crate::config::{Config, TransportKind};
use crate::error::ServerError;
use crate::hook::EvaluatorHook;
use crate::store::SqliteStore;
use crate::AppState;
use hive_acl::{AccessEvaluator, RelationshipOracle};
use hive_authority::{
    Authority, AuthorityService, DiscoveryMetadata, HttpMetadataProvider, MetadataProvider,
    StaticMetadataProvider,
};
use hive_broker::{
    Broker, MemoryHub, NatsTransport, RefreshPolicy, SntpTimeSource, TimeSource, Transport,
    TrustedClock,
};
use hive_host::{Host, HostConfig, HttpTokenClient, StaticTokenProvider, TokenProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Broker address advertised for the in-process hub.
pub const MEMORY_ADDRESS: &str = "memory";

/// Everything one server process runs.
pub struct Node {
    config: Config,
    state: AppState,
    store: SqliteStore,
    clock: TrustedClock,
    hub: Option<Arc<MemoryHub>>,
    service: Option<AuthorityService>,
    host: Option<Arc<Host>>,
}

impl Node {
    /// Opens the store and builds every configured component. Nothing
    /// connects until [`Node::start`].
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if the store cannot be opened, no discovery
    /// source is configured for a NATS deployment, or a component rejects
    /// its configuration.
    pub fn build(config: Config) -> Result<Self, ServerError> {
        let pool = hive_db::open_store(&config.database.path, config.database.runtime_settings())?;
        let store = SqliteStore::new(pool);
        let grammar = config.broker.grammar;
        let clock = TrustedClock::new();

        let oracle: Arc<dyn RelationshipOracle> = Arc::new(store.clone());
        let evaluator = Arc::new(AccessEvaluator::new(grammar, &config.authority.id, oracle));
        let hub = match config.broker.transport {
            TransportKind::Memory => Some(MemoryHub::with_access_hook(Arc::new(
                EvaluatorHook::new(Arc::clone(&evaluator), &config.authority.credential),
            ))),
            TransportKind::Nats => None,
        };

        let discovery = config.discovery.metadata();
        let provider: Arc<dyn MetadataProvider> = match (&config.authority.discovery_url, &discovery)
        {
            (Some(url), _) => Arc::new(HttpMetadataProvider::new(url)?),
            (None, Some(metadata)) => Arc::new(StaticMetadataProvider(metadata.clone())),
            (None, None) if hub.is_some() => Arc::new(StaticMetadataProvider(DiscoveryMetadata {
                broker_address: MEMORY_ADDRESS.to_string(),
                token_endpoint: MEMORY_ADDRESS.to_string(),
            })),
            (None, None) => return Err(ServerError::NoDiscovery),
        };
        let authority = Arc::new(Authority::new(&config.authority.id, provider));

        let new_broker = || {
            let transport: Arc<dyn Transport> = match &hub {
                Some(hub) => Arc::new(hub.transport()),
                None => Arc::new(NatsTransport::new()),
            };
            Arc::new(Broker::new(transport, grammar, clock.clone()))
        };

        let service = if config.authority.enabled {
            let directory = Arc::new(store.clone());
            Some(AuthorityService::new(
                Arc::clone(&authority),
                new_broker(),
                directory,
            )?)
        } else {
            None
        };

        let host = match &config.host {
            Some(settings) => {
                let tokens: Arc<dyn TokenProvider> = match config.broker.transport {
                    TransportKind::Memory => Arc::new(StaticTokenProvider(settings.id.clone())),
                    TransportKind::Nats => Arc::new(HttpTokenClient::new(
                        settings.id.clone(),
                        settings.secret.clone(),
                    )?),
                };
                let host_config = HostConfig {
                    host_id: settings.id.clone(),
                    claim_window: settings.claim_window(),
                    retry_delay: settings.retry_delay(),
                };
                Some(Arc::new(Host::new(
                    host_config,
                    Arc::clone(&authority),
                    new_broker(),
                    tokens,
                )?))
            }
            None => None,
        };

        let state = AppState {
            evaluator,
            discovery,
        };
        Ok(Self {
            config,
            state,
            store,
            clock,
            hub,
            service,
            host,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn hub(&self) -> Option<&Arc<MemoryHub>> {
        self.hub.as_ref()
    }

    pub fn service(&self) -> Option<&AuthorityService> {
        self.service.as_ref()
    }

    pub fn host(&self) -> Option<&Arc<Host>> {
        self.host.as_ref()
    }

    /// Starts clock synchronization in the background, then the authority
    /// service followed by the host. Each retries on its own until it
    /// succeeds.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();

        if !self.config.clock.sources.is_empty() {
            let sources: Vec<Arc<dyn TimeSource>> = self
                .config
                .clock
                .sources
                .iter()
                .map(|address| Arc::new(SntpTimeSource::new(address.clone())) as Arc<dyn TimeSource>)
                .collect();
            let policy = RefreshPolicy {
                interval: Duration::from_secs(self.config.clock.refresh_interval_secs),
                ..RefreshPolicy::default()
            };
            tasks.push(self.clock.spawn_refresh(sources, policy));
        }

        // The host's connect request is only answered once the authority
        // inbox is subscribed.
        let service = self.service.clone();
        let host = self.host.clone();
        let credential = self.config.authority.credential.clone();
        tasks.push(tokio::spawn(async move {
            if let Some(service) = service {
                if let Err(e) = service.start(&credential).await {
                    tracing::error!(error = %e, "authority service failed to start");
                    return;
                }
            }
            if let Some(host) = host {
                if let Err(e) = host.start().await {
                    tracing::warn!(host_id = %host.id(), error = %e, "host did not start");
                }
            }
        }));
        tasks
    }

    /// Stops the host, then the authority service.
    pub async fn shutdown(&self) {
        if let Some(host) = &self.host {
            if let Err(e) = host.stop().await {
                tracing::warn!(host_id = %host.id(), error = %e, "host stop failed");
            }
        }
        if let Some(service) = &self.service {
            if let Err(e) = service.stop().await {
                tracing::warn!(error = %e, "authority service stop failed");
            }
        }
    }
}
