//! The authority service: welcomes hosts and relays entity changes.

use crate::directory::Directory;
use crate::discovery::Authority;
use crate::error::AuthorityError;
use async_trait::async_trait;
use hive_broker::{callback, Broker, CallbackError};
use hive_types::{
    BrokerMessage, ChangeOp, EntityChange, EntityKind, Payload, ProtocolEvent, StampedEvent,
    TopicScheme, WelcomeSnapshot,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Connection state of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Disconnected,
    Initializing,
    Connected,
}

/// What relay handlers may use to reach hosts.
pub struct RelayContext {
    pub broker: Arc<Broker>,
    pub directory: Arc<dyn Directory>,
    pub scheme: TopicScheme,
}

impl RelayContext {
    /// Publishes `event` on each host's topic, sent as the authority.
    ///
    /// # Errors
    ///
    /// Returns the first publish failure; hosts after it are not tried.
    pub async fn publish_to_hosts(
        &self,
        host_ids: &[String],
        event: &ProtocolEvent,
    ) -> Result<(), AuthorityError> {
        let sender = self.scheme.authority_id();
        for host_id in host_ids {
            let message = self
                .broker
                .event(self.scheme.host(sender, host_id), event.clone())?;
            self.broker.publish_async(&message).await?;
            tracing::debug!(host_id = %host_id, event = event.event_type(), "relayed to host");
        }
        Ok(())
    }
}

/// Turns one kind of entity change into protocol events.
#[async_trait]
pub trait ChangeHandler: Send + Sync {
    async fn handle(&self, relay: &RelayContext, change: &EntityChange) -> Result<(), AuthorityError>;
}

/// Relays agent changes to the owning host and to every other host running
/// an agent of the same agency.
///
/// Created (enabled) and enabled agents are announced with
/// `agent_connect`; disabled, updated, and deleted agents with
/// `agent_disconnect`. A deleted agent must be reported before its row is
/// removed, otherwise its host cannot be resolved and the relay is skipped.
pub struct AgentChangeHandler;

#[async_trait]
impl ChangeHandler for AgentChangeHandler {
    async fn handle(&self, relay: &RelayContext, change: &EntityChange) -> Result<(), AuthorityError> {
        let agent_id = change.id.as_str();
        let record = relay.directory.agent(agent_id).await?;

        let event = match change.op {
            ChangeOp::Created | ChangeOp::Enabled => match &record {
                Some(agent) if agent.enabled => ProtocolEvent::agent_connect(agent)?,
                Some(_) => {
                    tracing::debug!(agent_id, op = ?change.op, "agent is disabled, nothing to relay");
                    return Ok(());
                }
                None => {
                    tracing::warn!(agent_id, op = ?change.op, "unknown agent, relay skipped");
                    return Ok(());
                }
            },
            ChangeOp::Disabled | ChangeOp::Updated | ChangeOp::Deleted => {
                ProtocolEvent::AgentDisconnect {
                    agent_id: agent_id.to_string(),
                }
            }
        };

        let Some(owner) = relay.directory.agent_host(agent_id).await? else {
            tracing::warn!(agent_id, op = ?change.op, "agent has no host, relay skipped");
            return Ok(());
        };
        let mut targets = vec![owner];
        if let Some(agent) = &record {
            for host_id in relay.directory.hosts_for_agency(&agent.agency_id).await? {
                if !targets.contains(&host_id) {
                    targets.push(host_id);
                }
            }
        }
        relay.publish_to_hosts(&targets, &event).await
    }
}

struct Inner {
    authority: Arc<Authority>,
    relay: RelayContext,
    state: Mutex<ServiceState>,
    start_lock: tokio::sync::Mutex<()>,
    handlers: RwLock<HashMap<EntityKind, Arc<dyn ChangeHandler>>>,
}

/// The authority side of the protocol.
///
/// Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct AuthorityService {
    inner: Arc<Inner>,
}

impl AuthorityService {
    /// Creates a disconnected service with the agent relay registered.
    ///
    /// # Errors
    ///
    /// Returns `AuthorityError::Topic` if the authority id cannot be used in
    /// topics.
    pub fn new(
        authority: Arc<Authority>,
        broker: Arc<Broker>,
        directory: Arc<dyn Directory>,
    ) -> Result<Self, AuthorityError> {
        let scheme = TopicScheme::new(broker.grammar(), authority.id())?;
        let mut handlers: HashMap<EntityKind, Arc<dyn ChangeHandler>> = HashMap::new();
        handlers.insert(EntityKind::Agent, Arc::new(AgentChangeHandler));
        Ok(Self {
            inner: Arc::new(Inner {
                authority,
                relay: RelayContext {
                    broker,
                    directory,
                    scheme,
                },
                state: Mutex::new(ServiceState::Disconnected),
                start_lock: tokio::sync::Mutex::new(()),
                handlers: RwLock::new(handlers),
            }),
        })
    }

    pub fn authority(&self) -> &Arc<Authority> {
        &self.inner.authority
    }

    pub fn state(&self) -> ServiceState {
        *self.inner.state.lock()
    }

    pub fn scheme(&self) -> &TopicScheme {
        &self.inner.relay.scheme
    }

    /// Installs or replaces the relay for one entity kind.
    pub fn register_handler(&self, kind: EntityKind, handler: Arc<dyn ChangeHandler>) {
        self.inner.handlers.write().insert(kind, handler);
    }

    /// Initializes discovery, connects the broker, and subscribes to the
    /// authority inbox. Retries the connection with the discovery backoff
    /// until it succeeds. A no-op when already connected.
    ///
    /// # Errors
    ///
    /// Returns `AuthorityError::Broker` if the inbox subscription fails.
    pub async fn start(&self, credential: &str) -> Result<(), AuthorityError> {
        let _guard = self.inner.start_lock.lock().await;
        if self.state() == ServiceState::Connected {
            return Ok(());
        }
        *self.inner.state.lock() = ServiceState::Initializing;

        let authority = &self.inner.authority;
        let broker = &self.inner.relay.broker;
        let address = authority.initialize().await.broker_address.clone();
        let backoff = authority.backoff();
        let mut attempt: u32 = 0;
        while let Err(e) = broker.connect(credential, &address).await {
            let delay = backoff.delay(attempt);
            tracing::warn!(
                authority_id = %authority.id(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %e,
                "broker connection failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt = attempt.saturating_add(1);
        }

        let inbox = self.scheme().authority("+").to_string();
        let weak = Arc::downgrade(&self.inner);
        let subscribed = broker
            .subscribe(
                &inbox,
                callback(move |message| {
                    let weak = weak.clone();
                    async move { on_inbox_message(weak, message).await }
                }),
            )
            .await;
        if let Err(e) = subscribed {
            *self.inner.state.lock() = ServiceState::Disconnected;
            return Err(e.into());
        }

        *self.inner.state.lock() = ServiceState::Connected;
        tracing::info!(authority_id = %authority.id(), "authority service connected");
        Ok(())
    }

    /// Disconnects from the broker.
    ///
    /// # Errors
    ///
    /// Returns the broker's error; the state is reset regardless.
    pub async fn stop(&self) -> Result<(), AuthorityError> {
        let _guard = self.inner.start_lock.lock().await;
        *self.inner.state.lock() = ServiceState::Disconnected;
        self.inner.relay.broker.disconnect().await?;
        Ok(())
    }

    /// Relays a change reported by the data layer.
    ///
    /// Changes of a kind without a registered handler are ignored.
    ///
    /// # Errors
    ///
    /// Returns the handler's error.
    pub async fn notify_change(&self, change: &EntityChange) -> Result<(), AuthorityError> {
        let handler = self.inner.handlers.read().get(&change.kind).cloned();
        match handler {
            Some(handler) => handler.handle(&self.inner.relay, change).await,
            None => {
                tracing::debug!(kind = %change.kind, id = %change.id, "no relay for entity kind");
                Ok(())
            }
        }
    }

    /// Publishes `host_welcome` to `host_id`.
    ///
    /// Returns `false` if the host is unknown.
    ///
    /// # Errors
    ///
    /// Returns `AuthorityError` if the directory or the broker fails.
    pub async fn welcome(&self, host_id: &str) -> Result<bool, AuthorityError> {
        welcome(&self.inner, host_id).await
    }
}

async fn welcome(inner: &Inner, host_id: &str) -> Result<bool, AuthorityError> {
    let relay = &inner.relay;
    let Some(host) = relay.directory.host(host_id).await? else {
        tracing::warn!(host_id, "host_connect from unknown host ignored");
        return Ok(false);
    };
    let snapshot = WelcomeSnapshot {
        host,
        plugins: relay.directory.plugins_for_host(host_id).await?,
        agents: relay.directory.agents_for_host(host_id).await?,
    };
    let event = ProtocolEvent::host_welcome(&snapshot)?;
    relay
        .publish_to_hosts(&[host_id.to_string()], &event)
        .await?;
    tracing::info!(
        host_id,
        plugins = snapshot.plugins.len(),
        agents = snapshot.agents.len(),
        "host welcomed"
    );
    Ok(true)
}

async fn on_inbox_message(inner: Weak<Inner>, message: BrokerMessage) -> Result<(), CallbackError> {
    let Some(inner) = inner.upgrade() else {
        return Ok(());
    };
    let Payload::Event(data) = &message.payload else {
        tracing::debug!(topic = %message.topic, "ignoring non-event message in authority inbox");
        return Ok(());
    };
    let stamped = match StampedEvent::from_event_data(data) {
        Ok(stamped) => stamped,
        Err(e) => {
            tracing::warn!(topic = %message.topic, error = %e, "dropping malformed event");
            return Ok(());
        }
    };

    match stamped.event {
        ProtocolEvent::HostConnect { host_id } => {
            if message.topic.sender() != host_id {
                tracing::warn!(
                    host_id = %host_id,
                    sender = %message.topic.sender(),
                    "host_connect sender does not match host id, ignored"
                );
                return Ok(());
            }
            welcome(&inner, &host_id)
                .await
                .map(|_| ())
                .map_err(|e| CallbackError::new(e.to_string()))
        }
        other => {
            tracing::debug!(event = other.event_type(), "ignoring event in authority inbox");
            Ok(())
        }
    }
}
