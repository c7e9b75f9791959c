//! Host bootstrap and the per-host lifecycle actor.

use crate::agency::Agency;
use crate::agent::{Agent, DEFAULT_CLAIM_WINDOW};
use crate::error::HostError;
use crate::events::HostEvent;
use crate::token::TokenProvider;
use hive_authority::Authority;
use hive_broker::{callback, Broker, Callback, CallbackError};
use hive_types::{
    AgentRecord, BrokerMessage, Grammar, Payload, PluginRecord, ProtocolEvent, StampedEvent,
    TopicError, TopicScheme, WelcomeSnapshot,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

/// Delay between two bootstrap attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct HostConfig {
    pub host_id: String,
    pub claim_window: Duration,
    pub retry_delay: Duration,
}

impl HostConfig {
    pub fn new(host_id: impl Into<String>) -> Self {
        Self {
            host_id: host_id.into(),
            claim_window: DEFAULT_CLAIM_WINDOW,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Disconnected,
    Connecting,
    Connected,
    Stopped,
}

enum Command {
    Welcome(WelcomeSnapshot),
    AgentConnect(AgentRecord),
    AgentDisconnect(String),
    AgentIds(oneshot::Sender<Vec<String>>),
    RemoteAgentIds(oneshot::Sender<Vec<String>>),
    AgencyIds(oneshot::Sender<Vec<String>>),
    Plugins(oneshot::Sender<Vec<PluginRecord>>),
    Agent(String, oneshot::Sender<Option<Arc<Agent>>>),
    Agency(String, oneshot::Sender<Option<Arc<Agency>>>),
    Stop(oneshot::Sender<()>),
}

/// A host: connects to the authority, receives its agents, and runs them.
///
/// Protocol events from the authority are queued to a single actor task
/// that owns the plugin, agency, and agent maps.
pub struct Host {
    config: HostConfig,
    scheme: TopicScheme,
    authority: Arc<Authority>,
    broker: Arc<Broker>,
    tokens: Arc<dyn TokenProvider>,
    state: Mutex<HostState>,
    connect_lock: tokio::sync::Mutex<()>,
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<HostEvent>,
    actor: Mutex<Option<JoinHandle<()>>>,
}

impl Host {
    /// Creates a disconnected host and spawns its actor. Must be called
    /// within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `HostError::Topic` if the broker does not use the nested
    /// grammar, which agency topics need, or if the authority id is not a
    /// valid identifier.
    pub fn new(
        config: HostConfig,
        authority: Arc<Authority>,
        broker: Arc<Broker>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self, HostError> {
        if broker.grammar() != Grammar::Nested {
            return Err(TopicError::NoAgencySegment(broker.grammar()).into());
        }
        let scheme = TopicScheme::new(broker.grammar(), authority.id())?;
        let (commands, inbox) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let actor = HostActor {
            host_id: config.host_id.clone(),
            scheme: scheme.clone(),
            broker: Arc::clone(&broker),
            claim_window: config.claim_window,
            events: events.clone(),
            plugins: BTreeMap::new(),
            agencies: BTreeMap::new(),
            agents: BTreeMap::new(),
            remote: BTreeMap::new(),
        };
        let handle = tokio::spawn(actor.run(inbox));

        Ok(Self {
            config,
            scheme,
            authority,
            broker,
            tokens,
            state: Mutex::new(HostState::Disconnected),
            connect_lock: tokio::sync::Mutex::new(()),
            commands,
            events,
            actor: Mutex::new(Some(handle)),
        })
    }

    pub fn id(&self) -> &str {
        &self.config.host_id
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn state(&self) -> HostState {
        *self.state.lock()
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    fn subscriptions(&self) -> [String; 2] {
        [
            self.scheme.all_hosts("+").to_string(),
            self.scheme.host("+", self.id()).to_string(),
        ]
    }

    /// Bootstraps the host, retrying every `retry_delay` until it succeeds
    /// or the host is stopped.
    ///
    /// # Errors
    ///
    /// Returns `HostError::Stopped` once the host has been stopped.
    pub async fn start(&self) -> Result<(), HostError> {
        let mut attempt: u32 = 0;
        loop {
            match self.connect().await {
                Ok(()) => return Ok(()),
                Err(HostError::Stopped) => return Err(HostError::Stopped),
                Err(e) => {
                    tracing::warn!(
                        host_id = %self.id(),
                        attempt,
                        delay_ms = self.config.retry_delay.as_millis() as u64,
                        error = %e,
                        "host bootstrap failed, retrying"
                    );
                    attempt = attempt.saturating_add(1);
                    tokio::time::sleep(self.config.retry_delay).await;
                }
            }
        }
    }

    /// One bootstrap attempt: discovery, token exchange, broker connection,
    /// host subscriptions, then `host_connect` to the authority. A no-op
    /// when already connected.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error; the broker is disconnected
    /// again in that case.
    pub async fn connect(&self) -> Result<(), HostError> {
        let _guard = self.connect_lock.lock().await;
        match self.state() {
            HostState::Connected => return Ok(()),
            HostState::Stopped => return Err(HostError::Stopped),
            HostState::Disconnected | HostState::Connecting => {}
        }
        *self.state.lock() = HostState::Connecting;

        match self.bootstrap().await {
            Ok(()) => {
                *self.state.lock() = HostState::Connected;
                tracing::info!(host_id = %self.id(), "host connected");
                Ok(())
            }
            Err(e) => {
                if self.broker.is_connected() {
                    if let Err(e) = self.broker.disconnect().await {
                        tracing::debug!(host_id = %self.id(), error = %e, "broker disconnect after failed bootstrap");
                    }
                }
                *self.state.lock() = HostState::Disconnected;
                Err(e)
            }
        }
    }

    async fn bootstrap(&self) -> Result<(), HostError> {
        let metadata = self.authority.initialize().await.clone();
        let token = self.tokens.token(&metadata.token_endpoint).await?;
        self.broker
            .connect(&token.access_token, &metadata.broker_address)
            .await?;

        for pattern in self.subscriptions() {
            self.broker.subscribe(&pattern, self.host_callback()).await?;
        }

        let hello = self.broker.event(
            self.scheme.authority(self.id()),
            ProtocolEvent::HostConnect {
                host_id: self.id().to_string(),
            },
        )?;
        self.broker.publish_async(&hello).await?;
        Ok(())
    }

    fn host_callback(&self) -> Callback {
        let commands = self.commands.clone();
        let authority_id = self.scheme.authority_id().to_string();
        let host_id = self.id().to_string();
        callback(move |message| {
            let commands = commands.clone();
            let authority_id = authority_id.clone();
            let host_id = host_id.clone();
            async move {
                let Some(command) = decode_command(&authority_id, &host_id, message) else {
                    return Ok(());
                };
                commands
                    .send(command)
                    .map_err(|_| CallbackError::new("host actor has stopped"))
            }
        })
    }

    async fn ask<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, HostError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .map_err(|_| HostError::Stopped)?;
        rx.await.map_err(|_| HostError::Stopped)
    }

    /// Ids of the local agents, sorted.
    ///
    /// # Errors
    ///
    /// Returns `HostError::Stopped` once the host has been stopped.
    pub async fn agent_ids(&self) -> Result<Vec<String>, HostError> {
        self.ask(Command::AgentIds).await
    }

    /// Ids of agents of this host's agencies running elsewhere, sorted.
    ///
    /// # Errors
    ///
    /// Returns `HostError::Stopped` once the host has been stopped.
    pub async fn remote_agent_ids(&self) -> Result<Vec<String>, HostError> {
        self.ask(Command::RemoteAgentIds).await
    }

    /// # Errors
    ///
    /// Returns `HostError::Stopped` once the host has been stopped.
    pub async fn agency_ids(&self) -> Result<Vec<String>, HostError> {
        self.ask(Command::AgencyIds).await
    }

    /// # Errors
    ///
    /// Returns `HostError::Stopped` once the host has been stopped.
    pub async fn plugins(&self) -> Result<Vec<PluginRecord>, HostError> {
        self.ask(Command::Plugins).await
    }

    /// # Errors
    ///
    /// Returns `HostError::Stopped` once the host has been stopped.
    pub async fn agent(&self, agent_id: &str) -> Result<Option<Arc<Agent>>, HostError> {
        let agent_id = agent_id.to_string();
        self.ask(|tx| Command::Agent(agent_id, tx)).await
    }

    /// # Errors
    ///
    /// Returns `HostError::Stopped` once the host has been stopped.
    pub async fn agency(&self, agency_id: &str) -> Result<Option<Arc<Agency>>, HostError> {
        let agency_id = agency_id.to_string();
        self.ask(|tx| Command::Agency(agency_id, tx)).await
    }

    /// Disconnects every agent and agency, leaves the host topics, and
    /// disconnects the transport. The host cannot be restarted.
    ///
    /// # Errors
    ///
    /// Returns the broker's error; the host is stopped regardless.
    pub async fn stop(&self) -> Result<(), HostError> {
        let _guard = self.connect_lock.lock().await;
        if self.state() == HostState::Stopped {
            return Ok(());
        }
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Stop(tx)).is_ok() {
            // The actor may already be gone.
            let _ = rx.await;
        }
        let was_connected = self.state() == HostState::Connected;
        *self.state.lock() = HostState::Stopped;

        if was_connected {
            for pattern in self.subscriptions() {
                self.broker.unsubscribe(&pattern).await?;
            }
            self.broker.disconnect().await?;
        }
        tracing::info!(host_id = %self.id(), "host stopped");
        Ok(())
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        if let Some(actor) = self.actor.lock().take() {
            actor.abort();
        }
    }
}

/// Turns a message on a host topic into an actor command. Only the
/// authority may address hosts; anything else is dropped.
fn decode_command(authority_id: &str, host_id: &str, message: BrokerMessage) -> Option<Command> {
    let sender = message.topic.sender();
    if sender != authority_id {
        tracing::warn!(host_id, sender, topic = %message.topic, "host message not sent by the authority, ignored");
        return None;
    }
    let Payload::Event(data) = &message.payload else {
        tracing::debug!(host_id, topic = %message.topic, "ignoring non-event message on host topic");
        return None;
    };
    let stamped = match StampedEvent::from_event_data(data) {
        Ok(stamped) => stamped,
        Err(e) => {
            tracing::warn!(host_id, topic = %message.topic, error = %e, "dropping malformed event");
            return None;
        }
    };

    match stamped.event {
        ProtocolEvent::HostWelcome {
            host,
            plugins,
            agents,
        } => match WelcomeSnapshot::decode(&host, &plugins, &agents) {
            Ok(snapshot) => Some(Command::Welcome(snapshot)),
            Err(e) => {
                tracing::warn!(host_id, error = %e, "dropping malformed host_welcome");
                None
            }
        },
        ProtocolEvent::AgentConnect { agent_id, agent } => {
            match serde_json::from_str::<AgentRecord>(&agent) {
                Ok(record) if record.id == agent_id => Some(Command::AgentConnect(record)),
                Ok(record) => {
                    tracing::warn!(host_id, agent_id = %agent_id, record_id = %record.id, "agent_connect names two agents, ignored");
                    None
                }
                Err(e) => {
                    tracing::warn!(host_id, agent_id = %agent_id, error = %e, "dropping malformed agent_connect");
                    None
                }
            }
        }
        ProtocolEvent::AgentDisconnect { agent_id } => Some(Command::AgentDisconnect(agent_id)),
        other => {
            tracing::debug!(host_id, event = other.event_type(), "ignoring event on host topic");
            None
        }
    }
}

/// Single writer of a host's maps.
struct HostActor {
    host_id: String,
    scheme: TopicScheme,
    broker: Arc<Broker>,
    claim_window: Duration,
    events: broadcast::Sender<HostEvent>,
    plugins: BTreeMap<String, PluginRecord>,
    agencies: BTreeMap<String, Arc<Agency>>,
    agents: BTreeMap<String, Arc<Agent>>,
    remote: BTreeMap<String, AgentRecord>,
}

impl HostActor {
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = inbox.recv().await {
            match command {
                Command::Welcome(snapshot) => self.on_welcome(snapshot).await,
                Command::AgentConnect(record) => self.add_agent(record).await,
                Command::AgentDisconnect(agent_id) => self.remove_agent(&agent_id).await,
                Command::AgentIds(reply) => {
                    let _ = reply.send(self.agents.keys().cloned().collect());
                }
                Command::RemoteAgentIds(reply) => {
                    let _ = reply.send(self.remote.keys().cloned().collect());
                }
                Command::AgencyIds(reply) => {
                    let _ = reply.send(self.agencies.keys().cloned().collect());
                }
                Command::Plugins(reply) => {
                    let _ = reply.send(self.plugins.values().cloned().collect());
                }
                Command::Agent(agent_id, reply) => {
                    let _ = reply.send(self.agents.get(&agent_id).cloned());
                }
                Command::Agency(agency_id, reply) => {
                    let _ = reply.send(self.agencies.get(&agency_id).cloned());
                }
                Command::Stop(reply) => {
                    self.shutdown().await;
                    let _ = reply.send(());
                    break;
                }
            }
        }
        tracing::debug!(host_id = %self.host_id, "host actor finished");
    }

    fn emit(&self, event: HostEvent) {
        // No observers is fine.
        let _ = self.events.send(event);
    }

    async fn on_welcome(&mut self, snapshot: WelcomeSnapshot) {
        if snapshot.host.id != self.host_id {
            tracing::warn!(host_id = %self.host_id, welcomed = %snapshot.host.id, "host_welcome for another host ignored");
            return;
        }
        tracing::info!(
            host_id = %self.host_id,
            plugins = snapshot.plugins.len(),
            agents = snapshot.agents.len(),
            "welcomed by authority"
        );
        for plugin in snapshot.plugins {
            if self.plugins.contains_key(&plugin.id) {
                continue;
            }
            let plugin_id = plugin.id.clone();
            self.plugins.insert(plugin_id.clone(), plugin);
            self.emit(HostEvent::PluginRegistered { plugin_id });
        }
        for record in snapshot.agents {
            self.add_agent(record).await;
        }
    }

    async fn add_agent(&mut self, record: AgentRecord) {
        if self.agents.contains_key(&record.id) {
            tracing::debug!(host_id = %self.host_id, agent_id = %record.id, "agent already running");
            return;
        }
        if record.host_id != self.host_id {
            self.add_remote(record);
            return;
        }
        self.remote.remove(&record.id);

        let agency = match self.agencies.get(&record.agency_id) {
            Some(agency) => Arc::clone(agency),
            None => {
                let agency = Agency::new(
                    record.agency_id.clone(),
                    self.scheme.clone(),
                    Arc::clone(&self.broker),
                );
                if let Err(e) = agency.connect().await {
                    tracing::warn!(host_id = %self.host_id, agency_id = %record.agency_id, error = %e, "cannot connect agency");
                    return;
                }
                self.agencies
                    .insert(record.agency_id.clone(), Arc::clone(&agency));
                self.emit(HostEvent::AgencyConnected {
                    agency_id: record.agency_id.clone(),
                });
                agency
            }
        };

        let agent = Agent::new(
            record.clone(),
            self.scheme.clone(),
            Arc::clone(&self.broker),
            Arc::clone(&agency),
            self.claim_window,
        );
        agency.add_local(&agent);
        if let Err(e) = agent.connect().await {
            tracing::warn!(host_id = %self.host_id, agent_id = %record.id, error = %e, "cannot connect agent");
        }
        self.agents.insert(record.id.clone(), agent);
        self.emit(HostEvent::AgentConnected {
            agent_id: record.id,
            agency_id: record.agency_id,
            local: true,
        });
    }

    fn add_remote(&mut self, record: AgentRecord) {
        if self.remote.contains_key(&record.id) {
            return;
        }
        tracing::debug!(host_id = %self.host_id, agent_id = %record.id, owner = %record.host_id, "tracking remote agent");
        self.emit(HostEvent::AgentConnected {
            agent_id: record.id.clone(),
            agency_id: record.agency_id.clone(),
            local: false,
        });
        self.remote.insert(record.id.clone(), record);
    }

    async fn remove_agent(&mut self, agent_id: &str) {
        if let Some(record) = self.remote.remove(agent_id) {
            // The owner normally resigns itself; this covers a lost resign.
            if let Some(agency) = self.agencies.get(&record.agency_id) {
                agency.vacate(agent_id);
            }
            self.emit(HostEvent::AgentDisconnected {
                agent_id: record.id,
                agency_id: record.agency_id,
                local: false,
            });
            return;
        }
        let Some(agent) = self.agents.remove(agent_id) else {
            tracing::debug!(host_id = %self.host_id, agent_id, "agent_disconnect for unknown agent ignored");
            return;
        };

        if let Err(e) = agent.disconnect().await {
            tracing::warn!(host_id = %self.host_id, agent_id, error = %e, "agent disconnect failed");
        }
        let agency = Arc::clone(agent.agency());
        agency.remove_local(agent_id);
        self.emit(HostEvent::AgentDisconnected {
            agent_id: agent_id.to_string(),
            agency_id: agency.id().to_string(),
            local: true,
        });

        if !agency.has_local_agents() {
            self.remove_agency(&agency).await;
        }
    }

    async fn remove_agency(&mut self, agency: &Agency) {
        if let Err(e) = agency.disconnect().await {
            tracing::warn!(host_id = %self.host_id, agency_id = %agency.id(), error = %e, "agency disconnect failed");
        }
        self.agencies.remove(agency.id());

        let members: Vec<String> = self
            .remote
            .values()
            .filter(|record| record.agency_id == agency.id())
            .map(|record| record.id.clone())
            .collect();
        for agent_id in members {
            self.remote.remove(&agent_id);
            self.emit(HostEvent::AgentDisconnected {
                agent_id,
                agency_id: agency.id().to_string(),
                local: false,
            });
        }
        self.emit(HostEvent::AgencyDisconnected {
            agency_id: agency.id().to_string(),
        });
    }

    async fn shutdown(&mut self) {
        let agents = std::mem::take(&mut self.agents);
        for (agent_id, agent) in agents {
            if let Err(e) = agent.disconnect().await {
                tracing::warn!(host_id = %self.host_id, agent_id = %agent_id, error = %e, "agent disconnect failed");
            }
        }
        let agencies = std::mem::take(&mut self.agencies);
        for (agency_id, agency) in agencies {
            if let Err(e) = agency.disconnect().await {
                tracing::warn!(host_id = %self.host_id, agency_id = %agency_id, error = %e, "agency disconnect failed");
            }
        }
        self.remote.clear();
    }
}
