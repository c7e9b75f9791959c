//! A locally running agent.

use crate::agency::Agency;
use crate::election::{Claim, Offer};
use crate::error::HostError;
use chrono::TimeDelta;
use hive_broker::{callback, Broker, CallbackError};
use hive_history::History;
use hive_types::{
    format_timestamp, AgentRecord, BrokerMessage, EventData, Information, Payload, ProtocolEvent,
    TopicScheme,
};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// How long an agent waits after joining before claiming the
/// representative role of a vacant agency.
pub const DEFAULT_CLAIM_WINDOW: Duration = Duration::from_secs(5);

const INBOX_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Disconnected,
    Connected,
}

/// An agent owned by this host.
pub struct Agent {
    record: AgentRecord,
    scheme: TopicScheme,
    broker: Arc<Broker>,
    agency: Arc<Agency>,
    history: Arc<History>,
    inbox: broadcast::Sender<BrokerMessage>,
    state: Mutex<AgentState>,
    /// Held across connect, disconnect and a whole claim, publish
    /// included, so a claim is either out before the agent leaves or never
    /// made.
    lifecycle: tokio::sync::Mutex<()>,
    claim_timer: Mutex<Option<JoinHandle<()>>>,
    claim_window: Duration,
}

impl Agent {
    pub(crate) fn new(
        record: AgentRecord,
        scheme: TopicScheme,
        broker: Arc<Broker>,
        agency: Arc<Agency>,
        claim_window: Duration,
    ) -> Arc<Self> {
        let (inbox, _) = broadcast::channel(INBOX_CAPACITY);
        Arc::new(Self {
            record,
            scheme,
            broker,
            agency,
            history: Arc::new(History::new()),
            inbox,
            state: Mutex::new(AgentState::Disconnected),
            lifecycle: tokio::sync::Mutex::new(()),
            claim_timer: Mutex::new(None),
            claim_window,
        })
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn agency_id(&self) -> &str {
        &self.record.agency_id
    }

    pub fn record(&self) -> &AgentRecord {
        &self.record
    }

    pub fn agency(&self) -> &Arc<Agency> {
        &self.agency
    }

    pub fn history(&self) -> &Arc<History> {
        &self.history
    }

    pub fn state(&self) -> AgentState {
        *self.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == AgentState::Connected
    }

    pub fn is_representative(&self) -> bool {
        self.agency.slot().is_held_by(self.id())
    }

    /// Every envelope addressed to this agent, plus non-coordination
    /// traffic on its agency topic.
    pub fn subscribe_inbox(&self) -> broadcast::Receiver<BrokerMessage> {
        self.inbox.subscribe()
    }

    fn pattern(&self) -> String {
        self.scheme
            .agent("+", self.agency_id(), self.id())
            .to_string()
    }

    /// Subscribes to the agent topic, announces the agent to its agency,
    /// and opens the claim window. A no-op for disabled or already
    /// connected agents.
    ///
    /// # Errors
    ///
    /// Returns `HostError` if the subscription or the join publish fails.
    pub async fn connect(self: &Arc<Self>) -> Result<(), HostError> {
        if !self.record.enabled {
            tracing::debug!(agent_id = %self.id(), "agent is disabled, not connecting");
            return Ok(());
        }
        let _lifecycle = self.lifecycle.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        let weak = Arc::downgrade(self);
        self.broker
            .subscribe(
                &self.pattern(),
                callback(move |message| {
                    let weak = weak.clone();
                    async move {
                        if let Some(agent) = weak.upgrade() {
                            agent.on_message(message);
                        }
                        Ok::<(), CallbackError>(())
                    }
                }),
            )
            .await?;

        self.publish_on_agency(ProtocolEvent::Join {
            agent_id: self.id().to_string(),
            agency_id: self.agency_id().to_string(),
        })
        .await?;

        *self.state.lock() = AgentState::Connected;
        self.arm_claim_timer();
        tracing::info!(agent_id = %self.id(), agency_id = %self.agency_id(), "agent connected");
        Ok(())
    }

    /// Cancels the claim window, resigns if representative, announces the
    /// departure, and unsubscribes.
    ///
    /// Every step is attempted even if an earlier one fails.
    ///
    /// # Errors
    ///
    /// Returns the first failure; the agent is marked disconnected
    /// regardless.
    pub async fn disconnect(&self) -> Result<(), HostError> {
        // Waits out a claim in flight.
        let _lifecycle = self.lifecycle.lock().await;
        if let Some(timer) = self.claim_timer.lock().take() {
            timer.abort();
        }
        {
            let mut state = self.state.lock();
            if *state == AgentState::Disconnected {
                return Ok(());
            }
            *state = AgentState::Disconnected;
        }

        let mut first_error: Option<HostError> = None;
        let departed_at = self.broker.clock().now_utc();
        if self.agency.slot().depart(self.id(), departed_at) {
            let resign = ProtocolEvent::RepresentativeResign {
                agent_id: self.id().to_string(),
                agency_id: self.agency_id().to_string(),
            };
            if let Err(e) = self.publish_on_agency(resign).await {
                tracing::warn!(agent_id = %self.id(), error = %e, "representative_resign not delivered");
                first_error.get_or_insert(e);
            }
            self.agency.rearm_local_agents();
        }

        let leave = ProtocolEvent::Leave {
            agent_id: self.id().to_string(),
            agency_id: self.agency_id().to_string(),
        };
        if let Err(e) = self.publish_on_agency(leave).await {
            tracing::warn!(agent_id = %self.id(), error = %e, "leave not delivered");
            first_error.get_or_insert(e);
        }

        if let Err(e) = self.broker.unsubscribe(&self.pattern()).await {
            first_error.get_or_insert(e.into());
        }
        tracing::info!(agent_id = %self.id(), agency_id = %self.agency_id(), "agent disconnected");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn publish_on_agency(&self, event: ProtocolEvent) -> Result<(), HostError> {
        let message = self.broker.event(self.agency.topic(self.id())?, event)?;
        self.broker.publish_async(&message).await?;
        Ok(())
    }

    /// (Re)starts the one-shot claim timer.
    pub(crate) fn arm_claim_timer(self: &Arc<Self>) {
        let weak: Weak<Agent> = Arc::downgrade(self);
        let window = self.claim_window;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if let Some(agent) = weak.upgrade() {
                agent.claim_if_vacant().await;
            }
        });
        if let Some(previous) = self.claim_timer.lock().replace(timer) {
            previous.abort();
        }
    }

    async fn claim_if_vacant(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        if !self.is_connected() || !self.agency.slot().is_vacant() {
            return;
        }
        // A rejoined agent claims strictly after its own departure.
        let mut claimed_at = self.broker.clock().now_utc();
        if let Some(departed_at) = self.agency.slot().departed_at(self.id()) {
            claimed_at = claimed_at.max(departed_at + TimeDelta::milliseconds(1));
        }
        let claim = Claim::new(self.id(), claimed_at);
        match self.agency.slot().offer(claim.clone()) {
            Offer::Elected | Offer::Superseded { .. } => {
                tracing::info!(agent_id = %self.id(), agency_id = %self.agency_id(), claimed_at = %format_timestamp(claim.claimed_at), "claiming representative");
                let event = ProtocolEvent::RepresentativeClaim {
                    agent_id: self.id().to_string(),
                    agency_id: self.agency_id().to_string(),
                    claimed_at: format_timestamp(claim.claimed_at),
                };
                if let Err(e) = self.publish_on_agency(event).await {
                    tracing::warn!(agent_id = %self.id(), error = %e, "representative_claim not delivered");
                }
            }
            Offer::AlreadyHeld | Offer::Rejected { .. } | Offer::Stale { .. } => {}
        }
    }

    pub(crate) fn deliver(&self, message: BrokerMessage) {
        // Nobody listening is fine.
        let _ = self.inbox.send(message);
    }

    fn on_message(&self, message: BrokerMessage) {
        if let Payload::Information(information) = &message.payload {
            self.history.record(information);
        }
        self.deliver(message);
    }

    /// Sends an EVENT envelope to another agent of the same agency.
    ///
    /// # Errors
    ///
    /// Returns `HostError::Broker` if the publish fails.
    pub async fn send_to_agent(&self, agent_id: &str, data: EventData) -> Result<(), HostError> {
        let topic = self.scheme.agent(self.id(), self.agency_id(), agent_id);
        self.broker
            .publish_async(&BrokerMessage::event(topic, data))
            .await?;
        Ok(())
    }

    /// Sends an EVENT envelope to the whole agency.
    ///
    /// # Errors
    ///
    /// Returns `HostError::Broker` if the publish fails.
    pub async fn send_to_agency(&self, data: EventData) -> Result<(), HostError> {
        let topic = self.agency.topic(self.id())?;
        self.broker
            .publish_async(&BrokerMessage::event(topic, data))
            .await?;
        Ok(())
    }

    /// Records `information` in this agent's history and sends it to
    /// another agent of the same agency.
    ///
    /// # Errors
    ///
    /// Returns `HostError::Broker` if the publish fails; the record is kept
    /// in the local history either way.
    pub async fn send_information(
        &self,
        agent_id: &str,
        information: Information,
    ) -> Result<(), HostError> {
        self.history.record(&information);
        let topic = self.scheme.agent(self.id(), self.agency_id(), agent_id);
        self.broker
            .publish_async(&BrokerMessage::information(topic, information))
            .await?;
        Ok(())
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        if let Some(timer) = self.claim_timer.lock().take() {
            timer.abort();
        }
    }
}
