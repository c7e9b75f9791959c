//! One agency as seen from one host.

use crate::agent::Agent;
use crate::election::{Claim, LeaderSlot, Offer};
use crate::error::HostError;
use hive_broker::{callback, Broker, CallbackError};
use hive_types::{
    format_timestamp, parse_timestamp, BrokerMessage, Payload, ProtocolEvent, StampedEvent, Topic,
    TopicScheme,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// An agency this host runs at least one agent of.
///
/// Owns the agency subscription and the local view of the election. Agents
/// hold the agency; the agency only holds weak references back.
pub struct Agency {
    id: String,
    scheme: TopicScheme,
    broker: Arc<Broker>,
    slot: LeaderSlot,
    local: Mutex<BTreeMap<String, Weak<Agent>>>,
    connected: AtomicBool,
}

impl Agency {
    pub(crate) fn new(id: impl Into<String>, scheme: TopicScheme, broker: Arc<Broker>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            scheme,
            broker,
            slot: LeaderSlot::new(),
            local: Mutex::new(BTreeMap::new()),
            connected: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn slot(&self) -> &LeaderSlot {
        &self.slot
    }

    /// Id of the current representative, if any.
    pub fn representative(&self) -> Option<String> {
        self.slot.holder().map(|claim| claim.agent_id)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Ids of the local agents of this agency.
    pub fn local_agent_ids(&self) -> Vec<String> {
        self.local.lock().keys().cloned().collect()
    }

    pub fn has_local_agents(&self) -> bool {
        !self.local.lock().is_empty()
    }

    pub(crate) fn add_local(&self, agent: &Arc<Agent>) {
        self.local
            .lock()
            .insert(agent.id().to_string(), Arc::downgrade(agent));
    }

    pub(crate) fn remove_local(&self, agent_id: &str) -> bool {
        self.local.lock().remove(agent_id).is_some()
    }

    fn is_local(&self, agent_id: &str) -> bool {
        self.local.lock().contains_key(agent_id)
    }

    /// The agency topic, sent as `sender`.
    pub(crate) fn topic(&self, sender: &str) -> Result<Topic, HostError> {
        Ok(self.scheme.agency(sender, &self.id)?)
    }

    /// Subscribes to the agency topic.
    ///
    /// # Errors
    ///
    /// Returns `HostError::Broker` if the subscription is refused.
    pub(crate) async fn connect(self: &Arc<Self>) -> Result<(), HostError> {
        if self.is_connected() {
            return Ok(());
        }
        let pattern = self.topic("+")?.to_string();
        let weak = Arc::downgrade(self);
        self.broker
            .subscribe(
                &pattern,
                callback(move |message| {
                    let weak = weak.clone();
                    async move {
                        if let Some(agency) = weak.upgrade() {
                            agency.on_message(message);
                        }
                        Ok::<(), CallbackError>(())
                    }
                }),
            )
            .await?;
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!(agency_id = %self.id, "agency connected");
        Ok(())
    }

    /// Unsubscribes from the agency topic and forgets the election state.
    ///
    /// # Errors
    ///
    /// Returns `HostError::Broker` if the transport fails.
    pub(crate) async fn disconnect(&self) -> Result<(), HostError> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(holder) = self.slot.holder() {
            self.slot.resign(&holder.agent_id);
        }
        self.broker.unsubscribe(&self.topic("+")?.to_string()).await?;
        tracing::info!(agency_id = %self.id, "agency disconnected");
        Ok(())
    }

    /// Publishes `claim` again, sent as its agent.
    pub(crate) fn announce(&self, claim: &Claim) {
        let event = ProtocolEvent::RepresentativeClaim {
            agent_id: claim.agent_id.clone(),
            agency_id: self.id.clone(),
            claimed_at: format_timestamp(claim.claimed_at),
        };
        let message = self
            .topic(&claim.agent_id)
            .and_then(|topic| Ok(self.broker.event(topic, event)?));
        match message {
            Ok(message) => self.broker.publish(message),
            Err(e) => {
                tracing::warn!(agency_id = %self.id, agent_id = %claim.agent_id, error = %e, "cannot announce claim");
            }
        }
    }

    /// Restarts the claim window of every connected local agent.
    pub(crate) fn rearm_local_agents(&self) {
        let agents: Vec<Arc<Agent>> = self
            .local
            .lock()
            .values()
            .filter_map(Weak::upgrade)
            .collect();
        for agent in agents.iter().filter(|agent| agent.is_connected()) {
            agent.arm_claim_timer();
        }
    }

    /// Vacates the slot if `agent_id` holds it and starts a new election.
    pub(crate) fn vacate(&self, agent_id: &str) -> bool {
        if self.slot.resign(agent_id) {
            tracing::info!(agency_id = %self.id, agent_id, "representative left, re-electing");
            self.rearm_local_agents();
            true
        } else {
            false
        }
    }

    /// Records a departure announced at `departed_at`, re-electing if the
    /// departed agent was representative.
    fn depart(&self, agent_id: &str, departed_at: DateTime<Utc>) {
        if self.slot.depart(agent_id, departed_at) {
            tracing::info!(agency_id = %self.id, agent_id, "representative left, re-electing");
            self.rearm_local_agents();
        }
    }

    fn forward_to_local(&self, message: &BrokerMessage) {
        let agents: Vec<Arc<Agent>> = self
            .local
            .lock()
            .values()
            .filter_map(Weak::upgrade)
            .collect();
        for agent in agents {
            agent.deliver(message.clone());
        }
    }

    fn on_message(&self, message: BrokerMessage) {
        let Payload::Event(data) = &message.payload else {
            self.forward_to_local(&message);
            return;
        };
        let Ok(stamped) = StampedEvent::from_event_data(data) else {
            self.forward_to_local(&message);
            return;
        };
        let sender = message.topic.sender();
        let stamped_at = parse_timestamp(&stamped.timestamp).ok();

        match stamped.event {
            ProtocolEvent::Join {
                agent_id,
                agency_id,
            } if self.addressed(&agency_id, sender, &agent_id) => {
                if let Some(holder) = self.slot.holder() {
                    if holder.agent_id != agent_id && self.is_local(&holder.agent_id) {
                        tracing::debug!(agency_id = %self.id, joined = %agent_id, "re-announcing representative");
                        self.announce(&holder);
                    }
                }
            }
            ProtocolEvent::Leave {
                agent_id,
                agency_id,
            }
            | ProtocolEvent::RepresentativeResign {
                agent_id,
                agency_id,
            } if self.addressed(&agency_id, sender, &agent_id) => match stamped_at {
                Some(departed_at) => self.depart(&agent_id, departed_at),
                None => {
                    self.vacate(&agent_id);
                }
            },
            ProtocolEvent::RepresentativeClaim {
                agent_id,
                agency_id,
                claimed_at,
            } if self.addressed(&agency_id, sender, &agent_id) => {
                let Ok(claimed_at) = parse_timestamp(&claimed_at) else {
                    tracing::warn!(agency_id = %self.id, agent_id = %agent_id, "claim with invalid timestamp ignored");
                    return;
                };
                self.on_claim(Claim::new(agent_id, claimed_at));
            }
            other => {
                tracing::debug!(agency_id = %self.id, event = other.event_type(), sender, "ignoring agency event");
            }
        }
    }

    fn on_claim(&self, claim: Claim) {
        match self.slot.offer(claim.clone()) {
            Offer::Elected => {
                tracing::info!(agency_id = %self.id, agent_id = %claim.agent_id, "representative elected");
            }
            Offer::Superseded { previous } => {
                tracing::info!(
                    agency_id = %self.id,
                    agent_id = %claim.agent_id,
                    previous = %previous.agent_id,
                    "earlier claim supersedes representative"
                );
            }
            Offer::Rejected { holder } => {
                if self.is_local(&holder.agent_id) {
                    self.announce(&holder);
                }
            }
            Offer::Stale { departed_at } => {
                tracing::debug!(
                    agency_id = %self.id,
                    agent_id = %claim.agent_id,
                    departed_at = %format_timestamp(departed_at),
                    "claim predates the agent's departure, ignored"
                );
            }
            Offer::AlreadyHeld => {}
        }
    }

    /// Coordination events must name this agency and be sent by the agent
    /// they are about.
    fn addressed(&self, agency_id: &str, sender: &str, agent_id: &str) -> bool {
        if agency_id != self.id || sender != agent_id {
            tracing::warn!(
                agency_id = %self.id,
                event_agency = agency_id,
                sender,
                agent_id,
                "misaddressed agency event ignored"
            );
            return false;
        }
        true
    }
}
