//! Protocol event vocabulary.
//!
//! Events travel as EVENT envelopes whose fields are all strings. The `type`
//! field names the event; every event also carries the broker's trusted
//! `timestamp`. Snapshots of records are embedded as JSON text.

use crate::envelope::EventData;
use crate::records::{AgentRecord, WelcomeSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Field holding the trusted timestamp of an event.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Coordination events exchanged between authority, hosts, and agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolEvent {
    // ── Authority handshake ──────────────────────────────────────────
    /// A host announces itself to its authority.
    HostConnect { host_id: String },

    /// The authority answers with everything the host should run.
    HostWelcome {
        /// JSON [`crate::HostRecord`].
        host: String,
        /// JSON array of [`crate::PluginRecord`].
        plugins: String,
        /// JSON array of [`AgentRecord`].
        agents: String,
    },

    /// An agent was enabled and should be started or made visible.
    AgentConnect {
        agent_id: String,
        /// JSON [`AgentRecord`].
        agent: String,
    },

    /// An agent was disabled, updated, or deleted.
    AgentDisconnect { agent_id: String },

    // ── Agency coordination ──────────────────────────────────────────
    Join { agent_id: String, agency_id: String },

    Leave { agent_id: String, agency_id: String },

    /// An agent claims the representative role of its agency.
    RepresentativeClaim {
        agent_id: String,
        agency_id: String,
        /// Trusted time at which the claim was made. Claims are ordered by
        /// this value, then by agent id.
        claimed_at: String,
    },

    RepresentativeResign { agent_id: String, agency_id: String },
}

impl ProtocolEvent {
    /// Returns the `type` label of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::HostConnect { .. } => "host_connect",
            Self::HostWelcome { .. } => "host_welcome",
            Self::AgentConnect { .. } => "agent_connect",
            Self::AgentDisconnect { .. } => "agent_disconnect",
            Self::Join { .. } => "join",
            Self::Leave { .. } => "leave",
            Self::RepresentativeClaim { .. } => "representative_claim",
            Self::RepresentativeResign { .. } => "representative_resign",
        }
    }

    /// Builds a `host_welcome` event from a snapshot.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::Snapshot` if a record cannot be serialized.
    pub fn host_welcome(snapshot: &WelcomeSnapshot) -> Result<Self, ProtocolError> {
        Ok(Self::HostWelcome {
            host: serde_json::to_string(&snapshot.host)?,
            plugins: serde_json::to_string(&snapshot.plugins)?,
            agents: serde_json::to_string(&snapshot.agents)?,
        })
    }

    /// Builds an `agent_connect` event carrying the agent's record.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::Snapshot` if the record cannot be serialized.
    pub fn agent_connect(agent: &AgentRecord) -> Result<Self, ProtocolError> {
        Ok(Self::AgentConnect {
            agent_id: agent.id.clone(),
            agent: serde_json::to_string(agent)?,
        })
    }
}

/// Errors produced while reading or writing protocol events.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The payload was opaque rather than a field map.
    #[error("event payload is not structured")]
    NotStructured,

    /// A required field was missing.
    #[error("event is missing field '{0}'")]
    MissingField(&'static str),

    /// The fields did not describe a known event.
    #[error("malformed event: {0}")]
    Malformed(serde_json::Error),

    /// An embedded record snapshot could not be encoded or decoded.
    #[error("invalid record snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),
}

/// A protocol event together with its trusted timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StampedEvent {
    pub event: ProtocolEvent,
    pub timestamp: String,
}

impl StampedEvent {
    pub fn new(event: ProtocolEvent, timestamp: impl Into<String>) -> Self {
        Self {
            event,
            timestamp: timestamp.into(),
        }
    }

    /// Flattens the event into an EVENT payload.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::Malformed` if the event does not serialize to
    /// a flat object of strings.
    pub fn to_event_data(&self) -> Result<EventData, ProtocolError> {
        let value = serde_json::to_value(&self.event).map_err(ProtocolError::Malformed)?;
        let serde_json::Value::Object(object) = value else {
            return Err(ProtocolError::NotStructured);
        };
        let mut fields = BTreeMap::new();
        for (key, value) in object {
            let serde_json::Value::String(text) = value else {
                return Err(ProtocolError::NotStructured);
            };
            fields.insert(key, text);
        }
        fields.insert(TIMESTAMP_FIELD.to_string(), self.timestamp.clone());
        Ok(EventData::Fields(fields))
    }

    /// Reads an event back out of an EVENT payload.
    ///
    /// Unknown extra fields are ignored.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the payload is opaque, lacks a timestamp,
    /// names an unknown event type, or misses a required field.
    pub fn from_event_data(data: &EventData) -> Result<Self, ProtocolError> {
        let fields = data.fields().ok_or(ProtocolError::NotStructured)?;
        let timestamp = fields
            .get(TIMESTAMP_FIELD)
            .cloned()
            .ok_or(ProtocolError::MissingField(TIMESTAMP_FIELD))?;
        let object: serde_json::Map<String, serde_json::Value> = fields
            .iter()
            .filter(|(key, _)| key.as_str() != TIMESTAMP_FIELD)
            .map(|(key, value)| (key.clone(), serde_json::Value::String(value.clone())))
            .collect();
        let event = serde_json::from_value(serde_json::Value::Object(object))
            .map_err(ProtocolError::Malformed)?;
        Ok(Self { event, timestamp })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{HostRecord, PluginRecord};

    #[test]
    fn event_flattens_to_string_fields() {
        let stamped = StampedEvent::new(
            ProtocolEvent::Join {
                agent_id: "a1".into(),
                agency_id: "g1".into(),
            },
            "2026-01-01T00:00:00.000Z",
        );
        let data = stamped.to_event_data().expect("should flatten");
        assert_eq!(data.get("type"), Some("join"));
        assert_eq!(data.get("agent_id"), Some("a1"));
        assert_eq!(data.get("agency_id"), Some("g1"));
        assert_eq!(data.get("timestamp"), Some("2026-01-01T00:00:00.000Z"));

        let raw = data.to_raw();
        let back = StampedEvent::from_event_data(&EventData::from_raw(&raw))
            .expect("should parse back");
        assert_eq!(back, stamped);
    }

    #[test]
    fn missing_timestamp_is_rejected() {
        let data = EventData::from_raw(r#"{"type":"host_connect","host_id":"h1"}"#);
        assert!(matches!(
            StampedEvent::from_event_data(&data),
            Err(ProtocolError::MissingField("timestamp"))
        ));
    }

    #[test]
    fn unknown_type_and_opaque_payloads_are_rejected() {
        let data = EventData::from_raw(r#"{"type":"dance","timestamp":"t"}"#);
        assert!(matches!(
            StampedEvent::from_event_data(&data),
            Err(ProtocolError::Malformed(_))
        ));
        let opaque = EventData::from_raw("join please");
        assert!(matches!(
            StampedEvent::from_event_data(&opaque),
            Err(ProtocolError::NotStructured)
        ));
    }

    #[test]
    fn welcome_embeds_snapshots_as_json() {
        let snapshot = WelcomeSnapshot {
            host: HostRecord {
                id: "h1".into(),
                authority_id: "auth".into(),
                name: "edge".into(),
            },
            plugins: vec![PluginRecord {
                id: "p1".into(),
                name: "search".into(),
                version: "1.0.0".into(),
            }],
            agents: Vec::new(),
        };
        let event = ProtocolEvent::host_welcome(&snapshot).expect("should encode");
        let ProtocolEvent::HostWelcome {
            host,
            plugins,
            agents,
        } = &event
        else {
            panic!("expected host_welcome, got {event:?}");
        };
        let decoded = WelcomeSnapshot::decode(host, plugins, agents).expect("should decode");
        assert_eq!(decoded, snapshot);
        assert_eq!(event.event_type(), "host_welcome");
    }
}
