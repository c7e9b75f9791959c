//! The broker envelope and its wire encoding.
//!
//! On the wire an envelope is a JSON object with a `kind` discriminator and a
//! string `payload`. The kind alone decides how the payload is read: EVENT
//! payloads become an [`EventData`] map, INFORMATION payloads an
//! [`Information`] record, anything else is kept verbatim.

use crate::information::Information;
use crate::topic::Topic;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Envelope discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    /// A protocol event carried as a string map.
    Event,
    /// A provenance record.
    Information,
    /// A kind this build does not understand.
    #[serde(other)]
    Unknown,
}

/// The payload of an EVENT envelope.
///
/// Round-trips through a single raw string. A raw string that is a JSON
/// object becomes a map of fields; anything else is one opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventData {
    /// Structured fields with unique keys.
    Fields(BTreeMap<String, String>),
    /// An unstructured payload.
    Opaque(String),
}

impl EventData {
    /// Interprets a raw payload string.
    ///
    /// String values are kept verbatim, `null` becomes the empty string, and
    /// any other value keeps its JSON text.
    pub fn from_raw(raw: &str) -> Self {
        match serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(raw) {
            Ok(map) => Self::Fields(
                map.into_iter()
                    .map(|(key, value)| (key, field_text(value)))
                    .collect(),
            ),
            Err(_) => Self::Opaque(raw.to_string()),
        }
    }

    /// Renders the payload back into its raw string form.
    pub fn to_raw(&self) -> String {
        match self {
            Self::Fields(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(key, value)| (key.clone(), serde_json::Value::String(value.clone())))
                    .collect(),
            )
            .to_string(),
            Self::Opaque(raw) => raw.clone(),
        }
    }

    /// Looks up a structured field. Always `None` for opaque payloads.
    pub fn get(&self, key: &str) -> Option<&str> {
        match self {
            Self::Fields(fields) => fields.get(key).map(String::as_str),
            Self::Opaque(_) => None,
        }
    }

    /// The structured fields, if any.
    pub fn fields(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            Self::Fields(fields) => Some(fields),
            Self::Opaque(_) => None,
        }
    }
}

fn field_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl From<BTreeMap<String, String>> for EventData {
    fn from(fields: BTreeMap<String, String>) -> Self {
        Self::Fields(fields)
    }
}

/// A decoded envelope payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Event(EventData),
    Information(Information),
    /// Raw payload of an unknown kind.
    Unknown(String),
}

/// Errors produced while encoding or decoding envelopes.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The envelope or an INFORMATION payload was not valid JSON.
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    kind: MessageKind,
    payload: String,
}

/// A message as seen by broker callbacks.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerMessage {
    /// Full topic, sender included.
    pub topic: Topic,
    pub payload: Payload,
}

impl BrokerMessage {
    pub fn event(topic: Topic, data: EventData) -> Self {
        Self {
            topic,
            payload: Payload::Event(data),
        }
    }

    pub fn information(topic: Topic, information: Information) -> Self {
        Self {
            topic,
            payload: Payload::Information(information),
        }
    }

    /// The envelope discriminator implied by the payload.
    pub fn kind(&self) -> MessageKind {
        match self.payload {
            Payload::Event(_) => MessageKind::Event,
            Payload::Information(_) => MessageKind::Information,
            Payload::Unknown(_) => MessageKind::Unknown,
        }
    }

    /// Encodes the envelope body for the transport.
    ///
    /// # Errors
    ///
    /// Returns `EnvelopeError::Malformed` if an INFORMATION payload cannot be
    /// serialized.
    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        let payload = match &self.payload {
            Payload::Event(data) => data.to_raw(),
            Payload::Information(information) => serde_json::to_string(information)?,
            Payload::Unknown(raw) => raw.clone(),
        };
        let wire = WireEnvelope {
            kind: self.kind(),
            payload,
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    /// Decodes an envelope body received on `topic`.
    ///
    /// # Errors
    ///
    /// Returns `EnvelopeError::Malformed` if the body is not an envelope or
    /// an INFORMATION payload is not a valid record.
    pub fn decode(topic: Topic, body: &[u8]) -> Result<Self, EnvelopeError> {
        let wire: WireEnvelope = serde_json::from_slice(body)?;
        let payload = match wire.kind {
            MessageKind::Event => Payload::Event(EventData::from_raw(&wire.payload)),
            MessageKind::Information => Payload::Information(serde_json::from_str(&wire.payload)?),
            MessageKind::Unknown => Payload::Unknown(wire.payload),
        };
        Ok(Self { topic, payload })
    }
}
