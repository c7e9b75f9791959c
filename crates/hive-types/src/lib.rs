//! Shared types, addressing rules, and wire formats for the Hive platform.
//!
//! This crate provides the foundational types used across all Hive crates:
//! the topic grammar and its reserved tokens, access types and caller roles,
//! the broker envelope and the protocol event vocabulary, provenance records,
//! and the entity records exchanged during the welcome handshake.
//!
//! No crate in the workspace depends on anything *except* `hive-types` for
//! cross-cutting type definitions. This keeps the dependency graph clean and
//! prevents circular dependencies.
//!
//! # Topic grammars
//!
//! | Grammar | Segments |
//! |---------|----------|
//! | flat | `{sender}/{authority}/{host}/{agent}` |
//! | nested | `{sender}/{authority}/{host}/{agency}/{agent}` |

pub mod access;
pub mod envelope;
pub mod event;
pub mod information;
pub mod records;
pub mod relationship;
pub mod time;
pub mod topic;

pub use access::{AccessType, InvalidAccessType, ParseRoleError, Role};
pub use envelope::{BrokerMessage, EnvelopeError, EventData, MessageKind, Payload};
pub use event::{ProtocolError, ProtocolEvent, StampedEvent};
pub use information::{DataSnapshot, Information, InformationError};
pub use records::{
    AgencyRecord, AgentRecord, ChangeOp, EntityChange, EntityKind, HostRecord, PluginRecord,
    WelcomeSnapshot,
};
pub use relationship::{RelationshipError, RelationshipQuery, RelationshipTarget};
pub use time::{format_timestamp, parse_timestamp};
pub use topic::{Grammar, Topic, TopicError, TopicScheme};
