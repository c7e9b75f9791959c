//! Access control for the Hive broker.
//!
//! The broker consults [`AccessEvaluator::check_access`] for every client
//! operation: subscribing to a pattern, publishing to a topic, and
//! receiving a message. Each role is granted a fixed set of topic
//! [`Mask`]s per access type; masks with deferred `?` segments are
//! confirmed through a [`RelationshipOracle`] that knows which agents run
//! on which host.
//!
//! Denials are plain `false`. Errors are reserved for invariant violations
//! such as a host caller without a host id. Oracle failures fail closed.

pub mod error;
pub mod evaluator;
pub mod mask;
pub mod oracle;


pub use error::{AclError, OracleError};
pub use evaluator::{AccessEvaluator, AccessRequest, Caller, Decision, DenyReason};
pub use mask::{masks_for, Mask};
pub use oracle::RelationshipOracle;
