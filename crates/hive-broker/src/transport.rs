//! The seam between the broker and a concrete pub/sub transport.

use crate::error::BrokerError;
use async_trait::async_trait;
use hive_types::AccessType;
use tokio::sync::mpsc;

/// A message as received from the transport, before any decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Full topic, sender segment included.
    pub topic: String,
    pub payload: Vec<u8>,
}

/// A publish/subscribe transport.
///
/// Topics and patterns are passed in their `/`-joined form; a transport with
/// a different subject syntax translates them itself. Delivery is at most
/// once and unordered.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connects with `credential` and starts pushing received messages into
    /// `inbound`.
    async fn connect(
        &self,
        credential: &str,
        address: &str,
        inbound: mpsc::Sender<InboundMessage>,
    ) -> Result<(), BrokerError>;

    /// Subscribes to a pattern. `+` matches one segment.
    async fn subscribe(&self, pattern: &str) -> Result<(), BrokerError>;

    async fn unsubscribe(&self, pattern: &str) -> Result<(), BrokerError>;

    /// Publishes and resolves once the transport acknowledged the message.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError>;

    async fn disconnect(&self) -> Result<(), BrokerError>;
}

/// Authorization hook a transport consults for every client operation.
///
/// This is where the access-control evaluator plugs into a transport.
#[async_trait]
pub trait AccessHook: Send + Sync {
    /// Returns `true` if the client holding `credential` may perform
    /// `access` on `topic`.
    async fn authorize(&self, credential: &str, access: AccessType, topic: &str) -> bool;
}
