//! Error types for hosts and agents.

use hive_broker::BrokerError;
use hive_types::{ProtocolError, TopicError};
use thiserror::Error;

/// Failure of the client-credentials token exchange.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("token endpoint answered with status {0}")]
    Status(u16),
}

/// Errors raised by a host or its agents.
#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Topic(#[from] TopicError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The host actor has stopped.
    #[error("host has been stopped")]
    Stopped,
}
