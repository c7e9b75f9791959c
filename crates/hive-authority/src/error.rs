//! Error types for the authority.

use hive_types::{ProtocolError, TopicError};
use thiserror::Error;

/// Failure to fetch discovery metadata.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("discovery request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("discovery endpoint answered with status {0}")]
    Status(u16),
}

/// Failure of the data adapter behind [`crate::Directory`].
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory lookup failed: {0}")]
    Backend(String),
}

/// Errors raised by the authority service.
#[derive(Debug, Error)]
pub enum AuthorityError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Broker(#[from] hive_broker::BrokerError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Topic(#[from] TopicError),
}
