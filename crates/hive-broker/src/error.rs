//! Error types for the broker layer.

use thiserror::Error;

/// Errors surfaced by the broker and its transports.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The transport is not connected.
    #[error("broker is not connected")]
    NotConnected,

    /// The transport rejected the operation for this client.
    #[error("access denied: {0}")]
    Denied(String),

    /// A subscription pattern has no sender segment.
    #[error("invalid subscription pattern: {0}")]
    InvalidPattern(String),

    /// The envelope could not be encoded.
    #[error(transparent)]
    Envelope(#[from] hive_types::EnvelopeError),

    /// An event could not be encoded.
    #[error(transparent)]
    Protocol(#[from] hive_types::ProtocolError),

    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Error returned by a subscription callback.
///
/// Callback failures are logged by the dispatcher and never reach other
/// callbacks.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct CallbackError(pub String);

impl CallbackError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Errors raised while synchronizing the trusted clock.
#[derive(Debug, Error)]
pub enum ClockError {
    /// No time source is configured.
    #[error("no time sources configured")]
    NoSources,

    /// The source did not answer in time.
    #[error("time source {0} timed out")]
    Timeout(String),

    /// Network failure talking to a source.
    #[error("time source io error: {0}")]
    Io(#[from] std::io::Error),

    /// The source answered with something that is not a usable time.
    #[error("invalid response from time source: {0}")]
    InvalidResponse(String),
}
