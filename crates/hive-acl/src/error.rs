//! Error types for access-control evaluation.

use thiserror::Error;

/// Invariant violations raised by the evaluator.
///
/// An ordinary denial is never an error: it is `Ok(false)`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AclError {
    /// A caller holding the host role presented no host id.
    #[error("caller holds the host role but has no host id")]
    MissingHostId,
}

/// Failure of the relationship oracle. Treated as a denial by the evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    #[error("relationship lookup failed: {0}")]
    Lookup(String),
}
