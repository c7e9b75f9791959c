//! The relationship oracle consulted for deferred (`?`) mask segments.

use crate::error::OracleError;
use async_trait::async_trait;
use hive_types::RelationshipQuery;
use std::sync::Arc;

/// Answers whether a host, optionally acting as one of its agents, is
/// related to a target agency or agent.
#[async_trait]
pub trait RelationshipOracle: Send + Sync {
    async fn verify_relationship(&self, query: &RelationshipQuery) -> Result<bool, OracleError>;
}

#[async_trait]
impl<T: RelationshipOracle + ?Sized> RelationshipOracle for Arc<T> {
    async fn verify_relationship(&self, query: &RelationshipQuery) -> Result<bool, OracleError> {
        (**self).verify_relationship(query).await
    }
}
