//! Relationship queries asked of the external oracle.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A question about whether a host, optionally on behalf of one of its
/// agents, is related to an agency or an agent.
///
/// Exactly one of `target_agency_id` and `target_agent_id` must be set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationshipQuery {
    /// The host the caller is authenticated as.
    pub host_id: String,
    /// The agent the caller is sending as, if any.
    pub source_id: Option<String>,
    pub target_agency_id: Option<String>,
    pub target_agent_id: Option<String>,
}

/// The single target of a [`RelationshipQuery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipTarget<'a> {
    Agency(&'a str),
    Agent(&'a str),
}

impl RelationshipTarget<'_> {
    /// The identifier of the target, whichever kind it is.
    pub fn id(&self) -> &str {
        match self {
            Self::Agency(id) | Self::Agent(id) => id,
        }
    }
}

/// A query that does not name exactly one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RelationshipError {
    #[error("relationship query names no target")]
    NoTarget,
    #[error("relationship query names both an agency and an agent target")]
    BothTargets,
}

impl RelationshipQuery {
    pub fn agency(host_id: &str, source_id: Option<&str>, agency_id: &str) -> Self {
        Self {
            host_id: host_id.to_string(),
            source_id: source_id.map(str::to_string),
            target_agency_id: Some(agency_id.to_string()),
            target_agent_id: None,
        }
    }

    pub fn agent(host_id: &str, source_id: Option<&str>, agent_id: &str) -> Self {
        Self {
            host_id: host_id.to_string(),
            source_id: source_id.map(str::to_string),
            target_agency_id: None,
            target_agent_id: Some(agent_id.to_string()),
        }
    }

    /// Returns the single target of this query.
    ///
    /// # Errors
    ///
    /// Returns `RelationshipError` unless exactly one target is set.
    pub fn target(&self) -> Result<RelationshipTarget<'_>, RelationshipError> {
        match (&self.target_agency_id, &self.target_agent_id) {
            (Some(agency), None) => Ok(RelationshipTarget::Agency(agency)),
            (None, Some(agent)) => Ok(RelationshipTarget::Agent(agent)),
            (None, None) => Err(RelationshipError::NoTarget),
            (Some(_), Some(_)) => Err(RelationshipError::BothTargets),
        }
    }
}
