//! The access-control decision procedure.

use crate::error::{AclError, OracleError};
use crate::mask::{masks_for, Mask};
use crate::oracle::RelationshipOracle;
use hive_types::topic::{token, SENDER};
use hive_types::{AccessType, Grammar, RelationshipQuery, Role, Topic};
use std::fmt;
use std::sync::Arc;

/// An operation a transport client asks to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRequest {
    pub access: AccessType,
    pub topic: String,
}

impl AccessRequest {
    pub fn new(access: AccessType, topic: impl Into<String>) -> Self {
        Self {
            access,
            topic: topic.into(),
        }
    }
}

/// Who is asking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Caller {
    /// Host the caller authenticated as. Required for the host role.
    pub host_id: Option<String>,
    pub roles: Vec<Role>,
}

impl Caller {
    pub fn authority() -> Self {
        Self {
            host_id: None,
            roles: vec![Role::Authority],
        }
    }

    pub fn host(host_id: impl Into<String>) -> Self {
        Self {
            host_id: Some(host_id.into()),
            roles: vec![Role::Host],
        }
    }
}

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    ReadWriteRequested,
    EmptyTopic,
    /// Wrong segment count or an empty segment.
    Malformed,
    SubscribeSenderNotWildcard,
    NoMatchingMask,
    /// A WRITE addressed to the sender itself.
    SelfMessage,
    OracleDenied,
    /// The oracle failed; treated as a denial.
    OracleFailed,
}

impl DenyReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadWriteRequested => "read_write_requested",
            Self::EmptyTopic => "empty_topic",
            Self::Malformed => "malformed",
            Self::SubscribeSenderNotWildcard => "subscribe_sender_not_wildcard",
            Self::NoMatchingMask => "no_matching_mask",
            Self::SelfMessage => "self_message",
            Self::OracleDenied => "oracle_denied",
            Self::OracleFailed => "oracle_failed",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        self == Self::Allow
    }
}

/// Evaluates broker access requests for one authority's deployment.
///
/// Stateless apart from the oracle: the same request with the same oracle
/// answers always yields the same decision.
pub struct AccessEvaluator {
    grammar: Grammar,
    authority_id: String,
    oracle: Arc<dyn RelationshipOracle>,
}

impl AccessEvaluator {
    pub fn new(
        grammar: Grammar,
        authority_id: impl Into<String>,
        oracle: Arc<dyn RelationshipOracle>,
    ) -> Self {
        Self {
            grammar,
            authority_id: authority_id.into(),
            oracle,
        }
    }

    pub fn grammar(&self) -> Grammar {
        self.grammar
    }

    pub fn authority_id(&self) -> &str {
        &self.authority_id
    }

    /// Returns `true` if `caller` may perform `request`.
    ///
    /// # Errors
    ///
    /// Returns `AclError::MissingHostId` if the caller holds the host role
    /// without a host id.
    pub async fn check_access(
        &self,
        request: &AccessRequest,
        caller: &Caller,
    ) -> Result<bool, AclError> {
        Ok(self.evaluate(request, caller).await?.is_allowed())
    }

    /// Evaluates `request` and reports the reason for a denial.
    ///
    /// # Errors
    ///
    /// Returns `AclError::MissingHostId` if the caller holds the host role
    /// without a host id.
    pub async fn evaluate(
        &self,
        request: &AccessRequest,
        caller: &Caller,
    ) -> Result<Decision, AclError> {
        let decision = self.decide(request, caller).await?;
        if let Decision::Deny(reason) = decision {
            tracing::debug!(
                access = %request.access,
                topic = %request.topic,
                host_id = caller.host_id.as_deref().unwrap_or(""),
                reason = %reason,
                "access denied"
            );
        }
        Ok(decision)
    }

    async fn decide(&self, request: &AccessRequest, caller: &Caller) -> Result<Decision, AclError> {
        let access = request.access;
        if access == AccessType::ReadWrite {
            return Ok(Decision::Deny(DenyReason::ReadWriteRequested));
        }
        if request.topic.is_empty() {
            return Ok(Decision::Deny(DenyReason::EmptyTopic));
        }
        let Ok(topic) = Topic::parse(&request.topic, self.grammar) else {
            return Ok(Decision::Deny(DenyReason::Malformed));
        };
        if access == AccessType::Subscribe && topic.sender() != token::ANY_INCLUSIVE {
            return Ok(Decision::Deny(DenyReason::SubscribeSenderNotWildcard));
        }

        let masks = self.masks(caller, access)?;
        let mut fallback = DenyReason::NoMatchingMask;

        for mask in masks.iter().filter(|mask| mask.static_match(&topic, access)) {
            if !mask.has_query() {
                return Ok(Decision::Allow);
            }

            let host_id = caller.host_id.as_deref().ok_or(AclError::MissingHostId)?;
            let queries = self.relationship_queries(mask, &topic, host_id);
            if access == AccessType::Write && queries.first().is_some_and(is_self_message) {
                return Ok(Decision::Deny(DenyReason::SelfMessage));
            }

            match self.verify_all(&queries).await {
                Ok(true) => return Ok(Decision::Allow),
                Ok(false) => {
                    if fallback != DenyReason::OracleFailed {
                        fallback = DenyReason::OracleDenied;
                    }
                }
                Err(e) => {
                    tracing::warn!(topic = %request.topic, mask = %mask, error = %e, "relationship oracle failed");
                    fallback = DenyReason::OracleFailed;
                }
            }
        }
        Ok(Decision::Deny(fallback))
    }

    /// Union of the masks of every role the caller holds.
    fn masks(&self, caller: &Caller, access: AccessType) -> Result<Vec<Mask>, AclError> {
        let mut masks = Vec::new();
        for role in &caller.roles {
            masks.extend(masks_for(
                self.grammar,
                *role,
                access,
                &self.authority_id,
                caller.host_id.as_deref(),
            )?);
        }
        Ok(masks)
    }

    /// Resolves the deferred segments of `mask` against `topic`. Every
    /// returned query must hold.
    ///
    /// The source is the sender when the mask's sender is deferred. The
    /// target is the agent segment when it is deferred (always, under the
    /// flat grammar), otherwise the agency segment. When both the agency and
    /// the agent are deferred, a second query ties the agent to the agency:
    /// the source (or, without one, the target itself) must be a local agent
    /// of that agency. Together with the sibling check this places the
    /// target in the named agency.
    fn relationship_queries(
        &self,
        mask: &Mask,
        topic: &Topic,
        host_id: &str,
    ) -> Vec<RelationshipQuery> {
        let deferred = |index: usize| mask.segments()[index] == token::QUERY;
        let source = deferred(SENDER).then(|| topic.segment(SENDER));
        let agent_index = self.grammar.agent_index();
        let agent_id = topic.segment(agent_index);

        match self.grammar.agency_index() {
            Some(agency_index) if !deferred(agent_index) => {
                vec![RelationshipQuery::agency(host_id, source, topic.segment(agency_index))]
            }
            Some(agency_index) if deferred(agency_index) => vec![
                RelationshipQuery::agent(host_id, source, agent_id),
                RelationshipQuery::agency(
                    host_id,
                    Some(source.unwrap_or(agent_id)),
                    topic.segment(agency_index),
                ),
            ],
            _ => vec![RelationshipQuery::agent(host_id, source, agent_id)],
        }
    }

    /// Asks the oracle each query in turn, stopping at the first refusal.
    async fn verify_all(&self, queries: &[RelationshipQuery]) -> Result<bool, OracleError> {
        for query in queries {
            if !self.oracle.verify_relationship(query).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn is_self_message(query: &RelationshipQuery) -> bool {
    match (&query.source_id, query.target()) {
        (Some(source), Ok(target)) => source == target.id(),
        _ => false,
    }
}
