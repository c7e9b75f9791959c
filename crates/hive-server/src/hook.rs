//! Plugs the access evaluator into the in-process hub.

use async_trait::async_trait;
use hive_acl::{AccessEvaluator, AccessRequest, Caller};
use hive_broker::AccessHook;
use hive_types::AccessType;
use std::sync::Arc;

/// Authorizes hub clients by their connection credential.
///
/// The authority connects with its configured credential; any other
/// credential is taken to be the id of the connecting host.
pub struct EvaluatorHook {
    evaluator: Arc<AccessEvaluator>,
    authority_credential: String,
}

impl EvaluatorHook {
    pub fn new(evaluator: Arc<AccessEvaluator>, authority_credential: impl Into<String>) -> Self {
        Self {
            evaluator,
            authority_credential: authority_credential.into(),
        }
    }

    fn caller(&self, credential: &str) -> Caller {
        if credential == self.authority_credential {
            Caller::authority()
        } else {
            Caller::host(credential)
        }
    }
}

#[async_trait]
impl AccessHook for EvaluatorHook {
    async fn authorize(&self, credential: &str, access: AccessType, topic: &str) -> bool {
        let request = AccessRequest::new(access, topic);
        match self
            .evaluator
            .check_access(&request, &self.caller(credential))
            .await
        {
            Ok(allowed) => allowed,
            Err(e) => {
                tracing::error!(access = %access, topic, error = %e, "access check failed");
                false
            }
        }
    }
}
