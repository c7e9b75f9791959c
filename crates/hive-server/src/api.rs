//! HTTP handlers: health, the broker ACL hook, and the discovery document.

use crate::AppState;
use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use hive_acl::{AccessRequest, Caller};
use hive_authority::DiscoveryMetadata;
use hive_types::{AccessType, Role};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

/// Health check handler.
///
/// Returns `200 OK` with server status and version.
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Body of `POST /api/acl`, as sent by a broker's authorization hook.
#[derive(Debug, Deserialize)]
pub struct AclRequest {
    /// 1 = READ, 2 = WRITE, 3 = READ_WRITE, 4 = SUBSCRIBE.
    pub access: AccessType,
    pub topic: String,
    #[serde(default)]
    pub host_id: Option<String>,
    #[serde(default)]
    pub roles: Vec<Role>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AclResult {
    Allow,
    Deny,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AclResponse {
    pub result: AclResult,
}

/// Handler for `POST /api/acl`.
///
/// A denial is `200` with `"deny"`; an invariant violation in the request
/// (a host role without a host id) is `500`, also with `"deny"`.
pub async fn acl_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<AclRequest>,
) -> (StatusCode, Json<AclResponse>) {
    let request = AccessRequest::new(payload.access, payload.topic);
    let caller = Caller {
        host_id: payload.host_id,
        roles: payload.roles,
    };
    match state.evaluator.check_access(&request, &caller).await {
        Ok(allowed) => {
            let result = if allowed {
                AclResult::Allow
            } else {
                AclResult::Deny
            };
            (StatusCode::OK, Json(AclResponse { result }))
        }
        Err(e) => {
            tracing::error!(
                access = %request.access,
                topic = %request.topic,
                error = %e,
                "acl request violates an invariant"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(AclResponse {
                    result: AclResult::Deny,
                }),
            )
        }
    }
}

/// Handler for `GET /.well-known/hive-configuration`.
pub async fn discovery_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<DiscoveryMetadata>, ApiError> {
    state
        .discovery
        .clone()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("discovery is not configured".to_string()))
}
