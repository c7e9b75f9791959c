//! Hive server library logic.
//!
//! Wires the SQLite store, the access evaluator, the authority service and
//! an optional in-process host into one process, and serves the HTTP
//! surface brokers and hosts talk to.

pub mod api;
pub mod config;
pub mod error;
pub mod hook;
pub mod node;
pub mod store;

use axum::{
    routing::{get, post},
    Extension, Router,
};
use hive_acl::AccessEvaluator;
use hive_authority::{DiscoveryMetadata, DISCOVERY_PATH};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub use error::ServerError;
pub use node::Node;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Decides broker ACL requests.
    pub evaluator: Arc<AccessEvaluator>,
    /// The served discovery document, if configured.
    pub discovery: Option<DiscoveryMetadata>,
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/api/acl", post(api::acl_handler))
        .route(DISCOVERY_PATH, get(api::discovery_handler))
        .layer(Extension(Arc::new(state)))
        .layer(TraceLayer::new_for_http())
}
