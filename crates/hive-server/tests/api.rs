use axum::body::Body;
use axum::http::{Request, StatusCode};
use hive_acl::{AccessEvaluator, RelationshipOracle};
use hive_authority::{DiscoveryMetadata, DISCOVERY_PATH};
use hive_db::{insert_agency, insert_agent, insert_host, open_store, DbRuntimeSettings};
use hive_server::store::SqliteStore;
use hive_server::{app, AppState};
use hive_types::{AgencyRecord, AgentRecord, Grammar, HostRecord};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

// ── Fixtures ─────────────────────────────────────────────────────────

/// A store with host h1 running a1 (enabled) and a2 (disabled) of g1.
fn seeded_store() -> (TempDir, SqliteStore) {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let path = dir.path().join("hive.db");
    let pool = open_store(
        path.to_str().expect("utf-8 path"),
        DbRuntimeSettings::default(),
    )
    .expect("store should open");
    {
        let conn = pool.get().expect("should get a connection");
        insert_host(
            &conn,
            &HostRecord {
                id: "h1".into(),
                authority_id: "auth".into(),
                name: "host h1".into(),
            },
        )
        .expect("should insert host");
        insert_agency(
            &conn,
            &AgencyRecord {
                id: "g1".into(),
                name: "agency g1".into(),
            },
        )
        .expect("should insert agency");
        for (id, enabled) in [("a1", true), ("a2", false)] {
            insert_agent(
                &conn,
                &AgentRecord {
                    id: id.into(),
                    agency_id: "g1".into(),
                    host_id: "h1".into(),
                    name: format!("agent {id}"),
                    enabled,
                },
            )
            .expect("should insert agent");
        }
    }
    (dir, SqliteStore::new(pool))
}

fn state(grammar: Grammar, authority_id: &str, discovery: Option<DiscoveryMetadata>) -> (TempDir, AppState) {
    let (dir, store) = seeded_store();
    let oracle: Arc<dyn RelationshipOracle> = Arc::new(store);
    (
        dir,
        AppState {
            evaluator: Arc::new(AccessEvaluator::new(grammar, authority_id, oracle)),
            discovery,
        },
    )
}

async fn post_acl(state: AppState, body: Value) -> (StatusCode, Value) {
    let response = app(state)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/acl")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .expect("should build request"),
        )
        .await
        .expect("should respond");
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("should read body");
    (
        status,
        serde_json::from_slice(&body).expect("body should be JSON"),
    )
}

async fn get(state: AppState, uri: &str) -> (StatusCode, Value) {
    let response = app(state)
        .oneshot(
            Request::builder()
                .uri(uri)
                .body(Body::empty())
                .expect("should build request"),
        )
        .await
        .expect("should respond");
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("should read body");
    (
        status,
        serde_json::from_slice(&body).expect("body should be JSON"),
    )
}

// ── Health ───────────────────────────────────────────────────────────

#[tokio::test]
async fn health_check_returns_ok() {
    let (_dir, state) = state(Grammar::Nested, "auth", None);
    let (status, body) = get(state, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

// ── ACL hook ─────────────────────────────────────────────────────────

#[tokio::test]
async fn host_may_only_write_its_own_inbox_topic() {
    let (_dir, state) = state(Grammar::Flat, "auth1", None);

    let (status, body) = post_acl(
        state.clone(),
        json!({"access": 2, "topic": "a1/auth1/-/-", "host_id": "a1", "roles": ["host"]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "allow");

    let (_, body) = post_acl(
        state,
        json!({"access": 2, "topic": "a2/auth1/-/-", "host_id": "a1", "roles": ["host"]}),
    )
    .await;
    assert_eq!(body["result"], "deny");
}

#[tokio::test]
async fn agency_write_consults_the_store() {
    let (_dir, state) = state(Grammar::Nested, "auth", None);

    let (_, body) = post_acl(
        state.clone(),
        json!({"access": 2, "topic": "a1/auth/-/g1/-", "host_id": "h1", "roles": ["host"]}),
    )
    .await;
    assert_eq!(body["result"], "allow");

    // a2 is disabled.
    let (_, body) = post_acl(
        state.clone(),
        json!({"access": 2, "topic": "a2/auth/-/g1/-", "host_id": "h1", "roles": ["host"]}),
    )
    .await;
    assert_eq!(body["result"], "deny");

    let (_, body) = post_acl(
        state,
        json!({"access": 4, "topic": "+/auth/-/g1/a1", "host_id": "h1", "roles": ["host"]}),
    )
    .await;
    assert_eq!(body["result"], "allow");
}

#[tokio::test]
async fn read_write_is_always_denied() {
    let (_dir, state) = state(Grammar::Nested, "auth", None);
    let (status, body) = post_acl(
        state,
        json!({"access": 3, "topic": "+/auth/-/-/-", "roles": ["authority"]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "deny");
}

#[tokio::test]
async fn host_role_without_host_id_is_an_invariant_violation() {
    let (_dir, state) = state(Grammar::Nested, "auth", None);
    let (status, body) = post_acl(
        state,
        json!({"access": 1, "topic": "auth/auth/-/g1/-", "roles": ["host"]}),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["result"], "deny");
}

#[tokio::test]
async fn unknown_access_code_is_rejected() {
    let (_dir, state) = state(Grammar::Nested, "auth", None);
    let response = app(state)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/acl")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"access": 9, "topic": "+/auth/-/-/-", "roles": ["authority"]})
                        .to_string(),
                ))
                .expect("should build request"),
        )
        .await
        .expect("should respond");
    assert!(response.status().is_client_error());
}

// ── Discovery ────────────────────────────────────────────────────────

#[tokio::test]
async fn discovery_document_is_served_when_configured() {
    let metadata = DiscoveryMetadata {
        broker_address: "nats://127.0.0.1:4222".into(),
        token_endpoint: "http://127.0.0.1:3000/token".into(),
    };
    let (_dir, state) = state(Grammar::Nested, "auth", Some(metadata));
    let (status, body) = get(state, DISCOVERY_PATH).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["broker_address"], "nats://127.0.0.1:4222");
    assert_eq!(body["token_endpoint"], "http://127.0.0.1:3000/token");
}

#[tokio::test]
async fn discovery_document_is_missing_when_unconfigured() {
    let (_dir, state) = state(Grammar::Nested, "auth", None);
    let (status, _) = get(state, DISCOVERY_PATH).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
