//! A whole node over the in-process hub: SQLite-backed authority, an
//! in-process host, and the HTTP discovery document it bootstraps from.

use std::sync::Arc;
use std::time::Duration;

use hive_broker::{callback, Broker, BrokerError, TrustedClock};
use hive_db::{
    insert_agency, insert_agent, insert_host, insert_plugin, install_plugin, set_agent_enabled,
};
use hive_host::{HostEvent, HostState};
use hive_server::config::{parse_config, HostSettings};
use hive_server::error::ServerError;
use hive_server::{app, Node};
use hive_types::{
    AgencyRecord, AgentRecord, ChangeOp, EntityChange, EntityKind, Grammar, HostRecord,
    PluginRecord, ProtocolEvent, TopicScheme,
};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

// ── Fixtures ─────────────────────────────────────────────────────────

const CONFIG: &str = r#"
[broker]
transport = "memory"
grammar = "nested"

[discovery]
broker_address = "memory"
token_endpoint = "memory"
"#;

fn build_node(dir: &TempDir, discovery_url: Option<String>) -> Node {
    let mut config = parse_config(CONFIG).expect("config should parse");
    config.database.path = dir
        .path()
        .join("hive.db")
        .to_str()
        .expect("utf-8 path")
        .to_string();
    config.authority.discovery_url = discovery_url;
    config.host = Some(HostSettings {
        id: "h1".into(),
        secret: String::new(),
        claim_window_ms: 50,
        retry_delay_secs: 1,
    });
    let node = Node::build(config).expect("node should build");

    {
        let conn = node.store().pool().get().expect("should get a connection");
        for host in ["h1", "h2"] {
            insert_host(
                &conn,
                &HostRecord {
                    id: host.into(),
                    authority_id: "authority".into(),
                    name: format!("host {host}"),
                },
            )
            .expect("should insert host");
        }
        insert_agency(
            &conn,
            &AgencyRecord {
                id: "g1".into(),
                name: "agency g1".into(),
            },
        )
        .expect("should insert agency");
        for id in ["a1", "a2"] {
            insert_agent(
                &conn,
                &AgentRecord {
                    id: id.into(),
                    agency_id: "g1".into(),
                    host_id: "h1".into(),
                    name: format!("agent {id}"),
                    enabled: true,
                },
            )
            .expect("should insert agent");
        }
        insert_plugin(
            &conn,
            &PluginRecord {
                id: "p1".into(),
                name: "plugin p1".into(),
                version: "1.0.0".into(),
            },
        )
        .expect("should insert plugin");
        install_plugin(&conn, "h1", "p1").expect("should install plugin");
    }
    node
}

async fn next_matching(
    events: &mut broadcast::Receiver<HostEvent>,
    matches: impl Fn(&HostEvent) -> bool,
) -> HostEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event channel open");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event should arrive")
}

async fn wait_for_local_agents(events: &mut broadcast::Receiver<HostEvent>, count: usize) {
    for _ in 0..count {
        next_matching(events, |e| {
            matches!(e, HostEvent::AgentConnected { local: true, .. })
        })
        .await;
    }
}

// ── Building ─────────────────────────────────────────────────────────

fn nats_config(dir: &TempDir, discovery_url: Option<String>) -> hive_server::config::Config {
    let mut config =
        parse_config("[broker]\ntransport = \"nats\"\n").expect("config should parse");
    config.database.path = dir
        .path()
        .join("hive.db")
        .to_str()
        .expect("utf-8 path")
        .to_string();
    config.authority.discovery_url = discovery_url;
    config.host = Some(HostSettings {
        id: "h1".into(),
        secret: "hunter2".into(),
        claim_window_ms: 50,
        retry_delay_secs: 1,
    });
    config
}

#[tokio::test]
async fn nats_node_builds_its_http_clients() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let node = Node::build(nats_config(&dir, Some("https://auth.example.com".into())))
        .expect("node should build");
    assert!(node.hub().is_none());
    assert!(node.host().is_some());
}

#[tokio::test]
async fn nats_node_without_discovery_is_rejected() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let err = match Node::build(nats_config(&dir, None)) {
        Ok(_) => panic!("should require a discovery source"),
        Err(e) => e,
    };
    assert!(matches!(err, ServerError::NoDiscovery));
}

// ── Bootstrap ────────────────────────────────────────────────────────

#[tokio::test]
async fn host_bootstraps_from_the_served_discovery_document() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("should bind");
    let addr = listener.local_addr().expect("should have an address");

    let node = build_node(&dir, Some(format!("http://{addr}")));
    let router = app(node.state().clone());
    let server = tokio::spawn(async move { axum::serve(listener, router).await });

    let host = Arc::clone(node.host().expect("host configured"));
    let mut events = host.subscribe_events();
    let tasks = node.start();

    next_matching(&mut events, |e| {
        matches!(e, HostEvent::PluginRegistered { plugin_id } if plugin_id == "p1")
    })
    .await;
    wait_for_local_agents(&mut events, 2).await;

    assert_eq!(host.state(), HostState::Connected);
    assert_eq!(host.agent_ids().await.expect("host running"), ["a1", "a2"]);

    // The lower id wins when both claim at once; either way one of them
    // ends up representing g1.
    let agency = host
        .agency("g1")
        .await
        .expect("host running")
        .expect("g1 tracked");
    tokio::time::timeout(Duration::from_secs(5), async {
        while agency.representative().is_none() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("g1 should elect a representative");

    node.shutdown().await;
    assert_eq!(host.state(), HostState::Stopped);
    for task in tasks {
        task.abort();
    }
    server.abort();
}

#[tokio::test]
async fn disabling_an_agent_in_the_store_disconnects_it() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let node = build_node(&dir, None);
    let host = Arc::clone(node.host().expect("host configured"));
    let mut events = host.subscribe_events();
    let tasks = node.start();
    wait_for_local_agents(&mut events, 2).await;

    {
        let conn = node.store().pool().get().expect("should get a connection");
        set_agent_enabled(&conn, "a2", false).expect("should disable a2");
    }
    node.service()
        .expect("authority configured")
        .notify_change(&EntityChange::new(EntityKind::Agent, "a2", ChangeOp::Disabled))
        .await
        .expect("should relay");

    next_matching(&mut events, |e| {
        matches!(e, HostEvent::AgentDisconnected { agent_id, .. } if agent_id == "a2")
    })
    .await;
    assert_eq!(host.agent_ids().await.expect("host running"), ["a1"]);

    node.shutdown().await;
    for task in tasks {
        task.abort();
    }
}

// ── Access control on the hub ────────────────────────────────────────

#[tokio::test]
async fn foreign_host_cannot_impersonate_or_eavesdrop() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let node = build_node(&dir, None);
    let hub = Arc::clone(node.hub().expect("memory transport"));

    let rogue = Broker::new(
        Arc::new(hub.transport()),
        Grammar::Nested,
        TrustedClock::new(),
    );
    rogue
        .connect("h2", "memory")
        .await
        .expect("should connect");
    let scheme = TopicScheme::new(Grammar::Nested, "authority").expect("valid scheme");

    let impersonation = rogue
        .event(
            scheme.authority("h1"),
            ProtocolEvent::HostConnect {
                host_id: "h1".into(),
            },
        )
        .expect("should build event");
    let err = rogue
        .publish_async(&impersonation)
        .await
        .expect_err("writing as h1 should be denied");
    assert!(matches!(err, BrokerError::Denied(_)));

    let own = rogue
        .event(
            scheme.authority("h2"),
            ProtocolEvent::HostConnect {
                host_id: "h2".into(),
            },
        )
        .expect("should build event");
    rogue
        .publish_async(&own)
        .await
        .expect("writing as itself should be allowed");

    let pattern = scheme.agent("+", "g1", "a1").to_string();
    let err = rogue
        .subscribe(&pattern, callback(|_| async { Ok(()) }))
        .await
        .expect_err("h2 hosts no agent of g1");
    assert!(matches!(err, BrokerError::Denied(_)));
}
