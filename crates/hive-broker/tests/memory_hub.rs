//! Two brokers talking through one in-process hub.

use hive_broker::{callback, Broker, CallbackError, MemoryHub, TrustedClock};
use hive_types::{BrokerMessage, Grammar, Payload, ProtocolEvent, StampedEvent, TopicScheme};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

async fn broker_on(hub: &Arc<MemoryHub>, credential: &str) -> Broker {
    let broker = Broker::new(
        Arc::new(hub.transport()),
        Grammar::Nested,
        TrustedClock::new(),
    );
    broker
        .connect(credential, "memory")
        .await
        .expect("should connect");
    broker
}

#[tokio::test]
async fn event_reaches_wildcard_subscriber_with_sender() {
    let hub = MemoryHub::new();
    let authority = broker_on(&hub, "authority").await;
    let host = broker_on(&hub, "host").await;
    let scheme = TopicScheme::new(Grammar::Nested, "auth").expect("valid scheme");

    let (tx, mut rx) = mpsc::unbounded_channel::<BrokerMessage>();
    authority
        .subscribe(
            &scheme.authority("+").to_string(),
            callback(move |message| {
                let tx = tx.clone();
                async move { tx.send(message).map_err(|e| CallbackError::new(e.to_string())) }
            }),
        )
        .await
        .expect("should subscribe");

    let message = host
        .event(
            scheme.authority("h1"),
            ProtocolEvent::HostConnect {
                host_id: "h1".into(),
            },
        )
        .expect("should build event");
    host.publish_async(&message).await.expect("should publish");

    let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("authority should receive")
        .expect("channel open");
    assert_eq!(received.topic.sender(), "h1");
    let Payload::Event(data) = &received.payload else {
        panic!("expected an event");
    };
    let stamped = StampedEvent::from_event_data(data).expect("should decode");
    assert_eq!(
        stamped.event,
        ProtocolEvent::HostConnect {
            host_id: "h1".into()
        }
    );
}

#[tokio::test]
async fn disconnect_stops_delivery() {
    let hub = MemoryHub::new();
    let listener = broker_on(&hub, "listener").await;
    let speaker = broker_on(&hub, "speaker").await;
    let scheme = TopicScheme::new(Grammar::Nested, "auth").expect("valid scheme");

    let (tx, mut rx) = mpsc::unbounded_channel::<BrokerMessage>();
    listener
        .subscribe(
            &scheme.all_hosts("+").to_string(),
            callback(move |message| {
                let tx = tx.clone();
                async move { tx.send(message).map_err(|e| CallbackError::new(e.to_string())) }
            }),
        )
        .await
        .expect("should subscribe");
    listener.disconnect().await.expect("should disconnect");
    assert!(!listener.is_connected());
    assert_eq!(hub.client_count(), 1);

    let message = speaker
        .event(
            scheme.all_hosts("auth"),
            ProtocolEvent::AgentDisconnect {
                agent_id: "a1".into(),
            },
        )
        .expect("should build event");
    speaker.publish_async(&message).await.expect("should publish");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
}
