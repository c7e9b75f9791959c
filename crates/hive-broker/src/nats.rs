//! NATS transport.
//!
//! Topics map onto NATS subjects by turning `/` into `.` and the `+`
//! wildcard into `*`. The broker credential is presented as the NATS
//! connection token; the NATS server's auth callout is expected to run the
//! access-control evaluator.

use crate::error::BrokerError;
use crate::transport::{InboundMessage, Transport};
use async_trait::async_trait;
use futures::StreamExt;
use hive_types::topic::token;
use std::collections::HashMap;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Converts a topic or pattern into a NATS subject.
pub fn to_subject(topic: &str) -> String {
    topic
        .split('/')
        .map(|segment| {
            if segment == token::ANY_INCLUSIVE {
                "*"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Converts a NATS subject back into a topic.
pub fn from_subject(subject: &str) -> String {
    subject.replace('.', "/")
}

#[derive(Default)]
struct NatsState {
    client: Option<async_nats::Client>,
    inbound: Option<mpsc::Sender<InboundMessage>>,
    subscriptions: HashMap<String, JoinHandle<()>>,
}

/// A [`Transport`] backed by an `async-nats` client.
#[derive(Default)]
pub struct NatsTransport {
    state: Mutex<NatsState>,
}

impl NatsTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

fn transport_error(err: impl std::fmt::Display) -> BrokerError {
    BrokerError::Transport(err.to_string())
}

#[async_trait]
impl Transport for NatsTransport {
    async fn connect(
        &self,
        credential: &str,
        address: &str,
        inbound: mpsc::Sender<InboundMessage>,
    ) -> Result<(), BrokerError> {
        let client = async_nats::ConnectOptions::with_token(credential.to_string())
            .connect(address)
            .await
            .map_err(transport_error)?;
        tracing::info!(address, "connected to nats");

        let mut state = self.state.lock().await;
        state.client = Some(client);
        state.inbound = Some(inbound);
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        if state.subscriptions.contains_key(pattern) {
            return Ok(());
        }
        let client = state.client.clone().ok_or(BrokerError::NotConnected)?;
        let inbound = state.inbound.clone().ok_or(BrokerError::NotConnected)?;

        let subject = to_subject(pattern);
        let mut subscriber = client
            .subscribe(subject.clone())
            .await
            .map_err(transport_error)?;

        let handle = tokio::spawn(async move {
            while let Some(message) = subscriber.next().await {
                let inbound_message = InboundMessage {
                    topic: from_subject(&message.subject.to_string()),
                    payload: message.payload.to_vec(),
                };
                if inbound.send(inbound_message).await.is_err() {
                    break;
                }
            }
            tracing::debug!(subject = %subject, "nats subscription stream ended");
        });
        state.subscriptions.insert(pattern.to_string(), handle);
        Ok(())
    }

    async fn unsubscribe(&self, pattern: &str) -> Result<(), BrokerError> {
        // Dropping the subscriber inside the aborted task unsubscribes it.
        if let Some(handle) = self.state.lock().await.subscriptions.remove(pattern) {
            handle.abort();
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        let client = self
            .state
            .lock()
            .await
            .client
            .clone()
            .ok_or(BrokerError::NotConnected)?;
        client
            .publish(to_subject(topic), bytes::Bytes::from(payload))
            .await
            .map_err(transport_error)?;
        client.flush().await.map_err(transport_error)?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        for (_, handle) in state.subscriptions.drain() {
            handle.abort();
        }
        state.inbound = None;
        if let Some(client) = state.client.take() {
            client.flush().await.map_err(transport_error)?;
        }
        Ok(())
    }
}
