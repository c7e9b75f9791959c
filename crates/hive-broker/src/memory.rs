//! In-process transport.
//!
//! A [`MemoryHub`] plays the role of the broker server: clients connect with
//! a credential, subscribe with `+` wildcard patterns, and receive every
//! message whose topic matches one of their patterns. An optional
//! [`AccessHook`] is consulted the way a production broker consults its
//! authorization plugin: SUBSCRIBE and WRITE are rejected with
//! `BrokerError::Denied`, READ is checked per delivery and silently skips
//! the subscriber.

use crate::error::BrokerError;
use crate::transport::{AccessHook, InboundMessage, Transport};
use async_trait::async_trait;
use hive_types::topic::route_matches;
use hive_types::AccessType;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use uuid::Uuid;

struct Client {
    credential: String,
    inbound: mpsc::Sender<InboundMessage>,
    patterns: HashSet<String>,
}

/// Shared in-process message hub.
pub struct MemoryHub {
    clients: Mutex<HashMap<Uuid, Client>>,
    hook: Option<Arc<dyn AccessHook>>,
}

impl MemoryHub {
    /// Creates a hub that authorizes everything.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            clients: Mutex::new(HashMap::new()),
            hook: None,
        })
    }

    /// Creates a hub that consults `hook` for every client operation.
    pub fn with_access_hook(hook: Arc<dyn AccessHook>) -> Arc<Self> {
        Arc::new(Self {
            clients: Mutex::new(HashMap::new()),
            hook: Some(hook),
        })
    }

    /// Creates a new, not yet connected client of this hub.
    pub fn transport(self: &Arc<Self>) -> MemoryTransport {
        MemoryTransport {
            hub: Arc::clone(self),
            id: Uuid::new_v4(),
        }
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.clients.lock().map(|clients| clients.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<Uuid, Client>>, BrokerError> {
        self.clients
            .lock()
            .map_err(|_| BrokerError::Transport("memory hub lock poisoned".to_string()))
    }

    async fn allowed(&self, credential: &str, access: AccessType, topic: &str) -> bool {
        match &self.hook {
            Some(hook) => hook.authorize(credential, access, topic).await,
            None => true,
        }
    }

    fn credential_of(&self, id: Uuid) -> Result<String, BrokerError> {
        self.lock()?
            .get(&id)
            .map(|client| client.credential.clone())
            .ok_or(BrokerError::NotConnected)
    }

    async fn deliver(&self, topic: &str, payload: &[u8]) -> Result<usize, BrokerError> {
        let targets: Vec<(String, mpsc::Sender<InboundMessage>)> = self
            .lock()?
            .values()
            .filter(|client| {
                client
                    .patterns
                    .iter()
                    .any(|pattern| route_matches(pattern, topic))
            })
            .map(|client| (client.credential.clone(), client.inbound.clone()))
            .collect();

        let mut delivered = 0;
        for (credential, inbound) in targets {
            if !self.allowed(&credential, AccessType::Read, topic).await {
                tracing::debug!(topic, "read denied, skipping subscriber");
                continue;
            }
            let message = InboundMessage {
                topic: topic.to_string(),
                payload: payload.to_vec(),
            };
            if inbound.send(message).await.is_ok() {
                delivered += 1;
            }
        }
        Ok(delivered)
    }
}

/// One client connection to a [`MemoryHub`].
pub struct MemoryTransport {
    hub: Arc<MemoryHub>,
    id: Uuid,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(
        &self,
        credential: &str,
        _address: &str,
        inbound: mpsc::Sender<InboundMessage>,
    ) -> Result<(), BrokerError> {
        self.hub.lock()?.insert(
            self.id,
            Client {
                credential: credential.to_string(),
                inbound,
                patterns: HashSet::new(),
            },
        );
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<(), BrokerError> {
        let credential = self.hub.credential_of(self.id)?;
        if !self
            .hub
            .allowed(&credential, AccessType::Subscribe, pattern)
            .await
        {
            return Err(BrokerError::Denied(format!("subscribe {pattern}")));
        }
        self.hub
            .lock()?
            .get_mut(&self.id)
            .ok_or(BrokerError::NotConnected)?
            .patterns
            .insert(pattern.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, pattern: &str) -> Result<(), BrokerError> {
        if let Some(client) = self.hub.lock()?.get_mut(&self.id) {
            client.patterns.remove(pattern);
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        let credential = self.hub.credential_of(self.id)?;
        if !self.hub.allowed(&credential, AccessType::Write, topic).await {
            return Err(BrokerError::Denied(format!("write {topic}")));
        }
        let delivered = self.hub.deliver(topic, &payload).await?;
        tracing::trace!(topic, delivered, "memory hub delivered message");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        self.hub.lock()?.remove(&self.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DenyWrites;

    #[async_trait]
    impl AccessHook for DenyWrites {
        async fn authorize(&self, _credential: &str, access: AccessType, _topic: &str) -> bool {
            access != AccessType::Write
        }
    }

    #[tokio::test]
    async fn delivers_to_matching_subscribers_only() {
        let hub = MemoryHub::new();
        let alice = hub.transport();
        let bob = hub.transport();
        let (alice_tx, mut alice_rx) = mpsc::channel(8);
        let (bob_tx, mut bob_rx) = mpsc::channel(8);
        alice
            .connect("alice", "memory", alice_tx)
            .await
            .expect("should connect");
        bob.connect("bob", "memory", bob_tx)
            .await
            .expect("should connect");
        alice
            .subscribe("+/auth/h1/-/-")
            .await
            .expect("should subscribe");

        bob.publish("auth/auth/h1/-/-", b"hello".to_vec())
            .await
            .expect("should publish");
        bob.publish("auth/auth/h2/-/-", b"other".to_vec())
            .await
            .expect("should publish");

        let received = alice_rx.recv().await.expect("alice should receive");
        assert_eq!(received.topic, "auth/auth/h1/-/-");
        assert_eq!(received.payload, b"hello");
        assert!(alice_rx.try_recv().is_err(), "non-matching topic leaked");
        assert!(bob_rx.try_recv().is_err());
        assert_eq!(hub.client_count(), 2);
    }

    #[tokio::test]
    async fn hook_rejects_denied_operations() {
        let hub = MemoryHub::with_access_hook(Arc::new(DenyWrites));
        let client = hub.transport();
        let (tx, _rx) = mpsc::channel(8);
        client
            .connect("token", "memory", tx)
            .await
            .expect("should connect");

        client
            .subscribe("+/auth/-/-/-")
            .await
            .expect("subscribe is allowed");
        let err = client
            .publish("h1/auth/-/-/-", Vec::new())
            .await
            .expect_err("write should be denied");
        assert!(matches!(err, BrokerError::Denied(_)));
    }

    #[tokio::test]
    async fn operations_require_connection() {
        let hub = MemoryHub::new();
        let client = hub.transport();
        assert!(matches!(
            client.publish("a/b/c/d", Vec::new()).await,
            Err(BrokerError::NotConnected)
        ));

        let (tx, _rx) = mpsc::channel(8);
        client.connect("t", "memory", tx).await.expect("should connect");
        client.disconnect().await.expect("should disconnect");
        assert_eq!(hub.client_count(), 0);
    }
}
