//! Callback registry and dispatch on top of a [`Transport`].

use crate::clock::TrustedClock;
use crate::error::{BrokerError, CallbackError};
use crate::transport::{InboundMessage, Transport};
use futures::future::BoxFuture;
use futures::FutureExt;
use hive_types::topic::{route_matches, strip_sender};
use hive_types::{BrokerMessage, Grammar, ProtocolEvent, StampedEvent, Topic};
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Capacity of the channel between the transport and the dispatcher.
const INBOUND_CAPACITY: usize = 1024;

/// Capacity of the publish failure broadcast channel.
const FAILURE_CAPACITY: usize = 256;

/// A subscription callback.
pub type Callback = Arc<dyn Fn(BrokerMessage) -> BoxFuture<'static, Result<(), CallbackError>> + Send + Sync>;

/// Wraps an async closure into a [`Callback`].
pub fn callback<F, Fut>(f: F) -> Callback
where
    F: Fn(BrokerMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), CallbackError>> + Send + 'static,
{
    Arc::new(move |message| f(message).boxed())
}

/// A fire-and-forget publish that did not reach the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishFailure {
    pub topic: String,
    pub error: String,
}

/// Registered callbacks keyed by route (pattern without its sender segment).
type Registry = Arc<RwLock<HashMap<String, Vec<Callback>>>>;

fn read(registry: &Registry) -> RwLockReadGuard<'_, HashMap<String, Vec<Callback>>> {
    registry.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(registry: &Registry) -> RwLockWriteGuard<'_, HashMap<String, Vec<Callback>>> {
    registry.write().unwrap_or_else(PoisonError::into_inner)
}

/// Publish/subscribe client shared by every component of a process.
///
/// Inbound messages are dispatched to every callback whose route matches,
/// each in its own task: a failing or panicking callback is logged and
/// affects neither its siblings nor the dispatcher. No ordering is
/// guaranteed between or within topics.
pub struct Broker {
    transport: Arc<dyn Transport>,
    grammar: Grammar,
    clock: TrustedClock,
    registry: Registry,
    /// Serializes subscribe/unsubscribe so the transport and the registry
    /// agree on which routes are subscribed.
    subscriptions: tokio::sync::Mutex<()>,
    failures: broadcast::Sender<PublishFailure>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    connected: AtomicBool,
}

impl Broker {
    pub fn new(transport: Arc<dyn Transport>, grammar: Grammar, clock: TrustedClock) -> Self {
        let (failures, _) = broadcast::channel(FAILURE_CAPACITY);
        Self {
            transport,
            grammar,
            clock,
            registry: Arc::new(RwLock::new(HashMap::new())),
            subscriptions: tokio::sync::Mutex::new(()),
            failures,
            dispatcher: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    pub fn grammar(&self) -> Grammar {
        self.grammar
    }

    pub fn clock(&self) -> &TrustedClock {
        &self.clock
    }

    /// Trusted current time, RFC 3339 with milliseconds.
    pub fn now(&self) -> String {
        self.clock.now()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Connects the transport and starts dispatching inbound messages.
    ///
    /// # Errors
    ///
    /// Returns the transport's error if the connection fails.
    pub async fn connect(&self, credential: &str, address: &str) -> Result<(), BrokerError> {
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        self.transport.connect(credential, address, tx).await?;

        let handle = tokio::spawn(dispatch_loop(rx, Arc::clone(&self.registry), self.grammar));
        let previous = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!(address, grammar = %self.grammar, "broker connected");
        Ok(())
    }

    /// Disconnects the transport, stops dispatching, and drops every
    /// registered callback.
    ///
    /// # Errors
    ///
    /// Returns the transport's error; local state is cleared regardless.
    pub async fn disconnect(&self) -> Result<(), BrokerError> {
        self.connected.store(false, Ordering::SeqCst);
        write(&self.registry).clear();
        let dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(dispatcher) = dispatcher {
            dispatcher.abort();
        }
        self.transport.disconnect().await?;
        tracing::info!("broker disconnected");
        Ok(())
    }

    /// Registers `callback` for every message matching `pattern`.
    ///
    /// The sender segment of `pattern` is passed to the transport as is and
    /// stripped for dispatch. The transport subscription is made once per
    /// route; further callbacks for the same route only join the registry.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::InvalidPattern` for a pattern without a sender
    /// segment, or the transport's error (nothing is registered then).
    pub async fn subscribe(&self, pattern: &str, callback: Callback) -> Result<(), BrokerError> {
        let route = strip_sender(pattern)
            .ok_or_else(|| BrokerError::InvalidPattern(pattern.to_string()))?
            .to_string();

        let _guard = self.subscriptions.lock().await;
        let first = !read(&self.registry).contains_key(&route);
        if first {
            self.transport.subscribe(pattern).await?;
            tracing::debug!(pattern, "subscribed");
        }
        write(&self.registry).entry(route).or_default().push(callback);
        Ok(())
    }

    /// Removes every callback registered for `pattern`'s route.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::InvalidPattern` for a pattern without a sender
    /// segment, or the transport's error.
    pub async fn unsubscribe(&self, pattern: &str) -> Result<(), BrokerError> {
        let route = strip_sender(pattern)
            .ok_or_else(|| BrokerError::InvalidPattern(pattern.to_string()))?;

        let _guard = self.subscriptions.lock().await;
        let removed = write(&self.registry).remove(route).is_some();
        if removed {
            self.transport.unsubscribe(pattern).await?;
            tracing::debug!(pattern, "unsubscribed");
        }
        Ok(())
    }

    /// Number of callbacks registered for `pattern`'s route.
    pub fn callback_count(&self, pattern: &str) -> usize {
        strip_sender(pattern)
            .and_then(|route| read(&self.registry).get(route).map(Vec::len))
            .unwrap_or(0)
    }

    /// Publishes without waiting for the transport.
    ///
    /// Failures are logged and sent to [`Broker::publish_failures`]
    /// subscribers.
    pub fn publish(&self, message: BrokerMessage) {
        let topic = message.topic.to_string();
        let body = match message.encode() {
            Ok(body) => body,
            Err(e) => {
                report_failure(&self.failures, topic, e.to_string());
                return;
            }
        };
        let transport = Arc::clone(&self.transport);
        let failures = self.failures.clone();
        tokio::spawn(async move {
            if let Err(e) = transport.publish(&topic, body).await {
                report_failure(&failures, topic, e.to_string());
            }
        });
    }

    /// Publishes and waits for the transport's acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError` if encoding or the transport fails.
    pub async fn publish_async(&self, message: &BrokerMessage) -> Result<(), BrokerError> {
        let body = message.encode()?;
        self.transport
            .publish(&message.topic.to_string(), body)
            .await
    }

    /// Builds an EVENT envelope for `event`, stamped with trusted time.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Protocol` if the event cannot be flattened.
    pub fn event(&self, topic: Topic, event: ProtocolEvent) -> Result<BrokerMessage, BrokerError> {
        let data = StampedEvent::new(event, self.now()).to_event_data()?;
        Ok(BrokerMessage::event(topic, data))
    }

    /// Stream of fire-and-forget publishes that failed.
    pub fn publish_failures(&self) -> broadcast::Receiver<PublishFailure> {
        self.failures.subscribe()
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        if let Ok(mut dispatcher) = self.dispatcher.lock() {
            if let Some(handle) = dispatcher.take() {
                handle.abort();
            }
        }
    }
}

fn report_failure(failures: &broadcast::Sender<PublishFailure>, topic: String, error: String) {
    tracing::warn!(topic = %topic, error = %error, "publish failed");
    // No receivers is fine: the failure is already logged.
    let _ = failures.send(PublishFailure { topic, error });
}

async fn dispatch_loop(mut inbound: mpsc::Receiver<InboundMessage>, registry: Registry, grammar: Grammar) {
    while let Some(raw) = inbound.recv().await {
        dispatch(&registry, grammar, raw);
    }
    tracing::debug!("inbound stream closed, dispatcher stopping");
}

/// Decodes one inbound message and fans it out. Returns the number of
/// callbacks started.
fn dispatch(registry: &Registry, grammar: Grammar, raw: InboundMessage) -> usize {
    let topic = match Topic::parse(&raw.topic, grammar) {
        Ok(topic) => topic,
        Err(e) => {
            tracing::warn!(topic = %raw.topic, error = %e, "dropping message with malformed topic");
            return 0;
        }
    };
    let message = match BrokerMessage::decode(topic, &raw.payload) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(topic = %raw.topic, error = %e, "dropping malformed envelope");
            return 0;
        }
    };

    let route = message.topic.route();
    let callbacks: Vec<Callback> = read(registry)
        .iter()
        .filter(|(pattern, _)| route_matches(pattern, &route))
        .flat_map(|(_, callbacks)| callbacks.iter().cloned())
        .collect();

    for callback in &callbacks {
        let callback = Arc::clone(callback);
        let message = message.clone();
        let topic = raw.topic.clone();
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(async move { callback(message).await })
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(topic = %topic, error = %e, "subscription callback failed");
                }
                Err(_) => {
                    tracing::error!(topic = %topic, "subscription callback panicked");
                }
            }
        });
    }
    callbacks.len()
}
