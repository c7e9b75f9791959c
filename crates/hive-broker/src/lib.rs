//! Publish/subscribe messaging for the Hive platform.
//!
//! A [`Broker`] wraps a [`Transport`] (NATS in production, the in-process
//! [`MemoryHub`] in tests and single-node deployments) with:
//!
//! - a callback registry keyed by route, so a subscription with a `+`
//!   sender receives messages from every sender;
//! - isolated dispatch: every callback runs in its own task and a failing
//!   callback is logged without touching the others;
//! - fire-and-forget publishing with failures reported on a channel;
//! - a [`TrustedClock`] that stamps every outgoing protocol event.

pub mod broker;
pub mod clock;
pub mod error;
pub mod memory;
pub mod nats;
pub mod sntp;
pub mod transport;

pub use broker::{callback, Broker, Callback, PublishFailure};
pub use clock::{RefreshPolicy, SystemTimeSource, TimeSource, TrustedClock};
pub use error::{BrokerError, CallbackError, ClockError};
pub use memory::{MemoryHub, MemoryTransport};
pub use nats::NatsTransport;
pub use sntp::SntpTimeSource;
pub use transport::{AccessHook, InboundMessage, Transport};
