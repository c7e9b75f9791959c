//! Hive hosts and agents.
//!
//! A [`Host`] finds its authority, exchanges its credentials for a broker
//! token, and announces itself. The authority answers with the plugins and
//! agents the host should run; the host connects one [`Agency`] per agency
//! id and one [`Agent`] per agent, and keeps them in step with later
//! `agent_connect` and `agent_disconnect` relays.
//!
//! Agents of one agency elect a single representative through
//! [`LeaderSlot`]: the earliest claim wins, ties go to the lowest agent id.

pub mod agency;
pub mod agent;
pub mod election;
pub mod error;
pub mod events;
pub mod host;
pub mod token;

pub use agency::Agency;
pub use agent::{Agent, AgentState, DEFAULT_CLAIM_WINDOW};
pub use election::{Claim, LeaderSlot, Offer};
pub use error::{HostError, TokenError};
pub use events::HostEvent;
pub use host::{Host, HostConfig, HostState, DEFAULT_RETRY_DELAY};
pub use token::{AccessToken, HttpTokenClient, StaticTokenProvider, TokenProvider};
