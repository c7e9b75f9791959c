//! The Hive authority.
//!
//! The authority owns the directory of hosts, agencies, agents, and
//! plugins. Hosts find it through its discovery document, announce
//! themselves with `host_connect`, and receive a `host_welcome` snapshot of
//! everything they should run. Later changes to agents are relayed as
//! `agent_connect` and `agent_disconnect` events.

pub mod directory;
pub mod discovery;
pub mod error;
pub mod service;

pub use directory::Directory;
pub use discovery::{
    Authority, Backoff, DiscoveryMetadata, HttpMetadataProvider, MetadataProvider,
    StaticMetadataProvider, DISCOVERY_PATH,
};
pub use error::{AuthorityError, DirectoryError, DiscoveryError};
pub use service::{AgentChangeHandler, AuthorityService, ChangeHandler, RelayContext, ServiceState};
