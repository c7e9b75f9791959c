//! Startup errors of the server process.

use crate::config::ConfigError;
use hive_authority::{AuthorityError, DiscoveryError};
use hive_db::PoolError;
use hive_host::{HostError, TokenError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] PoolError),

    #[error(transparent)]
    Authority(#[from] AuthorityError),

    #[error(transparent)]
    Host(#[from] HostError),

    /// The discovery HTTP client could not be built.
    #[error("discovery client: {0}")]
    Discovery(#[from] DiscoveryError),

    /// The token HTTP client could not be built.
    #[error("token client: {0}")]
    Token(#[from] TokenError),

    /// A NATS deployment needs `authority.discovery_url` or a complete
    /// `[discovery]` section.
    #[error("no discovery source configured")]
    NoDiscovery,

    #[error("server i/o failed: {0}")]
    Io(#[from] std::io::Error),
}
