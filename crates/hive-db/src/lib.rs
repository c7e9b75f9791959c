//! Database layer for the Hive platform.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! embedded SQL migrations, the read-only snapshot queries the authority
//! serves hosts from, and the relationship checks behind the access-control
//! oracle.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: concurrent readers with a single writer, which
//!   matches the access pattern of a directory that is read on every ACL
//!   check and written only by administration.
//! - **Plain functions over `&Connection`**: callers decide where blocking
//!   happens (the server wraps them in `spawn_blocking`).
//! - **Embedded migrations**: SQL files are compiled into the binary via
//!   `include_str!`, so the schema cannot drift from the queries.

mod directory;
mod migrations;
mod pool;
mod relationship;

pub use directory::{
    delete_agent, get_agent, get_agent_host_id, get_host, insert_agency, insert_agent,
    insert_host, insert_plugin, install_plugin, list_agents_for_host, list_hosts_for_agency,
    list_plugins_for_host, set_agent_enabled,
};
pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, open_store, DbPool, DbRuntimeSettings, PoolError};
pub use relationship::verify_relationship;

use thiserror::Error;

/// Errors returned by queries.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid relationship query: {0}")]
    InvalidQuery(#[from] hive_types::RelationshipError),
}
