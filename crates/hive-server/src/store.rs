//! SQLite-backed adapters for the authority directory and the ACL oracle.

use async_trait::async_trait;
use hive_acl::{OracleError, RelationshipOracle};
use hive_authority::{Directory, DirectoryError};
use hive_db::{DbError, DbPool};
use hive_types::{AgentRecord, HostRecord, PluginRecord, RelationshipQuery};
use rusqlite::Connection;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("db connection failed: {0}")]
    Pool(#[from] r2d2::Error),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<StoreError> for DirectoryError {
    fn from(err: StoreError) -> Self {
        DirectoryError::Backend(err.to_string())
    }
}

impl From<StoreError> for OracleError {
    fn from(err: StoreError) -> Self {
        OracleError::Lookup(err.to_string())
    }
}

/// The data store, queried on the blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn run<T, F>(&self, query: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, DbError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<T, StoreError> {
            let conn = pool.get()?;
            Ok(query(&*conn)?)
        })
        .await?
    }
}

#[async_trait]
impl Directory for SqliteStore {
    async fn host(&self, host_id: &str) -> Result<Option<HostRecord>, DirectoryError> {
        let host_id = host_id.to_string();
        Ok(self
            .run(move |conn| hive_db::get_host(conn, &host_id))
            .await?)
    }

    async fn plugins_for_host(&self, host_id: &str) -> Result<Vec<PluginRecord>, DirectoryError> {
        let host_id = host_id.to_string();
        Ok(self
            .run(move |conn| hive_db::list_plugins_for_host(conn, &host_id))
            .await?)
    }

    async fn agents_for_host(&self, host_id: &str) -> Result<Vec<AgentRecord>, DirectoryError> {
        let host_id = host_id.to_string();
        Ok(self
            .run(move |conn| hive_db::list_agents_for_host(conn, &host_id))
            .await?)
    }

    async fn agent_host(&self, agent_id: &str) -> Result<Option<String>, DirectoryError> {
        let agent_id = agent_id.to_string();
        Ok(self
            .run(move |conn| hive_db::get_agent_host_id(conn, &agent_id))
            .await?)
    }

    async fn agent(&self, agent_id: &str) -> Result<Option<AgentRecord>, DirectoryError> {
        let agent_id = agent_id.to_string();
        Ok(self
            .run(move |conn| hive_db::get_agent(conn, &agent_id))
            .await?)
    }

    async fn hosts_for_agency(&self, agency_id: &str) -> Result<Vec<String>, DirectoryError> {
        let agency_id = agency_id.to_string();
        Ok(self
            .run(move |conn| hive_db::list_hosts_for_agency(conn, &agency_id))
            .await?)
    }
}

#[async_trait]
impl RelationshipOracle for SqliteStore {
    async fn verify_relationship(&self, query: &RelationshipQuery) -> Result<bool, OracleError> {
        let query = query.clone();
        Ok(self
            .run(move |conn| hive_db::verify_relationship(conn, &query))
            .await?)
    }
}
