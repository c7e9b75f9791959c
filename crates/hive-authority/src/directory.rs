//! Read-only view of the data store used by the authority.

use crate::error::DirectoryError;
use async_trait::async_trait;
use hive_types::{AgentRecord, HostRecord, PluginRecord};

/// Snapshot queries the authority needs to welcome hosts and relay
/// changes.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn host(&self, host_id: &str) -> Result<Option<HostRecord>, DirectoryError>;

    async fn plugins_for_host(&self, host_id: &str) -> Result<Vec<PluginRecord>, DirectoryError>;

    /// Every agent the host owns, enabled or not.
    async fn agents_for_host(&self, host_id: &str) -> Result<Vec<AgentRecord>, DirectoryError>;

    /// Id of the host that owns the agent.
    async fn agent_host(&self, agent_id: &str) -> Result<Option<String>, DirectoryError>;

    async fn agent(&self, agent_id: &str) -> Result<Option<AgentRecord>, DirectoryError>;

    /// Hosts running at least one enabled agent of the agency.
    async fn hosts_for_agency(&self, agency_id: &str) -> Result<Vec<String>, DirectoryError>;
}
