//! Entity records exchanged between the data store, the authority, and hosts.

use serde::{Deserialize, Serialize};

/// A registered host process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    pub id: String,
    /// The authority the host belongs to.
    pub authority_id: String,
    pub name: String,
}

/// A named group of agents that elects one representative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgencyRecord {
    pub id: String,
    pub name: String,
}

/// An agent, owned by exactly one host and one agency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    pub agency_id: String,
    pub host_id: String,
    pub name: String,
    /// Disabled agents are never connected.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// A plugin installed on a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginRecord {
    pub id: String,
    pub name: String,
    pub version: String,
}

/// Everything a host needs to start, delivered in `host_welcome`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WelcomeSnapshot {
    pub host: HostRecord,
    pub plugins: Vec<PluginRecord>,
    pub agents: Vec<AgentRecord>,
}

impl WelcomeSnapshot {
    /// Decodes the three JSON snapshots carried by a `host_welcome` event.
    ///
    /// # Errors
    ///
    /// Returns the underlying `serde_json` error if any snapshot is invalid.
    pub fn decode(host: &str, plugins: &str, agents: &str) -> Result<Self, serde_json::Error> {
        Ok(Self {
            host: serde_json::from_str(host)?,
            plugins: serde_json::from_str(plugins)?,
            agents: serde_json::from_str(agents)?,
        })
    }
}

/// Kinds of entity the data layer reports changes for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Host,
    Agency,
    Agent,
    Plugin,
}

impl EntityKind {
    /// Returns the canonical string label for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Agency => "agency",
            Self::Agent => "agent",
            Self::Plugin => "plugin",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Created,
    Updated,
    Deleted,
    Enabled,
    Disabled,
}

/// A change notification emitted by the data layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityChange {
    pub kind: EntityKind,
    pub id: String,
    pub op: ChangeOp,
}

impl EntityChange {
    pub fn new(kind: EntityKind, id: impl Into<String>, op: ChangeOp) -> Self {
        Self {
            kind,
            id: id.into(),
            op,
        }
    }
}
