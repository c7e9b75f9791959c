//! Lifecycle notifications a host emits to its observers.

use serde::Serialize;

/// Something changed in the set of plugins, agencies, or agents a host
/// tracks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    PluginRegistered {
        plugin_id: String,
    },
    AgencyConnected {
        agency_id: String,
    },
    /// `local` is false for agents running on another host.
    AgentConnected {
        agent_id: String,
        agency_id: String,
        local: bool,
    },
    AgentDisconnected {
        agent_id: String,
        agency_id: String,
        local: bool,
    },
    AgencyDisconnected {
        agency_id: String,
    },
}
