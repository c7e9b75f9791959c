//! Snapshot queries and record maintenance for hosts, agencies, agents, and
//! plugins.

use crate::DbError;
use hive_types::{AgencyRecord, AgentRecord, HostRecord, PluginRecord};
use rusqlite::{params, Connection, OptionalExtension, Row};

fn agent_from_row(row: &Row<'_>) -> rusqlite::Result<AgentRecord> {
    Ok(AgentRecord {
        id: row.get(0)?,
        agency_id: row.get(1)?,
        host_id: row.get(2)?,
        name: row.get(3)?,
        enabled: row.get(4)?,
    })
}

const AGENT_COLUMNS: &str = "id, agency_id, host_id, name, enabled";

// ── Reads ────────────────────────────────────────────────────────────

/// Loads a host by id.
pub fn get_host(conn: &Connection, host_id: &str) -> Result<Option<HostRecord>, DbError> {
    Ok(conn
        .query_row(
            "SELECT id, authority_id, name FROM hosts WHERE id = ?1",
            [host_id],
            |row| {
                Ok(HostRecord {
                    id: row.get(0)?,
                    authority_id: row.get(1)?,
                    name: row.get(2)?,
                })
            },
        )
        .optional()?)
}

/// Lists the plugins installed on a host, ordered by plugin id.
pub fn list_plugins_for_host(
    conn: &Connection,
    host_id: &str,
) -> Result<Vec<PluginRecord>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT p.id, p.name, p.version
         FROM plugins p
         JOIN host_plugins hp ON hp.plugin_id = p.id
         WHERE hp.host_id = ?1
         ORDER BY p.id",
    )?;
    let plugins = stmt
        .query_map([host_id], |row| {
            Ok(PluginRecord {
                id: row.get(0)?,
                name: row.get(1)?,
                version: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(plugins)
}

/// Lists every agent registered on a host, enabled or not, ordered by id.
pub fn list_agents_for_host(
    conn: &Connection,
    host_id: &str,
) -> Result<Vec<AgentRecord>, DbError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {AGENT_COLUMNS} FROM agents WHERE host_id = ?1 ORDER BY id"
    ))?;
    let agents = stmt
        .query_map([host_id], agent_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(agents)
}

/// Loads an agent by id.
pub fn get_agent(conn: &Connection, agent_id: &str) -> Result<Option<AgentRecord>, DbError> {
    Ok(conn
        .query_row(
            &format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = ?1"),
            [agent_id],
            agent_from_row,
        )
        .optional()?)
}

/// Returns the id of the host that owns an agent.
pub fn get_agent_host_id(conn: &Connection, agent_id: &str) -> Result<Option<String>, DbError> {
    Ok(conn
        .query_row(
            "SELECT host_id FROM agents WHERE id = ?1",
            [agent_id],
            |row| row.get(0),
        )
        .optional()?)
}

/// Lists the hosts running at least one enabled agent of an agency.
pub fn list_hosts_for_agency(conn: &Connection, agency_id: &str) -> Result<Vec<String>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT host_id FROM agents
         WHERE agency_id = ?1 AND enabled = 1
         ORDER BY host_id",
    )?;
    let hosts = stmt
        .query_map([agency_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(hosts)
}

// ── Writes ───────────────────────────────────────────────────────────

pub fn insert_host(conn: &Connection, host: &HostRecord) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO hosts (id, authority_id, name) VALUES (?1, ?2, ?3)",
        params![host.id, host.authority_id, host.name],
    )?;
    Ok(())
}

pub fn insert_agency(conn: &Connection, agency: &AgencyRecord) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO agencies (id, name) VALUES (?1, ?2)",
        params![agency.id, agency.name],
    )?;
    Ok(())
}

pub fn insert_agent(conn: &Connection, agent: &AgentRecord) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO agents (id, agency_id, host_id, name, enabled) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            agent.id,
            agent.agency_id,
            agent.host_id,
            agent.name,
            agent.enabled
        ],
    )?;
    Ok(())
}

/// Enables or disables an agent.
///
/// # Errors
///
/// Returns `DbError::NotFound` if no agent has this id.
pub fn set_agent_enabled(conn: &Connection, agent_id: &str, enabled: bool) -> Result<(), DbError> {
    let changed = conn.execute(
        "UPDATE agents SET enabled = ?2, updated_at = datetime('now') WHERE id = ?1",
        params![agent_id, enabled],
    )?;
    if changed == 0 {
        return Err(DbError::NotFound(format!("agent {agent_id}")));
    }
    Ok(())
}

/// Deletes an agent. Returns `false` if it did not exist.
pub fn delete_agent(conn: &Connection, agent_id: &str) -> Result<bool, DbError> {
    Ok(conn.execute("DELETE FROM agents WHERE id = ?1", [agent_id])? > 0)
}

pub fn insert_plugin(conn: &Connection, plugin: &PluginRecord) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO plugins (id, name, version) VALUES (?1, ?2, ?3)",
        params![plugin.id, plugin.name, plugin.version],
    )?;
    Ok(())
}

/// Installs a plugin on a host. Installing twice is a no-op.
pub fn install_plugin(conn: &Connection, host_id: &str, plugin_id: &str) -> Result<(), DbError> {
    conn.execute(
        "INSERT OR IGNORE INTO host_plugins (host_id, plugin_id) VALUES (?1, ?2)",
        params![host_id, plugin_id],
    )?;
    Ok(())
}
