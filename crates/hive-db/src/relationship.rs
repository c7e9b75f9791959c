//! Relationship checks backing the access-control oracle.
//!
//! Only enabled agents take part in relationships. A check that involves
//! both a source agent and a target must see every qualifying agent row
//! resolve to the same agency, otherwise it fails closed.

use crate::DbError;
use hive_types::{RelationshipQuery, RelationshipTarget};
use rusqlite::{params, Connection};
use std::collections::HashSet;

/// Answers a relationship query against the agents table.
///
/// | source | target | holds when |
/// |--------|--------|-----------|
/// | none | agency | an agent of the agency runs on the host |
/// | none | agent | the agent runs on the host |
/// | agent | agency | the source runs on the host and belongs to the agency |
/// | agent | agent | the source runs on the host and shares the target's agency |
///
/// # Errors
///
/// Returns `DbError::InvalidQuery` unless exactly one target is set, and
/// `DbError::Sqlite` if the lookup fails.
pub fn verify_relationship(conn: &Connection, query: &RelationshipQuery) -> Result<bool, DbError> {
    let target = query.target()?;
    let host_id = query.host_id.as_str();

    match (query.source_id.as_deref(), target) {
        (None, RelationshipTarget::Agency(agency_id)) => exists(
            conn,
            "SELECT EXISTS(SELECT 1 FROM agents
                 WHERE host_id = ?1 AND agency_id = ?2 AND enabled = 1)",
            params![host_id, agency_id],
        ),
        (None, RelationshipTarget::Agent(agent_id)) => exists(
            conn,
            "SELECT EXISTS(SELECT 1 FROM agents
                 WHERE host_id = ?1 AND id = ?2 AND enabled = 1)",
            params![host_id, agent_id],
        ),
        (Some(source_id), RelationshipTarget::Agency(agency_id)) => exists(
            conn,
            "SELECT EXISTS(SELECT 1 FROM agents
                 WHERE id = ?1 AND host_id = ?2 AND agency_id = ?3 AND enabled = 1)",
            params![source_id, host_id, agency_id],
        ),
        (Some(source_id), RelationshipTarget::Agent(agent_id)) => {
            siblings(conn, host_id, source_id, agent_id)
        }
    }
}

fn exists(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<bool, DbError> {
    Ok(conn.query_row(sql, params, |row| row.get(0))?)
}

fn siblings(
    conn: &Connection,
    host_id: &str,
    source_id: &str,
    target_id: &str,
) -> Result<bool, DbError> {
    let mut stmt = conn.prepare(
        "SELECT id, agency_id FROM agents
         WHERE enabled = 1 AND ((id = ?1 AND host_id = ?2) OR id = ?3)",
    )?;
    let rows = stmt
        .query_map(params![source_id, host_id, target_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let has_source = rows.iter().any(|(id, _)| id == source_id);
    let has_target = rows.iter().any(|(id, _)| id == target_id);
    let agencies: HashSet<&str> = rows.iter().map(|(_, agency)| agency.as_str()).collect();
    Ok(has_source && has_target && agencies.len() == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::set_agent_enabled;
    use crate::test_support::seeded_db;

    #[test]
    fn host_reads_agency_of_local_agent() {
        let conn = seeded_db();
        let query = RelationshipQuery::agency("h1", None, "g1");
        assert!(verify_relationship(&conn, &query).expect("lookup should succeed"));

        let query = RelationshipQuery::agency("h2", None, "g2");
        assert!(!verify_relationship(&conn, &query).expect("lookup should succeed"));
    }

    #[test]
    fn host_reads_only_its_own_agents() {
        let conn = seeded_db();
        assert!(verify_relationship(&conn, &RelationshipQuery::agent("h1", None, "a1"))
            .expect("lookup should succeed"));
        assert!(!verify_relationship(&conn, &RelationshipQuery::agent("h1", None, "b1"))
            .expect("lookup should succeed"));
    }

    #[test]
    fn source_writes_to_its_own_agency_only() {
        let conn = seeded_db();
        let own = RelationshipQuery::agency("h1", Some("a1"), "g1");
        assert!(verify_relationship(&conn, &own).expect("lookup should succeed"));

        let foreign = RelationshipQuery::agency("h1", Some("a1"), "g2");
        assert!(!verify_relationship(&conn, &foreign).expect("lookup should succeed"));

        // a1 does not run on h2, whatever h2 claims.
        let spoofed = RelationshipQuery::agency("h2", Some("a1"), "g1");
        assert!(!verify_relationship(&conn, &spoofed).expect("lookup should succeed"));
    }

    #[test]
    fn source_writes_to_siblings_across_hosts() {
        let conn = seeded_db();
        // a1 (h1, g1) -> b1 (h2, g1)
        let sibling = RelationshipQuery::agent("h1", Some("a1"), "b1");
        assert!(verify_relationship(&conn, &sibling).expect("lookup should succeed"));

        // a1 (g1) -> a3 (g2)
        let stranger = RelationshipQuery::agent("h1", Some("a1"), "a3");
        assert!(!verify_relationship(&conn, &stranger).expect("lookup should succeed"));

        let unknown = RelationshipQuery::agent("h1", Some("a1"), "ghost");
        assert!(!verify_relationship(&conn, &unknown).expect("lookup should succeed"));
    }

    #[test]
    fn disabled_agents_break_relationships() {
        let conn = seeded_db();
        set_agent_enabled(&conn, "b1", false).expect("update should succeed");
        let sibling = RelationshipQuery::agent("h1", Some("a1"), "b1");
        assert!(!verify_relationship(&conn, &sibling).expect("lookup should succeed"));
    }

    #[test]
    fn query_without_single_target_is_an_error() {
        let conn = seeded_db();
        let query = RelationshipQuery {
            host_id: "h1".into(),
            source_id: None,
            target_agency_id: None,
            target_agent_id: None,
        };
        assert!(matches!(
            verify_relationship(&conn, &query),
            Err(DbError::InvalidQuery(_))
        ));
    }
}
