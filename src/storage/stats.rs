//! Aggregate counts and timestamp ranges for the status surface.

use rusqlite::Connection;

use crate::error::Result;

#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreStats {
    pub event_count: i64,
    pub entity_count: i64,
    pub relation_count: i64,
    pub reflection_count: i64,
    pub oldest_event_at: Option<String>,
    pub newest_event_at: Option<String>,
}

/// All counts plus the event timestamp range in a single round trip.
pub fn get_stats(conn: &Connection) -> Result<StoreStats> {
    let event_count: i64 = conn.query_row("SELECT count(*) FROM events", [], |row| row.get(0))?;
    let entity_count: i64 = conn.query_row("SELECT count(*) FROM entities", [], |row| row.get(0))?;
    let relation_count: i64 = conn.query_row("SELECT count(*) FROM relations", [], |row| row.get(0))?;
    let reflection_count: i64 = conn.query_row("SELECT count(*) FROM reflections", [], |row| row.get(0))?;

    let (oldest_event_at, newest_event_at): (Option<String>, Option<String>) = conn.query_row(
        "SELECT min(created_at), max(created_at) FROM events",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    Ok(StoreStats {
        event_count,
        entity_count,
        relation_count,
        reflection_count,
        oldest_event_at,
        newest_event_at,
    })
}
