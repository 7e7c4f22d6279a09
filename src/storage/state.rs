//! Key/value engine state: reflection and consolidation watermarks.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;

pub fn get_state(conn: &Connection, key: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row("SELECT value FROM engine_state WHERE key = ?", [key], |row| row.get(0))
        .optional()?)
}

pub fn set_state(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO engine_state (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

const EPOCH: &str = "1970-01-01T00:00:00+00:00";

/// Per-agent watermark used by the reflection engine to find unreflected
/// events. Defaults to the epoch when an agent has never been reflected on.
pub fn get_last_reflected_at(conn: &Connection, agent_id: &str) -> Result<String> {
    let key = format!("last_reflected_at:{}", agent_id);
    Ok(get_state(conn, &key)?.unwrap_or_else(|| EPOCH.to_string()))
}

pub fn set_last_reflected_at(conn: &Connection, agent_id: &str, at: chrono::DateTime<Utc>) -> Result<()> {
    let key = format!("last_reflected_at:{}", agent_id);
    set_state(conn, &key, &at.to_rfc3339())
}

/// Global watermark advanced by every `reflect()` call, regardless of
/// which agent it ran for, alongside the per-agent one.
pub fn get_last_reflection_at(conn: &Connection) -> Result<Option<String>> {
    get_state(conn, "last_reflection_at")
}

pub fn set_last_reflection_at(conn: &Connection, at: chrono::DateTime<Utc>) -> Result<()> {
    set_state(conn, "last_reflection_at", &at.to_rfc3339())
}

pub fn get_last_consolidation_at(conn: &Connection) -> Result<Option<String>> {
    get_state(conn, "last_consolidation_at")
}

pub fn set_last_consolidation_at(conn: &Connection, at: chrono::DateTime<Utc>) -> Result<()> {
    set_state(conn, "last_consolidation_at", &at.to_rfc3339())
}
