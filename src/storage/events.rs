//! Relational-store operations on the episodic event log.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::error::Result;
use crate::types::{Event, EventSearchOptions, EventType};

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn event_from_row(row: &Row) -> rusqlite::Result<Event> {
    let event_type_str: String = row.get("event_type")?;
    let entities_str: String = row.get("entities")?;
    let metadata_str: String = row.get("metadata")?;
    let created_at: String = row.get("created_at")?;
    let accessed_at: Option<String> = row.get("accessed_at")?;

    Ok(Event {
        id: row.get("id")?,
        agent_id: row.get("agent_id")?,
        event_type: event_type_str.parse().unwrap_or(EventType::Observation),
        content: row.get("content")?,
        importance: row.get("importance")?,
        entities: serde_json::from_str(&entities_str).unwrap_or_default(),
        metadata: serde_json::from_str(&metadata_str).unwrap_or_default(),
        created_at: parse_ts(&created_at),
        accessed_at: accessed_at.as_deref().map(parse_ts),
        access_count: row.get("access_count")?,
    })
}

pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    conn.execute(
        "INSERT INTO events (id, agent_id, event_type, content, importance, entities, metadata, created_at, accessed_at, access_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            event.id,
            event.agent_id,
            event.event_type.as_str(),
            event.content,
            event.importance,
            serde_json::to_string(&event.entities)?,
            serde_json::to_string(&event.metadata)?,
            event.created_at.to_rfc3339(),
            event.accessed_at.map(|t| t.to_rfc3339()),
            event.access_count,
        ],
    )?;
    Ok(())
}

/// Delete an event row. Used by episodic memory's compensating-write path
/// when the vector write after it fails.
pub fn delete_event(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM events WHERE id = ?", [id])?;
    Ok(())
}

pub fn get_event(conn: &Connection, id: &str) -> Result<Option<Event>> {
    conn.query_row("SELECT * FROM events WHERE id = ?", [id], event_from_row)
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other.into()),
        })
}

/// Batch fetch by id. An empty input returns an empty map without issuing a
/// query, so recall's hydration step never pays for an N+1 read when a
/// partition is empty.
pub fn get_events_by_ids(conn: &Connection, ids: &[String]) -> Result<HashMap<String, Event>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let placeholders = vec!["?"; ids.len()].join(",");
    let sql = format!("SELECT * FROM events WHERE id IN ({})", placeholders);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), event_from_row)?;
    let mut out = HashMap::with_capacity(ids.len());
    for row in rows {
        let event = row?;
        out.insert(event.id.clone(), event);
    }
    Ok(out)
}

/// Touch: set `accessed_at := now`, increment `access_count`. Never touches
/// `updated_at` (events have none) or `content`.
pub fn touch_event(conn: &Connection, id: &str) -> Result<()> {
    conn.execute(
        "UPDATE events SET accessed_at = ?, access_count = access_count + 1 WHERE id = ?",
        params![Utc::now().to_rfc3339(), id],
    )?;
    Ok(())
}

/// Full-text search over event content. Fails soft: any parse error from
/// the fts5 query layer (e.g. an unmatched quote) yields an empty list and
/// a warning log rather than surfacing an error to the caller.
pub fn search_events_fulltext(conn: &Connection, query: &str, limit: usize) -> Result<Vec<String>> {
    let mut stmt = match conn
        .prepare("SELECT id FROM events_fts WHERE events_fts MATCH ?1 ORDER BY rank LIMIT ?2")
    {
        Ok(stmt) => stmt,
        Err(e) => {
            tracing::warn!(error = %e, query, "full-text query failed to prepare; returning empty");
            return Ok(Vec::new());
        }
    };

    let rows = stmt.query_map(params![query, limit as i64], |row| row.get::<_, String>(0));
    let rows = match rows {
        Ok(rows) => rows,
        Err(e) => {
            tracing::warn!(error = %e, query, "full-text query failed to execute; returning empty");
            return Ok(Vec::new());
        }
    };

    let mut ids = Vec::new();
    for row in rows {
        match row {
            Ok(id) => ids.push(id),
            Err(e) => {
                tracing::warn!(error = %e, query, "full-text query failed mid-scan; returning partial results as empty");
                return Ok(Vec::new());
            }
        }
    }
    Ok(ids)
}

/// Events for `agent_id` whose `created_at` is strictly greater than the
/// `last_reflected_at:<agent_id>` watermark, descending, capped at `limit`.
pub fn get_unreflected_events(
    conn: &Connection,
    agent_id: &str,
    watermark: &str,
    limit: usize,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM events WHERE agent_id = ?1 AND created_at > ?2
         ORDER BY created_at DESC LIMIT ?3",
    )?;
    let rows = stmt.query_map(params![agent_id, watermark, limit as i64], event_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Range query on `(agent_id, created_at)` with an optional event-type
/// filter, descending, for the episodic timeline.
pub fn get_timeline(
    conn: &Connection,
    agent_id: &str,
    event_type: Option<EventType>,
    limit: usize,
) -> Result<Vec<Event>> {
    let sql = if event_type.is_some() {
        "SELECT * FROM events WHERE agent_id = ?1 AND event_type = ?2
         ORDER BY created_at DESC LIMIT ?3"
    } else {
        "SELECT * FROM events WHERE agent_id = ?1
         ORDER BY created_at DESC LIMIT ?3"
    };
    let mut stmt = conn.prepare(sql)?;
    let mut out = Vec::new();
    if let Some(et) = event_type {
        let rows = stmt.query_map(params![agent_id, et.as_str(), limit as i64], event_from_row)?;
        for row in rows {
            out.push(row?);
        }
    } else {
        let rows = stmt.query_map(params![agent_id, limit as i64], event_from_row)?;
        for row in rows {
            out.push(row?);
        }
    }
    Ok(out)
}

/// Post-filters applied after hydration in the episodic search path:
/// agent_id, event_type, `[start, end]` window (lexicographic string
/// comparison), then substring case-insensitive match against any
/// requested entity.
pub fn matches_search_filters(event: &Event, opts: &EventSearchOptions) -> bool {
    if let Some(agent_id) = &opts.agent_id {
        if &event.agent_id != agent_id {
            return false;
        }
    }
    if let Some(event_type) = opts.event_type {
        if event.event_type != event_type {
            return false;
        }
    }
    let created = event.created_at.to_rfc3339();
    if let Some(start) = &opts.start {
        if created.as_str() < start.as_str() {
            return false;
        }
    }
    if let Some(end) = &opts.end {
        if created.as_str() > end.as_str() {
            return false;
        }
    }
    if !opts.entities.is_empty() {
        let content_lower = event.content.to_lowercase();
        let hay: Vec<String> = event.entities.iter().map(|e| e.to_lowercase()).collect();
        let any_match = opts.entities.iter().any(|needle| {
            let needle = needle.to_lowercase();
            content_lower.contains(&needle) || hay.iter().any(|e| e.contains(&needle))
        });
        if !any_match {
            return false;
        }
    }
    true
}
