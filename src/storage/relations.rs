//! Relational-store operations on bi-temporal graph edges.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::error::{EngineError, Result};
use crate::ids::new_id;
use crate::storage::entities::get_entity_by_name;
use crate::types::Relation;

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn relation_from_row(row: &Row) -> rusqlite::Result<Relation> {
    let valid_from: String = row.get("valid_from")?;
    let valid_until: Option<String> = row.get("valid_until")?;
    let created_at: String = row.get("created_at")?;
    let metadata_str: String = row.get("metadata")?;

    Ok(Relation {
        id: row.get("id")?,
        from_entity: row.get("from_entity")?,
        to_entity: row.get("to_entity")?,
        relation_type: row.get("relation_type")?,
        weight: row.get("weight")?,
        valid_from: parse_ts(&valid_from),
        valid_until: valid_until.as_deref().map(parse_ts),
        metadata: serde_json::from_str(&metadata_str).unwrap_or_default(),
        created_at: parse_ts(&created_at),
    })
}

/// Resolve `from_name`/`to_name` to entity ids, then invalidate any
/// currently-open row for `(from, to, relation_type)` and insert a fresh
/// one. Must be called inside a transaction: invalidation and insertion
/// happen atomically so there is never a window with zero or two open rows.
pub fn create_relation(
    conn: &Connection,
    from_name: &str,
    to_name: &str,
    relation_type: &str,
) -> Result<Relation> {
    let from_entity = get_entity_by_name(conn, from_name)?
        .ok_or_else(|| EngineError::EntityNotFound(from_name.to_string()))?;
    let to_entity = get_entity_by_name(conn, to_name)?
        .ok_or_else(|| EngineError::EntityNotFound(to_name.to_string()))?;

    let now = Utc::now();
    let now_str = now.to_rfc3339();

    conn.execute(
        "UPDATE relations SET valid_until = ?1
         WHERE from_entity = ?2 AND to_entity = ?3 AND relation_type = ?4 AND valid_until IS NULL",
        params![now_str, from_entity.id, to_entity.id, relation_type],
    )?;

    let id = new_id();
    conn.execute(
        "INSERT INTO relations (id, from_entity, to_entity, relation_type, weight, valid_from, valid_until, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, 1.0, ?5, NULL, '{}', ?5)",
        params![id, from_entity.id, to_entity.id, relation_type, now_str],
    )?;

    Ok(Relation {
        id,
        from_entity: from_entity.id,
        to_entity: to_entity.id,
        relation_type: relation_type.to_string(),
        weight: 1.0,
        valid_from: now,
        valid_until: None,
        metadata: Default::default(),
        created_at: now,
    })
}

/// Relations touching `entity_id` in either direction.
/// `active_only` restricts to rows with `valid_until IS NULL`.
pub fn get_relations(conn: &Connection, entity_id: &str, active_only: bool) -> Result<Vec<Relation>> {
    let sql = if active_only {
        "SELECT * FROM relations WHERE (from_entity = ?1 OR to_entity = ?1) AND valid_until IS NULL
         ORDER BY created_at DESC"
    } else {
        "SELECT * FROM relations WHERE from_entity = ?1 OR to_entity = ?1
         ORDER BY created_at DESC"
    };
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([entity_id], relation_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}
