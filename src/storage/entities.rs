//! Relational-store operations on knowledge-graph entities.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::error::Result;
use crate::ids::new_id;
use crate::types::{Entity, EntityType, UpsertEntityInput};

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn entity_from_row(row: &Row) -> rusqlite::Result<Entity> {
    let entity_type_str: String = row.get("entity_type")?;
    let observations_str: String = row.get("observations")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let accessed_at: Option<String> = row.get("accessed_at")?;

    Ok(Entity {
        id: row.get("id")?,
        name: row.get("name")?,
        entity_type: entity_type_str.parse().unwrap_or(EntityType::Concept),
        summary: row.get("summary")?,
        observations: serde_json::from_str(&observations_str).unwrap_or_default(),
        importance: row.get("importance")?,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
        accessed_at: accessed_at.as_deref().map(parse_ts),
        access_count: row.get("access_count")?,
    })
}

pub fn get_entity(conn: &Connection, id: &str) -> Result<Option<Entity>> {
    conn.query_row("SELECT * FROM entities WHERE id = ?", [id], entity_from_row)
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other.into()),
        })
}

/// Case-insensitive lookup by name (relies on the `COLLATE NOCASE` index).
pub fn get_entity_by_name(conn: &Connection, name: &str) -> Result<Option<Entity>> {
    conn.query_row(
        "SELECT * FROM entities WHERE name = ?1 COLLATE NOCASE",
        [name],
        entity_from_row,
    )
    .map(Some)
    .or_else(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other.into()),
    })
}

pub fn get_entities_by_ids(conn: &Connection, ids: &[String]) -> Result<HashMap<String, Entity>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let placeholders = vec!["?"; ids.len()].join(",");
    let sql = format!("SELECT * FROM entities WHERE id IN ({})", placeholders);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), entity_from_row)?;
    let mut out = HashMap::with_capacity(ids.len());
    for row in rows {
        let entity = row?;
        out.insert(entity.id.clone(), entity);
    }
    Ok(out)
}

/// Merge `new` into `existing`, preserving insertion order of the union,
/// deduplicated.
fn merge_observations(existing: &[String], new: &[String]) -> Vec<String> {
    let mut seen: std::collections::HashSet<&str> = std::collections::HashSet::new();
    let mut merged = Vec::with_capacity(existing.len() + new.len());
    for obs in existing.iter().chain(new.iter()) {
        if seen.insert(obs.as_str()) {
            merged.push(obs.clone());
        }
    }
    merged
}

/// Case-insensitive upsert by name. Preserves `created_at`, `accessed_at`,
/// `access_count` from any existing row; updates `entity_type`, `summary`
/// (only if the new value is non-null), `observations`, `importance`, and
/// `updated_at`. Must be called inside a transaction by the caller.
pub fn upsert_entity(conn: &Connection, input: &UpsertEntityInput) -> Result<Entity> {
    let now = Utc::now();
    let existing = get_entity_by_name(conn, &input.name)?;

    let (id, created_at, accessed_at, access_count) = match &existing {
        Some(e) => (e.id.clone(), e.created_at, e.accessed_at, e.access_count),
        None => (new_id(), now, None, 0),
    };

    let entity_type = input
        .entity_type
        .or_else(|| existing.as_ref().map(|e| e.entity_type))
        .unwrap_or(EntityType::Concept);

    let summary = input
        .summary
        .clone()
        .or_else(|| existing.as_ref().and_then(|e| e.summary.clone()));

    let observations = merge_observations(
        existing.as_ref().map(|e| e.observations.as_slice()).unwrap_or(&[]),
        &input.observations,
    );

    let importance = input
        .importance
        .or_else(|| existing.as_ref().map(|e| e.importance))
        .unwrap_or(0.5)
        .clamp(0.0, 1.0);

    conn.execute(
        "INSERT INTO entities (id, name, entity_type, summary, observations, importance, created_at, updated_at, accessed_at, access_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(name) DO UPDATE SET
             entity_type = excluded.entity_type,
             summary = excluded.summary,
             observations = excluded.observations,
             importance = excluded.importance,
             updated_at = excluded.updated_at",
        params![
            id,
            input.name,
            entity_type.as_str(),
            summary,
            serde_json::to_string(&observations)?,
            importance,
            created_at.to_rfc3339(),
            now.to_rfc3339(),
            accessed_at.map(|t| t.to_rfc3339()),
            access_count,
        ],
    )?;

    Ok(Entity {
        id,
        name: input.name.clone(),
        entity_type,
        summary,
        observations,
        importance,
        created_at,
        updated_at: now,
        accessed_at,
        access_count,
    })
}

/// Replace an entity's stored `(observations, summary, updated_at)` — used
/// by consolidation after pruning/re-summarizing.
pub fn update_entity_after_consolidation(
    conn: &Connection,
    id: &str,
    observations: &[String],
    summary: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE entities SET observations = ?1, summary = ?2, updated_at = ?3 WHERE id = ?4",
        params![
            serde_json::to_string(observations)?,
            summary,
            Utc::now().to_rfc3339(),
            id,
        ],
    )?;
    Ok(())
}

pub fn touch_entity(conn: &Connection, id: &str) -> Result<()> {
    conn.execute(
        "UPDATE entities SET accessed_at = ?, access_count = access_count + 1 WHERE id = ?",
        params![Utc::now().to_rfc3339(), id],
    )?;
    Ok(())
}

pub fn list_all_entities(conn: &Connection) -> Result<Vec<Entity>> {
    let mut stmt = conn.prepare("SELECT * FROM entities")?;
    let rows = stmt.query_map([], entity_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::connection::RelationalStore;

    fn input(name: &str, observations: &[&str]) -> UpsertEntityInput {
        UpsertEntityInput {
            name: name.to_string(),
            entity_type: Some(EntityType::Person),
            summary: None,
            observations: observations.iter().map(|s| s.to_string()).collect(),
            importance: None,
        }
    }

    #[test]
    fn upsert_merges_observations_without_duplicates() {
        let store = RelationalStore::open_in_memory().unwrap();
        store
            .with_transaction(|conn| upsert_entity(conn, &input("Alice", &["Fact 1"])))
            .unwrap();
        let second = store
            .with_transaction(|conn| upsert_entity(conn, &input("Alice", &["Fact 1", "Fact 2"])))
            .unwrap();
        assert_eq!(second.observations, vec!["Fact 1".to_string(), "Fact 2".to_string()]);
    }

    #[test]
    fn upsert_preserves_access_count_across_second_call() {
        let store = RelationalStore::open_in_memory().unwrap();
        let first = store
            .with_transaction(|conn| upsert_entity(conn, &input("Bob", &["x"])))
            .unwrap();
        store.with_connection(|conn| touch_entity(conn, &first.id)).unwrap();
        store.with_connection(|conn| touch_entity(conn, &first.id)).unwrap();

        let second = store
            .with_transaction(|conn| upsert_entity(conn, &input("Bob", &["x"])))
            .unwrap();
        assert_eq!(second.access_count, 2);
        assert!(second.updated_at >= second.created_at);
    }

    #[test]
    fn lookup_by_name_is_case_insensitive() {
        let store = RelationalStore::open_in_memory().unwrap();
        store
            .with_transaction(|conn| upsert_entity(conn, &input("Carol", &[])))
            .unwrap();
        let found = store
            .with_connection(|conn| get_entity_by_name(conn, "CAROL"))
            .unwrap();
        assert!(found.is_some());
    }
}
