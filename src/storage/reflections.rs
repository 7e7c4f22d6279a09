//! Relational-store operations on synthesized reflections.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::error::Result;
use crate::types::Reflection;

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn reflection_from_row(row: &Row) -> rusqlite::Result<Reflection> {
    let source_ids_str: String = row.get("source_ids")?;
    let created_at: String = row.get("created_at")?;
    let accessed_at: Option<String> = row.get("accessed_at")?;

    Ok(Reflection {
        id: row.get("id")?,
        content: row.get("content")?,
        source_ids: serde_json::from_str(&source_ids_str).unwrap_or_default(),
        importance: row.get("importance")?,
        depth: row.get("depth")?,
        created_at: parse_ts(&created_at),
        accessed_at: accessed_at.as_deref().map(parse_ts),
        access_count: row.get("access_count")?,
    })
}

pub fn insert_reflection(conn: &Connection, reflection: &Reflection) -> Result<()> {
    conn.execute(
        "INSERT INTO reflections (id, content, source_ids, importance, depth, created_at, accessed_at, access_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            reflection.id,
            reflection.content,
            serde_json::to_string(&reflection.source_ids)?,
            reflection.importance,
            reflection.depth,
            reflection.created_at.to_rfc3339(),
            reflection.accessed_at.map(|t| t.to_rfc3339()),
            reflection.access_count,
        ],
    )?;
    Ok(())
}

pub fn get_reflection(conn: &Connection, id: &str) -> Result<Option<Reflection>> {
    conn.query_row("SELECT * FROM reflections WHERE id = ?", [id], reflection_from_row)
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other.into()),
        })
}

pub fn get_reflections_by_ids(conn: &Connection, ids: &[String]) -> Result<HashMap<String, Reflection>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let placeholders = vec!["?"; ids.len()].join(",");
    let sql = format!("SELECT * FROM reflections WHERE id IN ({})", placeholders);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), reflection_from_row)?;
    let mut out = HashMap::with_capacity(ids.len());
    for row in rows {
        let reflection = row?;
        out.insert(reflection.id.clone(), reflection);
    }
    Ok(out)
}

pub fn touch_reflection(conn: &Connection, id: &str) -> Result<()> {
    conn.execute(
        "UPDATE reflections SET accessed_at = ?, access_count = access_count + 1 WHERE id = ?",
        params![Utc::now().to_rfc3339(), id],
    )?;
    Ok(())
}

pub fn list_all_reflections(conn: &Connection, limit: usize) -> Result<Vec<Reflection>> {
    let mut stmt = conn.prepare("SELECT * FROM reflections ORDER BY created_at DESC LIMIT ?1")?;
    let rows = stmt.query_map([limit as i64], reflection_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str) -> Reflection {
        Reflection {
            id: id.to_string(),
            content: "agent tends to ask about deployment on Fridays".to_string(),
            source_ids: vec!["e1".to_string(), "e2".to_string()],
            importance: 0.7,
            depth: 1,
            created_at: Utc::now(),
            accessed_at: None,
            access_count: 0,
        }
    }

    #[test]
    fn insert_and_get_round_trips() {
        let store = crate::storage::connection::RelationalStore::open_in_memory().unwrap();
        let reflection = sample("01RRRRRRRRRRRRRRRRRRRRRRRR");
        store.with_connection(|conn| insert_reflection(conn, &reflection)).unwrap();

        let fetched = store
            .with_connection(|conn| get_reflection(conn, &reflection.id))
            .unwrap()
            .unwrap();
        assert_eq!(fetched.source_ids, vec!["e1".to_string(), "e2".to_string()]);
        assert_eq!(fetched.depth, 1);
    }

    #[test]
    fn touch_increments_access_count() {
        let store = crate::storage::connection::RelationalStore::open_in_memory().unwrap();
        let reflection = sample("01SSSSSSSSSSSSSSSSSSSSSSSS");
        store.with_connection(|conn| insert_reflection(conn, &reflection)).unwrap();
        store.with_connection(|conn| touch_reflection(conn, &reflection.id)).unwrap();

        let fetched = store
            .with_connection(|conn| get_reflection(conn, &reflection.id))
            .unwrap()
            .unwrap();
        assert_eq!(fetched.access_count, 1);
    }

    #[test]
    fn batch_fetch_empty_input_skips_query() {
        let store = crate::storage::connection::RelationalStore::open_in_memory().unwrap();
        let map = store.with_connection(|conn| get_reflections_by_ids(conn, &[])).unwrap();
        assert!(map.is_empty());
    }
}
