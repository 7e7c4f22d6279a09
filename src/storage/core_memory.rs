//! Relational-store operations on core memory blocks.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::error::Result;
use crate::ids::new_id;
use crate::types::{BlockType, CoreMemoryBlock, CoreMemoryOp};

const MAX_BLOCK_CHARS: usize = 5_000;

fn truncate_leading(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

fn block_from_row(row: &Row) -> rusqlite::Result<CoreMemoryBlock> {
    let block_type_str: String = row.get("block_type")?;
    let updated_at: String = row.get("updated_at")?;
    Ok(CoreMemoryBlock {
        id: row.get("id")?,
        block_type: block_type_str.parse().unwrap_or(BlockType::Persona),
        block_key: row.get("block_key")?,
        content: row.get("content")?,
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

pub fn get_core_memory_block(
    conn: &Connection,
    block_type: BlockType,
    block_key: &str,
) -> Result<Option<CoreMemoryBlock>> {
    conn.query_row(
        "SELECT * FROM core_memory_blocks WHERE block_type = ?1 AND block_key = ?2",
        params![block_type.as_str(), block_key],
        block_from_row,
    )
    .map(Some)
    .or_else(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other.into()),
    })
}

pub fn list_core_memory_blocks(conn: &Connection) -> Result<Vec<CoreMemoryBlock>> {
    let mut stmt = conn.prepare("SELECT * FROM core_memory_blocks ORDER BY block_type, block_key")?;
    let rows = stmt.query_map([], block_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Apply an {append, replace, remove} operation to a core memory block.
/// Append truncates to the *leading* 5000 characters, not the tail.
pub fn update_core_memory(
    conn: &Connection,
    block_type: BlockType,
    block_key: &str,
    op: CoreMemoryOp,
    content: &str,
) -> Result<CoreMemoryBlock> {
    let now = Utc::now();

    match op {
        CoreMemoryOp::Remove => {
            conn.execute(
                "DELETE FROM core_memory_blocks WHERE block_type = ?1 AND block_key = ?2",
                params![block_type.as_str(), block_key],
            )?;
            return Ok(CoreMemoryBlock {
                id: new_id(),
                block_type,
                block_key: block_key.to_string(),
                content: String::new(),
                updated_at: now,
            });
        }
        CoreMemoryOp::Replace => {
            let truncated = truncate_leading(content, MAX_BLOCK_CHARS);
            upsert_block(conn, block_type, block_key, &truncated, now)
        }
        CoreMemoryOp::Append => {
            let existing = get_core_memory_block(conn, block_type, block_key)?;
            let combined = match existing {
                Some(block) if !block.content.is_empty() => {
                    format!("{}\n{}", block.content, content)
                }
                _ => content.to_string(),
            };
            let truncated = truncate_leading(&combined, MAX_BLOCK_CHARS);
            upsert_block(conn, block_type, block_key, &truncated, now)
        }
    }
}

fn upsert_block(
    conn: &Connection,
    block_type: BlockType,
    block_key: &str,
    content: &str,
    now: DateTime<Utc>,
) -> Result<CoreMemoryBlock> {
    let id = get_core_memory_block(conn, block_type, block_key)?
        .map(|b| b.id)
        .unwrap_or_else(new_id);

    conn.execute(
        "INSERT INTO core_memory_blocks (id, block_type, block_key, content, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(block_type, block_key) DO UPDATE SET content = excluded.content, updated_at = excluded.updated_at",
        params![id, block_type.as_str(), block_key, content, now.to_rfc3339()],
    )?;

    Ok(CoreMemoryBlock {
        id,
        block_type,
        block_key: block_key.to_string(),
        content: content.to_string(),
        updated_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::connection::RelationalStore;

    #[test]
    fn replace_is_idempotent() {
        let store = RelationalStore::open_in_memory().unwrap();
        let block1 = store
            .with_connection(|conn| {
                update_core_memory(conn, BlockType::Persona, "default", CoreMemoryOp::Replace, "X")
            })
            .unwrap();
        let block2 = store
            .with_connection(|conn| {
                update_core_memory(conn, BlockType::Persona, "default", CoreMemoryOp::Replace, "X")
            })
            .unwrap();
        assert_eq!(block1.content, block2.content);
    }

    #[test]
    fn append_truncates_to_leading_5000_chars() {
        let store = RelationalStore::open_in_memory().unwrap();
        store
            .with_connection(|conn| {
                update_core_memory(
                    conn,
                    BlockType::Persona,
                    "default",
                    CoreMemoryOp::Replace,
                    "BEGINNING_MARKER",
                )
            })
            .unwrap();

        let filler = "y".repeat(5_000);
        let block = store
            .with_connection(|conn| {
                update_core_memory(conn, BlockType::Persona, "default", CoreMemoryOp::Append, &filler)
            })
            .unwrap();

        assert!(block.content.starts_with("BEGINNING_MARKER"));
        assert!(block.content.len() <= MAX_BLOCK_CHARS);
    }

    #[test]
    fn remove_deletes_and_echoes_key() {
        let store = RelationalStore::open_in_memory().unwrap();
        store
            .with_connection(|conn| {
                update_core_memory(conn, BlockType::Persona, "default", CoreMemoryOp::Replace, "X")
            })
            .unwrap();
        let removed = store
            .with_connection(|conn| {
                update_core_memory(conn, BlockType::Persona, "default", CoreMemoryOp::Remove, "")
            })
            .unwrap();
        assert_eq!(removed.content, "");
        assert_eq!(removed.block_key, "default");

        let after = store
            .with_connection(|conn| get_core_memory_block(conn, BlockType::Persona, "default"))
            .unwrap();
        assert!(after.is_none());
    }
}
