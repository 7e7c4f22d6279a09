//! Schema creation and versioning.
//!
//! Idempotent: running against an already-migrated database is a no-op.
//! Event ids are 26-character Crockford base32 strings rather than the
//! integer rowids the full-text index usually piggybacks on, so the
//! full-text table here is a standalone fts5 index synced by triggers
//! rather than a `content=` external-content table keyed by rowid.

use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA_VERSION: i32 = 1;

pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let current: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .unwrap_or(0);

    if current < 1 {
        migrate_v1(conn)?;
    }

    if current == 0 {
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?)",
            [SCHEMA_VERSION],
        )?;
    } else if current < SCHEMA_VERSION {
        conn.execute("UPDATE schema_version SET version = ?", [SCHEMA_VERSION])?;
    }

    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            id TEXT PRIMARY KEY,
            agent_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            content TEXT NOT NULL,
            importance REAL NOT NULL DEFAULT 0.5,
            entities TEXT NOT NULL DEFAULT '[]',
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            accessed_at TEXT,
            access_count INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_events_agent_created
            ON events(agent_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_events_agent_type
            ON events(agent_id, event_type);

        CREATE VIRTUAL TABLE IF NOT EXISTS events_fts USING fts5(
            content,
            id UNINDEXED,
            tokenize='porter unicode61'
        );

        CREATE TRIGGER IF NOT EXISTS events_ai AFTER INSERT ON events BEGIN
            INSERT INTO events_fts(rowid, content, id)
            VALUES (new.rowid, new.content, new.id);
        END;

        CREATE TRIGGER IF NOT EXISTS events_ad AFTER DELETE ON events BEGIN
            DELETE FROM events_fts WHERE rowid = old.rowid;
        END;

        CREATE TABLE IF NOT EXISTS core_memory_blocks (
            id TEXT PRIMARY KEY,
            block_type TEXT NOT NULL,
            block_key TEXT NOT NULL,
            content TEXT NOT NULL DEFAULT '',
            updated_at TEXT NOT NULL,
            UNIQUE(block_type, block_key)
        );

        CREATE TABLE IF NOT EXISTS entities (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE COLLATE NOCASE,
            entity_type TEXT NOT NULL,
            summary TEXT,
            observations TEXT NOT NULL DEFAULT '[]',
            importance REAL NOT NULL DEFAULT 0.5,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            accessed_at TEXT,
            access_count INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS relations (
            id TEXT PRIMARY KEY,
            from_entity TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
            to_entity TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
            relation_type TEXT NOT NULL,
            weight REAL NOT NULL DEFAULT 1.0,
            valid_from TEXT NOT NULL,
            valid_until TEXT,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_relations_triple
            ON relations(from_entity, to_entity, relation_type, valid_until);

        CREATE TABLE IF NOT EXISTS reflections (
            id TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            source_ids TEXT NOT NULL DEFAULT '[]',
            importance REAL NOT NULL DEFAULT 0.7,
            depth INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            accessed_at TEXT,
            access_count INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS engine_state (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version: i32 = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn fts_trigger_syncs_on_insert_and_delete() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO events (id, agent_id, event_type, content, created_at)
             VALUES ('01ABCDEFGHJKMNPQRSTVWXYZ0', 'a', 'observation', 'hello world', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM events_fts WHERE events_fts MATCH 'hello'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);

        conn.execute(
            "DELETE FROM events WHERE id = '01ABCDEFGHJKMNPQRSTVWXYZ0'",
            [],
        )
        .unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM events_fts WHERE events_fts MATCH 'hello'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 0);
    }
}
