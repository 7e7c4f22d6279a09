//! Vector store: a genuinely separate backend from the relational store.
//!
//! Wraps `hnsw_rs::Hnsw<f32, DistL2>` with a bidirectional `String` memory-id
//! ↔ `usize` internal-id mapping, soft-delete via a `HashSet`, and a side
//! table of `(memory_type, content, created_at)` per record. There is no
//! cross-store transaction with the relational store — the engine tolerates
//! orphans on either side and reconciles them with the repair utility.
//!
//! Unlike the relational store, the HNSW graph itself is not rebuilt from
//! some other durable source on open: this store is the only place the raw
//! embeddings live, so the graph is persisted directly, as a JSON sidecar
//! of every live `(memory_id, vector, record)` tuple under the index
//! directory, and replayed into a fresh graph on first touch after a
//! restart.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use hnsw_rs::prelude::*;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::ids::is_valid_id;
use crate::types::MemoryKind;

const MAX_NB_CONNECTION: usize = 16;
const MAX_ELEMENTS: usize = 200_000;
const MAX_LAYER: usize = 16;
const EF_CONSTRUCTION: usize = 200;
const EF_SEARCH: usize = 64;

#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub memory_id: String,
    pub memory_type: MemoryKind,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub record: VectorRecord,
    pub distance: f32,
}

struct Inner {
    hnsw: Hnsw<'static, f32, DistL2>,
    state: RwLock<IndexState>,
}

struct IndexState {
    id_to_internal: HashMap<String, usize>,
    internal_to_id: Vec<String>,
    records: HashMap<usize, VectorRecord>,
    vectors: HashMap<usize, Vec<f32>>,
    deleted: std::collections::HashSet<usize>,
    next_id: usize,
}

/// On-disk form of a live (non-deleted) entry, written as part of
/// `PersistedStore`. Deleted entries are never persisted: once
/// `delete()` drops a memory id from `id_to_internal` it can never be
/// reached again, so there is nothing worth carrying across a restart.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedEntry {
    internal_id: usize,
    memory_id: String,
    memory_type: MemoryKind,
    content: String,
    created_at: String,
    vector: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStore {
    dimensions: usize,
    next_id: usize,
    entries: Vec<PersistedEntry>,
}

/// The vector store. The underlying HNSW graph is created lazily on the
/// first write — table creation is memoized behind a one-shot latch so
/// concurrent first-writers resolve to a single graph.
pub struct VectorStore {
    dir: PathBuf,
    dimensions: usize,
    inner: OnceCell<Inner>,
}

impl VectorStore {
    pub fn new(dir: &Path, dimensions: usize) -> Self {
        Self {
            dir: dir.to_path_buf(),
            dimensions,
            inner: OnceCell::new(),
        }
    }

    fn persisted_path(&self) -> PathBuf {
        self.dir.join("memories.json")
    }

    /// Reads back the sidecar written by `flush`, if one exists and its
    /// dimensionality still matches this store. A mismatch or parse
    /// failure is logged and treated as "nothing to load" rather than a
    /// hard error — the graph just starts empty, the same as a brand new
    /// index directory.
    fn load_persisted(&self) -> Option<PersistedStore> {
        let bytes = fs::read(self.persisted_path()).ok()?;
        match serde_json::from_slice::<PersistedStore>(&bytes) {
            Ok(persisted) if persisted.dimensions == self.dimensions => Some(persisted),
            Ok(persisted) => {
                tracing::warn!(
                    expected = self.dimensions,
                    found = persisted.dimensions,
                    "vector store sidecar dimension mismatch; starting empty"
                );
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to parse vector store sidecar; starting empty");
                None
            }
        }
    }

    /// Writes the current live entries to the sidecar file. Called after
    /// every mutating operation so a restart (or a read that happens to
    /// land first) always sees the latest state.
    pub fn flush(&self) -> Result<()> {
        let Some(inner) = self.inner.get() else {
            return Ok(());
        };
        let state = inner
            .state
            .read()
            .map_err(|_| EngineError::Storage("vector index lock poisoned".to_string()))?;

        let entries: Vec<PersistedEntry> = state
            .id_to_internal
            .iter()
            .filter_map(|(memory_id, &internal_id)| {
                let record = state.records.get(&internal_id)?;
                let vector = state.vectors.get(&internal_id)?;
                Some(PersistedEntry {
                    internal_id,
                    memory_id: memory_id.clone(),
                    memory_type: record.memory_type,
                    content: record.content.clone(),
                    created_at: record.created_at.clone(),
                    vector: vector.clone(),
                })
            })
            .collect();
        let persisted = PersistedStore {
            dimensions: self.dimensions,
            next_id: state.next_id,
            entries,
        };
        drop(state);

        let json = serde_json::to_vec(&persisted)?;
        fs::write(self.persisted_path(), json)?;
        Ok(())
    }

    fn ensure_inner(&self) -> Result<&Inner> {
        self.inner.get_or_try_init(|| {
            fs::create_dir_all(&self.dir)?;
            let hnsw = Hnsw::new(
                MAX_NB_CONNECTION,
                MAX_ELEMENTS,
                MAX_LAYER,
                EF_CONSTRUCTION,
                DistL2 {},
            );

            let mut state = IndexState {
                id_to_internal: HashMap::new(),
                internal_to_id: Vec::new(),
                records: HashMap::new(),
                vectors: HashMap::new(),
                deleted: std::collections::HashSet::new(),
                next_id: 0,
            };

            if let Some(persisted) = self.load_persisted() {
                state.next_id = persisted.next_id;
                state.internal_to_id = vec![String::new(); persisted.next_id];
                for entry in persisted.entries {
                    let PersistedEntry {
                        internal_id,
                        memory_id,
                        memory_type,
                        content,
                        created_at,
                        vector,
                    } = entry;
                    hnsw.insert((&vector, internal_id));
                    state.id_to_internal.insert(memory_id.clone(), internal_id);
                    if internal_id < state.internal_to_id.len() {
                        state.internal_to_id[internal_id] = memory_id.clone();
                    }
                    state.records.insert(
                        internal_id,
                        VectorRecord {
                            memory_id,
                            memory_type,
                            content,
                            created_at,
                        },
                    );
                    state.vectors.insert(internal_id, vector);
                }
            }

            Ok(Inner {
                hnsw,
                state: RwLock::new(state),
            })
        })
    }

    fn validate(&self, memory_id: &str, vector: &[f32]) -> Result<()> {
        if !is_valid_id(memory_id) {
            return Err(EngineError::Retrieval(format!(
                "invalid memory id: {}",
                memory_id
            )));
        }
        if vector.len() != self.dimensions {
            return Err(EngineError::Embedding(format!(
                "vector dimension mismatch: expected {}, got {}",
                self.dimensions,
                vector.len()
            )));
        }
        Ok(())
    }

    /// Inserts or refreshes a vector without flushing to disk; callers
    /// that write several records in one go (`add_batch`) use this and
    /// flush once afterwards.
    fn add_internal(
        &self,
        memory_id: &str,
        memory_type: MemoryKind,
        vector: &[f32],
        content: &str,
        created_at: &str,
    ) -> Result<()> {
        self.validate(memory_id, vector)?;
        let inner = self.ensure_inner()?;

        let internal_id = {
            let mut state = inner
                .state
                .write()
                .map_err(|_| EngineError::Storage("vector index lock poisoned".to_string()))?;

            if let Some(&old_internal) = state.id_to_internal.get(memory_id) {
                // The HNSW graph has no update-in-place: a write against an id
                // that already has a node is a refresh, so the old node is
                // soft-deleted (it stays in the graph, filtered out of every
                // search) and a brand new node is inserted under a fresh id.
                state.deleted.insert(old_internal);
                state.records.remove(&old_internal);
                state.vectors.remove(&old_internal);
            }

            let internal_id = state.next_id;
            state.next_id += 1;
            state.id_to_internal.insert(memory_id.to_string(), internal_id);
            state.internal_to_id.push(memory_id.to_string());
            state.records.insert(
                internal_id,
                VectorRecord {
                    memory_id: memory_id.to_string(),
                    memory_type,
                    content: content.to_string(),
                    created_at: created_at.to_string(),
                },
            );
            state.vectors.insert(internal_id, vector.to_vec());
            internal_id
        };

        inner.hnsw.insert((vector, internal_id));
        Ok(())
    }

    pub fn add(
        &self,
        memory_id: &str,
        memory_type: MemoryKind,
        vector: &[f32],
        content: &str,
        created_at: &str,
    ) -> Result<()> {
        self.add_internal(memory_id, memory_type, vector, content, created_at)?;
        self.flush()
    }

    pub fn add_batch(
        &self,
        records: &[(String, MemoryKind, Vec<f32>, String, String)],
    ) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        for (memory_id, memory_type, vector, content, created_at) in records {
            self.add_internal(memory_id, *memory_type, vector, content, created_at)?;
        }
        self.flush()
    }

    pub fn search(
        &self,
        query: &[f32],
        limit: usize,
        memory_type_filter: Option<MemoryKind>,
    ) -> Result<Vec<SearchHit>> {
        if query.len() != self.dimensions {
            return Err(EngineError::Embedding(format!(
                "query dimension mismatch: expected {}, got {}",
                self.dimensions,
                query.len()
            )));
        }
        let inner = self.ensure_inner()?;

        let state = inner
            .state
            .read()
            .map_err(|_| EngineError::Storage("vector index lock poisoned".to_string()))?;

        let deleted = &state.deleted;
        let filter_fn = |id: &usize| -> bool { !deleted.contains(id) };
        let neighbours = if state.deleted.is_empty() {
            inner.hnsw.search(query, limit, EF_SEARCH)
        } else {
            inner.hnsw.search_filter(query, limit, EF_SEARCH, Some(&filter_fn))
        };

        let mut hits = Vec::with_capacity(neighbours.len());
        for n in neighbours {
            let Some(record) = state.records.get(&n.d_id) else {
                continue;
            };
            if let Some(wanted) = memory_type_filter {
                if record.memory_type != wanted {
                    continue;
                }
            }
            hits.push(SearchHit {
                record: record.clone(),
                distance: n.distance,
            });
        }
        hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap());
        Ok(hits)
    }

    pub fn delete(&self, memory_id: &str) -> Result<()> {
        if !is_valid_id(memory_id) {
            return Err(EngineError::Retrieval(format!(
                "invalid memory id: {}",
                memory_id
            )));
        }
        let inner = self.ensure_inner()?;
        {
            let mut state = inner
                .state
                .write()
                .map_err(|_| EngineError::Storage("vector index lock poisoned".to_string()))?;
            // Drop the id_to_internal entry entirely, not just the record: a
            // later add() for this memory_id must allocate a fresh internal
            // id and insert into the graph rather than silently reusing
            // (and un-deleting) this stale node.
            if let Some(internal_id) = state.id_to_internal.remove(memory_id) {
                state.deleted.insert(internal_id);
                state.records.remove(&internal_id);
                state.vectors.remove(&internal_id);
            }
        }
        self.flush()
    }

    pub fn count(&self) -> usize {
        let Ok(inner) = self.ensure_inner() else {
            return 0;
        };
        inner
            .state
            .read()
            .map(|s| s.records.len())
            .unwrap_or(0)
    }

    /// All memory ids currently indexed, for repair-utility cross-referencing.
    pub fn all_ids(&self) -> Vec<String> {
        let Ok(inner) = self.ensure_inner() else {
            return Vec::new();
        };
        inner
            .state
            .read()
            .map(|s| s.records.values().map(|r| r.memory_id.clone()).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec_of(seed: f32, dim: usize) -> Vec<f32> {
        (0..dim).map(|i| (seed + i as f32 * 0.01).sin()).collect()
    }

    #[test]
    fn rejects_wrong_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::new(dir.path(), 8);
        let err = store
            .add(
                "01AAAAAAAAAAAAAAAAAAAAAAAA",
                MemoryKind::Event,
                &vec![0.0; 4],
                "x",
                "2026-01-01T00:00:00Z",
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::Embedding(_)));
    }

    #[test]
    fn rejects_malformed_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::new(dir.path(), 4);
        let err = store
            .add("not-a-valid-id", MemoryKind::Event, &vec![0.0; 4], "x", "now")
            .unwrap_err();
        assert!(matches!(err, EngineError::Retrieval(_)));
    }

    #[test]
    fn search_returns_ascending_distance() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::new(dir.path(), 8);
        for i in 0..5 {
            let id = format!("01SEARCHSEARCHSEARCHSEXX{:02}", i);
            store
                .add(&id, MemoryKind::Event, &vec_of(i as f32, 8), "x", "now")
                .unwrap();
        }
        let hits = store.search(&vec_of(2.0, 8), 3, None).unwrap();
        assert!(hits.len() <= 3);
        for w in hits.windows(2) {
            assert!(w[0].distance <= w[1].distance);
        }
    }

    #[test]
    fn delete_excludes_from_search() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::new(dir.path(), 4);
        let id = "01TRASHEDTRASHEDTRASHEDTRA";
        store.add(id, MemoryKind::Event, &vec_of(1.0, 4), "x", "now").unwrap();
        assert_eq!(store.count(), 1);
        store.delete(id).unwrap();
        assert_eq!(store.count(), 0);

        let hits = store.search(&vec_of(1.0, 4), 10, None).unwrap();
        assert!(hits.iter().all(|h| h.record.memory_id != id));
    }

    #[test]
    fn type_filter_excludes_other_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::new(dir.path(), 4);
        store
            .add("01EVENTEVENTEVENTEVENTEVEN", MemoryKind::Event, &vec_of(1.0, 4), "e", "now")
            .unwrap();
        store
            .add("01ENTRYENTRYENTRYENTRYENTR", MemoryKind::Entity, &vec_of(1.1, 4), "n", "now")
            .unwrap();

        let hits = store.search(&vec_of(1.0, 4), 10, Some(MemoryKind::Entity)).unwrap();
        assert!(hits.iter().all(|h| h.record.memory_type == MemoryKind::Entity));
    }

    #[test]
    fn search_before_any_write_returns_empty_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::new(dir.path(), 4);
        let hits = store.search(&vec_of(1.0, 4), 5, None).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn add_after_delete_refreshes_the_vector_not_just_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::new(dir.path(), 4);
        let id = "01REFRESHREFRESHREFRESHREF";
        let far = vec_of(50.0, 4);
        let near = vec_of(1.0, 4);

        store.add(id, MemoryKind::Event, &far, "old", "now").unwrap();
        store.delete(id).unwrap();
        store.add(id, MemoryKind::Event, &near, "new", "now").unwrap();

        let hits = store.search(&near, 1, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.memory_id, id);
        assert_eq!(hits[0].record.content, "new");
        assert!(
            hits[0].distance < 0.5,
            "refreshed node should sit near the new vector, got distance {}",
            hits[0].distance
        );
    }

    #[test]
    fn persists_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let id = "01PERSISTPERSISTPERSISTPER";
        {
            let store = VectorStore::new(dir.path(), 4);
            store
                .add(id, MemoryKind::Event, &vec_of(1.0, 4), "hello", "now")
                .unwrap();
            assert_eq!(store.count(), 1);
        }

        let reopened = VectorStore::new(dir.path(), 4);
        assert_eq!(reopened.count(), 1);
        let hits = reopened.search(&vec_of(1.0, 4), 5, None).unwrap();
        assert!(hits.iter().any(|h| h.record.memory_id == id));
    }

    #[test]
    fn deleted_entries_stay_deleted_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        let id = "01GONEGONEGONEGONEGONEGONE";
        {
            let store = VectorStore::new(dir.path(), 4);
            store.add(id, MemoryKind::Event, &vec_of(2.0, 4), "x", "now").unwrap();
            store.delete(id).unwrap();
        }

        let reopened = VectorStore::new(dir.path(), 4);
        assert_eq!(reopened.count(), 0);
        let hits = reopened.search(&vec_of(2.0, 4), 5, None).unwrap();
        assert!(hits.iter().all(|h| h.record.memory_id != id));
    }

    #[test]
    fn dimension_mismatch_on_reload_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = VectorStore::new(dir.path(), 4);
            store
                .add("01DIMDIMDIMDIMDIMDIMDIMDIM", MemoryKind::Event, &vec_of(1.0, 4), "x", "now")
                .unwrap();
        }

        let reopened = VectorStore::new(dir.path(), 8);
        assert_eq!(reopened.count(), 0);
    }
}
