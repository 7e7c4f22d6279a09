//! Reconciliation pass between the two stores.
//!
//! Not part of steady-state operation — a recovery tool, run on startup or
//! on demand, that tolerates the same crash/cancellation window the
//! compensating-write pattern elsewhere in the engine leaves open.

use std::collections::HashSet;
use std::sync::Arc;

use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::semantic::entity_embedding_text;
use crate::storage::connection::RelationalStore;
use crate::storage::{entities, events, reflections};
use crate::types::{MemoryKind, RepairReport};
use crate::vector::VectorStore;

pub struct RepairUtility {
    store: Arc<RelationalStore>,
    vectors: Arc<VectorStore>,
    embeddings: Arc<EmbeddingProvider>,
}

impl RepairUtility {
    pub fn new(store: Arc<RelationalStore>, vectors: Arc<VectorStore>, embeddings: Arc<EmbeddingProvider>) -> Self {
        Self {
            store,
            vectors,
            embeddings,
        }
    }

    pub fn repair(&self) -> Result<RepairReport> {
        let mut report = RepairReport::default();

        let all_events = self.store.with_connection(|conn| events::get_events_by_ids(conn, &all_event_ids(conn)?))?;
        let all_entities = self.store.with_connection(entities::list_all_entities)?;
        let all_reflections = self.store.with_connection(|conn| reflections::list_all_reflections(conn, usize::MAX))?;

        let row_ids: HashSet<String> = all_events
            .keys()
            .cloned()
            .chain(all_entities.iter().map(|e| e.id.clone()))
            .chain(all_reflections.iter().map(|r| r.id.clone()))
            .collect();

        for vector_id in self.vectors.all_ids() {
            if !row_ids.contains(&vector_id) {
                self.vectors.delete(&vector_id)?;
                report.orphan_vectors_removed += 1;
            }
        }

        let vector_ids: HashSet<String> = self.vectors.all_ids().into_iter().collect();

        for event in all_events.values() {
            if !vector_ids.contains(&event.id) {
                self.reembed_one(&event.id, MemoryKind::Event, &event.content, &event.created_at.to_rfc3339(), &mut report);
            }
        }
        for entity in &all_entities {
            if !vector_ids.contains(&entity.id) {
                let text = entity_embedding_text(entity);
                self.reembed_one(&entity.id, MemoryKind::Entity, &text, &entity.updated_at.to_rfc3339(), &mut report);
            }
        }
        for reflection in &all_reflections {
            if !vector_ids.contains(&reflection.id) {
                self.reembed_one(
                    &reflection.id,
                    MemoryKind::Reflection,
                    &reflection.content,
                    &reflection.created_at.to_rfc3339(),
                    &mut report,
                );
            }
        }

        Ok(report)
    }

    fn reembed_one(&self, id: &str, kind: MemoryKind, text: &str, created_at: &str, report: &mut RepairReport) {
        match self.embeddings.embed(text) {
            Ok(vector) => match self.vectors.add(id, kind, &vector, text, created_at) {
                Ok(()) => report.rows_reembedded += 1,
                Err(e) => tracing::warn!(memory_id = id, error = %e, "repair: failed to store re-embedded vector"),
            },
            Err(e) => {
                tracing::warn!(memory_id = id, error = %e, "repair: failed to re-embed row; left without a vector, will retry next pass");
            }
        }
    }
}

fn all_event_ids(conn: &rusqlite::Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT id FROM events")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::events::insert_event;
    use crate::types::{Event, EventType};
    use chrono::Utc;
    use std::collections::HashMap as Map;

    fn parts() -> (Arc<RelationalStore>, Arc<VectorStore>, Arc<EmbeddingProvider>) {
        let store = Arc::new(RelationalStore::open_in_memory().unwrap());
        let dir = std::env::temp_dir().join(format!("agentmem-repair-{}", crate::ids::new_id()));
        let vectors = Arc::new(VectorStore::new(&dir, 16));
        let embeddings = Arc::new(EmbeddingProvider::hashing(16));
        (store, vectors, embeddings)
    }

    #[test]
    fn removes_orphan_vector_and_reembeds_vectorless_row() {
        let (store, vectors, embeddings) = parts();
        let repair = RepairUtility::new(store.clone(), vectors.clone(), embeddings.clone());

        let event = Event {
            id: "01MENDEDMENDEDMENDEDMENDED".to_string(),
            agent_id: "a".to_string(),
            event_type: EventType::Observation,
            content: "needs a vector".to_string(),
            importance: 0.5,
            entities: vec![],
            metadata: Map::new(),
            created_at: Utc::now(),
            accessed_at: None,
            access_count: 0,
        };
        store.with_connection(|conn| insert_event(conn, &event)).unwrap();

        let orphan_vector = embeddings.embed("orphaned content").unwrap();
        vectors
            .add(
                "01STRAYSTRAYSTRAYSTRAYSTRA",
                MemoryKind::Event,
                &orphan_vector,
                "orphaned content",
                &Utc::now().to_rfc3339(),
            )
            .unwrap();

        let report = repair.repair().unwrap();
        assert_eq!(report.orphan_vectors_removed, 1);
        assert_eq!(report.rows_reembedded, 1);

        let remaining_ids = vectors.all_ids();
        assert!(remaining_ids.contains(&event.id));
        assert!(!remaining_ids.contains(&"01STRAYSTRAYSTRAYSTRAYSTRA".to_string()));
    }

    #[test]
    fn consistent_store_reports_nothing_to_repair() {
        let (store, vectors, embeddings) = parts();
        let repair = RepairUtility::new(store, vectors, embeddings);
        let report = repair.repair().unwrap();
        assert_eq!(report.orphan_vectors_removed, 0);
        assert_eq!(report.rows_reembedded, 0);
    }
}
