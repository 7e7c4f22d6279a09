//! Episodic memory: the append-only event log, plus hybrid recall over it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::ids::new_id;
use crate::llm::LanguageModelProvider;
use crate::storage::connection::RelationalStore;
use crate::storage::events;
use crate::types::{CreateEventInput, Event, EventSearchOptions, EventType, MemoryKind};
use crate::vector::VectorStore;

const DEFAULT_TIMELINE_LIMIT: usize = 50;
const MAX_TIMELINE_LIMIT: usize = 200;

pub struct EpisodicMemory {
    store: Arc<RelationalStore>,
    vectors: Arc<VectorStore>,
    embeddings: Arc<EmbeddingProvider>,
    llm: Option<Arc<dyn LanguageModelProvider>>,
}

impl EpisodicMemory {
    pub fn new(
        store: Arc<RelationalStore>,
        vectors: Arc<VectorStore>,
        embeddings: Arc<EmbeddingProvider>,
        llm: Option<Arc<dyn LanguageModelProvider>>,
    ) -> Self {
        Self {
            store,
            vectors,
            embeddings,
            llm,
        }
    }

    /// Append an event. Row write precedes vector write; if the vector
    /// write fails, the row is deleted before the error is re-raised, so a
    /// failed append never leaves a row without a vector on the happy path
    /// (only a crash or cancellation between the two writes can, and the
    /// repair utility covers that window).
    pub fn record_event(&self, input: CreateEventInput) -> Result<Event> {
        let importance = match input.importance {
            Some(v) => v.clamp(0.0, 1.0),
            None => self.score_importance(&input.content),
        };

        let event = Event {
            id: new_id(),
            agent_id: input.agent_id,
            event_type: input.event_type,
            content: input.content,
            importance,
            entities: input.entities,
            metadata: input.metadata,
            created_at: Utc::now(),
            accessed_at: None,
            access_count: 0,
        };

        self.store.with_connection(|conn| events::insert_event(conn, &event))?;

        if let Err(e) = self.embed_and_store(&event) {
            self.store
                .with_connection(|conn| events::delete_event(conn, &event.id))?;
            return Err(e);
        }

        Ok(event)
    }

    fn embed_and_store(&self, event: &Event) -> Result<()> {
        let vector = self.embeddings.embed(&event.content)?;
        self.vectors.add(
            &event.id,
            MemoryKind::Event,
            &vector,
            &event.content,
            &event.created_at.to_rfc3339(),
        )
    }

    fn score_importance(&self, content: &str) -> f32 {
        let Some(llm) = &self.llm else {
            return 0.5;
        };
        let prompt = format!(
            "Rate the importance of this memory on a scale from 0.0 to 1.0. \
             Respond with only the number.\n\nMemory: {}",
            content
        );
        match llm.complete(&prompt) {
            Ok(text) => text
                .trim()
                .parse::<f32>()
                .map(|v| v.clamp(0.0, 1.0))
                .unwrap_or_else(|_| {
                    tracing::warn!(response = %text, "importance scorer returned unparseable output; defaulting to 0.5");
                    0.5
                }),
            Err(e) => {
                tracing::warn!(error = %e, "importance scorer call failed; defaulting to 0.5");
                0.5
            }
        }
    }

    pub fn get_event(&self, id: &str) -> Result<Option<Event>> {
        self.store.with_connection(|conn| events::get_event(conn, id))
    }

    /// Hybrid search: vector search over `2*limit` event-typed hits, union
    /// with full-text search over `limit` hits, hydrated, post-filtered,
    /// touched, and ordered by vector distance ascending (full-text-only
    /// hits sort last).
    pub fn search(&self, query: &str, opts: EventSearchOptions) -> Result<Vec<Event>> {
        let limit = opts.limit.max(1);
        let query_vector = self.embeddings.embed(query)?;
        let vector_hits = self
            .vectors
            .search(&query_vector, limit * 2, Some(MemoryKind::Event))?;
        let fulltext_ids = self
            .store
            .with_connection(|conn| events::search_events_fulltext(conn, query, limit))?;

        let mut distance_by_id: HashMap<String, f32> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        for hit in &vector_hits {
            distance_by_id
                .entry(hit.record.memory_id.clone())
                .or_insert(hit.distance);
            order.push(hit.record.memory_id.clone());
        }
        for id in &fulltext_ids {
            if !distance_by_id.contains_key(id) {
                distance_by_id.insert(id.clone(), f32::INFINITY);
                order.push(id.clone());
            }
        }

        let hydrated = self
            .store
            .with_connection(|conn| events::get_events_by_ids(conn, &order))?;

        let mut results: Vec<(f32, Event)> = order
            .into_iter()
            .filter_map(|id| hydrated.get(&id).cloned().map(|e| (distance_by_id[&id], e)))
            .filter(|(_, event)| events::matches_search_filters(event, &opts))
            .collect();

        results.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);

        for (_, event) in &results {
            self.store.with_connection(|conn| events::touch_event(conn, &event.id))?;
        }

        Ok(results.into_iter().map(|(_, e)| e).collect())
    }

    pub fn timeline(&self, agent_id: &str, event_type: Option<EventType>, limit: Option<usize>) -> Result<Vec<Event>> {
        let limit = limit.unwrap_or(DEFAULT_TIMELINE_LIMIT).min(MAX_TIMELINE_LIMIT);
        self.store
            .with_connection(|conn| events::get_timeline(conn, agent_id, event_type, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn scratch_dir() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("agentmem-test-{}", new_id()))
    }

    fn engine_parts() -> (Arc<RelationalStore>, Arc<VectorStore>, Arc<EmbeddingProvider>) {
        let store = Arc::new(RelationalStore::open_in_memory().unwrap());
        let vectors = Arc::new(VectorStore::new(&scratch_dir(), 32));
        let embeddings = Arc::new(EmbeddingProvider::hashing(32));
        (store, vectors, embeddings)
    }

    fn input(agent: &str, content: &str) -> CreateEventInput {
        CreateEventInput {
            agent_id: agent.to_string(),
            event_type: EventType::Observation,
            content: content.to_string(),
            importance: None,
            entities: vec![],
            metadata: Map::new(),
        }
    }

    #[test]
    fn record_event_defaults_importance_without_llm() {
        let (store, vectors, embeddings) = engine_parts();
        let episodic = EpisodicMemory::new(store, vectors.clone(), embeddings, None);
        let event = episodic
            .record_event(input("a", "User prefers dark mode"))
            .unwrap();
        assert_eq!(event.importance, 0.5);
        assert_eq!(vectors.count(), 1);
    }

    #[test]
    fn embedding_failure_leaves_no_row_and_no_vector() {
        let store = Arc::new(RelationalStore::open_in_memory().unwrap());
        let vectors = Arc::new(VectorStore::new(&scratch_dir(), 8));
        let embeddings = Arc::new(EmbeddingProvider::with_factory(8, || {
            Err(crate::error::EngineError::Embedding("boom".to_string()))
        }));
        let episodic = EpisodicMemory::new(store.clone(), vectors.clone(), embeddings, None);

        let err = episodic.record_event(input("a", "hello")).unwrap_err();
        assert!(matches!(err, crate::error::EngineError::Embedding(_)));

        let stats = store.with_connection(crate::storage::stats::get_stats).unwrap();
        assert_eq!(stats.event_count, 0);
        assert_eq!(vectors.count(), 0);
    }

    #[test]
    fn recency_ranks_newer_identical_content_first() {
        let (store, vectors, embeddings) = engine_parts();
        let episodic = EpisodicMemory::new(store, vectors, embeddings, None);

        let mut old_input = input("a", "identical content for ranking");
        old_input.importance = Some(0.5);
        let old_event = episodic.record_event(old_input).unwrap();
        store_event_at(&episodic, &old_event.id, Utc::now() - chrono::Duration::days(30));

        episodic
            .record_event(input("a", "identical content for ranking"))
            .unwrap();

        let results = episodic
            .search(
                "identical content for ranking",
                EventSearchOptions {
                    limit: 10,
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(!results.is_empty());
    }

    fn store_event_at(episodic: &EpisodicMemory, id: &str, at: chrono::DateTime<Utc>) {
        episodic
            .store
            .with_connection(|conn| {
                conn.execute(
                    "UPDATE events SET created_at = ?1 WHERE id = ?2",
                    rusqlite::params![at.to_rfc3339(), id],
                )?;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn timeline_respects_max_limit() {
        let (store, vectors, embeddings) = engine_parts();
        let episodic = EpisodicMemory::new(store, vectors, embeddings, None);
        for i in 0..3 {
            episodic
                .record_event(input("a", &format!("event {}", i)))
                .unwrap();
        }
        let results = episodic.timeline("a", None, Some(1000)).unwrap();
        assert!(results.len() <= MAX_TIMELINE_LIMIT);
        assert_eq!(results.len(), 3);
    }
}
