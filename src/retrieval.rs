//! The unified recall contract: fan out a single query vector, batch
//! hydrate by memory type, score, and rank.

use std::sync::Arc;

use chrono::Utc;

use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::semantic::entity_display_content;
use crate::storage::connection::RelationalStore;
use crate::storage::{core_memory, entities, events, reflections};
use crate::types::{MemoryKind, RecallResult, ScoredMemory};
use crate::vector::VectorStore;

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 50;
const INFLATION_FACTOR: usize = 3;

pub struct RecallOptions {
    pub limit: usize,
    pub include_core: bool,
    pub agent_id: Option<String>,
    pub touch: bool,
}

impl Default for RecallOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            include_core: true,
            agent_id: None,
            touch: true,
        }
    }
}

pub struct RetrievalEngine {
    store: Arc<RelationalStore>,
    vectors: Arc<VectorStore>,
    embeddings: Arc<EmbeddingProvider>,
    decay_rate: f32,
    weight_recency: f32,
    weight_importance: f32,
    weight_relevance: f32,
}

impl RetrievalEngine {
    pub fn new(
        store: Arc<RelationalStore>,
        vectors: Arc<VectorStore>,
        embeddings: Arc<EmbeddingProvider>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            vectors,
            embeddings,
            decay_rate: config.decay_rate,
            weight_recency: config.weight_recency,
            weight_importance: config.weight_importance,
            weight_relevance: config.weight_relevance,
        }
    }

    pub fn recall(&self, query: &str, opts: RecallOptions) -> Result<RecallResult> {
        let limit = opts.limit.clamp(1, MAX_LIMIT);
        let query_vector = self.embeddings.embed(query)?;
        let fanout = limit * INFLATION_FACTOR;
        let hits = self.vectors.search(&query_vector, fanout, None)?;
        let total_searched = hits.len();

        let mut event_ids = Vec::new();
        let mut entity_ids = Vec::new();
        let mut reflection_ids = Vec::new();
        for hit in &hits {
            match hit.record.memory_type {
                MemoryKind::Event => event_ids.push(hit.record.memory_id.clone()),
                MemoryKind::Entity => entity_ids.push(hit.record.memory_id.clone()),
                MemoryKind::Reflection => reflection_ids.push(hit.record.memory_id.clone()),
            }
        }

        let events_by_id = self.store.with_connection(|conn| events::get_events_by_ids(conn, &event_ids))?;
        let entities_by_id = self.store.with_connection(|conn| entities::get_entities_by_ids(conn, &entity_ids))?;
        let reflections_by_id = self
            .store
            .with_connection(|conn| reflections::get_reflections_by_ids(conn, &reflection_ids))?;

        let now = Utc::now();
        let mut scored: Vec<ScoredMemory> = Vec::with_capacity(hits.len());

        for hit in &hits {
            let relevance = (1.0 - hit.distance / 2.0).clamp(0.0, 1.0);
            let memory_id = &hit.record.memory_id;

            let built = match hit.record.memory_type {
                MemoryKind::Event => {
                    let Some(event) = events_by_id.get(memory_id) else {
                        tracing::warn!(memory_id, "orphaned event vector skipped in recall");
                        continue;
                    };
                    if let Some(agent_id) = &opts.agent_id {
                        if &event.agent_id != agent_id {
                            continue;
                        }
                    }
                    let last_access = event.accessed_at.unwrap_or(event.created_at);
                    let recency = self.recency(last_access, now);
                    let score = self.weighted_score(recency, event.importance, relevance);
                    if opts.touch {
                        self.store.with_connection(|conn| events::touch_event(conn, memory_id))?;
                    }
                    ScoredMemory {
                        memory_id: memory_id.clone(),
                        memory_type: MemoryKind::Event,
                        content: event.content.clone(),
                        score,
                        recency,
                        importance: event.importance,
                        relevance,
                    }
                }
                MemoryKind::Entity => {
                    let Some(entity) = entities_by_id.get(memory_id) else {
                        tracing::warn!(memory_id, "orphaned entity vector skipped in recall");
                        continue;
                    };
                    let last_access = entity.accessed_at.unwrap_or(entity.created_at);
                    let recency = self.recency(last_access, now);
                    let score = self.weighted_score(recency, entity.importance, relevance);
                    if opts.touch {
                        self.store.with_connection(|conn| entities::touch_entity(conn, memory_id))?;
                    }
                    ScoredMemory {
                        memory_id: memory_id.clone(),
                        memory_type: MemoryKind::Entity,
                        content: entity_display_content(entity),
                        score,
                        recency,
                        importance: entity.importance,
                        relevance,
                    }
                }
                MemoryKind::Reflection => {
                    let Some(reflection) = reflections_by_id.get(memory_id) else {
                        tracing::warn!(memory_id, "orphaned reflection vector skipped in recall");
                        continue;
                    };
                    let last_access = reflection.accessed_at.unwrap_or(reflection.created_at);
                    let recency = self.recency(last_access, now);
                    let score = self.weighted_score(recency, reflection.importance, relevance);
                    if opts.touch {
                        self.store
                            .with_connection(|conn| reflections::touch_reflection(conn, memory_id))?;
                    }
                    ScoredMemory {
                        memory_id: memory_id.clone(),
                        memory_type: MemoryKind::Reflection,
                        content: reflection.content.clone(),
                        score,
                        recency,
                        importance: reflection.importance,
                        relevance,
                    }
                }
            };
            scored.push(built);
        }

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        let core_memory = if opts.include_core {
            self.store.with_connection(core_memory::list_core_memory_blocks)?
        } else {
            Vec::new()
        };

        Ok(RecallResult {
            core_memory,
            memories: scored,
            total_searched,
        })
    }

    /// `decay_rate ^ max(0, hours_since(t))`, monotonically non-increasing
    /// in the elapsed time.
    fn recency(&self, last_access: chrono::DateTime<Utc>, now: chrono::DateTime<Utc>) -> f32 {
        let hours = (now - last_access).num_seconds() as f32 / 3600.0;
        self.decay_rate.powf(hours.max(0.0))
    }

    fn weighted_score(&self, recency: f32, importance: f32, relevance: f32) -> f32 {
        self.weight_recency * recency + self.weight_importance * importance.clamp(0.0, 1.0) + self.weight_relevance * relevance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::episodic::EpisodicMemory;
    use crate::semantic::SemanticMemory;
    use crate::types::{CreateEventInput, EventType, UpsertEntityInput};
    use std::collections::HashMap as Map;

    fn engine() -> (RetrievalEngine, EpisodicMemory, SemanticMemory) {
        let store = Arc::new(RelationalStore::open_in_memory().unwrap());
        let dir = std::env::temp_dir().join(format!("agentmem-retrieval-{}", crate::ids::new_id()));
        let vectors = Arc::new(VectorStore::new(&dir, 32));
        let embeddings = Arc::new(EmbeddingProvider::hashing(32));
        let config = Config {
            embedding_dimensions: 32,
            ..Config::default()
        };
        let retrieval = RetrievalEngine::new(store.clone(), vectors.clone(), embeddings.clone(), &config);
        let episodic = EpisodicMemory::new(store.clone(), vectors.clone(), embeddings.clone(), None);
        let semantic = SemanticMemory::new(store, vectors, embeddings);
        (retrieval, episodic, semantic)
    }

    #[test]
    fn recall_returns_at_most_limit_sorted_descending() {
        let (retrieval, episodic, _semantic) = engine();
        for i in 0..10 {
            episodic
                .record_event(CreateEventInput {
                    agent_id: "a".to_string(),
                    event_type: EventType::Observation,
                    content: format!("note about project roadmap number {}", i),
                    importance: Some(0.6),
                    entities: vec![],
                    metadata: Map::new(),
                })
                .unwrap();
        }

        let result = retrieval
            .recall("project roadmap", RecallOptions { limit: 3, ..Default::default() })
            .unwrap();
        assert!(result.memories.len() <= 3);
        assert!(result.memories.iter().all(|m| m.score >= 0.0));
        for w in result.memories.windows(2) {
            assert!(w[0].score >= w[1].score);
        }
    }

    #[test]
    fn recall_includes_core_memory_when_requested() {
        let (retrieval, episodic, semantic) = engine();
        episodic
            .record_event(CreateEventInput {
                agent_id: "a".to_string(),
                event_type: EventType::Observation,
                content: "hello".to_string(),
                importance: Some(0.5),
                entities: vec![],
                metadata: Map::new(),
            })
            .unwrap();
        semantic
            .update_core_memory(
                crate::types::BlockType::Persona,
                "default",
                crate::types::CoreMemoryOp::Replace,
                "I am a test agent",
            )
            .unwrap();

        let result = retrieval
            .recall("hello", RecallOptions { include_core: true, ..Default::default() })
            .unwrap();
        assert_eq!(result.core_memory.len(), 1);
        assert_eq!(result.core_memory[0].content, "I am a test agent");
    }

    #[test]
    fn agent_filter_drops_events_from_other_agents() {
        let (retrieval, episodic, _semantic) = engine();
        episodic
            .record_event(CreateEventInput {
                agent_id: "agent-a".to_string(),
                event_type: EventType::Observation,
                content: "shared topic wombats".to_string(),
                importance: Some(0.5),
                entities: vec![],
                metadata: Map::new(),
            })
            .unwrap();
        episodic
            .record_event(CreateEventInput {
                agent_id: "agent-b".to_string(),
                event_type: EventType::Observation,
                content: "shared topic wombats".to_string(),
                importance: Some(0.5),
                entities: vec![],
                metadata: Map::new(),
            })
            .unwrap();

        let result = retrieval
            .recall(
                "shared topic wombats",
                RecallOptions {
                    agent_id: Some("agent-a".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(result.memories.len(), 1);
    }
}
