//! Semantic memory: core memory blocks, the entity/relation knowledge
//! graph, and knowledge search over it.

use std::sync::Arc;

use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::storage::connection::RelationalStore;
use crate::storage::{core_memory, entities, relations};
use crate::types::{
    BlockType, CoreMemoryBlock, CoreMemoryOp, Entity, EntityType, MemoryKind, Relation,
    UpsertEntityInput,
};
use crate::vector::VectorStore;

pub struct SemanticMemory {
    store: Arc<RelationalStore>,
    vectors: Arc<VectorStore>,
    embeddings: Arc<EmbeddingProvider>,
}

impl SemanticMemory {
    pub fn new(store: Arc<RelationalStore>, vectors: Arc<VectorStore>, embeddings: Arc<EmbeddingProvider>) -> Self {
        Self {
            store,
            vectors,
            embeddings,
        }
    }

    pub fn update_core_memory(
        &self,
        block_type: BlockType,
        block_key: &str,
        op: CoreMemoryOp,
        content: &str,
    ) -> Result<CoreMemoryBlock> {
        self.store
            .with_connection(|conn| core_memory::update_core_memory(conn, block_type, block_key, op, content))
    }

    pub fn list_core_memory(&self) -> Result<Vec<CoreMemoryBlock>> {
        self.store.with_connection(core_memory::list_core_memory_blocks)
    }

    /// Upsert an entity by name inside a relational transaction, then
    /// refresh its vector outside the transaction: the row is authoritative,
    /// the vector a best-effort derived index, so an embedding failure here
    /// is logged, not surfaced.
    pub fn upsert_entity(&self, input: UpsertEntityInput) -> Result<Entity> {
        let entity = self
            .store
            .with_transaction(|conn| entities::upsert_entity(conn, &input))?;

        let text = entity_embedding_text(&entity);
        match self.embeddings.embed(&text) {
            Ok(vector) => {
                self.vectors.delete(&entity.id)?;
                if let Err(e) = self.vectors.add(
                    &entity.id,
                    MemoryKind::Entity,
                    &vector,
                    &text,
                    &entity.updated_at.to_rfc3339(),
                ) {
                    tracing::warn!(entity_id = %entity.id, error = %e, "failed to store refreshed entity vector");
                }
            }
            Err(e) => {
                tracing::warn!(entity_id = %entity.id, error = %e, "failed to embed entity after row commit; row is authoritative");
            }
        }

        Ok(entity)
    }

    pub fn get_entity(&self, id: &str) -> Result<Option<Entity>> {
        self.store.with_connection(|conn| entities::get_entity(conn, id))
    }

    pub fn get_entity_by_name(&self, name: &str) -> Result<Option<Entity>> {
        self.store.with_connection(|conn| entities::get_entity_by_name(conn, name))
    }

    /// Resolve both endpoints by name, invalidate any currently-open row
    /// for the triple, and insert the new one — all inside one transaction
    /// so there is never a window with zero or two open rows.
    pub fn create_relation(&self, from_name: &str, to_name: &str, relation_type: &str) -> Result<Relation> {
        self.store
            .with_transaction(|conn| relations::create_relation(conn, from_name, to_name, relation_type))
    }

    pub fn get_relations(&self, entity_id: &str, active_only: bool) -> Result<Vec<Relation>> {
        self.store
            .with_connection(|conn| relations::get_relations(conn, entity_id, active_only))
    }

    /// Distance-ordered-only search over the `entity` vector partition; no
    /// recency/importance fusion (use the retrieval engine for that).
    pub fn search_knowledge(&self, query: &str, entity_type: Option<EntityType>, limit: usize) -> Result<Vec<Entity>> {
        let limit = limit.max(1);
        let query_vector = self.embeddings.embed(query)?;
        let hits = self.vectors.search(&query_vector, limit, Some(MemoryKind::Entity))?;

        let ids: Vec<String> = hits.iter().map(|h| h.record.memory_id.clone()).collect();
        let hydrated = self.store.with_connection(|conn| entities::get_entities_by_ids(conn, &ids))?;

        let mut results = Vec::with_capacity(ids.len());
        for id in &ids {
            let Some(entity) = hydrated.get(id) else {
                tracing::warn!(memory_id = %id, "orphaned entity vector skipped in knowledge search");
                continue;
            };
            if let Some(wanted) = entity_type {
                if entity.entity_type != wanted {
                    continue;
                }
            }
            self.store.with_connection(|conn| entities::touch_entity(conn, id))?;
            results.push(entity.clone());
            if results.len() >= limit {
                break;
            }
        }
        Ok(results)
    }
}

/// Text embedded for an entity's vector: `name ∪ summary ∪ observations`
/// joined by spaces.
pub fn entity_embedding_text(entity: &Entity) -> String {
    let mut parts = vec![entity.name.clone()];
    if let Some(summary) = &entity.summary {
        parts.push(summary.clone());
    }
    parts.extend(entity.observations.iter().cloned());
    parts.join(" ")
}

/// `"<name> (<entity_type>)\n<summary?>\n- obs1\n- obs2\n..."` — the
/// content string the retrieval engine renders for an entity hit.
pub fn entity_display_content(entity: &Entity) -> String {
    let mut lines = vec![format!("{} ({})", entity.name, entity.entity_type)];
    if let Some(summary) = &entity.summary {
        lines.push(summary.clone());
    }
    for obs in &entity.observations {
        lines.push(format!("- {}", obs));
    }
    lines.join("\n")
}
