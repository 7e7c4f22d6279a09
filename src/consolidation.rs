//! Periodic pruning of entity observation lists and refresh of summaries.

use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::llm::LanguageModelProvider;
use crate::semantic::entity_embedding_text;
use crate::storage::connection::RelationalStore;
use crate::storage::{entities, relations, state};
use crate::types::{ConsolidationResult, Entity, MemoryKind};
use crate::vector::VectorStore;

const MAX_OBSERVATIONS: usize = 20;
const OBSERVATIONS_FOR_SUMMARY: usize = 15;
const RELATIONS_FOR_SUMMARY: usize = 10;
const STALE_AFTER_DAYS: i64 = 7;

pub struct ConsolidationEngine {
    store: Arc<RelationalStore>,
    vectors: Arc<VectorStore>,
    embeddings: Arc<EmbeddingProvider>,
    llm: Option<Arc<dyn LanguageModelProvider>>,
}

impl ConsolidationEngine {
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

    /// `max_age_days` is accepted for forward schema compatibility but is
    /// currently a no-op: the design notes leave open whether age-based
    /// pruning should delete old events, drop old observations, or
    /// downweight them, and that product decision hasn't been made. See
    /// DESIGN.md.
    pub fn consolidate(&self, _max_age_days: Option<u32>) -> Result<ConsolidationResult> {
        let mut result = ConsolidationResult::default();
        let all_entities = self.store.with_connection(entities::list_all_entities)?;

        for entity in all_entities {
            if let Some(updated) = self.consolidate_one(&entity, &mut result)? {
                self.refresh_vector(&updated)?;
            }
        }

        self.store.with_connection(|conn| state::set_last_consolidation_at(conn, Utc::now()))?;
        Ok(result)
    }

    /// Returns `Some(updated_entity)` if anything changed (so the caller
    /// can refresh its vector), `None` otherwise.
    fn consolidate_one(&self, entity: &Entity, result: &mut ConsolidationResult) -> Result<Option<Entity>> {
        let mut observations = entity.observations.clone();
        let mut observations_changed = false;

        if observations.len() > MAX_OBSERVATIONS {
            let pruned = observations.len() - MAX_OBSERVATIONS;
            observations = observations.split_off(pruned);
            result.observations_pruned += pruned;
            observations_changed = true;
        }

        let is_stale = Utc::now() - entity.updated_at > Duration::days(STALE_AFTER_DAYS);
        let mut summary = entity.summary.clone();

        if let Some(llm) = &self.llm {
            if observations_changed || summary.is_none() || is_stale {
                if let Some(new_summary) = self.refresh_summary(llm.as_ref(), entity, &observations)? {
                    summary = Some(new_summary);
                    result.summaries_refreshed += 1;
                }
            }
        }

        let changed = observations_changed || summary != entity.summary;
        if !changed {
            return Ok(None);
        }

        self.store.with_connection(|conn| {
            entities::update_entity_after_consolidation(conn, &entity.id, &observations, summary.as_deref())
        })?;
        result.entities_updated += 1;

        Ok(Some(Entity {
            observations,
            summary,
            updated_at: Utc::now(),
            ..entity.clone()
        }))
    }

    fn refresh_summary(&self, llm: &dyn LanguageModelProvider, entity: &Entity, observations: &[String]) -> Result<Option<String>> {
        let recent_observations: Vec<&str> = observations
            .iter()
            .rev()
            .take(OBSERVATIONS_FOR_SUMMARY)
            .map(|s| s.as_str())
            .collect();
        let related = self.store.with_connection(|conn| relations::get_relations(conn, &entity.id, true))?;
        let related_desc: Vec<String> = related
            .iter()
            .take(RELATIONS_FOR_SUMMARY)
            .map(|r| format!("{} -{}-> {}", r.from_entity, r.relation_type, r.to_entity))
            .collect();

        let prompt = format!(
            "Write a 1-2 sentence summary of {} given these observations:\n{}\n\nand relations:\n{}",
            entity.name,
            recent_observations.join("\n"),
            related_desc.join("\n")
        );
        match llm.complete(&prompt) {
            Ok(text) => {
                let text = text.trim();
                if text.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(text.to_string()))
                }
            }
            Err(e) => {
                tracing::warn!(entity_id = %entity.id, error = %e, "summary refresh failed; keeping existing summary");
                Ok(None)
            }
        }
    }

    fn refresh_vector(&self, entity: &Entity) -> Result<()> {
        let text = entity_embedding_text(entity);
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
                    tracing::warn!(entity_id = %entity.id, error = %e, "failed to store refreshed vector after consolidation");
                }
            }
            Err(e) => {
                tracing::warn!(entity_id = %entity.id, error = %e, "failed to re-embed entity after consolidation");
            }
        }
        Ok(())
    }
}
