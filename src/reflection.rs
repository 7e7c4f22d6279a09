//! Threshold-gated insight synthesis over unreflected events.
//!
//! Gated by availability of the language-model provider: if absent, every
//! public method returns empty and `enabled()` is false.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashSet;

use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::ids::new_id;
use crate::llm::LanguageModelProvider;
use crate::storage::connection::RelationalStore;
use crate::storage::{reflections, state};
use crate::types::{MemoryKind, Reflection};
use crate::vector::VectorStore;

const UNREFLECTED_LIMIT: usize = 500;
const MAX_QUESTIONS: usize = 3;
const EVENTS_FOR_QUESTIONS: usize = 50;
const EVENTS_FOR_INSIGHT: usize = 30;
const REFLECTION_IMPORTANCE: f32 = 0.7;

pub struct ReflectionEngine {
    store: Arc<RelationalStore>,
    vectors: Arc<VectorStore>,
    embeddings: Arc<EmbeddingProvider>,
    llm: Option<Arc<dyn LanguageModelProvider>>,
    threshold: f32,
    in_flight: DashSet<String>,
}

impl ReflectionEngine {
    pub fn new(
        store: Arc<RelationalStore>,
        vectors: Arc<VectorStore>,
        embeddings: Arc<EmbeddingProvider>,
        llm: Option<Arc<dyn LanguageModelProvider>>,
        threshold: f32,
    ) -> Self {
        Self {
            store,
            vectors,
            embeddings,
            llm,
            threshold,
            in_flight: DashSet::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.llm.is_some()
    }

    pub fn should_reflect(&self, agent_id: &str) -> Result<bool> {
        if !self.enabled() {
            return Ok(false);
        }
        let cumulative = self.cumulative_importance(agent_id)?;
        Ok(cumulative >= self.threshold)
    }

    fn cumulative_importance(&self, agent_id: &str) -> Result<f32> {
        let watermark = self.store.with_connection(|conn| state::get_last_reflected_at(conn, agent_id))?;
        let events = self.store.with_connection(|conn| {
            crate::storage::events::get_unreflected_events(conn, agent_id, &watermark, UNREFLECTED_LIMIT)
        })?;
        Ok(events.iter().map(|e| e.importance * 10.0).sum())
    }

    /// Run one reflection cycle for `agent_id`. A concurrent call for the
    /// same agent while one is already in flight returns an empty list
    /// immediately rather than waiting or erroring.
    pub fn reflect(&self, agent_id: &str, force: bool) -> Result<Vec<Reflection>> {
        if !self.enabled() {
            return Ok(Vec::new());
        }
        if !self.in_flight.insert(agent_id.to_string()) {
            tracing::debug!(agent_id, "reflection already in flight for this agent; returning empty");
            return Ok(Vec::new());
        }
        let result = self.reflect_inner(agent_id, force);
        self.in_flight.remove(agent_id);
        result
    }

    fn reflect_inner(&self, agent_id: &str, force: bool) -> Result<Vec<Reflection>> {
        let llm = self.llm.as_ref().expect("enabled() checked by caller");

        let watermark = self.store.with_connection(|conn| state::get_last_reflected_at(conn, agent_id))?;
        let unreflected = self.store.with_connection(|conn| {
            crate::storage::events::get_unreflected_events(conn, agent_id, &watermark, UNREFLECTED_LIMIT)
        })?;

        let cumulative: f32 = unreflected.iter().map(|e| e.importance * 10.0).sum();
        if !force && cumulative < self.threshold {
            return Ok(Vec::new());
        }
        if unreflected.is_empty() {
            return Ok(Vec::new());
        }

        let question_window: Vec<&str> = unreflected
            .iter()
            .take(EVENTS_FOR_QUESTIONS)
            .map(|e| e.content.as_str())
            .collect();
        let insight_window: Vec<&str> = unreflected
            .iter()
            .take(EVENTS_FOR_INSIGHT)
            .map(|e| e.content.as_str())
            .collect();
        let all_source_ids: Vec<String> = unreflected.iter().map(|e| e.id.clone()).collect();

        let questions_prompt = format!(
            "Given these recent events, propose up to {} salient questions worth reflecting on, \
             one per line:\n\n{}",
            MAX_QUESTIONS,
            question_window.join("\n")
        );
        let questions_text = llm.complete(&questions_prompt).unwrap_or_default();
        let questions: Vec<String> = questions_text
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .take(MAX_QUESTIONS)
            .collect();

        let mut produced = Vec::new();
        for question in &questions {
            let insight_prompt = format!(
                "Write a single-paragraph insight answering: \"{}\"\n\nGrounded in these events:\n{}",
                question,
                insight_window.join("\n")
            );
            let insight = llm.complete(&insight_prompt).unwrap_or_default();
            let insight = insight.trim();
            if insight.is_empty() {
                continue;
            }

            let reflection = Reflection {
                id: new_id(),
                content: insight.to_string(),
                source_ids: all_source_ids.clone(),
                importance: REFLECTION_IMPORTANCE,
                depth: 1,
                created_at: Utc::now(),
                accessed_at: None,
                access_count: 0,
            };

            // Embed before inserting the row: an embed failure skips this
            // insight entirely rather than leaving an orphan row.
            match self.embeddings.embed(&reflection.content) {
                Ok(vector) => {
                    self.store.with_connection(|conn| reflections::insert_reflection(conn, &reflection))?;
                    self.vectors.add(
                        &reflection.id,
                        MemoryKind::Reflection,
                        &vector,
                        &reflection.content,
                        &reflection.created_at.to_rfc3339(),
                    )?;
                    produced.push(reflection);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to embed reflection insight; skipping it entirely");
                }
            }
        }

        let now = Utc::now();
        self.store.with_connection(|conn| state::set_last_reflected_at(conn, agent_id, now))?;
        self.store.with_connection(|conn| state::set_last_reflection_at(conn, now))?;

        Ok(produced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::test_support::EchoProvider;
    use crate::storage::events::insert_event;
    use crate::types::{Event, EventType};
    use std::collections::HashMap as Map;

    fn sample_event(id: &str, agent: &str, importance: f32) -> Event {
        Event {
            id: id.to_string(),
            agent_id: agent.to_string(),
            event_type: EventType::Observation,
            content: format!("event {}", id),
            importance,
            entities: vec![],
            metadata: Map::new(),
            created_at: Utc::now(),
            accessed_at: None,
            access_count: 0,
        }
    }

    fn engine(llm: Option<Arc<dyn LanguageModelProvider>>) -> (ReflectionEngine, Arc<RelationalStore>, Arc<VectorStore>) {
        let store = Arc::new(RelationalStore::open_in_memory().unwrap());
        let dir = std::env::temp_dir().join(format!("agentmem-reflection-{}", new_id()));
        let vectors = Arc::new(VectorStore::new(&dir, 16));
        let embeddings = Arc::new(EmbeddingProvider::hashing(16));
        let engine = ReflectionEngine::new(store.clone(), vectors.clone(), embeddings, llm, 150.0);
        (engine, store, vectors)
    }

    #[test]
    fn disabled_without_llm_returns_empty() {
        let (engine, store, _vectors) = engine(None);
        for i in 0..30 {
            let e = sample_event(&format!("01DISABLED{:016}", i), "a", 0.9);
            store.with_connection(|conn| insert_event(conn, &e)).unwrap();
        }
        assert!(!engine.enabled());
        assert!(!engine.should_reflect("a").unwrap());
        assert!(engine.reflect("a", true).unwrap().is_empty());
    }

    #[test]
    fn threshold_gates_reflection_until_forced() {
        let (engine, store, _vectors) = engine(Some(Arc::new(EchoProvider)));
        for i in 0..5 {
            let e = sample_event(&format!("01THRESHOLD{:015}", i), "a", 0.5);
            store.with_connection(|conn| insert_event(conn, &e)).unwrap();
        }
        assert!(!engine.should_reflect("a").unwrap());
        let forced = engine.reflect("a", true).unwrap();
        assert!(!forced.is_empty());
    }

    #[test]
    fn source_ids_include_all_unreflected_events_beyond_fifty() {
        let (engine, store, _vectors) = engine(Some(Arc::new(EchoProvider)));
        for i in 0..60 {
            let e = sample_event(&format!("01SIXTY{:018}", i), "a", 0.5);
            store.with_connection(|conn| insert_event(conn, &e)).unwrap();
        }
        let produced = engine.reflect("a", true).unwrap();
        assert!(!produced.is_empty());
        for r in &produced {
            assert_eq!(r.source_ids.len(), 60);
        }
    }

    #[test]
    fn watermark_advances_after_reflect() {
        let (engine, store, _vectors) = engine(Some(Arc::new(EchoProvider)));
        for i in 0..5 {
            let e = sample_event(&format!("01WATERMARK{:014}", i), "a", 0.9);
            store.with_connection(|conn| insert_event(conn, &e)).unwrap();
        }
        engine.reflect("a", true).unwrap();
        let watermark = store.with_connection(|conn| state::get_last_reflected_at(conn, "a")).unwrap();

        let remaining = store
            .with_connection(|conn| crate::storage::events::get_unreflected_events(conn, "a", &watermark, 500))
            .unwrap();
        assert!(remaining.is_empty());
    }

    #[test]
    fn reflect_advances_global_watermark_alongside_per_agent_one() {
        let (engine, store, _vectors) = engine(Some(Arc::new(EchoProvider)));
        for i in 0..5 {
            let e = sample_event(&format!("01GLOBALWM{:016}", i), "a", 0.9);
            store.with_connection(|conn| insert_event(conn, &e)).unwrap();
        }
        assert!(store.with_connection(|conn| state::get_last_reflection_at(conn)).unwrap().is_none());

        engine.reflect("a", true).unwrap();

        assert!(store.with_connection(|conn| state::get_last_reflection_at(conn)).unwrap().is_some());
    }

    #[test]
    fn concurrent_reflect_for_same_agent_returns_empty_immediately() {
        let (engine, store, _vectors) = engine(Some(Arc::new(EchoProvider)));
        for i in 0..5 {
            let e = sample_event(&format!("01CONCURRENT{:013}", i), "a", 0.9);
            store.with_connection(|conn| insert_event(conn, &e)).unwrap();
        }
        engine.in_flight.insert("a".to_string());
        let result = engine.reflect("a", true).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn embedding_failure_yields_zero_reflections_and_no_vectors() {
        let store = Arc::new(RelationalStore::open_in_memory().unwrap());
        let dir = std::env::temp_dir().join(format!("agentmem-reflection-fail-{}", new_id()));
        let vectors = Arc::new(VectorStore::new(&dir, 16));
        let embeddings = Arc::new(EmbeddingProvider::with_factory(16, || {
            Err(crate::error::EngineError::Embedding("boom".to_string()))
        }));
        let engine = ReflectionEngine::new(
            store.clone(),
            vectors.clone(),
            embeddings,
            Some(Arc::new(EchoProvider)),
            150.0,
        );
        for i in 0..5 {
            let e = sample_event(&format!("01EMBEDFAIL{:014}", i), "a", 0.9);
            store.with_connection(|conn| insert_event(conn, &e)).unwrap();
        }
        let produced = engine.reflect("a", true).unwrap();
        assert!(produced.is_empty());
        assert_eq!(vectors.count(), 0);
    }
}
