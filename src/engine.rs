//! The engine: wires the relational store, vector store, embedding
//! provider, and optional language-model provider into the eight
//! components described by the design, plus the repair utility.

use std::sync::Arc;

use crate::config::Config;
use crate::consolidation::ConsolidationEngine;
use crate::embedding::EmbeddingProvider;
use crate::episodic::EpisodicMemory;
use crate::error::Result;
use crate::llm::LanguageModelProvider;
use crate::reflection::ReflectionEngine;
use crate::repair::RepairUtility;
use crate::retrieval::RetrievalEngine;
use crate::scheduler::BackgroundScheduler;
use crate::semantic::SemanticMemory;
use crate::storage::connection::RelationalStore;
use crate::storage::stats::{get_stats, StoreStats};
use crate::vector::VectorStore;

/// Top-level handle to the memory engine. Cheap to clone: every field is
/// either an `Arc` or cheap to copy, so callers (the protocol dispatch
/// shim, the CLI, the scheduler's spawned tasks) can hold independent
/// handles to the same underlying stores.
pub struct Engine {
    pub config: Config,
    store: Arc<RelationalStore>,
    vectors: Arc<VectorStore>,
    embeddings: Arc<EmbeddingProvider>,
    llm: Option<Arc<dyn LanguageModelProvider>>,
    pub episodic: EpisodicMemory,
    pub semantic: SemanticMemory,
    pub retrieval: RetrievalEngine,
    pub reflection: Arc<ReflectionEngine>,
    pub consolidation: Arc<ConsolidationEngine>,
    pub scheduler: BackgroundScheduler,
    repair: RepairUtility,
}

impl Engine {
    /// Open (or create) the on-disk stores under `config.data_dir`.
    pub fn open(config: Config) -> Result<Self> {
        let store = Arc::new(RelationalStore::open(&config.db_path())?);
        let vectors = Arc::new(VectorStore::new(&config.vector_dir(), config.embedding_dimensions));
        Self::build(config, store, vectors, None)
    }

    /// Open in-memory stores, for tests and short-lived processes.
    pub fn open_in_memory(config: Config) -> Result<Self> {
        let store = Arc::new(RelationalStore::open_in_memory()?);
        let dir = std::env::temp_dir().join(format!("agentmem-inmem-{}", crate::ids::new_id()));
        let vectors = Arc::new(VectorStore::new(&dir, config.embedding_dimensions));
        Self::build(config, store, vectors, None)
    }

    /// Attach a language-model provider, enabling importance scoring,
    /// reflection, and consolidation summary refresh. Absent a call to
    /// this, the engine runs with reflection `enabled() == false`.
    pub fn with_language_model(mut self, llm: Arc<dyn LanguageModelProvider>) -> Self {
        self.llm = Some(llm.clone());
        self.episodic = EpisodicMemory::new(
            self.store.clone(),
            self.vectors.clone(),
            self.embeddings.clone(),
            Some(llm.clone()),
        );
        self.reflection = Arc::new(ReflectionEngine::new(
            self.store.clone(),
            self.vectors.clone(),
            self.embeddings.clone(),
            Some(llm.clone()),
            self.config.reflection_threshold,
        ));
        self.consolidation = Arc::new(ConsolidationEngine::new(
            self.store.clone(),
            self.vectors.clone(),
            self.embeddings.clone(),
            Some(llm),
        ));
        self.scheduler = BackgroundScheduler::new(
            self.reflection.clone(),
            self.consolidation.clone(),
            self.config.consolidation_interval_ms,
        );
        self
    }

    fn build(config: Config, store: Arc<RelationalStore>, vectors: Arc<VectorStore>, llm: Option<Arc<dyn LanguageModelProvider>>) -> Result<Self> {
        let embeddings = Arc::new(EmbeddingProvider::hashing(config.embedding_dimensions));

        let episodic = EpisodicMemory::new(store.clone(), vectors.clone(), embeddings.clone(), llm.clone());
        let semantic = SemanticMemory::new(store.clone(), vectors.clone(), embeddings.clone());
        let retrieval = RetrievalEngine::new(store.clone(), vectors.clone(), embeddings.clone(), &config);
        let reflection = Arc::new(ReflectionEngine::new(
            store.clone(),
            vectors.clone(),
            embeddings.clone(),
            llm.clone(),
            config.reflection_threshold,
        ));
        let consolidation = Arc::new(ConsolidationEngine::new(
            store.clone(),
            vectors.clone(),
            embeddings.clone(),
            llm.clone(),
        ));
        let scheduler = BackgroundScheduler::new(reflection.clone(), consolidation.clone(), config.consolidation_interval_ms);
        let repair = RepairUtility::new(store.clone(), vectors.clone(), embeddings.clone());

        Ok(Self {
            config,
            store,
            vectors,
            embeddings,
            llm,
            episodic,
            semantic,
            retrieval,
            reflection,
            consolidation,
            scheduler,
            repair,
        })
    }

    pub fn repair(&self) -> Result<crate::types::RepairReport> {
        self.repair.repair()
    }

    pub fn stats(&self) -> Result<StoreStats> {
        self.store.with_connection(get_stats)
    }

    pub fn vector_count(&self) -> usize {
        self.vectors.count()
    }

    pub fn llm_available(&self) -> bool {
        self.llm.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_in_memory_and_reports_empty_stats() {
        let engine = Engine::open_in_memory(Config::default()).unwrap();
        let stats = engine.stats().unwrap();
        assert_eq!(stats.event_count, 0);
        assert!(!engine.llm_available());
        assert!(!engine.reflection.enabled());
    }

    #[test]
    fn with_language_model_enables_reflection() {
        let engine = Engine::open_in_memory(Config::default())
            .unwrap()
            .with_language_model(Arc::new(crate::llm::test_support::EchoProvider));
        assert!(engine.llm_available());
        assert!(engine.reflection.enabled());
    }
}
