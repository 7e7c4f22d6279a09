//! Embedding generation.
//!
//! The embedding backend is an external collaborator at the engine
//! boundary: the engine only ever needs `text -> fixed-length vector`. This
//! module ships a deterministic local implementation (feature hashing, no
//! network call) behind the same [`Embedder`] trait a real provider would
//! implement, plus [`EmbeddingProvider`], the lazy-load/cached-failure
//! wrapper the concurrency model in the design notes calls for.

mod hashing;

pub use hashing::HashingEmbedder;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{EngineError, Result};

/// A pure `text -> fixed-length vector` function.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimensions(&self) -> usize;
}

type EmbedderFactory = dyn Fn() -> Result<Arc<dyn Embedder>> + Send + Sync;

/// Lazy single-load shared cell around an [`Embedder`].
///
/// The underlying embedder (a model load, in a real provider) is
/// constructed at most once. A failed load caches the failure so
/// subsequent calls fail fast with the same error instead of retrying the
/// expensive load on every request; [`EmbeddingProvider::reset`] clears the
/// cached failure so the next call retries.
pub struct EmbeddingProvider {
    dimensions: usize,
    factory: Box<EmbedderFactory>,
    cached: Mutex<Option<std::result::Result<Arc<dyn Embedder>, String>>>,
}

impl EmbeddingProvider {
    /// Construct a provider around the shipped deterministic embedder.
    pub fn hashing(dimensions: usize) -> Self {
        Self::with_factory(dimensions, move || {
            Ok(Arc::new(HashingEmbedder::new(dimensions)) as Arc<dyn Embedder>)
        })
    }

    /// Construct a provider around an arbitrary lazily-constructed embedder,
    /// e.g. a real network-backed provider plugged in at the call site.
    pub fn with_factory<F>(dimensions: usize, factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn Embedder>> + Send + Sync + 'static,
    {
        Self {
            dimensions,
            factory: Box::new(factory),
            cached: Mutex::new(None),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.load()?.embed(text)
    }

    pub fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.load()?.embed_batch(texts)
    }

    /// Clear a cached load failure so the next call retries the factory.
    pub fn reset(&self) {
        *self.cached.lock() = None;
    }

    fn load(&self) -> Result<Arc<dyn Embedder>> {
        let mut slot = self.cached.lock();
        if let Some(cached) = slot.as_ref() {
            return cached.clone().map_err(EngineError::Embedding);
        }
        let result = (self.factory)();
        *slot = Some(
            result
                .as_ref()
                .map(Arc::clone)
                .map_err(|e| e.to_string()),
        );
        result
    }
}
