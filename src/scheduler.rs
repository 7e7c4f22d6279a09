//! Background scheduler: timed invocation of reflection and consolidation.
//!
//! Single-threaded cooperative model from the engine's point of view; the
//! two timers are realized as independent `tokio` tasks that interleave
//! with foreground request handling at suspension points. Errors from
//! either cycle are logged and swallowed — the scheduler never lets a
//! failure kill the process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::consolidation::ConsolidationEngine;
use crate::reflection::ReflectionEngine;

const REFLECTION_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_AGENT: &str = "default";

pub struct BackgroundScheduler {
    reflection: Arc<ReflectionEngine>,
    consolidation: Arc<ConsolidationEngine>,
    consolidation_interval: Duration,
    reflection_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    consolidation_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    is_running: AtomicBool,
}

impl BackgroundScheduler {
    pub fn new(
        reflection: Arc<ReflectionEngine>,
        consolidation: Arc<ConsolidationEngine>,
        consolidation_interval_ms: u64,
    ) -> Self {
        Self {
            reflection,
            consolidation,
            consolidation_interval: Duration::from_millis(consolidation_interval_ms),
            reflection_handle: std::sync::Mutex::new(None),
            consolidation_handle: std::sync::Mutex::new(None),
            is_running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Idempotent: calling `start()` twice does not spawn duplicate timers.
    pub fn start(&self) {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut reflection_slot = self.reflection_handle.lock().unwrap();
        if reflection_slot.is_none() {
            let reflection = self.reflection.clone();
            *reflection_slot = Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(REFLECTION_CHECK_INTERVAL);
                loop {
                    ticker.tick().await;
                    run_reflection_tick(&reflection);
                }
            }));
        }
        drop(reflection_slot);

        let mut consolidation_slot = self.consolidation_handle.lock().unwrap();
        if consolidation_slot.is_none() {
            let consolidation = self.consolidation.clone();
            let interval = self.consolidation_interval;
            *consolidation_slot = Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    run_consolidation_tick(&consolidation);
                }
            }));
        }
    }

    /// Clears both timers and flips `is_running` false. Safe to call before
    /// `start()`.
    pub fn stop(&self) {
        if let Some(handle) = self.reflection_handle.lock().unwrap().take() {
            handle.abort();
        }
        if let Some(handle) = self.consolidation_handle.lock().unwrap().take() {
            handle.abort();
        }
        self.is_running.store(false, Ordering::SeqCst);
    }
}

fn run_reflection_tick(reflection: &ReflectionEngine) {
    match reflection.should_reflect(DEFAULT_AGENT) {
        Ok(true) => match reflection.reflect(DEFAULT_AGENT, false) {
            Ok(produced) => {
                tracing::info!(count = produced.len(), "reflection cycle completed");
            }
            Err(e) => {
                tracing::warn!(error = %e, "reflection cycle failed; swallowing");
            }
        },
        Ok(false) => {}
        Err(e) => {
            tracing::warn!(error = %e, "should_reflect check failed; swallowing");
        }
    }
}

fn run_consolidation_tick(consolidation: &ConsolidationEngine) {
    match consolidation.consolidate(None) {
        Ok(result) => {
            tracing::info!(
                entities_updated = result.entities_updated,
                observations_pruned = result.observations_pruned,
                summaries_refreshed = result.summaries_refreshed,
                "consolidation cycle completed"
            );
        }
        Err(e) => {
            tracing::warn!(error = %e, "consolidation cycle failed; swallowing");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingProvider;
    use crate::storage::connection::RelationalStore;
    use crate::vector::VectorStore;

    fn scheduler() -> BackgroundScheduler {
        let store = Arc::new(RelationalStore::open_in_memory().unwrap());
        let dir = std::env::temp_dir().join(format!("agentmem-scheduler-{}", crate::ids::new_id()));
        let vectors = Arc::new(VectorStore::new(&dir, 8));
        let embeddings = Arc::new(EmbeddingProvider::hashing(8));
        let reflection = Arc::new(ReflectionEngine::new(
            store.clone(),
            vectors.clone(),
            embeddings.clone(),
            None,
            150.0,
        ));
        let consolidation = Arc::new(ConsolidationEngine::new(store, vectors, embeddings, None));
        BackgroundScheduler::new(reflection, consolidation, 86_400_000)
    }

    #[tokio::test]
    async fn start_twice_does_not_duplicate_timers() {
        let scheduler = scheduler();
        scheduler.start();
        scheduler.start();
        assert!(scheduler.is_running());
        scheduler.stop();
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn stop_before_start_is_safe() {
        let scheduler = scheduler();
        scheduler.stop();
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn start_stop_start_stop_matches_single_cycle() {
        let scheduler = scheduler();
        scheduler.start();
        scheduler.start();
        scheduler.stop();
        scheduler.stop();
        assert!(!scheduler.is_running());
    }
}
