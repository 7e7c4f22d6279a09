//! A dual-store memory engine for AI agents: an immutable episodic event
//! log and a bi-temporal knowledge graph, fused with vector retrieval.

pub mod config;
pub mod consolidation;
pub mod embedding;
pub mod engine;
pub mod episodic;
pub mod error;
pub mod ids;
pub mod llm;
pub mod reflection;
pub mod repair;
pub mod retrieval;
pub mod scheduler;
pub mod semantic;
pub mod storage;
pub mod tools;
pub mod types;
pub mod vector;

pub use engine::Engine;
pub use error::{EngineError, Result};
pub use types::*;

/// Crate version, exposed for the status surface.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
