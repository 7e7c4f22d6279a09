//! Process configuration, loaded once from the environment.

use std::path::PathBuf;

use crate::error::{EngineError, Result};

/// Fully validated engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub decay_rate: f32,
    pub reflection_threshold: f32,
    pub consolidation_interval_ms: u64,
    pub merge_similarity_threshold: f32,
    pub prune_age_days: u32,
    pub weight_recency: f32,
    pub weight_importance: f32,
    pub weight_relevance: f32,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub anthropic_api_key: Option<String>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            decay_rate: 0.995,
            reflection_threshold: 150.0,
            consolidation_interval_ms: 86_400_000,
            merge_similarity_threshold: 0.85,
            prune_age_days: 90,
            weight_recency: 0.4,
            weight_importance: 0.3,
            weight_relevance: 0.3,
            embedding_model: "Xenova/all-MiniLM-L6-v2".to_string(),
            embedding_dimensions: 384,
            anthropic_api_key: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the process environment, optionally loading a
    /// `.env` file first (existing environment variables take precedence).
    /// Validates eagerly: every violation is collected before reporting, not
    /// reported fail-fast on the first.
    pub fn from_env() -> Result<Self> {
        load_dotenv();
        let mut cfg = Config::default();
        let mut errors = Vec::new();

        if let Ok(v) = std::env::var("DATA_DIR") {
            if v.is_empty() || v.contains('\0') {
                errors.push("DATA_DIR must be a non-empty path with no null bytes".to_string());
            } else {
                cfg.data_dir = PathBuf::from(shellexpand::tilde(&v).to_string());
            }
        }

        parse_f32_env("DECAY_RATE", &mut cfg.decay_rate, &mut errors, |v| {
            v > 0.0 && v < 1.0
        });
        parse_f32_env(
            "REFLECTION_THRESHOLD",
            &mut cfg.reflection_threshold,
            &mut errors,
            |v| v >= 0.0,
        );
        parse_u64_env(
            "CONSOLIDATION_INTERVAL",
            &mut cfg.consolidation_interval_ms,
            &mut errors,
            |v| v > 0,
        );
        parse_f32_env(
            "MERGE_SIMILARITY_THRESHOLD",
            &mut cfg.merge_similarity_threshold,
            &mut errors,
            |v| (0.0..=1.0).contains(&v),
        );
        parse_u32_env("PRUNE_AGE_DAYS", &mut cfg.prune_age_days, &mut errors, |v| {
            v > 0
        });
        parse_f32_env("WEIGHT_RECENCY", &mut cfg.weight_recency, &mut errors, |v| {
            v >= 0.0
        });
        parse_f32_env(
            "WEIGHT_IMPORTANCE",
            &mut cfg.weight_importance,
            &mut errors,
            |v| v >= 0.0,
        );
        parse_f32_env(
            "WEIGHT_RELEVANCE",
            &mut cfg.weight_relevance,
            &mut errors,
            |v| v >= 0.0,
        );

        if let Ok(v) = std::env::var("EMBEDDING_MODEL") {
            cfg.embedding_model = v;
        }
        parse_usize_env(
            "EMBEDDING_DIMENSIONS",
            &mut cfg.embedding_dimensions,
            &mut errors,
            |v| v > 0,
        );

        if let Ok(v) = std::env::var("ANTHROPIC_API_KEY") {
            if !v.is_empty() {
                cfg.anthropic_api_key = Some(v);
            }
        }

        if let Ok(v) = std::env::var("LOG_LEVEL") {
            if matches!(v.as_str(), "debug" | "info" | "warn" | "error") {
                cfg.log_level = v;
            } else {
                errors.push(format!(
                    "LOG_LEVEL must be one of debug|info|warn|error, got '{}'",
                    v
                ));
            }
        }

        let weight_sum = cfg.weight_recency + cfg.weight_importance + cfg.weight_relevance;
        if (weight_sum - 1.0).abs() > 0.01 {
            tracing::warn!(
                weight_sum,
                "recall score weights do not sum to 1.0; using as configured, not normalizing"
            );
        }

        if !errors.is_empty() {
            return Err(EngineError::Configuration(errors.join("\n")));
        }

        Ok(cfg)
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("memory.db")
    }

    pub fn vector_dir(&self) -> PathBuf {
        self.data_dir.join("lancedb")
    }
}

fn parse_f32_env(
    key: &str,
    slot: &mut f32,
    errors: &mut Vec<String>,
    valid: impl Fn(f32) -> bool,
) {
    if let Ok(raw) = std::env::var(key) {
        match raw.parse::<f32>() {
            Ok(v) if valid(v) => *slot = v,
            Ok(v) => errors.push(format!("{} has an out-of-range value: {}", key, v)),
            Err(_) => errors.push(format!("{} is not a valid number: '{}'", key, raw)),
        }
    }
}

fn parse_u32_env(key: &str, slot: &mut u32, errors: &mut Vec<String>, valid: impl Fn(u32) -> bool) {
    if let Ok(raw) = std::env::var(key) {
        match raw.parse::<u32>() {
            Ok(v) if valid(v) => *slot = v,
            Ok(v) => errors.push(format!("{} has an out-of-range value: {}", key, v)),
            Err(_) => errors.push(format!("{} is not a valid integer: '{}'", key, raw)),
        }
    }
}

fn parse_u64_env(key: &str, slot: &mut u64, errors: &mut Vec<String>, valid: impl Fn(u64) -> bool) {
    if let Ok(raw) = std::env::var(key) {
        match raw.parse::<u64>() {
            Ok(v) if valid(v) => *slot = v,
            Ok(v) => errors.push(format!("{} has an out-of-range value: {}", key, v)),
            Err(_) => errors.push(format!("{} is not a valid integer: '{}'", key, raw)),
        }
    }
}

fn parse_usize_env(
    key: &str,
    slot: &mut usize,
    errors: &mut Vec<String>,
    valid: impl Fn(usize) -> bool,
) {
    if let Ok(raw) = std::env::var(key) {
        match raw.parse::<usize>() {
            Ok(v) if valid(v) => *slot = v,
            Ok(v) => errors.push(format!("{} has an out-of-range value: {}", key, v)),
            Err(_) => errors.push(format!("{} is not a valid integer: '{}'", key, raw)),
        }
    }
}

/// Best-effort `.env` loader: for each `KEY=VALUE` line in `./.env`, sets the
/// process environment variable only if it is not already set, so real
/// environment variables always take precedence.
fn load_dotenv() {
    let Ok(contents) = std::fs::read_to_string(".env") else {
        return;
    };
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            if std::env::var(key).is_err() {
                std::env::set_var(key, value.trim());
            }
        }
    }
}
