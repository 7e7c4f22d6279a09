//! Core data types shared across the engine.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a memory row, mirrored in the vector store's `memory_type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Event,
    Entity,
    Reflection,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Event => "event",
            MemoryKind::Entity => "entity",
            MemoryKind::Reflection => "reflection",
        }
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MemoryKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "event" => Ok(MemoryKind::Event),
            "entity" => Ok(MemoryKind::Entity),
            "reflection" => Ok(MemoryKind::Reflection),
            other => Err(format!("unknown memory kind: {}", other)),
        }
    }
}

/// Kind of an event in the episodic log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Message,
    Email,
    Action,
    Decision,
    Observation,
    Communication,
    FileChange,
    Error,
    Milestone,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Message => "message",
            EventType::Email => "email",
            EventType::Action => "action",
            EventType::Decision => "decision",
            EventType::Observation => "observation",
            EventType::Communication => "communication",
            EventType::FileChange => "file_change",
            EventType::Error => "error",
            EventType::Milestone => "milestone",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "message" => Ok(EventType::Message),
            "email" => Ok(EventType::Email),
            "action" => Ok(EventType::Action),
            "decision" => Ok(EventType::Decision),
            "observation" => Ok(EventType::Observation),
            "communication" => Ok(EventType::Communication),
            "file_change" => Ok(EventType::FileChange),
            "error" => Ok(EventType::Error),
            "milestone" => Ok(EventType::Milestone),
            other => Err(format!("unknown event type: {}", other)),
        }
    }
}

/// Core memory block kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Persona,
    UserProfile,
}

impl BlockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Persona => "persona",
            BlockType::UserProfile => "user_profile",
        }
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BlockType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "persona" => Ok(BlockType::Persona),
            "user_profile" => Ok(BlockType::UserProfile),
            other => Err(format!("unknown block type: {}", other)),
        }
    }
}

/// How a core memory update should be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoreMemoryOp {
    Append,
    Replace,
    Remove,
}

/// Entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Person,
    Project,
    Concept,
    Preference,
    Tool,
    Organization,
    Location,
    Topic,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Person => "person",
            EntityType::Project => "project",
            EntityType::Concept => "concept",
            EntityType::Preference => "preference",
            EntityType::Tool => "tool",
            EntityType::Organization => "organization",
            EntityType::Location => "location",
            EntityType::Topic => "topic",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "person" => Ok(EntityType::Person),
            "project" => Ok(EntityType::Project),
            "concept" => Ok(EntityType::Concept),
            "preference" => Ok(EntityType::Preference),
            "tool" => Ok(EntityType::Tool),
            "organization" => Ok(EntityType::Organization),
            "location" => Ok(EntityType::Location),
            "topic" => Ok(EntityType::Topic),
            other => Err(format!("unknown entity type: {}", other)),
        }
    }
}

fn default_importance() -> f32 {
    0.5
}

fn default_access_count() -> i64 {
    0
}

/// An immutable row in the episodic event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub agent_id: String,
    pub event_type: EventType,
    pub content: String,
    #[serde(default = "default_importance")]
    pub importance: f32,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub accessed_at: Option<DateTime<Utc>>,
    #[serde(default = "default_access_count")]
    pub access_count: i64,
}

/// A mutable, named slot of persona/profile text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreMemoryBlock {
    pub id: String,
    pub block_type: BlockType,
    pub block_key: String,
    pub content: String,
    pub updated_at: DateTime<Utc>,
}

/// A mutable node in the knowledge graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    pub entity_type: EntityType,
    pub summary: Option<String>,
    #[serde(default)]
    pub observations: Vec<String>,
    #[serde(default = "default_importance")]
    pub importance: f32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub accessed_at: Option<DateTime<Utc>>,
    #[serde(default = "default_access_count")]
    pub access_count: i64,
}

/// A bi-temporal edge between two entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub id: String,
    pub from_entity: String,
    pub to_entity: String,
    pub relation_type: String,
    /// Always 1.0; no read path consumes this column. Preserved for schema
    /// compatibility only.
    pub weight: f32,
    pub valid_from: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// A synthesized insight grounded in a bounded window of events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reflection {
    pub id: String,
    pub content: String,
    pub source_ids: Vec<String>,
    pub importance: f32,
    pub depth: i32,
    pub created_at: DateTime<Utc>,
    pub accessed_at: Option<DateTime<Utc>>,
    #[serde(default = "default_access_count")]
    pub access_count: i64,
}

/// A scored result returned from the retrieval engine.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredMemory {
    pub memory_id: String,
    pub memory_type: MemoryKind,
    pub content: String,
    pub score: f32,
    pub recency: f32,
    pub importance: f32,
    pub relevance: f32,
}

/// Top-level response shape for unified recall.
#[derive(Debug, Clone, Serialize)]
pub struct RecallResult {
    pub core_memory: Vec<CoreMemoryBlock>,
    pub memories: Vec<ScoredMemory>,
    pub total_searched: usize,
}

/// Input for appending a new event.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateEventInput {
    pub agent_id: String,
    pub event_type: EventType,
    pub content: String,
    pub importance: Option<f32>,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Input for an entity upsert.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpsertEntityInput {
    pub name: String,
    pub entity_type: Option<EntityType>,
    pub summary: Option<String>,
    #[serde(default)]
    pub observations: Vec<String>,
    pub importance: Option<f32>,
}

/// Result of a consolidation pass.
#[derive(Debug, Clone, Serialize, Default)]
pub struct ConsolidationResult {
    pub entities_updated: usize,
    pub observations_pruned: usize,
    pub summaries_refreshed: usize,
}

/// Result of a repair pass reconciling the two stores.
#[derive(Debug, Clone, Serialize, Default)]
pub struct RepairReport {
    pub orphan_vectors_removed: usize,
    pub rows_reembedded: usize,
}

/// Filters accepted by the episodic search path.
#[derive(Debug, Clone, Default)]
pub struct EventSearchOptions {
    pub agent_id: Option<String>,
    pub event_type: Option<EventType>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub entities: Vec<String>,
    pub limit: usize,
}
