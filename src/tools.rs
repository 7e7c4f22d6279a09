//! Thin dispatch shim: one function per tool, each wrapping a single engine
//! operation and rendering its result as XML-tagged text.
//!
//! This is the boundary an external protocol server sits behind; it is not
//! itself a server. Every string pulled from a memory row is XML-escaped
//! before being interpolated into a response.

use crate::engine::Engine;
use crate::error::Result;
use crate::retrieval::RecallOptions;
use crate::types::{
    BlockType, CoreMemoryOp, CreateEventInput, EntityType, EventSearchOptions, EventType,
    UpsertEntityInput,
};

/// Escape the five XML-significant characters. Order matters: `&` must be
/// escaped first or the escapes of the other four characters would
/// themselves be re-escaped.
pub fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn tag(name: &str, body: impl AsRef<str>) -> String {
    format!("<{name}>{}</{name}>", body.as_ref())
}

pub fn record_event(engine: &Engine, input: CreateEventInput) -> Result<String> {
    let event = engine.episodic.record_event(input)?;
    Ok(tag(
        "event",
        format!(
            "<id>{}</id><content>{}</content><importance>{}</importance>",
            xml_escape(&event.id),
            xml_escape(&event.content),
            event.importance
        ),
    ))
}

pub fn search_events(engine: &Engine, query: &str, opts: EventSearchOptions) -> Result<String> {
    let events = engine.episodic.search(query, opts)?;
    let body: String = events
        .iter()
        .map(|e| {
            tag(
                "event",
                format!(
                    "<id>{}</id><content>{}</content>",
                    xml_escape(&e.id),
                    xml_escape(&e.content)
                ),
            )
        })
        .collect();
    Ok(tag("events", body))
}

pub fn get_timeline(
    engine: &Engine,
    agent_id: &str,
    event_type: Option<EventType>,
    limit: Option<usize>,
) -> Result<String> {
    let events = engine.episodic.timeline(agent_id, event_type, limit)?;
    let body: String = events
        .iter()
        .map(|e| {
            tag(
                "event",
                format!(
                    "<id>{}</id><content>{}</content><created_at>{}</created_at>",
                    xml_escape(&e.id),
                    xml_escape(&e.content),
                    e.created_at.to_rfc3339()
                ),
            )
        })
        .collect();
    Ok(tag("timeline", body))
}

pub fn get_event(engine: &Engine, id: &str) -> Result<String> {
    match engine.episodic.get_event(id)? {
        Some(e) => Ok(tag(
            "event",
            format!("<id>{}</id><content>{}</content>", xml_escape(&e.id), xml_escape(&e.content)),
        )),
        None => Ok("<not_found/>".to_string()),
    }
}

pub fn update_core_memory(
    engine: &Engine,
    block_type: BlockType,
    block_key: &str,
    op: CoreMemoryOp,
    content: &str,
) -> Result<String> {
    let block = engine.semantic.update_core_memory(block_type, block_key, op, content)?;
    Ok(tag(
        "core_memory_block",
        format!("<key>{}</key><content>{}</content>", xml_escape(&block.block_key), xml_escape(&block.content)),
    ))
}

/// `store_learning` is the tool-surface alias for upserting an entity with
/// observations; it maps onto the same semantic-memory operation as
/// `update_entity`.
pub fn store_learning(engine: &Engine, input: UpsertEntityInput) -> Result<String> {
    update_entity(engine, input)
}

pub fn update_entity(engine: &Engine, input: UpsertEntityInput) -> Result<String> {
    let entity = engine.semantic.upsert_entity(input)?;
    Ok(tag(
        "entity",
        format!(
            "<id>{}</id><name>{}</name><entity_type>{}</entity_type>",
            xml_escape(&entity.id),
            xml_escape(&entity.name),
            entity.entity_type
        ),
    ))
}

pub fn create_relation(engine: &Engine, from_name: &str, to_name: &str, relation_type: &str) -> Result<String> {
    let relation = engine.semantic.create_relation(from_name, to_name, relation_type)?;
    Ok(tag(
        "relation",
        format!(
            "<id>{}</id><from>{}</from><to>{}</to><relation_type>{}</relation_type>",
            xml_escape(&relation.id),
            xml_escape(&relation.from_entity),
            xml_escape(&relation.to_entity),
            xml_escape(&relation.relation_type)
        ),
    ))
}

pub fn search_knowledge(engine: &Engine, query: &str, entity_type: Option<EntityType>, limit: usize) -> Result<String> {
    let entities = engine.semantic.search_knowledge(query, entity_type, limit)?;
    let body: String = entities
        .iter()
        .map(|e| {
            tag(
                "entity",
                format!("<id>{}</id><name>{}</name>", xml_escape(&e.id), xml_escape(&e.name)),
            )
        })
        .collect();
    Ok(tag("entities", body))
}

pub fn recall(engine: &Engine, query: &str, opts: RecallOptions) -> Result<String> {
    let result = engine.retrieval.recall(query, opts)?;
    let core: String = result
        .core_memory
        .iter()
        .map(|b| tag("block", format!("<key>{}</key><content>{}</content>", xml_escape(&b.block_key), xml_escape(&b.content))))
        .collect();
    let memories: String = result
        .memories
        .iter()
        .map(|m| {
            tag(
                "memory",
                format!(
                    "<id>{}</id><type>{}</type><content>{}</content><score>{}</score>",
                    xml_escape(&m.memory_id),
                    m.memory_type,
                    xml_escape(&m.content),
                    m.score
                ),
            )
        })
        .collect();
    Ok(format!(
        "<recall><core_memory>{core}</core_memory><memories>{memories}</memories><total_searched>{}</total_searched></recall>",
        result.total_searched
    ))
}

pub fn reflect(engine: &Engine, agent_id: &str, force: bool) -> Result<String> {
    let produced = engine.reflection.reflect(agent_id, force)?;
    let body: String = produced
        .iter()
        .map(|r| tag("insight", format!("<id>{}</id><content>{}</content>", xml_escape(&r.id), xml_escape(&r.content))))
        .collect();
    Ok(tag("reflections", body))
}

pub fn consolidate(engine: &Engine, max_age_days: Option<u32>) -> Result<String> {
    let result = engine.consolidation.consolidate(max_age_days)?;
    Ok(tag(
        "consolidation",
        format!(
            "<entities_updated>{}</entities_updated><observations_pruned>{}</observations_pruned><summaries_refreshed>{}</summaries_refreshed>",
            result.entities_updated, result.observations_pruned, result.summaries_refreshed
        ),
    ))
}

pub fn memory_status(engine: &Engine) -> Result<String> {
    let stats = engine.stats()?;
    Ok(tag(
        "status",
        format!(
            "<event_count>{}</event_count><entity_count>{}</entity_count><relation_count>{}</relation_count><reflection_count>{}</reflection_count><vector_count>{}</vector_count>",
            stats.event_count, stats.entity_count, stats.relation_count, stats.reflection_count, engine.vector_count()
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::collections::HashMap;

    fn engine() -> Engine {
        Engine::open_in_memory(Config::default()).unwrap()
    }

    #[test]
    fn xml_escape_order_avoids_double_escaping_ampersand() {
        assert_eq!(xml_escape("a & b < c > d \"e\" 'f'"), "a &amp; b &lt; c &gt; d &quot;e&quot; &apos;f&apos;");
    }

    #[test]
    fn record_event_escapes_user_content_into_xml() {
        let engine = engine();
        let input = CreateEventInput {
            agent_id: "a".to_string(),
            event_type: EventType::Observation,
            content: "<script>alert('x')</script>".to_string(),
            importance: Some(0.5),
            entities: vec![],
            metadata: HashMap::new(),
        };
        let xml = record_event(&engine, input).unwrap();
        assert!(!xml.contains("<script>"));
        assert!(xml.contains("&lt;script&gt;"));
    }

    #[test]
    fn get_event_reports_not_found_for_missing_id() {
        let engine = engine();
        let xml = get_event(&engine, "01MISSINGMISSINGMISSINGMI").unwrap();
        assert_eq!(xml, "<not_found/>");
    }

    #[test]
    fn memory_status_reports_zero_counts_for_empty_engine() {
        let engine = engine();
        let xml = memory_status(&engine).unwrap();
        assert!(xml.contains("<event_count>0</event_count>"));
    }
}
