//! Dispatch loop over stdio for the tool surface in `agentmem::tools`.
//!
//! Frames requests as JSON-RPC, matching the single method this surface
//! needs (`tools/call`) against the thirteen registered tool names. The
//! response wraps the tool's XML string as one text content block, mirroring
//! the shape a richer tool-calling protocol would use without pulling in the
//! rest of that protocol's surface.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agentmem::config::Config;
use agentmem::engine::Engine;
use agentmem::error::{EngineError, Result};
use agentmem::retrieval::RecallOptions;
use agentmem::tools;
use agentmem::types::{
    BlockType, CoreMemoryOp, CreateEventInput, EntityType, EventSearchOptions, EventType,
    UpsertEntityInput,
};

#[derive(Parser, Debug)]
#[command(name = "agentmem-server")]
#[command(about = "Dispatch loop over stdio for the agent memory engine")]
struct Args {
    /// Directory holding the relational and vector stores.
    #[arg(long, env = "DATA_DIR", default_value = "./data")]
    data_dir: String,
}

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

impl JsonRpcResponse {
    fn success(id: Option<Value>, text: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(json!({ "content": [{ "type": "text", "text": text }] })),
            error: None,
        }
    }

    fn error(id: Option<Value>, code: i64, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError { code, message }),
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config = Config::from_env()?;
    config.data_dir = PathBuf::from(shellexpand::tilde(&args.data_dir).to_string());

    let engine = Engine::open(config)?;
    engine.scheduler.start();

    tracing::info!("agentmem dispatch loop starting on stdio");
    run(&engine)
}

fn run(engine: &Engine) -> Result<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut reader = stdin.lock();
    let mut writer = stdout.lock();
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let response = match serde_json::from_str::<JsonRpcRequest>(trimmed) {
                    Ok(request) => handle(engine, request),
                    Err(e) => JsonRpcResponse::error(None, -32700, format!("parse error: {e}")),
                };
                let body = serde_json::to_string(&response)?;
                writeln!(writer, "{body}")?;
                writer.flush()?;
            }
            Err(e) => {
                tracing::error!(error = %e, "error reading stdin");
                break;
            }
        }
    }
    Ok(())
}

fn handle(engine: &Engine, request: JsonRpcRequest) -> JsonRpcResponse {
    if request.method != "tools/call" {
        return JsonRpcResponse::error(
            request.id,
            -32601,
            format!("unknown method: {}", request.method),
        );
    }

    let name = request
        .params
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    let arguments = request
        .params
        .get("arguments")
        .cloned()
        .unwrap_or(Value::Null);

    match dispatch(engine, name, arguments) {
        Ok(text) => JsonRpcResponse::success(request.id, text),
        Err(e) => JsonRpcResponse::error(request.id, -32000, e.to_string()),
    }
}

fn dispatch(engine: &Engine, name: &str, arguments: Value) -> Result<String> {
    match name {
        "record_event" => {
            let input: CreateEventInput = serde_json::from_value(arguments)?;
            tools::record_event(engine, input)
        }
        "search_events" => {
            let query = arguments
                .get("query")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let opts = EventSearchOptions {
                agent_id: arguments
                    .get("agent_id")
                    .and_then(|v| v.as_str())
                    .map(String::from),
                event_type: arguments
                    .get("event_type")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse::<EventType>().ok()),
                start: arguments
                    .get("start")
                    .and_then(|v| v.as_str())
                    .map(String::from),
                end: arguments
                    .get("end")
                    .and_then(|v| v.as_str())
                    .map(String::from),
                entities: arguments
                    .get("entities")
                    .and_then(|v| v.as_array())
                    .map(|a| a.iter().filter_map(|x| x.as_str().map(String::from)).collect())
                    .unwrap_or_default(),
                limit: arguments
                    .get("limit")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(20) as usize,
            };
            tools::search_events(engine, &query, opts)
        }
        "get_timeline" => {
            let agent_id = arguments
                .get("agent_id")
                .and_then(|v| v.as_str())
                .unwrap_or("default");
            let event_type = arguments
                .get("event_type")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<EventType>().ok());
            let limit = arguments.get("limit").and_then(|v| v.as_u64()).map(|v| v as usize);
            tools::get_timeline(engine, agent_id, event_type, limit)
        }
        "get_event" => {
            let id = arguments.get("id").and_then(|v| v.as_str()).unwrap_or_default();
            tools::get_event(engine, id)
        }
        "update_core_memory" => {
            let block_type = arguments
                .get("block_type")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<BlockType>().ok())
                .unwrap_or(BlockType::Persona);
            let block_key = arguments
                .get("block_key")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let op = match arguments.get("op").and_then(|v| v.as_str()) {
                Some("replace") => CoreMemoryOp::Replace,
                Some("remove") => CoreMemoryOp::Remove,
                _ => CoreMemoryOp::Append,
            };
            let content = arguments
                .get("content")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            tools::update_core_memory(engine, block_type, block_key, op, content)
        }
        "store_learning" => {
            let input: UpsertEntityInput = serde_json::from_value(arguments)?;
            tools::store_learning(engine, input)
        }
        "update_entity" => {
            let input: UpsertEntityInput = serde_json::from_value(arguments)?;
            tools::update_entity(engine, input)
        }
        "create_relation" => {
            let from_name = arguments
                .get("from_name")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let to_name = arguments
                .get("to_name")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let relation_type = arguments
                .get("relation_type")
                .and_then(|v| v.as_str())
                .unwrap_or("related_to");
            tools::create_relation(engine, from_name, to_name, relation_type)
        }
        "search_knowledge" => {
            let query = arguments.get("query").and_then(|v| v.as_str()).unwrap_or_default();
            let entity_type = arguments
                .get("entity_type")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<EntityType>().ok());
            let limit = arguments.get("limit").and_then(|v| v.as_u64()).unwrap_or(10) as usize;
            tools::search_knowledge(engine, query, entity_type, limit)
        }
        "recall" => {
            let query = arguments.get("query").and_then(|v| v.as_str()).unwrap_or_default();
            let opts = RecallOptions {
                limit: arguments
                    .get("limit")
                    .and_then(|v| v.as_u64())
                    .map(|v| v as usize)
                    .unwrap_or(20),
                include_core: arguments
                    .get("include_core")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(true),
                agent_id: arguments
                    .get("agent_id")
                    .and_then(|v| v.as_str())
                    .map(String::from),
                touch: arguments.get("touch").and_then(|v| v.as_bool()).unwrap_or(true),
            };
            tools::recall(engine, query, opts)
        }
        "reflect" => {
            let agent_id = arguments
                .get("agent_id")
                .and_then(|v| v.as_str())
                .unwrap_or("default");
            let force = arguments.get("force").and_then(|v| v.as_bool()).unwrap_or(false);
            tools::reflect(engine, agent_id, force)
        }
        "consolidate" => {
            let max_age_days = arguments.get("max_age_days").and_then(|v| v.as_u64()).map(|v| v as u32);
            tools::consolidate(engine, max_age_days)
        }
        "memory_status" => tools::memory_status(engine),
        other => Err(EngineError::Configuration(format!("unknown tool: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentmem::config::Config;

    fn engine() -> Engine {
        Engine::open_in_memory(Config::default()).unwrap()
    }

    #[test]
    fn dispatch_unknown_tool_reports_configuration_error() {
        let engine = engine();
        let err = dispatch(&engine, "not_a_real_tool", Value::Null).unwrap_err();
        assert!(err.to_string().contains("unknown tool"));
    }

    #[test]
    fn dispatch_memory_status_ignores_arguments() {
        let engine = engine();
        let xml = dispatch(&engine, "memory_status", Value::Null).unwrap();
        assert!(xml.contains("<event_count>0</event_count>"));
    }

    #[test]
    fn handle_rejects_unknown_method() {
        let engine = engine();
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(json!(1)),
            method: "tools/list".to_string(),
            params: Value::Null,
        };
        let response = handle(&engine, request);
        assert!(response.error.is_some());
    }
}
