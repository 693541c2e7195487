//! The memory tool surface exposed to the model.
//!
//! [`tool_definitions`] derives the JSON parameter contract of every tool from
//! its argument struct in `memos-types` via `schemars`, so the schema the
//! model sees and the shape [`ToolExecutor`] decodes can never drift apart.
//!
//! [`ToolExecutor::execute`] never fails: any error is rendered as an
//! `"Error: <message>"` string and handed back to the model as the tool
//! result, leaving the turn alive.

use std::sync::Arc;

use memos_memory::archival::{ArchivalError, ArchivalStore, DEFAULT_SEARCH_LIMIT};
use memos_memory::core_memory::{CoreMemoryError, CoreMemoryStore};
use memos_types::{
    ArchivalSearchArgs, CoreMemoryUpdateArgs, DeleteCoreMemoryArgs, LogEventArgs, MemoryHit, SaveKnowledgeArgs,
    ToolName, UpdateEntityArgs,
};
use schemars::schema_for;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::llm_driver::{ToolCall, ToolDefinition};

/// Errors that can arise while executing a tool invocation.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
    #[error("invalid arguments for {tool}: {source}")]
    InvalidArguments {
        tool: ToolName,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Core(#[from] CoreMemoryError),
    #[error(transparent)]
    Archival(#[from] ArchivalError),
    #[error("could not encode search results: {0}")]
    Encode(serde_json::Error),
}

// ─────────────────────────────────────────────────────────────────────────────
// Schemas
// ─────────────────────────────────────────────────────────────────────────────

/// The six tool schemas, in [`ToolName::ALL`] order.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    ToolName::ALL.into_iter().map(definition_for).collect()
}

fn definition_for(tool: ToolName) -> ToolDefinition {
    let schema = match tool {
        ToolName::CoreMemoryUpdate => schema_for!(CoreMemoryUpdateArgs),
        ToolName::DeleteCoreMemory => schema_for!(DeleteCoreMemoryArgs),
        ToolName::UpdateEntityMemory => schema_for!(UpdateEntityArgs),
        ToolName::LogEvent => schema_for!(LogEventArgs),
        ToolName::SaveKnowledge => schema_for!(SaveKnowledgeArgs),
        ToolName::ArchivalMemorySearch => schema_for!(ArchivalSearchArgs),
    };
    let mut parameters = serde_json::to_value(schema).unwrap_or(Value::Null);
    let mut description = String::new();
    if let Value::Object(map) = &mut parameters {
        map.remove("$schema");
        map.remove("title");
        if let Some(Value::String(doc)) = map.remove("description") {
            description = doc;
        }
    }
    ToolDefinition::function(tool.as_str(), description, parameters)
}

// ─────────────────────────────────────────────────────────────────────────────
// Executor
// ─────────────────────────────────────────────────────────────────────────────

/// Routes tool invocations to the Core and Archival stores.
pub struct ToolExecutor {
    core: Arc<CoreMemoryStore>,
    archival: Arc<ArchivalStore>,
}

impl ToolExecutor {
    pub fn new(core: Arc<CoreMemoryStore>, archival: Arc<ArchivalStore>) -> Self {
        Self { core, archival }
    }

    /// Run one invocation and return the string echoed back to the model.
    ///
    /// Hits returned by `archival_memory_search` are also appended to
    /// `surfaced`.
    pub async fn execute(&self, call: &ToolCall, surfaced: &mut Vec<MemoryHit>) -> String {
        match self.dispatch(&call.function.name, &call.function.arguments, surfaced).await {
            Ok(result) => result,
            Err(e) => {
                warn!(tool = %call.function.name, call_id = %call.id, error = %e, "tool invocation failed");
                format!("Error: {e}")
            }
        }
    }

    async fn dispatch(&self, name: &str, raw_args: &str, surfaced: &mut Vec<MemoryHit>) -> Result<String, ToolError> {
        let tool: ToolName = name.parse().map_err(|_| ToolError::UnknownTool(name.to_string()))?;
        let args = parse_arguments(raw_args);
        debug!(tool = %tool, "dispatching tool");

        match tool {
            ToolName::CoreMemoryUpdate => {
                let a: CoreMemoryUpdateArgs = decode(tool, args)?;
                Ok(self.core.update_profile(&a.key, &a.value)?)
            }
            ToolName::DeleteCoreMemory => {
                let a: DeleteCoreMemoryArgs = decode(tool, args)?;
                Ok(self.core.remove_from_profile(&a.key, &a.value_to_remove)?)
            }
            ToolName::UpdateEntityMemory => {
                let a: UpdateEntityArgs = decode(tool, args)?;
                Ok(self
                    .core
                    .update_entity(&a.name, a.relationship.as_deref(), &a.attributes)
                    .await?)
            }
            ToolName::LogEvent => {
                let a: LogEventArgs = decode(tool, args)?;
                Ok(self.core.log_event(&a.description).await?)
            }
            ToolName::SaveKnowledge => {
                let a: SaveKnowledgeArgs = decode(tool, args)?;
                Ok(self.core.add_general_knowledge(&a.topic, &a.content)?)
            }
            ToolName::ArchivalMemorySearch => {
                let a: ArchivalSearchArgs = decode(tool, args)?;
                let hits = self.archival.search_memory(&a.query, DEFAULT_SEARCH_LIMIT).await?;
                let rendered = serde_json::to_string(&hits).map_err(ToolError::Encode)?;
                surfaced.extend(hits);
                Ok(rendered)
            }
        }
    }
}

/// Model-produced argument text that is not a JSON object is treated as an
/// empty object, so missing fields surface as a decode error.
fn parse_arguments(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ Value::Object(_)) => v,
        _ => Value::Object(Map::new()),
    }
}

fn decode<T: DeserializeOwned>(tool: ToolName, args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|source| ToolError::InvalidArguments { tool, source })
}
