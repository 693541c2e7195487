//! `memos-types` – Shared vocabulary for the MemOS workspace.
//!
//! Every crate in the workspace speaks in these types: conversation turns,
//! archival hits surfaced to callers, the [`TurnOutcome`] returned for every
//! user message, the six [`ToolName`]s with their `schemars`-derived argument
//! structs, and the workspace-wide [`MemosError`].

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// The role of a participant in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    /// Result of a tool invocation echoed back to the model.
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ephemeral `{role, content}` pair held by the conversation buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A memory fragment surfaced from the archive during a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryHit {
    #[serde(rename = "memory_id")]
    pub id: String,
    pub content: String,
    pub origin_turn: u64,
    pub last_used_turn: u64,
    /// Cosine distance to the query; lower is more similar.
    pub distance: f32,
}

// ─────────────────────────────────────────────────────────────────────────────
// Turn contract
// ─────────────────────────────────────────────────────────────────────────────

/// Shown when the model provider signals rate limiting.
pub const CAPACITY_MESSAGE: &str = "System Limit Reached: Please wait a moment.";

/// Result of processing one inbound user message.
///
/// The shape is identical on success and failure so transports never need a
/// second parsing path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub answer: String,
    pub surfaced_memories: Vec<MemoryHit>,
    pub assembled_instruction: String,
}

impl TurnOutcome {
    pub fn capacity_exceeded() -> Self {
        Self {
            answer: CAPACITY_MESSAGE.to_string(),
            ..Self::default()
        }
    }

    /// Generic error answer produced at the turn failure boundary.
    pub fn failure(err: &MemosError) -> Self {
        Self {
            answer: format!("System Error: {err}"),
            ..Self::default()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool surface
// ─────────────────────────────────────────────────────────────────────────────

/// The six memory operations the model may invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    CoreMemoryUpdate,
    DeleteCoreMemory,
    UpdateEntityMemory,
    LogEvent,
    SaveKnowledge,
    ArchivalMemorySearch,
}

impl ToolName {
    pub const ALL: [ToolName; 6] = [
        ToolName::CoreMemoryUpdate,
        ToolName::DeleteCoreMemory,
        ToolName::UpdateEntityMemory,
        ToolName::LogEvent,
        ToolName::SaveKnowledge,
        ToolName::ArchivalMemorySearch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::CoreMemoryUpdate => "core_memory_update",
            ToolName::DeleteCoreMemory => "delete_core_memory",
            ToolName::UpdateEntityMemory => "update_entity_memory",
            ToolName::LogEvent => "log_event",
            ToolName::SaveKnowledge => "save_knowledge",
            ToolName::ArchivalMemorySearch => "archival_memory_search",
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = MemosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolName::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| MemosError::ToolExecution(format!("unknown tool '{s}'")))
    }
}

/// Save a permanent user trait (name, job, preferences, goals).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CoreMemoryUpdateArgs {
    pub key: String,
    pub value: String,
}

/// Remove outdated entries from a list-valued profile field.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DeleteCoreMemoryArgs {
    pub key: String,
    pub value_to_remove: String,
}

/// Create or merge a person, pet or place.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UpdateEntityArgs {
    pub name: String,
    #[serde(default)]
    pub relationship: Option<String>,
    pub attributes: Map<String, Value>,
}

/// Log a meaningful life event on the timeline.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LogEventArgs {
    pub description: String,
}

/// Save a general fact or code under a topic.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SaveKnowledgeArgs {
    pub topic: String,
    pub content: String,
}

/// Search past conversations and facts.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ArchivalSearchArgs {
    pub query: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Failure kinds that can occur while processing a turn.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MemosError {
    #[error("Capacity exceeded: model provider is rate limiting")]
    CapacityExceeded,

    #[error("Malformed tool request: {0}")]
    MalformedToolRequest(String),

    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    #[error("Response leaked raw tool-call text")]
    ResponseLeakDetected,

    #[error("Turn failed: {0}")]
    TurnFailure(String),

    #[error("Storage error: {0}")]
    Storage(String),
}
