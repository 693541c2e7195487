//! [`Orchestrator`] – the per-turn control loop.
//!
//! One call to [`Orchestrator::process_message`] handles one inbound user
//! message end to end:
//!
//! 1. **Stamp** – advance the persisted turn counter and buffer the message.
//! 2. **Recall** – build a composite query from the last two buffered turns
//!    plus the message, pre-search the archive with it and render the core
//!    memory context into the system instruction.
//! 3. **Loop** – call the model at most [`MAX_MODEL_CALLS`] times:
//!    - rate limited → return the capacity outcome immediately;
//!    - malformed tool call → inject [`INVALID_TOOL_FORMAT`] and retry;
//!    - tool calls → execute them in order, append one result per call;
//!    - text that looks like a leaked tool call → inject
//!      [`RAW_CODE_DETECTED`] and retry;
//!    - any other text → final answer.
//! 4. **Commit** – buffer the answer (or [`FALLBACK_ANSWER`]) and hand it to
//!    the background [`Archiver`] without waiting.
//!
//! Any other failure is caught at the turn boundary and converted into
//! [`TurnOutcome::failure`], so callers always receive the same three-field
//! shape.
//!
//! Turns are serialised: a second concurrent call waits for the first to
//! finish, which keeps the core document single-writer.

use std::sync::Arc;

use memos_memory::archival::{ArchivalStore, DEFAULT_SEARCH_LIMIT};
use memos_memory::buffer::{ConversationBuffer, DEFAULT_BUFFER_CAPACITY};
use memos_memory::core_memory::CoreMemoryStore;
use memos_types::{MemosError, Role, TurnOutcome};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::archiver::{Archiver, DEFAULT_ARCHIVE_QUEUE};
use crate::llm_driver::{ChatMessage, ChatModel, LlmError, ToolDefinition};
use crate::prompts::render_system_prompt;
use crate::tools::{ToolExecutor, tool_definitions};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Upper bound on model calls per inbound message.
pub const MAX_MODEL_CALLS: usize = 3;

/// Answer used when no model call produced an acceptable reply.
pub const FALLBACK_ANSWER: &str = "I'm having trouble retrieving that information right now.";

/// Corrective message injected after a malformed tool call.
pub const INVALID_TOOL_FORMAT: &str = "SYSTEM ERROR: Invalid tool format.";

/// Corrective message injected after a leaked tool call in plain text.
pub const RAW_CODE_DETECTED: &str = "SYSTEM ERROR: Raw code detected.";

/// Number of buffered turns folded into the composite recall query.
const COMPOSITE_QUERY_TURNS: usize = 2;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Tunables for [`Orchestrator`].
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Turns kept in the short-term buffer.
    pub buffer_capacity: usize,
    /// Pending background archival jobs before new ones are dropped.
    pub archive_queue_capacity: usize,
    /// Archive hits fetched before the first model call.
    pub pre_search_limit: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            archive_queue_capacity: DEFAULT_ARCHIVE_QUEUE,
            pre_search_limit: DEFAULT_SEARCH_LIMIT,
        }
    }
}

/// `true` when `text` looks like a serialized tool call rather than prose.
pub fn looks_like_leaked_tool_call(text: &str) -> bool {
    text.contains("<function") || (text.contains('{') && text.contains("type") && text.contains("function"))
}

fn storage(e: impl std::fmt::Display) -> MemosError {
    MemosError::Storage(e.to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Orchestrator
// ─────────────────────────────────────────────────────────────────────────────

/// Drives turns against the model and the memory stores.
pub struct Orchestrator {
    model: Arc<dyn ChatModel>,
    core: Arc<CoreMemoryStore>,
    archival: Arc<ArchivalStore>,
    tools: ToolExecutor,
    tool_definitions: Vec<ToolDefinition>,
    buffer: Mutex<ConversationBuffer>,
    archiver: Archiver,
    turn_lock: Mutex<()>,
    pre_search_limit: usize,
}

impl Orchestrator {
    /// Build an orchestrator and spawn its archival worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        model: Arc<dyn ChatModel>,
        core: Arc<CoreMemoryStore>,
        archival: Arc<ArchivalStore>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            tools: ToolExecutor::new(Arc::clone(&core), Arc::clone(&archival)),
            tool_definitions: tool_definitions(),
            buffer: Mutex::new(ConversationBuffer::new(config.buffer_capacity)),
            archiver: Archiver::spawn(Arc::clone(&archival), config.archive_queue_capacity),
            turn_lock: Mutex::new(()),
            pre_search_limit: config.pre_search_limit,
            model,
            core,
            archival,
        }
    }

    pub fn core(&self) -> &Arc<CoreMemoryStore> {
        &self.core
    }

    pub fn archival(&self) -> &Arc<ArchivalStore> {
        &self.archival
    }

    /// A copy of the short-term buffer, oldest turn first.
    pub async fn recent_turns(&self) -> Vec<memos_types::ConversationTurn> {
        self.buffer.lock().await.turns().cloned().collect()
    }

    /// Process one user message.  Never fails; errors become
    /// [`TurnOutcome::failure`].
    #[instrument(skip(self, message), fields(len = message.len()))]
    pub async fn process_message(&self, message: &str) -> TurnOutcome {
        let _turn = self.turn_lock.lock().await;
        match self.run_turn(message).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "turn failed");
                TurnOutcome::failure(&e)
            }
        }
    }

    /// Stop accepting archival jobs and wait for pending ones to finish.
    pub async fn shutdown(self) {
        self.archiver.shutdown().await;
    }

    async fn run_turn(&self, message: &str) -> Result<TurnOutcome, MemosError> {
        // ── Stamp ────────────────────────────────────────────────────────────
        let turn = self.core.increment_turn().map_err(storage)?;
        let (query, history) = {
            let mut buffer = self.buffer.lock().await;
            buffer.push(Role::User, message);
            // The window already ends with `message`, which is appended once more.
            let mut parts: Vec<&str> = buffer.last(COMPOSITE_QUERY_TURNS).map(|t| t.content.as_str()).collect();
            parts.push(message);
            let query = parts.join(" ");
            // Buffered turns repeating the message verbatim are not replayed.
            let history: Vec<ChatMessage> = buffer
                .turns()
                .filter(|t| t.content != message)
                .map(|t| ChatMessage {
                    role: t.role,
                    ..ChatMessage::user(t.content.clone())
                })
                .collect();
            (query, history)
        };
        info!(turn, "turn started");

        // ── Recall ───────────────────────────────────────────────────────────
        let mut surfaced = self
            .archival
            .search_memory(&query, self.pre_search_limit)
            .await
            .map_err(storage)?;
        let core_block = self.core.assemble_context(&query, &surfaced).await.map_err(storage)?;
        let instruction = render_system_prompt(&core_block);

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(instruction.clone()));
        messages.extend(history);
        messages.push(ChatMessage::user(message));

        // ── Loop ─────────────────────────────────────────────────────────────
        let mut answer = String::new();
        for attempt in 1..=MAX_MODEL_CALLS {
            let reply = match self.model.complete_with_tools(&messages, &self.tool_definitions).await {
                Ok(reply) => reply,
                Err(LlmError::RateLimited) => {
                    warn!(turn, attempt, error = %MemosError::CapacityExceeded, "aborting turn");
                    return Ok(TurnOutcome::capacity_exceeded());
                }
                Err(LlmError::MalformedToolCall(detail)) => {
                    warn!(turn, attempt, error = %MemosError::MalformedToolRequest(detail), "retrying");
                    messages.push(ChatMessage::user(INVALID_TOOL_FORMAT));
                    continue;
                }
                Err(e) => return Err(MemosError::TurnFailure(e.to_string())),
            };

            if !reply.tool_calls.is_empty() {
                messages.push(reply.to_message());
                for call in &reply.tool_calls {
                    debug!(turn, attempt, tool = %call.function.name, call_id = %call.id, "tool call");
                    let result = self.tools.execute(call, &mut surfaced).await;
                    messages.push(ChatMessage::tool_result(&call.id, &call.function.name, result));
                }
                continue;
            }

            let text = reply.content.unwrap_or_default();
            if looks_like_leaked_tool_call(&text) {
                warn!(turn, attempt, error = %MemosError::ResponseLeakDetected, "retrying");
                messages.push(ChatMessage::user(RAW_CODE_DETECTED));
                continue;
            }
            answer = text;
            break;
        }

        // ── Commit ───────────────────────────────────────────────────────────
        if answer.is_empty() {
            warn!(turn, "no acceptable answer; using fallback");
            answer = FALLBACK_ANSWER.to_string();
        }
        self.buffer.lock().await.push(Role::Assistant, answer.clone());
        self.archiver.submit(answer.clone(), turn);
        info!(turn, surfaced = surfaced.len(), "turn finished");

        Ok(TurnOutcome {
            answer,
            surfaced_memories: surfaced,
            assembled_instruction: instruction,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
