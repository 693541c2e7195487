//! `memos-runtime` – The conversation engine.
//!
//! Turns one user message into one answer while letting the model read and
//! write the tiered memory in `memos-memory` along the way.
//!
//! # Modules
//!
//! - [`orchestrator`] – [`Orchestrator`][orchestrator::Orchestrator]: the
//!   per-turn state machine.  Assembles context, calls the model at most
//!   [`MAX_MODEL_CALLS`][orchestrator::MAX_MODEL_CALLS] times, dispatches
//!   tool calls and always returns a
//!   [`TurnOutcome`][memos_types::TurnOutcome].
//! - [`llm_driver`] – the [`ChatModel`][llm_driver::ChatModel] capability and
//!   [`LlmDriver`][llm_driver::LlmDriver], an OpenAI-compatible HTTP client
//!   that classifies rate limits and malformed tool calls.
//! - [`tools`] – the six memory tools: JSON schemas derived with `schemars`
//!   and the [`ToolExecutor`][tools::ToolExecutor] that runs them.
//! - [`prompts`] – the system instruction template.
//! - [`archiver`] – [`Archiver`][archiver::Archiver]: bounded background
//!   queue that writes accepted answers to the episodic log.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter.

pub mod archiver;
pub mod llm_driver;
pub mod orchestrator;
pub mod prompts;
pub mod telemetry;
pub mod tools;

pub use llm_driver::{AssistantReply, ChatMessage, ChatModel, LlmDriver, LlmError, ToolCall, ToolDefinition};
pub use orchestrator::{FALLBACK_ANSWER, MAX_MODEL_CALLS, Orchestrator, OrchestratorConfig};
pub use telemetry::{TracerProviderGuard, init_tracing};
