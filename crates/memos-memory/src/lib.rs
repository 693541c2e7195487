//! `memos-memory` – The tiered memory store.
//!
//! Three tiers with different lifetimes back every conversation:
//!
//! | tier      | type                                        | lifetime         |
//! |-----------|---------------------------------------------|------------------|
//! | short     | [`ConversationBuffer`][buffer::ConversationBuffer] | process      |
//! | core      | [`CoreMemoryStore`][core_memory::CoreMemoryStore]  | JSON file + mirrors |
//! | archival  | [`ArchivalStore`][archival::ArchivalStore]  | vector database  |
//!
//! # Modules
//!
//! - [`buffer`] – bounded FIFO of the most recent turns.
//! - [`document`] – the persisted world-model document and its merge rules
//!   (profile key synonyms, list fields, entity canonicalisation).
//! - [`core_memory`] – the Core Memory Store: read-modify-write mutators, vector
//!   mirrors for entities and timeline events, and context assembly.
//! - [`temporal`] – year resolution and the dynamic thresholds applied to
//!   timeline and entity hits.
//! - [`archival`] – episodic log plus similarity-deduplicated facts.
//! - [`vector`] – the [`VectorIndex`][vector::VectorIndex] capability and its
//!   SQLite implementation.
//! - [`embedding`] – the [`Embedder`][embedding::Embedder] capability with an
//!   HTTP client and an offline hashing embedder.

pub mod archival;
pub mod buffer;
pub mod core_memory;
pub mod document;
pub mod embedding;
pub mod temporal;
pub mod vector;
