//! Archival Store – the semantic tier.
//!
//! Owns two independent vector collections:
//!
//! - **episodic** (`conversation_logs`) – an append-only log of what was
//!   said, tagged with the turn it was said in.
//! - **semantic** (`semantic_memory`) – deduplicated facts.  Facts have no
//!   natural key, so identity is decided by similarity: a new fact whose
//!   nearest neighbour lies closer than [`FACT_DEDUP_DISTANCE`] is treated as
//!   a re-observation of that neighbour.
//!
//! Reads from the semantic collection return [`MemoryHit`]s, the shape the
//! orchestrator surfaces to transports.

use std::sync::Arc;

use memos_types::{MemoryHit, Role};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::vector::{Metadata, VectorDatabase, VectorHit, VectorIndex, VectorIndexError, VectorRecord};

pub const EPISODIC_COLLECTION: &str = "conversation_logs";
pub const SEMANTIC_COLLECTION: &str = "semantic_memory";

/// Facts closer than this to an existing fact are merged into it.
pub const FACT_DEDUP_DISTANCE: f32 = 0.15;

/// Default number of hits returned by searches.
pub const DEFAULT_SEARCH_LIMIT: usize = 3;

/// Errors that can arise from archival operations.
#[derive(Error, Debug)]
pub enum ArchivalError {
    #[error("Vector index error: {0}")]
    Index(#[from] VectorIndexError),
}

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// An entry in the episodic log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodicRecord {
    pub id: String,
    pub content: String,
    pub role: String,
    pub turn_number: u64,
    pub origin_turn: u64,
    pub distance: f32,
}

impl From<VectorHit> for EpisodicRecord {
    fn from(hit: VectorHit) -> Self {
        Self {
            role: hit.meta_str("role").unwrap_or_default().to_string(),
            turn_number: hit.meta_u64("turn_number"),
            origin_turn: hit.meta_u64("origin_turn"),
            id: hit.id,
            content: hit.document,
            distance: hit.distance,
        }
    }
}

/// A deduplicated fact in the semantic collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticFact {
    pub id: String,
    pub content: String,
    pub usage_count: u64,
    pub confidence: f64,
    pub origin_turn: u64,
    pub last_used_turn: u64,
}

impl SemanticFact {
    fn from_record(record: VectorRecord) -> Self {
        let m = &record.metadata;
        let u = |k: &str| m.get(k).and_then(Value::as_u64).unwrap_or(0);
        Self {
            usage_count: m.get("count").and_then(Value::as_u64).unwrap_or(1),
            confidence: m.get("confidence").and_then(Value::as_f64).unwrap_or(1.0),
            origin_turn: u("origin_turn"),
            last_used_turn: u("last_used_turn"),
            id: record.id,
            content: record.document,
        }
    }
}

/// What [`ArchivalStore::add_fact`] did with its input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FactOutcome {
    /// A new fact was inserted with a usage count of one.
    Stored(String),
    /// The input matched an existing fact whose usage count was bumped.
    Refreshed { id: String, usage_count: u64 },
}

impl FactOutcome {
    pub fn id(&self) -> &str {
        match self {
            FactOutcome::Stored(id) => id,
            FactOutcome::Refreshed { id, .. } => id,
        }
    }

    pub fn message(&self) -> String {
        match self {
            FactOutcome::Stored(_) => "New Memory Stored".to_string(),
            FactOutcome::Refreshed { id, .. } => format!("Memory Refreshed (Merged with {id})"),
        }
    }
}

fn short_id(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}", &hex[..8])
}

fn to_memory_hit(hit: VectorHit) -> MemoryHit {
    MemoryHit {
        origin_turn: hit.meta_u64("origin_turn"),
        last_used_turn: hit.meta_u64("last_used_turn"),
        id: hit.id,
        content: hit.document,
        distance: hit.distance,
    }
}

fn object(value: Value) -> Metadata {
    match value {
        Value::Object(map) => map,
        _ => Metadata::new(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ArchivalStore
// ─────────────────────────────────────────────────────────────────────────────

/// Episodic log plus deduplicated fact store.
pub struct ArchivalStore {
    episodic: Arc<dyn VectorIndex>,
    semantic: Arc<dyn VectorIndex>,
}

impl ArchivalStore {
    /// Build a store over two caller-supplied indices.
    pub fn new(episodic: Arc<dyn VectorIndex>, semantic: Arc<dyn VectorIndex>) -> Self {
        Self { episodic, semantic }
    }

    /// Open the two standard collections in `db`.
    pub fn open(db: &VectorDatabase) -> Result<Self, ArchivalError> {
        Ok(Self::new(
            Arc::new(db.collection(EPISODIC_COLLECTION)?),
            Arc::new(db.collection(SEMANTIC_COLLECTION)?),
        ))
    }

    /// Append `content` to the episodic log.  Returns the generated id.
    pub async fn add_memory(&self, content: &str, role: Role, turn_number: u64) -> Result<String, ArchivalError> {
        let id = short_id("mem");
        let metadata = object(json!({
            "role": role.as_str(),
            "turn_number": turn_number,
            "origin_turn": turn_number,
        }));
        self.episodic
            .insert(VectorRecord::new(&id, content).with_metadata(metadata))
            .await?;
        debug!(id = %id, turn = turn_number, "archived episodic memory");
        Ok(id)
    }

    /// Log a full user/assistant exchange as one episodic record.
    pub async fn add_episode(&self, user_msg: &str, bot_msg: &str, turn_number: u64) -> Result<String, ArchivalError> {
        let id = short_id("ep");
        let content = format!("User: {user_msg}\nAssistant: {bot_msg}");
        let metadata = object(json!({
            "role": "exchange",
            "turn_number": turn_number,
            "origin_turn": turn_number,
        }));
        self.episodic
            .insert(VectorRecord::new(&id, content).with_metadata(metadata))
            .await?;
        Ok(id)
    }

    /// Nearest facts to `query`, closest first.
    pub async fn search_memory(&self, query: &str, top_k: usize) -> Result<Vec<MemoryHit>, ArchivalError> {
        let hits = self.semantic.query(query, top_k).await?;
        Ok(hits.into_iter().map(to_memory_hit).collect())
    }

    /// Nearest entries of the episodic log to `query`, closest first.
    pub async fn search_episodes(&self, query: &str, top_k: usize) -> Result<Vec<EpisodicRecord>, ArchivalError> {
        let hits = self.episodic.query(query, top_k).await?;
        Ok(hits.into_iter().map(EpisodicRecord::from).collect())
    }

    /// Store a fact, or refresh the existing fact it duplicates.
    pub async fn add_fact(&self, content: &str, turn_number: u64, confidence: f64) -> Result<FactOutcome, ArchivalError> {
        let nearest = self.semantic.query(content, 1).await?;
        if let Some(hit) = nearest.into_iter().next()
            && hit.distance < FACT_DEDUP_DISTANCE
        {
            let mut metadata = hit.metadata;
            let usage_count = metadata.get("count").and_then(Value::as_u64).unwrap_or(1) + 1;
            metadata.insert("last_used_turn".into(), json!(turn_number));
            metadata.insert("count".into(), json!(usage_count));
            self.semantic.update_metadata(&hit.id, metadata).await?;
            debug!(id = %hit.id, usage_count, "fact re-observed");
            return Ok(FactOutcome::Refreshed { id: hit.id, usage_count });
        }

        let id = short_id("fact");
        let metadata = object(json!({
            "type": "fact",
            "origin_turn": turn_number,
            "last_used_turn": turn_number,
            "count": 1,
            "confidence": confidence,
        }));
        self.semantic
            .insert(VectorRecord::new(&id, content).with_metadata(metadata))
            .await?;
        Ok(FactOutcome::Stored(id))
    }

    /// Like [`search_memory`](Self::search_memory), but stamps every returned
    /// fact with `last_used_turn = turn_number`.
    pub async fn retrieve_relevant_context(
        &self,
        query: &str,
        turn_number: u64,
        n: usize,
    ) -> Result<Vec<MemoryHit>, ArchivalError> {
        let hits = self.semantic.query(query, n).await?;
        let mut out = Vec::with_capacity(hits.len());
        for mut hit in hits {
            hit.metadata.insert("last_used_turn".into(), json!(turn_number));
            self.semantic.update_metadata(&hit.id, hit.metadata.clone()).await?;
            out.push(to_memory_hit(hit));
        }
        Ok(out)
    }

    /// Look up a single fact by id.
    pub async fn fact(&self, id: &str) -> Result<Option<SemanticFact>, ArchivalError> {
        Ok(self.semantic.get(id).await?.map(SemanticFact::from_record))
    }

    pub async fn fact_count(&self) -> Result<usize, ArchivalError> {
        Ok(self.semantic.count().await?)
    }

    pub async fn episode_count(&self) -> Result<usize, ArchivalError> {
        Ok(self.episodic.count().await?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;

    fn store() -> ArchivalStore {
        let db = VectorDatabase::open_in_memory(Arc::new(HashEmbedder::default())).unwrap();
        ArchivalStore::open(&db).unwrap()
    }

    #[tokio::test]
    async fn add_memory_generates_unique_prefixed_ids() {
        let s = store();
        let a = s.add_memory("Bot: hello", Role::Assistant, 1).await.unwrap();
        let b = s.add_memory("Bot: hello", Role::Assistant, 1).await.unwrap();
        assert!(a.starts_with("mem_"));
        assert_eq!(a.len(), "mem_".len() + 8);
        assert_ne!(a, b);
        assert_eq!(s.episode_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn episodic_records_carry_role_and_turn() {
        let s = store();
        s.add_memory("Bot: your sister is Priya", Role::Assistant, 42).await.unwrap();
        let hits = s.search_episodes("sister Priya", 1).await.unwrap();
        assert_eq!(hits[0].role, "assistant");
        assert_eq!(hits[0].turn_number, 42);
        assert_eq!(hits[0].origin_turn, 42);
    }

    #[tokio::test]
    async fn add_episode_formats_exchange() {
        let s = store();
        let id = s.add_episode("hi", "hello there", 3).await.unwrap();
        assert!(id.starts_with("ep_"));
        let hits = s.search_episodes("hello there", 1).await.unwrap();
        assert_eq!(hits[0].content, "User: hi\nAssistant: hello there");
    }

    #[tokio::test]
    async fn near_identical_facts_are_merged() {
        let s = store();
        let first = s.add_fact("User is allergic to peanuts", 1, 1.0).await.unwrap();
        let second = s.add_fact("user is allergic to peanuts.", 7, 1.0).await.unwrap();

        assert!(matches!(first, FactOutcome::Stored(_)));
        assert_eq!(
            second,
            FactOutcome::Refreshed {
                id: first.id().to_string(),
                usage_count: 2
            }
        );
        assert_eq!(s.fact_count().await.unwrap(), 1);

        let fact = s.fact(first.id()).await.unwrap().unwrap();
        assert_eq!(fact.usage_count, 2);
        assert_eq!(fact.origin_turn, 1);
        assert_eq!(fact.last_used_turn, 7);
    }

    #[tokio::test]
    async fn distinct_facts_are_stored_separately() {
        let s = store();
        s.add_fact("User is allergic to peanuts", 1, 1.0).await.unwrap();
        let outcome = s.add_fact("User works as a nurse in Pune", 2, 0.8).await.unwrap();
        assert!(matches!(outcome, FactOutcome::Stored(ref id) if id.starts_with("fact_")));
        assert_eq!(s.fact_count().await.unwrap(), 2);
        let fact = s.fact(outcome.id()).await.unwrap().unwrap();
        assert_eq!(fact.usage_count, 1);
        assert!((fact.confidence - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn search_memory_reads_the_semantic_collection() {
        let s = store();
        s.add_memory("Bot: peanuts are dangerous for you", Role::Assistant, 1).await.unwrap();
        assert!(s.search_memory("peanuts", 3).await.unwrap().is_empty());

        s.add_fact("User is allergic to peanuts", 1, 1.0).await.unwrap();
        let hits = s.search_memory("peanuts", 3).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].origin_turn, 1);
    }

    #[tokio::test]
    async fn retrieve_relevant_context_stamps_last_used_turn() {
        let s = store();
        let stored = s.add_fact("User prefers tea over coffee", 5, 1.0).await.unwrap();
        let hits = s.retrieve_relevant_context("tea or coffee", 90, 3).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].last_used_turn, 90);

        let fact = s.fact(stored.id()).await.unwrap().unwrap();
        assert_eq!(fact.last_used_turn, 90);
        assert_eq!(fact.origin_turn, 5);
        assert_eq!(fact.usage_count, 1);
    }

    #[test]
    fn fact_outcome_messages() {
        assert_eq!(FactOutcome::Stored("fact_1".into()).message(), "New Memory Stored");
        let refreshed = FactOutcome::Refreshed {
            id: "fact_1".into(),
            usage_count: 2,
        };
        assert_eq!(refreshed.message(), "Memory Refreshed (Merged with fact_1)");
    }
}
