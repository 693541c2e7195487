//! Core Memory Store – the structured world model.
//!
//! The store owns one [`MemoryDocument`] persisted as a JSON file and two
//! vector mirrors of it:
//!
//! | collection        | id                       | document                                  |
//! |-------------------|--------------------------|-------------------------------------------|
//! | `entity_facts`    | `entity_<canonical key>` | `"<Name> is <relationship>. Attributes: …"` |
//! | `timeline_events` | `event_<turn>`           | event description                         |
//!
//! Every mutator is a read-modify-write of the whole document under a
//! single write scope.  The new document is written to a temporary sibling
//! file and renamed over the old one, so a crash leaves either the pre- or
//! the post-write state on disk.  Mirrors are written after the document and
//! are not transactional with it.
//!
//! The write scope only serialises writers inside this process; two
//! processes sharing one document file will lose updates.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{Datelike, Local, NaiveDate};
use memos_types::MemoryHit;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{debug, info};

use crate::document::{Entity, MemoryDocument, canonical_entity_key};
use crate::temporal::{detect_target_year, filter_entity_hits, rank_timeline_hits, resolve_current_year};
use crate::vector::{Metadata, VectorDatabase, VectorIndex, VectorIndexError, VectorRecord};

pub const ENTITY_COLLECTION: &str = "entity_facts";
pub const TIMELINE_COLLECTION: &str = "timeline_events";

/// Number of neighbours fetched from each mirror during context assembly.
pub const CONTEXT_QUERY_LIMIT: usize = 5;

/// Errors that can arise from core memory operations.
#[derive(Error, Debug)]
pub enum CoreMemoryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Memory document {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Vector index error: {0}")]
    Index(#[from] VectorIndexError),
    #[error("Core memory lock poisoned")]
    Poisoned,
}

/// Structured memory document plus its entity and timeline mirrors.
pub struct CoreMemoryStore {
    path: Option<PathBuf>,
    document: Mutex<MemoryDocument>,
    entity_index: Arc<dyn VectorIndex>,
    timeline_index: Arc<dyn VectorIndex>,
}

impl CoreMemoryStore {
    /// Load the document at `path`, creating it with defaults if missing.
    pub fn open(
        path: impl AsRef<Path>,
        entity_index: Arc<dyn VectorIndex>,
        timeline_index: Arc<dyn VectorIndex>,
    ) -> Result<Self, CoreMemoryError> {
        let path = path.as_ref().to_path_buf();
        let document = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str(&raw).map_err(|source| CoreMemoryError::Corrupt {
                path: path.clone(),
                source,
            })?
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let document = MemoryDocument::default();
            write_atomically(&path, &document)?;
            info!(path = %path.display(), "created new memory document");
            document
        };
        Ok(Self {
            path: Some(path),
            document: Mutex::new(document),
            entity_index,
            timeline_index,
        })
    }

    /// Load the document at `path` with mirrors in the standard collections
    /// of `db`.
    pub fn open_with_database(path: impl AsRef<Path>, db: &VectorDatabase) -> Result<Self, CoreMemoryError> {
        Self::open(
            path,
            Arc::new(db.collection(ENTITY_COLLECTION)?),
            Arc::new(db.collection(TIMELINE_COLLECTION)?),
        )
    }

    /// A store that never touches the filesystem (useful for testing).
    pub fn open_in_memory(entity_index: Arc<dyn VectorIndex>, timeline_index: Arc<dyn VectorIndex>) -> Self {
        Self {
            path: None,
            document: Mutex::new(MemoryDocument::default()),
            entity_index,
            timeline_index,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryDocument>, CoreMemoryError> {
        self.document.lock().map_err(|_| CoreMemoryError::Poisoned)
    }

    /// Apply `f` to a copy of the document, persist the copy and only then
    /// make it current.
    fn mutate<T>(&self, f: impl FnOnce(&mut MemoryDocument) -> T) -> Result<T, CoreMemoryError> {
        let mut guard = self.lock()?;
        let mut next = guard.clone();
        let out = f(&mut next);
        if let Some(path) = &self.path {
            write_atomically(path, &next)?;
        }
        *guard = next;
        Ok(out)
    }

    // ── Read accessors ───────────────────────────────────────────────────────

    /// A copy of the current document.
    pub fn snapshot(&self) -> Result<MemoryDocument, CoreMemoryError> {
        Ok(self.lock()?.clone())
    }

    pub fn current_turn(&self) -> Result<u64, CoreMemoryError> {
        Ok(self.lock()?.system_stats.total_turns)
    }

    // ── Mutators ─────────────────────────────────────────────────────────────

    /// Advance the turn counter and return the new value.
    pub fn increment_turn(&self) -> Result<u64, CoreMemoryError> {
        self.mutate(MemoryDocument::increment_turn)
    }

    pub fn update_profile(&self, key: &str, value: &str) -> Result<String, CoreMemoryError> {
        let field = self.mutate(|doc| doc.update_profile(key, value))?;
        debug!(field = %field, "profile updated");
        Ok(format!("Updated Profile: {field}"))
    }

    pub fn remove_from_profile(&self, key: &str, value_to_remove: &str) -> Result<String, CoreMemoryError> {
        let removed = self.mutate(|doc| doc.remove_from_profile(key, value_to_remove))?;
        Ok(if removed {
            format!("Removed {value_to_remove}.")
        } else {
            "Not found.".to_string()
        })
    }

    /// Merge an entity and upsert its regenerated description.
    pub async fn update_entity(
        &self,
        name: &str,
        relationship: Option<&str>,
        attributes: &Map<String, Value>,
    ) -> Result<String, CoreMemoryError> {
        let entity = self.mutate(|doc| doc.merge_entity(name, relationship, attributes))?;
        let key = canonical_entity_key(&entity.name);
        self.entity_index
            .upsert(VectorRecord::new(format!("entity_{key}"), entity.description()).with_metadata(entity_metadata(&entity)))
            .await?;
        debug!(entity = %entity.name, "entity synced");
        Ok(format!("Entity Synced: {}", entity.name))
    }

    /// Record an event at the current turn, dated today.
    pub async fn log_event(&self, description: &str) -> Result<String, CoreMemoryError> {
        self.log_event_on(description, Local::now().date_naive()).await
    }

    /// Record an event at the current turn with an explicit date.
    pub async fn log_event_on(&self, description: &str, date: NaiveDate) -> Result<String, CoreMemoryError> {
        let date = date.format("%Y-%m-%d").to_string();
        let (event, ordinal) = self.mutate(|doc| doc.append_event(description, date))?;

        let id = match ordinal {
            0 => format!("event_{}", event.turn),
            n => format!("event_{}_{n}", event.turn),
        };
        let metadata = as_metadata(json!({"turn": event.turn, "date": event.date}));
        self.timeline_index
            .upsert(VectorRecord::new(&id, &event.description).with_metadata(metadata))
            .await?;
        debug!(id = %id, "event logged");
        Ok("Event Logged.".to_string())
    }

    pub fn add_general_knowledge(&self, topic: &str, content: &str) -> Result<String, CoreMemoryError> {
        self.mutate(|doc| doc.save_knowledge(topic, content))?;
        Ok("Knowledge Saved.".to_string())
    }

    // ── Context assembly ─────────────────────────────────────────────────────

    /// Render the memory context block for `query`.
    ///
    /// Blocks are, in order: the non-empty profile fields, entities within
    /// the entity cutoff, temporally ranked timeline events and the supplied
    /// `archival_hits`.  There is no size cap.
    pub async fn assemble_context(&self, query: &str, archival_hits: &[MemoryHit]) -> Result<String, CoreMemoryError> {
        let (profile, current_year) = {
            let doc = self.lock()?;
            let profile: Vec<String> = doc.profile_lines().map(|(k, v)| format!("- {k}: {v}")).collect();
            (profile, resolve_current_year(&doc.events, Local::now().year()))
        };

        let entities = filter_entity_hits(self.entity_index.query(query, CONTEXT_QUERY_LIMIT).await?);
        let target_year = detect_target_year(query, current_year);
        let events = rank_timeline_hits(
            self.timeline_index.query(query, CONTEXT_QUERY_LIMIT).await?,
            target_year,
        );
        debug!(
            current_year,
            ?target_year,
            entities = entities.len(),
            events = events.len(),
            "assembled context"
        );

        let mut out = String::from("USER PROFILE:\n");
        out.push_str(&profile.join("\n"));

        if entities.is_empty() {
            out.push_str("\n\nENTITIES: [None]");
        } else {
            out.push_str("\n\nRELEVANT ENTITIES:");
            for hit in &entities {
                out.push_str(&format!("\n- {}", hit.document));
            }
        }

        if events.is_empty() {
            out.push_str("\n\nTIMELINE: [No relevant past events]");
        } else {
            out.push_str("\n\nRELEVANT TIMELINE:");
            for hit in &events {
                out.push_str(&format!(
                    "\n- [Turn {} | {}] {}",
                    hit.meta_u64("turn"),
                    hit.meta_str("date").unwrap_or("unknown"),
                    hit.document
                ));
            }
        }

        out.push_str("\n\nPAST CONVERSATIONS:\n");
        for hit in archival_hits {
            out.push_str(&format!("- [Turn {}]: {}\n", hit.origin_turn, hit.content));
        }
        Ok(out)
    }
}

fn entity_metadata(entity: &Entity) -> Metadata {
    as_metadata(json!({"name": entity.name, "type": "entity"}))
}

fn as_metadata(value: Value) -> Metadata {
    match value {
        Value::Object(map) => map,
        _ => Metadata::new(),
    }
}

fn write_atomically(path: &Path, document: &MemoryDocument) -> Result<(), CoreMemoryError> {
    let raw = serde_json::to_string_pretty(document)?;
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(raw.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ProfileValue;
    use crate::vector::VectorHit;
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    /// In-memory index whose query distances are scripted per record id.
    /// Records without a scripted distance are reported at 0.5.
    #[derive(Default)]
    struct ScriptedIndex {
        records: Mutex<BTreeMap<String, VectorRecord>>,
        distances: Mutex<BTreeMap<String, f32>>,
        writes: Mutex<usize>,
    }

    impl ScriptedIndex {
        fn set_distance(&self, id: &str, d: f32) {
            self.distances.lock().unwrap().insert(id.into(), d);
        }

        fn writes(&self) -> usize {
            *self.writes.lock().unwrap()
        }
    }

    #[async_trait]
    impl VectorIndex for ScriptedIndex {
        async fn insert(&self, record: VectorRecord) -> Result<(), VectorIndexError> {
            let mut records = self.records.lock().unwrap();
            if records.contains_key(&record.id) {
                return Err(VectorIndexError::DuplicateId(record.id));
            }
            *self.writes.lock().unwrap() += 1;
            records.insert(record.id.clone(), record);
            Ok(())
        }

        async fn upsert(&self, record: VectorRecord) -> Result<(), VectorIndexError> {
            *self.writes.lock().unwrap() += 1;
            self.records.lock().unwrap().insert(record.id.clone(), record);
            Ok(())
        }

        async fn update_metadata(&self, id: &str, metadata: Metadata) -> Result<(), VectorIndexError> {
            match self.records.lock().unwrap().get_mut(id) {
                Some(r) => {
                    r.metadata = metadata;
                    Ok(())
                }
                None => Err(VectorIndexError::NotFound(id.into())),
            }
        }

        async fn query(&self, _text: &str, top_k: usize) -> Result<Vec<VectorHit>, VectorIndexError> {
            let distances = self.distances.lock().unwrap();
            let mut hits: Vec<VectorHit> = self
                .records
                .lock()
                .unwrap()
                .values()
                .map(|r| VectorHit {
                    id: r.id.clone(),
                    document: r.document.clone(),
                    metadata: r.metadata.clone(),
                    distance: distances.get(&r.id).copied().unwrap_or(0.5),
                })
                .collect();
            hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
            hits.truncate(top_k);
            Ok(hits)
        }

        async fn get(&self, id: &str) -> Result<Option<VectorRecord>, VectorIndexError> {
            Ok(self.records.lock().unwrap().get(id).cloned())
        }

        async fn count(&self) -> Result<usize, VectorIndexError> {
            Ok(self.records.lock().unwrap().len())
        }
    }

    struct Fixture {
        store: CoreMemoryStore,
        entities: Arc<ScriptedIndex>,
        timeline: Arc<ScriptedIndex>,
    }

    fn fixture() -> Fixture {
        let entities = Arc::new(ScriptedIndex::default());
        let timeline = Arc::new(ScriptedIndex::default());
        let store = CoreMemoryStore::open_in_memory(entities.clone(), timeline.clone());
        Fixture {
            store,
            entities,
            timeline,
        }
    }

    fn attrs(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    // ── persistence ──────────────────────────────────────────────────────────

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("core_memory.json");
        let f = fixture();
        let store = CoreMemoryStore::open(&path, f.entities, f.timeline).unwrap();
        assert!(path.exists());
        assert_eq!(store.current_turn().unwrap(), 0);
        assert_eq!(store.snapshot().unwrap(), MemoryDocument::default());
    }

    #[test]
    fn mutations_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("core_memory.json");
        {
            let f = fixture();
            let store = CoreMemoryStore::open(&path, f.entities, f.timeline).unwrap();
            store.increment_turn().unwrap();
            store.update_profile("city", "Pune").unwrap();
            store.add_general_knowledge("WiFi", "hunter2").unwrap();
        }
        let f = fixture();
        let store = CoreMemoryStore::open(&path, f.entities, f.timeline).unwrap();
        let doc = store.snapshot().unwrap();
        assert_eq!(doc.system_stats.total_turns, 1);
        assert_eq!(doc.user_profile["primary_location"], ProfileValue::text("Pune"));
        assert_eq!(doc.knowledge_base["wifi"], "hunter2");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn corrupt_file_is_reported_not_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("core_memory.json");
        fs::write(&path, "{ not json").unwrap();
        let f = fixture();
        let err = CoreMemoryStore::open(&path, f.entities, f.timeline).err().unwrap();
        assert!(matches!(err, CoreMemoryError::Corrupt { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[tokio::test]
    async fn sqlite_backed_store_opens_standard_collections() {
        use crate::embedding::HashEmbedder;
        let dir = tempfile::tempdir().unwrap();
        let db = VectorDatabase::open_in_memory(Arc::new(HashEmbedder::default())).unwrap();
        let store = CoreMemoryStore::open_with_database(dir.path().join("core.json"), &db).unwrap();
        store.update_entity("Bruno", Some("First Dog"), &Map::new()).await.unwrap();
        let mirror = db.collection(ENTITY_COLLECTION).unwrap();
        assert!(mirror.get("entity_bruno").await.unwrap().is_some());
    }

    // ── mutators ─────────────────────────────────────────────────────────────

    #[test]
    fn mutator_result_strings() {
        let f = fixture();
        assert_eq!(f.store.update_profile("job", "nurse").unwrap(), "Updated Profile: occupation");
        f.store.update_profile("preferences", "tea").unwrap();
        assert_eq!(f.store.remove_from_profile("preferences", "tea").unwrap(), "Removed tea.");
        assert_eq!(f.store.remove_from_profile("hobbies", "chess").unwrap(), "Not found.");
        assert_eq!(f.store.add_general_knowledge("x", "y").unwrap(), "Knowledge Saved.");
    }

    #[test]
    fn increment_turn_is_monotonic() {
        let f = fixture();
        assert_eq!(f.store.increment_turn().unwrap(), 1);
        assert_eq!(f.store.increment_turn().unwrap(), 2);
        assert_eq!(f.store.current_turn().unwrap(), 2);
    }

    #[test]
    fn repeated_preferences_are_not_duplicated() {
        let f = fixture();
        for v in ["hiking", "hiking", "tea"] {
            f.store.update_profile("preferences", v).unwrap();
        }
        let doc = f.store.snapshot().unwrap();
        assert_eq!(
            doc.user_profile["preferences"],
            ProfileValue::List(vec!["hiking".into(), "tea".into()])
        );
    }

    #[tokio::test]
    async fn entity_updates_merge_and_overwrite_mirror() {
        let f = fixture();
        f.store
            .update_entity("Bruno (dog)", Some("First Dog"), &attrs(json!({"breed": "Golden Retriever"})))
            .await
            .unwrap();
        let msg = f
            .store
            .update_entity("Bruno", None, &attrs(json!({"status": "Deceased"})))
            .await
            .unwrap();
        assert_eq!(msg, "Entity Synced: Bruno");

        let doc = f.store.snapshot().unwrap();
        assert_eq!(doc.entities.len(), 1);
        let bruno = &doc.entities["bruno"];
        assert_eq!(bruno.relationship.as_deref(), Some("First Dog"));
        assert_eq!(bruno.attributes["breed"], "Golden Retriever");
        assert_eq!(bruno.attributes["status"], "Deceased");

        assert_eq!(f.entities.count().await.unwrap(), 1);
        let mirrored = f.entities.get("entity_bruno").await.unwrap().unwrap();
        assert!(mirrored.document.starts_with("Bruno is First Dog."));
        assert!(mirrored.document.contains("Golden Retriever"));
        assert!(mirrored.document.contains("Deceased"));
        assert_eq!(mirrored.metadata["type"], "entity");
    }

    #[tokio::test]
    async fn log_event_stamps_turn_and_mirrors_once() {
        let f = fixture();
        for _ in 0..7 {
            f.store.increment_turn().unwrap();
        }
        assert_eq!(
            f.store.log_event_on("Moved to Berlin", date("2025-04-02")).await.unwrap(),
            "Event Logged."
        );
        f.store.log_event_on("Moved to Berlin", date("2025-04-02")).await.unwrap();

        let doc = f.store.snapshot().unwrap();
        assert_eq!(doc.events.len(), 1);
        assert_eq!(doc.events[0].turn, 7);
        assert_eq!(f.timeline.count().await.unwrap(), 1);
        let rec = f.timeline.get("event_7").await.unwrap().unwrap();
        assert_eq!(rec.metadata["turn"], 7);
        assert_eq!(rec.metadata["date"], "2025-04-02");
    }

    #[tokio::test]
    async fn second_distinct_event_in_turn_gets_suffixed_id() {
        let f = fixture();
        f.store.increment_turn().unwrap();
        f.store.log_event_on("Got promoted", date("2025-04-02")).await.unwrap();
        f.store.log_event_on("Bought a car", date("2025-04-02")).await.unwrap();
        assert!(f.timeline.get("event_1").await.unwrap().is_some());
        assert!(f.timeline.get("event_1_1").await.unwrap().is_some());
        assert_eq!(f.timeline.writes(), 2);
    }

    #[tokio::test]
    async fn log_event_uses_wall_clock_date() {
        let f = fixture();
        f.store.log_event("Started a journal").await.unwrap();
        let doc = f.store.snapshot().unwrap();
        assert_eq!(doc.events[0].date, Local::now().format("%Y-%m-%d").to_string());
    }

    // ── context assembly ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn empty_store_renders_placeholders() {
        let f = fixture();
        let ctx = f.store.assemble_context("hello", &[]).await.unwrap();
        assert!(ctx.starts_with("USER PROFILE:\n"));
        assert!(ctx.contains("ENTITIES: [None]"));
        assert!(ctx.contains("TIMELINE: [No relevant past events]"));
        assert!(ctx.ends_with("PAST CONVERSATIONS:\n"));
        assert!(!ctx.contains("- name:"));
    }

    #[tokio::test]
    async fn profile_entities_and_archival_hits_are_rendered() {
        let f = fixture();
        f.store.update_profile("name", "Priyanshu").unwrap();
        f.store.update_profile("preferences", "tea").unwrap();
        f.store.update_profile("preferences", "jazz").unwrap();
        f.store.update_entity("Bruno", Some("First Dog"), &Map::new()).await.unwrap();
        f.store.update_entity("Ravi", Some("boss"), &Map::new()).await.unwrap();
        f.entities.set_distance("entity_ravi", 1.25);

        let hits = vec![MemoryHit {
            id: "fact_1".into(),
            content: "User is allergic to peanuts".into(),
            origin_turn: 4,
            last_used_turn: 9,
            distance: 0.2,
        }];
        let ctx = f.store.assemble_context("my dog", &hits).await.unwrap();

        assert!(ctx.contains("- name: Priyanshu"));
        assert!(ctx.contains("- preferences: tea, jazz"));
        assert!(ctx.contains("RELEVANT ENTITIES:\n- Bruno is First Dog. Attributes: {}"));
        assert!(!ctx.contains("Ravi"));
        assert!(ctx.contains("PAST CONVERSATIONS:\n- [Turn 4]: User is allergic to peanuts\n"));
    }

    #[tokio::test]
    async fn last_year_boosts_matching_events() {
        let f = fixture();
        f.store.increment_turn().unwrap();
        f.store.log_event_on("Trip to Goa", date("2024-08-15")).await.unwrap();
        f.store.increment_turn().unwrap();
        f.store.log_event_on("Dentist visit", date("2023-05-01")).await.unwrap();
        f.store.increment_turn().unwrap();
        f.store.log_event_on("Started new job", date("2025-03-01")).await.unwrap();

        // 2024 hit is further away than the 2025 one but within the loose cutoff.
        f.timeline.set_distance("event_1", 1.3);
        f.timeline.set_distance("event_2", 1.2);
        f.timeline.set_distance("event_3", 0.9);

        let ctx = f.store.assemble_context("where did I go last year?", &[]).await.unwrap();
        let goa = ctx.find("[Turn 1 | 2024-08-15] Trip to Goa").unwrap();
        let job = ctx.find("[Turn 3 | 2025-03-01] Started new job").unwrap();
        assert!(goa < job);
        assert!(!ctx.contains("Dentist visit"));
    }

    #[tokio::test]
    async fn without_temporal_hint_far_events_are_dropped() {
        let f = fixture();
        f.store.increment_turn().unwrap();
        f.store.log_event_on("Trip to Goa", date("2024-08-15")).await.unwrap();
        f.timeline.set_distance("event_1", 1.3);
        let ctx = f.store.assemble_context("tell me something", &[]).await.unwrap();
        assert!(ctx.contains("TIMELINE: [No relevant past events]"));
    }
}
