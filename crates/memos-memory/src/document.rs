//! The persisted core-memory document and its pure merge rules.
//!
//! Everything in this module is synchronous and storage-agnostic: the
//! [`CoreMemoryStore`](crate::core_memory::CoreMemoryStore) loads a
//! [`MemoryDocument`], applies one of the mutation methods below, and writes
//! the result back.
//!
//! On disk the document is a single JSON object:
//!
//! ```json
//! {
//!   "user_profile":   { "name": null, "preferences": [] },
//!   "entities":       { "bruno": { "name": "Bruno", "relationship": "First Dog", "attributes": {} } },
//!   "knowledge_base": { "wifi": "hunter2" },
//!   "events":         [ { "turn": 12, "description": "Moved to Berlin", "date": "2025-04-02" } ],
//!   "system_stats":   { "total_turns": 12 }
//! }
//! ```

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ─────────────────────────────────────────────────────────────────────────────
// Profile schema (data, not logic)
// ─────────────────────────────────────────────────────────────────────────────

/// Spoken synonyms mapped onto canonical profile field names.
pub const PROFILE_KEY_SYNONYMS: &[(&str, &str)] = &[
    ("city", "primary_location"),
    ("job", "occupation"),
    ("work", "occupation"),
];

/// Fields that always hold a deduplicated list.
pub const LIST_PROFILE_FIELDS: &[&str] = &["preferences", "goals"];

/// Map a raw profile key to its canonical field name.
///
/// Synonyms come from [`PROFILE_KEY_SYNONYMS`]; anything else is lowercased
/// with spaces replaced by underscores.
pub fn normalize_profile_key(key: &str) -> String {
    let lowered = key.to_lowercase();
    PROFILE_KEY_SYNONYMS
        .iter()
        .find(|(synonym, _)| *synonym == lowered)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or_else(|| lowered.replace(' ', "_"))
}

static PARENTHETICAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*\(.*?\)").unwrap_or_else(|e| unreachable!("static regex: {e}"))
});

/// Display name with parenthetical qualifiers removed: `"Bruno (dog)"` → `"Bruno"`.
pub fn clean_entity_name(name: &str) -> String {
    PARENTHETICAL.replace_all(name, "").trim().to_string()
}

/// Canonical de-duplication key of an entity: lowercase cleaned name.
pub fn canonical_entity_key(name: &str) -> String {
    clean_entity_name(name).to_lowercase()
}

// ─────────────────────────────────────────────────────────────────────────────
// Document types
// ─────────────────────────────────────────────────────────────────────────────

/// A profile value: either a deduplicated list or a single scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProfileValue {
    List(Vec<String>),
    Scalar(Value),
}

impl ProfileValue {
    pub fn text(value: impl Into<String>) -> Self {
        ProfileValue::Scalar(Value::String(value.into()))
    }

    /// `true` for null, empty strings and empty lists.
    pub fn is_empty(&self) -> bool {
        match self {
            ProfileValue::List(items) => items.is_empty(),
            ProfileValue::Scalar(Value::Null) => true,
            ProfileValue::Scalar(Value::String(s)) => s.is_empty(),
            ProfileValue::Scalar(Value::Bool(b)) => !b,
            ProfileValue::Scalar(_) => false,
        }
    }

    /// Human-readable rendering used in the context block.
    pub fn render(&self) -> String {
        match self {
            ProfileValue::List(items) => items.join(", "),
            ProfileValue::Scalar(Value::String(s)) => s.clone(),
            ProfileValue::Scalar(other) => other.to_string(),
        }
    }
}

/// A person, pet or place the user has mentioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    #[serde(default)]
    pub relationship: Option<String>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl Entity {
    /// Text indexed in the entity vector collection, regenerated from the
    /// current merged record on every update.
    pub fn description(&self) -> String {
        let relationship = self.relationship.as_deref().unwrap_or("None");
        let attributes = Value::Object(self.attributes.clone());
        format!("{} is {}. Attributes: {}", self.name, relationship, attributes)
    }
}

/// An immutable timeline entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub turn: u64,
    pub description: String,
    /// `YYYY-MM-DD`.
    pub date: String,
}

impl TimelineEvent {
    /// The year component of [`date`](Self::date), if it parses.
    pub fn year(&self) -> Option<i32> {
        year_of(&self.date)
    }
}

/// Leading `YYYY` of a `YYYY-MM-DD` date string.
pub fn year_of(date: &str) -> Option<i32> {
    date.split('-').next()?.trim().parse().ok()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStats {
    #[serde(default)]
    pub total_turns: u64,
}

/// The whole structured world model of one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryDocument {
    #[serde(default)]
    pub user_profile: BTreeMap<String, ProfileValue>,
    #[serde(default)]
    pub entities: BTreeMap<String, Entity>,
    #[serde(default)]
    pub knowledge_base: BTreeMap<String, String>,
    #[serde(default)]
    pub events: Vec<TimelineEvent>,
    #[serde(default)]
    pub system_stats: SystemStats,
}

impl Default for MemoryDocument {
    fn default() -> Self {
        let mut user_profile = BTreeMap::new();
        user_profile.insert("name".to_string(), ProfileValue::Scalar(Value::Null));
        user_profile.insert("preferences".to_string(), ProfileValue::List(Vec::new()));
        Self {
            user_profile,
            entities: BTreeMap::new(),
            knowledge_base: BTreeMap::new(),
            events: Vec::new(),
            system_stats: SystemStats::default(),
        }
    }
}

impl MemoryDocument {
    /// Upsert a profile field and return its canonical name.
    ///
    /// List fields (registered in [`LIST_PROFILE_FIELDS`], or already holding
    /// a list) gain `value` only if it is not present yet (case-sensitive);
    /// every other field is overwritten.
    pub fn update_profile(&mut self, key: &str, value: &str) -> String {
        let field = normalize_profile_key(key);
        let is_list = LIST_PROFILE_FIELDS.contains(&field.as_str())
            || matches!(self.user_profile.get(&field), Some(ProfileValue::List(_)));

        if is_list {
            let entry = self
                .user_profile
                .entry(field.clone())
                .or_insert_with(|| ProfileValue::List(Vec::new()));
            // A registered list field may have been persisted as a scalar.
            if let ProfileValue::Scalar(existing) = entry {
                let seed = match existing {
                    Value::Null => Vec::new(),
                    Value::String(s) if s.is_empty() => Vec::new(),
                    Value::String(s) => vec![s.clone()],
                    other => vec![other.to_string()],
                };
                *entry = ProfileValue::List(seed);
            }
            if let ProfileValue::List(items) = entry
                && !items.iter().any(|v| v == value)
            {
                items.push(value.to_string());
            }
        } else {
            self.user_profile.insert(field.clone(), ProfileValue::text(value));
        }
        field
    }

    /// Drop list entries of `key` containing `needle` (case-insensitive).
    ///
    /// Returns `false` when the field is absent or not a list.
    pub fn remove_from_profile(&mut self, key: &str, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        match self.user_profile.get_mut(key) {
            Some(ProfileValue::List(items)) => {
                items.retain(|item| !item.to_lowercase().contains(&needle));
                true
            }
            _ => false,
        }
    }

    /// Create or merge an entity and return a copy of the merged record.
    pub fn merge_entity(&mut self, name: &str, relationship: Option<&str>, attributes: &Map<String, Value>) -> Entity {
        let clean = clean_entity_name(name);
        let key = clean.to_lowercase();
        let entity = self.entities.entry(key).or_insert_with(|| Entity {
            name: clean,
            relationship: None,
            attributes: Map::new(),
        });
        if let Some(rel) = relationship.filter(|r| !r.is_empty()) {
            entity.relationship = Some(rel.to_string());
        }
        for (k, v) in attributes {
            entity.attributes.insert(k.clone(), v.clone());
        }
        entity.clone()
    }

    /// Append an event for the current turn and return its position among
    /// that turn's events.
    ///
    /// Re-logging an identical description in the same turn is a no-op that
    /// returns the original event's position.
    pub fn append_event(&mut self, description: &str, date: String) -> (TimelineEvent, usize) {
        let turn = self.system_stats.total_turns;
        let same_turn: Vec<&TimelineEvent> = self.events.iter().filter(|e| e.turn == turn).collect();
        if let Some(pos) = same_turn.iter().position(|e| e.description == description) {
            return (same_turn[pos].clone(), pos);
        }
        let ordinal = same_turn.len();
        let event = TimelineEvent {
            turn,
            description: description.to_string(),
            date,
        };
        self.events.push(event.clone());
        (event, ordinal)
    }

    pub fn save_knowledge(&mut self, topic: &str, content: &str) {
        self.knowledge_base.insert(topic.to_lowercase(), content.to_string());
    }

    pub fn increment_turn(&mut self) -> u64 {
        self.system_stats.total_turns += 1;
        self.system_stats.total_turns
    }

    /// Non-empty profile fields as `(field, rendered value)` pairs.
    pub fn profile_lines(&self) -> impl Iterator<Item = (&str, String)> {
        self.user_profile
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| (k.as_str(), v.render()))
    }

    /// Year of the most recent timeline event.
    pub fn latest_event_year(&self) -> Option<i32> {
        self.events.last().and_then(TimelineEvent::year)
    }
}
