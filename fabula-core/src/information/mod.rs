//! Information ledger and per-character visibility.
//!
//! The [`InformationStore`] holds one append-only global ledger of facts
//! plus an index of which character may see which fact. Reading a
//! character's knowledge goes through
//! [`VisionManager::get_filtered_vision`], never through `global` directly.
//!
//! - [`attribution`]: event-type driven rules deciding who learns what
//! - [`rules`]: inference, forgetting and fuzzy-decay rule tables
//! - [`vision`]: the `VisionManager` choke point

pub mod attribution;
pub mod rules;
pub mod vision;

pub use attribution::{AttributionRule, AttributionTarget, EventContext, InformationAttributionConfig};
pub use rules::{ForgetRule, FuzzyRule, InferenceRule, InformationRulesConfig};
pub use vision::{InformationDifference, VisionManager};

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::{CharacterId, InformationId, Timestamp};

/// How a piece of information came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InformationSource {
    /// Seen first-hand.
    Witnessed,
    /// Overheard.
    Heard,
    /// Told directly by another character.
    Told,
    /// Concluded from other knowledge.
    Inferred,
}

impl InformationSource {
    /// Confidence a character starts with when acquiring information this way.
    #[must_use]
    pub fn default_confidence(self) -> f64 {
        match self {
            Self::Witnessed => 1.0,
            Self::Heard => 0.9,
            Self::Told => 0.8,
            Self::Inferred => 0.7,
        }
    }
}

impl fmt::Display for InformationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Witnessed => "witnessed",
            Self::Heard => "heard",
            Self::Told => "told",
            Self::Inferred => "inferred",
        };
        f.write_str(s)
    }
}

/// A single fact in the global ledger. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Information {
    /// Unique identifier.
    pub id: InformationId,
    /// The fact in natural language.
    pub content: String,
    /// How it was obtained.
    pub source: InformationSource,
    /// When it happened.
    pub timestamp: Timestamp,
    /// Scene it happened in.
    pub scene_id: String,
    /// Classification tags used by inference and forgetting.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Key memories survive forgetting rules by default.
    #[serde(default)]
    pub is_key_memory: bool,
    /// Confidence at attribution time; per-character decay happens on the
    /// character's knowledge reference.
    pub initial_confidence: f64,
}

impl Information {
    /// Create a new information entry with a fresh ID.
    #[must_use]
    pub fn new(
        content: impl Into<String>,
        source: InformationSource,
        timestamp: Timestamp,
        scene_id: impl Into<String>,
    ) -> Self {
        Self {
            id: InformationId::new(),
            content: content.into(),
            source,
            timestamp,
            scene_id: scene_id.into(),
            tags: Vec::new(),
            is_key_memory: false,
            initial_confidence: source.default_confidence(),
        }
    }

    /// Builder: attach tags.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Builder: mark as a key memory.
    #[must_use]
    pub fn as_key_memory(mut self) -> Self {
        self.is_key_memory = true;
        self
    }

    /// Builder: override the initial confidence (clamped to `[0, 1]`).
    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.initial_confidence = crate::character::clamp_unit(confidence);
        self
    }

    /// Whether any of `tags` is attached to this information.
    #[must_use]
    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        tags.iter().any(|t| self.tags.contains(t))
    }
}

/// Global ledger plus per-character visibility index.
///
/// Invariant: every ID in `by_character` exists in `global`. `global` only
/// grows; forgetting removes IDs from `by_character` and nothing else.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InformationStore {
    /// Every piece of information ever created in the session.
    pub global: Vec<Information>,
    /// Which information each character may see.
    pub by_character: BTreeMap<CharacterId, Vec<InformationId>>,
}

impl InformationStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up information by ID.
    #[must_use]
    pub fn get(&self, id: InformationId) -> Option<&Information> {
        self.global.iter().find(|info| info.id == id)
    }

    /// Whether `id` exists in the global ledger.
    #[must_use]
    pub fn contains(&self, id: InformationId) -> bool {
        self.get(id).is_some()
    }

    /// IDs visible to `character` (empty slice if none).
    #[must_use]
    pub fn visible_ids(&self, character: &CharacterId) -> &[InformationId] {
        self.by_character.get(character).map_or(&[], Vec::as_slice)
    }

    /// Whether `character` can see `id`.
    #[must_use]
    pub fn is_visible_to(&self, character: &CharacterId, id: InformationId) -> bool {
        self.visible_ids(character).contains(&id)
    }

    /// Append to the global ledger.
    pub(crate) fn push(&mut self, info: Information) {
        self.global.push(info);
    }

    /// Link `id` to `character`. Returns `true` if a new link was created.
    /// Unknown IDs are refused so the index never points outside `global`.
    pub(crate) fn link(&mut self, character: &CharacterId, id: InformationId) -> bool {
        if !self.contains(id) {
            warn!(character = %character, information = %id, "Refusing to link unknown information");
            return false;
        }
        let ids = self.by_character.entry(character.clone()).or_default();
        if ids.contains(&id) {
            false
        } else {
            ids.push(id);
            true
        }
    }

    /// Remove the link between `character` and `id`. Returns `true` if a
    /// link existed.
    pub(crate) fn unlink(&mut self, character: &CharacterId, id: InformationId) -> bool {
        let Some(ids) = self.by_character.get_mut(character) else {
            return false;
        };
        let before = ids.len();
        ids.retain(|known| *known != id);
        ids.len() != before
    }

    /// Check the index invariant. Used by tests and debug assertions.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.by_character
            .values()
            .flatten()
            .all(|id| self.contains(*id))
    }
}
