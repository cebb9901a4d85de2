//! Attribution: deciding which characters learn about an event.
//!
//! An [`InformationAttributionConfig`] maps event types to an attribution
//! target (participants, witnesses, a named list, or everyone present) and
//! the way the information is acquired. Rules are sorted by priority once,
//! at load time; the first rule matching an event type wins.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::InformationSource;
use crate::config::{self, DocumentFormat};
use crate::error::{FabulaError, Result};
use crate::types::{CharacterId, Timestamp};

/// Who an attribution rule hands the information to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionTarget {
    /// The characters taking part in the event.
    Participants,
    /// Present characters watching but not taking part.
    Witnesses,
    /// The rule's explicit `specific_characters` list.
    Specific,
    /// Everyone present in the scene.
    AllPresent,
}

/// One attribution rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionRule {
    /// Event type this rule applies to (exact match).
    pub event_type: String,
    /// Who receives the information.
    pub attribution_target: AttributionTarget,
    /// How they acquire it. Only witnessed, heard and told are meaningful.
    #[serde(default = "default_source")]
    pub source: InformationSource,
    /// Higher priority rules are tried first.
    #[serde(default)]
    pub priority: i32,
    /// Recipients for [`AttributionTarget::Specific`].
    #[serde(default)]
    pub specific_characters: Vec<CharacterId>,
    /// Tags added to the created information.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Mark the created information as a key memory.
    #[serde(default)]
    pub is_key_memory: bool,
}

fn default_source() -> InformationSource {
    InformationSource::Witnessed
}

/// Attribution rule table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InformationAttributionConfig {
    /// Document format version.
    #[serde(default = "default_version")]
    pub version: String,
    /// Rules, sorted by priority (descending) after loading.
    #[serde(default)]
    pub rules: Vec<AttributionRule>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl InformationAttributionConfig {
    /// Build from already-constructed rules, validating and sorting them.
    ///
    /// # Errors
    /// Returns [`FabulaError::InvalidAttribution`] for the first bad rule.
    pub fn new(rules: Vec<AttributionRule>) -> Result<Self> {
        Self {
            version: default_version(),
            rules,
        }
        .prepared()
    }

    /// Parse, validate and sort from a JSON string.
    ///
    /// # Errors
    /// Returns [`FabulaError::Config`] for malformed JSON and
    /// [`FabulaError::InvalidAttribution`] for invalid rules.
    pub fn from_json(text: &str) -> Result<Self> {
        config::parse_document::<Self>(text, DocumentFormat::Json)?.prepared()
    }

    /// Parse, validate and sort from a TOML string.
    ///
    /// # Errors
    /// Same as [`Self::from_json`].
    pub fn from_toml(text: &str) -> Result<Self> {
        config::parse_document::<Self>(text, DocumentFormat::Toml)?.prepared()
    }

    /// Load from a `.json` or `.toml` file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        config::read_document::<Self>(path)?.prepared()
    }

    fn prepared(mut self) -> Result<Self> {
        self.validate()?;
        // Stable: equal priorities keep their authored order.
        self.rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(self)
    }

    /// Check every rule's shape.
    ///
    /// # Errors
    /// Returns [`FabulaError::InvalidAttribution`] for the first bad rule.
    pub fn validate(&self) -> Result<()> {
        for rule in &self.rules {
            let fail = |reason: &str| FabulaError::InvalidAttribution {
                event_type: rule.event_type.clone(),
                reason: reason.to_string(),
            };
            if rule.event_type.trim().is_empty() {
                return Err(fail("event_type is empty"));
            }
            if rule.source == InformationSource::Inferred {
                return Err(fail("attribution cannot create inferred information"));
            }
            if rule.attribution_target == AttributionTarget::Specific && rule.specific_characters.is_empty() {
                return Err(fail("`specific` target requires specific_characters"));
            }
        }
        Ok(())
    }

    /// Highest-priority rule for `event_type`.
    #[must_use]
    pub fn rule_for(&self, event_type: &str) -> Option<&AttributionRule> {
        self.rules.iter().find(|r| r.event_type == event_type)
    }
}

/// Everything the vision manager needs to know about an event in order to
/// attribute information about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventContext {
    /// Event type (e.g. `dialogue`, `action`, `murder`).
    pub event_type: String,
    /// Scene the event happened in.
    pub scene_id: String,
    /// When it happened.
    pub timestamp: Timestamp,
    /// Everyone present in the scene.
    #[serde(default)]
    pub present_characters: Vec<CharacterId>,
    /// Characters actively involved.
    #[serde(default)]
    pub participants: Vec<CharacterId>,
    /// Explicit witnesses; when absent, present minus participants.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub witnesses: Option<Vec<CharacterId>>,
    /// Whoever caused or reported the event (teller for `told`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<CharacterId>,
    /// Tags attached to every information created for this event.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Whether information about this event is a key memory.
    #[serde(default)]
    pub is_key_memory: bool,
}

impl EventContext {
    /// Create a context with nobody present.
    #[must_use]
    pub fn new(event_type: impl Into<String>, scene_id: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            event_type: event_type.into(),
            scene_id: scene_id.into(),
            timestamp,
            present_characters: Vec::new(),
            participants: Vec::new(),
            witnesses: None,
            actor_id: None,
            tags: Vec::new(),
            is_key_memory: false,
        }
    }

    /// Builder: set the present characters.
    #[must_use]
    pub fn with_present(mut self, present: impl IntoIterator<Item = CharacterId>) -> Self {
        self.present_characters = present.into_iter().collect();
        self
    }

    /// Builder: set the participants.
    #[must_use]
    pub fn with_participants(mut self, participants: impl IntoIterator<Item = CharacterId>) -> Self {
        self.participants = participants.into_iter().collect();
        self
    }

    /// Builder: set explicit witnesses.
    #[must_use]
    pub fn with_witnesses(mut self, witnesses: impl IntoIterator<Item = CharacterId>) -> Self {
        self.witnesses = Some(witnesses.into_iter().collect());
        self
    }

    /// Builder: set the actor.
    #[must_use]
    pub fn with_actor(mut self, actor: CharacterId) -> Self {
        self.actor_id = Some(actor);
        self
    }

    /// Builder: set tags.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Builder: mark as key memory.
    #[must_use]
    pub fn as_key_memory(mut self) -> Self {
        self.is_key_memory = true;
        self
    }

    /// Witnesses, falling back to present characters who are not
    /// participants.
    #[must_use]
    pub fn resolved_witnesses(&self) -> Vec<CharacterId> {
        match &self.witnesses {
            Some(w) => w.clone(),
            None => self
                .present_characters
                .iter()
                .filter(|c| !self.participants.contains(c))
                .cloned()
                .collect(),
        }
    }

    /// Resolve a rule's attribution target to concrete IDs, deduplicated in
    /// first-seen order.
    #[must_use]
    pub fn resolve_target(&self, rule: &AttributionRule) -> Vec<CharacterId> {
        let raw = match rule.attribution_target {
            AttributionTarget::Participants => self.participants.clone(),
            AttributionTarget::Witnesses => self.resolved_witnesses(),
            AttributionTarget::Specific => rule.specific_characters.clone(),
            AttributionTarget::AllPresent => self.present_characters.clone(),
        };
        dedup_ids(raw)
    }
}

/// Remove duplicate IDs, keeping the first occurrence.
pub(crate) fn dedup_ids(ids: Vec<CharacterId>) -> Vec<CharacterId> {
    let mut out: Vec<CharacterId> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}
