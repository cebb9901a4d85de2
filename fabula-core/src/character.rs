//! Characters: identity, personality, relationships and abilities.
//!
//! A [`Character`] is owned by the session and mutated in place by the
//! trigger engine and the [`CharacterStateService`](crate::state::CharacterStateService).
//! Every scalar is range-bound: relationship dimensions and personality
//! traits live in `[0, 1]`, abilities in `[0, 100]`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::behavior::BehaviorTendencies;
use crate::types::{CharacterId, InformationId, Timestamp};

/// Upper bound of the ability scale.
pub const ABILITY_MAX: f64 = 100.0;

// ---------------------------------------------------------------------------
// Relationship
// ---------------------------------------------------------------------------

/// The four built-in relationship dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipDimension {
    /// How much the character relies on the other.
    Trust,
    /// How much the character opposes the other.
    Hostility,
    /// Emotional closeness.
    Intimacy,
    /// Regard for the other's standing or ability.
    Respect,
}

impl RelationshipDimension {
    /// All dimensions in canonical order.
    pub const ALL: [Self; 4] = [Self::Trust, Self::Hostility, Self::Intimacy, Self::Respect];

    /// Lower-case name used in rule paths.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trust => "trust",
            Self::Hostility => "hostility",
            Self::Intimacy => "intimacy",
            Self::Respect => "respect",
        }
    }
}

impl FromStr for RelationshipDimension {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trust" => Ok(Self::Trust),
            "hostility" => Ok(Self::Hostility),
            "intimacy" => Ok(Self::Intimacy),
            "respect" => Ok(Self::Respect),
            other => Err(format!("unknown relationship dimension `{other}`")),
        }
    }
}

impl fmt::Display for RelationshipDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Addressable relationship field: a built-in dimension or a named custom
/// extension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationshipField {
    /// One of the four built-in dimensions.
    Core(RelationshipDimension),
    /// An entry in [`Relationship::custom`].
    Custom(String),
}

impl fmt::Display for RelationshipField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Core(dim) => write!(f, "{dim}"),
            Self::Custom(name) => write!(f, "custom.{name}"),
        }
    }
}

/// One character's stance toward another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Trust (0.0–1.0).
    pub trust: f64,
    /// Hostility (0.0–1.0).
    pub hostility: f64,
    /// Intimacy (0.0–1.0).
    pub intimacy: f64,
    /// Respect (0.0–1.0).
    pub respect: f64,
    /// Author-defined extra dimensions, same `[0, 1]` bound.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, f64>,
}

impl Default for Relationship {
    fn default() -> Self {
        Self {
            trust: 0.5,
            hostility: 0.0,
            intimacy: 0.0,
            respect: 0.5,
            custom: BTreeMap::new(),
        }
    }
}

impl Relationship {
    /// Create a relationship from the four built-in dimensions, clamped.
    #[must_use]
    pub fn new(trust: f64, hostility: f64, intimacy: f64, respect: f64) -> Self {
        Self {
            trust: clamp_unit(trust),
            hostility: clamp_unit(hostility),
            intimacy: clamp_unit(intimacy),
            respect: clamp_unit(respect),
            custom: BTreeMap::new(),
        }
    }

    /// Read a built-in dimension.
    #[must_use]
    pub fn dimension(&self, dim: RelationshipDimension) -> f64 {
        match dim {
            RelationshipDimension::Trust => self.trust,
            RelationshipDimension::Hostility => self.hostility,
            RelationshipDimension::Intimacy => self.intimacy,
            RelationshipDimension::Respect => self.respect,
        }
    }

    /// Write a built-in dimension, clamped to `[0, 1]`.
    pub fn set_dimension(&mut self, dim: RelationshipDimension, value: f64) {
        let value = clamp_unit(value);
        match dim {
            RelationshipDimension::Trust => self.trust = value,
            RelationshipDimension::Hostility => self.hostility = value,
            RelationshipDimension::Intimacy => self.intimacy = value,
            RelationshipDimension::Respect => self.respect = value,
        }
    }

    /// Read any field. Custom fields that were never written read as `None`.
    #[must_use]
    pub fn field(&self, field: &RelationshipField) -> Option<f64> {
        match field {
            RelationshipField::Core(dim) => Some(self.dimension(*dim)),
            RelationshipField::Custom(name) => self.custom.get(name).copied(),
        }
    }

    /// Write any field, clamped to `[0, 1]`.
    pub fn set_field(&mut self, field: &RelationshipField, value: f64) {
        match field {
            RelationshipField::Core(dim) => self.set_dimension(*dim, value),
            RelationshipField::Custom(name) => {
                self.custom.insert(name.clone(), clamp_unit(value));
            }
        }
    }
}

/// Clamp to `[0, 1]`, mapping NaN to 0.
#[must_use]
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

/// Clamp to `[0, ABILITY_MAX]`, mapping NaN to 0.
#[must_use]
pub fn clamp_ability(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, ABILITY_MAX) }
}

// ---------------------------------------------------------------------------
// Personality
// ---------------------------------------------------------------------------

/// Big-Five personality traits. Each ranges 0.0–1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BigFiveTraits {
    /// Curiosity and appetite for novelty.
    pub openness: f64,
    /// Discipline, carefulness.
    pub conscientiousness: f64,
    /// Sociability and drive.
    pub extraversion: f64,
    /// Warmth and willingness to cooperate.
    pub agreeableness: f64,
    /// Emotional instability.
    pub neuroticism: f64,
}

impl Default for BigFiveTraits {
    fn default() -> Self {
        Self {
            openness: 0.5,
            conscientiousness: 0.5,
            extraversion: 0.5,
            agreeableness: 0.5,
            neuroticism: 0.5,
        }
    }
}

/// Value scores. Each ranges 0.0–1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueScores {
    /// Commitment to allies and causes.
    pub loyalty: f64,
    /// Desire for power and advancement.
    pub ambition: f64,
    /// Adherence to a personal moral code.
    pub integrity: f64,
}

impl Default for ValueScores {
    fn default() -> Self {
        Self {
            loyalty: 0.5,
            ambition: 0.5,
            integrity: 0.5,
        }
    }
}

/// A character's personality.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Personality {
    /// Big-Five traits.
    #[serde(default)]
    pub traits: BigFiveTraits,
    /// Value scores.
    #[serde(default)]
    pub values: ValueScores,
    /// Cached tendencies; derivable from `traits` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behavior_tendencies: Option<BehaviorTendencies>,
}

// ---------------------------------------------------------------------------
// Knowledge references
// ---------------------------------------------------------------------------

/// A character's handle on one piece of information. Confidence belongs to
/// the reference, never to the shared `Information`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeRef {
    /// The information this reference points at.
    pub information_id: InformationId,
    /// When the character came to know it.
    pub acquired_at: Timestamp,
    /// How sure the character is (0.0–1.0). Absent means fully sure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl KnowledgeRef {
    /// Effective confidence, treating an absent value as 1.0.
    #[must_use]
    pub fn effective_confidence(&self) -> f64 {
        self.confidence.unwrap_or(1.0)
    }
}

// ---------------------------------------------------------------------------
// Character
// ---------------------------------------------------------------------------

/// Mutable per-character state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterState {
    /// Relationships keyed by the other character.
    #[serde(default)]
    pub relationships: BTreeMap<CharacterId, Relationship>,
    /// Abilities by name (0–100).
    #[serde(default)]
    pub abilities: BTreeMap<String, f64>,
    /// What the character knows, with per-character confidence.
    #[serde(default)]
    pub known_information: Vec<KnowledgeRef>,
    /// Current judgments keyed by topic (e.g. `"culprit" → "butler"`).
    #[serde(default)]
    pub judgments: BTreeMap<String, String>,
}

/// A character in the narrative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    /// Stable identifier.
    pub id: CharacterId,
    /// Display name.
    pub name: String,
    /// Faction, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub faction: Option<String>,
    /// Mutable state.
    #[serde(default)]
    pub state: CharacterState,
    /// Personality.
    #[serde(default)]
    pub personality: Personality,
}

impl Character {
    /// Create a character with default personality and empty state.
    #[must_use]
    pub fn new(id: impl Into<CharacterId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            faction: None,
            state: CharacterState::default(),
            personality: Personality::default(),
        }
    }

    /// Builder: set an ability, clamped to `[0, 100]`.
    #[must_use]
    pub fn with_ability(mut self, name: impl Into<String>, value: f64) -> Self {
        self.state.abilities.insert(name.into(), clamp_ability(value));
        self
    }

    /// Builder: set a relationship toward `other`.
    #[must_use]
    pub fn with_relationship(mut self, other: impl Into<CharacterId>, rel: Relationship) -> Self {
        self.state.relationships.insert(other.into(), rel);
        self
    }

    /// Builder: set the Big-Five traits.
    #[must_use]
    pub fn with_traits(mut self, traits: BigFiveTraits) -> Self {
        self.personality.traits = traits;
        self
    }

    /// Builder: set the faction.
    #[must_use]
    pub fn with_faction(mut self, faction: impl Into<String>) -> Self {
        self.faction = Some(faction.into());
        self
    }

    /// Arithmetic mean of all abilities, or `None` without abilities.
    #[must_use]
    pub fn mean_ability(&self) -> Option<f64> {
        if self.state.abilities.is_empty() {
            return None;
        }
        let sum: f64 = self.state.abilities.values().sum();
        Some(sum / self.state.abilities.len() as f64)
    }
}
