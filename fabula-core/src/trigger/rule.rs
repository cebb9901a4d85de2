//! Trigger rule definitions.
//!
//! Rule files are human-edited, so targets and condition fields are dotted
//! strings (`"relationship.trust"`, `"character.state.abilities.combat"`)
//! at the configuration boundary. They are parsed exactly once, when the
//! table is loaded, into [`EffectTarget`] and [`FieldPath`]. A typo fails
//! the load instead of silently doing nothing mid-session.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::character::{RelationshipDimension, RelationshipField};
use crate::config::{self, DocumentFormat};
use crate::error::{FabulaError, Result};

// ---------------------------------------------------------------------------
// Boundary shapes (as authored)
// ---------------------------------------------------------------------------

/// A condition as written in a rule file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionConfig {
    /// Dotted field path, rooted at `context.` or `character.`.
    pub field: String,
    /// Comparison operator.
    pub operator: ConditionOperator,
    /// Right-hand side. Must be an array for `in` / `not_in`.
    pub value: Value,
}

/// An effect as written in a rule file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectConfig {
    /// `relationship.<dim>`, `relationship.custom.<name>` or `ability.<name>`.
    pub target: String,
    /// How `value` is applied.
    pub change_type: ChangeType,
    /// Operand.
    pub value: f64,
    /// Optional lower bound applied before the domain clamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Optional upper bound applied before the domain clamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

/// A trigger rule as written in a rule file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRuleConfig {
    /// Rule identifier.
    pub id: String,
    /// Event type the rule reacts to (exact match).
    pub event_type: String,
    /// Conditions that must all hold.
    #[serde(default)]
    pub conditions: Vec<ConditionConfig>,
    /// Effects applied in order.
    pub effects: Vec<EffectConfig>,
    /// Higher runs first; absent means 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

/// A trigger table document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerTableConfig {
    /// Document format version.
    #[serde(default = "default_version")]
    pub version: String,
    /// Rules in authored order.
    #[serde(default)]
    pub rules: Vec<TriggerRuleConfig>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl TriggerTableConfig {
    /// Parse every rule into its typed form.
    ///
    /// # Errors
    /// Returns [`FabulaError::InvalidRule`] for the first rule that fails.
    pub fn into_table(self) -> Result<TriggerTable> {
        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(self.rules.len());
        for raw in self.rules {
            if !seen.insert(raw.id.clone()) {
                return Err(invalid(&raw.id, "duplicate rule id"));
            }
            rules.push(TriggerRule::try_from(raw)?);
        }
        Ok(TriggerTable {
            version: self.version,
            rules,
        })
    }
}

// ---------------------------------------------------------------------------
// Typed shapes
// ---------------------------------------------------------------------------

/// Comparison operators for rule conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
    /// Member of the array operand.
    In,
    /// Not a member of the array operand.
    #[serde(alias = "notIn")]
    NotIn,
}

/// How an effect's value combines with the current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Add.
    Delta,
    /// Multiply.
    Multiply,
    /// Replace.
    Set,
}

/// Where a condition reads its left-hand side from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldPath {
    /// `context.<key>[.<nested>...]`
    Context(Vec<String>),
    /// `character.<path>...` over the serialized character.
    Character(Vec<String>),
}

impl FromStr for FieldPath {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let root = parts.next().unwrap_or_default();
        let rest: Vec<String> = parts.map(str::to_string).collect();
        if rest.is_empty() || rest.iter().any(String::is_empty) {
            return Err(format!("field path `{s}` needs a non-empty key after the root"));
        }
        match root {
            "context" => Ok(Self::Context(rest)),
            "character" => Ok(Self::Character(rest)),
            other => Err(format!("field path must start with `context.` or `character.`, got `{other}`")),
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Context(p) => write!(f, "context.{}", p.join(".")),
            Self::Character(p) => write!(f, "character.{}", p.join(".")),
        }
    }
}

/// What an effect mutates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectTarget {
    /// A relationship field toward `context.target_character_id`.
    Relationship(RelationshipField),
    /// A named ability.
    Ability(String),
}

impl FromStr for EffectTarget {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if let Some(rest) = s.strip_prefix("relationship.") {
            if let Some(name) = rest.strip_prefix("custom.") {
                if name.is_empty() {
                    return Err("custom relationship field needs a name".into());
                }
                return Ok(Self::Relationship(RelationshipField::Custom(name.to_string())));
            }
            let dim = rest.parse::<RelationshipDimension>()?;
            return Ok(Self::Relationship(RelationshipField::Core(dim)));
        }
        if let Some(name) = s.strip_prefix("ability.") {
            if name.is_empty() {
                return Err("ability target needs a name".into());
            }
            return Ok(Self::Ability(name.to_string()));
        }
        Err(format!("effect target must be `relationship.<dim>` or `ability.<name>`, got `{s}`"))
    }
}

impl fmt::Display for EffectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Relationship(field) => write!(f, "relationship.{field}"),
            Self::Ability(name) => write!(f, "ability.{name}"),
        }
    }
}

/// A parsed rule condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Left-hand side.
    pub field: FieldPath,
    /// Operator.
    pub operator: ConditionOperator,
    /// Right-hand side.
    pub value: Value,
}

impl Condition {
    /// Parse a condition from its parts.
    ///
    /// # Errors
    /// Returns a description of the problem if the path is malformed or a
    /// set operator is given a non-array operand.
    pub fn new(field: &str, operator: ConditionOperator, value: Value) -> std::result::Result<Self, String> {
        let field = field.parse::<FieldPath>()?;
        if matches!(operator, ConditionOperator::In | ConditionOperator::NotIn) && !value.is_array() {
            return Err(format!("operator {operator:?} on `{field}` needs an array operand"));
        }
        Ok(Self { field, operator, value })
    }
}

/// A parsed rule effect.
#[derive(Debug, Clone, PartialEq)]
pub struct Effect {
    /// What to change.
    pub target: EffectTarget,
    /// How to change it.
    pub change_type: ChangeType,
    /// Operand.
    pub value: f64,
    /// Effect-local lower bound.
    pub min: Option<f64>,
    /// Effect-local upper bound.
    pub max: Option<f64>,
}

impl Effect {
    /// Add `value`.
    #[must_use]
    pub fn delta(target: EffectTarget, value: f64) -> Self {
        Self { target, change_type: ChangeType::Delta, value, min: None, max: None }
    }

    /// Multiply by `value`.
    #[must_use]
    pub fn multiply(target: EffectTarget, value: f64) -> Self {
        Self { target, change_type: ChangeType::Multiply, value, min: None, max: None }
    }

    /// Replace with `value`.
    #[must_use]
    pub fn set(target: EffectTarget, value: f64) -> Self {
        Self { target, change_type: ChangeType::Set, value, min: None, max: None }
    }

    /// Builder: effect-local bounds.
    #[must_use]
    pub fn bounded(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Combine with the current value and apply the effect-local bounds.
    /// The domain clamp is the engine's job.
    #[must_use]
    pub fn apply_to(&self, current: f64) -> f64 {
        let mut next = match self.change_type {
            ChangeType::Delta => current + self.value,
            ChangeType::Multiply => current * self.value,
            ChangeType::Set => self.value,
        };
        if let Some(min) = self.min {
            next = next.max(min);
        }
        if let Some(max) = self.max {
            next = next.min(max);
        }
        next
    }
}

/// A parsed trigger rule.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerRule {
    /// Rule identifier.
    pub id: String,
    /// Event type the rule reacts to.
    pub event_type: String,
    /// Conditions that must all hold.
    pub conditions: Vec<Condition>,
    /// Effects applied in declared order.
    pub effects: Vec<Effect>,
    /// Higher runs first.
    pub priority: i32,
}

impl TriggerRule {
    /// A rule with no conditions and no effects.
    #[must_use]
    pub fn new(id: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            event_type: event_type.into(),
            conditions: Vec::new(),
            effects: Vec::new(),
            priority: 0,
        }
    }

    /// Builder: priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Builder: append a condition.
    #[must_use]
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Builder: append an effect.
    #[must_use]
    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

impl TryFrom<TriggerRuleConfig> for TriggerRule {
    type Error = FabulaError;

    fn try_from(raw: TriggerRuleConfig) -> Result<Self> {
        if raw.id.trim().is_empty() {
            return Err(invalid(&raw.id, "rule id is empty"));
        }
        if raw.event_type.trim().is_empty() {
            return Err(invalid(&raw.id, "event_type is empty"));
        }
        if raw.effects.is_empty() {
            return Err(invalid(&raw.id, "rule has no effects"));
        }

        let conditions = raw
            .conditions
            .into_iter()
            .map(|c| Condition::new(&c.field, c.operator, c.value).map_err(|e| invalid(&raw.id, e)))
            .collect::<Result<Vec<_>>>()?;

        let mut effects = Vec::with_capacity(raw.effects.len());
        for e in raw.effects {
            let target = e.target.parse::<EffectTarget>().map_err(|err| invalid(&raw.id, err))?;
            let finite = |v: Option<f64>| v.is_none_or(f64::is_finite);
            if !e.value.is_finite() || !finite(e.min) || !finite(e.max) {
                return Err(invalid(&raw.id, format!("effect on `{target}` has a non-finite number")));
            }
            if let (Some(min), Some(max)) = (e.min, e.max) {
                if min > max {
                    return Err(invalid(&raw.id, format!("effect on `{target}` has min > max")));
                }
            }
            effects.push(Effect {
                target,
                change_type: e.change_type,
                value: e.value,
                min: e.min,
                max: e.max,
            });
        }

        Ok(Self {
            id: raw.id,
            event_type: raw.event_type,
            conditions,
            effects,
            priority: raw.priority.unwrap_or(0),
        })
    }
}

/// A loaded, validated trigger table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriggerTable {
    /// Document format version.
    pub version: String,
    /// Rules in authored order.
    pub rules: Vec<TriggerRule>,
}

impl TriggerTable {
    /// Parse and validate from a JSON string.
    ///
    /// # Errors
    /// Returns [`FabulaError::Config`] for malformed JSON and
    /// [`FabulaError::InvalidRule`] for invalid rules.
    pub fn from_json(text: &str) -> Result<Self> {
        config::parse_document::<TriggerTableConfig>(text, DocumentFormat::Json)?.into_table()
    }

    /// Parse and validate from a TOML string.
    ///
    /// # Errors
    /// Same as [`Self::from_json`].
    pub fn from_toml(text: &str) -> Result<Self> {
        config::parse_document::<TriggerTableConfig>(text, DocumentFormat::Toml)?.into_table()
    }

    /// Load from a `.json` or `.toml` file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        config::read_document::<TriggerTableConfig>(path)?.into_table()
    }
}

fn invalid(rule_id: &str, reason: impl Into<String>) -> FabulaError {
    FabulaError::InvalidRule {
        rule_id: rule_id.to_string(),
        reason: reason.into(),
    }
}
