//! Trigger engine: event-driven mutation of relationships and abilities.
//!
//! One event at a time: filter rules by event type, filter by conditions,
//! order by priority, apply effects. Conditions are evaluated against the
//! character as it was *before* any rule of this event fired, so rule order
//! only affects effect composition, never which rules match.
//!
//! The engine holds no state and does no I/O. Identical inputs always yield
//! identical outputs.

pub mod rule;

pub use rule::{
    ChangeType, Condition, ConditionOperator, Effect, EffectTarget, FieldPath, TriggerRule, TriggerTable,
    TriggerTableConfig,
};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::character::{Character, clamp_ability, clamp_unit};
use crate::state::StateChangeRecord;
use crate::types::CharacterId;

/// Event payload visible to rule conditions as `context.<key>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerContext {
    /// The other character of a relationship effect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_character_id: Option<CharacterId>,
    /// Free-form event values.
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
}

impl TriggerContext {
    /// Empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set the relationship target.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<CharacterId>) -> Self {
        self.target_character_id = Some(target.into());
        self
    }

    /// Builder: set a value.
    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Resolve a `context.` path. `target_character_id` is addressable like
    /// any other key.
    fn resolve(&self, path: &[String]) -> Option<Value> {
        let (head, rest) = path.split_first()?;
        let root = if head == "target_character_id" {
            Value::String(self.target_character_id.as_ref()?.to_string())
        } else {
            self.values.get(head)?.clone()
        };
        walk(&root, rest).cloned()
    }
}

/// Stateless rule evaluator.
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerEngine;

impl TriggerEngine {
    /// Create an engine.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Run every rule bound to `event_type` against `character`, mutating
    /// it in place. Returns one record per applied effect, in application
    /// order.
    pub fn execute_rules(
        &self,
        character: &mut Character,
        rules: &[TriggerRule],
        event_type: &str,
        context: &TriggerContext,
    ) -> Vec<StateChangeRecord> {
        let candidates: Vec<&TriggerRule> = rules.iter().filter(|r| r.event_type == event_type).collect();
        if candidates.is_empty() {
            return Vec::new();
        }

        let needs_character = candidates
            .iter()
            .flat_map(|r| &r.conditions)
            .any(|c| matches!(c.field, FieldPath::Character(_)));
        let character_view = if needs_character {
            match serde_json::to_value(&*character) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(character = %character.id, error = %e, "Could not project character for conditions");
                    None
                }
            }
        } else {
            None
        };

        let mut matched: Vec<&TriggerRule> = candidates
            .into_iter()
            .filter(|rule| {
                rule.conditions
                    .iter()
                    .all(|c| condition_holds(c, context, character_view.as_ref()))
            })
            .collect();
        // Stable: equal priorities keep input order.
        matched.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut records = Vec::new();
        for rule in matched {
            for effect in &rule.effects {
                if let Some(record) = apply_effect(character, rule, effect, context) {
                    records.push(record);
                }
            }
        }

        if !records.is_empty() {
            debug!(
                character = %character.id,
                event_type,
                changes = records.len(),
                "Trigger rules applied"
            );
        }
        records
    }
}

fn apply_effect(
    character: &mut Character,
    rule: &TriggerRule,
    effect: &Effect,
    context: &TriggerContext,
) -> Option<StateChangeRecord> {
    match &effect.target {
        EffectTarget::Relationship(field) => {
            let Some(other) = context.target_character_id.as_ref() else {
                trace!(rule = %rule.id, "Relationship effect without target character, skipped");
                return None;
            };
            let Some(rel) = character.state.relationships.get_mut(other) else {
                trace!(rule = %rule.id, target = %other, "No relationship entry, skipped");
                return None;
            };
            let old_value = rel.field(field).unwrap_or(0.0);
            let new_value = clamp_unit(effect.apply_to(old_value));
            rel.set_field(field, new_value);
            Some(StateChangeRecord {
                character_id: character.id.clone(),
                target: effect.target.clone(),
                related_character_id: Some(other.clone()),
                old_value,
                new_value,
                rule_id: Some(rule.id.clone()),
            })
        }
        EffectTarget::Ability(name) => {
            let old_value = character.state.abilities.get(name).copied().unwrap_or(0.0);
            let new_value = clamp_ability(effect.apply_to(old_value));
            character.state.abilities.insert(name.clone(), new_value);
            Some(StateChangeRecord {
                character_id: character.id.clone(),
                target: effect.target.clone(),
                related_character_id: None,
                old_value,
                new_value,
                rule_id: Some(rule.id.clone()),
            })
        }
    }
}

fn condition_holds(condition: &Condition, context: &TriggerContext, character: Option<&Value>) -> bool {
    let lhs = match &condition.field {
        FieldPath::Context(path) => context.resolve(path),
        FieldPath::Character(path) => character.and_then(|c| walk(c, path)).cloned(),
    };
    // A missing field never matches, whatever the operator.
    let Some(lhs) = lhs else {
        return false;
    };
    compare(condition.operator, &lhs, &condition.value)
}

fn walk<'a>(root: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(root, |node, seg| match node {
        Value::Object(map) => map.get(seg),
        Value::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(op: ConditionOperator, lhs: &Value, rhs: &Value) -> bool {
    let numeric = |f: fn(f64, f64) -> bool| match (lhs.as_f64(), rhs.as_f64()) {
        (Some(x), Some(y)) => f(x, y),
        _ => false,
    };
    match op {
        ConditionOperator::Eq => values_equal(lhs, rhs),
        ConditionOperator::Ne => !values_equal(lhs, rhs),
        ConditionOperator::Gt => numeric(|x, y| x > y),
        ConditionOperator::Gte => numeric(|x, y| x >= y),
        ConditionOperator::Lt => numeric(|x, y| x < y),
        ConditionOperator::Lte => numeric(|x, y| x <= y),
        ConditionOperator::In => rhs.as_array().is_some_and(|items| items.iter().any(|v| values_equal(lhs, v))),
        ConditionOperator::NotIn => rhs.as_array().is_some_and(|items| !items.iter().any(|v| values_equal(lhs, v))),
    }
}
