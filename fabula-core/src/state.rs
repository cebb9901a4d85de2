//! Character state service: the façade the orchestrator talks to.
//!
//! Wraps the [`TriggerEngine`] and the behavior derivation, owns the change
//! history, and notifies listeners synchronously, in the same call as the
//! mutation.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::behavior::{BehaviorTendencies, ensure_behavior_tendencies};
use crate::character::{Character, Relationship, RelationshipDimension, RelationshipField};
use crate::trigger::{EffectTarget, TriggerContext, TriggerEngine, TriggerRule};
use crate::types::CharacterId;

/// One scalar change to a character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChangeRecord {
    /// Character whose state changed.
    pub character_id: CharacterId,
    /// Field that changed.
    pub target: EffectTarget,
    /// Other side of a relationship change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_character_id: Option<CharacterId>,
    /// Value before.
    pub old_value: f64,
    /// Value after clamping.
    pub new_value: f64,
    /// Trigger rule responsible, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
}

/// Partial relationship update. `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipPatch {
    /// New trust.
    #[serde(default)]
    pub trust: Option<f64>,
    /// New hostility.
    #[serde(default)]
    pub hostility: Option<f64>,
    /// New intimacy.
    #[serde(default)]
    pub intimacy: Option<f64>,
    /// New respect.
    #[serde(default)]
    pub respect: Option<f64>,
    /// Custom fields to write.
    #[serde(default)]
    pub custom: BTreeMap<String, f64>,
}

impl RelationshipPatch {
    fn fields(&self) -> Vec<(RelationshipField, f64)> {
        let core = [
            (RelationshipDimension::Trust, self.trust),
            (RelationshipDimension::Hostility, self.hostility),
            (RelationshipDimension::Intimacy, self.intimacy),
            (RelationshipDimension::Respect, self.respect),
        ];
        core.into_iter()
            .filter_map(|(dim, v)| v.map(|v| (RelationshipField::Core(dim), v)))
            .chain(self.custom.iter().map(|(k, v)| (RelationshipField::Custom(k.clone()), *v)))
            .collect()
    }
}

/// Handle returned by [`CharacterStateService::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Callback invoked once per recorded change.
pub type StateChangeListener = Box<dyn Fn(&StateChangeRecord) + Send + Sync>;

/// Relationship reads/writes, event processing and change notification.
#[derive(Default)]
pub struct CharacterStateService {
    trigger: TriggerEngine,
    history: Vec<StateChangeRecord>,
    listeners: Vec<(ListenerId, StateChangeListener)>,
    next_listener: u64,
}

impl fmt::Debug for CharacterStateService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CharacterStateService")
            .field("history", &self.history.len())
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl CharacterStateService {
    /// Create a service with no history and no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The character's relationship toward `other`, created with neutral
    /// defaults on first access.
    pub fn get_relationship(&self, character: &mut Character, other: &CharacterId) -> Relationship {
        character
            .state
            .relationships
            .entry(other.clone())
            .or_default()
            .clone()
    }

    /// Merge `patch` into the relationship toward `other` (creating it if
    /// needed), record each written field and notify listeners.
    pub fn update_relationship(
        &mut self,
        character: &mut Character,
        other: &CharacterId,
        patch: &RelationshipPatch,
    ) -> Vec<StateChangeRecord> {
        let rel = character.state.relationships.entry(other.clone()).or_default();
        let mut records = Vec::new();
        for (field, value) in patch.fields() {
            let old_value = rel.field(&field).unwrap_or(0.0);
            rel.set_field(&field, value);
            let new_value = rel.field(&field).unwrap_or(0.0);
            records.push(StateChangeRecord {
                character_id: character.id.clone(),
                target: EffectTarget::Relationship(field),
                related_character_id: Some(other.clone()),
                old_value,
                new_value,
                rule_id: None,
            });
        }
        self.commit(&records);
        records
    }

    /// Run trigger rules for an event against `character`.
    pub fn process_event(
        &mut self,
        character: &mut Character,
        rules: &[TriggerRule],
        event_type: &str,
        context: &TriggerContext,
    ) -> Vec<StateChangeRecord> {
        let records = self.trigger.execute_rules(character, rules, event_type, context);
        self.commit(&records);
        records
    }

    /// Cached or derived behavior tendencies. Never mutates the character.
    #[must_use]
    pub fn get_behavior_tendencies(&self, character: &Character) -> BehaviorTendencies {
        ensure_behavior_tendencies(character)
    }

    /// Register a change listener.
    pub fn add_listener<F>(&mut self, listener: F) -> ListenerId
    where
        F: Fn(&StateChangeRecord) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Unregister a listener. Returns `false` if it was not registered.
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    /// Every change recorded so far, oldest first.
    #[must_use]
    pub fn history(&self) -> &[StateChangeRecord] {
        &self.history
    }

    /// Changes to one character, oldest first.
    #[must_use]
    pub fn history_for(&self, character_id: &CharacterId) -> Vec<&StateChangeRecord> {
        self.history.iter().filter(|r| &r.character_id == character_id).collect()
    }

    /// Drop the recorded history. Listeners stay registered.
    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    fn commit(&mut self, records: &[StateChangeRecord]) {
        if records.is_empty() {
            return;
        }
        for record in records {
            for (_, listener) in &self.listeners {
                listener(record);
            }
        }
        self.history.extend_from_slice(records);
        debug!(changes = records.len(), total = self.history.len(), "State changes recorded");
    }
}
