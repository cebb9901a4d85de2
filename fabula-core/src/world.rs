//! Session and world state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::character::Character;
use crate::information::InformationStore;
use crate::types::{CharacterId, EventId, Timestamp};

/// Position on the story timeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeline {
    /// Turn counter. Never decreases.
    pub current_turn: u64,
    /// Time of the last turn advance.
    pub timestamp: Timestamp,
}

/// One entry in the world's event chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Event identifier.
    pub event_id: EventId,
    /// Scene the event happened in.
    pub scene_id: String,
    /// Turn during which it was recorded.
    pub turn: u64,
    /// `dialogue` or `action` for turn events.
    pub event_type: String,
    /// Characters who took part.
    pub participants: Vec<CharacterId>,
    /// What happened.
    pub description: String,
    /// When it was recorded.
    pub timestamp: Timestamp,
}

/// Shared world state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldState {
    /// Active scene.
    pub current_scene_id: String,
    /// Timeline position.
    #[serde(default)]
    pub timeline: Timeline,
    /// Free-form environment values (weather, time of day, ...).
    #[serde(default)]
    pub environment: BTreeMap<String, Value>,
    /// Recorded events, oldest first.
    #[serde(default)]
    pub event_chain: Vec<EventRecord>,
    /// Plot node the story is at, used to pick an anchor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_plot_node_id: Option<String>,
}

impl WorldState {
    /// World at turn 0 in `scene_id`.
    #[must_use]
    pub fn new(scene_id: impl Into<String>) -> Self {
        Self {
            current_scene_id: scene_id.into(),
            timeline: Timeline::default(),
            environment: BTreeMap::new(),
            event_chain: Vec::new(),
            current_plot_node_id: None,
        }
    }

    /// The last `n` events, oldest first.
    #[must_use]
    pub fn recent_events(&self, n: usize) -> &[EventRecord] {
        let start = self.event_chain.len().saturating_sub(n);
        &self.event_chain[start..]
    }

    /// Advance the turn counter by exactly one.
    pub fn advance_turn(&mut self, now: Timestamp) -> u64 {
        self.timeline.current_turn += 1;
        self.timeline.timestamp = now;
        self.timeline.current_turn
    }
}

/// Session bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// When the session was created.
    pub created_at: Timestamp,
    /// Last successful turn or save.
    pub last_saved: Timestamp,
    /// Display title.
    #[serde(default)]
    pub title: String,
}

/// Everything one story session owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    /// Session identifier (storage key).
    pub id: String,
    /// Characters, in authored order.
    #[serde(default)]
    pub characters: Vec<Character>,
    /// Global ledger and visibility index.
    #[serde(default)]
    pub information: InformationStore,
    /// World and timeline.
    pub world: WorldState,
    /// Bookkeeping.
    pub metadata: SessionMetadata,
    /// The player's character, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protagonist_id: Option<CharacterId>,
}

impl SessionState {
    /// Empty session in `scene_id`.
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>, scene_id: impl Into<String>, now: Timestamp) -> Self {
        Self {
            id: id.into(),
            characters: Vec::new(),
            information: InformationStore::new(),
            world: WorldState::new(scene_id),
            metadata: SessionMetadata {
                created_at: now,
                last_saved: now,
                title: title.into(),
            },
            protagonist_id: None,
        }
    }

    /// Builder: add a character.
    #[must_use]
    pub fn with_character(mut self, character: Character) -> Self {
        self.characters.push(character);
        self
    }

    /// Look up a character.
    #[must_use]
    pub fn character(&self, id: &CharacterId) -> Option<&Character> {
        self.characters.iter().find(|c| &c.id == id)
    }

    /// Look up a character mutably.
    pub fn character_mut(&mut self, id: &CharacterId) -> Option<&mut Character> {
        self.characters.iter_mut().find(|c| &c.id == id)
    }
}
