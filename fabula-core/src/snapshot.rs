//! Snapshots: saved sessions and per-turn projections.
//!
//! Two different things share the name:
//! - [`Snapshot`] is a named, persisted deep copy of a whole session, used
//!   for save/restore. Immutable once created.
//! - [`StateSnapshot`] is a small projection (turn, scene, who knows what,
//!   relationship scalars) captured after each turn for inspection and
//!   anchor comparison. Never persisted by the core.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::character::Relationship;
use crate::error::Result;
use crate::information::VisionManager;
use crate::ports::SessionStore;
use crate::types::{CharacterId, InformationId, Scene, Timestamp};
use crate::world::SessionState;

/// A named deep copy of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Snapshot identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// When it was taken.
    pub created_at: Timestamp,
    /// Optional note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The session as it was.
    pub state: SessionState,
}

/// Listing entry for a stored snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// Snapshot identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// When it was taken.
    pub created_at: Timestamp,
    /// Optional note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Snapshot {
    /// Copy `session` into a new snapshot.
    #[must_use]
    pub fn capture(session: &SessionState, name: impl Into<String>, description: Option<String>, now: Timestamp) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            created_at: now,
            description,
            state: session.clone(),
        }
    }

    /// Listing entry.
    #[must_use]
    pub fn meta(&self) -> SnapshotMeta {
        SnapshotMeta {
            id: self.id.clone(),
            name: self.name.clone(),
            created_at: self.created_at,
            description: self.description.clone(),
        }
    }

    /// An independent copy of the saved session.
    #[must_use]
    pub fn restore(&self) -> SessionState {
        self.state.clone()
    }
}

/// Per-character part of a [`StateSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterSnapshot {
    /// Information the character could see.
    pub known_information: Vec<InformationId>,
    /// Relationship scalars toward other characters.
    pub relationships: BTreeMap<CharacterId, Relationship>,
}

/// Point-in-time projection of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Turn number.
    pub turn: u64,
    /// Scene the projection was taken in.
    pub scene_id: String,
    /// Timeline time.
    pub timestamp: Timestamp,
    /// Per-character state.
    pub characters: BTreeMap<CharacterId, CharacterSnapshot>,
}

impl StateSnapshot {
    /// Project `session` without touching it. Knowledge is read through
    /// `vision`.
    #[must_use]
    pub fn capture(session: &SessionState, scene: &Scene, vision: &VisionManager) -> Self {
        let characters = session
            .characters
            .iter()
            .map(|c| {
                (
                    c.id.clone(),
                    CharacterSnapshot {
                        known_information: vision
                            .get_filtered_vision(&c.id, &session.information)
                            .iter()
                            .map(|info| info.id)
                            .collect(),
                        relationships: c.state.relationships.clone(),
                    },
                )
            })
            .collect();
        Self {
            turn: session.world.timeline.current_turn,
            scene_id: scene.id.clone(),
            timestamp: session.world.timeline.timestamp,
            characters,
        }
    }
}

/// Take a named snapshot of `session` and store it.
///
/// # Errors
/// Propagates storage failures.
pub async fn save_named_snapshot(
    store: &dyn SessionStore,
    session: &SessionState,
    name: &str,
    description: Option<String>,
    now: Timestamp,
) -> Result<Snapshot> {
    let snapshot = Snapshot::capture(session, name, description, now);
    store.save_snapshot(&session.id, &snapshot).await?;
    info!(session = %session.id, snapshot = %snapshot.id, name, "Snapshot saved");
    Ok(snapshot)
}

/// Load a stored snapshot and hand back an independent copy of its
/// session. `None` if the snapshot does not exist.
///
/// # Errors
/// Propagates storage failures.
pub async fn restore_snapshot(
    store: &dyn SessionStore,
    session_id: &str,
    snapshot_id: &str,
) -> Result<Option<SessionState>> {
    let restored = store
        .load_snapshot(session_id, snapshot_id)
        .await?
        .map(|s| s.restore());
    if restored.is_some() {
        info!(session = session_id, snapshot = snapshot_id, "Snapshot restored");
    }
    Ok(restored)
}
