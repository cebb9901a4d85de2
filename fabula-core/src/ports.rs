//! Ports: the collaborators the engine consumes but does not implement.
//!
//! Response generation (an LLM behind a prompt builder), free-text input
//! classification and durable storage all live outside the core. The
//! orchestrator only sees these traits, so tests swap in in-process fakes.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::character::Character;
use crate::error::Result;
use crate::information::Information;
use crate::snapshot::{Snapshot, SnapshotMeta};
use crate::types::{CharacterId, Scene, Timestamp};
use crate::world::{EventRecord, SessionState};

// ---------------------------------------------------------------------------
// Response generation
// ---------------------------------------------------------------------------

/// Token accounting reported by the generator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens.
    pub prompt_tokens: u32,
    /// Completion tokens.
    pub completion_tokens: u32,
}

/// What a character said and did this turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterResponse {
    /// Who responded.
    pub character_id: CharacterId,
    /// Narrated response text.
    pub content: String,
    /// Spoken line, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialogue: Option<String>,
    /// Declared action, if any. Only actions can conflict.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Token usage, if the generator reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl CharacterResponse {
    /// A response with content only.
    #[must_use]
    pub fn new(character_id: impl Into<CharacterId>, content: impl Into<String>) -> Self {
        Self {
            character_id: character_id.into(),
            content: content.into(),
            dialogue: None,
            action: None,
            usage: None,
        }
    }

    /// Builder: declared action.
    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Builder: spoken line.
    #[must_use]
    pub fn with_dialogue(mut self, dialogue: impl Into<String>) -> Self {
        self.dialogue = Some(dialogue.into());
        self
    }

    /// Whether the response carries a non-empty action.
    #[must_use]
    pub fn has_action(&self) -> bool {
        self.action.as_deref().is_some_and(|a| !a.trim().is_empty())
    }
}

/// Everything the generator is allowed to see for one character.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// The responding character.
    pub character: Character,
    /// Current scene.
    pub scene: Scene,
    /// The character's filtered vision. Nothing else.
    pub known_information: Vec<Information>,
    /// Recent world events.
    pub recent_events: Vec<EventRecord>,
    /// Player's line or command, if any.
    pub user_input: Option<String>,
}

/// Produces a character's response (typically an LLM call).
#[async_trait]
pub trait CharacterResponseGenerator: Send + Sync {
    /// Generate one response. Timeouts and retries are the implementor's
    /// business.
    async fn generate(&self, request: GenerationRequest) -> Result<CharacterResponse>;
}

// ---------------------------------------------------------------------------
// Input parsing
// ---------------------------------------------------------------------------

/// Classified player input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParsedInput {
    /// Directs a character to act.
    Command {
        /// Character addressed.
        target_character_id: CharacterId,
        /// Requested action.
        action: String,
    },
    /// Speaks to a character.
    Dialogue {
        /// Character addressed.
        target_character_id: CharacterId,
        /// What was said.
        content: String,
    },
    /// Could not be understood.
    Invalid {
        /// Why.
        reason: String,
    },
    /// Understood but not permitted.
    Unauthorized {
        /// Why.
        reason: String,
        /// Character addressed.
        target_character_id: CharacterId,
        /// What the player tried.
        attempted_action: String,
    },
}

/// Turns free text into a [`ParsedInput`]. Permission checks happen here.
#[cfg_attr(test, mockall::automock)]
pub trait InputParser: Send + Sync {
    /// Make a character addressable by name.
    fn register_character(&mut self, id: &CharacterId, name: &str);
    /// Forget every registered character.
    fn clear(&mut self);
    /// Classify `text`.
    fn parse(&self, text: &str) -> ParsedInput;
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Durable session and snapshot storage, keyed by session id.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert or replace a session.
    async fn save_session(&self, session: &SessionState) -> Result<()>;
    /// Load a session, `None` if absent.
    async fn load_session(&self, session_id: &str) -> Result<Option<SessionState>>;
    /// Delete a session and its snapshots. Returns whether it existed.
    async fn delete_session(&self, session_id: &str) -> Result<bool>;
    /// All stored session ids, sorted.
    async fn list_sessions(&self) -> Result<Vec<String>>;
    /// Whether a session is stored.
    async fn session_exists(&self, session_id: &str) -> Result<bool>;
    /// Insert or replace a snapshot.
    async fn save_snapshot(&self, session_id: &str, snapshot: &Snapshot) -> Result<()>;
    /// Load a snapshot, `None` if absent.
    async fn load_snapshot(&self, session_id: &str, snapshot_id: &str) -> Result<Option<Snapshot>>;
    /// Snapshot summaries for a session, oldest first.
    async fn list_snapshots(&self, session_id: &str) -> Result<Vec<SnapshotMeta>>;
    /// Delete a snapshot. Returns whether it existed.
    async fn delete_snapshot(&self, session_id: &str, snapshot_id: &str) -> Result<bool>;
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Source of "now".
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> Timestamp;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug, Default)]
pub struct FixedClock(AtomicI64);

impl FixedClock {
    /// Clock stopped at `at`.
    #[must_use]
    pub fn new(at: Timestamp) -> Self {
        Self(AtomicI64::new(at.millis()))
    }

    /// Jump to `at`.
    pub fn set(&self, at: Timestamp) {
        self.0.store(at.millis(), Ordering::SeqCst);
    }

    /// Move forward by `ms`.
    pub fn advance(&self, ms: i64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.0.load(Ordering::SeqCst))
    }
}
