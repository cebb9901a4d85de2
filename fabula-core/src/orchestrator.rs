//! Story orchestrator: sequences one turn.
//!
//! parse → resolve target → filtered vision → generate → (arbitrate) →
//! record event → attribute → triggers → advance turn → snapshot.
//!
//! Every failure before the event is recorded returns an [`AdvanceResult`]
//! with `success: false` and leaves the session untouched. Callers must
//! serialise turns per session; the orchestrator does no locking.

use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::character::{Character, KnowledgeRef};
use crate::conflict::{ArbitrationStrategy, ConflictArbitrator, ConflictDescription};
use crate::config::{FabulaConfig, OrchestratorConfig};
use crate::information::{EventContext, Information, VisionManager};
use crate::metrics::{CounterSnapshot, EngineCounters};
use crate::ports::{CharacterResponse, CharacterResponseGenerator, Clock, GenerationRequest, InputParser, ParsedInput, SystemClock};
use crate::snapshot::StateSnapshot;
use crate::state::CharacterStateService;
use crate::trigger::{TriggerContext, TriggerRule};
use crate::types::{CharacterId, EventId, InformationId, Scene, Timestamp};
use crate::world::{EventRecord, SessionState};

/// Why a turn did not happen.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdvanceError {
    /// The parser could not classify the input.
    #[error("invalid input: {reason}")]
    InvalidInput {
        /// Parser's explanation.
        reason: String,
    },
    /// The parser refused the input.
    #[error("unauthorized action `{attempted_action}` on {target_character_id}: {reason}")]
    Unauthorized {
        /// Parser's explanation.
        reason: String,
        /// Character addressed.
        target_character_id: CharacterId,
        /// What was attempted.
        attempted_action: String,
    },
    /// The addressed character is not in the session.
    #[error("character not found: {character_id}")]
    CharacterNotFound {
        /// Requested id.
        character_id: CharacterId,
    },
    /// A multi-character turn named nobody.
    #[error("no characters named for this turn")]
    NoCharacters,
    /// The response generator failed.
    #[error("response generation failed for {character_id}: {message}")]
    Generation {
        /// Character being generated.
        character_id: CharacterId,
        /// Generator's error.
        message: String,
    },
}

/// Outcome of a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvanceResult {
    /// Whether the turn happened.
    pub success: bool,
    /// Accepted responses, in requested character order.
    pub responses: Vec<CharacterResponse>,
    /// Failure reason when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AdvanceError>,
    /// Recorded event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<EventId>,
    /// Conflicts found among the responses.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<ConflictDescription>,
    /// Some conflict could not be arbitrated. The conflicting actions are
    /// still in `responses`; the caller decides what to do with them.
    #[serde(default)]
    pub has_deadlock: bool,
}

impl AdvanceResult {
    fn failed(error: AdvanceError) -> Self {
        Self {
            success: false,
            responses: Vec::new(),
            error: Some(error),
            event_id: None,
            conflicts: Vec::new(),
            has_deadlock: false,
        }
    }
}

/// What one evolution pass did to one character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionReport {
    /// Character.
    pub character_id: CharacterId,
    /// Information concluded by inference.
    pub inferred: Vec<Information>,
    /// Information un-linked by forgetting.
    pub forgotten: Vec<InformationId>,
    /// Knowledge references whose confidence decayed.
    pub decayed: Vec<KnowledgeRef>,
}

/// Runs turns against a session.
pub struct StoryOrchestrator {
    config: OrchestratorConfig,
    strategy: ArbitrationStrategy,
    parser: Box<dyn InputParser>,
    generator: Arc<dyn CharacterResponseGenerator>,
    clock: Arc<dyn Clock>,
    vision: VisionManager,
    state: CharacterStateService,
    arbitrator: ConflictArbitrator,
    snapshots: Vec<StateSnapshot>,
    counters: EngineCounters,
}

impl fmt::Debug for StoryOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoryOrchestrator")
            .field("config", &self.config)
            .field("strategy", &self.strategy)
            .field("snapshots", &self.snapshots.len())
            .finish_non_exhaustive()
    }
}

impl StoryOrchestrator {
    /// Orchestrator with default configuration and the system clock.
    #[must_use]
    pub fn new(parser: Box<dyn InputParser>, generator: Arc<dyn CharacterResponseGenerator>) -> Self {
        Self::from_config(&FabulaConfig::default(), parser, generator)
    }

    /// Orchestrator built from configuration.
    #[must_use]
    pub fn from_config(
        config: &FabulaConfig,
        parser: Box<dyn InputParser>,
        generator: Arc<dyn CharacterResponseGenerator>,
    ) -> Self {
        Self {
            config: config.orchestrator.clone(),
            strategy: config.arbitration.default_strategy,
            parser,
            generator,
            clock: Arc::new(SystemClock),
            vision: VisionManager::new(),
            state: CharacterStateService::new(),
            arbitrator: ConflictArbitrator::from_config(&config.arbitration),
            snapshots: Vec::new(),
            counters: EngineCounters::new(),
        }
    }

    /// Builder: replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Builder: replace the vision manager (rules, attribution).
    #[must_use]
    pub fn with_vision(mut self, vision: VisionManager) -> Self {
        self.vision = vision;
        self
    }

    /// Builder: replace the arbitrator.
    #[must_use]
    pub fn with_arbitrator(mut self, arbitrator: ConflictArbitrator) -> Self {
        self.arbitrator = arbitrator;
        self
    }

    /// Builder: arbitration strategy for multi-character turns.
    #[must_use]
    pub fn with_strategy(mut self, strategy: ArbitrationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Change the arbitration strategy.
    pub fn set_strategy(&mut self, strategy: ArbitrationStrategy) {
        self.strategy = strategy;
    }

    /// Vision manager.
    #[must_use]
    pub fn vision(&self) -> &VisionManager {
        &self.vision
    }

    /// Vision manager, mutably (to load rule tables).
    pub fn vision_mut(&mut self) -> &mut VisionManager {
        &mut self.vision
    }

    /// Character state service.
    #[must_use]
    pub fn state_service(&self) -> &CharacterStateService {
        &self.state
    }

    /// Character state service, mutably (to register listeners).
    pub fn state_service_mut(&mut self) -> &mut CharacterStateService {
        &mut self.state
    }

    /// Projections captured after each successful turn since the last
    /// [`initialize_session`](Self::initialize_session).
    #[must_use]
    pub fn snapshots(&self) -> &[StateSnapshot] {
        &self.snapshots
    }

    /// Counter values.
    #[must_use]
    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    /// Current time according to the injected clock.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Register the session's characters with the input parser and drop
    /// the in-memory snapshot and state-change history.
    pub fn initialize_session(&mut self, session: &SessionState) {
        self.parser.clear();
        for c in &session.characters {
            self.parser.register_character(&c.id, &c.name);
        }
        self.snapshots.clear();
        self.state.clear_history();
        info!(session = %session.id, characters = session.characters.len(), "Session initialized");
    }

    /// Play one player-directed turn.
    pub async fn advance(
        &mut self,
        session: &mut SessionState,
        user_input: &str,
        scene: &Scene,
        trigger_rules: &[TriggerRule],
    ) -> AdvanceResult {
        let (target, event_type, content, unauthorized) = match self.parser.parse(user_input) {
            ParsedInput::Invalid { reason } => return self.fail(AdvanceError::InvalidInput { reason }),
            ParsedInput::Command { target_character_id, action } => (target_character_id, "action", action, None),
            ParsedInput::Dialogue { target_character_id, content } => (target_character_id, "dialogue", content, None),
            ParsedInput::Unauthorized { reason, target_character_id, attempted_action } => {
                (target_character_id, "action", attempted_action, Some(reason))
            }
        };

        let Some(character) = session.character(&target).cloned() else {
            return self.fail(AdvanceError::CharacterNotFound { character_id: target });
        };

        if let Some(reason) = unauthorized {
            return self.fail(AdvanceError::Unauthorized {
                reason,
                target_character_id: target,
                attempted_action: content,
            });
        }

        let request = self.request_for(session, character, scene, Some(content));
        let response = match self.generator.generate(request).await {
            Ok(r) => r,
            Err(e) => {
                return self.fail(AdvanceError::Generation {
                    character_id: target,
                    message: e.to_string(),
                });
            }
        };

        let responses = vec![response];
        let event_id = self.record_turn(session, scene, event_type, &responses, trigger_rules);
        AdvanceResult {
            success: true,
            responses,
            error: None,
            event_id: Some(event_id),
            conflicts: Vec::new(),
            has_deadlock: false,
        }
    }

    /// Play a turn where several characters respond at once. Generation is
    /// concurrent; results keep the order of `character_ids`. Responses go
    /// through conflict arbitration before the event is recorded.
    pub async fn advance_multi_character(
        &mut self,
        session: &mut SessionState,
        character_ids: &[CharacterId],
        user_input: Option<&str>,
        scene: &Scene,
        trigger_rules: &[TriggerRule],
    ) -> AdvanceResult {
        if character_ids.is_empty() {
            return self.fail(AdvanceError::NoCharacters);
        }

        let mut requests = Vec::with_capacity(character_ids.len());
        for id in character_ids {
            let Some(character) = session.character(id).cloned() else {
                return self.fail(AdvanceError::CharacterNotFound { character_id: id.clone() });
            };
            requests.push(self.request_for(session, character, scene, user_input.map(str::to_string)));
        }

        let generator = Arc::clone(&self.generator);
        let results = join_all(requests.into_iter().map(|r| generator.generate(r))).await;

        let mut responses = Vec::with_capacity(results.len());
        for (id, result) in character_ids.iter().zip(results) {
            match result {
                Ok(r) => responses.push(r),
                Err(e) => {
                    return self.fail(AdvanceError::Generation {
                        character_id: id.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let outcome = self.arbitrator.resolve_all(responses, &session.characters, scene, self.strategy);
        EngineCounters::add(&self.counters.conflicts_detected, outcome.conflicts.len());
        EngineCounters::add(&self.counters.deadlocks, outcome.results.iter().filter(|r| r.deadlock).count());
        if outcome.has_deadlock {
            warn!(session = %session.id, "Arbitration deadlocked; conflicting actions left in place");
        }

        let event_type = if outcome.responses.iter().any(CharacterResponse::has_action) {
            "action"
        } else {
            "dialogue"
        };
        let event_id = self.record_turn(session, scene, event_type, &outcome.responses, trigger_rules);

        AdvanceResult {
            success: true,
            responses: outcome.responses,
            error: None,
            event_id: Some(event_id),
            conflicts: outcome.conflicts,
            has_deadlock: outcome.has_deadlock,
        }
    }

    /// Two-character shorthand for [`advance_multi_character`](Self::advance_multi_character).
    pub async fn advance_dual_character(
        &mut self,
        session: &mut SessionState,
        first: &CharacterId,
        second: &CharacterId,
        user_input: Option<&str>,
        scene: &Scene,
        trigger_rules: &[TriggerRule],
    ) -> AdvanceResult {
        let ids = [first.clone(), second.clone()];
        self.advance_multi_character(session, &ids, user_input, scene, trigger_rules)
            .await
    }

    /// Project the session without changing it.
    #[must_use]
    pub fn create_snapshot(&self, session: &SessionState, scene: &Scene) -> StateSnapshot {
        StateSnapshot::capture(session, scene, &self.vision)
    }

    /// Run inference, forgetting, reference sync and fuzzy decay for every
    /// character, in that order.
    pub fn evolve_information(&mut self, session: &mut SessionState, scene_id: &str) -> Vec<EvolutionReport> {
        let now = self.clock.now();
        let mut reports = Vec::with_capacity(session.characters.len());

        for character in &mut session.characters {
            let id = character.id.clone();
            let inferred = self.vision.apply_inference(&mut session.information, &id, scene_id, now);
            let forgotten = self.vision.apply_forgetting(&mut session.information, &id, now);
            self.vision.sync_known_information(&session.information, character, now);
            let decayed = self
                .vision
                .apply_fuzzy(&session.information, &id, &mut character.state.known_information, now);

            EngineCounters::add(&self.counters.inferences, inferred.len());
            EngineCounters::add(&self.counters.forgotten, forgotten.len());
            reports.push(EvolutionReport {
                character_id: id,
                inferred,
                forgotten,
                decayed,
            });
        }

        debug!(session = %session.id, characters = reports.len(), "Information evolution pass");
        reports
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn fail(&self, error: AdvanceError) -> AdvanceResult {
        EngineCounters::add(&self.counters.turns_failed, 1);
        warn!(%error, "Turn failed");
        AdvanceResult::failed(error)
    }

    fn request_for(
        &self,
        session: &SessionState,
        character: Character,
        scene: &Scene,
        user_input: Option<String>,
    ) -> GenerationRequest {
        GenerationRequest {
            known_information: self.vision.get_filtered_vision(&character.id, &session.information),
            recent_events: session.world.recent_events(self.config.recent_event_window).to_vec(),
            scene: scene.clone(),
            character,
            user_input,
        }
    }

    fn record_turn(
        &mut self,
        session: &mut SessionState,
        scene: &Scene,
        event_type: &str,
        responses: &[CharacterResponse],
        trigger_rules: &[TriggerRule],
    ) -> EventId {
        let now = self.clock.now();
        let participants: Vec<CharacterId> = responses.iter().map(|r| r.character_id.clone()).collect();
        let description = responses
            .iter()
            .map(|r| r.content.as_str())
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        let event = EventRecord {
            event_id: EventId::new(),
            scene_id: scene.id.clone(),
            turn: session.world.timeline.current_turn,
            event_type: event_type.to_string(),
            participants: participants.clone(),
            description: description.clone(),
            timestamp: now,
        };
        let event_id = event.event_id;
        session.world.event_chain.push(event);

        if self.vision.attribution().is_some() {
            let ctx = EventContext::new(event_type, scene.id.clone(), now)
                .with_present(scene.present_characters.iter().cloned())
                .with_participants(participants.iter().cloned());
            if self
                .vision
                .process_event_attribution(&mut session.information, &ctx, &description)
                .is_some()
            {
                for character in &mut session.characters {
                    self.vision.sync_known_information(&session.information, character, now);
                }
            }
        }

        if !trigger_rules.is_empty() {
            for response in responses {
                let Some(character) = session.characters.iter_mut().find(|c| c.id == response.character_id) else {
                    continue;
                };
                let mut ctx = TriggerContext::new()
                    .with_value("scene_id", scene.id.clone())
                    .with_value("content", response.content.clone());
                if let Some(action) = &response.action {
                    ctx = ctx.with_value("action", action.clone());
                }
                if let Some(protagonist) = &session.protagonist_id {
                    ctx = ctx.with_target(protagonist.clone());
                }
                self.state.process_event(character, trigger_rules, event_type, &ctx);
            }
        }

        let turn = session.world.advance_turn(now);
        session.metadata.last_saved = now;
        self.snapshots.push(StateSnapshot::capture(session, scene, &self.vision));
        EngineCounters::add(&self.counters.turns_advanced, 1);

        info!(
            session = %session.id,
            turn,
            event = %event_id,
            event_type,
            responders = participants.len(),
            "Turn advanced"
        );
        event_id
    }
}
