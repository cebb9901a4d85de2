//! Integration tests: end-to-end narrative flows.
//!
//! Covers the information/vision scenarios, trigger clamping, conflict
//! arbitration and the full turn pipeline against scripted collaborators,
//! plus snapshot save/restore through the SQLite store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use fabula_core::anchor::{AnchorEvaluator, AnchorSet, Assessment, CompareOptions};
use fabula_core::character::{Character, Relationship};
use fabula_core::config::{FabulaConfig, PersistenceConfig};
use fabula_core::conflict::{ArbitrationStrategy, ConflictArbitrator, ConflictKind};
use fabula_core::error::{FabulaError, Result};
use fabula_core::information::{
    EventContext, Information, InformationAttributionConfig, InformationRulesConfig, InformationSource,
    InformationStore, VisionManager,
};
use fabula_core::orchestrator::{AdvanceError, StoryOrchestrator};
use fabula_core::persistence::SqliteSessionStore;
use fabula_core::ports::{
    CharacterResponse, CharacterResponseGenerator, FixedClock, GenerationRequest, InputParser, ParsedInput,
    SessionStore,
};
use fabula_core::snapshot::{restore_snapshot, save_named_snapshot};
use fabula_core::state::CharacterStateService;
use fabula_core::trigger::{TriggerContext, TriggerTable};
use fabula_core::types::{CharacterId, Scene, Timestamp};
use fabula_core::world::SessionState;

const NOW: Timestamp = Timestamp(1_000_000);

fn id(s: &str) -> CharacterId {
    CharacterId::from(s)
}

// ---------------------------------------------------------------------------
// Scripted collaborators
// ---------------------------------------------------------------------------

/// `Name: text` is dialogue, `Name! text` is a command. Commands starting
/// with "kill" are refused. Unknown names pass through as raw ids.
#[derive(Default)]
struct ScriptedParser {
    names: HashMap<String, CharacterId>,
}

impl InputParser for ScriptedParser {
    fn register_character(&mut self, id: &CharacterId, name: &str) {
        self.names.insert(name.to_lowercase(), id.clone());
    }

    fn clear(&mut self) {
        self.names.clear();
    }

    fn parse(&self, text: &str) -> ParsedInput {
        let resolve = |name: &str| {
            let name = name.trim().to_lowercase();
            self.names.get(&name).cloned().unwrap_or_else(|| CharacterId::from(name))
        };
        if let Some((name, content)) = text.split_once(':') {
            return ParsedInput::Dialogue {
                target_character_id: resolve(name),
                content: content.trim().to_string(),
            };
        }
        if let Some((name, action)) = text.split_once('!') {
            let action = action.trim().to_string();
            if action.starts_with("kill") {
                return ParsedInput::Unauthorized {
                    reason: "violence is not allowed".into(),
                    target_character_id: resolve(name),
                    attempted_action: action,
                };
            }
            return ParsedInput::Command {
                target_character_id: resolve(name),
                action,
            };
        }
        ParsedInput::Invalid {
            reason: format!("cannot parse `{text}`"),
        }
    }
}

/// Replies with a fixed action per character after a per-character delay,
/// and records every request it receives.
#[derive(Default)]
struct ScriptedGenerator {
    actions: HashMap<CharacterId, String>,
    delays_ms: HashMap<CharacterId, u64>,
    failing: HashSet<CharacterId>,
    seen: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    fn with_action(mut self, who: &str, action: &str) -> Self {
        self.actions.insert(id(who), action.to_string());
        self
    }

    fn with_delay(mut self, who: &str, ms: u64) -> Self {
        self.delays_ms.insert(id(who), ms);
        self
    }

    fn failing_for(mut self, who: &str) -> Self {
        self.failing.insert(id(who));
        self
    }
}

#[async_trait]
impl CharacterResponseGenerator for ScriptedGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<CharacterResponse> {
        let who = request.character.id.clone();
        if let Some(ms) = self.delays_ms.get(&who) {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
        }
        self.seen.lock().push(request.clone());
        if self.failing.contains(&who) {
            return Err(FabulaError::Generation("upstream timeout".into()));
        }
        Ok(match self.actions.get(&who) {
            Some(action) => CharacterResponse::new(who, action.clone()).with_action(action.clone()),
            None => CharacterResponse::new(who, format!("{} nods.", request.character.name))
                .with_dialogue(format!("{} nods.", request.character.name)),
        })
    }
}

fn session() -> SessionState {
    SessionState::new("session-1", "The Hill", "hill", Timestamp(0))
        .with_character(Character::new("alice", "Alice").with_ability("combat", 20.0))
        .with_character(Character::new("bob", "Bob").with_ability("combat", 80.0))
        .with_character(Character::new("carol", "Carol"))
}

fn hill() -> Scene {
    Scene::new("hill", "The Hill").with_present([id("alice"), id("bob")])
}

fn orchestrator(generator: Arc<ScriptedGenerator>) -> StoryOrchestrator {
    StoryOrchestrator::new(Box::new(ScriptedParser::default()), generator)
        .with_clock(Arc::new(FixedClock::new(NOW)))
}

// ---------------------------------------------------------------------------
// Scenario 1: witnessed information stays with those present
// ---------------------------------------------------------------------------

#[test]
fn witnessed_event_is_invisible_to_absent_characters() {
    let vision = VisionManager::new();
    let mut store = InformationStore::new();
    let ctx = EventContext::new("observation", "study", NOW).with_present([id("alice")]);

    let info = vision.witness_event(&mut store, &ctx, "The letter was burned");

    let alice = vision.get_filtered_vision(&id("alice"), &store);
    assert_eq!(alice.len(), 1);
    assert_eq!(alice[0].source, InformationSource::Witnessed);
    let bob = vision.get_filtered_vision(&id("bob"), &store);
    assert_eq!(bob.iter().filter(|i| i.id == info.id).count(), 0);
    assert!(bob.is_empty());
    assert!(store.is_consistent());
}

// ---------------------------------------------------------------------------
// Scenario 2: inference fires once
// ---------------------------------------------------------------------------

#[test]
fn inference_fires_exactly_once() {
    let rules = InformationRulesConfig::from_json(
        r#"{"inference_rules": [{
            "id": "vault",
            "premise_tags": ["secret", "location"],
            "conclusion_template": "The vault lies beneath the chapel"
        }]}"#,
    )
    .expect("valid rules");
    let vision = VisionManager::new().with_rules(rules);
    let mut store = InformationStore::new();
    let alice = id("alice");

    for (content, tag) in [("The abbot hides something", "secret"), ("The chapel has a crypt", "location")] {
        let info = vision.add_global_information(
            &mut store,
            Information::new(content, InformationSource::Told, NOW, "abbey").with_tags([tag]),
        );
        vision.assign_information_to_character(&mut store, &alice, info.id);
    }

    let first = vision.apply_inference(&mut store, &alice, "abbey", NOW);
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].source, InformationSource::Inferred);
    assert_eq!(first[0].content, "The vault lies beneath the chapel");

    let second = vision.apply_inference(&mut store, &alice, "abbey", NOW);
    assert!(second.is_empty());
    assert_eq!(vision.get_filtered_vision(&alice, &store).len(), 3);
}

// ---------------------------------------------------------------------------
// Scenario 3: priority arbitration of exclusive actions
// ---------------------------------------------------------------------------

#[test]
fn priority_arbitration_favours_stronger_character() {
    let characters = vec![
        Character::new("weak", "Weak").with_ability("combat", 20.0),
        Character::new("strong", "Strong").with_ability("combat", 80.0),
    ];
    let responses = vec![
        CharacterResponse::new("weak", "占领高地").with_action("占领高地"),
        CharacterResponse::new("strong", "控制高地").with_action("控制高地"),
    ];
    let mut arbitrator = ConflictArbitrator::default();

    let conflicts = arbitrator.detect_conflicts(&responses, &characters);
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].kind, ConflictKind::Action);

    let outcome = arbitrator.resolve_all(responses, &characters, &Scene::new("hill", "Hill"), ArbitrationStrategy::Priority);
    assert_eq!(outcome.results[0].winner, Some(id("strong")));
    assert_eq!(outcome.responses[0].action, None);
    assert_eq!(outcome.responses[1].action.as_deref(), Some("控制高地"));
    assert!(!outcome.has_deadlock);
}

// ---------------------------------------------------------------------------
// Scenario 4: forgetting by age
// ---------------------------------------------------------------------------

#[test]
fn forgetting_drops_only_old_information() {
    let rules = InformationRulesConfig::from_json(r#"{"forget_rules": [{"id": "short", "max_age_ms": 5000}]}"#)
        .expect("valid rules");
    let vision = VisionManager::new().with_rules(rules);
    let mut store = InformationStore::new();
    let alice = id("alice");

    let old = vision.add_global_information(
        &mut store,
        Information::new("old news", InformationSource::Heard, NOW.offset(-10_000), "market"),
    );
    let fresh = vision.add_global_information(
        &mut store,
        Information::new("fresh news", InformationSource::Heard, NOW.offset(-1_000), "market"),
    );
    vision.assign_information_to_characters(&mut store, &[alice.clone()], old.id);
    vision.assign_information_to_characters(&mut store, &[alice.clone()], fresh.id);

    let removed = vision.apply_forgetting(&mut store, &alice, NOW);
    assert_eq!(removed, vec![old.id]);
    assert!(store.is_visible_to(&alice, fresh.id));
    assert!(store.get(old.id).is_some(), "forgetting never deletes from the ledger");
}

// ---------------------------------------------------------------------------
// Scenario 5: trigger effects clamp
// ---------------------------------------------------------------------------

#[test]
fn trust_delta_clamps_to_one() {
    let table = TriggerTable::from_json(
        r#"{"rules": [{
            "id": "kindness",
            "event_type": "gift",
            "effects": [{"target": "relationship.trust", "change_type": "delta", "value": 0.2}]
        }]}"#,
    )
    .expect("valid table");
    let mut alice = Character::new("alice", "Alice").with_relationship("bob", Relationship::new(0.95, 0.0, 0.0, 0.5));
    let mut service = CharacterStateService::new();

    let records = service.process_event(
        &mut alice,
        &table.rules,
        "gift",
        &TriggerContext::new().with_target("bob"),
    );

    assert_eq!(records.len(), 1);
    assert!((alice.state.relationships[&id("bob")].trust - 1.0).abs() < f64::EPSILON);
    assert_eq!(service.history().len(), 1);
}

// ---------------------------------------------------------------------------
// Turn pipeline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dialogue_turn_sees_only_own_vision() {
    let mut s = session();
    let vision = VisionManager::new();
    let ctx = EventContext::new("observation", "hill", NOW).with_present([id("bob")]);
    vision.witness_event(&mut s.information, &ctx, "Bob saw the signal fire");

    let generator = Arc::new(ScriptedGenerator::default());
    let mut orch = orchestrator(Arc::clone(&generator));
    orch.initialize_session(&s);

    let result = orch.advance(&mut s, "Alice: what did you see?", &hill(), &[]).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.responses.len(), 1);
    assert_eq!(result.responses[0].character_id, id("alice"));
    let seen = generator.seen.lock();
    assert!(seen[0].known_information.is_empty());
    assert_eq!(seen[0].user_input.as_deref(), Some("what did you see?"));
    assert_eq!(s.world.timeline.current_turn, 1);
    assert_eq!(s.world.event_chain[0].participants, vec![id("alice")]);
}

#[tokio::test]
async fn failed_turns_leave_session_untouched() {
    let mut s = session();
    let generator = Arc::new(ScriptedGenerator::default().failing_for("carol"));
    let mut orch = orchestrator(generator);
    orch.initialize_session(&s);
    let before = s.clone();

    let invalid = orch.advance(&mut s, "mumble", &hill(), &[]).await;
    assert!(matches!(invalid.error, Some(AdvanceError::InvalidInput { .. })));

    let missing = orch.advance(&mut s, "Zed: hello", &hill(), &[]).await;
    assert!(matches!(missing.error, Some(AdvanceError::CharacterNotFound { .. })));

    let refused = orch.advance(&mut s, "Bob! kill Alice", &hill(), &[]).await;
    assert!(matches!(refused.error, Some(AdvanceError::Unauthorized { .. })));

    let broken = orch.advance(&mut s, "Carol: hi", &hill(), &[]).await;
    assert!(matches!(broken.error, Some(AdvanceError::Generation { .. })));

    assert_eq!(s, before);
    assert_eq!(orch.counters().turns_failed, 4);
    assert!(orch.snapshots().is_empty());
}

#[tokio::test]
async fn triggers_run_against_the_protagonist() {
    let mut s = session();
    s.protagonist_id = Some(id("bob"));
    if let Some(alice) = s.character_mut(&id("alice")) {
        alice.state.relationships.insert(id("bob"), Relationship::default());
    }
    let table = TriggerTable::from_json(
        r#"{"rules": [
            {"id": "talked", "event_type": "dialogue",
             "effects": [{"target": "relationship.intimacy", "change_type": "delta", "value": 0.1}]},
            {"id": "drilled", "event_type": "action",
             "effects": [{"target": "ability.combat", "change_type": "delta", "value": 5}]}
        ]}"#,
    )
    .expect("valid table");

    let mut orch = orchestrator(Arc::new(ScriptedGenerator::default()));
    orch.initialize_session(&s);
    let result = orch.advance(&mut s, "Alice: how are you?", &hill(), &table.rules).await;
    assert!(result.success);

    let alice = s.character(&id("alice")).expect("alice");
    assert!((alice.state.relationships[&id("bob")].intimacy - 0.1).abs() < 1e-9);
    assert!((alice.state.abilities["combat"] - 20.0).abs() < f64::EPSILON);
    assert_eq!(orch.state_service().history_for(&id("alice")).len(), 1);
}

#[tokio::test]
async fn attribution_links_turn_to_present_characters() {
    let mut s = session();
    let attribution = InformationAttributionConfig::from_json(
        r#"{"rules": [{"event_type": "dialogue", "attribution_target": "all_present", "tags": ["conversation"]}]}"#,
    )
    .expect("valid attribution");

    let mut orch = orchestrator(Arc::new(ScriptedGenerator::default()))
        .with_vision(VisionManager::new().with_attribution(attribution));
    orch.initialize_session(&s);
    let result = orch.advance(&mut s, "Alice: shall we go?", &hill(), &[]).await;
    assert!(result.success);

    let vision = orch.vision();
    assert_eq!(vision.get_filtered_vision(&id("alice"), &s.information).len(), 1);
    assert_eq!(vision.get_filtered_vision(&id("bob"), &s.information).len(), 1);
    assert!(vision.get_filtered_vision(&id("carol"), &s.information).is_empty());

    let bob = s.character(&id("bob")).expect("bob");
    assert_eq!(bob.state.known_information.len(), 1);
    assert_eq!(bob.state.known_information[0].acquired_at, NOW);
}

#[tokio::test]
async fn multi_character_turn_keeps_order_and_arbitrates() {
    let mut s = session();
    let generator = Arc::new(
        ScriptedGenerator::default()
            .with_action("alice", "占领高地")
            .with_action("bob", "控制高地")
            .with_delay("alice", 30)
            .with_delay("bob", 1),
    );
    let mut orch = orchestrator(generator);
    orch.initialize_session(&s);

    let result = orch
        .advance_dual_character(&mut s, &id("alice"), &id("bob"), Some("Dawn breaks."), &hill(), &[])
        .await;

    assert!(result.success);
    let order: Vec<_> = result.responses.iter().map(|r| r.character_id.clone()).collect();
    assert_eq!(order, vec![id("alice"), id("bob")]);
    assert_eq!(result.conflicts.len(), 1);
    assert_eq!(result.responses[0].action, None);
    assert_eq!(result.responses[1].action.as_deref(), Some("控制高地"));
    assert!(!result.has_deadlock);
    assert_eq!(s.world.event_chain.len(), 1);
    assert_eq!(s.world.event_chain[0].participants, order);
    assert_eq!(s.world.event_chain[0].event_type, "action");
    assert_eq!(orch.counters().conflicts_detected, 1);
}

#[tokio::test]
async fn compromise_keeps_both_actions_weakened() {
    let mut s = session();
    let generator = Arc::new(
        ScriptedGenerator::default()
            .with_action("alice", "attack the gate")
            .with_action("bob", "block the gate"),
    );
    let mut orch = orchestrator(generator).with_strategy(ArbitrationStrategy::Compromise);
    orch.initialize_session(&s);

    let ids = [id("alice"), id("bob")];
    let result = orch.advance_multi_character(&mut s, &ids, None, &hill(), &[]).await;
    assert!(result.success);
    assert_eq!(result.responses[0].action.as_deref(), Some("attempts to attack the gate"));
    assert_eq!(result.responses[1].action.as_deref(), Some("attempts to block the gate"));
}

#[tokio::test]
async fn multi_character_generation_failure_fails_turn() {
    let mut s = session();
    let generator = Arc::new(ScriptedGenerator::default().failing_for("bob"));
    let mut orch = orchestrator(generator);
    let ids = [id("alice"), id("bob")];

    let result = orch.advance_multi_character(&mut s, &ids, None, &hill(), &[]).await;
    assert_eq!(
        result.error,
        Some(AdvanceError::Generation {
            character_id: id("bob"),
            message: "Response generation failed: upstream timeout".into(),
        })
    );
    assert_eq!(s.world.timeline.current_turn, 0);
}

#[tokio::test]
async fn turns_produce_one_snapshot_each() {
    let mut s = session();
    let mut orch = orchestrator(Arc::new(ScriptedGenerator::default()));
    orch.initialize_session(&s);

    for turn in 1..=3_u64 {
        let result = orch.advance(&mut s, "Carol: again", &hill(), &[]).await;
        assert!(result.success);
        assert_eq!(s.world.timeline.current_turn, turn);
    }
    let turns: Vec<_> = orch.snapshots().iter().map(|snap| snap.turn).collect();
    assert_eq!(turns, vec![1, 2, 3]);

    let projection = orch.create_snapshot(&s, &hill());
    assert_eq!(projection.turn, 3);
    assert_eq!(orch.snapshots().len(), 3);

    orch.initialize_session(&s);
    assert!(orch.snapshots().is_empty());
}

#[test]
fn evolution_pass_reports_per_character() {
    let rules = InformationRulesConfig::from_json(
        r#"{
            "inference_rules": [{"id": "i", "premise_tags": ["omen"], "conclusion_template": "A storm is coming"}],
            "forget_rules": [{"id": "f", "target_tags": ["gossip"]}],
            "fuzzy_rules": [{"id": "z", "source_types": ["heard"], "decay_factor": 0.5}]
        }"#,
    )
    .expect("valid rules");
    let vision = VisionManager::new().with_rules(rules);
    let mut s = session();
    let ctx = EventContext::new("talk", "hill", NOW).with_present([id("alice")]);
    vision.hear_event(&mut s.information, &ctx.clone().with_tags(["omen"]), "Ravens circle the hill", None);
    vision.hear_event(&mut s.information, &ctx.with_tags(["gossip"]), "Bob snores", None);

    let mut orch = orchestrator(Arc::new(ScriptedGenerator::default())).with_vision(vision);
    let reports = orch.evolve_information(&mut s, "hill");

    let alice = reports.iter().find(|r| r.character_id == id("alice")).expect("alice report");
    assert_eq!(alice.inferred.len(), 1);
    assert_eq!(alice.forgotten.len(), 1);
    assert_eq!(alice.decayed.len(), 1);
    assert_eq!(alice.decayed[0].confidence, Some(0.45));

    let known = &s.character(&id("alice")).expect("alice").state.known_information;
    assert_eq!(known.len(), 2);
    assert!(reports.iter().filter(|r| r.character_id != id("alice")).all(|r| r.inferred.is_empty()));
    assert_eq!(orch.counters().inferences, 1);
}

// ---------------------------------------------------------------------------
// Anchors
// ---------------------------------------------------------------------------

#[test]
fn session_matching_anchor_is_highly_consistent() {
    let mut s = session();
    let vision = VisionManager::new();
    let ctx = EventContext::new("observation", "hill", NOW).with_present([id("alice")]);
    vision.witness_event(&mut s.information, &ctx, "The beacon is lit");
    s.world.current_plot_node_id = Some("beacon".into());

    let anchors = AnchorSet::from_json(
        r#"{"anchors": [{
            "id": "a1",
            "node_id": "beacon",
            "plot_description": "Alice has seen the beacon",
            "characters": [{"character_id": "alice", "known_information": ["The beacon is lit"]}]
        }]}"#,
    )
    .expect("valid anchors");

    let evaluator = AnchorEvaluator::new();
    let result = evaluator
        .compare_current(&s, &anchors, &CompareOptions::from(&FabulaConfig::default().anchor))
        .expect("anchor for node");
    assert_eq!(result.anchor_id, "a1");
    assert_eq!(result.overall_assessment, Assessment::HighlyConsistent);
    assert!(result.overall_divergence.abs() < f64::EPSILON);
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sqlite_snapshot_restores_independent_copy() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("fabula.db");
    let store = SqliteSessionStore::open(&path, &PersistenceConfig::default())?;

    let mut s = session();
    let mut orch = orchestrator(Arc::new(ScriptedGenerator::default()));
    orch.initialize_session(&s);
    assert!(orch.advance(&mut s, "Alice: hello", &hill(), &[]).await.success);

    store.save_session(&s).await?;
    let snap = save_named_snapshot(&store, &s, "after hello", None, NOW).await?;

    assert!(orch.advance(&mut s, "Bob: hello", &hill(), &[]).await.success);
    assert_eq!(s.world.timeline.current_turn, 2);

    let restored = restore_snapshot(&store, &s.id, &snap.id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("snapshot {} missing", snap.id))?;
    assert_eq!(restored.world.timeline.current_turn, 1);
    assert_eq!(restored.world.event_chain.len(), 1);

    assert!(restore_snapshot(&store, &s.id, "missing").await?.is_none());
    assert_eq!(store.list_sessions().await?, vec![s.id.clone()]);

    let reopened = SqliteSessionStore::open(&path, &PersistenceConfig::default())?;
    let loaded = reopened.load_session(&s.id).await?;
    assert_eq!(loaded.map(|l| l.world.timeline.current_turn), Some(1));
    Ok(())
}
