//! Property-based tests for the engine invariants.
//!
//! Knowledge isolation, clamping of trigger effects, one response per
//! character out of conflict resolution, idempotent inference, key-memory
//! preservation and turn monotonicity, under random inputs.

use proptest::prelude::*;

use fabula_core::character::{Character, Relationship};
use fabula_core::conflict::{ArbitrationStrategy, ConflictArbitrator};
use fabula_core::information::{
    EventContext, Information, InformationRulesConfig, InformationSource, InformationStore, VisionManager,
};
use fabula_core::orchestrator::StoryOrchestrator;
use fabula_core::ports::{CharacterResponse, CharacterResponseGenerator, GenerationRequest, InputParser, ParsedInput};
use fabula_core::state::CharacterStateService;
use fabula_core::trigger::{Effect, EffectTarget, TriggerContext, TriggerRule};
use fabula_core::types::{CharacterId, Scene, Timestamp};
use fabula_core::world::SessionState;

const CAST: [&str; 4] = ["ana", "ben", "cy", "dee"];

// ---------------------------------------------------------------------------
// Strategy helpers
// ---------------------------------------------------------------------------

fn arb_cast_subset() -> impl Strategy<Value = Vec<CharacterId>> {
    proptest::sample::subsequence(CAST.to_vec(), 0..=CAST.len())
        .prop_map(|ids| ids.into_iter().map(CharacterId::from).collect())
}

fn arb_effect_target() -> impl Strategy<Value = EffectTarget> {
    prop_oneof![
        Just(EffectTarget::Ability("combat".into())),
        Just("relationship.trust".parse::<EffectTarget>().expect("valid target")),
        Just("relationship.hostility".parse::<EffectTarget>().expect("valid target")),
        Just("relationship.custom.rivalry".parse::<EffectTarget>().expect("valid target")),
    ]
}

fn arb_effect() -> impl Strategy<Value = Effect> {
    (arb_effect_target(), 0..3_u8, -500.0..500.0f64).prop_map(|(target, kind, value)| match kind {
        0 => Effect::delta(target, value),
        1 => Effect::multiply(target, value),
        _ => Effect::set(target, value),
    })
}

fn arb_action() -> impl Strategy<Value = Option<String>> {
    prop_oneof![
        Just(None),
        Just(Some("attack the gate".to_string())),
        Just(Some("seize the tower".to_string())),
        Just(Some("wave politely".to_string())),
        Just(Some("控制高地".to_string())),
    ]
}

// ---------------------------------------------------------------------------
// Isolation
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn filtered_vision_only_contains_linked_information(
        events in prop::collection::vec(arb_cast_subset(), 1..20),
    ) {
        let vision = VisionManager::new();
        let mut store = InformationStore::new();
        for (i, present) in events.iter().enumerate() {
            let ctx = EventContext::new("event", "scene", Timestamp(i64::try_from(i).unwrap_or(0)))
                .with_present(present.iter().cloned());
            vision.witness_event(&mut store, &ctx, &format!("event {i}"));
        }

        prop_assert!(store.is_consistent());
        for name in CAST {
            let who = CharacterId::from(name);
            let seen = vision.get_filtered_vision(&who, &store);
            let expected = events.iter().filter(|p| p.contains(&who)).count();
            prop_assert_eq!(seen.len(), expected);
            for info in &seen {
                prop_assert!(store.is_visible_to(&who, info.id));
            }
        }
        prop_assert!(vision.get_filtered_vision(&CharacterId::from("stranger"), &store).is_empty());
    }
}

// ---------------------------------------------------------------------------
// Clamping
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn trigger_effects_stay_in_domain(
        effects in prop::collection::vec(arb_effect(), 1..8),
        start_trust in 0.0..=1.0f64,
        start_combat in 0.0..=100.0f64,
    ) {
        let mut rule = TriggerRule::new("r", "event");
        for effect in effects {
            rule = rule.with_effect(effect);
        }
        let rel = Relationship { trust: start_trust, ..Relationship::default() };
        let mut c = Character::new("ana", "Ana")
            .with_ability("combat", start_combat)
            .with_relationship("ben", rel);
        let mut service = CharacterStateService::new();

        service.process_event(&mut c, &[rule], "event", &TriggerContext::new().with_target("ben"));

        let combat = c.state.abilities["combat"];
        prop_assert!((0.0..=100.0).contains(&combat));
        let rel = &c.state.relationships[&CharacterId::from("ben")];
        for v in [rel.trust, rel.hostility, rel.intimacy, rel.respect] {
            prop_assert!((0.0..=1.0).contains(&v));
        }
        for v in rel.custom.values() {
            prop_assert!((0.0..=1.0).contains(v));
        }
        for record in service.history() {
            prop_assert!(record.new_value.is_finite());
        }
    }
}

// ---------------------------------------------------------------------------
// Conflict completeness
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn resolve_all_returns_one_response_per_character(
        actions in prop::collection::vec(arb_action(), 0..=CAST.len()),
        strategy in prop_oneof![
            Just(ArbitrationStrategy::Priority),
            Just(ArbitrationStrategy::Compromise),
            Just(ArbitrationStrategy::FirstWins),
            Just(ArbitrationStrategy::Random),
        ],
        seed in any::<u64>(),
    ) {
        let characters: Vec<Character> = CAST.iter().map(|n| Character::new(*n, *n)).collect();
        let responses: Vec<CharacterResponse> = actions
            .iter()
            .zip(CAST)
            .map(|(action, name)| {
                let r = CharacterResponse::new(name, "...");
                match action {
                    Some(a) => r.with_action(a.clone()),
                    None => r,
                }
            })
            .collect();
        let input_ids: Vec<_> = responses.iter().map(|r| r.character_id.clone()).collect();

        let mut arbitrator = ConflictArbitrator::default().with_seed(seed);
        let out = arbitrator.resolve_all(responses, &characters, &Scene::new("s", "S"), strategy);

        let output_ids: Vec<_> = out.responses.iter().map(|r| r.character_id.clone()).collect();
        prop_assert_eq!(output_ids, input_ids);
        prop_assert!(!out.has_deadlock);
    }
}

// ---------------------------------------------------------------------------
// Idempotent inference and key-memory preservation
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn inference_is_idempotent(tag_mask in 0_u8..8) {
        let rules = InformationRulesConfig::from_json(
            r#"{"inference_rules": [
                {"id": "ab", "premise_tags": ["a", "b"], "conclusion_template": "AB"},
                {"id": "c", "premise_tags": ["c"], "conclusion_template": "C"}
            ]}"#,
        )
        .expect("valid rules");
        let vision = VisionManager::new().with_rules(rules);
        let mut store = InformationStore::new();
        let ana = CharacterId::from("ana");
        for (bit, tag) in ["a", "b", "c"].iter().enumerate() {
            if tag_mask & (1 << bit) != 0 {
                let info = vision.add_global_information(
                    &mut store,
                    Information::new(*tag, InformationSource::Witnessed, Timestamp(0), "s").with_tags([*tag]),
                );
                vision.assign_information_to_character(&mut store, &ana, info.id);
            }
        }

        vision.apply_inference(&mut store, &ana, "s", Timestamp(1));
        prop_assert!(vision.apply_inference(&mut store, &ana, "s", Timestamp(1)).is_empty());
    }

    #[test]
    fn key_memories_survive_forgetting(age in 0_i64..1_000_000, key in any::<bool>()) {
        let rules = InformationRulesConfig::from_json(r#"{"forget_rules": [{"id": "f", "max_age_ms": 1000}]}"#)
            .expect("valid rules");
        let vision = VisionManager::new().with_rules(rules);
        let mut store = InformationStore::new();
        let ana = CharacterId::from("ana");
        let now = Timestamp(2_000_000);

        let mut ctx = EventContext::new("event", "s", now.offset(-age)).with_present([ana.clone()]);
        if key {
            ctx = ctx.as_key_memory();
        }
        let info = vision.witness_event(&mut store, &ctx, "the oath");
        vision.apply_forgetting(&mut store, &ana, now);

        let kept = store.is_visible_to(&ana, info.id);
        prop_assert_eq!(kept, key || age <= 1000);
        prop_assert!(store.get(info.id).is_some());
    }
}

// ---------------------------------------------------------------------------
// Turn monotonicity
// ---------------------------------------------------------------------------

struct EchoParser;

impl InputParser for EchoParser {
    fn register_character(&mut self, _id: &CharacterId, _name: &str) {}

    fn clear(&mut self) {}

    fn parse(&self, text: &str) -> ParsedInput {
        match text.split_once(':') {
            Some((who, what)) => ParsedInput::Dialogue {
                target_character_id: CharacterId::from(who),
                content: what.to_string(),
            },
            None => ParsedInput::Invalid { reason: "no speaker".into() },
        }
    }
}

struct Nod;

#[async_trait::async_trait]
impl CharacterResponseGenerator for Nod {
    async fn generate(&self, request: GenerationRequest) -> fabula_core::Result<CharacterResponse> {
        Ok(CharacterResponse::new(request.character.id, "nods"))
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn turn_counter_moves_only_on_success(inputs in prop::collection::vec(
        prop_oneof![Just("ana:hi"), Just("ben:hello"), Just("nobody:hey"), Just("garbled")],
        1..10,
    )) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().expect("runtime");
        let mut session = SessionState::new("s", "S", "scene", Timestamp(0))
            .with_character(Character::new("ana", "Ana"))
            .with_character(Character::new("ben", "Ben"));
        let scene = Scene::new("scene", "Scene");
        let mut orch = StoryOrchestrator::new(Box::new(EchoParser), std::sync::Arc::new(Nod));

        for input in inputs {
            let before = session.world.timeline.current_turn;
            let result = rt.block_on(orch.advance(&mut session, input, &scene, &[]));
            let after = session.world.timeline.current_turn;
            if result.success {
                prop_assert_eq!(after, before + 1);
            } else {
                prop_assert_eq!(after, before);
            }
        }
    }
}
