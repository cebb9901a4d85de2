//! Vision Manager: the single choke point for "what does X know".
//!
//! Every read of a character's knowledge goes through
//! [`VisionManager::get_filtered_vision`], and every write goes through one
//! of the attribution primitives (`witness_event`, `hear_event`,
//! `tell_information`) or the evolution passes (`apply_inference`,
//! `apply_forgetting`, `apply_fuzzy`). A character only ever sees
//! information linked to them, and that is checked here and nowhere else.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::attribution::{EventContext, InformationAttributionConfig, dedup_ids};
use super::rules::InformationRulesConfig;
use super::{Information, InformationSource, InformationStore};
use crate::character::{Character, KnowledgeRef, clamp_unit};
use crate::types::{CharacterId, InformationId, Timestamp};

/// Set algebra over two characters' known content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InformationDifference {
    /// Content both characters know.
    pub shared: Vec<String>,
    /// Content only the first character knows.
    pub only_a: Vec<String>,
    /// Content only the second character knows.
    pub only_b: Vec<String>,
}

/// Enforces information asymmetry and evolves it over time.
#[derive(Debug, Clone, Default)]
pub struct VisionManager {
    rules: InformationRulesConfig,
    attribution: Option<InformationAttributionConfig>,
}

impl VisionManager {
    /// A manager with no inference/forget/fuzzy rules and no attribution table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: install validated information rules.
    #[must_use]
    pub fn with_rules(mut self, rules: InformationRulesConfig) -> Self {
        self.rules = rules;
        self
    }

    /// Builder: install a validated attribution table.
    #[must_use]
    pub fn with_attribution(mut self, attribution: InformationAttributionConfig) -> Self {
        self.attribution = Some(attribution);
        self
    }

    /// Replace the information rules.
    pub fn load_rules(&mut self, rules: InformationRulesConfig) {
        debug!(
            inference = rules.inference_rules.len(),
            forget = rules.forget_rules.len(),
            fuzzy = rules.fuzzy_rules.len(),
            "Loaded information rules"
        );
        self.rules = rules;
    }

    /// Replace the attribution table.
    pub fn load_attribution(&mut self, attribution: InformationAttributionConfig) {
        debug!(rules = attribution.rules.len(), "Loaded attribution rules");
        self.attribution = Some(attribution);
    }

    /// Currently installed information rules.
    #[must_use]
    pub fn rules(&self) -> &InformationRulesConfig {
        &self.rules
    }

    /// Currently installed attribution table.
    #[must_use]
    pub fn attribution(&self) -> Option<&InformationAttributionConfig> {
        self.attribution.as_ref()
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Exactly the information linked to `character_id`, in ledger order.
    /// Characters without an index entry see nothing.
    #[must_use]
    pub fn get_filtered_vision(&self, character_id: &CharacterId, store: &InformationStore) -> Vec<Information> {
        let visible: HashSet<InformationId> = store.visible_ids(character_id).iter().copied().collect();
        if visible.is_empty() {
            return Vec::new();
        }
        store
            .global
            .iter()
            .filter(|info| visible.contains(&info.id))
            .cloned()
            .collect()
    }

    /// Union of tags over a character's filtered vision.
    #[must_use]
    pub fn known_tags(&self, character_id: &CharacterId, store: &InformationStore) -> BTreeSet<String> {
        self.get_filtered_vision(character_id, store)
            .into_iter()
            .flat_map(|info| info.tags)
            .collect()
    }

    /// Compare what two characters know, by content.
    #[must_use]
    pub fn get_information_difference(
        &self,
        store: &InformationStore,
        a: &CharacterId,
        b: &CharacterId,
    ) -> InformationDifference {
        let contents = |id: &CharacterId| -> Vec<String> {
            let mut seen = HashSet::new();
            self.get_filtered_vision(id, store)
                .into_iter()
                .map(|info| info.content)
                .filter(|c| seen.insert(c.clone()))
                .collect()
        };
        let known_a = contents(a);
        let known_b = contents(b);
        let set_a: HashSet<&String> = known_a.iter().collect();
        let set_b: HashSet<&String> = known_b.iter().collect();

        InformationDifference {
            shared: known_a.iter().filter(|c| set_b.contains(c)).cloned().collect(),
            only_a: known_a.iter().filter(|c| !set_b.contains(c)).cloned().collect(),
            only_b: known_b.iter().filter(|c| !set_a.contains(c)).cloned().collect(),
        }
    }

    // ------------------------------------------------------------------
    // Ledger writes
    // ------------------------------------------------------------------

    /// Append `info` to the ledger under a fresh ID. Visibility is not
    /// assigned.
    pub fn add_global_information(&self, store: &mut InformationStore, mut info: Information) -> Information {
        info.id = InformationId::new();
        trace!(information = %info.id, source = %info.source, "Added global information");
        store.push(info.clone());
        info
    }

    /// Link one information to one character. Returns `true` if newly linked.
    pub fn assign_information_to_character(
        &self,
        store: &mut InformationStore,
        character_id: &CharacterId,
        information_id: InformationId,
    ) -> bool {
        store.link(character_id, information_id)
    }

    /// Link one information to several characters. Returns how many links
    /// were newly created.
    pub fn assign_information_to_characters(
        &self,
        store: &mut InformationStore,
        character_ids: &[CharacterId],
        information_id: InformationId,
    ) -> usize {
        character_ids
            .iter()
            .filter(|id| store.link(id, information_id))
            .count()
    }

    /// Everyone present sees the event first-hand (confidence 1.0).
    pub fn witness_event(&self, store: &mut InformationStore, context: &EventContext, content: &str) -> Information {
        let recipients = dedup_ids(context.present_characters.clone());
        self.record(store, context, content, InformationSource::Witnessed, &recipients)
    }

    /// The hearers (or, if none given, everyone present) overhear the event
    /// (confidence 0.9).
    pub fn hear_event(
        &self,
        store: &mut InformationStore,
        context: &EventContext,
        content: &str,
        hearers: Option<&[CharacterId]>,
    ) -> Information {
        let recipients = match hearers {
            Some(h) => dedup_ids(h.to_vec()),
            None => dedup_ids(context.present_characters.clone()),
        };
        self.record(store, context, content, InformationSource::Heard, &recipients)
    }

    /// `teller` shares information with `recipients`; both sides end up
    /// knowing it.
    pub fn tell_information(
        &self,
        store: &mut InformationStore,
        context: &EventContext,
        content: &str,
        teller: &CharacterId,
        recipients: &[CharacterId],
    ) -> Information {
        let mut all = Vec::with_capacity(recipients.len() + 1);
        all.push(teller.clone());
        all.extend(recipients.iter().cloned());
        let all = dedup_ids(all);
        self.record(store, context, content, InformationSource::Told, &all)
    }

    /// Apply the highest-priority attribution rule for the event type.
    /// Returns `None` when no table is loaded or no rule matches.
    pub fn process_event_attribution(
        &self,
        store: &mut InformationStore,
        context: &EventContext,
        content: &str,
    ) -> Option<Information> {
        let rule = self.attribution.as_ref()?.rule_for(&context.event_type)?;
        let targets = context.resolve_target(rule);

        let mut ctx = context.clone();
        for tag in &rule.tags {
            if !ctx.tags.contains(tag) {
                ctx.tags.push(tag.clone());
            }
        }
        ctx.is_key_memory |= rule.is_key_memory;

        debug!(
            event_type = %context.event_type,
            target = ?rule.attribution_target,
            source = %rule.source,
            recipients = targets.len(),
            "Applying attribution rule"
        );

        match rule.source {
            InformationSource::Witnessed => {
                ctx.present_characters = targets;
                Some(self.witness_event(store, &ctx, content))
            }
            InformationSource::Heard => Some(self.hear_event(store, &ctx, content, Some(&targets))),
            InformationSource::Told => {
                let teller = ctx.actor_id.clone().or_else(|| targets.first().cloned());
                let Some(teller) = teller else {
                    warn!(event_type = %context.event_type, "`told` attribution without a teller or recipients");
                    return None;
                };
                let recipients: Vec<CharacterId> = targets.into_iter().filter(|t| *t != teller).collect();
                Some(self.tell_information(store, &ctx, content, &teller, &recipients))
            }
            InformationSource::Inferred => {
                warn!(event_type = %context.event_type, "Attribution rule asks for inferred source; skipped");
                None
            }
        }
    }

    fn record(
        &self,
        store: &mut InformationStore,
        context: &EventContext,
        content: &str,
        source: InformationSource,
        recipients: &[CharacterId],
    ) -> Information {
        let mut info = Information::new(content, source, context.timestamp, context.scene_id.clone())
            .with_tags(context.tags.iter().cloned());
        info.is_key_memory = context.is_key_memory;

        let info = self.add_global_information(store, info);
        let linked = self.assign_information_to_characters(store, recipients, info.id);
        debug!(
            information = %info.id,
            source = %source,
            scene = %context.scene_id,
            recipients = linked,
            "Attributed information"
        );
        info
    }

    // ------------------------------------------------------------------
    // Evolution
    // ------------------------------------------------------------------

    /// Fire every inference rule whose premise tags the character fully
    /// knows. A conclusion the character already knows (by content) is not
    /// produced again, so repeated calls are idempotent.
    pub fn apply_inference(
        &self,
        store: &mut InformationStore,
        character_id: &CharacterId,
        scene_id: &str,
        now: Timestamp,
    ) -> Vec<Information> {
        let mut created = Vec::new();
        if self.rules.inference_rules.is_empty() {
            return created;
        }

        let vision = self.get_filtered_vision(character_id, store);
        let mut tags: HashSet<String> = vision.iter().flat_map(|i| i.tags.iter().cloned()).collect();
        let mut known_content: HashSet<String> = vision.into_iter().map(|i| i.content).collect();

        for rule in &self.rules.inference_rules {
            if !rule.premise_tags.iter().all(|t| tags.contains(t)) {
                continue;
            }
            if known_content.contains(&rule.conclusion_template) {
                continue;
            }

            let info = Information::new(
                rule.conclusion_template.clone(),
                InformationSource::Inferred,
                now,
                scene_id,
            )
            .with_tags(rule.conclusion_tags.iter().cloned())
            .with_confidence(rule.effective_confidence());

            let info = self.add_global_information(store, info);
            store.link(character_id, info.id);

            debug!(
                character = %character_id,
                rule = %rule.id,
                information = %info.id,
                "Inference rule fired"
            );

            known_content.insert(info.content.clone());
            tags.extend(info.tags.iter().cloned());
            created.push(info);
        }

        created
    }

    /// Un-link information the character should no longer know. The global
    /// ledger is untouched. Key memories survive unless a rule explicitly
    /// sets `preserve_key_memory = false`.
    pub fn apply_forgetting(
        &self,
        store: &mut InformationStore,
        character_id: &CharacterId,
        now: Timestamp,
    ) -> Vec<InformationId> {
        if self.rules.forget_rules.is_empty() {
            return Vec::new();
        }

        let doomed: Vec<InformationId> = self
            .get_filtered_vision(character_id, store)
            .into_iter()
            .filter(|info| {
                self.rules.forget_rules.iter().any(|rule| {
                    if info.is_key_memory && rule.preserves_key_memory() {
                        return false;
                    }
                    let too_old = rule
                        .max_age_ms
                        .is_some_and(|max| now.millis_since(info.timestamp) > max);
                    too_old || info.has_any_tag(&rule.target_tags)
                })
            })
            .map(|info| info.id)
            .collect();

        for id in &doomed {
            store.unlink(character_id, *id);
        }

        if !doomed.is_empty() {
            debug!(character = %character_id, forgotten = doomed.len(), "Forgetting pass");
        }
        doomed
    }

    /// Decay confidence on matching references older than each rule's
    /// `after_age_ms`. Returns copies of the references that changed.
    pub fn apply_fuzzy(
        &self,
        store: &InformationStore,
        character_id: &CharacterId,
        refs: &mut [KnowledgeRef],
        now: Timestamp,
    ) -> Vec<KnowledgeRef> {
        let mut updated = Vec::new();
        if self.rules.fuzzy_rules.is_empty() {
            return updated;
        }

        for r in refs.iter_mut() {
            if !store.is_visible_to(character_id, r.information_id) {
                continue;
            }
            let Some(info) = store.get(r.information_id) else {
                continue;
            };
            let age = now.millis_since(r.acquired_at);
            let mut changed = false;

            for rule in &self.rules.fuzzy_rules {
                let source_ok = rule.source_types.is_empty() || rule.source_types.contains(&info.source);
                let tags_ok = rule.target_tags.is_empty() || info.has_any_tag(&rule.target_tags);
                let old_enough = rule.after_age_ms.is_none_or(|after| age > after);
                if source_ok && tags_ok && old_enough {
                    r.confidence = Some(clamp_unit(r.effective_confidence() * rule.decay_factor));
                    changed = true;
                }
            }

            if changed {
                updated.push(r.clone());
            }
        }

        if !updated.is_empty() {
            debug!(character = %character_id, decayed = updated.len(), "Fuzzy decay pass");
        }
        updated
    }

    /// Reconcile the character's knowledge references with the store: add
    /// references for newly visible information, drop references to
    /// information no longer visible. Existing references keep their
    /// confidence. Returns `(added, removed)`.
    pub fn sync_known_information(
        &self,
        store: &InformationStore,
        character: &mut Character,
        now: Timestamp,
    ) -> (usize, usize) {
        let visible = store.visible_ids(&character.id);
        let before = character.state.known_information.len();
        character
            .state
            .known_information
            .retain(|r| visible.contains(&r.information_id));
        let removed = before - character.state.known_information.len();

        let present: HashSet<InformationId> = character
            .state
            .known_information
            .iter()
            .map(|r| r.information_id)
            .collect();

        let mut added = 0;
        for id in visible {
            if present.contains(id) {
                continue;
            }
            let confidence = store.get(*id).map(|i| i.initial_confidence);
            character.state.known_information.push(KnowledgeRef {
                information_id: *id,
                acquired_at: now,
                confidence,
            });
            added += 1;
        }

        (added, removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::information::rules::{ForgetRule, FuzzyRule, InferenceRule};

    fn cid(s: &str) -> CharacterId {
        CharacterId::from(s)
    }

    fn ctx(present: &[&str]) -> EventContext {
        EventContext::new("observe", "hall", Timestamp(1_000)).with_present(present.iter().map(|s| cid(s)))
    }

    #[test]
    fn witness_isolates_absent_characters() {
        let vm = VisionManager::new();
        let mut store = InformationStore::new();
        let info = vm.witness_event(&mut store, &ctx(&["a"]), "The butler hid a knife");

        assert_eq!(info.source, InformationSource::Witnessed);
        assert_eq!(info.initial_confidence, 1.0);
        assert_eq!(vm.get_filtered_vision(&cid("a"), &store).len(), 1);
        assert!(vm.get_filtered_vision(&cid("b"), &store).is_empty());
        assert!(store.is_consistent());
    }

    #[test]
    fn hear_defaults_to_present_characters() {
        let vm = VisionManager::new();
        let mut store = InformationStore::new();
        let info = vm.hear_event(&mut store, &ctx(&["a", "b"]), "A scream", None);
        assert_eq!(info.initial_confidence, 0.9);
        assert!(store.is_visible_to(&cid("b"), info.id));

        let only_c = [cid("c")];
        let info = vm.hear_event(&mut store, &ctx(&["a", "b"]), "A whisper", Some(&only_c));
        assert!(store.is_visible_to(&cid("c"), info.id));
        assert!(!store.is_visible_to(&cid("a"), info.id));
    }

    #[test]
    fn tell_includes_teller() {
        let vm = VisionManager::new();
        let mut store = InformationStore::new();
        let info = vm.tell_information(&mut store, &ctx(&[]), "The key is in the well", &cid("a"), &[cid("b")]);
        assert_eq!(info.source, InformationSource::Told);
        assert!(store.is_visible_to(&cid("a"), info.id));
        assert!(store.is_visible_to(&cid("b"), info.id));
    }

    #[test]
    fn add_global_assigns_fresh_id_without_visibility() {
        let vm = VisionManager::new();
        let mut store = InformationStore::new();
        let draft = Information::new("x", InformationSource::Witnessed, Timestamp(0), "s");
        let original = draft.id;
        let info = vm.add_global_information(&mut store, draft);
        assert_ne!(info.id, original);
        assert!(store.by_character.is_empty());
        assert_eq!(vm.assign_information_to_characters(&mut store, &[cid("a"), cid("a")], info.id), 1);
    }

    #[test]
    fn inference_fires_once() {
        let vm = VisionManager::new().with_rules(InformationRulesConfig {
            inference_rules: vec![InferenceRule {
                id: "vault".into(),
                premise_tags: vec!["secret".into(), "location".into()],
                conclusion_template: "The vault lies beneath the chapel".into(),
                confidence: None,
                conclusion_tags: vec![],
            }],
            ..Default::default()
        });
        let mut store = InformationStore::new();
        vm.witness_event(&mut store, &ctx(&["a"]).with_tags(["secret"]), "A hidden door exists");
        let created = vm.apply_inference(&mut store, &cid("a"), "hall", Timestamp(2_000));
        assert!(created.is_empty(), "premises not yet satisfied");

        vm.witness_event(&mut store, &ctx(&["a"]).with_tags(["location"]), "The chapel has a crypt");
        let created = vm.apply_inference(&mut store, &cid("a"), "hall", Timestamp(2_000));
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].source, InformationSource::Inferred);
        assert_eq!(created[0].initial_confidence, 0.7);

        let again = vm.apply_inference(&mut store, &cid("a"), "hall", Timestamp(3_000));
        assert!(again.is_empty());
    }

    #[test]
    fn forgetting_respects_key_memory_and_tags() {
        let vm = VisionManager::new().with_rules(InformationRulesConfig {
            forget_rules: vec![
                ForgetRule {
                    id: "old".into(),
                    max_age_ms: Some(5_000),
                    target_tags: vec![],
                    preserve_key_memory: None,
                },
                ForgetRule {
                    id: "gossip".into(),
                    max_age_ms: None,
                    target_tags: vec!["rumor".into()],
                    preserve_key_memory: None,
                },
            ],
            ..Default::default()
        });
        let mut store = InformationStore::new();
        let now = Timestamp(100_000);
        let old = vm.witness_event(
            &mut store,
            &EventContext::new("x", "s", now.offset(-10_000)).with_present([cid("a")]),
            "old news",
        );
        let key = vm.witness_event(
            &mut store,
            &EventContext::new("x", "s", now.offset(-10_000)).with_present([cid("a")]).as_key_memory(),
            "mother's face",
        );
        let rumor = vm.witness_event(
            &mut store,
            &EventContext::new("x", "s", now).with_present([cid("a")]).with_tags(["rumor"]),
            "fresh rumor",
        );

        let removed = vm.apply_forgetting(&mut store, &cid("a"), now);
        assert_eq!(removed.len(), 2);
        assert!(removed.contains(&old.id));
        assert!(removed.contains(&rumor.id));
        assert!(store.is_visible_to(&cid("a"), key.id));
        assert!(store.contains(old.id), "global ledger is never pruned");
    }

    #[test]
    fn fuzzy_skips_refs_not_old_enough() {
        let vm = VisionManager::new().with_rules(InformationRulesConfig {
            fuzzy_rules: vec![FuzzyRule {
                id: "haze".into(),
                source_types: vec![InformationSource::Heard],
                target_tags: vec![],
                after_age_ms: Some(1_000),
                decay_factor: 0.5,
            }],
            ..Default::default()
        });
        let mut store = InformationStore::new();
        let heard = vm.hear_event(&mut store, &ctx(&["a"]), "distant bells", None);
        let seen = vm.witness_event(&mut store, &ctx(&["a"]), "a red door");

        let mut refs = vec![
            KnowledgeRef { information_id: heard.id, acquired_at: Timestamp(0), confidence: Some(0.9) },
            KnowledgeRef { information_id: seen.id, acquired_at: Timestamp(0), confidence: Some(1.0) },
        ];
        let updated = vm.apply_fuzzy(&store, &cid("a"), &mut refs, Timestamp(500));
        assert!(updated.is_empty());

        let updated = vm.apply_fuzzy(&store, &cid("a"), &mut refs, Timestamp(5_000));
        assert_eq!(updated.len(), 1);
        assert!((refs[0].effective_confidence() - 0.45).abs() < 1e-9);
        assert_eq!(refs[1].confidence, Some(1.0));
    }

    #[test]
    fn difference_is_content_based() {
        let vm = VisionManager::new();
        let mut store = InformationStore::new();
        vm.witness_event(&mut store, &ctx(&["a", "b"]), "shared");
        vm.witness_event(&mut store, &ctx(&["a"]), "a-only");
        vm.witness_event(&mut store, &ctx(&["b"]), "b-only");
        let diff = vm.get_information_difference(&store, &cid("a"), &cid("b"));
        assert_eq!(diff.shared, vec!["shared".to_string()]);
        assert_eq!(diff.only_a, vec!["a-only".to_string()]);
        assert_eq!(diff.only_b, vec!["b-only".to_string()]);
    }

    #[test]
    fn sync_adds_and_drops_refs() {
        let vm = VisionManager::new();
        let mut store = InformationStore::new();
        let mut alice = Character::new("a", "Alice");
        let info = vm.hear_event(&mut store, &ctx(&["a"]), "rumor", None);

        assert_eq!(vm.sync_known_information(&store, &mut alice, Timestamp(5)), (1, 0));
        assert_eq!(alice.state.known_information[0].confidence, Some(0.9));
        assert_eq!(vm.sync_known_information(&store, &mut alice, Timestamp(6)), (0, 0));

        store.unlink(&alice.id, info.id);
        assert_eq!(vm.sync_known_information(&store, &mut alice, Timestamp(7)), (0, 1));
        assert!(alice.state.known_information.is_empty());
    }
}
