//! Conflict arbitration: simultaneous character actions that cannot both
//! happen.
//!
//! One pass: detect, arbitrate each conflict with a strategy, splice the
//! outcome back. There is no re-arbitration. Deadlock is an ordinary,
//! checkable result and the only way arbitration can fail to pick.
//!
//! Detection is keyword-based. Two responses conflict when both declare an
//! action containing one of the configured exclusivity terms. This is a
//! heuristic, not language understanding.

use std::fmt;

use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::character::Character;
use crate::config::{ArbitrationConfig, default_exclusive_keywords};
use crate::ports::CharacterResponse;
use crate::types::{CharacterId, Scene};

/// Severity assigned to detected action conflicts.
pub const ACTION_CONFLICT_SEVERITY: f64 = 0.7;

/// Score used for a character the session does not know about.
const UNKNOWN_CHARACTER_SCORE: f64 = 50.0;

/// Prefix a compromised action is rewritten with.
const ATTEMPT_PREFIX: &str = "attempts to ";

/// Kind of conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Mutually exclusive actions.
    #[serde(rename = "action_conflict")]
    Action,
    /// Competing for the same object. Not detected yet.
    Resource,
    /// Incompatible goals. Not detected yet.
    Goal,
    /// Contradictory dialogue. Detection is a stub.
    Dialogue,
}

/// A detected conflict. Lives for one [`ConflictArbitrator::resolve_all`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictDescription {
    /// Request-scoped identifier.
    pub id: Uuid,
    /// Kind.
    pub kind: ConflictKind,
    /// Characters involved, in response order.
    pub involved: Vec<CharacterId>,
    /// 0.0–1.0.
    pub severity: f64,
    /// Human-readable summary.
    pub description: String,
}

/// How a conflict is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArbitrationStrategy {
    /// Strongest character wins.
    #[default]
    Priority,
    /// Nobody wins outright; every action becomes an attempt.
    Compromise,
    /// Earliest response wins.
    FirstWins,
    /// Uniform random winner from the injected RNG.
    Random,
}

impl fmt::Display for ArbitrationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Priority => "priority",
            Self::Compromise => "compromise",
            Self::FirstWins => "first_wins",
            Self::Random => "random",
        };
        f.write_str(s)
    }
}

/// Outcome of arbitrating one conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrationResult {
    /// Conflict this settles.
    pub conflict_id: Uuid,
    /// Strategy used.
    pub strategy: ArbitrationStrategy,
    /// Winning character, if one was picked.
    pub winner: Option<CharacterId>,
    /// No involved response could be found.
    pub deadlock: bool,
    /// Involved responses after arbitration.
    pub responses: Vec<CharacterResponse>,
    /// Why.
    pub reasoning: String,
}

/// Outcome of [`ConflictArbitrator::resolve_all`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionOutcome {
    /// One response per input response, same order.
    pub responses: Vec<CharacterResponse>,
    /// Conflicts detected.
    pub conflicts: Vec<ConflictDescription>,
    /// One result per conflict.
    pub results: Vec<ArbitrationResult>,
    /// Any arbitration deadlocked.
    pub has_deadlock: bool,
}

/// Detects and settles conflicting actions.
#[derive(Debug, Clone)]
pub struct ConflictArbitrator {
    keywords: Vec<String>,
    rng: StdRng,
}

impl Default for ConflictArbitrator {
    fn default() -> Self {
        Self::new(default_exclusive_keywords())
    }
}

impl ConflictArbitrator {
    /// Arbitrator with the given exclusivity terms and an entropy-seeded
    /// RNG.
    #[must_use]
    pub fn new(keywords: Vec<String>) -> Self {
        Self {
            keywords,
            rng: StdRng::from_entropy(),
        }
    }

    /// Arbitrator built from configuration. A configured seed makes the
    /// `random` strategy reproducible.
    #[must_use]
    pub fn from_config(config: &ArbitrationConfig) -> Self {
        let arbitrator = Self::new(config.exclusive_keywords.clone());
        match config.random_seed {
            Some(seed) => arbitrator.with_seed(seed),
            None => arbitrator,
        }
    }

    /// Builder: reseed the RNG.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Exclusivity terms in use.
    #[must_use]
    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    fn is_exclusive(&self, action: &str) -> bool {
        let lowered = action.to_lowercase();
        self.keywords.iter().any(|k| lowered.contains(&k.to_lowercase()))
    }

    /// Pairwise scan for exclusive actions. Responses without an action
    /// never conflict.
    #[must_use]
    pub fn detect_conflicts(&self, responses: &[CharacterResponse], characters: &[Character]) -> Vec<ConflictDescription> {
        let exclusive: Vec<(&CharacterResponse, &str)> = responses
            .iter()
            .filter(|r| r.has_action())
            .filter_map(|r| r.action.as_deref().map(|a| (r, a)))
            .filter(|(_, a)| self.is_exclusive(a))
            .collect();

        let mut conflicts = Vec::new();
        for (i, (a, action_a)) in exclusive.iter().enumerate() {
            for (b, action_b) in &exclusive[i + 1..] {
                if a.character_id == b.character_id {
                    continue;
                }
                conflicts.push(ConflictDescription {
                    id: Uuid::new_v4(),
                    kind: ConflictKind::Action,
                    involved: vec![a.character_id.clone(), b.character_id.clone()],
                    severity: ACTION_CONFLICT_SEVERITY,
                    description: format!(
                        "{} wants to \"{action_a}\" while {} wants to \"{action_b}\"",
                        display_name(&a.character_id, characters),
                        display_name(&b.character_id, characters),
                    ),
                });
            }
        }

        conflicts.extend(self.detect_dialogue_conflicts(responses));

        if !conflicts.is_empty() {
            debug!(count = conflicts.len(), "Action conflicts detected");
        }
        conflicts
    }

    /// Contradictory-dialogue detection. Currently never reports anything.
    #[must_use]
    pub fn detect_dialogue_conflicts(&self, _responses: &[CharacterResponse]) -> Vec<ConflictDescription> {
        Vec::new()
    }

    /// Settle one conflict. Only the involved responses are returned, in
    /// their original order.
    pub fn arbitrate(
        &mut self,
        conflict: &ConflictDescription,
        responses: &[CharacterResponse],
        characters: &[Character],
        scene: &Scene,
        strategy: ArbitrationStrategy,
    ) -> ArbitrationResult {
        let involved: Vec<&CharacterResponse> = responses
            .iter()
            .filter(|r| conflict.involved.contains(&r.character_id))
            .collect();

        if involved.is_empty() {
            warn!(conflict = %conflict.id, scene = %scene.id, "No involved responses, arbitration deadlocked");
            return ArbitrationResult {
                conflict_id: conflict.id,
                strategy,
                winner: None,
                deadlock: true,
                responses: Vec::new(),
                reasoning: "no involved responses to arbitrate".into(),
            };
        }

        let (winner_idx, reasoning) = match strategy {
            ArbitrationStrategy::Compromise => {
                let responses = involved.iter().map(|r| attempted(r)).collect();
                return ArbitrationResult {
                    conflict_id: conflict.id,
                    strategy,
                    winner: None,
                    deadlock: false,
                    responses,
                    reasoning: "every involved action becomes an attempt".into(),
                };
            }
            ArbitrationStrategy::Priority => {
                let mut best = 0;
                let mut best_score = OrderedFloat(f64::MIN);
                for (idx, r) in involved.iter().enumerate() {
                    let score = OrderedFloat(priority_score(&r.character_id, characters));
                    // Strictly greater: ties stay with the earlier response.
                    if score > best_score {
                        best = idx;
                        best_score = score;
                    }
                }
                (best, format!("highest priority score {:.1}", best_score.into_inner()))
            }
            ArbitrationStrategy::FirstWins => (0, "first response wins".to_string()),
            ArbitrationStrategy::Random => {
                let idx = self.rng.gen_range(0..involved.len());
                (idx, "picked at random".to_string())
            }
        };

        let winner = involved[winner_idx].character_id.clone();
        let responses = involved
            .iter()
            .enumerate()
            .map(|(idx, r)| if idx == winner_idx { (*r).clone() } else { stripped(r) })
            .collect();

        info!(
            conflict = %conflict.id,
            %strategy,
            winner = %winner,
            "Conflict arbitrated"
        );

        ArbitrationResult {
            conflict_id: conflict.id,
            strategy,
            winner: Some(winner),
            deadlock: false,
            responses,
            reasoning,
        }
    }

    /// Detect, then arbitrate every conflict against the progressively
    /// updated responses. The output always has exactly one entry per
    /// input response, in input order.
    pub fn resolve_all(
        &mut self,
        responses: Vec<CharacterResponse>,
        characters: &[Character],
        scene: &Scene,
        strategy: ArbitrationStrategy,
    ) -> ResolutionOutcome {
        let conflicts = self.detect_conflicts(&responses, characters);
        if conflicts.is_empty() {
            return ResolutionOutcome {
                responses,
                conflicts,
                results: Vec::new(),
                has_deadlock: false,
            };
        }

        let mut current = responses;
        let mut results = Vec::with_capacity(conflicts.len());
        for conflict in &conflicts {
            let result = self.arbitrate(conflict, &current, characters, scene, strategy);
            for updated in &result.responses {
                if let Some(slot) = current.iter_mut().find(|r| r.character_id == updated.character_id) {
                    *slot = updated.clone();
                }
            }
            results.push(result);
        }

        let has_deadlock = results.iter().any(|r| r.deadlock);
        ResolutionOutcome {
            responses: current,
            conflicts,
            results,
            has_deadlock,
        }
    }
}

/// `mean(abilities) + 10 * (conscientiousness + extraversion)`, with a mean
/// of 50 for characters without abilities.
fn priority_score(id: &CharacterId, characters: &[Character]) -> f64 {
    let Some(c) = characters.iter().find(|c| &c.id == id) else {
        return UNKNOWN_CHARACTER_SCORE;
    };
    let traits = &c.personality.traits;
    c.mean_ability().unwrap_or(50.0) + 10.0 * (traits.conscientiousness + traits.extraversion)
}

fn stripped(response: &CharacterResponse) -> CharacterResponse {
    let mut out = response.clone();
    out.action = None;
    out.content = response.dialogue.clone().unwrap_or_default();
    out
}

/// Wrap the action once. A response already compromised by an earlier
/// conflict in the same `resolve_all` pass is returned unchanged.
fn attempted(response: &CharacterResponse) -> CharacterResponse {
    let mut out = response.clone();
    if let Some(action) = response
        .action
        .as_deref()
        .filter(|a| !a.trim().is_empty() && !a.starts_with(ATTEMPT_PREFIX))
    {
        let wrapped = format!("{ATTEMPT_PREFIX}{action}");
        if response.content == action {
            out.content.clone_from(&wrapped);
        }
        out.action = Some(wrapped);
    }
    out
}

fn display_name(id: &CharacterId, characters: &[Character]) -> String {
    characters
        .iter()
        .find(|c| &c.id == id)
        .map_or_else(|| id.to_string(), |c| c.name.clone())
}
