//! Behavior tendencies derived from personality.
//!
//! Pure linear combinations of the Big-Five traits. The result can be
//! cached on the character's [`Personality`](crate::character::Personality)
//! but never has to be: [`ensure_behavior_tendencies`] derives on demand
//! without writing back.

use serde::{Deserialize, Serialize};

use crate::character::{BigFiveTraits, Character};

/// Behavioral tendencies (each 0.0–1.0 for in-range traits).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BehaviorTendencies {
    /// Willingness to explore and try new things.
    pub exploration: f64,
    /// Willingness to work with others.
    pub cooperation: f64,
    /// Tendency to hold back and check first.
    pub caution: f64,
    /// Tendency to act without deliberation.
    pub impulsivity: f64,
    /// Tendency to push one's own agenda.
    pub assertiveness: f64,
}

/// Derive tendencies from Big-Five traits.
#[must_use]
pub fn derive_behavior_tendencies(traits: &BigFiveTraits) -> BehaviorTendencies {
    BehaviorTendencies {
        exploration: 0.7 * traits.openness + 0.3 * traits.extraversion,
        cooperation: 0.7 * traits.agreeableness + 0.3 * traits.extraversion,
        caution: 0.6 * traits.conscientiousness + 0.4 * traits.neuroticism,
        impulsivity: 0.6 * (1.0 - traits.conscientiousness) + 0.4 * traits.extraversion,
        assertiveness: 0.7 * traits.extraversion + 0.3 * (1.0 - traits.neuroticism),
    }
}

/// Cached tendencies if present, otherwise freshly derived. Never mutates
/// the character.
#[must_use]
pub fn ensure_behavior_tendencies(character: &Character) -> BehaviorTendencies {
    character
        .personality
        .behavior_tendencies
        .unwrap_or_else(|| derive_behavior_tendencies(&character.personality.traits))
}
