//! Information evolution rules: inference, forgetting, fuzzy decay.
//!
//! Loaded from an `InformationRulesConfig` document (JSON or TOML) and
//! validated before any session uses them. A rule table that fails
//! validation never reaches the [`VisionManager`](super::VisionManager).

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::InformationSource;
use crate::config::{self, DocumentFormat};
use crate::error::{FabulaError, Result};

/// Confidence given to inferred information when the rule does not say.
pub const DEFAULT_INFERENCE_CONFIDENCE: f64 = 0.7;

/// "If a character knows all of these tags, they conclude this."
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRule {
    /// Rule identifier.
    pub id: String,
    /// Tags that must all be present in the character's known information.
    pub premise_tags: Vec<String>,
    /// Content of the synthesized information.
    pub conclusion_template: String,
    /// Confidence of the conclusion; defaults to 0.7.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Tags attached to the conclusion, allowing later rules to chain on it.
    #[serde(default)]
    pub conclusion_tags: Vec<String>,
}

impl InferenceRule {
    /// Effective confidence of the conclusion.
    #[must_use]
    pub fn effective_confidence(&self) -> f64 {
        self.confidence.unwrap_or(DEFAULT_INFERENCE_CONFIDENCE)
    }
}

/// "Characters lose information that is old or tagged a certain way."
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForgetRule {
    /// Rule identifier.
    pub id: String,
    /// Forget information older than this many milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_ms: Option<i64>,
    /// Forget information carrying any of these tags.
    #[serde(default)]
    pub target_tags: Vec<String>,
    /// Whether key memories are exempt. Absent means exempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preserve_key_memory: Option<bool>,
}

impl ForgetRule {
    /// Key memories are preserved unless the rule explicitly says `false`.
    #[must_use]
    pub fn preserves_key_memory(&self) -> bool {
        self.preserve_key_memory != Some(false)
    }
}

/// "Confidence in matching information fades after a while."
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuzzyRule {
    /// Rule identifier.
    pub id: String,
    /// Only information from these sources; empty means any source.
    #[serde(default)]
    pub source_types: Vec<InformationSource>,
    /// Only information carrying one of these tags; empty means any.
    #[serde(default)]
    pub target_tags: Vec<String>,
    /// Minimum age before decay applies. Absent means immediately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_age_ms: Option<i64>,
    /// Multiplier applied to confidence (0.0–1.0).
    pub decay_factor: f64,
}

/// Rule tables consumed by the vision manager.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InformationRulesConfig {
    /// Document format version.
    #[serde(default = "default_version")]
    pub version: String,
    /// Inference rules.
    #[serde(default)]
    pub inference_rules: Vec<InferenceRule>,
    /// Forgetting rules.
    #[serde(default)]
    pub forget_rules: Vec<ForgetRule>,
    /// Fuzzy-decay rules.
    #[serde(default)]
    pub fuzzy_rules: Vec<FuzzyRule>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl InformationRulesConfig {
    /// Parse and validate from a JSON string.
    ///
    /// # Errors
    /// Returns [`FabulaError::Config`] for malformed JSON and
    /// [`FabulaError::InvalidRule`] for rules that fail validation.
    pub fn from_json(text: &str) -> Result<Self> {
        let cfg: Self = config::parse_document(text, DocumentFormat::Json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse and validate from a TOML string.
    ///
    /// # Errors
    /// Same as [`Self::from_json`].
    pub fn from_toml(text: &str) -> Result<Self> {
        let cfg: Self = config::parse_document(text, DocumentFormat::Toml)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load and validate from a `.json` or `.toml` file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let cfg: Self = config::read_document(path)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check every rule's shape.
    ///
    /// # Errors
    /// Returns [`FabulaError::InvalidRule`] naming the first offending rule.
    pub fn validate(&self) -> Result<()> {
        check_unique_ids(self.inference_rules.iter().map(|r| r.id.as_str()))?;
        check_unique_ids(self.forget_rules.iter().map(|r| r.id.as_str()))?;
        check_unique_ids(self.fuzzy_rules.iter().map(|r| r.id.as_str()))?;

        for rule in &self.inference_rules {
            if rule.premise_tags.is_empty() {
                return Err(invalid(&rule.id, "inference rule needs at least one premise tag"));
            }
            if rule.conclusion_template.trim().is_empty() {
                return Err(invalid(&rule.id, "conclusion template is empty"));
            }
            if let Some(c) = rule.confidence {
                check_unit(&rule.id, "confidence", c)?;
            }
        }

        for rule in &self.forget_rules {
            if rule.max_age_ms.is_none() && rule.target_tags.is_empty() {
                return Err(invalid(&rule.id, "forget rule needs max_age_ms or target_tags"));
            }
            if rule.max_age_ms.is_some_and(|ms| ms < 0) {
                return Err(invalid(&rule.id, "max_age_ms must not be negative"));
            }
        }

        for rule in &self.fuzzy_rules {
            check_unit(&rule.id, "decay_factor", rule.decay_factor)?;
            if rule.after_age_ms.is_some_and(|ms| ms < 0) {
                return Err(invalid(&rule.id, "after_age_ms must not be negative"));
            }
        }

        Ok(())
    }

    /// Whether there are no rules at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inference_rules.is_empty() && self.forget_rules.is_empty() && self.fuzzy_rules.is_empty()
    }
}

fn invalid(rule_id: &str, reason: impl Into<String>) -> FabulaError {
    FabulaError::InvalidRule {
        rule_id: rule_id.to_string(),
        reason: reason.into(),
    }
}

fn check_unit(rule_id: &str, field: &str, value: f64) -> Result<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(rule_id, format!("{field} must be within [0, 1], got {value}")))
    }
}

fn check_unique_ids<'a>(ids: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if id.trim().is_empty() {
            return Err(invalid(id, "rule id is empty"));
        }
        if !seen.insert(id) {
            return Err(invalid(id, "duplicate rule id"));
        }
    }
    Ok(())
}
