//! Anchors: authored story checkpoints and divergence scoring.
//!
//! An [`Anchor`] records what each character should know, how they should
//! feel about each other and what they should believe at a plot node. The
//! [`AnchorEvaluator`] scores a live session against it. It reads the
//! session and never changes it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::character::RelationshipDimension;
use crate::config::{self, AnchorConfig, DocumentFormat};
use crate::error::Result;
use crate::information::VisionManager;
use crate::types::CharacterId;
use crate::world::SessionState;

/// Expected belief on one topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorJudgment {
    /// Topic, matched against `CharacterState::judgments`.
    pub key: String,
    /// Expected value.
    pub value: String,
}

/// Expected state of one character at an anchor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorCharacterState {
    /// Character.
    pub character_id: CharacterId,
    /// Information content the character should know.
    #[serde(default)]
    pub known_information: Vec<String>,
    /// Expected relationship values, only for the dimensions authored.
    #[serde(default)]
    pub relationships: BTreeMap<CharacterId, BTreeMap<RelationshipDimension, f64>>,
    /// Expected judgment, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judgment: Option<AnchorJudgment>,
}

/// Canonical checkpoint at a plot node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    /// Anchor identifier.
    pub id: String,
    /// Plot node this anchor belongs to.
    pub node_id: String,
    /// What should have happened by now.
    #[serde(default)]
    pub plot_description: String,
    /// Expected character states.
    #[serde(default)]
    pub characters: Vec<AnchorCharacterState>,
}

/// A document of anchors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnchorSet {
    /// Document format version.
    #[serde(default = "default_version")]
    pub version: String,
    /// Anchors, in authored order.
    #[serde(default)]
    pub anchors: Vec<Anchor>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl AnchorSet {
    /// Parse from JSON.
    ///
    /// # Errors
    /// Returns `FabulaError::Config` for malformed input.
    pub fn from_json(text: &str) -> Result<Self> {
        config::parse_document(text, DocumentFormat::Json)
    }

    /// Parse from TOML.
    ///
    /// # Errors
    /// Returns `FabulaError::Config` for malformed input.
    pub fn from_toml(text: &str) -> Result<Self> {
        config::parse_document(text, DocumentFormat::Toml)
    }

    /// Load from a `.json` or `.toml` file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        config::read_document(path)
    }

    /// The anchor for a plot node.
    #[must_use]
    pub fn find(&self, node_id: &str) -> Option<&Anchor> {
        self.anchors.iter().find(|a| a.node_id == node_id)
    }
}

/// Knobs for [`AnchorEvaluator::compare`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompareOptions {
    /// Relationship differences at or below this are not reported.
    pub relationship_threshold: f64,
    /// Relationship dimensions compared.
    pub dimensions: Vec<RelationshipDimension>,
    /// Whether judgments are compared.
    pub include_judgment: bool,
    /// Divergence assigned to a mismatched judgment.
    pub judgment_divergence: f64,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self::from(&AnchorConfig::default())
    }
}

impl From<&AnchorConfig> for CompareOptions {
    fn from(cfg: &AnchorConfig) -> Self {
        Self {
            relationship_threshold: cfg.relationship_threshold,
            dimensions: cfg.compared_dimensions.clone(),
            include_judgment: true,
            judgment_divergence: cfg.judgment_divergence,
        }
    }
}

/// What a divergence score measures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DimensionKind {
    /// Known information.
    Vision,
    /// One relationship dimension toward one character.
    Relationship {
        /// Other character.
        other: CharacterId,
        /// Dimension.
        dimension: RelationshipDimension,
    },
    /// The anchor's judgment topic.
    Judgment {
        /// Topic.
        key: String,
    },
}

/// One computed divergence score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    /// Character scored.
    pub character_id: CharacterId,
    /// What was measured.
    pub dimension: DimensionKind,
    /// 0 means identical.
    pub divergence: f64,
}

/// A reportable difference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Difference {
    /// The anchor names a character the session does not have.
    MissingCharacter {
        /// Character.
        character_id: CharacterId,
    },
    /// The character should know something and does not.
    MissingKnowledge {
        /// Character.
        character_id: CharacterId,
        /// Expected content.
        content: String,
    },
    /// The character knows something the anchor does not list.
    ExtraKnowledge {
        /// Character.
        character_id: CharacterId,
        /// Unexpected content.
        content: String,
    },
    /// A relationship value is off by more than the threshold.
    Relationship {
        /// Character.
        character_id: CharacterId,
        /// Other character.
        other: CharacterId,
        /// Dimension.
        dimension: RelationshipDimension,
        /// Anchor value.
        expected: f64,
        /// Session value.
        actual: f64,
    },
    /// The character believes something else, or nothing.
    Judgment {
        /// Character.
        character_id: CharacterId,
        /// Topic.
        key: String,
        /// Anchor value.
        expected: String,
        /// Session value.
        actual: Option<String>,
    },
}

/// Overall verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assessment {
    /// No differences at all.
    HighlyConsistent,
    /// Overall divergence below 0.2.
    LargelyConsistent,
    /// Overall divergence below 0.5.
    SomeDivergence,
    /// Everything else.
    SignificantDivergence,
}

impl Assessment {
    fn classify(differences: usize, overall: f64) -> Self {
        if differences == 0 {
            Self::HighlyConsistent
        } else if overall < 0.2 {
            Self::LargelyConsistent
        } else if overall < 0.5 {
            Self::SomeDivergence
        } else {
            Self::SignificantDivergence
        }
    }
}

impl fmt::Display for Assessment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::HighlyConsistent => "highly consistent",
            Self::LargelyConsistent => "largely consistent",
            Self::SomeDivergence => "some divergence",
            Self::SignificantDivergence => "significant divergence",
        };
        f.write_str(s)
    }
}

/// Result of comparing a session with an anchor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    /// Anchor compared against.
    pub anchor_id: String,
    /// Mean of every computed dimension score, 0 if none.
    pub overall_divergence: f64,
    /// Bucketed verdict.
    pub overall_assessment: Assessment,
    /// Every computed score.
    pub dimensions: Vec<DimensionScore>,
    /// Reportable differences.
    pub differences: Vec<Difference>,
}

/// Scores sessions against anchors.
#[derive(Debug, Clone, Default)]
pub struct AnchorEvaluator {
    vision: VisionManager,
}

impl AnchorEvaluator {
    /// Create an evaluator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare against the anchor for the session's current plot node.
    /// `None` when there is no current node or no anchor for it.
    #[must_use]
    pub fn compare_current(
        &self,
        session: &SessionState,
        anchors: &AnchorSet,
        options: &CompareOptions,
    ) -> Option<ComparisonResult> {
        let node = session.world.current_plot_node_id.as_deref()?;
        anchors.find(node).map(|a| self.compare(session, a, options))
    }

    /// Score `session` against `anchor`.
    #[must_use]
    pub fn compare(&self, session: &SessionState, anchor: &Anchor, options: &CompareOptions) -> ComparisonResult {
        let mut dimensions = Vec::new();
        let mut differences = Vec::new();

        for expected in &anchor.characters {
            let id = &expected.character_id;
            let Some(character) = session.character(id) else {
                differences.push(Difference::MissingCharacter { character_id: id.clone() });
                dimensions.push(DimensionScore {
                    character_id: id.clone(),
                    dimension: DimensionKind::Vision,
                    divergence: 1.0,
                });
                continue;
            };

            // Vision
            let anchor_known: BTreeSet<&str> = expected.known_information.iter().map(String::as_str).collect();
            let vision = self.vision.get_filtered_vision(id, &session.information);
            let current_known: BTreeSet<&str> = vision.iter().map(|i| i.content.as_str()).collect();
            let missing: Vec<&str> = anchor_known.difference(&current_known).copied().collect();
            let extra: Vec<&str> = current_known.difference(&anchor_known).copied().collect();
            let denom = anchor_known.len().max(current_known.len()).max(1);
            let vision_divergence = ((missing.len() + extra.len()) as f64 / denom as f64).min(1.0);
            dimensions.push(DimensionScore {
                character_id: id.clone(),
                dimension: DimensionKind::Vision,
                divergence: vision_divergence,
            });
            differences.extend(missing.into_iter().map(|c| Difference::MissingKnowledge {
                character_id: id.clone(),
                content: c.to_string(),
            }));
            differences.extend(extra.into_iter().map(|c| Difference::ExtraKnowledge {
                character_id: id.clone(),
                content: c.to_string(),
            }));

            // Relationships
            for (other, values) in &expected.relationships {
                let current = character.state.relationships.get(other).cloned().unwrap_or_default();
                for dim in &options.dimensions {
                    let Some(&want) = values.get(dim) else {
                        continue;
                    };
                    let have = current.dimension(*dim);
                    let delta = (want - have).abs();
                    dimensions.push(DimensionScore {
                        character_id: id.clone(),
                        dimension: DimensionKind::Relationship { other: other.clone(), dimension: *dim },
                        divergence: delta.min(1.0),
                    });
                    if delta > options.relationship_threshold {
                        differences.push(Difference::Relationship {
                            character_id: id.clone(),
                            other: other.clone(),
                            dimension: *dim,
                            expected: want,
                            actual: have,
                        });
                    }
                }
            }

            // Judgment
            if options.include_judgment {
                if let Some(judgment) = &expected.judgment {
                    let actual = character.state.judgments.get(&judgment.key).cloned();
                    let matches = actual.as_deref() == Some(judgment.value.as_str());
                    dimensions.push(DimensionScore {
                        character_id: id.clone(),
                        dimension: DimensionKind::Judgment { key: judgment.key.clone() },
                        divergence: if matches { 0.0 } else { options.judgment_divergence },
                    });
                    if !matches {
                        differences.push(Difference::Judgment {
                            character_id: id.clone(),
                            key: judgment.key.clone(),
                            expected: judgment.value.clone(),
                            actual,
                        });
                    }
                }
            }
        }

        let overall_divergence = if dimensions.is_empty() {
            0.0
        } else {
            dimensions.iter().map(|d| d.divergence).sum::<f64>() / dimensions.len() as f64
        };
        let overall_assessment = Assessment::classify(differences.len(), overall_divergence);

        debug!(
            anchor = %anchor.id,
            overall = overall_divergence,
            differences = differences.len(),
            assessment = %overall_assessment,
            "Anchor comparison"
        );

        ComparisonResult {
            anchor_id: anchor.id.clone(),
            overall_divergence,
            overall_assessment,
            dimensions,
            differences,
        }
    }
}
