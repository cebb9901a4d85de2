//! Configuration for the fabula engine.
//!
//! `FabulaConfig` maps directly to `fabula.toml`. Rule tables (triggers,
//! attribution, information rules) live in their own documents and may be
//! JSON or TOML; [`parse_document`] and [`read_document`] are the shared
//! entry points so every table fails the same way on bad input.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::character::RelationshipDimension;
use crate::conflict::ArbitrationStrategy;
use crate::error::{FabulaError, Result};

/// Top-level engine configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FabulaConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Turn orchestration settings.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Conflict arbitration settings.
    #[serde(default)]
    pub arbitration: ArbitrationConfig,
    /// Anchor comparison settings.
    #[serde(default)]
    pub anchor: AnchorConfig,
    /// Persistence settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl FabulaConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `FabulaError::Config` if the TOML is invalid or a value is
    /// out of range.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let cfg: Self = parse_document(toml_str, DocumentFormat::Toml)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Range checks that serde cannot express.
    ///
    /// # Errors
    /// Returns `FabulaError::Config` describing the first bad value.
    pub fn validate(&self) -> Result<()> {
        if self.orchestrator.recent_event_window == 0 {
            return Err(FabulaError::Config("orchestrator.recent_event_window must be > 0".into()));
        }
        let threshold = self.anchor.relationship_threshold;
        if !(threshold.is_finite() && (0.0..=1.0).contains(&threshold)) {
            return Err(FabulaError::Config(format!(
                "anchor.relationship_threshold must be within [0, 1], got {threshold}"
            )));
        }
        if !(self.anchor.judgment_divergence.is_finite() && self.anchor.judgment_divergence > 0.0) {
            return Err(FabulaError::Config("anchor.judgment_divergence must be positive".into()));
        }
        if self.arbitration.exclusive_keywords.iter().any(|k| k.trim().is_empty()) {
            return Err(FabulaError::Config("arbitration.exclusive_keywords contains an empty entry".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable, multi-line.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// General system settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Pretty,
        }
    }
}

/// Turn orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// How many recent events the response generator sees.
    #[serde(default = "default_10")]
    pub recent_event_window: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            recent_event_window: 10,
        }
    }
}

/// Conflict arbitration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrationConfig {
    /// Terms marking an action as exclusive. Two actions that both contain
    /// one of these conflict.
    #[serde(default = "default_exclusive_keywords")]
    pub exclusive_keywords: Vec<String>,
    /// Strategy used by multi-character turns.
    #[serde(default)]
    pub default_strategy: ArbitrationStrategy,
    /// Seed for the `random` strategy. Absent means seeded from entropy.
    #[serde(default)]
    pub random_seed: Option<u64>,
}

impl Default for ArbitrationConfig {
    fn default() -> Self {
        Self {
            exclusive_keywords: default_exclusive_keywords(),
            default_strategy: ArbitrationStrategy::default(),
            random_seed: None,
        }
    }
}

/// Anchor comparison settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorConfig {
    /// Relationship differences at or below this are not reported.
    #[serde(default = "default_0_1")]
    pub relationship_threshold: f64,
    /// Relationship dimensions compared against anchors.
    #[serde(default = "default_compared_dimensions")]
    pub compared_dimensions: Vec<RelationshipDimension>,
    /// Divergence assigned to a mismatched judgment.
    #[serde(default = "default_1_0")]
    pub judgment_divergence: f64,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            relationship_threshold: 0.1,
            compared_dimensions: default_compared_dimensions(),
            judgment_divergence: 1.0,
        }
    }
}

/// Where sessions and snapshots are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Process memory only.
    #[default]
    Memory,
    /// A SQLite file.
    Sqlite,
}

/// Persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Storage backend.
    #[serde(default)]
    pub backend: StorageBackend,
    /// Database path for the SQLite backend.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// Enable WAL journaling.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: default_db_path(),
            wal_mode: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Rule documents
// ---------------------------------------------------------------------------

/// Serialization format of a rule document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    /// JSON.
    Json,
    /// TOML.
    Toml,
}

impl DocumentFormat {
    /// Guess the format from a file extension. Anything but `.toml` is JSON.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Self::Toml,
            _ => Self::Json,
        }
    }
}

/// Deserialize a document. Parse failures become `FabulaError::Config`.
///
/// # Errors
/// Returns `FabulaError::Config` with the parser's message.
pub fn parse_document<T: DeserializeOwned>(text: &str, format: DocumentFormat) -> Result<T> {
    match format {
        DocumentFormat::Json => serde_json::from_str(text).map_err(|e| FabulaError::Config(e.to_string())),
        DocumentFormat::Toml => toml::from_str(text).map_err(|e| FabulaError::Config(e.to_string())),
    }
}

/// Read and deserialize a document, picking the format from the extension.
///
/// # Errors
/// Returns `FabulaError::Io` if the file cannot be read, otherwise as
/// [`parse_document`].
pub fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)?;
    parse_document(&text, DocumentFormat::from_path(path))
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_db_path() -> PathBuf { PathBuf::from("fabula.db") }
fn default_0_1() -> f64 { 0.1 }
fn default_1_0() -> f64 { 1.0 }
fn default_10() -> usize { 10 }
fn default_compared_dimensions() -> Vec<RelationshipDimension> { vec![RelationshipDimension::Trust] }

/// Built-in exclusivity terms, English and Chinese.
#[must_use]
pub fn default_exclusive_keywords() -> Vec<String> {
    [
        "occupy", "control", "seize", "block", "intercept", "attack",
        "占领", "控制", "夺取", "阻止", "拦截", "攻击",
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg = FabulaConfig::from_toml("").expect("defaults");
        assert_eq!(cfg.orchestrator.recent_event_window, 10);
        assert_eq!(cfg.arbitration.default_strategy, ArbitrationStrategy::Priority);
        assert_eq!(cfg.anchor.compared_dimensions, vec![RelationshipDimension::Trust]);
        assert!(cfg.arbitration.exclusive_keywords.iter().any(|k| k == "占领"));
    }

    #[test]
    fn sections_override_defaults() {
        let cfg = FabulaConfig::from_toml(
            r#"
            [general]
            log_level = "debug"
            log_format = "json"

            [arbitration]
            exclusive_keywords = ["duel"]
            default_strategy = "random"
            random_seed = 7

            [anchor]
            relationship_threshold = 0.25
            compared_dimensions = ["trust", "hostility"]

            [persistence]
            backend = "sqlite"
            path = "saves/game.db"
            "#,
        )
        .expect("valid");
        assert_eq!(cfg.general.log_format, LogFormat::Json);
        assert_eq!(cfg.arbitration.exclusive_keywords, vec!["duel".to_string()]);
        assert_eq!(cfg.arbitration.default_strategy, ArbitrationStrategy::Random);
        assert_eq!(cfg.arbitration.random_seed, Some(7));
        assert_eq!(cfg.anchor.compared_dimensions.len(), 2);
        assert_eq!(cfg.persistence.backend, StorageBackend::Sqlite);
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let err = FabulaConfig::from_toml("[anchor]\nrelationship_threshold = 3.0").unwrap_err();
        assert!(matches!(err, FabulaError::Config(_)));
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        let err = FabulaConfig::from_toml("[arbitration]\ndefault_strategy = \"vote\"").unwrap_err();
        assert!(matches!(err, FabulaError::Config(_)));
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(DocumentFormat::from_path(Path::new("rules.toml")), DocumentFormat::Toml);
        assert_eq!(DocumentFormat::from_path(Path::new("rules.json")), DocumentFormat::Json);
    }

    #[test]
    fn read_document_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("fabula.toml");
        std::fs::write(&path, "[orchestrator]\nrecent_event_window = 3\n").expect("write");
        let cfg = FabulaConfig::from_file(&path).expect("load");
        assert_eq!(cfg.orchestrator.recent_event_window, 3);
    }
}
