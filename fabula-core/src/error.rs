//! Error types for the fabula core library.
//!
//! Only configuration, persistence and programmer errors travel through
//! [`FabulaError`]. Expected narrative outcomes (unknown character, invalid
//! input, arbitration deadlock) are ordinary return values.

use thiserror::Error;

/// Top-level error type for all fabula operations.
#[derive(Error, Debug)]
pub enum FabulaError {
    /// Configuration could not be parsed or failed validation.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A trigger or information rule has an invalid shape.
    #[error("Invalid rule `{rule_id}`: {reason}")]
    InvalidRule {
        /// Identifier of the offending rule.
        rule_id: String,
        /// What is wrong with it.
        reason: String,
    },

    /// An information-attribution rule has an invalid shape.
    #[error("Invalid attribution rule for event type `{event_type}`: {reason}")]
    InvalidAttribution {
        /// Event type the rule is bound to.
        event_type: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// SQLite persistence error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A storage backend failed for a reason other than SQLite itself.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The external character-response generator failed.
    #[error("Response generation failed: {0}")]
    Generation(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for FabulaError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, FabulaError>;
