//! # Fabula Core Library
//!
//! Narrative consistency engine for multi-character interactive fiction.
//! Language-model output is treated as an untrusted proposal; this crate
//! owns the state that keeps a story coherent:
//!
//! - **Information**: a global ledger of facts plus per-character
//!   visibility. A character only ever sees what it has been linked to.
//! - **Triggers**: declarative rules that mutate relationships and
//!   abilities when events fire.
//! - **Arbitration**: detect mutually exclusive actions and pick a winner.
//! - **Orchestration**: the turn pipeline that ties it all together.
//! - **Anchors**: author checkpoints to measure how far a session drifted.
//!
//! Generation, input parsing and storage are ports ([`ports`]); the crate
//! ships SQLite and in-memory stores and leaves generation to the host.

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod anchor;
pub mod behavior;
pub mod character;
pub mod config;
pub mod conflict;
pub mod error;
pub mod information;
pub mod metrics;
pub mod orchestrator;
pub mod persistence;
pub mod ports;
pub mod snapshot;
pub mod state;
pub mod telemetry;
pub mod trigger;
pub mod types;
pub mod world;

pub use config::FabulaConfig;
pub use error::{FabulaError, Result};
pub use information::{Information, InformationStore, VisionManager};
pub use orchestrator::{AdvanceError, AdvanceResult, StoryOrchestrator};
pub use types::*;
pub use world::SessionState;
