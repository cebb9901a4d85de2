//! Engine counters.
//!
//! Lock-free `AtomicU64` counters bumped on the turn path and read on
//! demand. The orchestrator owns one set; hosts may export a
//! [`CounterSnapshot`] however they like.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Atomic counters for turn-level events.
#[derive(Debug)]
pub struct EngineCounters {
    /// Successful turns.
    pub turns_advanced: AtomicU64,
    /// Turns that returned `success: false`.
    pub turns_failed: AtomicU64,
    /// Conflicts detected by the arbitrator.
    pub conflicts_detected: AtomicU64,
    /// Arbitrations that deadlocked.
    pub deadlocks: AtomicU64,
    /// Information synthesized by inference.
    pub inferences: AtomicU64,
    /// Information un-linked by forgetting.
    pub forgotten: AtomicU64,
}

impl EngineCounters {
    /// Zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            turns_advanced: AtomicU64::new(0),
            turns_failed: AtomicU64::new(0),
            conflicts_detected: AtomicU64::new(0),
            deadlocks: AtomicU64::new(0),
            inferences: AtomicU64::new(0),
            forgotten: AtomicU64::new(0),
        }
    }

    /// Add `n` to a counter.
    pub fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Read every counter.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            turns_advanced: self.turns_advanced.load(Ordering::Relaxed),
            turns_failed: self.turns_failed.load(Ordering::Relaxed),
            conflicts_detected: self.conflicts_detected.load(Ordering::Relaxed),
            deadlocks: self.deadlocks.load(Ordering::Relaxed),
            inferences: self.inferences.load(Ordering::Relaxed),
            forgotten: self.forgotten.load(Ordering::Relaxed),
        }
    }
}

impl Default for EngineCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Counter values at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    /// Successful turns.
    pub turns_advanced: u64,
    /// Failed turns.
    pub turns_failed: u64,
    /// Conflicts detected.
    pub conflicts_detected: u64,
    /// Deadlocked arbitrations.
    pub deadlocks: u64,
    /// Inferred information.
    pub inferences: u64,
    /// Forgotten information.
    pub forgotten: u64,
}

impl CounterSnapshot {
    /// Prometheus text exposition.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let rows = [
            ("fabula_turns_advanced_total", "Successful turns", self.turns_advanced),
            ("fabula_turns_failed_total", "Failed turns", self.turns_failed),
            ("fabula_conflicts_detected_total", "Conflicts detected", self.conflicts_detected),
            ("fabula_deadlocks_total", "Deadlocked arbitrations", self.deadlocks),
            ("fabula_inferences_total", "Inferred information", self.inferences),
            ("fabula_forgotten_total", "Forgotten information", self.forgotten),
        ];
        rows.iter()
            .map(|(name, help, value)| format!("# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n"))
            .collect()
    }
}
