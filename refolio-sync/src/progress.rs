//! Phase-weighted, monotonic progress reporting.
//!
//! A cycle moves through six fixed phases per library. Each phase owns a
//! weight slice of the overall 0.0..=1.0 range, and a library's fraction is
//! the completed prefix plus the weighted in-phase ratio. Reported values
//! never regress: the reporter keeps the maximum it has seen per library,
//! so restarts and re-scans inside a phase don't make the bar jump back.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use refolio_model::LibraryId;

/// The phases of one library's sync cycle, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    Index,
    Diff,
    Merge,
    Apply,
    Hydrate,
    Finalize,
}

impl SyncPhase {
    pub const ALL: [SyncPhase; 6] = [
        SyncPhase::Index,
        SyncPhase::Diff,
        SyncPhase::Merge,
        SyncPhase::Apply,
        SyncPhase::Hydrate,
        SyncPhase::Finalize,
    ];

    /// Share of the overall range this phase owns. Weights sum to 1.0;
    /// the expensive phases (remote fetch, payload hydration) dominate.
    pub fn weight(self) -> f32 {
        match self {
            SyncPhase::Index => 0.30,
            SyncPhase::Diff => 0.05,
            SyncPhase::Merge => 0.05,
            SyncPhase::Apply => 0.25,
            SyncPhase::Hydrate => 0.30,
            SyncPhase::Finalize => 0.05,
        }
    }

    /// Sum of the weights of every earlier phase.
    pub fn offset(self) -> f32 {
        Self::ALL
            .iter()
            .take_while(|phase| **phase != self)
            .map(|phase| phase.weight())
            .sum()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyncPhase::Index => "index",
            SyncPhase::Diff => "diff",
            SyncPhase::Merge => "merge",
            SyncPhase::Apply => "apply",
            SyncPhase::Hydrate => "hydrate",
            SyncPhase::Finalize => "finalize",
        }
    }
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks per-library progress fractions for the running cycle.
#[derive(Debug, Default)]
pub struct ProgressReporter {
    fractions: Mutex<HashMap<LibraryId, f32>>,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records progress `ratio` (clamped to 0..=1) inside `phase` for one
    /// library and returns the library's fraction after the update.
    pub fn update(&self, library: &LibraryId, phase: SyncPhase, ratio: f32) -> f32 {
        let ratio = ratio.clamp(0.0, 1.0);
        let candidate = phase.offset() + phase.weight() * ratio;
        let mut fractions = self.lock();
        let entry = fractions.entry(library.clone()).or_insert(0.0);
        if candidate > *entry {
            *entry = candidate;
        }
        *entry
    }

    /// Current fraction for one library, if it is being tracked.
    pub fn library_fraction(&self, library: &LibraryId) -> Option<f32> {
        self.lock().get(library).copied()
    }

    /// Overall fraction: unweighted average across tracked libraries, or
    /// 0.0 when nothing is in flight.
    pub fn overall(&self) -> f32 {
        let fractions = self.lock();
        if fractions.is_empty() {
            return 0.0;
        }
        fractions.values().sum::<f32>() / fractions.len() as f32
    }

    /// Stops tracking one library.
    pub fn clear(&self, library: &LibraryId) {
        self.lock().remove(library);
    }

    /// Drops all tracked fractions, e.g. after a cancelled cycle.
    pub fn reset(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<LibraryId, f32>> {
        self.fractions.lock().unwrap_or_else(|e| e.into_inner())
    }
}
