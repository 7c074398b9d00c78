//! Contradiction detection and resolution
//!
//! A new edge contradicts every open edge on the same
//! `(from_id, to_id, type)` triple. [`ContradictionDetector`] finds those
//! edges, [`ResolutionPlan`] decides how each one ends under the chosen
//! [`ResolutionStrategy`], and [`ContradictionResolver`] applies the plan
//! with compare-and-set invalidation before inserting the final edge.

mod detector;
mod plan;
mod resolver;

pub use detector::ContradictionDetector;
pub use plan::{Closing, PlannedWrite, ResolutionPlan};
pub use resolver::ContradictionResolver;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::edge::{Edge, EdgeId};
use crate::error::MemoryError;

/// How a new edge settles its contradictions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Close each conflict when the new fact starts, pointing at the new edge
    #[default]
    NewestWins,
    /// Fold conflicts into one edge spanning their combined validity
    Merge,
    /// Close each conflict when the new fact starts, as sequential states
    SplitTimeline,
}

impl ResolutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewestWins => "newest_wins",
            Self::Merge => "merge",
            Self::SplitTimeline => "split_timeline",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "newest_wins" => Ok(Self::NewestWins),
            "merge" => Ok(Self::Merge),
            "split_timeline" => Ok(Self::SplitTimeline),
            other => Err(MemoryError::config(format!(
                "unknown resolution strategy '{}'",
                other
            ))),
        }
    }
}

/// What happened to the submitted edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionOutcome {
    /// The final edge is stored
    Inserted,
    /// An open edge already asserts the same fact, with the same content, from the same instant; nothing was written
    Restated,
    /// Another writer closed a conflict first; the final edge was not inserted
    Stale,
    /// The edge id is already stored; nothing was written
    Duplicate,
}

/// Report of one resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub strategy: ResolutionStrategy,
    pub outcome: ResolutionOutcome,
    /// The stored edge, the restated edge, or for `Stale` the edge that was not inserted
    pub edge: Edge,
    /// Conflicts closed by this call, in ascending `valid_at` order
    pub invalidated: Vec<Edge>,
    /// Conflicts that were already closed as planned
    pub skipped: Vec<EdgeId>,
    /// Conflicts closed by someone else in the meantime
    pub stale: Vec<EdgeId>,
}

impl ResolutionResult {
    pub fn is_stale(&self) -> bool {
        self.outcome == ResolutionOutcome::Stale
    }

    /// Ids of the edges this call closed
    pub fn invalidated_ids(&self) -> Vec<EdgeId> {
        self.invalidated.iter().map(|e| e.id).collect()
    }
}
