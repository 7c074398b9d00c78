use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::ResolutionStrategy;
use crate::attributes::{Attributes, MergePolicy};
use crate::edge::{Edge, EdgeId};
use crate::error::{MemoryError, Result};

/// One conflicting edge and the way it will be closed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Closing {
    pub edge_id: EdgeId,
    /// `valid_at` of the conflict, kept for validation
    pub valid_at: DateTime<Utc>,
    pub invalid_at: DateTime<Utc>,
    pub invalidated_by: Option<EdgeId>,
}

impl Closing {
    /// Whether `current`, found already closed, ended the way this closing intends
    ///
    /// With an `invalidated_by` the closer's id is enough; merge closes at
    /// write time, so a replay carries a different instant. Without one the
    /// instant has to match.
    pub fn already_applied(&self, current: &Edge) -> bool {
        if current.invalidated_by != self.invalidated_by {
            return false;
        }
        self.invalidated_by.is_some() || current.invalid_at == Some(self.invalid_at)
    }
}

/// The write that follows the closings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlannedWrite {
    /// Insert this edge
    Insert(Edge),
    /// Write nothing; this stored edge already says the same thing
    Restate(Edge),
}

/// Everything a resolution will write, computed before any write happens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionPlan {
    pub strategy: ResolutionStrategy,
    /// Conflicts to close, ascending by `valid_at`
    pub closings: Vec<Closing>,
    pub write: PlannedWrite,
    /// Conflicts that were already closed when the plan was built
    pub skipped: Vec<EdgeId>,
}

impl ResolutionPlan {
    /// Plan how `new_edge` settles `conflicts` under `strategy`
    ///
    /// Conflicts that are already closed, belong to another triple or are
    /// the new edge itself are left alone. `now` is the write time used by
    /// merge.
    pub fn build(
        new_edge: Edge,
        conflicts: &[Edge],
        strategy: ResolutionStrategy,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let mut skipped = Vec::new();
        let mut live: Vec<&Edge> = Vec::new();
        for conflict in conflicts {
            if conflict.id == new_edge.id || !conflict.same_triple(&new_edge) {
                continue;
            }
            if conflict.invalid_at.is_some() {
                skipped.push(conflict.id);
                continue;
            }
            live.push(conflict);
        }
        live.sort_by(|a, b| {
            a.valid_at
                .cmp(&b.valid_at)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });

        let mut plan = match strategy {
            ResolutionStrategy::NewestWins | ResolutionStrategy::SplitTimeline => {
                Self::supersede(new_edge, &live, strategy)?
            }
            ResolutionStrategy::Merge => Self::merge(new_edge, &live, now),
        };
        plan.skipped = skipped;
        plan.validate()?;
        Ok(plan)
    }

    /// Edge that will be inserted, if any
    pub fn inserted_edge(&self) -> Option<&Edge> {
        match &self.write {
            PlannedWrite::Insert(edge) => Some(edge),
            PlannedWrite::Restate(_) => None,
        }
    }

    /// Every interval the plan writes must be non-empty
    pub fn validate(&self) -> Result<()> {
        for closing in &self.closings {
            if closing.invalid_at <= closing.valid_at {
                return Err(MemoryError::invalid_range(closing.valid_at, closing.invalid_at));
            }
        }
        if let PlannedWrite::Insert(edge) = &self.write {
            edge.range().validate()?;
        }
        Ok(())
    }

    /// newest_wins and split_timeline
    ///
    /// Earlier conflicts end where the new edge starts. A conflict starting
    /// later than the new edge is a later fact that ends the new edge
    /// instead. A conflict starting at the same instant makes the new edge a
    /// restatement when both carry the same content, and is refused with
    /// `SameInstantConflict` otherwise.
    fn supersede(mut edge: Edge, live: &[&Edge], strategy: ResolutionStrategy) -> Result<Self> {
        let newest_wins = strategy == ResolutionStrategy::NewestWins;

        if let Some(existing) = live.iter().find(|c| c.valid_at == edge.valid_at) {
            // closing `existing` here would leave it an empty interval
            if !same_payload(existing, &edge) {
                return Err(MemoryError::SameInstantConflict(existing.id));
            }
            return Ok(Self {
                strategy,
                closings: Vec::new(),
                write: PlannedWrite::Restate((*existing).clone()),
                skipped: Vec::new(),
            });
        }

        if let Some(later) = live.iter().find(|c| c.valid_at > edge.valid_at) {
            if edge.invalid_at.map_or(true, |end| end > later.valid_at) {
                edge.invalid_at = Some(later.valid_at);
                edge.invalidated_by = if newest_wins { Some(later.id) } else { None };
            }
        }

        let closings = live
            .iter()
            .filter(|c| c.valid_at < edge.valid_at)
            .map(|c| Closing {
                edge_id: c.id,
                valid_at: c.valid_at,
                invalid_at: edge.valid_at,
                invalidated_by: if newest_wins { Some(edge.id) } else { None },
            })
            .collect();

        Ok(Self {
            strategy,
            closings,
            write: PlannedWrite::Insert(edge),
            skipped: Vec::new(),
        })
    }

    /// Fold the conflicts into the new edge and close them at write time
    ///
    /// A conflict that starts at or after `now` is closed just after its own
    /// start instead, so every closing stays a non-empty interval.
    fn merge(mut merged: Edge, live: &[&Edge], now: DateTime<Utc>) -> Self {
        if !live.is_empty() {
            let mut attributes = Attributes::new();
            for conflict in live {
                attributes.merge(&conflict.attributes, MergePolicy::PreferNew);
            }
            attributes.merge(&merged.attributes, MergePolicy::PreferNew);
            merged.attributes = attributes;

            merged.valid_at = live
                .iter()
                .map(|c| c.valid_at)
                .fold(merged.valid_at, |earliest, t| earliest.min(t));
            merged.invalid_at = merged_invalid_at(
                std::iter::once(merged.invalid_at).chain(live.iter().map(|c| c.invalid_at)),
            );
            merged.confidence = live
                .iter()
                .map(|c| c.confidence)
                .fold(merged.confidence, f32::max);
        }

        let closings = live
            .iter()
            .map(|c| Closing {
                edge_id: c.id,
                valid_at: c.valid_at,
                invalid_at: now.max(just_after(c.valid_at)),
                invalidated_by: Some(merged.id),
            })
            .collect();

        Self {
            strategy: ResolutionStrategy::Merge,
            closings,
            write: PlannedWrite::Insert(merged),
            skipped: Vec::new(),
        }
    }
}

/// Whether two edges on the same triple and instant say the same thing
fn same_payload(existing: &Edge, new: &Edge) -> bool {
    existing.attributes == new.attributes
        && existing.confidence == new.confidence
        && existing.invalid_at == new.invalid_at
}

fn just_after(at: DateTime<Utc>) -> DateTime<Utc> {
    at.checked_add_signed(Duration::nanoseconds(1)).unwrap_or(at)
}

/// Latest `invalid_at` when every participant is closed, otherwise still open
fn merged_invalid_at(
    ends: impl IntoIterator<Item = Option<DateTime<Utc>>>,
) -> Option<DateTime<Utc>> {
    let mut latest: Option<DateTime<Utc>> = None;
    for end in ends {
        let end = end?;
        latest = Some(latest.map_or(end, |l| l.max(end)));
    }
    latest
}
