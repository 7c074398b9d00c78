use std::collections::HashSet;

use super::{PlannedWrite, ResolutionOutcome, ResolutionPlan, ResolutionResult, ResolutionStrategy};
use crate::edge::{Edge, EdgeId};
use crate::edge_store::TemporalEdgeStore;
use crate::error::{MemoryError, Result};
use crate::storage::Invalidation;

/// Applies a resolution strategy to a new edge and its conflicts
#[derive(Clone)]
pub struct ContradictionResolver {
    edges: TemporalEdgeStore,
}

impl ContradictionResolver {
    pub fn new(edges: TemporalEdgeStore) -> Self {
        Self { edges }
    }

    /// Close the conflicts and insert the new (or merged) edge
    ///
    /// An edge whose id is already stored is reported as `Duplicate` and
    /// left alone. The whole plan is validated before the first write. A
    /// conflict that someone else closed in the meantime makes the result
    /// `Stale` and the new edge is not inserted; the caller should detect
    /// again.
    pub fn resolve(
        &self,
        new_edge: &Edge,
        conflicts: &[Edge],
        strategy: ResolutionStrategy,
    ) -> Result<ResolutionResult> {
        if let Some(stored) = self.edges.get(&new_edge.id)? {
            return Ok(ResolutionResult {
                strategy,
                outcome: ResolutionOutcome::Duplicate,
                edge: stored,
                invalidated: Vec::new(),
                skipped: Vec::new(),
                stale: Vec::new(),
            });
        }
        let plan = self.plan(new_edge, conflicts, strategy)?;
        self.apply(plan)
    }

    /// Compute and validate a plan without writing
    pub fn plan(
        &self,
        new_edge: &Edge,
        conflicts: &[Edge],
        strategy: ResolutionStrategy,
    ) -> Result<ResolutionPlan> {
        let plan = ResolutionPlan::build(new_edge.clone(), conflicts, strategy, self.edges.now())?;
        if strategy == ResolutionStrategy::SplitTimeline {
            self.check_timeline(&plan)?;
        }
        Ok(plan)
    }

    /// Execute a validated plan
    pub fn apply(&self, plan: ResolutionPlan) -> Result<ResolutionResult> {
        let strategy = plan.strategy;
        let edge = match plan.write {
            PlannedWrite::Restate(existing) => {
                log::debug!("Edge {} already asserts this fact", existing.id);
                return Ok(ResolutionResult {
                    strategy,
                    outcome: ResolutionOutcome::Restated,
                    edge: existing,
                    invalidated: Vec::new(),
                    skipped: plan.skipped,
                    stale: Vec::new(),
                });
            }
            PlannedWrite::Insert(edge) => edge,
        };

        let mut invalidated = Vec::new();
        let mut skipped = plan.skipped;
        let mut stale = Vec::new();

        for closing in &plan.closings {
            match self
                .edges
                .invalidate(&closing.edge_id, closing.invalid_at, closing.invalidated_by)?
            {
                Invalidation::Applied(closed) => {
                    log::debug!(
                        "Closed edge {} at {} ({})",
                        closed.id,
                        closing.invalid_at,
                        strategy
                    );
                    invalidated.push(closed);
                }
                Invalidation::AlreadyInvalidated(current) if closing.already_applied(&current) => {
                    skipped.push(current.id);
                }
                Invalidation::AlreadyInvalidated(current) => {
                    log::warn!("Edge {} was closed by another writer", current.id);
                    stale.push(current.id);
                }
                Invalidation::NotFound(id) => {
                    log::warn!("Conflicting edge {} disappeared during resolution", id);
                    stale.push(id);
                }
            }
        }

        if !stale.is_empty() {
            return Ok(ResolutionResult {
                strategy,
                outcome: ResolutionOutcome::Stale,
                edge,
                invalidated,
                skipped,
                stale,
            });
        }

        let id = self.edges.insert(&edge)?;
        let stored = self.edges.get(&id)?.unwrap_or(edge);
        Ok(ResolutionResult {
            strategy,
            outcome: ResolutionOutcome::Inserted,
            edge: stored,
            invalidated,
            skipped,
            stale,
        })
    }

    /// Split segments of one triple must stay pairwise disjoint
    ///
    /// Open segments are either closed by the plan or end the new segment,
    /// so only already closed segments can still overlap it.
    fn check_timeline(&self, plan: &ResolutionPlan) -> Result<()> {
        let edge = match plan.inserted_edge() {
            Some(edge) => edge,
            None => return Ok(()),
        };
        let closing: HashSet<EdgeId> = plan.closings.iter().map(|c| c.edge_id).collect();
        for segment in self.edges.history_of(&edge.key())? {
            if segment.id == edge.id || segment.is_open() || closing.contains(&segment.id) {
                continue;
            }
            if segment.range().overlaps(&edge.range()) {
                return Err(MemoryError::TimelineOverlap(segment.id));
            }
        }
        Ok(())
    }
}
