//! Bi-temporal relationship store
//!
//! [`TemporalEdgeStore`] wraps a [`GraphStore`] with the temporal rules for
//! edges: inserts are checked against the validity interval, invalidation is
//! compare-and-set, and reads can be pinned to any instant.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::edge::{Edge, EdgeFilter, EdgeId, EdgeKey};
use crate::entity::EntityId;
use crate::error::Result;
use crate::storage::{GraphStore, Invalidation};
use crate::temporal::Clock;

/// CRUD and time-indexed queries over edges
#[derive(Clone)]
pub struct TemporalEdgeStore {
    store: Arc<dyn GraphStore>,
    clock: Arc<dyn Clock>,
}

impl TemporalEdgeStore {
    pub fn new(store: Arc<dyn GraphStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Current time according to the injected clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Store an edge
    ///
    /// Rejects `invalid_at <= valid_at` with `InvalidTemporalRange` before
    /// anything is written. Inserting an id that is already stored writes
    /// nothing and returns the same id.
    pub fn insert(&self, edge: &Edge) -> Result<EdgeId> {
        edge.range().validate()?;
        if !self.store.insert_edge_if_absent(edge)? {
            log::debug!("Edge {} already stored, insert skipped", edge.id);
        }
        Ok(edge.id)
    }

    /// Close an open edge
    ///
    /// Never overwrites: a missing or already closed edge comes back as the
    /// matching [`Invalidation`] outcome.
    pub fn invalidate(
        &self,
        id: &EdgeId,
        invalid_at: DateTime<Utc>,
        invalidated_by: Option<EdgeId>,
    ) -> Result<Invalidation> {
        self.store
            .invalidate_edge_if_open(id, invalid_at, invalidated_by)
    }

    pub fn get(&self, id: &EdgeId) -> Result<Option<Edge>> {
        self.store.get_edge(id)
    }

    /// Every edge matching `filter`, regardless of validity
    pub fn query(&self, filter: &EdgeFilter) -> Result<Vec<Edge>> {
        self.store.query_edges(filter)
    }

    /// Edges that were valid at `time`: `valid_at <= time < invalid_at`
    pub fn query_valid_at(&self, time: DateTime<Utc>, filter: &EdgeFilter) -> Result<Vec<Edge>> {
        let mut edges = self.store.query_edges(filter)?;
        edges.retain(|edge| edge.was_valid_at(time));
        Ok(edges)
    }

    /// Edges valid right now
    pub fn query_current(&self, filter: &EdgeFilter) -> Result<Vec<Edge>> {
        self.query_valid_at(self.now(), filter)
    }

    /// Full timeline of one triple, ordered by `valid_at` then `created_at`
    pub fn history(&self, from_id: EntityId, to_id: EntityId, edge_type: &str) -> Result<Vec<Edge>> {
        self.history_of(&EdgeKey {
            from_id,
            to_id,
            edge_type: edge_type.to_string(),
        })
    }

    pub fn history_of(&self, key: &EdgeKey) -> Result<Vec<Edge>> {
        self.store.query_edges(&EdgeFilter::triple(key))
    }
}
