//! Document/graph store abstraction
//!
//! The memory core never talks to a database directly. Everything goes
//! through [`GraphStore`], which offers typed get/put/query per collection,
//! a case-insensitive name index, triple-indexed edge queries and a
//! compare-and-set invalidation primitive.

mod memory;
mod migration;
mod rocks;

pub use memory::InMemoryStore;
pub use migration::CURRENT_VERSION;
pub use rocks::RocksStore;

use chrono::{DateTime, Utc};

use crate::edge::{Edge, EdgeFilter, EdgeId};
use crate::entity::{Entity, EntityId};
use crate::episode::{Episode, EpisodeFilter, EpisodeId};
use crate::error::{MemoryError, Result};

/// Outcome of a compare-and-set invalidation
#[derive(Debug, Clone, PartialEq)]
pub enum Invalidation {
    /// The edge was open and is now closed; carries the updated edge
    Applied(Edge),
    /// No edge with this id exists
    NotFound(EdgeId),
    /// The edge was already closed; carries its current state
    AlreadyInvalidated(Edge),
}

impl Invalidation {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    /// Turn the no-op outcomes into their error kinds
    pub fn into_result(self) -> Result<Edge> {
        match self {
            Self::Applied(edge) => Ok(edge),
            Self::NotFound(id) => Err(MemoryError::EdgeNotFound(id)),
            Self::AlreadyInvalidated(edge) => Err(MemoryError::AlreadyInvalidated(edge.id)),
        }
    }
}

/// Mutation applied atomically to a stored record
pub type Mutation<'a, T> = &'a mut dyn FnMut(&mut T) -> Result<()>;

/// Typed document/graph store used by every component
///
/// Implementations must make `invalidate_edge_if_open`, `insert_edge_if_absent`
/// and the `update_*` methods atomic with respect to concurrent callers.
pub trait GraphStore: Send + Sync {
    /// Get an entity by ID
    fn get_entity(&self, id: &EntityId) -> Result<Option<Entity>>;

    /// Create or replace an entity
    fn put_entity(&self, entity: &Entity) -> Result<()>;

    /// Apply `mutation` to a stored entity; None if absent
    fn update_entity(&self, id: &EntityId, mutation: Mutation<'_, Entity>)
        -> Result<Option<Entity>>;

    /// Entities whose normalized name equals `normalized_name`
    fn find_entities_by_name(&self, normalized_name: &str) -> Result<Vec<Entity>>;

    /// Every stored entity
    fn list_entities(&self) -> Result<Vec<Entity>>;

    fn count_entities(&self) -> Result<usize>;

    /// Get an edge by ID
    fn get_edge(&self, id: &EdgeId) -> Result<Option<Edge>>;

    /// Store a new edge; returns false, writing nothing, if the id exists
    fn insert_edge_if_absent(&self, edge: &Edge) -> Result<bool>;

    /// Edges matching `filter`, ordered by `valid_at`, then `created_at`, then id
    fn query_edges(&self, filter: &EdgeFilter) -> Result<Vec<Edge>>;

    /// Close an edge only if its `invalid_at` is still null
    ///
    /// Fails with `InvalidTemporalRange` if `invalid_at` would not come
    /// strictly after the edge's `valid_at`.
    fn invalidate_edge_if_open(
        &self,
        id: &EdgeId,
        invalid_at: DateTime<Utc>,
        invalidated_by: Option<EdgeId>,
    ) -> Result<Invalidation>;

    /// Get an episode by ID
    fn get_episode(&self, id: &EpisodeId) -> Result<Option<Episode>>;

    /// Create or replace an episode
    fn put_episode(&self, episode: &Episode) -> Result<()>;

    /// Apply `mutation` to a stored episode; None if absent
    fn update_episode(
        &self,
        id: &EpisodeId,
        mutation: Mutation<'_, Episode>,
    ) -> Result<Option<Episode>>;

    /// Episodes matching `filter`, ordered by `start_time`
    fn query_episodes(&self, filter: &EpisodeFilter) -> Result<Vec<Episode>>;
}

/// Close `edge` in place, enforcing the open-and-later rules
pub(crate) fn close_edge(
    edge: &mut Edge,
    invalid_at: DateTime<Utc>,
    invalidated_by: Option<EdgeId>,
) -> Result<bool> {
    if edge.invalid_at.is_some() {
        return Ok(false);
    }
    if invalid_at <= edge.valid_at {
        return Err(MemoryError::invalid_range(edge.valid_at, invalid_at));
    }
    edge.invalid_at = Some(invalid_at);
    edge.invalidated_by = invalidated_by;
    Ok(true)
}

pub(crate) fn sort_edges(edges: &mut [Edge]) {
    edges.sort_by(|a, b| {
        a.valid_at
            .cmp(&b.valid_at)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });
}

pub(crate) fn sort_episodes(episodes: &mut [Episode]) {
    episodes.sort_by(|a, b| a.start_time.cmp(&b.start_time).then(a.id.cmp(&b.id)));
}
