use crate::edge::{Edge, EdgeFilter};
use crate::edge_store::TemporalEdgeStore;
use crate::error::Result;

/// Finds open edges that a new edge contradicts
#[derive(Clone)]
pub struct ContradictionDetector {
    edges: TemporalEdgeStore,
}

impl ContradictionDetector {
    pub fn new(edges: TemporalEdgeStore) -> Self {
        Self { edges }
    }

    /// Open edges on the same `(from_id, to_id, type)` triple, ascending by `valid_at`
    ///
    /// The new edge itself is never its own conflict, so detecting again
    /// after it was stored finds nothing new.
    pub fn find_conflicts(&self, new_edge: &Edge) -> Result<Vec<Edge>> {
        let filter = EdgeFilter::triple(&new_edge.key()).open_only();
        let mut conflicts = self.edges.query(&filter)?;
        conflicts.retain(|edge| edge.id != new_edge.id);
        Ok(conflicts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::CandidateEdge;
    use crate::entity::EntityId;
    use crate::storage::InMemoryStore;
    use crate::temporal::ManualClock;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::Arc;

    fn day(m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, m, 1, 0, 0, 0).unwrap()
    }

    fn setup() -> (ContradictionDetector, TemporalEdgeStore) {
        let edges = TemporalEdgeStore::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(ManualClock::new(day(12))),
        );
        (ContradictionDetector::new(edges.clone()), edges)
    }

    fn edge(from: EntityId, to: EntityId, edge_type: &str, m: u32) -> Edge {
        Edge::from_candidate(CandidateEdge::new(from, to, edge_type).valid_at(day(m)), day(12))
    }

    #[test]
    fn test_finds_open_edges_on_triple() {
        let (detector, edges) = setup();
        let (a, b) = (EntityId::new(), EntityId::new());
        let existing = edge(a, b, "WORKS_FOR", 1);
        edges.insert(&existing).unwrap();

        let conflicts = detector.find_conflicts(&edge(a, b, "WORKS_FOR", 6)).unwrap();
        assert_eq!(conflicts, vec![existing]);
    }

    #[test]
    fn test_ignores_other_types_directions_and_closed_edges() {
        let (detector, edges) = setup();
        let (a, b) = (EntityId::new(), EntityId::new());
        edges.insert(&edge(a, b, "KNOWS", 1)).unwrap();
        edges.insert(&edge(b, a, "WORKS_FOR", 1)).unwrap();
        let closed = edge(a, b, "WORKS_FOR", 1);
        edges.insert(&closed).unwrap();
        edges.invalidate(&closed.id, day(3), None).unwrap();

        assert!(detector
            .find_conflicts(&edge(a, b, "WORKS_FOR", 6))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_excludes_itself() {
        let (detector, edges) = setup();
        let stored = edge(EntityId::new(), EntityId::new(), "WORKS_FOR", 1);
        edges.insert(&stored).unwrap();
        assert!(detector.find_conflicts(&stored).unwrap().is_empty());
    }
}
