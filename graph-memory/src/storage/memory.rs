//! In-process store backed by DashMap
//!
//! Also serves as the read cache of [`super::RocksStore`].

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{close_edge, sort_edges, sort_episodes, GraphStore, Invalidation, Mutation};
use crate::edge::{Edge, EdgeFilter, EdgeId, EdgeKey};
use crate::entity::{normalize_name, Entity, EntityId};
use crate::episode::{Episode, EpisodeFilter, EpisodeId};
use crate::error::Result;

/// Volatile [`GraphStore`] with secondary indexes on name and edge triple
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entities: DashMap<EntityId, Entity>,
    names: DashMap<String, BTreeSet<EntityId>>,
    edges: DashMap<EdgeId, Edge>,
    triples: DashMap<EdgeKey, BTreeSet<EdgeId>>,
    episodes: DashMap<EpisodeId, Episode>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite an entity, keeping the name index in step
    pub(crate) fn store_entity(&self, entity: Entity) {
        let normalized = entity.normalized_name();
        let previous = self.entities.insert(entity.id, entity.clone());
        if let Some(previous) = previous {
            let old_name = previous.normalized_name();
            if old_name != normalized {
                if let Some(mut ids) = self.names.get_mut(&old_name) {
                    ids.remove(&previous.id);
                }
            }
        }
        self.names.entry(normalized).or_default().insert(entity.id);
    }

    /// Insert or overwrite an edge, keeping the triple index in step
    pub(crate) fn store_edge(&self, edge: Edge) {
        self.triples.entry(edge.key()).or_default().insert(edge.id);
        self.edges.insert(edge.id, edge);
    }

    pub(crate) fn store_episode(&self, episode: Episode) {
        self.episodes.insert(episode.id, episode);
    }

    pub(crate) fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub(crate) fn episode_count(&self) -> usize {
        self.episodes.len()
    }
}

impl GraphStore for InMemoryStore {
    fn get_entity(&self, id: &EntityId) -> Result<Option<Entity>> {
        Ok(self.entities.get(id).map(|e| e.clone()))
    }

    fn put_entity(&self, entity: &Entity) -> Result<()> {
        self.store_entity(entity.clone());
        Ok(())
    }

    fn update_entity(
        &self,
        id: &EntityId,
        mutation: Mutation<'_, Entity>,
    ) -> Result<Option<Entity>> {
        let (old_name, updated) = {
            let mut entry = match self.entities.get_mut(id) {
                Some(entry) => entry,
                None => return Ok(None),
            };
            let old_name = entry.normalized_name();
            let mut draft = entry.clone();
            mutation(&mut draft)?;
            draft.id = *id;
            *entry = draft.clone();
            (old_name, draft)
        };
        let new_name = updated.normalized_name();
        if old_name != new_name {
            if let Some(mut ids) = self.names.get_mut(&old_name) {
                ids.remove(id);
            }
            self.names.entry(new_name).or_default().insert(*id);
        }
        Ok(Some(updated))
    }

    fn find_entities_by_name(&self, normalized_name: &str) -> Result<Vec<Entity>> {
        let ids: Vec<EntityId> = match self.names.get(normalized_name) {
            Some(ids) => ids.iter().copied().collect(),
            None => return Ok(Vec::new()),
        };
        Ok(ids
            .iter()
            .filter_map(|id| self.entities.get(id).map(|e| e.clone()))
            .filter(|e| normalize_name(&e.name) == normalized_name)
            .collect())
    }

    fn list_entities(&self) -> Result<Vec<Entity>> {
        let mut entities: Vec<Entity> = self.entities.iter().map(|e| e.value().clone()).collect();
        entities.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(entities)
    }

    fn count_entities(&self) -> Result<usize> {
        Ok(self.entities.len())
    }

    fn get_edge(&self, id: &EdgeId) -> Result<Option<Edge>> {
        Ok(self.edges.get(id).map(|e| e.clone()))
    }

    fn insert_edge_if_absent(&self, edge: &Edge) -> Result<bool> {
        match self.edges.entry(edge.id) {
            Entry::Occupied(_) => return Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(edge.clone());
            }
        }
        self.triples.entry(edge.key()).or_default().insert(edge.id);
        Ok(true)
    }

    fn query_edges(&self, filter: &EdgeFilter) -> Result<Vec<Edge>> {
        let mut edges: Vec<Edge> = match (&filter.from_id, &filter.to_id, &filter.edge_type) {
            (Some(from_id), Some(to_id), Some(edge_type)) => {
                let key = EdgeKey {
                    from_id: *from_id,
                    to_id: *to_id,
                    edge_type: edge_type.clone(),
                };
                let ids: Vec<EdgeId> = self
                    .triples
                    .get(&key)
                    .map(|ids| ids.iter().copied().collect())
                    .unwrap_or_default();
                ids.iter()
                    .filter_map(|id| self.edges.get(id).map(|e| e.clone()))
                    .filter(|e| filter.matches(e))
                    .collect()
            }
            _ => self
                .edges
                .iter()
                .filter(|entry| filter.matches(entry.value()))
                .map(|entry| entry.value().clone())
                .collect(),
        };
        sort_edges(&mut edges);
        Ok(edges)
    }

    fn invalidate_edge_if_open(
        &self,
        id: &EdgeId,
        invalid_at: DateTime<Utc>,
        invalidated_by: Option<EdgeId>,
    ) -> Result<Invalidation> {
        // get_mut holds the shard lock, which makes check-then-set atomic
        let mut entry = match self.edges.get_mut(id) {
            Some(entry) => entry,
            None => return Ok(Invalidation::NotFound(*id)),
        };
        if close_edge(&mut entry, invalid_at, invalidated_by)? {
            Ok(Invalidation::Applied(entry.clone()))
        } else {
            Ok(Invalidation::AlreadyInvalidated(entry.clone()))
        }
    }

    fn get_episode(&self, id: &EpisodeId) -> Result<Option<Episode>> {
        Ok(self.episodes.get(id).map(|e| e.clone()))
    }

    fn put_episode(&self, episode: &Episode) -> Result<()> {
        self.store_episode(episode.clone());
        Ok(())
    }

    fn update_episode(
        &self,
        id: &EpisodeId,
        mutation: Mutation<'_, Episode>,
    ) -> Result<Option<Episode>> {
        let mut entry = match self.episodes.get_mut(id) {
            Some(entry) => entry,
            None => return Ok(None),
        };
        let mut draft = entry.clone();
        mutation(&mut draft)?;
        draft.id = *id;
        *entry = draft.clone();
        Ok(Some(draft))
    }

    fn query_episodes(&self, filter: &EpisodeFilter) -> Result<Vec<Episode>> {
        let mut episodes: Vec<Episode> = self
            .episodes
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        sort_episodes(&mut episodes);
        Ok(episodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::CandidateEdge;
    use crate::entity::EntityMention;
    use crate::error::MemoryError;
    use chrono::Duration;

    fn edge(now: DateTime<Utc>) -> Edge {
        Edge::from_candidate(
            CandidateEdge::new(EntityId::new(), EntityId::new(), "WORKS_FOR"),
            now,
        )
    }

    #[test]
    fn test_name_index_is_case_insensitive() {
        let store = InMemoryStore::new();
        let entity = Entity::from_mention(EntityMention::new("Python", "Language"), Utc::now());
        store.put_entity(&entity).unwrap();

        let found = store.find_entities_by_name("python").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, entity.id);
        assert!(store.find_entities_by_name("rust").unwrap().is_empty());
    }

    #[test]
    fn test_rename_moves_index_entry() {
        let store = InMemoryStore::new();
        let entity = Entity::from_mention(EntityMention::new("Acme", "Organization"), Utc::now());
        store.put_entity(&entity).unwrap();

        store
            .update_entity(&entity.id, &mut |e: &mut Entity| {
                e.name = "Acme Corp".into();
                Ok(())
            })
            .unwrap();

        assert!(store.find_entities_by_name("acme").unwrap().is_empty());
        assert_eq!(store.find_entities_by_name("acme corp").unwrap().len(), 1);
    }

    #[test]
    fn test_insert_edge_if_absent() {
        let store = InMemoryStore::new();
        let e = edge(Utc::now());
        assert!(store.insert_edge_if_absent(&e).unwrap());
        assert!(!store.insert_edge_if_absent(&e).unwrap());
        assert_eq!(store.edge_count(), 1);
    }

    #[test]
    fn test_compare_and_set_invalidation() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let e = edge(now);
        store.insert_edge_if_absent(&e).unwrap();

        let closer = EdgeId::new();
        let first = store
            .invalidate_edge_if_open(&e.id, now + Duration::days(1), Some(closer))
            .unwrap();
        assert!(first.is_applied());

        let second = store
            .invalidate_edge_if_open(&e.id, now + Duration::days(2), None)
            .unwrap();
        match second {
            Invalidation::AlreadyInvalidated(current) => {
                assert_eq!(current.invalid_at, Some(now + Duration::days(1)));
                assert_eq!(current.invalidated_by, Some(closer));
            }
            other => panic!("expected AlreadyInvalidated, got {:?}", other),
        }

        let missing = store
            .invalidate_edge_if_open(&EdgeId::new(), now, None)
            .unwrap();
        assert!(matches!(missing, Invalidation::NotFound(_)));
    }

    #[test]
    fn test_concurrent_invalidation_applies_once() {
        let store = std::sync::Arc::new(InMemoryStore::new());
        let now = Utc::now();
        let e = edge(now);
        store.insert_edge_if_absent(&e).unwrap();

        let handles: Vec<_> = (1..=8)
            .map(|i| {
                let store = store.clone();
                let id = e.id;
                std::thread::spawn(move || {
                    store
                        .invalidate_edge_if_open(&id, now + Duration::days(i), Some(EdgeId::new()))
                        .unwrap()
                })
            })
            .collect();
        let outcomes: Vec<Invalidation> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let applied: Vec<&Edge> = outcomes
            .iter()
            .filter_map(|o| match o {
                Invalidation::Applied(edge) => Some(edge),
                _ => None,
            })
            .collect();
        assert_eq!(applied.len(), 1);
        let stored = store.get_edge(&e.id).unwrap().unwrap();
        assert_eq!(stored.invalid_at, applied[0].invalid_at);
        assert_eq!(stored.invalidated_by, applied[0].invalidated_by);
    }

    #[test]
    fn test_invalidation_rejects_non_positive_interval() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let e = edge(now);
        store.insert_edge_if_absent(&e).unwrap();

        let err = store.invalidate_edge_if_open(&e.id, now, None).unwrap_err();
        assert!(matches!(err, MemoryError::InvalidTemporalRange { .. }));
        assert!(store.get_edge(&e.id).unwrap().unwrap().is_open());
    }

    #[test]
    fn test_query_uses_triple_index_and_sorts() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let first = edge(now);
        let mut second = first.clone();
        second.id = EdgeId::new();
        second.valid_at = now - Duration::days(10);
        store.insert_edge_if_absent(&first).unwrap();
        store.insert_edge_if_absent(&second).unwrap();
        store.insert_edge_if_absent(&edge(now)).unwrap();

        let found = store.query_edges(&EdgeFilter::triple(&first.key())).unwrap();
        assert_eq!(
            found.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![second.id, first.id]
        );
        assert_eq!(store.query_edges(&EdgeFilter::all()).unwrap().len(), 3);
    }

    #[test]
    fn test_update_episode_mutation_error_leaves_record() {
        let store = InMemoryStore::new();
        let episode = Episode::new(
            crate::episode::SessionId::new(),
            "ep",
            Default::default(),
            Utc::now(),
        );
        store.put_episode(&episode).unwrap();

        let result = store.update_episode(&episode.id, &mut |ep: &mut Episode| {
            ep.name = "changed".into();
            Err(MemoryError::EpisodeClosed(ep.id))
        });
        assert!(result.is_err());
        assert_eq!(store.get_episode(&episode.id).unwrap().unwrap().name, "ep");
    }
}
