//! RocksDB-backed store
//!
//! Persistent storage for entities, edges and episodes using RocksDB with
//! LZ4 compression. Records are bincode-encoded under `ent:`, `edge:` and
//! `epi:` key prefixes. All records are cached in an [`InMemoryStore`] at
//! open time; reads are served from the cache and writes go through to disk
//! before the cache is updated.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rocksdb::{IteratorMode, Options, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::memory::InMemoryStore;
use super::{close_edge, migration, GraphStore, Invalidation, Mutation};
use crate::edge::{Edge, EdgeFilter, EdgeId};
use crate::entity::{Entity, EntityId};
use crate::episode::{Episode, EpisodeFilter, EpisodeId};
use crate::error::Result;

const ENTITY_PREFIX: &str = "ent:";
const EDGE_PREFIX: &str = "edge:";
const EPISODE_PREFIX: &str = "epi:";

/// RocksDB-based [`GraphStore`] with a write-through cache
pub struct RocksStore {
    db: Arc<DB>,
    cache: InMemoryStore,
    /// Serializes read-modify-write sequences against the disk copy
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open (or create) a store at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_background_jobs(2);
        opts.set_bytes_per_sync(1048576); // 1MB
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path)?;
        migration::migrate_if_needed(&db)?;

        log::info!("RocksStore opened at: {}", path.display());

        let store = Self {
            db: Arc::new(db),
            cache: InMemoryStore::new(),
            write_lock: Mutex::new(()),
        };

        store.load_cache()?;
        Ok(store)
    }

    /// Load every record into the cache on startup
    fn load_cache(&self) -> Result<()> {
        let mut loaded = 0usize;
        let mut skipped = 0usize;

        for item in self.db.iterator(IteratorMode::Start) {
            let (key, value) = item?;
            let key_str = String::from_utf8_lossy(&key);

            let decoded = if key_str.starts_with(ENTITY_PREFIX) {
                bincode::deserialize::<Entity>(&value).map(|e| self.cache.store_entity(e))
            } else if key_str.starts_with(EDGE_PREFIX) {
                bincode::deserialize::<Edge>(&value).map(|e| self.cache.store_edge(e))
            } else if key_str.starts_with(EPISODE_PREFIX) {
                bincode::deserialize::<Episode>(&value).map(|e| self.cache.store_episode(e))
            } else {
                continue;
            };

            match decoded {
                Ok(()) => loaded += 1,
                Err(e) => {
                    log::warn!("Failed to deserialize record {}: {}. Skipping.", key_str, e);
                    skipped += 1;
                }
            }
        }

        if loaded > 0 {
            log::info!("Loaded {} records from disk", loaded);
        }
        if skipped > 0 {
            log::warn!("Skipped {} records due to deserialization errors", skipped);
        }
        Ok(())
    }

    fn persist<T: Serialize>(&self, prefix: &str, id: impl std::fmt::Display, record: &T) -> Result<()> {
        let key = format!("{}{}", prefix, id);
        self.db.put(key.as_bytes(), bincode::serialize(record)?)?;
        self.db.flush()?;
        Ok(())
    }

    /// Read a record straight from disk, bypassing the cache
    fn read_disk<T: DeserializeOwned>(&self, prefix: &str, id: impl std::fmt::Display) -> Result<Option<T>> {
        let key = format!("{}{}", prefix, id);
        match self.db.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Number of edges currently cached
    pub fn edge_count(&self) -> usize {
        self.cache.edge_count()
    }

    /// Number of episodes currently cached
    pub fn episode_count(&self) -> usize {
        self.cache.episode_count()
    }
}

impl GraphStore for RocksStore {
    fn get_entity(&self, id: &EntityId) -> Result<Option<Entity>> {
        self.cache.get_entity(id)
    }

    fn put_entity(&self, entity: &Entity) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.persist(ENTITY_PREFIX, entity.id, entity)?;
        self.cache.store_entity(entity.clone());
        Ok(())
    }

    fn update_entity(
        &self,
        id: &EntityId,
        mutation: Mutation<'_, Entity>,
    ) -> Result<Option<Entity>> {
        let _guard = self.write_lock.lock();
        let mut draft = match self.cache.get_entity(id)? {
            Some(entity) => entity,
            None => return Ok(None),
        };
        mutation(&mut draft)?;
        draft.id = *id;
        self.persist(ENTITY_PREFIX, draft.id, &draft)?;
        self.cache.store_entity(draft.clone());
        Ok(Some(draft))
    }

    fn find_entities_by_name(&self, normalized_name: &str) -> Result<Vec<Entity>> {
        self.cache.find_entities_by_name(normalized_name)
    }

    fn list_entities(&self) -> Result<Vec<Entity>> {
        self.cache.list_entities()
    }

    fn count_entities(&self) -> Result<usize> {
        self.cache.count_entities()
    }

    fn get_edge(&self, id: &EdgeId) -> Result<Option<Edge>> {
        self.cache.get_edge(id)
    }

    fn insert_edge_if_absent(&self, edge: &Edge) -> Result<bool> {
        let _guard = self.write_lock.lock();
        if self.cache.get_edge(&edge.id)?.is_some()
            || self.read_disk::<Edge>(EDGE_PREFIX, edge.id)?.is_some()
        {
            return Ok(false);
        }
        self.persist(EDGE_PREFIX, edge.id, edge)?;
        self.cache.store_edge(edge.clone());
        Ok(true)
    }

    fn query_edges(&self, filter: &EdgeFilter) -> Result<Vec<Edge>> {
        self.cache.query_edges(filter)
    }

    fn invalidate_edge_if_open(
        &self,
        id: &EdgeId,
        invalid_at: DateTime<Utc>,
        invalidated_by: Option<EdgeId>,
    ) -> Result<Invalidation> {
        let _guard = self.write_lock.lock();
        let mut edge = match self.cache.get_edge(id)? {
            Some(edge) => edge,
            None => return Ok(Invalidation::NotFound(*id)),
        };
        if !close_edge(&mut edge, invalid_at, invalidated_by)? {
            return Ok(Invalidation::AlreadyInvalidated(edge));
        }
        self.persist(EDGE_PREFIX, edge.id, &edge)?;
        self.cache.store_edge(edge.clone());
        Ok(Invalidation::Applied(edge))
    }

    fn get_episode(&self, id: &EpisodeId) -> Result<Option<Episode>> {
        self.cache.get_episode(id)
    }

    fn put_episode(&self, episode: &Episode) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.persist(EPISODE_PREFIX, episode.id, episode)?;
        self.cache.store_episode(episode.clone());
        Ok(())
    }

    fn update_episode(
        &self,
        id: &EpisodeId,
        mutation: Mutation<'_, Episode>,
    ) -> Result<Option<Episode>> {
        let _guard = self.write_lock.lock();
        let mut draft = match self.cache.get_episode(id)? {
            Some(episode) => episode,
            None => return Ok(None),
        };
        mutation(&mut draft)?;
        draft.id = *id;
        self.persist(EPISODE_PREFIX, draft.id, &draft)?;
        self.cache.store_episode(draft.clone());
        Ok(Some(draft))
    }

    fn query_episodes(&self, filter: &EpisodeFilter) -> Result<Vec<Episode>> {
        self.cache.query_episodes(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::Attributes;
    use crate::edge::CandidateEdge;
    use crate::entity::EntityMention;
    use crate::episode::SessionId;
    use chrono::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_records_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let now = Utc::now();

        let entity = Entity::from_mention(
            EntityMention::builder("Ada")
                .entity_type("Person")
                .attribute("born", 1815_i64)
                .build()
                .unwrap(),
            now,
        );
        let edge = Edge::from_candidate(
            CandidateEdge::new(entity.id, EntityId::new(), "WORKS_FOR")
                .valid_at(now - Duration::days(3)),
            now,
        );
        let episode = Episode::new(SessionId::new(), "onboarding", Attributes::new(), now);

        {
            let store = RocksStore::open(temp_dir.path()).unwrap();
            store.put_entity(&entity).unwrap();
            assert!(store.insert_edge_if_absent(&edge).unwrap());
            store
                .invalidate_edge_if_open(&edge.id, now, None)
                .unwrap();
            store.put_episode(&episode).unwrap();
        }

        let store = RocksStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.get_entity(&entity.id).unwrap(), Some(entity.clone()));
        assert_eq!(store.find_entities_by_name("ada").unwrap().len(), 1);

        let reloaded = store.get_edge(&edge.id).unwrap().unwrap();
        assert_eq!(reloaded.invalid_at, Some(now));
        assert_eq!(reloaded.created_at, edge.created_at);
        assert_eq!(store.edge_count(), 1);
        assert_eq!(store.episode_count(), 1);
    }

    #[test]
    fn test_corrupt_record_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = RocksStore::open(temp_dir.path()).unwrap();
            store
                .db
                .put(format!("{}{}", EDGE_PREFIX, EdgeId::new()).as_bytes(), b"garbage")
                .unwrap();
        }

        let store = RocksStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.edge_count(), 0);
    }

    #[test]
    fn test_cas_is_persisted_once() {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksStore::open(temp_dir.path()).unwrap();
        let now = Utc::now();
        let edge = Edge::from_candidate(
            CandidateEdge::new(EntityId::new(), EntityId::new(), "KNOWS")
                .valid_at(now - Duration::days(1)),
            now,
        );
        store.insert_edge_if_absent(&edge).unwrap();

        assert!(store
            .invalidate_edge_if_open(&edge.id, now, None)
            .unwrap()
            .is_applied());
        assert!(matches!(
            store
                .invalidate_edge_if_open(&edge.id, now + Duration::days(1), None)
                .unwrap(),
            Invalidation::AlreadyInvalidated(_)
        ));

        let on_disk: Edge = store.read_disk(EDGE_PREFIX, edge.id).unwrap().unwrap();
        assert_eq!(on_disk.invalid_at, Some(now));
    }
}
