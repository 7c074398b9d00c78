//! Write pipeline
//!
//! [`GraphMemory`] wires the components together and runs each logical
//! write (resolve, detect, resolve contradictions, insert, link to the
//! session's episode) as one serialized unit.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::attributes::Attributes;
use crate::config::MemoryConfig;
use crate::contradiction::{
    ContradictionDetector, ContradictionResolver, ResolutionOutcome, ResolutionResult,
    ResolutionStrategy,
};
use crate::edge::{CandidateEdge, Edge, EdgeFilter};
use crate::edge_store::TemporalEdgeStore;
use crate::entity::EntityMention;
use crate::episode::{Episode, EpisodeFilter, EpisodeId, SessionContext};
use crate::episodes::EpisodeManager;
use crate::error::{MemoryError, Result};
use crate::resolver::{EntityResolution, EntityResolver};
use crate::storage::{GraphStore, InMemoryStore, RocksStore};
use crate::temporal::{Clock, SystemClock};
use crate::vector::{HnswVectorIndex, VectorIndex};

/// Record counts across the graph
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub entities: usize,
    pub edges: usize,
    pub open_edges: usize,
    pub episodes: usize,
    pub active_episodes: usize,
}

/// Temporal knowledge-graph memory
pub struct GraphMemory {
    config: MemoryConfig,
    store: Arc<dyn GraphStore>,
    clock: Arc<dyn Clock>,
    entities: EntityResolver,
    edges: TemporalEdgeStore,
    detector: ContradictionDetector,
    resolver: ContradictionResolver,
    episodes: EpisodeManager,
    write_lock: Mutex<()>,
}

impl GraphMemory {
    /// Volatile memory with the system clock and an HNSW index
    pub fn in_memory(config: MemoryConfig) -> Result<Self> {
        Self::with_parts(
            Arc::new(InMemoryStore::new()),
            Arc::new(HnswVectorIndex::new()),
            Arc::new(SystemClock),
            config,
        )
    }

    /// Memory persisted in a RocksDB directory
    ///
    /// Stored embeddings are loaded back into the vector index.
    pub fn open(path: impl AsRef<Path>, config: MemoryConfig) -> Result<Self> {
        let memory = Self::with_parts(
            Arc::new(RocksStore::open(path)?),
            Arc::new(HnswVectorIndex::new()),
            Arc::new(SystemClock),
            config,
        )?;
        let indexed = memory.entities.reindex()?;
        if indexed > 0 {
            log::info!("Indexed {} entity embeddings", indexed);
        }
        Ok(memory)
    }

    /// Build from explicit collaborators
    pub fn with_parts(
        store: Arc<dyn GraphStore>,
        vectors: Arc<dyn VectorIndex>,
        clock: Arc<dyn Clock>,
        config: MemoryConfig,
    ) -> Result<Self> {
        config.validate()?;
        let edges = TemporalEdgeStore::new(store.clone(), clock.clone());
        Ok(Self {
            entities: EntityResolver::new(
                store.clone(),
                vectors,
                clock.clone(),
                config.resolver.clone(),
            ),
            detector: ContradictionDetector::new(edges.clone()),
            resolver: ContradictionResolver::new(edges.clone()),
            episodes: EpisodeManager::new(store.clone(), clock.clone()),
            edges,
            store,
            clock,
            config,
            write_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn entities(&self) -> &EntityResolver {
        &self.entities
    }

    pub fn edges(&self) -> &TemporalEdgeStore {
        &self.edges
    }

    pub fn detector(&self) -> &ContradictionDetector {
        &self.detector
    }

    pub fn episodes(&self) -> &EpisodeManager {
        &self.episodes
    }

    /// Resolve a mention and link the entity to the session's episode
    pub async fn add_entity(
        &self,
        ctx: &SessionContext,
        mention: EntityMention,
    ) -> Result<EntityResolution> {
        let _guard = self.write_lock.lock().await;
        let resolution = self.entities.resolve(mention)?;
        if let Some(episode_id) = self.episode_for_write(ctx)? {
            self.episodes.link_entity(&episode_id, resolution.entity.id)?;
        }
        Ok(resolution)
    }

    /// Assert a relationship, settling contradictions with `strategy`
    ///
    /// Falls back to the configured default strategy. Both endpoints must
    /// already exist. If another writer keeps closing the same conflicts,
    /// detection is retried up to `max_resolution_attempts` times.
    pub async fn add_relationship(
        &self,
        ctx: &SessionContext,
        candidate: CandidateEdge,
        strategy: Option<ResolutionStrategy>,
    ) -> Result<ResolutionResult> {
        let strategy = strategy.unwrap_or(self.config.default_strategy);
        let _guard = self.write_lock.lock().await;

        for endpoint in [candidate.from_id, candidate.to_id] {
            if self.store.get_entity(&endpoint)?.is_none() {
                return Err(MemoryError::EntityNotFound(endpoint));
            }
        }

        let edge = Edge::from_candidate(candidate, self.clock.now());
        edge.range().validate()?;

        let attempts = self.config.max_resolution_attempts;
        for attempt in 1..=attempts {
            let conflicts = self.detector.find_conflicts(&edge)?;
            let result = self.resolver.resolve(&edge, &conflicts, strategy)?;
            if result.is_stale() {
                log::warn!(
                    "Resolution of edge {} went stale on attempt {}/{}, detecting again",
                    edge.id,
                    attempt,
                    attempts
                );
                continue;
            }

            if result.outcome != ResolutionOutcome::Duplicate {
                if let Some(episode_id) = self.episode_for_write(ctx)? {
                    self.episodes.link_relationship(&episode_id, result.edge.id)?;
                }
            }
            return Ok(result);
        }

        Err(MemoryError::ConcurrentModification { attempts })
    }

    /// Start a named episode for the session
    pub async fn start_episode(
        &self,
        ctx: &SessionContext,
        name: impl Into<String>,
        metadata: Attributes,
    ) -> Result<EpisodeId> {
        let _guard = self.write_lock.lock().await;
        self.episodes.start(ctx, name, metadata)
    }

    /// Close the session's active episode now; None if there was none
    pub async fn end_session(&self, ctx: &SessionContext) -> Result<Option<Episode>> {
        let _guard = self.write_lock.lock().await;
        match self.episodes.active(ctx)? {
            Some(active) => {
                let now = self.clock.now().max(active.start_time);
                self.episodes.close(&active.id, now).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Edges valid at `time`
    pub fn query_valid_at(&self, time: DateTime<Utc>, filter: &EdgeFilter) -> Result<Vec<Edge>> {
        self.edges.query_valid_at(time, filter)
    }

    /// Edges valid now
    pub fn query_current(&self, filter: &EdgeFilter) -> Result<Vec<Edge>> {
        self.edges.query_current(filter)
    }

    /// Episodes intersecting `[start, end]`
    pub fn query_window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Episode>> {
        self.episodes.query_window(start, end)
    }

    pub fn stats(&self) -> Result<MemoryStats> {
        Ok(MemoryStats {
            entities: self.store.count_entities()?,
            edges: self.store.query_edges(&EdgeFilter::all())?.len(),
            open_edges: self.store.query_edges(&EdgeFilter::all().open_only())?.len(),
            episodes: self.store.query_episodes(&EpisodeFilter::all())?.len(),
            active_episodes: self
                .store
                .query_episodes(&EpisodeFilter::all().active_only())?
                .len(),
        })
    }

    /// Active episode to link a write to, opening one if configured to
    fn episode_for_write(&self, ctx: &SessionContext) -> Result<Option<EpisodeId>> {
        if let Some(active) = self.episodes.active(ctx)? {
            return Ok(Some(active.id));
        }
        if !self.config.implicit_episodes {
            return Ok(None);
        }
        let id = self
            .episodes
            .start(ctx, self.config.implicit_episode_name.clone(), Attributes::new())?;
        log::info!("Opened implicit episode {} for session {}", id, ctx.session_id);
        Ok(Some(id))
    }
}
