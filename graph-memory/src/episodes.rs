//! Episode lifecycle
//!
//! `Active --close--> Closed`, with no way back. Every session owns at most
//! one active episode; starting another closes the previous one at the
//! transition time.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::attributes::{Attributes, MergePolicy};
use crate::edge::EdgeId;
use crate::entity::EntityId;
use crate::episode::{Episode, EpisodeFilter, EpisodeId, SessionContext, SessionId};
use crate::error::{MemoryError, Result};
use crate::storage::GraphStore;
use crate::temporal::Clock;

/// Groups writes into named, time-bounded episodes
#[derive(Clone)]
pub struct EpisodeManager {
    store: Arc<dyn GraphStore>,
    clock: Arc<dyn Clock>,
    /// Keeps close-then-start atomic so a session never has two active episodes
    start_lock: Arc<Mutex<()>>,
}

impl EpisodeManager {
    pub fn new(store: Arc<dyn GraphStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            start_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Open a new episode for the session, closing its current one
    pub fn start(
        &self,
        ctx: &SessionContext,
        name: impl Into<String>,
        metadata: Attributes,
    ) -> Result<EpisodeId> {
        let _guard = self.start_lock.lock();
        let now = self.clock.now();

        let filter = EpisodeFilter::all().session(ctx.session_id).active_only();
        for prior in self.store.query_episodes(&filter)? {
            // a clock that went backwards must not produce an inverted episode
            let end = now.max(prior.start_time);
            self.store.update_episode(&prior.id, &mut |episode: &mut Episode| {
                if episode.end_time.is_none() {
                    episode.end_time = Some(end);
                }
                Ok(())
            })?;
            log::info!(
                "Closed episode {} '{}' on start of a new episode in session {}",
                prior.id,
                prior.name,
                ctx.session_id
            );
        }

        let episode = Episode::new(ctx.session_id, name, metadata, now);
        self.store.put_episode(&episode)?;
        log::debug!("Started episode {} '{}'", episode.id, episode.name);
        Ok(episode.id)
    }

    /// Link an entity; returns false if it was already linked
    pub fn link_entity(&self, episode_id: &EpisodeId, entity_id: EntityId) -> Result<bool> {
        self.link(episode_id, |episode| episode.linked_entity_ids.insert(entity_id))
    }

    /// Link a relationship; returns false if it was already linked
    pub fn link_relationship(&self, episode_id: &EpisodeId, edge_id: EdgeId) -> Result<bool> {
        self.link(episode_id, |episode| episode.linked_relationship_ids.insert(edge_id))
    }

    fn link(&self, episode_id: &EpisodeId, mut add: impl FnMut(&mut Episode) -> bool) -> Result<bool> {
        let mut added = false;
        self.store
            .update_episode(episode_id, &mut |episode: &mut Episode| {
                if !episode.is_active() {
                    return Err(MemoryError::EpisodeClosed(episode.id));
                }
                added = add(episode);
                Ok(())
            })?
            .ok_or(MemoryError::EpisodeNotFound(*episode_id))?;
        Ok(added)
    }

    /// Close an active episode at `end_time`
    pub fn close(&self, episode_id: &EpisodeId, end_time: DateTime<Utc>) -> Result<Episode> {
        self.store
            .update_episode(episode_id, &mut |episode: &mut Episode| {
                if episode.end_time.is_some() {
                    return Err(MemoryError::AlreadyClosed(episode.id));
                }
                if end_time < episode.start_time {
                    return Err(MemoryError::invalid_range(episode.start_time, end_time));
                }
                episode.end_time = Some(end_time);
                Ok(())
            })?
            .ok_or(MemoryError::EpisodeNotFound(*episode_id))
    }

    /// Merge new metadata into an episode; allowed after close
    pub fn update_metadata(&self, episode_id: &EpisodeId, metadata: &Attributes) -> Result<Episode> {
        self.store
            .update_episode(episode_id, &mut |episode: &mut Episode| {
                episode.metadata.merge(metadata, MergePolicy::PreferNew);
                Ok(())
            })?
            .ok_or(MemoryError::EpisodeNotFound(*episode_id))
    }

    /// Episodes whose `[start_time, end_time or +inf)` intersects `[start, end]`
    pub fn query_window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Episode>> {
        if end < start {
            return Err(MemoryError::invalid_range(start, end));
        }
        self.store
            .query_episodes(&EpisodeFilter::all().window(start, end))
    }

    /// The session's active episode, if any
    pub fn active(&self, ctx: &SessionContext) -> Result<Option<Episode>> {
        let filter = EpisodeFilter::all().session(ctx.session_id).active_only();
        Ok(self.store.query_episodes(&filter)?.pop())
    }

    pub fn get(&self, episode_id: &EpisodeId) -> Result<Option<Episode>> {
        self.store.get_episode(episode_id)
    }

    /// All episodes of a session, oldest first
    pub fn list_for_session(&self, session_id: SessionId) -> Result<Vec<Episode>> {
        self.store
            .query_episodes(&EpisodeFilter::all().session(session_id))
    }
}
