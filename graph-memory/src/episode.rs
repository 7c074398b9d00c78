//! Episodes and session contexts

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attributes::Attributes;
use crate::edge::EdgeId;
use crate::entity::EntityId;
use crate::id::uuid_id;

uuid_id!(
    /// Unique identifier for episodes
    EpisodeId
);

uuid_id!(
    /// Identifier of one logical session
    SessionId
);

/// Explicit per-call session handle
///
/// Each session has at most one active episode; sessions never share one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: SessionId,
}

impl SessionContext {
    /// Start a fresh session
    pub fn new() -> Self {
        Self {
            session_id: SessionId::new(),
        }
    }

    /// Resume a known session
    pub fn resume(session_id: SessionId) -> Self {
        Self { session_id }
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle state of an episode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeState {
    Active,
    Closed,
}

/// A named, time-bounded group of writes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: EpisodeId,
    pub session_id: SessionId,
    pub name: String,
    pub start_time: DateTime<Utc>,
    /// None while the episode is still open
    pub end_time: Option<DateTime<Utc>>,
    pub linked_entity_ids: BTreeSet<EntityId>,
    pub linked_relationship_ids: BTreeSet<EdgeId>,
    pub metadata: Attributes,
}

impl Episode {
    pub fn new(
        session_id: SessionId,
        name: impl Into<String>,
        metadata: Attributes,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EpisodeId::new(),
            session_id,
            name: name.into(),
            start_time,
            end_time: None,
            linked_entity_ids: BTreeSet::new(),
            linked_relationship_ids: BTreeSet::new(),
            metadata,
        }
    }

    pub fn state(&self) -> EpisodeState {
        if self.end_time.is_some() {
            EpisodeState::Closed
        } else {
            EpisodeState::Active
        }
    }

    pub fn is_active(&self) -> bool {
        self.state() == EpisodeState::Active
    }

    /// Check if `[start_time, end_time or +inf)` intersects the closed window `[start, end]`
    pub fn intersects(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        let starts_in_time = self.start_time <= end;
        let still_running = match self.end_time {
            None => true,
            Some(end_time) => end_time > start,
        };
        starts_in_time && still_running
    }
}

/// Selection criteria for episode queries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeFilter {
    pub session_id: Option<SessionId>,
    pub active_only: bool,
    /// Closed window `[start, end]` the episode must intersect
    pub window: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl EpisodeFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn active_only(mut self) -> Self {
        self.active_only = true;
        self
    }

    pub fn window(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.window = Some((start, end));
        self
    }

    pub fn matches(&self, episode: &Episode) -> bool {
        if self.session_id.is_some_and(|s| s != episode.session_id) {
            return false;
        }
        if self.active_only && !episode.is_active() {
            return false;
        }
        if let Some((start, end)) = self.window {
            if !episode.intersects(start, end) {
                return false;
            }
        }
        true
    }
}
