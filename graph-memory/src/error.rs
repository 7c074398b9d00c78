//! Error types for graph-memory

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::edge::EdgeId;
use crate::entity::EntityId;
use crate::episode::EpisodeId;

/// A candidate returned alongside [`MemoryError::AmbiguousMatch`]
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCandidate {
    pub entity_id: EntityId,
    pub name: String,
    /// Similarity score, 1.0 for exact name matches
    pub score: f32,
}

/// Errors that can occur in the memory core
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Several existing entities match a mention equally well
    #[error("Ambiguous match for '{name}': {} candidates", candidates.len())]
    AmbiguousMatch {
        name: String,
        candidates: Vec<MatchCandidate>,
    },

    /// An interval whose end does not come strictly after its start
    #[error("Invalid temporal range: invalid_at {invalid_at} must be after valid_at {valid_at}")]
    InvalidTemporalRange {
        valid_at: DateTime<Utc>,
        invalid_at: DateTime<Utc>,
    },

    /// A split-timeline segment would overlap a closed segment of the same triple
    #[error("Interval overlaps closed timeline segment {0}")]
    TimelineOverlap(EdgeId),

    /// An open edge starts at the same instant with a different payload
    #[error("Edge {0} already asserts this relationship from the same instant with different content")]
    SameInstantConflict(EdgeId),

    /// Invalidation target does not exist
    #[error("Edge not found: {0}")]
    EdgeNotFound(EdgeId),

    /// Invalidation target already carries an invalid_at
    #[error("Edge already invalidated: {0}")]
    AlreadyInvalidated(EdgeId),

    /// Entity does not exist
    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),

    /// Episode does not exist
    #[error("Episode not found: {0}")]
    EpisodeNotFound(EpisodeId),

    /// Attempt to link into a closed episode
    #[error("Episode is closed: {0}")]
    EpisodeClosed(EpisodeId),

    /// Attempt to close an episode twice
    #[error("Episode already closed: {0}")]
    AlreadyClosed(EpisodeId),

    /// Similarity collaborator failed
    #[error("Embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Vector index rejected the request
    #[error("Vector index error: {0}")]
    VectorIndex(String),

    /// Attribute map failed validation
    #[error("Invalid attribute: {0}")]
    InvalidAttribute(String),

    /// Configuration failed validation
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Optimistic re-detection gave up
    #[error("Concurrent modification: resolution still stale after {attempts} attempts")]
    ConcurrentModification { attempts: u32 },

    /// RocksDB error
    #[error("Storage error: {0}")]
    Storage(#[from] rocksdb::Error),

    /// Serialization error (bincode)
    #[error("Serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// UUID parsing error
    #[error("UUID error: {0}")]
    Uuid(#[from] uuid::Error),

    /// Database opened with an unsupported layout
    #[error("Schema error: {0}")]
    Schema(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MemoryError {
    /// Create an embedding-unavailable error
    pub fn embedding_unavailable(msg: impl Into<String>) -> Self {
        Self::EmbeddingUnavailable(msg.into())
    }

    /// Create a vector index error
    pub fn vector_index(msg: impl Into<String>) -> Self {
        Self::VectorIndex(msg.into())
    }

    /// Create an invalid attribute error
    pub fn invalid_attribute(msg: impl Into<String>) -> Self {
        Self::InvalidAttribute(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a schema error
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Create an invalid temporal range error
    pub fn invalid_range(valid_at: DateTime<Utc>, invalid_at: DateTime<Utc>) -> Self {
        Self::InvalidTemporalRange {
            valid_at,
            invalid_at,
        }
    }

    /// Whether this error only signals that an idempotent operation had nothing to do
    pub fn is_noop_signal(&self) -> bool {
        matches!(self, Self::EdgeNotFound(_) | Self::AlreadyInvalidated(_))
    }
}

/// Result type for memory operations
pub type Result<T> = std::result::Result<T, MemoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_signals() {
        let edge = EdgeId::new();
        assert!(MemoryError::EdgeNotFound(edge).is_noop_signal());
        assert!(MemoryError::AlreadyInvalidated(edge).is_noop_signal());
        assert!(!MemoryError::EpisodeClosed(EpisodeId::new()).is_noop_signal());
        assert!(!MemoryError::embedding_unavailable("down").is_noop_signal());
    }

    #[test]
    fn test_ambiguous_display() {
        let err = MemoryError::AmbiguousMatch {
            name: "Mercury".into(),
            candidates: vec![
                MatchCandidate {
                    entity_id: EntityId::new(),
                    name: "Mercury".into(),
                    score: 0.91,
                },
                MatchCandidate {
                    entity_id: EntityId::new(),
                    name: "Mercury".into(),
                    score: 0.90,
                },
            ],
        };
        assert_eq!(err.to_string(), "Ambiguous match for 'Mercury': 2 candidates");
    }
}
