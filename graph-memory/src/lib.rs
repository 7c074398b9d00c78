//! Graph Memory
//!
//! Temporal knowledge-graph memory core: entities, bi-temporal relationships
//! and session episodes, with entity deduplication and contradiction
//! resolution on every write.
//!
//! ## Features
//!
//! - **Bi-temporal edges** - Record time (`created_at`) kept apart from real-world validity (`valid_at`/`invalid_at`)
//! - **Contradiction handling** - `newest_wins`, `merge` and `split_timeline` strategies with compare-and-set invalidation
//! - **Entity resolution** - Exact name, then HNSW embedding similarity, then creation; ties are never guessed
//! - **Episodes** - Per-session, time-bounded grouping of writes with window queries
//! - **RocksDB persistence** - Or a volatile DashMap store for tests and embedding
//!
//! ## Example
//!
//! ```ignore
//! use graph_memory::{CandidateEdge, EntityMention, GraphMemory, MemoryConfig, SessionContext};
//!
//! let memory = GraphMemory::open(&db_path, MemoryConfig::from_env()?)?;
//! let ctx = SessionContext::new();
//!
//! let alice = memory.add_entity(&ctx, EntityMention::new("Alice", "Person")).await?;
//! let acme = memory.add_entity(&ctx, EntityMention::new("Acme", "Organization")).await?;
//!
//! let result = memory
//!     .add_relationship(
//!         &ctx,
//!         CandidateEdge::new(alice.entity.id, acme.entity.id, "WORKS_FOR"),
//!         None,
//!     )
//!     .await?;
//! ```

pub mod attributes;
pub mod config;
pub mod contradiction;
pub mod edge;
pub mod edge_store;
pub mod entity;
pub mod episode;
pub mod episodes;
pub mod error;
pub mod graph;
mod id;
pub mod resolver;
pub mod storage;
pub mod temporal;
pub mod vector;

// Re-exports for convenience
pub use attributes::{AttributeValue, Attributes, MergePolicy};
pub use config::{MemoryConfig, ResolverConfig};
pub use contradiction::{
    ContradictionDetector, ContradictionResolver, ResolutionOutcome, ResolutionPlan,
    ResolutionResult, ResolutionStrategy,
};
pub use edge::{CandidateEdge, Edge, EdgeFilter, EdgeId, EdgeKey};
pub use edge_store::TemporalEdgeStore;
pub use entity::{Entity, EntityId, EntityMention, EntityMentionBuilder};
pub use episode::{Episode, EpisodeFilter, EpisodeId, EpisodeState, SessionContext, SessionId};
pub use episodes::EpisodeManager;
pub use error::{MatchCandidate, MemoryError, Result};
pub use graph::{GraphMemory, MemoryStats};
pub use resolver::{EntityResolution, EntityResolver, MatchKind};
pub use storage::{GraphStore, InMemoryStore, Invalidation, RocksStore};
pub use temporal::{Clock, ManualClock, SystemClock, ValidityRange};
pub use vector::{HnswVectorIndex, VectorIndex};
