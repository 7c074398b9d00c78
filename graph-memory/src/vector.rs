//! Entity similarity search
//!
//! [`VectorIndex`] is the nearest-neighbour collaborator used by entity
//! resolution. [`HnswVectorIndex`] implements it with instant-distance HNSW
//! over cosine distance. Upserts only mark the graph stale; it is rebuilt by
//! the next search.

use std::collections::HashMap;

use instant_distance::{Builder, HnswMap, Point, Search};
use parking_lot::RwLock;

use crate::entity::{types_compatible, EntityId};
use crate::error::{MemoryError, Result};

/// Nearest-neighbour search over entity embeddings
pub trait VectorIndex: Send + Sync {
    /// Up to `k` entities closest to `embedding`, best first, as `(id, cosine similarity)`
    ///
    /// `type_filter` restricts results to entities of a compatible type.
    fn nearest(
        &self,
        embedding: &[f32],
        type_filter: Option<&str>,
        k: usize,
    ) -> Result<Vec<(EntityId, f32)>>;

    /// Insert or replace the embedding for an entity
    fn upsert(&self, id: EntityId, entity_type: &str, embedding: Vec<f32>) -> Result<()>;

    /// Number of indexed entities
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// HNSW point wrapper for semantic search
#[derive(Clone)]
struct EntityPoint {
    vector: Vec<f32>,
}

impl Point for EntityPoint {
    fn distance(&self, other: &Self) -> f32 {
        // Cosine distance = 1 - similarity (HNSW finds minimum)
        1.0 - cosine_similarity(&self.vector, &other.vector)
    }
}

#[derive(Clone)]
struct IndexedEntity {
    entity_type: String,
    vector: Vec<f32>,
}

#[derive(Default)]
struct IndexState {
    entries: HashMap<EntityId, IndexedEntity>,
    hnsw: Option<HnswMap<EntityPoint, EntityId>>,
    dimension: Option<usize>,
    /// Entries changed since the last build
    dirty: bool,
}

/// In-process HNSW index over entity embeddings
pub struct HnswVectorIndex {
    state: RwLock<IndexState>,
    ef_construction: usize,
}

impl HnswVectorIndex {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(IndexState::default()),
            ef_construction: 100,
        }
    }

    /// Embedding length fixed by the first upsert
    pub fn dimension(&self) -> Option<usize> {
        self.state.read().dimension
    }

    fn check_dimension(state: &IndexState, embedding: &[f32]) -> Result<()> {
        match state.dimension {
            Some(dim) if dim != embedding.len() => Err(MemoryError::vector_index(format!(
                "embedding has {} dimensions, index expects {}",
                embedding.len(),
                dim
            ))),
            _ => Ok(()),
        }
    }

    /// Rebuild HNSW index
    fn rebuild(&self, state: &mut IndexState) {
        state.dirty = false;
        if state.entries.is_empty() {
            state.hnsw = None;
            return;
        }

        let (points, values): (Vec<EntityPoint>, Vec<EntityId>) = state
            .entries
            .iter()
            .map(|(id, entry)| {
                (
                    EntityPoint {
                        vector: entry.vector.clone(),
                    },
                    *id,
                )
            })
            .unzip();

        state.hnsw = Some(
            Builder::default()
                .ef_construction(self.ef_construction)
                .build(points, values),
        );
    }

    /// Linear search fallback
    fn linear_search(
        state: &IndexState,
        embedding: &[f32],
        type_filter: Option<&str>,
        k: usize,
    ) -> Vec<(EntityId, f32)> {
        let mut results: Vec<(EntityId, f32)> = state
            .entries
            .iter()
            .filter(|(_, entry)| types_compatible(type_filter, &entry.entity_type))
            .map(|(id, entry)| (*id, cosine_similarity(embedding, &entry.vector)))
            .collect();

        sort_by_score(&mut results);
        results.truncate(k);
        results
    }
}

impl Default for HnswVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl VectorIndex for HnswVectorIndex {
    fn nearest(
        &self,
        embedding: &[f32],
        type_filter: Option<&str>,
        k: usize,
    ) -> Result<Vec<(EntityId, f32)>> {
        if self.state.read().dirty {
            let mut state = self.state.write();
            // another search may have rebuilt while we waited
            if state.dirty {
                self.rebuild(&mut state);
            }
        }

        let state = self.state.read();
        Self::check_dimension(&state, embedding)?;
        if k == 0 || state.entries.is_empty() {
            return Ok(Vec::new());
        }

        let hnsw = match state.hnsw.as_ref() {
            Some(hnsw) => hnsw,
            None => return Ok(Self::linear_search(&state, embedding, type_filter, k)),
        };

        let query = EntityPoint {
            vector: embedding.to_vec(),
        };
        let mut search = Search::default();
        let mut results = Vec::new();

        for item in hnsw.search(&query, &mut search) {
            let id = *item.value;
            let entry = match state.entries.get(&id) {
                Some(entry) => entry,
                None => continue,
            };
            if !types_compatible(type_filter, &entry.entity_type) {
                continue;
            }
            results.push((id, cosine_similarity(embedding, &entry.vector)));
            if results.len() >= k {
                break;
            }
        }

        // Type filtering can starve the HNSW candidate list
        if results.len() < k {
            results = Self::linear_search(&state, embedding, type_filter, k);
        }

        sort_by_score(&mut results);
        Ok(results)
    }

    fn upsert(&self, id: EntityId, entity_type: &str, embedding: Vec<f32>) -> Result<()> {
        let mut state = self.state.write();
        Self::check_dimension(&state, &embedding)?;
        if embedding.is_empty() {
            return Err(MemoryError::vector_index("embedding is empty"));
        }
        state.dimension = Some(embedding.len());
        state.entries.insert(
            id,
            IndexedEntity {
                entity_type: entity_type.to_string(),
                vector: embedding,
            },
        );
        state.dirty = true;
        Ok(())
    }

    fn len(&self) -> usize {
        self.state.read().entries.len()
    }
}

fn sort_by_score(results: &mut [(EntityId, f32)]) {
    results.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
}

/// Calculate cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
