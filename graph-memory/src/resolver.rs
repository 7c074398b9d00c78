//! Entity resolution
//!
//! Maps an incoming mention onto a canonical entity. Matching is tried in
//! order: exact case-insensitive name among compatible types, then nearest
//! embedding above the similarity threshold, then a new entity. Ties are
//! reported as [`MemoryError::AmbiguousMatch`] and never guessed.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::attributes::MergePolicy;
use crate::config::ResolverConfig;
use crate::entity::{normalize_name, types_compatible, Entity, EntityId, EntityMention};
use crate::error::{MatchCandidate, MemoryError, Result};
use crate::storage::GraphStore;
use crate::temporal::Clock;
use crate::vector::VectorIndex;

/// How a mention was matched
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchKind {
    /// Same normalized name and a compatible type
    Exact,
    /// Nearest embedding at or above the similarity threshold
    Similar { score: f32 },
    /// No match; a new entity was created
    Created,
}

/// Outcome of [`EntityResolver::resolve`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityResolution {
    pub entity: Entity,
    pub was_created: bool,
    pub match_kind: MatchKind,
    /// Similarity search was skipped because the vector service was unavailable
    pub degraded: bool,
}

impl EntityResolution {
    pub fn into_parts(self) -> (Entity, bool) {
        (self.entity, self.was_created)
    }
}

/// Deduplicates entity mentions against known entities
#[derive(Clone)]
pub struct EntityResolver {
    store: Arc<dyn GraphStore>,
    vectors: Arc<dyn VectorIndex>,
    clock: Arc<dyn Clock>,
    config: ResolverConfig,
}

impl EntityResolver {
    pub fn new(
        store: Arc<dyn GraphStore>,
        vectors: Arc<dyn VectorIndex>,
        clock: Arc<dyn Clock>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            store,
            vectors,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve a mention to a canonical entity, creating one if nothing matches
    pub fn resolve(&self, mention: EntityMention) -> Result<EntityResolution> {
        let normalized = normalize_name(&mention.name);
        if normalized.is_empty() {
            return Err(MemoryError::invalid_attribute("entity name is empty"));
        }
        let mention_type = mention.entity_type.as_deref();

        // 1. Exact name
        let exact: Vec<Entity> = self
            .store
            .find_entities_by_name(&normalized)?
            .into_iter()
            .filter(|e| types_compatible(mention_type, &e.entity_type))
            .collect();
        match exact.len() {
            0 => {}
            1 => {
                let id = exact[0].id;
                return self.merge_into(id, mention, MatchKind::Exact);
            }
            _ => {
                return Err(MemoryError::AmbiguousMatch {
                    name: mention.name,
                    candidates: exact
                        .iter()
                        .map(|e| MatchCandidate {
                            entity_id: e.id,
                            name: e.name.clone(),
                            score: 1.0,
                        })
                        .collect(),
                })
            }
        }

        // 2. Embedding similarity
        let mut degraded = false;
        if let Some(embedding) = mention.embedding.as_deref() {
            match self.vectors.nearest(embedding, mention_type, self.config.top_k) {
                Ok(hits) => {
                    if let Some((id, score)) = self.pick_similar(&mention.name, hits)? {
                        return self.merge_into(id, mention, MatchKind::Similar { score });
                    }
                }
                Err(MemoryError::EmbeddingUnavailable(reason)) => {
                    log::warn!(
                        "Similarity search unavailable, resolving '{}' by exact name only: {}",
                        mention.name,
                        reason
                    );
                    degraded = true;
                }
                Err(e) => return Err(e),
            }
        }

        // 3. New entity
        let entity = Entity::from_mention(mention, self.clock.now());
        self.store.put_entity(&entity)?;
        degraded |= self.index(&entity)?;
        log::debug!("Created entity {} '{}'", entity.id, entity.name);

        Ok(EntityResolution {
            entity,
            was_created: true,
            match_kind: MatchKind::Created,
            degraded,
        })
    }

    pub fn get(&self, id: &EntityId) -> Result<Option<Entity>> {
        self.store.get_entity(id)
    }

    /// Entities whose name matches case-insensitively
    pub fn find_by_name(&self, name: &str) -> Result<Vec<Entity>> {
        self.store.find_entities_by_name(&normalize_name(name))
    }

    /// Load every stored embedding into the vector index
    ///
    /// Run after opening a persistent store, since the index lives in memory.
    pub fn reindex(&self) -> Result<usize> {
        let mut indexed = 0;
        for entity in self.store.list_entities()? {
            if let Some(embedding) = entity.embedding {
                self.vectors.upsert(entity.id, &entity.entity_type, embedding)?;
                indexed += 1;
            }
        }
        Ok(indexed)
    }

    /// Best hit at or above the threshold, unless the runner-up is within epsilon
    fn pick_similar(&self, name: &str, hits: Vec<(EntityId, f32)>) -> Result<Option<(EntityId, f32)>> {
        let mut candidates = Vec::new();
        for (id, score) in hits {
            if score < self.config.similarity_threshold {
                continue;
            }
            // the index may hold ids the store no longer knows about
            if let Some(entity) = self.store.get_entity(&id)? {
                candidates.push(MatchCandidate {
                    entity_id: entity.id,
                    name: entity.name,
                    score,
                });
            }
        }
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let best = match candidates.first() {
            Some(best) => best.score,
            None => return Ok(None),
        };
        let tied: Vec<MatchCandidate> = candidates
            .into_iter()
            .filter(|c| best - c.score <= self.config.ambiguity_epsilon)
            .collect();
        if tied.len() > 1 {
            return Err(MemoryError::AmbiguousMatch {
                name: name.to_string(),
                candidates: tied,
            });
        }
        Ok(tied.first().map(|c| (c.entity_id, c.score)))
    }

    /// Fold a matched mention into the stored entity
    fn merge_into(
        &self,
        id: EntityId,
        mention: EntityMention,
        match_kind: MatchKind,
    ) -> Result<EntityResolution> {
        let policy = self.config.merge_policy;
        let now = self.clock.now();
        let mut embedding_changed = false;

        let entity = self
            .store
            .update_entity(&id, &mut |entity: &mut Entity| {
                entity.attributes.merge(&mention.attributes, policy);
                if entity.entity_type.trim().is_empty() {
                    if let Some(t) = &mention.entity_type {
                        entity.entity_type = t.clone();
                    }
                }
                if let Some(embedding) = &mention.embedding {
                    let replace = match policy {
                        MergePolicy::PreferNew => true,
                        MergePolicy::PreferExisting => entity.embedding.is_none(),
                    };
                    if replace && entity.embedding.as_ref() != Some(embedding) {
                        entity.embedding = Some(embedding.clone());
                        embedding_changed = true;
                    }
                }
                entity.updated_at = now;
                Ok(())
            })?
            .ok_or(MemoryError::EntityNotFound(id))?;

        let degraded = embedding_changed && self.index(&entity)?;

        Ok(EntityResolution {
            entity,
            was_created: false,
            match_kind,
            degraded,
        })
    }

    /// Push an entity's embedding to the vector index; true if the index was unavailable
    fn index(&self, entity: &Entity) -> Result<bool> {
        let embedding = match &entity.embedding {
            Some(embedding) => embedding.clone(),
            None => return Ok(false),
        };
        match self.vectors.upsert(entity.id, &entity.entity_type, embedding) {
            Ok(()) => Ok(false),
            Err(MemoryError::EmbeddingUnavailable(reason)) => {
                log::warn!("Could not index entity {}: {}", entity.id, reason);
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }
}
