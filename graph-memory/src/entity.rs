//! Entity types and builders

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attributes::{AttributeValue, Attributes};
use crate::error::Result;
use crate::id::uuid_id;

uuid_id!(
    /// Unique identifier for entities
    EntityId
);

/// Canonical form used for case-insensitive name matching
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Whether a mention's type may resolve to an entity of `existing` type
///
/// An untyped mention is compatible with every type, and an untyped entity
/// with every mention.
pub fn types_compatible(mention: Option<&str>, existing: &str) -> bool {
    let existing = existing.trim();
    match mention {
        None => true,
        Some(_) if existing.is_empty() => true,
        Some(t) => t.trim().eq_ignore_ascii_case(existing),
    }
}

/// A canonical entity in the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique identifier, assigned at creation
    pub id: EntityId,
    /// Human-readable name, not necessarily unique
    pub name: String,
    /// Type tag such as "Person" or "Organization"
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Free-form attributes, merged on every resolved mention
    pub attributes: Attributes,
    /// Embedding vector used for similarity matching
    pub embedding: Option<Vec<f32>>,
    /// When the entity was first recorded
    pub created_at: DateTime<Utc>,
    /// When a mention last updated the entity
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    /// Create an entity from an unresolved mention
    pub fn from_mention(mention: EntityMention, now: DateTime<Utc>) -> Self {
        Self {
            id: EntityId::new(),
            name: mention.name,
            entity_type: mention.entity_type.unwrap_or_default(),
            attributes: mention.attributes,
            embedding: mention.embedding,
            created_at: now,
            updated_at: now,
        }
    }

    /// Lowercased, trimmed name
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }
}

/// An incoming, not yet resolved reference to an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMention {
    pub name: String,
    /// Type tag; None matches any type
    #[serde(rename = "type")]
    pub entity_type: Option<String>,
    pub attributes: Attributes,
    pub embedding: Option<Vec<f32>>,
}

impl EntityMention {
    /// Create a typed mention with no attributes
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type: Some(entity_type.into()),
            attributes: Attributes::new(),
            embedding: None,
        }
    }

    /// Create a new builder for EntityMention
    pub fn builder(name: impl Into<String>) -> EntityMentionBuilder {
        EntityMentionBuilder::new(name)
    }
}

/// Builder for EntityMention with fluent API
#[derive(Debug)]
pub struct EntityMentionBuilder {
    name: String,
    entity_type: Option<String>,
    attributes: Vec<(String, AttributeValue)>,
    embedding: Option<Vec<f32>>,
}

impl EntityMentionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type: None,
            attributes: Vec::new(),
            embedding: None,
        }
    }

    /// Set the type tag
    pub fn entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    /// Add an attribute (validated at build time)
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    /// Set embedding vector
    pub fn embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Build the EntityMention
    pub fn build(self) -> Result<EntityMention> {
        let mut attributes = Attributes::new();
        for (key, value) in self.attributes {
            attributes.insert(key, value)?;
        }
        Ok(EntityMention {
            name: self.name,
            entity_type: self.entity_type,
            attributes,
            embedding: self.embedding,
        })
    }
}
