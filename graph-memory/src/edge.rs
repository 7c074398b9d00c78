//! Relationship edges between entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attributes::Attributes;
use crate::entity::EntityId;
use crate::id::uuid_id;
use crate::temporal::ValidityRange;

uuid_id!(
    /// Unique identifier for relationship edges
    EdgeId
);

/// The `(from_id, to_id, type)` triple that contradictions are keyed on
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKey {
    pub from_id: EntityId,
    pub to_id: EntityId,
    pub edge_type: String,
}

/// A bi-temporal relationship between two entities
///
/// Edges hold entity ids only; they never own the entities they connect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub from_id: EntityId,
    pub to_id: EntityId,
    /// Relationship type tag such as "WORKS_FOR"
    #[serde(rename = "type")]
    pub edge_type: String,
    pub attributes: Attributes,
    /// When this record was written; never changes
    pub created_at: DateTime<Utc>,
    /// When the fact became true
    pub valid_at: DateTime<Utc>,
    /// When the fact stopped being true (None if still valid)
    pub invalid_at: Option<DateTime<Utc>>,
    /// Edge whose assertion ended this one
    pub invalidated_by: Option<EdgeId>,
    /// Confidence score (0.0 to 1.0)
    pub confidence: f32,
}

impl Edge {
    /// Materialize a candidate into a storable edge
    ///
    /// `valid_at` defaults to the write time.
    pub fn from_candidate(candidate: CandidateEdge, now: DateTime<Utc>) -> Self {
        Self {
            id: candidate.id.unwrap_or_default(),
            from_id: candidate.from_id,
            to_id: candidate.to_id,
            edge_type: candidate.edge_type,
            attributes: candidate.attributes,
            created_at: now,
            valid_at: candidate.valid_at.unwrap_or(now),
            invalid_at: candidate.invalid_at,
            invalidated_by: None,
            confidence: candidate.confidence,
        }
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            from_id: self.from_id,
            to_id: self.to_id,
            edge_type: self.edge_type.clone(),
        }
    }

    pub fn range(&self) -> ValidityRange {
        ValidityRange {
            valid_at: self.valid_at,
            invalid_at: self.invalid_at,
        }
    }

    /// Check if this edge is currently asserted
    pub fn is_open(&self) -> bool {
        self.invalid_at.is_none()
    }

    /// Check if the fact was valid at a specific point in time
    pub fn was_valid_at(&self, time: DateTime<Utc>) -> bool {
        self.range().contains(time)
    }

    /// Check if this edge shares its triple with `other`
    pub fn same_triple(&self, other: &Edge) -> bool {
        self.from_id == other.from_id
            && self.to_id == other.to_id
            && self.edge_type == other.edge_type
    }
}

/// A relationship submitted for insertion, before resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateEdge {
    /// Pre-assigned id, used to make resubmission idempotent
    pub id: Option<EdgeId>,
    pub from_id: EntityId,
    pub to_id: EntityId,
    #[serde(rename = "type")]
    pub edge_type: String,
    pub attributes: Attributes,
    pub valid_at: Option<DateTime<Utc>>,
    pub invalid_at: Option<DateTime<Utc>>,
    pub confidence: f32,
}

impl CandidateEdge {
    pub fn new(from_id: EntityId, to_id: EntityId, edge_type: impl Into<String>) -> Self {
        Self {
            id: None,
            from_id,
            to_id,
            edge_type: edge_type.into(),
            attributes: Attributes::new(),
            valid_at: None,
            invalid_at: None,
            confidence: 1.0,
        }
    }

    /// Fix the id the edge will be stored under
    pub fn with_id(mut self, id: EdgeId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn valid_at(mut self, at: DateTime<Utc>) -> Self {
        self.valid_at = Some(at);
        self
    }

    pub fn invalid_at(mut self, at: DateTime<Utc>) -> Self {
        self.invalid_at = Some(at);
        self
    }

    pub fn attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Set confidence score
    pub fn confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }
}

/// Selection criteria for edge queries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeFilter {
    pub from_id: Option<EntityId>,
    pub to_id: Option<EntityId>,
    pub edge_type: Option<String>,
    /// Either endpoint equals this entity
    pub involving: Option<EntityId>,
    /// Only edges with no invalid_at
    pub open_only: bool,
}

impl EdgeFilter {
    /// Match every edge
    pub fn all() -> Self {
        Self::default()
    }

    /// Match one `(from_id, to_id, type)` triple
    pub fn triple(key: &EdgeKey) -> Self {
        Self {
            from_id: Some(key.from_id),
            to_id: Some(key.to_id),
            edge_type: Some(key.edge_type.clone()),
            ..Default::default()
        }
    }

    pub fn from(mut self, id: EntityId) -> Self {
        self.from_id = Some(id);
        self
    }

    pub fn to(mut self, id: EntityId) -> Self {
        self.to_id = Some(id);
        self
    }

    pub fn of_type(mut self, edge_type: impl Into<String>) -> Self {
        self.edge_type = Some(edge_type.into());
        self
    }

    pub fn involving(mut self, id: EntityId) -> Self {
        self.involving = Some(id);
        self
    }

    pub fn open_only(mut self) -> Self {
        self.open_only = true;
        self
    }

    pub fn matches(&self, edge: &Edge) -> bool {
        if self.from_id.is_some_and(|id| id != edge.from_id) {
            return false;
        }
        if self.to_id.is_some_and(|id| id != edge.to_id) {
            return false;
        }
        if self
            .edge_type
            .as_deref()
            .is_some_and(|t| t != edge.edge_type)
        {
            return false;
        }
        if self
            .involving
            .is_some_and(|id| id != edge.from_id && id != edge.to_id)
        {
            return false;
        }
        if self.open_only && !edge.is_open() {
            return false;
        }
        true
    }
}
