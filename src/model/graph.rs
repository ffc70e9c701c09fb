//! Entity graph models.
//!
//! Entities and relationships are keyed by a hash of their natural key so
//! re-processing a subject produces the same ids.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A named entity extracted from a subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub source_subject_id: String,
    pub entity_type: String,
    pub name: String,
    pub value: String,
    pub confidence: f64,
}

impl Entity {
    /// Build an entity with its natural-key id.
    pub fn new(
        source_subject_id: impl Into<String>,
        entity_type: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
        confidence: f64,
    ) -> Self {
        let source_subject_id = source_subject_id.into();
        let entity_type = entity_type.into();
        let name = name.into();
        let value = value.into();
        Self {
            id: entity_id(&source_subject_id, &entity_type, &name, &value),
            source_subject_id,
            entity_type,
            name,
            value,
            confidence,
        }
    }
}

/// A directed relationship between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRelationship {
    pub id: String,
    pub source_entity_id: String,
    pub target_entity_id: String,
    pub relationship_type: String,
    pub confidence: f64,
    pub source_subject_id: String,
}

impl EntityRelationship {
    pub fn new(
        source_entity_id: impl Into<String>,
        target_entity_id: impl Into<String>,
        relationship_type: impl Into<String>,
        confidence: f64,
        source_subject_id: impl Into<String>,
    ) -> Self {
        let source_entity_id = source_entity_id.into();
        let target_entity_id = target_entity_id.into();
        let relationship_type = relationship_type.into();
        Self {
            id: relationship_id(&source_entity_id, &target_entity_id, &relationship_type),
            source_entity_id,
            target_entity_id,
            relationship_type,
            confidence,
            source_subject_id: source_subject_id.into(),
        }
    }
}

/// Filter for `graph.query`. Empty fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphFilter {
    pub entity_type: Option<String>,
    /// Case-insensitive substring match on the entity name.
    pub name: Option<String>,
    pub source_subject_id: Option<String>,
    pub min_confidence: Option<f64>,
    pub limit: Option<usize>,
}

/// Entities matching a filter plus the relationships between them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphResult {
    pub entities: Vec<Entity>,
    pub relationships: Vec<EntityRelationship>,
}

fn hashed_id(prefix: &str, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
    format!("{prefix}_{hex}")
}

/// Entity id from (source_subject_id, entity_type, name, value).
#[must_use]
pub fn entity_id(source_subject_id: &str, entity_type: &str, name: &str, value: &str) -> String {
    hashed_id("ent", &[source_subject_id, entity_type, name, value])
}

/// Relationship id from (source_entity_id, target_entity_id, relationship_type).
#[must_use]
pub fn relationship_id(source: &str, target: &str, relationship_type: &str) -> String {
    hashed_id("rel", &[source, target, relationship_type])
}
