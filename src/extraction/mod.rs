//! Entity extraction.
//!
//! Turns subject text into named entities and typed relations for the graph
//! store. Two implementations sit behind one trait:
//!
//! ```text
//! text → EntityExtractor (trait) → Extraction → (Entity, EntityRelationship)
//!              ↓
//!     ┌────────┴────────┐
//!     │                 │
//! RuleBasedExtractor  OllamaExtractor
//! (regex/keywords)    (/api/generate)
//! ```
//!
//! Extraction runs once per whole document or interaction; relation
//! endpoints are resolved against entities of the same subject.

mod ollama;
mod rules;

pub use ollama::OllamaExtractor;
pub use rules::RuleBasedExtractor;

use std::collections::HashMap;
use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::config::{ExtractionSettings, ExtractorKind};
use crate::embeddings::{resolve_ollama_endpoint, EmbeddingSettings};
use crate::error::Result;
use crate::model::{Entity, EntityRelationship};

/// One entity as reported by an extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub entity_type: String,
    /// Display form.
    pub name: String,
    /// Canonical form used for dedup.
    pub value: String,
    pub confidence: f64,
}

impl ExtractedEntity {
    pub fn new(entity_type: &str, name: &str, confidence: f64) -> Self {
        let name = name.trim();
        Self {
            entity_type: entity_type.to_uppercase(),
            name: name.to_string(),
            value: name.to_lowercase(),
            confidence,
        }
    }
}

/// A relation between two extracted entities, referenced by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRelation {
    pub source: String,
    pub target: String,
    pub relationship_type: String,
    pub confidence: f64,
}

/// Extractor output for one subject.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub entities: Vec<ExtractedEntity>,
    pub relations: Vec<ExtractedRelation>,
}

impl Extraction {
    /// Resolve into graph rows for `subject_id`.
    ///
    /// Entities below `min_confidence` are dropped; duplicates by
    /// (type, value) collapse to the highest confidence; at most
    /// `max_entities` are kept. Relations whose endpoints did not survive,
    /// or that link an entity to itself, are dropped.
    #[must_use]
    pub fn into_graph(
        self,
        subject_id: &str,
        min_confidence: f64,
        max_entities: usize,
    ) -> (Vec<Entity>, Vec<EntityRelationship>) {
        let mut by_key: HashMap<(String, String), ExtractedEntity> = HashMap::new();
        let mut order = Vec::new();
        for entity in self.entities {
            if entity.name.is_empty() || entity.confidence < min_confidence {
                continue;
            }
            let key = (entity.entity_type.clone(), entity.value.clone());
            match by_key.get_mut(&key) {
                Some(existing) => {
                    if entity.confidence > existing.confidence {
                        existing.confidence = entity.confidence;
                    }
                }
                None => {
                    order.push(key.clone());
                    by_key.insert(key, entity);
                }
            }
        }

        let entities: Vec<Entity> = order
            .into_iter()
            .filter_map(|key| by_key.remove(&key))
            .take(max_entities)
            .map(|e| Entity::new(subject_id, e.entity_type, e.name, e.value, e.confidence))
            .collect();

        // Relations name entities loosely; match on lowercase name or value
        let mut lookup: HashMap<String, &str> = HashMap::new();
        for entity in &entities {
            lookup.entry(entity.value.clone()).or_insert(&entity.id);
            lookup.entry(entity.name.to_lowercase()).or_insert(&entity.id);
        }

        let mut seen = std::collections::HashSet::new();
        let mut relationships = Vec::new();
        for rel in self.relations {
            let (Some(source), Some(target)) = (
                lookup.get(&rel.source.trim().to_lowercase()),
                lookup.get(&rel.target.trim().to_lowercase()),
            ) else {
                continue;
            };
            if source == target || rel.relationship_type.trim().is_empty() {
                continue;
            }
            let relationship = EntityRelationship::new(
                *source,
                *target,
                rel.relationship_type.trim().to_lowercase(),
                rel.confidence,
                subject_id,
            );
            if seen.insert(relationship.id.clone()) {
                relationships.push(relationship);
            }
        }

        (entities, relationships)
    }
}

/// Trait for entity extractors.
///
/// Errors follow the embedding provider contract: `TransientProvider` for
/// retryable failures, `PermanentProcessing` otherwise.
pub trait EntityExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    fn extract(&self, text: &str) -> impl Future<Output = Result<Extraction>> + Send;
}

/// Runtime-selected extractor.
#[derive(Debug, Clone)]
pub enum Extractor {
    Rules(RuleBasedExtractor),
    Ollama(OllamaExtractor),
}

impl EntityExtractor for Extractor {
    fn name(&self) -> &'static str {
        match self {
            Self::Rules(inner) => inner.name(),
            Self::Ollama(inner) => inner.name(),
        }
    }

    async fn extract(&self, text: &str) -> Result<Extraction> {
        match self {
            Self::Rules(inner) => inner.extract(text).await,
            Self::Ollama(inner) => inner.extract(text).await,
        }
    }
}

/// Build the configured extractor.
///
/// The LLM extractor defaults to the embedding Ollama endpoint.
#[must_use]
pub fn create_extractor(settings: &ExtractionSettings, embeddings: &EmbeddingSettings) -> Extractor {
    match settings.provider {
        ExtractorKind::Rules => Extractor::Rules(RuleBasedExtractor::new()),
        ExtractorKind::Ollama => {
            let endpoint = settings
                .ollama_endpoint
                .clone()
                .unwrap_or_else(|| resolve_ollama_endpoint(embeddings));
            Extractor::Ollama(OllamaExtractor::new(&endpoint, &settings.ollama_model))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relation(source: &str, target: &str, kind: &str) -> ExtractedRelation {
        ExtractedRelation {
            source: source.to_string(),
            target: target.to_string(),
            relationship_type: kind.to_string(),
            confidence: 0.6,
        }
    }

    #[test]
    fn test_into_graph_dedups_and_resolves_relations() {
        let extraction = Extraction {
            entities: vec![
                ExtractedEntity::new("person", "Alice", 0.6),
                ExtractedEntity::new("PERSON", "alice", 0.9),
                ExtractedEntity::new("ORG", "Acme", 0.8),
                ExtractedEntity::new("ORG", "Noise", 0.1),
            ],
            relations: vec![
                relation("Alice", "ACME", "WORKS_AT"),
                relation("Alice", "Alice", "is"),
                relation("Alice", "Noise", "knows"),
                relation("Alice", "acme", "works_at"),
            ],
        };

        let (entities, relationships) = extraction.into_graph("doc_1", 0.3, 10);
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].name, "Alice");
        assert!((entities[0].confidence - 0.9).abs() < 1e-9);
        assert_eq!(relationships.len(), 1);
        assert_eq!(relationships[0].relationship_type, "works_at");
        assert_eq!(relationships[0].source_entity_id, entities[0].id);
        assert_eq!(relationships[0].target_entity_id, entities[1].id);
    }

    #[test]
    fn test_into_graph_caps_entities() {
        let extraction = Extraction {
            entities: (0..5)
                .map(|i| ExtractedEntity::new("TERM", &format!("term{i}"), 0.8))
                .collect(),
            relations: vec![],
        };
        let (entities, _) = extraction.into_graph("doc_1", 0.0, 3);
        assert_eq!(entities.len(), 3);
    }

    #[test]
    fn test_create_extractor_defaults_to_rules() {
        let extractor = create_extractor(&ExtractionSettings::default(), &EmbeddingSettings::default());
        assert_eq!(extractor.name(), "rules");
    }
}
