//! Entity graph query command.

use crate::cli::GraphArgs;
use crate::config::KhConfig;
use crate::coordinator::graph_query;
use crate::error::Result;
use crate::model::GraphFilter;
use colored::Colorize;
use std::collections::HashMap;
use std::path::PathBuf;

use super::{existing_db_path, open_stores};

/// Execute the graph command.
///
/// # Errors
///
/// Returns an error if the graph store cannot be queried.
pub fn execute(args: &GraphArgs, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let db_path = existing_db_path(db_path)?;
    let config = KhConfig::load()?;
    let (_, stores) = open_stores(&db_path, &config)?;

    let filter = GraphFilter {
        entity_type: args.entity_type.clone(),
        name: args.name.clone(),
        source_subject_id: args.subject.clone(),
        min_confidence: args.min_confidence,
        limit: Some(args.limit),
    };
    let result = graph_query(&stores, &filter)?;

    if json {
        println!("{}", serde_json::to_string(&result)?);
        return Ok(());
    }

    if result.entities.is_empty() {
        println!("No entities found.");
        return Ok(());
    }

    println!("{}", format!("Entities ({})", result.entities.len()).cyan().bold());
    for entity in &result.entities {
        println!(
            "  {} {} ({:.2}) from {}",
            format!("[{}]", entity.entity_type).yellow(),
            entity.name,
            entity.confidence,
            entity.source_subject_id
        );
    }

    if !result.relationships.is_empty() {
        let names: HashMap<&str, &str> = result
            .entities
            .iter()
            .map(|e| (e.id.as_str(), e.name.as_str()))
            .collect();
        println!();
        println!(
            "{}",
            format!("Relationships ({})", result.relationships.len()).cyan().bold()
        );
        for rel in &result.relationships {
            let from = names.get(rel.source_entity_id.as_str()).copied().unwrap_or(rel.source_entity_id.as_str());
            let to = names.get(rel.target_entity_id.as_str()).copied().unwrap_or(rel.target_entity_id.as_str());
            println!("  {from} -[{}]-> {to} ({:.2})", rel.relationship_type, rel.confidence);
        }
    }
    Ok(())
}
