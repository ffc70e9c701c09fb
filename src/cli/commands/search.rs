//! Semantic search command.

use crate::cli::SearchArgs;
use crate::config::KhConfig;
use crate::coordinator::search_vector;
use crate::error::Result;
use crate::model::SubjectKind;
use crate::vector::VectorHit;
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

use super::{build_pipeline, existing_db_path, open_stores, runtime};

/// Longest excerpt printed per hit.
const EXCERPT_CHARS: usize = 160;

#[derive(Serialize)]
struct SearchOutput<'a> {
    query: &'a str,
    results: Vec<VectorHit>,
    count: usize,
}

/// Execute the search command.
///
/// # Errors
///
/// Returns `InvalidArgument` for an empty query, `Config` when no embedding
/// provider is reachable, or the provider error.
pub fn execute(args: &SearchArgs, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let db_path = existing_db_path(db_path)?;
    let config = KhConfig::load()?;
    let kind = args.kind.as_deref().map(str::parse::<SubjectKind>).transpose()?;
    let (_, stores) = open_stores(&db_path, &config)?;

    let rt = runtime()?;
    let results = rt.block_on(async {
        let pipeline = build_pipeline(&config).await?;
        search_vector(&pipeline, &stores, &args.query, args.top_k, kind).await
    })?;

    if json {
        let output = SearchOutput {
            query: &args.query,
            count: results.len(),
            results,
        };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No matches. Has anything been ingested? Try `kh ingest work --once`.");
        return Ok(());
    }

    for (rank, hit) in results.iter().enumerate() {
        println!(
            "{}. {} {} #{} ({:.3})",
            rank + 1,
            hit.subject_id.bold(),
            hit.subject_kind,
            hit.chunk_index,
            hit.score
        );
        let excerpt: String = hit.content.chars().take(EXCERPT_CHARS).collect();
        println!("   {}", excerpt.replace('\n', " ").dimmed());
    }
    Ok(())
}
