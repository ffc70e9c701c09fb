//! Initialize the knowledge hub.
//!
//! Creates the home directory, writes `config.json` when missing, and opens
//! all three stores once so their schemas exist and the embedding
//! dimensionality is recorded. Running it again is harmless.

use crate::config::{config_path, resolve_db_path, KhConfig};
use crate::embeddings::resolve_dimensions;
use crate::error::{Error, Result};
use crate::stores::StorePaths;
use colored::Colorize;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

#[derive(Serialize)]
struct InitOutput {
    config: PathBuf,
    database: PathBuf,
    vectors: PathBuf,
    graph: PathBuf,
    dimensions: usize,
    created: bool,
}

/// Execute the init command.
///
/// # Errors
///
/// Returns an error if a directory or database cannot be created, or if
/// `--dimensions` disagrees with an already initialized vector store.
pub fn execute(
    db_path: Option<&PathBuf>,
    force: bool,
    dimensions: Option<usize>,
    json: bool,
) -> Result<()> {
    let config_file = config_path()
        .ok_or_else(|| Error::Config("Could not determine the knowledge hub home".to_string()))?;
    let db_path = resolve_db_path(db_path.map(PathBuf::as_path))
        .ok_or_else(|| Error::Config("Could not determine the database path".to_string()))?;

    if dimensions == Some(0) {
        return Err(Error::InvalidArgument("dimensions must be positive".to_string()));
    }

    let mut config = if force {
        KhConfig::default()
    } else {
        KhConfig::load_from(&config_file)?
    };
    if dimensions.is_some() {
        config.embeddings.dimensions = dimensions;
    }
    if force || dimensions.is_some() || !config_file.exists() {
        config.save_to(&config_file)?;
    }

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let created = !db_path.exists();
    let dimensions = resolve_dimensions(&config.embeddings);
    let paths = StorePaths::for_database(&db_path);
    paths.open(dimensions)?;

    tracing::info!(database = %db_path.display(), dimensions, created, "Knowledge hub initialized");

    if json {
        let output = InitOutput {
            config: config_file,
            database: paths.relational,
            vectors: paths.vectors,
            graph: paths.graph,
            dimensions,
            created,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else {
        let verb = if created { "Initialized" } else { "Already initialized" };
        println!("{} knowledge hub", verb.green().bold());
        println!("  Config:     {}", config_file.display());
        println!("  Database:   {}", paths.relational.display());
        println!("  Vectors:    {}", paths.vectors.display());
        println!("  Graph:      {}", paths.graph.display());
        println!("  Dimensions: {dimensions}");
        if created {
            println!();
            println!("Next: kh session start --owner <you> --project <name>");
        }
    }

    Ok(())
}
