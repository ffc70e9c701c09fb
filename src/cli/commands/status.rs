//! Status command implementation.

use crate::config::KhConfig;
use crate::coordinator::Coordinator;
use crate::error::Result;
use crate::model::SessionStatus;
use colored::Colorize;
use std::path::PathBuf;

use super::{enqueue_options, existing_db_path, open_stores, resolve_actor};

/// Execute status command.
///
/// # Errors
///
/// Returns `NotInitialized` if the database does not exist, or a store error.
pub fn execute(db_path: Option<&PathBuf>, actor: Option<&str>, json: bool) -> Result<()> {
    let db_path = existing_db_path(db_path)?;
    let config = KhConfig::load()?;
    let (_, mut stores) = open_stores(&db_path, &config)?;
    let actor = resolve_actor(actor);

    let status = Coordinator::new(&mut stores, enqueue_options(&config), &actor).status()?;

    if json {
        println!("{}", serde_json::to_string(&status)?);
        return Ok(());
    }

    println!("{}", "Knowledge Hub Status".bold());
    println!("====================");
    println!();
    println!("Database: {}", db_path.display());
    println!();

    println!("{}", "Sessions".cyan().bold());
    let count_of = |wanted: SessionStatus| {
        status
            .sessions
            .iter()
            .find(|(s, _)| *s == wanted)
            .map_or(0, |(_, n)| *n)
    };
    println!("  Active:  {}", count_of(SessionStatus::Active));
    println!("  Paused:  {}", count_of(SessionStatus::Paused));
    println!("  Ended:   {}", count_of(SessionStatus::Ended));
    println!("  Error:   {}", count_of(SessionStatus::Error));
    println!();

    println!("{}", "Ingestion Queue".cyan().bold());
    println!("  Pending:    {}", status.queue.pending);
    println!("  Processing: {}", status.queue.processing);
    println!("  Completed:  {}", status.queue.completed);
    if status.queue.failed > 0 {
        println!(
            "  Failed:     {} ({} will retry)",
            status.queue.failed.to_string().red(),
            status.queue.retryable
        );
    } else {
        println!("  Failed:     0");
    }
    println!();

    println!("{}", "Indexes".cyan().bold());
    println!("  Vectors:       {} ({} dims)", status.vectors, status.dimensions);
    println!("  Entities:      {}", status.graph.entities);
    println!("  Relationships: {}", status.graph.relationships);

    Ok(())
}
