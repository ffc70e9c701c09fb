//! Ingest command implementations.
//!
//! Queue operations (`add`, `enqueue`, `status`, `list`, `retry`, `sweep`)
//! need only the relational store. `work` runs the pipeline, either as a
//! one-shot drain or as a worker pool until Ctrl-C. Index maintenance
//! (`rebuild`, `reindex`, `prune`, `purge`) goes through the coordinator.

use crate::cli::IngestCommands;
use crate::config::{config_path, KhConfig};
use crate::coordinator::Coordinator;
use crate::error::{Error, Result};
use crate::ingestion::{Ingestion, PoolSettings, WorkerPool};
use crate::model::{now_millis, NewDocument, QueueStatus, SubjectKind};
use crate::storage::SqliteStorage;
use crate::stores::StorePaths;
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::{
    build_pipeline, enqueue_options, existing_db_path, format_millis, open_stores, read_content,
    resolve_actor, runtime,
};

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Execute ingest commands.
///
/// # Errors
///
/// Returns an error if the database operation or the pipeline fails.
pub fn execute(
    command: &IngestCommands,
    db_path: Option<&PathBuf>,
    actor: Option<&str>,
    json: bool,
) -> Result<()> {
    let db_path = existing_db_path(db_path)?;
    let config = KhConfig::load()?;
    let actor = resolve_actor(actor);

    match command {
        IngestCommands::Add {
            path,
            content,
            title,
            project,
            tags,
            priority,
        } => add(
            &db_path,
            &config,
            &actor,
            path.as_deref(),
            content.as_deref(),
            title.as_deref(),
            project.as_deref(),
            tags,
            *priority,
            json,
        ),
        IngestCommands::Enqueue {
            subject_id,
            kind,
            priority,
        } => {
            let kind = kind.as_deref().map(str::parse::<SubjectKind>).transpose()?;
            let mut storage = SqliteStorage::open(&db_path)?;
            let item = Ingestion::new(&mut storage, &config.ingestion, &actor)
                .enqueue(subject_id, kind, *priority)?;
            if json {
                println!("{}", serde_json::to_string(&item)?);
            } else {
                println!("Enqueued {} as {} [{}]", item.subject_id, item.id, item.status);
            }
            Ok(())
        }
        IngestCommands::Status { subject_id } => {
            let mut storage = SqliteStorage::open(&db_path)?;
            let status = Ingestion::new(&mut storage, &config.ingestion, &actor).status(subject_id)?;
            if json {
                println!("{}", serde_json::to_string(&status)?);
            } else {
                println!("{}: {}", status.subject_id, colored_status(status.status));
                println!("  Attempts: {}", status.attempts);
                if let Some(ref error) = status.last_error {
                    let retry = if status.retryable { " (will retry)" } else { "" };
                    println!("  Last error: {error}{retry}");
                }
            }
            Ok(())
        }
        IngestCommands::List { status, limit } => {
            let status = status.as_deref().map(str::parse::<QueueStatus>).transpose()?;
            list(&db_path, &config, &actor, status, *limit, json)
        }
        IngestCommands::Work {
            once,
            limit,
            workers,
            duration_secs,
        } => {
            if *once {
                work_once(&db_path, &config, &actor, *limit, json)
            } else {
                work_pool(&db_path, &config, *workers, duration_secs.map(Duration::from_secs), json)
            }
        }
        IngestCommands::Sweep => {
            let mut storage = SqliteStorage::open(&db_path)?;
            let stale_ms = i64::try_from(config.ingestion.stale_after_ms).unwrap_or(i64::MAX);
            let report = storage.sweep(now_millis().saturating_sub(stale_ms), &actor)?;
            if json {
                println!("{}", serde_json::to_string(&report)?);
            } else {
                println!(
                    "Swept queue: {} requeued, {} reclaimed, {} exhausted",
                    report.requeued, report.reclaimed, report.exhausted
                );
            }
            Ok(())
        }
        IngestCommands::Retry { subject_id } => {
            let mut storage = SqliteStorage::open(&db_path)?;
            let item = Ingestion::new(&mut storage, &config.ingestion, &actor).retry_failed(subject_id)?;
            if json {
                println!("{}", serde_json::to_string(&item)?);
            } else {
                println!("Reset {} to pending ({})", item.subject_id, item.id);
            }
            Ok(())
        }
        IngestCommands::Rebuild { kind } => {
            let kind = kind.as_deref().map(str::parse::<SubjectKind>).transpose()?;
            let (_, mut stores) = open_stores(&db_path, &config)?;
            let report = Coordinator::new(&mut stores, enqueue_options(&config), &actor).rebuild(kind)?;
            if json {
                println!("{}", serde_json::to_string(&report)?);
            } else {
                println!(
                    "Rebuild queued: {} vector(s) and {} entit(ies) dropped, {} subject(s) requeued",
                    report.vectors_removed, report.entities_removed, report.requeued
                );
            }
            Ok(())
        }
        IngestCommands::Reindex { dimensions } => {
            reindex(&db_path, config, &actor, *dimensions, json)
        }
        IngestCommands::Prune => {
            let (_, mut stores) = open_stores(&db_path, &config)?;
            let report = Coordinator::new(&mut stores, enqueue_options(&config), &actor).prune_orphans()?;
            if json {
                println!("{}", serde_json::to_string(&report)?);
            } else {
                println!(
                    "Pruned orphans: {} vector subject(s), {} graph subject(s)",
                    report.vector_subjects, report.graph_subjects
                );
            }
            Ok(())
        }
        IngestCommands::Purge {
            before,
            older_than_days,
        } => {
            let cutoff = purge_cutoff(before.as_deref(), *older_than_days)?;
            let (_, mut stores) = open_stores(&db_path, &config)?;
            let report =
                Coordinator::new(&mut stores, enqueue_options(&config), &actor).purge_ended_before(cutoff)?;
            if json {
                println!("{}", serde_json::to_string(&report)?);
            } else {
                println!(
                    "Purged sessions ended before {}: {} session(s), {} interaction(s), {} queue item(s)",
                    format_millis(cutoff),
                    report.sessions,
                    report.interactions,
                    report.queue_items
                );
            }
            Ok(())
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn add(
    db_path: &Path,
    config: &KhConfig,
    actor: &str,
    path: Option<&Path>,
    content: Option<&str>,
    title: Option<&str>,
    project: Option<&str>,
    tags: &[String],
    priority: i64,
    json: bool,
) -> Result<()> {
    let (body, default_title) = match (path, content) {
        (Some(path), _) if path.as_os_str() == "-" => (read_content("-")?, "stdin".to_string()),
        (Some(path), _) => (
            std::fs::read_to_string(path)?,
            path.file_name()
                .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().to_string()),
        ),
        (None, Some(content)) => (content.to_string(), "untitled".to_string()),
        (None, None) => {
            return Err(Error::InvalidArgument(
                "pass a file path, - for stdin, or --content".to_string(),
            ));
        }
    };

    let mut document = NewDocument::new(title.map_or(default_title, ToString::to_string), body)
        .with_tags(tags.to_vec());
    if let Some(project) = project {
        document = document.with_project(project);
    }

    let mut storage = SqliteStorage::open(db_path)?;
    let receipt = Ingestion::new(&mut storage, &config.ingestion, actor).ingest_document(&document, priority)?;

    if json {
        println!("{}", serde_json::to_string(&receipt)?);
    } else if receipt.duplicate {
        println!("Already stored as {} ({})", receipt.document_id, receipt.queue_item_id);
    } else {
        println!("{} {}", "Added".green(), receipt.document_id);
        println!("  Queue item: {}", receipt.queue_item_id);
    }
    Ok(())
}

fn list(
    db_path: &Path,
    config: &KhConfig,
    actor: &str,
    status: Option<QueueStatus>,
    limit: u32,
    json: bool,
) -> Result<()> {
    let mut storage = SqliteStorage::open(db_path)?;
    let ingestion = Ingestion::new(&mut storage, &config.ingestion, actor);
    let items = ingestion.list(status, limit)?;

    if json {
        let output = serde_json::json!({
            "items": items,
            "count": items.len(),
            "stats": ingestion.queue_stats()?,
        });
        println!("{output}");
        return Ok(());
    }

    if items.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }
    for item in &items {
        println!(
            "{} {} [{}] attempts {}/{}",
            item.id,
            item.subject_id,
            colored_status(item.status),
            item.attempts,
            item.max_attempts
        );
        if let Some(ref error) = item.last_error {
            println!("    {}", error.dimmed());
        }
    }
    Ok(())
}

fn work_once(
    db_path: &Path,
    config: &KhConfig,
    actor: &str,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let (_, mut stores) = open_stores(db_path, config)?;
    let worker_id = format!("cli-{}-{actor}", std::process::id());

    let rt = runtime()?;
    let report = rt.block_on(async {
        let pipeline = build_pipeline(config).await?;
        pipeline.drain(&mut stores, &worker_id, limit).await
    })?;

    if json {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        println!(
            "Processed {}: {} completed, {} failed ({} scheduled for retry)",
            report.processed, report.completed, report.failed, report.retry_scheduled
        );
    }
    Ok(())
}

fn work_pool(
    db_path: &Path,
    config: &KhConfig,
    workers: Option<usize>,
    duration: Option<Duration>,
    json: bool,
) -> Result<()> {
    let paths = StorePaths::for_database(db_path);
    let mut settings = PoolSettings::from(&config.ingestion);
    if let Some(workers) = workers {
        settings.workers = workers;
    }

    let rt = runtime()?;
    let report = rt.block_on(async {
        let pipeline = Arc::new(build_pipeline(config).await?);
        let pool = WorkerPool::spawn(pipeline, &paths, settings)?;
        if !json {
            println!(
                "Running {} worker(s); press Ctrl-C to stop",
                pool.size()
            );
        }

        match duration {
            Some(duration) => {
                tokio::select! {
                    () = tokio::time::sleep(duration) => {}
                    signal = tokio::signal::ctrl_c() => signal?,
                }
            }
            None => tokio::signal::ctrl_c().await?,
        }

        tracing::info!("Stopping worker pool");
        Ok::<_, Error>(pool.shutdown().await)
    })?;

    if json {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        println!("Stopped: {} item(s) processed", report.processed);
        if report.crashed > 0 {
            println!("{} {} worker(s) crashed", "Warning:".yellow(), report.crashed);
        }
    }
    Ok(())
}

/// Reset vectors to `dimensions` and persist the new value in config.json.
fn reindex(
    db_path: &Path,
    mut config: KhConfig,
    actor: &str,
    dimensions: usize,
    json: bool,
) -> Result<()> {
    let paths = StorePaths::for_database(db_path);
    let current = paths
        .recorded_dimensions()?
        .unwrap_or_else(|| crate::embeddings::resolve_dimensions(&config.embeddings));
    let mut stores = paths.open(current)?;

    let report = Coordinator::new(&mut stores, enqueue_options(&config), actor).reindex(dimensions)?;

    config.embeddings.dimensions = Some(dimensions);
    if let Some(path) = config_path() {
        config.save_to(&path)?;
    }
    if std::env::var("KH_EMBEDDING_DIMENSIONS").is_ok_and(|v| v.trim() != dimensions.to_string()) {
        tracing::warn!(
            dimensions,
            "KH_EMBEDDING_DIMENSIONS overrides config.json; update it to match"
        );
    }

    if json {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        let previous = report
            .previous_dimensions
            .map_or_else(|| "unset".to_string(), |d| d.to_string());
        println!("Reindexed: {previous} -> {} dimensions", report.dimensions);
        println!("  Vectors removed: {}", report.vectors_removed);
        println!("  Subjects requeued: {}", report.requeued);
        println!();
        println!("Next: kh ingest work");
    }
    Ok(())
}

fn purge_cutoff(before: Option<&str>, older_than_days: Option<u32>) -> Result<i64> {
    match (before, older_than_days) {
        (Some(before), _) => chrono::DateTime::parse_from_rfc3339(before)
            .map(|t| t.timestamp_millis())
            .map_err(|e| Error::InvalidArgument(format!("--before is not RFC 3339: {e}"))),
        (None, Some(days)) => Ok(now_millis() - i64::from(days) * MILLIS_PER_DAY),
        (None, None) => Err(Error::InvalidArgument(
            "pass --before or --older-than-days".to_string(),
        )),
    }
}

fn colored_status(status: QueueStatus) -> colored::ColoredString {
    match status {
        QueueStatus::Pending => status.as_str().normal(),
        QueueStatus::Processing => status.as_str().cyan(),
        QueueStatus::Completed => status.as_str().green(),
        QueueStatus::Failed => status.as_str().red(),
    }
}
