//! Session command implementations.

use crate::cli::SessionCommands;
use crate::config::KhConfig;
use crate::error::Result;
use crate::model::{InteractionKind, NewInteraction, Session, SessionStatus, StartRequest};
use crate::session::SessionManager;
use crate::storage::SessionFilter;
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use super::{enqueue_options, format_millis, open_storage, parse_context, read_content, resolve_actor, runtime};

/// Output for session list command.
#[derive(Serialize)]
struct SessionListOutput {
    sessions: Vec<Session>,
    count: usize,
}

/// Execute session commands.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn execute(
    command: &SessionCommands,
    db_path: Option<&PathBuf>,
    actor: Option<&str>,
    json: bool,
) -> Result<()> {
    let mut storage = open_storage(db_path)?;
    let config = KhConfig::load()?;
    let actor = resolve_actor(actor);
    let mut manager = SessionManager::new(&mut storage, config.session.clone(), actor)
        .with_queue_options(enqueue_options(&config));

    match command {
        SessionCommands::Start {
            owner,
            project,
            external_id,
            context,
        } => start(
            &mut manager,
            owner,
            project,
            external_id.as_deref(),
            context.as_deref(),
            json,
        ),
        SessionCommands::Record {
            session_id,
            content,
            kind,
            context,
            failed,
        } => record(
            &mut manager,
            session_id,
            content,
            (*kind).into(),
            context.as_deref(),
            *failed,
            json,
        ),
        SessionCommands::End {
            session_id,
            reason,
            timeout_ms,
        } => end(&mut manager, session_id, reason, *timeout_ms, json),
        SessionCommands::Resume { owner, project } => {
            resume(&mut manager, owner, project.as_deref(), json)
        }
        SessionCommands::List {
            owner,
            project,
            status,
            limit,
        } => list(
            &manager,
            owner.as_deref(),
            project.as_deref(),
            status.as_deref(),
            *limit,
            json,
        ),
        SessionCommands::Show { id, interactions } => show(&manager, id, *interactions, json),
        SessionCommands::Pause { id } => {
            let session = manager.pause(id)?;
            print_transition(&session, "Paused", json)
        }
        SessionCommands::Reactivate { id } => {
            let session = manager.reactivate(id)?;
            print_transition(&session, "Reactivated", json)
        }
        SessionCommands::Fail { id, reason } => {
            let session = manager.fail(id, reason)?;
            print_transition(&session, "Failed", json)
        }
    }
}

fn start(
    manager: &mut SessionManager<'_>,
    owner: &str,
    project: &str,
    external_id: Option<&str>,
    context: Option<&str>,
    json: bool,
) -> Result<()> {
    let mut request = StartRequest::new(owner, project);
    if let Some(external_id) = external_id {
        request = request.with_external_id(external_id);
    }
    if let Some(context) = parse_context(context)? {
        request = request.with_context(context);
    }

    let started = manager.start(request)?;
    let session = &started.session;

    if json {
        let output = serde_json::json!({
            "id": session.id,
            "owner_id": session.owner_id,
            "project": session.project,
            "status": session.status,
            "external_id": session.external_id,
            "created": started.created,
        });
        println!("{output}");
    } else {
        let verb = if started.created { "Started" } else { "Existing" };
        println!("{} session: {}", verb.green(), session.id);
        println!("  Owner:   {}", session.owner_id);
        println!("  Project: {}", session.project);
        if let Some(ref external_id) = session.external_id {
            println!("  External ID: {external_id}");
        }
    }
    Ok(())
}

fn record(
    manager: &mut SessionManager<'_>,
    session_id: &str,
    content: &str,
    kind: InteractionKind,
    context: Option<&str>,
    failed: bool,
    json: bool,
) -> Result<()> {
    let content = read_content(content)?;
    let mut interaction = NewInteraction::new(kind, content).with_success(!failed);
    if let Some(context) = parse_context(context)? {
        interaction = interaction.with_context(context);
    }

    let outcome = manager.record_interaction(session_id, &interaction)?;

    if json {
        println!("{}", serde_json::to_string(&outcome)?);
    } else {
        println!("Recorded {} ({kind})", outcome.interaction_id);
        println!("  Queue item: {}", outcome.queue_item_id);
        println!("  Messages:   {}", outcome.message_count);
    }
    Ok(())
}

fn end(
    manager: &mut SessionManager<'_>,
    session_id: &str,
    reason: &str,
    timeout_ms: Option<u64>,
    json: bool,
) -> Result<()> {
    let rt = runtime()?;
    let summary = rt.block_on(manager.end(session_id, reason, timeout_ms.map(Duration::from_millis)))?;

    if json {
        println!("{}", serde_json::to_string(&summary)?);
        return Ok(());
    }

    println!("{} session: {}", "Ended".green(), summary.session_id);
    println!("  Messages: {}", summary.message_count);
    if !summary.ingestion_complete {
        println!(
            "  {} {} item(s) still queued",
            "Ingestion incomplete:".yellow(),
            summary.outstanding_items
        );
    }
    println!();
    println!("{}", summary.summary);
    Ok(())
}

fn resume(
    manager: &mut SessionManager<'_>,
    owner: &str,
    project: Option<&str>,
    json: bool,
) -> Result<()> {
    let bundle = manager.resume(owner, project)?;

    if json {
        println!("{}", serde_json::to_string(&bundle)?);
        return Ok(());
    }

    match bundle.previous_session {
        Some(ref previous) => {
            println!("{} from {}", "Resumed".green(), previous.id);
            println!("  New session: {}", bundle.session.id);
            println!("  Recent interactions: {}", bundle.recent_interactions.len());
            if let Some(ref context) = bundle.resume_context {
                println!();
                println!("{context}");
            }
        }
        None => {
            println!("No ended session to resume; started fresh.");
            println!("  Session: {}", bundle.session.id);
        }
    }
    Ok(())
}

fn list(
    manager: &SessionManager<'_>,
    owner: Option<&str>,
    project: Option<&str>,
    status: Option<&str>,
    limit: u32,
    json: bool,
) -> Result<()> {
    let status = status.map(str::parse::<SessionStatus>).transpose()?;
    let sessions = manager.list(&SessionFilter {
        owner_id: owner,
        project,
        status,
        limit: Some(limit),
    })?;

    if json {
        let output = SessionListOutput {
            count: sessions.len(),
            sessions,
        };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    if sessions.is_empty() {
        println!("No sessions found.");
        return Ok(());
    }

    println!("Sessions ({} found):", sessions.len());
    println!();
    for session in &sessions {
        let icon = match session.status {
            SessionStatus::Active => "●".green(),
            SessionStatus::Paused => "◐".yellow(),
            SessionStatus::Ended => "○".normal(),
            SessionStatus::Error => "✗".red(),
        };
        println!(
            "{icon} {} [{}] {} / {}",
            session.id, session.status, session.owner_id, session.project
        );
        println!(
            "    started {}, {} message(s)",
            format_millis(session.started_at),
            session.message_count
        );
    }
    Ok(())
}

fn show(manager: &SessionManager<'_>, id: &str, interactions: usize, json: bool) -> Result<()> {
    let session = manager.get(id)?;
    let recent = manager.recent_interactions(id, interactions)?;

    if json {
        let output = serde_json::json!({
            "session": session,
            "recent_interactions": recent,
        });
        println!("{output}");
        return Ok(());
    }

    println!("{} [{}]", session.id.bold(), session.status);
    println!("  Owner:    {}", session.owner_id);
    println!("  Project:  {}", session.project);
    println!("  Started:  {}", format_millis(session.started_at));
    if let Some(ended_at) = session.ended_at {
        println!("  Ended:    {}", format_millis(ended_at));
    }
    println!("  Messages: {}", session.message_count);
    if !session.tools_used.is_empty() {
        println!("  Tools:    {}", session.tools_used.join(", "));
    }
    if !session.files_touched.is_empty() {
        println!("  Files:    {}", session.files_touched.join(", "));
    }
    if let Some(ref summary) = session.summary {
        println!();
        println!("{summary}");
    }

    if !recent.is_empty() {
        println!();
        println!("{}", "Recent interactions".cyan().bold());
        for interaction in &recent {
            let marker = if interaction.success { " " } else { "!" };
            let first_line = interaction.content.lines().next().unwrap_or("");
            println!("{marker} [{}] {first_line}", interaction.kind);
        }
    }
    Ok(())
}

fn print_transition(session: &Session, verb: &str, json: bool) -> Result<()> {
    if json {
        let output = serde_json::json!({
            "id": session.id,
            "status": session.status,
        });
        println!("{output}");
    } else {
        println!("{verb} session: {}", session.id);
    }
    Ok(())
}
