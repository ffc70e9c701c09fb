//! Capture command: classify one raw message and record it.

use crate::capture::{CaptureMiddleware, CapturedMessage, Direction};
use crate::cli::CaptureArgs;
use crate::config::KhConfig;
use crate::error::Result;
use crate::session::SessionManager;
use std::path::PathBuf;

use super::{enqueue_options, open_storage, parse_context, read_content, resolve_actor, runtime};

/// Execute the capture command.
///
/// # Errors
///
/// Returns `CaptureFailed` when the record could not be written after
/// retries, or the session error when the session cannot accept it.
pub fn execute(
    args: &CaptureArgs,
    db_path: Option<&PathBuf>,
    actor: Option<&str>,
    json: bool,
) -> Result<()> {
    let mut storage = open_storage(db_path)?;
    let config = KhConfig::load()?;
    let manager = SessionManager::new(&mut storage, config.session.clone(), resolve_actor(actor))
        .with_queue_options(enqueue_options(&config));

    let content = read_content(&args.content)?;
    let mut message = match Direction::from(args.direction) {
        Direction::Inbound => CapturedMessage::inbound(content),
        Direction::Outbound => CapturedMessage::outbound(content),
    };
    if let Some(kind) = args.kind {
        message = message.with_kind(kind.into());
    }
    if let Some(ref tool) = args.tool {
        message = message.with_tool(tool.clone());
    }
    if args.failed {
        message = message.with_success(false);
    } else if args.succeeded {
        message = message.with_success(true);
    }
    if let Some(context) = parse_context(args.context.as_deref())? {
        message = message.with_context(context);
    }

    let middleware = CaptureMiddleware::new(manager, &config.capture);
    let rt = runtime()?;
    let outcome = rt.block_on(middleware.capture(&args.session_id, &message))?;

    if json {
        println!("{}", serde_json::to_string(&outcome)?);
    } else {
        println!("Captured {}", outcome.interaction_id);
        println!("  Queue item: {}", outcome.queue_item_id);
        println!("  Messages:   {}", outcome.message_count);
    }
    Ok(())
}
