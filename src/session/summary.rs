//! Session summary and resume-context generation.
//!
//! Both are plain text built from the session's accumulated lists and its
//! last few interactions. The resume context is what the next session is
//! seeded with, so it is kept short and never empty.

use std::fmt::Write as _;

use crate::model::{Interaction, InteractionKind, NewInteraction, Outcome, OutcomeKind, Session};

/// Longest outcome text kept per record.
const OUTCOME_TEXT_LIMIT: usize = 120;

/// Longest excerpt of the last exchange carried into the resume context.
const EXCERPT_LIMIT: usize = 280;

/// Accomplishment or failure attributed to an interaction, if any.
///
/// A system error or an explicit failure is a failure; a successful tool
/// execution is an accomplishment labelled with the tool name.
#[must_use]
pub fn derive_outcome(interaction: &NewInteraction) -> Option<(OutcomeKind, String)> {
    let first_line = interaction.content.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim();

    if interaction.kind == InteractionKind::SystemError || !interaction.success {
        let text = if first_line.is_empty() { "unspecified error" } else { first_line };
        return Some((OutcomeKind::Failure, truncate(text, OUTCOME_TEXT_LIMIT)));
    }

    if interaction.kind == InteractionKind::ToolExecution {
        let text = match (interaction.tool_name(), first_line.is_empty()) {
            (Some(tool), false) => format!("{tool}: {first_line}"),
            (Some(tool), true) => tool.to_string(),
            (None, _) => first_line.to_string(),
        };
        if !text.is_empty() {
            return Some((OutcomeKind::Accomplishment, truncate(&text, OUTCOME_TEXT_LIMIT)));
        }
    }

    None
}

/// Human-readable summary persisted on the ended session.
#[must_use]
pub fn build_summary(session: &Session, outstanding: usize, max_items: usize) -> String {
    let mut out = format!(
        "Session {} ({}) recorded {} message(s).",
        session.id, session.project, session.message_count
    );

    push_outcomes(&mut out, " Accomplished: ", &session.accomplishments, max_items);
    push_outcomes(&mut out, " Failed: ", &session.failures, max_items);
    push_list(&mut out, " Tools: ", &session.tools_used, max_items);
    push_list(&mut out, " Files: ", &session.files_touched, max_items);

    if outstanding > 0 {
        let _ = write!(
            out,
            " Ingestion incomplete: {outstanding} item(s) still queued at end."
        );
    }
    out
}

/// Compact context handed to the next session.
#[must_use]
pub fn build_resume_context(
    session: &Session,
    reason: &str,
    recent: &[Interaction],
    max_items: usize,
) -> String {
    let mut out = format!(
        "Previous session {} on project {} ended ({reason}).\n",
        session.id, session.project
    );

    if !session.accomplishments.is_empty() {
        out.push_str("Done:\n");
        for outcome in tail(&session.accomplishments, max_items) {
            let _ = writeln!(out, "- {}", outcome.text);
        }
    }
    if !session.failures.is_empty() {
        out.push_str("Unresolved:\n");
        for outcome in tail(&session.failures, max_items) {
            let _ = writeln!(out, "- {}", outcome.text);
        }
    }
    if !session.files_touched.is_empty() {
        let files: Vec<&str> = tail(&session.files_touched, max_items)
            .iter()
            .map(String::as_str)
            .collect();
        let _ = writeln!(out, "Files: {}", files.join(", "));
    }

    let last_user = recent
        .iter()
        .rev()
        .find(|i| i.kind == InteractionKind::UserMessage);
    if let Some(message) = last_user {
        let _ = writeln!(out, "Last request: {}", truncate(message.content.trim(), EXCERPT_LIMIT));
    }

    out.trim_end().to_string()
}

fn push_outcomes(out: &mut String, label: &str, outcomes: &[Outcome], max_items: usize) {
    if outcomes.is_empty() {
        return;
    }
    out.push_str(label);
    let texts: Vec<&str> = tail(outcomes, max_items).iter().map(|o| o.text.as_str()).collect();
    out.push_str(&texts.join("; "));
    if outcomes.len() > max_items {
        let _ = write!(out, " (+{} more)", outcomes.len() - max_items);
    }
    out.push('.');
}

fn push_list(out: &mut String, label: &str, items: &[String], max_items: usize) {
    if items.is_empty() {
        return;
    }
    out.push_str(label);
    let shown: Vec<&str> = items.iter().take(max_items).map(String::as_str).collect();
    out.push_str(&shown.join(", "));
    if items.len() > max_items {
        let _ = write!(out, " (+{} more)", items.len() - max_items);
    }
    out.push('.');
}

/// The last `n` entries.
fn tail<T>(items: &[T], n: usize) -> &[T] {
    &items[items.len().saturating_sub(n)..]
}

/// Cut to at most `max` bytes on a char boundary, marking the cut.
fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut cut = max.saturating_sub(3);
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &text[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SessionStatus;

    fn session() -> Session {
        Session {
            id: "sess_1".to_string(),
            external_id: None,
            owner_id: "ana".to_string(),
            project: "hub".to_string(),
            status: SessionStatus::Active,
            started_at: 0,
            ended_at: None,
            end_reason: None,
            summary: None,
            resume_context: None,
            context: serde_json::json!({}),
            accomplishments: vec![Outcome {
                interaction_id: "int_1".to_string(),
                text: "cargo: tests pass".to_string(),
                created_at: 1,
            }],
            failures: vec![],
            tools_used: vec!["cargo".to_string()],
            files_touched: vec!["src/lib.rs".to_string()],
            message_count: 3,
            updated_at: 1,
        }
    }

    #[test]
    fn test_derive_outcome() {
        let tool = NewInteraction::new(InteractionKind::ToolExecution, "tests pass\nmore")
            .with_context(serde_json::json!({"tool": "cargo"}));
        assert_eq!(
            derive_outcome(&tool),
            Some((OutcomeKind::Accomplishment, "cargo: tests pass".to_string()))
        );

        let failed = tool.clone().with_success(false);
        assert_eq!(derive_outcome(&failed).map(|o| o.0), Some(OutcomeKind::Failure));

        let error = NewInteraction::new(InteractionKind::SystemError, "");
        assert_eq!(
            derive_outcome(&error),
            Some((OutcomeKind::Failure, "unspecified error".to_string()))
        );

        let chat = NewInteraction::new(InteractionKind::UserMessage, "hello");
        assert_eq!(derive_outcome(&chat), None);
    }

    #[test]
    fn test_summary_mentions_outstanding_work() {
        let s = session();
        let done = build_summary(&s, 0, 10);
        assert!(done.contains("3 message(s)"));
        assert!(done.contains("cargo: tests pass"));
        assert!(!done.contains("incomplete"));

        let partial = build_summary(&s, 2, 10);
        assert!(partial.contains("Ingestion incomplete: 2 item(s)"));
    }

    #[test]
    fn test_resume_context_is_never_empty() {
        let mut s = session();
        s.accomplishments.clear();
        s.files_touched.clear();
        let context = build_resume_context(&s, "done", &[], 10);
        assert!(context.starts_with("Previous session sess_1"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "é".repeat(100);
        let cut = truncate(&text, 11);
        assert!(cut.ends_with("..."));
        assert!(cut.len() <= 11);
    }
}
