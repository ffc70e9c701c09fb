//! Session model.
//!
//! A session is one continuous stretch of agent work. It accumulates
//! counters while active and carries a summary plus a condensed resume
//! context once ended, which is what the next session is seeded with.

use serde::{Deserialize, Serialize};

use crate::error::Error;

use super::interaction::Interaction;

/// Session lifecycle states.
///
/// `active -> {paused, ended, error}`, `paused -> {active, ended}`.
/// `ended` and `error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Paused,
    Ended,
    Error,
}

impl SessionStatus {
    /// Get the string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Ended => "ended",
            Self::Error => "error",
        }
    }

    /// Whether a transition from `self` to `next` is allowed.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Active, Self::Paused | Self::Ended | Self::Error)
                | (Self::Paused, Self::Active | Self::Ended | Self::Error)
        )
    }

    /// Terminal states never change again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended | Self::Error)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "ended" | "completed" => Ok(Self::Ended),
            "error" | "failed" => Ok(Self::Error),
            _ => Err(Error::InvalidArgument(format!("unknown session status: {s}"))),
        }
    }
}

/// Whether an outcome record is an accomplishment or a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    Accomplishment,
    Failure,
}

impl OutcomeKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Accomplishment => "accomplishment",
            Self::Failure => "failure",
        }
    }
}

/// A short accomplishment/failure record attributed to an interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub interaction_id: String,
    pub text: String,
    pub created_at: i64,
}

/// A session record with its accumulated lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    /// Caller-supplied idempotency key for `start`.
    pub external_id: Option<String>,
    pub owner_id: String,
    pub project: String,
    pub status: SessionStatus,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub end_reason: Option<String>,
    pub summary: Option<String>,
    pub resume_context: Option<String>,
    /// Free-form JSON object. Resumed sessions carry `previous_session_id`.
    pub context: serde_json::Value,
    pub accomplishments: Vec<Outcome>,
    pub failures: Vec<Outcome>,
    pub tools_used: Vec<String>,
    pub files_touched: Vec<String>,
    pub message_count: i64,
    pub updated_at: i64,
}

impl Session {
    /// The session this one was resumed from, if any.
    #[must_use]
    pub fn previous_session_id(&self) -> Option<&str> {
        self.context.get("previous_session_id").and_then(serde_json::Value::as_str)
    }
}

/// Parameters for starting a session.
#[derive(Debug, Clone, Default)]
pub struct StartRequest {
    pub owner_id: String,
    pub project: String,
    pub initial_context: Option<serde_json::Value>,
    /// Retrying a start with the same key returns the live session.
    pub external_id: Option<String>,
}

impl StartRequest {
    pub fn new(owner_id: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            project: project.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.initial_context = Some(context);
        self
    }

    #[must_use]
    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }
}

/// Returned by `end`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub summary: String,
    pub resume_context: String,
    /// False when the completion timeout elapsed with queue work outstanding.
    pub ingestion_complete: bool,
    pub outstanding_items: usize,
    pub message_count: i64,
    pub accomplishments: Vec<Outcome>,
    pub failures: Vec<Outcome>,
    pub tools_used: Vec<String>,
    pub files_touched: Vec<String>,
    pub ended_at: i64,
}

/// Payload returned by `resume` to rehydrate a new session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeBundle {
    /// The ended session the context came from (`None` for a fresh start).
    pub previous_session: Option<Session>,
    pub resume_context: Option<String>,
    pub summary: Option<String>,
    /// Most recent interactions of the previous session, oldest first.
    pub recent_interactions: Vec<Interaction>,
    /// The session started (or re-used) for this resume.
    pub session: Session,
}

impl ResumeBundle {
    /// True when no previous session context was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.previous_session.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        assert!(SessionStatus::Active.can_transition_to(SessionStatus::Paused));
        assert!(SessionStatus::Paused.can_transition_to(SessionStatus::Active));
        assert!(SessionStatus::Paused.can_transition_to(SessionStatus::Ended));
        assert!(!SessionStatus::Ended.can_transition_to(SessionStatus::Active));
        assert!(!SessionStatus::Error.can_transition_to(SessionStatus::Ended));
        assert!(!SessionStatus::Active.can_transition_to(SessionStatus::Active));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("ACTIVE".parse::<SessionStatus>().unwrap(), SessionStatus::Active);
        assert_eq!("completed".parse::<SessionStatus>().unwrap(), SessionStatus::Ended);
        assert!("bogus".parse::<SessionStatus>().is_err());
    }
}
