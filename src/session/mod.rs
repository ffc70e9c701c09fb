//! Session lifecycle.
//!
//! `none → active → {paused, ended, error}`, `paused → {active, ended}`.
//! Every transition is a conditional update in the relational store, so two
//! callers racing on one session cannot both win.
//!
//! Ending waits (bounded) for the session's queued interactions to be
//! ingested before writing the summary. Resuming is deterministic: the new
//! session's external id is derived from the session it resumes, so asking
//! twice yields the same session.

pub mod summary;

use std::time::{Duration, Instant};

use serde_json::{json, Value};

use crate::config::SessionSettings;
use crate::error::{Error, Result};
use crate::model::{
    new_id, now_millis, Interaction, NewInteraction, RecordOutcome, ResumeBundle, Session,
    SessionStatus, SessionSummary, StartRequest,
};
use crate::storage::{EnqueueOptions, SessionFilter, SqliteStorage, StartedSession};

pub use summary::{build_resume_context, build_summary, derive_outcome};

/// Session operations over one relational connection.
pub struct SessionManager<'a> {
    storage: &'a mut SqliteStorage,
    settings: SessionSettings,
    queue: EnqueueOptions,
    actor: String,
}

impl<'a> SessionManager<'a> {
    pub fn new(storage: &'a mut SqliteStorage, settings: SessionSettings, actor: impl Into<String>) -> Self {
        Self {
            storage,
            settings,
            queue: EnqueueOptions::default(),
            actor: actor.into(),
        }
    }

    /// Queue options for recorded interactions.
    #[must_use]
    pub fn with_queue_options(mut self, queue: EnqueueOptions) -> Self {
        self.queue = queue;
        self
    }

    /// Start a session, or return the live one holding the same external id.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty owner/project or a non-object
    /// context, and `Conflict` if the external id is held by a live session
    /// of another owner or project.
    pub fn start(&mut self, request: StartRequest) -> Result<StartedSession> {
        if request.owner_id.trim().is_empty() {
            return Err(Error::InvalidArgument("owner id is required".to_string()));
        }
        if request.project.trim().is_empty() {
            return Err(Error::InvalidArgument("project is required".to_string()));
        }
        let context = match request.initial_context {
            None | Some(Value::Null) => json!({}),
            Some(Value::Object(map)) => Value::Object(map),
            Some(_) => {
                return Err(Error::InvalidArgument(
                    "session context must be a JSON object".to_string(),
                ));
            }
        };

        let now = now_millis();
        let session = Session {
            id: new_id("sess"),
            external_id: request.external_id,
            owner_id: request.owner_id,
            project: request.project,
            status: SessionStatus::Active,
            started_at: now,
            ended_at: None,
            end_reason: None,
            summary: None,
            resume_context: None,
            context,
            accomplishments: Vec::new(),
            failures: Vec::new(),
            tools_used: Vec::new(),
            files_touched: Vec::new(),
            message_count: 0,
            updated_at: now,
        };

        let started = self.storage.create_session(&session, &self.actor)?;
        if started.created {
            tracing::info!(
                session = %started.session.id,
                owner = %started.session.owner_id,
                project = %started.session.project,
                "Session started"
            );
        } else {
            tracing::debug!(session = %started.session.id, "Start matched live session by external id");
        }
        Ok(started)
    }

    /// Append an interaction to an active session and enqueue it.
    ///
    /// Re-recording the same prepared interaction is a no-op
    /// (`inserted = false`).
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound`, or `InvalidState` unless the session is active.
    pub fn record_interaction(
        &mut self,
        session_id: &str,
        interaction: &NewInteraction,
    ) -> Result<RecordOutcome> {
        if !interaction.structured_context.is_object() {
            return Err(Error::InvalidArgument(
                "structured context must be a JSON object".to_string(),
            ));
        }
        let outcome = derive_outcome(interaction);
        let recorded = self.storage.record_interaction(
            session_id,
            interaction,
            outcome.as_ref().map(|(kind, text)| (*kind, text.as_str())),
            self.queue,
            &self.actor,
        )?;
        tracing::debug!(
            session = session_id,
            interaction = %recorded.interaction_id,
            kind = interaction.kind.as_str(),
            inserted = recorded.inserted,
            "Interaction recorded"
        );
        Ok(recorded)
    }

    /// End a session after waiting (at most `timeout`) for its ingestion.
    ///
    /// The session ends even when the wait times out; the summary then
    /// notes how many items were still queued. Queue items are never
    /// cancelled.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound`, or `InvalidState` if already ended/failed.
    pub async fn end(
        &mut self,
        session_id: &str,
        reason: &str,
        timeout: Option<Duration>,
    ) -> Result<SessionSummary> {
        let session = self.require(session_id)?;
        if session.status.is_terminal() {
            return Err(Error::invalid_session_state(
                session_id,
                "active or paused",
                session.status.as_str(),
            ));
        }

        let timeout = timeout.unwrap_or_else(|| self.settings.end_timeout());
        let outstanding = self.wait_for_ingestion(session_id, timeout).await?;

        // Reload: counters may have moved while we waited.
        let session = self.require(session_id)?;
        let max_items = self.settings.summary_max_items.max(1);
        let recent = self
            .storage
            .recent_interactions(session_id, self.settings.resume_interaction_limit)?;
        let reason = if reason.trim().is_empty() { "completed" } else { reason.trim() };
        let summary = build_summary(&session, outstanding, max_items);
        let resume_context = build_resume_context(&session, reason, &recent, max_items);

        let ended = self
            .storage
            .end_session(session_id, reason, &summary, &resume_context, &self.actor)?;

        tracing::info!(
            session = session_id,
            messages = ended.message_count,
            outstanding,
            "Session ended"
        );
        Ok(SessionSummary {
            session_id: ended.id,
            summary,
            resume_context,
            ingestion_complete: outstanding == 0,
            outstanding_items: outstanding,
            message_count: ended.message_count,
            accomplishments: ended.accomplishments,
            failures: ended.failures,
            tools_used: ended.tools_used,
            files_touched: ended.files_touched,
            ended_at: ended.ended_at.unwrap_or_else(now_millis),
        })
    }

    /// Poll until the session has no pending/processing items or `timeout`
    /// elapses. Returns the count still outstanding.
    async fn wait_for_ingestion(&mut self, session_id: &str, timeout: Duration) -> Result<usize> {
        let started = Instant::now();
        let poll = self.settings.end_poll_interval().max(Duration::from_millis(1));
        loop {
            let outstanding = self.storage.count_outstanding_for_session(session_id)?;
            if outstanding == 0 {
                return Ok(0);
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                tracing::warn!(
                    session = session_id,
                    outstanding,
                    waited_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    "Ending session with ingestion outstanding"
                );
                return Ok(outstanding);
            }
            tokio::time::sleep(poll.min(timeout - elapsed)).await;
        }
    }

    /// Rehydrate from the most recent ended session of `owner_id`.
    ///
    /// Calling again before the new session ends returns the same bundle
    /// and the same new session.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty owner, or a store error.
    pub fn resume(&mut self, owner_id: &str, project: Option<&str>) -> Result<ResumeBundle> {
        if owner_id.trim().is_empty() {
            return Err(Error::InvalidArgument("owner id is required".to_string()));
        }

        let Some(previous) = self.storage.latest_resumable_session(owner_id, project)? else {
            let project = project.unwrap_or("default");
            let started = self.start(
                StartRequest::new(owner_id, project)
                    .with_external_id(format!("resume:{owner_id}:{project}:fresh")),
            )?;
            tracing::info!(session = %started.session.id, "No session to resume; started fresh");
            return Ok(ResumeBundle {
                previous_session: None,
                resume_context: None,
                summary: None,
                recent_interactions: Vec::new(),
                session: started.session,
            });
        };

        let recent = self
            .storage
            .recent_interactions(&previous.id, self.settings.resume_interaction_limit)?;
        let started = self.start(
            StartRequest::new(owner_id, previous.project.clone())
                .with_context(json!({ "previous_session_id": previous.id }))
                .with_external_id(format!("resume:{}", previous.id)),
        )?;

        tracing::info!(
            session = %started.session.id,
            previous = %previous.id,
            created = started.created,
            "Session resumed"
        );
        Ok(ResumeBundle {
            resume_context: previous.resume_context.clone(),
            summary: previous.summary.clone(),
            recent_interactions: recent,
            previous_session: Some(previous),
            session: started.session,
        })
    }

    /// Pause an active session.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` or `InvalidState`.
    pub fn pause(&mut self, session_id: &str) -> Result<Session> {
        self.transition(session_id, SessionStatus::Paused, None)
    }

    /// Reactivate a paused session.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` or `InvalidState`.
    pub fn reactivate(&mut self, session_id: &str) -> Result<Session> {
        self.transition(session_id, SessionStatus::Active, None)
    }

    /// Move a live session to the terminal `error` state.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` or `InvalidState`.
    pub fn fail(&mut self, session_id: &str, reason: &str) -> Result<Session> {
        self.transition(session_id, SessionStatus::Error, Some(reason))
    }

    fn transition(&mut self, session_id: &str, to: SessionStatus, reason: Option<&str>) -> Result<Session> {
        let from = self
            .storage
            .transition_session(session_id, to, reason, &self.actor)?;
        tracing::info!(session = session_id, from = from.as_str(), to = to.as_str(), "Session transition");
        self.require(session_id)
    }

    /// # Errors
    ///
    /// Returns `SessionNotFound` if the id is unknown.
    pub fn get(&self, session_id: &str) -> Result<Session> {
        self.require(session_id)
    }

    /// Sessions matching `filter`, most recent first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list(&self, filter: &SessionFilter<'_>) -> Result<Vec<Session>> {
        self.storage.list_sessions(filter)
    }

    /// The `limit` latest interactions of a session, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` if the id is unknown.
    pub fn recent_interactions(&self, session_id: &str, limit: usize) -> Result<Vec<Interaction>> {
        self.require(session_id)?;
        self.storage.recent_interactions(session_id, limit)
    }

    fn require(&self, session_id: &str) -> Result<Session> {
        self.storage
            .get_session(session_id)?
            .ok_or_else(|| Error::SessionNotFound {
                id: session_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InteractionKind, QueueStatus};

    fn settings() -> SessionSettings {
        SessionSettings {
            end_timeout_ms: 200,
            end_poll_interval_ms: 10,
            ..SessionSettings::default()
        }
    }

    fn start(manager: &mut SessionManager<'_>) -> Session {
        manager.start(StartRequest::new("ana", "hub")).unwrap().session
    }

    #[test]
    fn test_start_with_external_id_is_idempotent() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let mut manager = SessionManager::new(&mut storage, settings(), "test");

        let first = manager
            .start(StartRequest::new("ana", "hub").with_external_id("run-1"))
            .unwrap();
        let again = manager
            .start(StartRequest::new("ana", "hub").with_external_id("run-1"))
            .unwrap();
        assert!(first.created);
        assert!(!again.created);
        assert_eq!(first.session.id, again.session.id);

        let err = manager
            .start(StartRequest::new("bob", "hub").with_external_id("run-1"))
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_start_rejects_non_object_context() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let mut manager = SessionManager::new(&mut storage, settings(), "test");
        let err = manager
            .start(StartRequest::new("ana", "hub").with_context(json!([1, 2])))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_record_accumulates_and_requires_active() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let mut manager = SessionManager::new(&mut storage, settings(), "test");
        let session = start(&mut manager);

        let tool = NewInteraction::new(InteractionKind::ToolExecution, "build ok")
            .with_context(json!({"tool": "cargo", "files": ["src/main.rs"]}));
        let first = manager.record_interaction(&session.id, &tool).unwrap();
        let retried = manager.record_interaction(&session.id, &tool).unwrap();
        assert!(first.inserted);
        assert!(!retried.inserted);
        assert_eq!(retried.message_count, 1);

        let loaded = manager.get(&session.id).unwrap();
        assert_eq!(loaded.tools_used, vec!["cargo".to_string()]);
        assert_eq!(loaded.files_touched, vec!["src/main.rs".to_string()]);
        assert_eq!(loaded.accomplishments.len(), 1);

        manager.pause(&session.id).unwrap();
        let err = manager
            .record_interaction(&session.id, &NewInteraction::new(InteractionKind::UserMessage, "hi"))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));

        let err = manager
            .record_interaction("sess_missing", &NewInteraction::new(InteractionKind::UserMessage, "hi"))
            .unwrap_err();
        assert!(matches!(err, Error::SessionNotFound { .. }));
    }

    #[test]
    fn test_pause_reactivate_fail() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let mut manager = SessionManager::new(&mut storage, settings(), "test");
        let session = start(&mut manager);

        assert_eq!(manager.pause(&session.id).unwrap().status, SessionStatus::Paused);
        assert_eq!(manager.reactivate(&session.id).unwrap().status, SessionStatus::Active);

        let failed = manager.fail(&session.id, "agent crashed").unwrap();
        assert_eq!(failed.status, SessionStatus::Error);
        assert_eq!(failed.end_reason.as_deref(), Some("agent crashed"));
        assert!(failed.ended_at.is_some());

        let err = manager.reactivate(&session.id).unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));

        let errored = manager
            .list(&SessionFilter {
                status: Some(SessionStatus::Error),
                ..SessionFilter::default()
            })
            .unwrap();
        assert_eq!(errored.len(), 1);
        assert!(matches!(manager.pause("sess_missing"), Err(Error::SessionNotFound { .. })));
    }

    #[tokio::test]
    async fn test_end_times_out_but_still_ends() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let mut manager = SessionManager::new(&mut storage, settings(), "test");
        let session = start(&mut manager);
        manager
            .record_interaction(&session.id, &NewInteraction::new(InteractionKind::UserMessage, "index the docs"))
            .unwrap();

        let started = Instant::now();
        let summary = manager
            .end(&session.id, "done", Some(Duration::from_millis(50)))
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!summary.ingestion_complete);
        assert_eq!(summary.outstanding_items, 1);
        assert!(summary.summary.contains("Ingestion incomplete"));

        let ended = manager.get(&session.id).unwrap();
        assert_eq!(ended.status, SessionStatus::Ended);

        // Ending does not cancel queued work.
        let item = storage_item_status(&manager, &session.id);
        assert_eq!(item, QueueStatus::Pending);

        let err = manager.end(&session.id, "again", None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }

    fn storage_item_status(manager: &SessionManager<'_>, session_id: &str) -> QueueStatus {
        let interactions = manager.recent_interactions(session_id, 1).unwrap();
        manager
            .storage
            .get_queue_item_by_subject(&interactions[0].id)
            .unwrap()
            .unwrap()
            .status
    }

    #[tokio::test]
    async fn test_resume_is_deterministic() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let mut manager = SessionManager::new(&mut storage, settings(), "test");

        let fresh = manager.resume("ana", Some("hub")).unwrap();
        assert!(fresh.is_empty());
        let fresh_again = manager.resume("ana", Some("hub")).unwrap();
        assert_eq!(fresh.session.id, fresh_again.session.id);

        manager
            .record_interaction(&fresh.session.id, &NewInteraction::new(InteractionKind::UserMessage, "add search"))
            .unwrap();
        manager
            .end(&fresh.session.id, "done", Some(Duration::ZERO))
            .await
            .unwrap();

        let first = manager.resume("ana", None).unwrap();
        let second = manager.resume("ana", None).unwrap();
        assert_eq!(first.session.id, second.session.id);
        assert_eq!(
            first.previous_session.as_ref().map(|s| s.id.as_str()),
            Some(fresh.session.id.as_str())
        );
        assert_eq!(first.session.previous_session_id(), Some(fresh.session.id.as_str()));
        assert_eq!(first.recent_interactions.len(), 1);
        assert!(first.resume_context.as_deref().is_some_and(|c| c.contains("add search")));
    }
}
