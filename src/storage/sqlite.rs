//! SQLite storage implementation.
//!
//! The relational store backing sessions and interactions. Every write goes
//! through [`SqliteStorage::mutate`], which opens an IMMEDIATE transaction,
//! runs the closure, writes audit events and commits.
//!
//! Queue and document operations live in sibling modules as further
//! `impl SqliteStorage` blocks.

use crate::error::{Error, Result};
use crate::model::{
    Interaction, NewInteraction, Outcome, OutcomeKind, RecordOutcome, Session, SessionStatus,
    SubjectKind,
};
use crate::storage::events::{insert_event, Event, EventType};
use crate::storage::queue::{enqueue_in_tx, EnqueueOptions};
use crate::storage::schema::apply_schema;
use rusqlite::{Connection, OptionalExtension, Row, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Default busy timeout for every connection.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// SQLite-based storage backend.
#[derive(Debug)]
pub struct SqliteStorage {
    pub(crate) conn: Connection,
}

/// Context for a mutation operation.
///
/// Passed to mutation closures so they can queue audit events that are
/// written in the same transaction.
pub struct MutationContext {
    /// Name of the operation being performed.
    pub op_name: String,
    /// Actor performing the operation (agent ID, worker ID, user).
    pub actor: String,
    /// Events to write at the end of the transaction.
    pub events: Vec<Event>,
}

impl MutationContext {
    #[must_use]
    pub fn new(op_name: &str, actor: &str) -> Self {
        Self {
            op_name: op_name.to_string(),
            actor: actor.to_string(),
            events: Vec::new(),
        }
    }

    /// Record an event for this operation.
    pub fn record_event(&mut self, entity_type: &str, entity_id: &str, event_type: EventType) {
        self.events
            .push(Event::new(entity_type, entity_id, event_type, &self.actor));
    }

    /// Record an event with old/new values for field tracking.
    pub fn record_change(
        &mut self,
        entity_type: &str,
        entity_id: &str,
        event_type: EventType,
        old_value: Option<String>,
        new_value: Option<String>,
    ) {
        self.events.push(
            Event::new(entity_type, entity_id, event_type, &self.actor)
                .with_values(old_value, new_value),
        );
    }

    /// Record an event carrying a free-text comment.
    pub fn record_comment(
        &mut self,
        entity_type: &str,
        entity_id: &str,
        event_type: EventType,
        comment: &str,
    ) {
        self.events.push(
            Event::new(entity_type, entity_id, event_type, &self.actor).with_comment(comment),
        );
    }
}

/// Filters for `list_sessions`.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter<'a> {
    pub owner_id: Option<&'a str>,
    pub project: Option<&'a str>,
    pub status: Option<SessionStatus>,
    pub limit: Option<u32>,
}

/// What a retention purge removed from the relational store.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct PurgeReport {
    pub session_ids: Vec<String>,
    pub interaction_ids: Vec<String>,
    pub queue_items: usize,
}

/// Result of `create_session`.
#[derive(Debug, Clone)]
pub struct StartedSession {
    pub session: Session,
    /// False when an existing live session was returned for the external id.
    pub created: bool,
}

const SESSION_COLUMNS: &str = "id, external_id, owner_id, project, status, started_at, ended_at, \
     end_reason, summary, resume_context, context, message_count, updated_at";

const INTERACTION_COLUMNS: &str =
    "id, session_id, kind, content, structured_context, success, created_at";

impl SqliteStorage {
    /// Open a database at the given path with the default busy timeout.
    ///
    /// Creates the database and applies schema if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, None)
    }

    /// Open a database with an optional busy timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open_with_timeout(path: &Path, timeout_ms: Option<u64>) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_millis(
            timeout_ms.unwrap_or(DEFAULT_BUSY_TIMEOUT_MS),
        ))?;
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Get a reference to the underlying connection (for read operations).
    #[must_use]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Execute a mutation with the transaction protocol.
    ///
    /// 1. Begins an IMMEDIATE transaction (takes the write lock up front)
    /// 2. Executes the mutation closure
    /// 3. Writes audit events
    /// 4. Commits (dropping the transaction on error rolls it back)
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails.
    pub fn mutate<F, R>(&mut self, op: &str, actor: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction, &mut MutationContext) -> Result<R>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let mut ctx = MutationContext::new(op, actor);
        let result = f(&tx, &mut ctx)?;

        for event in &ctx.events {
            insert_event(&tx, event)?;
        }

        tx.commit()?;
        Ok(result)
    }

    // ==================
    // Session Operations
    // ==================

    /// Persist a new session, honouring its external id.
    ///
    /// A live (active/paused) session with the same external id is returned
    /// unchanged when it belongs to the same owner and project; any other
    /// live holder of the key is a conflict.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` for a foreign external id, or a database error.
    pub fn create_session(&mut self, session: &Session, actor: &str) -> Result<StartedSession> {
        let (id, created) = self.mutate("create_session", actor, |tx, ctx| {
            if let Some(external_id) = &session.external_id {
                let live: Option<(String, String, String)> = tx
                    .query_row(
                        "SELECT id, owner_id, project FROM sessions
                         WHERE external_id = ?1 AND status IN ('active', 'paused')",
                        [external_id],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                    )
                    .optional()?;

                if let Some((id, owner_id, project)) = live {
                    if owner_id == session.owner_id && project == session.project {
                        return Ok((id, false));
                    }
                    return Err(Error::Conflict(format!(
                        "external id '{external_id}' is held by live session {id} of another owner or project"
                    )));
                }
            }

            tx.execute(
                "INSERT INTO sessions (id, external_id, owner_id, project, status, started_at,
                                       context, message_count, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'active', ?5, ?6, 0, ?5)",
                rusqlite::params![
                    session.id,
                    session.external_id,
                    session.owner_id,
                    session.project,
                    session.started_at,
                    session.context.to_string(),
                ],
            )?;

            ctx.record_event("session", &session.id, EventType::SessionStarted);
            Ok((session.id.clone(), true))
        })?;

        let session = self
            .get_session(&id)?
            .ok_or_else(|| Error::SessionNotFound { id: id.clone() })?;
        Ok(StartedSession { session, created })
    }

    /// Get a session by ID, including its accumulated lists.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1");
        let session = self.conn.query_row(&sql, [id], map_session).optional()?;

        match session {
            Some(mut session) => {
                self.load_session_lists(&mut session)?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    /// Get a session's status without loading its lists.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_session_status(&self, id: &str) -> Result<Option<SessionStatus>> {
        session_status(&self.conn, id)
    }

    /// List sessions, most recently updated first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_sessions(&self, filter: &SessionFilter<'_>) -> Result<Vec<Session>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE (?1 IS NULL OR owner_id = ?1)
               AND (?2 IS NULL OR project = ?2)
               AND (?3 IS NULL OR status = ?3)
             ORDER BY updated_at DESC, id DESC
             LIMIT ?4"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params![
                filter.owner_id,
                filter.project,
                filter.status.map(|s| s.as_str()),
                filter.limit.unwrap_or(50),
            ],
            map_session,
        )?;

        let mut sessions = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        for session in &mut sessions {
            self.load_session_lists(session)?;
        }
        Ok(sessions)
    }

    /// Most recent ended session with a non-empty resume context.
    ///
    /// Ties on `ended_at` are broken by id so the choice is deterministic.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn latest_resumable_session(
        &self,
        owner_id: &str,
        project: Option<&str>,
    ) -> Result<Option<Session>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE owner_id = ?1
               AND (?2 IS NULL OR project = ?2)
               AND status = 'ended'
               AND resume_context IS NOT NULL AND resume_context != ''
             ORDER BY ended_at DESC, id DESC
             LIMIT 1"
        );
        let session = self
            .conn
            .query_row(&sql, rusqlite::params![owner_id, project], map_session)
            .optional()?;

        match session {
            Some(mut session) => {
                self.load_session_lists(&mut session)?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    /// Move a session to `to` if the state machine allows it.
    ///
    /// Used for pause, reactivate and fail. `reason` is stored as the end
    /// reason when the target is terminal.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` or `InvalidState`.
    pub fn transition_session(
        &mut self,
        id: &str,
        to: SessionStatus,
        reason: Option<&str>,
        actor: &str,
    ) -> Result<SessionStatus> {
        let now = chrono::Utc::now().timestamp_millis();
        let ended_at = to.is_terminal().then_some(now);

        self.mutate("transition_session", actor, |tx, ctx| {
            let from = check_transition(tx, id, to)?;

            tx.execute(
                "UPDATE sessions
                 SET status = ?1, updated_at = ?2,
                     ended_at = COALESCE(?3, ended_at),
                     end_reason = COALESCE(?4, end_reason)
                 WHERE id = ?5 AND status = ?6",
                rusqlite::params![to.as_str(), now, ended_at, reason, id, from.as_str()],
            )?;

            let event_type = match to {
                SessionStatus::Paused => EventType::SessionPaused,
                SessionStatus::Active => EventType::SessionReactivated,
                SessionStatus::Ended => EventType::SessionEnded,
                SessionStatus::Error => EventType::SessionFailed,
            };
            ctx.record_change(
                "session",
                id,
                event_type,
                Some(from.as_str().to_string()),
                Some(to.as_str().to_string()),
            );
            Ok(from)
        })
    }

    /// End a session, persisting its summary and resume context.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound`, or `InvalidState` if already terminal.
    pub fn end_session(
        &mut self,
        id: &str,
        reason: &str,
        summary: &str,
        resume_context: &str,
        actor: &str,
    ) -> Result<Session> {
        let now = chrono::Utc::now().timestamp_millis();

        self.mutate("end_session", actor, |tx, ctx| {
            let from = check_transition(tx, id, SessionStatus::Ended)?;

            tx.execute(
                "UPDATE sessions
                 SET status = 'ended', ended_at = ?1, end_reason = ?2, summary = ?3,
                     resume_context = ?4, updated_at = ?1
                 WHERE id = ?5 AND status = ?6",
                rusqlite::params![now, reason, summary, resume_context, id, from.as_str()],
            )?;

            ctx.record_comment("session", id, EventType::SessionEnded, reason);
            Ok(())
        })?;

        self.get_session(id)?
            .ok_or_else(|| Error::SessionNotFound { id: id.to_string() })
    }

    /// Counts of sessions grouped by status.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn session_counts(&self) -> Result<Vec<(SessionStatus, usize)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM sessions GROUP BY status ORDER BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((parse_column::<SessionStatus>(row, 0)?, row.get::<_, i64>(1)?))
        })?;
        rows.map(|r| {
            r.map(|(status, count)| (status, usize::try_from(count).unwrap_or(0)))
                .map_err(Error::from)
        })
        .collect()
    }

    // ======================
    // Interaction Operations
    // ======================

    /// Record an interaction against an active session.
    ///
    /// In one transaction: append the interaction (keyed by its pre-assigned
    /// id), bump `message_count`, add tool/file/outcome rows and enqueue
    /// the interaction for ingestion. Re-recording an id that already exists
    /// is a no-op reported with `inserted = false`.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound`, `InvalidState` when the session is not
    /// active, `Conflict` if the id belongs to another session, or a
    /// database error.
    pub fn record_interaction(
        &mut self,
        session_id: &str,
        interaction: &NewInteraction,
        outcome: Option<(OutcomeKind, &str)>,
        queue: EnqueueOptions,
        actor: &str,
    ) -> Result<RecordOutcome> {
        let now = chrono::Utc::now().timestamp_millis();

        self.mutate("record_interaction", actor, |tx, ctx| {
            let owner: Option<String> = tx
                .query_row(
                    "SELECT session_id FROM interactions WHERE id = ?1",
                    [&interaction.id],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(owner) = owner {
                if owner != session_id {
                    return Err(Error::Conflict(format!(
                        "interaction {} already belongs to session {owner}",
                        interaction.id
                    )));
                }
                return already_recorded(tx, session_id, &interaction.id);
            }

            match session_status(tx, session_id)? {
                None => {
                    return Err(Error::SessionNotFound {
                        id: session_id.to_string(),
                    });
                }
                Some(SessionStatus::Active) => {}
                Some(other) => {
                    return Err(Error::invalid_session_state(
                        session_id,
                        "active",
                        other.as_str(),
                    ));
                }
            }

            tx.execute(
                "INSERT INTO interactions (id, session_id, kind, content, structured_context, success, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO NOTHING",
                rusqlite::params![
                    interaction.id,
                    session_id,
                    interaction.kind.as_str(),
                    interaction.content,
                    interaction.structured_context.to_string(),
                    interaction.success,
                    now,
                ],
            )?;

            let updated = tx.execute(
                "UPDATE sessions SET message_count = message_count + 1, updated_at = ?2
                 WHERE id = ?1 AND status = 'active'",
                rusqlite::params![session_id, now],
            )?;
            if updated == 0 {
                return Err(Error::invalid_session_state(session_id, "active", "unknown"));
            }

            if let Some(tool) = interaction.tool_name() {
                tx.execute(
                    "INSERT OR IGNORE INTO session_tools (session_id, tool, first_used_at)
                     VALUES (?1, ?2, ?3)",
                    rusqlite::params![session_id, tool, now],
                )?;
            }
            for path in interaction.files() {
                tx.execute(
                    "INSERT OR IGNORE INTO session_files (session_id, path, first_seen_at)
                     VALUES (?1, ?2, ?3)",
                    rusqlite::params![session_id, path, now],
                )?;
            }
            if let Some((kind, text)) = outcome {
                tx.execute(
                    "INSERT OR IGNORE INTO session_outcomes (session_id, interaction_id, kind, text, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![session_id, interaction.id, kind.as_str(), text, now],
                )?;
            }

            let item = enqueue_in_tx(
                tx,
                &interaction.id,
                SubjectKind::Interaction,
                Some(session_id),
                queue,
                now,
            )?;

            ctx.record_comment(
                "interaction",
                &interaction.id,
                EventType::InteractionRecorded,
                interaction.kind.as_str(),
            );

            let message_count: i64 = tx.query_row(
                "SELECT message_count FROM sessions WHERE id = ?1",
                [session_id],
                |row| row.get(0),
            )?;

            Ok(RecordOutcome {
                interaction_id: interaction.id.clone(),
                queue_item_id: item.id,
                inserted: true,
                message_count,
            })
        })
    }

    /// The `limit` most recent interactions of a session, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn recent_interactions(&self, session_id: &str, limit: usize) -> Result<Vec<Interaction>> {
        let sql = format!(
            "SELECT {INTERACTION_COLUMNS} FROM (
                 SELECT {INTERACTION_COLUMNS}, rowid AS seq FROM interactions
                 WHERE session_id = ?1
                 ORDER BY created_at DESC, seq DESC
                 LIMIT ?2
             ) ORDER BY created_at ASC, seq ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params![session_id, i64::try_from(limit).unwrap_or(i64::MAX)],
            map_interaction,
        )?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // ===================
    // Retention
    // ===================

    /// Delete ended/failed sessions whose `ended_at` is before `cutoff`.
    ///
    /// Interactions, outcome rows and queue items go with them. Derived
    /// vector/graph rows are the caller's job, keyed by the returned ids.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn purge_sessions_ended_before(&mut self, cutoff: i64, actor: &str) -> Result<PurgeReport> {
        self.mutate("purge_sessions", actor, |tx, ctx| {
            let session_ids: Vec<String> = tx
                .prepare(
                    "SELECT id FROM sessions
                     WHERE status IN ('ended', 'error') AND ended_at IS NOT NULL AND ended_at < ?1
                     ORDER BY ended_at",
                )?
                .query_map([cutoff], |row| row.get(0))?
                .collect::<std::result::Result<_, _>>()?;

            let mut report = PurgeReport::default();
            for session_id in &session_ids {
                let interaction_ids: Vec<String> = tx
                    .prepare("SELECT id FROM interactions WHERE session_id = ?1")?
                    .query_map([session_id], |row| row.get(0))?
                    .collect::<std::result::Result<_, _>>()?;

                report.queue_items += tx.execute(
                    "DELETE FROM processing_queue WHERE session_id = ?1",
                    [session_id],
                )?;
                tx.execute("DELETE FROM sessions WHERE id = ?1", [session_id])?;

                ctx.record_event("session", session_id, EventType::SessionPurged);
                report.interaction_ids.extend(interaction_ids);
            }
            report.session_ids = session_ids;
            Ok(report)
        })
    }

    // ===================
    // Embeddings Metadata
    // ===================

    /// Get embedding metadata (provider, model, dimensions).
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_embedding_meta(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM embeddings_meta WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Set embedding metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    pub fn set_embedding_meta(&mut self, key: &str, value: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        self.conn.execute(
            "INSERT INTO embeddings_meta (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
               value = excluded.value,
               updated_at = excluded.updated_at",
            rusqlite::params![key, value, now],
        )?;
        Ok(())
    }

    fn load_session_lists(&self, session: &mut Session) -> Result<()> {
        let mut stmt = self.conn.prepare(
            "SELECT kind, interaction_id, text, created_at FROM session_outcomes
             WHERE session_id = ?1 ORDER BY id ASC",
        )?;
        let outcomes = stmt.query_map([&session.id], |row| {
            let kind: String = row.get(0)?;
            Ok((
                kind,
                Outcome {
                    interaction_id: row.get(1)?,
                    text: row.get(2)?,
                    created_at: row.get(3)?,
                },
            ))
        })?;
        for outcome in outcomes {
            let (kind, outcome) = outcome?;
            if kind == OutcomeKind::Failure.as_str() {
                session.failures.push(outcome);
            } else {
                session.accomplishments.push(outcome);
            }
        }

        session.tools_used = self
            .conn
            .prepare(
                "SELECT tool FROM session_tools WHERE session_id = ?1
                 ORDER BY first_used_at ASC, rowid ASC",
            )?
            .query_map([&session.id], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;

        session.files_touched = self
            .conn
            .prepare(
                "SELECT path FROM session_files WHERE session_id = ?1
                 ORDER BY first_seen_at ASC, rowid ASC",
            )?
            .query_map([&session.id], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;

        Ok(())
    }
}

fn session_status(conn: &Connection, id: &str) -> Result<Option<SessionStatus>> {
    let status: Option<String> = conn
        .query_row("SELECT status FROM sessions WHERE id = ?1", [id], |row| {
            row.get(0)
        })
        .optional()?;
    status.map(|s| SessionStatus::from_str(&s)).transpose()
}

fn check_transition(conn: &Connection, id: &str, to: SessionStatus) -> Result<SessionStatus> {
    let from = session_status(conn, id)?.ok_or_else(|| Error::SessionNotFound {
        id: id.to_string(),
    })?;
    if !from.can_transition_to(to) {
        let expected = match to {
            SessionStatus::Active => "paused",
            SessionStatus::Paused => "active",
            SessionStatus::Ended | SessionStatus::Error => "active or paused",
        };
        return Err(Error::invalid_session_state(id, expected, from.as_str()));
    }
    Ok(from)
}

fn already_recorded(tx: &Transaction, session_id: &str, interaction_id: &str) -> Result<RecordOutcome> {
    let queue_item_id: Option<String> = tx
        .query_row(
            "SELECT id FROM processing_queue WHERE subject_kind = 'interaction' AND subject_id = ?1",
            [interaction_id],
            |row| row.get(0),
        )
        .optional()?;
    let message_count: i64 = tx.query_row(
        "SELECT message_count FROM sessions WHERE id = ?1",
        [session_id],
        |row| row.get(0),
    )?;
    Ok(RecordOutcome {
        interaction_id: interaction_id.to_string(),
        queue_item_id: queue_item_id.unwrap_or_default(),
        inserted: false,
        message_count,
    })
}

/// Parse a TEXT column through the model's `FromStr`.
pub(crate) fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = Error>,
{
    let raw: String = row.get(idx)?;
    T::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Parse a TEXT column holding JSON.
pub(crate) fn json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<serde_json::Value> {
    let raw: Option<String> = row.get(idx)?;
    match raw.as_deref() {
        None | Some("") => Ok(serde_json::Value::Null),
        Some(text) => serde_json::from_str(text).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        }),
    }
}

fn map_session(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        external_id: row.get(1)?,
        owner_id: row.get(2)?,
        project: row.get(3)?,
        status: parse_column(row, 4)?,
        started_at: row.get(5)?,
        ended_at: row.get(6)?,
        end_reason: row.get(7)?,
        summary: row.get(8)?,
        resume_context: row.get(9)?,
        context: json_column(row, 10)?,
        accomplishments: Vec::new(),
        failures: Vec::new(),
        tools_used: Vec::new(),
        files_touched: Vec::new(),
        message_count: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

fn map_interaction(row: &Row<'_>) -> rusqlite::Result<Interaction> {
    Ok(Interaction {
        id: row.get(0)?,
        session_id: row.get(1)?,
        kind: parse_column(row, 2)?,
        content: row.get(3)?,
        structured_context: json_column(row, 4)?,
        success: row.get(5)?,
        created_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{new_id, InteractionKind, QueueStatus};

    fn new_session(owner: &str, project: &str, external_id: Option<&str>) -> Session {
        let now = chrono::Utc::now().timestamp_millis();
        Session {
            id: new_id("sess"),
            external_id: external_id.map(str::to_string),
            owner_id: owner.to_string(),
            project: project.to_string(),
            status: SessionStatus::Active,
            started_at: now,
            ended_at: None,
            end_reason: None,
            summary: None,
            resume_context: None,
            context: serde_json::json!({}),
            accomplishments: Vec::new(),
            failures: Vec::new(),
            tools_used: Vec::new(),
            files_touched: Vec::new(),
            message_count: 0,
            updated_at: now,
        }
    }

    #[test]
    fn test_open_memory() {
        assert!(SqliteStorage::open_memory().is_ok());
    }

    #[test]
    fn test_session_lifecycle() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let started = storage
            .create_session(&new_session("alice", "kh", None), "test")
            .unwrap();
        assert!(started.created);
        let id = started.session.id;

        storage
            .transition_session(&id, SessionStatus::Paused, None, "test")
            .unwrap();
        assert_eq!(
            storage.get_session_status(&id).unwrap(),
            Some(SessionStatus::Paused)
        );

        let ended = storage
            .end_session(&id, "done", "summary", "resume here", "test")
            .unwrap();
        assert_eq!(ended.status, SessionStatus::Ended);
        assert!(ended.ended_at.is_some());

        let err = storage
            .transition_session(&id, SessionStatus::Active, None, "test")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }

    #[test]
    fn test_external_id_is_idempotent_and_conflicts_across_owners() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let first = storage
            .create_session(&new_session("alice", "kh", Some("ext-1")), "test")
            .unwrap();
        let again = storage
            .create_session(&new_session("alice", "kh", Some("ext-1")), "test")
            .unwrap();
        assert!(!again.created);
        assert_eq!(first.session.id, again.session.id);

        let err = storage
            .create_session(&new_session("bob", "kh", Some("ext-1")), "test")
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_record_interaction_accumulates_once() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let session = storage
            .create_session(&new_session("alice", "kh", None), "test")
            .unwrap()
            .session;

        let interaction = NewInteraction::new(InteractionKind::ToolExecution, "edited lib.rs")
            .with_context(serde_json::json!({"tool": "edit", "files": ["src/lib.rs"]}));

        let first = storage
            .record_interaction(
                &session.id,
                &interaction,
                Some((OutcomeKind::Accomplishment, "edit: edited lib.rs")),
                EnqueueOptions::default(),
                "test",
            )
            .unwrap();
        assert!(first.inserted);
        assert_eq!(first.message_count, 1);

        // Retrying the same prepared record is a no-op
        let retry = storage
            .record_interaction(
                &session.id,
                &interaction,
                Some((OutcomeKind::Accomplishment, "edit: edited lib.rs")),
                EnqueueOptions::default(),
                "test",
            )
            .unwrap();
        assert!(!retry.inserted);
        assert_eq!(retry.message_count, 1);
        assert_eq!(retry.queue_item_id, first.queue_item_id);

        let session = storage.get_session(&session.id).unwrap().unwrap();
        assert_eq!(session.tools_used, vec!["edit"]);
        assert_eq!(session.files_touched, vec!["src/lib.rs"]);
        assert_eq!(session.accomplishments.len(), 1);

        let item = storage
            .get_queue_item_by_subject(&interaction.id)
            .unwrap()
            .unwrap();
        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.session_id.as_deref(), Some(session.id.as_str()));
    }

    #[test]
    fn test_record_interaction_requires_active() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let session = storage
            .create_session(&new_session("alice", "kh", None), "test")
            .unwrap()
            .session;
        storage
            .transition_session(&session.id, SessionStatus::Paused, None, "test")
            .unwrap();

        let err = storage
            .record_interaction(
                &session.id,
                &NewInteraction::new(InteractionKind::UserMessage, "hi"),
                None,
                EnqueueOptions::default(),
                "test",
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));

        let err = storage
            .record_interaction(
                "sess_missing",
                &NewInteraction::new(InteractionKind::UserMessage, "hi"),
                None,
                EnqueueOptions::default(),
                "test",
            )
            .unwrap_err();
        assert!(matches!(err, Error::SessionNotFound { .. }));
    }

    #[test]
    fn test_recent_interactions_are_chronological() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let session = storage
            .create_session(&new_session("alice", "kh", None), "test")
            .unwrap()
            .session;
        for i in 0..5 {
            storage
                .record_interaction(
                    &session.id,
                    &NewInteraction::new(InteractionKind::UserMessage, format!("message {i}")),
                    None,
                    EnqueueOptions::default(),
                    "test",
                )
                .unwrap();
        }

        let recent = storage.recent_interactions(&session.id, 3).unwrap();
        let contents: Vec<_> = recent.iter().map(|i| i.content.as_str()).collect();
        assert_eq!(contents, vec!["message 2", "message 3", "message 4"]);
    }

    #[test]
    fn test_latest_resumable_session() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        assert!(storage.latest_resumable_session("alice", None).unwrap().is_none());

        let session = storage
            .create_session(&new_session("alice", "kh", None), "test")
            .unwrap()
            .session;
        storage
            .end_session(&session.id, "done", "s", "ctx", "test")
            .unwrap();

        let found = storage
            .latest_resumable_session("alice", Some("kh"))
            .unwrap()
            .unwrap();
        assert_eq!(found.id, session.id);
        assert!(storage
            .latest_resumable_session("alice", Some("other"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_purge_removes_ended_sessions_only() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let old = storage
            .create_session(&new_session("alice", "kh", None), "test")
            .unwrap()
            .session;
        storage
            .record_interaction(
                &old.id,
                &NewInteraction::new(InteractionKind::UserMessage, "hello"),
                None,
                EnqueueOptions::default(),
                "test",
            )
            .unwrap();
        storage.end_session(&old.id, "done", "s", "c", "test").unwrap();
        let live = storage
            .create_session(&new_session("alice", "kh", None), "test")
            .unwrap()
            .session;

        let report = storage
            .purge_sessions_ended_before(i64::MAX, "test")
            .unwrap();
        assert_eq!(report.session_ids, vec![old.id.clone()]);
        assert_eq!(report.interaction_ids.len(), 1);
        assert_eq!(report.queue_items, 1);
        assert!(storage.get_session(&old.id).unwrap().is_none());
        assert!(storage.get_session(&live.id).unwrap().is_some());
    }
}
