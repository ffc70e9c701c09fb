//! Processing queue storage.
//!
//! Every state change is a single conditional `UPDATE`, so correctness
//! under concurrent workers relies only on SQLite's write serialization.

use crate::error::{Error, Result};
use crate::model::{new_id, QueueItem, QueueStats, QueueStatus, SubjectKind};
use crate::storage::events::EventType;
use crate::storage::sqlite::{parse_column, SqliteStorage};
use rusqlite::{Connection, OptionalExtension, Row};

/// Defaults applied to newly created queue rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueOptions {
    pub priority: i64,
    pub max_attempts: u32,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            max_attempts: 5,
        }
    }
}

/// Outcome of a sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SweepReport {
    /// Retryable failures whose backoff elapsed, now pending.
    pub requeued: usize,
    /// Stale processing items returned to pending.
    pub reclaimed: usize,
    /// Stale processing items with no attempts left, now failed.
    pub exhausted: usize,
}

impl SweepReport {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.requeued + self.reclaimed + self.exhausted
    }
}

const QUEUE_COLUMNS: &str = "id, subject_id, subject_kind, session_id, status, attempts, \
     max_attempts, last_error, retryable, priority, claimed_by, claimed_at, next_attempt_at, \
     created_at, updated_at";

/// Create or revive the queue row for a subject inside an open transaction.
///
/// A pending or processing row is returned untouched. A completed or
/// failed row is reset to pending with a fresh attempt budget.
pub(crate) fn enqueue_in_tx(
    conn: &Connection,
    subject_id: &str,
    kind: SubjectKind,
    session_id: Option<&str>,
    options: EnqueueOptions,
    now: i64,
) -> Result<QueueItem> {
    if let Some(existing) = queue_item_by_subject(conn, subject_id, kind)? {
        if existing.status.is_outstanding() {
            return Ok(existing);
        }
        conn.execute(
            "UPDATE processing_queue
             SET status = 'pending', attempts = 0, last_error = NULL, retryable = 0,
                 claimed_by = NULL, claimed_at = NULL, next_attempt_at = NULL,
                 priority = ?2, updated_at = ?3
             WHERE id = ?1 AND status IN ('completed', 'failed')",
            rusqlite::params![existing.id, options.priority, now],
        )?;
    } else {
        conn.execute(
            "INSERT INTO processing_queue
                 (id, subject_id, subject_kind, session_id, status, attempts, max_attempts,
                  priority, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?6, ?7, ?7)
             ON CONFLICT(subject_kind, subject_id) DO NOTHING",
            rusqlite::params![
                new_id("q"),
                subject_id,
                kind.as_str(),
                session_id,
                options.max_attempts,
                options.priority,
                now,
            ],
        )?;
    }

    queue_item_by_subject(conn, subject_id, kind)?.ok_or_else(|| Error::SubjectNotFound {
        kind: kind.as_str().to_string(),
        id: subject_id.to_string(),
    })
}

fn queue_item_by_subject(
    conn: &Connection,
    subject_id: &str,
    kind: SubjectKind,
) -> Result<Option<QueueItem>> {
    let sql = format!(
        "SELECT {QUEUE_COLUMNS} FROM processing_queue WHERE subject_kind = ?1 AND subject_id = ?2"
    );
    Ok(conn
        .query_row(&sql, rusqlite::params![kind.as_str(), subject_id], map_queue_item)
        .optional()?)
}

pub(crate) fn subject_exists(conn: &Connection, subject_id: &str, kind: SubjectKind) -> Result<bool> {
    let sql = match kind {
        SubjectKind::Document => "SELECT 1 FROM documents WHERE id = ?1",
        SubjectKind::Interaction => "SELECT 1 FROM interactions WHERE id = ?1",
    };
    Ok(conn.prepare(sql)?.exists([subject_id])?)
}

impl SqliteStorage {
    /// Enqueue an existing subject for ingestion.
    ///
    /// # Errors
    ///
    /// Returns `SubjectNotFound` if no such document/interaction exists.
    pub fn enqueue(
        &mut self,
        subject_id: &str,
        kind: SubjectKind,
        options: EnqueueOptions,
        actor: &str,
    ) -> Result<QueueItem> {
        let now = chrono::Utc::now().timestamp_millis();
        self.mutate("enqueue", actor, |tx, ctx| {
            if !subject_exists(tx, subject_id, kind)? {
                return Err(Error::SubjectNotFound {
                    kind: kind.as_str().to_string(),
                    id: subject_id.to_string(),
                });
            }

            let session_id: Option<String> = match kind {
                SubjectKind::Interaction => tx
                    .query_row(
                        "SELECT session_id FROM interactions WHERE id = ?1",
                        [subject_id],
                        |row| row.get(0),
                    )
                    .optional()?,
                SubjectKind::Document => None,
            };

            let item = enqueue_in_tx(tx, subject_id, kind, session_id.as_deref(), options, now)?;
            ctx.record_event("queue", &item.id, EventType::ItemEnqueued);
            Ok(item)
        })
    }

    /// Atomically claim the next eligible pending item.
    ///
    /// Eligible means `pending` with no future `next_attempt_at`. Highest
    /// priority first, then oldest. The claim bumps `attempts`.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn claim_next(&mut self, worker_id: &str) -> Result<Option<QueueItem>> {
        let now = chrono::Utc::now().timestamp_millis();
        let sql = format!(
            "UPDATE processing_queue
             SET status = 'processing', attempts = attempts + 1, claimed_by = ?1,
                 claimed_at = ?2, updated_at = ?2
             WHERE id = (
                 SELECT id FROM processing_queue
                 WHERE status = 'pending' AND (next_attempt_at IS NULL OR next_attempt_at <= ?2)
                 ORDER BY priority DESC, created_at ASC, id ASC
                 LIMIT 1
             ) AND status = 'pending'
             RETURNING {QUEUE_COLUMNS}"
        );
        self.mutate("claim_next", worker_id, |tx, ctx| {
            let item = tx
                .query_row(&sql, rusqlite::params![worker_id, now], map_queue_item)
                .optional()?;
            if let Some(ref item) = item {
                ctx.record_event("queue", &item.id, EventType::ItemClaimed);
            }
            Ok(item)
        })
    }

    /// Mark a processing item completed.
    ///
    /// Only the worker holding the claim may complete it. Returns false if
    /// the item is no longer processing under `worker_id` (for example the
    /// sweeper reclaimed it and another worker claimed it since).
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn complete_item(&mut self, queue_item_id: &str, worker_id: &str) -> Result<bool> {
        let now = chrono::Utc::now().timestamp_millis();
        self.mutate("complete_item", worker_id, |tx, ctx| {
            let rows = tx.execute(
                "UPDATE processing_queue
                 SET status = 'completed', last_error = NULL, retryable = 0,
                     next_attempt_at = NULL, updated_at = ?2
                 WHERE id = ?1 AND status = 'processing' AND claimed_by = ?3",
                rusqlite::params![queue_item_id, now, worker_id],
            )?;
            if rows > 0 {
                ctx.record_event("queue", queue_item_id, EventType::ItemCompleted);
            }
            Ok(rows > 0)
        })
    }

    /// Mark a processing item failed.
    ///
    /// Like [`Self::complete_item`], only the claim holder may do this;
    /// `None` means the claim was lost.
    ///
    /// A transient error with attempts left becomes retryable at
    /// `next_attempt_at`; anything else is terminal until an operator retry.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn fail_item(
        &mut self,
        queue_item_id: &str,
        error: &str,
        transient: bool,
        next_attempt_at: i64,
        worker_id: &str,
    ) -> Result<Option<QueueItem>> {
        let now = chrono::Utc::now().timestamp_millis();
        self.mutate("fail_item", worker_id, |tx, ctx| {
            let rows = tx.execute(
                "UPDATE processing_queue
                 SET status = 'failed', last_error = ?2,
                     retryable = CASE WHEN ?3 AND attempts < max_attempts THEN 1 ELSE 0 END,
                     next_attempt_at = CASE WHEN ?3 AND attempts < max_attempts THEN ?4 ELSE NULL END,
                     updated_at = ?5
                 WHERE id = ?1 AND status = 'processing' AND claimed_by = ?6",
                rusqlite::params![queue_item_id, error, transient, next_attempt_at, now, worker_id],
            )?;
            if rows == 0 {
                return Ok(None);
            }
            ctx.record_comment("queue", queue_item_id, EventType::ItemFailed, error);

            let sql = format!("SELECT {QUEUE_COLUMNS} FROM processing_queue WHERE id = ?1");
            Ok(tx.query_row(&sql, [queue_item_id], map_queue_item).optional()?)
        })
    }

    /// Requeue due retryable failures and reclaim stale processing items.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn sweep(&mut self, stale_before: i64, actor: &str) -> Result<SweepReport> {
        let now = chrono::Utc::now().timestamp_millis();
        self.mutate("sweep", actor, |tx, ctx| {
            let requeued = tx.execute(
                "UPDATE processing_queue
                 SET status = 'pending', claimed_by = NULL, claimed_at = NULL, updated_at = ?1
                 WHERE status = 'failed' AND retryable = 1
                   AND attempts < max_attempts
                   AND (next_attempt_at IS NULL OR next_attempt_at <= ?1)",
                [now],
            )?;

            let exhausted = tx.execute(
                "UPDATE processing_queue
                 SET status = 'failed', retryable = 0, next_attempt_at = NULL,
                     last_error = COALESCE(last_error, 'worker lost while processing'),
                     updated_at = ?1
                 WHERE status = 'processing' AND claimed_at < ?2 AND attempts >= max_attempts",
                rusqlite::params![now, stale_before],
            )?;

            let reclaimed = tx.execute(
                "UPDATE processing_queue
                 SET status = 'pending', claimed_by = NULL, claimed_at = NULL, updated_at = ?1
                 WHERE status = 'processing' AND claimed_at < ?2",
                rusqlite::params![now, stale_before],
            )?;

            let report = SweepReport {
                requeued,
                reclaimed,
                exhausted,
            };
            if report.total() > 0 {
                ctx.record_comment(
                    "queue",
                    "*",
                    EventType::ItemRequeued,
                    &format!("requeued={requeued} reclaimed={reclaimed} exhausted={exhausted}"),
                );
            }
            Ok(report)
        })
    }

    /// Operator reset of a failed item, permanent failures included.
    ///
    /// # Errors
    ///
    /// Returns `SubjectNotFound` if the subject has no queue row, or
    /// `InvalidState` if the item is not failed.
    pub fn retry_failed(&mut self, subject_id: &str, actor: &str) -> Result<QueueItem> {
        let now = chrono::Utc::now().timestamp_millis();
        let item = self.get_queue_item_by_subject(subject_id)?.ok_or_else(|| {
            Error::SubjectNotFound {
                kind: "queue item".to_string(),
                id: subject_id.to_string(),
            }
        })?;

        self.mutate("retry_failed", actor, |tx, ctx| {
            let rows = tx.execute(
                "UPDATE processing_queue
                 SET status = 'pending', attempts = 0, retryable = 0, last_error = NULL,
                     next_attempt_at = NULL, claimed_by = NULL, claimed_at = NULL, updated_at = ?2
                 WHERE id = ?1 AND status = 'failed'",
                rusqlite::params![item.id, now],
            )?;
            if rows == 0 {
                return Err(Error::InvalidState {
                    entity: "queue item".to_string(),
                    id: item.id.clone(),
                    expected: "failed".to_string(),
                    actual: item.status.as_str().to_string(),
                });
            }
            ctx.record_change(
                "queue",
                &item.id,
                EventType::ItemRequeued,
                Some("failed".to_string()),
                Some("pending".to_string()),
            );
            Ok(())
        })?;

        self.get_queue_item(&item.id)?
            .ok_or_else(|| Error::SubjectNotFound {
                kind: "queue item".to_string(),
                id: item.id.clone(),
            })
    }

    /// Reset every queue row (optionally of one kind) to pending.
    ///
    /// Subjects without a row get one. Returns the number of rows touched.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn requeue_all(
        &mut self,
        kind: Option<SubjectKind>,
        options: EnqueueOptions,
        actor: &str,
    ) -> Result<usize> {
        let now = chrono::Utc::now().timestamp_millis();
        self.mutate("requeue_all", actor, |tx, ctx| {
            let kind_str = kind.map(|k| k.as_str());
            let mut touched = tx.execute(
                "UPDATE processing_queue
                 SET status = 'pending', attempts = 0, retryable = 0, last_error = NULL,
                     next_attempt_at = NULL, claimed_by = NULL, claimed_at = NULL, updated_at = ?1
                 WHERE (?2 IS NULL OR subject_kind = ?2) AND status != 'processing'",
                rusqlite::params![now, kind_str],
            )?;

            if kind.is_none_or(|k| k == SubjectKind::Document) {
                touched += tx.execute(
                    "INSERT INTO processing_queue
                         (id, subject_id, subject_kind, status, max_attempts, priority, created_at, updated_at)
                     SELECT 'q_' || lower(hex(randomblob(8))), d.id, 'document', 'pending', ?1, ?2, ?3, ?3
                     FROM documents d
                     WHERE NOT EXISTS (
                         SELECT 1 FROM processing_queue q
                         WHERE q.subject_kind = 'document' AND q.subject_id = d.id
                     )",
                    rusqlite::params![options.max_attempts, options.priority, now],
                )?;
            }
            if kind.is_none_or(|k| k == SubjectKind::Interaction) {
                touched += tx.execute(
                    "INSERT INTO processing_queue
                         (id, subject_id, subject_kind, session_id, status, max_attempts, priority, created_at, updated_at)
                     SELECT 'q_' || lower(hex(randomblob(8))), i.id, 'interaction', i.session_id, 'pending', ?1, ?2, ?3, ?3
                     FROM interactions i
                     WHERE NOT EXISTS (
                         SELECT 1 FROM processing_queue q
                         WHERE q.subject_kind = 'interaction' AND q.subject_id = i.id
                     )",
                    rusqlite::params![options.max_attempts, options.priority, now],
                )?;
            }

            ctx.record_comment(
                "queue",
                "*",
                EventType::IndexRebuilt,
                kind_str.unwrap_or("all"),
            );
            Ok(touched)
        })
    }

    /// Get a queue item by its own id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_queue_item(&self, id: &str) -> Result<Option<QueueItem>> {
        let sql = format!("SELECT {QUEUE_COLUMNS} FROM processing_queue WHERE id = ?1");
        Ok(self.conn.query_row(&sql, [id], map_queue_item).optional()?)
    }

    /// Get the queue item for a subject of either kind.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_queue_item_by_subject(&self, subject_id: &str) -> Result<Option<QueueItem>> {
        let sql = format!(
            "SELECT {QUEUE_COLUMNS} FROM processing_queue WHERE subject_id = ?1
             ORDER BY updated_at DESC LIMIT 1"
        );
        Ok(self
            .conn
            .query_row(&sql, [subject_id], map_queue_item)
            .optional()?)
    }

    /// Number of a session's items still pending or processing.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count_outstanding_for_session(&self, session_id: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM processing_queue
             WHERE session_id = ?1 AND status IN ('pending', 'processing')",
            [session_id],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Queue counts by status.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn queue_stats(&self) -> Result<QueueStats> {
        let mut stats = QueueStats::default();
        let mut stmt = self.conn.prepare(
            "SELECT status, COUNT(*), SUM(CASE WHEN retryable = 1 THEN 1 ELSE 0 END)
             FROM processing_queue GROUP BY status",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                parse_column::<QueueStatus>(row, 0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<i64>>(2)?.unwrap_or(0),
            ))
        })?;

        for row in rows {
            let (status, count, retryable) = row?;
            let count = usize::try_from(count).unwrap_or(0);
            match status {
                QueueStatus::Pending => stats.pending = count,
                QueueStatus::Processing => stats.processing = count,
                QueueStatus::Completed => stats.completed = count,
                QueueStatus::Failed => {
                    stats.failed = count;
                    stats.retryable = usize::try_from(retryable).unwrap_or(0);
                }
            }
        }
        Ok(stats)
    }

    /// Items in a given status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_queue_items(&self, status: Option<QueueStatus>, limit: u32) -> Result<Vec<QueueItem>> {
        let sql = format!(
            "SELECT {QUEUE_COLUMNS} FROM processing_queue
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY created_at ASC, id ASC
             LIMIT ?2"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params![status.map(|s| s.as_str()), limit],
            map_queue_item,
        )?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }
}

fn map_queue_item(row: &Row<'_>) -> rusqlite::Result<QueueItem> {
    Ok(QueueItem {
        id: row.get(0)?,
        subject_id: row.get(1)?,
        subject_kind: parse_column(row, 2)?,
        session_id: row.get(3)?,
        status: parse_column(row, 4)?,
        attempts: row.get(5)?,
        max_attempts: row.get(6)?,
        last_error: row.get(7)?,
        retryable: row.get(8)?,
        priority: row.get(9)?,
        claimed_by: row.get(10)?,
        claimed_at: row.get(11)?,
        next_attempt_at: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}
