//! Ingestion: queue facade, processing pipeline and worker pool.
//!
//! Subjects (documents and interactions) enter the relational queue in the
//! same transaction that stores them. Workers claim items with a single
//! conditional `UPDATE`, run them through the [`Pipeline`], and record the
//! result back on the item.
//!
//! # Submodules
//!
//! - [`pipeline`] - chunk, embed, index and extract one item
//! - [`worker`] - supervised pool of workers plus a sweeper
//! - [`retry`] - backoff schedule shared with capture

pub mod pipeline;
pub mod retry;
pub mod worker;

pub use pipeline::{DrainReport, Pipeline, PipelineConfig, ProcessOutcome};
pub use retry::RetryPolicy;
pub use worker::{PoolReport, PoolSettings, WorkerPool};

use crate::config::IngestionSettings;
use crate::error::{Error, Result};
use crate::model::{
    DocumentReceipt, NewDocument, QueueItem, QueueStats, QueueStatus, SubjectKind, SubjectStatus,
};
use crate::storage::{EnqueueOptions, SqliteStorage};

/// Queue operations over one relational connection.
pub struct Ingestion<'a> {
    storage: &'a mut SqliteStorage,
    max_attempts: u32,
    actor: &'a str,
}

impl<'a> Ingestion<'a> {
    pub fn new(storage: &'a mut SqliteStorage, settings: &IngestionSettings, actor: &'a str) -> Self {
        Self {
            storage,
            max_attempts: settings.max_attempts.max(1),
            actor,
        }
    }

    fn options(&self, priority: i64) -> EnqueueOptions {
        EnqueueOptions {
            priority,
            max_attempts: self.max_attempts,
        }
    }

    /// Enqueue an existing subject. The kind is inferred from the id prefix
    /// when not given.
    ///
    /// A live item is returned as it is; a completed or failed one is reset
    /// to pending with a fresh attempt budget.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the kind cannot be inferred, or
    /// `SubjectNotFound` for an unknown subject.
    pub fn enqueue(
        &mut self,
        subject_id: &str,
        kind: Option<SubjectKind>,
        priority: i64,
    ) -> Result<QueueItem> {
        let kind = kind
            .or_else(|| SubjectKind::from_id(subject_id))
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "cannot tell the subject kind of '{subject_id}'; pass --kind"
                ))
            })?;
        let options = self.options(priority);
        let item = self.storage.enqueue(subject_id, kind, options, self.actor)?;
        tracing::info!(item = %item.id, subject = subject_id, status = item.status.as_str(), "Subject enqueued");
        Ok(item)
    }

    /// Processing state of a subject.
    ///
    /// # Errors
    ///
    /// Returns `SubjectNotFound` if the subject was never enqueued.
    pub fn status(&self, subject_id: &str) -> Result<SubjectStatus> {
        self.storage
            .get_queue_item_by_subject(subject_id)?
            .map(|item| SubjectStatus::from(&item))
            .ok_or_else(|| Error::SubjectNotFound {
                kind: SubjectKind::from_id(subject_id)
                    .map_or("subject", |k| k.as_str())
                    .to_string(),
                id: subject_id.to_string(),
            })
    }

    /// Operator reset of a failed item, permanent failures included.
    ///
    /// # Errors
    ///
    /// Returns `SubjectNotFound` or `InvalidState` if the item is not failed.
    pub fn retry_failed(&mut self, subject_id: &str) -> Result<QueueItem> {
        let item = self.storage.retry_failed(subject_id, self.actor)?;
        tracing::info!(item = %item.id, subject = subject_id, "Failed item reset to pending");
        Ok(item)
    }

    /// Counts by status.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn queue_stats(&self) -> Result<QueueStats> {
        self.storage.queue_stats()
    }

    /// Queue rows, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list(&self, status: Option<QueueStatus>, limit: u32) -> Result<Vec<QueueItem>> {
        self.storage.list_queue_items(status, limit)
    }

    /// Store a document (deduplicated by content hash) and enqueue it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for empty content, or a database error.
    pub fn ingest_document(&mut self, document: &NewDocument, priority: i64) -> Result<DocumentReceipt> {
        let options = self.options(priority);
        let receipt = self.storage.ingest_document(document, options, self.actor)?;
        tracing::info!(
            document = %receipt.document_id,
            item = %receipt.queue_item_id,
            duplicate = receipt.duplicate,
            "Document ingested"
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_infers_kind_and_reports_status() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let settings = IngestionSettings::default();
        let mut ingestion = Ingestion::new(&mut storage, &settings, "test");

        let receipt = ingestion
            .ingest_document(&NewDocument::new("readme", "Knowledge hub notes"), 0)
            .unwrap();
        let item = ingestion.enqueue(&receipt.document_id, None, 5).unwrap();
        assert_eq!(item.id, receipt.queue_item_id);

        let status = ingestion.status(&receipt.document_id).unwrap();
        assert_eq!(status.status, QueueStatus::Pending);
        assert_eq!(status.attempts, 0);
        assert_eq!(ingestion.queue_stats().unwrap().pending, 1);
    }

    #[test]
    fn test_unknown_subjects() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let settings = IngestionSettings::default();
        let mut ingestion = Ingestion::new(&mut storage, &settings, "test");

        assert!(matches!(
            ingestion.enqueue("doc_missing", None, 0).unwrap_err(),
            Error::SubjectNotFound { .. }
        ));
        assert!(matches!(
            ingestion.enqueue("mystery", None, 0).unwrap_err(),
            Error::InvalidArgument(_)
        ));
        assert!(matches!(
            ingestion.status("doc_missing").unwrap_err(),
            Error::SubjectNotFound { .. }
        ));
    }
}
