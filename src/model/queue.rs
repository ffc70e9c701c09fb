//! Processing queue models.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Queue item status.
///
/// `pending -> processing -> {completed, failed}`; a retryable `failed`
/// item goes back to `pending` once its `next_attempt_at` has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueueStatus {
    /// Get the string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Pending or processing.
    #[must_use]
    pub const fn is_outstanding(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueueStatus {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(Error::InvalidArgument(format!("unknown queue status: {s}"))),
        }
    }
}

/// What a queue item points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    Document,
    Interaction,
}

impl SubjectKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Interaction => "interaction",
        }
    }

    /// Infer the kind from an id prefix.
    #[must_use]
    pub fn from_id(id: &str) -> Option<Self> {
        if id.starts_with("doc_") {
            Some(Self::Document)
        } else if id.starts_with("int_") {
            Some(Self::Interaction)
        } else {
            None
        }
    }
}

impl std::fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SubjectKind {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "document" | "doc" => Ok(Self::Document),
            "interaction" | "int" => Ok(Self::Interaction),
            _ => Err(Error::InvalidArgument(format!("unknown subject kind: {s}"))),
        }
    }
}

/// A processing queue row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub subject_id: String,
    pub subject_kind: SubjectKind,
    pub session_id: Option<String>,
    pub status: QueueStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub retryable: bool,
    pub priority: i64,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<i64>,
    pub next_attempt_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Answer to `ingestion.status(subject_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectStatus {
    pub subject_id: String,
    pub status: QueueStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub retryable: bool,
}

impl From<&QueueItem> for SubjectStatus {
    fn from(item: &QueueItem) -> Self {
        Self {
            subject_id: item.subject_id.clone(),
            status: item.status,
            attempts: item.attempts,
            last_error: item.last_error.clone(),
            retryable: item.retryable,
        }
    }
}

/// Queue counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    /// Failed items still eligible for automatic retry.
    pub retryable: usize,
}

impl QueueStats {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.failed
    }

    #[must_use]
    pub const fn outstanding(&self) -> usize {
        self.pending + self.processing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_kind_from_id() {
        assert_eq!(SubjectKind::from_id("doc_abc"), Some(SubjectKind::Document));
        assert_eq!(SubjectKind::from_id("int_abc"), Some(SubjectKind::Interaction));
        assert_eq!(SubjectKind::from_id("sess_abc"), None);
    }

    #[test]
    fn test_outstanding() {
        assert!(QueueStatus::Pending.is_outstanding());
        assert!(QueueStatus::Processing.is_outstanding());
        assert!(!QueueStatus::Failed.is_outstanding());
        let stats = QueueStats { pending: 2, processing: 1, completed: 4, failed: 1, retryable: 0 };
        assert_eq!(stats.total(), 8);
        assert_eq!(stats.outstanding(), 3);
    }
}
