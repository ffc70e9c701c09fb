//! Data models for the knowledge hub.
//!
//! This module contains all domain models:
//! - Session, SessionSummary, ResumeBundle
//! - Interaction
//! - Document, Chunk
//! - QueueItem
//! - Entity, EntityRelationship

pub mod document;
pub mod graph;
pub mod interaction;
pub mod queue;
pub mod session;

pub use document::{chunk_id, content_hash, Chunk, Document, DocumentReceipt, NewDocument};
pub use graph::{Entity, EntityRelationship, GraphFilter, GraphResult};
pub use interaction::{Interaction, InteractionKind, NewInteraction, RecordOutcome};
pub use queue::{QueueItem, QueueStats, QueueStatus, SubjectKind, SubjectStatus};
pub use session::{
    Outcome, OutcomeKind, ResumeBundle, Session, SessionStatus, SessionSummary, StartRequest,
};

/// Generate a prefixed opaque id (`sess_1a2b3c4d5e6f`).
#[must_use]
pub fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", &uuid::Uuid::new_v4().simple().to_string()[..16])
}

/// Current time as Unix milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
