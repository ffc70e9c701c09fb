//! SQLite storage layer for the relational store.
//!
//! This module provides the record of truth using SQLite with:
//! - WAL mode and a busy timeout so several workers can share one file
//! - IMMEDIATE transactions for every mutation
//! - Conditional updates for queue claims and session counters
//! - Audit events for history
//!
//! # Submodules
//!
//! - [`events`] - Audit event storage
//! - [`schema`] - Database schema definitions
//! - [`sqlite`] - Connection handling, sessions and interactions
//! - [`queue`] - Processing queue
//! - [`documents`] - Documents and chunks

pub mod documents;
pub mod events;
pub mod migrations;
pub mod queue;
pub mod schema;
pub mod sqlite;

pub use documents::{blob_to_embedding, embedding_to_blob, ChunkRecord, SubjectText};
pub use queue::{EnqueueOptions, SweepReport};
pub use sqlite::{
    MutationContext, PurgeReport, SessionFilter, SqliteStorage, StartedSession,
    DEFAULT_BUSY_TIMEOUT_MS,
};
