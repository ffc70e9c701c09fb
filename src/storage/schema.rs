//! Database schema definitions for the relational store.
//!
//! The relational store is the record of truth: sessions, interactions,
//! documents, chunks, the processing queue, audit events and embedding
//! metadata. Vector and graph stores keep their own schemas.

use rusqlite::{Connection, Result};

/// Current schema version for migration tracking.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// The complete SQL schema for the relational database.
///
/// Timestamps are stored as INTEGER (Unix milliseconds).
pub const SCHEMA_SQL: &str = r"
-- ====================
-- Schema Version Tracking
-- ====================

CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at INTEGER NOT NULL
);

-- ====================
-- Sessions
-- ====================

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    external_id TEXT,
    owner_id TEXT NOT NULL,
    project TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active'
        CHECK (status IN ('active', 'paused', 'ended', 'error')),
    started_at INTEGER NOT NULL,
    ended_at INTEGER,
    end_reason TEXT,
    summary TEXT,
    resume_context TEXT,
    context TEXT NOT NULL DEFAULT '{}',
    message_count INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_owner ON sessions(owner_id, project, status);
CREATE INDEX IF NOT EXISTS idx_sessions_ended ON sessions(owner_id, ended_at DESC);

-- At most one live session per idempotency key
CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_live_external
    ON sessions(external_id)
    WHERE external_id IS NOT NULL AND status IN ('active', 'paused');

-- Accumulated accomplishments and failures (append-only)
CREATE TABLE IF NOT EXISTS session_outcomes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    interaction_id TEXT NOT NULL,
    kind TEXT NOT NULL CHECK (kind IN ('accomplishment', 'failure')),
    text TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    UNIQUE(interaction_id, kind),
    FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_outcomes_session ON session_outcomes(session_id, id);

-- Distinct tools used, in first-use order
CREATE TABLE IF NOT EXISTS session_tools (
    session_id TEXT NOT NULL,
    tool TEXT NOT NULL,
    first_used_at INTEGER NOT NULL,
    PRIMARY KEY (session_id, tool),
    FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
);

-- Distinct files touched, in first-touch order
CREATE TABLE IF NOT EXISTS session_files (
    session_id TEXT NOT NULL,
    path TEXT NOT NULL,
    first_seen_at INTEGER NOT NULL,
    PRIMARY KEY (session_id, path),
    FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
);

-- ====================
-- Interactions
-- ====================

CREATE TABLE IF NOT EXISTS interactions (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    kind TEXT NOT NULL
        CHECK (kind IN ('user_message', 'assistant_response', 'tool_execution', 'system_error')),
    content TEXT NOT NULL,
    structured_context TEXT NOT NULL DEFAULT '{}',
    success INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL,
    FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_interactions_session ON interactions(session_id, created_at);

-- ====================
-- Documents & Chunks
-- ====================

CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    content_hash TEXT NOT NULL UNIQUE,
    project TEXT,
    tags TEXT NOT NULL DEFAULT '[]',
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_documents_project ON documents(project);

CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    content TEXT NOT NULL,
    start_offset INTEGER NOT NULL,
    end_offset INTEGER NOT NULL,
    embedding BLOB,
    metadata TEXT NOT NULL DEFAULT '{}',
    UNIQUE(document_id, chunk_index),
    FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
);

-- ====================
-- Processing Queue
-- ====================

CREATE TABLE IF NOT EXISTS processing_queue (
    id TEXT PRIMARY KEY,
    subject_id TEXT NOT NULL,
    subject_kind TEXT NOT NULL CHECK (subject_kind IN ('document', 'interaction')),
    session_id TEXT,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'processing', 'completed', 'failed')),
    attempts INTEGER NOT NULL DEFAULT 0,
    max_attempts INTEGER NOT NULL DEFAULT 5,
    last_error TEXT,
    retryable INTEGER NOT NULL DEFAULT 0,
    priority INTEGER NOT NULL DEFAULT 0,
    claimed_by TEXT,
    claimed_at INTEGER,
    next_attempt_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE(subject_kind, subject_id)
);

CREATE INDEX IF NOT EXISTS idx_queue_claim
    ON processing_queue(status, priority DESC, created_at ASC);
CREATE INDEX IF NOT EXISTS idx_queue_session ON processing_queue(session_id, status);

-- ====================
-- Embeddings Metadata
-- ====================

CREATE TABLE IF NOT EXISTS embeddings_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

-- ====================
-- Audit Events
-- ====================

CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    actor TEXT NOT NULL,
    old_value TEXT,
    new_value TEXT,
    comment TEXT,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id);

-- ====================
-- Views
-- ====================

-- Queue counts per session, used by end-of-session waits and `kh status`
CREATE VIEW IF NOT EXISTS session_queue_summary AS
SELECT
    q.session_id,
    COUNT(CASE WHEN q.status = 'pending' THEN 1 END) as pending,
    COUNT(CASE WHEN q.status = 'processing' THEN 1 END) as processing,
    COUNT(CASE WHEN q.status = 'completed' THEN 1 END) as completed,
    COUNT(CASE WHEN q.status = 'failed' THEN 1 END) as failed
FROM processing_queue q
WHERE q.session_id IS NOT NULL
GROUP BY q.session_id;
";

/// Apply the schema to the database.
///
/// Idempotent: every statement uses `IF NOT EXISTS`.
///
/// # Errors
///
/// Returns an error if the SQL execution fails or pragmas cannot be set.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    apply_pragmas(conn)?;

    conn.execute_batch(SCHEMA_SQL)?;

    // Numbered migrations on top of the base DDL
    super::migrations::run_migrations(conn)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
        rusqlite::params![
            format!("v{CURRENT_SCHEMA_VERSION}"),
            chrono::Utc::now().timestamp_millis()
        ],
    )?;

    Ok(())
}

/// Connection pragmas shared by all three stores.
///
/// # Errors
///
/// Returns an error if a pragma cannot be set.
pub fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_schema() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).expect("Failed to apply schema");

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        for table in [
            "sessions",
            "session_outcomes",
            "session_tools",
            "session_files",
            "interactions",
            "documents",
            "chunks",
            "processing_queue",
            "embeddings_meta",
            "events",
        ] {
            assert!(tables.contains(&table.to_string()), "missing table {table}");
        }
    }

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).expect("First apply failed");
        apply_schema(&conn).expect("Second apply failed");
    }

    #[test]
    fn test_queue_is_unique_per_subject() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();

        conn.execute(
            "INSERT INTO processing_queue (id, subject_id, subject_kind, created_at, updated_at)
             VALUES ('q_1', 'doc_1', 'document', 0, 0)",
            [],
        )
        .unwrap();
        let second = conn.execute(
            "INSERT INTO processing_queue (id, subject_id, subject_kind, created_at, updated_at)
             VALUES ('q_2', 'doc_1', 'document', 0, 0)",
            [],
        );
        assert!(second.is_err());
    }

    #[test]
    fn test_live_external_id_is_unique() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();

        let insert = |id: &str, status: &str| {
            conn.execute(
                "INSERT INTO sessions (id, external_id, owner_id, project, status, started_at, updated_at)
                 VALUES (?1, 'ext', 'o', 'p', ?2, 0, 0)",
                rusqlite::params![id, status],
            )
        };

        insert("sess_a", "ended").unwrap();
        insert("sess_b", "active").unwrap();
        assert!(insert("sess_c", "paused").is_err());
    }
}
