//! Error types for the knowledge hub.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (2=db, 3=not_found, 4=state, 5=ingestion, etc.)
//! - Transient/permanent classification used by capture retry and the
//!   ingestion queue
//! - Context-aware recovery hints
//! - Structured JSON output for piped / non-TTY consumers

use std::time::Duration;
use thiserror::Error;

/// Result type alias for knowledge hub operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
///
/// Each code maps to a SCREAMING_SNAKE string and a category-based
/// exit code. Agents match on the string; shell scripts on the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Database (exit 2)
    NotInitialized,
    DatabaseError,
    DatabaseBusy,

    // Not Found (exit 3)
    SessionNotFound,
    SubjectNotFound,

    // State (exit 4)
    InvalidState,
    Conflict,
    InvalidArgument,

    // Ingestion (exit 5)
    TransientProvider,
    PermanentProcessing,
    DimensionMismatch,

    // Deadline (exit 6)
    Timeout,

    // Capture (exit 7)
    CaptureFailed,

    // Config (exit 8)
    ConfigError,

    // I/O (exit 9)
    IoError,
    JsonError,

    // Internal (exit 1)
    InternalError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::DatabaseBusy => "DATABASE_BUSY",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::SubjectNotFound => "SUBJECT_NOT_FOUND",
            Self::InvalidState => "INVALID_STATE",
            Self::Conflict => "CONFLICT",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::TransientProvider => "TRANSIENT_PROVIDER_ERROR",
            Self::PermanentProcessing => "PERMANENT_PROCESSING_ERROR",
            Self::DimensionMismatch => "DIMENSION_MISMATCH",
            Self::Timeout => "TIMEOUT",
            Self::CaptureFailed => "CAPTURE_FAILED",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Category-based exit code (1-9).
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InternalError => 1,
            Self::NotInitialized | Self::DatabaseError | Self::DatabaseBusy => 2,
            Self::SessionNotFound | Self::SubjectNotFound => 3,
            Self::InvalidState | Self::Conflict | Self::InvalidArgument => 4,
            Self::TransientProvider | Self::PermanentProcessing | Self::DimensionMismatch => 5,
            Self::Timeout => 6,
            Self::CaptureFailed => 7,
            Self::ConfigError => 8,
            Self::IoError | Self::JsonError => 9,
        }
    }

    /// Whether retrying the same call later may succeed.
    ///
    /// True for busy databases, provider hiccups and deadlines. False for
    /// not-found, state, and permanent processing errors.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DatabaseBusy | Self::TransientProvider | Self::Timeout | Self::CaptureFailed
        )
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in knowledge hub operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Not initialized: run `kh init` first")]
    NotInitialized,

    #[error("Session not found: {id}")]
    SessionNotFound { id: String },

    #[error("Subject not found: {kind} {id}")]
    SubjectNotFound { kind: String, id: String },

    #[error("Invalid state for {entity} {id}: expected {expected}, got {actual}")]
    InvalidState {
        entity: String,
        id: String,
        expected: String,
        actual: String,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Transient provider error: {0}")]
    TransientProvider(String),

    #[error("Permanent processing error: {0}")]
    PermanentProcessing(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Timed out after {}ms: {operation}", elapsed.as_millis())]
    Timeout { operation: String, elapsed: Duration },

    #[error("Capture failed after {attempts} attempt(s): {source}")]
    CaptureFailed {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a session state violation.
    pub fn invalid_session_state(id: &str, expected: &str, actual: &str) -> Self {
        Self::InvalidState {
            entity: "session".to_string(),
            id: id.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotInitialized => ErrorCode::NotInitialized,
            Self::Database(_) if self.is_busy_database() => ErrorCode::DatabaseBusy,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::SessionNotFound { .. } => ErrorCode::SessionNotFound,
            Self::SubjectNotFound { .. } => ErrorCode::SubjectNotFound,
            Self::InvalidState { .. } => ErrorCode::InvalidState,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::TransientProvider(_) => ErrorCode::TransientProvider,
            Self::PermanentProcessing(_) => ErrorCode::PermanentProcessing,
            Self::DimensionMismatch { .. } => ErrorCode::DimensionMismatch,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::CaptureFailed { .. } => ErrorCode::CaptureFailed,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// SQLite reported the database as busy, locked, or unreachable.
    ///
    /// These are the failures the capture path buffers and retries.
    #[must_use]
    pub fn is_busy_database(&self) -> bool {
        match self {
            Self::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy
                    | rusqlite::ErrorCode::DatabaseLocked
                    | rusqlite::ErrorCode::CannotOpen
                    | rusqlite::ErrorCode::SystemIoFailure
            ),
            _ => false,
        }
    }

    /// Whether the ingestion queue should schedule a retry for this error.
    ///
    /// Anything not explicitly transient is treated as permanent so that
    /// malformed input never loops through the queue.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientProvider(_) | Self::Timeout { .. }) || self.is_busy_database()
    }

    /// Context-aware recovery hint for agents and humans.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::NotInitialized => Some("Run `kh init` to initialize the databases".to_string()),

            Self::SessionNotFound { id } => Some(format!(
                "No session with ID '{id}'. Use `kh session list` to see available sessions."
            )),

            Self::SubjectNotFound { kind, .. } => Some(format!(
                "Only existing {kind}s can be enqueued. Use `kh ingest add` for new documents."
            )),

            Self::InvalidState { entity, actual, .. } if entity == "session" => match actual.as_str() {
                "paused" => Some("Reactivate it first: kh session reactivate <session-id>".to_string()),
                "ended" | "error" => Some(
                    "The session is closed. Start a new one with `kh session resume`.".to_string(),
                ),
                _ => None,
            },

            Self::DimensionMismatch { expected, .. } => Some(format!(
                "The store is configured for {expected} dimensions. \
                 Switch providers with `kh ingest reindex --dimensions <n>`."
            )),

            Self::CaptureFailed { .. } => Some(
                "The interaction was NOT recorded. Check that the database is reachable and retry."
                    .to_string(),
            ),

            Self::Timeout { operation, .. } => Some(format!(
                "Increase the timeout for {operation} or check the provider with `kh status`."
            )),

            Self::InvalidState { .. }
            | Self::Conflict(_)
            | Self::TransientProvider(_)
            | Self::PermanentProcessing(_)
            | Self::Database(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::InvalidArgument(_)
            | Self::Config(_)
            | Self::Other(_) => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    ///
    /// Includes error code, message, retryability, exit code, and
    /// optional recovery hint. Agents parse this instead of stderr text.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "retryable": code.is_retryable(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}
