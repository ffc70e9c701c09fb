//! CLI definitions using clap.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::capture::Direction;

pub mod commands;

/// Knowledge Hub - resumable agent sessions backed by a searchable memory
#[derive(Parser, Debug)]
#[command(name = "kh", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database path (default: ~/.knowledge-hub/data/kh.db)
    #[arg(long, global = true, env = "KH_DB")]
    pub db: Option<PathBuf>,

    /// Actor name for audit trail
    #[arg(long, global = true, env = "KH_ACTOR")]
    pub actor: Option<String>,

    /// Output as JSON (for agent integration)
    #[arg(long, alias = "robot", global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the home directory, database files and default config
    Init {
        /// Rewrite config.json with defaults
        #[arg(long)]
        force: bool,

        /// Embedding dimensionality to record (default: from config)
        #[arg(long)]
        dimensions: Option<usize>,
    },

    /// Print version information
    Version,

    /// Show session, queue and index counts
    Status,

    /// Session lifecycle
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },

    /// Classify a raw agent message and record it
    Capture(CaptureArgs),

    /// Ingestion queue and derived index maintenance
    Ingest {
        #[command(subcommand)]
        command: IngestCommands,
    },

    /// Semantic search over ingested documents and interactions
    Search(SearchArgs),

    /// Query the entity graph
    Graph(GraphArgs),
}

#[derive(Subcommand, Debug)]
pub enum SessionCommands {
    /// Start a session (idempotent on --external-id)
    Start {
        /// Owner (user or agent) id
        #[arg(long)]
        owner: String,

        /// Project name
        #[arg(long)]
        project: String,

        /// Caller-supplied idempotency key
        #[arg(long)]
        external_id: Option<String>,

        /// Initial context as a JSON object
        #[arg(long)]
        context: Option<String>,
    },

    /// Record an interaction against a session
    Record {
        /// Session ID
        session_id: String,

        /// Interaction content (use - to read stdin)
        content: String,

        /// Interaction kind
        #[arg(short, long, value_enum, default_value_t = KindArg::User)]
        kind: KindArg,

        /// Structured context as a JSON object
        #[arg(long)]
        context: Option<String>,

        /// Mark the interaction as failed
        #[arg(long)]
        failed: bool,
    },

    /// End a session, waiting for its ingestion up to a timeout
    End {
        /// Session ID
        session_id: String,

        /// Why the session ended
        #[arg(short, long, default_value = "completed")]
        reason: String,

        /// Wait budget in milliseconds (default: session.end_timeout_ms)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Rehydrate from the latest ended session of an owner
    Resume {
        /// Owner (user or agent) id
        #[arg(long)]
        owner: String,

        /// Restrict to one project
        #[arg(long)]
        project: Option<String>,
    },

    /// List sessions
    List {
        #[arg(long)]
        owner: Option<String>,

        #[arg(long)]
        project: Option<String>,

        /// Filter by status (active, paused, ended, error)
        #[arg(short, long)]
        status: Option<String>,

        /// Maximum sessions to return
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// Show a session with its latest interactions
    Show {
        /// Session ID
        id: String,

        /// Interactions to include
        #[arg(short, long, default_value = "10")]
        interactions: usize,
    },

    /// Pause an active session
    Pause {
        /// Session ID
        id: String,
    },

    /// Reactivate a paused session
    Reactivate {
        /// Session ID
        id: String,
    },

    /// Mark a session as failed
    Fail {
        /// Session ID
        id: String,

        #[arg(short, long, default_value = "aborted")]
        reason: String,
    },
}

/// Interaction kinds accepted on the command line.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum KindArg {
    User,
    Assistant,
    Tool,
    Error,
}

impl From<KindArg> for crate::model::InteractionKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::User => Self::UserMessage,
            KindArg::Assistant => Self::AssistantResponse,
            KindArg::Tool => Self::ToolExecution,
            KindArg::Error => Self::SystemError,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DirectionArg {
    #[default]
    Inbound,
    Outbound,
}

impl From<DirectionArg> for Direction {
    fn from(direction: DirectionArg) -> Self {
        match direction {
            DirectionArg::Inbound => Self::Inbound,
            DirectionArg::Outbound => Self::Outbound,
        }
    }
}

#[derive(Args, Debug)]
pub struct CaptureArgs {
    /// Session ID
    pub session_id: String,

    /// Raw message (use - to read stdin)
    pub content: String,

    /// Message direction
    #[arg(short, long, value_enum, default_value_t)]
    pub direction: DirectionArg,

    /// Force the interaction kind instead of classifying
    #[arg(short, long, value_enum)]
    pub kind: Option<KindArg>,

    /// Tool name, when known
    #[arg(long)]
    pub tool: Option<String>,

    /// Force the outcome to failed
    #[arg(long, conflicts_with = "succeeded")]
    pub failed: bool,

    /// Force the outcome to succeeded
    #[arg(long)]
    pub succeeded: bool,

    /// Extra structured context as a JSON object
    #[arg(long)]
    pub context: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum IngestCommands {
    /// Store a document and enqueue it
    Add {
        /// File to read (use - for stdin)
        #[arg(conflicts_with = "content")]
        path: Option<PathBuf>,

        /// Inline content instead of a file
        #[arg(long)]
        content: Option<String>,

        /// Document title (default: file name)
        #[arg(short, long)]
        title: Option<String>,

        #[arg(long)]
        project: Option<String>,

        /// Comma-separated tags
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,

        #[arg(long, default_value = "0")]
        priority: i64,
    },

    /// Enqueue an existing subject
    Enqueue {
        /// Document or interaction ID
        subject_id: String,

        /// Subject kind (inferred from the ID prefix when omitted)
        #[arg(long)]
        kind: Option<String>,

        #[arg(long, default_value = "0")]
        priority: i64,
    },

    /// Processing status of a subject
    Status {
        /// Document or interaction ID
        subject_id: String,
    },

    /// List queue items
    List {
        /// Filter by status (pending, processing, completed, failed)
        #[arg(short, long)]
        status: Option<String>,

        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// Process queued items
    Work {
        /// Drain the queue in this process and exit
        #[arg(long)]
        once: bool,

        /// Stop after this many items (with --once)
        #[arg(long, requires = "once")]
        limit: Option<usize>,

        /// Worker count (default: ingestion.workers)
        #[arg(short, long, conflicts_with = "once")]
        workers: Option<usize>,

        /// Run the pool for this many seconds, then shut down
        #[arg(long, conflicts_with = "once")]
        duration_secs: Option<u64>,
    },

    /// Requeue due retries and reclaim stale claims
    Sweep,

    /// Reset a failed item to pending
    Retry {
        /// Document or interaction ID
        subject_id: String,
    },

    /// Drop derived rows and re-enqueue their subjects
    Rebuild {
        /// Restrict to one kind (document, interaction)
        #[arg(long)]
        kind: Option<String>,
    },

    /// Change the embedding dimensionality and re-enqueue everything
    Reindex {
        #[arg(long)]
        dimensions: usize,
    },

    /// Delete derived rows whose subject no longer exists
    Prune,

    /// Delete ended sessions and everything derived from them
    Purge {
        /// Cutoff as RFC 3339 (e.g. 2026-01-01T00:00:00Z)
        #[arg(long, conflicts_with = "older_than_days")]
        before: Option<String>,

        /// Cutoff relative to now
        #[arg(long)]
        older_than_days: Option<u32>,
    },
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Query text
    pub query: String,

    /// Number of results
    #[arg(short = 'k', long, default_value = "10")]
    pub top_k: usize,

    /// Restrict to one kind (document, interaction)
    #[arg(long)]
    pub kind: Option<String>,
}

#[derive(Args, Debug)]
pub struct GraphArgs {
    /// Entity type (PERSON, ORG, TOOL, FILE, ...)
    #[arg(short = 't', long = "type")]
    pub entity_type: Option<String>,

    /// Case-insensitive substring of the entity name
    #[arg(short, long)]
    pub name: Option<String>,

    /// Only entities extracted from this subject
    #[arg(long)]
    pub subject: Option<String>,

    #[arg(long)]
    pub min_confidence: Option<f64>,

    #[arg(short, long, default_value = "50")]
    pub limit: usize,
}
