//! Configuration management.
//!
//! This module resolves the knowledge hub home directory, the three database
//! paths, and loads `config.json`.
//!
//! # Layout
//!
//! ```text
//! ~/.knowledge-hub/            (or $KH_HOME)
//! ├── config.json              sections: embeddings, extraction, ingestion, session, capture
//! └── data/
//!     ├── kh.db                relational store (record of truth)
//!     ├── kh.vectors.db        vector store (derived)
//!     └── kh.graph.db          graph store (derived)
//! ```
//!
//! Environment variables take precedence over the file for provider
//! endpoints, models, tokens and the embedding dimension.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::embeddings::EmbeddingSettings;
use crate::error::{Error, Result};

/// Name of the home directory under the user's home.
const HOME_DIR_NAME: &str = ".knowledge-hub";

// ── Sections ──────────────────────────────────────────────────

/// Which entity extractor the pipeline uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorKind {
    /// Regex and keyword heuristics, always available.
    #[default]
    Rules,
    /// Local LLM through Ollama `/api/generate`.
    Ollama,
}

impl std::fmt::Display for ExtractorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rules => write!(f, "rules"),
            Self::Ollama => write!(f, "ollama"),
        }
    }
}

/// `extraction` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    pub provider: ExtractorKind,
    pub ollama_endpoint: Option<String>,
    pub ollama_model: String,
    /// Entities below this confidence are dropped before the graph write.
    pub min_confidence: f64,
    /// Per-subject cap on extracted entities.
    pub max_entities: usize,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            provider: ExtractorKind::Rules,
            ollama_endpoint: None,
            ollama_model: "llama3.2:3b".to_string(),
            min_confidence: 0.3,
            max_entities: 64,
        }
    }
}

/// `ingestion` section. Durations are milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionSettings {
    pub workers: usize,
    pub provider_timeout_ms: u64,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// Fraction of the delay used as +/- jitter.
    pub jitter: f64,
    pub stale_after_ms: u64,
    pub poll_interval_ms: u64,
    pub sweep_interval_ms: u64,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            workers: 2,
            provider_timeout_ms: 30_000,
            max_attempts: 5,
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 300_000,
            jitter: 0.2,
            stale_after_ms: 600_000,
            poll_interval_ms: 500,
            sweep_interval_ms: 5_000,
        }
    }
}

impl IngestionSettings {
    #[must_use]
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    #[must_use]
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// `session` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub end_timeout_ms: u64,
    pub end_poll_interval_ms: u64,
    pub resume_interaction_limit: usize,
    /// Cap on accomplishments/failures/files listed in a summary.
    pub summary_max_items: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            end_timeout_ms: 30_000,
            end_poll_interval_ms: 200,
            resume_interaction_limit: 20,
            summary_max_items: 10,
        }
    }
}

impl SessionSettings {
    #[must_use]
    pub fn end_timeout(&self) -> Duration {
        Duration::from_millis(self.end_timeout_ms)
    }

    #[must_use]
    pub fn end_poll_interval(&self) -> Duration {
        Duration::from_millis(self.end_poll_interval_ms.max(1))
    }
}

/// `capture` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Prepared records allowed to wait for a retry at once.
    pub buffer_capacity: usize,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 50,
            max_delay_ms: 2_000,
            buffer_capacity: 64,
        }
    }
}

/// Contents of `config.json`. Missing sections fall back to defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KhConfig {
    pub embeddings: EmbeddingSettings,
    pub extraction: ExtractionSettings,
    pub ingestion: IngestionSettings,
    pub session: SessionSettings,
    pub capture: CaptureSettings,
}

impl KhConfig {
    /// Load `config.json` from the home directory, or defaults if absent.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load from an explicit path.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {e}")))?;

        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {e}")))
    }

    /// Write the configuration as pretty JSON, creating the directory.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the file cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("Failed to create config directory: {e}")))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;

        fs::write(path, content)
            .map_err(|e| Error::Config(format!("Failed to write config file: {e}")))
    }
}

// ── Paths ─────────────────────────────────────────────────────

/// The knowledge hub home directory.
///
/// `KH_HOME` wins; otherwise `~/.knowledge-hub/`.
#[must_use]
pub fn kh_home() -> Option<PathBuf> {
    if let Ok(home) = std::env::var("KH_HOME") {
        if !home.trim().is_empty() {
            return Some(PathBuf::from(home));
        }
    }
    directories::BaseDirs::new().map(|b| b.home_dir().join(HOME_DIR_NAME))
}

/// Path of `config.json`.
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    kh_home().map(|dir| dir.join("config.json"))
}

/// Resolve the relational database path.
///
/// Priority:
/// 1. `explicit_path` (the `--db` flag)
/// 2. `KH_DB` environment variable
/// 3. `<home>/data/kh.db`
#[must_use]
pub fn resolve_db_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }

    if let Ok(db_path) = std::env::var("KH_DB") {
        if !db_path.trim().is_empty() {
            return Some(PathBuf::from(db_path));
        }
    }

    kh_home().map(|dir| dir.join("data").join("kh.db"))
}

/// Paths of the derived stores, placed next to the relational database.
///
/// `data/kh.db` gives `data/kh.vectors.db` and `data/kh.graph.db`.
#[must_use]
pub fn derived_store_paths(db_path: &Path) -> (PathBuf, PathBuf) {
    let stem = db_path
        .file_stem()
        .map_or_else(|| "kh".to_string(), |s| s.to_string_lossy().to_string());
    let dir = db_path.parent().unwrap_or_else(|| Path::new(""));
    (
        dir.join(format!("{stem}.vectors.db")),
        dir.join(format!("{stem}.graph.db")),
    )
}

/// Get the default actor name recorded on audit events.
///
/// Priority:
/// 1. `KH_ACTOR` environment variable
/// 2. Git user name
/// 3. System username
/// 4. "unknown"
#[must_use]
pub fn default_actor() -> String {
    if let Ok(actor) = std::env::var("KH_ACTOR") {
        if !actor.is_empty() {
            return actor;
        }
    }

    if let Ok(output) = std::process::Command::new("git")
        .args(["config", "user.name"])
        .output()
    {
        if output.status.success() {
            let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !name.is_empty() {
                return name;
            }
        }
    }

    if let Ok(user) = std::env::var("USER") {
        return user;
    }

    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_db_path_with_explicit() {
        let explicit = PathBuf::from("/custom/path/db.sqlite");
        assert_eq!(resolve_db_path(Some(&explicit)), Some(explicit));
    }

    #[test]
    fn test_derived_store_paths_sit_next_to_db() {
        let (vectors, graph) = derived_store_paths(Path::new("/tmp/hub/data/kh.db"));
        assert_eq!(vectors, PathBuf::from("/tmp/hub/data/kh.vectors.db"));
        assert_eq!(graph, PathBuf::from("/tmp/hub/data/kh.graph.db"));

        let (vectors, _) = derived_store_paths(Path::new("other.sqlite"));
        assert_eq!(vectors, PathBuf::from("other.vectors.db"));
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config: KhConfig =
            serde_json::from_str(r#"{"session": {"resume_interaction_limit": 5}}"#).unwrap();
        assert_eq!(config.session.resume_interaction_limit, 5);
        assert_eq!(config.session.end_poll_interval_ms, 200);
        assert_eq!(config.ingestion.max_attempts, 5);
        assert_eq!(config.extraction.provider, ExtractorKind::Rules);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = KhConfig::default();
        config.capture.buffer_capacity = 3;
        config.extraction.provider = ExtractorKind::Ollama;
        config.save_to(&path).unwrap();

        let loaded = KhConfig::load_from(&path).unwrap();
        assert_eq!(loaded.capture.buffer_capacity, 3);
        assert_eq!(loaded.extraction.provider, ExtractorKind::Ollama);
    }

    #[test]
    fn test_malformed_config_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(KhConfig::load_from(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_default_actor() {
        assert!(!default_actor().is_empty());
    }
}
