//! Interaction model (actions and conversation messages).

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Classification of a captured interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    UserMessage,
    AssistantResponse,
    ToolExecution,
    SystemError,
}

impl InteractionKind {
    /// Get the string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::UserMessage => "user_message",
            Self::AssistantResponse => "assistant_response",
            Self::ToolExecution => "tool_execution",
            Self::SystemError => "system_error",
        }
    }
}

impl std::fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InteractionKind {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "user_message" | "user" => Ok(Self::UserMessage),
            "assistant_response" | "assistant" => Ok(Self::AssistantResponse),
            "tool_execution" | "tool" => Ok(Self::ToolExecution),
            "system_error" | "error" => Ok(Self::SystemError),
            _ => Err(Error::InvalidArgument(format!("unknown interaction kind: {s}"))),
        }
    }
}

/// A persisted interaction. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub id: String,
    pub session_id: String,
    pub kind: InteractionKind,
    pub content: String,
    pub structured_context: serde_json::Value,
    pub success: bool,
    pub created_at: i64,
}

/// An interaction prepared for recording.
///
/// The id is fixed before the first write attempt, so re-submitting the
/// same value after a failure is a no-op if the earlier write landed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInteraction {
    pub id: String,
    pub kind: InteractionKind,
    pub content: String,
    pub structured_context: serde_json::Value,
    pub success: bool,
}

impl NewInteraction {
    pub fn new(kind: InteractionKind, content: impl Into<String>) -> Self {
        Self {
            id: super::new_id("int"),
            kind,
            content: content.into(),
            structured_context: serde_json::Value::Object(serde_json::Map::new()),
            success: true,
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.structured_context = context;
        self
    }

    #[must_use]
    pub fn with_success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    /// Tool name recorded under `structured_context.tool`.
    #[must_use]
    pub fn tool_name(&self) -> Option<&str> {
        self.structured_context
            .get("tool")
            .and_then(serde_json::Value::as_str)
            .filter(|t| !t.is_empty())
    }

    /// File references recorded under `structured_context.files`.
    #[must_use]
    pub fn files(&self) -> Vec<&str> {
        self.structured_context
            .get("files")
            .and_then(serde_json::Value::as_array)
            .map(|files| files.iter().filter_map(serde_json::Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// Acknowledgement returned by `record_interaction`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordOutcome {
    pub interaction_id: String,
    pub queue_item_id: String,
    /// False when the interaction id was already recorded.
    pub inserted: bool,
    pub message_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_storage_string() {
        for kind in [
            InteractionKind::UserMessage,
            InteractionKind::AssistantResponse,
            InteractionKind::ToolExecution,
            InteractionKind::SystemError,
        ] {
            assert_eq!(kind.as_str().parse::<InteractionKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_context_accessors() {
        let interaction = NewInteraction::new(InteractionKind::ToolExecution, "ran cargo")
            .with_context(serde_json::json!({"tool": "bash", "files": ["src/lib.rs", 3]}));
        assert_eq!(interaction.tool_name(), Some("bash"));
        assert_eq!(interaction.files(), vec!["src/lib.rs"]);
        assert!(interaction.id.starts_with("int_"));
    }
}
