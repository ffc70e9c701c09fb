//! Heuristic classification of raw agent messages.
//!
//! Tool-call markers win over error markers, which win over direction.
//! Everything detected lands in `structured_context` next to whatever
//! context the caller supplied (caller keys take precedence).

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::{InteractionKind, NewInteraction};

/// Which way a message travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// From the user (or the harness) to the agent.
    Inbound,
    /// From the agent.
    Outbound,
}

impl Direction {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

/// A message as seen by the capture layer, before classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedMessage {
    pub direction: Direction,
    pub content: String,
    /// Forces the kind instead of guessing.
    pub kind: Option<InteractionKind>,
    pub tool: Option<String>,
    /// Explicit outcome; otherwise inferred from error markers.
    pub success: Option<bool>,
    pub context: Option<Value>,
}

impl CapturedMessage {
    pub fn inbound(content: impl Into<String>) -> Self {
        Self::new(Direction::Inbound, content)
    }

    pub fn outbound(content: impl Into<String>) -> Self {
        Self::new(Direction::Outbound, content)
    }

    fn new(direction: Direction, content: impl Into<String>) -> Self {
        Self {
            direction,
            content: content.into(),
            kind: None,
            tool: None,
            success: None,
            context: None,
        }
    }

    #[must_use]
    pub fn with_kind(mut self, kind: InteractionKind) -> Self {
        self.kind = Some(kind);
        self
    }

    #[must_use]
    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    #[must_use]
    pub fn with_success(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }
}

static TOOL_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?m)<invoke name="([\w.:-]+)"|\[tool(?:_call)?:\s*([\w.:-]+)\]|^\s*(?:Tool|Running tool):\s*([\w.:-]+)|"tool_name"\s*:\s*"([\w.:-]+)""#,
    )
    .expect("static regex")
});

static TOOL_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<tool_use>|<function_calls>|<tool_result>|\[tool_result\]").expect("static regex")
});

static ERROR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^\s*(?:error(?:\[\w+\])?:|fatal:|panic:|traceback \(most recent call last\)|exception:|\w+(?:Error|Exception):)|thread '[^']*' panicked|\bexit(?:ed with)? (?:code|status) [1-9]\d*|\bcommand not found\b",
    )
    .expect("static regex")
});

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>()"'`]+"#).expect("static regex"));

static FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[\s(`'\x22])((?:~|\.{1,2})?/?(?:[\w.-]+/)+[\w.-]+\.[A-Za-z0-9]{1,8}|[\w-]+\.(?:rs|py|ts|tsx|js|go|java|md|toml|json|yaml|yml|sql|sh|c|h|cpp|lock))\b")
        .expect("static regex")
});

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*```([A-Za-z0-9_+#-]+)").expect("static regex"));

/// Turn a raw message into a prepared interaction with a fixed id.
#[must_use]
pub fn classify(message: &CapturedMessage) -> NewInteraction {
    let content = message.content.as_str();
    let tool = message
        .tool
        .clone()
        .filter(|t| !t.trim().is_empty())
        .or_else(|| detect_tool(content));
    let has_error = has_error_markers(content);

    let kind = message.kind.unwrap_or_else(|| {
        if tool.is_some() || TOOL_MARKER_RE.is_match(content) {
            InteractionKind::ToolExecution
        } else if has_error {
            InteractionKind::SystemError
        } else {
            match message.direction {
                Direction::Inbound => InteractionKind::UserMessage,
                Direction::Outbound => InteractionKind::AssistantResponse,
            }
        }
    });
    let success = message.success.unwrap_or(!has_error);

    let mut context = Map::new();
    context.insert("direction".to_string(), message.direction.as_str().into());
    if let Some(tool) = &tool {
        context.insert("tool".to_string(), tool.as_str().into());
    }
    insert_list(&mut context, "files", extract_files(content));
    insert_list(&mut context, "urls", extract_urls(content));
    insert_list(&mut context, "languages", extract_languages(content));
    if let Some(Value::Object(extra)) = &message.context {
        for (key, value) in extra {
            context.insert(key.clone(), value.clone());
        }
    }

    NewInteraction::new(kind, content)
        .with_context(Value::Object(context))
        .with_success(success)
}

/// Whether the text carries error markers.
#[must_use]
pub fn has_error_markers(text: &str) -> bool {
    ERROR_RE.is_match(text)
}

/// First tool name announced in the text.
#[must_use]
pub fn detect_tool(text: &str) -> Option<String> {
    TOOL_NAME_RE.captures(text).and_then(|caps| {
        caps.iter()
            .skip(1)
            .flatten()
            .next()
            .map(|m| m.as_str().to_string())
    })
}

/// File paths mentioned in the text, first occurrence order.
#[must_use]
pub fn extract_files(text: &str) -> Vec<String> {
    let without_urls = URL_RE.replace_all(text, " ");
    unique(
        FILE_RE
            .captures_iter(&without_urls)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().to_string()),
    )
}

#[must_use]
pub fn extract_urls(text: &str) -> Vec<String> {
    unique(
        URL_RE
            .find_iter(text)
            .map(|m| m.as_str().trim_end_matches(['.', ',', ';', ':']).to_string()),
    )
}

/// Languages named on opening code fences, lowercased.
#[must_use]
pub fn extract_languages(text: &str) -> Vec<String> {
    unique(
        FENCE_RE
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().to_lowercase()),
    )
}

fn unique(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

fn insert_list(context: &mut Map<String, Value>, key: &str, items: Vec<String>) {
    if !items.is_empty() {
        context.insert(key.to_string(), items.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_decides_plain_messages() {
        let user = classify(&CapturedMessage::inbound("Can you add a search command?"));
        assert_eq!(user.kind, InteractionKind::UserMessage);
        assert!(user.success);

        let reply = classify(&CapturedMessage::outbound("Sure, adding it now."));
        assert_eq!(reply.kind, InteractionKind::AssistantResponse);
        assert_eq!(reply.structured_context["direction"], "outbound");
    }

    #[test]
    fn test_tool_markers_win() {
        let text = "<function_calls>\n<invoke name=\"bash\">cargo test</invoke>\nerror: could not compile";
        let interaction = classify(&CapturedMessage::outbound(text));
        assert_eq!(interaction.kind, InteractionKind::ToolExecution);
        assert_eq!(interaction.tool_name(), Some("bash"));
        assert!(!interaction.success);
    }

    #[test]
    fn test_error_markers() {
        let panic = classify(&CapturedMessage::inbound("thread 'main' panicked at src/main.rs:4:5"));
        assert_eq!(panic.kind, InteractionKind::SystemError);
        assert!(!panic.success);

        let prose = classify(&CapturedMessage::inbound("Let's improve error handling."));
        assert_eq!(prose.kind, InteractionKind::UserMessage);
        assert!(prose.success);
    }

    #[test]
    fn test_explicit_flags_override_heuristics() {
        let message = CapturedMessage::inbound("error: flaky")
            .with_kind(InteractionKind::ToolExecution)
            .with_tool("pytest")
            .with_success(true)
            .with_context(serde_json::json!({"exit_code": 0}));
        let interaction = classify(&message);
        assert_eq!(interaction.kind, InteractionKind::ToolExecution);
        assert!(interaction.success);
        assert_eq!(interaction.tool_name(), Some("pytest"));
        assert_eq!(interaction.structured_context["exit_code"], 0);
    }

    #[test]
    fn test_extracts_files_urls_and_languages() {
        let text = "Edited src/storage/queue.rs and Cargo.toml, see https://docs.rs/rusqlite.\n\
                    ```rust\nfn main() {}\n```\n```SQL\nSELECT 1;\n```";
        let interaction = classify(&CapturedMessage::outbound(text));
        assert_eq!(interaction.files(), vec!["src/storage/queue.rs", "Cargo.toml"]);
        assert_eq!(
            interaction.structured_context["urls"],
            serde_json::json!(["https://docs.rs/rusqlite"])
        );
        assert_eq!(
            interaction.structured_context["languages"],
            serde_json::json!(["rust", "sql"])
        );
    }

    #[test]
    fn test_each_classification_gets_its_own_id() {
        let message = CapturedMessage::inbound("hello");
        assert_ne!(classify(&message).id, classify(&message).id);
    }
}
