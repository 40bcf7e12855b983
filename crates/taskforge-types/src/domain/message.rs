use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::util::{estimate_tokens, truncate_chars};

/// Persisted message content cap.
pub const MAX_MESSAGE_CHARS: usize = 50_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    ToolUse,
    ToolResult,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::ToolUse => "tool_use",
            MessageRole::ToolResult => "tool_result",
            MessageRole::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            "tool_use" => Some(MessageRole::ToolUse),
            "tool_result" => Some(MessageRole::ToolResult),
            "system" => Some(MessageRole::System),
            _ => None,
        }
    }
}

/// Append-only transcript event of a ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: i64,
    pub ticket_id: i64,
    pub session_id: Option<i64>,
    pub role: MessageRole,
    pub content: Option<String>,
    pub tool_name: Option<String>,
    /// Opaque structured tool input, stored as raw JSON text. The
    /// upstream agent may add shapes at any time, so no closed variant
    /// set is committed to.
    pub tool_input: Option<String>,
    pub token_count: i64,
    pub is_summarized: bool,
    pub created_at: DateTime<Utc>,
}

/// A message about to be appended, before the store assigns an id.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: Option<String>,
    pub tool_name: Option<String>,
    pub tool_input: Option<Value>,
    /// Authoritative token count from the agent, when available.
    pub tokens: Option<u64>,
}

impl NewMessage {
    pub fn text(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_name: None,
            tool_input: None,
            tokens: None,
        }
    }

    pub fn tool_use(name: impl Into<String>, input: Value) -> Self {
        Self {
            role: MessageRole::ToolUse,
            content: None,
            tool_name: Some(name.into()),
            tool_input: Some(input),
            tokens: None,
        }
    }

    /// Content capped to the persistence limit.
    pub fn capped_content(&self) -> Option<String> {
        self.content
            .as_deref()
            .map(|c| truncate_chars(c, MAX_MESSAGE_CHARS))
    }

    /// Token count to persist: authoritative if given, otherwise
    /// estimated from content or the serialized tool input.
    pub fn token_count(&self) -> u64 {
        if let Some(tokens) = self.tokens
            && tokens > 0
        {
            return tokens;
        }
        if let Some(content) = self.content.as_deref() {
            return estimate_tokens(content);
        }
        if let Some(input) = &self.tool_input {
            return estimate_tokens(&input.to_string());
        }
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn token_count_prefers_authoritative() {
        let mut msg = NewMessage::text(MessageRole::Assistant, "abcdefgh");
        msg.tokens = Some(99);
        assert_eq!(msg.token_count(), 99);
    }

    #[test]
    fn token_count_estimates_from_content() {
        let msg = NewMessage::text(MessageRole::Assistant, "abcdefgh");
        assert_eq!(msg.token_count(), 2);
    }

    #[test]
    fn token_count_estimates_from_tool_input() {
        let msg = NewMessage::tool_use("bash", json!({"command": "ls -la"}));
        assert!(msg.token_count() > 0);
    }

    #[test]
    fn capped_content_truncates() {
        let msg = NewMessage::text(MessageRole::User, "x".repeat(60_000));
        assert!(msg.capped_content().unwrap().chars().count() <= MAX_MESSAGE_CHARS);
    }
}
