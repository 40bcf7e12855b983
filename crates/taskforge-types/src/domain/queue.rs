use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuedMessageType {
    Message,
    Command,
}

impl QueuedMessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueuedMessageType::Message => "message",
            QueuedMessageType::Command => "command",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "command" => QueuedMessageType::Command,
            _ => QueuedMessageType::Message,
        }
    }
}

/// A row of the user-message queue, inserted by interactive clients
/// and drained exactly once by the owning project worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: i64,
    pub ticket_id: i64,
    pub content: String,
    pub message_type: QueuedMessageType,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

/// Commands a user can interject into a running ticket. The leading
/// token is matched case-insensitively; anything else is free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserCommand {
    Done,
    Skip,
    Stop,
}

impl UserCommand {
    pub fn parse(text: &str) -> Option<Self> {
        let token = text.trim().split_whitespace().next()?;
        match token.to_ascii_lowercase().as_str() {
            "/done" => Some(UserCommand::Done),
            "/skip" => Some(UserCommand::Skip),
            "/stop" => Some(UserCommand::Stop),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_case_insensitively() {
        assert_eq!(UserCommand::parse("/done"), Some(UserCommand::Done));
        assert_eq!(UserCommand::parse("/DONE"), Some(UserCommand::Done));
        assert_eq!(UserCommand::parse("  /Skip  "), Some(UserCommand::Skip));
        assert_eq!(UserCommand::parse("/stop now"), Some(UserCommand::Stop));
    }

    #[test]
    fn free_text_is_not_a_command() {
        assert_eq!(UserCommand::parse("please use tabs"), None);
        assert_eq!(UserCommand::parse("/undo"), None);
        assert_eq!(UserCommand::parse(""), None);
    }
}
