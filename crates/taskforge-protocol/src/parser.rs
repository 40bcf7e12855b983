use serde_json::Value;
use taskforge_types::{truncate_chars, UsageTotals};

use crate::schema::{AgentRecord, ContentBlock};

/// Literal the agent emits to signal completion, matched
/// case-insensitively anywhere in an assistant text block.
pub const COMPLETION_SIGNAL: &str = "TASK COMPLETED";

/// Persistence cap for tool_result content.
pub const TOOL_RESULT_MAX_CHARS: usize = 5_000;

/// What the caller should do with one parsed line: persist and
/// broadcast transcript messages, or record raw diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamAction {
    AssistantText(String),
    ToolUse { name: String, input: Value },
    ToolResult(String),
    SystemError(String),
    RawOutput(String),
}

#[derive(Debug, Default)]
pub struct LineOutcome {
    pub actions: Vec<StreamAction>,
    /// Set when this line changed the usage accumulators, so the
    /// caller can push a real-time rollup.
    pub usage_updated: bool,
}

/// Stateful consumer of the agent's newline-delimited JSON stream.
///
/// Token accounting is incremental across `assistant` records and
/// REPLACED wholesale by the terminating `result` record. A fresh
/// parser is created per session so accumulators never leak.
#[derive(Debug, Default)]
pub struct StreamParser {
    usage: UsageTotals,
    api_calls: u64,
    completed: bool,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn usage(&self) -> &UsageTotals {
        &self.usage
    }

    pub fn api_calls(&self) -> u64 {
        self.api_calls
    }

    /// True once any assistant text contained the completion signal.
    pub fn completed(&self) -> bool {
        self.completed
    }

    /// Clear the completion flag before re-running the agent within
    /// the same session; usage accumulators survive the reset.
    pub fn reset_completion(&mut self) {
        self.completed = false;
    }

    pub fn parse_line(&mut self, line: &str) -> LineOutcome {
        let mut outcome = LineOutcome::default();
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return outcome;
        }

        let record: AgentRecord = match serde_json::from_str(trimmed) {
            Ok(record) => record,
            Err(_) => {
                outcome
                    .actions
                    .push(StreamAction::RawOutput(trimmed.to_string()));
                return outcome;
            }
        };

        match record {
            AgentRecord::Assistant(assistant) => {
                self.api_calls += 1;

                if let Some(usage) = assistant.message.usage {
                    self.usage.accumulate(&usage.into());
                    outcome.usage_updated = true;
                }

                let mut text = String::new();
                for block in assistant.message.content {
                    match block {
                        ContentBlock::Text { text: chunk } => text.push_str(&chunk),
                        ContentBlock::ToolUse { name, input, .. } => {
                            outcome.actions.push(StreamAction::ToolUse { name, input });
                        }
                        ContentBlock::Unknown => {}
                    }
                }

                if !text.is_empty() {
                    if text.to_uppercase().contains(COMPLETION_SIGNAL) {
                        self.completed = true;
                    }
                    outcome.actions.push(StreamAction::AssistantText(text));
                }
            }

            AgentRecord::Result(result) => {
                if let Some(usage) = result.usage {
                    self.usage.replace(&usage.into());
                    outcome.usage_updated = true;
                }
                let text = match result.result {
                    Some(Value::String(s)) => s,
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                outcome.actions.push(StreamAction::ToolResult(truncate_chars(
                    &text,
                    TOOL_RESULT_MAX_CHARS,
                )));
            }

            AgentRecord::Error(error) => {
                let message = error
                    .error
                    .message
                    .unwrap_or_else(|| "Unknown error".to_string());
                outcome.actions.push(StreamAction::SystemError(message));
            }

            AgentRecord::Unknown => {
                outcome
                    .actions
                    .push(StreamAction::RawOutput(trimmed.to_string()));
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assistant_line(content: Value, usage: Option<Value>) -> String {
        let mut message = json!({ "content": content });
        if let Some(usage) = usage {
            message["usage"] = usage;
        }
        json!({ "type": "assistant", "message": message }).to_string()
    }

    #[test]
    fn assistant_text_is_buffered_per_record() {
        let mut parser = StreamParser::new();
        let line = assistant_line(
            json!([
                { "type": "text", "text": "working " },
                { "type": "text", "text": "on it" },
            ]),
            None,
        );
        let outcome = parser.parse_line(&line);
        assert_eq!(
            outcome.actions,
            vec![StreamAction::AssistantText("working on it".to_string())]
        );
        assert!(!parser.completed());
        assert_eq!(parser.api_calls(), 1);
    }

    #[test]
    fn completion_signal_is_case_insensitive() {
        let mut parser = StreamParser::new();
        let line = assistant_line(json!([{ "type": "text", "text": "done. task completed" }]), None);
        parser.parse_line(&line);
        assert!(parser.completed());
    }

    #[test]
    fn tool_use_blocks_become_actions() {
        let mut parser = StreamParser::new();
        let line = assistant_line(
            json!([{ "type": "tool_use", "id": "t1", "name": "bash", "input": {"command": "ls"} }]),
            None,
        );
        let outcome = parser.parse_line(&line);
        match &outcome.actions[0] {
            StreamAction::ToolUse { name, input } => {
                assert_eq!(name, "bash");
                assert_eq!(input["command"], "ls");
            }
            other => panic!("unexpected action: {:?}", other),
        }
    }

    #[test]
    fn usage_accumulates_then_result_replaces() {
        let mut parser = StreamParser::new();
        for _ in 0..2 {
            let line = assistant_line(
                json!([{ "type": "text", "text": "hi" }]),
                Some(json!({ "input_tokens": 100, "output_tokens": 10 })),
            );
            let outcome = parser.parse_line(&line);
            assert!(outcome.usage_updated);
        }
        assert_eq!(parser.usage().total(), 220);
        assert_eq!(parser.api_calls(), 2);

        let result = json!({
            "type": "result",
            "usage": { "input_tokens": 500, "output_tokens": 40, "cache_read_input_tokens": 9 },
            "result": "all done"
        })
        .to_string();
        let outcome = parser.parse_line(&result);
        assert!(outcome.usage_updated);
        assert_eq!(parser.usage().total(), 540);
        assert_eq!(parser.usage().cache_read_tokens, 9);
        assert_eq!(
            outcome.actions,
            vec![StreamAction::ToolResult("all done".to_string())]
        );
    }

    #[test]
    fn object_results_are_serialized_and_capped() {
        let mut parser = StreamParser::new();
        let result = json!({
            "type": "result",
            "result": { "big": "y".repeat(6000) }
        })
        .to_string();
        let outcome = parser.parse_line(&result);
        match &outcome.actions[0] {
            StreamAction::ToolResult(text) => {
                assert!(text.starts_with("{\"big\""));
                assert_eq!(text.chars().count(), TOOL_RESULT_MAX_CHARS);
            }
            other => panic!("unexpected action: {:?}", other),
        }
    }

    #[test]
    fn error_records_become_system_messages() {
        let mut parser = StreamParser::new();
        let line = json!({ "type": "error", "error": { "message": "rate limited" } }).to_string();
        let outcome = parser.parse_line(&line);
        assert_eq!(
            outcome.actions,
            vec![StreamAction::SystemError("rate limited".to_string())]
        );
    }

    #[test]
    fn invalid_json_becomes_raw_output() {
        let mut parser = StreamParser::new();
        let outcome = parser.parse_line("not json at all");
        assert_eq!(
            outcome.actions,
            vec![StreamAction::RawOutput("not json at all".to_string())]
        );
        assert!(parser.parse_line("   ").actions.is_empty());
    }

    #[test]
    fn unknown_record_kinds_are_preserved() {
        let mut parser = StreamParser::new();
        let line = json!({ "type": "system_init", "cwd": "/tmp" }).to_string();
        let outcome = parser.parse_line(&line);
        assert_eq!(outcome.actions.len(), 1);
        assert!(matches!(outcome.actions[0], StreamAction::RawOutput(_)));
    }
}
