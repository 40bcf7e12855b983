use serde::Deserialize;
use serde_json::Value;

use taskforge_types::UsageTotals;

/// One newline-delimited record of the agent's stream-json output.
/// The upstream agent adds record kinds over time; unknown kinds are
/// preserved as raw diagnostic output, never an error.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum AgentRecord {
    Assistant(AssistantRecord),
    Result(ResultRecord),
    Error(ErrorRecord),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssistantRecord {
    #[serde(default)]
    pub message: AssistantMessage,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub usage: Option<UsageDelta>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        #[serde(default)]
        id: Option<String>,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Unknown,
}

/// Terminating record: carries the authoritative usage totals for the
/// whole session, replacing whatever was accumulated incrementally.
#[derive(Debug, Deserialize, Clone)]
pub struct ResultRecord {
    #[serde(default)]
    pub usage: Option<UsageDelta>,
    #[serde(default)]
    pub result: Option<Value>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ErrorRecord {
    #[serde(default)]
    pub error: ErrorBody,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
}

/// Incremental usage counters as reported on a single record.
#[derive(Debug, Deserialize, Clone, Copy, Default)]
pub struct UsageDelta {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
}

impl From<UsageDelta> for UsageTotals {
    fn from(delta: UsageDelta) -> Self {
        UsageTotals {
            input_tokens: delta.input_tokens,
            output_tokens: delta.output_tokens,
            cache_read_tokens: delta.cache_read_input_tokens,
            cache_creation_tokens: delta.cache_creation_input_tokens,
        }
    }
}
