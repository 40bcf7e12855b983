mod parser;
mod schema;

pub use parser::{LineOutcome, StreamAction, StreamParser, COMPLETION_SIGNAL, TOOL_RESULT_MAX_CHARS};
pub use schema::{AgentRecord, AssistantMessage, ContentBlock, ErrorBody, UsageDelta};
