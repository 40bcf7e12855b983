use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taskforge_types::{Priority, ProjectDatabase, ProjectType};

/// Input for project creation (normally the admin tool's job; the
/// daemon needs it for recovery tooling and tests).
#[derive(Debug, Clone, Default)]
pub struct NewProject {
    pub name: String,
    pub code: String,
    pub project_type: Option<ProjectType>,
    pub web_path: Option<String>,
    pub app_path: Option<String>,
    pub tech_stack: Option<String>,
    pub context: Option<String>,
    pub database: Option<ProjectDatabase>,
    pub model: Option<String>,
}

/// Input for ticket creation. The ticket number is allocated inside
/// the creating transaction.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub project_id: i64,
    pub title: String,
    pub description: String,
    pub context: Option<String>,
    pub priority: Priority,
    pub model: Option<String>,
}

impl NewTicket {
    pub fn new(project_id: i64, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            project_id,
            title: title.into(),
            description: description.into(),
            context: None,
            priority: Priority::Medium,
            model: None,
        }
    }
}

/// Immutable summary of a contiguous range of older messages,
/// replayed at the top of every future prompt for the ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRecord {
    pub id: i64,
    pub ticket_id: i64,
    pub decisions: Vec<String>,
    pub problems_solved: Vec<String>,
    pub files_modified: Vec<String>,
    pub blocking_issues: Vec<String>,
    pub important_notes: Vec<String>,
    pub error_patterns: Vec<String>,
    pub key_info: Vec<String>,
    pub current_status: Option<String>,
    pub covers_msg_from_id: Option<i64>,
    pub covers_msg_to_id: Option<i64>,
    pub messages_summarized: i64,
    pub tokens_before: i64,
    pub tokens_after: i64,
    pub created_at: DateTime<Utc>,
}

/// A fresh extraction plus the message ids it covers; inserting it
/// flags those messages summarized in the same transaction.
#[derive(Debug, Clone, Default)]
pub struct NewExtraction {
    pub ticket_id: i64,
    pub decisions: Vec<String>,
    pub problems_solved: Vec<String>,
    pub files_modified: Vec<String>,
    pub blocking_issues: Vec<String>,
    pub important_notes: Vec<String>,
    pub error_patterns: Vec<String>,
    pub key_info: Vec<String>,
    pub current_status: Option<String>,
    pub tokens_before: i64,
    pub tokens_after: i64,
    pub covered_message_ids: Vec<i64>,
}

/// Accumulated per-project learnings, merged from ticket extractions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectKnowledge {
    pub known_gotchas: Vec<String>,
    pub error_solutions: Vec<String>,
    pub architecture_decisions: Vec<String>,
    pub learned_from_tickets: Vec<i64>,
}

/// Cached filesystem snapshot of a project, regenerated on expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMapRecord {
    pub structure_summary: Option<String>,
    pub entry_points: Vec<String>,
    pub tech_stack: Vec<String>,
    pub primary_language: Option<String>,
    pub file_count: i64,
    pub total_size_kb: i64,
    pub generated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Per-user preferences surfaced in the prompt preamble; written by
/// external tools only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPreferences {
    pub language: Option<String>,
    pub response_style: Option<String>,
    pub skill_level: Option<String>,
    pub custom_instructions: Option<String>,
    pub learned_quirks: Vec<String>,
}
