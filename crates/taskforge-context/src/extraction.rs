use std::sync::OnceLock;

use anyhow::Result;
use regex::Regex;
use serde::Deserialize;
use taskforge_store::NewExtraction;
use taskforge_types::{estimate_tokens, ConversationMessage, MessageRole};
use tracing::{debug, warn};

use crate::aux::{run_aux_model, strip_code_fences};
use crate::preamble::ContextBuilder;

/// How many trailing messages the summarizer sees.
const SUMMARY_WINDOW: usize = 30;

/// Per-message cap inside the summarizer prompt.
const SUMMARY_MESSAGE_CHARS: usize = 2_000;

fn file_mention_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[\w./-]+\.(?:py|js|ts|jsx|tsx|php|html|css|sql|json|yaml|yml|md|rs|go|toml)")
            .expect("file mention regex")
    })
}

/// Strict response shape demanded from the auxiliary model.
#[derive(Debug, Default, Deserialize)]
struct SummaryFields {
    #[serde(default)]
    decisions: Vec<String>,
    #[serde(default)]
    problems_solved: Vec<String>,
    #[serde(default)]
    current_status: String,
    #[serde(default)]
    key_info: String,
    #[serde(default)]
    important_notes: Vec<String>,
}

fn summary_prompt(conversation: &[String], files: &[String]) -> String {
    let window_start = conversation.len().saturating_sub(SUMMARY_WINDOW);
    format!(
        r#"Analyze this conversation and extract key information in JSON format.

CONVERSATION:
{conversation}

FILES MENTIONED: {files}

Respond with ONLY a JSON object (no markdown, no explanation):
{{
    "decisions": ["decision 1", "decision 2"],
    "problems_solved": ["problem 1: solution", "problem 2: solution"],
    "current_status": "Brief status of where things stand",
    "key_info": "Most important technical details to remember (configs, values, patterns used)",
    "important_notes": ["note 1", "note 2"]
}}

IMPORTANT_NOTES EXTRACTION:
Extract any user instructions, warnings, rules, or things to always remember.
Understand the SEMANTIC MEANING, not just keywords. Look for:
- Explicit rules ("never do X", "always do Y")
- Warnings about gotchas, pitfalls, or things to avoid
- User preferences expressed strongly or repeatedly
- Constraints or limitations the user mentioned
- Things the user emphasized (via caps, repetition, or strong language)
- Any instruction about HOW the AI should behave or work

These notes will be shown to the AI in EVERY future conversation about this ticket.

Keep each item concise (under 100 chars). Focus on technical decisions and implementations."#,
        conversation = conversation[window_start..].join("\n"),
        files = if files.is_empty() {
            "None".to_string()
        } else {
            files.iter().take(20).cloned().collect::<Vec<_>>().join(", ")
        },
    )
}

impl ContextBuilder {
    /// Fold a prefix of older messages into one ConversationExtraction.
    /// The covered messages are flagged summarized in the same store
    /// transaction; an aux-model failure falls back to a structural
    /// summary rather than losing the fold.
    pub fn create_extraction(&self, ticket_id: i64, messages: &[ConversationMessage]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        debug!(ticket_id, count = messages.len(), "creating extraction");

        let mut conversation = Vec::new();
        let mut files: Vec<String> = Vec::new();
        for message in messages {
            let Some(content) = message.content.as_deref() else {
                continue;
            };
            if matches!(message.role, MessageRole::User | MessageRole::Assistant) {
                conversation.push(format!(
                    "[{}]: {}",
                    message.role.as_str().to_uppercase(),
                    taskforge_types::truncate_chars(content, SUMMARY_MESSAGE_CHARS)
                ));
            }
            for found in file_mention_re().find_iter(content) {
                let path = found.as_str().to_string();
                if !files.contains(&path) {
                    files.push(path);
                }
            }
        }

        let tokens_before: u64 = messages
            .iter()
            .map(|m| {
                if m.token_count > 0 {
                    m.token_count as u64
                } else {
                    estimate_tokens(m.content.as_deref().unwrap_or(""))
                }
            })
            .sum();

        let summary = self.summarize(&conversation, &files).unwrap_or_else(|err| {
            warn!(ticket_id, error = %err, "aux summarization failed, structural fallback");
            SummaryFields {
                current_status: format!("Processed {} messages", messages.len()),
                ..Default::default()
            }
        });

        let current_status = if summary.current_status.is_empty() {
            format!("Processed {} messages", messages.len())
        } else {
            summary.current_status.clone()
        };
        let key_info = if summary.key_info.is_empty() {
            Vec::new()
        } else {
            vec![summary.key_info.clone()]
        };

        let decisions: Vec<String> = summary.decisions.iter().take(10).cloned().collect();
        let problems: Vec<String> = summary.problems_solved.iter().take(10).cloned().collect();
        let notes: Vec<String> = summary.important_notes.iter().take(15).cloned().collect();

        let tokens_after = estimate_tokens(&format!(
            "{} {} {}",
            decisions.join(" "),
            problems.join(" "),
            current_status
        ));

        let extraction = NewExtraction {
            ticket_id,
            decisions: decisions.clone(),
            problems_solved: problems.clone(),
            files_modified: files.iter().take(20).cloned().collect(),
            blocking_issues: Vec::new(),
            important_notes: notes.clone(),
            error_patterns: Vec::new(),
            key_info,
            current_status: Some(current_status),
            tokens_before: tokens_before as i64,
            tokens_after: tokens_after as i64,
            covered_message_ids: messages.iter().map(|m| m.id).collect(),
        };
        self.store.insert_extraction(&extraction)?;

        debug!(
            ticket_id,
            tokens_before, tokens_after, "extraction created"
        );

        // Fold the learnings into durable project knowledge.
        if let Some(ticket) = self.store.get_ticket(ticket_id)? {
            if let Err(err) = self.store.merge_project_knowledge(
                ticket.project_id,
                &notes,
                &problems,
                &decisions,
                ticket_id,
            ) {
                warn!(ticket_id, error = %err, "project knowledge update failed");
            }
        }

        Ok(())
    }

    fn summarize(&self, conversation: &[String], files: &[String]) -> Result<SummaryFields> {
        let prompt = summary_prompt(conversation, files);
        let response = run_aux_model(
            &self.config.claude_bin,
            &self.config.aux_model,
            &prompt,
            self.config.aux_timeout,
        )?;
        let fields: SummaryFields = serde_json::from_str(&strip_code_fences(&response))?;
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_mentions_are_extracted() {
        let re = file_mention_re();
        let text = "edited src/app.py and web/index.js, left README alone";
        let found: Vec<&str> = re.find_iter(text).map(|m| m.as_str()).collect();
        assert_eq!(found, vec!["src/app.py", "web/index.js"]);
    }

    #[test]
    fn summary_prompt_limits_window() {
        let conversation: Vec<String> = (0..50).map(|i| format!("[USER]: m{}", i)).collect();
        let prompt = summary_prompt(&conversation, &[]);
        assert!(!prompt.contains("m19"));
        assert!(prompt.contains("m20"));
        assert!(prompt.contains("m49"));
    }
}
