use anyhow::Result;
use chrono::Utc;
use taskforge_store::{ProjectKnowledge, Store, UserPreferences};
use taskforge_types::{ConversationMessage, MessageRole, Project, Ticket, DEFAULT_PROJECT_ROOT};
use tracing::warn;

use crate::budget::ContextConfig;
use crate::project_map::{map_section, scan_project};

/// Result preview cap in the rendered history.
const RESULT_PREVIEW_CHARS: usize = 200;

/// Assembles the full prompt for an agent invocation: system preamble,
/// derived project memory, and the budgeted conversation history.
pub struct ContextBuilder {
    pub(crate) store: Store,
    pub(crate) config: ContextConfig,
    global_context: Option<String>,
}

impl ContextBuilder {
    pub fn new(store: Store, config: ContextConfig, global_context: Option<String>) -> Self {
        Self {
            store,
            config,
            global_context: global_context.filter(|text| !text.trim().is_empty()),
        }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Build the complete prompt for one agent run.
    pub fn build_prompt(&self, project: &Project, ticket: &Ticket) -> Result<String> {
        let mut sections: Vec<String> = Vec::new();

        sections.push(self.identity_section(project));

        if let Some(global) = &self.global_context {
            sections.push(format!(
                "=== SERVER ENVIRONMENT ===\n{}\n==========================",
                global.trim()
            ));
        }

        match self.store.user_preferences(&self.config.preferences_user) {
            Ok(Some(prefs)) => {
                if let Some(section) = preferences_section(&prefs) {
                    sections.push(section);
                }
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "user preferences unavailable"),
        }

        if let Some(section) = self.map_context(project) {
            sections.push(section);
        }

        match self.store.project_knowledge(project.id) {
            Ok(Some(knowledge)) => {
                if let Some(section) = knowledge_section(&knowledge) {
                    sections.push(section);
                }
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "project knowledge unavailable"),
        }

        match self.store.latest_extraction(ticket.id) {
            Ok(Some(extraction)) => sections.push(extraction_section(
                &extraction.important_notes,
                &extraction.decisions,
                &extraction.problems_solved,
                &extraction.files_modified,
                extraction.current_status.as_deref(),
                &extraction.blocking_issues,
                &extraction.error_patterns,
            )),
            Ok(None) => {}
            Err(err) => warn!(error = %err, "extraction unavailable"),
        }

        if let Some(db) = &project.database {
            sections.push(format!(
                "=== PROJECT DATABASE ===\nHost: {}\nDatabase: {}\nUsername: {}\nPassword: {}\n========================",
                db.host, db.name, db.user, db.password
            ));
        }

        if let Some(context) = project.context.as_deref().filter(|c| !c.trim().is_empty()) {
            sections.push(format!(
                "=== PROJECT CONTEXT ===\n{}\n=======================",
                context.trim()
            ));
        }
        if let Some(context) = ticket.context.as_deref().filter(|c| !c.trim().is_empty()) {
            sections.push(format!(
                "=== TICKET CONTEXT ===\n{}\n======================",
                context.trim()
            ));
        }

        sections.push(self.task_section(project, ticket));

        let history = self.smart_history(ticket.id)?;
        let mut prompt = sections.join("\n\n");
        prompt.push_str("\n\n--- Conversation History ---\n");
        prompt.push_str(&render_history(&history));
        prompt.push_str("\n\nContinue working on this task:");
        Ok(prompt)
    }

    fn identity_section(&self, project: &Project) -> String {
        let mut lines = vec![format!("You are working on project: {}", project.name)];
        if let Some(web) = &project.web_path {
            lines.push(format!("Web path: {}", web));
        }
        if let Some(app) = &project.app_path {
            lines.push(format!("App path: {}", app));
        }
        if project.web_path.is_none() && project.app_path.is_none() {
            lines.push("No paths configured".to_string());
        }
        if let Some(stack) = &project.tech_stack {
            lines.push(format!("Tech Stack: {}", stack));
        }
        lines.push(format!("Project Type: {}", project.project_type.as_str()));
        lines.join("\n")
    }

    fn task_section(&self, project: &Project, ticket: &Ticket) -> String {
        let allowed = project.allowed_paths();
        let allowed = if allowed.is_empty() {
            DEFAULT_PROJECT_ROOT.to_string()
        } else {
            allowed.join(" and ")
        };

        format!(
            "Ticket: {} - {}\n\n\
             IMPORTANT: You can ONLY create/modify files within: {}\n\
             Do NOT attempt to modify system files or files outside these directories.\n\n\
             Description:\n{}\n\n\
             Complete this task. When finished, say \"TASK COMPLETED\" with a summary.",
            ticket.ticket_number, ticket.title, allowed, ticket.description
        )
    }

    /// Cached project map section, regenerated when expired.
    fn map_context(&self, project: &Project) -> Option<String> {
        let now = Utc::now();
        match self.store.project_map(project.id, now) {
            Ok(Some(map)) => return Some(map_section(&map)),
            Ok(None) => {}
            Err(err) => {
                warn!(project = project.id, error = %err, "project map lookup failed");
                return None;
            }
        }

        let root = std::path::Path::new(project.primary_path());
        if !root.exists() {
            return None;
        }
        let map = scan_project(root, self.config.map_expiry_days);
        if let Err(err) = self.store.put_project_map(project.id, &map) {
            warn!(project = project.id, error = %err, "project map cache write failed");
        }
        Some(map_section(&map))
    }
}

fn preferences_section(prefs: &UserPreferences) -> Option<String> {
    let mut parts = vec!["=== USER PREFERENCES ===".to_string()];
    if let Some(language) = &prefs.language {
        parts.push(format!("Language: {}", language));
    }
    if let Some(style) = &prefs.response_style {
        parts.push(format!("Response style: {}", style));
    }
    if let Some(level) = &prefs.skill_level {
        parts.push(format!("Skill level: {}", level));
    }
    if let Some(instructions) = &prefs.custom_instructions {
        parts.push(format!("Instructions: {}", instructions));
    }
    if !prefs.learned_quirks.is_empty() {
        parts.push(format!("Notes: {}", prefs.learned_quirks.join("; ")));
    }
    if parts.len() == 1 {
        return None;
    }
    parts.push("========================".to_string());
    Some(parts.join("\n"))
}

fn knowledge_section(knowledge: &ProjectKnowledge) -> Option<String> {
    let mut parts = vec!["=== PROJECT KNOWLEDGE ===".to_string()];
    if !knowledge.known_gotchas.is_empty() {
        let shown: Vec<&str> = knowledge
            .known_gotchas
            .iter()
            .take(5)
            .map(String::as_str)
            .collect();
        parts.push(format!("Known Gotchas: {}", shown.join("; ")));
    }
    if !knowledge.error_solutions.is_empty() {
        for solution in knowledge.error_solutions.iter().take(3) {
            parts.push(format!("- {}", solution));
        }
    }
    if !knowledge.architecture_decisions.is_empty() {
        for decision in knowledge.architecture_decisions.iter().take(3) {
            parts.push(format!("- Decision: {}", decision));
        }
    }
    if parts.len() == 1 {
        return None;
    }
    parts.push("=========================".to_string());
    Some(parts.join("\n"))
}

#[allow(clippy::too_many_arguments)]
fn extraction_section(
    important_notes: &[String],
    decisions: &[String],
    problems: &[String],
    files: &[String],
    current_status: Option<&str>,
    blocking: &[String],
    error_patterns: &[String],
) -> String {
    let mut parts = vec!["=== PREVIOUS WORK ON THIS TICKET ===".to_string()];

    // Important notes lead the section so they survive every rebuild.
    if !important_notes.is_empty() {
        parts.push("\nIMPORTANT - ALWAYS REMEMBER:".to_string());
        for note in important_notes.iter().take(10) {
            parts.push(format!("  * {}", note));
        }
        parts.push(String::new());
    }

    if !decisions.is_empty() {
        parts.push("Decisions made:".to_string());
        for decision in decisions.iter().take(5) {
            parts.push(format!("  - {}", decision));
        }
    }
    if !problems.is_empty() {
        parts.push("Problems solved:".to_string());
        for problem in problems.iter().take(5) {
            parts.push(format!("  - {}", problem));
        }
    }
    if !files.is_empty() {
        let shown: Vec<&str> = files.iter().take(10).map(String::as_str).collect();
        parts.push(format!("Files modified: {}", shown.join(", ")));
    }
    if let Some(status) = current_status {
        parts.push(format!("Current status: {}", status));
    }
    if !blocking.is_empty() {
        parts.push(format!("Blocking: {}", blocking.join(", ")));
    }
    if !error_patterns.is_empty() {
        parts.push("Known error patterns:".to_string());
        for pattern in error_patterns.iter().take(3) {
            parts.push(format!("  - {}", pattern));
        }
    }

    parts.push("=====================================".to_string());
    parts.join("\n")
}

fn render_history(history: &[ConversationMessage]) -> String {
    let mut lines = Vec::new();
    for message in history {
        match message.role {
            MessageRole::User => {
                lines.push(format!("User: {}", message.content.as_deref().unwrap_or("")));
            }
            MessageRole::Assistant => {
                lines.push(format!(
                    "Assistant: {}",
                    message.content.as_deref().unwrap_or("")
                ));
            }
            MessageRole::ToolUse => {
                lines.push(format!(
                    "[Used tool: {}]",
                    message.tool_name.as_deref().unwrap_or("unknown")
                ));
            }
            MessageRole::ToolResult => {
                let result = message.content.as_deref().unwrap_or("");
                if result.chars().count() > RESULT_PREVIEW_CHARS {
                    lines.push(format!(
                        "[Result: {}...]",
                        taskforge_types::truncate_chars(result, RESULT_PREVIEW_CHARS)
                    ));
                } else {
                    lines.push(format!("[Result: {}]", result));
                }
            }
            MessageRole::System => {
                lines.push(format!(
                    "[System: {}]",
                    message.content.as_deref().unwrap_or("")
                ));
            }
        }
    }
    lines.join("\n")
}
