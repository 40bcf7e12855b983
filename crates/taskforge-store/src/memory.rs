use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{now_text, parse_ts, parse_ts_opt, ts_text, Store};
use crate::records::{ExtractionRecord, NewExtraction, ProjectKnowledge, ProjectMapRecord, UserPreferences};
use crate::Result;

/// Per-category cap on accumulated knowledge items.
const KNOWLEDGE_CAP: usize = 20;

/// Cap on the learned-from ticket id list.
const KNOWLEDGE_TICKET_CAP: usize = 50;

fn json_list(text: &str) -> Vec<String> {
    serde_json::from_str(text).unwrap_or_default()
}

fn json_ids(text: &str) -> Vec<i64> {
    serde_json::from_str(text).unwrap_or_default()
}

fn extraction_from_row(row: &Row<'_>) -> rusqlite::Result<ExtractionRecord> {
    Ok(ExtractionRecord {
        id: row.get(0)?,
        ticket_id: row.get(1)?,
        decisions: json_list(&row.get::<_, String>(2)?),
        problems_solved: json_list(&row.get::<_, String>(3)?),
        files_modified: json_list(&row.get::<_, String>(4)?),
        blocking_issues: json_list(&row.get::<_, String>(5)?),
        important_notes: json_list(&row.get::<_, String>(6)?),
        error_patterns: json_list(&row.get::<_, String>(7)?),
        key_info: json_list(&row.get::<_, String>(8)?),
        current_status: row.get(9)?,
        covers_msg_from_id: row.get(10)?,
        covers_msg_to_id: row.get(11)?,
        messages_summarized: row.get(12)?,
        tokens_before: row.get(13)?,
        tokens_after: row.get(14)?,
        created_at: parse_ts(&row.get::<_, String>(15)?),
    })
}

/// Append new items to a list, skipping duplicates and keeping the
/// most recent `cap` entries.
fn merge_capped(existing: &mut Vec<String>, incoming: &[String], cap: usize) {
    for item in incoming {
        if !item.is_empty() && !existing.contains(item) {
            existing.push(item.clone());
        }
    }
    if existing.len() > cap {
        let drop = existing.len() - cap;
        existing.drain(..drop);
    }
}

impl Store {
    // ------------------------------------------------------------------
    // Conversation extractions
    // ------------------------------------------------------------------

    pub fn latest_extraction(&self, ticket_id: i64) -> Result<Option<ExtractionRecord>> {
        let conn = self.conn()?;
        let extraction = conn
            .query_row(
                r#"
                SELECT id, ticket_id, decisions, problems_solved, files_modified,
                       blocking_issues, important_notes, error_patterns, key_info,
                       current_status, covers_msg_from_id, covers_msg_to_id,
                       messages_summarized, tokens_before, tokens_after, created_at
                FROM conversation_extractions
                WHERE ticket_id = ?1
                ORDER BY created_at DESC, id DESC
                LIMIT 1
                "#,
                [ticket_id],
                extraction_from_row,
            )
            .optional()?;
        Ok(extraction)
    }

    /// Insert an extraction and flag the covered messages summarized in
    /// the same transaction. Re-running over an already-summarized
    /// range is a no-op because those messages are never selected again.
    pub fn insert_extraction(&self, new: &NewExtraction) -> Result<i64> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO conversation_extractions
                (ticket_id, decisions, problems_solved, files_modified, blocking_issues,
                 important_notes, error_patterns, key_info, current_status,
                 covers_msg_from_id, covers_msg_to_id, messages_summarized,
                 tokens_before, tokens_after, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
            params![
                new.ticket_id,
                serde_json::to_string(&new.decisions)?,
                serde_json::to_string(&new.problems_solved)?,
                serde_json::to_string(&new.files_modified)?,
                serde_json::to_string(&new.blocking_issues)?,
                serde_json::to_string(&new.important_notes)?,
                serde_json::to_string(&new.error_patterns)?,
                serde_json::to_string(&new.key_info)?,
                new.current_status,
                new.covered_message_ids.first(),
                new.covered_message_ids.last(),
                new.covered_message_ids.len() as i64,
                new.tokens_before,
                new.tokens_after,
                now_text(),
            ],
        )?;
        let id = tx.last_insert_rowid();

        for message_id in &new.covered_message_ids {
            tx.execute(
                "UPDATE conversation_messages SET is_summarized = 1 WHERE id = ?1",
                [message_id],
            )?;
        }
        tx.commit()?;
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Project knowledge
    // ------------------------------------------------------------------

    pub fn project_knowledge(&self, project_id: i64) -> Result<Option<ProjectKnowledge>> {
        let conn = self.conn()?;
        let knowledge = conn
            .query_row(
                r#"
                SELECT known_gotchas, error_solutions, architecture_decisions, learned_from_tickets
                FROM project_knowledge WHERE project_id = ?1
                "#,
                [project_id],
                |row| {
                    Ok(ProjectKnowledge {
                        known_gotchas: json_list(&row.get::<_, String>(0)?),
                        error_solutions: json_list(&row.get::<_, String>(1)?),
                        architecture_decisions: json_list(&row.get::<_, String>(2)?),
                        learned_from_tickets: json_ids(&row.get::<_, String>(3)?),
                    })
                },
            )
            .optional()?;
        Ok(knowledge)
    }

    /// Merge learnings from a ticket's extraction into the project's
    /// accumulated knowledge, deduplicated and tail-capped.
    pub fn merge_project_knowledge(
        &self,
        project_id: i64,
        gotchas: &[String],
        error_solutions: &[String],
        decisions: &[String],
        ticket_id: i64,
    ) -> Result<()> {
        let mut knowledge = self.project_knowledge(project_id)?.unwrap_or_default();

        merge_capped(&mut knowledge.known_gotchas, gotchas, KNOWLEDGE_CAP);
        merge_capped(&mut knowledge.error_solutions, error_solutions, KNOWLEDGE_CAP);
        merge_capped(&mut knowledge.architecture_decisions, decisions, KNOWLEDGE_CAP);
        if !knowledge.learned_from_tickets.contains(&ticket_id) {
            knowledge.learned_from_tickets.push(ticket_id);
        }
        if knowledge.learned_from_tickets.len() > KNOWLEDGE_TICKET_CAP {
            let drop = knowledge.learned_from_tickets.len() - KNOWLEDGE_TICKET_CAP;
            knowledge.learned_from_tickets.drain(..drop);
        }

        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO project_knowledge
                (project_id, known_gotchas, error_solutions, architecture_decisions,
                 learned_from_tickets, last_updated)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(project_id) DO UPDATE SET
                known_gotchas = ?2,
                error_solutions = ?3,
                architecture_decisions = ?4,
                learned_from_tickets = ?5,
                last_updated = ?6
            "#,
            params![
                project_id,
                serde_json::to_string(&knowledge.known_gotchas)?,
                serde_json::to_string(&knowledge.error_solutions)?,
                serde_json::to_string(&knowledge.architecture_decisions)?,
                serde_json::to_string(&knowledge.learned_from_tickets)?,
                now_text(),
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Project maps
    // ------------------------------------------------------------------

    /// Cached project map, only when it has not expired.
    pub fn project_map(
        &self,
        project_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<ProjectMapRecord>> {
        let conn = self.conn()?;
        let map = conn
            .query_row(
                r#"
                SELECT structure_summary, entry_points, tech_stack, primary_language,
                       file_count, total_size_kb, generated_at, expires_at
                FROM project_maps
                WHERE project_id = ?1 AND (expires_at IS NULL OR expires_at > ?2)
                "#,
                params![project_id, ts_text(now)],
                |row| {
                    Ok(ProjectMapRecord {
                        structure_summary: row.get(0)?,
                        entry_points: json_list(&row.get::<_, String>(1)?),
                        tech_stack: json_list(&row.get::<_, String>(2)?),
                        primary_language: row.get(3)?,
                        file_count: row.get(4)?,
                        total_size_kb: row.get(5)?,
                        generated_at: parse_ts(&row.get::<_, String>(6)?),
                        expires_at: parse_ts_opt(row.get(7)?),
                    })
                },
            )
            .optional()?;
        Ok(map)
    }

    pub fn put_project_map(&self, project_id: i64, map: &ProjectMapRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO project_maps
                (project_id, structure_summary, entry_points, tech_stack, primary_language,
                 file_count, total_size_kb, generated_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(project_id) DO UPDATE SET
                structure_summary = ?2,
                entry_points = ?3,
                tech_stack = ?4,
                primary_language = ?5,
                file_count = ?6,
                total_size_kb = ?7,
                generated_at = ?8,
                expires_at = ?9
            "#,
            params![
                project_id,
                map.structure_summary,
                serde_json::to_string(&map.entry_points)?,
                serde_json::to_string(&map.tech_stack)?,
                map.primary_language,
                map.file_count,
                map.total_size_kb,
                ts_text(map.generated_at),
                map.expires_at.map(ts_text),
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // User preferences (written by external tools, read-only here)
    // ------------------------------------------------------------------

    pub fn user_preferences(&self, user_id: &str) -> Result<Option<UserPreferences>> {
        let conn = self.conn()?;
        let prefs = conn
            .query_row(
                r#"
                SELECT language, response_style, skill_level, custom_instructions, learned_quirks
                FROM user_preferences WHERE user_id = ?1
                "#,
                [user_id],
                |row| {
                    Ok(UserPreferences {
                        language: row.get(0)?,
                        response_style: row.get(1)?,
                        skill_level: row.get(2)?,
                        custom_instructions: row.get(3)?,
                        learned_quirks: json_list(&row.get::<_, String>(4)?),
                    })
                },
            )
            .optional()?;
        Ok(prefs)
    }
}
