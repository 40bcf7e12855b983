use rusqlite::Connection;

use crate::Result;

// Schema version (increment when changing table definitions)
pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            code TEXT NOT NULL UNIQUE,
            project_type TEXT NOT NULL DEFAULT 'other',
            web_path TEXT,
            app_path TEXT,
            tech_stack TEXT,
            context TEXT,
            db_host TEXT,
            db_name TEXT,
            db_user TEXT,
            db_password TEXT,
            model TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            total_tokens INTEGER NOT NULL DEFAULT 0,
            total_duration_seconds INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tickets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id INTEGER NOT NULL,
            ticket_number TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            context TEXT,
            priority TEXT NOT NULL DEFAULT 'medium',
            status TEXT NOT NULL DEFAULT 'new',
            model TEXT,
            review_deadline TEXT,
            close_reason TEXT,
            result_summary TEXT,
            total_tokens INTEGER NOT NULL DEFAULT 0,
            total_duration_seconds INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (project_id, ticket_number),
            FOREIGN KEY (project_id) REFERENCES projects(id)
        );

        CREATE TABLE IF NOT EXISTS conversation_messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ticket_id INTEGER NOT NULL,
            session_id INTEGER,
            role TEXT NOT NULL,
            content TEXT,
            tool_name TEXT,
            tool_input TEXT,
            token_count INTEGER NOT NULL DEFAULT 0,
            is_summarized INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            FOREIGN KEY (ticket_id) REFERENCES tickets(id)
        );

        CREATE TABLE IF NOT EXISTS conversation_extractions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ticket_id INTEGER NOT NULL,
            decisions TEXT NOT NULL DEFAULT '[]',
            problems_solved TEXT NOT NULL DEFAULT '[]',
            files_modified TEXT NOT NULL DEFAULT '[]',
            blocking_issues TEXT NOT NULL DEFAULT '[]',
            important_notes TEXT NOT NULL DEFAULT '[]',
            error_patterns TEXT NOT NULL DEFAULT '[]',
            key_info TEXT NOT NULL DEFAULT '[]',
            current_status TEXT,
            covers_msg_from_id INTEGER,
            covers_msg_to_id INTEGER,
            messages_summarized INTEGER NOT NULL DEFAULT 0,
            tokens_before INTEGER NOT NULL DEFAULT 0,
            tokens_after INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            FOREIGN KEY (ticket_id) REFERENCES tickets(id)
        );

        CREATE TABLE IF NOT EXISTS execution_sessions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ticket_id INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'running',
            started_at TEXT NOT NULL,
            ended_at TEXT,
            tokens_used INTEGER NOT NULL DEFAULT 0,
            api_calls INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (ticket_id) REFERENCES tickets(id)
        );

        CREATE TABLE IF NOT EXISTS usage_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ticket_id INTEGER NOT NULL,
            project_id INTEGER NOT NULL,
            session_id INTEGER,
            input_tokens INTEGER NOT NULL DEFAULT 0,
            output_tokens INTEGER NOT NULL DEFAULT 0,
            total_tokens INTEGER NOT NULL DEFAULT 0,
            cache_read_tokens INTEGER NOT NULL DEFAULT 0,
            cache_creation_tokens INTEGER NOT NULL DEFAULT 0,
            duration_seconds INTEGER NOT NULL DEFAULT 0,
            api_calls INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS user_messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ticket_id INTEGER NOT NULL,
            content TEXT NOT NULL,
            message_type TEXT NOT NULL DEFAULT 'message',
            processed INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            FOREIGN KEY (ticket_id) REFERENCES tickets(id)
        );

        CREATE TABLE IF NOT EXISTS project_knowledge (
            project_id INTEGER PRIMARY KEY,
            known_gotchas TEXT NOT NULL DEFAULT '[]',
            error_solutions TEXT NOT NULL DEFAULT '[]',
            architecture_decisions TEXT NOT NULL DEFAULT '[]',
            learned_from_tickets TEXT NOT NULL DEFAULT '[]',
            last_updated TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS project_maps (
            project_id INTEGER PRIMARY KEY,
            structure_summary TEXT,
            entry_points TEXT NOT NULL DEFAULT '[]',
            tech_stack TEXT NOT NULL DEFAULT '[]',
            primary_language TEXT,
            file_count INTEGER NOT NULL DEFAULT 0,
            total_size_kb INTEGER NOT NULL DEFAULT 0,
            generated_at TEXT NOT NULL,
            expires_at TEXT
        );

        CREATE TABLE IF NOT EXISTS user_preferences (
            user_id TEXT PRIMARY KEY,
            language TEXT,
            response_style TEXT,
            skill_level TEXT,
            custom_instructions TEXT,
            learned_quirks TEXT NOT NULL DEFAULT '[]'
        );

        CREATE TABLE IF NOT EXISTS daemon_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            level TEXT NOT NULL,
            message TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS execution_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id INTEGER NOT NULL,
            log_type TEXT NOT NULL,
            message TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_tickets_project_status ON tickets(project_id, status);
        CREATE INDEX IF NOT EXISTS idx_messages_ticket ON conversation_messages(ticket_id, is_summarized);
        CREATE INDEX IF NOT EXISTS idx_sessions_ticket ON execution_sessions(ticket_id, status);
        CREATE INDEX IF NOT EXISTS idx_user_messages_pending ON user_messages(ticket_id, processed);
        CREATE INDEX IF NOT EXISTS idx_extractions_ticket ON conversation_extractions(ticket_id);
        "#,
    )?;

    conn.execute(&format!("PRAGMA user_version = {}", SCHEMA_VERSION), [])?;

    Ok(())
}
