use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use taskforge_types::{
    ConversationMessage, ExecutionSession, MessageRole, NewMessage, QueuedMessage,
    QueuedMessageType, SessionStatus, Ticket, UsageTotals,
};

use crate::db::{now_text, parse_ts, parse_ts_opt, ticket_from_row, Store, TICKET_COLS};
use crate::{Error, Result};

/// Execution-log message cap.
const MAX_LOG_CHARS: usize = 10_000;

const MESSAGE_COLS: &str = "id, ticket_id, session_id, role, content, tool_name, tool_input, \
     token_count, is_summarized, created_at";

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<ConversationMessage> {
    Ok(ConversationMessage {
        id: row.get(0)?,
        ticket_id: row.get(1)?,
        session_id: row.get(2)?,
        role: MessageRole::parse(&row.get::<_, String>(3)?).unwrap_or(MessageRole::System),
        content: row.get(4)?,
        tool_name: row.get(5)?,
        tool_input: row.get(6)?,
        token_count: row.get(7)?,
        is_summarized: row.get(8)?,
        created_at: parse_ts(&row.get::<_, String>(9)?),
    })
}

impl Store {
    // ------------------------------------------------------------------
    // Conversation messages
    // ------------------------------------------------------------------

    /// Append one transcript message, capping content and filling in an
    /// estimated token count when no authoritative one is given.
    pub fn append_message(
        &self,
        ticket_id: i64,
        session_id: Option<i64>,
        new: &NewMessage,
    ) -> Result<ConversationMessage> {
        let conn = self.conn()?;
        let tool_input = new.tool_input.as_ref().map(|v| v.to_string());
        conn.execute(
            r#"
            INSERT INTO conversation_messages
                (ticket_id, session_id, role, content, tool_name, tool_input,
                 token_count, is_summarized, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8)
            "#,
            params![
                ticket_id,
                session_id,
                new.role.as_str(),
                new.capped_content(),
                new.tool_name,
                tool_input,
                new.token_count() as i64,
                now_text(),
            ],
        )?;
        let id = conn.last_insert_rowid();

        let message = conn.query_row(
            &format!(
                "SELECT {} FROM conversation_messages WHERE id = ?1",
                MESSAGE_COLS
            ),
            [id],
            message_from_row,
        )?;
        Ok(message)
    }

    /// All messages of a ticket that have not been folded into an
    /// extraction, in chronological order.
    pub fn unsummarized_messages(&self, ticket_id: i64) -> Result<Vec<ConversationMessage>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {} FROM conversation_messages
            WHERE ticket_id = ?1 AND is_summarized = 0
            ORDER BY created_at ASC, id ASC
            "#,
            MESSAGE_COLS
        ))?;
        let messages = stmt
            .query_map([ticket_id], message_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }

    /// The last `limit` messages of a ticket, chronological.
    pub fn recent_messages(&self, ticket_id: i64, limit: usize) -> Result<Vec<ConversationMessage>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {} FROM (
                SELECT {} FROM conversation_messages
                WHERE ticket_id = ?1
                ORDER BY created_at DESC, id DESC
                LIMIT ?2
            ) ORDER BY created_at ASC, id ASC
            "#,
            MESSAGE_COLS, MESSAGE_COLS
        ))?;
        let messages = stmt
            .query_map(params![ticket_id, limit as i64], message_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }

    pub fn message_count(&self, ticket_id: i64) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM conversation_messages WHERE ticket_id = ?1",
            [ticket_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Execution sessions and usage
    // ------------------------------------------------------------------

    pub fn open_session(&self, ticket_id: i64) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO execution_sessions (ticket_id, status, started_at)
            VALUES (?1, 'running', ?2)
            "#,
            params![ticket_id, now_text()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_session(&self, id: i64) -> Result<Option<ExecutionSession>> {
        let conn = self.conn()?;
        let session = conn
            .query_row(
                r#"
                SELECT id, ticket_id, status, started_at, ended_at, tokens_used, api_calls
                FROM execution_sessions WHERE id = ?1
                "#,
                [id],
                |row| {
                    Ok(ExecutionSession {
                        id: row.get(0)?,
                        ticket_id: row.get(1)?,
                        status: SessionStatus::parse(&row.get::<_, String>(2)?)
                            .unwrap_or(SessionStatus::Failed),
                        started_at: parse_ts(&row.get::<_, String>(3)?),
                        ended_at: parse_ts_opt(row.get(4)?),
                        tokens_used: row.get(5)?,
                        api_calls: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(session)
    }

    pub fn running_session(&self, ticket_id: i64) -> Result<Option<i64>> {
        let conn = self.conn()?;
        let id = conn
            .query_row(
                r#"
                SELECT id FROM execution_sessions
                WHERE ticket_id = ?1 AND status = 'running'
                ORDER BY id DESC LIMIT 1
                "#,
                [ticket_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Close any running session of a ticket (watchdog and recovery
    /// paths). Returns how many were closed.
    pub fn close_running_sessions(&self, ticket_id: i64, status: SessionStatus) -> Result<usize> {
        let conn = self.conn()?;
        let changed = conn.execute(
            r#"
            UPDATE execution_sessions SET status = ?1, ended_at = ?2
            WHERE ticket_id = ?3 AND status = 'running'
            "#,
            params![status.as_str(), now_text(), ticket_id],
        )?;
        Ok(changed)
    }

    /// Recovery: every running session becomes stuck with ended_at=now.
    pub fn mark_running_sessions_stuck(&self) -> Result<usize> {
        let conn = self.conn()?;
        let changed = conn.execute(
            r#"
            UPDATE execution_sessions SET status = 'stuck', ended_at = ?1
            WHERE status = 'running'
            "#,
            params![now_text()],
        )?;
        Ok(changed)
    }

    /// Real-time token rollup during streaming: session counters plus
    /// the ticket's cumulative totals derived from its sessions.
    pub fn update_session_progress(
        &self,
        session_id: i64,
        ticket_id: i64,
        usage: &UsageTotals,
        api_calls: u64,
    ) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE execution_sessions SET tokens_used = ?1, api_calls = ?2 WHERE id = ?3",
            params![usage.total() as i64, api_calls as i64, session_id],
        )?;
        refresh_ticket_totals(&tx, ticket_id)?;
        tx.commit()?;
        Ok(())
    }

    /// Session-final accounting: close the session, write the usage
    /// record, refresh the ticket rollup, and bump project totals.
    #[allow(clippy::too_many_arguments)]
    pub fn finalize_session(
        &self,
        session_id: i64,
        ticket_id: i64,
        project_id: i64,
        status: SessionStatus,
        usage: &UsageTotals,
        api_calls: u64,
        started_at: DateTime<Utc>,
    ) -> Result<()> {
        let duration = (Utc::now() - started_at).num_seconds().max(0);
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            UPDATE execution_sessions
            SET status = ?1, ended_at = ?2, tokens_used = ?3, api_calls = ?4
            WHERE id = ?5
            "#,
            params![
                status.as_str(),
                now_text(),
                usage.total() as i64,
                api_calls as i64,
                session_id
            ],
        )?;

        tx.execute(
            r#"
            INSERT INTO usage_records
                (ticket_id, project_id, session_id, input_tokens, output_tokens, total_tokens,
                 cache_read_tokens, cache_creation_tokens, duration_seconds, api_calls, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                ticket_id,
                project_id,
                session_id,
                usage.input_tokens as i64,
                usage.output_tokens as i64,
                usage.total() as i64,
                usage.cache_read_tokens as i64,
                usage.cache_creation_tokens as i64,
                duration,
                api_calls as i64,
                now_text(),
            ],
        )?;

        refresh_ticket_totals(&tx, ticket_id)?;

        tx.execute(
            r#"
            UPDATE projects
            SET total_tokens = total_tokens + ?1,
                total_duration_seconds = total_duration_seconds + ?2,
                updated_at = ?3
            WHERE id = ?4
            "#,
            params![usage.total() as i64, duration, now_text(), project_id],
        )?;

        tx.commit()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // User message queue (command bridge)
    // ------------------------------------------------------------------

    pub fn enqueue_user_message(
        &self,
        ticket_id: i64,
        content: &str,
        message_type: QueuedMessageType,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO user_messages (ticket_id, content, message_type, processed, created_at)
            VALUES (?1, ?2, ?3, 0, ?4)
            "#,
            params![ticket_id, content, message_type.as_str(), now_text()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Drain the unprocessed queue for a ticket. Rows are marked
    /// processed in the same transaction that returns them, so a crash
    /// cannot replay an interjection.
    pub fn drain_user_messages(&self, ticket_id: i64) -> Result<Vec<QueuedMessage>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let messages: Vec<QueuedMessage> = {
            let mut stmt = tx.prepare(
                r#"
                SELECT id, ticket_id, content, message_type, processed, created_at
                FROM user_messages
                WHERE ticket_id = ?1 AND processed = 0
                ORDER BY created_at ASC, id ASC
                "#,
            )?;
            stmt.query_map([ticket_id], |row| {
                Ok(QueuedMessage {
                    id: row.get(0)?,
                    ticket_id: row.get(1)?,
                    content: row.get(2)?,
                    message_type: QueuedMessageType::parse(&row.get::<_, String>(3)?),
                    processed: row.get(4)?,
                    created_at: parse_ts(&row.get::<_, String>(5)?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };

        for message in &messages {
            tx.execute(
                "UPDATE user_messages SET processed = 1 WHERE id = ?1",
                [message.id],
            )?;
        }
        tx.commit()?;
        Ok(messages)
    }

    // ------------------------------------------------------------------
    // Watchdog support
    // ------------------------------------------------------------------

    /// In-progress tickets that have accumulated at least
    /// `min_messages` transcript messages.
    pub fn tickets_for_watchdog(&self, min_messages: i64) -> Result<Vec<Ticket>> {
        let conn = self.conn()?;
        let sql = format!(
            r#"
            SELECT {} FROM tickets
            WHERE status = 'in_progress'
              AND (SELECT COUNT(*) FROM conversation_messages m
                   WHERE m.ticket_id = tickets.id) >= ?1
            ORDER BY id ASC
            "#,
            TICKET_COLS
        );
        let mut stmt = conn.prepare(&sql)?;
        let tickets = stmt
            .query_map([min_messages], ticket_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tickets)
    }

    // ------------------------------------------------------------------
    // Diagnostic logs
    // ------------------------------------------------------------------

    pub fn log_daemon(&self, level: &str, message: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO daemon_logs (level, message, created_at) VALUES (?1, ?2, ?3)",
            params![level, message, now_text()],
        )?;
        Ok(())
    }

    pub fn log_execution(&self, session_id: i64, log_type: &str, message: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO execution_logs (session_id, log_type, message, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                session_id,
                log_type,
                taskforge_types::truncate_chars(message, MAX_LOG_CHARS),
                now_text()
            ],
        )?;
        Ok(())
    }
}

/// Recompute a ticket's cumulative token and duration counters from
/// its sessions, inside the caller's transaction.
fn refresh_ticket_totals(tx: &rusqlite::Transaction<'_>, ticket_id: i64) -> Result<()> {
    tx.execute(
        r#"
        UPDATE tickets
        SET total_tokens = (
                SELECT COALESCE(SUM(tokens_used), 0)
                FROM execution_sessions WHERE ticket_id = ?1
            ),
            total_duration_seconds = (
                SELECT COALESCE(SUM(
                    strftime('%s', COALESCE(ended_at, ?2)) - strftime('%s', started_at)
                ), 0)
                FROM execution_sessions WHERE ticket_id = ?1
            )
        WHERE id = ?1
        "#,
        params![ticket_id, now_text()],
    )
    .map_err(Error::from)?;
    Ok(())
}
