use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use taskforge_types::{
    format_ticket_number, Priority, Project, ProjectDatabase, ProjectStatus, ProjectType, Ticket,
    TicketStatus,
};

use crate::pool::{Pool, PooledConnection};
use crate::records::{NewProject, NewTicket};
use crate::{Error, Result};

/// Handle to the relational store. Cheap to clone; hands out pooled
/// connections per operation.
#[derive(Clone)]
pub struct Store {
    pool: Arc<Pool>,
}

// Millisecond precision with a Z suffix keeps SQLite's strftime able
// to parse the column while chrono round-trips it. One format for
// every stored timestamp so lexicographic comparisons stay valid.
pub(crate) fn ts_text(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub(crate) fn now_text() -> String {
    ts_text(Utc::now())
}

pub(crate) fn parse_ts(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn parse_ts_opt(text: Option<String>) -> Option<DateTime<Utc>> {
    text.as_deref().map(parse_ts)
}

const PROJECT_COLS: &str = "id, name, code, project_type, web_path, app_path, tech_stack, \
     context, db_host, db_name, db_user, db_password, model, status, total_tokens, \
     total_duration_seconds";

pub(crate) const TICKET_COLS: &str = "id, project_id, ticket_number, title, description, context, priority, \
     status, model, review_deadline, close_reason, result_summary, total_tokens, \
     total_duration_seconds, created_at, updated_at";

const CLAIMABLE: &str = "('open', 'new', 'pending')";

const PRIORITY_RANK: &str = "CASE priority WHEN 'critical' THEN 1 WHEN 'high' THEN 2 \
     WHEN 'medium' THEN 3 ELSE 4 END";

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    let db_host: Option<String> = row.get(8)?;
    let db_name: Option<String> = row.get(9)?;
    let db_user: Option<String> = row.get(10)?;
    let db_password: Option<String> = row.get(11)?;
    let database = match (db_name, db_user) {
        (Some(name), Some(user)) => Some(ProjectDatabase {
            host: db_host.unwrap_or_else(|| "localhost".to_string()),
            name,
            user,
            password: db_password.unwrap_or_default(),
        }),
        _ => None,
    };

    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        code: row.get(2)?,
        project_type: ProjectType::parse(&row.get::<_, String>(3)?),
        web_path: row.get(4)?,
        app_path: row.get(5)?,
        tech_stack: row.get(6)?,
        context: row.get(7)?,
        database,
        model: row.get(12)?,
        status: ProjectStatus::parse(&row.get::<_, String>(13)?),
        total_tokens: row.get(14)?,
        total_duration_seconds: row.get(15)?,
    })
}

pub(crate) fn ticket_from_row(row: &Row<'_>) -> rusqlite::Result<Ticket> {
    Ok(Ticket {
        id: row.get(0)?,
        project_id: row.get(1)?,
        ticket_number: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        context: row.get(5)?,
        priority: Priority::parse(&row.get::<_, String>(6)?),
        status: TicketStatus::parse(&row.get::<_, String>(7)?).unwrap_or(TicketStatus::Open),
        model: row.get(8)?,
        review_deadline: parse_ts_opt(row.get(9)?),
        close_reason: row.get(10)?,
        result_summary: row.get(11)?,
        total_tokens: row.get(12)?,
        total_duration_seconds: row.get(13)?,
        created_at: parse_ts(&row.get::<_, String>(14)?),
        updated_at: parse_ts(&row.get::<_, String>(15)?),
    })
}

impl Store {
    pub fn open(db_path: &Path) -> Result<Self> {
        let pool = Pool::open_disk(db_path.to_path_buf())?;
        let store = Self {
            pool: Arc::new(pool),
        };
        let conn = store.conn()?;
        crate::schema::init_schema(&conn)?;
        drop(conn);
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let pool = Pool::open_memory()?;
        let store = Self {
            pool: Arc::new(pool),
        };
        let conn = store.conn()?;
        crate::schema::init_schema(&conn)?;
        drop(conn);
        Ok(store)
    }

    pub(crate) fn conn(&self) -> Result<PooledConnection<'_>> {
        self.pool.acquire()
    }

    // ------------------------------------------------------------------
    // Projects
    // ------------------------------------------------------------------

    pub fn create_project(&self, new: &NewProject) -> Result<Project> {
        let code = new.code.trim().to_uppercase();
        if code.is_empty() || code.len() > 10 || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::Invalid(format!("project code '{}'", new.code)));
        }

        let conn = self.conn()?;
        let now = now_text();
        let (db_host, db_name, db_user, db_password) = match &new.database {
            Some(db) => (
                Some(db.host.clone()),
                Some(db.name.clone()),
                Some(db.user.clone()),
                Some(db.password.clone()),
            ),
            None => (None, None, None, None),
        };
        conn.execute(
            r#"
            INSERT INTO projects
                (name, code, project_type, web_path, app_path, tech_stack, context,
                 db_host, db_name, db_user, db_password, model, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 'active', ?13, ?13)
            "#,
            params![
                new.name,
                code,
                new.project_type.unwrap_or(ProjectType::Other).as_str(),
                new.web_path,
                new.app_path,
                new.tech_stack,
                new.context,
                db_host,
                db_name,
                db_user,
                db_password,
                new.model,
                now,
            ],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);

        self.get_project(id)?
            .ok_or_else(|| Error::NotFound(format!("project {}", id)))
    }

    pub fn get_project(&self, id: i64) -> Result<Option<Project>> {
        let conn = self.conn()?;
        let project = conn
            .query_row(
                &format!("SELECT {} FROM projects WHERE id = ?1", PROJECT_COLS),
                [id],
                project_from_row,
            )
            .optional()?;
        Ok(project)
    }

    pub fn get_project_by_code(&self, code: &str) -> Result<Option<Project>> {
        let conn = self.conn()?;
        let project = conn
            .query_row(
                &format!("SELECT {} FROM projects WHERE code = ?1", PROJECT_COLS),
                [code.trim().to_uppercase()],
                project_from_row,
            )
            .optional()?;
        Ok(project)
    }

    pub fn list_projects(&self) -> Result<Vec<Project>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare(&format!("SELECT {} FROM projects ORDER BY id", PROJECT_COLS))?;
        let projects = stmt
            .query_map([], project_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(projects)
    }

    /// Active projects that have at least one claimable ticket, ordered
    /// by the best priority among those tickets.
    pub fn projects_with_open_tickets(&self) -> Result<Vec<Project>> {
        let conn = self.conn()?;
        let sql = format!(
            r#"
            SELECT {cols},
                   MIN(CASE t.priority WHEN 'critical' THEN 1 WHEN 'high' THEN 2
                       WHEN 'medium' THEN 3 ELSE 4 END) AS best_priority
            FROM projects p
            JOIN tickets t ON t.project_id = p.id
            WHERE t.status IN {claimable} AND p.status = 'active'
            GROUP BY p.id
            ORDER BY best_priority ASC, p.id ASC
            "#,
            cols = PROJECT_COLS
                .split(", ")
                .map(|c| format!("p.{}", c))
                .collect::<Vec<_>>()
                .join(", "),
            claimable = CLAIMABLE,
        );
        let mut stmt = conn.prepare(&sql)?;
        let projects = stmt
            .query_map([], project_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(projects)
    }

    // ------------------------------------------------------------------
    // Tickets
    // ------------------------------------------------------------------

    /// Create a ticket, allocating its `{CODE}-NNNN` number inside the
    /// transaction so concurrent creators cannot collide.
    pub fn create_ticket(&self, new: &NewTicket) -> Result<Ticket> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let code: String = tx
            .query_row(
                "SELECT code FROM projects WHERE id = ?1",
                [new.project_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("project {}", new.project_id)))?;

        let seq: i64 = tx.query_row(
            "SELECT COUNT(*) FROM tickets WHERE project_id = ?1",
            [new.project_id],
            |row| row.get(0),
        )?;
        let number = format_ticket_number(&code, seq + 1);

        let now = now_text();
        tx.execute(
            r#"
            INSERT INTO tickets
                (project_id, ticket_number, title, description, context, priority,
                 status, model, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'new', ?7, ?8, ?8)
            "#,
            params![
                new.project_id,
                number,
                new.title,
                new.description,
                new.context,
                new.priority.as_str(),
                new.model,
                now,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        drop(conn);

        self.get_ticket(id)?
            .ok_or_else(|| Error::NotFound(format!("ticket {}", id)))
    }

    pub fn get_ticket(&self, id: i64) -> Result<Option<Ticket>> {
        let conn = self.conn()?;
        let ticket = conn
            .query_row(
                &format!("SELECT {} FROM tickets WHERE id = ?1", TICKET_COLS),
                [id],
                ticket_from_row,
            )
            .optional()?;
        Ok(ticket)
    }

    pub fn find_ticket_by_number(&self, number: &str) -> Result<Option<Ticket>> {
        let conn = self.conn()?;
        let ticket = conn
            .query_row(
                &format!(
                    "SELECT {} FROM tickets WHERE ticket_number = ?1",
                    TICKET_COLS
                ),
                [number],
                ticket_from_row,
            )
            .optional()?;
        Ok(ticket)
    }

    /// Next claimable ticket of a project: priority first, then FIFO.
    pub fn next_ticket(&self, project_id: i64) -> Result<Option<Ticket>> {
        let conn = self.conn()?;
        let sql = format!(
            r#"
            SELECT {cols} FROM tickets
            WHERE project_id = ?1 AND status IN {claimable}
            ORDER BY {rank}, created_at ASC, id ASC
            LIMIT 1
            "#,
            cols = TICKET_COLS,
            claimable = CLAIMABLE,
            rank = PRIORITY_RANK,
        );
        let ticket = conn
            .query_row(&sql, [project_id], ticket_from_row)
            .optional()?;
        Ok(ticket)
    }

    pub fn set_ticket_status(&self, id: i64, status: TicketStatus) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE tickets SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), now_text(), id],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("ticket {}", id)));
        }
        Ok(())
    }

    /// Completion disposition: park for human review with a deadline.
    pub fn complete_ticket(
        &self,
        id: i64,
        summary: Option<&str>,
        review_deadline: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn()?;
        let summary = summary.map(|s| taskforge_types::truncate_chars(s, 1000));
        conn.execute(
            r#"
            UPDATE tickets
            SET status = 'awaiting_input', result_summary = COALESCE(?1, result_summary),
                review_deadline = ?2, updated_at = ?3
            WHERE id = ?4
            "#,
            params![summary, ts_text(review_deadline), now_text(), id],
        )?;
        Ok(())
    }

    pub fn fail_ticket(&self, id: i64, reason: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            UPDATE tickets
            SET status = 'failed', result_summary = ?1, updated_at = ?2
            WHERE id = ?3
            "#,
            params![taskforge_types::truncate_chars(reason, 1000), now_text(), id],
        )?;
        Ok(())
    }

    /// Close awaiting_input tickets whose review deadline has passed.
    /// Returns the affected ticket ids for status broadcasting.
    pub fn auto_close_expired(&self, now: DateTime<Utc>) -> Result<Vec<i64>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let ids: Vec<i64> = {
            let mut stmt = tx.prepare(
                r#"
                SELECT id FROM tickets
                WHERE status = 'awaiting_input'
                  AND review_deadline IS NOT NULL AND review_deadline < ?1
                "#,
            )?;
            stmt.query_map([ts_text(now)], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };

        for id in &ids {
            tx.execute(
                r#"
                UPDATE tickets
                SET status = 'done', close_reason = 'auto_closed_7days', updated_at = ?1
                WHERE id = ?2
                "#,
                params![now_text(), id],
            )?;
        }
        tx.commit()?;
        Ok(ids)
    }

    /// Reset in_progress tickets whose project has no live worker.
    /// Returns the affected ticket ids.
    pub fn reset_in_progress_except(&self, live_projects: &[i64]) -> Result<Vec<i64>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let placeholders = live_projects
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let sql = if live_projects.is_empty() {
            "SELECT id FROM tickets WHERE status = 'in_progress'".to_string()
        } else {
            format!(
                "SELECT id FROM tickets WHERE status = 'in_progress' AND project_id NOT IN ({})",
                placeholders
            )
        };

        let ids: Vec<i64> = {
            let mut stmt = tx.prepare(&sql)?;
            stmt.query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };

        for id in &ids {
            tx.execute(
                "UPDATE tickets SET status = 'open', updated_at = ?1 WHERE id = ?2",
                params![now_text(), id],
            )?;
        }
        tx.commit()?;
        Ok(ids)
    }

    /// Recovery: every in_progress ticket back to open.
    pub fn reset_all_in_progress(&self) -> Result<usize> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE tickets SET status = 'open', updated_at = ?1 WHERE status = 'in_progress'",
            params![now_text()],
        )?;
        Ok(changed)
    }

    /// Ticket counts per status for one project (admin/status views).
    pub fn ticket_status_counts(&self, project_id: i64) -> Result<Vec<(TicketStatus, i64)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT status, COUNT(*) FROM tickets
            WHERE project_id = ?1
            GROUP BY status
            ORDER BY status
            "#,
        )?;
        let counts = stmt
            .query_map([project_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(counts
            .into_iter()
            .filter_map(|(status, count)| TicketStatus::parse(&status).map(|s| (s, count)))
            .collect())
    }

    /// Recovery: failed tickets updated after the cutoff back to open.
    pub fn reopen_recent_failed(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;
        let changed = conn.execute(
            r#"
            UPDATE tickets SET status = 'open', updated_at = ?1
            WHERE status = 'failed' AND updated_at >= ?2
            "#,
            params![now_text(), ts_text(cutoff)],
        )?;
        Ok(changed)
    }
}
