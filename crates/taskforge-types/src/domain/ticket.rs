use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Scheduling priority; lower rank is claimed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn rank(&self) -> i64 {
        match self {
            Priority::Critical => 1,
            Priority::High => 2,
            Priority::Medium => 3,
            Priority::Low => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "critical" => Priority::Critical,
            "high" => Priority::High,
            "low" => Priority::Low,
            _ => Priority::Medium,
        }
    }
}

/// Ticket lifecycle states.
///
/// new/open/pending are claimable by a worker; in_progress means an
/// agent run is active; awaiting_input waits for a human until its
/// review deadline; done/skipped/stuck/failed are terminal until an
/// external actor reopens the ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    New,
    Open,
    Pending,
    InProgress,
    AwaitingInput,
    Done,
    Skipped,
    Stuck,
    Failed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::New => "new",
            TicketStatus::Open => "open",
            TicketStatus::Pending => "pending",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::AwaitingInput => "awaiting_input",
            TicketStatus::Done => "done",
            TicketStatus::Skipped => "skipped",
            TicketStatus::Stuck => "stuck",
            TicketStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(TicketStatus::New),
            "open" => Some(TicketStatus::Open),
            "pending" => Some(TicketStatus::Pending),
            "in_progress" => Some(TicketStatus::InProgress),
            "awaiting_input" => Some(TicketStatus::AwaitingInput),
            "done" => Some(TicketStatus::Done),
            "skipped" => Some(TicketStatus::Skipped),
            "stuck" => Some(TicketStatus::Stuck),
            "failed" => Some(TicketStatus::Failed),
            _ => None,
        }
    }

    /// True when a project worker may claim the ticket.
    pub fn is_claimable(&self) -> bool {
        matches!(
            self,
            TicketStatus::New | TicketStatus::Open | TicketStatus::Pending
        )
    }
}

/// Format the human-readable ticket number for the n-th ticket of a
/// project. Zero-padded to four digits; the width grows past 9999.
pub fn format_ticket_number(code: &str, seq: i64) -> String {
    format!("{}-{:04}", code, seq)
}

/// A unit of work scoped to exactly one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: i64,
    pub project_id: i64,
    pub ticket_number: String,
    pub title: String,
    pub description: String,
    pub context: Option<String>,
    pub priority: Priority,
    pub status: TicketStatus,
    /// Model alias override; falls back to the project default.
    pub model: Option<String>,
    pub review_deadline: Option<DateTime<Utc>>,
    pub close_reason: Option<String>,
    pub result_summary: Option<String>,
    pub total_tokens: i64,
    pub total_duration_seconds: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_number_zero_pads_to_four() {
        assert_eq!(format_ticket_number("WEB", 1), "WEB-0001");
        assert_eq!(format_ticket_number("WEB", 10), "WEB-0010");
        assert_eq!(format_ticket_number("WEB", 9999), "WEB-9999");
    }

    #[test]
    fn ticket_number_width_grows() {
        assert_eq!(format_ticket_number("WEB", 10000), "WEB-10000");
    }

    #[test]
    fn priority_rank_orders_critical_first() {
        assert!(Priority::Critical.rank() < Priority::High.rank());
        assert!(Priority::High.rank() < Priority::Medium.rank());
        assert!(Priority::Medium.rank() < Priority::Low.rank());
    }

    #[test]
    fn claimable_states() {
        assert!(TicketStatus::New.is_claimable());
        assert!(TicketStatus::Open.is_claimable());
        assert!(TicketStatus::Pending.is_claimable());
        assert!(!TicketStatus::InProgress.is_claimable());
        assert!(!TicketStatus::AwaitingInput.is_claimable());
        assert!(!TicketStatus::Done.is_claimable());
    }

    #[test]
    fn status_round_trip() {
        for status in [
            TicketStatus::New,
            TicketStatus::Open,
            TicketStatus::Pending,
            TicketStatus::InProgress,
            TicketStatus::AwaitingInput,
            TicketStatus::Done,
            TicketStatus::Skipped,
            TicketStatus::Stuck,
            TicketStatus::Failed,
        ] {
            assert_eq!(TicketStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TicketStatus::parse("bogus"), None);
    }
}
