use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{MessageRole, TicketStatus};

/// Topic carrying every in-progress ticket's messages, merged.
pub const CONSOLE_TOPIC: &str = "console";

/// Topic carrying watchdog stuck alerts.
pub const STUCK_TOPIC: &str = "ticket_stuck";

/// Per-ticket topic name.
pub fn ticket_topic(ticket_id: i64) -> String {
    format!("ticket:{}", ticket_id)
}

/// Compact view of a persisted message, as fanned out to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageBody {
    pub id: i64,
    pub ticket_id: i64,
    pub role: MessageRole,
    pub content: Option<String>,
    pub tool_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Events fanned out to interactive observers. Delivery is
/// best-effort; the transcript itself is durably persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusEvent {
    Message {
        ticket_id: i64,
        message: MessageBody,
    },
    Status {
        ticket_id: i64,
        status: TicketStatus,
    },
    Log {
        log_type: String,
        text: String,
    },
    TicketStuck {
        ticket_id: i64,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_naming() {
        assert_eq!(ticket_topic(42), "ticket:42");
    }

    #[test]
    fn events_serialize_tagged() {
        let event = BusEvent::Status {
            ticket_id: 7,
            status: TicketStatus::InProgress,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"status\""));
        assert!(json.contains("\"in_progress\""));
    }
}
