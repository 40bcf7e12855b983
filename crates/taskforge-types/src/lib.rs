pub mod domain;
pub mod event;
pub mod usage;
pub mod util;

pub use domain::{
    ConversationMessage, ExecutionSession, MessageRole, NewMessage, Priority, Project,
    ProjectDatabase, ProjectStatus, ProjectType, QueuedMessage, QueuedMessageType, SessionStatus,
    Ticket, TicketStatus, UserCommand, format_ticket_number, DEFAULT_PROJECT_ROOT,
    MAX_MESSAGE_CHARS,
};
pub use event::{BusEvent, MessageBody, CONSOLE_TOPIC, STUCK_TOPIC, ticket_topic};
pub use usage::UsageTotals;
pub use util::{estimate_tokens, truncate_chars};
