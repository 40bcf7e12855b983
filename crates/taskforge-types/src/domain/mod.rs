mod message;
mod project;
mod queue;
mod session;
mod ticket;

pub use message::{ConversationMessage, MessageRole, NewMessage, MAX_MESSAGE_CHARS};
pub use project::{Project, ProjectDatabase, ProjectStatus, ProjectType, DEFAULT_PROJECT_ROOT};
pub use queue::{QueuedMessage, QueuedMessageType, UserCommand};
pub use session::{ExecutionSession, SessionStatus};
pub use ticket::{format_ticket_number, Priority, Ticket, TicketStatus};
