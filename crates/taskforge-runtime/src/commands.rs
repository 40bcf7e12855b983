use taskforge_store::{Result, Store};
use taskforge_types::UserCommand;

/// One drain of a ticket's user-message queue, split into commands
/// (acted on immediately, in arrival order) and free text (appended to
/// the conversation before the next prompt build).
#[derive(Debug, Default)]
pub struct DrainedInput {
    pub commands: Vec<UserCommand>,
    pub texts: Vec<String>,
}

impl DrainedInput {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.texts.is_empty()
    }

    /// First command wins when several arrive in one batch.
    pub fn first_command(&self) -> Option<UserCommand> {
        self.commands.first().copied()
    }
}

/// Drain pending interjections for a ticket. The store marks the rows
/// processed in the same transaction, so each row is seen exactly once.
pub fn drain_input(store: &Store, ticket_id: i64) -> Result<DrainedInput> {
    let mut drained = DrainedInput::default();
    for message in store.drain_user_messages(ticket_id)? {
        match UserCommand::parse(&message.content) {
            Some(command) => drained.commands.push(command),
            None => {
                let text = message.content.trim().to_string();
                if !text.is_empty() {
                    drained.texts.push(text);
                }
            }
        }
    }
    Ok(drained)
}
