use anyhow::Result;
use taskforge_context::{run_aux_model, ContextConfig};
use taskforge_store::Store;
use taskforge_types::{MessageRole, NewMessage, Ticket, TicketStatus};
use tracing::{debug, info, warn};

use crate::telegram::{IncomingMessage, TelegramClient};
use crate::{extract_ticket_reference, is_question};

/// How many recent messages feed a question answer.
const QUESTION_CONTEXT_MESSAGES: usize = 5;

/// Long-polls the bot API and routes replies back onto tickets:
/// questions get an inline answer, instructions become conversation
/// messages (reopening an awaiting_input ticket), anything else gets
/// guidance. The offset cursor survives across polls.
pub struct ReplyRouter {
    store: Store,
    telegram: TelegramClient,
    context: ContextConfig,
    last_update_id: i64,
}

impl ReplyRouter {
    pub fn new(store: Store, telegram: TelegramClient, context: ContextConfig) -> Self {
        Self {
            store,
            telegram,
            context,
            last_update_id: 0,
        }
    }

    /// One polling pass. Transport errors are returned so the caller
    /// can log and continue; per-update failures are contained.
    pub fn poll_once(&mut self) -> Result<()> {
        let updates = self.telegram.get_updates(self.last_update_id + 1)?;
        for update in updates {
            self.last_update_id = self.last_update_id.max(update.update_id);
            let Some(message) = update.message else {
                continue;
            };
            if let Err(err) = self.route(&message) {
                warn!(error = %err, "inbound reply handling failed");
            }
        }
        Ok(())
    }

    fn route(&self, message: &IncomingMessage) -> Result<()> {
        let Some(text) = message.text.as_deref().filter(|t| !t.trim().is_empty()) else {
            return Ok(());
        };
        debug!(preview = %taskforge_types::truncate_chars(text, 50), "inbound message");

        let ticket = message
            .reply_to_message
            .as_deref()
            .and_then(|parent| parent.text.as_deref())
            .and_then(extract_ticket_reference)
            .map(|number| self.store.find_ticket_by_number(number))
            .transpose()?
            .flatten();

        let Some(ticket) = ticket else {
            self.send_guidance();
            return Ok(());
        };

        if is_question(text) {
            self.answer_question(&ticket, text);
            return Ok(());
        }

        self.append_instruction(&ticket, text, message)
    }

    fn append_instruction(
        &self,
        ticket: &Ticket,
        text: &str,
        message: &IncomingMessage,
    ) -> Result<()> {
        ingest_reply(&self.store, ticket, text)?;

        let sender = message
            .from
            .as_ref()
            .and_then(|f| f.first_name.clone())
            .unwrap_or_else(|| "User".to_string());
        let ack = format!(
            "Message from {} added to <b>{}</b>.",
            sender, ticket.ticket_number
        );
        if let Err(err) = self.telegram.send_message(&ack) {
            warn!(error = %err, "reply ack failed");
        }
        Ok(())
    }

    /// Question: answer from a compact context without touching state.
    fn answer_question(&self, ticket: &Ticket, question: &str) {
        let prompt = match self.question_prompt(ticket, question) {
            Ok(prompt) => prompt,
            Err(err) => {
                warn!(ticket = %ticket.ticket_number, error = %err, "question context failed");
                return;
            }
        };

        let answer = run_aux_model(
            &self.context.claude_bin,
            &self.context.aux_model,
            &prompt,
            self.context.aux_timeout,
        )
        .unwrap_or_else(|err| {
            warn!(ticket = %ticket.ticket_number, error = %err, "question answer failed");
            format!(
                "Status of {}: {}",
                ticket.ticket_number,
                ticket.status.as_str()
            )
        });

        let reply = format!("<b>{}</b>\n{}", ticket.ticket_number, answer);
        if let Err(err) = self.telegram.send_message(&reply) {
            warn!(error = %err, "question reply failed");
        }
    }

    fn question_prompt(&self, ticket: &Ticket, question: &str) -> Result<String> {
        let recent = self
            .store
            .recent_messages(ticket.id, QUESTION_CONTEXT_MESSAGES)?;
        let mut transcript = String::new();
        for message in &recent {
            transcript.push_str(&format!(
                "[{}]: {}\n",
                message.role.as_str().to_uppercase(),
                taskforge_types::truncate_chars(message.content.as_deref().unwrap_or(""), 500)
            ));
        }

        Ok(format!(
            "A user asks about ticket {} (\"{}\", status: {}, {} tokens used so far).\n\n\
             Recent conversation:\n{}\n\
             Question: {}\n\n\
             Answer briefly in plain text (2-3 sentences).",
            ticket.ticket_number,
            ticket.title,
            ticket.status.as_str(),
            ticket.total_tokens,
            transcript,
            question
        ))
    }

    fn send_guidance(&self) {
        let guidance = "To route a message to a ticket, reply directly to one of its \
                        notification messages.";
        if let Err(err) = self.telegram.send_message(guidance) {
            warn!(error = %err, "guidance reply failed");
        }
    }
}

/// Free text: append to the conversation; an awaiting_input ticket
/// reopens immediately so the scheduler picks it up next tick.
/// Returns whether the ticket was reopened.
pub(crate) fn ingest_reply(store: &Store, ticket: &Ticket, text: &str) -> Result<bool> {
    store.append_message(ticket.id, None, &NewMessage::text(MessageRole::User, text))?;

    if ticket.status == TicketStatus::AwaitingInput {
        store.set_ticket_status(ticket.id, TicketStatus::Open)?;
        info!(ticket = %ticket.ticket_number, "reopened by reply");
        return Ok(true);
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use taskforge_store::{NewProject, NewTicket};

    fn ticket_fixture() -> (Store, Ticket) {
        let store = Store::open_in_memory().unwrap();
        let project = store
            .create_project(&NewProject {
                name: "Api".to_string(),
                code: "API".to_string(),
                ..Default::default()
            })
            .unwrap();
        let ticket = store
            .create_ticket(&NewTicket::new(project.id, "retry loop", ""))
            .unwrap();
        (store, ticket)
    }

    #[test]
    fn reply_to_awaiting_input_reopens_the_ticket() {
        let (store, ticket) = ticket_fixture();
        store
            .complete_ticket(ticket.id, None, Utc::now() + chrono::Duration::days(7))
            .unwrap();
        let ticket = store.get_ticket(ticket.id).unwrap().unwrap();
        assert_eq!(ticket.status, TicketStatus::AwaitingInput);

        let reopened = ingest_reply(&store, &ticket, "refactor the retry loop").unwrap();
        assert!(reopened);

        let ticket = store.get_ticket(ticket.id).unwrap().unwrap();
        assert_eq!(ticket.status, TicketStatus::Open);

        let messages = store.unsummarized_messages(ticket.id).unwrap();
        assert_eq!(
            messages.last().unwrap().content.as_deref(),
            Some("refactor the retry loop")
        );
    }

    #[test]
    fn reply_to_open_ticket_only_appends() {
        let (store, ticket) = ticket_fixture();
        let reopened = ingest_reply(&store, &ticket, "more detail").unwrap();
        assert!(!reopened);

        let ticket = store.get_ticket(ticket.id).unwrap().unwrap();
        assert_eq!(ticket.status, TicketStatus::New);
        assert_eq!(store.unsummarized_messages(ticket.id).unwrap().len(), 1);
    }
}
