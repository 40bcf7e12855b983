use anyhow::Result;
use taskforge_types::{estimate_tokens, ConversationMessage};
use tracing::warn;

use crate::budget::truncate_middle;
use crate::preamble::ContextBuilder;

fn message_tokens(message: &ConversationMessage) -> u64 {
    if message.token_count > 0 {
        message.token_count as u64
    } else {
        estimate_tokens(message.content.as_deref().unwrap_or(""))
    }
}

impl ContextBuilder {
    /// History to replay in the next prompt: all unsummarized messages
    /// while they fit the extraction threshold, otherwise a verbatim
    /// recent suffix within budget while the older prefix is folded
    /// into an extraction.
    pub fn smart_history(&self, ticket_id: i64) -> Result<Vec<ConversationMessage>> {
        let messages = self.store.unsummarized_messages(ticket_id)?;
        if messages.is_empty() {
            return Ok(messages);
        }

        let total: u64 = messages.iter().map(message_tokens).sum();
        if total <= self.config.extraction_threshold {
            return Ok(messages);
        }

        let mut recent: Vec<ConversationMessage> = Vec::new();
        let mut recent_tokens: u64 = 0;
        for message in messages.iter().rev() {
            let mut message = message.clone();
            let mut tokens = message_tokens(&message);

            if tokens > self.config.max_single_message {
                if let Some(content) = message.content.take() {
                    message.content =
                        Some(truncate_middle(&content, self.config.max_single_message));
                }
                tokens = self.config.max_single_message;
            }

            if recent_tokens + tokens > self.config.recent_tokens_budget {
                break;
            }
            recent.insert(0, message);
            recent_tokens += tokens;
        }

        let older: Vec<ConversationMessage> = messages[..messages.len() - recent.len()].to_vec();
        if !older.is_empty()
            && let Err(err) = self.create_extraction(ticket_id, &older)
        {
            warn!(ticket_id, error = %err, "extraction failed; replaying recent suffix only");
        }

        Ok(recent)
    }
}
