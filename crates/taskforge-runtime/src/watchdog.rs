use std::time::{Duration, Instant};

use taskforge_context::run_aux_model;
use taskforge_notify::NotifyEvent;
use taskforge_types::{MessageRole, NewMessage, SessionStatus, Ticket, TicketStatus};
use tracing::{error, info, warn};

use crate::worker::RuntimeHandles;

/// Messages a ticket must have before the watchdog inspects it.
const MIN_MESSAGES: i64 = 10;

/// Window fed to the productivity probe.
const PROBE_MESSAGES: usize = 30;

/// Per-message cap inside the probe prompt.
const PROBE_MESSAGE_CHARS: usize = 1_000;

/// Verdict of one productivity probe.
#[derive(Debug, PartialEq)]
enum Verdict {
    Continue,
    Stuck(String),
}

/// Parse the probe's single-line reply: `CONTINUE` or `STUCK: <reason>`.
fn parse_verdict(response: &str) -> Verdict {
    let line = response.lines().next().unwrap_or("").trim();
    if let Some(rest) = line.strip_prefix("STUCK") {
        let reason = rest.trim_start_matches(':').trim();
        let reason = if reason.is_empty() {
            "no progress detected".to_string()
        } else {
            reason.to_string()
        };
        return Verdict::Stuck(reason);
    }
    Verdict::Continue
}

/// Periodic productivity analyzer: every interval, every in-progress
/// ticket with enough transcript is probed through the auxiliary
/// model; a STUCK verdict parks the ticket for human action.
pub struct Watchdog {
    handles: RuntimeHandles,
}

impl Watchdog {
    pub fn new(handles: RuntimeHandles) -> Self {
        Self { handles }
    }

    pub fn run(self) {
        info!("watchdog started");
        while self.handles.is_running() {
            self.sleep_interval();
            if !self.handles.is_running() {
                break;
            }
            self.tick();
        }
        info!("watchdog stopped");
    }

    fn sleep_interval(&self) {
        let deadline = Instant::now() + self.handles.config.watchdog_interval;
        while self.handles.is_running() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_secs(1));
        }
    }

    pub fn tick(&self) {
        let tickets = match self.handles.store.tickets_for_watchdog(MIN_MESSAGES) {
            Ok(tickets) => tickets,
            Err(err) => {
                warn!(error = %err, "watchdog candidate query failed");
                return;
            }
        };

        for ticket in tickets {
            match self.probe(&ticket) {
                Ok(Verdict::Continue) => {}
                Ok(Verdict::Stuck(reason)) => self.mark_stuck(&ticket, &reason),
                Err(err) => warn!(ticket = %ticket.ticket_number, error = %err, "probe failed"),
            }
        }
    }

    fn probe(&self, ticket: &Ticket) -> anyhow::Result<Verdict> {
        let messages = self
            .handles
            .store
            .recent_messages(ticket.id, PROBE_MESSAGES)?;

        let mut transcript = String::new();
        for message in &messages {
            let content = message.content.as_deref().unwrap_or("");
            transcript.push_str(&format!(
                "[{}]: {}\n",
                message.role.as_str().to_uppercase(),
                taskforge_types::truncate_chars(content, PROBE_MESSAGE_CHARS)
            ));
        }

        let prompt = format!(
            "You are monitoring an autonomous coding agent working on ticket {} (\"{}\").\n\
             Below are its most recent transcript messages. Judge whether it is making\n\
             real progress or looping without progress (repeating the same edits,\n\
             re-reading the same files, cycling on the same error).\n\n\
             {}\n\
             Reply with EXACTLY one line, nothing else:\n\
             CONTINUE\n\
             or\n\
             STUCK: <short reason>",
            ticket.ticket_number, ticket.title, transcript
        );

        let config = self.handles.prompts.config();
        let response = run_aux_model(
            &config.claude_bin,
            &config.aux_model,
            &prompt,
            config.aux_timeout,
        )?;
        Ok(parse_verdict(&response))
    }

    fn mark_stuck(&self, ticket: &Ticket, reason: &str) {
        error!(ticket = %ticket.ticket_number, reason, "watchdog verdict: stuck");

        if let Err(err) = self
            .handles
            .store
            .set_ticket_status(ticket.id, TicketStatus::Stuck)
        {
            error!(ticket = %ticket.ticket_number, error = %err, "stuck transition failed");
            return;
        }
        self.handles.bus.publish_status(ticket.id, TicketStatus::Stuck);

        if let Err(err) = self.handles.store.append_message(
            ticket.id,
            None,
            &NewMessage::text(
                MessageRole::System,
                format!("Watchdog marked this ticket stuck: {}", reason),
            ),
        ) {
            warn!(ticket = %ticket.ticket_number, error = %err, "stuck note failed");
        }

        if let Err(err) = self
            .handles
            .store
            .close_running_sessions(ticket.id, SessionStatus::Stuck)
        {
            warn!(ticket = %ticket.ticket_number, error = %err, "session close failed");
        }

        self.handles.bus.publish_stuck(ticket.id, reason);
        self.handles.notifier.notify(
            NotifyEvent::WatchdogAlert,
            "Watchdog Alert - Ticket Stuck",
            reason,
            None,
            Some(&ticket.ticket_number),
        );
        self.handles.notifier.send_email(
            &format!("Stuck on {}", ticket.ticket_number),
            &format!("Ticket: {}\nWatchdog verdict: {}", ticket.title, reason),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_parsing() {
        assert_eq!(parse_verdict("CONTINUE"), Verdict::Continue);
        assert_eq!(parse_verdict("CONTINUE\nextra chatter"), Verdict::Continue);
        assert_eq!(
            parse_verdict("STUCK: repeated identical edit"),
            Verdict::Stuck("repeated identical edit".to_string())
        );
        assert_eq!(
            parse_verdict("STUCK"),
            Verdict::Stuck("no progress detected".to_string())
        );
        // Anything unrecognized counts as progress; stuck needs an
        // explicit verdict.
        assert_eq!(parse_verdict("maybe?"), Verdict::Continue);
    }
}
