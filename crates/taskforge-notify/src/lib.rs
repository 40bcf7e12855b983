mod email;
mod inbound;
mod telegram;

use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

pub use email::{Mailer, SmtpConfig};
pub use inbound::ReplyRouter;
pub use telegram::TelegramClient;

/// Lifecycle events surfaced to the operator, each gated by a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyEvent {
    TicketCompleted,
    AwaitingInput,
    TicketFailed,
    WatchdogAlert,
}

#[derive(Debug, Clone, Copy)]
pub struct NotifyFlags {
    pub ticket_completed: bool,
    pub awaiting_input: bool,
    pub ticket_failed: bool,
    pub watchdog_alert: bool,
}

impl Default for NotifyFlags {
    fn default() -> Self {
        Self {
            ticket_completed: true,
            awaiting_input: true,
            ticket_failed: true,
            watchdog_alert: true,
        }
    }
}

impl NotifyFlags {
    fn allows(&self, event: NotifyEvent) -> bool {
        match event {
            NotifyEvent::TicketCompleted => self.ticket_completed,
            NotifyEvent::AwaitingInput => self.awaiting_input,
            NotifyEvent::TicketFailed => self.ticket_failed,
            NotifyEvent::WatchdogAlert => self.watchdog_alert,
        }
    }
}

/// Ticket reference as it appears in outbound payloads, e.g. WEB-0001.
pub fn extract_ticket_reference(text: &str) -> Option<&str> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"[A-Z]+\d*-\d+").expect("ticket reference regex"));
    re.find(text).map(|m| m.as_str())
}

/// A trimmed reply that starts or ends with `?` is a question about
/// the ticket, not new instructions.
pub fn is_question(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.starts_with('?') || trimmed.ends_with('?')
}

/// Outbound notification fan-out. Failures are logged and suppressed;
/// notification trouble never affects ticket processing.
pub struct Notifier {
    telegram: Option<TelegramClient>,
    mailer: Option<Mailer>,
    flags: NotifyFlags,
}

impl Notifier {
    pub fn new(
        telegram: Option<TelegramClient>,
        mailer: Option<Mailer>,
        flags: NotifyFlags,
    ) -> Self {
        Self {
            telegram,
            mailer,
            flags,
        }
    }

    pub fn disabled() -> Self {
        Self {
            telegram: None,
            mailer: None,
            flags: NotifyFlags::default(),
        }
    }

    /// Format and send one event. The payload carries the project name
    /// and ticket number verbatim so replies can be correlated.
    pub fn notify(
        &self,
        event: NotifyEvent,
        title: &str,
        message: &str,
        project_name: Option<&str>,
        ticket_number: Option<&str>,
    ) {
        if !self.flags.allows(event) {
            return;
        }
        let Some(telegram) = &self.telegram else {
            return;
        };

        let mut text = format!("<b>{}</b>\n", title);
        if let Some(project) = project_name {
            text.push_str(&format!("Project: {}\n", project));
        }
        if let Some(number) = ticket_number {
            text.push_str(&format!("Ticket: {}\n", number));
        }
        text.push('\n');
        text.push_str(message);

        if let Err(err) = telegram.send_message(&text) {
            warn!(error = %err, "telegram notification failed");
        }
    }

    /// Operator alert mail; failures logged only.
    pub fn send_email(&self, subject: &str, body: &str) {
        let Some(mailer) = &self.mailer else {
            return;
        };
        if let Err(err) = mailer.send(subject, body) {
            warn!(error = %err, "alert email failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_references_are_extracted() {
        assert_eq!(
            extract_ticket_reference("Ticket: WEATHERAPP-0002 finished"),
            Some("WEATHERAPP-0002")
        );
        assert_eq!(
            extract_ticket_reference("see TEST30-0001 please"),
            Some("TEST30-0001")
        );
        assert_eq!(extract_ticket_reference("no ticket here"), None);
        assert_eq!(extract_ticket_reference("lowercase web-0001"), None);
    }

    #[test]
    fn question_detection_checks_both_ends() {
        assert!(is_question("what is the status?"));
        assert!(is_question("? can you explain"));
        assert!(is_question("  done yet?  "));
        assert!(!is_question("use tabs not spaces"));
    }

    #[test]
    fn disabled_flags_suppress_events() {
        let flags = NotifyFlags {
            ticket_completed: false,
            ..Default::default()
        };
        assert!(!flags.allows(NotifyEvent::TicketCompleted));
        assert!(flags.allows(NotifyEvent::WatchdogAlert));
    }
}
