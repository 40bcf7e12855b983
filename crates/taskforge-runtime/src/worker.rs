use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use taskforge_backup::{BackupService, BackupTrigger};
use taskforge_context::ContextBuilder;
use taskforge_notify::{Notifier, NotifyEvent};
use taskforge_protocol::{StreamAction, StreamParser};
use taskforge_store::Store;
use taskforge_types::{
    MessageBody, MessageRole, NewMessage, Project, SessionStatus, Ticket, TicketStatus,
};
use tracing::{error, info, warn};

use crate::agent::{spawn_agent, LineRead};
use crate::bus::BroadcastBus;
use crate::commands::drain_input;
use crate::config::DaemonConfig;

/// Review window granted when the agent reports completion.
const REVIEW_WINDOW_DAYS: i64 = 7;

/// Readiness wait per agent output read.
const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Execution-log preview length for assistant output.
const LOG_PREVIEW_CHARS: usize = 200;

/// Capabilities handed to workers and background tasks. Deliberately
/// narrow: the scheduler is never reachable from a worker.
#[derive(Clone)]
pub struct RuntimeHandles {
    pub store: Store,
    pub bus: BroadcastBus,
    pub notifier: Arc<Notifier>,
    pub backups: Arc<BackupService>,
    pub prompts: Arc<ContextBuilder>,
    pub config: Arc<DaemonConfig>,
    pub running: Arc<AtomicBool>,
}

impl RuntimeHandles {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// How one agent run ended, before disposition.
#[derive(Debug)]
enum RunOutcome {
    /// Agent announced TASK COMPLETED (or the user sent /done).
    Completed,
    /// Agent exited zero without an explicit completion signal.
    Success,
    /// User sent /stop.
    Interrupted,
    /// User sent /skip.
    Skipped,
    /// No activity for the stuck timeout.
    Stuck,
    /// Daemon shutdown.
    Stopped,
    Failed(String),
}

/// Serial executor for one project: claims tickets in priority+FIFO
/// order and drives each through the agent lifecycle. At most one
/// worker per project is alive at any moment (scheduler invariant).
pub struct ProjectWorker {
    handles: RuntimeHandles,
    project: Project,
}

impl ProjectWorker {
    pub fn new(handles: RuntimeHandles, project: Project) -> Self {
        Self { handles, project }
    }

    pub fn run(self) {
        info!(project = %self.project.code, "worker started");

        while self.handles.is_running() {
            match self.handles.store.next_ticket(self.project.id) {
                Ok(Some(ticket)) => self.process_ticket(ticket),
                Ok(None) => {
                    self.sleep_poll();
                    match self.handles.store.next_ticket(self.project.id) {
                        Ok(Some(ticket)) => self.process_ticket(ticket),
                        _ => {
                            info!(project = %self.project.code, "no more tickets, worker stopping");
                            break;
                        }
                    }
                }
                Err(err) => {
                    error!(project = %self.project.code, error = %err, "ticket claim failed");
                    self.sleep_poll();
                }
            }
        }

        info!(project = %self.project.code, "worker stopped");
    }

    fn sleep_poll(&self) {
        let deadline = Instant::now() + self.handles.config.poll_interval;
        while self.handles.is_running() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(100));
        }
    }

    fn process_ticket(&self, ticket: Ticket) {
        info!(ticket = %ticket.ticket_number, title = %ticket.title, "processing");

        // Backup failures are logged but never block the ticket.
        if let Err(err) = self
            .handles
            .backups
            .backup_project(&self.project, BackupTrigger::Auto)
        {
            warn!(ticket = %ticket.ticket_number, error = %err, "auto backup failed");
        }

        if let Err(err) = self.set_status(ticket.id, TicketStatus::InProgress) {
            error!(ticket = %ticket.ticket_number, error = %err, "cannot start ticket");
            return;
        }

        let started_at = Utc::now();
        let session_id = match self.handles.store.open_session(ticket.id) {
            Ok(id) => id,
            Err(err) => {
                error!(ticket = %ticket.ticket_number, error = %err, "cannot open session");
                return;
            }
        };
        self.log(session_id, ticket.id, "info", &format!("Starting: {}", ticket.ticket_number));

        self.seed_first_message(&ticket, session_id);

        // One parser per session: usage accumulates across re-runs and
        // is replaced by each terminating result record.
        let mut parser = StreamParser::new();

        loop {
            let prompt = match self.handles.prompts.build_prompt(&self.project, &ticket) {
                Ok(prompt) => prompt,
                Err(err) => {
                    error!(ticket = %ticket.ticket_number, error = %err, "prompt build failed");
                    self.dispose_failed(&ticket, session_id, &parser, started_at, &err.to_string());
                    return;
                }
            };

            parser.reset_completion();
            let mut fresh_feedback = false;
            let outcome = self.run_agent(&ticket, session_id, &prompt, &mut parser, &mut fresh_feedback);

            match outcome {
                RunOutcome::Completed | RunOutcome::Success | RunOutcome::Interrupted => {
                    if matches!(outcome, RunOutcome::Interrupted) {
                        // Give a trailing instruction a moment to land.
                        std::thread::sleep(Duration::from_secs(1));
                    }
                    let pending = self.append_pending_texts(&ticket, session_id);
                    if pending || fresh_feedback {
                        info!(ticket = %ticket.ticket_number, "continuing with user feedback");
                        continue;
                    }

                    let completed = matches!(outcome, RunOutcome::Completed);
                    let session_status = if matches!(outcome, RunOutcome::Interrupted) {
                        SessionStatus::Stopped
                    } else {
                        SessionStatus::Completed
                    };
                    self.dispose_awaiting(&ticket, completed);
                    self.finalize(&ticket, session_id, &parser, started_at, session_status);
                    info!(ticket = %ticket.ticket_number, "awaiting user input");
                    return;
                }

                RunOutcome::Skipped => {
                    let _ = self.set_status(ticket.id, TicketStatus::Skipped);
                    self.finalize(&ticket, session_id, &parser, started_at, SessionStatus::Skipped);
                    info!(ticket = %ticket.ticket_number, "skipped");
                    return;
                }

                RunOutcome::Stuck => {
                    let _ = self.set_status(ticket.id, TicketStatus::Stuck);
                    self.handles
                        .bus
                        .publish_stuck(ticket.id, "no agent activity within the stuck timeout");
                    self.handles.notifier.notify(
                        NotifyEvent::WatchdogAlert,
                        "Ticket Stuck",
                        &ticket.title,
                        Some(&self.project.name),
                        Some(&ticket.ticket_number),
                    );
                    self.finalize(&ticket, session_id, &parser, started_at, SessionStatus::Stuck);
                    return;
                }

                RunOutcome::Stopped => {
                    let _ = self.set_status(ticket.id, TicketStatus::Pending);
                    self.finalize(&ticket, session_id, &parser, started_at, SessionStatus::Stopped);
                    info!(ticket = %ticket.ticket_number, "parked for daemon shutdown");
                    return;
                }

                RunOutcome::Failed(reason) => {
                    self.dispose_failed(&ticket, session_id, &parser, started_at, &reason);
                    return;
                }
            }
        }
    }

    fn run_agent(
        &self,
        ticket: &Ticket,
        session_id: i64,
        prompt: &str,
        parser: &mut StreamParser,
        fresh_feedback: &mut bool,
    ) -> RunOutcome {
        for root in self.project.allowed_paths() {
            if let Err(err) = std::fs::create_dir_all(root) {
                warn!(path = root, error = %err, "cannot create project root");
            }
        }
        let cwd = Path::new(self.project.primary_path());
        if !cwd.exists() {
            return RunOutcome::Failed(format!("working directory missing: {}", cwd.display()));
        }

        let model = ticket
            .model
            .as_deref()
            .or(self.project.model.as_deref())
            .unwrap_or(&self.handles.config.default_model);
        info!(ticket = %ticket.ticket_number, model, "running agent");

        let mut agent = match spawn_agent(
            &self.handles.config.claude_bin,
            cwd,
            self.handles.config.claude_env_file.as_deref(),
            model,
            prompt,
        ) {
            Ok(agent) => agent,
            Err(err) => return RunOutcome::Failed(err.to_string()),
        };

        let mut last_activity = Instant::now();

        loop {
            // Interjections first, so commands beat buffered output.
            match drain_input(&self.handles.store, ticket.id) {
                Ok(input) => {
                    for text in &input.texts {
                        self.save_message(ticket.id, session_id, &NewMessage::text(MessageRole::User, text.clone()));
                        self.log(session_id, ticket.id, "info", &format!(
                            "User message: {}",
                            taskforge_types::truncate_chars(text, 100)
                        ));
                        *fresh_feedback = true;
                    }
                    if let Some(command) = input.first_command() {
                        agent.terminate();
                        return match command {
                            taskforge_types::UserCommand::Skip => {
                                self.save_message(ticket.id, session_id, &NewMessage::text(
                                    MessageRole::System,
                                    "Ticket paused by user (/skip)",
                                ));
                                self.log(session_id, ticket.id, "warning", "User command: /skip");
                                RunOutcome::Skipped
                            }
                            taskforge_types::UserCommand::Done => {
                                self.save_message(ticket.id, session_id, &NewMessage::text(
                                    MessageRole::System,
                                    "Ticket closed by user (/done)",
                                ));
                                self.log(session_id, ticket.id, "info", "User command: /done");
                                RunOutcome::Completed
                            }
                            taskforge_types::UserCommand::Stop => {
                                self.save_message(ticket.id, session_id, &NewMessage::text(
                                    MessageRole::System,
                                    "Stopped by user (/stop) - waiting for new instructions",
                                ));
                                self.log(session_id, ticket.id, "warning", "User command: /stop");
                                RunOutcome::Interrupted
                            }
                        };
                    }
                }
                Err(err) => warn!(ticket = %ticket.ticket_number, error = %err, "queue poll failed"),
            }

            if !self.handles.is_running() {
                agent.terminate();
                return RunOutcome::Stopped;
            }

            match agent.read_line(READ_TIMEOUT) {
                LineRead::Line(line) => {
                    let outcome = parser.parse_line(&line);
                    if !outcome.actions.is_empty() {
                        last_activity = Instant::now();
                    }
                    self.apply_actions(ticket.id, session_id, outcome.actions);
                    if outcome.usage_updated
                        && let Err(err) = self.handles.store.update_session_progress(
                            session_id,
                            ticket.id,
                            parser.usage(),
                            parser.api_calls(),
                        )
                    {
                        warn!(ticket = %ticket.ticket_number, error = %err, "usage rollup failed");
                    }
                }
                LineRead::Timeout => {}
                LineRead::Eof => break,
            }

            if last_activity.elapsed() > self.handles.config.stuck_timeout {
                error!(ticket = %ticket.ticket_number, "stuck timeout reached");
                self.handles.notifier.send_email(
                    &format!("Stuck on {}", ticket.ticket_number),
                    &format!(
                        "Ticket: {}\nNo activity for {} minutes.",
                        ticket.title,
                        self.handles.config.stuck_timeout.as_secs() / 60
                    ),
                );
                agent.terminate();
                return RunOutcome::Stuck;
            }
        }

        match agent.wait() {
            Ok(status) => {
                if parser.completed() {
                    RunOutcome::Completed
                } else if status.success() {
                    RunOutcome::Success
                } else {
                    RunOutcome::Failed(format!("agent exited with {}", status))
                }
            }
            Err(err) => RunOutcome::Failed(err.to_string()),
        }
    }

    fn apply_actions(&self, ticket_id: i64, session_id: i64, actions: Vec<StreamAction>) {
        for action in actions {
            match action {
                StreamAction::AssistantText(text) => {
                    let preview = taskforge_types::truncate_chars(&text, LOG_PREVIEW_CHARS);
                    self.save_message(
                        ticket_id,
                        session_id,
                        &NewMessage::text(MessageRole::Assistant, text),
                    );
                    self.log(session_id, ticket_id, "output", &preview);
                }
                StreamAction::ToolUse { name, input } => {
                    self.log(session_id, ticket_id, "output", &format!("Tool: {}", name));
                    self.save_message(ticket_id, session_id, &NewMessage::tool_use(name, input));
                }
                StreamAction::ToolResult(text) => {
                    self.save_message(
                        ticket_id,
                        session_id,
                        &NewMessage::text(MessageRole::ToolResult, text),
                    );
                }
                StreamAction::SystemError(message) => {
                    self.save_message(
                        ticket_id,
                        session_id,
                        &NewMessage::text(MessageRole::System, format!("Error: {}", message)),
                    );
                    self.log(session_id, ticket_id, "error", &message);
                }
                StreamAction::RawOutput(line) => {
                    self.log(session_id, ticket_id, "output", &line);
                }
            }
        }
    }

    /// Persist one transcript message and fan it out to observers.
    fn save_message(&self, ticket_id: i64, session_id: i64, new: &NewMessage) {
        match self.handles.store.append_message(ticket_id, Some(session_id), new) {
            Ok(message) => self.handles.bus.publish_message(MessageBody {
                id: message.id,
                ticket_id: message.ticket_id,
                role: message.role,
                content: message.content,
                tool_name: message.tool_name,
                created_at: message.created_at,
            }),
            Err(err) => error!(ticket_id, error = %err, "message persist failed"),
        }
    }

    fn log(&self, session_id: i64, ticket_id: i64, log_type: &str, message: &str) {
        if let Err(err) = self.handles.store.log_execution(session_id, log_type, message) {
            warn!(session_id, error = %err, "execution log failed");
        }
        self.handles.bus.publish_log(ticket_id, log_type, message);
    }

    fn set_status(&self, ticket_id: i64, status: TicketStatus) -> taskforge_store::Result<()> {
        self.handles.store.set_ticket_status(ticket_id, status)?;
        self.handles.bus.publish_status(ticket_id, status);
        Ok(())
    }

    fn seed_first_message(&self, ticket: &Ticket, session_id: i64) {
        match self.handles.store.message_count(ticket.id) {
            Ok(0) => self.save_message(
                ticket.id,
                session_id,
                &NewMessage::text(
                    MessageRole::User,
                    format!("Task: {}\n\n{}", ticket.title, ticket.description),
                ),
            ),
            Ok(_) => {}
            Err(err) => warn!(ticket = %ticket.ticket_number, error = %err, "message count failed"),
        }
    }

    /// Drain the queue post-run; free text lands in the conversation.
    /// Returns whether anything new arrived.
    fn append_pending_texts(&self, ticket: &Ticket, session_id: i64) -> bool {
        match drain_input(&self.handles.store, ticket.id) {
            Ok(input) => {
                for text in &input.texts {
                    self.save_message(
                        ticket.id,
                        session_id,
                        &NewMessage::text(MessageRole::User, text.clone()),
                    );
                }
                !input.texts.is_empty()
            }
            Err(err) => {
                warn!(ticket = %ticket.ticket_number, error = %err, "queue drain failed");
                false
            }
        }
    }

    /// Park the ticket for human review. Completion grants a review
    /// deadline; a bare success or interruption does not.
    fn dispose_awaiting(&self, ticket: &Ticket, completed: bool) {
        let result = if completed {
            self.handles.store.complete_ticket(
                ticket.id,
                Some("Completed successfully"),
                Utc::now() + chrono::Duration::days(REVIEW_WINDOW_DAYS),
            )
        } else {
            self.handles
                .store
                .set_ticket_status(ticket.id, TicketStatus::AwaitingInput)
        };
        if let Err(err) = result {
            error!(ticket = %ticket.ticket_number, error = %err, "awaiting transition failed");
            return;
        }
        self.handles
            .bus
            .publish_status(ticket.id, TicketStatus::AwaitingInput);
        self.handles.notifier.notify(
            NotifyEvent::AwaitingInput,
            "Task Completed - Awaiting Review",
            &ticket.title,
            Some(&self.project.name),
            Some(&ticket.ticket_number),
        );
    }

    fn dispose_failed(
        &self,
        ticket: &Ticket,
        session_id: i64,
        parser: &StreamParser,
        started_at: DateTime<Utc>,
        reason: &str,
    ) {
        error!(ticket = %ticket.ticket_number, reason, "failed");
        if let Err(err) = self.handles.store.fail_ticket(ticket.id, reason) {
            error!(ticket = %ticket.ticket_number, error = %err, "failure transition failed");
        }
        self.handles
            .bus
            .publish_status(ticket.id, TicketStatus::Failed);
        self.handles.notifier.notify(
            NotifyEvent::TicketFailed,
            "Task Failed",
            reason,
            Some(&self.project.name),
            Some(&ticket.ticket_number),
        );
        self.finalize(ticket, session_id, parser, started_at, SessionStatus::Failed);
    }

    fn finalize(
        &self,
        ticket: &Ticket,
        session_id: i64,
        parser: &StreamParser,
        started_at: DateTime<Utc>,
        status: SessionStatus,
    ) {
        if let Err(err) = self.handles.store.finalize_session(
            session_id,
            ticket.id,
            self.project.id,
            status,
            parser.usage(),
            parser.api_calls(),
            started_at,
        ) {
            error!(ticket = %ticket.ticket_number, error = %err, "session finalize failed");
            return;
        }
        info!(
            ticket = %ticket.ticket_number,
            tokens = parser.usage().total(),
            api_calls = parser.api_calls(),
            "session closed"
        );
    }
}
