#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use taskforge_backup::BackupService;
use taskforge_context::{ContextBuilder, ContextConfig};
use taskforge_notify::Notifier;
use taskforge_runtime::{recover, BroadcastBus, DaemonConfig, ProjectWorker, RuntimeHandles};
use taskforge_store::{NewProject, NewTicket, Store};
use taskforge_types::{
    ticket_topic, BusEvent, MessageRole, QueuedMessageType, SessionStatus, TicketStatus,
};

struct Fixture {
    handles: RuntimeHandles,
    store: Store,
    project_id: i64,
    _dirs: Vec<tempfile::TempDir>,
}

fn write_script(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join("agent");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn fixture(agent_body: &str) -> Fixture {
    let bin_dir = tempfile::tempdir().unwrap();
    let backups_dir = tempfile::tempdir().unwrap();
    let web_dir = tempfile::tempdir().unwrap();
    let agent = write_script(bin_dir.path(), agent_body);

    let store = Store::open_in_memory().unwrap();
    let project = store
        .create_project(&NewProject {
            name: "Web project".to_string(),
            code: "WEB".to_string(),
            web_path: Some(web_dir.path().to_string_lossy().into_owned()),
            ..Default::default()
        })
        .unwrap();

    let config = DaemonConfig {
        claude_bin: agent,
        claude_env_file: None,
        backups_root: backups_dir.path().to_path_buf(),
        poll_interval: Duration::from_millis(200),
        stuck_timeout: Duration::from_secs(600),
        ..Default::default()
    };

    let context_config = ContextConfig {
        claude_bin: PathBuf::from("/nonexistent/claude-binary"),
        ..Default::default()
    };

    let handles = RuntimeHandles {
        store: store.clone(),
        bus: BroadcastBus::new(),
        notifier: Arc::new(Notifier::disabled()),
        backups: Arc::new(BackupService::new(backups_dir.path())),
        prompts: Arc::new(ContextBuilder::new(store.clone(), context_config, None)),
        config: Arc::new(config),
        running: Arc::new(AtomicBool::new(true)),
    };

    Fixture {
        handles,
        store,
        project_id: project.id,
        _dirs: vec![bin_dir, backups_dir, web_dir],
    }
}

fn happy_agent() -> String {
    [
        r#"echo '{"type":"assistant","message":{"content":[{"type":"text","text":"All done. TASK COMPLETED"}],"usage":{"input_tokens":100,"output_tokens":20}}}'"#,
        r#"echo '{"type":"result","usage":{"input_tokens":500,"output_tokens":50},"result":"ok"}'"#,
    ]
    .join("\n")
}

fn run_worker(fixture: &Fixture) {
    let project = fixture
        .store
        .get_project(fixture.project_id)
        .unwrap()
        .unwrap();
    ProjectWorker::new(fixture.handles.clone(), project).run();
}

#[test]
fn happy_path_parks_ticket_for_review() {
    let fixture = fixture(&happy_agent());
    let ticket = fixture
        .store
        .create_ticket(&NewTicket::new(fixture.project_id, "Ship it", "do the thing"))
        .unwrap();
    let events = fixture.handles.bus.subscribe(&ticket_topic(ticket.id));

    run_worker(&fixture);

    let ticket = fixture.store.get_ticket(ticket.id).unwrap().unwrap();
    assert_eq!(ticket.status, TicketStatus::AwaitingInput);

    // Review window is seven days out.
    let deadline = ticket.review_deadline.expect("review deadline set");
    let hours_out = (deadline - Utc::now()).num_hours();
    assert!(
        (167..=169).contains(&hours_out),
        "deadline {} hours out",
        hours_out
    );

    // Authoritative result usage replaced the incremental counters.
    assert_eq!(ticket.total_tokens, 550);

    let session_id = 1;
    let session = fixture.store.get_session(session_id).unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.tokens_used, 550);
    assert_eq!(session.api_calls, 1);

    // Transcript: seeded task, assistant text, result.
    let messages = fixture.store.unsummarized_messages(ticket.id).unwrap();
    let roles: Vec<MessageRole> = messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::ToolResult
        ]
    );
    assert!(messages[1]
        .content
        .as_deref()
        .unwrap()
        .contains("TASK COMPLETED"));

    // Broadcasts arrived in lifecycle order.
    let mut statuses = Vec::new();
    let mut saw_assistant_message = false;
    while let Ok(event) = events.try_recv() {
        match event {
            BusEvent::Status { status, .. } => statuses.push(status),
            BusEvent::Message { message, .. } => {
                if message.role == MessageRole::Assistant {
                    saw_assistant_message = true;
                }
            }
            _ => {}
        }
    }
    assert_eq!(
        statuses,
        vec![TicketStatus::InProgress, TicketStatus::AwaitingInput]
    );
    assert!(saw_assistant_message);

    // Auto backup ran before the agent.
    let archives = fixture
        .handles
        .backups
        .list_archives("WEB")
        .unwrap();
    assert_eq!(archives.len(), 1);
    assert!(archives[0].to_string_lossy().contains("_auto"));
}

#[test]
fn zero_exit_without_signal_awaits_input_without_deadline() {
    let fixture = fixture(
        r#"echo '{"type":"assistant","message":{"content":[{"type":"text","text":"made progress"}]}}'"#,
    );
    let ticket = fixture
        .store
        .create_ticket(&NewTicket::new(fixture.project_id, "t", ""))
        .unwrap();

    run_worker(&fixture);

    let ticket = fixture.store.get_ticket(ticket.id).unwrap().unwrap();
    assert_eq!(ticket.status, TicketStatus::AwaitingInput);
    assert!(ticket.review_deadline.is_none());

    let session = fixture.store.get_session(1).unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
}

#[test]
fn nonzero_exit_fails_the_ticket() {
    let fixture = fixture("exit 3");
    let ticket = fixture
        .store
        .create_ticket(&NewTicket::new(fixture.project_id, "t", ""))
        .unwrap();

    run_worker(&fixture);

    let ticket = fixture.store.get_ticket(ticket.id).unwrap().unwrap();
    assert_eq!(ticket.status, TicketStatus::Failed);
    assert!(ticket.result_summary.unwrap().contains("exited"));

    let session = fixture.store.get_session(1).unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
}

#[test]
fn stop_without_instructions_awaits_input() {
    let fixture = fixture("sleep 30");
    let ticket = fixture
        .store
        .create_ticket(&NewTicket::new(fixture.project_id, "t", ""))
        .unwrap();
    fixture
        .store
        .enqueue_user_message(ticket.id, "/stop", QueuedMessageType::Command)
        .unwrap();

    run_worker(&fixture);

    let ticket = fixture.store.get_ticket(ticket.id).unwrap().unwrap();
    assert_eq!(ticket.status, TicketStatus::AwaitingInput);

    let session = fixture.store.get_session(1).unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Stopped);
}

#[test]
fn skip_command_skips_the_ticket() {
    let fixture = fixture("sleep 30");
    let ticket = fixture
        .store
        .create_ticket(&NewTicket::new(fixture.project_id, "t", ""))
        .unwrap();
    fixture
        .store
        .enqueue_user_message(ticket.id, "/skip", QueuedMessageType::Command)
        .unwrap();

    run_worker(&fixture);

    let ticket = fixture.store.get_ticket(ticket.id).unwrap().unwrap();
    assert_eq!(ticket.status, TicketStatus::Skipped);
    let session = fixture.store.get_session(1).unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Skipped);
}

#[test]
fn stop_with_instructions_reruns_with_the_feedback() {
    // Every invocation completes; the /stop + feedback pair forces a
    // second run whose transcript follows the user message.
    let fixture = fixture(&happy_agent());
    let ticket = fixture
        .store
        .create_ticket(&NewTicket::new(fixture.project_id, "t", ""))
        .unwrap();
    fixture
        .store
        .enqueue_user_message(ticket.id, "please use tabs not spaces", QueuedMessageType::Message)
        .unwrap();
    fixture
        .store
        .enqueue_user_message(ticket.id, "/stop", QueuedMessageType::Command)
        .unwrap();

    run_worker(&fixture);

    let ticket = fixture.store.get_ticket(ticket.id).unwrap().unwrap();
    assert_eq!(ticket.status, TicketStatus::AwaitingInput);

    let messages = fixture.store.unsummarized_messages(ticket.id).unwrap();
    let feedback_pos = messages
        .iter()
        .position(|m| {
            m.role == MessageRole::User
                && m.content.as_deref() == Some("please use tabs not spaces")
        })
        .expect("feedback in transcript");
    let completion_pos = messages
        .iter()
        .position(|m| {
            m.role == MessageRole::Assistant
                && m.content.as_deref().unwrap_or("").contains("TASK COMPLETED")
        })
        .expect("completion in transcript");
    assert!(feedback_pos < completion_pos);
}

#[test]
fn silent_agent_hits_the_stuck_timeout() {
    let mut fixture = fixture("sleep 30");
    {
        let config = Arc::get_mut(&mut fixture.handles.config).unwrap();
        config.stuck_timeout = Duration::from_millis(300);
    }
    let ticket = fixture
        .store
        .create_ticket(&NewTicket::new(fixture.project_id, "t", ""))
        .unwrap();

    run_worker(&fixture);

    let ticket = fixture.store.get_ticket(ticket.id).unwrap().unwrap();
    assert_eq!(ticket.status, TicketStatus::Stuck);
    let session = fixture.store.get_session(1).unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Stuck);
}

#[test]
fn recovery_clears_crashed_state() {
    let fixture = fixture("true");
    let ticket = fixture
        .store
        .create_ticket(&NewTicket::new(fixture.project_id, "t", ""))
        .unwrap();
    fixture
        .store
        .set_ticket_status(ticket.id, TicketStatus::InProgress)
        .unwrap();
    let session_id = fixture.store.open_session(ticket.id).unwrap();

    recover(&fixture.store).unwrap();

    let ticket = fixture.store.get_ticket(ticket.id).unwrap().unwrap();
    assert_eq!(ticket.status, TicketStatus::Open);
    let session = fixture.store.get_session(session_id).unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Stuck);
    assert!(session.ended_at.is_some());
}
