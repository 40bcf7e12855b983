#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use taskforge_backup::BackupService;
use taskforge_context::{ContextBuilder, ContextConfig};
use taskforge_notify::Notifier;
use taskforge_runtime::{BroadcastBus, DaemonConfig, RuntimeHandles, Scheduler, Watchdog};
use taskforge_store::{NewProject, NewTicket, Store};
use taskforge_types::{
    BusEvent, MessageRole, NewMessage, SessionStatus, TicketStatus, STUCK_TOPIC,
};

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn handles(agent_body: &str, aux_body: Option<&str>, dirs: &mut Vec<tempfile::TempDir>) -> RuntimeHandles {
    let bin_dir = tempfile::tempdir().unwrap();
    let backups_dir = tempfile::tempdir().unwrap();
    let agent = write_script(bin_dir.path(), "agent", agent_body);
    let aux = match aux_body {
        Some(body) => write_script(bin_dir.path(), "aux-model", body),
        None => PathBuf::from("/nonexistent/claude-binary"),
    };

    let store = Store::open_in_memory().unwrap();
    let config = DaemonConfig {
        claude_bin: agent,
        claude_env_file: None,
        backups_root: backups_dir.path().to_path_buf(),
        poll_interval: Duration::from_millis(100),
        ..Default::default()
    };
    let context_config = ContextConfig {
        claude_bin: aux,
        aux_timeout: Duration::from_secs(10),
        ..Default::default()
    };

    let handles = RuntimeHandles {
        store: store.clone(),
        bus: BroadcastBus::new(),
        notifier: Arc::new(Notifier::disabled()),
        backups: Arc::new(BackupService::new(backups_dir.path())),
        prompts: Arc::new(ContextBuilder::new(store, context_config, None)),
        config: Arc::new(config),
        running: Arc::new(AtomicBool::new(true)),
    };
    dirs.push(bin_dir);
    dirs.push(backups_dir);
    handles
}

fn seed_project(store: &Store, code: &str, root: &Path) -> i64 {
    store
        .create_project(&NewProject {
            name: format!("{} project", code),
            code: code.to_string(),
            web_path: Some(root.to_string_lossy().into_owned()),
            ..Default::default()
        })
        .unwrap()
        .id
}

#[test]
fn tick_resets_orphaned_tickets() {
    let mut dirs = Vec::new();
    let handles = handles("true", None, &mut dirs);
    let web = tempfile::tempdir().unwrap();
    let project_id = seed_project(&handles.store, "ORP", web.path());
    let ticket = handles
        .store
        .create_ticket(&NewTicket::new(project_id, "t", ""))
        .unwrap();
    handles
        .store
        .set_ticket_status(ticket.id, TicketStatus::InProgress)
        .unwrap();

    // Stopped daemon: sweeps run, no worker claims anything.
    handles.running.store(false, Ordering::SeqCst);
    let scheduler = Scheduler::new(handles.clone());
    scheduler.tick();

    let ticket = handles.store.get_ticket(ticket.id).unwrap().unwrap();
    assert_eq!(ticket.status, TicketStatus::Open);
}

#[test]
fn tick_auto_closes_expired_reviews() {
    let mut dirs = Vec::new();
    let handles = handles("true", None, &mut dirs);
    let web = tempfile::tempdir().unwrap();
    let project_id = seed_project(&handles.store, "EXP", web.path());
    let ticket = handles
        .store
        .create_ticket(&NewTicket::new(project_id, "t", ""))
        .unwrap();
    handles
        .store
        .complete_ticket(ticket.id, None, Utc::now() - chrono::Duration::hours(1))
        .unwrap();

    handles.running.store(false, Ordering::SeqCst);
    Scheduler::new(handles.clone()).tick();

    let ticket = handles.store.get_ticket(ticket.id).unwrap().unwrap();
    assert_eq!(ticket.status, TicketStatus::Done);
    assert_eq!(ticket.close_reason.as_deref(), Some("auto_closed_7days"));
}

#[test]
fn tick_caps_parallel_workers() {
    let mut dirs = Vec::new();
    let handles = handles("sleep 2", None, &mut dirs);
    let roots: Vec<tempfile::TempDir> = (0..4).map(|_| tempfile::tempdir().unwrap()).collect();
    for (i, root) in roots.iter().enumerate() {
        let project_id = seed_project(&handles.store, &format!("CAP{}", i), root.path());
        handles
            .store
            .create_ticket(&NewTicket::new(project_id, "t", ""))
            .unwrap();
    }

    let scheduler = Scheduler::new(handles.clone());
    scheduler.tick();
    assert_eq!(scheduler.worker_count(), 3);

    handles.running.store(false, Ordering::SeqCst);
    // Workers terminate their agents and wind down.
    let deadline = Instant::now() + Duration::from_secs(10);
    while scheduler.worker_count() > 0 && Instant::now() < deadline {
        scheduler.tick();
        std::thread::sleep(Duration::from_millis(100));
    }
    assert_eq!(scheduler.worker_count(), 0);
}

#[test]
fn end_to_end_tick_processes_a_ticket() {
    let mut dirs = Vec::new();
    let agent = r#"echo '{"type":"assistant","message":{"content":[{"type":"text","text":"TASK COMPLETED"}],"usage":{"input_tokens":10,"output_tokens":5}}}'"#;
    let handles = handles(agent, None, &mut dirs);
    let web = tempfile::tempdir().unwrap();
    let project_id = seed_project(&handles.store, "E2E", web.path());
    let ticket = handles
        .store
        .create_ticket(&NewTicket::new(project_id, "ship", "it"))
        .unwrap();

    let scheduler = Scheduler::new(handles.clone());
    scheduler.tick();

    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        let current = handles.store.get_ticket(ticket.id).unwrap().unwrap();
        if current.status == TicketStatus::AwaitingInput {
            break;
        }
        assert!(
            Instant::now() < deadline,
            "ticket stuck in {:?}",
            current.status
        );
        std::thread::sleep(Duration::from_millis(100));
    }

    handles.running.store(false, Ordering::SeqCst);
}

#[test]
fn watchdog_marks_looping_ticket_stuck() {
    let mut dirs = Vec::new();
    let handles = handles(
        "true",
        Some("cat > /dev/null\necho 'STUCK: repeated identical edit'"),
        &mut dirs,
    );
    let web = tempfile::tempdir().unwrap();
    let project_id = seed_project(&handles.store, "WDG", web.path());
    let ticket = handles
        .store
        .create_ticket(&NewTicket::new(project_id, "loops", ""))
        .unwrap();
    handles
        .store
        .set_ticket_status(ticket.id, TicketStatus::InProgress)
        .unwrap();
    let session_id = handles.store.open_session(ticket.id).unwrap();
    for i in 0..15 {
        handles
            .store
            .append_message(
                ticket.id,
                Some(session_id),
                &NewMessage::text(MessageRole::Assistant, format!("editing the same file {}", i)),
            )
            .unwrap();
    }

    let stuck_events = handles.bus.subscribe(STUCK_TOPIC);
    Watchdog::new(handles.clone()).tick();

    let ticket = handles.store.get_ticket(ticket.id).unwrap().unwrap();
    assert_eq!(ticket.status, TicketStatus::Stuck);

    let session = handles.store.get_session(session_id).unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Stuck);
    assert!(session.ended_at.is_some());

    let messages = handles.store.unsummarized_messages(ticket.id).unwrap();
    let note = messages.last().unwrap();
    assert_eq!(note.role, MessageRole::System);
    assert!(note
        .content
        .as_deref()
        .unwrap()
        .contains("repeated identical edit"));

    match stuck_events.try_recv().unwrap() {
        BusEvent::TicketStuck { ticket_id, reason } => {
            assert_eq!(ticket_id, ticket.id);
            assert!(reason.contains("repeated identical edit"));
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[test]
fn watchdog_leaves_progressing_tickets_alone() {
    let mut dirs = Vec::new();
    let handles = handles("true", Some("cat > /dev/null\necho 'CONTINUE'"), &mut dirs);
    let web = tempfile::tempdir().unwrap();
    let project_id = seed_project(&handles.store, "OKK", web.path());
    let ticket = handles
        .store
        .create_ticket(&NewTicket::new(project_id, "fine", ""))
        .unwrap();
    handles
        .store
        .set_ticket_status(ticket.id, TicketStatus::InProgress)
        .unwrap();
    for i in 0..12 {
        handles
            .store
            .append_message(
                ticket.id,
                None,
                &NewMessage::text(MessageRole::Assistant, format!("step {}", i)),
            )
            .unwrap();
    }

    Watchdog::new(handles.clone()).tick();

    let ticket = handles.store.get_ticket(ticket.id).unwrap().unwrap();
    assert_eq!(ticket.status, TicketStatus::InProgress);
}
