use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use taskforge_notify::{NotifyEvent, ReplyRouter, TelegramClient};
use taskforge_store::{with_retry, Store};
use taskforge_types::TicketStatus;
use tracing::{error, info, warn};

use crate::pid::{remove_pid_file, write_pid_file};
use crate::watchdog::Watchdog;
use crate::worker::{ProjectWorker, RuntimeHandles};

/// Store retry policy at startup/recovery.
const RECOVERY_ATTEMPTS: usize = 5;
const RECOVERY_BACKOFF: Duration = Duration::from_secs(2);

/// Join patience per worker at shutdown.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Recovery window for reopening failed tickets.
const FAILED_REOPEN_WINDOW_SECS: i64 = 3600;

struct WorkerHandle {
    code: String,
    handle: JoinHandle<()>,
}

/// Top-level daemon loop: discovers eligible projects, caps
/// parallelism, spawns and reaps workers, closes expired reviews, and
/// runs crash recovery at startup.
pub struct Scheduler {
    handles: RuntimeHandles,
    workers: Mutex<HashMap<i64, WorkerHandle>>,
}

impl Scheduler {
    pub fn new(handles: RuntimeHandles) -> Self {
        Self {
            handles,
            workers: Mutex::new(HashMap::new()),
        }
    }

    pub fn run(&self) -> Result<()> {
        let config = &self.handles.config;
        write_pid_file(&config.pid_file)?;
        info!(pid = std::process::id(), "daemon starting");

        if let Err(err) = recover(&self.handles.store) {
            remove_pid_file(&config.pid_file);
            return Err(err).context("startup recovery");
        }

        if let Err(err) = self.handles.store.log_daemon("info", "daemon started") {
            warn!(error = %err, "daemon log failed");
        }

        let mut background = Vec::new();
        background.push(self.spawn_watchdog()?);
        if let Some(poller) = self.spawn_inbound_poller()? {
            background.push(poller);
        }

        while self.handles.is_running() {
            self.tick();
            self.sleep_poll();
        }

        info!("stop requested, joining workers");
        self.shutdown(background);
        remove_pid_file(&config.pid_file);
        let _ = self.handles.store.log_daemon("info", "daemon stopped");
        info!("daemon stopped");
        Ok(())
    }

    /// One scheduling pass. Public for integration tests, which drive
    /// ticks directly instead of running the loop.
    pub fn tick(&self) {
        self.reap_finished();

        let live: Vec<i64> = self.workers.lock().unwrap().keys().copied().collect();

        // Orphaned in_progress tickets (their worker died) go back to
        // the queue.
        match self.handles.store.reset_in_progress_except(&live) {
            Ok(orphans) => {
                for ticket_id in orphans {
                    warn!(ticket_id, "orphaned in_progress ticket reset to open");
                    self.handles.bus.publish_status(ticket_id, TicketStatus::Open);
                }
            }
            Err(err) => warn!(error = %err, "orphan sweep failed"),
        }

        // Expired review windows close automatically.
        match self.handles.store.auto_close_expired(Utc::now()) {
            Ok(closed) => {
                for ticket_id in closed {
                    info!(ticket_id, "auto-closed after review deadline");
                    self.handles.bus.publish_status(ticket_id, TicketStatus::Done);
                    if let Ok(Some(ticket)) = self.handles.store.get_ticket(ticket_id) {
                        self.handles.notifier.notify(
                            NotifyEvent::TicketCompleted,
                            "Ticket Auto-Closed",
                            &format!("{} (no review within 7 days)", ticket.title),
                            None,
                            Some(&ticket.ticket_number),
                        );
                    }
                }
            }
            Err(err) => warn!(error = %err, "auto-close sweep failed"),
        }

        let projects = match self.handles.store.projects_with_open_tickets() {
            Ok(projects) => projects,
            Err(err) => {
                warn!(error = %err, "project discovery failed");
                return;
            }
        };

        let mut workers = self.workers.lock().unwrap();
        for project in projects {
            if workers.contains_key(&project.id) {
                continue;
            }
            if workers.len() >= self.handles.config.max_parallel_projects {
                break;
            }

            let worker = ProjectWorker::new(self.handles.clone(), project.clone());
            let thread = std::thread::Builder::new()
                .name(format!("worker-{}", project.code.to_lowercase()))
                .spawn(move || worker.run());
            match thread {
                Ok(handle) => {
                    info!(project = %project.code, "worker spawned");
                    workers.insert(
                        project.id,
                        WorkerHandle {
                            code: project.code.clone(),
                            handle,
                        },
                    );
                }
                Err(err) => error!(project = %project.code, error = %err, "worker spawn failed"),
            }
        }
    }

    /// Live worker count (scheduling invariant: never above the
    /// configured parallelism cap).
    pub fn worker_count(&self) -> usize {
        self.workers.lock().unwrap().len()
    }

    fn reap_finished(&self) {
        let mut workers = self.workers.lock().unwrap();
        let finished: Vec<i64> = workers
            .iter()
            .filter(|(_, w)| w.handle.is_finished())
            .map(|(id, _)| *id)
            .collect();
        for id in finished {
            if let Some(worker) = workers.remove(&id) {
                info!(project = %worker.code, "worker reaped");
                let _ = worker.handle.join();
            }
        }
    }

    fn spawn_watchdog(&self) -> Result<JoinHandle<()>> {
        let watchdog = Watchdog::new(self.handles.clone());
        std::thread::Builder::new()
            .name("watchdog".to_string())
            .spawn(move || watchdog.run())
            .context("spawn watchdog")
    }

    /// Inbound reply poller; only when a bot token is configured.
    fn spawn_inbound_poller(&self) -> Result<Option<JoinHandle<()>>> {
        let config = &self.handles.config;
        let (Some(token), Some(chat_id)) =
            (&config.telegram_bot_token, &config.telegram_chat_id)
        else {
            return Ok(None);
        };

        let telegram = TelegramClient::new(token.clone(), chat_id.clone())?;
        let mut router = ReplyRouter::new(
            self.handles.store.clone(),
            telegram,
            self.handles.prompts.config().clone(),
        );
        let handles = self.handles.clone();
        let interval = config.inbound_poll_interval;

        let handle = std::thread::Builder::new()
            .name("notify-poller".to_string())
            .spawn(move || {
                info!("inbound poller started");
                while handles.is_running() {
                    if let Err(err) = router.poll_once() {
                        warn!(error = %err, "inbound poll failed");
                    }
                    let deadline = Instant::now() + interval;
                    while handles.is_running() && Instant::now() < deadline {
                        std::thread::sleep(Duration::from_millis(200));
                    }
                }
                info!("inbound poller stopped");
            })
            .context("spawn inbound poller")?;
        Ok(Some(handle))
    }

    fn sleep_poll(&self) {
        let deadline = Instant::now() + self.handles.config.poll_interval;
        while self.handles.is_running() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(100));
        }
    }

    fn shutdown(&self, background: Vec<JoinHandle<()>>) {
        let workers: Vec<WorkerHandle> = {
            let mut map = self.workers.lock().unwrap();
            let ids: Vec<i64> = map.keys().copied().collect();
            ids.into_iter().filter_map(|id| map.remove(&id)).collect()
        };

        for worker in workers {
            let deadline = Instant::now() + JOIN_TIMEOUT;
            while !worker.handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(100));
            }
            if worker.handle.is_finished() {
                let _ = worker.handle.join();
            } else {
                warn!(project = %worker.code, "worker did not stop in time");
            }
        }

        for handle in background {
            let _ = handle.join();
        }
    }
}

/// Startup recovery, retried on transient store errors: no ticket
/// stays in_progress, recently failed tickets get another chance, and
/// no session stays running.
pub fn recover(store: &Store) -> Result<()> {
    let reset = with_retry(RECOVERY_ATTEMPTS, RECOVERY_BACKOFF, || {
        store.reset_all_in_progress()
    })?;
    let reopened = with_retry(RECOVERY_ATTEMPTS, RECOVERY_BACKOFF, || {
        store.reopen_recent_failed(Utc::now() - chrono::Duration::seconds(FAILED_REOPEN_WINDOW_SECS))
    })?;
    let sessions = with_retry(RECOVERY_ATTEMPTS, RECOVERY_BACKOFF, || {
        store.mark_running_sessions_stuck()
    })?;

    info!(reset, reopened, sessions, "recovery finished");
    Ok(())
}
