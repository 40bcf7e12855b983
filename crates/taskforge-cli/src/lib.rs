mod args;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use taskforge_backup::{BackupService, BackupTrigger};
use taskforge_context::{ContextBuilder, ContextConfig};
use taskforge_notify::{Mailer, Notifier, TelegramClient};
use taskforge_runtime::{recover, BroadcastBus, DaemonConfig, RuntimeHandles, Scheduler};
use taskforge_store::{with_retry, Store};

pub use args::{Cli, Command};

/// Store open retry policy at startup.
const SETUP_ATTEMPTS: usize = 5;
const SETUP_BACKOFF: Duration = Duration::from_secs(2);

pub fn run(cli: Cli) -> Result<()> {
    let config = DaemonConfig::load(&cli.config)
        .with_context(|| format!("load configuration from {}", cli.config.display()))?;

    init_tracing(&config.log_file);

    match cli.command {
        Command::Run => run_daemon(config),
        Command::Recover => {
            let store = open_store(&config)?;
            recover(&store).context("recovery")?;
            println!("{}", "Recovery finished".green());
            Ok(())
        }
        Command::Backup { project_code } => run_backup(&config, &project_code),
        Command::Restore {
            project_code,
            archive,
        } => run_restore(&config, &project_code, &archive),
        Command::Status => run_status(&config),
    }
}

fn open_store(config: &DaemonConfig) -> Result<Store> {
    let db_path = config.db_path.clone();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create {}", parent.display()))?;
    }
    let store = with_retry(SETUP_ATTEMPTS, SETUP_BACKOFF, || Store::open(&db_path))
        .with_context(|| format!("open store at {}", db_path.display()))?;
    Ok(store)
}

fn run_daemon(config: DaemonConfig) -> Result<()> {
    let store = open_store(&config)?;

    let telegram = match (&config.telegram_bot_token, &config.telegram_chat_id) {
        (Some(token), Some(chat_id)) => Some(TelegramClient::new(token.clone(), chat_id.clone())?),
        _ => None,
    };
    let mailer = config.smtp.clone().map(Mailer::new);
    let notifier = Notifier::new(telegram, mailer, config.notify_flags);

    let context_config = ContextConfig {
        claude_bin: config.claude_bin.clone(),
        ..Default::default()
    };
    let prompts = ContextBuilder::new(store.clone(), context_config, config.global_context());

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            running.store(false, Ordering::SeqCst);
        })
        .context("install signal handler")?;
    }

    let handles = RuntimeHandles {
        store,
        bus: BroadcastBus::new(),
        notifier: Arc::new(notifier),
        backups: Arc::new(BackupService::new(config.backups_root.clone())),
        prompts: Arc::new(prompts),
        config: Arc::new(config),
        running,
    };

    Scheduler::new(handles).run()
}

fn run_backup(config: &DaemonConfig, project_code: &str) -> Result<()> {
    let store = open_store(config)?;
    let project = store
        .get_project_by_code(project_code)?
        .with_context(|| format!("no project with code {}", project_code))?;

    let service = BackupService::new(config.backups_root.clone());
    let archive = service.backup_project(&project, BackupTrigger::Manual)?;
    println!("{} {}", "Backup written:".green(), archive.display());
    Ok(())
}

fn run_restore(config: &DaemonConfig, project_code: &str, archive: &Path) -> Result<()> {
    let store = open_store(config)?;
    let project = store
        .get_project_by_code(project_code)?
        .with_context(|| format!("no project with code {}", project_code))?;

    let service = BackupService::new(config.backups_root.clone());
    service.restore_project(&project, archive)?;
    println!("{} {}", "Restored from".green(), archive.display());
    Ok(())
}

fn run_status(config: &DaemonConfig) -> Result<()> {
    let store = open_store(config)?;
    let projects = store.list_projects()?;
    if projects.is_empty() {
        println!("No projects configured");
        return Ok(());
    }

    for project in projects {
        println!(
            "{} {} ({})",
            project.code.bold(),
            project.name,
            project.status.as_str().dimmed()
        );
        let counts = store.ticket_status_counts(project.id)?;
        if counts.is_empty() {
            println!("  no tickets");
            continue;
        }
        for (status, count) in counts {
            println!("  {:>5}  {}", count, status.as_str());
        }
        println!(
            "  {:>5}  total tokens used",
            project.total_tokens.to_string().cyan()
        );
    }
    Ok(())
}

/// Log to stderr and append to the daemon log file. A file that cannot
/// be opened degrades to stderr-only logging.
fn init_tracing(log_file: &Path) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(parent) = log_file.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file);

    let stderr_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match file {
        Ok(file) => {
            let file_layer = fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(Arc::new(file));
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();
        }
        Err(err) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            tracing::warn!(log_file = %log_file.display(), error = %err, "log file unavailable");
        }
    }
}
