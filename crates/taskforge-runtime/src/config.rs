use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use taskforge_notify::{NotifyFlags, SmtpConfig};
use tracing::warn;

/// Default site configuration path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/taskforge/system.conf";

/// Daemon configuration, assembled from the site config file plus
/// documented defaults. One value passed down to every component; no
/// process-global state.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// SQLite store location. The only required setting.
    pub db_path: PathBuf,
    pub backups_root: PathBuf,
    pub pid_file: PathBuf,
    pub log_file: PathBuf,
    pub global_context_file: PathBuf,
    /// Agent binary and the env file merged before exec.
    pub claude_bin: PathBuf,
    pub claude_env_file: Option<PathBuf>,
    pub default_model: String,
    pub poll_interval: Duration,
    pub max_parallel_projects: usize,
    pub stuck_timeout: Duration,
    pub watchdog_interval: Duration,
    pub inbound_poll_interval: Duration,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub notify_flags: NotifyFlags,
    pub smtp: Option<SmtpConfig>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("/var/lib/taskforge/taskforge.db"),
            backups_root: PathBuf::from("/var/backups/taskforge"),
            pid_file: PathBuf::from("/var/run/taskforge/daemon.pid"),
            log_file: PathBuf::from("/var/log/taskforge/daemon.log"),
            global_context_file: PathBuf::from("/etc/taskforge/global-context.md"),
            claude_bin: PathBuf::from("claude"),
            claude_env_file: dirs::home_dir().map(|home| home.join(".claude/.env")),
            default_model: "sonnet".to_string(),
            poll_interval: Duration::from_secs(3),
            max_parallel_projects: 3,
            stuck_timeout: Duration::from_secs(30 * 60),
            watchdog_interval: Duration::from_secs(30 * 60),
            inbound_poll_interval: Duration::from_secs(10),
            telegram_bot_token: None,
            telegram_chat_id: None,
            notify_flags: NotifyFlags::default(),
            smtp: None,
        }
    }
}

impl DaemonConfig {
    /// Load the site configuration. Missing optional keys fall back to
    /// defaults silently; a missing store location is fatal.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read site config {}", path.display()))?;
        Self::from_kv(&parse_kv(&text))
    }

    pub fn from_kv(kv: &HashMap<String, String>) -> Result<Self> {
        let mut config = Self::default();

        let db_path = kv
            .get("DB_PATH")
            .context("DB_PATH missing from site configuration")?;
        config.db_path = PathBuf::from(db_path);

        if kv.contains_key("DB_HOST") || kv.contains_key("DB_NAME") {
            warn!("DB_HOST/DB_NAME present; this build keeps its store in SQLite at DB_PATH");
        }

        if let Some(value) = kv.get("BACKUPS_ROOT") {
            config.backups_root = PathBuf::from(value);
        }
        if let Some(value) = kv.get("PID_FILE") {
            config.pid_file = PathBuf::from(value);
        }
        if let Some(value) = kv.get("LOG_FILE") {
            config.log_file = PathBuf::from(value);
        }
        if let Some(value) = kv.get("GLOBAL_CONTEXT_FILE") {
            config.global_context_file = PathBuf::from(value);
        }
        if let Some(value) = kv.get("CLAUDE_BIN") {
            config.claude_bin = PathBuf::from(value);
        }
        if let Some(value) = kv.get("MAX_PARALLEL_PROJECTS")
            && let Ok(parsed) = value.parse::<usize>()
            && parsed > 0
        {
            config.max_parallel_projects = parsed;
        }

        config.telegram_bot_token = kv.get("TELEGRAM_BOT_TOKEN").cloned().filter(|v| !v.is_empty());
        config.telegram_chat_id = kv.get("TELEGRAM_CHAT_ID").cloned().filter(|v| !v.is_empty());

        config.notify_flags = NotifyFlags {
            ticket_completed: flag(kv, "NOTIFY_TICKET_COMPLETED", true),
            awaiting_input: flag(kv, "NOTIFY_AWAITING_INPUT", true),
            ticket_failed: flag(kv, "NOTIFY_TICKET_FAILED", true),
            watchdog_alert: flag(kv, "NOTIFY_WATCHDOG_ALERT", true),
        };

        if flag(kv, "SMTP_ENABLED", false)
            && let Some(host) = kv.get("SMTP_HOST").filter(|v| !v.is_empty())
        {
            config.smtp = Some(SmtpConfig {
                host: host.clone(),
                port: kv
                    .get("SMTP_PORT")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(587),
                user: kv.get("SMTP_USER").cloned().unwrap_or_default(),
                password: kv.get("SMTP_PASSWORD").cloned().unwrap_or_default(),
                tls: flag(kv, "SMTP_TLS", true),
                alert_email: kv.get("SMTP_ALERT_EMAIL").cloned().unwrap_or_default(),
            });
        }

        Ok(config)
    }

    /// Site-wide environment context, surfaced at the top of every
    /// prompt when the file exists.
    pub fn global_context(&self) -> Option<String> {
        std::fs::read_to_string(&self.global_context_file).ok()
    }
}

fn flag(kv: &HashMap<String, String>, key: &str, default: bool) -> bool {
    match kv.get(key) {
        Some(value) => matches!(
            value.to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        None => default,
    }
}

/// Parse `KEY=value` text: `#` comment lines ignored, surrounding
/// quotes stripped. Shared by the site config and the agent env file.
pub fn parse_kv(text: &str) -> HashMap<String, String> {
    let mut kv = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().to_string();
        let mut value = value.trim();
        if (value.starts_with('"') && value.ends_with('"') && value.len() >= 2)
            || (value.starts_with('\'') && value.ends_with('\'') && value.len() >= 2)
        {
            value = &value[1..value.len() - 1];
        }
        kv.insert(key, value.to_string());
    }
    kv
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kv_parsing_handles_comments_and_quotes() {
        let kv = parse_kv(
            r#"
            # site settings
            DB_PATH=/var/lib/taskforge/db.sqlite
            TELEGRAM_BOT_TOKEN="123:abc"
            SMTP_HOST='mail.example.org'
            BROKEN LINE
            MAX_PARALLEL_PROJECTS=5
            "#,
        );
        assert_eq!(kv.get("DB_PATH").unwrap(), "/var/lib/taskforge/db.sqlite");
        assert_eq!(kv.get("TELEGRAM_BOT_TOKEN").unwrap(), "123:abc");
        assert_eq!(kv.get("SMTP_HOST").unwrap(), "mail.example.org");
        assert_eq!(kv.get("MAX_PARALLEL_PROJECTS").unwrap(), "5");
        assert!(!kv.contains_key("BROKEN LINE"));
    }

    #[test]
    fn config_requires_db_path() {
        let kv = HashMap::new();
        assert!(DaemonConfig::from_kv(&kv).is_err());
    }

    #[test]
    fn config_applies_defaults_and_overrides() {
        let mut kv = HashMap::new();
        kv.insert("DB_PATH".to_string(), "/tmp/t.db".to_string());
        kv.insert("MAX_PARALLEL_PROJECTS".to_string(), "7".to_string());
        kv.insert("NOTIFY_TICKET_FAILED".to_string(), "false".to_string());

        let config = DaemonConfig::from_kv(&kv).unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/t.db"));
        assert_eq!(config.max_parallel_projects, 7);
        assert!(!config.notify_flags.ticket_failed);
        assert!(config.notify_flags.ticket_completed);
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert!(config.smtp.is_none());
    }

    #[test]
    fn smtp_requires_enable_flag_and_host() {
        let mut kv = HashMap::new();
        kv.insert("DB_PATH".to_string(), "/tmp/t.db".to_string());
        kv.insert("SMTP_HOST".to_string(), "mail.example.org".to_string());
        let config = DaemonConfig::from_kv(&kv).unwrap();
        assert!(config.smtp.is_none());

        kv.insert("SMTP_ENABLED".to_string(), "true".to_string());
        kv.insert("SMTP_ALERT_EMAIL".to_string(), "ops@example.org".to_string());
        let config = DaemonConfig::from_kv(&kv).unwrap();
        let smtp = config.smtp.unwrap();
        assert_eq!(smtp.host, "mail.example.org");
        assert_eq!(smtp.port, 587);
        assert_eq!(smtp.alert_email, "ops@example.org");
    }
}
