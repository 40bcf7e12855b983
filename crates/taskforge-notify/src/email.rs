use anyhow::{Context, Result};
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

/// SMTP settings from the site configuration.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub tls: bool,
    pub alert_email: String,
}

/// Sends operator alert mail (stuck tickets, watchdog findings).
pub struct Mailer {
    config: SmtpConfig,
}

impl Mailer {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    pub fn send(&self, subject: &str, body: &str) -> Result<()> {
        let from = if self.config.user.contains('@') {
            self.config.user.clone()
        } else {
            format!("taskforge@{}", self.config.host)
        };

        let email = Message::builder()
            .from(from.parse().context("parse sender address")?)
            .to(self
                .config
                .alert_email
                .parse()
                .context("parse alert address")?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .context("build message")?;

        let mut builder = if self.config.tls {
            SmtpTransport::relay(&self.config.host).context("TLS relay")?
        } else {
            SmtpTransport::builder_dangerous(&self.config.host)
        };
        builder = builder.port(self.config.port);
        if !self.config.user.is_empty() {
            builder = builder.credentials(Credentials::new(
                self.config.user.clone(),
                self.config.password.clone(),
            ));
        }

        builder.build().send(&email).context("send mail")?;
        Ok(())
    }
}
