//! Outgoing mail
//!
//! `SmtpMailer` delivers through an SMTP relay with lettre. When no relay
//! is configured, `LogMailer` writes the message to the log so local
//! development can follow reset links without a mail server.

use crate::config::MailConfig;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::sync::Arc;

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(host: &str, config: &MailConfig) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(host)
            .map_err(|e| anyhow!("Failed to create SMTP transport: {}", e))?
            .port(config.smtp_port);
        if let (Some(username), Some(password)) = (&config.smtp_username, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }
        let from = config
            .from
            .parse()
            .map_err(|e| anyhow!("Invalid from address '{}': {}", config.from, e))?;

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        let email = Message::builder()
            .from(self.from.clone())
            .to(to.parse().map_err(|e| anyhow!("Invalid to address: {}", e))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| anyhow!("Failed to build email: {}", e))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| anyhow!("Failed to send email: {}", e))?;

        tracing::debug!(to = %to, subject = %subject, "Email sent");
        Ok(())
    }
}

/// Mailer that only logs; used when `mail.smtp_host` is unset
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        tracing::info!(to = %to, subject = %subject, "Mail delivery disabled, message:\n{}", body);
        Ok(())
    }
}

/// Pick the mailer for the configuration
pub fn mailer_from_config(config: &MailConfig) -> Result<Arc<dyn Mailer>> {
    match config.smtp_host.as_deref().filter(|host| !host.is_empty()) {
        Some(host) => Ok(Arc::new(SmtpMailer::new(host, config)?)),
        None => {
            tracing::warn!("mail.smtp_host is not set, outgoing mail will only be logged");
            Ok(Arc::new(LogMailer))
        }
    }
}
