use super::NotificationSink;
use crate::config::EmailConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use log::info;
use std::time::Duration;

/// SMTP delivery over STARTTLS with optional login.
pub struct EmailSink {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl EmailSink {
    pub fn from_config(cfg: &EmailConfig, timeout: Duration) -> Result<Self> {
        let from: Mailbox = cfg
            .from
            .parse()
            .with_context(|| format!("invalid email.from address {:?}", cfg.from))?;
        let to = cfg
            .to
            .iter()
            .map(|addr| {
                addr.parse::<Mailbox>()
                    .with_context(|| format!("invalid email.to address {addr:?}"))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.smtp_server)
            .with_context(|| format!("invalid SMTP relay {}", cfg.smtp_server))?
            .port(cfg.smtp_port)
            .timeout(Some(timeout));
        if let (Some(user), Some(pass)) = (&cfg.username, &cfg.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
            to,
        })
    }

    fn build_message(&self, subject: &str, body: &str) -> Result<Message> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(subject)
            .header(ContentType::TEXT_PLAIN);
        for recipient in &self.to {
            builder = builder.to(recipient.clone());
        }
        builder
            .body(body.to_string())
            .context("failed to build alert email")
    }
}

#[async_trait]
impl NotificationSink for EmailSink {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn send(&self, subject: &str, body: &str) -> Result<()> {
        let message = self.build_message(subject, body)?;
        self.transport
            .send(message)
            .await
            .context("SMTP delivery failed")?;
        info!("[notify] alert email sent to {} recipient(s)", self.to.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> EmailConfig {
        EmailConfig {
            enabled: true,
            smtp_server: "smtp.example.com".to_string(),
            smtp_port: 587,
            username: Some("cpuwatch".to_string()),
            password: Some("secret".to_string()),
            from: "cpuwatch@example.com".to_string(),
            to: vec!["ops@example.com".to_string(), "oncall@example.com".to_string()],
        }
    }

    #[tokio::test]
    async fn builds_message_for_every_recipient() {
        let sink = EmailSink::from_config(&cfg(), Duration::from_secs(10)).unwrap();
        let message = sink
            .build_message("Host CPU Alert", "Host CPU high: 95.0%")
            .unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Subject: Host CPU Alert"));
        assert!(raw.contains("ops@example.com"));
        assert!(raw.contains("oncall@example.com"));
        assert!(raw.contains("Host CPU high: 95.0%"));
    }

    #[tokio::test]
    async fn rejects_invalid_address() {
        let mut bad = cfg();
        bad.to = vec!["not an address".to_string()];
        assert!(EmailSink::from_config(&bad, Duration::from_secs(10)).is_err());
    }
}
