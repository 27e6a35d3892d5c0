//! Async SMTP transport (lettre, STARTTLS relay).
//!
//! Template rendering is deliberately out of scope for the engine, so this
//! transport flattens the opaque payload into a plain-text body. Swapping
//! in a real renderer only touches this file.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use maildrip_core::config::SmtpConfig;
use maildrip_core::error::{MaildripError, Result};
use maildrip_core::traits::Transport;
use maildrip_core::types::TemplateRef;

/// SMTP mailer — one relay connection per send, STARTTLS + credentials.
pub struct SmtpMailer {
    config: SmtpConfig,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    fn body_from_payload(template: &TemplateRef, payload: &serde_json::Value) -> String {
        let mut body = String::new();
        if let Some(obj) = payload.as_object() {
            if let Some(name) = obj.get("first_name").and_then(|v| v.as_str()) {
                body.push_str(&format!("Hi {name},\n\n"));
            }
            if let Some(title) = obj.get("title").and_then(|v| v.as_str()) {
                body.push_str(title);
                body.push_str("\n\n");
            }
            for (key, value) in obj {
                if matches!(key.as_str(), "first_name" | "title" | "subject" | "email") {
                    continue;
                }
                match value.as_str() {
                    Some(s) => body.push_str(&format!("{key}: {s}\n")),
                    None => body.push_str(&format!("{key}: {value}\n")),
                }
            }
        } else {
            body.push_str(&payload.to_string());
        }
        body.push_str(&format!("\n[template: {}]\n", template.name));
        body
    }
}

#[async_trait]
impl Transport for SmtpMailer {
    async fn send(
        &self,
        to: &str,
        template: &TemplateRef,
        payload: &serde_json::Value,
    ) -> Result<()> {
        let from_mailbox: Mailbox =
            format!("{} <{}>", self.config.from_name, self.config.from_email)
                .parse()
                .map_err(|e| MaildripError::Transport(format!("Invalid from: {e}")))?;

        let to_mailbox: Mailbox = to
            .parse()
            .map_err(|e| MaildripError::Transport(format!("Invalid to: {e}")))?;

        let email = Message::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(&template.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(Self::body_from_payload(template, payload))
            .map_err(|e| MaildripError::Transport(format!("Build email: {e}")))?;

        let creds = Credentials::new(self.config.username.clone(), self.config.password.clone());

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.host)
            .map_err(|e| MaildripError::Transport(format!("SMTP relay: {e}")))?
            .port(self.config.port)
            .credentials(creds)
            .build();

        mailer
            .send(email)
            .await
            .map_err(|e| MaildripError::Transport(format!("SMTP send: {e}")))?;

        tracing::info!("📤 Sent '{}' to {to}", template.subject);
        Ok(())
    }
}
