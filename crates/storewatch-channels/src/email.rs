//! Transactional email providers.
//!
//! `ResendMailer` talks to the Resend HTTP API; `SmtpMailer` relays through
//! any STARTTLS SMTP server with lettre. Both make exactly one attempt.

use async_trait::async_trait;
use serde::Deserialize;
use storewatch_core::config::EmailConfig;
use storewatch_core::error::{Result, StoreWatchError};
use storewatch_core::traits::Mailer;
use storewatch_core::types::OutgoingEmail;

const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";

/// Resend API mailer.
pub struct ResendMailer {
    config: EmailConfig,
    client: reqwest::Client,
    endpoint: String,
    from: String,
}

#[derive(Debug, Deserialize)]
struct ResendOk {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ResendErr {
    #[serde(default)]
    message: String,
    #[serde(default)]
    name: String,
}

impl ResendMailer {
    pub fn new(config: EmailConfig) -> Result<Self> {
        if config.resend_api_key.is_empty() {
            return Err(StoreWatchError::Config(
                "RESEND_API_KEY not configured".into(),
            ));
        }
        let from = format_sender(&config.from_name, &config.from_email);
        Ok(Self {
            config,
            client: reqwest::Client::new(),
            endpoint: RESEND_ENDPOINT.to_string(),
            from,
        })
    }

    /// Point at a different API host (staging, local mock).
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    fn name(&self) -> &str {
        "resend"
    }

    fn origin(&self) -> &str {
        &self.config.from_email
    }

    async fn send_email(&self, email: &OutgoingEmail) -> Result<String> {
        tracing::debug!("📧 Sending email to {} via Resend: {}", email.to, email.subject);

        let mut body = serde_json::json!({
            "from": self.from,
            "to": [email.to],
            "subject": email.subject,
            "html": email.html,
        });
        if let Some(text) = &email.text {
            body["text"] = serde_json::Value::String(text.clone());
        }

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.config.resend_api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| StoreWatchError::Provider(format!("Resend request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ResendErr>(&text)
                .map(|e| format!("{}: {}", e.name, e.message))
                .unwrap_or(text);
            return Err(StoreWatchError::Provider(format!(
                "Resend API error {status}: {detail}"
            )));
        }

        let ok: ResendOk = response
            .json()
            .await
            .map_err(|e| StoreWatchError::Provider(format!("Invalid Resend response: {e}")))?;

        tracing::info!("📤 Email sent to {} (id={})", email.to, ok.id);
        Ok(ok.id)
    }
}

/// SMTP mailer (STARTTLS relay).
pub struct SmtpMailer {
    config: EmailConfig,
    transport: lettre::AsyncSmtpTransport<lettre::Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(config: EmailConfig) -> Result<Self> {
        use lettre::transport::smtp::authentication::Credentials;

        if config.smtp_host.is_empty() {
            return Err(StoreWatchError::Config("SMTP host not configured".into()));
        }

        let mut builder =
            lettre::AsyncSmtpTransport::<lettre::Tokio1Executor>::starttls_relay(&config.smtp_host)
                .map_err(|e| StoreWatchError::Config(format!("SMTP relay: {e}")))?
                .port(config.smtp_port);

        if !config.smtp_username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.smtp_username.clone(),
                config.smtp_password.clone(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            config,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    fn name(&self) -> &str {
        "smtp"
    }

    fn origin(&self) -> &str {
        &self.config.from_email
    }

    async fn send_email(&self, email: &OutgoingEmail) -> Result<String> {
        use lettre::message::{Mailbox, MultiPart};
        use lettre::{AsyncTransport, Message};

        let from: Mailbox = format_sender(&self.config.from_name, &self.config.from_email)
            .parse()
            .map_err(|e| StoreWatchError::Config(format!("Invalid from: {e}")))?;
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e| StoreWatchError::Validation(format!("Invalid to: {e}")))?;

        let domain = self
            .config
            .from_email
            .split('@')
            .nth(1)
            .unwrap_or("localhost");
        let message_id = format!("<{}@{}>", uuid::Uuid::new_v4(), domain);
        let text = email.text.clone().unwrap_or_else(|| strip_html(&email.html));

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(email.subject.as_str())
            .message_id(Some(message_id.clone()))
            .multipart(MultiPart::alternative_plain_html(text, email.html.clone()))
            .map_err(|e| StoreWatchError::Validation(format!("Build email: {e}")))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| StoreWatchError::Provider(format!("SMTP send: {e}")))?;

        tracing::info!("📤 Email sent to {} via SMTP", email.to);
        Ok(message_id)
    }
}

fn format_sender(name: &str, address: &str) -> String {
    if name.is_empty() {
        address.to_string()
    } else {
        format!("{name} <{address}>")
    }
}

/// Plain-text fallback for an HTML body.
pub fn strip_html(html: &str) -> String {
    let mut out = String::new();
    let mut in_tag = false;
    let mut in_style = false;
    let mut tag = String::new();
    for ch in html.chars() {
        match ch {
            '<' => {
                in_tag = true;
                tag.clear();
            }
            '>' => {
                in_tag = false;
                let name = tag.trim().to_ascii_lowercase();
                if name.starts_with("style") {
                    in_style = true;
                } else if name.starts_with("/style") {
                    in_style = false;
                } else if name.starts_with("br") || name.starts_with("/p") || name.starts_with("/tr") {
                    out.push('\n');
                }
            }
            _ if in_tag => tag.push(ch),
            _ if !in_style => out.push(ch),
            _ => {}
        }
    }
    out.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resend_requires_key() {
        let err = ResendMailer::new(EmailConfig::default()).err().unwrap();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_resend_sender_format() {
        let cfg = EmailConfig {
            resend_api_key: "re_test".into(),
            from_email: "noreply@shop.ao".into(),
            from_name: "Shop".into(),
            ..Default::default()
        };
        let mailer = ResendMailer::new(cfg).unwrap();
        assert_eq!(mailer.from, "Shop <noreply@shop.ao>");
        assert_eq!(mailer.origin(), "noreply@shop.ao");
    }

    #[test]
    fn test_smtp_requires_host() {
        let err = SmtpMailer::new(EmailConfig::default()).err().unwrap();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_strip_html() {
        let html = "<html><head><style>p { color: red; }</style></head>\
                    <body><p>Hello <b>Ana</b></p><p>Total: 10</p></body></html>";
        assert_eq!(strip_html(html), "Hello Ana\nTotal: 10");
    }
}
