//! Email dispatcher for completion notifications
//!
//! Sends the record's QR code to its contact address through the Gmail
//! REST API (`users/me/messages/send`). The OAuth bearer token is read from
//! an environment variable; obtaining and refreshing it happens elsewhere.

use super::dispatcher::{NotificationDispatcher, NotificationJob};
use crate::config::EmailConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;

const MIME_LINE_WIDTH: usize = 76;

/// Gmail send response
#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
}

/// Dispatcher that mails the QR code to the record's contact address
pub struct EmailDispatcher {
    config: EmailConfig,
    client: reqwest::Client,
}

impl EmailDispatcher {
    pub fn new(config: EmailConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Resolve the bearer token from the configured environment variable
    fn resolve_token(&self) -> Result<String> {
        std::env::var(&self.config.access_token_env).map_err(|_| {
            Error::Notification(format!(
                "Failed to resolve mail access token from env var: {}",
                self.config.access_token_env
            ))
        })
    }

    /// Build the RFC 2822 message: plain-text body plus the QR attachment
    pub fn build_message(&self, job: &NotificationJob, boundary: &str) -> Result<String> {
        if job.contact_address.chars().any(char::is_control) {
            return Err(Error::Notification(format!(
                "Refusing to mail record '{}': contact address contains control characters",
                job.record_id
            )));
        }

        let engine = base64::engine::general_purpose::STANDARD;
        let qr_png = engine
            .decode(job.code_payload.trim())
            .map_err(|e| Error::Notification(format!("Invalid QR payload: {}", e)))?;

        let mut message = String::new();
        message.push_str(&format!("To: {}\r\n", job.contact_address));
        message.push_str(&format!("From: {}\r\n", self.config.sender));
        message.push_str(&format!(
            "Subject: =?UTF-8?B?{}?=\r\n",
            engine.encode(self.config.subject.as_bytes())
        ));
        message.push_str("MIME-Version: 1.0\r\n");
        message.push_str(&format!(
            "Content-Type: multipart/mixed; boundary=\"{}\"\r\n\r\n",
            boundary
        ));

        message.push_str(&format!("--{}\r\n", boundary));
        message.push_str("Content-Type: text/plain; charset=\"utf-8\"\r\n");
        message.push_str("Content-Transfer-Encoding: base64\r\n\r\n");
        message.push_str(&wrap_base64(&engine.encode(self.config.body.as_bytes())));

        let name = &self.config.attachment_name;
        message.push_str(&format!("--{}\r\n", boundary));
        message.push_str(&format!("Content-Type: image/png; name=\"{}\"\r\n", name));
        message.push_str("Content-Transfer-Encoding: base64\r\n");
        message.push_str(&format!(
            "Content-Disposition: attachment; filename=\"{}\"\r\n\r\n",
            name
        ));
        message.push_str(&wrap_base64(&engine.encode(qr_png)));
        message.push_str(&format!("--{}--\r\n", boundary));

        Ok(message)
    }
}

fn wrap_base64(encoded: &str) -> String {
    let mut out = String::with_capacity(encoded.len() + encoded.len() / MIME_LINE_WIDTH * 2 + 2);
    // base64 output is ASCII, so byte chunks are valid str slices
    for chunk in encoded.as_bytes().chunks(MIME_LINE_WIDTH) {
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push_str("\r\n");
    }
    out
}

#[async_trait]
impl NotificationDispatcher for EmailDispatcher {
    fn name(&self) -> &str {
        "email"
    }

    async fn notify(&self, job: &NotificationJob) -> Result<()> {
        if job.contact_address.is_empty() {
            tracing::warn!(record_id = %job.record_id, "No contact address, skipping email");
            return Ok(());
        }
        if job.code_payload.trim().is_empty() {
            tracing::warn!(record_id = %job.record_id, "No QR payload in metadata, skipping email");
            return Ok(());
        }

        let boundary = format!("yummyverse-{}", uuid::Uuid::new_v4().simple());
        let message = self.build_message(job, &boundary)?;

        if self.config.debug {
            tracing::info!(
                record_id = %job.record_id,
                to = %job.contact_address,
                bytes = message.len(),
                "Debug mode, not sending email"
            );
            return Ok(());
        }

        let token = self.resolve_token()?;
        let raw = base64::engine::general_purpose::URL_SAFE.encode(message.as_bytes());
        let url = format!(
            "{}/users/me/messages/send",
            self.config.api_base.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&serde_json::json!({ "raw": raw }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Notification(format!(
                "Mail API returned {}: {}",
                status, body
            )));
        }

        let sent: SendResponse = response.json().await?;
        tracing::info!(
            record_id = %job.record_id,
            message_id = %sent.id,
            "Email sent"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QR_PNG_B64: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

    fn job(contact: &str, payload: &str) -> NotificationJob {
        NotificationJob {
            record_id: "u1".to_string(),
            contact_address: contact.to_string(),
            code_payload: payload.to_string(),
            ready_at: chrono::Utc::now(),
        }
    }

    fn debug_config() -> EmailConfig {
        EmailConfig {
            debug: true,
            ..EmailConfig::default()
        }
    }

    #[test]
    fn test_build_message_structure() {
        let dispatcher = EmailDispatcher::new(EmailConfig::default());
        let message = dispatcher
            .build_message(&job("a@example.com", QR_PNG_B64), "b0")
            .unwrap();

        assert!(message.starts_with("To: a@example.com\r\n"));
        assert!(message.contains("Content-Type: multipart/mixed; boundary=\"b0\""));
        assert!(message.contains("filename=\"qr_code.png\""));
        assert!(message.trim_end().ends_with("--b0--"));
        assert!(message.lines().all(|line| line.len() <= 998));
    }

    #[test]
    fn test_attachment_round_trips() {
        let dispatcher = EmailDispatcher::new(EmailConfig::default());
        let message = dispatcher
            .build_message(&job("a@example.com", QR_PNG_B64), "b0")
            .unwrap();

        let attachment = message
            .split("filename=\"qr_code.png\"\r\n\r\n")
            .nth(1)
            .unwrap()
            .split("--b0--")
            .next()
            .unwrap()
            .replace("\r\n", "");
        let engine = base64::engine::general_purpose::STANDARD;
        assert_eq!(
            engine.decode(attachment).unwrap(),
            engine.decode(QR_PNG_B64).unwrap()
        );
    }

    #[test]
    fn test_invalid_payload_rejected() {
        let dispatcher = EmailDispatcher::new(EmailConfig::default());
        let result = dispatcher.build_message(&job("a@example.com", "not base64!"), "b0");
        assert!(matches!(result, Err(Error::Notification(_))));
    }

    #[test]
    fn test_header_injection_rejected() {
        let dispatcher = EmailDispatcher::new(EmailConfig::default());
        let contact = "a@example.com\r\nBcc: victim@evil.test\r\n\r\nInjected body";
        let result = dispatcher.build_message(&job(contact, QR_PNG_B64), "b0");
        assert!(matches!(result, Err(Error::Notification(_))));
    }

    #[tokio::test]
    async fn test_debug_mode_skips_network() {
        let dispatcher = EmailDispatcher::new(debug_config());
        assert!(dispatcher.notify(&job("a@example.com", QR_PNG_B64)).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_contact_is_skipped() {
        let dispatcher = EmailDispatcher::new(EmailConfig::default());
        assert!(dispatcher.notify(&job("", QR_PNG_B64)).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_token_is_error() {
        let dispatcher = EmailDispatcher::new(EmailConfig {
            access_token_env: "YUMMYVERSE_TEST_TOKEN_THAT_IS_NOT_SET".to_string(),
            ..EmailConfig::default()
        });
        let result = dispatcher.notify(&job("a@example.com", QR_PNG_B64)).await;
        assert!(matches!(result, Err(Error::Notification(_))));
    }

    #[test]
    fn test_wrap_base64_line_width() {
        let wrapped = wrap_base64(&"A".repeat(200));
        let lines: Vec<&str> = wrapped.split("\r\n").filter(|l| !l.is_empty()).collect();
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|l| l.len() <= MIME_LINE_WIDTH));
    }
}
