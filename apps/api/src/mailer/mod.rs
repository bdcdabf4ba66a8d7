//! Mail delivery. Every outbound email in the service goes through `Mailer`.
//!
//! `HttpMailer` speaks the JSON API shared by Resend-style providers:
//! `POST {from, to, subject, html, text}` with a bearer key.

use async_trait::async_trait;
use axum::http::StatusCode;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::config::MailConfig;
use crate::errors::AppError;

pub mod templates;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Mail provider rejected message (status {status}): {message}")]
    Rejected { status: u16, message: String },
}

impl From<MailError> for AppError {
    fn from(err: MailError) -> Self {
        AppError::Upstream {
            service: "Mail",
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.to_string(),
        }
    }
}

/// A rendered message ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> Result<(), MailError>;
}

#[derive(Debug, Serialize)]
struct OutboundMessage<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
    text: &'a str,
}

#[derive(Clone)]
pub struct HttpMailer {
    client: Client,
    config: MailConfig,
}

impl HttpMailer {
    pub fn new(client: Client, config: MailConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        let body = OutboundMessage {
            from: &self.config.from,
            to: [&email.to],
            subject: &email.subject,
            html: &email.html,
            text: &email.text,
        };

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(MailError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        debug!("Sent \"{}\" to {}", email.subject, email.to);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records messages instead of sending them; fails every send when `fail` is set.
    #[derive(Default, Clone)]
    pub(crate) struct RecordingMailer {
        pub sent: Arc<Mutex<Vec<Email>>>,
        pub fail: bool,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, email: &Email) -> Result<(), MailError> {
            if self.fail {
                return Err(MailError::Rejected {
                    status: 503,
                    message: "unavailable".to_string(),
                });
            }
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }

    #[test]
    fn test_outbound_message_shape() {
        let msg = OutboundMessage {
            from: "Listings <no-reply@example.com>",
            to: ["agent@x.com"],
            subject: "Hi",
            html: "<p>Hi</p>",
            text: "Hi",
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["to"][0], "agent@x.com");
        assert_eq!(value["from"], "Listings <no-reply@example.com>");
    }

    #[tokio::test]
    async fn test_recording_mailer_as_trait_object() {
        let recorder = RecordingMailer::default();
        let mailer: Arc<dyn Mailer> = Arc::new(recorder.clone());
        let email = Email {
            to: "a@x.com".to_string(),
            subject: "s".to_string(),
            html: String::new(),
            text: "t".to_string(),
        };
        mailer.send(&email).await.unwrap();
        assert_eq!(recorder.sent.lock().unwrap().as_slice(), &[email]);
    }
}
