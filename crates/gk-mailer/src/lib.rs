//! Mailer adapter: renders an HTML template against a data map and
//! sends it over SMTP. Failures for a single recipient are isolated
//! from the rest of a batch; the send itself is retried a bounded
//! number of times before giving up.

mod template;

use std::collections::HashMap;
use std::time::Duration;

use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;

const SEND_ATTEMPTS: u32 = 3;
const SEND_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum MailError {
    #[error("failed to read template {path}: {source}")]
    TemplateRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("smtp transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
}

pub type Result<T> = std::result::Result<T, MailError>;

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpMailer {
    pub fn new(server: &str, port: u16, email: &str, password: &str) -> Result<Self> {
        let creds = Credentials::new(email.to_string(), password.to_string());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(server)
            .map_err(MailError::Transport)?
            .port(port)
            .credentials(creds)
            .build();

        Ok(Self {
            transport,
            from: email.to_string(),
        })
    }

    /// Render `template_path` against `data`, then send it to a
    /// single recipient. Retried up to `SEND_ATTEMPTS` times, 5
    /// seconds apart.
    pub async fn send(
        &self,
        template_path: &str,
        data: &HashMap<String, String>,
        subject: &str,
        recipient: &str,
    ) -> Result<()> {
        let html = tokio::fs::read_to_string(template_path)
            .await
            .map_err(|e| MailError::TemplateRead {
                path: template_path.to_string(),
                source: e,
            })?;
        let body = template::render(&html, data);

        let message = Message::builder()
            .from(self.from.parse().map_err(|e| MailError::InvalidMessage(format!("{e}")))?)
            .to(recipient.parse().map_err(|e| MailError::InvalidMessage(format!("{e}")))?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(body)
            .map_err(|e| MailError::InvalidMessage(e.to_string()))?;

        let mut last_err = None;
        for attempt in 1..=SEND_ATTEMPTS {
            match self.transport.send(message.clone()).await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    warn!(recipient, attempt, error = %e, "mail send attempt failed");
                    last_err = Some(e);
                    if attempt < SEND_ATTEMPTS {
                        sleep(SEND_RETRY_DELAY).await;
                    }
                }
            }
        }
        Err(last_err.map(MailError::Transport).expect("loop always runs at least once"))
    }
}
