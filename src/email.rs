use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncFileTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, warn};

/// Best-effort email channel. Delivery is fire-and-forget: failures and
/// timeouts are logged and never surface to the caller — a booking
/// transition must not depend on SMTP health.
pub struct Mailer {
    transport: Transport,
    from: Mailbox,
}

enum Transport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    /// Writes .eml files to a directory. Development and test use.
    File(AsyncFileTransport<Tokio1Executor>),
}

const SEND_TIMEOUT: Duration = Duration::from_secs(30);

impl Mailer {
    pub fn smtp(
        host: &str,
        port: u16,
        credentials: Option<(String, String)>,
        from: &str,
    ) -> Result<Self, String> {
        let from: Mailbox = from
            .parse()
            .map_err(|e| format!("bad from address: {e}"))?;
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| format!("SMTP transport: {e}"))?
            .port(port);
        if let Some((user, password)) = credentials {
            builder = builder.credentials(Credentials::new(user, password));
        }
        Ok(Self {
            transport: Transport::Smtp(builder.build()),
            from,
        })
    }

    pub fn file(dir: &Path, from: &str) -> Result<Self, String> {
        let from: Mailbox = from
            .parse()
            .map_err(|e| format!("bad from address: {e}"))?;
        std::fs::create_dir_all(dir).map_err(|e| format!("create email dir: {e}"))?;
        Ok(Self {
            transport: Transport::File(AsyncFileTransport::new(dir)),
            from,
        })
    }

    /// Build a mailer from `AULA_*` environment variables. Returns None when
    /// email is unconfigured (the service runs fine without it).
    pub fn from_env() -> Option<Arc<Self>> {
        let from = std::env::var("AULA_EMAIL_FROM").ok()?;

        if let Ok(host) = std::env::var("AULA_SMTP_HOST") {
            let port = std::env::var("AULA_SMTP_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(587);
            let credentials = match (
                std::env::var("AULA_SMTP_USER"),
                std::env::var("AULA_SMTP_PASSWORD"),
            ) {
                (Ok(u), Ok(p)) => Some((u, p)),
                _ => None,
            };
            return match Self::smtp(&host, port, credentials, &from) {
                Ok(m) => Some(Arc::new(m)),
                Err(e) => {
                    warn!("email disabled: {e}");
                    None
                }
            };
        }

        if let Ok(dir) = std::env::var("AULA_EMAIL_DIR") {
            return match Self::file(Path::new(&dir), &from) {
                Ok(m) => Some(Arc::new(m)),
                Err(e) => {
                    warn!("email disabled: {e}");
                    None
                }
            };
        }

        None
    }

    /// Send one message, awaiting the transport. Used directly by tests;
    /// production code goes through `dispatch`.
    pub async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), String> {
        let to: Mailbox = to.parse().map_err(|e| format!("bad recipient: {e}"))?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| format!("build message: {e}"))?;

        match &self.transport {
            Transport::Smtp(t) => t
                .send(message)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string()),
            Transport::File(t) => t
                .send(message)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string()),
        }
    }

    /// Fire-and-forget dispatch on a background task. A slow or dead SMTP
    /// server costs a log line, never a failed transition.
    pub fn dispatch(self: &Arc<Self>, to: &str, subject: &str, body: &str) {
        let mailer = self.clone();
        let to = to.to_string();
        let subject = subject.to_string();
        let body = body.to_string();
        tokio::spawn(async move {
            match tokio::time::timeout(SEND_TIMEOUT, mailer.send(&to, &subject, &body)).await {
                Ok(Ok(())) => {
                    metrics::counter!(crate::observability::EMAILS_SENT_TOTAL).increment(1);
                    debug!("email sent to {to}: {subject}");
                }
                Ok(Err(e)) => {
                    metrics::counter!(crate::observability::EMAILS_FAILED_TOTAL).increment(1);
                    warn!("email to {to} failed: {e}");
                }
                Err(_) => {
                    metrics::counter!(crate::observability::EMAILS_FAILED_TOTAL).increment(1);
                    warn!("email to {to} timed out after {SEND_TIMEOUT:?}");
                }
            }
        });
    }
}
