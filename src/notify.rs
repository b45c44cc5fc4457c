//! Operator alerting. Every sink implementation is fire-and-forget: a slow
//! or unreachable SMTP relay must never stall a dispatch tick.

use async_trait::async_trait;
use lettre::message::Message;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use tracing::{error, info};

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn alert(&self, subject: &str, body: &str);
}

/// Used in tests and whenever no SMTP relay is configured.
pub struct NoopNotificationSink;

#[async_trait]
impl NotificationSink for NoopNotificationSink {
    async fn alert(&self, subject: &str, body: &str) {
        info!(subject, body, "alert (no-op sink)");
    }
}

pub struct SmtpNotificationSink {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
    to: Vec<String>,
}

impl SmtpNotificationSink {
    pub fn new(
        relay: &str,
        username: String,
        password: String,
        from: String,
        to: Vec<String>,
    ) -> anyhow::Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(relay)?
            .credentials(Credentials::new(username, password))
            .build();
        Ok(Self { transport, from, to })
    }
}

#[async_trait]
impl NotificationSink for SmtpNotificationSink {
    async fn alert(&self, subject: &str, body: &str) {
        for recipient in &self.to {
            let message = match Message::builder()
                .from(self.from.parse().unwrap_or_else(|_| "dispatch@localhost".parse().unwrap()))
                .to(match recipient.parse() {
                    Ok(addr) => addr,
                    Err(e) => {
                        error!(recipient, error = %e, "invalid alert recipient address");
                        continue;
                    }
                })
                .subject(subject)
                .body(body.to_string())
            {
                Ok(m) => m,
                Err(e) => {
                    error!(error = %e, "failed to build alert email");
                    continue;
                }
            };
            if let Err(e) = self.transport.send(message).await {
                error!(error = %e, recipient, "failed to send operator alert");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_sink_never_panics() {
        NoopNotificationSink.alert("test", "body").await;
    }
}
