//! Development [`MailTransport`] that writes messages to the log.

use async_trait::async_trait;
use tracing::info;

use crate::domain::EmailAddress;
use crate::domain::ports::{MailTransport, NotificationError};

/// Logs every message at info level instead of delivering it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMailTransport;

#[async_trait]
impl MailTransport for TracingMailTransport {
    async fn send(
        &self,
        to: &[EmailAddress],
        subject: &str,
        html_body: &str,
    ) -> Result<(), NotificationError> {
        let recipients = to
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<&str>>()
            .join(", ");
        info!(target: "mail", %recipients, subject, body = html_body, "mail not delivered; logged only");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn always_succeeds() {
        let to = [EmailAddress::parse("alice@x.com").expect("email")];
        TracingMailTransport
            .send(&to, "subject", "<p>body</p>")
            .await
            .expect("logged");
    }
}
