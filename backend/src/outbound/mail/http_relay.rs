//! Reqwest-backed [`MailTransport`] posting to an HTTP mail relay.
//!
//! The relay receives `{from, to, subject, html}` as JSON. Any non-2xx answer
//! is a failed send; the consumer decides whether to retry. A request that
//! times out after connecting is reported as unconfirmed.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Serialize;
use tracing::debug;

use crate::domain::EmailAddress;
use crate::domain::ports::{MailTransport, NotificationError};

const DEFAULT_FROM: &str = "no-reply@accounts.invalid";
const PREVIEW_CHAR_LIMIT: usize = 160;

/// Sender identity attached to every relayed message.
#[derive(Debug, Clone)]
pub struct MailRelayIdentity {
    /// `from` address sent to the relay.
    pub from: String,
}

impl Default for MailRelayIdentity {
    fn default() -> Self {
        Self {
            from: DEFAULT_FROM.to_owned(),
        }
    }
}

#[derive(Debug, Serialize)]
struct RelayMessage<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: &'a str,
    html: &'a str,
}

/// Mail transport performing one HTTP POST per message.
pub struct HttpMailRelay {
    client: Client,
    endpoint: Url,
    from: String,
}

impl HttpMailRelay {
    /// Build a relay client with an explicit request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error when the reqwest client cannot be constructed.
    pub fn new(
        endpoint: Url,
        timeout: Duration,
        identity: MailRelayIdentity,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            from: identity.from,
        })
    }
}

#[async_trait]
impl MailTransport for HttpMailRelay {
    async fn send(
        &self,
        to: &[EmailAddress],
        subject: &str,
        html_body: &str,
    ) -> Result<(), NotificationError> {
        let message = RelayMessage {
            from: self.from.as_str(),
            to: to.iter().map(AsRef::as_ref).collect(),
            subject,
            html: html_body,
        };
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&message)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status.is_success() {
            debug!(recipients = to.len(), %status, "mail accepted by relay");
            return Ok(());
        }
        let body = response.bytes().await.unwrap_or_default();
        Err(map_status_error(status, body.as_ref()))
    }
}

fn map_transport_error(error: reqwest::Error) -> NotificationError {
    classify_transport_failure(error.is_timeout(), error.is_connect(), error.to_string())
}

/// A request that timed out after connecting may already have been accepted.
fn classify_transport_failure(timed_out: bool, connect: bool, message: String) -> NotificationError {
    if timed_out && !connect {
        NotificationError::unconfirmed(message)
    } else {
        NotificationError::unavailable(message)
    }
}

fn map_status_error(status: StatusCode, body: &[u8]) -> NotificationError {
    let preview = body_preview(body);
    let message = if preview.is_empty() {
        format!("status {}", status.as_u16())
    } else {
        format!("status {}: {preview}", status.as_u16())
    };
    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
        NotificationError::rejected(message)
    } else {
        NotificationError::unavailable(message)
    }
}

fn body_preview(body: &[u8]) -> String {
    let compact = String::from_utf8_lossy(body)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let preview = compact.chars().take(PREVIEW_CHAR_LIMIT).collect::<String>();
    if compact.chars().count() > PREVIEW_CHAR_LIMIT {
        format!("{preview}...")
    } else {
        preview
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::bad_request(StatusCode::BAD_REQUEST, true)]
    #[case::unprocessable(StatusCode::UNPROCESSABLE_ENTITY, true)]
    #[case::rate_limited(StatusCode::TOO_MANY_REQUESTS, false)]
    #[case::server_error(StatusCode::BAD_GATEWAY, false)]
    fn maps_statuses_to_notification_errors(#[case] status: StatusCode, #[case] rejected: bool) {
        let error = map_status_error(status, b"{\"error\": \"nope\"}");
        assert_eq!(
            matches!(error, NotificationError::Rejected { .. }),
            rejected,
            "unexpected mapping for {status}: {error}"
        );
        assert!(error.to_string().contains(&status.as_u16().to_string()));
    }

    #[rstest]
    #[case::timed_out_after_connect(true, false, true)]
    #[case::connect_timeout(true, true, false)]
    #[case::refused(false, true, false)]
    fn response_timeouts_are_unconfirmed(
        #[case] timed_out: bool,
        #[case] connect: bool,
        #[case] unconfirmed: bool,
    ) {
        let error = classify_transport_failure(timed_out, connect, "boom".to_owned());
        assert_eq!(matches!(error, NotificationError::Unconfirmed { .. }), unconfirmed);
    }

    #[rstest]
    fn empty_bodies_only_report_the_status() {
        let error = map_status_error(StatusCode::SERVICE_UNAVAILABLE, b"  \n ");
        assert_eq!(
            error,
            NotificationError::unavailable("status 503")
        );
    }

    #[rstest]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(PREVIEW_CHAR_LIMIT + 40);
        let preview = body_preview(body.as_bytes());
        assert_eq!(preview.chars().count(), PREVIEW_CHAR_LIMIT + 3);
        assert!(preview.ends_with("..."));
    }

    #[rstest]
    fn serialises_relay_message_shape() {
        let to = [EmailAddress::parse("alice@x.com").expect("email")];
        let message = RelayMessage {
            from: DEFAULT_FROM,
            to: to.iter().map(AsRef::as_ref).collect(),
            subject: "Account Activation - No Reply",
            html: "<p>hi</p>",
        };
        let value = serde_json::to_value(&message).expect("json");
        assert_eq!(
            value,
            serde_json::json!({
                "from": DEFAULT_FROM,
                "to": ["alice@x.com"],
                "subject": "Account Activation - No Reply",
                "html": "<p>hi</p>",
            })
        );
    }
}
