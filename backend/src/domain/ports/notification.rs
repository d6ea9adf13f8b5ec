//! Ports for rendering and sending notification mail.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::domain::EmailAddress;

use super::define_port_error;

define_port_error! {
    /// Failures raised while loading or rendering a template. Never retried:
    /// a template that is missing now will be missing on redelivery too.
    pub enum TemplateError {
        /// No template with this name exists.
        NotFound { name: String } => "template not found: {name}",
        /// The template exists but could not be read or is not UTF-8.
        Unreadable { name: String, message: String } => "template {name} unreadable: {message}",
    }
}

define_port_error! {
    /// Failures raised by mail transports.
    pub enum NotificationError {
        /// The transport could not be reached or timed out.
        Unavailable { message: String } => "mail transport unavailable: {message}" [transient],
        /// The transport refused the message.
        Rejected { message: String } => "mail transport rejected message: {message}" [transient],
        /// The request went out but no answer came back; the message may
        /// have been delivered.
        Unconfirmed { message: String } => "mail delivery unconfirmed: {message}",
    }
}

/// Renders named templates with string variables.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TemplateRenderer: Send + Sync {
    /// Render `name`, substituting `${key}` placeholders from `variables`.
    async fn render(
        &self,
        name: &str,
        variables: &BTreeMap<String, String>,
    ) -> Result<String, TemplateError>;
}

/// Delivers HTML mail.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Send one message to every address in `to`.
    async fn send(
        &self,
        to: &[EmailAddress],
        subject: &str,
        html_body: &str,
    ) -> Result<(), NotificationError>;
}
