//! Notification adapters: template loading and mail delivery.

mod file_templates;
mod http_relay;
mod tracing_transport;

pub use file_templates::FileTemplateRenderer;
pub use http_relay::{HttpMailRelay, MailRelayIdentity};
pub use tracing_transport::TracingMailTransport;
