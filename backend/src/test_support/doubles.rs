//! Scripted channel, mail, template, and KDF doubles.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::ports::{
    EventPublisher, MailTransport, NotificationError, PasswordHashError, PasswordHasher,
    PublishError, TemplateError, TemplateRenderer,
};
use crate::domain::{EmailAddress, EventEnvelope, PasswordHash, substitute_placeholders};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(_) => panic!("test double mutex poisoned"),
    }
}

/// One accepted publish call.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    /// Topic passed to `publish`.
    pub topic: String,
    /// Ordering key passed to `publish`.
    pub key: String,
    /// Envelope passed to `publish`.
    pub envelope: EventEnvelope,
}

/// Publisher that plays back scripted results, then succeeds.
#[derive(Default)]
pub struct RecordingPublisher {
    scripted: Mutex<VecDeque<Result<(), PublishError>>>,
    published: Mutex<Vec<PublishedMessage>>,
    attempts: Mutex<usize>,
}

impl RecordingPublisher {
    /// Play back `results` in order before succeeding.
    pub fn scripted(results: Vec<Result<(), PublishError>>) -> Self {
        Self {
            scripted: Mutex::new(results.into()),
            ..Self::default()
        }
    }

    /// Fail every call until the script runs out.
    pub fn failing(times: usize, error: PublishError) -> Self {
        Self::scripted(vec![Err(error); times])
    }

    /// Calls that got through, in order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.published).clone()
    }

    /// Every call, including scripted failures.
    pub fn attempts(&self) -> usize {
        *lock(&self.attempts)
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        envelope: &EventEnvelope,
    ) -> Result<(), PublishError> {
        *lock(&self.attempts) += 1;
        if let Some(result) = lock(&self.scripted).pop_front() {
            result?;
        }
        lock(&self.published).push(PublishedMessage {
            topic: topic.to_owned(),
            key: key.to_owned(),
            envelope: envelope.clone(),
        });
        Ok(())
    }
}

/// One accepted mail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    /// Recipients.
    pub to: Vec<EmailAddress>,
    /// Subject line.
    pub subject: String,
    /// Rendered HTML body.
    pub html_body: String,
}

/// Mail transport that plays back scripted results, then records messages.
#[derive(Default)]
pub struct RecordingMailer {
    scripted: Mutex<VecDeque<Result<(), NotificationError>>>,
    sent: Mutex<Vec<SentMail>>,
}

impl RecordingMailer {
    /// Play back `results` in order before recording mail.
    pub fn scripted(results: Vec<Result<(), NotificationError>>) -> Self {
        Self {
            scripted: Mutex::new(results.into()),
            ..Self::default()
        }
    }

    /// Mail that got through, in order.
    pub fn sent(&self) -> Vec<SentMail> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl MailTransport for RecordingMailer {
    async fn send(
        &self,
        to: &[EmailAddress],
        subject: &str,
        html_body: &str,
    ) -> Result<(), NotificationError> {
        if let Some(result) = lock(&self.scripted).pop_front() {
            result?;
        }
        lock(&self.sent).push(SentMail {
            to: to.to_vec(),
            subject: subject.to_owned(),
            html_body: html_body.to_owned(),
        });
        Ok(())
    }
}

/// In-memory templates keyed by name.
#[derive(Debug, Clone, Default)]
pub struct StaticTemplates(BTreeMap<String, String>);

impl StaticTemplates {
    /// Add or replace the template `name`.
    pub fn with(mut self, name: &str, body: &str) -> Self {
        self.0.insert(name.to_owned(), body.to_owned());
        self
    }

    /// The activation template used by the registration flow.
    pub fn activation() -> Self {
        Self::default().with(
            "activate_account.html",
            "<p>Hello ${name}</p><p>Token: ${token}</p>",
        )
    }
}

#[async_trait]
impl TemplateRenderer for StaticTemplates {
    async fn render(
        &self,
        name: &str,
        variables: &BTreeMap<String, String>,
    ) -> Result<String, TemplateError> {
        self.0
            .get(name)
            .map(|body| substitute_placeholders(body, variables))
            .ok_or_else(|| TemplateError::not_found(name))
    }
}

/// Instant, deterministic stand-in for the argon2 hasher.
#[derive(Debug, Clone, Copy, Default)]
pub struct StubPasswordHasher;

#[async_trait]
impl PasswordHasher for StubPasswordHasher {
    async fn hash(&self, password: &str) -> Result<PasswordHash, PasswordHashError> {
        Ok(PasswordHash::new(format!("$stub${}", password.len())))
    }
}
