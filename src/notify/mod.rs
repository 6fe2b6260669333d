//! Notification boundary.
//!
//! The dispatcher builds a [`NotificationIntent`] for every actionable
//! outcome and hands it to a [`Notifier`]. The text of the alert is derived
//! from the intent alone by [`MessageContent`].

use std::fmt;

use log::info;
use serde::Serialize;

use crate::config::MailSettings;
use crate::{CertificateOutcome, HostRecord};

pub mod smtp;

pub use smtp::SmtpNotifier;

/// Closing line of every alert.
pub const CALL_TO_ACTION: &str = "Please take appropriate action!";

/// Delivers alerts. Called concurrently from several workers.
pub trait Notifier: Send + Sync {
    fn send(&self, intent: &NotificationIntent) -> Result<(), NotifyError>;
}

/// An alert waiting to be delivered.
///
/// Only exists for `ExpiringSoon` and `Expired` outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationIntent {
    host: String,
    description: String,
    outcome: CertificateOutcome,
    threshold_days: u32,
}

impl NotificationIntent {
    /// Returns `None` unless `outcome` is actionable.
    pub fn new(
        record: &HostRecord,
        outcome: &CertificateOutcome,
        threshold_days: u32,
    ) -> Option<Self> {
        if !outcome.is_actionable() {
            return None;
        }
        Some(NotificationIntent {
            host: record.host.clone(),
            description: record.description.clone(),
            outcome: outcome.clone(),
            threshold_days,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn outcome(&self) -> &CertificateOutcome {
        &self.outcome
    }

    pub fn threshold_days(&self) -> u32 {
        self.threshold_days
    }
}

/// Subject and body of an alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContent {
    /// Subject line without the `Subject:` header name
    pub subject: String,
    /// The sentence describing the problem
    pub body: String,
}

impl MessageContent {
    pub fn new(intent: &NotificationIntent, subject_prefix: &str) -> Self {
        let prefix = if subject_prefix.is_empty() {
            String::new()
        } else {
            format!("{} ", subject_prefix)
        };

        match intent.outcome() {
            CertificateOutcome::Expired => MessageContent {
                subject: format!(
                    "{}certificate has expired: {}",
                    prefix,
                    intent.description()
                ),
                body: format!(
                    "The SSL certificate for the host {} ({}) has expired!",
                    intent.host(),
                    intent.description()
                ),
            },
            // intents only carry actionable outcomes
            _ => MessageContent {
                subject: format!(
                    "{}certificate expiring soon: {}",
                    prefix,
                    intent.description()
                ),
                body: format!(
                    "The SSL certificate for the host {} ({}) is expiring in less than {} days.",
                    intent.host(),
                    intent.description(),
                    intent.threshold_days()
                ),
            },
        }
    }

    /// Message text below the headers: body, blank line, call to action.
    pub fn text(&self) -> String {
        [self.body.as_str(), "", CALL_TO_ACTION].join("\r\n")
    }

    /// The whole message with `Subject`, `To` and `From` header lines, CRLF separated.
    pub fn render(&self, to: &[String], from: &str) -> String {
        [
            format!("Subject: {}", self.subject),
            format!("To: {}", to.join(", ")),
            format!("From: {}", from),
            String::new(),
            self.text(),
        ]
        .join("\r\n")
    }
}

/// Writes alerts to the log instead of sending them.
#[derive(Debug, Clone)]
pub struct LogNotifier {
    recipients: Vec<String>,
    from: String,
    subject_prefix: String,
}

impl LogNotifier {
    pub fn new(settings: &MailSettings) -> Self {
        LogNotifier {
            recipients: settings.recipients(),
            from: settings.from.clone(),
            subject_prefix: settings.subjectprefix.clone(),
        }
    }
}

impl Default for LogNotifier {
    fn default() -> Self {
        LogNotifier::new(&MailSettings::default())
    }
}

impl Notifier for LogNotifier {
    fn send(&self, intent: &NotificationIntent) -> Result<(), NotifyError> {
        let content = MessageContent::new(intent, &self.subject_prefix);
        info!(
            "dry run, not sending:\n{}",
            content.render(&self.recipients, &self.from)
        );
        Ok(())
    }
}

/// Error raised when an alert could not be delivered.
#[derive(Debug)]
pub enum NotifyError {
    /// A sender or recipient address is invalid
    Address {
        /// The offending address
        address: String,
        /// Why it was rejected
        reason: String,
    },
    /// The message could not be built
    Message {
        /// Details from the message builder
        details: String,
    },
    /// The SMTP exchange failed
    Transport {
        /// Details from the SMTP client
        details: String,
    },
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address { address, reason } => {
                write!(f, "invalid address '{}': {}", address, reason)
            }
            Self::Message { details } => write!(f, "could not build message: {}", details),
            Self::Transport { details } => write!(f, "could not send email: {}", details),
        }
    }
}

impl std::error::Error for NotifyError {}
