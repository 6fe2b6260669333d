//! Email delivery through an SMTP relay, using lettre.

use std::time::Duration;

use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use log::debug;

use super::{MessageContent, NotificationIntent, Notifier, NotifyError};
use crate::config::MailSettings;

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);
const IMPLICIT_TLS_PORT: u16 = 465;

/// Sends alerts as plain text email.
///
/// Port 465 uses implicit TLS, every other port upgrades with STARTTLS.
/// Credentials are only presented when a username is configured.
pub struct SmtpNotifier {
    settings: MailSettings,
    transport: SmtpTransport,
}

impl std::fmt::Debug for SmtpNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpNotifier")
            .field("host", &self.settings.host)
            .field("port", &self.settings.port)
            .field("rcpt", &self.settings.rcpt)
            .finish()
    }
}

impl SmtpNotifier {
    pub fn new(settings: &MailSettings) -> Result<Self, NotifyError> {
        let port = settings
            .port_number()
            .map_err(|e| NotifyError::Transport {
                details: e.to_string(),
            })?;

        let builder = if port == IMPLICIT_TLS_PORT {
            SmtpTransport::relay(&settings.host)
        } else {
            SmtpTransport::starttls_relay(&settings.host)
        }
        .map_err(|e| NotifyError::Transport {
            details: e.to_string(),
        })?;

        let mut builder = builder.port(port).timeout(Some(SMTP_TIMEOUT));
        if !settings.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                settings.username.clone(),
                settings.password.clone(),
            ));
        }

        Ok(SmtpNotifier {
            settings: settings.clone(),
            transport: builder.build(),
        })
    }

    fn build_message(&self, content: &MessageContent) -> Result<Message, NotifyError> {
        let mut builder = Message::builder()
            .from(parse_mailbox(&self.settings.from)?)
            .subject(content.subject.clone())
            .header(ContentType::TEXT_PLAIN);

        for rcpt in self.settings.recipients() {
            builder = builder.to(parse_mailbox(&rcpt)?);
        }

        builder
            .body(content.text())
            .map_err(|e| NotifyError::Message {
                details: e.to_string(),
            })
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, NotifyError> {
    address.parse().map_err(|e: lettre::address::AddressError| {
        NotifyError::Address {
            address: address.to_string(),
            reason: e.to_string(),
        }
    })
}

impl Notifier for SmtpNotifier {
    fn send(&self, intent: &NotificationIntent) -> Result<(), NotifyError> {
        let content = MessageContent::new(intent, &self.settings.subjectprefix);
        let message = self.build_message(&content)?;

        debug!(
            "sending host {} expiration notification to {}",
            intent.host(),
            self.settings.rcpt
        );
        let response = self
            .transport
            .send(&message)
            .map_err(|e| NotifyError::Transport {
                details: e.to_string(),
            })?;
        debug!("smtp response {:?}", response.code());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CertificateOutcome, HostRecord};

    fn settings() -> MailSettings {
        MailSettings {
            sendmail: true,
            host: "smtp.example.com".to_string(),
            port: "587".to_string(),
            username: "user".to_string(),
            password: "pass".to_string(),
            rcpt: "ops@example.com, dev@example.com".to_string(),
            from: "certwatcher@example.com".to_string(),
            subjectprefix: "[certs]".to_string(),
        }
    }

    fn content() -> MessageContent {
        let record = HostRecord::new("www.example.com", "Example site");
        let intent =
            NotificationIntent::new(&record, &CertificateOutcome::ExpiringSoon, 30).unwrap();
        MessageContent::new(&intent, "[certs]")
    }

    #[test]
    fn test_smtp_notifier_new() {
        assert!(SmtpNotifier::new(&settings()).is_ok());

        let implicit = MailSettings {
            port: "465".to_string(),
            ..settings()
        };
        assert!(SmtpNotifier::new(&implicit).is_ok());
    }

    #[test]
    fn test_bad_port_is_rejected() {
        let bad = MailSettings {
            port: "mail".to_string(),
            ..settings()
        };
        assert!(matches!(
            SmtpNotifier::new(&bad),
            Err(NotifyError::Transport { .. })
        ));
    }

    #[test]
    fn test_build_message_headers() {
        let notifier = SmtpNotifier::new(&settings()).unwrap();
        let message = notifier.build_message(&content()).unwrap();

        let formatted = String::from_utf8(message.formatted()).unwrap();
        assert!(formatted.contains("Subject: [certs] certificate expiring soon: Example site"));
        assert!(formatted.contains("From: certwatcher@example.com"));
        assert!(formatted.contains("ops@example.com"));
        assert!(formatted.contains("dev@example.com"));
        assert!(formatted.contains("Please take appropriate action!"));
    }

    #[test]
    fn test_invalid_sender_is_address_error() {
        let bad = MailSettings {
            from: "not an address".to_string(),
            ..settings()
        };
        let notifier = SmtpNotifier::new(&bad).unwrap();
        match notifier.build_message(&content()) {
            Err(NotifyError::Address { address, .. }) => assert_eq!(address, "not an address"),
            other => panic!("expected Address error, got {:?}", other),
        }
    }
}
