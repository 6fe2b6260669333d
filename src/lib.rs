//! Watches the TLS certificates presented by a list of hosts.
//!
//! Every host is probed once per run: a TLS connection is opened with peer
//! verification disabled, the leaf certificates are classified against a
//! day threshold, and expired or soon-to-expire certificates are handed to a
//! [`Notifier`]. Probe failures (timeouts, refused connections, failed
//! handshakes) are reported but never notified.
//!
//! ```no_run
//! use std::sync::Arc;
//! use certwatcher::{Dispatcher, HostChecker, HostRecord};
//! use certwatcher::notify::LogNotifier;
//!
//! let checker = HostChecker::new(30);
//! let dispatcher = Dispatcher::new(checker, Arc::new(LogNotifier::default()), false, 30);
//! let summary = dispatcher.run(vec![HostRecord::new("example.com", "Example")]);
//! assert_eq!(summary.results.len(), 1);
//! ```

use serde::Serialize;
use std::fmt;

pub mod checker;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod hosts;
pub mod inspector;
pub mod notify;

pub use checker::{HostChecker, Probe, ProbeReport, DEFAULT_PORT, DEFAULT_TIMEOUT};
pub use dispatcher::{DeliveryFailure, Dispatcher, HostResult, RunSummary};
pub use error::{HostListError, ProbeError};
pub use inspector::{classify, CertificateFields};
pub use notify::{MessageContent, NotificationIntent, Notifier, NotifyError};

/// One monitored endpoint, as read from the host list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostRecord {
    /// Hostname or IP address to connect to
    pub host: String,
    /// Port given in the host list, if any
    pub port: Option<u16>,
    /// Free-form description used in alerts
    pub description: String,
}

impl HostRecord {
    pub fn new<H: Into<String>, D: Into<String>>(host: H, description: D) -> Self {
        HostRecord {
            host: host.into(),
            port: None,
            description: description.into(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

impl fmt::Display for HostRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{} ({})", self.host, port, self.description),
            None => write!(f, "{} ({})", self.host, self.description),
        }
    }
}

/// Result of probing a single host.
///
/// Exactly one outcome is produced per [`HostRecord`] per run. `ExpiringSoon`
/// and `Expired` are actionable; the remaining failure variants describe a
/// probe that never got to look at a certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum CertificateOutcome {
    Ok,
    ExpiringSoon,
    Expired,
    Timeout,
    ConnectionError(String),
    HandshakeError(String),
}

impl CertificateOutcome {
    /// Whether this outcome should trigger a notification.
    pub fn is_actionable(&self) -> bool {
        matches!(
            self,
            CertificateOutcome::ExpiringSoon | CertificateOutcome::Expired
        )
    }

    /// Whether the probe itself failed before a certificate could be classified.
    pub fn is_probe_failure(&self) -> bool {
        matches!(
            self,
            CertificateOutcome::Timeout
                | CertificateOutcome::ConnectionError(_)
                | CertificateOutcome::HandshakeError(_)
        )
    }

    /// Numeric code exported as a gauge value.
    pub fn code(&self) -> i64 {
        match self {
            CertificateOutcome::Ok => 0,
            CertificateOutcome::ExpiringSoon => 1,
            CertificateOutcome::Expired => 2,
            CertificateOutcome::Timeout => 3,
            CertificateOutcome::ConnectionError(_) => 4,
            CertificateOutcome::HandshakeError(_) => 5,
        }
    }

    /// Short label without the failure detail.
    pub fn label(&self) -> &'static str {
        match self {
            CertificateOutcome::Ok => "ok",
            CertificateOutcome::ExpiringSoon => "expiring_soon",
            CertificateOutcome::Expired => "expired",
            CertificateOutcome::Timeout => "timeout",
            CertificateOutcome::ConnectionError(_) => "connection_error",
            CertificateOutcome::HandshakeError(_) => "handshake_error",
        }
    }
}

impl fmt::Display for CertificateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertificateOutcome::Ok => write!(f, "certificate is ok"),
            CertificateOutcome::ExpiringSoon => write!(f, "expiring soon"),
            CertificateOutcome::Expired => write!(f, "expired"),
            CertificateOutcome::Timeout => write!(f, "timeout connecting to host"),
            CertificateOutcome::ConnectionError(detail) => {
                write!(f, "connection error: {}", detail)
            }
            CertificateOutcome::HandshakeError(detail) => write!(f, "handshake error: {}", detail),
        }
    }
}
