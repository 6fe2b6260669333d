//! Error types for host probes and host list loading.
//!
//! Probe errors never leave the task that produced them: they are reduced to
//! a [`CertificateOutcome`] with [`ProbeError::into_outcome`]. Host list errors
//! are fatal at startup.

use std::fmt;
use std::io;

use openssl::ssl::HandshakeError;

use crate::CertificateOutcome;

/// Error raised while probing a single host.
#[derive(Debug)]
pub enum ProbeError {
    /// DNS resolution failed for the given hostname
    DnsResolution {
        /// The hostname that failed to resolve
        hostname: String,
        /// The underlying I/O error
        source: io::Error,
    },

    /// TCP connection failed to the target address
    ConnectionFailed {
        /// The address (host:port) that connection failed to
        address: String,
        /// The underlying I/O error
        source: io::Error,
    },

    /// TLS handshake failed after the TCP connection was established
    HandshakeFailed {
        /// Details about why the handshake failed
        details: String,
    },

    /// The peer sent no certificate, or one that could not be parsed
    CertificateError {
        /// Description of what went wrong
        reason: String,
    },

    /// The probe ran out of its time budget
    Timeout {
        /// Description of which operation timed out
        operation: String,
    },

    /// OpenSSL error while setting up the session
    OpenSSLError {
        /// The underlying OpenSSL error
        details: String,
    },

    /// Generic I/O error
    IoError {
        /// The underlying I/O error
        source: io::Error,
    },
}

impl ProbeError {
    /// Reduces the error to the outcome reported for the host.
    pub fn into_outcome(self) -> CertificateOutcome {
        match self {
            ProbeError::Timeout { .. } => CertificateOutcome::Timeout,
            ProbeError::DnsResolution { .. }
            | ProbeError::ConnectionFailed { .. }
            | ProbeError::IoError { .. } => CertificateOutcome::ConnectionError(self.to_string()),
            ProbeError::HandshakeFailed { .. }
            | ProbeError::CertificateError { .. }
            | ProbeError::OpenSSLError { .. } => {
                CertificateOutcome::HandshakeError(self.to_string())
            }
        }
    }
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DnsResolution { hostname, source } => {
                write!(f, "failed to resolve hostname {}: {}", hostname, source)
            }
            Self::ConnectionFailed { address, source } => {
                write!(f, "connection to {} failed: {}", address, source)
            }
            Self::HandshakeFailed { details } => write!(f, "TLS handshake failed: {}", details),
            Self::CertificateError { reason } => write!(f, "certificate error: {}", reason),
            Self::Timeout { operation } => write!(f, "operation timed out: {}", operation),
            Self::OpenSSLError { details } => write!(f, "OpenSSL error: {}", details),
            Self::IoError { source } => write!(f, "I/O error: {}", source),
        }
    }
}

impl std::error::Error for ProbeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::DnsResolution { source, .. } => Some(source),
            Self::ConnectionFailed { source, .. } => Some(source),
            Self::IoError { source } => Some(source),
            _ => None,
        }
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

impl From<io::Error> for ProbeError {
    fn from(e: io::Error) -> Self {
        if is_timeout(&e) {
            return Self::Timeout {
                operation: e.to_string(),
            };
        }
        Self::IoError { source: e }
    }
}

impl From<openssl::error::ErrorStack> for ProbeError {
    fn from(e: openssl::error::ErrorStack) -> Self {
        Self::OpenSSLError {
            details: e.to_string(),
        }
    }
}

// A blocking socket with a read timeout surfaces an expired deadline as
// WouldBlock, so both that variant and a timed-out I/O failure mean Timeout.
impl<S> From<HandshakeError<S>> for ProbeError {
    fn from(e: HandshakeError<S>) -> Self {
        match e {
            HandshakeError::SetupFailure(stack) => Self::OpenSSLError {
                details: stack.to_string(),
            },
            HandshakeError::WouldBlock(_) => Self::Timeout {
                operation: "TLS handshake".to_string(),
            },
            HandshakeError::Failure(mid) => {
                if mid.error().io_error().map(is_timeout).unwrap_or(false) {
                    Self::Timeout {
                        operation: "TLS handshake".to_string(),
                    }
                } else {
                    Self::HandshakeFailed {
                        details: mid.error().to_string(),
                    }
                }
            }
        }
    }
}

/// Error raised while loading the host list. Any of these aborts the run.
#[derive(Debug)]
pub enum HostListError {
    /// The file could not be opened
    Io {
        /// Path of the host list
        path: String,
        /// The underlying I/O error
        source: io::Error,
    },
    /// The CSV reader rejected the input
    Csv {
        /// The underlying CSV error
        source: csv::Error,
    },
    /// A record is missing fields or has an unusable host
    Malformed {
        /// 1-based record number
        record: usize,
        /// What is wrong with it
        reason: String,
    },
}

impl fmt::Display for HostListError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "could not open host list {}: {}", path, source),
            Self::Csv { source } => write!(f, "could not read host list: {}", source),
            Self::Malformed { record, reason } => {
                write!(f, "malformed host record {}: {}", record, reason)
            }
        }
    }
}

impl std::error::Error for HostListError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Csv { source } => Some(source),
            Self::Malformed { .. } => None,
        }
    }
}

impl From<csv::Error> for HostListError {
    fn from(source: csv::Error) -> Self {
        Self::Csv { source }
    }
}
