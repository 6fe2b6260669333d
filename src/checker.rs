//! One bounded TLS probe against one host.

use std::io;
use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::debug;
use openssl::ssl::{Ssl, SslContext, SslMethod, SslVerifyMode};
use serde::Serialize;

use crate::error::ProbeError;
use crate::inspector::{self, CertificateFields};
use crate::{CertificateOutcome, HostRecord};

/// Port probed when the host record does not name one.
pub const DEFAULT_PORT: u16 = 443;

/// Wall-clock budget for resolving, connecting and handshaking with one host.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Something that turns a host record into exactly one report.
///
/// [`HostChecker`] is the network implementation; the dispatcher only sees
/// this trait.
pub trait Probe: Send + Sync {
    fn probe(&self, record: &HostRecord) -> ProbeReport;
}

/// The outcome of one probe plus the expiry it was based on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    pub outcome: CertificateOutcome,
    /// Earliest `notAfter` among the leaf certificates, if the handshake completed
    pub not_after: Option<DateTime<Utc>>,
}

impl From<CertificateOutcome> for ProbeReport {
    fn from(outcome: CertificateOutcome) -> Self {
        ProbeReport {
            outcome,
            not_after: None,
        }
    }
}

/// Checks the certificates of a single host.
///
/// Peer verification is disabled on purpose: the checker reads certificate
/// fields whether or not the chain is trusted.
#[derive(Debug, Clone)]
pub struct HostChecker {
    /// Port used when the record does not carry one
    pub port: u16,
    /// Budget for the whole connect and handshake sequence
    pub timeout: Duration,
    /// Days before `notAfter` at which a certificate counts as expiring soon
    pub threshold_days: u32,
}

impl Default for HostChecker {
    fn default() -> Self {
        HostChecker::new(30)
    }
}

impl HostChecker {
    pub fn new(threshold_days: u32) -> Self {
        HostChecker {
            port: DEFAULT_PORT,
            timeout: DEFAULT_TIMEOUT,
            threshold_days,
        }
    }

    /// Probes one host and classifies what it presented.
    ///
    /// The probe runs on its own thread and is raced against the timeout.
    /// Every socket operation inside it is bounded by the same deadline, so a
    /// probe that loses the race winds down by itself and its late result is
    /// dropped together with the connection.
    pub fn check(&self, record: &HostRecord) -> ProbeReport {
        let host = record.host.clone();
        let port = record.port.unwrap_or(self.port);
        let deadline = Instant::now() + self.timeout;

        let (tx, rx) = mpsc::sync_channel(1);
        let spawned = thread::Builder::new()
            .name(format!("probe-{}", host))
            .spawn(move || {
                let result = fetch_chain(&host, port, deadline);
                // the receiver is gone if the race was already lost
                let _ = tx.send(result);
            });
        if let Err(e) = spawned {
            return ProbeError::from(e).into_outcome().into();
        }

        match rx.recv_timeout(self.timeout) {
            Ok(Ok(chain)) => self.report(record, &chain, Utc::now()),
            Ok(Err(e)) => e.into_outcome().into(),
            Err(RecvTimeoutError::Timeout) => CertificateOutcome::Timeout.into(),
            Err(RecvTimeoutError::Disconnected) => {
                CertificateOutcome::ConnectionError("probe exited without a result".to_string())
                    .into()
            }
        }
    }

    fn report(
        &self,
        record: &HostRecord,
        chain: &[CertificateFields],
        now: DateTime<Utc>,
    ) -> ProbeReport {
        for (i, cert) in chain.iter().enumerate().filter(|(_, cert)| !cert.is_ca) {
            let left = cert.not_after - now;
            debug!(
                "{} certificate {}: expires after {} ({} days, {} hours)",
                record.host,
                i,
                cert.not_after,
                left.num_days(),
                left.num_hours()
            );
            debug!("{} certificate {}: issuer: {}", record.host, i, cert.issuer);
            debug!("{} certificate {}: names: {}", record.host, i, cert.subject);
            debug!(
                "{} certificate {}: DNSNames: {:?}",
                record.host, i, cert.dns_names
            );
        }

        ProbeReport {
            outcome: inspector::classify(chain, self.threshold_days, now),
            not_after: inspector::earliest_leaf_expiry(chain),
        }
    }
}

impl Probe for HostChecker {
    fn probe(&self, record: &HostRecord) -> ProbeReport {
        self.check(record)
    }
}

fn remaining(deadline: Instant, operation: &str) -> Result<Duration, ProbeError> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|left| !left.is_zero())
        .ok_or_else(|| ProbeError::Timeout {
            operation: operation.to_string(),
        })
}

fn is_ip_literal(host: &str) -> bool {
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .is_ok()
}

fn connect(host: &str, port: u16, deadline: Instant) -> Result<TcpStream, ProbeError> {
    let address = format!("{}:{}", host, port);
    let addrs: Vec<SocketAddr> = address
        .to_socket_addrs()
        .map_err(|source| ProbeError::DnsResolution {
            hostname: host.to_string(),
            source,
        })?
        .collect();

    let mut last_error = None;
    for addr in addrs {
        let budget = remaining(deadline, &format!("connect to {}", address))?;
        match TcpStream::connect_timeout(&addr, budget) {
            Ok(stream) => return Ok(stream),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                return Err(ProbeError::Timeout {
                    operation: format!("connect to {}", address),
                })
            }
            Err(e) => last_error = Some(e),
        }
    }

    Err(match last_error {
        Some(source) => ProbeError::ConnectionFailed { address, source },
        None => ProbeError::DnsResolution {
            hostname: host.to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
        },
    })
}

/// Connects, handshakes and returns the peer chain, leaf first.
fn fetch_chain(
    host: &str,
    port: u16,
    deadline: Instant,
) -> Result<Vec<CertificateFields>, ProbeError> {
    let mut context = SslContext::builder(SslMethod::tls_client())?;
    context.set_verify(SslVerifyMode::NONE);
    let context = context.build();

    let mut ssl = Ssl::new(&context)?;
    if !is_ip_literal(host) {
        ssl.set_hostname(host)?;
    }

    let tcp_stream = connect(host, port, deadline)?;
    let budget = remaining(deadline, "TLS handshake")?;
    tcp_stream.set_read_timeout(Some(budget))?;
    tcp_stream.set_write_timeout(Some(budget))?;

    let stream = ssl.connect(tcp_stream)?;

    // on the client side the peer chain includes the leaf
    let der = match stream.ssl().peer_cert_chain() {
        Some(chain) if !chain.is_empty() => chain
            .iter()
            .map(|cert| cert.to_der())
            .collect::<Result<Vec<_>, _>>()?,
        _ => match stream.ssl().peer_certificate() {
            Some(cert) => vec![cert.to_der()?],
            None => {
                return Err(ProbeError::CertificateError {
                    reason: "no peer certificate".to_string(),
                })
            }
        },
    };

    der.iter()
        .map(|cert| CertificateFields::from_der(cert))
        .collect()
}
