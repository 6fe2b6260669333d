//! Classification of the certificates presented by a peer.
//!
//! Certificates are evaluated in the order the peer sent them. Anything
//! flagged as a CA is skipped; the first leaf certificate that is expired or
//! inside the threshold decides the outcome for the host.

use chrono::{DateTime, Duration, TimeZone, Utc};
use x509_parser::extensions::GeneralName;
use x509_parser::parse_x509_certificate;

use crate::error::ProbeError;
use crate::CertificateOutcome;

/// The certificate fields the classification and the diagnostics need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateFields {
    pub not_after: DateTime<Utc>,
    pub is_ca: bool,
    pub issuer: String,
    pub subject: String,
    pub dns_names: Vec<String>,
}

impl CertificateFields {
    /// Extracts the fields from a DER encoded certificate.
    pub fn from_der(der: &[u8]) -> Result<Self, ProbeError> {
        let (_, cert) = parse_x509_certificate(der).map_err(|e| ProbeError::CertificateError {
            reason: format!("certificate parse error: {}", e),
        })?;

        let not_after = Utc
            .timestamp_opt(cert.validity().not_after.timestamp(), 0)
            .single()
            .ok_or_else(|| ProbeError::CertificateError {
                reason: "notAfter is out of range".to_string(),
            })?;

        let is_ca = cert
            .basic_constraints()
            .map(|bc| bc.map(|ext| ext.value.ca).unwrap_or(false))
            .unwrap_or(false);

        let dns_names = match cert.subject_alternative_name() {
            Ok(Some(san)) => san
                .value
                .general_names
                .iter()
                .filter_map(|name| match name {
                    GeneralName::DNSName(dns) => Some(dns.to_string()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };

        Ok(CertificateFields {
            not_after,
            is_ca,
            issuer: cert.issuer().to_string(),
            subject: cert.subject().to_string(),
            dns_names,
        })
    }
}

/// Classifies a peer chain against `threshold_days` at `now`.
///
/// A certificate is expired once `now` is strictly past `notAfter`. It is
/// expiring soon when the time left is strictly less than the threshold, so a
/// certificate with exactly `threshold_days * 24h` remaining is still `Ok`.
pub fn classify(
    chain: &[CertificateFields],
    threshold_days: u32,
    now: DateTime<Utc>,
) -> CertificateOutcome {
    let threshold = Duration::days(i64::from(threshold_days));

    for cert in chain.iter().filter(|cert| !cert.is_ca) {
        if now > cert.not_after {
            return CertificateOutcome::Expired;
        }
        if cert.not_after - now < threshold {
            return CertificateOutcome::ExpiringSoon;
        }
    }

    CertificateOutcome::Ok
}

/// Earliest `notAfter` among the leaf certificates of a chain.
pub fn earliest_leaf_expiry(chain: &[CertificateFields]) -> Option<DateTime<Utc>> {
    chain
        .iter()
        .filter(|cert| !cert.is_ca)
        .map(|cert| cert.not_after)
        .min()
}
