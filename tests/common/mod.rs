//! Local TLS servers with freshly generated certificates.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::ssl::{SslAcceptor, SslMethod};
use openssl::x509::extension::{BasicConstraints, SubjectAlternativeName};
use openssl::x509::{X509NameBuilder, X509};

use certwatcher::{NotificationIntent, Notifier, NotifyError};

const DAY: i64 = 24 * 60 * 60;

pub struct TestCert {
    pub cert: X509,
    pub key: PKey<Private>,
}

/// Self-signed certificate valid between two unix timestamps.
pub fn certificate(not_before: i64, not_after: i64, ca: bool) -> TestCert {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, if ca { "Test CA" } else { "localhost" })
        .unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&Asn1Time::from_unix(not_before).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::from_unix(not_after).unwrap())
        .unwrap();

    let mut constraints = BasicConstraints::new();
    if ca {
        constraints.critical().ca();
    }
    builder
        .append_extension(constraints.build().unwrap())
        .unwrap();
    if !ca {
        let san = SubjectAlternativeName::new()
            .dns("localhost")
            .ip("127.0.0.1")
            .build(&builder.x509v3_context(None, None))
            .unwrap();
        builder.append_extension(san).unwrap();
    }

    builder.sign(&key, MessageDigest::sha256()).unwrap();
    TestCert {
        cert: builder.build(),
        key,
    }
}

/// Leaf certificate issued yesterday that expires `days` from now.
pub fn valid_for_days(days: i64) -> TestCert {
    let now = Utc::now().timestamp();
    certificate(now - DAY, now + days * DAY, false)
}

/// Leaf certificate that expired `days` ago.
pub fn expired_days_ago(days: i64) -> TestCert {
    let now = Utc::now().timestamp();
    certificate(now - (days + 30) * DAY, now - days * DAY, false)
}

pub fn ca_certificate(not_after_offset_days: i64) -> TestCert {
    let now = Utc::now().timestamp();
    certificate(now - 365 * DAY, now + not_after_offset_days * DAY, true)
}

/// Serves `leaf` (followed by `extra_chain`) on a random local port.
///
/// The server lives until the test process exits.
pub fn tls_server(leaf: TestCert, extra_chain: Vec<X509>) -> u16 {
    let mut acceptor = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls_server()).unwrap();
    acceptor.set_private_key(&leaf.key).unwrap();
    acceptor.set_certificate(&leaf.cert).unwrap();
    for cert in extra_chain {
        acceptor.add_extra_chain_cert(cert).unwrap();
    }
    let acceptor = Arc::new(acceptor.build());

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    thread::spawn(move || {
        for stream in listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(_) => continue,
            };
            let acceptor = acceptor.clone();
            thread::spawn(move || {
                if let Ok(mut tls) = acceptor.accept(stream) {
                    let mut buf = [0u8; 1];
                    let _ = tls.read(&mut buf);
                }
            });
        }
    });

    port
}

/// Like [`tls_server`], but every connection waits `delay` before the
/// handshake starts. The handshake then completes normally.
pub fn slow_tls_server(leaf: TestCert, delay: Duration) -> u16 {
    let mut acceptor = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls_server()).unwrap();
    acceptor.set_private_key(&leaf.key).unwrap();
    acceptor.set_certificate(&leaf.cert).unwrap();
    let acceptor = Arc::new(acceptor.build());

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let acceptor = acceptor.clone();
            thread::spawn(move || {
                thread::sleep(delay);
                if let Ok(mut tls) = acceptor.accept(stream) {
                    let mut buf = [0u8; 1];
                    let _ = tls.read(&mut buf);
                }
            });
        }
    });

    port
}

/// Answers every connection with plain text and hangs up.
pub fn plaintext_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    thread::spawn(move || {
        for mut stream in listener.incoming().flatten() {
            let mut buf = [0u8; 512];
            let _ = stream.read(&mut buf);
            let _ = stream.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n");
        }
    });

    port
}

/// A listener that never accepts; the handshake stalls in the backlog.
pub fn silent_server() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// A local port with nothing listening on it.
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<NotificationIntent>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<NotificationIntent> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, intent: &NotificationIntent) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(intent.clone());
        Ok(())
    }
}
