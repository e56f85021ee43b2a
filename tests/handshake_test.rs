//! Handshakes against local TLS servers.

mod common;

use std::time::Duration;

use pretty_assertions::assert_eq;
use ssl_inspector::{diagnose, Endpoint, Finding, InspectorError, InvalidReason, TrustPool};

const TIMEOUT: Duration = Duration::from_secs(10);

fn localhost(port: u16) -> Endpoint {
    Endpoint::parse(&format!("localhost:{}", port)).unwrap()
}

fn trusting(ca: &common::Identity) -> TrustPool {
    TrustPool::platform().with_anchor("test-ca", ca.cert.clone())
}

#[test]
fn valid_and_trusted() {
    let ca = common::root_ca("Inspector Test Root");
    let leaf = common::server_cert("localhost", "localhost", &ca, false);
    let port = common::serve(&leaf, &[]);

    let result = diagnose(&localhost(port), &trusting(&ca), TIMEOUT).unwrap();

    assert!(result.valid);
    assert!(result.messages.is_empty());
    assert!(result.protocol.is_some());
    assert!(result.cipher.is_some());
}

#[test]
fn expired_and_trusted() {
    let ca = common::root_ca("Inspector Test Root");
    let leaf = common::server_cert("localhost", "localhost", &ca, true);
    let port = common::serve(&leaf, &[]);

    let result = diagnose(&localhost(port), &trusting(&ca), TIMEOUT).unwrap();

    assert!(!result.valid);
    assert_eq!(
        result.messages,
        vec!["Certificate for CN=localhost is invalid because: Certificate expired".to_string()]
    );
    assert_eq!(
        result.findings,
        vec![Finding::InvalidCertificate {
            subject: "CN=localhost".to_string(),
            reason: InvalidReason::Expired,
        }]
    );
}

#[test]
fn wrong_host_and_trusted() {
    let ca = common::root_ca("Inspector Test Root");
    let leaf = common::server_cert("other.example", "other.example", &ca, false);
    let port = common::serve(&leaf, &[]);
    let endpoint = localhost(port);

    let result = diagnose(&endpoint, &trusting(&ca), TIMEOUT).unwrap();

    assert!(!result.valid);
    assert_eq!(
        result.messages,
        vec![format!(
            "Certificate for CN=other.example is not valid for localhost:{}",
            port
        )]
    );
}

#[test]
fn wrong_host_and_expired_are_both_reported() {
    let ca = common::root_ca("Inspector Test Root");
    let leaf = common::server_cert("other.example", "other.example", &ca, true);
    let port = common::serve(&leaf, &[]);

    let result = diagnose(&localhost(port), &trusting(&ca), TIMEOUT).unwrap();

    assert!(!result.valid);
    assert_eq!(result.messages.len(), 2);
    assert!(result.messages[0].contains("is not valid for localhost"));
    assert!(result.messages[1].ends_with("Certificate expired"));
}

#[test]
fn other_scheme_without_port_is_diagnosed_on_443() {
    let ca = common::root_ca("Inspector Test Root");
    let leaf = common::server_cert("localhost", "localhost", &ca, false);
    if common::serve_on("127.0.0.1:443", &leaf, &[]).is_none() {
        eprintln!("Skipping: cannot bind 127.0.0.1:443");
        return;
    }

    let endpoint = Endpoint::parse("ldaps://localhost").unwrap();
    assert_eq!(endpoint.hostport(), "localhost");

    let result = diagnose(&endpoint, &trusting(&ca), TIMEOUT).unwrap();
    assert!(result.valid);
    assert!(result.protocol.is_some());
}

#[test]
fn self_signed_for_other_host_is_only_untrusted() {
    let leaf = common::self_signed("other.example", "other.example");
    let port = common::serve(&leaf, &[]);

    let result = diagnose(&localhost(port), &TrustPool::platform(), TIMEOUT).unwrap();

    assert!(!result.valid);
    assert!(!result.findings.is_empty());
    assert!(result
        .findings
        .iter()
        .all(|finding| matches!(finding, Finding::UnknownAuthority { .. })));
}

#[test]
fn self_signed() {
    let leaf = common::self_signed("localhost", "localhost");
    let port = common::serve(&leaf, &[]);

    let result = diagnose(&localhost(port), &TrustPool::platform(), TIMEOUT).unwrap();

    assert!(!result.valid);
    assert!(!result.findings.is_empty());
    assert!(result
        .findings
        .iter()
        .all(|finding| matches!(finding, Finding::UnknownAuthority { .. })));
    let message = &result.messages[0];
    assert!(message.starts_with("Certificate for CN=localhost is not trusted."));
    assert!(message.contains("1. It is self-signed"));
    assert!(message.contains("2. It is signed by an unknown authority"));
    assert!(message.contains("3. The CA that signed this certificate is not a valid Certificate Authority"));
    assert!(message.ends_with("It was signed by: localhost"));
}

#[test]
fn untrusted_root() {
    let ca = common::root_ca("Untrusted Test Root");
    let leaf = common::server_cert("localhost", "localhost", &ca, false);
    let port = common::serve(&leaf, &[&ca.cert]);

    let result = diagnose(&localhost(port), &TrustPool::platform(), TIMEOUT).unwrap();

    assert!(!result.valid);
    assert!(!result.findings.is_empty());
    for finding in &result.findings {
        match finding {
            Finding::UnknownAuthority { signed_by, .. } => {
                assert_eq!(signed_by, "Untrusted Test Root")
            }
            other => panic!("Expected an untrusted authority finding, got {:?}", other),
        }
    }
}

#[test]
fn repeated_diagnosis_is_stable() {
    let ca = common::root_ca("Inspector Test Root");
    let leaf = common::server_cert("other.example", "other.example", &ca, true);
    let port = common::serve(&leaf, &[]);
    let endpoint = localhost(port);
    let pool = trusting(&ca);

    let first = diagnose(&endpoint, &pool, TIMEOUT).unwrap();
    let second = diagnose(&endpoint, &pool, TIMEOUT).unwrap();

    assert_eq!(first.valid, second.valid);
    assert_eq!(first.findings, second.findings);
    assert_eq!(first.messages, second.messages);
}

#[test]
fn connection_refused_is_not_a_finding() {
    let endpoint = Endpoint::parse(&format!("127.0.0.1:{}", common::closed_port())).unwrap();

    let err = diagnose(&endpoint, &TrustPool::platform(), TIMEOUT).unwrap_err();

    assert!(matches!(err, InspectorError::ConnectionFailed { .. }));
    assert!(!err.is_configuration());
}

#[test]
fn plaintext_server_is_handshake_failure() {
    let endpoint = localhost(common::serve_plaintext());

    let err = diagnose(&endpoint, &TrustPool::platform(), TIMEOUT).unwrap_err();

    assert!(
        matches!(err, InspectorError::HandshakeFailed { .. }),
        "unexpected error: {:?}",
        err
    );
}

#[test]
fn silent_server_times_out() {
    let endpoint = localhost(common::serve_silent(Duration::from_secs(5)));

    let err = diagnose(&endpoint, &TrustPool::platform(), Duration::from_secs(1)).unwrap_err();

    assert!(matches!(err, InspectorError::Timeout { .. }), "unexpected error: {:?}", err);
}

#[test]
fn unresolvable_host() {
    let endpoint = Endpoint::parse("does-not-exist.invalid:443").unwrap();

    let err = diagnose(&endpoint, &TrustPool::platform(), TIMEOUT).unwrap_err();

    assert!(matches!(err, InspectorError::DnsResolution { .. }));
}
