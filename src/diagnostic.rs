//! The handshake diagnostic engine.
//!
//! [`diagnose`] performs one TLS handshake and records every certificate
//! verification error OpenSSL raises along the chain instead of stopping at
//! the first one. Each error is classified into a [`Finding`] and rendered as
//! a human readable message.

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::debug;
use openssl::ssl::{HandshakeError, SslConnector, SslMethod, SslVerifyMode};
use openssl::x509::X509StoreContextRef;
use serde::Serialize;

use crate::endpoint::{Endpoint, DEFAULT_PORT};
use crate::error::InspectorError;
use crate::trust::{common_name, distinguished_name, TrustPool};

/// Bound on connect, read and write when no timeout is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// OpenSSL `X509_V_ERR_*` codes, see `x509_vfy.h`.
mod code {
    pub(super) const UNABLE_TO_GET_ISSUER_CERT: i32 = 2;
    pub(super) const CERT_NOT_YET_VALID: i32 = 9;
    pub(super) const CERT_HAS_EXPIRED: i32 = 10;
    pub(super) const DEPTH_ZERO_SELF_SIGNED_CERT: i32 = 18;
    pub(super) const SELF_SIGNED_CERT_IN_CHAIN: i32 = 19;
    pub(super) const UNABLE_TO_GET_ISSUER_CERT_LOCALLY: i32 = 20;
    pub(super) const UNABLE_TO_VERIFY_LEAF_SIGNATURE: i32 = 21;
    pub(super) const CERT_CHAIN_TOO_LONG: i32 = 22;
    pub(super) const INVALID_CA: i32 = 24;
    pub(super) const PATH_LENGTH_EXCEEDED: i32 = 25;
    pub(super) const INVALID_PURPOSE: i32 = 26;
    pub(super) const CERT_UNTRUSTED: i32 = 27;
    pub(super) const CERT_REJECTED: i32 = 28;
    pub(super) const SUBJECT_ISSUER_MISMATCH: i32 = 29;
    pub(super) const AKID_SKID_MISMATCH: i32 = 30;
    pub(super) const AKID_ISSUER_SERIAL_MISMATCH: i32 = 31;
    pub(super) const KEYUSAGE_NO_CERTSIGN: i32 = 32;
    pub(super) const UNHANDLED_CRITICAL_EXTENSION: i32 = 34;
    pub(super) const INVALID_NON_CA: i32 = 37;
    pub(super) const PROXY_PATH_LENGTH_EXCEEDED: i32 = 38;
    pub(super) const KEYUSAGE_NO_DIGITAL_SIGNATURE: i32 = 39;
    pub(super) const INVALID_EXTENSION: i32 = 41;
    pub(super) const INVALID_POLICY_EXTENSION: i32 = 42;
    pub(super) const NO_EXPLICIT_POLICY: i32 = 43;
    pub(super) const PERMITTED_VIOLATION: i32 = 47;
    pub(super) const EXCLUDED_VIOLATION: i32 = 48;
    pub(super) const SUBTREE_MINMAX: i32 = 49;
    pub(super) const UNSUPPORTED_CONSTRAINT_TYPE: i32 = 51;
    pub(super) const UNSUPPORTED_CONSTRAINT_SYNTAX: i32 = 52;
    pub(super) const UNSUPPORTED_NAME_SYNTAX: i32 = 53;
    pub(super) const HOSTNAME_MISMATCH: i32 = 62;
    pub(super) const EMAIL_MISMATCH: i32 = 63;
    pub(super) const IP_ADDRESS_MISMATCH: i32 = 64;
}

/// Structural reasons a certificate in the chain is invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum InvalidReason {
    /// An issuing certificate is not marked as a CA
    NotAuthorizedToSign,
    /// Outside its validity period
    Expired,
    /// A name constraint of an issuer excludes the leaf's names
    CANotAuthorizedForThisName,
    /// A path length constraint is violated
    TooManyIntermediates,
    /// Key usage forbids the requested purpose
    IncompatibleUsage,
    /// Issuer name of a child does not match the subject of its parent
    NameMismatch,
    /// Leaf name of an unsupported type under permitted name constraints
    UnconstrainedName,
    /// Name constraint checking exceeded the verifier's limit
    TooManyConstraints,
    /// An issuer does not permit the requested extended key usage
    CANotAuthorizedForExtKeyUsage,
    /// Any other structural defect
    Unknown,
}

impl InvalidReason {
    /// Maps an OpenSSL verify error to a structural reason.
    ///
    /// `depth` is the position of the failing certificate in the chain, 0
    /// being the leaf. Codes that are not structural defects return `None`.
    pub fn from_verify_code(code: i32, depth: u32) -> Option<InvalidReason> {
        let reason = match code {
            code::INVALID_CA | code::KEYUSAGE_NO_CERTSIGN => InvalidReason::NotAuthorizedToSign,
            code::CERT_HAS_EXPIRED | code::CERT_NOT_YET_VALID => InvalidReason::Expired,
            code::PERMITTED_VIOLATION | code::EXCLUDED_VIOLATION => {
                InvalidReason::CANotAuthorizedForThisName
            }
            code::PATH_LENGTH_EXCEEDED | code::CERT_CHAIN_TOO_LONG => {
                InvalidReason::TooManyIntermediates
            }
            code::INVALID_PURPOSE if depth > 0 => InvalidReason::CANotAuthorizedForExtKeyUsage,
            code::INVALID_PURPOSE | code::KEYUSAGE_NO_DIGITAL_SIGNATURE => {
                InvalidReason::IncompatibleUsage
            }
            code::SUBJECT_ISSUER_MISMATCH => InvalidReason::NameMismatch,
            code::UNSUPPORTED_NAME_SYNTAX | code::UNSUPPORTED_CONSTRAINT_TYPE => {
                InvalidReason::UnconstrainedName
            }
            code::SUBTREE_MINMAX | code::UNSUPPORTED_CONSTRAINT_SYNTAX => {
                InvalidReason::TooManyConstraints
            }
            code::CERT_REJECTED
            | code::AKID_SKID_MISMATCH
            | code::AKID_ISSUER_SERIAL_MISMATCH
            | code::UNHANDLED_CRITICAL_EXTENSION
            | code::INVALID_NON_CA
            | code::PROXY_PATH_LENGTH_EXCEEDED
            | code::INVALID_EXTENSION
            | code::INVALID_POLICY_EXTENSION
            | code::NO_EXPLICIT_POLICY => InvalidReason::Unknown,
            _ => return None,
        };
        Some(reason)
    }

    /// Fixed explanation shown to the operator.
    pub fn explanation(self) -> &'static str {
        match self {
            InvalidReason::NotAuthorizedToSign => {
                "Signed by certificate that is not marked as a CA"
            }
            InvalidReason::Expired => "Certificate expired",
            InvalidReason::CANotAuthorizedForThisName => {
                "An intermediate or root certificate has a name constraint which doesn't permit a DNS or other name (including IP address) in the leaf certificate."
            }
            InvalidReason::TooManyIntermediates => "A path length constraint is violated.",
            InvalidReason::IncompatibleUsage => {
                "The certificate's key usage indicates that it may only be used for a different purpose."
            }
            InvalidReason::NameMismatch => {
                "The subject name of a parent certificate does not match the issuer name in the child."
            }
            InvalidReason::UnconstrainedName => {
                "A CA certificate contains permitted name constraints, but the leaf certificate contains a name of an unsupported or unconstrained type."
            }
            InvalidReason::TooManyConstraints => {
                "The name constraints of the chain could not be checked within the verifier's limits."
            }
            InvalidReason::CANotAuthorizedForExtKeyUsage => {
                "An intermediate or root certificate does not permit a requested extended key usage."
            }
            InvalidReason::Unknown => "Unknown",
        }
    }
}

/// One verification error as reported by OpenSSL during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationError {
    /// Raw `X509_V_ERR_*` code
    pub code: i32,
    /// Chain position of the failing certificate, 0 being the leaf
    pub depth: u32,
    /// Subject of the failing certificate
    pub subject: String,
    /// Common name of the failing certificate's issuer
    pub issuer: String,
    /// OpenSSL's description of the error
    pub description: String,
}

impl VerificationError {
    fn observe(ctx: &X509StoreContextRef) -> VerificationError {
        let error = ctx.error();
        let (subject, issuer) = match ctx.current_cert() {
            Some(cert) => (
                distinguished_name(cert.subject_name()),
                common_name(cert.issuer_name())
                    .unwrap_or_else(|| distinguished_name(cert.issuer_name())),
            ),
            None => ("<unknown certificate>".to_string(), "<unknown issuer>".to_string()),
        };
        VerificationError {
            code: error.as_raw(),
            depth: ctx.error_depth(),
            subject,
            issuer,
            description: error.error_string().to_string(),
        }
    }
}

/// A classified certificate verification failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    /// The certificate chains to a trusted root but does not cover the host
    HostnameMismatch { subject: String },
    /// A certificate in the chain is structurally invalid
    InvalidCertificate {
        subject: String,
        reason: InvalidReason,
    },
    /// The chain does not end in a trusted root
    UnknownAuthority { subject: String, signed_by: String },
    /// Any other verification failure, kept with OpenSSL's description
    Unclassified { description: String },
}

impl Finding {
    pub fn classify(error: &VerificationError) -> Finding {
        match error.code {
            code::HOSTNAME_MISMATCH | code::IP_ADDRESS_MISMATCH | code::EMAIL_MISMATCH => {
                Finding::HostnameMismatch {
                    subject: error.subject.clone(),
                }
            }
            code::DEPTH_ZERO_SELF_SIGNED_CERT
            | code::SELF_SIGNED_CERT_IN_CHAIN
            | code::UNABLE_TO_GET_ISSUER_CERT
            | code::UNABLE_TO_GET_ISSUER_CERT_LOCALLY
            | code::UNABLE_TO_VERIFY_LEAF_SIGNATURE
            | code::CERT_UNTRUSTED => Finding::UnknownAuthority {
                subject: error.subject.clone(),
                signed_by: error.issuer.clone(),
            },
            other => match InvalidReason::from_verify_code(other, error.depth) {
                Some(reason) => Finding::InvalidCertificate {
                    subject: error.subject.clone(),
                    reason,
                },
                None => Finding::Unclassified {
                    description: error.description.clone(),
                },
            },
        }
    }

    /// Reporting order: hostname, structural, trust, everything else.
    fn rank(&self) -> u8 {
        match self {
            Finding::HostnameMismatch { .. } => 0,
            Finding::InvalidCertificate { .. } => 1,
            Finding::UnknownAuthority { .. } => 2,
            Finding::Unclassified { .. } => 3,
        }
    }

    /// Operator facing message for a handshake against `endpoint`.
    pub fn message(&self, endpoint: &Endpoint) -> String {
        match self {
            Finding::HostnameMismatch { subject } => {
                format!("Certificate for {} is not valid for {}", subject, endpoint)
            }
            Finding::InvalidCertificate { subject, reason } => format!(
                "Certificate for {} is invalid because: {}",
                subject,
                reason.explanation()
            ),
            Finding::UnknownAuthority { subject, signed_by } => format!(
                "Certificate for {} is not trusted. This could be because:\n\
                 \t1. It is self-signed\n\
                 \t2. It is signed by an unknown authority\n\
                 \t3. The CA that signed this certificate is not a valid Certificate Authority\n\
                 \n\
                 \tIt was signed by: {}",
                subject, signed_by
            ),
            Finding::Unclassified { description } => format!(
                "Certificate for {} is invalid because: certificate verify failed: {}",
                endpoint, description
            ),
        }
    }
}

/// Outcome of one handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticResult {
    /// The endpoint the handshake was made against
    pub endpoint: Endpoint,
    /// `true` when the handshake completed without any verification error
    pub valid: bool,
    /// One message per finding, in reporting order
    pub messages: Vec<String>,
    /// The findings behind `messages`
    #[serde(skip)]
    pub findings: Vec<Finding>,
    /// Negotiated protocol version when the handshake completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    /// Negotiated cipher suite when the handshake completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cipher: Option<String>,
}

impl DiagnosticResult {
    /// Builds the result from every verification error observed for `endpoint`.
    pub fn from_errors(endpoint: &Endpoint, errors: &[VerificationError]) -> DiagnosticResult {
        let mut findings: Vec<Finding> = Vec::with_capacity(errors.len());
        for finding in errors.iter().map(Finding::classify) {
            if !findings.contains(&finding) {
                findings.push(finding);
            }
        }
        // A name mismatch only matters once the chain itself is trusted.
        if findings
            .iter()
            .any(|finding| matches!(finding, Finding::UnknownAuthority { .. }))
        {
            findings.retain(|finding| !matches!(finding, Finding::HostnameMismatch { .. }));
        }
        findings.sort_by_key(Finding::rank);

        let mut messages: Vec<String> = Vec::with_capacity(findings.len());
        for message in findings.iter().map(|finding| finding.message(endpoint)) {
            if !messages.contains(&message) {
                messages.push(message);
            }
        }

        DiagnosticResult {
            endpoint: endpoint.clone(),
            valid: findings.is_empty(),
            messages,
            findings,
            protocol: None,
            cipher: None,
        }
    }
}

/// Performs one TLS handshake against `endpoint` and reports what a client
/// verifying against `trust_pool` would reject.
///
/// Certificate problems are never errors: they come back as a
/// [`DiagnosticResult`] with `valid == false`. An `Err` means the handshake
/// could not be judged at all (DNS, TCP, timeout or a non-certificate TLS failure).
///
/// # Example
///
/// ```no_run
/// # use ssl_inspector::{diagnose, Endpoint, TrustPool, DEFAULT_TIMEOUT};
/// let endpoint = Endpoint::parse("expired.badssl.com")?;
/// let result = diagnose(&endpoint, &TrustPool::platform(), DEFAULT_TIMEOUT)?;
/// assert!(!result.valid);
/// # Ok::<(), ssl_inspector::InspectorError>(())
/// ```
pub fn diagnose(
    endpoint: &Endpoint,
    trust_pool: &TrustPool,
    timeout: Duration,
) -> Result<DiagnosticResult, InspectorError> {
    let tcp_stream = connect(endpoint, timeout)?;

    let mut builder = SslConnector::builder(SslMethod::tls_client())?;
    builder.set_cert_store(trust_pool.to_store()?);
    let mut config = builder.build().configure()?;

    let observed: Arc<Mutex<Vec<VerificationError>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&observed);
    config.set_verify_callback(SslVerifyMode::PEER, move |preverify_ok, ctx| {
        if !preverify_ok {
            let error = VerificationError::observe(ctx);
            debug!(
                "Verification error {} at depth {} on {}: {}",
                error.code, error.depth, error.subject, error.description
            );
            if let Ok(mut errors) = sink.lock() {
                errors.push(error);
            }
        }
        // Keep verifying so every problem in the chain is reported.
        true
    });

    let handshake = config.connect(endpoint.host(), tcp_stream);
    let errors = match observed.lock() {
        Ok(errors) => errors.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    };

    match handshake {
        Ok(mut stream) => {
            let mut result = DiagnosticResult::from_errors(endpoint, &errors);
            result.protocol = Some(stream.ssl().version_str().to_string());
            result.cipher = stream
                .ssl()
                .current_cipher()
                .map(|cipher| cipher.name().to_string());
            if let Err(e) = stream.shutdown() {
                debug!("TLS shutdown with {} failed: {}", endpoint, e);
            }
            Ok(result)
        }
        Err(e) if !errors.is_empty() => {
            debug!("Handshake with {} aborted after verification errors: {}", endpoint, e);
            Ok(DiagnosticResult::from_errors(endpoint, &errors))
        }
        Err(HandshakeError::SetupFailure(e)) => Err(e.into()),
        Err(HandshakeError::WouldBlock(_)) => Err(InspectorError::Timeout {
            operation: format!("TLS handshake with {}", endpoint),
        }),
        Err(HandshakeError::Failure(mid)) => {
            let timed_out = mid
                .error()
                .io_error()
                .map_or(false, |e| is_timeout(e.kind()));
            if timed_out {
                Err(InspectorError::Timeout {
                    operation: format!("TLS handshake with {}", endpoint),
                })
            } else {
                Err(InspectorError::HandshakeFailed {
                    details: mid.error().to_string(),
                })
            }
        }
    }
}

fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<TcpStream, InspectorError> {
    let addresses = socket_target(endpoint)
        .to_socket_addrs()
        .map_err(|source| InspectorError::DnsResolution {
            hostname: endpoint.to_string(),
            source,
        })?;

    let mut last_error = None;
    for address in addresses {
        match TcpStream::connect_timeout(&address, timeout) {
            Ok(stream) => {
                stream.set_read_timeout(Some(timeout))?;
                stream.set_write_timeout(Some(timeout))?;
                debug!("Connected to {} ({})", endpoint, address);
                return Ok(stream);
            }
            Err(e) => {
                debug!("Connection to {} ({}) failed: {}", endpoint, address, e);
                last_error = Some(e);
            }
        }
    }

    Err(match last_error {
        Some(e) if is_timeout(e.kind()) => InspectorError::Timeout {
            operation: format!("connect to {}", endpoint),
        },
        Some(source) => InspectorError::ConnectionFailed {
            address: endpoint.to_string(),
            source,
        },
        None => InspectorError::DnsResolution {
            hostname: endpoint.to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
        },
    })
}

/// Host and port to dial. Endpoints normalized without a port are dialed on 443.
fn socket_target(endpoint: &Endpoint) -> (&str, u16) {
    (endpoint.host(), endpoint.port().unwrap_or(DEFAULT_PORT))
}

fn is_timeout(kind: io::ErrorKind) -> bool {
    matches!(kind, io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}
