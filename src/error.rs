//! Error types for endpoint inspection.
//!
//! Errors fall into two tiers. Configuration errors (a malformed endpoint or
//! an unusable trust store) abort a run before any handshake is attempted.
//! Operational errors (DNS, TCP, timeouts, non-certificate TLS failures) mean
//! a handshake produced no verdict at all. Certificate verification problems
//! are never errors: they are reported as findings in a
//! [`DiagnosticResult`](crate::DiagnosticResult).

use std::io;

use thiserror::Error;

/// Error type for everything that prevents an inspection from producing a verdict.
#[derive(Debug, Error)]
pub enum InspectorError {
    /// The endpoint string could not be turned into `host:port`
    #[error("Supplied endpoint is not well formed: {endpoint} ({reason})")]
    MalformedEndpoint {
        /// The raw endpoint as supplied by the user
        endpoint: String,
        /// Why parsing failed
        reason: String,
    },

    /// The trust store file could not be read
    #[error("Failed to read trust store {path}: {source}")]
    TrustStoreRead {
        /// Path of the trust store
        path: String,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The trust store could not be opened with the given passphrase
    #[error("Failed to open trust store {path}: {details}. Check the password and that the file is PKCS#12.")]
    TrustStoreUnlock {
        /// Path of the trust store
        path: String,
        /// Details reported by the key store reader
        details: String,
    },

    /// A trusted certificate entry could not be decoded
    #[error("Trust store entry '{alias}' is not a valid certificate: {details}")]
    TrustStoreEntry {
        /// Alias of the offending entry
        alias: String,
        /// Decoder error
        details: String,
    },

    /// DNS resolution failed for the given hostname
    #[error("Failed to resolve hostname: {hostname}. Check that the hostname is spelled correctly and your DNS configuration is working.")]
    DnsResolution {
        /// The host:port that failed to resolve
        hostname: String,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// TCP connection failed to the target address
    #[error("Connection failed to: {address}. Verify the host is running a TLS service and is reachable.")]
    ConnectionFailed {
        /// The address (host:port) that connection failed to
        address: String,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Network operation timeout
    #[error("Operation timed out: {operation}")]
    Timeout {
        /// Description of which operation timed out
        operation: String,
    },

    /// TLS handshake failed for a reason other than certificate verification
    #[error("TLS handshake failed: {details}")]
    HandshakeFailed {
        /// Details about why the handshake failed
        details: String,
    },

    /// OpenSSL error occurred while setting up the connection
    #[error("OpenSSL error: {details}")]
    OpenSSLError {
        /// The underlying OpenSSL error
        details: String,
    },

    /// Generic I/O error
    #[error("I/O error: {source}")]
    IoError {
        /// The underlying I/O error
        #[from]
        source: io::Error,
    },
}

impl InspectorError {
    /// Returns `true` for errors raised while preparing a run (bad endpoint,
    /// unusable trust store), as opposed to errors raised by a handshake.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::MalformedEndpoint { .. }
                | Self::TrustStoreRead { .. }
                | Self::TrustStoreUnlock { .. }
                | Self::TrustStoreEntry { .. }
        )
    }
}

impl From<openssl::error::ErrorStack> for InspectorError {
    fn from(e: openssl::error::ErrorStack) -> Self {
        Self::OpenSSLError {
            details: e.to_string(),
        }
    }
}
