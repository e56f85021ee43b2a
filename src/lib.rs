//! Diagnose TLS certificate deployments from a client's point of view.
//!
//! The crate makes one TLS handshake against an endpoint and explains, in
//! plain sentences, why a typical client would accept or reject the server's
//! certificate chain: expired certificates, hostname mismatches, untrusted
//! issuers and broken chains.
//!
//! ```no_run
//! use ssl_inspector::{diagnose, Endpoint, TrustPool, DEFAULT_TIMEOUT};
//!
//! let endpoint = Endpoint::parse("wrong.host.badssl.com")?;
//! let pool = TrustPool::load(None, "")?;
//! let result = diagnose(&endpoint, &pool, DEFAULT_TIMEOUT)?;
//! for message in &result.messages {
//!     println!("{}", message);
//! }
//! # Ok::<(), ssl_inspector::InspectorError>(())
//! ```

pub mod config;
pub mod diagnostic;
pub mod endpoint;
pub mod error;
pub mod trust;

pub use diagnostic::{
    diagnose, DiagnosticResult, Finding, InvalidReason, VerificationError, DEFAULT_TIMEOUT,
};
pub use endpoint::{normalize, Endpoint, DEFAULT_PORT};
pub use error::InspectorError;
pub use trust::{TrustAnchor, TrustPool};
