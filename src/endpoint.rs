//! Endpoint normalization.
//!
//! Operators type endpoints in many shapes: `example.com`, `example.com:8443`,
//! `https://example.com` or `ldaps://directory.example.com:636`. This module
//! turns all of them into the `host:port` form used to open the connection.
//!
//! # Rules
//!
//! - No scheme: the input is re-read as `https://<input>`.
//! - `https` without a port: `:443` is appended.
//! - Any scheme with an explicit port: `host:port` as given.
//! - Any other scheme without a port: the host alone, with no port appended.

use std::fmt;
use std::str::FromStr;

use log::debug;
use serde::{Serialize, Serializer};
use url::{ParseError, Url};

use crate::error::InspectorError;

/// Port assumed for `https` endpoints and scheme-less input.
pub const DEFAULT_PORT: u16 = 443;

/// A normalized TLS endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    hostport: String,
    host: String,
    port: Option<u16>,
}

impl Endpoint {
    /// Normalizes a user supplied endpoint.
    ///
    /// # Example
    ///
    /// ```
    /// # use ssl_inspector::Endpoint;
    /// let endpoint = Endpoint::parse("badssl.com")?;
    /// assert_eq!(endpoint.hostport(), "badssl.com:443");
    /// # Ok::<(), ssl_inspector::InspectorError>(())
    /// ```
    pub fn parse(raw: &str) -> Result<Endpoint, InspectorError> {
        let url = match Url::parse(raw) {
            Ok(url) if has_host(&url) => url,
            Ok(_) | Err(ParseError::RelativeUrlWithoutBase) => {
                debug!("Reparsing {} with https:// prepended", raw);
                Url::parse(&format!("https://{}", raw)).map_err(|e| malformed(raw, e))?
            }
            Err(e) => return Err(malformed(raw, e)),
        };

        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(malformed(raw, ParseError::EmptyHost)),
        };

        // `Url` drops ports equal to the scheme default, so look at what was typed.
        let port = url.port().or_else(|| {
            url.port_or_known_default()
                .filter(|default| authority_port(url.as_str(), raw) == Some(*default))
        });

        let port = match port {
            Some(port) => Some(port),
            None if url.scheme() == "https" => {
                debug!("HTTPS scheme with no port - assume {}", DEFAULT_PORT);
                Some(DEFAULT_PORT)
            }
            None => {
                debug!("Scheme {} with no port - keeping host as is", url.scheme());
                None
            }
        };

        let hostport = match port {
            Some(port) => format!("{}:{}", host, port),
            None => host.clone(),
        };

        Ok(Endpoint {
            hostport,
            host,
            port,
        })
    }

    /// The canonical `host:port` string.
    pub fn hostport(&self) -> &str {
        &self.hostport
    }

    /// Host name used for SNI and certificate name checks, without IPv6 brackets.
    pub fn host(&self) -> &str {
        self.host.trim_start_matches('[').trim_end_matches(']')
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }
}

/// Normalizes `raw` straight to its `host:port` string.
pub fn normalize(raw: &str) -> Result<String, InspectorError> {
    Endpoint::parse(raw).map(|endpoint| endpoint.hostport)
}

impl FromStr for Endpoint {
    type Err = InspectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Endpoint::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hostport)
    }
}

impl Serialize for Endpoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.hostport)
    }
}

fn has_host(url: &Url) -> bool {
    url.host_str().map_or(false, |host| !host.is_empty())
}

fn malformed(raw: &str, e: ParseError) -> InspectorError {
    InspectorError::MalformedEndpoint {
        endpoint: raw.to_string(),
        reason: e.to_string(),
    }
}

/// Port written in the authority of `raw`, if any.
///
/// `serialized` is only used to decide whether `raw` carried a scheme.
fn authority_port(serialized: &str, raw: &str) -> Option<u16> {
    let rest = match raw.split_once("://") {
        Some((_, rest)) => rest,
        None if serialized.starts_with("https://") => raw,
        None => return None,
    };
    let authority = rest.split(&['/', '?', '#'][..]).next().unwrap_or_default();
    let authority = authority.rsplit('@').next().unwrap_or_default();
    let after_host = match authority.rfind(']') {
        Some(end) => &authority[end + 1..],
        None => authority,
    };
    after_host.rsplit_once(':')?.1.parse().ok()
}
