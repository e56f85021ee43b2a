//! Trust anchors used to verify server certificate chains.
//!
//! A [`TrustPool`] always starts from the platform's default roots. Extra
//! roots can be supplied through a password protected PKCS#12 trust store,
//! which is read once when the run is configured.

use std::fmt;
use std::fs;
use std::path::Path;

use log::{debug, info};
use openssl::error::ErrorStack;
use openssl::nid::Nid;
use openssl::x509::store::{X509Store, X509StoreBuilder};
use openssl::x509::{X509NameRef, X509};
use p12_keystore::{KeyStore, KeyStoreEntry};

use crate::error::InspectorError;

/// A root certificate added on top of the platform defaults.
#[derive(Clone)]
pub struct TrustAnchor {
    alias: String,
    common_name: String,
    certificate: X509,
}

impl TrustAnchor {
    pub fn new(alias: &str, certificate: X509) -> TrustAnchor {
        TrustAnchor {
            alias: alias.to_string(),
            common_name: common_name(certificate.subject_name())
                .unwrap_or_else(|| distinguished_name(certificate.subject_name())),
            certificate,
        }
    }

    /// Alias of the trust store entry the anchor came from.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Subject common name of the anchor (full subject when it has no CN).
    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    pub fn certificate(&self) -> &X509 {
        &self.certificate
    }
}

impl fmt::Debug for TrustAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustAnchor")
            .field("alias", &self.alias)
            .field("common_name", &self.common_name)
            .finish()
    }
}

/// The set of roots considered valid for one run.
///
/// Read-only once built, so a single pool can back any number of parallel
/// handshakes. Each handshake gets its own OpenSSL store from [`TrustPool::to_store`].
#[derive(Debug, Clone, Default)]
pub struct TrustPool {
    anchors: Vec<TrustAnchor>,
}

impl TrustPool {
    /// The platform default roots with no additions.
    pub fn platform() -> TrustPool {
        TrustPool::default()
    }

    /// Builds the pool for a run.
    ///
    /// Without `custom_store` this is [`TrustPool::platform`]. With one, every
    /// trusted certificate entry of the PKCS#12 file is added on top of the
    /// platform roots. Any problem with the store is fatal: a wrong passphrase
    /// never degrades to a pool without the custom roots.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use ssl_inspector::TrustPool;
    /// # use std::path::Path;
    /// let pool = TrustPool::load(Some(Path::new("corporate-roots.p12")), "changeit")?;
    /// for anchor in pool.custom_anchors() {
    ///     println!("{} -> {}", anchor.alias(), anchor.common_name());
    /// }
    /// # Ok::<(), ssl_inspector::InspectorError>(())
    /// ```
    pub fn load(custom_store: Option<&Path>, passphrase: &str) -> Result<TrustPool, InspectorError> {
        let mut pool = TrustPool::platform();
        let path = match custom_store {
            Some(path) => path,
            None => return Ok(pool),
        };

        let data = fs::read(path).map_err(|source| InspectorError::TrustStoreRead {
            path: path.display().to_string(),
            source,
        })?;

        let keystore = KeyStore::from_pkcs12(&data, passphrase).map_err(|e| {
            InspectorError::TrustStoreUnlock {
                path: path.display().to_string(),
                details: e.to_string(),
            }
        })?;

        let mut certificates: Vec<(String, X509)> = Vec::new();
        for (alias, entry) in keystore.entries() {
            if let KeyStoreEntry::Certificate(cert) = entry {
                let certificate =
                    X509::from_der(cert.as_der()).map_err(|e| InspectorError::TrustStoreEntry {
                        alias: alias.to_string(),
                        details: e.to_string(),
                    })?;
                certificates.push((alias.to_string(), certificate));
            } else {
                debug!("Skipping non certificate entry '{}' in {}", alias, path.display());
            }
        }

        // Entry iteration order is not stable across reads.
        certificates.sort_by(|a, b| a.0.cmp(&b.0));
        for (alias, certificate) in certificates {
            pool = pool.with_anchor(&alias, certificate);
        }
        Ok(pool)
    }

    /// Adds one root to the pool, after the ones already present.
    #[must_use]
    pub fn with_anchor(mut self, alias: &str, certificate: X509) -> TrustPool {
        let anchor = TrustAnchor::new(alias, certificate);
        info!("Loaded custom trust anchor '{}': {}", anchor.alias, anchor.common_name);
        self.anchors.push(anchor);
        self
    }

    /// Roots added on top of the platform defaults.
    pub fn custom_anchors(&self) -> &[TrustAnchor] {
        &self.anchors
    }

    /// Builds a fresh OpenSSL store holding the platform roots and every custom anchor.
    pub fn to_store(&self) -> Result<X509Store, ErrorStack> {
        let mut builder = X509StoreBuilder::new()?;
        builder.set_default_paths()?;
        for anchor in &self.anchors {
            builder.add_cert(anchor.certificate.clone())?;
        }
        Ok(builder.build())
    }
}

/// First common name of `name`.
pub(crate) fn common_name(name: &X509NameRef) -> Option<String> {
    name.entries_by_nid(Nid::COMMONNAME)
        .next()
        .map(|entry| match entry.data().as_utf8() {
            Ok(value) => value.to_string(),
            Err(_) => String::from_utf8_lossy(entry.data().as_slice()).into_owned(),
        })
}

/// Renders `name` as `CN=leaf,O=Org,C=US`: most specific attribute first.
pub(crate) fn distinguished_name(name: &X509NameRef) -> String {
    let mut parts: Vec<String> = name
        .entries()
        .map(|entry| {
            let key = match entry.object().nid().short_name() {
                Ok(short) => short.to_string(),
                Err(_) => entry.object().to_string(),
            };
            let value = match entry.data().as_utf8() {
                Ok(value) => value.to_string(),
                Err(_) => String::from_utf8_lossy(entry.data().as_slice()).into_owned(),
            };
            format!("{}={}", key, value)
        })
        .collect();
    parts.reverse();
    parts.join(",")
}
