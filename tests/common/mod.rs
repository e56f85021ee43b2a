//! Certificates and TLS servers for integration tests.
#![allow(dead_code)]

use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::ssl::{SslAcceptor, SslMethod};
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
    SubjectKeyIdentifier,
};
use openssl::x509::{X509Name, X509NameBuilder, X509};
use p12_keystore::{KeyStore, KeyStoreEntry};
use tempfile::TempDir;

const DAY: i64 = 24 * 60 * 60;

/// A certificate and its private key.
pub struct Identity {
    pub cert: X509,
    pub key: PKey<Private>,
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

fn key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

fn name(common_name: &str) -> X509Name {
    let mut builder = X509NameBuilder::new().unwrap();
    builder.append_entry_by_nid(Nid::COMMONNAME, common_name).unwrap();
    builder.build()
}

fn builder(subject: &str, key: &PKey<Private>, not_before: i64, not_after: i64) -> openssl::x509::X509Builder {
    let mut serial = BigNum::new().unwrap();
    serial.rand(64, MsbOption::MAYBE_ZERO, false).unwrap();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    builder
        .set_serial_number(&serial.to_asn1_integer().unwrap())
        .unwrap();
    builder.set_subject_name(&name(subject)).unwrap();
    builder.set_pubkey(key).unwrap();
    builder
        .set_not_before(&Asn1Time::from_unix(not_before).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::from_unix(not_after).unwrap())
        .unwrap();
    builder
}

/// A self-signed root CA.
pub fn root_ca(common_name: &str) -> Identity {
    let key = key();
    let mut builder = builder(common_name, &key, now() - DAY, now() + 365 * DAY);
    builder.set_issuer_name(&name(common_name)).unwrap();
    builder
        .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
        .unwrap();
    builder
        .append_extension(
            KeyUsage::new()
                .critical()
                .key_cert_sign()
                .crl_sign()
                .build()
                .unwrap(),
        )
        .unwrap();
    let ski = SubjectKeyIdentifier::new()
        .build(&builder.x509v3_context(None, None))
        .unwrap();
    builder.append_extension(ski).unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();
    Identity {
        cert: builder.build(),
        key,
    }
}

/// A server certificate for `dns_name` issued by `issuer`.
pub fn server_cert(common_name: &str, dns_name: &str, issuer: &Identity, expired: bool) -> Identity {
    let key = key();
    let (not_before, not_after) = if expired {
        (now() - 30 * DAY, now() - DAY)
    } else {
        (now() - DAY, now() + 90 * DAY)
    };
    let mut builder = builder(common_name, &key, not_before, not_after);
    builder.set_issuer_name(issuer.cert.subject_name()).unwrap();
    builder
        .append_extension(BasicConstraints::new().build().unwrap())
        .unwrap();
    builder
        .append_extension(KeyUsage::new().digital_signature().build().unwrap())
        .unwrap();
    builder
        .append_extension(ExtendedKeyUsage::new().server_auth().build().unwrap())
        .unwrap();
    let san = SubjectAlternativeName::new()
        .dns(dns_name)
        .build(&builder.x509v3_context(Some(&issuer.cert), None))
        .unwrap();
    builder.append_extension(san).unwrap();
    let aki = AuthorityKeyIdentifier::new()
        .keyid(false)
        .build(&builder.x509v3_context(Some(&issuer.cert), None))
        .unwrap();
    builder.append_extension(aki).unwrap();
    builder.sign(&issuer.key, MessageDigest::sha256()).unwrap();
    Identity {
        cert: builder.build(),
        key,
    }
}

/// A self-signed server certificate for `dns_name`.
pub fn self_signed(common_name: &str, dns_name: &str) -> Identity {
    let key = key();
    let mut builder = builder(common_name, &key, now() - DAY, now() + 90 * DAY);
    builder.set_issuer_name(&name(common_name)).unwrap();
    let san = SubjectAlternativeName::new()
        .dns(dns_name)
        .build(&builder.x509v3_context(None, None))
        .unwrap();
    builder.append_extension(san).unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();
    Identity {
        cert: builder.build(),
        key,
    }
}

/// Serves TLS with `leaf` (followed by `chain`) on a local port until the test exits.
pub fn serve(leaf: &Identity, chain: &[&X509]) -> u16 {
    serve_on("127.0.0.1:0", leaf, chain).unwrap()
}

/// Like [`serve`] but on `address`. `None` when the address cannot be bound.
pub fn serve_on(address: &str, leaf: &Identity, chain: &[&X509]) -> Option<u16> {
    let mut acceptor = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls_server()).unwrap();
    acceptor.set_private_key(&leaf.key).unwrap();
    acceptor.set_certificate(&leaf.cert).unwrap();
    for cert in chain {
        acceptor.add_extra_chain_cert((*cert).clone()).unwrap();
    }
    let acceptor = acceptor.build();

    let listener = TcpListener::bind(address).ok()?;
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            if let Ok(mut tls) = acceptor.accept(stream) {
                let _ = tls.shutdown();
            }
        }
    });
    Some(port)
}

/// Accepts connections and answers them with plain text.
pub fn serve_plaintext() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        for mut stream in listener.incoming().flatten() {
            let _ = stream.write_all(b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\n\r\n");
        }
    });
    port
}

/// Accepts connections and never says anything.
pub fn serve_silent(hold_for: Duration) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        let mut held: Vec<TcpStream> = Vec::new();
        for stream in listener.incoming().flatten() {
            held.push(stream);
            thread::sleep(hold_for);
        }
    });
    port
}

/// A port nothing listens on.
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Writes a PKCS#12 trust store holding `anchors` as trusted certificate entries.
pub fn write_trust_store(dir: &TempDir, password: &str, anchors: &[(&str, &X509)]) -> PathBuf {
    let mut keystore = KeyStore::new();
    for (alias, cert) in anchors {
        let entry = p12_keystore::Certificate::from_der(&cert.to_der().unwrap()).unwrap();
        keystore.add_entry(alias, KeyStoreEntry::Certificate(entry));
    }
    let data = keystore.writer(password).write().unwrap();

    let path = dir.path().join("truststore.p12");
    std::fs::write(&path, data).unwrap();
    path
}
