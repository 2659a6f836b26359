//! TLS certificate and key handling utilities.
//!
//! Provides functions for loading certificates/keys from PEM files, computing
//! certificate fingerprints, and generating self-signed certificates.

use std::path::Path;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Load a certificate chain from a PEM file.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let pem = std::fs::read(path)?;
    let mut reader = std::io::BufReader::new(pem.as_slice());

    let mut certs = Vec::new();
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.map_err(|e| Error::config(format!(
            "failed to parse certificate {}: {e}",
            path.display()
        )))?;
        certs.push(cert);
    }

    if certs.is_empty() {
        return Err(Error::config(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

/// Load a private key from a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let pem = std::fs::read(path)?;
    let mut reader = std::io::BufReader::new(pem.as_slice());

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| Error::config(format!("failed to parse key {}: {e}", path.display())))?
        .ok_or_else(|| Error::config(format!("no private key found in {}", path.display())))
}

/// SHA-256 of certificate DER bytes as 64 lowercase hex characters.
pub fn fingerprint_hex(cert_der: &[u8]) -> String {
    hex::encode(Sha256::digest(cert_der))
}

/// Generate a self-signed certificate and return `(cert_pem, key_pem)`.
///
/// Intended for self-signed testing together with `insecure` or a pinning
/// mode on the sender side.
pub fn generate_self_signed(name: &str) -> Result<(Vec<u8>, Vec<u8>)> {
    let certified_key = rcgen::generate_simple_self_signed(vec![name.to_string()])
        .map_err(|e| Error::config(format!("failed to generate certificate: {e}")))?;

    let cert_pem = certified_key.cert.pem().into_bytes();
    let key_pem = certified_key.signing_key.serialize_pem().into_bytes();

    Ok((cert_pem, key_pem))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::is_sha256_hex;

    #[test]
    fn fingerprint_is_sha256_hex() {
        let fp = fingerprint_hex(b"test certificate data");
        assert!(is_sha256_hex(&fp));
    }

    #[test]
    fn generate_and_reload_self_signed() {
        let (cert_pem, key_pem) = generate_self_signed("local-sent-test").unwrap();

        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("cert.pem");
        let key_path = dir.path().join("key.pem");
        std::fs::write(&cert_path, &cert_pem).unwrap();
        std::fs::write(&key_path, &key_pem).unwrap();

        let certs = load_certs(&cert_path).unwrap();
        assert_eq!(certs.len(), 1);
        load_private_key(&key_path).unwrap();
    }

    #[test]
    fn load_certs_rejects_empty_pem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.pem");
        std::fs::write(&path, "").unwrap();
        assert!(load_certs(&path).is_err());
    }
}
