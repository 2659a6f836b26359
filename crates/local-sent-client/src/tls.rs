//! Sender-side TLS configuration and peer trust.
//!
//! Chain validation modes, most to least strict: CA roots from `ca_path`,
//! bundled web roots, relaxed (pinning modes and `insecure`). When a pinning
//! mode is active the post-handshake fingerprint check is the trust anchor,
//! so the in-handshake verifier only checks handshake signatures.

use std::path::PathBuf;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::WebPkiSupportedAlgorithms;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tracing::info;

use local_sent_core::error::{Error, Result};
use local_sent_core::hash::is_sha256_hex;
use local_sent_core::trust::{fingerprint_hex, load_certs, KnownHosts};
use local_sent_core::trust::known_hosts::HostStatus;

/// TLS options for an outbound transfer batch.
#[derive(Debug, Clone, Default)]
pub struct TlsClientOptions {
    /// Use TLS instead of plain TCP.
    pub enabled: bool,
    /// PEM file whose certificates become the trust roots.
    pub ca_path: Option<PathBuf>,
    /// Skip chain validation entirely; for self-signed testing only.
    pub insecure: bool,
    /// Expected SHA-256 fingerprint of the server certificate.
    pub fingerprint: Option<String>,
    /// Record the fingerprint on first contact and require it afterwards.
    pub trust_on_first_use: bool,
    /// Known-hosts file; defaults to `<home>/.local-sent/known_hosts.json`.
    pub known_hosts_path: Option<PathBuf>,
}

impl TlsClientOptions {
    /// Check option consistency.
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            if self.ca_path.is_some()
                || self.insecure
                || self.fingerprint.is_some()
                || self.trust_on_first_use
                || self.known_hosts_path.is_some()
            {
                return Err(Error::config("TLS options given but TLS is not enabled"));
            }
            return Ok(());
        }
        if self.fingerprint.is_some() && self.trust_on_first_use {
            return Err(Error::config(
                "expected fingerprint and trust-on-first-use are mutually exclusive",
            ));
        }
        if let Some(fingerprint) = &self.fingerprint {
            if !is_sha256_hex(&fingerprint.to_lowercase()) {
                return Err(Error::config(
                    "expected fingerprint must be 64 hex characters",
                ));
            }
        }
        Ok(())
    }

    /// True when a pinning mode or `insecure` relaxes chain validation.
    fn relaxed(&self) -> bool {
        self.insecure || self.fingerprint.is_some() || self.trust_on_first_use
    }
}

/// Build the rustls client config for the selected trust mode.
pub(crate) fn build_client_config(options: &TlsClientOptions) -> Result<ClientConfig> {
    if options.relaxed() {
        let config = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(RelaxedVerifier::new()))
            .with_no_client_auth();
        return Ok(config);
    }

    let mut roots = RootCertStore::empty();
    match &options.ca_path {
        Some(ca_path) => {
            for cert in load_certs(ca_path)? {
                roots.add(cert).map_err(|e| {
                    Error::config(format!("invalid CA certificate in {}: {e}", ca_path.display()))
                })?;
            }
        }
        None => {
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }
    }

    Ok(ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth())
}

/// Check the observed server certificate against the configured trust mode.
///
/// Runs after the handshake and before any application byte is written.
pub(crate) fn verify_peer(
    options: &TlsClientOptions,
    host: &str,
    port: u16,
    peer_der: &[u8],
) -> Result<()> {
    let observed = fingerprint_hex(peer_der);

    if let Some(expected) = &options.fingerprint {
        if expected.to_lowercase() != observed {
            return Err(Error::auth("TLS fingerprint mismatch"));
        }
        return Ok(());
    }

    if options.trust_on_first_use {
        let path = options
            .known_hosts_path
            .clone()
            .unwrap_or_else(KnownHosts::default_path);
        let mut known_hosts = KnownHosts::load(&path)?;
        return match known_hosts.check(host, port, &observed) {
            HostStatus::Known => Ok(()),
            HostStatus::Changed { .. } => Err(Error::auth("TLS fingerprint changed")),
            HostStatus::Unknown => {
                known_hosts.record(host, port, &observed)?;
                info!(host, port, fingerprint = observed, "trusting server on first use");
                Ok(())
            }
        };
    }

    Ok(())
}

/// Resolve the TLS server name for a host.
pub(crate) fn server_name(host: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(host.to_string())
        .map_err(|_| Error::config(format!("invalid TLS server name: {host}")))
}

/// Verifier that accepts any certificate but still validates handshake
/// signatures against it.
#[derive(Debug)]
struct RelaxedVerifier {
    supported: WebPkiSupportedAlgorithms,
}

impl RelaxedVerifier {
    fn new() -> Self {
        Self {
            supported: rustls::crypto::aws_lc_rs::default_provider().signature_verification_algorithms,
        }
    }
}

impl ServerCertVerifier for RelaxedVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.supported)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.supported)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.supported.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_options_reject_stray_flags() {
        let options = TlsClientOptions {
            fingerprint: Some("0".repeat(64)),
            ..Default::default()
        };
        assert!(options.validate().is_err());
        assert!(TlsClientOptions::default().validate().is_ok());
    }

    #[test]
    fn pin_and_tofu_are_exclusive() {
        let options = TlsClientOptions {
            enabled: true,
            fingerprint: Some("0".repeat(64)),
            trust_on_first_use: true,
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn fingerprint_must_be_hex() {
        let options = TlsClientOptions {
            enabled: true,
            fingerprint: Some("zz".repeat(32)),
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn expected_pin_mismatch() {
        let options = TlsClientOptions {
            enabled: true,
            fingerprint: Some("0".repeat(64)),
            ..Default::default()
        };
        let err = verify_peer(&options, "10.0.0.1", 37373, b"certificate-der").unwrap_err();
        assert_eq!(err.to_string(), "TLS fingerprint mismatch");
    }

    #[test]
    fn expected_pin_match_is_case_insensitive() {
        let der = b"certificate-der";
        let options = TlsClientOptions {
            enabled: true,
            fingerprint: Some(fingerprint_hex(der).to_uppercase()),
            ..Default::default()
        };
        verify_peer(&options, "10.0.0.1", 37373, der).unwrap();
    }

    #[test]
    fn tofu_records_then_detects_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_hosts.json");
        let options = TlsClientOptions {
            enabled: true,
            trust_on_first_use: true,
            known_hosts_path: Some(path.clone()),
            ..Default::default()
        };

        verify_peer(&options, "10.0.0.1", 37373, b"cert-a").unwrap();
        // Same cert again: still fine.
        verify_peer(&options, "10.0.0.1", 37373, b"cert-a").unwrap();

        let err = verify_peer(&options, "10.0.0.1", 37373, b"cert-b").unwrap_err();
        assert_eq!(err.to_string(), "TLS fingerprint changed");

        let known_hosts = KnownHosts::load(&path).unwrap();
        assert_eq!(known_hosts.len(), 1);
        assert_eq!(
            known_hosts.get("10.0.0.1", 37373),
            Some(fingerprint_hex(b"cert-a").as_str())
        );
    }

    #[test]
    fn server_name_accepts_ip_literals() {
        server_name("127.0.0.1").unwrap();
        server_name("receiver.local").unwrap();
    }
}
