//! End-to-end TLS tests: fingerprint pinning and trust-on-first-use.

use std::path::{Path, PathBuf};

use local_sent_client::{build_transfer_entries, send_entries, SendRequest, TlsClientOptions};
use local_sent_core::progress::null_sink;
use local_sent_core::trust::{fingerprint_hex, generate_self_signed, load_certs, KnownHosts};
use local_sent_server::{start_receiver, ReceiverConfig, ReceiverHandle, TlsServerConfig};

/// Write a fresh self-signed certificate and return its paths and
/// fingerprint.
fn write_cert(dir: &Path, stem: &str) -> (PathBuf, PathBuf, String) {
    let (cert_pem, key_pem) = generate_self_signed("localhost").unwrap();
    let cert_path = dir.join(format!("{stem}-cert.pem"));
    let key_path = dir.join(format!("{stem}-key.pem"));
    std::fs::write(&cert_path, cert_pem).unwrap();
    std::fs::write(&key_path, key_pem).unwrap();

    let der = load_certs(&cert_path).unwrap().remove(0);
    let fingerprint = fingerprint_hex(der.as_ref());
    (cert_path, key_path, fingerprint)
}

async fn tls_receiver(output_dir: &Path, port: u16, cert: PathBuf, key: PathBuf) -> ReceiverHandle {
    start_receiver(ReceiverConfig {
        port,
        output_dir: output_dir.to_path_buf(),
        advertise: false,
        progress: Some(null_sink()),
        tls: Some(TlsServerConfig {
            cert_path: cert,
            key_path: key,
        }),
        ..Default::default()
    })
    .await
    .unwrap()
}

fn tls_request(entries: Vec<local_sent_core::entries::TransferEntry>, port: u16, tls: TlsClientOptions) -> SendRequest {
    SendRequest {
        entries,
        host: "127.0.0.1".into(),
        port,
        pair_code: None,
        tls,
        progress: Some(null_sink()),
    }
}

#[tokio::test]
async fn expected_pin_happy_path() {
    let temp = tempfile::tempdir().unwrap();
    let output_dir = temp.path().join("out");
    let (cert, key, fingerprint) = write_cert(temp.path(), "a");
    let receiver = tls_receiver(&output_dir, 0, cert, key).await;

    let source = temp.path().join("pinned.txt");
    std::fs::write(&source, b"over tls").unwrap();
    let entries = build_transfer_entries(&source).await.unwrap();

    let summary = send_entries(tls_request(
        entries,
        receiver.port(),
        TlsClientOptions {
            enabled: true,
            fingerprint: Some(fingerprint),
            ..Default::default()
        },
    ))
    .await
    .unwrap();

    assert!(summary.results[0].ack.ok);
    assert_eq!(std::fs::read(output_dir.join("pinned.txt")).unwrap(), b"over tls");

    receiver.stop().await;
}

#[tokio::test]
async fn expected_pin_mismatch_fails_before_any_byte() {
    let temp = tempfile::tempdir().unwrap();
    let output_dir = temp.path().join("out");
    let (cert, key, _) = write_cert(temp.path(), "a");
    let receiver = tls_receiver(&output_dir, 0, cert, key).await;

    let source = temp.path().join("pinned.txt");
    std::fs::write(&source, b"over tls").unwrap();
    let entries = build_transfer_entries(&source).await.unwrap();

    let err = send_entries(tls_request(
        entries,
        receiver.port(),
        TlsClientOptions {
            enabled: true,
            fingerprint: Some("0".repeat(64)),
            ..Default::default()
        },
    ))
    .await
    .unwrap_err();

    assert!(err.to_string().contains("TLS fingerprint mismatch"));
    assert!(!output_dir.join("pinned.txt").exists());

    receiver.stop().await;
}

#[tokio::test]
async fn insecure_mode_accepts_self_signed() {
    let temp = tempfile::tempdir().unwrap();
    let output_dir = temp.path().join("out");
    let (cert, key, _) = write_cert(temp.path(), "a");
    let receiver = tls_receiver(&output_dir, 0, cert, key).await;

    let source = temp.path().join("insecure.txt");
    std::fs::write(&source, b"trusted blindly").unwrap();
    let entries = build_transfer_entries(&source).await.unwrap();

    let summary = send_entries(tls_request(
        entries,
        receiver.port(),
        TlsClientOptions {
            enabled: true,
            insecure: true,
            ..Default::default()
        },
    ))
    .await
    .unwrap();
    assert!(summary.results[0].ack.ok);

    receiver.stop().await;
}

#[tokio::test]
async fn tofu_records_then_rejects_rotated_cert() {
    let temp = tempfile::tempdir().unwrap();
    let output_dir = temp.path().join("out");
    let known_hosts_path = temp.path().join("known_hosts.json");

    let (cert_a, key_a, fingerprint_a) = write_cert(temp.path(), "a");
    let receiver = tls_receiver(&output_dir, 0, cert_a, key_a).await;
    let port = receiver.port();

    let source = temp.path().join("tofu.txt");
    std::fs::write(&source, b"first contact").unwrap();

    let tofu_options = || TlsClientOptions {
        enabled: true,
        trust_on_first_use: true,
        known_hosts_path: Some(known_hosts_path.clone()),
        ..Default::default()
    };

    // First contact records cert A.
    let entries = build_transfer_entries(&source).await.unwrap();
    send_entries(tls_request(entries, port, tofu_options()))
        .await
        .unwrap();

    let known_hosts = KnownHosts::load(&known_hosts_path).unwrap();
    assert_eq!(known_hosts.len(), 1);
    assert_eq!(
        known_hosts.get("127.0.0.1", port),
        Some(fingerprint_a.as_str())
    );

    // Same cert again: accepted.
    let entries = build_transfer_entries(&source).await.unwrap();
    send_entries(tls_request(entries, port, tofu_options()))
        .await
        .unwrap();

    // Restart with cert B on the same port.
    receiver.stop().await;
    let (cert_b, key_b, _) = write_cert(temp.path(), "b");
    let receiver = tls_receiver(&output_dir, port, cert_b, key_b).await;

    let entries = build_transfer_entries(&source).await.unwrap();
    let err = send_entries(tls_request(entries, port, tofu_options()))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("TLS fingerprint changed"));

    // The stored entry is untouched.
    let known_hosts = KnownHosts::load(&known_hosts_path).unwrap();
    assert_eq!(
        known_hosts.get("127.0.0.1", port),
        Some(fingerprint_a.as_str())
    );

    receiver.stop().await;
}
