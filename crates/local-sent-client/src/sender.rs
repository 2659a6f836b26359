//! Sender engine.
//!
//! Processes a batch of transfer entries sequentially over one connection per
//! entry. Each entry is digested in full before the connection opens, so the
//! receiver can verify integrity and resume against a stable digest.

use std::io::SeekFrom;
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

use local_sent_core::constants::{PAYLOAD_CHUNK_SIZE, PROTOCOL_VERSION};
use local_sent_core::entries::TransferEntry;
use local_sent_core::error::{Error, Result};
use local_sent_core::hash::digest_file;
use local_sent_core::progress::{stdout_sink, ProgressReporter, ProgressSink};
use local_sent_core::protocol::{
    read_control, write_control, Ack, ControlFrame, FrameBuffer, TransferHeader,
};

use crate::tls::{build_client_config, server_name, verify_peer, TlsClientOptions};

/// A batch send request.
#[derive(Clone)]
pub struct SendRequest {
    /// Entries to transfer, in order.
    pub entries: Vec<TransferEntry>,
    /// Receiver host (IPv4 dotted quad or name).
    pub host: String,
    /// Receiver transfer port.
    pub port: u16,
    /// Pair code for the first entry; later entries chain via
    /// `ack.next_pair_code`.
    pub pair_code: Option<String>,
    /// TLS options.
    pub tls: TlsClientOptions,
    /// Progress line sink; stdout when absent.
    pub progress: Option<ProgressSink>,
}

/// Outcome of one entry.
#[derive(Debug, Clone)]
pub struct EntrySendResult {
    pub relative_path: String,
    pub ack: Ack,
}

/// Outcome of a batch.
#[derive(Debug, Clone, Default)]
pub struct SendSummary {
    pub file_count: usize,
    pub total_bytes: u64,
    pub resumed_bytes: u64,
    pub results: Vec<EntrySendResult>,
}

trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// Send a batch of entries.
///
/// The batch aborts at the first failed entry. Errors for which
/// [`Error::is_resumable`] holds are mid-transfer interrupts; retrying the
/// same request resumes from the receiver's partial data.
pub async fn send_entries(request: SendRequest) -> Result<SendSummary> {
    request.tls.validate()?;
    if request.entries.is_empty() {
        return Err(Error::config("no entries to send"));
    }
    let sink = request.progress.clone().unwrap_or_else(stdout_sink);

    let mut summary = SendSummary::default();
    let mut pair_code = request.pair_code.clone();

    for entry in &request.entries {
        let ack = match send_one(&request, entry, pair_code.as_deref(), &sink).await {
            Ok(ack) => ack,
            Err(e) => {
                sink(&format!("[error] {e}"));
                return Err(e);
            }
        };

        summary.file_count += 1;
        summary.total_bytes += ack.received_bytes.unwrap_or(0);
        summary.resumed_bytes += ack.resumed_from.unwrap_or(0);
        if let Some(next) = &ack.next_pair_code {
            pair_code = Some(next.clone());
        }
        summary.results.push(EntrySendResult {
            relative_path: entry.relative_path.clone(),
            ack,
        });
    }

    sink(&format!(
        "[send] done: files={} bytes={} resumed={}",
        summary.file_count, summary.total_bytes, summary.resumed_bytes
    ));
    Ok(summary)
}

async fn send_one(
    request: &SendRequest,
    entry: &TransferEntry,
    pair_code: Option<&str>,
    sink: &ProgressSink,
) -> Result<Ack> {
    let meta = tokio::fs::metadata(&entry.source_path).await?;
    if !meta.is_file() {
        return Err(Error::path(format!(
            "{} is not a regular file",
            entry.source_path.display()
        )));
    }

    let (sha256_hex, file_size) = digest_file(&entry.source_path).await?;
    debug!(
        path = %entry.source_path.display(),
        file_size,
        digest = sha256_hex,
        "source digested"
    );

    let mut stream = connect(request).await?;

    let header = TransferHeader {
        version: PROTOCOL_VERSION,
        relative_path: entry.relative_path.clone(),
        file_size,
        sha256_hex: sha256_hex.clone(),
        pair_code: pair_code.map(str::to_string),
    };
    write_control(&mut stream, &ControlFrame::Header(header)).await?;

    let mut frames = FrameBuffer::new();
    let ready = read_control(&mut stream, &mut frames, "ready")
        .await?
        .into_ready()?;
    if !ready.ok {
        let message = ready.message.unwrap_or_else(|| "unspecified".into());
        return Err(Error::protocol(format!(
            "receiver rejected transfer: {message}"
        )));
    }
    if ready.offset > file_size {
        return Err(Error::protocol(format!(
            "invalid resume offset {} for {} bytes",
            ready.offset, file_size
        )));
    }

    let mut reporter = ProgressReporter::new(
        Arc::clone(sink),
        "send",
        &entry.relative_path,
        file_size,
        ready.offset,
    );

    if ready.offset < file_size {
        let mut file = File::open(&entry.source_path).await?;
        file.seek(SeekFrom::Start(ready.offset)).await?;

        let mut sent = ready.offset;
        let mut chunk = vec![0u8; PAYLOAD_CHUNK_SIZE];
        while sent < file_size {
            let want = ((file_size - sent) as usize).min(chunk.len());
            let n = file.read(&mut chunk[..want]).await?;
            if n == 0 {
                return Err(Error::integrity(format!(
                    "{} shrank during send",
                    entry.source_path.display()
                )));
            }
            stream.write_all(&chunk[..n]).await?;
            sent += n as u64;
            reporter.update(sent);
        }
        stream.flush().await?;
    }
    stream.shutdown().await?;
    reporter.finish();

    let ack = read_control(&mut stream, &mut frames, "ack")
        .await?
        .into_ack()?;
    if !ack.ok {
        let message = ack
            .message
            .clone()
            .unwrap_or_else(|| "unspecified".into());
        return Err(Error::protocol(format!(
            "receiver rejected transfer: {message}"
        )));
    }
    if ack.sha256_hex.as_deref() != Some(sha256_hex.as_str()) {
        return Err(Error::integrity("receiver digest does not match source"));
    }
    if ack.received_bytes != Some(file_size) {
        return Err(Error::integrity("receiver size does not match source"));
    }

    info!(
        path = entry.relative_path,
        resumed_from = ack.resumed_from.unwrap_or(0),
        "transfer acknowledged"
    );
    Ok(ack)
}

/// Open the transport, running the TLS trust check before any byte is sent.
async fn connect(request: &SendRequest) -> Result<Box<dyn Transport>> {
    let tcp = TcpStream::connect((request.host.as_str(), request.port)).await?;
    tcp.set_nodelay(true)?;

    if !request.tls.enabled {
        return Ok(Box::new(tcp));
    }

    let config = build_client_config(&request.tls)?;
    let connector = TlsConnector::from(Arc::new(config));
    let tls_stream = connector.connect(server_name(&request.host)?, tcp).await?;

    let peer_der = {
        let (_, session) = tls_stream.get_ref();
        session
            .peer_certificates()
            .and_then(|certs| certs.first())
            .map(|cert| cert.as_ref().to_vec())
            .ok_or_else(|| Error::auth("server presented no certificate"))?
    };
    verify_peer(&request.tls, &request.host, request.port, &peer_der)?;

    Ok(Box::new(tls_stream))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_batch_is_a_config_error() {
        let request = SendRequest {
            entries: Vec::new(),
            host: "127.0.0.1".into(),
            port: 1,
            pair_code: None,
            tls: TlsClientOptions::default(),
            progress: Some(local_sent_core::progress::null_sink()),
        };
        assert!(matches!(
            send_entries(request).await.unwrap_err(),
            Error::Config { .. }
        ));
    }

    #[tokio::test]
    async fn refused_connection_is_io() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"alpha").unwrap();
        let entries = local_sent_core::entries::build_transfer_entries(&file)
            .await
            .unwrap();

        // Bind then drop to get a port with nothing listening.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let request = SendRequest {
            entries,
            host: "127.0.0.1".into(),
            port,
            pair_code: None,
            tls: TlsClientOptions::default(),
            progress: Some(local_sent_core::progress::null_sink()),
        };
        assert!(matches!(
            send_entries(request).await.unwrap_err(),
            Error::Io(_)
        ));
    }
}
