//! Per-connection receive session.
//!
//! A session owns its temp file handle and digest from accept to terminal
//! ack. Failures before `ready` answer with `ready{ok:false}`, failures after
//! with `ack{ok:false}`; either way the write side is closed after the frame.

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use tokio::fs::OpenOptions;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use local_sent_core::constants::PAYLOAD_CHUNK_SIZE;
use local_sent_core::error::{Error, Result};
use local_sent_core::pairing::Pairing;
use local_sent_core::progress::{ProgressReporter, ProgressSink};
use local_sent_core::protocol::{
    read_control, write_control, Ack, ControlFrame, FrameBuffer, Ready,
};

use crate::target::{plan_resume, promote, select_target};

/// Details handed to the receive-confirm hook.
#[derive(Debug, Clone)]
pub struct ConfirmRequest {
    /// Peer IP address.
    pub from: String,
    /// Relative path from the header.
    pub relative_path: String,
    /// Size from the header.
    pub file_size: u64,
}

/// Decision returned by the receive-confirm hook.
#[derive(Debug, Clone)]
pub struct ConfirmDecision {
    pub accept: bool,
    pub message: Option<String>,
}

impl From<bool> for ConfirmDecision {
    fn from(accept: bool) -> Self {
        Self {
            accept,
            message: None,
        }
    }
}

/// Future returned by a confirm hook.
pub type ConfirmFuture = Pin<Box<dyn Future<Output = ConfirmDecision> + Send>>;

/// Optional out-of-band approval gate, invoked between header validation and
/// `ready`. The session blocks until the decision returns.
pub type ConfirmTransfer = Arc<dyn Fn(ConfirmRequest) -> ConfirmFuture + Send + Sync>;

/// Shared pieces every session needs.
pub(crate) struct SessionContext {
    pub output_dir: PathBuf,
    pub pairing: Arc<Pairing>,
    pub confirm: Option<ConfirmTransfer>,
    pub sink: ProgressSink,
}

/// Run one inbound connection to completion.
pub(crate) async fn run_session<S>(mut stream: S, peer: SocketAddr, ctx: Arc<SessionContext>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Err(e) = handle_connection(&mut stream, peer, &ctx).await {
        warn!(%peer, error = %e, "receive session failed");
        (ctx.sink)(&format!("[receive] failed: {e}"));
    }
    let _ = stream.shutdown().await;
}

async fn handle_connection<S>(
    stream: &mut S,
    peer: SocketAddr,
    ctx: &SessionContext,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut frames = FrameBuffer::new();

    // Header validation; anything wrong answers in the ready slot.
    let header = match read_control(stream, &mut frames, "header")
        .await
        .and_then(ControlFrame::into_header)
        .and_then(|header| header.validate().map(|()| header))
    {
        Ok(header) => header,
        Err(e) => return Err(reject_before_ready(stream, e).await),
    };
    debug!(
        %peer,
        path = header.relative_path,
        file_size = header.file_size,
        "header received"
    );

    // In-flight slot is claimed before the admission check so a concurrent
    // TTL tick cannot rotate this session's code out from under it.
    let _guard = ctx.pairing.begin_transfer();
    if !ctx.pairing.admit(header.pair_code.as_deref()) {
        let e = Error::auth("pair code mismatch");
        return Err(reject_before_ready(stream, e).await);
    }

    let selection = match select_target(&ctx.output_dir, &header.relative_path, &header.sha256_hex)
        .await
    {
        Ok(selection) => selection,
        Err(e) => return Err(reject_before_ready(stream, e).await),
    };

    if let Some(confirm) = &ctx.confirm {
        let decision = confirm(ConfirmRequest {
            from: peer.ip().to_string(),
            relative_path: header.relative_path.clone(),
            file_size: header.file_size,
        })
        .await;
        if !decision.accept {
            let message = decision
                .message
                .unwrap_or_else(|| "transfer declined".to_string());
            return Err(reject_before_ready(stream, Error::auth(message)).await);
        }
    }

    let (offset, mut digest) =
        match plan_resume(&selection.temp_path, header.file_size, &header.sha256_hex).await {
            Ok(plan) => plan,
            Err(e) => return Err(reject_before_ready(stream, e).await),
        };

    let mut file = {
        let open_result = if offset > 0 {
            OpenOptions::new().append(true).open(&selection.temp_path).await
        } else {
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&selection.temp_path)
                .await
        };
        match open_result {
            Ok(file) => file,
            Err(e) => return Err(reject_before_ready(stream, e.into()).await),
        }
    };

    write_control(
        stream,
        &ControlFrame::Ready(Ready {
            ok: true,
            offset,
            message: None,
            saved_path: Some(selection.final_path.display().to_string()),
        }),
    )
    .await?;

    // Payload phase; from here failures answer in the ack slot.
    let mut received = offset;
    let mut reporter = ProgressReporter::new(
        Arc::clone(&ctx.sink),
        "recv",
        &header.relative_path,
        header.file_size,
        offset,
    );

    let receive_result = receive_payload(
        stream,
        frames,
        &mut file,
        &mut digest,
        &mut received,
        header.file_size,
        &mut reporter,
    )
    .await;

    if let Err(e) = receive_result {
        drop(file);
        return Err(reject_after_ready(stream, e).await);
    }

    // Everything on disk before the ack makes the promise.
    if let Err(e) = async {
        file.flush().await?;
        file.sync_all().await?;
        Ok::<(), std::io::Error>(())
    }
    .await
    {
        drop(file);
        return Err(reject_after_ready(stream, e.into()).await);
    }
    drop(file);
    reporter.finish();

    let digest_hex = digest.finalize_hex();
    if digest_hex != header.sha256_hex {
        let _ = tokio::fs::remove_file(&selection.temp_path).await;
        let e = Error::integrity(format!(
            "sha256 mismatch for {}",
            header.relative_path
        ));
        return Err(reject_after_ready(stream, e).await);
    }

    let final_path = match promote(&selection.temp_path, &selection.base, selection.index).await {
        Ok(path) => path,
        Err(e) => return Err(reject_after_ready(stream, e).await),
    };

    let next_pair_code = ctx
        .pairing
        .rotate_after_ack()
        .or_else(|| ctx.pairing.chain_code_for(header.pair_code.as_deref()));

    write_control(
        stream,
        &ControlFrame::Ack(Ack {
            ok: true,
            message: None,
            sha256_hex: Some(digest_hex),
            received_bytes: Some(received),
            saved_path: Some(final_path.display().to_string()),
            resumed_from: Some(offset),
            next_pair_code,
        }),
    )
    .await?;

    info!(%peer, path = %final_path.display(), resumed_from = offset, "file received");
    (ctx.sink)(&format!("[receive] saved {}", final_path.display()));
    Ok(())
}

/// Consume the payload: first whatever the frame buffer already holds, then
/// the socket until `file_size` bytes are on disk.
async fn receive_payload<S>(
    stream: &mut S,
    frames: FrameBuffer,
    file: &mut tokio::fs::File,
    digest: &mut local_sent_core::hash::StreamingDigest,
    received: &mut u64,
    file_size: u64,
    reporter: &mut ProgressReporter,
) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    let residual = frames.into_residual();
    if !residual.is_empty() {
        if *received + residual.len() as u64 > file_size {
            return Err(Error::protocol("unexpected payload after completion"));
        }
        digest.update(&residual);
        file.write_all(&residual).await?;
        *received += residual.len() as u64;
        reporter.update(*received);
    }

    let mut chunk = vec![0u8; PAYLOAD_CHUNK_SIZE];
    while *received < file_size {
        let want = ((file_size - *received) as usize).min(chunk.len());
        let n = stream.read(&mut chunk[..want]).await?;
        if n == 0 {
            return Err(Error::protocol("connection closed before payload complete"));
        }
        digest.update(&chunk[..n]);
        file.write_all(&chunk[..n]).await?;
        *received += n as u64;
        reporter.update(*received);
    }
    Ok(())
}

async fn reject_before_ready<S>(stream: &mut S, err: Error) -> Error
where
    S: AsyncWrite + Unpin,
{
    let _ = write_control(stream, &ControlFrame::Ready(Ready::reject(err.to_string()))).await;
    err
}

async fn reject_after_ready<S>(stream: &mut S, err: Error) -> Error
where
    S: AsyncWrite + Unpin,
{
    let _ = write_control(stream, &ControlFrame::Ack(Ack::reject(err.to_string()))).await;
    err
}
