//! Newline-delimited JSON codec for control records.
//!
//! The codec ensures:
//! - Records are framed by a single trailing `\n`
//! - A record, including its newline, never reaches [`MAX_CONTROL_FRAME`]
//!   bytes, on the decode side as well as the encode side; buffer growth
//!   without a newline is bounded by the same limit
//! - Bytes buffered past a `ready` are handed back verbatim as the payload
//!   prefix

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::constants::MAX_CONTROL_FRAME;
use crate::error::{Error, Result};
use crate::protocol::ControlFrame;

/// Incremental receive buffer for control records.
///
/// Feed inbound bytes with [`FrameBuffer::extend`]; once the session switches
/// to payload streaming, [`FrameBuffer::into_residual`] returns whatever was
/// buffered beyond the last control record.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
}

impl FrameBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append inbound bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Try to extract one complete control record from the buffer.
    ///
    /// Returns:
    /// - `Ok(Some(frame))` when a newline-terminated record was consumed
    /// - `Ok(None)` when more data is needed
    /// - `Err` when the record is malformed, or the record including its
    ///   newline reaches the bound, or the buffer filled to the bound without
    ///   a newline
    pub fn try_take_frame(&mut self) -> Result<Option<ControlFrame>> {
        let Some(pos) = self.buf.iter().position(|&b| b == b'\n') else {
            if self.buf.len() >= MAX_CONTROL_FRAME {
                return Err(Error::protocol(format!(
                    "control frame exceeds {MAX_CONTROL_FRAME} bytes"
                )));
            }
            return Ok(None);
        };

        // The bound counts the newline, mirroring encode_frame.
        if pos + 1 >= MAX_CONTROL_FRAME {
            return Err(Error::protocol(format!(
                "control frame exceeds {MAX_CONTROL_FRAME} bytes"
            )));
        }

        let line = self.buf.split_to(pos + 1);
        let text = std::str::from_utf8(&line[..pos])
            .map_err(|_| Error::protocol("control frame is not valid UTF-8"))?
            .trim();
        if text.is_empty() {
            return Err(Error::protocol("empty control frame"));
        }

        let frame = serde_json::from_str(text)
            .map_err(|e| Error::protocol(format!("malformed control frame: {e}")))?;
        Ok(Some(frame))
    }

    /// Number of buffered bytes not yet consumed.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Hand back the unconsumed bytes; used after `ready` when the remaining
    /// stream is raw payload.
    pub fn into_residual(mut self) -> Bytes {
        self.buf.split().freeze()
    }
}

/// Encode a control record as one newline-terminated JSON line.
///
/// The outbound side enforces the same bound as the inbound side so a peer
/// never receives a frame it must reject.
pub fn encode_frame(frame: &ControlFrame) -> Result<Vec<u8>> {
    let mut line = serde_json::to_vec(frame)
        .map_err(|e| Error::protocol(format!("failed to encode control frame: {e}")))?;
    line.push(b'\n');
    if line.len() >= MAX_CONTROL_FRAME {
        return Err(Error::protocol(format!(
            "control frame exceeds {MAX_CONTROL_FRAME} bytes"
        )));
    }
    Ok(line)
}

/// Read one control record, buffering through `buf`.
///
/// `label` names the record being awaited and appears in the error raised if
/// the peer half-closes first: `connection closed before <label>`.
pub async fn read_control<R>(reader: &mut R, buf: &mut FrameBuffer, label: &str) -> Result<ControlFrame>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(frame) = buf.try_take_frame()? {
            return Ok(frame);
        }
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(Error::protocol(format!("connection closed before {label}")));
        }
        buf.extend(&chunk[..n]);
    }
}

/// Write one control record and flush it.
pub async fn write_control<W>(writer: &mut W, frame: &ControlFrame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = encode_frame(frame)?;
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}
