//! Control record definitions.

use serde::{Deserialize, Serialize};

use crate::constants::PROTOCOL_VERSION;
use crate::error::{Error, Result};
use crate::hash::is_sha256_hex;

/// First record on a connection, sent by the sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferHeader {
    /// Wire protocol version; must be 1.
    pub version: u32,
    /// POSIX-style relative path of the file at the receiver.
    pub relative_path: String,
    /// Total size of the file in bytes.
    pub file_size: u64,
    /// Lowercase hex SHA-256 of the complete file.
    pub sha256_hex: String,
    /// Shared secret for receiver admission, when the receiver requires one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pair_code: Option<String>,
}

impl TransferHeader {
    /// Validate the structural invariants of a decoded header.
    ///
    /// Path normalization and traversal rejection are handled separately by
    /// [`crate::paths::normalize_relative`].
    pub fn validate(&self) -> Result<()> {
        if self.version != PROTOCOL_VERSION {
            return Err(Error::protocol(format!(
                "unsupported protocol version {}",
                self.version
            )));
        }
        if self.relative_path.is_empty() {
            return Err(Error::protocol("header has empty relative_path"));
        }
        if !is_sha256_hex(&self.sha256_hex) {
            return Err(Error::protocol("header sha256_hex is not a sha-256 digest"));
        }
        Ok(())
    }
}

/// Receiver's response to a header.
///
/// `ok=false` terminates the connection; `ok=true` carries the resume offset
/// the sender must start streaming from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ready {
    pub ok: bool,
    /// Byte offset the payload stream starts at; `0 <= offset <= file_size`.
    #[serde(default)]
    pub offset: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Path the receiver will write to, for display purposes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_path: Option<String>,
}

impl Ready {
    /// A rejection with a message; terminates the session.
    pub fn reject(message: impl Into<String>) -> Self {
        Ready {
            ok: false,
            offset: 0,
            message: Some(message.into()),
            saved_path: None,
        }
    }
}

/// Final record of a session, sent by the receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Digest the receiver computed over the complete file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256_hex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_path: Option<String>,
    /// Offset the transfer resumed from; 0 for a fresh transfer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumed_from: Option<u64>,
    /// Pair code the sender must use for its next entry, when the receiver
    /// rotates per transfer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_pair_code: Option<String>,
}

impl Ack {
    /// A failure ack with a message.
    pub fn reject(message: impl Into<String>) -> Self {
        Ack {
            ok: false,
            message: Some(message.into()),
            sha256_hex: None,
            received_bytes: None,
            saved_path: None,
            resumed_from: None,
            next_pair_code: None,
        }
    }
}

/// Any control record, tagged by its `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlFrame {
    Header(TransferHeader),
    Ready(Ready),
    Ack(Ack),
}

impl ControlFrame {
    /// Expect a header, failing with a protocol error otherwise.
    pub fn into_header(self) -> Result<TransferHeader> {
        match self {
            ControlFrame::Header(h) => Ok(h),
            other => Err(Error::protocol(format!(
                "expected header, got {}",
                other.label()
            ))),
        }
    }

    /// Expect a ready, failing with a protocol error otherwise.
    pub fn into_ready(self) -> Result<Ready> {
        match self {
            ControlFrame::Ready(r) => Ok(r),
            other => Err(Error::protocol(format!(
                "expected ready, got {}",
                other.label()
            ))),
        }
    }

    /// Expect an ack, failing with a protocol error otherwise.
    pub fn into_ack(self) -> Result<Ack> {
        match self {
            ControlFrame::Ack(a) => Ok(a),
            other => Err(Error::protocol(format!(
                "expected ack, got {}",
                other.label()
            ))),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ControlFrame::Header(_) => "header",
            ControlFrame::Ready(_) => "ready",
            ControlFrame::Ack(_) => "ack",
        }
    }
}
