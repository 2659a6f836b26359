//! Wire protocol for a single transfer connection.
//!
//! One connection carries exactly one file:
//!
//! ```text
//! C -> S: header\n        (JSON control record)
//! S -> C: ready\n         (ok=false terminates)
//! C -> S: raw payload bytes of length (file_size - offset)
//! C -> S: [half-close write]
//! S -> C: ack\n
//! ```
//!
//! Control records are newline-delimited JSON; everything after the sender's
//! header line is raw payload once `ready` has been exchanged.

pub mod codec;
mod message;

pub use codec::{encode_frame, read_control, write_control, FrameBuffer};
pub use message::{Ack, ControlFrame, Ready, TransferHeader};
