//! local-sent-core: shared machinery for the local-sent transfer service.
//!
//! This crate provides:
//! - Wire protocol records and the newline-JSON framing codec
//! - Path normalization and collision-free target naming
//! - Streaming SHA-256 digests
//! - Pair-code admission and rotation
//! - TLS trust primitives (certificates, fingerprints, known hosts)
//! - Dual-channel LAN discovery (mDNS + UDP broadcast)
//! - Transfer-entry expansion and progress reporting

pub mod constants;
pub mod discovery;
pub mod entries;
pub mod error;
pub mod hash;
pub mod logging;
pub mod pairing;
pub mod paths;
pub mod progress;
pub mod protocol;
pub mod trust;

pub use error::{Error, Result};
pub use logging::{init_logging, LogFormat};
