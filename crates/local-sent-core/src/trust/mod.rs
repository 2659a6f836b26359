//! TLS trust core: certificate handling and fingerprint persistence.
//!
//! Trust in local-sent is anchored on the SHA-256 of the peer's certificate
//! DER, either pinned explicitly by the sender or recorded on first use in a
//! known-hosts file.

pub mod cert;
pub mod known_hosts;

pub use cert::{fingerprint_hex, generate_self_signed, load_certs, load_private_key};
pub use known_hosts::{HostStatus, KnownHosts};
