//! local-sent-client: sender engine and device discovery.
//!
//! Thin collaborators (CLI, desktop bridge) drive three entry points:
//! [`build_transfer_entries`] to expand a path into a batch,
//! [`discover_devices`] to find receivers on the LAN, and [`send_entries`] to
//! run the batch.

pub mod sender;
pub mod tls;

use std::time::Duration;

pub use local_sent_core::discovery::{DiscoverOptions, DiscoveredDevice};
pub use local_sent_core::entries::{build_transfer_entries, TransferEntry};
pub use local_sent_core::error::{Error, Result};
pub use sender::{send_entries, EntrySendResult, SendRequest, SendSummary};
pub use tls::TlsClientOptions;

/// Minimum accepted discovery timeout.
const MIN_DISCOVERY_TIMEOUT_MS: u64 = 100;

/// Discover receivers on the local network.
///
/// Runs mDNS browse and the UDP broadcast probe concurrently for
/// `timeout_ms` (clamped to at least 100 ms) and returns the merged,
/// normalized device list.
pub async fn discover_devices(
    timeout_ms: u64,
    options: &DiscoverOptions,
) -> Result<Vec<DiscoveredDevice>> {
    let timeout = Duration::from_millis(timeout_ms.max(MIN_DISCOVERY_TIMEOUT_MS));
    local_sent_core::discovery::discover_devices(timeout, options).await
}
