//! Protocol and configuration constants for local-sent.

use std::time::Duration;

// =============================================================================
// Protocol Constants
// =============================================================================

/// Current wire protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Default TCP/TLS transfer port.
pub const DEFAULT_TRANSFER_PORT: u16 = 37373;

/// UDP discovery port.
pub const DISCOVERY_PORT: u16 = 37374;

/// mDNS service type for transfer receivers.
pub const SERVICE_TYPE: &str = "_localsent._tcp.local.";

/// Magic payload of a UDP discovery probe.
pub const DISCOVER_MAGIC: &str = "LOCAL_SENT_DISCOVER_V1";

/// Maximum size of a buffered control frame, including its newline.
pub const MAX_CONTROL_FRAME: usize = 65_536;

// =============================================================================
// Receiver Constants
// =============================================================================

/// Suffix of in-flight temp files.
pub const TEMP_SUFFIX: &str = ".local-sent.part";

/// Hex characters of the digest encoded into a temp file name.
pub const TEMP_DIGEST_TAG_LEN: usize = 16;

/// Highest `name(i).ext` index tried when the target name is taken.
pub const MAX_DUPLICATE_INDEX: u32 = 10_000;

/// Read/write chunk size for payload streaming.
pub const PAYLOAD_CHUNK_SIZE: usize = 64 * 1024;

// =============================================================================
// Pairing Constants
// =============================================================================

/// Digits in a pair code.
pub const PAIR_CODE_LEN: usize = 6;

/// Regeneration attempts when a fresh code collides with the current one.
pub const PAIR_CODE_REGEN_ATTEMPTS: usize = 5;

// =============================================================================
// Timing Constants
// =============================================================================

/// Default discovery timeout.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_millis(3000);

/// Minimum interval between progress lines.
pub const PROGRESS_MIN_INTERVAL: Duration = Duration::from_millis(80);

/// Minimum completed-fraction delta between progress lines.
pub const PROGRESS_MIN_DELTA: f64 = 0.0035;

/// Grace period between receiver stop and forced session teardown.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);
