//! Error types for local-sent.

use thiserror::Error;

/// Main error type for transfer, pairing, trust, and discovery operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from underlying system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or oversized frame, wrong message type, unexpected payload.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Digest or size mismatch between header and received content.
    #[error("integrity error: {message}")]
    Integrity { message: String },

    /// Pair code mismatch or TLS fingerprint mismatch/change.
    #[error("{message}")]
    Auth { message: String },

    /// Path traversal, non-regular source, unresolvable target.
    #[error("path error: {message}")]
    Path { message: String },

    /// Invalid or conflicting configuration.
    #[error("config error: {message}")]
    Config { message: String },

    /// Discovery failed or produced no usable peer.
    #[error("discovery error: {message}")]
    Discovery { message: String },
}

impl Error {
    /// Shorthand for a protocol error with a formatted message.
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol {
            message: message.into(),
        }
    }

    /// Shorthand for an integrity error.
    pub fn integrity(message: impl Into<String>) -> Self {
        Error::Integrity {
            message: message.into(),
        }
    }

    /// Shorthand for an auth error.
    pub fn auth(message: impl Into<String>) -> Self {
        Error::Auth {
            message: message.into(),
        }
    }

    /// Shorthand for a path error.
    pub fn path(message: impl Into<String>) -> Self {
        Error::Path {
            message: message.into(),
        }
    }

    /// Shorthand for a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }

    /// Shorthand for a discovery error.
    pub fn discovery(message: impl Into<String>) -> Self {
        Error::Discovery {
            message: message.into(),
        }
    }

    /// Returns true if this error is a resumable interrupt.
    ///
    /// Resumable interrupts are mid-transfer connection failures where the
    /// partial temp file on the receiver is still valid, so retrying the same
    /// request will resume instead of restarting.
    pub fn is_resumable(&self) -> bool {
        match self {
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ),
            Error::Protocol { message } => {
                message.starts_with("connection closed before")
                    || message.contains("receiver rejected transfer")
            }
            _ => false,
        }
    }
}

/// Convenience result type for local-sent operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_protocol() {
        let err = Error::protocol("unexpected message type");
        assert_eq!(err.to_string(), "protocol error: unexpected message type");
    }

    #[test]
    fn auth_errors_display_bare_message() {
        // Auth messages are surfaced to peers verbatim, so no prefix.
        let err = Error::auth("TLS fingerprint mismatch");
        assert_eq!(err.to_string(), "TLS fingerprint mismatch");
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn resumable_interrupts() {
        assert!(Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset"
        ))
        .is_resumable());
        assert!(Error::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "pipe"
        ))
        .is_resumable());
        assert!(Error::protocol("connection closed before ack").is_resumable());

        // These should not be resumable
        assert!(!Error::auth("pair code mismatch").is_resumable());
        assert!(!Error::integrity("sha256 mismatch").is_resumable());
        assert!(!Error::protocol("oversized frame").is_resumable());
    }
}
