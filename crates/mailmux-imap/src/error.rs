//! Error types for the IMAP client.

use thiserror::Error;

/// Errors that can occur during IMAP operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or encryption error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid DNS name for TLS.
    #[error("invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// A server response could not be parsed.
    #[error("parse error at position {position}: {message}")]
    Parse {
        /// Byte position where the error occurred.
        position: usize,
        /// Description of what went wrong.
        message: String,
    },

    /// Server returned NO response.
    #[error("server returned NO: {0}")]
    No(String),

    /// Server returned BAD response.
    #[error("server returned BAD: {0}")]
    Bad(String),

    /// Server sent BYE (disconnecting).
    #[error("server sent BYE: {0}")]
    Bye(String),

    /// A command argument cannot be expressed on the wire.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid state for the requested operation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Protocol violation or unexpected data.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl Error {
    /// Returns true if the transport can no longer be used after this error.
    ///
    /// Command-level refusals (`NO`, `BAD`) and local state errors leave the
    /// connection usable; I/O, TLS and `BYE` do not. Framing violations are
    /// also fatal: the read position in the stream is lost.
    #[must_use]
    pub const fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Tls(_) | Self::Bye(_) | Self::Protocol(_) | Self::Parse { .. }
        )
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_lost_classification() {
        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "closed");
        assert!(Error::Io(eof).is_connection_lost());
        assert!(Error::Bye("shutting down".into()).is_connection_lost());
        assert!(!Error::No("mailbox does not exist".into()).is_connection_lost());
        assert!(!Error::Bad("unknown command".into()).is_connection_lost());
        assert!(!Error::InvalidState("no mailbox selected".into()).is_connection_lost());
    }
}
