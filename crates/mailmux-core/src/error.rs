//! Error types for the core library.

use std::time::Duration;

use thiserror::Error;

use crate::pool::Handle;

/// Errors that can occur in core operations.
///
/// Every variant renders to the `error` string of a failed response, so the
/// `Display` text is part of the wire contract.
#[derive(Debug, Error)]
pub enum Error {
    /// The pool already holds its maximum number of connections.
    #[error("connection pool limit reached ({0})")]
    PoolExhausted(usize),

    /// The handle was never issued or has been removed.
    #[error("invalid connection handle: {0}")]
    HandleNotFound(Handle),

    /// The session behind the handle has been closed.
    #[error("client not connected")]
    NotConnected,

    /// IMAP operation failed at the named stage.
    #[error("{stage}: {source}")]
    Imap {
        /// What was being attempted.
        stage: String,
        /// Underlying protocol error.
        source: mailmux_imap::Error,
    },

    /// SMTP operation failed at the named stage.
    #[error("{stage}: {source}")]
    Smtp {
        /// What was being attempted.
        stage: String,
        /// Underlying protocol error.
        source: mailmux_smtp::Error,
    },

    /// Server round trip exceeded the configured deadline.
    #[error("{stage}: timed out after {after:?}")]
    Timeout {
        /// What was being attempted.
        stage: String,
        /// The deadline that expired.
        after: Duration,
    },

    /// Refused to send credentials in cleartext.
    #[error("authentication failed: refusing to authenticate over an unencrypted connection to {0}")]
    InsecureAuth(String),

    /// A single-message fetch returned no body.
    #[error("message {0} not found")]
    MessageNotFound(u32),

    /// UID 0 does not exist in IMAP.
    #[error("invalid UID {0}: UIDs start at 1")]
    InvalidUid(u32),

    /// `smtp.send` without recipients.
    #[error("at least one recipient is required")]
    NoRecipients,

    /// The request line is not a valid envelope.
    #[error("invalid request: {0}")]
    InvalidRequest(#[source] serde_json::Error),

    /// A request line ran past the configured limit without a newline.
    #[error("request exceeds {0} bytes")]
    RequestTooLarge(usize),

    /// The envelope is valid but its `params` do not fit the action.
    #[error("invalid params for {action}: {source}")]
    InvalidParams {
        /// `module.action` being decoded.
        action: String,
        /// Decoder error.
        source: serde_json::Error,
    },

    /// `message_b64` is not valid base64.
    #[error("invalid base64 message: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    /// `module` is neither `imap` nor `smtp`.
    #[error("unknown module: {0}")]
    UnknownModule(String),

    /// `action` is not defined for the module.
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Wraps an IMAP error with the stage that produced it.
    pub fn imap(stage: impl Into<String>, source: mailmux_imap::Error) -> Self {
        Self::Imap {
            stage: stage.into(),
            source,
        }
    }

    /// Wraps an SMTP error with the stage that produced it.
    pub fn smtp(stage: impl Into<String>, source: mailmux_smtp::Error) -> Self {
        Self::Smtp {
            stage: stage.into(),
            source,
        }
    }

    /// Returns true if the session that produced this error is unusable.
    #[must_use]
    pub const fn is_connection_lost(&self) -> bool {
        match self {
            Self::Imap { source, .. } => source.is_connection_lost(),
            Self::Smtp { source, .. } => source.is_connection_lost(),
            Self::Timeout { .. } => true,
            _ => false,
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_messages() {
        assert_eq!(
            Error::UnknownModule("pop3".into()).to_string(),
            "unknown module: pop3"
        );
        assert_eq!(
            Error::UnknownAction("frobnicate".into()).to_string(),
            "unknown action: frobnicate"
        );
        assert_eq!(Error::NotConnected.to_string(), "client not connected");
        assert_eq!(
            Error::PoolExhausted(10_000).to_string(),
            "connection pool limit reached (10000)"
        );
    }

    #[test]
    fn test_stage_prefix() {
        let err = Error::smtp(
            "RCPT TO failed for bob@example.com",
            mailmux_smtp::Error::smtp(550, "User unknown"),
        );
        assert_eq!(
            err.to_string(),
            "RCPT TO failed for bob@example.com: SMTP error 550: User unknown"
        );
        assert!(!err.is_connection_lost());
    }

    #[test]
    fn test_timeout_is_fatal() {
        let err = Error::Timeout {
            stage: "search failed".into(),
            after: Duration::from_secs(30),
        };
        assert!(err.is_connection_lost());
        assert_eq!(err.to_string(), "search failed: timed out after 30s");
    }
}
