//! # mailmux-core
//!
//! Core of the mailmux sidecar: pooled IMAP and SMTP sessions reachable
//! through a newline-delimited JSON protocol on a Unix socket.
//!
//! This crate provides:
//! - Handle pool with a hard resident-connection cap
//! - IMAP sessions (select, UID search, fetch, flags, copy, expunge)
//! - SMTP sessions (implicit TLS or STARTTLS, send)
//! - Request router and response envelope
//! - Unix socket server and configuration

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod config;
mod error;
pub mod pool;
pub mod protocol;
pub mod router;
pub mod server;
pub mod session;

pub use config::{Config, DEFAULT_MAX_REQUEST_BYTES, DEFAULT_SOCKET_PATH};
pub use error::{Error, Result};
pub use pool::{Handle, HandlePool, HandleSequence, MAX_CONNECTIONS};
pub use protocol::{Request, Response};
pub use router::Router;
pub use server::Server;
pub use session::imap::{ImapConnect, ImapDialer, ImapSession, ImapTransport};
pub use session::smtp::{SmtpConnect, SmtpDialer, SmtpSession, SmtpTransport};
pub use session::{ConnectionInfo, Credentials};
