//! # mailmux-imap
//!
//! A small async IMAP4rev1 client covering the UID command subset a
//! mail-sync sidecar needs.
//!
//! ## Features
//!
//! - **Long-lived client**: every method takes `&mut self`, so one
//!   connection survives `NO`/`BAD` completions and can be pooled
//! - **UID commands**: SEARCH, FETCH (`BODY.PEEK[]`), STORE, COPY, EXPUNGE
//! - **Literal-aware framing**: `{n}` literals in both directions
//! - **TLS via rustls**: implicit TLS with the webpki root store
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailmux_imap::{Client, Uid, UidSet};
//!
//! #[tokio::main]
//! async fn main() -> mailmux_imap::Result<()> {
//!     let mut client = Client::connect_tls("imap.example.com", 993).await?;
//!     client.login("user@example.com", "password").await?;
//!
//!     client.select("INBOX").await?;
//!     let uids = client.uid_search(&UidSet::from_uid(Uid::new(1).unwrap())).await?;
//!     let messages = client.uid_fetch(&UidSet::from_uids(uids)).await?;
//!     println!("fetched {}", messages.len());
//!
//!     client.logout().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`command`]: command encoding and tag generation
//! - [`connection`]: TLS transport, framing and the client
//! - [`parser`]: response parser
//! - [`types`]: UIDs, UID sets, flags and fetch results

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod parser;
pub mod types;

pub use command::{Command, TagGenerator};
pub use connection::{Client, FramedStream, ImapStream};
pub use error::{Error, Result};
pub use parser::{Response, ResponseCode, Status, Untagged};
pub use types::{FetchedMessage, Flag, MailboxStatus, StoreAction, Uid, UidRange, UidSet};
