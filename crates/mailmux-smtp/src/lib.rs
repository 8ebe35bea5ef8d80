//! # mailmux-smtp
//!
//! A small async SMTP submission client (RFC 5321).
//!
//! ## Features
//!
//! - **Reusable sessions**: `&mut self` methods, so one authenticated
//!   connection can carry many transactions
//! - **TLS support**: implicit TLS (port 465) and STARTTLS
//! - **Authentication**: `AUTH PLAIN` with an initial response
//! - **Message submission**: CRLF normalization and dot-stuffing
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailmux_smtp::{Address, Client};
//! use mailmux_smtp::connection::connect;
//!
//! #[tokio::main]
//! async fn main() -> mailmux_smtp::Result<()> {
//!     let stream = connect("smtp.example.com", 587).await?;
//!     let mut client = Client::from_stream(stream).await?;
//!     client.ehlo("localhost").await?;
//!
//!     client.request_starttls().await?;
//!     let mut client = client.upgrade_tls("smtp.example.com").await?;
//!     client.ehlo("localhost").await?;
//!
//!     client.auth_plain("user@example.com", "password").await?;
//!
//!     client.mail_from(&Address::new("sender@example.com")?).await?;
//!     client.rcpt_to(&Address::new("recipient@example.com")?).await?;
//!     client.data().await?;
//!     client.send_message(b"Subject: Test\r\n\r\nHello, World!\r\n").await?;
//!
//!     client.quit().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
pub mod error;
pub mod parser;
pub mod types;

pub use connection::{Client, ServerInfo, SmtpStream};
pub use error::{Error, Result};
pub use types::{Address, AuthMechanism, Extension, Reply, ReplyCode};
