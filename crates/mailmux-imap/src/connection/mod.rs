//! Connection layer: transport, framing and the command client.

mod client;
mod framed;
mod stream;

pub use client::Client;
pub use framed::FramedStream;
pub use stream::{ImapStream, connect_tls, create_tls_connector};
