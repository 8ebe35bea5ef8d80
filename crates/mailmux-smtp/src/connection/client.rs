//! SMTP client.
//!
//! Unlike a one-shot sender this client stays usable across transactions:
//! every method borrows `&mut self`, and a rejected `MAIL FROM` or
//! `RCPT TO` can be followed by [`Client::reset`].

use std::collections::HashSet;
use std::io;

use base64::Engine;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use super::{ServerInfo, SmtpStream};
use crate::command::Command;
use crate::error::{Error, Result};
use crate::parser::{is_last_reply_line, parse_reply};
use crate::types::{Address, AuthMechanism, Extension, Reply, ReplyCode};

/// SMTP client over any async byte stream.
#[derive(Debug)]
pub struct Client<S> {
    reader: BufReader<S>,
    server_info: ServerInfo,
}

impl Client<SmtpStream> {
    /// Performs the TLS handshake after [`Client::request_starttls`] succeeded.
    ///
    /// Extensions are cleared; call [`Client::ehlo`] again afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the handshake fails. The connection is gone in
    /// that case.
    pub async fn upgrade_tls(self, hostname: &str) -> Result<Self> {
        let stream = self.reader.into_inner().upgrade_to_tls(hostname).await?;
        Ok(Self {
            reader: BufReader::new(stream),
            server_info: ServerInfo {
                hostname: self.server_info.hostname,
                extensions: HashSet::new(),
            },
        })
    }

    /// Returns true if the underlying stream is TLS-encrypted.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.reader.get_ref().is_tls()
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Creates a client from a stream and reads the server greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the greeting fails or the server refuses
    /// the session.
    pub async fn from_stream(stream: S) -> Result<Self> {
        let mut reader = BufReader::new(stream);
        let greeting = read_reply(&mut reader).await?;
        if greeting.code != ReplyCode::SERVICE_READY {
            return Err(greeting.into_error());
        }

        let hostname = greeting
            .message
            .first()
            .and_then(|msg| msg.split_whitespace().next())
            .unwrap_or("unknown")
            .to_string();
        tracing::debug!(server = %hostname, "SMTP server ready");

        Ok(Self {
            reader,
            server_info: ServerInfo {
                hostname,
                extensions: HashSet::new(),
            },
        })
    }

    /// Returns what the server advertised.
    #[must_use]
    pub const fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// Sends EHLO and records the advertised extensions.
    ///
    /// # Errors
    ///
    /// Returns an error if the EHLO command fails.
    pub async fn ehlo(&mut self, client_hostname: &str) -> Result<()> {
        let reply = self
            .send_command(&Command::Ehlo {
                hostname: client_hostname.to_string(),
            })
            .await?
            .into_result()?;

        // The first line is the server's greeting text, not an extension.
        self.server_info.extensions = reply
            .message
            .iter()
            .skip(1)
            .map(|line| Extension::parse(line))
            .collect();
        Ok(())
    }

    /// Sends `STARTTLS` and expects `220`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSupported`] if the server did not advertise it.
    pub async fn request_starttls(&mut self) -> Result<()> {
        if !self.server_info.supports_starttls() {
            return Err(Error::NotSupported("STARTTLS".into()));
        }
        let reply = self.send_command(&Command::StartTls).await?;
        if reply.code != ReplyCode::SERVICE_READY {
            return Err(reply.into_error());
        }
        Ok(())
    }

    /// Authenticates with `AUTH PLAIN` and an initial response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSupported`] if the server lists AUTH mechanisms
    /// without PLAIN, or [`Error::Smtp`] if the credentials are rejected.
    pub async fn auth_plain(&mut self, username: &str, password: &str) -> Result<()> {
        let mechanisms = self.server_info.auth_mechanisms();
        if !mechanisms.is_empty() && !mechanisms.contains(&AuthMechanism::Plain) {
            return Err(Error::NotSupported("AUTH PLAIN".into()));
        }

        let credentials = format!("\0{username}\0{password}");
        let encoded = base64::engine::general_purpose::STANDARD.encode(credentials.as_bytes());
        tracing::debug!(username, "SMTP AUTH PLAIN");

        let reply = self
            .send_command(&Command::Auth {
                mechanism: AuthMechanism::Plain,
                initial_response: encoded,
            })
            .await?;
        if reply.code != ReplyCode::AUTH_SUCCESS {
            return Err(reply.into_error());
        }
        Ok(())
    }

    /// Starts a mail transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the server rejects the sender.
    pub async fn mail_from(&mut self, from: &Address) -> Result<()> {
        self.send_command(&Command::MailFrom { from: from.clone() })
            .await?
            .into_result()?;
        Ok(())
    }

    /// Adds a recipient to the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the server rejects the recipient.
    pub async fn rcpt_to(&mut self, to: &Address) -> Result<()> {
        self.send_command(&Command::RcptTo { to: to.clone() })
            .await?
            .into_result()?;
        Ok(())
    }

    /// Sends `DATA` and expects `354`.
    ///
    /// # Errors
    ///
    /// Returns an error if the server does not accept message input.
    pub async fn data(&mut self) -> Result<()> {
        let reply = self.send_command(&Command::Data).await?;
        if reply.code != ReplyCode::START_DATA {
            return Err(reply.into_error());
        }
        Ok(())
    }

    /// Streams the message after [`Client::data`] and completes the transaction.
    ///
    /// Line endings are normalized to CRLF, lines starting with `.` are
    /// dot-stuffed, and the terminating `.` line is added.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails or the server rejects the message.
    pub async fn send_message(&mut self, message: &[u8]) -> Result<()> {
        self.write(&encode_message(message)).await?;
        read_reply(&mut self.reader).await?.into_result()?;
        Ok(())
    }

    /// Aborts the current transaction with `RSET`.
    ///
    /// # Errors
    ///
    /// Returns an error if the RSET command fails.
    pub async fn reset(&mut self) -> Result<()> {
        self.send_command(&Command::Rset).await?.into_result()?;
        Ok(())
    }

    /// Sends `NOOP`.
    ///
    /// # Errors
    ///
    /// Fails if the transport is gone or the server answers with an error.
    pub async fn noop(&mut self) -> Result<()> {
        self.send_command(&Command::Noop).await?.into_result()?;
        Ok(())
    }

    /// Sends `QUIT` and shuts down the write half.
    ///
    /// # Errors
    ///
    /// Returns an error if the QUIT command fails.
    pub async fn quit(&mut self) -> Result<()> {
        let reply = self.send_command(&Command::Quit).await?;
        if reply.code != ReplyCode::CLOSING && !reply.is_success() {
            return Err(reply.into_error());
        }
        if let Err(e) = self.reader.get_mut().shutdown().await {
            tracing::debug!(error = %e, "stream shutdown after QUIT failed");
        }
        Ok(())
    }

    async fn send_command(&mut self, cmd: &Command) -> Result<Reply> {
        self.write(&cmd.serialize()).await?;
        let reply = read_reply(&mut self.reader).await?;
        tracing::debug!(command = cmd.verb(), code = reply.code.as_u16(), "SMTP exchange");
        Ok(reply)
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.reader.get_mut();
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }
}

async fn read_reply<S>(reader: &mut BufReader<S>) -> Result<Reply>
where
    S: AsyncRead + Unpin,
{
    let mut lines = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed",
            )));
        }
        let line = line.trim_end_matches(['\r', '\n']).to_string();
        if line.is_empty() {
            continue;
        }

        let is_last = is_last_reply_line(&line);
        lines.push(line);
        if is_last {
            break;
        }
    }

    parse_reply(&lines)
}

/// Normalizes line endings, dot-stuffs, and appends the end-of-data marker.
fn encode_message(message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + message.len() / 64 + 5);
    let body = message.strip_suffix(b"\n").unwrap_or(message);
    if !message.is_empty() {
        for line in body.split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.first() == Some(&b'.') {
                out.push(b'.');
            }
            out.extend_from_slice(line);
            out.extend_from_slice(b"\r\n");
        }
    }
    out.extend_from_slice(b".\r\n");
    out
}
