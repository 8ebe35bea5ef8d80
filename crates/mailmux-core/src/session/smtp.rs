//! Pooled SMTP sessions.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use mailmux_smtp::{Address, Client, SmtpStream};
use tokio::io::{AsyncRead, AsyncWrite};

use super::{Connection, ConnectionInfo, Credentials};
use crate::error::{Error, Result};

/// Port on which SMTP is spoken over implicit TLS (submissions).
pub const IMPLICIT_TLS_PORT: u16 = 465;

/// Name announced in `EHLO`.
const EHLO_NAME: &str = "localhost";

/// Server round trips an [`SmtpSession`] needs from its transport.
#[async_trait]
pub trait SmtpTransport: Send + Sync {
    /// `MAIL FROM:<from>`.
    async fn mail_from(&mut self, from: &Address) -> mailmux_smtp::Result<()>;
    /// `RCPT TO:<to>`.
    async fn rcpt_to(&mut self, to: &Address) -> mailmux_smtp::Result<()>;
    /// `DATA`, up to the 354 go-ahead.
    async fn data(&mut self) -> mailmux_smtp::Result<()>;
    /// Message content plus the terminating dot.
    async fn send_message(&mut self, message: &[u8]) -> mailmux_smtp::Result<()>;
    /// `RSET`.
    async fn reset(&mut self) -> mailmux_smtp::Result<()>;
    /// `NOOP`.
    async fn noop(&mut self) -> mailmux_smtp::Result<()>;
    /// `QUIT`.
    async fn quit(&mut self) -> mailmux_smtp::Result<()>;
}

#[async_trait]
impl<S> SmtpTransport for Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync,
{
    async fn mail_from(&mut self, from: &Address) -> mailmux_smtp::Result<()> {
        Self::mail_from(self, from).await
    }

    async fn rcpt_to(&mut self, to: &Address) -> mailmux_smtp::Result<()> {
        Self::rcpt_to(self, to).await
    }

    async fn data(&mut self) -> mailmux_smtp::Result<()> {
        Self::data(self).await
    }

    async fn send_message(&mut self, message: &[u8]) -> mailmux_smtp::Result<()> {
        Self::send_message(self, message).await
    }

    async fn reset(&mut self) -> mailmux_smtp::Result<()> {
        Self::reset(self).await
    }

    async fn noop(&mut self) -> mailmux_smtp::Result<()> {
        Self::noop(self).await
    }

    async fn quit(&mut self) -> mailmux_smtp::Result<()> {
        Self::quit(self).await
    }
}

/// Dials and authenticates new SMTP transports.
#[async_trait]
pub trait SmtpConnect: Send + Sync + 'static {
    /// Transport produced by a successful connect.
    type Transport: SmtpTransport + 'static;

    /// Opens an authenticated transport.
    ///
    /// On failure the partial session has been sent `QUIT` where possible.
    async fn connect(&self, credentials: &Credentials) -> Result<Self::Transport>;
}

/// Connects over implicit TLS on port 465, otherwise in plaintext with a
/// STARTTLS upgrade when the server offers one, then authenticates with
/// `AUTH PLAIN`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmtpDialer;

#[async_trait]
impl SmtpConnect for SmtpDialer {
    type Transport = Client<SmtpStream>;

    async fn connect(&self, credentials: &Credentials) -> Result<Self::Transport> {
        const STAGE: &str = "failed to connect";
        let host = credentials.host.as_str();
        tracing::debug!(host, port = credentials.port, "dialing SMTP server");

        let client = if credentials.port == IMPLICIT_TLS_PORT {
            let stream = mailmux_smtp::connection::connect_tls(host, credentials.port)
                .await
                .map_err(|e| Error::smtp(STAGE, e))?;
            let client = Client::from_stream(stream)
                .await
                .map_err(|e| Error::smtp(STAGE, e))?;
            hello(client).await?
        } else {
            let stream = mailmux_smtp::connection::connect(host, credentials.port)
                .await
                .map_err(|e| Error::smtp(STAGE, e))?;
            let client = Client::from_stream(stream)
                .await
                .map_err(|e| Error::smtp(STAGE, e))?;
            let client = hello(client).await?;
            if client.server_info().supports_starttls() {
                upgrade(client, host).await?
            } else {
                client
            }
        };

        let encrypted = client.is_encrypted();
        authenticate(client, credentials, encrypted).await
    }
}

/// Sends `EHLO`, quitting on refusal.
async fn hello<S>(mut client: Client<S>) -> Result<Client<S>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    match client.ehlo(EHLO_NAME).await {
        Ok(()) => Ok(client),
        Err(e) => {
            quit_quietly(&mut client).await;
            Err(Error::smtp("EHLO failed", e))
        }
    }
}

async fn upgrade(mut client: Client<SmtpStream>, host: &str) -> Result<Client<SmtpStream>> {
    if let Err(e) = client.request_starttls().await {
        quit_quietly(&mut client).await;
        return Err(Error::smtp("STARTTLS failed", e));
    }
    let client = client
        .upgrade_tls(host)
        .await
        .map_err(|e| Error::smtp("TLS upgrade failed", e))?;
    tracing::debug!(host, "SMTP channel upgraded to TLS");
    hello(client).await
}

fn is_loopback(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1")
}

/// Authenticates, or quits and reports the failure.
///
/// Credentials are only sent in cleartext to a loopback host.
pub(crate) async fn authenticate<S>(
    mut client: Client<S>,
    credentials: &Credentials,
    encrypted: bool,
) -> Result<Client<S>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if !encrypted && !is_loopback(&credentials.host) {
        quit_quietly(&mut client).await;
        return Err(Error::InsecureAuth(credentials.host.clone()));
    }
    match client
        .auth_plain(&credentials.username, &credentials.password)
        .await
    {
        Ok(()) => Ok(client),
        Err(e) => {
            quit_quietly(&mut client).await;
            Err(Error::smtp("authentication failed", e))
        }
    }
}

async fn quit_quietly<S>(client: &mut Client<S>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if let Err(e) = client.quit().await {
        tracing::debug!(error = %e, "QUIT on abandoned SMTP session");
    }
}

async fn smtp_call<R>(
    stage: &str,
    operation: impl Future<Output = mailmux_smtp::Result<R>>,
) -> Result<R> {
    operation.await.map_err(|e| Error::smtp(stage, e))
}

/// Runs one mail transaction. On a rejection before the content is sent the
/// transaction is reset so the session stays usable.
async fn transaction<T: SmtpTransport>(
    transport: &mut T,
    from: &Address,
    to: &[Address],
    message: &[u8],
) -> Result<()> {
    if let Err(e) = transport.mail_from(from).await {
        return Err(abandon(transport, Error::smtp("MAIL FROM failed", e)).await);
    }
    for recipient in to {
        if let Err(e) = transport.rcpt_to(recipient).await {
            let stage = format!("RCPT TO failed for {recipient}");
            return Err(abandon(transport, Error::smtp(stage, e)).await);
        }
    }
    if let Err(e) = transport.data().await {
        return Err(abandon(transport, Error::smtp("DATA command failed", e)).await);
    }
    smtp_call("failed to send message data", transport.send_message(message)).await
}

async fn abandon<T: SmtpTransport>(transport: &mut T, error: Error) -> Error {
    if !error.is_connection_lost()
        && let Err(e) = transport.reset().await
    {
        tracing::warn!(error = %e, "RSET after rejected transaction failed");
    }
    error
}

/// One authenticated SMTP connection.
pub struct SmtpSession<T> {
    conn: Connection<T>,
}

impl<T: SmtpTransport> SmtpSession<T> {
    /// Wraps an authenticated transport.
    pub fn new(info: ConnectionInfo, transport: T, deadline: Option<Duration>) -> Self {
        Self {
            conn: Connection::new(info, transport, deadline),
        }
    }

    /// Connection metadata.
    #[must_use]
    pub const fn info(&self) -> &ConnectionInfo {
        self.conn.info()
    }

    /// Returns true once closed or lost.
    pub async fn is_closed(&self) -> bool {
        self.conn.is_closed().await
    }

    /// Sends one message. `message` is the raw RFC 5322 content.
    ///
    /// Every address is validated before anything is sent.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NoRecipients`] for an empty `to`, and otherwise
    /// with an error naming the phase (and recipient) that failed.
    pub async fn send(&self, from: &str, to: &[String], message: &[u8]) -> Result<()> {
        if to.is_empty() {
            return Err(Error::NoRecipients);
        }
        let sender = Address::new(from).map_err(|e| Error::smtp("MAIL FROM failed", e))?;
        let recipients = to
            .iter()
            .map(|r| {
                Address::new(r.as_str())
                    .map_err(|e| Error::smtp(format!("RCPT TO failed for {r}"), e))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut guard = self.conn.exclusive().await?;
        let result = self
            .conn
            .bounded(
                "send failed",
                transaction(&mut guard.transport, &sender, &recipients, message),
            )
            .await;
        guard.settle(result)?;
        tracing::debug!(recipients = recipients.len(), bytes = message.len(), "message sent");
        Ok(())
    }

    /// Keepalive.
    ///
    /// # Errors
    ///
    /// Fails if closed or if the link is gone.
    pub async fn noop(&self) -> Result<()> {
        const STAGE: &str = "noop failed";
        let mut guard = self.conn.exclusive().await?;
        let result = self
            .conn
            .bounded(STAGE, smtp_call(STAGE, guard.transport.noop()))
            .await;
        guard.settle(result)
    }

    /// Sends `QUIT`. Only the first call talks to the server.
    ///
    /// # Errors
    ///
    /// Returns the `QUIT` failure of the first call.
    pub async fn close(&self) -> Result<()> {
        const STAGE: &str = "quit failed";
        let Some(mut guard) = self.conn.begin_close().await else {
            return Ok(());
        };
        self.conn
            .bounded(STAGE, smtp_call(STAGE, guard.transport.quit()))
            .await
    }
}
