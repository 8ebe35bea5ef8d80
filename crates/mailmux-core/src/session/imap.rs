//! Pooled IMAP sessions.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use mailmux_imap::{
    Client, FetchedMessage, Flag, ImapStream, MailboxStatus, StoreAction, Uid, UidSet,
};
use tokio::io::{AsyncRead, AsyncWrite};

use super::{Connection, ConnectionInfo, Credentials};
use crate::error::{Error, Result};

/// Server round trips an [`ImapSession`] needs from its transport.
#[async_trait]
pub trait ImapTransport: Send + Sync {
    /// `SELECT` a mailbox read-write.
    async fn select(&mut self, mailbox: &str) -> mailmux_imap::Result<MailboxStatus>;
    /// `EXAMINE` a mailbox read-only.
    async fn examine(&mut self, mailbox: &str) -> mailmux_imap::Result<MailboxStatus>;
    /// `UID SEARCH UID <set>`.
    async fn uid_search(&mut self, set: &UidSet) -> mailmux_imap::Result<Vec<Uid>>;
    /// `UID FETCH <set> (UID BODY.PEEK[])`.
    async fn uid_fetch(&mut self, set: &UidSet) -> mailmux_imap::Result<Vec<FetchedMessage>>;
    /// `UID STORE <set> +FLAGS/-FLAGS`.
    async fn uid_store(
        &mut self,
        set: &UidSet,
        action: StoreAction,
        flags: &[Flag],
    ) -> mailmux_imap::Result<()>;
    /// `UID COPY <set> <mailbox>`.
    async fn uid_copy(&mut self, set: &UidSet, mailbox: &str) -> mailmux_imap::Result<()>;
    /// `EXPUNGE`; returns expunged sequence numbers.
    async fn expunge(&mut self) -> mailmux_imap::Result<Vec<u32>>;
    /// `NOOP`.
    async fn noop(&mut self) -> mailmux_imap::Result<()>;
    /// `LOGOUT`.
    async fn logout(&mut self) -> mailmux_imap::Result<()>;
}

#[async_trait]
impl<S> ImapTransport for Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync,
{
    async fn select(&mut self, mailbox: &str) -> mailmux_imap::Result<MailboxStatus> {
        Self::select(self, mailbox).await
    }

    async fn examine(&mut self, mailbox: &str) -> mailmux_imap::Result<MailboxStatus> {
        Self::examine(self, mailbox).await
    }

    async fn uid_search(&mut self, set: &UidSet) -> mailmux_imap::Result<Vec<Uid>> {
        Self::uid_search(self, set).await
    }

    async fn uid_fetch(&mut self, set: &UidSet) -> mailmux_imap::Result<Vec<FetchedMessage>> {
        Self::uid_fetch(self, set).await
    }

    async fn uid_store(
        &mut self,
        set: &UidSet,
        action: StoreAction,
        flags: &[Flag],
    ) -> mailmux_imap::Result<()> {
        Self::uid_store(self, set, action, flags).await
    }

    async fn uid_copy(&mut self, set: &UidSet, mailbox: &str) -> mailmux_imap::Result<()> {
        Self::uid_copy(self, set, mailbox).await
    }

    async fn expunge(&mut self) -> mailmux_imap::Result<Vec<u32>> {
        Self::expunge(self).await
    }

    async fn noop(&mut self) -> mailmux_imap::Result<()> {
        Self::noop(self).await
    }

    async fn logout(&mut self) -> mailmux_imap::Result<()> {
        Self::logout(self).await
    }
}

/// Dials and authenticates new IMAP transports.
#[async_trait]
pub trait ImapConnect: Send + Sync + 'static {
    /// Transport produced by a successful connect.
    type Transport: ImapTransport + 'static;

    /// Opens an authenticated transport.
    ///
    /// On failure nothing is left open.
    async fn connect(&self, credentials: &Credentials) -> Result<Self::Transport>;
}

/// Connects over implicit TLS and logs in with `LOGIN`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImapDialer;

#[async_trait]
impl ImapConnect for ImapDialer {
    type Transport = Client<ImapStream>;

    async fn connect(&self, credentials: &Credentials) -> Result<Self::Transport> {
        tracing::debug!(host = %credentials.host, port = credentials.port, "dialing IMAP server");
        let client = Client::connect_tls(&credentials.host, credentials.port)
            .await
            .map_err(|e| Error::imap("failed to connect", e))?;
        login_or_logout(client, &credentials.username, &credentials.password).await
    }
}

/// Logs in, or logs the unauthenticated client out and reports the failure.
pub(crate) async fn login_or_logout<S>(
    mut client: Client<S>,
    username: &str,
    password: &str,
) -> Result<Client<S>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    match client.login(username, password).await {
        Ok(()) => Ok(client),
        Err(e) => {
            if let Err(logout) = client.logout().await {
                tracing::debug!(error = %logout, "LOGOUT after failed login");
            }
            Err(Error::imap("login failed", e))
        }
    }
}

async fn imap_call<R>(
    stage: &str,
    operation: impl Future<Output = mailmux_imap::Result<R>>,
) -> Result<R> {
    operation.await.map_err(|e| Error::imap(stage, e))
}

fn to_uid(raw: u32) -> Result<Uid> {
    Uid::new(raw).ok_or(Error::InvalidUid(raw))
}

/// One authenticated IMAP connection.
pub struct ImapSession<T> {
    conn: Connection<T>,
}

impl<T: ImapTransport> ImapSession<T> {
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

    /// Opens `folder` read-write (`SELECT`) or read-only (`EXAMINE`).
    ///
    /// # Errors
    ///
    /// Fails if closed or if the server refuses the mailbox.
    pub async fn select_folder(&self, folder: &str, read_only: bool) -> Result<()> {
        const STAGE: &str = "select failed";
        let mut guard = self.conn.exclusive().await?;
        let transport = &mut guard.transport;
        let result = self
            .conn
            .bounded(STAGE, async move {
                if read_only {
                    imap_call(STAGE, transport.examine(folder)).await
                } else {
                    imap_call(STAGE, transport.select(folder)).await
                }
            })
            .await;
        let status = guard.settle(result)?;
        tracing::debug!(folder, exists = status.exists, read_only = status.read_only, "mailbox opened");
        Ok(())
    }

    /// Returns UIDs strictly greater than `highest_uid` in the selected
    /// mailbox, in server order. A watermark of zero returns every UID.
    ///
    /// # Errors
    ///
    /// Fails if closed, if no mailbox is selected, or if the search fails.
    pub async fn search_uids(&self, highest_uid: u32) -> Result<Vec<u32>> {
        const STAGE: &str = "search failed";
        let Some(start) = highest_uid.checked_add(1).and_then(Uid::new) else {
            self.conn.ensure_open().await?;
            return Ok(Vec::new());
        };
        let set = UidSet::from_uid(start);

        let mut guard = self.conn.exclusive().await?;
        let result = self
            .conn
            .bounded(STAGE, imap_call(STAGE, guard.transport.uid_search(&set)))
            .await;
        let found = guard.settle(result)?;

        // `n:*` always matches the highest UID, even when it is below n.
        Ok(found
            .into_iter()
            .map(Uid::get)
            .filter(|&uid| uid > highest_uid)
            .collect())
    }

    /// Fetches full messages, base64-encoded, keyed by UID.
    ///
    /// UIDs the server does not return are left out of the map. An empty
    /// request returns an empty map without a round trip.
    ///
    /// # Errors
    ///
    /// Fails if closed, if any UID is zero, or if the fetch command fails.
    pub async fn fetch_messages(&self, uids: &[u32]) -> Result<BTreeMap<u32, String>> {
        const STAGE: &str = "fetch failed";
        if uids.is_empty() {
            self.conn.ensure_open().await?;
            return Ok(BTreeMap::new());
        }
        let requested = uids
            .iter()
            .map(|&raw| to_uid(raw))
            .collect::<Result<Vec<_>>>()?;
        let set = UidSet::from_uids(requested);

        let mut guard = self.conn.exclusive().await?;
        let result = self
            .conn
            .bounded(STAGE, imap_call(STAGE, guard.transport.uid_fetch(&set)))
            .await;
        let fetched = guard.settle(result)?;
        drop(guard);

        let wanted: HashSet<u32> = uids.iter().copied().collect();
        let messages: BTreeMap<u32, String> = fetched
            .into_iter()
            .filter_map(|message| {
                let uid = message.uid?.get();
                let body = message.body?;
                wanted.contains(&uid).then(|| (uid, STANDARD.encode(body)))
            })
            .collect();
        if messages.len() < wanted.len() {
            tracing::debug!(
                requested = wanted.len(),
                returned = messages.len(),
                "server omitted some messages"
            );
        }
        Ok(messages)
    }

    /// Fetches one message, base64-encoded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageNotFound`] if the server returns no body.
    pub async fn fetch_message(&self, uid: u32) -> Result<String> {
        self.fetch_messages(&[uid])
            .await?
            .remove(&uid)
            .ok_or(Error::MessageNotFound(uid))
    }

    /// Adds (`add = true`) or removes flags on one message.
    ///
    /// # Errors
    ///
    /// Fails if closed, if `uid` is zero, or if the store is refused.
    pub async fn set_flags(&self, uid: u32, flags: &[String], add: bool) -> Result<()> {
        const STAGE: &str = "store failed";
        let set = UidSet::single(to_uid(uid)?);
        let flags: Vec<Flag> = flags.iter().map(|f| Flag::parse(f)).collect();
        let action = if add {
            StoreAction::Add
        } else {
            StoreAction::Remove
        };

        let mut guard = self.conn.exclusive().await?;
        let result = self
            .conn
            .bounded(
                STAGE,
                imap_call(STAGE, guard.transport.uid_store(&set, action, &flags)),
            )
            .await;
        guard.settle(result)
    }

    /// Copies one message to `dest_folder`.
    ///
    /// # Errors
    ///
    /// Fails if closed, if `uid` is zero, or if the copy is refused.
    pub async fn copy_message(&self, uid: u32, dest_folder: &str) -> Result<()> {
        const STAGE: &str = "copy failed";
        let set = UidSet::single(to_uid(uid)?);

        let mut guard = self.conn.exclusive().await?;
        let result = self
            .conn
            .bounded(STAGE, imap_call(STAGE, guard.transport.uid_copy(&set, dest_folder)))
            .await;
        guard.settle(result)
    }

    /// Permanently removes messages flagged `\Deleted` in the selected mailbox.
    ///
    /// # Errors
    ///
    /// Fails if closed or if the expunge is refused.
    pub async fn expunge(&self) -> Result<()> {
        const STAGE: &str = "expunge failed";
        let mut guard = self.conn.exclusive().await?;
        let result = self
            .conn
            .bounded(STAGE, imap_call(STAGE, guard.transport.expunge()))
            .await;
        let removed = guard.settle(result)?;
        tracing::debug!(removed = removed.len(), "expunged");
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
            .bounded(STAGE, imap_call(STAGE, guard.transport.noop()))
            .await;
        guard.settle(result)
    }

    /// Logs out. Only the first call talks to the server; later calls
    /// return `Ok(())`. The session is closed afterwards either way.
    ///
    /// # Errors
    ///
    /// Returns the `LOGOUT` failure of the first call.
    pub async fn close(&self) -> Result<()> {
        const STAGE: &str = "logout failed";
        let Some(mut guard) = self.conn.begin_close().await else {
            return Ok(());
        };
        self.conn
            .bounded(STAGE, imap_call(STAGE, guard.transport.logout()))
            .await
    }
}
