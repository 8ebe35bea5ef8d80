//! Dispatches requests to pooled sessions.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use tokio::task::JoinSet;

use crate::error::{Error, Result};
use crate::pool::{Handle, HandlePool, HandleSequence, MAX_CONNECTIONS};
use crate::protocol::{
    CopyParams, FetchMessageParams, FetchMessagesParams, HandleParams, Request, Response,
    SearchParams, SelectFolderParams, SendParams, SetFlagsParams, decode,
};
use crate::session::imap::{ImapConnect, ImapDialer, ImapSession};
use crate::session::smtp::{SmtpConnect, SmtpDialer, SmtpSession};
use crate::session::{ConnectionInfo, Credentials, with_deadline};

type ImapPool<I> = HandlePool<ImapSession<<I as ImapConnect>::Transport>>;
type SmtpPool<S> = HandlePool<SmtpSession<<S as SmtpConnect>::Transport>>;

/// Routes `(module, action)` pairs to IMAP and SMTP sessions.
///
/// Sessions live in two typed pools drawing from one handle sequence, so a
/// handle names exactly one session of exactly one kind.
pub struct Router<I: ImapConnect = ImapDialer, S: SmtpConnect = SmtpDialer> {
    imap_connector: I,
    smtp_connector: S,
    imap: ImapPool<I>,
    smtp: SmtpPool<S>,
    deadline: Option<Duration>,
}

impl Router {
    /// Creates a router that dials real servers.
    #[must_use]
    pub fn new(deadline: Option<Duration>) -> Self {
        Self::with_connectors(ImapDialer, SmtpDialer, deadline)
    }
}

impl<I: ImapConnect, S: SmtpConnect> Router<I, S> {
    /// Creates a router with custom connectors.
    #[must_use]
    pub fn with_connectors(imap_connector: I, smtp_connector: S, deadline: Option<Duration>) -> Self {
        Self::with_capacity(imap_connector, smtp_connector, deadline, MAX_CONNECTIONS)
    }

    /// Creates a router whose pools each hold at most `capacity` sessions.
    #[must_use]
    pub fn with_capacity(
        imap_connector: I,
        smtp_connector: S,
        deadline: Option<Duration>,
        capacity: usize,
    ) -> Self {
        let sequence = Arc::new(HandleSequence::new());
        Self {
            imap_connector,
            smtp_connector,
            imap: HandlePool::with_sequence(Arc::clone(&sequence), capacity),
            smtp: HandlePool::with_sequence(sequence, capacity),
            deadline,
        }
    }

    /// Resident session counts, IMAP then SMTP.
    pub async fn counts(&self) -> (usize, usize) {
        (self.imap.count().await, self.smtp.count().await)
    }

    /// Decodes one request line and handles it.
    pub async fn handle_line(&self, line: &[u8]) -> Response {
        match serde_json::from_slice::<Request>(line) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                let error = Error::InvalidRequest(e);
                tracing::debug!(%error, "rejecting malformed request");
                Response::failure(&error)
            }
        }
    }

    /// Handles one decoded request. Never fails: errors become failure
    /// envelopes.
    pub async fn handle(&self, request: Request) -> Response {
        let Request {
            module,
            action,
            params,
        } = request;
        let result = match module.as_str() {
            "imap" => self.dispatch_imap(&action, params).await,
            "smtp" => self.dispatch_smtp(&action, params).await,
            _ => Err(Error::UnknownModule(module.clone())),
        };
        match result {
            Ok(data) => Response::success(data),
            Err(error) => {
                tracing::debug!(%module, %action, %error, "action failed");
                Response::failure(&error)
            }
        }
    }

    async fn dispatch_imap(&self, action: &str, params: Value) -> Result<Value> {
        match action {
            "connect" => {
                let credentials: Credentials = decode("imap.connect", params)?;
                let handle = self.connect_imap(&credentials).await?;
                Ok(json!({ "handle": handle }))
            }
            "close" => {
                let p: HandleParams = decode("imap.close", params)?;
                let session = self.imap.get(p.handle).await?;
                self.imap.remove(p.handle).await;
                let result = session.close().await;
                tracing::info!(handle = %p.handle, "IMAP session closed");
                self.log_counts().await;
                result.map(|()| Value::Null)
            }
            "select_folder" => {
                let p: SelectFolderParams = decode("imap.select_folder", params)?;
                let session = self.imap.get(p.handle).await?;
                let result = session.select_folder(&p.folder, p.read_only).await;
                reap(&self.imap, p.handle, result).await?;
                Ok(Value::Null)
            }
            "search_uids" => {
                let p: SearchParams = decode("imap.search_uids", params)?;
                let session = self.imap.get(p.handle).await?;
                let result = session.search_uids(p.highest_uid).await;
                let uids = reap(&self.imap, p.handle, result).await?;
                Ok(json!({ "uids": uids }))
            }
            "fetch_messages" => {
                let p: FetchMessagesParams = decode("imap.fetch_messages", params)?;
                let session = self.imap.get(p.handle).await?;
                let result = session.fetch_messages(&p.uids).await;
                let messages = reap(&self.imap, p.handle, result).await?;
                Ok(json!({ "messages": messages }))
            }
            "fetch_message" => {
                let p: FetchMessageParams = decode("imap.fetch_message", params)?;
                let session = self.imap.get(p.handle).await?;
                let result = session.fetch_message(p.uid).await;
                let message = reap(&self.imap, p.handle, result).await?;
                Ok(json!({ "uid": p.uid, "message": message }))
            }
            "set_flags" => {
                let p: SetFlagsParams = decode("imap.set_flags", params)?;
                let session = self.imap.get(p.handle).await?;
                let result = session.set_flags(p.uid, &p.flags, p.add).await;
                reap(&self.imap, p.handle, result).await?;
                Ok(Value::Null)
            }
            "copy_message" => {
                let p: CopyParams = decode("imap.copy_message", params)?;
                let session = self.imap.get(p.handle).await?;
                let result = session.copy_message(p.uid, &p.dest_folder).await;
                reap(&self.imap, p.handle, result).await?;
                Ok(Value::Null)
            }
            "expunge" => {
                let p: HandleParams = decode("imap.expunge", params)?;
                let session = self.imap.get(p.handle).await?;
                let result = session.expunge().await;
                reap(&self.imap, p.handle, result).await?;
                Ok(Value::Null)
            }
            "noop" => {
                let p: HandleParams = decode("imap.noop", params)?;
                let session = self.imap.get(p.handle).await?;
                let result = session.noop().await;
                reap(&self.imap, p.handle, result).await?;
                Ok(Value::Null)
            }
            other => Err(Error::UnknownAction(other.to_string())),
        }
    }

    async fn dispatch_smtp(&self, action: &str, params: Value) -> Result<Value> {
        match action {
            "connect" => {
                let credentials: Credentials = decode("smtp.connect", params)?;
                let handle = self.connect_smtp(&credentials).await?;
                Ok(json!({ "handle": handle }))
            }
            "close" => {
                let p: HandleParams = decode("smtp.close", params)?;
                let session = self.smtp.get(p.handle).await?;
                self.smtp.remove(p.handle).await;
                let result = session.close().await;
                tracing::info!(handle = %p.handle, "SMTP session closed");
                self.log_counts().await;
                result.map(|()| Value::Null)
            }
            "send" => {
                let p: SendParams = decode("smtp.send", params)?;
                let message = STANDARD.decode(p.message_b64.as_bytes())?;
                let session = self.smtp.get(p.handle).await?;
                let result = session.send(&p.from, &p.to, &message).await;
                reap(&self.smtp, p.handle, result).await?;
                Ok(Value::Null)
            }
            "noop" => {
                let p: HandleParams = decode("smtp.noop", params)?;
                let session = self.smtp.get(p.handle).await?;
                let result = session.noop().await;
                reap(&self.smtp, p.handle, result).await?;
                Ok(Value::Null)
            }
            other => Err(Error::UnknownAction(other.to_string())),
        }
    }

    async fn connect_imap(&self, credentials: &Credentials) -> Result<Handle> {
        let transport = with_deadline(
            self.deadline,
            "failed to connect",
            self.imap_connector.connect(credentials),
        )
        .await?;
        let session = Arc::new(ImapSession::new(
            ConnectionInfo::from_credentials(credentials),
            transport,
            self.deadline,
        ));
        match self.imap.add(Arc::clone(&session)).await {
            Ok(handle) => {
                tracing::info!(%handle, host = %credentials.host, username = %credentials.username, "IMAP session connected");
                self.log_counts().await;
                Ok(handle)
            }
            Err(e) => {
                if let Err(close) = session.close().await {
                    tracing::warn!(error = %close, "LOGOUT of unregistered IMAP session failed");
                }
                Err(e)
            }
        }
    }

    async fn connect_smtp(&self, credentials: &Credentials) -> Result<Handle> {
        let transport = with_deadline(
            self.deadline,
            "failed to connect",
            self.smtp_connector.connect(credentials),
        )
        .await?;
        let session = Arc::new(SmtpSession::new(
            ConnectionInfo::from_credentials(credentials),
            transport,
            self.deadline,
        ));
        match self.smtp.add(Arc::clone(&session)).await {
            Ok(handle) => {
                tracing::info!(%handle, host = %credentials.host, username = %credentials.username, "SMTP session connected");
                self.log_counts().await;
                Ok(handle)
            }
            Err(e) => {
                if let Err(close) = session.close().await {
                    tracing::warn!(error = %close, "QUIT of unregistered SMTP session failed");
                }
                Err(e)
            }
        }
    }

    async fn log_counts(&self) {
        let (imap, smtp) = self.counts().await;
        tracing::debug!(imap, smtp, "pool size");
    }

    /// Removes every resident session and logs each one out, giving each at
    /// most `grace` to finish.
    pub async fn shutdown(&self, grace: Duration) {
        let imap = self.imap.drain().await;
        let smtp = self.smtp.drain().await;
        if imap.is_empty() && smtp.is_empty() {
            return;
        }
        tracing::info!(imap = imap.len(), smtp = smtp.len(), "closing resident sessions");

        let mut closing = JoinSet::new();
        for (handle, session) in imap {
            closing.spawn(async move {
                match tokio::time::timeout(grace, session.close()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(%handle, error = %e, "IMAP logout failed"),
                    Err(_) => tracing::warn!(%handle, "IMAP logout timed out"),
                }
            });
        }
        for (handle, session) in smtp {
            closing.spawn(async move {
                match tokio::time::timeout(grace, session.close()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(%handle, error = %e, "SMTP quit failed"),
                    Err(_) => tracing::warn!(%handle, "SMTP quit timed out"),
                }
            });
        }
        while closing.join_next().await.is_some() {}
    }
}

/// Drops `handle` from `pool` if `result` says its transport is gone.
async fn reap<C, R>(pool: &HandlePool<C>, handle: Handle, result: Result<R>) -> Result<R> {
    if let Err(e) = &result
        && e.is_connection_lost()
    {
        tracing::info!(%handle, error = %e, "dropping lost session");
        pool.remove(handle).await;
    }
    result
}
