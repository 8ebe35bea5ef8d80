//! Pooled mail sessions.
//!
//! A [`Connection`] pairs immutable metadata with a transport guarded by its
//! own read/write lock. Inspection (`is_closed`) takes the read side; every
//! server round trip takes the write side, so two commands never interleave
//! on one transport while unrelated connections proceed in parallel.

pub mod imap;
pub mod smtp;

use std::fmt;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, RwLockWriteGuard};

use crate::error::{Error, Result};

/// Parameters of a `connect` action.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    /// Server host name; also the TLS server name.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Account name.
    pub username: String,
    /// Cleartext password.
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Who a connection talks to and since when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    /// Server host name.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Authenticated account.
    pub username: String,
    /// When authentication completed.
    pub connected_at: DateTime<Utc>,
}

impl ConnectionInfo {
    /// Captures the identity part of `credentials`, stamped with the current time.
    #[must_use]
    pub fn from_credentials(credentials: &Credentials) -> Self {
        Self {
            host: credentials.host.clone(),
            port: credentials.port,
            username: credentials.username.clone(),
            connected_at: Utc::now(),
        }
    }
}

/// Transport plus the closed flag, both behind the connection lock.
pub(crate) struct Guarded<T> {
    pub(crate) transport: T,
    closed: bool,
}

impl<T> Guarded<T> {
    /// Passes `result` through, marking the connection closed if the error
    /// means the transport is gone.
    pub(crate) fn settle<R>(&mut self, result: Result<R>) -> Result<R> {
        if let Err(e) = &result
            && e.is_connection_lost()
        {
            tracing::warn!(error = %e, "transport lost, marking connection closed");
            self.closed = true;
        }
        result
    }
}

/// One authenticated mail connection.
pub struct Connection<T> {
    info: ConnectionInfo,
    state: RwLock<Guarded<T>>,
    deadline: Option<Duration>,
}

impl<T> Connection<T> {
    /// Wraps an authenticated transport.
    pub fn new(info: ConnectionInfo, transport: T, deadline: Option<Duration>) -> Self {
        Self {
            info,
            state: RwLock::new(Guarded {
                transport,
                closed: false,
            }),
            deadline,
        }
    }

    /// Connection metadata.
    #[must_use]
    pub const fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    /// Returns true once the connection has been closed or lost.
    pub async fn is_closed(&self) -> bool {
        self.state.read().await.closed
    }

    /// Fails with [`Error::NotConnected`] if closed, without waiting for
    /// in-flight round trips to finish.
    pub(crate) async fn ensure_open(&self) -> Result<()> {
        if self.is_closed().await {
            return Err(Error::NotConnected);
        }
        Ok(())
    }

    /// Takes exclusive access for a server round trip.
    pub(crate) async fn exclusive(&self) -> Result<RwLockWriteGuard<'_, Guarded<T>>> {
        let guard = self.state.write().await;
        if guard.closed {
            return Err(Error::NotConnected);
        }
        Ok(guard)
    }

    /// Flips the closed flag and hands back the lock for the farewell
    /// command. Returns `None` if the connection was already closed.
    pub(crate) async fn begin_close(&self) -> Option<RwLockWriteGuard<'_, Guarded<T>>> {
        let mut guard = self.state.write().await;
        if guard.closed {
            return None;
        }
        guard.closed = true;
        Some(guard)
    }

    /// Applies the per-action deadline, if one is configured.
    pub(crate) async fn bounded<R>(
        &self,
        stage: &str,
        operation: impl Future<Output = Result<R>>,
    ) -> Result<R> {
        with_deadline(self.deadline, stage, operation).await
    }
}

/// Runs `operation`, failing with [`Error::Timeout`] if `deadline` expires first.
pub(crate) async fn with_deadline<R>(
    deadline: Option<Duration>,
    stage: &str,
    operation: impl Future<Output = Result<R>>,
) -> Result<R> {
    match deadline {
        None => operation.await,
        Some(after) => tokio::time::timeout(after, operation)
            .await
            .unwrap_or_else(|_| {
                Err(Error::Timeout {
                    stage: stage.to_string(),
                    after,
                })
            }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn info() -> ConnectionInfo {
        ConnectionInfo {
            host: "mail.example.com".into(),
            port: 993,
            username: "alice".into(),
            connected_at: Utc::now(),
        }
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds: Credentials = serde_json::from_str(
            r#"{"host":"h","port":993,"username":"u","password":"hunter2"}"#,
        )
        .unwrap();
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[tokio::test]
    async fn test_begin_close_runs_once() {
        let conn = Connection::new(info(), (), None);
        assert!(!conn.is_closed().await);
        assert!(conn.begin_close().await.is_some());
        assert!(conn.begin_close().await.is_none());
        assert!(conn.is_closed().await);
        assert!(matches!(conn.exclusive().await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_settle_closes_on_lost_transport() {
        let conn = Connection::new(info(), (), None);
        {
            let mut guard = conn.exclusive().await.unwrap();
            let refused: Result<()> = Err(Error::imap(
                "select failed",
                mailmux_imap::Error::No("no such mailbox".into()),
            ));
            assert!(guard.settle(refused).is_err());
        }
        assert!(!conn.is_closed().await);

        {
            let mut guard = conn.exclusive().await.unwrap();
            let lost: Result<()> = Err(Error::imap(
                "noop failed",
                mailmux_imap::Error::Bye("shutting down".into()),
            ));
            assert!(guard.settle(lost).is_err());
        }
        assert!(conn.is_closed().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let conn = Connection::new(info(), (), Some(Duration::from_secs(5)));
        let err = conn
            .bounded("noop failed", async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_no_deadline_passes_through() {
        let value = with_deadline(None, "x", async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }
}
