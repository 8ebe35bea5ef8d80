//! Unix socket front end.
//!
//! One task per accepted caller. Each task reads newline-delimited requests
//! and writes exactly one response line per request before reading the next.
//! A line longer than the configured limit is answered with an error and
//! discarded up to its newline.

use std::fs::Permissions;
use std::future::Future;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::UnixListener;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::protocol::Response;
use crate::router::Router;
use crate::session::imap::{ImapConnect, ImapDialer};
use crate::session::smtp::{SmtpConnect, SmtpDialer};

/// Listening sidecar.
pub struct Server<I: ImapConnect = ImapDialer, S: SmtpConnect = SmtpDialer> {
    listener: UnixListener,
    path: PathBuf,
    router: Arc<Router<I, S>>,
    grace: Duration,
    max_request: usize,
}

impl<I: ImapConnect, S: SmtpConnect> Server<I, S> {
    /// Replaces any stale socket file at the configured path and listens
    /// on a fresh one.
    ///
    /// # Errors
    ///
    /// Fails if the stale file cannot be removed or the socket cannot be
    /// bound.
    pub fn bind(config: &Config, router: Router<I, S>) -> Result<Self> {
        let path = config.socket_path.clone();
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::info!(path = %path.display(), "removed stale socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let listener = UnixListener::bind(&path)?;
        std::fs::set_permissions(&path, Permissions::from_mode(config.socket_mode))?;
        tracing::info!(path = %path.display(), "listening");

        Ok(Self {
            listener,
            path,
            router: Arc::new(router),
            grace: config.shutdown_grace_period(),
            max_request: config.max_request_bytes,
        })
    }

    /// Socket path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accepts callers until `shutdown` completes, then removes the socket
    /// file and logs out resident sessions.
    ///
    /// Caller tasks already running are left to finish on their own.
    ///
    /// # Errors
    ///
    /// Fails if the socket file cannot be removed.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let Self {
            listener,
            path,
            router,
            grace,
            max_request,
        } = self;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("shutdown requested, no longer accepting");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let router = Arc::clone(&router);
                        tokio::spawn(async move {
                            tracing::debug!("caller connected");
                            if let Err(e) = serve_connection(stream, &router, max_request).await {
                                tracing::debug!(error = %e, "caller connection ended with error");
                            }
                            tracing::debug!("caller disconnected");
                        });
                    }
                    Err(e) => tracing::error!(error = %e, "accept failed"),
                },
            }
        }

        drop(listener);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        router.shutdown(grace).await;
        tracing::info!("server stopped");
        Ok(())
    }
}

/// Serves one caller until it closes its end or a write fails.
pub(crate) async fn serve_connection<T, I, S>(
    stream: T,
    router: &Router<I, S>,
    max_request: usize,
) -> io::Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
    I: ImapConnect,
    S: SmtpConnect,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    let bound = u64::try_from(max_request).unwrap_or(u64::MAX).saturating_add(1);

    loop {
        line.clear();
        if (&mut reader).take(bound).read_until(b'\n', &mut line).await? == 0 {
            return Ok(());
        }

        let mut more = true;
        let response = if line.len() > max_request && line.last() != Some(&b'\n') {
            tracing::warn!(limit = max_request, "request line too long, discarding");
            more = skip_line(&mut reader).await?;
            Response::failure(&Error::RequestTooLarge(max_request))
        } else {
            let request = line.trim_ascii();
            if request.is_empty() {
                continue;
            }
            router.handle_line(request).await
        };

        let mut out = serde_json::to_vec(&response).map_err(io::Error::other)?;
        out.push(b'\n');
        writer.write_all(&out).await?;
        writer.flush().await?;
        if !more {
            return Ok(());
        }
    }
}

/// Consumes input through the next newline. Returns false at end of input.
async fn skip_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<bool> {
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(false);
        }
        if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            reader.consume(pos + 1);
            return Ok(true);
        }
        let len = buf.len();
        reader.consume(len);
    }
}
