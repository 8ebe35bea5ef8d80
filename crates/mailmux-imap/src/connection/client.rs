//! Long-lived IMAP client.
//!
//! All methods take `&mut self`. A `NO` or `BAD` completion leaves the
//! client usable; callers decide what to do with transport-level failures
//! via [`Error::is_connection_lost`].

use std::io;

use tokio::io::{AsyncRead, AsyncWrite};

use super::framed::FramedStream;
use super::stream::{ImapStream, connect_tls};
use crate::command::{Command, TagGenerator};
use crate::parser::{Response, ResponseCode, Status, Untagged, parse_response};
use crate::types::{FetchedMessage, Flag, MailboxStatus, StoreAction, Uid, UidSet};
use crate::{Error, Result};

/// Untagged data and the tagged response code of a completed command.
struct Completion {
    untagged: Vec<Untagged>,
    code: Option<ResponseCode>,
}

/// IMAP client over any async byte stream.
pub struct Client<S> {
    framed: FramedStream<S>,
    tags: TagGenerator,
    selected: Option<MailboxStatus>,
}

impl Client<ImapStream> {
    /// Dials `host:port` over implicit TLS and reads the greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP connection, TLS handshake or greeting fails.
    pub async fn connect_tls(host: &str, port: u16) -> Result<Self> {
        let stream = connect_tls(host, port).await?;
        Self::from_stream(stream).await
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wraps an established stream and consumes the server greeting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bye`] if the server refuses the connection, or a
    /// protocol error for anything other than `* OK` / `* PREAUTH`.
    pub async fn from_stream(stream: S) -> Result<Self> {
        let mut framed = FramedStream::new(stream);
        let greeting = framed.read_response().await?;

        match parse_response(&greeting)? {
            Response::Untagged(Untagged::Status {
                status: Status::Ok | Status::PreAuth,
                text,
                ..
            }) => {
                tracing::debug!(greeting = %text, "IMAP server ready");
            }
            Response::Untagged(Untagged::Status {
                status: Status::Bye,
                text,
                ..
            }) => return Err(Error::Bye(text)),
            other => {
                return Err(Error::Protocol(format!("unexpected greeting: {other:?}")));
            }
        }

        Ok(Self {
            framed,
            tags: TagGenerator::default(),
            selected: None,
        })
    }

    /// Authenticates with `LOGIN`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::No`] when the credentials are rejected.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<()> {
        tracing::debug!(username, "IMAP LOGIN");
        self.execute(&Command::Login {
            username: username.to_string(),
            password: password.to_string(),
        })
        .await?;
        Ok(())
    }

    /// Opens `mailbox` read-write.
    ///
    /// # Errors
    ///
    /// Returns [`Error::No`] if the mailbox does not exist. The previous
    /// selection is dropped either way.
    pub async fn select(&mut self, mailbox: &str) -> Result<MailboxStatus> {
        self.open(
            Command::Select {
                mailbox: mailbox.to_string(),
            },
            mailbox,
        )
        .await
    }

    /// Opens `mailbox` read-only.
    ///
    /// # Errors
    ///
    /// Same as [`Client::select`].
    pub async fn examine(&mut self, mailbox: &str) -> Result<MailboxStatus> {
        self.open(
            Command::Examine {
                mailbox: mailbox.to_string(),
            },
            mailbox,
        )
        .await
    }

    async fn open(&mut self, command: Command, mailbox: &str) -> Result<MailboxStatus> {
        self.selected = None;
        let read_only = matches!(command, Command::Examine { .. });
        let completion = self.execute(&command).await?;

        let mut status = MailboxStatus {
            name: mailbox.to_string(),
            read_only,
            ..MailboxStatus::default()
        };
        for data in completion.untagged {
            match data {
                Untagged::Exists(n) => status.exists = n,
                Untagged::Status {
                    code: Some(ResponseCode::UidValidity(n)),
                    ..
                } => status.uid_validity = Some(n),
                Untagged::Status {
                    code: Some(ResponseCode::UidNext(n)),
                    ..
                } => status.uid_next = Some(n),
                _ => {}
            }
        }
        match completion.code {
            Some(ResponseCode::ReadOnly) => status.read_only = true,
            Some(ResponseCode::ReadWrite) => status.read_only = false,
            _ => {}
        }

        tracing::debug!(
            mailbox,
            exists = status.exists,
            read_only = status.read_only,
            "mailbox opened"
        );
        self.selected = Some(status.clone());
        Ok(status)
    }

    /// Runs `UID SEARCH UID <set>` and returns the matching UIDs in server order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if no mailbox is selected.
    pub async fn uid_search(&mut self, set: &UidSet) -> Result<Vec<Uid>> {
        self.require_selected()?;
        let completion = self.execute(&Command::UidSearch { set: set.clone() }).await?;

        Ok(completion
            .untagged
            .into_iter()
            .filter_map(|data| match data {
                Untagged::Search(uids) => Some(uids),
                _ => None,
            })
            .flatten()
            .filter_map(Uid::new)
            .collect())
    }

    /// Runs `UID FETCH <set> (UID BODY.PEEK[])`.
    ///
    /// Every FETCH response received is returned, including unsolicited ones
    /// that carry no body. UIDs the server no longer has are simply absent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if no mailbox is selected.
    pub async fn uid_fetch(&mut self, set: &UidSet) -> Result<Vec<FetchedMessage>> {
        self.require_selected()?;
        let completion = self.execute(&Command::UidFetch { set: set.clone() }).await?;

        Ok(completion
            .untagged
            .into_iter()
            .filter_map(|data| match data {
                Untagged::Fetch(msg) => Some(msg),
                _ => None,
            })
            .collect())
    }

    /// Adds or removes flags on the messages in `set`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for flags that cannot be stored.
    pub async fn uid_store(
        &mut self,
        set: &UidSet,
        action: StoreAction,
        flags: &[Flag],
    ) -> Result<()> {
        self.require_selected()?;
        self.execute(&Command::UidStore {
            set: set.clone(),
            action,
            flags: flags.to_vec(),
        })
        .await?;
        Ok(())
    }

    /// Copies the messages in `set` to `mailbox`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::No`] if the destination does not exist.
    pub async fn uid_copy(&mut self, set: &UidSet, mailbox: &str) -> Result<()> {
        self.require_selected()?;
        self.execute(&Command::UidCopy {
            set: set.clone(),
            mailbox: mailbox.to_string(),
        })
        .await?;
        Ok(())
    }

    /// Permanently removes `\Deleted` messages and returns their sequence numbers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if no mailbox is selected.
    pub async fn expunge(&mut self) -> Result<Vec<u32>> {
        self.require_selected()?;
        let completion = self.execute(&Command::Expunge).await?;

        Ok(completion
            .untagged
            .into_iter()
            .filter_map(|data| match data {
                Untagged::Expunge(seq) => Some(seq),
                _ => None,
            })
            .collect())
    }

    /// Sends `NOOP`.
    ///
    /// # Errors
    ///
    /// Fails if the transport is gone.
    pub async fn noop(&mut self) -> Result<()> {
        self.execute(&Command::Noop).await?;
        Ok(())
    }

    /// Sends `LOGOUT` and shuts the stream down.
    ///
    /// A server that closes the connection right after its `* BYE` is
    /// treated as a successful logout.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be written.
    pub async fn logout(&mut self) -> Result<()> {
        self.selected = None;
        match self.execute(&Command::Logout).await {
            Ok(_) => {}
            Err(Error::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                tracing::debug!("server closed connection during LOGOUT");
            }
            Err(e) => return Err(e),
        }
        if let Err(e) = self.framed.shutdown().await {
            tracing::debug!(error = %e, "stream shutdown after LOGOUT failed");
        }
        Ok(())
    }

    fn require_selected(&self) -> Result<()> {
        if self.selected.is_none() {
            return Err(Error::InvalidState("no mailbox selected".into()));
        }
        Ok(())
    }

    /// Sends a command and collects responses up to its tagged completion.
    async fn execute(&mut self, command: &Command) -> Result<Completion> {
        let tag = self.tags.next_tag();
        let fragments = command.encode(&tag)?;
        tracing::debug!(tag = %tag, command = command.name(), "IMAP >>");

        let mut fragments = fragments.into_iter().peekable();
        while let Some(fragment) = fragments.next() {
            self.framed.write_command(&fragment).await?;
            if fragments.peek().is_some() {
                self.await_continuation(&tag).await?;
            }
        }

        let mut untagged = Vec::new();
        loop {
            let raw = self.framed.read_response().await?;
            match parse_response(&raw)? {
                Response::Tagged {
                    tag: got,
                    status,
                    code,
                    text,
                } if got == tag => {
                    tracing::debug!(tag = %tag, ?status, "IMAP <<");
                    return match status {
                        Status::Ok => Ok(Completion { untagged, code }),
                        Status::No => Err(Error::No(text)),
                        Status::Bad => Err(Error::Bad(text)),
                        Status::Bye | Status::PreAuth => Err(Error::Protocol(format!(
                            "invalid tagged status {status:?}"
                        ))),
                    };
                }
                Response::Tagged { tag: got, .. } => {
                    tracing::warn!(expected = %tag, got = %got, "ignoring stray tagged response");
                }
                Response::Untagged(Untagged::Status {
                    status: Status::Bye,
                    text,
                    ..
                }) if !matches!(command, Command::Logout) => {
                    return Err(Error::Bye(text));
                }
                Response::Untagged(data) => untagged.push(data),
                Response::Continuation(_) => {
                    return Err(Error::Protocol("unexpected continuation request".into()));
                }
            }
        }
    }

    /// Waits for the `+` that allows the next literal to be sent.
    async fn await_continuation(&mut self, tag: &str) -> Result<()> {
        loop {
            let raw = self.framed.read_response().await?;
            match parse_response(&raw)? {
                Response::Continuation(_) => return Ok(()),
                Response::Tagged {
                    tag: got,
                    status,
                    text,
                    ..
                } if got == tag => {
                    return Err(match status {
                        Status::No => Error::No(text),
                        Status::Bad => Error::Bad(text),
                        _ => Error::Protocol(format!("literal refused: {text}")),
                    });
                }
                Response::Untagged(Untagged::Status {
                    status: Status::Bye,
                    text,
                    ..
                }) => return Err(Error::Bye(text)),
                _ => {}
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio_test::io::{Builder, Mock};

    const GREETING: &[u8] = b"* OK IMAP4rev1 Service Ready\r\n";

    async fn client(mock: Mock) -> Client<Mock> {
        Client::from_stream(mock).await.unwrap()
    }

    fn uid(n: u32) -> Uid {
        Uid::new(n).unwrap()
    }

    #[tokio::test]
    async fn test_greeting_bye_is_rejected() {
        let mock = Builder::new().read(b"* BYE too many connections\r\n").build();
        let err = Client::from_stream(mock).await.err().unwrap();
        assert!(matches!(err, Error::Bye(ref t) if t == "too many connections"));
    }

    #[tokio::test]
    async fn test_login_success() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0000 LOGIN alice secret\r\n")
            .read(b"* CAPABILITY IMAP4rev1 UIDPLUS\r\n")
            .read(b"A0000 OK LOGIN completed\r\n")
            .build();
        let mut client = client(mock).await;
        client.login("alice", "secret").await.unwrap();
    }

    #[tokio::test]
    async fn test_login_rejected() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0000 LOGIN alice wrong\r\n")
            .read(b"A0000 NO [AUTHENTICATIONFAILED] Invalid credentials\r\n")
            .build();
        let mut client = client(mock).await;
        let err = client.login("alice", "wrong").await.unwrap_err();
        assert!(matches!(err, Error::No(ref t) if t == "Invalid credentials"));
        assert!(!err.is_connection_lost());
    }

    #[tokio::test]
    async fn test_login_literal_waits_for_continuation() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0000 LOGIN bob {9}\r\n")
            .read(b"+ Ready for literal data\r\n")
            .write("pässword\r\n".as_bytes())
            .read(b"A0000 OK done\r\n")
            .build();
        let mut client = client(mock).await;
        client.login("bob", "pässword").await.unwrap();
    }

    #[tokio::test]
    async fn test_select_reports_status() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0000 SELECT INBOX\r\n")
            .read(b"* 172 EXISTS\r\n")
            .read(b"* 1 RECENT\r\n")
            .read(b"* OK [UIDVALIDITY 3857529045] UIDs valid\r\n")
            .read(b"* OK [UIDNEXT 4392] Predicted next UID\r\n")
            .read(b"A0000 OK [READ-WRITE] SELECT completed\r\n")
            .build();
        let mut client = client(mock).await;
        let status = client.select("INBOX").await.unwrap();
        assert_eq!(status.exists, 172);
        assert_eq!(status.uid_validity, Some(3_857_529_045));
        assert_eq!(status.uid_next, Some(4392));
        assert!(!status.read_only);
        assert_eq!(status.name, "INBOX");
    }

    #[tokio::test]
    async fn test_examine_is_read_only() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0000 EXAMINE Archive\r\n")
            .read(b"* 3 EXISTS\r\n")
            .read(b"A0000 OK [READ-ONLY] EXAMINE completed\r\n")
            .build();
        let mut client = client(mock).await;
        assert!(client.examine("Archive").await.unwrap().read_only);
    }

    #[tokio::test]
    async fn test_failed_select_clears_selection() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0000 SELECT INBOX\r\n")
            .read(b"A0000 OK SELECT completed\r\n")
            .write(b"A0001 SELECT Nope\r\n")
            .read(b"A0001 NO Mailbox does not exist\r\n")
            .build();
        let mut client = client(mock).await;
        client.select("INBOX").await.unwrap();
        assert!(client.select("Nope").await.is_err());
        let err = client.expunge().await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_commands_require_selection_without_io() {
        let mock = Builder::new().read(GREETING).build();
        let mut client = client(mock).await;
        let err = client.uid_search(&UidSet::from_uid(uid(1))).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert!(client.expunge().await.is_err());
    }

    #[tokio::test]
    async fn test_uid_search_full_sync_of_large_mailbox() {
        let mut search = b"* SEARCH".to_vec();
        for n in 1_000_000..1_150_000u32 {
            search.extend_from_slice(format!(" {n}").as_bytes());
        }
        search.extend_from_slice(b"\r\n");
        assert_eq!(search.len(), 1_200_010);

        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0000 EXAMINE INBOX\r\n")
            .read(b"* 150000 EXISTS\r\n")
            .read(b"A0000 OK [READ-ONLY] EXAMINE completed\r\n")
            .write(b"A0001 UID SEARCH UID 1:*\r\n")
            .read(&search)
            .read(b"A0001 OK SEARCH completed\r\n")
            .build();
        let mut client = client(mock).await;
        client.examine("INBOX").await.unwrap();

        let uids = client.uid_search(&UidSet::from_uid(uid(1))).await.unwrap();
        assert_eq!(uids.len(), 150_000);
        assert_eq!(uids[0], uid(1_000_000));
        assert_eq!(uids[149_999], uid(1_149_999));
    }

    #[tokio::test]
    async fn test_uid_search_and_fetch() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0000 EXAMINE INBOX\r\n")
            .read(b"A0000 OK done\r\n")
            .write(b"A0001 UID SEARCH UID 10:*\r\n")
            .read(b"* SEARCH 10 12 15\r\n")
            .read(b"A0001 OK SEARCH completed\r\n")
            .write(b"A0002 UID FETCH 10,15 (UID BODY.PEEK[])\r\n")
            .read(b"* 1 FETCH (UID 10 BODY[] {5}\r\n")
            .read(b"hello)\r\n")
            .read(b"* 4 FETCH (FLAGS (\\Seen))\r\n")
            .read(b"A0002 OK FETCH completed\r\n")
            .build();
        let mut client = client(mock).await;
        client.examine("INBOX").await.unwrap();

        let uids = client.uid_search(&UidSet::from_uid(uid(10))).await.unwrap();
        assert_eq!(uids, vec![uid(10), uid(12), uid(15)]);

        let fetched = client
            .uid_fetch(&UidSet::from_uids([uid(10), uid(15)]))
            .await
            .unwrap();
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[0].uid, Some(uid(10)));
        assert_eq!(fetched[0].body.as_deref(), Some(&b"hello"[..]));
        assert!(fetched[1].body.is_none());
    }

    #[tokio::test]
    async fn test_store_copy_expunge() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0000 SELECT INBOX\r\n")
            .read(b"A0000 OK done\r\n")
            .write(b"A0001 UID STORE 7 +FLAGS.SILENT (\\Deleted)\r\n")
            .read(b"A0001 OK STORE completed\r\n")
            .write(b"A0002 UID COPY 7 Trash\r\n")
            .read(b"A0002 OK [COPYUID 38505 7 3956] COPY completed\r\n")
            .write(b"A0003 EXPUNGE\r\n")
            .read(b"* 3 EXPUNGE\r\n")
            .read(b"A0003 OK EXPUNGE completed\r\n")
            .build();
        let mut client = client(mock).await;
        client.select("INBOX").await.unwrap();
        let set = UidSet::single(uid(7));
        client
            .uid_store(&set, StoreAction::Add, &[Flag::Deleted])
            .await
            .unwrap();
        client.uid_copy(&set, "Trash").await.unwrap();
        assert_eq!(client.expunge().await.unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn test_bye_mid_command_is_fatal() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0000 NOOP\r\n")
            .read(b"* BYE server shutting down\r\n")
            .build();
        let mut client = client(mock).await;
        let err = client.noop().await.unwrap_err();
        assert!(err.is_connection_lost());
    }

    #[tokio::test]
    async fn test_noop_on_closed_transport() {
        let mock = Builder::new().read(GREETING).write(b"A0000 NOOP\r\n").build();
        let mut client = client(mock).await;
        let err = client.noop().await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.is_connection_lost());
    }

    #[tokio::test]
    async fn test_logout_tolerates_close_after_bye() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0000 LOGOUT\r\n")
            .read(b"* BYE logging out\r\n")
            .build();
        let mut client = client(mock).await;
        client.logout().await.unwrap();
    }

    #[tokio::test]
    async fn test_logout_with_tagged_ok() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0000 LOGOUT\r\n")
            .read(b"* BYE logging out\r\n")
            .read(b"A0000 OK LOGOUT completed\r\n")
            .build();
        let mut client = client(mock).await;
        client.logout().await.unwrap();
    }
}
