//! Integration tests for the IMAP client.
//!
//! A scripted stream replays canned server responses and records every
//! byte the client writes, so a whole session can be checked end to end.

#![allow(clippy::unwrap_used)]

use std::io::{self, Cursor};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use mailmux_imap::{Client, Flag, StoreAction, Uid, UidSet};

/// Mock stream that returns predefined responses.
struct MockStream {
    responses: Cursor<Vec<u8>>,
    sent: Arc<Mutex<Vec<u8>>>,
}

impl MockStream {
    fn new(responses: &[u8]) -> (Self, Arc<Mutex<Vec<u8>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let stream = Self {
            responses: Cursor::new(responses.to_vec()),
            sent: Arc::clone(&sent),
        };
        (stream, sent)
    }
}

impl AsyncRead for MockStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let pos = usize::try_from(self.responses.position()).unwrap();
        let data = self.responses.get_ref();
        if pos >= data.len() {
            return Poll::Ready(Ok(()));
        }

        let remaining = &data[pos..];
        let to_read = remaining.len().min(buf.remaining());
        buf.put_slice(&remaining[..to_read]);
        self.responses.set_position((pos + to_read) as u64);

        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.sent.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

fn uid(n: u32) -> Uid {
    Uid::new(n).unwrap()
}

#[tokio::test]
async fn test_incremental_sync_session() {
    let script = concat!(
        "* OK [CAPABILITY IMAP4rev1 UIDPLUS] Dovecot ready.\r\n",
        "A0000 OK Logged in\r\n",
        "* FLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft)\r\n",
        "* 3 EXISTS\r\n",
        "* OK [UIDVALIDITY 1700000000] UIDs valid\r\n",
        "A0001 OK [READ-WRITE] Select completed\r\n",
        "* SEARCH 41 42 43\r\n",
        "A0002 OK Search completed\r\n",
        "* 1 FETCH (UID 41 BODY[] {18}\r\nSubject: a\r\n\r\nbody)\r\n",
        "* 3 FETCH (UID 43 BODY[] {18}\r\nSubject: c\r\n\r\nbody)\r\n",
        "A0003 OK Fetch completed\r\n",
        "A0004 OK Store completed\r\n",
        "* BYE Logging out\r\n",
        "A0005 OK Logout completed\r\n",
    );
    let (stream, sent) = MockStream::new(script.as_bytes());

    let mut client = Client::from_stream(stream).await.unwrap();
    client.login("alice", "hunter2").await.unwrap();

    let status = client.select("INBOX").await.unwrap();
    assert_eq!(status.exists, 3);
    assert_eq!(status.uid_validity, Some(1_700_000_000));

    let uids = client.uid_search(&UidSet::from_uid(uid(41))).await.unwrap();
    assert_eq!(uids, vec![uid(41), uid(42), uid(43)]);

    let fetched = client.uid_fetch(&UidSet::from_uids(uids)).await.unwrap();
    let got: Vec<_> = fetched.iter().filter_map(|m| m.uid).collect();
    assert_eq!(got, vec![uid(41), uid(43)]);
    assert_eq!(
        fetched[1].body.as_deref(),
        Some(&b"Subject: c\r\n\r\nbody"[..])
    );

    client
        .uid_store(&UidSet::single(uid(42)), StoreAction::Add, &[Flag::Seen])
        .await
        .unwrap();
    client.logout().await.unwrap();

    let sent = String::from_utf8(sent.lock().unwrap().clone()).unwrap();
    assert_eq!(
        sent,
        concat!(
            "A0000 LOGIN alice hunter2\r\n",
            "A0001 SELECT INBOX\r\n",
            "A0002 UID SEARCH UID 41:*\r\n",
            "A0003 UID FETCH 41:43 (UID BODY.PEEK[])\r\n",
            "A0004 UID STORE 42 +FLAGS.SILENT (\\Seen)\r\n",
            "A0005 LOGOUT\r\n",
        )
    );
}

#[tokio::test]
async fn test_no_response_keeps_client_usable() {
    let script = concat!(
        "* PREAUTH ready\r\n",
        "A0000 NO [NONEXISTENT] Unknown Mailbox\r\n",
        "A0001 OK NOOP completed\r\n",
    );
    let (stream, _sent) = MockStream::new(script.as_bytes());

    let mut client = Client::from_stream(stream).await.unwrap();
    let err = client.select("Missing").await.unwrap_err();
    assert!(!err.is_connection_lost());
    client.noop().await.unwrap();
}
