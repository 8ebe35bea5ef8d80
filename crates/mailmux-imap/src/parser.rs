//! Parser for the server responses this client consumes.
//!
//! Input is one complete response as returned by
//! [`FramedStream::read_response`](crate::connection::FramedStream::read_response),
//! with any literals inlined after their `{n}\r\n` headers.

use crate::types::{FetchedMessage, Flag, Uid};
use crate::{Error, Result};

/// Completion status carried by tagged and untagged status responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// `OK`
    Ok,
    /// `NO`
    No,
    /// `BAD`
    Bad,
    /// `PREAUTH` (greeting only)
    PreAuth,
    /// `BYE`
    Bye,
}

/// Bracketed response code, e.g. `[UIDVALIDITY 3857529045]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseCode {
    /// `[UIDVALIDITY n]`
    UidValidity(u32),
    /// `[UIDNEXT n]`
    UidNext(u32),
    /// `[READ-ONLY]`
    ReadOnly,
    /// `[READ-WRITE]`
    ReadWrite,
    /// Anything else, verbatim without brackets.
    Other(String),
}

/// Untagged (`* ...`) server data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Untagged {
    /// `* OK|NO|BAD|PREAUTH|BYE [code] text`
    Status {
        /// Status keyword.
        status: Status,
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// `* n EXISTS`
    Exists(u32),
    /// `* n EXPUNGE`
    Expunge(u32),
    /// `* SEARCH n...`
    Search(Vec<u32>),
    /// `* n FETCH (...)`
    Fetch(FetchedMessage),
    /// Untagged data this client does not interpret.
    Other(String),
}

/// A parsed server response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Command completion.
    Tagged {
        /// Tag echoed from the command.
        tag: String,
        /// Completion status.
        status: Status,
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// Untagged data.
    Untagged(Untagged),
    /// `+ text` continuation request.
    Continuation(String),
}

/// Parses one complete response.
///
/// # Errors
///
/// Returns [`Error::Parse`] if the response is malformed.
pub fn parse_response(input: &[u8]) -> Result<Response> {
    let mut cur = Cursor::new(input);
    if cur.eat(b'+') {
        cur.eat(b' ');
        return Ok(Response::Continuation(cur.rest_text()));
    }
    if cur.eat(b'*') {
        cur.expect(b' ')?;
        return parse_untagged(&mut cur).map(Response::Untagged);
    }

    let tag = cur.atom()?;
    cur.expect(b' ')?;
    let (status, code, text) = parse_status_tail(&mut cur)?;
    Ok(Response::Tagged {
        tag,
        status,
        code,
        text,
    })
}

fn parse_untagged(cur: &mut Cursor<'_>) -> Result<Untagged> {
    if cur.peek().is_some_and(|b| b.is_ascii_digit()) {
        let n = cur.number()?;
        cur.expect(b' ')?;
        let kind = cur.atom()?.to_ascii_uppercase();
        return match kind.as_str() {
            "EXISTS" => Ok(Untagged::Exists(n)),
            "EXPUNGE" => Ok(Untagged::Expunge(n)),
            "FETCH" => {
                cur.expect(b' ')?;
                parse_fetch(cur, n).map(Untagged::Fetch)
            }
            _ => Ok(Untagged::Other(format!("{n} {kind}"))),
        };
    }

    let save = cur.pos;
    let word = cur.atom()?.to_ascii_uppercase();
    match word.as_str() {
        "OK" | "NO" | "BAD" | "PREAUTH" | "BYE" => {
            cur.pos = save;
            let (status, code, text) = parse_status_tail(cur)?;
            Ok(Untagged::Status { status, code, text })
        }
        "SEARCH" => parse_search(cur).map(Untagged::Search),
        _ => Ok(Untagged::Other(word)),
    }
}

fn parse_status_tail(cur: &mut Cursor<'_>) -> Result<(Status, Option<ResponseCode>, String)> {
    let word = cur.atom()?;
    let status = match word.to_ascii_uppercase().as_str() {
        "OK" => Status::Ok,
        "NO" => Status::No,
        "BAD" => Status::Bad,
        "PREAUTH" => Status::PreAuth,
        "BYE" => Status::Bye,
        _ => return Err(cur.error(format!("unknown status {word}"))),
    };
    cur.eat(b' ');

    let code = if cur.eat(b'[') {
        let raw = cur.take_until(b']');
        cur.expect(b']')?;
        cur.eat(b' ');
        Some(parse_code(&raw))
    } else {
        None
    };

    Ok((status, code, cur.rest_text()))
}

fn parse_code(raw: &str) -> ResponseCode {
    let mut parts = raw.splitn(2, ' ');
    let name = parts.next().unwrap_or_default().to_ascii_uppercase();
    let arg = parts.next().and_then(|s| s.trim().parse::<u32>().ok());
    match (name.as_str(), arg) {
        ("UIDVALIDITY", Some(n)) => ResponseCode::UidValidity(n),
        ("UIDNEXT", Some(n)) => ResponseCode::UidNext(n),
        ("READ-ONLY", _) => ResponseCode::ReadOnly,
        ("READ-WRITE", _) => ResponseCode::ReadWrite,
        _ => ResponseCode::Other(raw.to_string()),
    }
}

fn parse_search(cur: &mut Cursor<'_>) -> Result<Vec<u32>> {
    let mut uids = Vec::new();
    loop {
        cur.eat_spaces();
        match cur.peek() {
            Some(b) if b.is_ascii_digit() => uids.push(cur.number()?),
            // CONDSTORE appends "(MODSEQ n)"
            Some(b'(') => cur.skip_value()?,
            _ => break,
        }
    }
    Ok(uids)
}

fn parse_fetch(cur: &mut Cursor<'_>, seq: u32) -> Result<FetchedMessage> {
    let mut msg = FetchedMessage {
        seq,
        ..FetchedMessage::default()
    };
    cur.expect(b'(')?;
    loop {
        cur.eat_spaces();
        if cur.eat(b')') {
            break;
        }
        let name = cur.fetch_item_name()?.to_ascii_uppercase();
        cur.expect(b' ')?;
        match name.as_str() {
            "UID" => msg.uid = Uid::new(cur.number()?),
            "FLAGS" => msg.flags = Some(cur.flag_list()?),
            "BODY[]" | "RFC822" => msg.body = cur.nstring()?,
            _ => cur.skip_value()?,
        }
    }
    Ok(msg)
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::Parse {
            position: self.pos,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    fn eat(&mut self, b: u8) -> bool {
        if self.peek() == Some(b) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_spaces(&mut self) {
        while self.eat(b' ') {}
    }

    fn expect(&mut self, b: u8) -> Result<()> {
        if self.eat(b) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", char::from(b))))
        }
    }

    fn take_while(&mut self, pred: impl Fn(u8) -> bool) -> &'a [u8] {
        let start = self.pos;
        while self.peek().is_some_and(&pred) {
            self.pos += 1;
        }
        &self.buf[start..self.pos]
    }

    fn take_until(&mut self, stop: u8) -> String {
        let raw = self.take_while(|b| b != stop && b != b'\r' && b != b'\n');
        String::from_utf8_lossy(raw).into_owned()
    }

    /// Remaining text on the line, without the trailing CRLF.
    fn rest_text(&mut self) -> String {
        let raw = self.take_while(|b| b != b'\r' && b != b'\n');
        String::from_utf8_lossy(raw).trim().to_string()
    }

    fn atom(&mut self) -> Result<String> {
        let raw = self.take_while(|b| {
            b.is_ascii_graphic() && !matches!(b, b'(' | b')' | b'{' | b'"' | b'[' | b']')
        });
        if raw.is_empty() {
            return Err(self.error("expected atom"));
        }
        Ok(String::from_utf8_lossy(raw).into_owned())
    }

    fn number(&mut self) -> Result<u32> {
        let raw = self.take_while(|b| b.is_ascii_digit());
        std::str::from_utf8(raw)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| self.error("expected number"))
    }

    /// Item name including any `[section]` and `<origin>` suffix.
    fn fetch_item_name(&mut self) -> Result<String> {
        let start = self.pos;
        self.atom()?;
        if self.eat(b'[') {
            let mut depth = 1usize;
            while depth > 0 {
                match self.peek() {
                    Some(b'[') => depth += 1,
                    Some(b']') => depth -= 1,
                    Some(b'\r' | b'\n') | None => return Err(self.error("unterminated section")),
                    Some(_) => {}
                }
                self.pos += 1;
            }
            if self.eat(b'<') {
                self.take_while(|b| b != b'>');
                self.expect(b'>')?;
            }
        }
        Ok(String::from_utf8_lossy(&self.buf[start..self.pos]).into_owned())
    }

    fn flag_list(&mut self) -> Result<Vec<Flag>> {
        self.expect(b'(')?;
        let mut flags = Vec::new();
        loop {
            self.eat_spaces();
            if self.eat(b')') {
                return Ok(flags);
            }
            let raw = self.take_while(|b| b.is_ascii_graphic() && b != b'(' && b != b')');
            if raw.is_empty() {
                return Err(self.error("malformed flag list"));
            }
            flags.push(Flag::parse(&String::from_utf8_lossy(raw)));
        }
    }

    fn literal(&mut self) -> Result<Vec<u8>> {
        self.expect(b'{')?;
        let len = usize::try_from(self.number()?).map_err(|_| self.error("literal too large"))?;
        self.eat(b'+');
        self.expect(b'}')?;
        self.expect(b'\r')?;
        self.expect(b'\n')?;
        let end = self.pos + len;
        let data = self
            .buf
            .get(self.pos..end)
            .ok_or_else(|| self.error("truncated literal"))?
            .to_vec();
        self.pos = end;
        Ok(data)
    }

    fn quoted(&mut self) -> Result<Vec<u8>> {
        self.expect(b'"')?;
        let mut out = Vec::new();
        loop {
            match self.peek() {
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some(b'\\') => {
                    self.pos += 1;
                    let escaped = self.peek().ok_or_else(|| self.error("dangling escape"))?;
                    out.push(escaped);
                    self.pos += 1;
                }
                Some(b'\r' | b'\n') | None => return Err(self.error("unterminated quoted string")),
                Some(b) => {
                    out.push(b);
                    self.pos += 1;
                }
            }
        }
    }

    fn nstring(&mut self) -> Result<Option<Vec<u8>>> {
        match self.peek() {
            Some(b'{') => self.literal().map(Some),
            Some(b'"') => self.quoted().map(Some),
            _ => {
                let word = self.atom()?;
                if word.eq_ignore_ascii_case("NIL") {
                    Ok(None)
                } else {
                    Err(self.error("expected string or NIL"))
                }
            }
        }
    }

    /// Skips one value of any shape: list, string, literal or atom.
    fn skip_value(&mut self) -> Result<()> {
        match self.peek() {
            Some(b'(') => {
                self.pos += 1;
                loop {
                    self.eat_spaces();
                    if self.eat(b')') {
                        return Ok(());
                    }
                    if self.peek().is_none() {
                        return Err(self.error("unterminated list"));
                    }
                    self.skip_value()?;
                }
            }
            Some(b'"') => self.quoted().map(drop),
            Some(b'{') => self.literal().map(drop),
            Some(_) => {
                let raw = self.take_while(|b| b.is_ascii_graphic() && b != b'(' && b != b')');
                if raw.is_empty() {
                    return Err(self.error("unexpected byte"));
                }
                Ok(())
            }
            None => Err(self.error("unexpected end of response")),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn untagged(input: &[u8]) -> Untagged {
        match parse_response(input).unwrap() {
            Response::Untagged(u) => u,
            other => panic!("expected untagged, got {other:?}"),
        }
    }

    #[test]
    fn test_tagged_ok() {
        let resp = parse_response(b"A0001 OK LOGIN completed\r\n").unwrap();
        assert_eq!(
            resp,
            Response::Tagged {
                tag: "A0001".into(),
                status: Status::Ok,
                code: None,
                text: "LOGIN completed".into(),
            }
        );
    }

    #[test]
    fn test_tagged_no_with_code() {
        let resp = parse_response(b"A0002 NO [AUTHENTICATIONFAILED] Invalid credentials\r\n").unwrap();
        let Response::Tagged { status, code, text, .. } = resp else {
            panic!("expected tagged");
        };
        assert_eq!(status, Status::No);
        assert_eq!(code, Some(ResponseCode::Other("AUTHENTICATIONFAILED".into())));
        assert_eq!(text, "Invalid credentials");
    }

    #[test]
    fn test_greeting_and_bye() {
        assert!(matches!(
            untagged(b"* OK IMAP4rev1 Service Ready\r\n"),
            Untagged::Status { status: Status::Ok, .. }
        ));
        assert!(matches!(
            untagged(b"* BYE Autologout; idle for too long\r\n"),
            Untagged::Status { status: Status::Bye, .. }
        ));
    }

    #[test]
    fn test_select_data() {
        assert_eq!(untagged(b"* 172 EXISTS\r\n"), Untagged::Exists(172));
        assert_eq!(
            untagged(b"* OK [UIDVALIDITY 3857529045] UIDs valid\r\n"),
            Untagged::Status {
                status: Status::Ok,
                code: Some(ResponseCode::UidValidity(3_857_529_045)),
                text: "UIDs valid".into(),
            }
        );
        assert!(matches!(
            untagged(b"* OK [UIDNEXT 4392] Predicted next UID\r\n"),
            Untagged::Status { code: Some(ResponseCode::UidNext(4392)), .. }
        ));
        assert!(matches!(
            untagged(b"* FLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft)\r\n"),
            Untagged::Other(_)
        ));
    }

    #[test]
    fn test_search() {
        assert_eq!(untagged(b"* SEARCH 2 84 882\r\n"), Untagged::Search(vec![2, 84, 882]));
        assert_eq!(untagged(b"* SEARCH\r\n"), Untagged::Search(vec![]));
        assert_eq!(
            untagged(b"* SEARCH 5 6 (MODSEQ 917162500)\r\n"),
            Untagged::Search(vec![5, 6])
        );
    }

    #[test]
    fn test_fetch_literal_body() {
        let resp = b"* 12 FETCH (UID 4827 BODY[] {10}\r\nhello\r\nbye)\r\n";
        let Untagged::Fetch(msg) = untagged(resp) else {
            panic!("expected fetch");
        };
        assert_eq!(msg.seq, 12);
        assert_eq!(msg.uid, Uid::new(4827));
        assert_eq!(msg.body.as_deref(), Some(&b"hello\r\nbye"[..]));
    }

    #[test]
    fn test_fetch_items_in_any_order() {
        let resp = b"* 3 FETCH (FLAGS (\\Seen $Junk) BODY[] {2}\r\nhi UID 9)\r\n";
        let Untagged::Fetch(msg) = untagged(resp) else {
            panic!("expected fetch");
        };
        assert_eq!(msg.uid, Uid::new(9));
        assert_eq!(msg.flags, Some(vec![Flag::Seen, Flag::Keyword("$Junk".into())]));
        assert_eq!(msg.body.as_deref(), Some(&b"hi"[..]));
    }

    #[test]
    fn test_fetch_skips_unknown_items() {
        let resp = b"* 1 FETCH (MODSEQ (12) BODY[HEADER.FIELDS (SUBJECT)] {4}\r\nab\r\n RFC822.SIZE 44 UID 1 RFC822 \"x\\\"y\")\r\n";
        let Untagged::Fetch(msg) = untagged(resp) else {
            panic!("expected fetch");
        };
        assert_eq!(msg.uid, Uid::new(1));
        assert_eq!(msg.body.as_deref(), Some(&b"x\"y"[..]));
    }

    #[test]
    fn test_fetch_nil_body() {
        let Untagged::Fetch(msg) = untagged(b"* 1 FETCH (UID 5 BODY[] NIL)\r\n") else {
            panic!("expected fetch");
        };
        assert_eq!(msg.uid, Uid::new(5));
        assert!(msg.body.is_none());
    }

    #[test]
    fn test_fetch_without_uid() {
        let Untagged::Fetch(msg) = untagged(b"* 7 FETCH (FLAGS (\\Deleted))\r\n") else {
            panic!("expected fetch");
        };
        assert_eq!(msg.seq, 7);
        assert!(msg.uid.is_none());
    }

    #[test]
    fn test_truncated_literal_is_error() {
        let err = parse_response(b"* 1 FETCH (BODY[] {50}\r\nshort)\r\n").unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn test_continuation() {
        assert_eq!(
            parse_response(b"+ Ready for literal data\r\n").unwrap(),
            Response::Continuation("Ready for literal data".into())
        );
        assert_eq!(parse_response(b"+\r\n").unwrap(), Response::Continuation(String::new()));
    }

    #[test]
    fn test_expunge() {
        assert_eq!(untagged(b"* 3 EXPUNGE\r\n"), Untagged::Expunge(3));
    }
}
