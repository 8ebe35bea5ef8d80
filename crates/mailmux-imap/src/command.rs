//! IMAP commands and their wire encoding.
//!
//! A command encodes to one or more fragments. Every fragment except the
//! last ends with a synchronizing literal header `{n}\r\n`, after which the
//! client must wait for a `+` continuation before sending the next one.

use crate::types::{Flag, StoreAction, UidSet};
use crate::{Error, Result};

/// Generates command tags `A0000`, `A0001`, ...
#[derive(Debug, Clone)]
pub struct TagGenerator {
    counter: u32,
    prefix: char,
}

impl TagGenerator {
    /// Creates a new tag generator with the given prefix.
    #[must_use]
    pub const fn new(prefix: char) -> Self {
        Self { counter: 0, prefix }
    }

    /// Generates the next tag.
    pub fn next_tag(&mut self) -> String {
        let tag = format!("{}{:04}", self.prefix, self.counter);
        self.counter = self.counter.wrapping_add(1);
        tag
    }
}

impl Default for TagGenerator {
    fn default() -> Self {
        Self::new('A')
    }
}

/// The IMAP commands this client issues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `LOGIN user pass`
    Login {
        /// Account name.
        username: String,
        /// Cleartext password.
        password: String,
    },
    /// `SELECT mailbox` (read-write).
    Select {
        /// Mailbox name.
        mailbox: String,
    },
    /// `EXAMINE mailbox` (read-only).
    Examine {
        /// Mailbox name.
        mailbox: String,
    },
    /// `UID SEARCH UID set`
    UidSearch {
        /// UIDs to match.
        set: UidSet,
    },
    /// `UID FETCH set (UID BODY.PEEK[])`
    UidFetch {
        /// UIDs to fetch.
        set: UidSet,
    },
    /// `UID STORE set +FLAGS.SILENT (...)` or `-FLAGS.SILENT`.
    UidStore {
        /// UIDs to modify.
        set: UidSet,
        /// Add or remove.
        action: StoreAction,
        /// Flags to apply.
        flags: Vec<Flag>,
    },
    /// `UID COPY set mailbox`
    UidCopy {
        /// UIDs to copy.
        set: UidSet,
        /// Destination mailbox.
        mailbox: String,
    },
    /// `EXPUNGE`
    Expunge,
    /// `NOOP`
    Noop,
    /// `LOGOUT`
    Logout,
}

impl Command {
    /// Short command name for logging. Never includes arguments.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Login { .. } => "LOGIN",
            Self::Select { .. } => "SELECT",
            Self::Examine { .. } => "EXAMINE",
            Self::UidSearch { .. } => "UID SEARCH",
            Self::UidFetch { .. } => "UID FETCH",
            Self::UidStore { .. } => "UID STORE",
            Self::UidCopy { .. } => "UID COPY",
            Self::Expunge => "EXPUNGE",
            Self::Noop => "NOOP",
            Self::Logout => "LOGOUT",
        }
    }

    /// Encodes the command with the given tag.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for empty UID sets, unstorable
    /// flags, and strings containing NUL.
    pub fn encode(&self, tag: &str) -> Result<Vec<Vec<u8>>> {
        let mut enc = Encoder::new(tag);
        match self {
            Self::Login { username, password } => {
                enc.atom("LOGIN");
                enc.astring(username)?;
                enc.astring(password)?;
            }
            Self::Select { mailbox } => {
                enc.atom("SELECT");
                enc.astring(mailbox)?;
            }
            Self::Examine { mailbox } => {
                enc.atom("EXAMINE");
                enc.astring(mailbox)?;
            }
            Self::UidSearch { set } => {
                enc.atom("UID SEARCH UID");
                enc.set(set)?;
            }
            Self::UidFetch { set } => {
                enc.atom("UID FETCH");
                enc.set(set)?;
                enc.atom("(UID BODY.PEEK[])");
            }
            Self::UidStore { set, action, flags } => {
                enc.atom("UID STORE");
                enc.set(set)?;
                enc.atom(match action {
                    StoreAction::Add => "+FLAGS.SILENT",
                    StoreAction::Remove => "-FLAGS.SILENT",
                });
                enc.flag_list(flags)?;
            }
            Self::UidCopy { set, mailbox } => {
                enc.atom("UID COPY");
                enc.set(set)?;
                enc.astring(mailbox)?;
            }
            Self::Expunge => enc.atom("EXPUNGE"),
            Self::Noop => enc.atom("NOOP"),
            Self::Logout => enc.atom("LOGOUT"),
        }
        Ok(enc.finish())
    }
}

struct Encoder {
    fragments: Vec<Vec<u8>>,
    current: Vec<u8>,
}

impl Encoder {
    fn new(tag: &str) -> Self {
        Self {
            fragments: Vec::new(),
            current: tag.as_bytes().to_vec(),
        }
    }

    fn atom(&mut self, s: &str) {
        self.current.push(b' ');
        self.current.extend_from_slice(s.as_bytes());
    }

    fn set(&mut self, set: &UidSet) -> Result<()> {
        if set.is_empty() {
            return Err(Error::InvalidArgument("empty UID set".into()));
        }
        self.atom(&set.to_string());
        Ok(())
    }

    fn flag_list(&mut self, flags: &[Flag]) -> Result<()> {
        if let Some(bad) = flags.iter().find(|f| !f.is_storable()) {
            return Err(Error::InvalidArgument(format!("flag cannot be stored: {bad}")));
        }
        let list: Vec<&str> = flags.iter().map(Flag::as_str).collect();
        self.atom(&format!("({})", list.join(" ")));
        Ok(())
    }

    /// Writes an atom, a quoted string, or a literal, whichever `s` needs.
    fn astring(&mut self, s: &str) -> Result<()> {
        if s.bytes().any(|b| b == 0) {
            return Err(Error::InvalidArgument("string contains NUL".into()));
        }
        self.current.push(b' ');
        if s.bytes().any(needs_literal) {
            self.current
                .extend_from_slice(format!("{{{}}}\r\n", s.len()).as_bytes());
            self.fragments.push(std::mem::take(&mut self.current));
            self.current.extend_from_slice(s.as_bytes());
        } else if s.is_empty() || s.bytes().any(needs_quoting) {
            self.current.push(b'"');
            for b in s.bytes() {
                if b == b'"' || b == b'\\' {
                    self.current.push(b'\\');
                }
                self.current.push(b);
            }
            self.current.push(b'"');
        } else {
            self.current.extend_from_slice(s.as_bytes());
        }
        Ok(())
    }

    fn finish(mut self) -> Vec<Vec<u8>> {
        self.current.extend_from_slice(b"\r\n");
        self.fragments.push(self.current);
        self.fragments
    }
}

const fn needs_quoting(b: u8) -> bool {
    matches!(b, b' ' | b'"' | b'\\' | b'(' | b')' | b'{' | b'%' | b'*' | b']') || b < 0x20 || b == 0x7F
}

const fn needs_literal(b: u8) -> bool {
    b == b'\r' || b == b'\n' || b >= 0x80
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::Uid;

    fn uid(n: u32) -> Uid {
        Uid::new(n).unwrap()
    }

    fn encode_one(cmd: &Command) -> String {
        let fragments = cmd.encode("A0001").unwrap();
        assert_eq!(fragments.len(), 1);
        String::from_utf8(fragments.into_iter().next().unwrap()).unwrap()
    }

    #[test]
    fn test_tag_sequence() {
        let mut tags = TagGenerator::default();
        assert_eq!(tags.next_tag(), "A0000");
        assert_eq!(tags.next_tag(), "A0001");
        assert_eq!(tags.next_tag(), "A0002");
    }

    #[test]
    fn test_login_quotes_when_needed() {
        let cmd = Command::Login {
            username: "alice@example.com".into(),
            password: "pa ss\"word".into(),
        };
        assert_eq!(
            encode_one(&cmd),
            "A0001 LOGIN alice@example.com \"pa ss\\\"word\"\r\n"
        );
    }

    #[test]
    fn test_login_non_ascii_uses_literal() {
        let cmd = Command::Login {
            username: "bob".into(),
            password: "pässword".into(),
        };
        let fragments = cmd.encode("A0001").unwrap();
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0], b"A0001 LOGIN bob {9}\r\n");
        assert_eq!(fragments[1], "pässword\r\n".as_bytes());
    }

    #[test]
    fn test_empty_mailbox_is_quoted() {
        let cmd = Command::Select {
            mailbox: String::new(),
        };
        assert_eq!(encode_one(&cmd), "A0001 SELECT \"\"\r\n");
    }

    #[test]
    fn test_examine_with_space() {
        let cmd = Command::Examine {
            mailbox: "Sent Items".into(),
        };
        assert_eq!(encode_one(&cmd), "A0001 EXAMINE \"Sent Items\"\r\n");
    }

    #[test]
    fn test_uid_search_open_range() {
        let cmd = Command::UidSearch {
            set: UidSet::from_uid(uid(101)),
        };
        assert_eq!(encode_one(&cmd), "A0001 UID SEARCH UID 101:*\r\n");
    }

    #[test]
    fn test_uid_fetch_peeks() {
        let cmd = Command::UidFetch {
            set: UidSet::from_uids([1, 2, 3, 7].map(uid)),
        };
        assert_eq!(
            encode_one(&cmd),
            "A0001 UID FETCH 1:3,7 (UID BODY.PEEK[])\r\n"
        );
    }

    #[test]
    fn test_uid_store_add_and_remove() {
        let add = Command::UidStore {
            set: UidSet::single(uid(5)),
            action: StoreAction::Add,
            flags: vec![Flag::Seen, Flag::Flagged],
        };
        assert_eq!(
            encode_one(&add),
            "A0001 UID STORE 5 +FLAGS.SILENT (\\Seen \\Flagged)\r\n"
        );

        let remove = Command::UidStore {
            set: UidSet::single(uid(5)),
            action: StoreAction::Remove,
            flags: vec![Flag::Deleted],
        };
        assert_eq!(
            encode_one(&remove),
            "A0001 UID STORE 5 -FLAGS.SILENT (\\Deleted)\r\n"
        );
    }

    #[test]
    fn test_uid_store_rejects_recent() {
        let cmd = Command::UidStore {
            set: UidSet::single(uid(5)),
            action: StoreAction::Add,
            flags: vec![Flag::Recent],
        };
        assert!(matches!(cmd.encode("A1"), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_uid_copy() {
        let cmd = Command::UidCopy {
            set: UidSet::single(uid(9)),
            mailbox: "Archive".into(),
        };
        assert_eq!(encode_one(&cmd), "A0001 UID COPY 9 Archive\r\n");
    }

    #[test]
    fn test_empty_set_rejected() {
        let cmd = Command::UidFetch {
            set: UidSet::default(),
        };
        assert!(matches!(cmd.encode("A1"), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_nul_rejected() {
        let cmd = Command::Select {
            mailbox: "bad\0box".into(),
        };
        assert!(matches!(cmd.encode("A1"), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(encode_one(&Command::Noop), "A0001 NOOP\r\n");
        assert_eq!(encode_one(&Command::Expunge), "A0001 EXPUNGE\r\n");
        assert_eq!(encode_one(&Command::Logout), "A0001 LOGOUT\r\n");
    }
}
