//! Value types shared by commands, the parser and the client.

use std::fmt;
use std::num::NonZeroU32;

/// Unique identifier of a message within a mailbox (RFC 3501 §2.3.1.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uid(NonZeroU32);

impl Uid {
    /// Creates a UID, returning `None` for zero.
    #[must_use]
    pub const fn new(n: u32) -> Option<Self> {
        match NonZeroU32::new(n) {
            Some(n) => Some(Self(n)),
            None => None,
        }
    }

    /// Returns the numeric value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One element of a UID set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UidRange {
    /// A single UID.
    Single(Uid),
    /// An inclusive range `a:b`.
    Range(Uid, Uid),
    /// An open range `a:*`, up to the highest UID in the mailbox.
    From(Uid),
}

impl fmt::Display for UidRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(uid) => write!(f, "{uid}"),
            Self::Range(start, end) => write!(f, "{start}:{end}"),
            Self::From(start) => write!(f, "{start}:*"),
        }
    }
}

/// A UID set as used by `UID FETCH`, `UID STORE` and `UID COPY`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UidSet {
    ranges: Vec<UidRange>,
}

impl UidSet {
    /// A set containing a single UID.
    #[must_use]
    pub fn single(uid: Uid) -> Self {
        Self {
            ranges: vec![UidRange::Single(uid)],
        }
    }

    /// The open range `start:*`.
    #[must_use]
    pub fn from_uid(start: Uid) -> Self {
        Self {
            ranges: vec![UidRange::From(start)],
        }
    }

    /// Builds a compact set from arbitrary UIDs.
    ///
    /// Input order and duplicates do not matter; consecutive runs are folded
    /// into `a:b` ranges.
    #[must_use]
    pub fn from_uids(uids: impl IntoIterator<Item = Uid>) -> Self {
        let mut sorted: Vec<Uid> = uids.into_iter().collect();
        sorted.sort_unstable();
        sorted.dedup();

        let mut ranges = Vec::new();
        let mut iter = sorted.into_iter();
        let Some(first) = iter.next() else {
            return Self::default();
        };
        let (mut start, mut end) = (first, first);
        for uid in iter {
            if uid.get() == end.get() + 1 {
                end = uid;
                continue;
            }
            ranges.push(Self::run(start, end));
            start = uid;
            end = uid;
        }
        ranges.push(Self::run(start, end));
        Self { ranges }
    }

    fn run(start: Uid, end: Uid) -> UidRange {
        if start == end {
            UidRange::Single(start)
        } else {
            UidRange::Range(start, end)
        }
    }

    /// Returns true if the set matches nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Returns the ranges in this set.
    #[must_use]
    pub fn ranges(&self) -> &[UidRange] {
        &self.ranges
    }
}

impl fmt::Display for UidSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, range) in self.ranges.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{range}")?;
        }
        Ok(())
    }
}

/// Message flags.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Flag {
    /// Message has been read.
    Seen,
    /// Message has been answered.
    Answered,
    /// Message is flagged for special attention.
    Flagged,
    /// Message is marked for deletion.
    Deleted,
    /// Message is a draft.
    Draft,
    /// Message is recent (first session to see it).
    Recent,
    /// Custom keyword flag.
    Keyword(String),
}

impl Flag {
    /// Parses a flag string. System flags are matched case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "\\SEEN" => Self::Seen,
            "\\ANSWERED" => Self::Answered,
            "\\FLAGGED" => Self::Flagged,
            "\\DELETED" => Self::Deleted,
            "\\DRAFT" => Self::Draft,
            "\\RECENT" => Self::Recent,
            _ => Self::Keyword(s.to_string()),
        }
    }

    /// Returns the flag as an IMAP string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Seen => "\\Seen",
            Self::Answered => "\\Answered",
            Self::Flagged => "\\Flagged",
            Self::Deleted => "\\Deleted",
            Self::Draft => "\\Draft",
            Self::Recent => "\\Recent",
            Self::Keyword(s) => s,
        }
    }

    /// Returns true if the flag can be sent inside a flag list.
    ///
    /// Keywords must be non-empty atoms; `\Recent` is server-managed.
    #[must_use]
    pub fn is_storable(&self) -> bool {
        match self {
            Self::Recent => false,
            Self::Keyword(s) => !s.is_empty() && s.bytes().all(is_atom_char),
            _ => true,
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns true for bytes allowed in an IMAP atom (RFC 3501 `ATOM-CHAR`).
pub(crate) const fn is_atom_char(b: u8) -> bool {
    b.is_ascii_graphic()
        && !matches!(b, b'(' | b')' | b'{' | b'%' | b'*' | b'"' | b'\\' | b']')
}

/// Whether a `UID STORE` adds or removes flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreAction {
    /// `+FLAGS.SILENT`
    Add,
    /// `-FLAGS.SILENT`
    Remove,
}

/// Mailbox state reported while selecting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailboxStatus {
    /// Mailbox name as selected.
    pub name: String,
    /// Number of messages (`* n EXISTS`).
    pub exists: u32,
    /// `[UIDVALIDITY n]`, if reported.
    pub uid_validity: Option<u32>,
    /// `[UIDNEXT n]`, if reported.
    pub uid_next: Option<u32>,
    /// True when the mailbox was opened with EXAMINE or the server forced
    /// `[READ-ONLY]`.
    pub read_only: bool,
}

/// One `* n FETCH (...)` response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedMessage {
    /// Message sequence number.
    pub seq: u32,
    /// `UID` item, if present.
    pub uid: Option<Uid>,
    /// `FLAGS` item, if present.
    pub flags: Option<Vec<Flag>>,
    /// `BODY[]` or `RFC822` payload. `None` if absent or `NIL`.
    pub body: Option<Vec<u8>>,
}
