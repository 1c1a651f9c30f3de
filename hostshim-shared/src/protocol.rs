//! Watch helper line protocol.
//!
//! The helper prints one event per line on stdout:
//!
//! ```text
//! add <basename>
//! unlink <basename>
//! change <basename>
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of filesystem change reported by the watch helper.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileEventKind {
    Added,
    Removed,
    Changed,
}

impl FileEventKind {
    /// Every kind, in keyword match order.
    pub const ALL: [FileEventKind; 3] = [
        FileEventKind::Added,
        FileEventKind::Removed,
        FileEventKind::Changed,
    ];

    /// Protocol keyword for this kind.
    pub fn keyword(&self) -> &'static str {
        match self {
            FileEventKind::Added => "add",
            FileEventKind::Removed => "unlink",
            FileEventKind::Changed => "change",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.keyword() == keyword)
    }
}

impl fmt::Display for FileEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// A single change reported by the watch helper.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEvent {
    pub kind: FileEventKind,
    /// Basename of the affected entry, as printed by the helper.
    pub path: String,
}

impl FileEvent {
    pub fn new(kind: FileEventKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    /// Parse one protocol line.
    ///
    /// The keyword must be the first token; the rest of the line, trimmed, is
    /// the path. Trailing `\r` from TTY line endings is ignored. Returns `None`
    /// for blank lines, unknown keywords, and keywords without a path.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        let (keyword, rest) = match line.split_once(char::is_whitespace) {
            Some((keyword, rest)) => (keyword, rest.trim()),
            None => (line, ""),
        };
        let kind = FileEventKind::from_keyword(keyword)?;
        if rest.is_empty() {
            return None;
        }
        Some(Self::new(kind, rest))
    }
}

impl fmt::Display for FileEvent {
    /// Renders the protocol line, without the trailing newline.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind.keyword(), self.path)
    }
}
