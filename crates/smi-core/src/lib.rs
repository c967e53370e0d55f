//! Core domain model for SMI: forum items, symbol mentions, tracked symbols.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "smi-core";

/// A top-level forum post as persisted in the `submissions` table.
///
/// Identifiers are forum-assigned base36 strings and immutable. `author` is
/// the empty string when the account is deleted or anonymous. `created` is
/// seconds since the Unix epoch, as reported by the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,
    pub title: String,
    pub body: String,
    pub author: String,
    pub created: i64,
}

/// A comment on a submission. `submission_id` is a foreign key, not an
/// ownership relation: the parent row must exist before the comment row is
/// committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub submission_id: String,
    pub body: String,
    pub author: String,
    pub created: i64,
}

/// A derived record: tracked symbol seen in a comment, with the per-comment
/// mean sentence polarity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    pub symbol: String,
    pub comment_id: String,
    pub sentiment: f64,
}

/// The set of tracked symbols, keyed by upper-cased symbol name.
///
/// Loaded once per process lifetime and read-only during ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolSet {
    symbols: HashMap<String, bool>,
}

impl SymbolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the set from raw symbol names, normalizing to upper case.
    pub fn from_symbols<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let symbols = symbols
            .into_iter()
            .map(|s| (s.as_ref().trim().to_ascii_uppercase(), true))
            .filter(|(s, _)| !s.is_empty())
            .collect();
        Self { symbols }
    }

    /// Case-normalized membership test: `"aapl"` matches a tracked `"AAPL"`.
    pub fn contains(&self, phrase: &str) -> bool {
        self.symbols.contains_key(&phrase.trim().to_ascii_uppercase())
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_lookup_is_case_normalized() {
        let set = SymbolSet::from_symbols(["AAPL", "msft"]);
        assert!(set.contains("aapl"));
        assert!(set.contains("MSFT"));
        assert!(set.contains(" AAPL "));
        assert!(!set.contains("GME"));
    }

    #[test]
    fn blank_symbols_are_dropped() {
        let set = SymbolSet::from_symbols(["AAPL", "", "  "]);
        assert_eq!(set.len(), 1);
    }
}
