//! Candidate lookup keyed by head code, with a digit-only fallback key.
//!
//! Buckets hold positions into the indexed corpus slice and keep insertion
//! order, so every retrieval path (including the relaxed prefix/suffix scans)
//! returns candidates in corpus order.

use std::fmt;

use indexmap::IndexMap;

use crate::indexer::normalize::digits_only;
use crate::models::Matchable;
use crate::query::guards::extends_by_letters;

/// Which lookup produced a candidate list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetrievalPath {
    Direct,
    /// Keys the query head extends by a short letter suffix.
    KeyPrefix,
    /// Keys that extend the query head by a short letter suffix.
    KeyExtension,
    Digits,
    Nothing,
}

impl fmt::Display for RetrievalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RetrievalPath::Direct => "direct",
            RetrievalPath::KeyPrefix => "fallback:prefix",
            RetrievalPath::KeyExtension => "fallback:suffix",
            RetrievalPath::Digits => "fallback:digits",
            RetrievalPath::Nothing => "none",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Debug, Default)]
pub struct CandidateIndex {
    by_head: IndexMap<String, Vec<usize>>,
    by_digits: IndexMap<String, Vec<usize>>,
}

impl CandidateIndex {
    /// Index every item with a non-empty key; one pass over the corpus.
    pub fn build<T: Matchable>(corpus: &[T]) -> Self {
        let mut index = CandidateIndex::default();
        for (pos, item) in corpus.iter().enumerate() {
            let Some(key) = item.index_key().filter(|k| !k.is_empty()) else {
                continue;
            };
            index.by_head.entry(key.to_string()).or_default().push(pos);
            let digits = digits_only(key);
            if !digits.is_empty() {
                index.by_digits.entry(digits).or_default().push(pos);
            }
        }
        index
    }

    pub fn key_count(&self) -> usize {
        self.by_head.len()
    }

    pub fn get(&self, head: &str) -> &[usize] {
        self.by_head.get(head).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Buckets whose key is `head` minus a 1..=3 letter suffix.
    pub fn shorter_keys(&self, head: &str) -> Vec<usize> {
        self.collect_where(|key| extends_by_letters(head, key))
    }

    /// Buckets whose key is `head` plus a 1..=3 letter suffix.
    pub fn longer_keys(&self, head: &str) -> Vec<usize> {
        self.collect_where(|key| extends_by_letters(key, head))
    }

    pub fn by_digits(&self, head: &str) -> &[usize] {
        let digits = digits_only(head);
        if digits.is_empty() {
            return &[];
        }
        self.by_digits.get(&digits).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Direct lookup, then (when `fallback` is set) the relaxed paths in
    /// order until one yields candidates.
    pub fn retrieve(&self, head: &str, fallback: bool) -> (Vec<usize>, RetrievalPath) {
        if head.is_empty() {
            return (Vec::new(), RetrievalPath::Nothing);
        }
        let direct = self.get(head);
        if !direct.is_empty() {
            return (direct.to_vec(), RetrievalPath::Direct);
        }
        if !fallback {
            return (Vec::new(), RetrievalPath::Nothing);
        }
        let shorter = self.shorter_keys(head);
        if !shorter.is_empty() {
            return (shorter, RetrievalPath::KeyPrefix);
        }
        let longer = self.longer_keys(head);
        if !longer.is_empty() {
            return (longer, RetrievalPath::KeyExtension);
        }
        let digits = self.by_digits(head);
        if !digits.is_empty() {
            return (digits.to_vec(), RetrievalPath::Digits);
        }
        (Vec::new(), RetrievalPath::Nothing)
    }

    fn collect_where(&self, accept: impl Fn(&str) -> bool) -> Vec<usize> {
        self.by_head
            .iter()
            .filter(|(key, _)| accept(key))
            .flat_map(|(_, bucket)| bucket.iter().copied())
            .collect()
    }
}
