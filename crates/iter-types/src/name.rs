//! Wire-form domain names: label counting, canonical comparison, and the
//! subdomain relation the hints store and iterator module are built on.
//!
//! A name is stored as a sequence of labels in left-to-right (dotted-string)
//! order, each lowercased for case-insensitive comparison, always ending
//! with the zero-length root label. This mirrors the wire form without
//! actually encoding length-prefixed octets: the wire codec that would
//! serialise/deserialise this onto the network is a separate concern.

use std::cmp::Ordering;
use std::fmt;

/// The longest a single label may be, per RFC 1035.
pub const MAX_LABEL_LEN: usize = 63;

/// The longest a name may be, in wire octets (length bytes + label bytes),
/// per RFC 1035.
pub const MAX_NAME_LEN: usize = 255;

/// A domain name, canonicalised to lowercase ASCII.
///
/// `labels` is never empty: the shortest possible name is the root, a
/// single empty label. Every name's last label is empty (the root
/// terminator), matching the wire form's zero-length final octet.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct Name {
    labels: Vec<Vec<u8>>,
}

impl Name {
    /// The root name: label count 1, wire length 1.
    pub fn root() -> Self {
        Name {
            labels: vec![Vec::new()],
        }
    }

    pub fn is_root(&self) -> bool {
        self.labels.len() == 1
    }

    /// `label_count(name) -> (labels, byte_len)`: the number of labels
    /// (including the root terminator) and the wire byte length (including
    /// the terminating zero octet).
    pub fn label_count(&self) -> (usize, usize) {
        (self.labels.len(), self.byte_len())
    }

    pub fn labels(&self) -> usize {
        self.labels.len()
    }

    pub fn byte_len(&self) -> usize {
        self.labels.iter().map(|l| l.len() + 1).sum()
    }

    pub fn as_labels(&self) -> &[Vec<u8>] {
        &self.labels
    }

    /// Build a name from labels given in left-to-right (most-specific-first)
    /// order, lowercasing each one. The final label must be empty (the root
    /// terminator) or absent, in which case it is appended.
    pub fn from_labels(mut labels: Vec<Vec<u8>>) -> Option<Self> {
        if labels.last().map(|l| !l.is_empty()).unwrap_or(true) {
            labels.push(Vec::new());
        }

        let mut total = 0usize;
        for (i, label) in labels.iter().enumerate() {
            let is_last = i == labels.len() - 1;
            if label.is_empty() && !is_last {
                return None;
            }
            if label.len() > MAX_LABEL_LEN {
                return None;
            }
            total += label.len() + 1;
        }
        if total > MAX_NAME_LEN {
            return None;
        }

        let labels = labels
            .into_iter()
            .map(|label| label.iter().map(u8::to_ascii_lowercase).collect())
            .collect();

        Some(Name { labels })
    }

    /// Parse a dotted string such as `"www.example.com."`. A trailing dot is
    /// optional; `"."` is the root.
    pub fn from_dotted_string(s: &str) -> Option<Self> {
        if s == "." {
            return Some(Self::root());
        }

        let s = s.strip_suffix('.').unwrap_or(s);
        let chunks: Vec<&str> = s.split('.').collect();
        let mut labels = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            if chunk.is_empty() {
                return None;
            }
            if !chunk.is_ascii() {
                return None;
            }
            labels.push(chunk.as_bytes().to_vec());
        }

        Self::from_labels(labels)
    }

    pub fn to_dotted_string(&self) -> String {
        if self.is_root() {
            return ".".to_string();
        }

        let mut out = String::with_capacity(self.byte_len());
        for label in &self.labels[..self.labels.len() - 1] {
            out.push_str(&String::from_utf8_lossy(label));
            out.push('.');
        }
        out
    }

    /// `cmp(a, b) -> (ord, matched_labels)`: compare two names right-to-left,
    /// label by label, in case-insensitive canonical DNS order.
    /// `matched_labels` counts the trailing labels equal on both sides; the
    /// root label always matches, so `matched >= 1`.
    pub fn cmp(a: &Name, b: &Name) -> (Ordering, usize) {
        let mut ia = a.labels.len();
        let mut ib = b.labels.len();
        let mut matched = 0usize;

        while ia > 0 && ib > 0 {
            ia -= 1;
            ib -= 1;
            let ord = a.labels[ia].cmp(&b.labels[ib]);
            if ord != Ordering::Equal {
                return (ord, matched);
            }
            matched += 1;
        }

        (a.labels.len().cmp(&b.labels.len()), matched)
    }

    /// `strict_subdomain(a, b) -> bool`: true iff `a` is a proper descendant
    /// of `b` (every label of `b` matches a`'s trailing labels, and `a` has
    /// strictly more labels).
    pub fn strict_subdomain(a: &Name, b: &Name) -> bool {
        let (ord, matched) = Self::cmp(a, b);
        ord != Ordering::Equal && matched == b.labels.len() && a.labels.len() > b.labels.len()
    }

    /// True iff `a` is `b`, or a descendant of `b`.
    pub fn is_subdomain_of(&self, other: &Name) -> bool {
        let (ord, matched) = Self::cmp(self, other);
        ord == Ordering::Equal || matched == other.labels.len()
    }
}

impl Ord for Name {
    fn cmp(&self, other: &Self) -> Ordering {
        Name::cmp(self, other).0
    }
}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Name").field(&self.to_dotted_string()).finish()
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_dotted_string())
    }
}

#[cfg(any(feature = "test-util", test))]
pub mod test_util {
    use super::Name;

    pub fn name(s: &str) -> Name {
        Name::from_dotted_string(s).unwrap_or_else(|| panic!("not a valid name: {s:?}"))
    }
}
