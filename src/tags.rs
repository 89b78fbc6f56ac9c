//! Ordered tag sets shared by nodes, relays, and users.
//!
//! Tags are stored in the database as a single colon-delimited column
//! (e.g. `"cn:edu:b"`). Both entities compose a [`TagSet`] instead of
//! inheriting parsing behaviour.

use std::collections::BTreeSet;
use std::fmt;

/// An ordered, deduplicated set of string tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet(BTreeSet<String>);

impl TagSet {
    /// Create an empty tag set.
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Parse a colon-delimited tag column. `None`, empty, and
    /// whitespace-only input all yield an empty set.
    pub fn parse(raw: Option<&str>) -> Self {
        let mut tags = BTreeSet::new();
        if let Some(raw) = raw {
            for part in raw.split(':') {
                let part = part.trim();
                if !part.is_empty() {
                    tags.insert(part.to_string());
                }
            }
        }
        Self(tags)
    }

    /// Serialize back to the colon-delimited column form.
    pub fn to_column(&self) -> String {
        self.0.iter().cloned().collect::<Vec<_>>().join(":")
    }

    /// True if every tag in `self` is also in `other`.
    pub fn is_subset(&self, other: &TagSet) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains(tag)
    }

    pub fn insert(&mut self, tag: impl Into<String>) {
        self.0.insert(tag.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_column())
    }
}

impl FromIterator<String> for TagSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> FromIterator<&'a str> for TagSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self(iter.into_iter().map(String::from).collect())
    }
}
