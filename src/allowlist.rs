use serde::{Deserialize, Serialize};

use crate::gate::normalize_line;

/// Ordered list of allowlisted command lines.
///
/// Entries keep insertion order and are never deduplicated. They are stored
/// as written in the config file; comparisons always go through
/// [`normalize_line`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Allowlist(Vec<String>);

impl Allowlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Appends `entry` in normalized form and returns what was stored.
    pub fn push(&mut self, entry: &str) -> &str {
        self.0.push(normalize_line(entry));
        &self.0[self.0.len() - 1]
    }

    /// Removes every entry whose normalized form equals the normalized
    /// `entry`, returning how many were removed.
    pub fn remove_matching(&mut self, entry: &str) -> usize {
        let target = normalize_line(entry);
        let before = self.0.len();
        self.0.retain(|e| normalize_line(e) != target);
        before - self.0.len()
    }
}

impl From<Vec<String>> for Allowlist {
    fn from(entries: Vec<String>) -> Self {
        Self(entries)
    }
}

impl<'a> IntoIterator for &'a Allowlist {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
