//! Path parameters captured by a single match.

use std::sync::Arc;

/// Ordered `(name, value)` captures, outer segments first.
///
/// Names are shared with the trie that produced them, so a match only
/// allocates for the captured values. Lookup is case-sensitive.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Params {
    entries: Vec<(Arc<str>, String)>,
}

impl Params {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Returns the value captured under `name`.
    ///
    /// For a pattern `/users/:id`, matching `/users/42` gives `get("id") == Some("42")`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| &**k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates captures in trie traversal order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (&**k, v.as_str()))
    }

    pub(crate) fn push(&mut self, name: &Arc<str>, value: &str) {
        self.entries.push((Arc::clone(name), value.to_owned()));
    }

    /// Drops captures pushed by an abandoned branch of the trie walk.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }

    /// Empties the list but keeps its allocation for the next request.
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}
