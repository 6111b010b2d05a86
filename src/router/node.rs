//! Segment trie.
//!
//! Each node owns its static children keyed by literal text, at most one
//! named child and at most one wildcard. Lookup tries them in that order and
//! falls back to the next kind when a more specific branch dead-ends, so
//! `/users/list` beats `/users/:id` without hiding `/users/:id/posts`.

use std::collections::HashMap;
use std::sync::Arc;

use super::ConflictKind;
use super::path::Segment;
use crate::params::Params;

pub(crate) struct Node<T> {
    statics: HashMap<Box<str>, Node<T>>,
    named: Option<Box<Named<T>>>,
    wildcard: Option<Wildcard<T>>,
    leaf: Option<Leaf<T>>,
}

struct Named<T> {
    name: Arc<str>,
    // Pattern that first introduced this parameter, for conflict reports.
    origin: Box<str>,
    child: Node<T>,
}

struct Wildcard<T> {
    name: Arc<str>,
    leaf: Leaf<T>,
}

struct Leaf<T> {
    pattern: Box<str>,
    value: T,
}

/// Why an insert was refused, and which registered pattern refused it.
pub(crate) struct Conflict {
    pub(crate) kind: ConflictKind,
    pub(crate) existing: String,
}

impl<T> Node<T> {
    pub(crate) fn new() -> Self {
        Self {
            statics: HashMap::new(),
            named: None,
            wildcard: None,
            leaf: None,
        }
    }

    pub(crate) fn insert(
        &mut self,
        segments: &[Segment<'_>],
        pattern: &str,
        value: T,
    ) -> Result<(), Conflict> {
        let mut node = self;

        for seg in segments {
            node = match *seg {
                Segment::Static(text) => node.statics.entry(text.into()).or_insert_with(Node::new),

                Segment::Named(name) => {
                    if let Some(w) = &node.wildcard {
                        return Err(Conflict {
                            kind: ConflictKind::Wildcard,
                            existing: w.leaf.pattern.to_string(),
                        });
                    }
                    let named = node.named.get_or_insert_with(|| {
                        Box::new(Named {
                            name: Arc::from(name),
                            origin: pattern.into(),
                            child: Node::new(),
                        })
                    });
                    if &*named.name != name {
                        return Err(Conflict {
                            kind: ConflictKind::NamedParam,
                            existing: named.origin.to_string(),
                        });
                    }
                    &mut named.child
                }

                Segment::Wildcard(name) => {
                    if let Some(named) = &node.named {
                        return Err(Conflict {
                            kind: ConflictKind::Wildcard,
                            existing: named.origin.to_string(),
                        });
                    }
                    if let Some(w) = &node.wildcard {
                        let kind = if &*w.name == name {
                            ConflictKind::Duplicate
                        } else {
                            ConflictKind::Wildcard
                        };
                        return Err(Conflict { kind, existing: w.leaf.pattern.to_string() });
                    }
                    node.wildcard = Some(Wildcard {
                        name: Arc::from(name),
                        leaf: Leaf { pattern: pattern.into(), value },
                    });
                    return Ok(());
                }
            };
        }

        if let Some(leaf) = &node.leaf {
            return Err(Conflict {
                kind: ConflictKind::Duplicate,
                existing: leaf.pattern.to_string(),
            });
        }
        node.leaf = Some(Leaf { pattern: pattern.into(), value });
        Ok(())
    }

    /// Resolves `path` (normalized, without its leading `/`) below this node,
    /// pushing captures onto `params`.
    ///
    /// On failure `params` is left exactly as it was passed in.
    pub(crate) fn find<'n>(&'n self, path: &str, params: &mut Params) -> Option<&'n T> {
        if path.is_empty() {
            return self.leaf.as_ref().map(|leaf| &leaf.value);
        }

        let (seg, rest) = path.split_once('/').unwrap_or((path, ""));

        if let Some(child) = self.statics.get(seg) {
            if let Some(value) = child.find(rest, params) {
                return Some(value);
            }
        }

        if let Some(named) = self.named.as_deref().filter(|_| !seg.is_empty()) {
            let mark = params.len();
            params.push(&named.name, seg);
            if let Some(value) = named.child.find(rest, params) {
                return Some(value);
            }
            params.truncate(mark);
        }

        let wildcard = self.wildcard.as_ref()?;
        params.push(&wildcard.name, path);
        Some(&wildcard.leaf.value)
    }
}
