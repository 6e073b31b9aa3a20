//! Cursors over versioned-map content and version-to-version diffs.
//!
//! A cursor holds the root it was created from, so it stays stable while the
//! owning map keeps mutating: it always observes exactly the snapshot it was
//! opened on.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::tuple::Tuple;
use crate::value::Value;

use super::node::{Node, RawDiff};

/// Iterator over every live `(key, value)` entry of one snapshot.
pub struct MapCursor {
    stack: Vec<(Arc<Node>, usize)>,
}

impl MapCursor {
    pub(crate) fn new(root: Option<Arc<Node>>) -> Self {
        Self {
            stack: root.map(|r| vec![(r, 0)]).unwrap_or_default(),
        }
    }
}

impl Iterator for MapCursor {
    type Item = (Tuple, Value);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((node, idx)) = self.stack.pop() {
            match node.as_ref() {
                Node::Leaf { entries, .. } => {
                    if idx < entries.len() {
                        let item = entries[idx].clone();
                        self.stack.push((node, idx + 1));
                        return Some(item);
                    }
                }
                Node::Branch { children, .. } => {
                    if idx < children.len() {
                        let child = Arc::clone(&children[idx]);
                        self.stack.push((node, idx + 1));
                        self.stack.push((child, 0));
                    }
                }
            }
        }
        None
    }
}

/// One difference between two snapshots of the same symbol's map.
///
/// `old` and `new` are the values observed at the `from` and `to` versions;
/// a key absent on one side carries the symbol's default value there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEntry {
    /// The differing key.
    pub key: Tuple,
    /// Value at the `from` version.
    pub old: Value,
    /// Value at the `to` version.
    pub new: Value,
}

/// Cursor over the differences between two committed versions.
///
/// Yields only truly differing keys; subtrees shared between the two
/// snapshots are skipped without being walked.
pub struct DiffCursor {
    entries: std::vec::IntoIter<DiffEntry>,
}

impl DiffCursor {
    pub(crate) fn new(raw: Vec<RawDiff>, default: &Value) -> Self {
        let entries: Vec<DiffEntry> = raw
            .into_iter()
            .map(|(key, old, new)| DiffEntry {
                key,
                old: old.unwrap_or_else(|| default.clone()),
                new: new.unwrap_or_else(|| default.clone()),
            })
            .collect();
        Self {
            entries: entries.into_iter(),
        }
    }

    /// Returns the number of remaining differences.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no differences remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.len() == 0
    }
}

impl Iterator for DiffCursor {
    type Item = DiffEntry;

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next()
    }
}
