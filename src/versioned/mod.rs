//! Persistent, branchable key-value store for one symbol.
//!
//! A `VersionedMap` maps tuples to values with a symbol-supplied default
//! standing for "absent". Internally it is a persistent hash-array-mapped
//! trie: every `commit` retains the current root and reuses all unchanged
//! subtrees, so committing is O(1) in map size and restoring any previously
//! committed version is a pointer swap. Restoring is the only way to undo
//! uncommitted writes.

mod cursor;
pub(crate) mod node;

pub use cursor::{DiffCursor, DiffEntry, MapCursor};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ContractError, MorphResult};
use crate::symbol::Symbol;
use crate::tuple::Tuple;
use crate::value::Value;

use node::Node;

/// Immutable snapshot identifier of a map's (or whole model's) content.
///
/// Versions are store-local and monotonically increasing; they are opaque
/// tokens apart from equality and ordering.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// Creates a version token from its raw representation.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw representation.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[derive(Clone)]
struct Snapshot {
    root: Option<Arc<Node>>,
    len: usize,
}

/// Persistent map from `Tuple` to `Value` with commit/restore/diff.
pub struct VersionedMap {
    symbol: Symbol,
    root: Option<Arc<Node>>,
    len: usize,
    dirty: bool,
    current: Option<Version>,
    committed: BTreeMap<Version, Snapshot>,
    next_version: u64,
}

impl VersionedMap {
    /// Creates an empty map for the given symbol.
    #[must_use]
    pub fn new(symbol: &Symbol) -> Self {
        Self {
            symbol: symbol.clone(),
            root: None,
            len: 0,
            dirty: false,
            current: None,
            committed: BTreeMap::new(),
            next_version: 0,
        }
    }

    /// Seeds a map positioned at an already-committed snapshot.
    pub(crate) fn from_snapshot(
        symbol: &Symbol,
        version: Version,
        root: Option<Arc<Node>>,
        len: usize,
    ) -> Self {
        let mut committed = BTreeMap::new();
        committed.insert(
            version,
            Snapshot {
                root: root.clone(),
                len,
            },
        );
        Self {
            symbol: symbol.clone(),
            root,
            len,
            dirty: false,
            current: Some(version),
            committed,
            next_version: version.raw() + 1,
        }
    }

    /// Returns the symbol this map stores.
    #[must_use]
    pub const fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Returns the number of stored (non-default) entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no entry is stored.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the version the working content equals, if it is committed.
    #[must_use]
    pub const fn current_version(&self) -> Option<Version> {
        self.current
    }

    /// Returns true if there are writes not captured by any version.
    #[must_use]
    pub const fn has_uncommitted_changes(&self) -> bool {
        self.dirty
    }

    /// Returns true if the given version was committed on this map.
    #[must_use]
    pub fn has_version(&self, version: Version) -> bool {
        self.committed.contains_key(&version)
    }

    fn check_arity(&self, key: &Tuple) -> MorphResult<()> {
        if key.arity() != self.symbol.arity() {
            return Err(ContractError::ArityMismatch {
                symbol: self.symbol.name().to_string(),
                expected: self.symbol.arity(),
                actual: key.arity(),
            }
            .into());
        }
        Ok(())
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
        self.current = None;
    }

    /// Writes `value` under `key`, returning the previous value.
    ///
    /// Writing the symbol's default value removes the key; writing the
    /// default to an absent key is a no-op and does not grow storage.
    pub fn put(&mut self, key: Tuple, value: Value) -> MorphResult<Value> {
        self.check_arity(&key)?;
        let hash = key.stable_hash64();
        let default = self.symbol.default_value().clone();

        if value == default {
            match self.root.take() {
                None => Ok(default),
                Some(root) => match node::remove(&root, 0, hash, &key) {
                    None => {
                        self.root = Some(root);
                        Ok(default)
                    }
                    Some((new_root, old)) => {
                        self.root = new_root;
                        self.len -= 1;
                        self.mark_dirty();
                        Ok(old)
                    }
                },
            }
        } else {
            let (new_root, old) = match self.root.take() {
                Some(root) => node::insert(&root, 0, hash, key, value.clone()),
                None => (
                    Arc::new(Node::Leaf {
                        hash,
                        entries: vec![(key, value.clone())],
                    }),
                    None,
                ),
            };
            self.root = Some(new_root);
            match old {
                Some(old) => {
                    if old != value {
                        self.mark_dirty();
                    }
                    Ok(old)
                }
                None => {
                    self.len += 1;
                    self.mark_dirty();
                    Ok(default)
                }
            }
        }
    }

    /// Reads the value under `key`; absent keys yield the default.
    pub fn get(&self, key: &Tuple) -> MorphResult<Value> {
        self.check_arity(key)?;
        Ok(self
            .root
            .as_ref()
            .and_then(|r| node::get(r, key.stable_hash64(), key))
            .cloned()
            .unwrap_or_else(|| self.symbol.default_value().clone()))
    }

    /// Commits the working content under the next free version.
    pub fn commit(&mut self) -> Version {
        let version = Version(self.next_version);
        self.store_snapshot(version);
        version
    }

    /// Commits the working content under an externally allocated version.
    ///
    /// Used by `Model` so all per-symbol maps share one state id.
    pub fn commit_at(&mut self, version: Version) -> MorphResult<()> {
        if self.committed.contains_key(&version) {
            return Err(ContractError::VersionReused { version }.into());
        }
        self.store_snapshot(version);
        Ok(())
    }

    fn store_snapshot(&mut self, version: Version) {
        self.committed.insert(
            version,
            Snapshot {
                root: self.root.clone(),
                len: self.len,
            },
        );
        self.current = Some(version);
        self.dirty = false;
        self.next_version = self.next_version.max(version.raw() + 1);
    }

    /// Restores the working content to a previously committed version.
    ///
    /// O(1): swaps the working root to the stored one. Discards any
    /// uncommitted writes.
    pub fn restore(&mut self, version: Version) -> MorphResult<()> {
        let snapshot = self
            .committed
            .get(&version)
            .ok_or(ContractError::UnknownVersion { version })?
            .clone();
        self.root = snapshot.root;
        self.len = snapshot.len;
        self.current = Some(version);
        self.dirty = false;
        Ok(())
    }

    /// Opens a cursor over the current working content.
    #[must_use]
    pub fn cursor(&self) -> MapCursor {
        MapCursor::new(self.root.clone())
    }

    /// Opens a cursor over the content of a committed version.
    pub fn cursor_at(&self, version: Version) -> MorphResult<MapCursor> {
        let snapshot = self
            .committed
            .get(&version)
            .ok_or(ContractError::UnknownVersion { version })?;
        Ok(MapCursor::new(snapshot.root.clone()))
    }

    /// Computes the differences between two committed versions.
    ///
    /// Yields exactly the keys whose values differ between `from` and `to`;
    /// subtrees shared by both snapshots are skipped without being walked.
    pub fn diff(&self, from: Version, to: Version) -> MorphResult<DiffCursor> {
        let a = self
            .committed
            .get(&from)
            .ok_or(ContractError::UnknownVersion { version: from })?;
        let b = self
            .committed
            .get(&to)
            .ok_or(ContractError::UnknownVersion { version: to })?;
        let mut raw = Vec::new();
        node::diff_nodes(a.root.as_ref(), b.root.as_ref(), 0, &mut raw);
        Ok(DiffCursor::new(raw, self.symbol.default_value()))
    }

    /// Returns the stored root for a committed version, for store snapshots.
    pub(crate) fn snapshot_of(&self, version: Version) -> Option<(Option<Arc<Node>>, usize)> {
        self.committed
            .get(&version)
            .map(|s| (s.root.clone(), s.len))
    }

    /// Adopts a snapshot committed elsewhere (a sibling model of the same
    /// store) and positions the working content on it.
    pub(crate) fn adopt_snapshot(
        &mut self,
        version: Version,
        root: Option<Arc<Node>>,
        len: usize,
    ) {
        self.committed
            .entry(version)
            .or_insert_with(|| Snapshot {
                root: root.clone(),
                len,
            });
        self.root = root;
        self.len = len;
        self.current = Some(version);
        self.dirty = false;
        self.next_version = self.next_version.max(version.raw() + 1);
    }
}

impl fmt::Debug for VersionedMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionedMap")
            .field("symbol", &self.symbol.name())
            .field("len", &self.len)
            .field("dirty", &self.dirty)
            .field("current", &self.current)
            .field("versions", &self.committed.len())
            .finish()
    }
}
