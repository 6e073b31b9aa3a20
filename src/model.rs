//! Models and model stores.
//!
//! A `Model` aggregates one `VersionedMap` per registered symbol into a
//! transactional unit: `commit` moves every map to the same new version and
//! `restore` moves them back together, all-or-nothing. The `ModelStore` owns
//! the symbol set and every version ever committed by any of its models, so
//! historical states can be reopened and diffed later.
//!
//! Object ids come from a monotonic counter held in a reserved nullary
//! symbol. The counter is versioned with everything else (restore rewinds
//! it) but never participates in state coding.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::{ContractError, MorphError, MorphResult};
use crate::symbol::{Symbol, SymbolId};
use crate::tuple::{NodeId, Tuple};
use crate::value::Value;
use crate::versioned::node::Node;
use crate::versioned::{DiffEntry, MapCursor, Version, VersionedMap};

fn lock_err(context: &'static str) -> MorphError {
    MorphError::internal(format!("poisoned lock: {context}"))
}

type MapSnapshot = (Option<Arc<Node>>, usize);

struct StateSnapshot {
    maps: Vec<MapSnapshot>,
    counter: MapSnapshot,
}

struct StoreInner {
    symbols: Vec<Symbol>,
    counter_symbol: Symbol,
    index: HashMap<SymbolId, usize>,
    excluded: HashSet<SymbolId>,
    individuals: BTreeSet<NodeId>,
    next_version: AtomicU64,
    states: RwLock<BTreeSet<Version>>,
    snapshots: RwLock<HashMap<Version, StateSnapshot>>,
}

/// Shared configuration and version history backing one or more models.
///
/// Committed versions are immutable and shared by reference, so independent
/// models created from the same store may run on separate threads as long as
/// each model's working mutations stay confined to its own thread.
#[derive(Clone)]
pub struct ModelStore {
    inner: Arc<StoreInner>,
}

/// Builder for a `ModelStore`.
pub struct ModelStoreBuilder {
    symbols: Vec<Symbol>,
    excluded: HashSet<SymbolId>,
    individuals: BTreeSet<NodeId>,
}

impl ModelStoreBuilder {
    fn new() -> Self {
        Self {
            symbols: Vec::new(),
            excluded: HashSet::new(),
            individuals: BTreeSet::new(),
        }
    }

    /// Registers a symbol with the store.
    #[must_use]
    pub fn symbol(mut self, symbol: &Symbol) -> Self {
        self.symbols.push(symbol.clone());
        self
    }

    /// Excludes a symbol from state coding and equivalence checking.
    ///
    /// Used for pure bookkeeping relations that must not affect isomorphism.
    #[must_use]
    pub fn exclude(mut self, symbol: &Symbol) -> Self {
        self.excluded.insert(symbol.id());
        self
    }

    /// Registers a named-constant node.
    ///
    /// Individuals exist in every model of the store and may only map to
    /// themselves during equivalence checking.
    #[must_use]
    pub fn individual(mut self, node: NodeId) -> Self {
        self.individuals.insert(node);
        self
    }

    /// Builds the store.
    pub fn build(self) -> MorphResult<ModelStore> {
        let mut index = HashMap::new();
        for (i, symbol) in self.symbols.iter().enumerate() {
            if index.insert(symbol.id(), i).is_some() {
                return Err(ContractError::DuplicateSymbol {
                    symbol: symbol.name().to_string(),
                }
                .into());
            }
        }
        for id in &self.excluded {
            if !index.contains_key(id) {
                return Err(ContractError::UnknownSymbol {
                    symbol: id.to_string(),
                }
                .into());
            }
        }

        // Individuals are pre-allocated: fresh ids start above them.
        let first_free = self
            .individuals
            .iter()
            .next_back()
            .map_or(0, |n| i64::from(n.raw()) + 1);
        let counter_symbol = Symbol::new("<node-counter>", 0, Value::Int(first_free));

        Ok(ModelStore {
            inner: Arc::new(StoreInner {
                symbols: self.symbols,
                counter_symbol,
                index,
                excluded: self.excluded,
                individuals: self.individuals,
                next_version: AtomicU64::new(0),
                states: RwLock::new(BTreeSet::new()),
                snapshots: RwLock::new(HashMap::new()),
            }),
        })
    }
}

impl ModelStore {
    /// Starts building a store.
    #[must_use]
    pub fn builder() -> ModelStoreBuilder {
        ModelStoreBuilder::new()
    }

    /// Returns the registered symbols, in registration order.
    #[must_use]
    pub fn symbols(&self) -> &[Symbol] {
        &self.inner.symbols
    }

    /// Returns true if the symbol is excluded from state coding.
    #[must_use]
    pub fn is_excluded(&self, symbol: &Symbol) -> bool {
        self.inner.excluded.contains(&symbol.id())
    }

    /// Returns the registered individual (named-constant) nodes.
    #[must_use]
    pub fn individuals(&self) -> &BTreeSet<NodeId> {
        &self.inner.individuals
    }

    /// Returns every version ever committed by models of this store.
    #[must_use]
    pub fn states(&self) -> Vec<Version> {
        self.inner
            .states
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }

    /// Returns true if the given version was committed on this store.
    #[must_use]
    pub fn contains_state(&self, version: Version) -> bool {
        self.inner
            .states
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains(&version)
    }

    /// Creates a fresh, empty model backed by this store.
    #[must_use]
    pub fn create_model(&self) -> Model {
        Model {
            store: self.clone(),
            maps: self
                .inner
                .symbols
                .iter()
                .map(VersionedMap::new)
                .collect(),
            counter_map: VersionedMap::new(&self.inner.counter_symbol),
            current: None,
            pending: false,
            revision: 0,
        }
    }

    /// Reopens a committed state as a new model positioned at that version.
    pub fn model_at(&self, version: Version) -> MorphResult<Model> {
        let snapshots = self
            .inner
            .snapshots
            .read()
            .map_err(|_| lock_err("store.snapshots"))?;
        let snapshot = snapshots
            .get(&version)
            .ok_or(ContractError::UnknownVersion { version })?;

        let maps = self
            .inner
            .symbols
            .iter()
            .zip(snapshot.maps.iter())
            .map(|(symbol, (root, len))| {
                VersionedMap::from_snapshot(symbol, version, root.clone(), *len)
            })
            .collect();
        let (counter_root, counter_len) = snapshot.counter.clone();
        let counter_map = VersionedMap::from_snapshot(
            &self.inner.counter_symbol,
            version,
            counter_root,
            counter_len,
        );

        Ok(Model {
            store: self.clone(),
            maps,
            counter_map,
            current: Some(version),
            pending: false,
            revision: 0,
        })
    }

    fn allocate_version(&self) -> Version {
        Version::new(self.inner.next_version.fetch_add(1, Ordering::Relaxed))
    }

    fn register_commit(&self, version: Version, snapshot: StateSnapshot) -> MorphResult<()> {
        self.inner
            .snapshots
            .write()
            .map_err(|_| lock_err("store.snapshots"))?
            .insert(version, snapshot);
        self.inner
            .states
            .write()
            .map_err(|_| lock_err("store.states"))?
            .insert(version);
        Ok(())
    }

    fn snapshot_roots(&self, version: Version) -> MorphResult<Option<(Vec<MapSnapshot>, MapSnapshot)>> {
        let snapshots = self
            .inner
            .snapshots
            .read()
            .map_err(|_| lock_err("store.snapshots"))?;
        Ok(snapshots
            .get(&version)
            .map(|s| (s.maps.clone(), s.counter.clone())))
    }
}

impl fmt::Debug for ModelStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelStore")
            .field("symbols", &self.inner.symbols.len())
            .field("excluded", &self.inner.excluded.len())
            .field("individuals", &self.inner.individuals.len())
            .field("states", &self.states().len())
            .finish()
    }
}

/// One difference between two committed model states.
#[derive(Debug, Clone)]
pub struct ModelDelta {
    /// The symbol whose map differs.
    pub symbol: Symbol,
    /// The differing key.
    pub key: Tuple,
    /// Value at the `from` version.
    pub old: Value,
    /// Value at the `to` version.
    pub new: Value,
}

/// Cursor composing the per-symbol diffs between two model states.
pub struct ModelDiffCursor {
    entries: std::vec::IntoIter<ModelDelta>,
}

impl ModelDiffCursor {
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

impl Iterator for ModelDiffCursor {
    type Item = ModelDelta;

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next()
    }
}

/// A mutable working model over a store's symbol set.
pub struct Model {
    store: ModelStore,
    maps: Vec<VersionedMap>,
    counter_map: VersionedMap,
    current: Option<Version>,
    pending: bool,
    revision: u64,
}

impl Model {
    /// Returns the backing store.
    #[must_use]
    pub const fn store(&self) -> &ModelStore {
        &self.store
    }

    fn index_of(&self, symbol: &Symbol) -> MorphResult<usize> {
        self.store
            .inner
            .index
            .get(&symbol.id())
            .copied()
            .ok_or_else(|| {
                ContractError::UnknownSymbol {
                    symbol: symbol.name().to_string(),
                }
                .into()
            })
    }

    /// Reads the value of `symbol` at `key`.
    pub fn get(&self, symbol: &Symbol, key: &Tuple) -> MorphResult<Value> {
        let idx = self.index_of(symbol)?;
        self.maps[idx].get(key)
    }

    /// Writes the value of `symbol` at `key`, returning the previous value.
    pub fn put(&mut self, symbol: &Symbol, key: Tuple, value: Value) -> MorphResult<Value> {
        let idx = self.index_of(symbol)?;
        let old = self.maps[idx].put(key, value.clone())?;
        if old != value {
            self.pending = true;
            self.revision += 1;
        }
        Ok(old)
    }

    /// Opens a cursor over the current content of one symbol.
    pub fn cursor(&self, symbol: &Symbol) -> MorphResult<MapCursor> {
        let idx = self.index_of(symbol)?;
        Ok(self.maps[idx].cursor())
    }

    /// Returns the total number of stored tuples across all symbols.
    #[must_use]
    pub fn model_size(&self) -> usize {
        self.maps.iter().map(VersionedMap::len).sum()
    }

    /// Allocates a fresh object id.
    pub fn create_object(&mut self) -> MorphResult<NodeId> {
        let next = self
            .counter_map
            .get(&Tuple::empty())?
            .as_int()
            .ok_or_else(|| MorphError::internal("node counter holds a non-int value"))?;
        let id = u32::try_from(next)
            .map_err(|_| MorphError::internal("node id space exhausted"))?;
        self.counter_map.put(Tuple::empty(), Value::Int(next + 1))?;
        self.pending = true;
        self.revision += 1;
        Ok(NodeId::new(id))
    }

    /// Returns true if the given object id has been allocated.
    pub fn object_exists(&self, node: NodeId) -> MorphResult<bool> {
        let next = self
            .counter_map
            .get(&Tuple::empty())?
            .as_int()
            .ok_or_else(|| MorphError::internal("node counter holds a non-int value"))?;
        Ok(i64::from(node.raw()) < next)
    }

    /// Deletes an object: removes every tuple mentioning it, in all symbols.
    ///
    /// Returns the number of removed tuples. Deleting an id that was never
    /// created is a contract violation.
    pub fn delete_object(&mut self, node: NodeId) -> MorphResult<usize> {
        if !self.object_exists(node)? {
            return Err(ContractError::NoSuchObject { node }.into());
        }
        let mut removed = 0;
        for map in &mut self.maps {
            let keys: Vec<Tuple> = map
                .cursor()
                .filter(|(k, _)| k.contains(node))
                .map(|(k, _)| k)
                .collect();
            let default = map.symbol().default_value().clone();
            for key in keys {
                map.put(key, default.clone())?;
                removed += 1;
            }
        }
        if removed > 0 {
            self.pending = true;
            self.revision += 1;
        }
        Ok(removed)
    }

    /// Returns the version the working content equals, if committed.
    #[must_use]
    pub const fn current_version(&self) -> Option<Version> {
        self.current
    }

    /// Returns true if any symbol map has writes not captured by a version.
    #[must_use]
    pub fn has_uncommitted_changes(&self) -> bool {
        self.counter_map.has_uncommitted_changes()
            || self.maps.iter().any(VersionedMap::has_uncommitted_changes)
    }

    /// Commits every symbol map under one new version.
    pub fn commit(&mut self) -> MorphResult<Version> {
        let version = self.store.allocate_version();
        for map in &mut self.maps {
            map.commit_at(version)?;
        }
        self.counter_map.commit_at(version)?;

        let maps = self
            .maps
            .iter()
            .map(|m| {
                m.snapshot_of(version)
                    .ok_or_else(|| MorphError::internal("missing snapshot for committed version"))
            })
            .collect::<MorphResult<Vec<_>>>()?;
        let counter = self
            .counter_map
            .snapshot_of(version)
            .ok_or_else(|| MorphError::internal("missing snapshot for committed version"))?;
        self.store
            .register_commit(version, StateSnapshot { maps, counter })?;

        self.current = Some(version);
        Ok(version)
    }

    /// Restores every symbol map to a committed version, atomically.
    ///
    /// If the version is unknown the model is left untouched; a partial
    /// restore is never observable.
    pub fn restore(&mut self, version: Version) -> MorphResult<()> {
        let local = self.counter_map.has_version(version)
            && self.maps.iter().all(|m| m.has_version(version));

        if local {
            for map in &mut self.maps {
                map.restore(version)?;
            }
            self.counter_map.restore(version)?;
        } else {
            // The version may have been committed by a sibling model of the
            // same store; adopt its snapshot wholesale or fail untouched.
            let (maps, counter) = self
                .store
                .snapshot_roots(version)?
                .ok_or(ContractError::UnknownVersion { version })?;
            for (map, (root, len)) in self.maps.iter_mut().zip(maps) {
                map.adopt_snapshot(version, root, len);
            }
            let (root, len) = counter;
            self.counter_map.adopt_snapshot(version, root, len);
        }

        self.current = Some(version);
        self.pending = true;
        self.revision += 1;
        Ok(())
    }

    /// Composes per-symbol diffs between two committed states into one cursor.
    pub fn get_diff_cursor(&self, from: Version, to: Version) -> MorphResult<ModelDiffCursor> {
        let mut entries = Vec::new();
        for (symbol, map) in self.store.inner.symbols.iter().zip(self.maps.iter()) {
            for DiffEntry { key, old, new } in map.diff(from, to)? {
                entries.push(ModelDelta {
                    symbol: symbol.clone(),
                    key,
                    old,
                    new,
                });
            }
        }
        Ok(ModelDiffCursor {
            entries: entries.into_iter(),
        })
    }

    /// Marks pending writes visible to pattern matchers.
    ///
    /// Returns true if there were unflushed changes. Matchers must be
    /// re-queried only after this returns.
    pub fn flush_changes(&mut self) -> bool {
        std::mem::take(&mut self.pending)
    }

    /// Monotonic revision counter, bumped on every observable change.
    ///
    /// Matchers may cache their result per revision.
    #[must_use]
    pub const fn revision(&self) -> u64 {
        self.revision
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("symbols", &self.maps.len())
            .field("size", &self.model_size())
            .field("current", &self.current)
            .field("dirty", &self.has_uncommitted_changes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person_store() -> (ModelStore, Symbol, Symbol) {
        let person = Symbol::new("person", 1, Value::Bool(false));
        let friend = Symbol::new("friend", 2, Value::Bool(false));
        let store = ModelStore::builder()
            .symbol(&person)
            .symbol(&friend)
            .build()
            .unwrap();
        (store, person, friend)
    }

    #[test]
    fn test_builder_rejects_duplicate_symbol() {
        let person = Symbol::new("person", 1, Value::Bool(false));
        let err = ModelStore::builder()
            .symbol(&person)
            .symbol(&person)
            .build()
            .unwrap_err();
        assert!(err.is_contract());
    }

    #[test]
    fn test_builder_rejects_unknown_exclusion() {
        let person = Symbol::new("person", 1, Value::Bool(false));
        let other = Symbol::new("other", 1, Value::Bool(false));
        let err = ModelStore::builder()
            .symbol(&person)
            .exclude(&other)
            .build()
            .unwrap_err();
        assert!(err.is_contract());
    }

    #[test]
    fn test_unknown_symbol_is_contract_error() {
        let (store, _, _) = person_store();
        let stranger = Symbol::new("stranger", 1, Value::Bool(false));
        let model = store.create_model();
        let err = model.get(&stranger, &Tuple::unary(NodeId::new(0))).unwrap_err();
        assert!(err.is_contract());
    }

    #[test]
    fn test_create_object_is_monotonic_and_versioned() {
        let (store, person, _) = person_store();
        let mut model = store.create_model();

        let a = model.create_object().unwrap();
        let b = model.create_object().unwrap();
        assert_ne!(a, b);
        model.put(&person, Tuple::unary(a), Value::Bool(true)).unwrap();
        let v1 = model.commit().unwrap();

        let c = model.create_object().unwrap();
        assert_ne!(c, b);
        model.commit().unwrap();

        // Restore rewinds the counter: the next id repeats c.
        model.restore(v1).unwrap();
        let c2 = model.create_object().unwrap();
        assert_eq!(c2, c);
    }

    #[test]
    fn test_commit_restore_is_atomic_across_symbols() {
        let (store, person, friend) = person_store();
        let mut model = store.create_model();

        let a = model.create_object().unwrap();
        let b = model.create_object().unwrap();
        model.put(&person, Tuple::unary(a), Value::Bool(true)).unwrap();
        let v1 = model.commit().unwrap();

        model.put(&person, Tuple::unary(b), Value::Bool(true)).unwrap();
        model.put(&friend, Tuple::pair(a, b), Value::Bool(true)).unwrap();
        let v2 = model.commit().unwrap();

        model.restore(v1).unwrap();
        assert_eq!(model.get(&person, &Tuple::unary(b)).unwrap(), Value::Bool(false));
        assert_eq!(model.get(&friend, &Tuple::pair(a, b)).unwrap(), Value::Bool(false));

        model.restore(v2).unwrap();
        assert_eq!(model.get(&person, &Tuple::unary(b)).unwrap(), Value::Bool(true));
        assert_eq!(model.get(&friend, &Tuple::pair(a, b)).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_failed_restore_leaves_all_symbols_unchanged() {
        let (store, person, friend) = person_store();
        let mut model = store.create_model();

        let a = model.create_object().unwrap();
        model.put(&person, Tuple::unary(a), Value::Bool(true)).unwrap();
        model.commit().unwrap();
        model
            .put(&friend, Tuple::pair(a, a), Value::Bool(true))
            .unwrap();

        let err = model.restore(Version::new(9999)).unwrap_err();
        assert!(err.is_contract());

        // Uncommitted writes survive the failed restore; nothing moved.
        assert_eq!(model.get(&person, &Tuple::unary(a)).unwrap(), Value::Bool(true));
        assert_eq!(model.get(&friend, &Tuple::pair(a, a)).unwrap(), Value::Bool(true));
        assert!(model.has_uncommitted_changes());
    }

    #[test]
    fn test_store_tracks_states_across_models() {
        let (store, person, _) = person_store();
        let mut model = store.create_model();
        let a = model.create_object().unwrap();
        model.put(&person, Tuple::unary(a), Value::Bool(true)).unwrap();
        let v1 = model.commit().unwrap();

        assert_eq!(store.states(), vec![v1]);
        assert!(store.contains_state(v1));

        // A sibling model can reopen the committed state.
        let sibling = store.model_at(v1).unwrap();
        assert_eq!(sibling.get(&person, &Tuple::unary(a)).unwrap(), Value::Bool(true));
        assert_eq!(sibling.current_version(), Some(v1));
    }

    #[test]
    fn test_sibling_model_can_restore_foreign_version() {
        let (store, person, _) = person_store();
        let mut model = store.create_model();
        let a = model.create_object().unwrap();
        model.put(&person, Tuple::unary(a), Value::Bool(true)).unwrap();
        let v1 = model.commit().unwrap();

        let mut sibling = store.create_model();
        sibling.restore(v1).unwrap();
        assert_eq!(sibling.get(&person, &Tuple::unary(a)).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_model_diff_cursor_composes_symbols() {
        let (store, person, friend) = person_store();
        let mut model = store.create_model();

        let a = model.create_object().unwrap();
        let b = model.create_object().unwrap();
        let v1 = model.commit().unwrap();

        model.put(&person, Tuple::unary(a), Value::Bool(true)).unwrap();
        model.put(&friend, Tuple::pair(a, b), Value::Bool(true)).unwrap();
        let v2 = model.commit().unwrap();

        let deltas: Vec<_> = model.get_diff_cursor(v1, v2).unwrap().collect();
        assert_eq!(deltas.len(), 2);
        assert!(deltas.iter().any(|d| d.symbol == person && d.key == Tuple::unary(a)));
        assert!(deltas.iter().any(|d| d.symbol == friend && d.key == Tuple::pair(a, b)));
    }

    #[test]
    fn test_delete_object_cascades() {
        let (store, person, friend) = person_store();
        let mut model = store.create_model();

        let a = model.create_object().unwrap();
        let b = model.create_object().unwrap();
        model.put(&person, Tuple::unary(a), Value::Bool(true)).unwrap();
        model.put(&friend, Tuple::pair(a, b), Value::Bool(true)).unwrap();
        model.put(&friend, Tuple::pair(b, b), Value::Bool(true)).unwrap();

        let removed = model.delete_object(a).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(model.get(&friend, &Tuple::pair(b, b)).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_delete_unknown_object_is_contract_error() {
        let (store, _, _) = person_store();
        let mut model = store.create_model();
        let err = model.delete_object(NodeId::new(17)).unwrap_err();
        assert!(err.is_contract());
    }

    #[test]
    fn test_individuals_preallocate_id_space() {
        let person = Symbol::new("person", 1, Value::Bool(false));
        let store = ModelStore::builder()
            .symbol(&person)
            .individual(NodeId::new(0))
            .individual(NodeId::new(1))
            .build()
            .unwrap();

        let mut model = store.create_model();
        assert!(model.object_exists(NodeId::new(0)).unwrap());
        assert!(model.object_exists(NodeId::new(1)).unwrap());
        assert!(!model.object_exists(NodeId::new(2)).unwrap());
        assert_eq!(model.create_object().unwrap(), NodeId::new(2));
    }

    #[test]
    fn test_flush_changes_reports_pending_writes() {
        let (store, person, _) = person_store();
        let mut model = store.create_model();
        assert!(!model.flush_changes());

        let a = model.create_object().unwrap();
        model.put(&person, Tuple::unary(a), Value::Bool(true)).unwrap();
        assert!(model.flush_changes());
        assert!(!model.flush_changes());

        // An overwrite with the same value is not a change.
        let before = model.revision();
        model.put(&person, Tuple::unary(a), Value::Bool(true)).unwrap();
        assert_eq!(model.revision(), before);
        assert!(!model.flush_changes());
    }
}
