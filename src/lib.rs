//! # morphspace - versioned model store and design-space exploration
//!
//! morphspace searches the space of concrete graph-shaped models reachable
//! from a partial model by transformation-rule application, subject to global
//! constraints and multi-objective ranking, while pruning structurally
//! equivalent states.
//!
//! ## Core Concepts
//!
//! - **Symbol / Tuple / Value**: the relational vocabulary of a model
//! - **VersionedMap**: a persistent, structurally shared map with O(1)
//!   commit and restore
//! - **Model / ModelStore**: one map per symbol, committed and restored as a
//!   single transactional unit
//! - **StateCoder**: canonical state signatures for duplicate detection
//! - **DesignSpaceAdapter**: the fire/propagate/check/code search cycle
//! - **Strategy**: pluggable traversal (depth-first, best-first)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use morphspace::{
//!     DesignSpaceAdapter, DepthFirstStrategy, FnAction, FnMatcher, ModelStore,
//!     Rule, Symbol, Tuple, Value,
//! };
//!
//! let person = Symbol::new("person", 1, Value::Bool(false));
//! let store = ModelStore::builder().symbol(&person).build()?;
//!
//! let rule = Rule::new(
//!     "createPerson",
//!     Arc::new(FnMatcher::new(|_m| Ok(vec![Tuple::empty()]))),
//!     Arc::new(FnAction::new(move |m, _b| {
//!         let node = m.create_object()?;
//!         m.put(&person, Tuple::unary(node), Value::Bool(true))?;
//!         Ok(true)
//!     })),
//! );
//!
//! let mut adapter = DesignSpaceAdapter::builder(store.create_model())
//!     .rule(rule)
//!     .build()?;
//! let report = adapter.explore(&mut DepthFirstStrategy::new())?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Relational vocabulary and the store
pub mod cancel;
pub mod coder;
pub mod error;
pub mod model;
pub mod symbol;
pub mod tuple;
pub mod value;
pub mod versioned;

// Search machinery
pub mod dse;
pub mod objectives;
pub mod propagation;
pub mod rule;

// Re-export primary types at crate root for convenience
pub use cancel::CancellationToken;
pub use coder::{
    CoderConfig, EquivalenceResult, StateCode, StateCoder, StateEquivalenceChecker,
};
pub use error::{ContractError, ExplorationError, MorphError, MorphResult};
pub use model::{Model, ModelDelta, ModelDiffCursor, ModelStore, ModelStoreBuilder};
pub use symbol::{Symbol, SymbolId};
pub use tuple::{NodeId, Tuple};
pub use value::{TruthValue, Value};
pub use versioned::{DiffCursor, DiffEntry, MapCursor, Version, VersionedMap};

pub use dse::{
    AdapterBuilder, BestFirstStrategy, DepthFirstStrategy, DesignSpaceAdapter,
    ExplorationHandle, ExplorationId, ExplorationLimits, ExplorationOutcome, ExplorationReport,
    ExplorationRuntime, FnConstraint, GlobalConstraint, RuntimeConfig, SolutionRecord,
    SolutionStore, StepOutcome, Strategy,
};
pub use objectives::{
    Fitness, FnObjective, LevelAggregation, LeveledObjectivesHelper, Objective,
    ObjectiveComparatorHelper, ObjectiveDirection,
};
pub use propagation::{
    propagate_to_fixpoint, FnPropagator, PropagationOutcome, PropagationResult, Propagator,
};
pub use rule::{Activation, FnAction, FnMatcher, PatternMatcher, Rule, RuleAction, RuleId};
