//! Design-space exploration engine.
//!
//! The adapter drives the fire/propagate/check/code cycle over a model, the
//! strategies decide traversal order, and the runtime hosts independent
//! explorations on bounded worker pools.

mod adapter;
mod runtime;
mod strategy;

pub use adapter::{AdapterBuilder, DesignSpaceAdapter, StepOutcome};
pub use runtime::{ExplorationHandle, ExplorationRuntime, RuntimeConfig};
pub use strategy::{BestFirstStrategy, DepthFirstStrategy, Strategy};

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ContractError, MorphResult};
use crate::model::Model;
use crate::objectives::{Fitness, ObjectiveComparatorHelper};
use crate::versioned::Version;

/// Stable identifier for one exploration session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExplorationId(Uuid);

impl ExplorationId {
    /// Creates a new random exploration ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ExplorationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExplorationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resource limits for one exploration.
///
/// `None` means unbounded. The depth limit stops descent, not the search;
/// the solution and duration limits terminate the whole exploration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ExplorationLimits {
    /// Maximum trajectory depth strategies may descend to.
    pub max_depth: Option<usize>,
    /// Stop after this many recorded solutions.
    pub max_solutions: Option<usize>,
    /// Wall-clock budget in milliseconds.
    pub max_duration_ms: Option<u64>,
}

impl ExplorationLimits {
    /// Validates the limit combination.
    pub fn validate(&self) -> MorphResult<()> {
        if self.max_solutions == Some(0) {
            return Err(ContractError::InvalidLimits {
                reason: "max_solutions must be at least 1".to_string(),
            }
            .into());
        }
        if self.max_duration_ms == Some(0) {
            return Err(ContractError::InvalidLimits {
                reason: "max_duration_ms must be at least 1".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// A predicate every accepted state must satisfy.
pub trait GlobalConstraint: Send + Sync {
    /// Returns the constraint's name, used in rejection reporting.
    fn name(&self) -> &str;

    /// Returns true if the current state satisfies the constraint.
    fn check(&self, model: &Model) -> MorphResult<bool>;
}

/// Adapter turning a closure into a `GlobalConstraint`.
pub struct FnConstraint<F> {
    name: String,
    f: F,
}

impl<F> FnConstraint<F>
where
    F: Fn(&Model) -> MorphResult<bool> + Send + Sync,
{
    /// Wraps a closure as a constraint.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> GlobalConstraint for FnConstraint<F>
where
    F: Fn(&Model) -> MorphResult<bool> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, model: &Model) -> MorphResult<bool> {
        (self.f)(model)
    }
}

/// One recorded solution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolutionRecord {
    /// The committed version holding the solution state.
    pub version: Version,
    /// Depth (accepted firings) at which it was found.
    pub depth: usize,
    /// Trajectory from the root to the solution.
    pub trajectory: Vec<Version>,
    /// Fitness evaluated on the solution state.
    pub fitness: Fitness,
    /// Discovery time.
    pub found_at: DateTime<Utc>,
}

/// Collected solutions of one exploration, retrievable by index.
#[derive(Debug, Default)]
pub struct SolutionStore {
    records: Vec<SolutionRecord>,
}

impl SolutionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a solution. Duplicate versions are ignored.
    pub fn push(&mut self, record: SolutionRecord) {
        if self.records.iter().any(|r| r.version == record.version) {
            return;
        }
        self.records.push(record);
    }

    /// Returns the solution at `index`, in discovery order.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&SolutionRecord> {
        self.records.get(index)
    }

    /// Iterates solutions in discovery order.
    pub fn iter(&self) -> std::slice::Iter<'_, SolutionRecord> {
        self.records.iter()
    }

    /// Returns the number of recorded solutions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no solution was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the best solution under the given comparator.
    #[must_use]
    pub fn best(&self, comparator: &ObjectiveComparatorHelper) -> Option<&SolutionRecord> {
        self.records.iter().reduce(|best, candidate| {
            if comparator.compare(&candidate.fitness, &best.fitness) == std::cmp::Ordering::Greater
            {
                candidate
            } else {
                best
            }
        })
    }
}

impl<'a> IntoIterator for &'a SolutionStore {
    type Item = &'a SolutionRecord;
    type IntoIter = std::slice::Iter<'a, SolutionRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Why an exploration stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplorationOutcome {
    /// The whole reachable, non-pruned space was visited. An empty solution
    /// set with this outcome is a valid result, not an error.
    Exhausted,
    /// The solution limit was reached.
    SolutionLimitReached,
    /// The wall-clock budget ran out.
    TimedOut,
    /// The owner cancelled the exploration.
    Cancelled,
}

impl fmt::Display for ExplorationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Exhausted => "exhausted",
            Self::SolutionLimitReached => "solution limit reached",
            Self::TimedOut => "timed out",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Summary of one finished exploration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorationReport {
    /// Exploration identity.
    pub id: ExplorationId,
    /// Why the exploration stopped.
    pub outcome: ExplorationOutcome,
    /// Number of recorded solutions.
    pub solutions: usize,
    /// Accepted (committed) states, the root excluded.
    pub states_accepted: usize,
    /// States pruned as isomorphic to an already-visited state.
    pub states_pruned: usize,
    /// Propagation and constraint rejections.
    pub rejections: usize,
    /// Activations whose action rejected its binding.
    pub failed_activations: usize,
    /// Wall time of the exploration.
    pub elapsed_ms: u64,
}

impl ExplorationReport {
    /// Serializes the report for CLI tooling.
    pub fn to_json(&self) -> MorphResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| crate::error::MorphError::internal(format!("report serialization: {e}")))
    }
}
