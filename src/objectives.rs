//! Objectives, fitness, and state ranking.
//!
//! Each evaluated state receives a `Fitness`: a named-metric map plus a flag
//! saying whether every hard objective holds. Objectives are grouped into
//! priority levels: all level-0 objectives are compared first as one
//! multi-dimensional value, and only on a tie does the next level apply.
//! Within a level, dimensions are folded either by sum or by Pareto
//! dominance.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::MorphResult;
use crate::model::Model;

/// Whether larger or smaller metric values are better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectiveDirection {
    /// Smaller values win.
    Minimize,
    /// Larger values win.
    Maximize,
}

/// One ranking dimension evaluated per state.
pub trait Objective: Send + Sync {
    /// Returns the metric name this objective reports under.
    fn name(&self) -> &str;

    /// Returns the priority level; lower levels are compared first.
    fn level(&self) -> usize {
        0
    }

    /// Returns the comparison direction.
    fn direction(&self) -> ObjectiveDirection {
        ObjectiveDirection::Minimize
    }

    /// Returns true if this objective gates solution acceptance.
    fn is_hard(&self) -> bool {
        false
    }

    /// Computes the metric value for the current state.
    fn evaluate(&self, model: &Model) -> MorphResult<f64>;

    /// For hard objectives: returns true if the state satisfies it.
    fn satisfies_hard(&self, _model: &Model) -> MorphResult<bool> {
        Ok(true)
    }
}

/// Closure-backed objective.
pub struct FnObjective {
    name: String,
    level: usize,
    direction: ObjectiveDirection,
    hard: bool,
    eval: Box<dyn Fn(&Model) -> MorphResult<f64> + Send + Sync>,
    check: Option<Box<dyn Fn(&Model) -> MorphResult<bool> + Send + Sync>>,
}

impl FnObjective {
    /// Creates a soft, level-0, minimizing objective from a closure.
    pub fn new(
        name: impl Into<String>,
        eval: impl Fn(&Model) -> MorphResult<f64> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            level: 0,
            direction: ObjectiveDirection::Minimize,
            hard: false,
            eval: Box::new(eval),
            check: None,
        }
    }

    /// Sets the priority level.
    #[must_use]
    pub fn level(mut self, level: usize) -> Self {
        self.level = level;
        self
    }

    /// Sets the comparison direction.
    #[must_use]
    pub fn direction(mut self, direction: ObjectiveDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Marks the objective hard, gated by the given predicate.
    #[must_use]
    pub fn hard(
        mut self,
        check: impl Fn(&Model) -> MorphResult<bool> + Send + Sync + 'static,
    ) -> Self {
        self.hard = true;
        self.check = Some(Box::new(check));
        self
    }
}

impl Objective for FnObjective {
    fn name(&self) -> &str {
        &self.name
    }

    fn level(&self) -> usize {
        self.level
    }

    fn direction(&self) -> ObjectiveDirection {
        self.direction
    }

    fn is_hard(&self) -> bool {
        self.hard
    }

    fn evaluate(&self, model: &Model) -> MorphResult<f64> {
        (self.eval)(model)
    }

    fn satisfies_hard(&self, model: &Model) -> MorphResult<bool> {
        match &self.check {
            Some(check) => check(model),
            None => Ok(true),
        }
    }
}

/// Evaluated metrics of one state.
///
/// Created fresh per evaluated state and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fitness {
    metrics: BTreeMap<String, f64>,
    satisfies_hard: bool,
}

impl Fitness {
    /// Creates a fitness from evaluated metrics.
    #[must_use]
    pub const fn new(metrics: BTreeMap<String, f64>, satisfies_hard: bool) -> Self {
        Self {
            metrics,
            satisfies_hard,
        }
    }

    /// Reads one metric by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    /// Returns all metrics.
    #[must_use]
    pub const fn metrics(&self) -> &BTreeMap<String, f64> {
        &self.metrics
    }

    /// Returns true if every hard objective held on the evaluated state.
    #[must_use]
    pub const fn satisfies_hard_objectives(&self) -> bool {
        self.satisfies_hard
    }
}

impl fmt::Display for Fitness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.metrics.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {value}")?;
        }
        write!(f, "}} hard={}", self.satisfies_hard)
    }
}

/// How one level's dimensions are folded into a single comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LevelAggregation {
    /// Compare the sum of normalized dimension values.
    Sum,
    /// Compare by Pareto dominance; incomparable states tie.
    Pareto,
}

/// Groups objectives into priority levels and compares fitnesses levelwise.
pub struct LeveledObjectivesHelper {
    levels: Vec<Vec<Arc<dyn Objective>>>,
    aggregation: LevelAggregation,
}

impl LeveledObjectivesHelper {
    /// Groups the given objectives by their `level()`.
    #[must_use]
    pub fn new(objectives: &[Arc<dyn Objective>], aggregation: LevelAggregation) -> Self {
        let mut by_level: BTreeMap<usize, Vec<Arc<dyn Objective>>> = BTreeMap::new();
        for objective in objectives {
            by_level
                .entry(objective.level())
                .or_default()
                .push(Arc::clone(objective));
        }
        Self {
            levels: by_level.into_values().collect(),
            aggregation,
        }
    }

    /// Compares two fitnesses; `Greater` means `a` ranks better.
    #[must_use]
    pub fn compare(&self, a: &Fitness, b: &Fitness) -> Ordering {
        for level in &self.levels {
            let ordering = match self.aggregation {
                LevelAggregation::Sum => compare_sum(level, a, b),
                LevelAggregation::Pareto => compare_pareto(level, a, b),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

/// Normalized metric: higher is always better.
fn normalized(objective: &dyn Objective, fitness: &Fitness) -> f64 {
    let raw = fitness.get(objective.name()).unwrap_or(0.0);
    match objective.direction() {
        ObjectiveDirection::Maximize => raw,
        ObjectiveDirection::Minimize => -raw,
    }
}

fn compare_sum(level: &[Arc<dyn Objective>], a: &Fitness, b: &Fitness) -> Ordering {
    let sum_a: f64 = level.iter().map(|o| normalized(o.as_ref(), a)).sum();
    let sum_b: f64 = level.iter().map(|o| normalized(o.as_ref(), b)).sum();
    sum_a.partial_cmp(&sum_b).unwrap_or(Ordering::Equal)
}

fn compare_pareto(level: &[Arc<dyn Objective>], a: &Fitness, b: &Fitness) -> Ordering {
    let mut a_better = false;
    let mut b_better = false;
    for objective in level {
        let va = normalized(objective.as_ref(), a);
        let vb = normalized(objective.as_ref(), b);
        match va.partial_cmp(&vb) {
            Some(Ordering::Greater) => a_better = true,
            Some(Ordering::Less) => b_better = true,
            _ => {}
        }
    }
    match (a_better, b_better) {
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

/// Evaluates all objectives into a `Fitness` and compares states.
pub struct ObjectiveComparatorHelper {
    objectives: Vec<Arc<dyn Objective>>,
    leveled: LeveledObjectivesHelper,
}

impl ObjectiveComparatorHelper {
    /// Creates a comparator over the given objectives.
    #[must_use]
    pub fn new(objectives: Vec<Arc<dyn Objective>>, aggregation: LevelAggregation) -> Self {
        let leveled = LeveledObjectivesHelper::new(&objectives, aggregation);
        Self {
            objectives,
            leveled,
        }
    }

    /// Evaluates every objective against the current state.
    pub fn calculate_fitness(&self, model: &Model) -> MorphResult<Fitness> {
        let mut metrics = BTreeMap::new();
        let mut satisfies_hard = true;
        for objective in &self.objectives {
            metrics.insert(objective.name().to_string(), objective.evaluate(model)?);
            if objective.is_hard() && !objective.satisfies_hard(model)? {
                satisfies_hard = false;
            }
        }
        Ok(Fitness::new(metrics, satisfies_hard))
    }

    /// Compares two fitnesses; `Greater` means `a` ranks better.
    #[must_use]
    pub fn compare(&self, a: &Fitness, b: &Fitness) -> Ordering {
        self.leveled.compare(a, b)
    }
}

impl fmt::Debug for ObjectiveComparatorHelper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectiveComparatorHelper")
            .field("objectives", &self.objectives.len())
            .finish_non_exhaustive()
    }
}
