//! Traversal strategies over the adapter's primitives.
//!
//! A strategy is a pure driver: it asks the adapter for untraversed
//! activations, steps, and backtracks. The depth-first reference strategy
//! guarantees completeness over a finite activation space: every reachable,
//! non-pruned state is visited before the search terminates.

use std::cmp::Ordering;

use crate::error::MorphResult;
use crate::objectives::Fitness;
use crate::rule::Activation;

use super::adapter::DesignSpaceAdapter;
use super::ExplorationOutcome;

/// A pluggable traversal policy.
pub trait Strategy: Send {
    /// Returns the strategy's name, for reporting.
    fn name(&self) -> &str;

    /// Drives the adapter until a terminal outcome.
    fn explore(&mut self, adapter: &mut DesignSpaceAdapter) -> MorphResult<ExplorationOutcome>;
}

fn at_depth_limit(adapter: &DesignSpaceAdapter) -> bool {
    adapter
        .limits()
        .max_depth
        .map_or(false, |limit| adapter.depth() >= limit)
}

/// Depth-first search with full backtracking.
///
/// Always picks the first untraversed activation in deterministic (rule,
/// match) order, descends on acceptance, and backtracks on dead ends.
#[derive(Debug, Clone, Copy, Default)]
pub struct DepthFirstStrategy;

impl DepthFirstStrategy {
    /// Creates the strategy.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Strategy for DepthFirstStrategy {
    fn name(&self) -> &str {
        "depth-first"
    }

    fn explore(&mut self, adapter: &mut DesignSpaceAdapter) -> MorphResult<ExplorationOutcome> {
        loop {
            adapter.check_cancelled()?;
            if let Some(outcome) = adapter.limit_outcome() {
                return Ok(outcome);
            }

            let next = if at_depth_limit(adapter) {
                None
            } else {
                adapter.untraversed_activations()?.into_iter().next()
            };

            match next {
                Some(activation) => {
                    // Accepted descends; every other outcome leaves us on the
                    // same state with the activation marked tried.
                    let _ = adapter.step(&activation)?;
                }
                None => {
                    if !adapter.backtrack()? {
                        return Ok(ExplorationOutcome::Exhausted);
                    }
                }
            }
        }
    }
}

/// Greedy best-first search with one-step lookahead.
///
/// Speculatively fires each untraversed activation, evaluates the fitness
/// the resulting state would have, exactly undoes the firing, then commits
/// to the best candidate. Candidates whose lookahead is rejected are stepped
/// once (marking them tried) so the search always makes progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct BestFirstStrategy;

impl BestFirstStrategy {
    /// Creates the strategy.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Strategy for BestFirstStrategy {
    fn name(&self) -> &str {
        "best-first"
    }

    fn explore(&mut self, adapter: &mut DesignSpaceAdapter) -> MorphResult<ExplorationOutcome> {
        loop {
            adapter.check_cancelled()?;
            if let Some(outcome) = adapter.limit_outcome() {
                return Ok(outcome);
            }

            let candidates = if at_depth_limit(adapter) {
                Vec::new()
            } else {
                adapter.untraversed_activations()?
            };
            if candidates.is_empty() {
                if !adapter.backtrack()? {
                    return Ok(ExplorationOutcome::Exhausted);
                }
                continue;
            }

            let mut best: Option<(Activation, Fitness)> = None;
            for activation in &candidates {
                let Some(fitness) = adapter.peek_fitness(activation)? else {
                    continue;
                };
                best = match best {
                    None => Some((activation.clone(), fitness)),
                    Some((best_activation, best_fitness)) => {
                        if adapter.comparator().compare(&fitness, &best_fitness)
                            == Ordering::Greater
                        {
                            Some((activation.clone(), fitness))
                        } else {
                            Some((best_activation, best_fitness))
                        }
                    }
                };
            }

            match best {
                Some((activation, _)) => {
                    let _ = adapter.step(&activation)?;
                }
                None => {
                    // Every candidate is hopeless; burn the first one so the
                    // untraversed set shrinks and backtracking can kick in.
                    let _ = adapter.step(&candidates[0])?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::dse::{ExplorationLimits, FnConstraint};
    use crate::model::{Model, ModelStore};
    use crate::objectives::{FnObjective, ObjectiveDirection};
    use crate::rule::{FnAction, FnMatcher, Rule};
    use crate::symbol::Symbol;
    use crate::tuple::Tuple;
    use crate::value::Value;

    fn person_setup() -> (ModelStore, Symbol) {
        let person = Symbol::new("person", 1, Value::Bool(false));
        let store = ModelStore::builder().symbol(&person).build().unwrap();
        (store, person)
    }

    fn create_person_rule(person: &Symbol) -> Rule {
        let person = person.clone();
        let matcher = Arc::new(FnMatcher::new(|_m: &Model| Ok(vec![Tuple::empty()])));
        let action = Arc::new(FnAction::new(move |m: &mut Model, _b: &Tuple| {
            let node = m.create_object()?;
            m.put(&person, Tuple::unary(node), Value::Bool(true))?;
            Ok(true)
        }));
        Rule::new("createPerson", matcher, action)
    }

    fn count_persons(model: &Model, person: &Symbol) -> MorphResult<usize> {
        Ok(model.cursor(person)?.count())
    }

    #[test]
    fn test_depth_first_visits_bounded_space_exactly_once() {
        let (store, person) = person_setup();
        let p = person.clone();
        let mut adapter = DesignSpaceAdapter::builder(store.create_model())
            .rule(create_person_rule(&person))
            .constraint(FnConstraint::new("atMostTwo", move |m: &Model| {
                Ok(count_persons(m, &p)? <= 2)
            }))
            .build()
            .unwrap();

        let report = adapter.explore(&mut DepthFirstStrategy::new()).unwrap();
        assert_eq!(report.outcome, ExplorationOutcome::Exhausted);
        // States: 1 person, 2 persons. The 3-person state is rejected, and
        // every permutation beyond is isomorphism-pruned or rejected.
        assert_eq!(report.states_accepted, 2);
        assert_eq!(adapter.solutions().len(), 2);
    }

    #[test]
    fn test_depth_limit_stops_descent() {
        let (store, person) = person_setup();
        let mut adapter = DesignSpaceAdapter::builder(store.create_model())
            .rule(create_person_rule(&person))
            .limits(ExplorationLimits {
                max_depth: Some(1),
                ..Default::default()
            })
            .build()
            .unwrap();

        let report = adapter.explore(&mut DepthFirstStrategy::new()).unwrap();
        assert_eq!(report.outcome, ExplorationOutcome::Exhausted);
        assert_eq!(report.states_accepted, 1);
    }

    #[test]
    fn test_best_first_prefers_better_lookahead() {
        // Two rules: one marks a person, one does nothing visible. The
        // maximizing objective must make best-first fire the marking rule.
        let (store, person) = person_setup();

        let noop_matcher = Arc::new(FnMatcher::new(|_m: &Model| Ok(vec![Tuple::empty()])));
        let noop_action = Arc::new(FnAction::new(|m: &mut Model, _b: &Tuple| {
            let _ = m.create_object()?;
            Ok(true)
        }));
        let noop_rule = Rule::new("createLoner", noop_matcher, noop_action);

        let p = person.clone();
        let mut adapter = DesignSpaceAdapter::builder(store.create_model())
            .rule(noop_rule)
            .rule(create_person_rule(&person))
            .objective(
                FnObjective::new("persons", move |m: &Model| {
                    Ok(count_persons(m, &p)? as f64)
                })
                .direction(ObjectiveDirection::Maximize),
            )
            .limits(ExplorationLimits {
                max_solutions: Some(1),
                max_depth: Some(3),
                ..Default::default()
            })
            .build()
            .unwrap();

        let report = adapter.explore(&mut BestFirstStrategy::new()).unwrap();
        assert_eq!(report.outcome, ExplorationOutcome::SolutionLimitReached);
        // The first accepted state must already carry a person.
        let solution = adapter.solutions().get(0).unwrap();
        assert_eq!(solution.depth, 1);
        assert_eq!(solution.fitness.get("persons"), Some(1.0));
    }

    #[test]
    fn test_best_first_lookahead_restores_exactly() {
        let (store, person) = person_setup();
        let p = person.clone();
        let mut adapter = DesignSpaceAdapter::builder(store.create_model())
            .rule(create_person_rule(&person))
            .build()
            .unwrap();

        let before = adapter.model().current_version();
        let candidates = adapter.untraversed_activations().unwrap();
        let fitness = adapter.peek_fitness(&candidates[0]).unwrap();
        assert!(fitness.is_some());

        // The speculative firing left no trace.
        assert_eq!(adapter.model().current_version(), before);
        assert_eq!(count_persons(adapter.model(), &p).unwrap(), 0);
        assert_eq!(adapter.depth(), 0);
        assert_eq!(
            adapter.untraversed_activations().unwrap(),
            candidates,
            "lookahead must not consume activations"
        );
    }
}
