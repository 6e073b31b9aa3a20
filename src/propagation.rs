//! Constraint propagation between search steps.
//!
//! Propagators are the seam to the external rule-based fixpoint engine: the
//! adapter calls every registered propagator repeatedly until a whole pass
//! leaves the model unchanged, then evaluates constraints. Rejections are
//! ordinary results, not errors; a `fatal` rejection asserts that no future
//! path below the current trajectory prefix can recover, which the adapter
//! uses to prune the whole subtree. Propagators must only set `fatal` when
//! they can prove global infeasibility.

use crate::cancel::CancellationToken;
use crate::error::{ExplorationError, MorphResult};
use crate::model::Model;

/// Result of a single propagation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropagationResult {
    /// The pass changed nothing.
    Unchanged,
    /// The pass wrote at least one value; another pass is required.
    Propagated,
    /// The state violates a propagated constraint.
    Rejected {
        /// Human-readable rejection reason.
        reason: String,
        /// True if no extension of the current trajectory prefix can fix the
        /// condition.
        fatal: bool,
    },
}

/// A rule-based constraint propagator.
pub trait Propagator: Send + Sync {
    /// Returns the propagator's name, used in rejection reporting.
    fn name(&self) -> &str;

    /// Runs one pass over the model.
    fn propagate(&self, model: &mut Model) -> MorphResult<PropagationResult>;
}

/// Adapter turning a closure into a `Propagator`.
pub struct FnPropagator<F> {
    name: String,
    f: F,
}

impl<F> FnPropagator<F>
where
    F: Fn(&mut Model) -> MorphResult<PropagationResult> + Send + Sync,
{
    /// Wraps a closure as a propagator.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> Propagator for FnPropagator<F>
where
    F: Fn(&mut Model) -> MorphResult<PropagationResult> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn propagate(&self, model: &mut Model) -> MorphResult<PropagationResult> {
        (self.f)(model)
    }
}

/// Outcome of driving all propagators to fixpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropagationOutcome {
    /// A full pass left the model unchanged.
    Fixpoint {
        /// Number of passes run, including the final unchanged one.
        iterations: usize,
        /// True if any pass wrote values.
        changed: bool,
    },
    /// A propagator rejected the state.
    Rejected {
        /// Name of the rejecting propagator.
        propagator: String,
        /// Rejection reason.
        reason: String,
        /// True if the whole subtree under the current prefix is infeasible.
        fatal: bool,
    },
}

/// Runs every propagator until a whole pass reports no change.
///
/// The cancellation token is polled before each pass. Exceeding
/// `max_iterations` is reported as `PropagationDiverged`: a propagator pair
/// that keeps rewriting each other's output would otherwise spin forever.
pub fn propagate_to_fixpoint(
    model: &mut Model,
    propagators: &[std::sync::Arc<dyn Propagator>],
    cancel: &CancellationToken,
    max_iterations: usize,
) -> MorphResult<PropagationOutcome> {
    let mut changed = false;
    for iteration in 1..=max_iterations {
        cancel.check()?;

        let mut pass_changed = false;
        for propagator in propagators {
            match propagator.propagate(model)? {
                PropagationResult::Unchanged => {}
                PropagationResult::Propagated => pass_changed = true,
                PropagationResult::Rejected { reason, fatal } => {
                    return Ok(PropagationOutcome::Rejected {
                        propagator: propagator.name().to_string(),
                        reason,
                        fatal,
                    });
                }
            }
        }

        if !pass_changed {
            return Ok(PropagationOutcome::Fixpoint {
                iterations: iteration,
                changed,
            });
        }
        changed = true;
    }

    Err(ExplorationError::PropagationDiverged {
        iterations: max_iterations,
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelStore;
    use crate::symbol::Symbol;
    use crate::tuple::Tuple;
    use crate::value::Value;
    use std::sync::Arc;

    fn counter_model() -> (Model, Symbol) {
        let level = Symbol::new("level", 0, Value::Int(0));
        let store = ModelStore::builder().symbol(&level).build().unwrap();
        (store.create_model(), level)
    }

    #[test]
    fn test_fixpoint_with_no_propagators() {
        let (mut model, _) = counter_model();
        let outcome = propagate_to_fixpoint(&mut model, &[], &CancellationToken::new(), 10).unwrap();
        assert_eq!(
            outcome,
            PropagationOutcome::Fixpoint {
                iterations: 1,
                changed: false
            }
        );
    }

    #[test]
    fn test_fixpoint_reached_after_saturation() {
        let (mut model, level) = counter_model();

        // Raises the level until it saturates at 3.
        let saturate = {
            let level = level.clone();
            FnPropagator::new("saturate", move |model: &mut Model| {
                let current = model
                    .get(&level, &Tuple::empty())?
                    .as_int()
                    .unwrap_or(0);
                if current < 3 {
                    model.put(&level, Tuple::empty(), Value::Int(current + 1))?;
                    Ok(PropagationResult::Propagated)
                } else {
                    Ok(PropagationResult::Unchanged)
                }
            })
        };

        let propagators: Vec<Arc<dyn Propagator>> = vec![Arc::new(saturate)];
        let outcome =
            propagate_to_fixpoint(&mut model, &propagators, &CancellationToken::new(), 10)
                .unwrap();
        assert_eq!(
            outcome,
            PropagationOutcome::Fixpoint {
                iterations: 4,
                changed: true
            }
        );
        assert_eq!(model.get(&level, &Tuple::empty()).unwrap(), Value::Int(3));
    }

    #[test]
    fn test_rejection_short_circuits() {
        let (mut model, _) = counter_model();
        let reject = FnPropagator::new("guard", |_model: &mut Model| {
            Ok(PropagationResult::Rejected {
                reason: "cardinality exceeded".to_string(),
                fatal: false,
            })
        });
        let never = FnPropagator::new("never", |_model: &mut Model| {
            panic!("must not run after a rejection");
        });

        let propagators: Vec<Arc<dyn Propagator>> = vec![Arc::new(reject), Arc::new(never)];
        let outcome =
            propagate_to_fixpoint(&mut model, &propagators, &CancellationToken::new(), 10)
                .unwrap();
        assert_eq!(
            outcome,
            PropagationOutcome::Rejected {
                propagator: "guard".to_string(),
                reason: "cardinality exceeded".to_string(),
                fatal: false,
            }
        );
    }

    #[test]
    fn test_divergence_is_reported() {
        let (mut model, level) = counter_model();
        let spin = {
            let level = level.clone();
            FnPropagator::new("spin", move |model: &mut Model| {
                let current = model.get(&level, &Tuple::empty())?.as_int().unwrap_or(0);
                model.put(&level, Tuple::empty(), Value::Int(current + 1))?;
                Ok(PropagationResult::Propagated)
            })
        };
        let propagators: Vec<Arc<dyn Propagator>> = vec![Arc::new(spin)];
        let err = propagate_to_fixpoint(&mut model, &propagators, &CancellationToken::new(), 5)
            .unwrap_err();
        assert!(err.is_exploration());
    }

    #[test]
    fn test_cancellation_checked_each_pass() {
        let (mut model, _) = counter_model();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = propagate_to_fixpoint(&mut model, &[], &cancel, 10).unwrap_err();
        assert!(err.is_cancellation());
    }
}
