use std::sync::Arc;

use morphspace::{
    DepthFirstStrategy, DesignSpaceAdapter, ExplorationLimits, ExplorationOutcome, FnAction,
    FnConstraint, FnMatcher, Model, ModelStore, MorphResult, Rule, StepOutcome, Symbol, Tuple,
    Value,
};

fn person_symbol() -> Symbol {
    Symbol::new("person", 1, Value::Bool(false))
}

fn create_person_rule(person: &Symbol) -> Rule {
    let person = person.clone();
    Rule::new(
        "createPerson",
        Arc::new(FnMatcher::new(|_m: &Model| Ok(vec![Tuple::empty()]))),
        Arc::new(FnAction::new(move |m: &mut Model, _b: &Tuple| {
            let node = m.create_object()?;
            m.put(&person, Tuple::unary(node), Value::Bool(true))?;
            Ok(true)
        })),
    )
}

fn count(model: &Model, symbol: &Symbol) -> MorphResult<usize> {
    Ok(model.cursor(symbol)?.count())
}

#[test]
fn person_scenario_yields_exactly_two_solutions() {
    let person = person_symbol();
    let store = ModelStore::builder().symbol(&person).build().unwrap();

    let p = person.clone();
    let mut adapter = DesignSpaceAdapter::builder(store.create_model())
        .rule(create_person_rule(&person))
        .constraint(FnConstraint::new("countPersons<=2", move |m: &Model| {
            Ok(count(m, &p)? <= 2)
        }))
        .limits(ExplorationLimits {
            max_solutions: Some(2),
            ..Default::default()
        })
        .build()
        .unwrap();

    let report = adapter.explore(&mut DepthFirstStrategy::new()).unwrap();
    assert_eq!(report.outcome, ExplorationOutcome::SolutionLimitReached);
    assert_eq!(report.solutions, 2);

    let depths: Vec<usize> = adapter.solutions().iter().map(|s| s.depth).collect();
    assert_eq!(depths, vec![1, 2]);

    // Re-running without the solution cap must still find exactly two
    // solutions: depth 3 violates the constraint and forces backtracking.
    let p = person.clone();
    let mut adapter = DesignSpaceAdapter::builder(store.create_model())
        .rule(create_person_rule(&person))
        .constraint(FnConstraint::new("countPersons<=2", move |m: &Model| {
            Ok(count(m, &p)? <= 2)
        }))
        .build()
        .unwrap();
    let report = adapter.explore(&mut DepthFirstStrategy::new()).unwrap();
    assert_eq!(report.outcome, ExplorationOutcome::Exhausted);
    assert_eq!(report.solutions, 2);
    assert_eq!(report.states_accepted, 2);
    assert!(report.rejections >= 1);
}

#[test]
fn swapped_creation_orders_are_pruned_as_isomorphic() {
    let red = Symbol::new("red", 1, Value::Bool(false));
    let blue = Symbol::new("blue", 1, Value::Bool(false));
    let store = ModelStore::builder()
        .symbol(&red)
        .symbol(&blue)
        .build()
        .unwrap();

    let mark_rule = |symbol: &Symbol, name: &str| {
        let symbol = symbol.clone();
        Rule::new(
            name,
            Arc::new(FnMatcher::new(|_m: &Model| Ok(vec![Tuple::empty()]))),
            Arc::new(FnAction::new(move |m: &mut Model, _b: &Tuple| {
                let node = m.create_object()?;
                m.put(&symbol, Tuple::unary(node), Value::Bool(true))?;
                Ok(true)
            })),
        )
    };

    let r = red.clone();
    let b = blue.clone();
    let mut adapter = DesignSpaceAdapter::builder(store.create_model())
        .rule(mark_rule(&red, "createRed"))
        .rule(mark_rule(&blue, "createBlue"))
        .constraint(FnConstraint::new("oneOfEach", move |m: &Model| {
            Ok(count(m, &r)? <= 1 && count(m, &b)? <= 1)
        }))
        .build()
        .unwrap();

    let report = adapter.explore(&mut DepthFirstStrategy::new()).unwrap();
    assert_eq!(report.outcome, ExplorationOutcome::Exhausted);

    // Reachable distinct states: {red}, {blue}, {red, blue}. The second
    // path into {red, blue} (created in swapped order) is pruned.
    assert_eq!(report.states_accepted, 3);
    assert_eq!(report.states_pruned, 1);
}

#[test]
fn identical_seeds_reproduce_identical_trajectories() {
    let run = |seed: u64| -> (Vec<String>, Vec<u64>) {
        let person = person_symbol();
        let other = Symbol::new("marker", 1, Value::Bool(false));
        let store = ModelStore::builder()
            .symbol(&person)
            .symbol(&other)
            .build()
            .unwrap();

        let p = person.clone();
        let o = other.clone();
        let mut adapter = DesignSpaceAdapter::builder(store.create_model())
            .rule(create_person_rule(&person))
            .rule({
                let other = other.clone();
                Rule::new(
                    "createMarker",
                    Arc::new(FnMatcher::new(|_m: &Model| Ok(vec![Tuple::empty()]))),
                    Arc::new(FnAction::new(move |m: &mut Model, _b: &Tuple| {
                        let node = m.create_object()?;
                        m.put(&other, Tuple::unary(node), Value::Bool(true))?;
                        Ok(true)
                    })),
                )
            })
            .constraint(FnConstraint::new("bounded", move |m: &Model| {
                Ok(count(m, &p)? + count(m, &o)? <= 3)
            }))
            .seed(seed)
            .build()
            .unwrap();

        // Trace the search by observable content, not by process-local ids.
        let mut trace = Vec::new();
        for _ in 0..12 {
            match adapter.fire_random_activation().unwrap() {
                Some((_, outcome)) => {
                    trace.push(format!(
                        "p{}m{}d{}:{}",
                        count(adapter.model(), &person).unwrap(),
                        count(adapter.model(), &other).unwrap(),
                        adapter.depth(),
                        match outcome {
                            StepOutcome::Accepted { .. } => "accepted",
                            StepOutcome::NotApplicable => "n/a",
                            StepOutcome::Rejected { .. } => "rejected",
                            StepOutcome::Pruned => "pruned",
                        }
                    ));
                }
                None => {
                    if !adapter.backtrack().unwrap() {
                        break;
                    }
                }
            }
        }
        let depth = adapter.depth() as u64;
        (trace, vec![depth])
    };

    let (trace_a, end_a) = run(42);
    let (trace_b, end_b) = run(42);
    assert_eq!(trace_a, trace_b);
    assert_eq!(end_a, end_b);
    assert!(!trace_a.is_empty());
}

#[test]
fn cancelled_token_surfaces_as_cancelled_outcome() {
    let person = person_symbol();
    let store = ModelStore::builder().symbol(&person).build().unwrap();

    let mut adapter = DesignSpaceAdapter::builder(store.create_model())
        .rule(create_person_rule(&person))
        .build()
        .unwrap();

    let token = adapter.cancellation_token();
    token.cancel();

    let report = adapter.explore(&mut DepthFirstStrategy::new()).unwrap();
    assert_eq!(report.outcome, ExplorationOutcome::Cancelled);
    assert_eq!(report.solutions, 0);

    // The model sits on the last committed state (the root) with no
    // uncommitted partial writes.
    assert!(!adapter.model().has_uncommitted_changes());
    assert!(adapter.is_current_in_trajectory());
    assert_eq!(adapter.depth(), 0);
}

#[test]
fn restore_trajectory_resumes_a_serialized_path() {
    let person = person_symbol();
    let store = ModelStore::builder().symbol(&person).build().unwrap();

    let p = person.clone();
    let mut adapter = DesignSpaceAdapter::builder(store.create_model())
        .rule(create_person_rule(&person))
        .constraint(FnConstraint::new("countPersons<=2", move |m: &Model| {
            Ok(count(m, &p)? <= 2)
        }))
        .build()
        .unwrap();

    let report = adapter.explore(&mut DepthFirstStrategy::new()).unwrap();
    assert_eq!(report.outcome, ExplorationOutcome::Exhausted);

    let solution = adapter.solutions().get(1).cloned().unwrap();
    adapter.restore_trajectory(solution.trajectory.clone()).unwrap();
    assert_eq!(adapter.depth(), solution.depth);
    assert!(adapter.is_current_in_trajectory());
    assert_eq!(count(adapter.model(), &person).unwrap(), 2);

    // Only a *different* visited state with equal content counts as a
    // duplicate; sitting on one's own version does not.
    assert!(!adapter.is_current_state_already_traversed().unwrap());
}

#[test]
fn manual_stepping_matches_explicit_outcomes() {
    let person = person_symbol();
    let store = ModelStore::builder().symbol(&person).build().unwrap();

    let p = person.clone();
    let mut adapter = DesignSpaceAdapter::builder(store.create_model())
        .rule(create_person_rule(&person))
        .constraint(FnConstraint::new("countPersons<=1", move |m: &Model| {
            Ok(count(m, &p)? <= 1)
        }))
        .build()
        .unwrap();

    let activations = adapter.untraversed_activations().unwrap();
    assert_eq!(activations.len(), 1);

    let outcome = adapter.step(&activations[0]).unwrap();
    assert!(matches!(
        outcome,
        StepOutcome::Accepted { solution: true, .. }
    ));
    assert_eq!(adapter.depth(), 1);

    // Firing again exceeds the constraint: rejected and rolled back.
    let activations = adapter.untraversed_activations().unwrap();
    let outcome = adapter.step(&activations[0]).unwrap();
    assert!(matches!(outcome, StepOutcome::Rejected { fatal: false, .. }));
    assert_eq!(adapter.depth(), 1);
    assert_eq!(count(adapter.model(), &person).unwrap(), 1);

    // Nothing untraversed left here; backtrack to the root and terminate.
    assert!(adapter.untraversed_activations().unwrap().is_empty());
    assert!(adapter.backtrack().unwrap());
    assert!(!adapter.backtrack().unwrap());
}

#[test]
fn fatal_rejection_prunes_the_subtree() {
    let person = person_symbol();
    let store = ModelStore::builder().symbol(&person).build().unwrap();

    let p = person.clone();
    let mut adapter = DesignSpaceAdapter::builder(store.create_model())
        .rule(create_person_rule(&person))
        .propagator(morphspace::FnPropagator::new("infeasible", move |m: &mut Model| {
            if m.cursor(&p)?.count() >= 1 {
                Ok(morphspace::PropagationResult::Rejected {
                    reason: "no completion exists".to_string(),
                    fatal: true,
                })
            } else {
                Ok(morphspace::PropagationResult::Unchanged)
            }
        }))
        .build()
        .unwrap();

    let report = adapter.explore(&mut DepthFirstStrategy::new()).unwrap();
    assert_eq!(report.outcome, ExplorationOutcome::Exhausted);
    // The first firing is fatally rejected, which kills the root's whole
    // subtree: nothing is ever accepted.
    assert_eq!(report.states_accepted, 0);
    assert_eq!(report.rejections, 1);
    assert_eq!(report.solutions, 0);
}

#[test]
fn report_serializes_for_tooling() {
    let person = person_symbol();
    let store = ModelStore::builder().symbol(&person).build().unwrap();
    let p = person.clone();
    let mut adapter = DesignSpaceAdapter::builder(store.create_model())
        .rule(create_person_rule(&person))
        .constraint(FnConstraint::new("countPersons<=1", move |m: &Model| {
            Ok(count(m, &p)? <= 1)
        }))
        .build()
        .unwrap();

    let report = adapter.explore(&mut DepthFirstStrategy::new()).unwrap();
    let json = report.to_json().unwrap();
    assert!(json.contains("\"outcome\""));
    assert!(json.contains("\"exhausted\""));
    assert!(json.contains("\"states_accepted\""));
}
