//! The design-space exploration adapter.
//!
//! The adapter owns a working model and drives one step of the search at a
//! time: fire an activation, run propagation to fixpoint, check global
//! constraints, ask the state coder whether the result duplicates a visited
//! state, and either accept (commit, push onto the trajectory) or roll back
//! to the trajectory's last version. Outcomes are explicit status values
//! consumed by strategies, never control-flow exceptions, so a search can be
//! audited, resumed, and serialized mid-flight.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::coder::{CoderConfig, EquivalenceResult, StateCode, StateCoder, StateEquivalenceChecker};
use crate::error::{ContractError, ExplorationError, MorphError, MorphResult};
use crate::model::Model;
use crate::objectives::{Fitness, LevelAggregation, Objective, ObjectiveComparatorHelper};
use crate::propagation::{propagate_to_fixpoint, PropagationOutcome, Propagator};
use crate::rule::{Activation, Rule, RuleId};
use crate::tuple::NodeId;
use crate::versioned::Version;

use super::strategy::Strategy;
use super::{
    ExplorationId, ExplorationLimits, ExplorationOutcome, ExplorationReport, GlobalConstraint,
    SolutionRecord, SolutionStore,
};

/// Result of attempting one activation from the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The resulting state was committed and pushed onto the trajectory.
    Accepted {
        /// The committed version.
        version: Version,
        /// True if the state was recorded as a solution.
        solution: bool,
    },
    /// The action rejected its binding; the model is unchanged and the
    /// activation counts as tried.
    NotApplicable,
    /// Propagation or a global constraint rejected the state; the model was
    /// rolled back to the trajectory's last version.
    Rejected {
        /// Human-readable rejection reason.
        reason: String,
        /// True if the whole subtree under the current state is dead.
        fatal: bool,
    },
    /// The state is isomorphic to an already-visited one; rolled back
    /// without evaluation.
    Pruned,
}

#[derive(Debug, Default)]
struct Stats {
    accepted: usize,
    pruned: usize,
    rejections: usize,
    failed_activations: usize,
}

/// Builder for a `DesignSpaceAdapter`.
pub struct AdapterBuilder {
    model: Model,
    rules: Vec<Rule>,
    propagators: Vec<Arc<dyn Propagator>>,
    constraints: Vec<Arc<dyn GlobalConstraint>>,
    objectives: Vec<Arc<dyn Objective>>,
    aggregation: LevelAggregation,
    limits: ExplorationLimits,
    coder_config: CoderConfig,
    equivalence_budget: usize,
    max_propagation_iterations: usize,
    seed: u64,
    cancel: Option<CancellationToken>,
}

impl AdapterBuilder {
    fn new(model: Model) -> Self {
        Self {
            model,
            rules: Vec::new(),
            propagators: Vec::new(),
            constraints: Vec::new(),
            objectives: Vec::new(),
            aggregation: LevelAggregation::Sum,
            limits: ExplorationLimits::default(),
            coder_config: CoderConfig::default(),
            equivalence_budget: 10_000,
            max_propagation_iterations: 1024,
            seed: 0,
            cancel: None,
        }
    }

    /// Registers a transformation rule.
    #[must_use]
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Registers a propagator.
    #[must_use]
    pub fn propagator(mut self, propagator: impl Propagator + 'static) -> Self {
        self.propagators.push(Arc::new(propagator));
        self
    }

    /// Registers a global constraint.
    #[must_use]
    pub fn constraint(mut self, constraint: impl GlobalConstraint + 'static) -> Self {
        self.constraints.push(Arc::new(constraint));
        self
    }

    /// Registers an objective.
    #[must_use]
    pub fn objective(mut self, objective: impl Objective + 'static) -> Self {
        self.objectives.push(Arc::new(objective));
        self
    }

    /// Sets the within-level objective aggregation.
    #[must_use]
    pub const fn aggregation(mut self, aggregation: LevelAggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    /// Sets the exploration limits.
    #[must_use]
    pub const fn limits(mut self, limits: ExplorationLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Sets the state-coder configuration.
    #[must_use]
    pub const fn coder_config(mut self, config: CoderConfig) -> Self {
        self.coder_config = config;
        self
    }

    /// Sets the morphism-search budget.
    #[must_use]
    pub const fn equivalence_budget(mut self, budget: usize) -> Self {
        self.equivalence_budget = budget;
        self
    }

    /// Sets the propagation-fixpoint iteration cap.
    #[must_use]
    pub const fn max_propagation_iterations(mut self, iterations: usize) -> Self {
        self.max_propagation_iterations = iterations;
        self
    }

    /// Sets the random seed for `fire_random_activation`.
    #[must_use]
    pub const fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Attaches an external cancellation token.
    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Builds the adapter, committing the model's root state.
    pub fn build(self) -> MorphResult<DesignSpaceAdapter> {
        self.limits.validate()?;

        let mut model = self.model;
        let coder = StateCoder::with_config(self.coder_config);
        let root = model.commit()?;
        model.flush_changes();
        let root_code = coder.code(&model)?;

        let mut rule_index = HashMap::new();
        for (i, rule) in self.rules.iter().enumerate() {
            rule_index.insert(rule.id(), i);
        }

        let mut visited_codes: HashMap<u64, Vec<Version>> = HashMap::new();
        visited_codes.insert(root_code.model_code(), vec![root]);
        let mut code_cache = HashMap::new();
        code_cache.insert(root, root_code);

        Ok(DesignSpaceAdapter {
            id: ExplorationId::new(),
            model,
            rules: self.rules,
            rule_index,
            propagators: self.propagators,
            constraints: self.constraints,
            comparator: ObjectiveComparatorHelper::new(self.objectives, self.aggregation),
            coder,
            checker: StateEquivalenceChecker::new(self.equivalence_budget),
            limits: self.limits,
            max_propagation_iterations: self.max_propagation_iterations,
            cancel: self.cancel.unwrap_or_default(),
            rng: StdRng::seed_from_u64(self.seed),
            trajectory: vec![root],
            tried: HashMap::new(),
            dead: HashSet::new(),
            visited_codes,
            code_cache,
            solutions: SolutionStore::new(),
            stats: Stats::default(),
            started: Instant::now(),
        })
    }
}

/// Orchestrates one exploration over one working model.
pub struct DesignSpaceAdapter {
    id: ExplorationId,
    model: Model,
    rules: Vec<Rule>,
    rule_index: HashMap<RuleId, usize>,
    propagators: Vec<Arc<dyn Propagator>>,
    constraints: Vec<Arc<dyn GlobalConstraint>>,
    comparator: ObjectiveComparatorHelper,
    coder: StateCoder,
    checker: StateEquivalenceChecker,
    limits: ExplorationLimits,
    max_propagation_iterations: usize,
    cancel: CancellationToken,
    rng: StdRng,
    trajectory: Vec<Version>,
    tried: HashMap<Version, HashSet<Activation>>,
    dead: HashSet<Version>,
    visited_codes: HashMap<u64, Vec<Version>>,
    code_cache: HashMap<Version, StateCode>,
    solutions: SolutionStore,
    stats: Stats,
    started: Instant,
}

impl DesignSpaceAdapter {
    /// Starts building an adapter over the given model.
    #[must_use]
    pub fn builder(model: Model) -> AdapterBuilder {
        AdapterBuilder::new(model)
    }

    /// Returns the exploration identity.
    #[must_use]
    pub const fn id(&self) -> ExplorationId {
        self.id
    }

    /// Returns the working model.
    #[must_use]
    pub const fn model(&self) -> &Model {
        &self.model
    }

    /// Returns the configured limits.
    #[must_use]
    pub const fn limits(&self) -> &ExplorationLimits {
        &self.limits
    }

    /// Returns the objective comparator.
    #[must_use]
    pub const fn comparator(&self) -> &ObjectiveComparatorHelper {
        &self.comparator
    }

    /// Returns the recorded solutions.
    #[must_use]
    pub const fn solutions(&self) -> &SolutionStore {
        &self.solutions
    }

    /// Returns a clone of the cancellation token.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Polls the cancellation token.
    pub fn check_cancelled(&self) -> MorphResult<()> {
        self.cancel.check()
    }

    /// Replaces the random source with a fresh seeded one.
    pub fn set_random_seed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Replaces the random source.
    pub fn set_random(&mut self, rng: StdRng) {
        self.rng = rng;
    }

    /// Returns the total number of stored tuples in the working model.
    #[must_use]
    pub fn model_size(&self) -> usize {
        self.model.model_size()
    }

    /// Allocates a fresh object id in the working model.
    pub fn create_object(&mut self) -> MorphResult<NodeId> {
        self.model.create_object()
    }

    /// Deletes an object from the working model.
    pub fn delete_object(&mut self, node: NodeId) -> MorphResult<usize> {
        self.model.delete_object(node)
    }

    /// Returns the current trajectory, root first.
    #[must_use]
    pub fn trajectory(&self) -> &[Version] {
        &self.trajectory
    }

    /// Returns the current depth: accepted firings since the root.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.trajectory.len().saturating_sub(1)
    }

    /// Returns true if the working model sits on a trajectory version.
    #[must_use]
    pub fn is_current_in_trajectory(&self) -> bool {
        self.model
            .current_version()
            .is_some_and(|v| self.trajectory.contains(&v))
    }

    fn current_version(&self) -> MorphResult<Version> {
        self.model
            .current_version()
            .ok_or_else(|| ContractError::UncommittedState.into())
    }

    /// Resumes the search from a serialized trajectory.
    ///
    /// Every version must be known to the backing store; the model is moved
    /// to the path's last version.
    pub fn restore_trajectory(&mut self, path: Vec<Version>) -> MorphResult<()> {
        let Some(&last) = path.last() else {
            return Err(ContractError::EmptyTrajectory.into());
        };
        for version in &path {
            if !self.model.store().contains_state(*version) {
                return Err(ContractError::UnknownVersion { version: *version }.into());
            }
        }
        self.model.restore(last)?;
        self.trajectory = path;
        Ok(())
    }

    /// Computes the activations not yet tried from the current state.
    ///
    /// Deterministically ordered by (rule, match tuple). A state marked dead
    /// by a fatal rejection yields no activations.
    pub fn untraversed_activations(&self) -> MorphResult<Vec<Activation>> {
        let current = self.current_version()?;
        if self.dead.contains(&current) {
            return Ok(Vec::new());
        }
        let tried = self.tried.get(&current);
        let mut out = Vec::new();
        for rule in &self.rules {
            for binding in rule.matcher().matches(&self.model)? {
                let activation = Activation::new(rule.id(), binding);
                if tried.map_or(true, |s| !s.contains(&activation)) {
                    out.push(activation);
                }
            }
        }
        out.sort();
        out.dedup();
        Ok(out)
    }

    /// Fires one activation against the working model.
    ///
    /// The activation is marked tried regardless of outcome. Returns false
    /// if the action rejected its binding; partial writes of a rejected
    /// action are rolled back.
    pub fn fire_activation(&mut self, activation: &Activation) -> MorphResult<bool> {
        self.cancel.check()?;
        let current = self.current_version()?;
        self.tried
            .entry(current)
            .or_default()
            .insert(activation.clone());

        let rule = self
            .rule_index
            .get(&activation.rule_id())
            .map(|&i| self.rules[i].clone())
            .ok_or(ContractError::UnknownRule {
                rule: activation.rule_id().raw(),
            })?;

        let fired = rule.action().fire(&mut self.model, activation.binding())?;
        if fired {
            self.model.flush_changes();
        } else {
            self.model.restore(current)?;
            self.stats.failed_activations += 1;
        }
        Ok(fired)
    }

    /// Fires one uniformly drawn untraversed activation.
    ///
    /// Identical seeds reproduce identical trajectories for identical rule
    /// and model input. Returns `None` when nothing is untraversed.
    pub fn fire_random_activation(&mut self) -> MorphResult<Option<(Activation, StepOutcome)>> {
        let candidates = self.untraversed_activations()?;
        if candidates.is_empty() {
            return Ok(None);
        }
        let index = self.rng.gen_range(0..candidates.len());
        let activation = candidates[index].clone();
        let outcome = self.step(&activation)?;
        Ok(Some((activation, outcome)))
    }

    /// Runs one full search step for the given activation.
    ///
    /// Fire, propagate to fixpoint, check global constraints, dedup against
    /// visited states, evaluate, then accept or roll back. Cancellation
    /// observed mid-step rolls back before unwinding.
    pub fn step(&mut self, activation: &Activation) -> MorphResult<StepOutcome> {
        self.cancel.check()?;
        let current = self.current_version()?;
        match self.step_inner(current, activation) {
            Err(e) if e.is_cancellation() => {
                self.model.restore(current)?;
                Err(e)
            }
            other => other,
        }
    }

    fn step_inner(&mut self, current: Version, activation: &Activation) -> MorphResult<StepOutcome> {
        if !self.fire_activation(activation)? {
            return Ok(StepOutcome::NotApplicable);
        }

        match propagate_to_fixpoint(
            &mut self.model,
            &self.propagators,
            &self.cancel,
            self.max_propagation_iterations,
        )? {
            PropagationOutcome::Rejected {
                propagator,
                reason,
                fatal,
            } => {
                self.model.restore(current)?;
                self.stats.rejections += 1;
                if fatal {
                    // The propagator proved the whole subtree infeasible.
                    warn!(id = %self.id, %propagator, %reason, "fatal rejection, pruning subtree");
                    self.dead.insert(current);
                }
                return Ok(StepOutcome::Rejected {
                    reason: format!("{propagator}: {reason}"),
                    fatal,
                });
            }
            PropagationOutcome::Fixpoint { .. } => {}
        }
        self.model.flush_changes();

        if !self.check_global_constraints()? {
            self.model.restore(current)?;
            self.stats.rejections += 1;
            return Ok(StepOutcome::Rejected {
                reason: "global constraint violated".to_string(),
                fatal: false,
            });
        }

        let code = self.coder.code(&self.model)?;
        if self.matches_visited(&code, None)? {
            self.model.restore(current)?;
            self.stats.pruned += 1;
            return Ok(StepOutcome::Pruned);
        }

        let fitness = self.comparator.calculate_fitness(&self.model)?;
        let version = self.model.commit()?;
        self.trajectory.push(version);
        self.visited_codes
            .entry(code.model_code())
            .or_default()
            .push(version);
        self.code_cache.insert(version, code);
        self.stats.accepted += 1;

        let solution = fitness.satisfies_hard_objectives();
        if solution {
            debug!(id = %self.id, %version, depth = self.depth(), "solution found");
            self.solutions.push(SolutionRecord {
                version,
                depth: self.depth(),
                trajectory: self.trajectory.clone(),
                fitness,
                found_at: Utc::now(),
            });
        }
        Ok(StepOutcome::Accepted { version, solution })
    }

    /// Checks every global constraint against the working model.
    pub fn check_global_constraints(&self) -> MorphResult<bool> {
        for constraint in &self.constraints {
            if !constraint.check(&self.model)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Evaluates the objectives against the working model.
    pub fn calculate_fitness(&self) -> MorphResult<Fitness> {
        self.comparator.calculate_fitness(&self.model)
    }

    /// Records the current committed state as a solution.
    pub fn new_solution(&mut self) -> MorphResult<()> {
        let version = self.current_version()?;
        let fitness = self.calculate_fitness()?;
        self.solutions.push(SolutionRecord {
            version,
            depth: self.depth(),
            trajectory: self.trajectory.clone(),
            fitness,
            found_at: Utc::now(),
        });
        Ok(())
    }

    /// Pops the trajectory tail and restores the previous version.
    ///
    /// Returns false at the root: backtracking past it terminates the whole
    /// exploration.
    pub fn backtrack(&mut self) -> MorphResult<bool> {
        if self.trajectory.len() <= 1 {
            return Ok(false);
        }
        self.trajectory.pop();
        let Some(&previous) = self.trajectory.last() else {
            return Ok(false);
        };
        self.model.restore(previous)?;
        Ok(true)
    }

    /// Returns true if the current committed state duplicates a different
    /// visited state (same content up to node renaming).
    pub fn is_current_state_already_traversed(&self) -> MorphResult<bool> {
        let current = self.current_version()?;
        let code = match self.code_cache.get(&current) {
            Some(code) => code.clone(),
            None => self.coder.code(&self.model)?,
        };
        self.matches_visited(&code, Some(current))
    }

    /// Speculatively fires an activation, evaluates the would-be state, and
    /// exactly undoes the firing.
    ///
    /// Used by lookahead strategies. The activation is *not* marked tried.
    /// Returns `None` when the action rejects the binding, propagation
    /// rejects the state, or a global constraint fails.
    pub fn peek_fitness(&mut self, activation: &Activation) -> MorphResult<Option<Fitness>> {
        self.cancel.check()?;
        let current = self.current_version()?;
        let result = self.peek_inner(activation);
        self.model.restore(current)?;
        result
    }

    fn peek_inner(&mut self, activation: &Activation) -> MorphResult<Option<Fitness>> {
        let rule = self
            .rule_index
            .get(&activation.rule_id())
            .map(|&i| self.rules[i].clone())
            .ok_or(ContractError::UnknownRule {
                rule: activation.rule_id().raw(),
            })?;
        if !rule.action().fire(&mut self.model, activation.binding())? {
            return Ok(None);
        }
        match propagate_to_fixpoint(
            &mut self.model,
            &self.propagators,
            &self.cancel,
            self.max_propagation_iterations,
        )? {
            PropagationOutcome::Rejected { .. } => return Ok(None),
            PropagationOutcome::Fixpoint { .. } => {}
        }
        if !self.check_global_constraints()? {
            return Ok(None);
        }
        Ok(Some(self.comparator.calculate_fitness(&self.model)?))
    }

    fn matches_visited(&self, code: &StateCode, exclude: Option<Version>) -> MorphResult<bool> {
        let Some(candidates) = self.visited_codes.get(&code.model_code()) else {
            return Ok(false);
        };
        for &version in candidates {
            if exclude == Some(version) {
                continue;
            }
            let other = self.model.store().model_at(version)?;
            let other_code = match self.code_cache.get(&version) {
                Some(cached) => cached.clone(),
                None => self.coder.code(&other)?,
            };
            match self
                .checker
                .construct_morphism_with_codes(&self.model, code, &other, &other_code)?
            {
                EquivalenceResult::Isomorphic => return Ok(true),
                // Unknown must not prune: dropping a potential solution is
                // worse than re-exploring one.
                EquivalenceResult::Different | EquivalenceResult::Unknown => {}
            }
        }
        Ok(false)
    }

    /// Returns the terminal outcome forced by the limits, if any.
    #[must_use]
    pub fn limit_outcome(&self) -> Option<ExplorationOutcome> {
        if let Some(max) = self.limits.max_solutions {
            if self.solutions.len() >= max {
                return Some(ExplorationOutcome::SolutionLimitReached);
            }
        }
        if let Some(ms) = self.limits.max_duration_ms {
            if self.started.elapsed() >= Duration::from_millis(ms) {
                return Some(ExplorationOutcome::TimedOut);
            }
        }
        None
    }

    /// Runs a strategy to completion and summarizes the exploration.
    ///
    /// Cancellation surfaces as a normal `Cancelled` outcome with the
    /// solutions recorded so far; all other errors abort.
    pub fn explore(&mut self, strategy: &mut dyn Strategy) -> MorphResult<ExplorationReport> {
        self.started = Instant::now();
        info!(id = %self.id, strategy = strategy.name(), "exploration started");

        let outcome = match strategy.explore(self) {
            Ok(outcome) => outcome,
            Err(MorphError::Exploration(ExplorationError::Cancelled)) => {
                ExplorationOutcome::Cancelled
            }
            Err(e) => return Err(e),
        };

        let elapsed_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let report = ExplorationReport {
            id: self.id,
            outcome,
            solutions: self.solutions.len(),
            states_accepted: self.stats.accepted,
            states_pruned: self.stats.pruned,
            rejections: self.stats.rejections,
            failed_activations: self.stats.failed_activations,
            elapsed_ms,
        };
        info!(
            id = %self.id,
            outcome = %report.outcome,
            solutions = report.solutions,
            accepted = report.states_accepted,
            pruned = report.states_pruned,
            elapsed_ms = report.elapsed_ms,
            "exploration finished"
        );
        Ok(report)
    }
}
