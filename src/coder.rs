//! State coding: canonical signatures for duplicate-state detection.
//!
//! Exact model isomorphism is expensive and most distinct states are not
//! isomorphic, so the coder computes a cheap necessary-condition filter
//! first: iterative refinement in the style of Weisfeiler-Leman coloring.
//! Each node starts from the tuples it participates in, then repeatedly
//! absorbs its neighbors' codes. Two states with different `model_code` are
//! provably non-isomorphic; equal codes escalate to an explicit morphism
//! search in `StateEquivalenceChecker`.
//!
//! All hashes are blake3-derived and stable across processes and builds.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::MorphResult;
use crate::model::Model;
use crate::symbol::Symbol;
use crate::tuple::{NodeId, Tuple};
use crate::value::Value;

/// Configuration for the state coder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoderConfig {
    /// Upper bound on refinement rounds. Rounds stop early when the
    /// partition of nodes by code stops changing.
    pub refinement_rounds: usize,
}

impl Default for CoderConfig {
    fn default() -> Self {
        Self {
            refinement_rounds: 4,
        }
    }
}

/// Canonical signature of one model state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCode {
    model_code: u64,
    object_codes: BTreeMap<NodeId, u64>,
}

impl StateCode {
    /// Aggregate signature of the whole state.
    ///
    /// Equal content yields equal codes; different codes prove the states
    /// non-isomorphic.
    #[must_use]
    pub const fn model_code(&self) -> u64 {
        self.model_code
    }

    /// Per-node signatures after refinement.
    #[must_use]
    pub const fn object_codes(&self) -> &BTreeMap<NodeId, u64> {
        &self.object_codes
    }
}

fn mix(tag: &str, parts: &[u64]) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(tag.as_bytes());
    hasher.update(&(parts.len() as u64).to_le_bytes());
    for part in parts {
        hasher.update(&part.to_le_bytes());
    }
    let digest = hasher.finalize();
    let bytes = digest.as_bytes();
    u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

fn symbol_code(symbol: &Symbol) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(symbol.name().as_bytes());
    hasher.update(&(symbol.arity() as u64).to_le_bytes());
    let digest = hasher.finalize();
    let bytes = digest.as_bytes();
    u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

fn value_code(value: &Value) -> u64 {
    match value {
        Value::Bool(v) => mix("val:bool", &[u64::from(*v)]),
        Value::Int(v) => mix("val:int", &[*v as u64]),
        Value::Truth(t) => mix("val:truth", &[*t as u64]),
        Value::None => mix("val:none", &[]),
    }
}

/// One symbol's content as seen by the coder: value-coded tuples.
type Facts = Vec<(u64, Vec<(Tuple, u64)>)>;

fn collect_facts(model: &Model) -> MorphResult<Facts> {
    let mut facts = Vec::new();
    for symbol in model.store().symbols() {
        if model.store().is_excluded(symbol) {
            continue;
        }
        let mut tuples: Vec<(Tuple, u64)> = model
            .cursor(symbol)?
            .map(|(key, value)| {
                let vc = value_code(&value);
                (key, vc)
            })
            .collect();
        tuples.sort_by(|a, b| a.0.cmp(&b.0));
        facts.push((symbol_code(symbol), tuples));
    }
    Ok(facts)
}

/// Computes canonical state signatures.
#[derive(Debug, Clone, Default)]
pub struct StateCoder {
    config: CoderConfig,
}

impl StateCoder {
    /// Creates a coder with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a coder with a custom configuration.
    #[must_use]
    pub const fn with_config(config: CoderConfig) -> Self {
        Self { config }
    }

    /// Codes the current working content of a model.
    pub fn code(&self, model: &Model) -> MorphResult<StateCode> {
        let facts = collect_facts(model)?;

        // Initial coloring: which symbol, which argument position, and the
        // stored value. Node identity enters only through individuals.
        let mut codes: BTreeMap<NodeId, u64> = BTreeMap::new();
        let base = mix("node", &[]);
        for (sym, tuples) in &facts {
            for (key, vc) in tuples {
                for (pos, node) in key.nodes().iter().enumerate() {
                    let entry = codes.entry(*node).or_insert(base);
                    *entry = entry.wrapping_add(mix("init", &[*sym, pos as u64, *vc]));
                }
            }
        }
        for individual in model.store().individuals() {
            if let Some(entry) = codes.get_mut(individual) {
                *entry =
                    entry.wrapping_add(mix("individual", &[u64::from(individual.raw())]));
            }
        }

        // Refinement: each round folds the codes of co-occurring nodes into
        // every participant, position-sensitively within the tuple.
        let mut distinct = count_distinct(&codes);
        for _ in 0..self.config.refinement_rounds {
            let mut next = codes.clone();
            for (sym, tuples) in &facts {
                for (key, vc) in tuples {
                    let mut parts: Vec<u64> = Vec::with_capacity(key.arity() + 2);
                    parts.push(*sym);
                    parts.push(*vc);
                    for node in key.nodes() {
                        parts.push(codes.get(node).copied().unwrap_or(base));
                    }
                    let tuple_code = mix("tuple", &parts);
                    for (pos, node) in key.nodes().iter().enumerate() {
                        if let Some(entry) = next.get_mut(node) {
                            *entry =
                                entry.wrapping_add(mix("pos", &[pos as u64, tuple_code]));
                        }
                    }
                }
            }
            codes = next;
            let refined = count_distinct(&codes);
            if refined == distinct {
                break;
            }
            distinct = refined;
        }

        // Aggregate order-independently so node id assignment cannot leak in.
        let mut model_code = 0u64;
        for (sym, tuples) in &facts {
            for (key, vc) in tuples {
                let mut parts: Vec<u64> = Vec::with_capacity(key.arity() + 2);
                parts.push(*sym);
                parts.push(*vc);
                for node in key.nodes() {
                    parts.push(codes.get(node).copied().unwrap_or(base));
                }
                model_code = model_code.wrapping_add(mix("fact", &parts));
            }
        }
        for code in codes.values() {
            model_code = model_code.wrapping_add(mix("obj", &[*code]));
        }

        Ok(StateCode {
            model_code,
            object_codes: codes,
        })
    }
}

fn count_distinct(codes: &BTreeMap<NodeId, u64>) -> usize {
    let set: HashSet<u64> = codes.values().copied().collect();
    set.len()
}

/// Outcome of an explicit morphism search between two states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EquivalenceResult {
    /// A content-preserving node bijection exists.
    Isomorphic,
    /// No such bijection exists.
    Different,
    /// The bounded search gave up. Callers must treat this as different and
    /// must not prune.
    Unknown,
}

/// Escalation check behind the `model_code` pre-filter.
///
/// Attempts to build an explicit node-to-node bijection consistent with
/// every non-excluded symbol's tuples. Individuals anchor the search: a
/// named constant may only map to itself.
#[derive(Debug, Clone)]
pub struct StateEquivalenceChecker {
    budget: usize,
    coder: StateCoder,
}

impl Default for StateEquivalenceChecker {
    fn default() -> Self {
        Self {
            budget: 10_000,
            coder: StateCoder::new(),
        }
    }
}

impl StateEquivalenceChecker {
    /// Creates a checker with the given search budget (candidate assignments
    /// tried before giving up with `Unknown`).
    #[must_use]
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            coder: StateCoder::new(),
        }
    }

    /// Searches for a bijection between two models' nodes.
    pub fn construct_morphism(&self, a: &Model, b: &Model) -> MorphResult<EquivalenceResult> {
        let code_a = self.coder.code(a)?;
        let code_b = self.coder.code(b)?;
        self.construct_morphism_with_codes(a, &code_a, b, &code_b)
    }

    /// Searches for a bijection using precomputed state codes.
    pub fn construct_morphism_with_codes(
        &self,
        a: &Model,
        code_a: &StateCode,
        b: &Model,
        code_b: &StateCode,
    ) -> MorphResult<EquivalenceResult> {
        let facts_a = keyed_facts(a)?;
        let facts_b = keyed_facts(b)?;

        if facts_a.len() != facts_b.len() {
            return Ok(EquivalenceResult::Different);
        }
        for ((sa, ta), (sb, tb)) in facts_a.iter().zip(facts_b.iter()) {
            if sa != sb || ta.len() != tb.len() {
                return Ok(EquivalenceResult::Different);
            }
        }

        // Code classes must match as multisets.
        if class_sizes(code_a) != class_sizes(code_b) {
            return Ok(EquivalenceResult::Different);
        }

        let individuals: BTreeSet<NodeId> = a.store().individuals().clone();

        // Most-constrained nodes first: small code classes anchor the search.
        let sizes = class_sizes(code_a);
        let mut a_nodes: Vec<NodeId> = code_a.object_codes().keys().copied().collect();
        a_nodes.sort_by_key(|n| {
            let code = code_a.object_codes()[n];
            (sizes.get(&code).copied().unwrap_or(0), code, n.raw())
        });

        let mut by_code: HashMap<u64, Vec<NodeId>> = HashMap::new();
        for (node, code) in code_b.object_codes() {
            by_code.entry(*code).or_default().push(*node);
        }

        let mut search = MorphismSearch {
            a_nodes: &a_nodes,
            code_a,
            by_code: &by_code,
            individuals: &individuals,
            facts_a: &facts_a,
            facts_b: &facts_b,
            assignment: HashMap::new(),
            used: HashSet::new(),
            attempts: 0,
            budget: self.budget,
        };

        match search.run(0) {
            SearchOutcome::Found => Ok(EquivalenceResult::Isomorphic),
            SearchOutcome::NotFound => Ok(EquivalenceResult::Different),
            SearchOutcome::BudgetExhausted => Ok(EquivalenceResult::Unknown),
        }
    }
}

type KeyedFacts = Vec<(u64, BTreeSet<(Tuple, u64)>)>;

fn keyed_facts(model: &Model) -> MorphResult<KeyedFacts> {
    Ok(collect_facts(model)?
        .into_iter()
        .map(|(sym, tuples)| (sym, tuples.into_iter().collect()))
        .collect())
}

fn class_sizes(code: &StateCode) -> BTreeMap<u64, usize> {
    let mut sizes = BTreeMap::new();
    for c in code.object_codes().values() {
        *sizes.entry(*c).or_insert(0) += 1;
    }
    sizes
}

enum SearchOutcome {
    Found,
    NotFound,
    BudgetExhausted,
}

struct MorphismSearch<'a> {
    a_nodes: &'a [NodeId],
    code_a: &'a StateCode,
    by_code: &'a HashMap<u64, Vec<NodeId>>,
    individuals: &'a BTreeSet<NodeId>,
    facts_a: &'a KeyedFacts,
    facts_b: &'a KeyedFacts,
    assignment: HashMap<NodeId, NodeId>,
    used: HashSet<NodeId>,
    attempts: usize,
    budget: usize,
}

impl MorphismSearch<'_> {
    fn run(&mut self, depth: usize) -> SearchOutcome {
        if depth == self.a_nodes.len() {
            return if self.mapping_preserves_facts() {
                SearchOutcome::Found
            } else {
                SearchOutcome::NotFound
            };
        }

        let node = self.a_nodes[depth];
        let code = self.code_a.object_codes()[&node];

        let candidates: Vec<NodeId> = if self.individuals.contains(&node) {
            vec![node]
        } else {
            self.by_code.get(&code).cloned().unwrap_or_default()
        };

        for candidate in candidates {
            if self.used.contains(&candidate) {
                continue;
            }
            // A named constant can only be the image of itself.
            if self.individuals.contains(&candidate) && candidate != node {
                continue;
            }
            if self.attempts >= self.budget {
                return SearchOutcome::BudgetExhausted;
            }
            self.attempts += 1;

            self.assignment.insert(node, candidate);
            self.used.insert(candidate);
            match self.run(depth + 1) {
                SearchOutcome::Found => return SearchOutcome::Found,
                SearchOutcome::BudgetExhausted => return SearchOutcome::BudgetExhausted,
                SearchOutcome::NotFound => {
                    self.assignment.remove(&node);
                    self.used.remove(&candidate);
                }
            }
        }

        SearchOutcome::NotFound
    }

    fn mapping_preserves_facts(&self) -> bool {
        for ((_, tuples_a), (_, tuples_b)) in self.facts_a.iter().zip(self.facts_b.iter()) {
            for (key, vc) in tuples_a {
                let mapped: Vec<NodeId> = key
                    .nodes()
                    .iter()
                    .map(|n| self.assignment.get(n).copied().unwrap_or(*n))
                    .collect();
                let image = (Tuple::from(mapped), *vc);
                if !tuples_b.contains(&image) {
                    return false;
                }
            }
        }
        true
    }
}
