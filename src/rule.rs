//! Transformation rules and their activations.
//!
//! A rule couples a precondition (a `PatternMatcher`, the seam to the
//! external incremental query evaluator) with an action that rewrites the
//! model at one match. An `Activation` is one candidate application: a
//! (rule, match tuple) pair, recomputed on demand and compared by content.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::MorphResult;
use crate::model::Model;
use crate::tuple::Tuple;

static NEXT_RULE_ID: AtomicU64 = AtomicU64::new(0);

/// Process-unique identity of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleId(u64);

impl RuleId {
    /// Returns the raw representation.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule:{}", self.0)
    }
}

/// Precondition seam: produces candidate match tuples for one rule.
///
/// Implementations are queried against the current working model and must be
/// re-queried only after the model's `flush_changes` has run. The model's
/// `revision` may be used as a cache key.
pub trait PatternMatcher: Send + Sync {
    /// Returns all current matches.
    fn matches(&self, model: &Model) -> MorphResult<Vec<Tuple>>;

    /// Returns the number of current matches.
    fn size(&self, model: &Model) -> MorphResult<usize> {
        Ok(self.matches(model)?.len())
    }

    /// Returns true if there is no current match.
    fn is_empty(&self, model: &Model) -> MorphResult<bool> {
        Ok(self.matches(model)?.is_empty())
    }
}

/// Action seam: rewrites the model at one match.
pub trait RuleAction: Send + Sync {
    /// Executes the rewrite for `binding`.
    ///
    /// Returns `Ok(false)` when the action's own invariants reject the
    /// binding (for example the matched object no longer exists); the caller
    /// treats the activation as tried-and-failed. Errors are contract
    /// violations and abort the exploration.
    fn fire(&self, model: &mut Model, binding: &Tuple) -> MorphResult<bool>;
}

/// Adapter turning a closure into a `PatternMatcher`.
pub struct FnMatcher<F>(F);

impl<F> FnMatcher<F>
where
    F: Fn(&Model) -> MorphResult<Vec<Tuple>> + Send + Sync,
{
    /// Wraps a closure as a matcher.
    pub const fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> PatternMatcher for FnMatcher<F>
where
    F: Fn(&Model) -> MorphResult<Vec<Tuple>> + Send + Sync,
{
    fn matches(&self, model: &Model) -> MorphResult<Vec<Tuple>> {
        (self.0)(model)
    }
}

/// Adapter turning a closure into a `RuleAction`.
pub struct FnAction<F>(F);

impl<F> FnAction<F>
where
    F: Fn(&mut Model, &Tuple) -> MorphResult<bool> + Send + Sync,
{
    /// Wraps a closure as an action.
    pub const fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> RuleAction for FnAction<F>
where
    F: Fn(&mut Model, &Tuple) -> MorphResult<bool> + Send + Sync,
{
    fn fire(&self, model: &mut Model, binding: &Tuple) -> MorphResult<bool> {
        (self.0)(model, binding)
    }
}

/// A transformation rule: named precondition plus action.
#[derive(Clone)]
pub struct Rule {
    id: RuleId,
    name: String,
    matcher: Arc<dyn PatternMatcher>,
    action: Arc<dyn RuleAction>,
}

impl Rule {
    /// Creates a rule with a fresh identity.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        matcher: Arc<dyn PatternMatcher>,
        action: Arc<dyn RuleAction>,
    ) -> Self {
        Self {
            id: RuleId(NEXT_RULE_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
            matcher,
            action,
        }
    }

    /// Returns the rule's identity.
    #[must_use]
    pub const fn id(&self) -> RuleId {
        self.id
    }

    /// Returns the rule's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the precondition matcher.
    #[must_use]
    pub fn matcher(&self) -> &dyn PatternMatcher {
        self.matcher.as_ref()
    }

    /// Returns the action.
    #[must_use]
    pub fn action(&self) -> &dyn RuleAction {
        self.action.as_ref()
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// One candidate application of a rule at one match.
///
/// Equality is by (rule, match tuple); activations are ephemeral and
/// recomputed every time untraversed candidates are requested.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Activation {
    rule: RuleId,
    binding: Tuple,
}

impl Activation {
    /// Creates an activation.
    #[must_use]
    pub const fn new(rule: RuleId, binding: Tuple) -> Self {
        Self { rule, binding }
    }

    /// Returns the rule identity.
    #[must_use]
    pub const fn rule_id(&self) -> RuleId {
        self.rule
    }

    /// Returns the match tuple.
    #[must_use]
    pub const fn binding(&self) -> &Tuple {
        &self.binding
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.rule, self.binding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelStore;
    use crate::symbol::Symbol;
    use crate::tuple::NodeId;
    use crate::value::Value;

    fn empty_model() -> Model {
        ModelStore::builder().build().unwrap().create_model()
    }

    #[test]
    fn test_rule_identity() {
        let matcher = Arc::new(FnMatcher::new(|_m: &Model| Ok(vec![Tuple::empty()])));
        let action = Arc::new(FnAction::new(|_m: &mut Model, _b: &Tuple| Ok(true)));
        let a = Rule::new("r", matcher.clone(), action.clone());
        let b = Rule::new("r", matcher, action);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.name(), "r");
    }

    #[test]
    fn test_matcher_defaults_derive_from_matches() {
        let matcher = FnMatcher::new(|_m: &Model| {
            Ok(vec![
                Tuple::unary(NodeId::new(0)),
                Tuple::unary(NodeId::new(1)),
            ])
        });
        let model = empty_model();
        assert_eq!(matcher.size(&model).unwrap(), 2);
        assert!(!matcher.is_empty(&model).unwrap());
    }

    #[test]
    fn test_action_can_reject_binding() {
        let person = Symbol::new("person", 1, Value::Bool(false));
        let store = ModelStore::builder().symbol(&person).build().unwrap();
        let mut model = store.create_model();

        let action = FnAction::new(|model: &mut Model, binding: &Tuple| {
            let Some(node) = binding.get(0) else {
                return Ok(false);
            };
            if !model.object_exists(node)? {
                return Ok(false);
            }
            Ok(true)
        });

        assert!(!action
            .fire(&mut model, &Tuple::unary(NodeId::new(5)))
            .unwrap());
        let a = model.create_object().unwrap();
        assert!(action.fire(&mut model, &Tuple::unary(a)).unwrap());
    }

    #[test]
    fn test_activation_equality_and_order() {
        let r1 = RuleId(1);
        let r2 = RuleId(2);
        let a = Activation::new(r1, Tuple::unary(NodeId::new(0)));
        let b = Activation::new(r1, Tuple::unary(NodeId::new(0)));
        let c = Activation::new(r2, Tuple::unary(NodeId::new(0)));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a < c);
    }
}
