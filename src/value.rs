//! Values stored per tuple, including the four-valued truth algebra.
//!
//! Partial models record what is known, not just what is true: a relation
//! tuple may be `Unknown` (either polarity still possible), definitely `True`
//! or `False`, or `Error` (contradictory requirements merged). `merge` folds
//! two partial facts into one and is the only way truth values combine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Four-valued truth used to merge partial facts.
///
/// The information order is `Unknown < True, False < Error`: `Unknown` says
/// nothing, `True`/`False` pin a polarity, and `Error` records that both
/// polarities were required at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruthValue {
    /// No information; both polarities remain possible.
    Unknown,
    /// Definitely true.
    True,
    /// Definitely false.
    False,
    /// Contradiction: true and false were both required.
    Error,
}

impl TruthValue {
    /// Merges two partial facts, taking the join in the information order.
    ///
    /// Merge is commutative and idempotent; `Unknown` is the identity and
    /// `Error` is absorbing.
    #[must_use]
    pub const fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Self::Unknown, v) | (v, Self::Unknown) => v,
            (Self::Error, _) | (_, Self::Error) => Self::Error,
            (Self::True, Self::True) => Self::True,
            (Self::False, Self::False) => Self::False,
            (Self::True, Self::False) | (Self::False, Self::True) => Self::Error,
        }
    }

    /// Returns true if the value pins a single polarity.
    #[must_use]
    pub const fn is_concrete(self) -> bool {
        matches!(self, Self::True | Self::False)
    }

    /// Returns true if some completion of the model can make this fact true.
    #[must_use]
    pub const fn may_be_true(self) -> bool {
        matches!(self, Self::True | Self::Unknown)
    }

    /// Returns true if every completion of the model makes this fact true.
    #[must_use]
    pub const fn must_be_true(self) -> bool {
        matches!(self, Self::True | Self::Error)
    }
}

impl Default for TruthValue {
    fn default() -> Self {
        Self::Unknown
    }
}

impl From<bool> for TruthValue {
    fn from(v: bool) -> Self {
        if v {
            Self::True
        } else {
            Self::False
        }
    }
}

impl fmt::Display for TruthValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::True => "true",
            Self::False => "false",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Possible values a symbol can associate with a tuple.
///
/// A symbol's default value means "absent": writing the default removes the
/// key from storage, and reading a missing key yields the default.
///
/// # Examples
///
/// ```
/// use morphspace::Value;
///
/// let flag = Value::Bool(true);
/// let count = Value::Int(3);
///
/// assert!(flag.is_bool());
/// assert_eq!(count.as_int(), Some(3));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Bool(bool),
    Int(i64),
    Truth(TruthValue),
    None,
}

impl Value {
    pub const fn is_bool(&self) -> bool {
        matches!(self, Self::Bool(_))
    }

    pub const fn is_int(&self) -> bool {
        matches!(self, Self::Int(_))
    }

    pub const fn is_truth(&self) -> bool {
        matches!(self, Self::Truth(_))
    }

    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_truth(&self) -> Option<TruthValue> {
        match self {
            Self::Truth(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns a human-readable type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Truth(_) => "truth",
            Self::None => "none",
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::None
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Truth(v) => write!(f, "{v}"),
            Self::None => write!(f, "none"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<TruthValue> for Value {
    fn from(v: TruthValue) -> Self {
        Self::Truth(v)
    }
}
