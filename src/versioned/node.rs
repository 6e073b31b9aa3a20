//! Persistent hash-array-mapped trie nodes.
//!
//! Key invariants:
//! - Nodes are immutable once shared; every update path-copies the O(log n)
//!   nodes from root to the touched leaf and reuses everything else.
//! - A leaf holds every entry with one full 64-bit key hash; two distinct
//!   hashes never share a leaf.
//! - Branch children are ordered by ascending bit index of the 32-bit bitmap.

use std::sync::Arc;

use crate::tuple::Tuple;
use crate::value::Value;

/// Bits consumed per trie level.
const BITS: u32 = 5;
/// Deepest shift at which hashes can still disagree (64 bits / 5 per level).
const MAX_SHIFT: u32 = 60;

#[derive(Debug)]
pub(crate) enum Node {
    Leaf {
        hash: u64,
        entries: Vec<(Tuple, Value)>,
    },
    Branch {
        bitmap: u32,
        children: Vec<Arc<Node>>,
    },
}

/// A raw difference between two subtrees: key, value in the left tree (if
/// present), value in the right tree (if present).
pub(crate) type RawDiff = (Tuple, Option<Value>, Option<Value>);

fn bit_at(hash: u64, shift: u32) -> u32 {
    1u32 << ((hash >> shift) & 0x1f)
}

fn index_of(bitmap: u32, bit: u32) -> usize {
    (bitmap & (bit - 1)).count_ones() as usize
}

pub(crate) fn get<'a>(root: &'a Node, hash: u64, key: &Tuple) -> Option<&'a Value> {
    let mut node = root;
    let mut shift = 0u32;
    loop {
        match node {
            Node::Leaf { hash: h, entries } => {
                if *h != hash {
                    return None;
                }
                return entries.iter().find(|(k, _)| k == key).map(|(_, v)| v);
            }
            Node::Branch { bitmap, children } => {
                let bit = bit_at(hash, shift);
                if bitmap & bit == 0 {
                    return None;
                }
                node = &children[index_of(*bitmap, bit)];
                shift += BITS;
            }
        }
    }
}

/// Inserts or replaces `key`, returning the new root and the old value.
pub(crate) fn insert(
    node: &Arc<Node>,
    shift: u32,
    hash: u64,
    key: Tuple,
    value: Value,
) -> (Arc<Node>, Option<Value>) {
    match node.as_ref() {
        Node::Leaf { hash: h, entries } => {
            if *h == hash {
                let mut entries = entries.clone();
                if let Some(slot) = entries.iter_mut().find(|(k, _)| *k == key) {
                    let old = std::mem::replace(&mut slot.1, value);
                    return (Arc::new(Node::Leaf { hash, entries }), Some(old));
                }
                entries.push((key, value));
                (Arc::new(Node::Leaf { hash, entries }), None)
            } else {
                (split_leaf(Arc::clone(node), *h, shift, hash, key, value), None)
            }
        }
        Node::Branch { bitmap, children } => {
            let bit = bit_at(hash, shift);
            let idx = index_of(*bitmap, bit);
            if bitmap & bit != 0 {
                let (child, old) = insert(&children[idx], shift + BITS, hash, key, value);
                let mut children = children.clone();
                children[idx] = child;
                (
                    Arc::new(Node::Branch {
                        bitmap: *bitmap,
                        children,
                    }),
                    old,
                )
            } else {
                let mut children = children.clone();
                children.insert(
                    idx,
                    Arc::new(Node::Leaf {
                        hash,
                        entries: vec![(key, value)],
                    }),
                );
                (
                    Arc::new(Node::Branch {
                        bitmap: bitmap | bit,
                        children,
                    }),
                    None,
                )
            }
        }
    }
}

/// Pushes an existing leaf and a new entry with a different hash below a
/// fresh branch, descending until their hash chunks disagree.
fn split_leaf(
    existing: Arc<Node>,
    existing_hash: u64,
    shift: u32,
    hash: u64,
    key: Tuple,
    value: Value,
) -> Arc<Node> {
    debug_assert!(shift <= MAX_SHIFT, "distinct hashes must split by shift 60");
    let existing_bit = bit_at(existing_hash, shift);
    let new_bit = bit_at(hash, shift);
    if existing_bit == new_bit {
        let child = split_leaf(existing, existing_hash, shift + BITS, hash, key, value);
        Arc::new(Node::Branch {
            bitmap: existing_bit,
            children: vec![child],
        })
    } else {
        let new_leaf = Arc::new(Node::Leaf {
            hash,
            entries: vec![(key, value)],
        });
        let children = if existing_bit < new_bit {
            vec![existing, new_leaf]
        } else {
            vec![new_leaf, existing]
        };
        Arc::new(Node::Branch {
            bitmap: existing_bit | new_bit,
            children,
        })
    }
}

/// Removes `key`, returning the new subtree (`None` when it became empty)
/// and the removed value. Returns `None` when the key is absent.
pub(crate) fn remove(
    node: &Arc<Node>,
    shift: u32,
    hash: u64,
    key: &Tuple,
) -> Option<(Option<Arc<Node>>, Value)> {
    match node.as_ref() {
        Node::Leaf { hash: h, entries } => {
            if *h != hash {
                return None;
            }
            let pos = entries.iter().position(|(k, _)| k == key)?;
            let mut entries = entries.clone();
            let (_, old) = entries.remove(pos);
            if entries.is_empty() {
                Some((None, old))
            } else {
                Some((Some(Arc::new(Node::Leaf { hash: *h, entries })), old))
            }
        }
        Node::Branch { bitmap, children } => {
            let bit = bit_at(hash, shift);
            if bitmap & bit == 0 {
                return None;
            }
            let idx = index_of(*bitmap, bit);
            let (new_child, old) = remove(&children[idx], shift + BITS, hash, key)?;
            match new_child {
                Some(child) => {
                    // Propagate collapses so the tree shape stays a function
                    // of content alone: a branch holding one leaf is the leaf.
                    if children.len() == 1 && matches!(child.as_ref(), Node::Leaf { .. }) {
                        return Some((Some(child), old));
                    }
                    let mut children = children.clone();
                    children[idx] = child;
                    Some((
                        Some(Arc::new(Node::Branch {
                            bitmap: *bitmap,
                            children,
                        })),
                        old,
                    ))
                }
                None => {
                    let bitmap = bitmap & !bit;
                    if bitmap == 0 {
                        return Some((None, old));
                    }
                    let mut children = children.clone();
                    children.remove(idx);
                    // Collapse a single-leaf branch so the tree shape is a
                    // function of content alone.
                    if children.len() == 1 && matches!(children[0].as_ref(), Node::Leaf { .. }) {
                        return Some((children.pop(), old));
                    }
                    Some((Some(Arc::new(Node::Branch { bitmap, children })), old))
                }
            }
        }
    }
}

/// Compares two collision buckets sharing one hash.
fn diff_entries(a: &[(Tuple, Value)], b: &[(Tuple, Value)], out: &mut Vec<RawDiff>) {
    for (k, va) in a {
        match b.iter().find(|(kb, _)| kb == k) {
            Some((_, vb)) => {
                if va != vb {
                    out.push((k.clone(), Some(va.clone()), Some(vb.clone())));
                }
            }
            None => out.push((k.clone(), Some(va.clone()), None)),
        }
    }
    for (k, vb) in b {
        if !a.iter().any(|(ka, _)| ka == k) {
            out.push((k.clone(), None, Some(vb.clone())));
        }
    }
}

/// Appends every entry below `node` to `out` with the given wrapping.
fn collect(node: &Node, f: &mut impl FnMut(Tuple, Value)) {
    match node {
        Node::Leaf { entries, .. } => {
            for (k, v) in entries {
                f(k.clone(), v.clone());
            }
        }
        Node::Branch { children, .. } => {
            for child in children {
                collect(child, f);
            }
        }
    }
}

/// Walks two roots in lock step, short-circuiting on shared subtrees, and
/// appends only truly differing keys to `out`.
pub(crate) fn diff_nodes(
    a: Option<&Arc<Node>>,
    b: Option<&Arc<Node>>,
    shift: u32,
    out: &mut Vec<RawDiff>,
) {
    match (a, b) {
        (None, None) => {}
        (Some(x), None) => collect(x, &mut |k, v| out.push((k, Some(v), None))),
        (None, Some(y)) => collect(y, &mut |k, v| out.push((k, None, Some(v)))),
        (Some(x), Some(y)) => {
            if Arc::ptr_eq(x, y) {
                return;
            }
            match (x.as_ref(), y.as_ref()) {
                (
                    Node::Leaf {
                        hash: ha,
                        entries: ea,
                    },
                    Node::Leaf {
                        hash: hb,
                        entries: eb,
                    },
                ) => {
                    if ha == hb {
                        diff_entries(ea, eb, out);
                    } else {
                        for (k, v) in ea {
                            out.push((k.clone(), Some(v.clone()), None));
                        }
                        for (k, v) in eb {
                            out.push((k.clone(), None, Some(v.clone())));
                        }
                    }
                }
                (
                    Node::Branch {
                        bitmap: ba,
                        children: ca,
                    },
                    Node::Branch {
                        bitmap: bb,
                        children: cb,
                    },
                ) => {
                    let mut bits = ba | bb;
                    while bits != 0 {
                        let bit = bits & bits.wrapping_neg();
                        bits ^= bit;
                        let ax = (ba & bit != 0).then(|| &ca[index_of(*ba, bit)]);
                        let bx = (bb & bit != 0).then(|| &cb[index_of(*bb, bit)]);
                        diff_nodes(ax, bx, shift + BITS, out);
                    }
                }
                (Node::Leaf { hash, .. }, Node::Branch { bitmap, children }) => {
                    let leaf_bit = bit_at(*hash, shift);
                    let mut bits = bitmap | leaf_bit;
                    while bits != 0 {
                        let bit = bits & bits.wrapping_neg();
                        bits ^= bit;
                        let ax = (bit == leaf_bit).then_some(x);
                        let bx = (bitmap & bit != 0).then(|| &children[index_of(*bitmap, bit)]);
                        diff_nodes(ax, bx, shift + BITS, out);
                    }
                }
                (Node::Branch { bitmap, children }, Node::Leaf { hash, .. }) => {
                    let leaf_bit = bit_at(*hash, shift);
                    let mut bits = bitmap | leaf_bit;
                    while bits != 0 {
                        let bit = bits & bits.wrapping_neg();
                        bits ^= bit;
                        let ax = (bitmap & bit != 0).then(|| &children[index_of(*bitmap, bit)]);
                        let bx = (bit == leaf_bit).then_some(y);
                        diff_nodes(ax, bx, shift + BITS, out);
                    }
                }
            }
        }
    }
}
