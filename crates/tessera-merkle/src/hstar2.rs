//! HStar2: the sparse-root algorithm.
//!
//! Computes the root of a subtree whose logical depth can be the full
//! hash bit-length without ever materialising empty branches: recursion
//! only descends into populated branches, and an empty branch resolves to
//! an existing stored hash (via the `get` callback) or to the
//! pre-computed null-subtree hash for its depth.
//!
//! Complexity is `O(k * h)` for `k` leaves in a subtree of height `h`.

use crate::hasher::{MapHasher, NullHashes};
use crate::node::NodeId;
use crate::{HashValue, SmtError, SmtResult};

/// A leaf fed into the algorithm: an index at the subtree's leaf depth
/// plus the hash to place there.
#[derive(Clone, Debug)]
pub struct HStar2LeafHash {
    /// Absolute position; `prefix_len_bits` must equal the subtree's leaf
    /// depth.
    pub index: NodeId,
    /// The hash stored at that position.
    pub hash: HashValue,
}

/// The sparse-root calculator, bound to a hasher and its null-hash table.
pub struct HStar2<'a, H: MapHasher + ?Sized> {
    hasher: &'a H,
    null: &'a NullHashes,
}

impl<'a, H: MapHasher + ?Sized> HStar2<'a, H> {
    pub fn new(hasher: &'a H, null: &'a NullHashes) -> Self {
        Self { hasher, null }
    }

    /// Compute the root of the subtree rooted at `prefix` with height
    /// `subtree_depth`, populated by `leaves`.
    ///
    /// `get` resolves an existing hash for an empty branch; a `None` falls
    /// back to the null-subtree hash at that depth. `set` receives every
    /// computed interior hash, except the subtree's own root when
    /// `prefix` is non-empty: that node belongs to the parent tile.
    pub fn hstar2_nodes<G, S>(
        &self,
        prefix: &[u8],
        subtree_depth: usize,
        mut leaves: Vec<HStar2LeafHash>,
        mut get: G,
        mut set: S,
    ) -> SmtResult<HashValue>
    where
        G: FnMut(&NodeId) -> SmtResult<Option<HashValue>>,
        S: FnMut(&NodeId, HashValue) -> SmtResult<()>,
    {
        let root = NodeId::from_prefix(prefix)?;
        let root_depth = root.prefix_len_bits();
        let leaf_depth = root_depth + subtree_depth;

        for leaf in &leaves {
            if leaf.index.prefix_len_bits() != leaf_depth
                || !leaf.index.prefix(root_depth).equivalent(&root)
            {
                return Err(SmtError::IndexOutsideSubtree(leaf.index));
            }
        }
        leaves.sort_by(|a, b| a.index.cmp(&b.index));
        for pair in leaves.windows(2) {
            if pair[0].index == pair[1].index {
                return Err(SmtError::DuplicateLeafInBatch(pair[0].index));
            }
        }

        self.hstar2b(
            root,
            leaf_depth,
            &leaves,
            &mut get,
            &mut |id: &NodeId, hash| {
                if id.prefix_len_bits() == root_depth && root_depth > 0 {
                    return Ok(());
                }
                set(id, hash)
            },
        )
    }

    fn hstar2b<G, S>(
        &self,
        node: NodeId,
        leaf_depth: usize,
        leaves: &[HStar2LeafHash],
        get: &mut G,
        set: &mut S,
    ) -> SmtResult<HashValue>
    where
        G: FnMut(&NodeId) -> SmtResult<Option<HashValue>>,
        S: FnMut(&NodeId, HashValue) -> SmtResult<()>,
    {
        if leaves.is_empty() {
            if let Some(hash) = get(&node)? {
                return Ok(hash);
            }
            return Ok(self.null.at_depth(node.prefix_len_bits()));
        }
        let depth = node.prefix_len_bits();
        if depth == leaf_depth {
            // Duplicates were rejected up front, so exactly one leaf.
            return Ok(leaves[0].hash);
        }
        let split = leaves.partition_point(|l| !l.index.bit(depth));
        let (lhs, rhs) = leaves.split_at(split);
        let left = self.hstar2b(node.child(false), leaf_depth, lhs, get, set)?;
        let right = self.hstar2b(node.child(true), leaf_depth, rhs, get, set)?;
        let hash = self.hasher.hash_children(&left, &right);
        set(&node, hash)?;
        Ok(hash)
    }
}

/// The exact set of node ids HStar2 will ask `get` for, given the same
/// leaves: the empty-side siblings along every populated path, or the
/// subtree root itself when the batch is empty.
///
/// Callers that live behind asynchronous storage compute this set, fetch
/// it in one batch, and then serve `get` from the result.
pub fn seed_node_ids(
    prefix: &NodeId,
    subtree_depth: usize,
    leaves: &[HStar2LeafHash],
) -> Vec<NodeId> {
    let root_depth = prefix.prefix_len_bits();
    if leaves.is_empty() {
        return vec![*prefix];
    }
    let leaf_depth = root_depth + subtree_depth;
    let mut out = Vec::new();
    for depth in root_depth + 1..=leaf_depth {
        let mut populated: Vec<NodeId> = leaves.iter().map(|l| l.index.prefix(depth)).collect();
        populated.sort_unstable();
        populated.dedup();
        for p in &populated {
            let sib = p.sibling();
            if populated.binary_search(&sib).is_err() {
                out.push(sib);
            }
        }
    }
    out
}
