//! Client-side verification of inclusion and non-inclusion proofs.
//!
//! A proof is the sibling sequence returned by
//! [`crate::reader::SparseMerkleTreeReader::inclusion_proof`]: leaf
//! sibling first, `None` standing for an empty subtree. Verification
//! substitutes the null-subtree hash for every `None` and folds the
//! sequence up the key's path.

use crate::hasher::{MapHasher, NullHashes};
use crate::{HashValue, SmtError, SmtResult};

/// Verify that `leaf_hash` is committed to at position `key` by `root`.
pub fn verify_inclusion<H: MapHasher + ?Sized>(
    hasher: &H,
    null: &NullHashes,
    root: &HashValue,
    key: &HashValue,
    leaf_hash: &HashValue,
    proof: &[Option<HashValue>],
) -> SmtResult<()> {
    let depth = hasher.bit_len();
    if proof.len() != depth {
        return Err(SmtError::InvalidProof(format!(
            "expected {} siblings, got {}",
            depth,
            proof.len()
        )));
    }
    let mut current = *leaf_hash;
    for (i, sibling) in proof.iter().enumerate() {
        // `current` sits at depth `depth - i`; its last path bit says
        // which side of the parent it hangs from.
        let node_depth = depth - i;
        let sibling = sibling.unwrap_or_else(|| null.at_depth(node_depth));
        current = if key.bit(node_depth - 1) {
            hasher.hash_children(&sibling, &current)
        } else {
            hasher.hash_children(&current, &sibling)
        };
    }
    if current == *root {
        Ok(())
    } else {
        Err(SmtError::InvalidProof(format!(
            "root mismatch: expected {}, computed {}",
            root, current
        )))
    }
}

/// Verify that nothing is committed at position `key`: the proof must
/// resolve to `root` with the empty-leaf hash in the leaf position.
pub fn verify_non_inclusion<H: MapHasher + ?Sized>(
    hasher: &H,
    null: &NullHashes,
    root: &HashValue,
    key: &HashValue,
    proof: &[Option<HashValue>],
) -> SmtResult<()> {
    verify_inclusion(hasher, null, root, key, &null.empty_leaf(), proof)
}
