//! The persisted form of a stratum subtree.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tessera_merkle::{HashValue, Suffix};

/// A dense fixed-depth subtree rooted at a byte-aligned prefix.
///
/// Only `leaves` are authoritative in storage: `internal_nodes` is
/// materialised solely for completely filled log-style tiles, and
/// `root_hash` is always derived on load. The tile's own root is never
/// one of its interior nodes; it lives in the parent tile.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    /// The bits identifying the tile root, as whole bytes.
    pub prefix: Vec<u8>,
    /// Height of the tile.
    pub depth: u32,
    /// Hashes at depth `|prefix|*8 + depth`, keyed by in-tile suffix.
    pub leaves: BTreeMap<Suffix, HashValue>,
    /// Interior hashes, keyed by in-tile suffix.
    pub internal_nodes: BTreeMap<Suffix, HashValue>,
    /// Expected size of `internal_nodes` for a fully populated tile;
    /// zero otherwise.
    pub internal_node_count: u32,
    /// Derived root; stripped from flush payloads and recomputed on load.
    pub root_hash: Option<HashValue>,
}

impl Tile {
    /// A fresh, empty tile.
    pub fn empty(prefix: Vec<u8>, depth: u32) -> Self {
        Self {
            prefix,
            depth,
            leaves: BTreeMap::new(),
            internal_nodes: BTreeMap::new(),
            internal_node_count: 0,
            root_hash: None,
        }
    }

    /// The tile root's absolute depth in bits.
    pub fn prefix_len_bits(&self) -> usize {
        self.prefix.len() * 8
    }

    /// Whether every one of the `2^depth` leaf slots holds a hash.
    pub fn is_fully_populated(&self) -> bool {
        // Tiles deep enough to overflow the shift can never fill up.
        if self.depth >= 64 {
            return false;
        }
        self.leaves.len() as u64 == 1u64 << self.depth
    }

    /// Number of interior nodes a fully populated tile materialises:
    /// every level strictly between the leaves and the root.
    pub fn full_internal_node_count(depth: u32) -> u32 {
        debug_assert!(depth < 32);
        (1u32 << depth) - 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_detection() {
        let mut tile = Tile::empty(vec![0xab], 2);
        assert!(!tile.is_fully_populated());
        for i in 0..4u64 {
            tile.leaves
                .insert(Suffix::from_index(2, i), HashValue::new([i as u8; 32]));
        }
        assert!(tile.is_fully_populated());
    }

    #[test]
    fn test_deep_tiles_never_count_as_full() {
        let tile = Tile::empty(vec![0xab], 248);
        assert!(!tile.is_fully_populated());
    }

    #[test]
    fn test_full_internal_node_count() {
        assert_eq!(Tile::full_internal_node_count(8), 254);
        assert_eq!(Tile::full_internal_node_count(2), 2);
    }
}
