//! Stratum plan and tile layout.
//!
//! A stratum plan is a sequence of positive depths summing to the tree
//! depth, e.g. `[8, 248]` for a 256-bit map or `[8; 32]` for a uniform
//! tiling. Every stratum except possibly the last must be a multiple of 8
//! so that tile prefixes stay byte-aligned. The same plan drives both the
//! subtree writer and the tile cache.

use crate::node::{NodeId, Suffix};
use crate::{SmtError, SmtResult};

/// The tile decomposition of a tree of a fixed depth.
#[derive(Clone, Debug)]
pub struct TreeLayout {
    depths: Vec<usize>,
    // Cumulative stratum starts: boundaries[i] is the prefix length (in
    // bits) of tiles in stratum i.
    boundaries: Vec<usize>,
    tree_depth: usize,
}

impl TreeLayout {
    /// Validate a stratum plan against the tree depth.
    pub fn new(depths: Vec<usize>, tree_depth: usize) -> SmtResult<Self> {
        if depths.is_empty() {
            return Err(SmtError::InvalidPlan("empty stratum plan".into()));
        }
        let mut boundaries = Vec::with_capacity(depths.len());
        let mut total = 0usize;
        for (i, d) in depths.iter().enumerate() {
            if *d == 0 {
                return Err(SmtError::InvalidPlan(format!("stratum {} has depth 0", i)));
            }
            if i + 1 < depths.len() && *d % 8 != 0 {
                return Err(SmtError::InvalidPlan(format!(
                    "stratum {} depth {} is not a multiple of 8",
                    i, d
                )));
            }
            boundaries.push(total);
            total += *d;
        }
        if total != tree_depth {
            return Err(SmtError::InvalidPlan(format!(
                "strata sum to {} bits, tree depth is {}",
                total, tree_depth
            )));
        }
        Ok(Self {
            depths,
            boundaries,
            tree_depth,
        })
    }

    /// The stratum depths, top first.
    pub fn depths(&self) -> &[usize] {
        &self.depths
    }

    /// Total tree depth in bits.
    pub fn tree_depth(&self) -> usize {
        self.tree_depth
    }

    /// Prefix length (bits) of the tile containing a node at the given
    /// depth. A node sitting exactly on a stratum boundary belongs to the
    /// tile *above* it: tile roots are stored as leaves of their parent.
    pub fn tile_prefix_len(&self, prefix_len_bits: usize) -> usize {
        let mut best = 0;
        for b in &self.boundaries {
            if *b < prefix_len_bits {
                best = *b;
            } else {
                break;
            }
        }
        best
    }

    /// Height of the tile rooted at the given (boundary) prefix length.
    pub fn tile_height(&self, tile_prefix_len_bits: usize) -> usize {
        for (i, b) in self.boundaries.iter().enumerate() {
            if *b == tile_prefix_len_bits {
                return self.depths[i];
            }
        }
        debug_assert!(false, "not a stratum boundary: {}", tile_prefix_len_bits);
        *self.depths.last().unwrap_or(&0)
    }

    /// Split a node id into its containing tile's root id and the in-tile
    /// suffix. The root node (zero-length prefix) splits into the root
    /// tile with an empty suffix.
    pub fn split(&self, id: &NodeId) -> (NodeId, Suffix) {
        let b = self.tile_prefix_len(id.prefix_len_bits());
        (id.prefix(b), id.suffix(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_plans() {
        assert!(TreeLayout::new(vec![], 256).is_err());
        assert!(TreeLayout::new(vec![8, 0, 248], 256).is_err());
        assert!(TreeLayout::new(vec![8, 8], 256).is_err());
        assert!(TreeLayout::new(vec![12, 244], 256).is_err());
        // A non-multiple-of-8 tail is fine.
        assert!(TreeLayout::new(vec![8, 244, 4], 256).is_ok());
        assert!(TreeLayout::new(vec![8, 248], 256).is_ok());
    }

    #[test]
    fn test_boundary_nodes_belong_to_parent_tile() {
        let layout = TreeLayout::new(vec![8; 32], 256).unwrap();
        assert_eq!(layout.tile_prefix_len(8), 0);
        assert_eq!(layout.tile_prefix_len(9), 8);
        assert_eq!(layout.tile_prefix_len(256), 248);
        assert_eq!(layout.tile_prefix_len(0), 0);
        assert_eq!(layout.tile_height(0), 8);
        assert_eq!(layout.tile_height(248), 8);
    }

    #[test]
    fn test_split() {
        let layout = TreeLayout::new(vec![8, 248], 256).unwrap();
        let id = NodeId::from_prefix(&[0xaa, 0xbb]).unwrap();
        let (tile, sfx) = layout.split(&id);
        assert_eq!(tile.prefix_bytes(), vec![0xaa]);
        assert_eq!(sfx.bits(), 8);
        assert_eq!(sfx.path(), &[0xbb]);

        let (tile, sfx) = layout.split(&NodeId::root());
        assert_eq!(tile, NodeId::root());
        assert_eq!(sfx.bits(), 0);
    }
}
