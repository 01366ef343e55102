//! Hashing capability and the null-subtree hash table.

use lazy_static::lazy_static;
use sha2::{Digest, Sha256};

use crate::node::NodeId;
use crate::{HashValue, HASH_LENGTH};

/// Domain separation prefixes for hashing.
pub mod prefix {
    /// Prefix for leaf hashes.
    pub const LEAF: &[u8] = &[0x00];
    /// Prefix for interior node hashes.
    pub const INTERIOR: &[u8] = &[0x01];
}

/// The hashing capability injected into the tree engine.
///
/// Implementations must produce digests of exactly `size()` bytes. The
/// default `hash_empty` is position-independent; hashers that bind the
/// empty hash to a tree or position override it.
pub trait MapHasher: Send + Sync + 'static {
    /// Digest size in bytes.
    fn size(&self) -> usize;

    /// Digest size in bits; also the depth of the tree.
    fn bit_len(&self) -> usize {
        self.size() * 8
    }

    /// Hash a leaf's data.
    fn hash_leaf(&self, leaf: &[u8]) -> HashValue;

    /// Hash a pair of child hashes into their parent.
    fn hash_children(&self, left: &HashValue, right: &HashValue) -> HashValue;

    /// The hash of an empty leaf, used to seed the null-hash table.
    fn hash_empty(&self, _tree_id: u64, _index: &NodeId, _height: usize) -> HashValue {
        self.hash_leaf(&[])
    }
}

/// SHA-256 hashing with the standard leaf/interior domain separation.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sha256MapHasher;

impl Sha256MapHasher {
    fn digest(parts: &[&[u8]]) -> HashValue {
        let mut hasher = Sha256::new();
        for p in parts {
            hasher.update(p);
        }
        let result = hasher.finalize();
        let mut bytes = [0u8; HASH_LENGTH];
        bytes.copy_from_slice(&result);
        HashValue::new(bytes)
    }
}

impl MapHasher for Sha256MapHasher {
    fn size(&self) -> usize {
        HASH_LENGTH
    }

    fn hash_leaf(&self, leaf: &[u8]) -> HashValue {
        Self::digest(&[prefix::LEAF, leaf])
    }

    fn hash_children(&self, left: &HashValue, right: &HashValue) -> HashValue {
        Self::digest(&[prefix::INTERIOR, left.as_bytes(), right.as_bytes()])
    }
}

/// The pre-computed hashes of completely empty subtrees, one per depth.
///
/// `at_depth(D)` is the empty-leaf hash; `at_depth(d)` for `d < D` is
/// `hash_children` of the level below applied to itself. Computed once per
/// hasher and shared.
pub struct NullHashes {
    // Indexed by absolute depth, 0..=D.
    hashes: Vec<HashValue>,
}

impl NullHashes {
    /// Compute the table for a hasher.
    pub fn new<H: MapHasher + ?Sized>(hasher: &H, tree_id: u64) -> Self {
        let d = hasher.bit_len();
        let mut hashes = vec![HashValue::ZERO; d + 1];
        hashes[d] = hasher.hash_empty(tree_id, &NodeId::root(), 0);
        for depth in (0..d).rev() {
            hashes[depth] = hasher.hash_children(&hashes[depth + 1], &hashes[depth + 1]);
        }
        Self { hashes }
    }

    /// The null-subtree hash rooted at the given absolute depth.
    pub fn at_depth(&self, depth: usize) -> HashValue {
        self.hashes[depth]
    }

    /// The empty-leaf hash.
    pub fn empty_leaf(&self) -> HashValue {
        self.hashes[self.hashes.len() - 1]
    }

    /// The root of a completely empty tree.
    pub fn empty_root(&self) -> HashValue {
        self.hashes[0]
    }
}

lazy_static! {
    static ref SHA256_NULL_HASHES: NullHashes = NullHashes::new(&Sha256MapHasher, 0);
}

/// The shared null-hash table for [`Sha256MapHasher`].
///
/// The default empty hash is position- and tree-independent, so one table
/// serves every SHA-256 tree.
pub fn sha256_null_hashes() -> &'static NullHashes {
    &SHA256_NULL_HASHES
}
