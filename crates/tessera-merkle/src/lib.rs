//! # tessera-merkle
//!
//! Core engine of a versioned, revision-addressable Sparse Merkle Tree:
//! the authenticated data structure behind a verifiable map. Every key is a
//! fixed-width hash, every key maps to a value hash, and the tree root
//! commits to the entire mapping at a given revision.
//!
//! The crate provides:
//!
//! - [`hasher::MapHasher`]: the injected hashing capability, with a
//!   SHA-256 implementation and the table of null-subtree hashes
//! - [`node::NodeId`]: node addressing by bit-prefix, with sibling and
//!   tile-split operations
//! - [`hstar2::HStar2`]: the sparse-root algorithm that computes the root
//!   of a 256-deep tree without materialising empty branches
//! - [`writer::SparseMerkleTreeWriter`]: concurrent, stratified batch
//!   writes at a new revision
//! - [`reader::SparseMerkleTreeReader`]: historical roots and
//!   inclusion/non-inclusion proofs
//! - [`storage::TreeStorage`]: the contract a storage layer implements
//!   (see the `tessera-storage` crate for the tile cache and the
//!   in-memory backend)
//!
//! ## Design Philosophy
//!
//! The tree is decomposed into nested fixed-depth strata. Each stratum is
//! served by its own worker task; parent strata consume child-stratum
//! roots as deferred leaves, so the whole batch pipelines bottom-up
//! without any component holding a cyclic reference. Storage is only ever
//! touched inside a worker's finalisation transaction.

pub mod cancel;
pub mod compact;
pub mod error;
pub mod hash;
pub mod hasher;
pub mod hstar2;
pub mod layout;
pub mod node;
pub mod proof;
pub mod reader;
pub mod storage;
pub mod writer;

pub use cancel::{CancelToken, Canceller};
pub use error::{SmtError, SmtResult};
pub use hash::HashValue;
pub use hasher::{MapHasher, NullHashes, Sha256MapHasher};
pub use hstar2::{HStar2, HStar2LeafHash};
pub use layout::TreeLayout;
pub use node::{NodeId, Suffix};
pub use reader::SparseMerkleTreeReader;
pub use storage::{Node, TreeStorage, TreeTx};
pub use writer::{HashKeyValue, SparseMerkleTreeWriter};

/// The length of hash digests used throughout the tree (32 bytes = 256 bits).
pub const HASH_LENGTH: usize = 32;

/// The maximum tree depth in bits, equal to the widest supported hasher.
pub const MAX_TREE_DEPTH: usize = HASH_LENGTH * 8;
