//! Error types for the sparse Merkle tree engine.

use thiserror::Error;

use crate::node::NodeId;

/// Errors surfaced at the engine boundary.
#[derive(Debug, Error)]
pub enum SmtError {
    /// A read was issued for a tree revision that does not exist.
    #[error("no such revision")]
    NoSuchRevision,

    /// Storage returned something that violates the engine's invariants
    /// (wrong node id, revision from the future, malformed tile).
    #[error("inconsistent storage: {0}")]
    InconsistentStorage(String),

    /// A node id was constructed with a prefix longer than the tree depth.
    #[error("invalid node id: prefix length {len} exceeds {max} bits")]
    InvalidNodeId { len: usize, max: usize },

    /// A hash was built from a slice of the wrong width.
    #[error("invalid hash length: expected {expected} bytes, got {got}")]
    InvalidHashLength { expected: usize, got: usize },

    /// A leaf was submitted above the depth of the stratum meant to hold it.
    #[error("leaf too shallow: depth {depth}, want >= {min}")]
    LeafTooShallow { depth: usize, min: usize },

    /// Two leaves in the same batch collided on the same index.
    #[error("duplicate leaf in batch at {0}")]
    DuplicateLeafInBatch(NodeId),

    /// A leaf index does not lie under the subtree it was submitted to.
    #[error("leaf index {0} lies outside the subtree")]
    IndexOutsideSubtree(NodeId),

    /// Storage returned nodes that were never requested.
    #[error("storage returned {returned} nodes but only {used} matched the request")]
    DanglingNodes { returned: usize, used: usize },

    /// A backend failure, wrapped with its message.
    #[error("storage error: {0}")]
    Storage(String),

    /// The operation was cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,

    /// The stratum plan does not describe a valid tree decomposition.
    #[error("invalid stratum plan: {0}")]
    InvalidPlan(String),

    /// A leaf was submitted after root calculation started.
    #[error("writer already finalising; no more leaves accepted")]
    WriterClosed,

    /// The subtree root was already consumed, or its worker died without
    /// publishing one.
    #[error("subtree root is no longer available")]
    RootNotAvailable,

    /// A proof failed verification.
    #[error("invalid proof: {0}")]
    InvalidProof(String),
}

/// Convenience alias used by every fallible operation in this crate.
pub type SmtResult<T> = std::result::Result<T, SmtError>;
