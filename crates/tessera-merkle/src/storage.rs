//! The storage contract consumed by the tree engine.
//!
//! The engine never talks to a database directly: the writer opens one
//! transaction per stratum worker, reads seed nodes and writes the
//! revision's new nodes through it, and commits. Implementations live
//! outside this crate (see `tessera-storage` for the tile cache and the
//! in-memory backend).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::node::NodeId;
use crate::{HashValue, SmtResult};

/// A single versioned node as stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub hash: HashValue,
    /// The revision this version of the node was written at.
    pub revision: u64,
}

/// A read-write transaction pinned to one revision.
///
/// Dropping a transaction without calling [`TreeTx::commit`] rolls it
/// back; a failed worker never leaves partial state behind.
#[async_trait]
pub trait TreeTx: Send {
    /// Fetch at most one node per id, each with `revision <=` the
    /// transaction's revision. Omission means no node exists at or before
    /// this revision.
    async fn get_merkle_nodes(&mut self, ids: &[NodeId]) -> SmtResult<Vec<Node>>;

    /// Stage nodes for the transaction's revision.
    async fn set_merkle_nodes(&mut self, nodes: Vec<Node>) -> SmtResult<()>;

    /// Atomically publish everything staged in this transaction.
    async fn commit(self) -> SmtResult<()>;
}

/// A storage backend capable of revisioned reads and transactions.
#[async_trait]
pub trait TreeStorage: Send + Sync + 'static {
    type Tx: TreeTx + 'static;

    /// Open a read-write transaction writing at `revision`.
    async fn begin_tx(&self, revision: u64) -> SmtResult<Self::Tx>;

    /// Read-only node fetch at `revision`: returns at most one node per
    /// id, each satisfying `node.revision <= revision`.
    async fn get_merkle_nodes(&self, revision: u64, ids: &[NodeId]) -> SmtResult<Vec<Node>>;
}
