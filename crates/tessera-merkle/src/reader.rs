//! Reading historical roots and assembling proofs.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::hasher::MapHasher;
use crate::node::NodeId;
use crate::storage::TreeStorage;
use crate::{HashValue, SmtError, SmtResult};

/// Reads roots and proofs out of tree storage at historical revisions.
pub struct SparseMerkleTreeReader<'a, S: TreeStorage> {
    storage: &'a S,
    hasher: Arc<dyn MapHasher>,
}

impl<'a, S: TreeStorage> SparseMerkleTreeReader<'a, S> {
    pub fn new(storage: &'a S, hasher: Arc<dyn MapHasher>) -> Self {
        Self { storage, hasher }
    }

    /// The tree root at `revision`, or [`SmtError::NoSuchRevision`] if
    /// nothing was ever committed at or before it.
    pub async fn root_at_revision(&self, revision: u64) -> SmtResult<HashValue> {
        let root_id = NodeId::root();
        let nodes = self.storage.get_merkle_nodes(revision, &[root_id]).await?;
        match nodes.len() {
            0 => return Err(SmtError::NoSuchRevision),
            1 => {}
            n => {
                return Err(SmtError::InconsistentStorage(format!(
                    "expected 1 root node, got {}",
                    n
                )))
            }
        }
        let node = &nodes[0];
        if !node.id.equivalent(&root_id) {
            return Err(SmtError::InconsistentStorage(format!(
                "unexpected node returned with id {}",
                node.id
            )));
        }
        if node.revision > revision {
            return Err(SmtError::InconsistentStorage(format!(
                "unexpected node revision {} > {}",
                node.revision, revision
            )));
        }
        Ok(node.hash)
    }

    /// An inclusion (or, for an absent key, non-inclusion) proof for
    /// `index` at `revision`.
    ///
    /// The result holds one entry per tree level, sibling of the leaf
    /// first and sibling of the root's child last. `None` means the
    /// sibling subtree is empty: the verifier substitutes the null hash
    /// for that depth.
    pub async fn inclusion_proof(
        &self,
        revision: u64,
        index: &HashValue,
    ) -> SmtResult<Vec<Option<HashValue>>> {
        let leaf = NodeId::from_hash(index);
        let siblings = leaf.siblings();
        let nodes = self.storage.get_merkle_nodes(revision, &siblings).await?;
        debug!(
            revision,
            requested = siblings.len(),
            returned = nodes.len(),
            "assembling inclusion proof"
        );

        let mut by_id: HashMap<NodeId, HashValue> = HashMap::with_capacity(nodes.len());
        let returned = nodes.len();
        for node in nodes {
            if node.revision > revision {
                return Err(SmtError::InconsistentStorage(format!(
                    "unexpected node revision {} > {}",
                    node.revision, revision
                )));
            }
            by_id.insert(node.id, node.hash);
        }

        let proof: Vec<Option<HashValue>> =
            siblings.iter().map(|id| by_id.remove(id)).collect();

        // Everything returned must have been one of the requested
        // siblings, otherwise storage handed back something bogus.
        if !by_id.is_empty() {
            return Err(SmtError::DanglingNodes {
                returned,
                used: returned - by_id.len(),
            });
        }
        Ok(proof)
    }

    /// The tree depth this reader expects proofs to have.
    pub fn proof_len(&self) -> usize {
        self.hasher.bit_len()
    }
}
