//! Stratified sparse Merkle tree writer.
//!
//! A batched update at revision R is decomposed along the stratum plan
//! into a tree of subtree workers, one tokio task each. Leaves route to
//! the worker owning their prefix; workers are created lazily on first
//! touch. Creating a child atomically enqueues a deferred producer into
//! the parent's bounded leaf queue; invoked during finalisation, it
//! blocks on the child's root, which is how child roots become parent
//! leaves without any cyclic reference.
//!
//! Closing the queue (`calculate_root`) starts the cascade: leaf workers
//! finalise first, unblocking their parents' producers. Each worker
//! finalises inside its own storage transaction; the first error wins and
//! is the one value published on the worker's root slot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, trace};

use crate::cancel::CancelToken;
use crate::hasher::{MapHasher, NullHashes};
use crate::hstar2::{seed_node_ids, HStar2, HStar2LeafHash};
use crate::layout::TreeLayout;
use crate::node::NodeId;
use crate::storage::{Node, TreeStorage, TreeTx};
use crate::{HashValue, SmtError, SmtResult};

/// Depth of the top stratum in the default plan. Must be a multiple of 8.
const TOP_STRATUM_DEPTH: usize = 8;

/// Queue capacity for the bottom stratum's workers.
const LEAF_QUEUE_SIZE: usize = 1024;

/// A hashed key together with the hashed value to store under it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HashKeyValue {
    /// The hash of the key data; positions the leaf.
    pub hashed_key: HashValue,
    /// The hash of the value data; stored as the leaf hash.
    pub hashed_value: HashValue,
}

#[derive(Clone, Copy, Debug)]
struct IndexedHash {
    index: NodeId,
    hash: HashValue,
}

/// A deferred leaf: either ready, or the eventual root of a child stratum.
enum LeafSource {
    Ready(IndexedHash),
    Child {
        prefix: NodeId,
        subtree: Arc<dyn Subtree>,
    },
}

/// A subtree worker. The one implementation here is task-per-worker on
/// the local executor; the seam exists so a sharded implementation could
/// be dropped in.
#[async_trait]
pub trait Subtree: Send + Sync {
    /// Route a single leaf hash into the subtree. The index is the full
    /// path from the tree root, not from this subtree's root.
    async fn set_leaf(&self, index: NodeId, hash: HashValue) -> SmtResult<()>;

    /// Close the leaf queue and start root calculation. Calling
    /// `set_leaf` afterwards fails with [`SmtError::WriterClosed`].
    async fn calculate_root(&self);

    /// The subtree's root hash, blocking until finalisation completes.
    /// Consumes the root slot: a second call fails.
    async fn root_hash(&self) -> SmtResult<HashValue>;
}

struct SubtreeWorker<S: TreeStorage> {
    tree_id: u64,
    revision: u64,
    prefix: NodeId,
    stratum_depth: usize,
    // Stratum depths below this one; children are built from it.
    remaining: Vec<usize>,
    leaf_tx: Mutex<Option<mpsc::Sender<LeafSource>>>,
    children: Mutex<HashMap<NodeId, Arc<SubtreeWorker<S>>>>,
    root_rx: Mutex<Option<oneshot::Receiver<SmtResult<HashValue>>>>,
    // Set by calculate_root before the queue closes; distinguishes a real
    // finalisation from the queue closing because the writer was dropped.
    finalising: Arc<AtomicBool>,
    storage: Arc<S>,
    hasher: Arc<dyn MapHasher>,
    null: Arc<NullHashes>,
    cancel: CancelToken,
}

fn leaf_queue_size(depths: &[usize]) -> usize {
    if depths.len() == 1 {
        return LEAF_QUEUE_SIZE;
    }
    // Upper strata must be able to hold one child-root future per
    // possible child.
    1 << depths[0]
}

impl<S: TreeStorage> SubtreeWorker<S> {
    fn new(
        tree_id: u64,
        revision: u64,
        prefix: NodeId,
        depths: &[usize],
        storage: Arc<S>,
        hasher: Arc<dyn MapHasher>,
        null: Arc<NullHashes>,
        cancel: CancelToken,
    ) -> Arc<Self> {
        let (leaf_tx, leaf_rx) = mpsc::channel(leaf_queue_size(depths));
        let (root_tx, root_rx) = oneshot::channel();
        let finalising = Arc::new(AtomicBool::new(false));
        let worker = Arc::new(Self {
            tree_id,
            revision,
            prefix,
            stratum_depth: depths[0],
            remaining: depths[1..].to_vec(),
            leaf_tx: Mutex::new(Some(leaf_tx)),
            children: Mutex::new(HashMap::new()),
            root_rx: Mutex::new(Some(root_rx)),
            finalising: finalising.clone(),
            storage: storage.clone(),
            hasher: hasher.clone(),
            null: null.clone(),
            cancel: cancel.clone(),
        });
        tokio::spawn(build_subtree(
            WorkerCtx {
                tree_id,
                revision,
                prefix,
                stratum_depth: depths[0],
                finalising,
                storage,
                hasher,
                null,
                cancel,
            },
            leaf_rx,
            root_tx,
        ));
        worker
    }

    /// Absolute depth of this stratum's leaves.
    fn leaf_depth(&self) -> usize {
        self.prefix.prefix_len_bits() + self.stratum_depth
    }

    async fn enqueue(&self, src: LeafSource) -> SmtResult<()> {
        let tx = { self.leaf_tx.lock().await.clone() };
        let Some(tx) = tx else {
            return Err(SmtError::WriterClosed);
        };
        tokio::select! {
            _ = self.cancel.cancelled() => Err(SmtError::Cancelled),
            sent = tx.send(src) => sent.map_err(|_| SmtError::WriterClosed),
        }
    }

    async fn get_or_create_child(&self, child_prefix: NodeId) -> SmtResult<Arc<SubtreeWorker<S>>> {
        let mut children = self.children.lock().await;
        if let Some(child) = children.get(&child_prefix) {
            return Ok(child.clone());
        }
        let child = SubtreeWorker::new(
            self.tree_id,
            self.revision,
            child_prefix,
            &self.remaining,
            self.storage.clone(),
            self.hasher.clone(),
            self.null.clone(),
            self.cancel.clone(),
        );
        children.insert(child_prefix, child.clone());
        // The new child's eventual root becomes one of our leaves: queue a
        // producer that blocks on it. The queue is sized to hold one entry
        // per possible child, so this send cannot block while the child
        // map lock is held.
        self.enqueue(LeafSource::Child {
            prefix: child_prefix,
            subtree: child.clone(),
        })
        .await?;
        Ok(child)
    }
}

#[async_trait]
impl<S: TreeStorage> Subtree for SubtreeWorker<S> {
    async fn set_leaf(&self, index: NodeId, hash: HashValue) -> SmtResult<()> {
        let depth = index.prefix_len_bits();
        let leaf_depth = self.leaf_depth();
        if depth < leaf_depth {
            return Err(SmtError::LeafTooShallow {
                depth,
                min: leaf_depth,
            });
        }
        if depth > leaf_depth {
            let child = self.get_or_create_child(index.prefix(leaf_depth)).await?;
            return child.set_leaf(index, hash).await;
        }
        self.enqueue(LeafSource::Ready(IndexedHash { index, hash }))
            .await
    }

    async fn calculate_root(&self) {
        self.finalising.store(true, Ordering::Release);
        // Closing the queue lets the worker task finish draining.
        {
            *self.leaf_tx.lock().await = None;
        }
        let children: Vec<_> = { self.children.lock().await.values().cloned().collect() };
        for child in children {
            child.calculate_root().await;
        }
    }

    async fn root_hash(&self) -> SmtResult<HashValue> {
        let rx = { self.root_rx.lock().await.take() };
        let Some(rx) = rx else {
            return Err(SmtError::RootNotAvailable);
        };
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(SmtError::RootNotAvailable),
        }
    }
}

struct WorkerCtx<S: TreeStorage> {
    tree_id: u64,
    revision: u64,
    prefix: NodeId,
    stratum_depth: usize,
    finalising: Arc<AtomicBool>,
    storage: Arc<S>,
    hasher: Arc<dyn MapHasher>,
    null: Arc<NullHashes>,
    cancel: CancelToken,
}

/// The worker task: drains the leaf queue, runs HStar2 inside a storage
/// transaction, and publishes exactly one result on the root slot.
async fn build_subtree<S: TreeStorage>(
    ctx: WorkerCtx<S>,
    mut leaf_rx: mpsc::Receiver<LeafSource>,
    root_tx: oneshot::Sender<SmtResult<HashValue>>,
) {
    let result = compute_subtree(&ctx, &mut leaf_rx).await;
    if result.is_err() {
        // Fail any producers still queued: their children's errors have
        // already won or will surface through their own slots.
        leaf_rx.close();
    }
    let _ = root_tx.send(result);
}

async fn compute_subtree<S: TreeStorage>(
    ctx: &WorkerCtx<S>,
    leaf_rx: &mut mpsc::Receiver<LeafSource>,
) -> SmtResult<HashValue> {
    let mut tx = tokio::select! {
        _ = ctx.cancel.cancelled() => return Err(SmtError::Cancelled),
        tx = ctx.storage.begin_tx(ctx.revision) => tx?,
    };
    let mut leaves: Vec<HStar2LeafHash> = Vec::new();
    let mut nodes: Vec<Node> = Vec::new();

    loop {
        let src = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(SmtError::Cancelled),
            src = leaf_rx.recv() => match src {
                Some(src) => src,
                None => break,
            },
        };
        let produced = match src {
            LeafSource::Ready(ih) => ih,
            LeafSource::Child { prefix, subtree } => {
                let hash = tokio::select! {
                    _ = ctx.cancel.cancelled() => return Err(SmtError::Cancelled),
                    root = subtree.root_hash() => root?,
                };
                IndexedHash {
                    index: prefix,
                    hash,
                }
            }
        };
        trace!(tree_id = ctx.tree_id, index = %produced.index, "stratum leaf");
        leaves.push(HStar2LeafHash {
            index: produced.index,
            hash: produced.hash,
        });
        nodes.push(Node {
            id: produced.index,
            hash: produced.hash,
            revision: ctx.revision,
        });
    }

    if !ctx.finalising.load(Ordering::Acquire) {
        // The queue closed because the writer was dropped, not because
        // calculate_root ran; do not publish a partial stratum.
        return Err(SmtError::Cancelled);
    }

    // Fetch every node HStar2 can ask for in one batch, then run the
    // algorithm synchronously against the result.
    let seeds = seed_node_ids(&ctx.prefix, ctx.stratum_depth, &leaves);
    let mut seed_map: HashMap<NodeId, Option<HashValue>> =
        seeds.iter().map(|id| (*id, None)).collect();
    let fetched = tokio::select! {
        _ = ctx.cancel.cancelled() => return Err(SmtError::Cancelled),
        fetched = tx.get_merkle_nodes(&seeds) => fetched?,
    };
    for node in fetched {
        if node.revision > ctx.revision {
            return Err(SmtError::InconsistentStorage(format!(
                "got node revision {}, want <= {}",
                node.revision, ctx.revision
            )));
        }
        let Some(slot) = seed_map.get_mut(&node.id) else {
            return Err(SmtError::InconsistentStorage(format!(
                "got unrequested node {} from storage",
                node.id
            )));
        };
        trace!(tree_id = ctx.tree_id, id = %node.id, "seed node");
        *slot = Some(node.hash);
    }

    let hs2 = HStar2::new(&*ctx.hasher, &ctx.null);
    let root = hs2.hstar2_nodes(
        &ctx.prefix.prefix_bytes(),
        ctx.stratum_depth,
        leaves,
        |id| match seed_map.get(id) {
            Some(found) => Ok(*found),
            None => Err(SmtError::InconsistentStorage(format!(
                "node {} missing from prefetch set",
                id
            ))),
        },
        |id, hash| {
            nodes.push(Node {
                id: *id,
                hash,
                revision: ctx.revision,
            });
            Ok(())
        },
    )?;

    let written = nodes.len();
    tokio::select! {
        _ = ctx.cancel.cancelled() => return Err(SmtError::Cancelled),
        staged = tx.set_merkle_nodes(nodes) => staged?,
    }
    // The select's tie-break is random when both branches are ready at
    // once; cancellation must be authoritative before anything persists.
    if ctx.cancel.is_cancelled() {
        return Err(SmtError::Cancelled);
    }
    tokio::select! {
        _ = ctx.cancel.cancelled() => return Err(SmtError::Cancelled),
        committed = tx.commit() => committed?,
    }
    debug!(
        tree_id = ctx.tree_id,
        prefix = %ctx.prefix,
        nodes = written,
        root = %root,
        "stratum finalised"
    );
    Ok(root)
}

/// Writes a batch of leaves into the tree at a single new revision.
pub struct SparseMerkleTreeWriter<S: TreeStorage> {
    revision: u64,
    tree: Arc<SubtreeWorker<S>>,
}

impl<S: TreeStorage> SparseMerkleTreeWriter<S> {
    /// Create a writer for `revision` using the given stratum plan.
    ///
    /// The plan must sum to the hasher's bit length; see
    /// [`SparseMerkleTreeWriter::default_plan`].
    pub fn new(
        tree_id: u64,
        revision: u64,
        plan: Vec<usize>,
        hasher: Arc<dyn MapHasher>,
        storage: Arc<S>,
        cancel: CancelToken,
    ) -> SmtResult<Self> {
        TreeLayout::new(plan.clone(), hasher.bit_len())?;
        let null = Arc::new(NullHashes::new(&*hasher, tree_id));
        let tree = SubtreeWorker::new(
            tree_id,
            revision,
            NodeId::root(),
            &plan,
            storage,
            hasher,
            null,
            cancel,
        );
        Ok(Self { revision, tree })
    }

    /// The default plan for a map-style tree: one top stratum of 8 bits,
    /// the rest in a single bottom stratum.
    pub fn default_plan(bit_len: usize) -> Vec<usize> {
        vec![TOP_STRATUM_DEPTH, bit_len - TOP_STRATUM_DEPTH]
    }

    /// The revision this writer publishes at.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Add a batch of leaves to the in-flight update.
    pub async fn set_leaves(&self, leaves: Vec<HashKeyValue>) -> SmtResult<()> {
        for leaf in leaves {
            self.tree
                .set_leaf(NodeId::from_hash(&leaf.hashed_key), leaf.hashed_value)
                .await?;
        }
        Ok(())
    }

    /// Calculate the new root over everything submitted so far. No
    /// further leaves are accepted afterwards.
    pub async fn calculate_root(&self) -> SmtResult<HashValue> {
        self.tree.calculate_root().await;
        self.tree.root_hash().await
    }
}
