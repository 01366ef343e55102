//! In-memory tile storage.
//!
//! A versioned, tile-granular store backed by DashMap, implementing the
//! engine's storage contract through the subtree cache. Suitable for
//! tests and single-node use; persistent backends implement the same
//! traits outside this workspace.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use tessera_merkle::{
    MapHasher, Node, NodeId, NullHashes, SmtResult, TreeLayout, TreeStorage, TreeTx,
};

use crate::cache::{SubtreeCache, TileStrategy};
use crate::tile::Tile;

struct StoreInner {
    layout: TreeLayout,
    strategy: TileStrategy,
    hasher: Arc<dyn MapHasher>,
    null: Arc<NullHashes>,
    // Tile prefix -> revision -> tile. A read at revision R sees the
    // version with the greatest revision <= R.
    tiles: DashMap<Vec<u8>, BTreeMap<u64, Tile>>,
    tile_reads: AtomicU64,
    tile_writes: AtomicU64,
}

impl StoreInner {
    /// The newest tile version at or before `revision`, with the revision
    /// it was written at.
    fn fetch_tile(&self, tile_id: &NodeId, revision: u64) -> Option<(u64, Tile)> {
        self.tile_reads.fetch_add(1, Ordering::Relaxed);
        self.tiles.get(&tile_id.prefix_bytes()).and_then(|versions| {
            versions
                .range(..=revision)
                .next_back()
                .map(|(rev, tile)| (*rev, tile.clone()))
        })
    }

    fn new_cache(&self) -> SubtreeCache {
        SubtreeCache::new(
            self.layout.clone(),
            self.strategy,
            self.hasher.clone(),
            self.null.clone(),
        )
    }
}

/// A revisioned in-memory tile store.
#[derive(Clone)]
pub struct MemoryTreeStorage {
    inner: Arc<StoreInner>,
}

impl MemoryTreeStorage {
    /// A map-style store over the given stratum plan.
    pub fn new(tree_id: u64, plan: Vec<usize>, hasher: Arc<dyn MapHasher>) -> SmtResult<Self> {
        Self::with_strategy(tree_id, plan, hasher, TileStrategy::Map)
    }

    /// A store with an explicit tile rehydration strategy.
    pub fn with_strategy(
        tree_id: u64,
        plan: Vec<usize>,
        hasher: Arc<dyn MapHasher>,
        strategy: TileStrategy,
    ) -> SmtResult<Self> {
        let layout = TreeLayout::new(plan, hasher.bit_len())?;
        let null = Arc::new(NullHashes::new(&*hasher, tree_id));
        Ok(Self {
            inner: Arc::new(StoreInner {
                layout,
                strategy,
                hasher,
                null,
                tiles: DashMap::new(),
                tile_reads: AtomicU64::new(0),
                tile_writes: AtomicU64::new(0),
            }),
        })
    }

    /// Number of tile fetches served so far (cache misses included).
    pub fn tile_reads(&self) -> u64 {
        self.inner.tile_reads.load(Ordering::Relaxed)
    }

    /// Number of tiles written by committed transactions.
    pub fn tile_writes(&self) -> u64 {
        self.inner.tile_writes.load(Ordering::Relaxed)
    }
}

/// A transaction over the in-memory store: all reads and writes go
/// through a private subtree cache, and commit flushes the dirty tiles
/// into the store at the transaction's revision.
pub struct MemoryTreeTx {
    inner: Arc<StoreInner>,
    revision: u64,
    cache: SubtreeCache,
    // Revision each loaded tile was found at, for read results.
    tile_revs: HashMap<Vec<u8>, u64>,
}

impl MemoryTreeTx {
    fn read_nodes(&mut self, ids: &[NodeId]) -> SmtResult<Vec<Node>> {
        let inner = &self.inner;
        let revision = self.revision;
        let tile_revs = &mut self.tile_revs;
        let cache = &mut self.cache;
        let mut out = Vec::new();
        for id in ids {
            let hash = cache.get_node_hash(id, |tile_id| {
                Ok(match inner.fetch_tile(tile_id, revision) {
                    Some((rev, tile)) => {
                        tile_revs.insert(tile.prefix.clone(), rev);
                        Some(tile)
                    }
                    None => None,
                })
            })?;
            if let Some(hash) = hash {
                let (tile_id, _) = inner.layout.split(id);
                let node_rev = tile_revs
                    .get(&tile_id.prefix_bytes())
                    .copied()
                    .unwrap_or(revision);
                out.push(Node {
                    id: *id,
                    hash,
                    revision: node_rev,
                });
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl TreeTx for MemoryTreeTx {
    async fn get_merkle_nodes(&mut self, ids: &[NodeId]) -> SmtResult<Vec<Node>> {
        self.read_nodes(ids)
    }

    async fn set_merkle_nodes(&mut self, nodes: Vec<Node>) -> SmtResult<()> {
        let inner = &self.inner;
        let revision = self.revision;
        let cache = &mut self.cache;
        for node in nodes {
            cache.set_node_hash(&node.id, node.hash, |tile_id| {
                Ok(inner.fetch_tile(tile_id, revision).map(|(_, tile)| tile))
            })?;
        }
        Ok(())
    }

    async fn commit(mut self) -> SmtResult<()> {
        let inner = self.inner.clone();
        let revision = self.revision;
        self.cache.flush(|tiles| {
            debug!(revision, tiles = tiles.len(), "committing tiles");
            for tile in tiles {
                inner.tile_writes.fetch_add(1, Ordering::Relaxed);
                inner
                    .tiles
                    .entry(tile.prefix.clone())
                    .or_default()
                    .insert(revision, tile);
            }
            Ok(())
        })
    }
}

#[async_trait]
impl TreeStorage for MemoryTreeStorage {
    type Tx = MemoryTreeTx;

    async fn begin_tx(&self, revision: u64) -> SmtResult<MemoryTreeTx> {
        Ok(MemoryTreeTx {
            inner: self.inner.clone(),
            revision,
            cache: self.inner.new_cache(),
            tile_revs: HashMap::new(),
        })
    }

    async fn get_merkle_nodes(&self, revision: u64, ids: &[NodeId]) -> SmtResult<Vec<Node>> {
        let mut tx = MemoryTreeTx {
            inner: self.inner.clone(),
            revision,
            cache: self.inner.new_cache(),
            tile_revs: HashMap::new(),
        };
        tx.read_nodes(ids)
    }
}
