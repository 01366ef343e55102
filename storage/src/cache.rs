//! The subtree (tile) cache.
//!
//! Sits between the node-granular engine and tile-granular storage:
//! reads load whole tiles and rebuild their interior nodes from leaves,
//! writes collect into dirty tiles that a flush emits in one batch. A
//! value written over an identical value does not dirty its tile, so
//! re-writing an unchanged tree costs no storage writes at all.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, trace};

use tessera_merkle::compact::CompactRange;
use tessera_merkle::{
    HStar2, HStar2LeafHash, HashValue, MapHasher, NodeId, NullHashes, SmtError, SmtResult, Suffix,
    TreeLayout,
};

use crate::tile::Tile;

/// How a loaded tile's interior is rebuilt from its leaves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TileStrategy {
    /// Leaves form a left-packed log: rebuild with a compact range, and
    /// materialise interiors only for completely filled tiles.
    Log,
    /// Leaves are sparse map entries: rebuild every interior with HStar2,
    /// filling absent branches from the null-hash table.
    Map,
}

struct CacheEntry {
    tile: Tile,
    dirty: bool,
}

/// A read-through/write-back cache over tile storage.
///
/// Not internally synchronised: callers serialise access, typically by
/// owning one cache per storage transaction.
pub struct SubtreeCache {
    layout: TreeLayout,
    strategy: TileStrategy,
    hasher: Arc<dyn MapHasher>,
    null: Arc<NullHashes>,
    entries: HashMap<Vec<u8>, CacheEntry>,
}

impl SubtreeCache {
    pub fn new(
        layout: TreeLayout,
        strategy: TileStrategy,
        hasher: Arc<dyn MapHasher>,
        null: Arc<NullHashes>,
    ) -> Self {
        Self {
            layout,
            strategy,
            hasher,
            null,
            entries: HashMap::new(),
        }
    }

    /// The hash stored for a node, if any.
    ///
    /// `fetch` is consulted once per tile on a cache miss; a `None` from
    /// it stands for a tile that does not exist yet.
    pub fn get_node_hash<F>(&mut self, id: &NodeId, fetch: F) -> SmtResult<Option<HashValue>>
    where
        F: FnMut(&NodeId) -> SmtResult<Option<Tile>>,
    {
        let (tile_id, suffix) = self.layout.split(id);
        let entry = self.load_tile(&tile_id, fetch)?;
        let tile = &entry.tile;
        Ok(if suffix.bits() == 0 {
            // The tile's own root; only reachable for the root tile.
            tile.root_hash
        } else if suffix.bits() as u32 == tile.depth {
            tile.leaves.get(&suffix).copied()
        } else {
            tile.internal_nodes.get(&suffix).copied()
        })
    }

    /// Record a node hash, dirtying its tile only when the value differs
    /// from what is already there.
    pub fn set_node_hash<F>(&mut self, id: &NodeId, hash: HashValue, fetch: F) -> SmtResult<()>
    where
        F: FnMut(&NodeId) -> SmtResult<Option<Tile>>,
    {
        let (tile_id, suffix) = self.layout.split(id);
        let entry = self.load_tile(&tile_id, fetch)?;
        let tile = &mut entry.tile;
        let changed = if suffix.bits() == 0 {
            let changed = tile.root_hash != Some(hash);
            tile.root_hash = Some(hash);
            changed
        } else if suffix.bits() as u32 == tile.depth {
            tile.leaves.insert(suffix, hash) != Some(hash)
        } else {
            tile.internal_nodes.insert(suffix, hash) != Some(hash)
        };
        if changed {
            trace!(node = %id, "tile dirtied");
            entry.dirty = true;
        }
        Ok(())
    }

    /// Write every dirty tile in one batch and clear the dirty set. Tiles
    /// are stripped to their authoritative content first: leaves always,
    /// interiors only for completely filled log tiles. If nothing is
    /// dirty, `write` is not called at all.
    pub fn flush<W>(&mut self, write: W) -> SmtResult<()>
    where
        W: FnOnce(Vec<Tile>) -> SmtResult<()>,
    {
        let mut out = Vec::new();
        for entry in self.entries.values_mut() {
            if !entry.dirty {
                continue;
            }
            let mut tile = entry.tile.clone();
            if self.strategy == TileStrategy::Log && tile.is_fully_populated() {
                // Store the full tile self-describing.
                populate_log_tile(&mut tile, &*self.hasher, &self.null)?;
            } else {
                tile.internal_nodes.clear();
                tile.internal_node_count = 0;
            }
            tile.root_hash = None;
            out.push(tile);
            entry.dirty = false;
        }
        if out.is_empty() {
            return Ok(());
        }
        debug!(tiles = out.len(), "flushing dirty tiles");
        write(out)
    }

    fn load_tile<F>(&mut self, tile_id: &NodeId, mut fetch: F) -> SmtResult<&mut CacheEntry>
    where
        F: FnMut(&NodeId) -> SmtResult<Option<Tile>>,
    {
        let key = tile_id.prefix_bytes();
        if !self.entries.contains_key(&key) {
            let height = self.layout.tile_height(tile_id.prefix_len_bits()) as u32;
            let tile = match fetch(tile_id)? {
                Some(mut tile) => {
                    if tile.prefix != key || tile.depth != height {
                        return Err(SmtError::InconsistentStorage(format!(
                            "fetched tile ({}, depth {}) for id {}, want ({}, depth {})",
                            hex::encode(&tile.prefix),
                            tile.depth,
                            tile_id,
                            hex::encode(&key),
                            height,
                        )));
                    }
                    match self.strategy {
                        TileStrategy::Log => populate_log_tile(&mut tile, &*self.hasher, &self.null)?,
                        TileStrategy::Map => populate_map_tile(&mut tile, &*self.hasher, &self.null)?,
                    }
                    tile
                }
                None => {
                    trace!(tile = %tile_id, "tile miss; starting empty");
                    Tile::empty(key.clone(), height)
                }
            };
            self.entries.insert(key.clone(), CacheEntry { tile, dirty: false });
        }
        // Just inserted if absent.
        Ok(self.entries.get_mut(&key).expect("entry present"))
    }
}

/// Rebuild a log-style tile from its leaves.
///
/// The leaves are treated as an append-only log: a compact Merkle range
/// replays them in order, recording interior hashes. Interior nodes are
/// materialised only when the tile is completely full; the root is always
/// recomputed.
pub fn populate_log_tile<H: MapHasher + ?Sized>(
    tile: &mut Tile,
    hasher: &H,
    null: &NullHashes,
) -> SmtResult<()> {
    let depth = tile.depth;
    let full = tile.is_fully_populated();
    let mut internals: BTreeMap<Suffix, HashValue> = BTreeMap::new();
    let mut range = CompactRange::new(hasher);
    for i in 0..tile.leaves.len() as u64 {
        let suffix = Suffix::from_index(depth as u16, i);
        let Some(leaf) = tile.leaves.get(&suffix) else {
            return Err(SmtError::InconsistentStorage(format!(
                "log tile {} has {} leaves but none at index {}",
                hex::encode(&tile.prefix),
                tile.leaves.len(),
                i
            )));
        };
        range.append(*leaf, |level, index, hash| {
            if full && (level as u32) < depth {
                internals.insert(Suffix::from_index(depth as u16 - level as u16, index), *hash);
            }
        });
    }
    tile.root_hash = Some(match range.root() {
        Some(root) => root,
        None => null.at_depth(tile.prefix_len_bits()),
    });
    if full {
        tile.internal_node_count = internals.len() as u32;
        tile.internal_nodes = internals;
    } else {
        tile.internal_node_count = 0;
        tile.internal_nodes.clear();
    }
    Ok(())
}

/// Rebuild a sparse map tile from its leaves.
///
/// Every interior node above a populated leaf is recomputed with HStar2,
/// absent branches resolving to null-subtree hashes, so later revisions
/// can seed their calculations from tiles that persist only leaves.
pub fn populate_map_tile<H: MapHasher + ?Sized>(
    tile: &mut Tile,
    hasher: &H,
    null: &NullHashes,
) -> SmtResult<()> {
    let prefix_len = tile.prefix_len_bits();
    let leaves: SmtResult<Vec<HStar2LeafHash>> = tile
        .leaves
        .iter()
        .map(|(suffix, hash)| {
            Ok(HStar2LeafHash {
                index: NodeId::from_prefix_suffix(&tile.prefix, suffix)?,
                hash: *hash,
            })
        })
        .collect();
    let mut internals: BTreeMap<Suffix, HashValue> = BTreeMap::new();
    let hs2 = HStar2::new(hasher, null);
    let root = hs2.hstar2_nodes(
        &tile.prefix,
        tile.depth as usize,
        leaves?,
        |_| Ok(None),
        |id, hash| {
            let suffix = id.suffix(prefix_len);
            // The root-tile root is recorded separately below.
            if suffix.bits() > 0 {
                internals.insert(suffix, hash);
            }
            Ok(())
        },
    )?;
    tile.internal_node_count = internals.len() as u32;
    tile.internal_nodes = internals;
    tile.root_hash = Some(root);
    Ok(())
}
