//! # tessera-storage
//!
//! Storage layer for the tessera sparse Merkle tree engine.
//!
//! The engine in `tessera-merkle` speaks in individual versioned nodes;
//! storage speaks in tiles (dense fixed-depth subtrees). This crate
//! bridges the two:
//!
//! - [`tile::Tile`]: the persisted form of a stratum subtree
//! - [`cache::SubtreeCache`]: the read-through/write-back tile cache,
//!   including rebuilding tile interiors from their leaves on load
//! - [`memory::MemoryTreeStorage`]: a versioned in-memory backend
//!   implementing the engine's storage contract, used for tests and
//!   single-node deployments
//!
//! Persistent backends live outside this workspace; they implement
//! `tessera_merkle::TreeStorage` the same way the in-memory one does,
//! typically by wrapping a [`cache::SubtreeCache`] per transaction.

pub mod cache;
pub mod memory;
pub mod tile;

pub use cache::{populate_log_tile, populate_map_tile, SubtreeCache, TileStrategy};
pub use memory::{MemoryTreeStorage, MemoryTreeTx};
pub use tile::Tile;
