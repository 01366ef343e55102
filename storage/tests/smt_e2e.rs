//! End-to-end scenarios over the full stack: stratified writer, tile
//! cache, in-memory storage, reader and proof verification.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use tessera_merkle::hasher::sha256_null_hashes;
use tessera_merkle::{
    proof, CancelToken, Canceller, HashKeyValue, HashValue, MapHasher, NodeId, Sha256MapHasher,
    SmtError, SparseMerkleTreeReader, SparseMerkleTreeWriter, TreeStorage,
};
use tessera_storage::MemoryTreeStorage;

const TREE_ID: u64 = 7;

fn sha256(data: &[u8]) -> HashValue {
    let digest = Sha256::digest(data);
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&digest);
    HashValue::new(bytes)
}

fn hasher() -> Arc<dyn MapHasher> {
    Arc::new(Sha256MapHasher)
}

fn new_storage() -> MemoryTreeStorage {
    MemoryTreeStorage::new(
        TREE_ID,
        SparseMerkleTreeWriter::<MemoryTreeStorage>::default_plan(256),
        hasher(),
    )
    .unwrap()
}

fn new_writer(
    storage: &MemoryTreeStorage,
    revision: u64,
    cancel: CancelToken,
) -> SparseMerkleTreeWriter<MemoryTreeStorage> {
    SparseMerkleTreeWriter::new(
        TREE_ID,
        revision,
        SparseMerkleTreeWriter::<MemoryTreeStorage>::default_plan(256),
        hasher(),
        Arc::new(storage.clone()),
        cancel,
    )
    .unwrap()
}

async fn write_batch(
    storage: &MemoryTreeStorage,
    revision: u64,
    batch: Vec<HashKeyValue>,
) -> HashValue {
    let writer = new_writer(storage, revision, CancelToken::never());
    writer.set_leaves(batch).await.unwrap();
    writer.calculate_root().await.unwrap()
}

fn kv(key: &str, value: &str) -> HashKeyValue {
    HashKeyValue {
        hashed_key: sha256(key.as_bytes()),
        hashed_value: sha256(value.as_bytes()),
    }
}

/// S1: a single leaf. The proof is all null siblings and recomputes to
/// the committed root.
#[tokio::test]
async fn test_single_leaf_proof_round_trip() {
    let storage = new_storage();
    let leaf = kv("k1", "v1");
    let root = write_batch(&storage, 1, vec![leaf.clone()]).await;

    let reader = SparseMerkleTreeReader::new(&storage, hasher());
    assert_eq!(reader.root_at_revision(1).await.unwrap(), root);

    let proof = reader
        .inclusion_proof(1, &leaf.hashed_key)
        .await
        .unwrap();
    assert_eq!(proof.len(), 256);
    assert!(
        proof.iter().all(Option::is_none),
        "a lone leaf has only null siblings"
    );
    proof::verify_inclusion(
        &Sha256MapHasher,
        sha256_null_hashes(),
        &root,
        &leaf.hashed_key,
        &leaf.hashed_value,
        &proof,
    )
    .unwrap();
}

/// S2: two leaves whose hashed keys share the first byte land in the
/// same child stratum: one top tile and one child tile are written.
#[tokio::test]
async fn test_shared_prefix_leaves_share_a_tile() {
    // Find a second key whose hash shares the first byte with "s2-base".
    let first = kv("s2-base", "v1");
    let top_byte = first.hashed_key.as_bytes()[0];
    let mut second = None;
    for i in 0..100_000u32 {
        let candidate = format!("s2-probe-{}", i);
        let hashed = sha256(candidate.as_bytes());
        if hashed.as_bytes()[0] == top_byte && hashed != first.hashed_key {
            second = Some(HashKeyValue {
                hashed_key: hashed,
                hashed_value: sha256(b"v2"),
            });
            break;
        }
    }
    let second = second.expect("a colliding top byte within the probe budget");

    let storage = new_storage();
    let root = write_batch(&storage, 1, vec![first.clone(), second.clone()]).await;
    assert_eq!(storage.tile_writes(), 2);

    let reader = SparseMerkleTreeReader::new(&storage, hasher());
    for leaf in [&first, &second] {
        let proof = reader.inclusion_proof(1, &leaf.hashed_key).await.unwrap();
        proof::verify_inclusion(
            &Sha256MapHasher,
            sha256_null_hashes(),
            &root,
            &leaf.hashed_key,
            &leaf.hashed_value,
            &proof,
        )
        .unwrap();
    }
}

/// S3: a duplicated key within one batch is rejected rather than
/// resolved by write order.
#[tokio::test]
async fn test_duplicate_key_in_batch() {
    let storage = new_storage();
    let writer = new_writer(&storage, 1, CancelToken::never());
    writer
        .set_leaves(vec![kv("k", "v1"), kv("k", "v2")])
        .await
        .unwrap();
    assert!(matches!(
        writer.calculate_root().await,
        Err(SmtError::DuplicateLeafInBatch(_))
    ));
}

/// S4: re-writing identical values across ten batches writes tiles once.
#[tokio::test]
async fn test_idempotent_batches_write_nothing_new() {
    let storage = new_storage();
    let batch = vec![kv("a", "1"), kv("b", "2"), kv("c", "3")];

    let first_root = write_batch(&storage, 1, batch.clone()).await;
    let writes_after_first = storage.tile_writes();
    assert!(writes_after_first > 0);

    for revision in 2..=10u64 {
        let root = write_batch(&storage, revision, batch.clone()).await;
        assert_eq!(root, first_root);
    }
    assert_eq!(
        storage.tile_writes(),
        writes_after_first,
        "batches 2..=10 must write zero tiles"
    );
}

/// S5: a read at a revision with no data at or before it.
#[tokio::test]
async fn test_missing_revision() {
    let storage = new_storage();
    let reader = SparseMerkleTreeReader::new(&storage, hasher());
    assert!(matches!(
        reader.root_at_revision(999).await,
        Err(SmtError::NoSuchRevision)
    ));
}

/// S6: cancelling mid-calculation surfaces `Cancelled` and leaves no
/// partial tiles behind.
#[tokio::test]
async fn test_cancellation_writes_no_partial_tiles() {
    let storage = new_storage();
    let canceller = Canceller::new();
    let writer = new_writer(&storage, 1, canceller.token());
    writer
        .set_leaves(vec![kv("x", "1"), kv("y", "2")])
        .await
        .unwrap();
    canceller.cancel();
    assert!(matches!(
        writer.calculate_root().await,
        Err(SmtError::Cancelled)
    ));
    assert_eq!(storage.tile_writes(), 0);

    let reader = SparseMerkleTreeReader::new(&storage, hasher());
    assert!(matches!(
        reader.root_at_revision(1).await,
        Err(SmtError::NoSuchRevision)
    ));
}

/// Non-inclusion: an unused key's proof recomputes to the root with the
/// empty-leaf hash in the leaf position.
#[tokio::test]
async fn test_non_inclusion_proof() {
    let storage = new_storage();
    let root = write_batch(&storage, 1, vec![kv("present", "v")]).await;

    let reader = SparseMerkleTreeReader::new(&storage, hasher());
    let absent = sha256(b"absent key");
    let proof = reader.inclusion_proof(1, &absent).await.unwrap();
    proof::verify_non_inclusion(
        &Sha256MapHasher,
        sha256_null_hashes(),
        &root,
        &absent,
        &proof,
    )
    .unwrap();
}

/// Order independence: any permutation of a batch produces the same root.
#[tokio::test]
async fn test_batch_order_independence() {
    let batch: Vec<_> = (0..12u8)
        .map(|i| kv(&format!("key-{}", i), &format!("val-{}", i)))
        .collect();

    let forward = new_storage();
    let a = write_batch(&forward, 1, batch.clone()).await;

    let backward = new_storage();
    let mut reversed = batch;
    reversed.reverse();
    let b = write_batch(&backward, 1, reversed).await;
    assert_eq!(a, b);
}

/// Proofs keep verifying against the root of the revision they were
/// taken at, even after later revisions shadow the data.
#[tokio::test]
async fn test_historical_roots_stay_readable() {
    let storage = new_storage();
    let leaf_v1 = kv("mut", "v1");
    let root1 = write_batch(&storage, 1, vec![leaf_v1.clone()]).await;

    let leaf_v2 = kv("mut", "v2");
    let root2 = write_batch(&storage, 2, vec![leaf_v2.clone()]).await;
    assert_ne!(root1, root2);

    let reader = SparseMerkleTreeReader::new(&storage, hasher());
    assert_eq!(reader.root_at_revision(1).await.unwrap(), root1);
    assert_eq!(reader.root_at_revision(2).await.unwrap(), root2);
    // A read past the newest revision sees the newest data.
    assert_eq!(reader.root_at_revision(100).await.unwrap(), root2);

    let proof = reader.inclusion_proof(1, &leaf_v1.hashed_key).await.unwrap();
    proof::verify_inclusion(
        &Sha256MapHasher,
        sha256_null_hashes(),
        &root1,
        &leaf_v1.hashed_key,
        &leaf_v1.hashed_value,
        &proof,
    )
    .unwrap();
}

/// Read coalescing: with a uniform plan of height 8, fetching all 256
/// siblings of a leaf touches exactly 32 tiles.
#[tokio::test]
async fn test_sibling_reads_coalesce_into_tiles() {
    let storage = MemoryTreeStorage::new(TREE_ID, vec![8; 32], hasher()).unwrap();
    // Populate one leaf so tiles along its path exist.
    let leaf = kv("coalesce", "v");
    {
        let writer = SparseMerkleTreeWriter::new(
            TREE_ID,
            1,
            vec![8; 32],
            hasher(),
            Arc::new(storage.clone()),
            CancelToken::never(),
        )
        .unwrap();
        writer.set_leaves(vec![leaf.clone()]).await.unwrap();
        writer.calculate_root().await.unwrap();
    }

    let before = storage.tile_reads();
    let siblings = NodeId::from_hash(&leaf.hashed_key).siblings();
    storage.get_merkle_nodes(1, &siblings).await.unwrap();
    assert_eq!(storage.tile_reads() - before, 32);
}

/// The empty-tree root: an empty batch calculates `null[0]` and, having
/// produced no nodes, persists nothing.
#[tokio::test]
async fn test_empty_batch_root_is_null_root() {
    let storage = new_storage();
    let root = write_batch(&storage, 1, Vec::new()).await;
    assert_eq!(root, sha256_null_hashes().empty_root());
    assert_eq!(storage.tile_writes(), 0);
}
