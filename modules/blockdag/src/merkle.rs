//! Merkle store construction over a parent (tip) set.

use braid_common::crypto;
use braid_common::BlockHash;

/// Build the merkle store over an ordered list of parent hashes.
///
/// Leaves come first, then each level of pair hashes bottom-up; the last
/// entry is the root. An odd node is paired with itself. Empty input
/// yields an empty store.
pub fn build_parents_merkle_store(parents: &[BlockHash]) -> Vec<BlockHash> {
    if parents.is_empty() {
        return Vec::new();
    }
    let mut store: Vec<BlockHash> = parents.to_vec();
    let mut level: Vec<BlockHash> = parents.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let right = pair.get(1).unwrap_or(&pair[0]);
            next.push(crypto::merge_256(&pair[0], right));
        }
        store.extend_from_slice(&next);
        level = next;
    }
    store
}

/// Root of a store built by [`build_parents_merkle_store`].
pub fn merkle_root(store: &[BlockHash]) -> Option<&BlockHash> {
    store.last()
}
