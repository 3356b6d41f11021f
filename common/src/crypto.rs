//! Common cryptography helper functions for Braid

use crate::hash::Hash;
use cryptoxide::hashing::blake2b::Blake2b;

/// Get a Blake2b-256 hash of arbitrary data
///
/// Returns a 32-byte hash.
pub fn digest_256(data: &[u8]) -> Hash<32> {
    let mut context = Blake2b::<256>::new();
    context.update_mut(data);
    Hash::new(context.finalize())
}

/// Hash two 32-byte hashes into one, left then right.
///
/// This is the node combiner used when building merkle stores.
pub fn merge_256(left: &Hash<32>, right: &Hash<32>) -> Hash<32> {
    let mut context = Blake2b::<256>::new();
    context.update_mut(left.as_inner());
    context.update_mut(right.as_inner());
    Hash::new(context.finalize())
}
