//! Definition of Braid common types

use crate::hash::Hash;
use std::collections::BTreeSet;

/// Block hash, the identity of a DAG node
pub type BlockHash = Hash<32>;

/// A block-like object offered to the DAG for insertion.
///
/// Producers (unpackers, fetchers, test fixtures) implement this; the DAG
/// core only ever reads the hash, the declared parent list and the
/// timestamp.
pub trait BlockData {
    /// Unique identifier of the block
    fn hash(&self) -> BlockHash;

    /// Declared parent hashes, main parent first. Empty only for genesis.
    fn parents(&self) -> Vec<BlockHash>;

    /// Unix timestamp (seconds) the block was produced
    fn timestamp(&self) -> i64;
}

/// Compact summary of one node's view of the DAG.
///
/// Exchanged between peers to decide who is ahead and to drive block
/// synchronisation. The tip set is kept in a `BTreeSet` so serialisation
/// does not depend on insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GraphState {
    /// Current tip hashes
    pub tips: BTreeSet<BlockHash>,

    /// Maximum layer over the tips
    pub layer: u32,

    /// Total number of blocks
    pub total: u64,

    /// Height of the main chain tip
    pub main_height: u64,
}

impl GraphState {
    /// True when this state strictly dominates `other`.
    ///
    /// Lexicographic on (main height, total, layer, tip count). A full
    /// metric tie never dominates, equal tip sets or not.
    pub fn is_excellent(&self, other: &GraphState) -> bool {
        if self.main_height != other.main_height {
            return self.main_height > other.main_height;
        }
        if self.total != other.total {
            return self.total > other.total;
        }
        if self.layer != other.layer {
            return self.layer > other.layer;
        }
        if self.tips.len() != other.tips.len() {
            return self.tips.len() > other.tips.len();
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(main_height: u64, total: u64, layer: u32, tips: &[u8]) -> GraphState {
        GraphState {
            tips: tips
                .iter()
                .map(|n| {
                    let mut bytes = [0u8; 32];
                    bytes[0] = *n;
                    BlockHash::from(bytes)
                })
                .collect(),
            layer,
            total,
            main_height,
        }
    }

    #[test]
    fn main_height_dominates() {
        assert!(state(2, 1, 1, &[1]).is_excellent(&state(1, 9, 9, &[1, 2, 3])));
        assert!(!state(1, 9, 9, &[1]).is_excellent(&state(2, 1, 1, &[1])));
    }

    #[test]
    fn total_breaks_equal_height() {
        assert!(state(1, 5, 1, &[1]).is_excellent(&state(1, 4, 9, &[1])));
    }

    #[test]
    fn full_tie_is_never_excellent() {
        let a = state(1, 3, 2, &[1, 2]);
        let b = state(1, 3, 2, &[3, 4]);
        assert!(!a.is_excellent(&b));
        assert!(!b.is_excellent(&a));
        assert!(!a.is_excellent(&a.clone()));
    }

    #[test]
    fn serde_round_trip() {
        let a = state(7, 42, 5, &[1, 2, 3]);
        let json = serde_json::to_string(&a).unwrap();
        assert_eq!(serde_json::from_str::<GraphState>(&json).unwrap(), a);
    }
}
