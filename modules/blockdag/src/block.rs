//! Block representation within the DAG.

use crate::block_set::BlockSet;
use braid_common::BlockHash;

/// A node in the block DAG.
///
/// Created exactly once on insertion; parents and layer are immutable from
/// then on, the children set grows as descendants arrive, and order/height
/// are owned by the active consensus algorithm.
#[derive(Debug, Clone)]
pub struct Block {
    /// Insertion counter at the moment this block was added. Stable
    /// tiebreaker for blocks whose order is equal or unassigned.
    id: u64,

    /// Block hash (identity key)
    hash: BlockHash,

    /// Parent hashes, declared main parent first. Empty only for genesis.
    parents: Vec<BlockHash>,

    /// Child hashes, populated as descendants are added
    children: BlockSet,

    /// Algorithm-specific scalar, initially 1
    weight: u64,

    /// Longest-path distance from genesis
    layer: u32,

    /// Position in the global sequence; None until assigned
    order: Option<u32>,

    /// Main chain height
    height: u64,

    /// The parent currently selected as main. Starts as the first declared
    /// parent; the algorithm may re-designate it.
    main_parent: Option<BlockHash>,
}

impl Block {
    /// Create a new block with no children, weight 1 and layer 0.
    pub fn new(id: u64, hash: BlockHash, parents: Vec<BlockHash>) -> Self {
        let main_parent = parents.first().copied();
        Self {
            id,
            hash,
            parents,
            children: BlockSet::new(),
            weight: 1,
            layer: 0,
            order: None,
            height: 0,
            main_parent,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn hash(&self) -> &BlockHash {
        &self.hash
    }

    pub fn parents(&self) -> &[BlockHash] {
        &self.parents
    }

    pub fn children(&self) -> &BlockSet {
        &self.children
    }

    pub fn has_parents(&self) -> bool {
        !self.parents.is_empty()
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn weight(&self) -> u64 {
        self.weight
    }

    pub fn layer(&self) -> u32 {
        self.layer
    }

    pub fn order(&self) -> Option<u32> {
        self.order
    }

    pub fn is_ordered(&self) -> bool {
        self.order.is_some()
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn main_parent(&self) -> Option<&BlockHash> {
        self.main_parent.as_ref()
    }

    /// Comparison key: order ascending with the insertion id as stable
    /// tiebreak. Unassigned order compares as 0.
    pub fn sort_key(&self) -> (u32, u64) {
        (self.order.unwrap_or(0), self.id)
    }

    pub(crate) fn add_child(&mut self, hash: BlockHash) {
        self.children.add(hash);
    }

    pub(crate) fn set_layer(&mut self, layer: u32) {
        self.layer = layer;
    }

    pub(crate) fn set_order(&mut self, order: u32) {
        self.order = Some(order);
    }

    pub(crate) fn set_height(&mut self, height: u64) {
        self.height = height;
    }

    pub(crate) fn set_weight(&mut self, weight: u64) {
        self.weight = weight;
    }

    pub(crate) fn set_main_parent(&mut self, parent: BlockHash) {
        self.main_parent = Some(parent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(n: u8) -> BlockHash {
        let mut bytes = [0u8; 32];
        bytes[0] = n;
        BlockHash::from(bytes)
    }

    #[test]
    fn new_block_defaults() {
        let b = Block::new(7, hash(1), vec![hash(2), hash(3)]);
        assert_eq!(b.id(), 7);
        assert_eq!(b.weight(), 1);
        assert_eq!(b.layer(), 0);
        assert!(!b.is_ordered());
        assert!(!b.has_children());
        assert!(b.has_parents());
        assert_eq!(b.main_parent(), Some(&hash(2)));
    }

    #[test]
    fn genesis_has_no_main_parent() {
        let g = Block::new(0, hash(1), Vec::new());
        assert!(!g.has_parents());
        assert!(g.main_parent().is_none());
    }

    #[test]
    fn sort_key_breaks_ties_by_id() {
        let mut a = Block::new(1, hash(1), Vec::new());
        let b = Block::new(2, hash(2), Vec::new());
        assert!(a.sort_key() < b.sort_key());
        a.set_order(5);
        assert!(a.sort_key() > b.sort_key());
    }
}
