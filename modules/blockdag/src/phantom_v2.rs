//! PHANTOM v2: incremental mergeset colouring.
//!
//! Where the original recolours the whole window, v2 decides each block's
//! colouring once, at insertion, the GHOSTDAG way: the block inherits the
//! view of its selected parent and colours only its mergeset, subject to
//! the two k-cluster feasibility checks. Every block carries its mergeset
//! record for the rest of its life.

use crate::algorithm::{commit_order, DagAlgorithm};
use crate::block::Block;
use crate::block_set::BlockSet;
use crate::dag::{DagStore, MAX_TIPS, MAX_TIP_LAYER_GAP};
use braid_common::BlockHash;
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};

/// Default blue anticone limit (the protocol's k)
pub const DEFAULT_BLUE_ANTICONE_LIMIT: u32 = 3;

/// Per-block colouring record, written once when the block is created.
#[derive(Debug, Clone, Default)]
pub struct MergesetData {
    /// Parent whose view this block extends
    pub selected_parent: Option<BlockHash>,

    /// Mergeset members that satisfied the k-cluster checks
    pub mergeset_blues: Vec<BlockHash>,

    /// Mergeset members that violated them
    pub mergeset_reds: Vec<BlockHash>,

    /// Blue anticone size of each affected blue, from this block's view
    pub blues_anticone_sizes: HashMap<BlockHash, u32>,

    /// Number of blue blocks in this block's past, itself included
    pub blue_score: u64,
}

pub struct PhantomV2 {
    /// Blue anticone limit
    k: u32,

    /// Colouring records keyed by block hash
    data: HashMap<BlockHash, MergesetData>,

    /// Main chain, genesis first
    main_chain: Vec<BlockHash>,

    /// Membership index over `main_chain`
    main_set: HashSet<BlockHash>,
}

impl PhantomV2 {
    pub fn new(k: u32) -> Self {
        Self {
            k,
            data: HashMap::new(),
            main_chain: Vec::new(),
            main_set: HashSet::new(),
        }
    }

    pub fn k(&self) -> u32 {
        self.k
    }

    /// Colouring record of a block, if it has been created.
    pub fn mergeset(&self, hash: &BlockHash) -> Option<&MergesetData> {
        self.data.get(hash)
    }

    fn blue_score(&self, hash: &BlockHash) -> u64 {
        self.data.get(hash).map(|d| d.blue_score).unwrap_or_default()
    }

    /// Highest blue score of a candidate list, smallest id on a tie.
    fn select_parent(&self, store: &DagStore, candidates: &[BlockHash]) -> Option<BlockHash> {
        candidates
            .iter()
            .filter_map(|h| store.block(h))
            .max_by_key(|b| (self.blue_score(b.hash()), Reverse(b.id())))
            .map(|b| *b.hash())
    }

    /// The blue set visible from a block's view: its selected-parent chain
    /// and every mergeset blue along it.
    fn view_blues(&self, chain_start: Option<BlockHash>) -> HashSet<BlockHash> {
        let mut blues = HashSet::new();
        let mut current = chain_start;
        while let Some(hash) = current {
            blues.insert(hash);
            let Some(data) = self.data.get(&hash) else {
                break;
            };
            blues.extend(data.mergeset_blues.iter().copied());
            current = data.selected_parent;
        }
        blues
    }

    /// Blue anticone size of `target` seen from the view under
    /// construction, falling back to the records along the chain.
    fn blue_anticone_size(
        &self,
        new_sizes: &HashMap<BlockHash, u32>,
        chain_start: Option<BlockHash>,
        target: &BlockHash,
    ) -> u32 {
        if let Some(size) = new_sizes.get(target) {
            return *size;
        }
        let mut current = chain_start;
        while let Some(hash) = current {
            let Some(data) = self.data.get(&hash) else {
                break;
            };
            if let Some(size) = data.blues_anticone_sizes.get(target) {
                return *size;
            }
            current = data.selected_parent;
        }
        0
    }

    /// Colour the mergeset of a freshly inserted block.
    fn colour(&self, store: &DagStore, hash: &BlockHash) -> MergesetData {
        let parents = store.block(hash).map(|b| b.parents().to_vec()).unwrap_or_default();
        let Some(selected_parent) = self.select_parent(store, &parents) else {
            // Genesis view
            return MergesetData {
                blue_score: 1,
                ..MergesetData::default()
            };
        };

        // Mergeset: our past minus the selected parent and its past
        let mut past = BlockSet::new();
        store.past_set(&mut past, hash);
        let mut parent_past = BlockSet::new();
        store.past_set(&mut parent_past, &selected_parent);
        parent_past.add(selected_parent);
        past.exclude(&parent_past);

        let mut mergeset: Vec<&Block> = past.iter().filter_map(|h| store.block(h)).collect();
        mergeset.sort_by_key(|b| (b.layer(), b.id()));

        let view_blues = self.view_blues(Some(selected_parent));
        let mut record = MergesetData {
            selected_parent: Some(selected_parent),
            ..MergesetData::default()
        };

        for candidate in mergeset {
            let anticone = store.anticone(candidate.hash(), None);
            let blues_in_anticone: Vec<BlockHash> = anticone
                .iter()
                .filter(|h| view_blues.contains(*h) || record.mergeset_blues.contains(*h))
                .copied()
                .collect();

            // First k-cluster check: the candidate's own blue anticone
            let feasible = blues_in_anticone.len() as u32 <= self.k
                // Second check: no affected blue may overflow its limit
                && blues_in_anticone.iter().all(|blue| {
                    self.blue_anticone_size(
                        &record.blues_anticone_sizes,
                        Some(selected_parent),
                        blue,
                    ) < self.k
                });

            if feasible {
                for blue in &blues_in_anticone {
                    let size = self.blue_anticone_size(
                        &record.blues_anticone_sizes,
                        Some(selected_parent),
                        blue,
                    );
                    record.blues_anticone_sizes.insert(*blue, size + 1);
                }
                record
                    .blues_anticone_sizes
                    .insert(*candidate.hash(), blues_in_anticone.len() as u32);
                record.mergeset_blues.push(*candidate.hash());
            } else {
                record.mergeset_reds.push(*candidate.hash());
            }
        }

        record.blue_score =
            self.blue_score(&selected_parent) + 1 + record.mergeset_blues.len() as u64;
        record
    }

    fn rebuild_main_chain(&mut self, store: &DagStore) {
        self.main_chain.clear();
        self.main_set.clear();
        let tips: Vec<BlockHash> = store.tips().iter().copied().collect();
        let Some(tip) = self.select_parent(store, &tips) else {
            return;
        };
        let mut chain = vec![tip];
        let mut current = tip;
        while let Some(parent) = self.data.get(&current).and_then(|d| d.selected_parent) {
            chain.push(parent);
            current = parent;
        }
        chain.reverse();
        self.main_set = chain.iter().copied().collect();
        self.main_chain = chain;
    }

    fn assign_heights(&self, store: &mut DagStore) {
        for (height, hash) in self.main_chain.iter().enumerate() {
            store.set_height(hash, height as u64);
        }
        for hash in store.topo_sorted() {
            if self.main_set.contains(&hash) {
                continue;
            }
            let parent_height = self
                .data
                .get(&hash)
                .and_then(|d| d.selected_parent)
                .and_then(|p| store.block(&p))
                .map(|b| b.height())
                .unwrap_or(0);
            store.set_height(&hash, parent_height + 1);
        }
    }

    /// Total order: each chain block is preceded by its mergeset in
    /// (layer, id) order; blocks outside the chain tip's past close the
    /// sequence.
    fn linearize(&self, store: &DagStore) -> Vec<BlockHash> {
        let mut emitted: HashSet<BlockHash> = HashSet::new();
        let mut order: Vec<BlockHash> = Vec::with_capacity(store.block_total() as usize);

        for chain_block in &self.main_chain {
            let mut segment: Vec<&Block> = self
                .data
                .get(chain_block)
                .map(|d| {
                    d.mergeset_blues
                        .iter()
                        .chain(d.mergeset_reds.iter())
                        .filter_map(|h| store.block(h))
                        .collect()
                })
                .unwrap_or_default();
            segment.sort_by_key(|b| (b.layer(), b.id()));
            for block in segment {
                if emitted.insert(*block.hash()) {
                    order.push(*block.hash());
                }
            }
            if emitted.insert(*chain_block) {
                order.push(*chain_block);
            }
        }

        let stragglers: Vec<BlockHash> = store
            .topo_sorted()
            .into_iter()
            .filter(|h| !emitted.contains(h))
            .collect();
        order.extend(stragglers);
        order
    }
}

impl Default for PhantomV2 {
    fn default() -> Self {
        Self::new(DEFAULT_BLUE_ANTICONE_LIMIT)
    }
}

impl DagAlgorithm for PhantomV2 {
    fn name(&self) -> &'static str {
        "phantom_v2"
    }

    fn init(&mut self, _store: &mut DagStore) {}

    fn create_block(&mut self, store: &mut DagStore, hash: &BlockHash) {
        let record = self.colour(store, hash);
        store.set_weight(hash, record.blue_score);
        if let Some(selected_parent) = record.selected_parent {
            store.set_main_parent(hash, selected_parent);
        }
        self.data.insert(*hash, record);
    }

    fn add_block(&mut self, store: &mut DagStore, _hash: &BlockHash) -> Vec<BlockHash> {
        self.rebuild_main_chain(store);
        self.assign_heights(store);
        let order = self.linearize(store);
        commit_order(store, &order)
    }

    fn tips_list<'a>(&self, store: &'a DagStore) -> Option<Vec<&'a Block>> {
        let max_layer =
            store.tips().iter().filter_map(|h| store.block(h)).map(|b| b.layer()).max()?;
        let mut list: Vec<&Block> = store
            .tips()
            .iter()
            .filter_map(|h| store.block(h))
            .filter(|b| b.layer() + MAX_TIP_LAYER_GAP >= max_layer)
            .collect();
        list.sort_by_key(|b| (Reverse(b.layer()), b.id()));
        list.truncate(MAX_TIPS);
        Some(list)
    }

    fn block_by_order(&self, _store: &DagStore, _order: u32) -> Option<BlockHash> {
        None
    }

    fn is_on_main_chain(&self, _store: &DagStore, hash: &BlockHash) -> bool {
        self.main_set.contains(hash)
    }

    fn main_chain_tip<'a>(&self, store: &'a DagStore) -> Option<&'a Block> {
        self.main_chain.last().and_then(|h| store.block(h))
    }

    fn main_parent<'a>(&self, store: &'a DagStore, candidates: &BlockSet) -> Option<&'a Block> {
        let candidates: Vec<BlockHash> = candidates.iter().copied().collect();
        self.select_parent(store, &candidates).and_then(|h| store.block(&h))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::BlockDag;
    use braid_common::messages::BlockAvailableMessage;

    fn hash(n: u8) -> BlockHash {
        let mut bytes = [0u8; 32];
        bytes[0] = n;
        BlockHash::from(bytes)
    }

    fn add(dag: &mut BlockDag, n: u8, parents: &[u8]) {
        dag.add_block(&BlockAvailableMessage {
            hash: hash(n),
            parents: parents.iter().map(|p| hash(*p)).collect(),
            timestamp: 1_700_000_000 + n as i64,
        })
        .expect("add_block rejected a valid block");
    }

    fn diamond(k: u32) -> BlockDag {
        let mut dag = BlockDag::with_instance(Box::new(PhantomV2::new(k)));
        add(&mut dag, 1, &[]);
        add(&mut dag, 2, &[1]);
        add(&mut dag, 3, &[1]);
        add(&mut dag, 4, &[2, 3]);
        dag
    }

    #[test]
    fn mergeset_blues_feed_the_blue_score() {
        let dag = diamond(3);
        // Selected parent of the merge block is the earlier branch; the
        // later branch lands in its mergeset as blue.
        assert_eq!(dag.block(&hash(4)).unwrap().main_parent(), Some(&hash(2)));
        assert_eq!(dag.block(&hash(1)).unwrap().weight(), 1);
        assert_eq!(dag.block(&hash(2)).unwrap().weight(), 2);
        assert_eq!(dag.block(&hash(4)).unwrap().weight(), 4);
    }

    #[test]
    fn zero_k_reds_the_merged_branch() {
        let dag = diamond(0);
        // The merged branch violates the 0-cluster and stays red
        assert_eq!(dag.block(&hash(4)).unwrap().weight(), 3);
    }

    #[test]
    fn order_respects_parents() {
        let mut dag = BlockDag::with_instance(Box::new(PhantomV2::default()));
        add(&mut dag, 1, &[]);
        add(&mut dag, 2, &[1]);
        add(&mut dag, 3, &[1]);
        add(&mut dag, 4, &[2]);
        add(&mut dag, 5, &[2, 3]);
        add(&mut dag, 6, &[4, 5]);

        for block in dag.store().blocks_iter() {
            for parent in block.parents() {
                let parent_order = dag.block(parent).unwrap().order().unwrap();
                assert!(parent_order < block.order().unwrap());
            }
        }
        // Dense and unique
        for index in 0..dag.block_total() as u32 {
            assert!(dag.block_by_order(index).is_some());
        }
    }

    #[test]
    fn main_chain_queries() {
        let mut dag = BlockDag::with_instance(Box::new(PhantomV2::default()));
        add(&mut dag, 1, &[]);
        add(&mut dag, 2, &[1]);
        add(&mut dag, 3, &[2]);
        add(&mut dag, 4, &[1]);
        add(&mut dag, 5, &[3, 4]);

        assert!(dag.is_on_main_chain(&hash(3)));
        assert!(!dag.is_on_main_chain(&hash(4)));
        assert_eq!(dag.main_chain_tip().map(|b| *b.hash()), Some(hash(5)));
        assert_eq!(dag.block(&hash(5)).unwrap().height(), 3);

        let candidates: BlockSet = [hash(3), hash(4)].into_iter().collect();
        assert_eq!(dag.main_parent(&candidates).map(|b| *b.hash()), Some(hash(3)));
    }
}
