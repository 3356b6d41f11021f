//! Conflux: ordering determined by the tree graph.
//!
//! The first declared parent of every block is its tree edge; the
//! remaining parents are reference edges. The pivot chain is selected by
//! GHOST over the tree (heaviest subtree, earliest id on a tie) and the
//! linearisation emits each pivot block's epoch: the part of its past no
//! earlier epoch has claimed.

use crate::algorithm::{commit_order, DagAlgorithm};
use crate::block::Block;
use crate::block_set::BlockSet;
use crate::dag::DagStore;
use braid_common::BlockHash;
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};

#[derive(Default)]
pub struct Conflux {
    /// Tree children (first-parent edges only)
    tree_children: HashMap<BlockHash, Vec<BlockHash>>,

    /// Number of blocks in the tree subtree rooted at each block
    subtree_weight: HashMap<BlockHash, u64>,

    /// Pivot chain, genesis first
    pivot: Vec<BlockHash>,

    /// Membership index over `pivot`
    pivot_set: HashSet<BlockHash>,
}

impl Conflux {
    fn subtree(&self, hash: &BlockHash) -> u64 {
        self.subtree_weight.get(hash).copied().unwrap_or_default()
    }

    /// Heaviest-subtree candidate, smallest id on a tie.
    fn ghost_choice<'a>(
        &self,
        store: &'a DagStore,
        candidates: &[BlockHash],
    ) -> Option<&'a Block> {
        candidates
            .iter()
            .filter_map(|h| store.block(h))
            .max_by_key(|b| (self.subtree(b.hash()), Reverse(b.id())))
    }

    /// GHOST walk from genesis down the heaviest tree branches.
    fn rebuild_pivot(&mut self, store: &DagStore) {
        self.pivot.clear();
        self.pivot_set.clear();
        if store.block_total() == 0 {
            return;
        }
        let mut current = *store.genesis_hash();
        self.pivot.push(current);
        while let Some(children) = self.tree_children.get(&current) {
            let Some(next) = self.ghost_choice(store, children) else {
                break;
            };
            current = *next.hash();
            self.pivot.push(current);
        }
        self.pivot_set = self.pivot.iter().copied().collect();
    }

    fn assign_heights(&self, store: &mut DagStore) {
        for (height, hash) in self.pivot.iter().enumerate() {
            store.set_height(hash, height as u64);
        }
        for hash in store.topo_sorted() {
            if self.pivot_set.contains(&hash) {
                continue;
            }
            let parent_height = store
                .block(&hash)
                .and_then(|b| b.main_parent())
                .and_then(|p| store.block(p))
                .map(|b| b.height())
                .unwrap_or(0);
            store.set_height(&hash, parent_height + 1);
        }
    }

    /// Epoch linearisation along the pivot chain.
    fn linearize(&self, store: &DagStore) -> Vec<BlockHash> {
        let mut emitted: HashSet<BlockHash> = HashSet::new();
        let mut order: Vec<BlockHash> = Vec::with_capacity(store.block_total() as usize);

        for pivot_block in &self.pivot {
            let mut past = BlockSet::new();
            store.past_set(&mut past, pivot_block);
            let mut epoch: Vec<&Block> = past
                .iter()
                .copied()
                .chain(std::iter::once(*pivot_block))
                .filter(|h| !emitted.contains(h))
                .filter_map(|h| store.block(&h))
                .collect();
            epoch.sort_by_key(|b| (b.layer(), b.id()));
            for block in epoch {
                emitted.insert(*block.hash());
                order.push(*block.hash());
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

impl DagAlgorithm for Conflux {
    fn name(&self) -> &'static str {
        "conflux"
    }

    fn init(&mut self, _store: &mut DagStore) {}

    fn create_block(&mut self, store: &mut DagStore, hash: &BlockHash) {
        // The declared first parent is the tree edge; reference edges do
        // not contribute subtree weight.
        let tree_parent = store.block(hash).and_then(|b| b.main_parent().copied());
        if let Some(parent) = tree_parent {
            self.tree_children.entry(parent).or_default().push(*hash);
        }
        self.subtree_weight.insert(*hash, 1);

        let mut current = tree_parent;
        while let Some(ancestor) = current {
            let weight = self.subtree_weight.entry(ancestor).or_insert(0);
            *weight += 1;
            let mirrored = *weight;
            store.set_weight(&ancestor, mirrored);
            current = store.block(&ancestor).and_then(|b| b.main_parent().copied());
        }
    }

    fn add_block(&mut self, store: &mut DagStore, _hash: &BlockHash) -> Vec<BlockHash> {
        self.rebuild_pivot(store);
        self.assign_heights(store);
        let order = self.linearize(store);
        commit_order(store, &order)
    }

    fn tips_list<'a>(&self, _store: &'a DagStore) -> Option<Vec<&'a Block>> {
        None
    }

    fn block_by_order(&self, _store: &DagStore, _order: u32) -> Option<BlockHash> {
        None
    }

    fn is_on_main_chain(&self, _store: &DagStore, hash: &BlockHash) -> bool {
        self.pivot_set.contains(hash)
    }

    fn main_chain_tip<'a>(&self, store: &'a DagStore) -> Option<&'a Block> {
        self.pivot.last().and_then(|h| store.block(h))
    }

    fn main_parent<'a>(&self, store: &'a DagStore, candidates: &BlockSet) -> Option<&'a Block> {
        let candidates: Vec<BlockHash> = candidates.iter().copied().collect();
        self.ghost_choice(store, &candidates)
    }
}
