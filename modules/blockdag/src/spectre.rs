//! Spectre: ordering by pairwise elections.
//!
//! Related pairs order by reachability. An anticone pair (x, y) is put to
//! a vote over the whole DAG: x and y vote for themselves, a block seeing
//! exactly one of them in its past votes for that one, a block seeing both
//! inherits the majority of its parents' votes, and unrelated blocks
//! abstain; the aggregate decides, (layer, id) on a dead heat. A new block
//! enters the running sequence after its last ancestor, in front of the
//! first rival it out-polls; settled positions are only displaced, never
//! re-elected.

use crate::algorithm::{commit_order, DagAlgorithm};
use crate::block::Block;
use crate::block_set::BlockSet;
use crate::dag::DagStore;
use braid_common::BlockHash;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

#[derive(Default)]
pub struct Spectre {
    /// The running global sequence, position order
    sequence: Vec<BlockHash>,

    /// Main chain, genesis first
    main_chain: Vec<BlockHash>,

    /// Membership index over `main_chain`
    main_set: HashSet<BlockHash>,
}

impl Spectre {
    /// Pairwise election between two blocks; `Less` puts `x` first.
    fn prefer(&self, store: &DagStore, x: &BlockHash, y: &BlockHash) -> Ordering {
        let mut future_x = BlockSet::new();
        store.future_set(&mut future_x, x);
        if future_x.has(y) {
            return Ordering::Less;
        }
        let mut future_y = BlockSet::new();
        store.future_set(&mut future_y, y);
        if future_y.has(x) {
            return Ordering::Greater;
        }

        let mut votes: HashMap<BlockHash, i64> = HashMap::new();
        let mut tally = 0i64;
        for voter in store.topo_sorted() {
            let vote = if voter == *x {
                -1
            } else if voter == *y {
                1
            } else {
                let sees_x = future_x.has(&voter);
                let sees_y = future_y.has(&voter);
                match (sees_x, sees_y) {
                    (true, false) => -1,
                    (false, true) => 1,
                    (true, true) => {
                        let inherited: i64 = store
                            .block(&voter)
                            .map(|b| {
                                b.parents()
                                    .iter()
                                    .filter_map(|p| votes.get(p))
                                    .sum()
                            })
                            .unwrap_or(0);
                        inherited.signum()
                    }
                    (false, false) => 0,
                }
            };
            votes.insert(voter, vote);
            tally += vote;
        }

        match tally.cmp(&0) {
            Ordering::Equal => {
                let key = |h: &BlockHash| store.block(h).map(|b| (b.layer(), b.id()));
                key(x).cmp(&key(y))
            }
            decided => decided,
        }
    }

    /// Winner of a multi-candidate election: most pairwise wins, smallest
    /// id on a tie.
    fn elect<'a>(&self, store: &'a DagStore, candidates: &[BlockHash]) -> Option<&'a Block> {
        candidates
            .iter()
            .filter_map(|h| store.block(h))
            .max_by_key(|candidate| {
                let wins = candidates
                    .iter()
                    .filter(|other| {
                        *other != candidate.hash()
                            && self.prefer(store, candidate.hash(), *other) == Ordering::Less
                    })
                    .count();
                (wins, std::cmp::Reverse(candidate.id()))
            })
    }

    /// Place a new block: after its last ancestor, before the first
    /// anticone rival it beats.
    fn place(&mut self, store: &DagStore, hash: &BlockHash) {
        let mut past = BlockSet::new();
        store.past_set(&mut past, hash);
        let mut position = self
            .sequence
            .iter()
            .rposition(|h| past.has(h))
            .map(|i| i + 1)
            .unwrap_or(0);
        while position < self.sequence.len() {
            let rival = self.sequence[position];
            if self.prefer(store, hash, &rival) == Ordering::Less {
                break;
            }
            position += 1;
        }
        self.sequence.insert(position, *hash);
    }

    /// Follow election winners among children from genesis.
    fn rebuild_main_chain(&mut self, store: &DagStore) {
        self.main_chain.clear();
        self.main_set.clear();
        if store.block_total() == 0 {
            return;
        }
        let mut current = *store.genesis_hash();
        self.main_chain.push(current);
        loop {
            let children: Vec<BlockHash> = store
                .block(&current)
                .map(|b| b.children().iter().copied().collect())
                .unwrap_or_default();
            let Some(next) = self.elect(store, &children) else {
                break;
            };
            current = *next.hash();
            self.main_chain.push(current);
        }
        self.main_set = self.main_chain.iter().copied().collect();
    }

    fn assign_heights(&self, store: &mut DagStore) {
        for (height, hash) in self.main_chain.iter().enumerate() {
            store.set_height(hash, height as u64);
        }
        for hash in store.topo_sorted() {
            if self.main_set.contains(&hash) {
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
}

impl DagAlgorithm for Spectre {
    fn name(&self) -> &'static str {
        "spectre"
    }

    fn init(&mut self, _store: &mut DagStore) {}

    fn create_block(&mut self, _store: &mut DagStore, _hash: &BlockHash) {
        // Elections read the graph directly; no per-block record to install
    }

    fn add_block(&mut self, store: &mut DagStore, hash: &BlockHash) -> Vec<BlockHash> {
        self.place(store, hash);
        self.rebuild_main_chain(store);
        self.assign_heights(store);
        let sequence = self.sequence.clone();
        commit_order(store, &sequence)
    }

    fn tips_list<'a>(&self, _store: &'a DagStore) -> Option<Vec<&'a Block>> {
        None
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
        self.elect(store, &candidates)
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

    fn spectre_dag() -> BlockDag {
        BlockDag::with_instance(Box::new(Spectre::default()))
    }

    fn orders(dag: &BlockDag, blocks: &[u8]) -> Vec<u32> {
        blocks.iter().map(|n| dag.block(&hash(*n)).unwrap().order().unwrap()).collect()
    }

    #[test]
    fn linear_chain_orders_by_ancestry() {
        let mut dag = spectre_dag();
        add(&mut dag, 1, &[]);
        add(&mut dag, 2, &[1]);
        add(&mut dag, 3, &[2]);

        assert_eq!(orders(&dag, &[1, 2, 3]), vec![0, 1, 2]);
        assert!(dag.is_on_main_chain(&hash(3)));
        assert_eq!(dag.block(&hash(3)).unwrap().height(), 2);
    }

    #[test]
    fn future_support_defends_a_position() {
        let mut dag = spectre_dag();
        add(&mut dag, 1, &[]);
        add(&mut dag, 2, &[1]);
        add(&mut dag, 3, &[2]);
        // A latecomer tip cannot displace the defended branch, but slots
        // in ahead of deeper layers it out-polls on the tiebreak
        add(&mut dag, 4, &[1]);

        assert_eq!(orders(&dag, &[1, 2, 4, 3]), vec![0, 1, 2, 3]);
    }

    #[test]
    fn election_breaks_anticone_ties_by_id() {
        let mut dag = spectre_dag();
        add(&mut dag, 1, &[]);
        add(&mut dag, 2, &[1]);
        add(&mut dag, 3, &[1]);

        // No future voters on either side, equal layers: earlier id first
        assert_eq!(orders(&dag, &[1, 2, 3]), vec![0, 1, 2]);
    }

    #[test]
    fn main_chain_follows_election_winners() {
        let mut dag = spectre_dag();
        add(&mut dag, 1, &[]);
        add(&mut dag, 2, &[1]);
        add(&mut dag, 3, &[1]);
        add(&mut dag, 4, &[2]);

        // The branch through 2 carries the future vote
        assert!(dag.is_on_main_chain(&hash(2)));
        assert!(!dag.is_on_main_chain(&hash(3)));
        assert_eq!(dag.main_chain_tip().map(|b| *b.hash()), Some(hash(4)));

        let candidates: BlockSet = [hash(2), hash(3)].into_iter().collect();
        assert_eq!(dag.main_parent(&candidates).map(|b| *b.hash()), Some(hash(2)));
    }

    #[test]
    fn order_respects_parents_and_is_dense() {
        let mut dag = spectre_dag();
        add(&mut dag, 1, &[]);
        add(&mut dag, 2, &[1]);
        add(&mut dag, 3, &[1]);
        add(&mut dag, 4, &[2, 3]);
        add(&mut dag, 5, &[4]);

        for block in dag.store().blocks_iter() {
            for parent in block.parents() {
                let parent_order = dag.block(parent).unwrap().order().unwrap();
                assert!(parent_order < block.order().unwrap());
            }
        }
        for index in 0..dag.block_total() as u32 {
            assert!(dag.block_by_order(index).is_some());
        }
    }
}
