//! The general foundation framework of the block DAG.
//!
//! [`DagStore`] owns every block, the tip set and the order index and
//! provides the reachability traversals the algorithms build on.
//! [`BlockDag`] pairs a store with the configured [`DagAlgorithm`] and is
//! the surface the rest of the system talks to.
//!
//! Not internally synchronised: callers must serialise `add_block` against
//! all reads that traverse the graph. All traversals are CPU-bound and
//! complete in time proportional to the volatile window.

use crate::algorithm::{new_dag_algorithm, DagAlgorithm, DagType};
use crate::block::Block;
use crate::block_set::BlockSet;
use crate::merkle;
use braid_common::{BlockData, BlockHash, GraphState};
use std::collections::{HashMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Maximum number of DAG tips
pub const MAX_TIPS: usize = 100;

/// Maximum order of a DAG block
pub const MAX_BLOCK_ORDER: u32 = u32::MAX;

/// Maximum layer gap between the deepest tip and a usable tip
pub const MAX_TIP_LAYER_GAP: u32 = 10;

/// Confirmations after which a block's order is considered stable
pub const STABLE_CONFIRMATIONS: u64 = 10;

/// Framework-owned DAG state: the block map, genesis, tips, order index
/// and arrival clock.
#[derive(Default)]
pub struct DagStore {
    /// Hash of the first accepted block
    genesis: BlockHash,

    /// All blocks keyed by hash
    blocks: HashMap<BlockHash, Block>,

    /// Total number of blocks currently owned, equal to the map size
    block_total: u64,

    /// Blocks without children
    tips: BlockSet,

    /// Global sequence, 0-based index to hash
    order: HashMap<u32, BlockHash>,

    /// Timestamp of the most recently added block (unix seconds)
    last_time: i64,
}

impl DagStore {
    /// Returns the block with the given hash, if present.
    pub fn block(&self, hash: &BlockHash) -> Option<&Block> {
        self.blocks.get(hash)
    }

    pub fn has_block(&self, hash: &BlockHash) -> bool {
        self.blocks.contains_key(hash)
    }

    pub fn has_blocks(&self, hashes: &[BlockHash]) -> bool {
        hashes.iter().all(|h| self.has_block(h))
    }

    pub fn block_total(&self) -> u64 {
        self.block_total
    }

    pub fn genesis_hash(&self) -> &BlockHash {
        &self.genesis
    }

    pub fn tips(&self) -> &BlockSet {
        &self.tips
    }

    /// Hash at the given order index, from the framework's own map.
    pub fn order_hash(&self, order: u32) -> Option<BlockHash> {
        self.order.get(&order).copied()
    }

    pub fn last_time(&self) -> i64 {
        self.last_time
    }

    /// Iterate over all blocks, no particular order.
    pub fn blocks_iter(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    /// All block hashes in (layer, id) topological order.
    pub fn topo_sorted(&self) -> Vec<BlockHash> {
        let mut all: Vec<&Block> = self.blocks.values().collect();
        all.sort_by_key(|b| (b.layer(), b.id()));
        all.iter().map(|b| *b.hash()).collect()
    }

    /// Accumulate every block reachable from `hash` through child edges
    /// into `out`, excluding `hash` itself. The set doubles as the visited
    /// guard so diamonds are walked once.
    pub fn future_set(&self, out: &mut BlockSet, hash: &BlockHash) {
        let Some(block) = self.block(hash) else {
            return;
        };
        let children: Vec<BlockHash> = block.children().iter().copied().collect();
        for child in children {
            if out.add(child) {
                self.future_set(out, &child);
            }
        }
    }

    /// Accumulate every ancestor of `hash` into `out`, excluding `hash`.
    pub fn past_set(&self, out: &mut BlockSet, hash: &BlockHash) {
        let Some(block) = self.block(hash) else {
            return;
        };
        for parent in block.parents().to_vec() {
            if out.add(parent) {
                self.past_set(out, &parent);
            }
        }
    }

    /// The set of blocks that are neither ancestors nor descendants of
    /// `hash`. If `exclude` is given the result is reduced by it.
    pub fn anticone(&self, hash: &BlockHash, exclude: Option<&BlockSet>) -> BlockSet {
        let mut future = BlockSet::new();
        self.future_set(&mut future, hash);
        let mut anticone = BlockSet::new();
        let tips: Vec<BlockHash> = self.tips.iter().copied().collect();
        for tip in tips {
            self.rec_anticone(hash, &future, &mut anticone, &tip);
        }
        if let Some(exclude) = exclude {
            anticone.exclude(exclude);
        }
        anticone
    }

    /// Walk ancestors from `hash` collecting anticone members of `target`.
    /// A node is only classified once all of its children have been: the
    /// virtual-tip test below.
    fn rec_anticone(
        &self,
        target: &BlockHash,
        future: &BlockSet,
        anticone: &mut BlockSet,
        hash: &BlockHash,
    ) {
        if hash == target {
            return;
        }
        let node = &self.blocks[hash];
        let children = node.children();
        let classifiable =
            children.is_empty() || Self::is_virtual_tip(target, future, anticone, children);
        if classifiable {
            if !future.has(hash) {
                anticone.add(*hash);
            }
            // Parents cannot be empty here unless this is genesis, which
            // terminates the walk by itself.
            for parent in node.parents().to_vec() {
                self.rec_anticone(target, future, anticone, &parent);
            }
        }
    }

    /// True when every child of a node has already been classified as
    /// future or anticone of `target`.
    fn is_virtual_tip(
        target: &BlockHash,
        future: &BlockSet,
        anticone: &BlockSet,
        children: &BlockSet,
    ) -> bool {
        for child in children.iter() {
            if child == target {
                return false;
            }
            if !future.has(child) && !anticone.has(child) {
                return false;
            }
        }
        true
    }

    pub(crate) fn insert_block(&mut self, block: Block) {
        let hash = *block.hash();
        if self.block_total == 0 {
            self.genesis = hash;
        }
        self.blocks.insert(hash, block);
        self.block_total += 1;
    }

    /// Refresh the tip set with a newly added block: every current tip
    /// that now has a child leaves the set, the new block joins it.
    pub(crate) fn update_tips(&mut self, hash: &BlockHash) {
        let stale: Vec<BlockHash> = self
            .tips
            .iter()
            .filter(|t| self.blocks[*t].has_children())
            .copied()
            .collect();
        for tip in stale {
            self.tips.remove(&tip);
        }
        self.tips.add(*hash);
    }

    pub(crate) fn block_mut(&mut self, hash: &BlockHash) -> Option<&mut Block> {
        self.blocks.get_mut(hash)
    }

    /// Assign a sequence position to a block, keeping the block record and
    /// the order index consistent.
    pub(crate) fn set_order(&mut self, hash: BlockHash, order: u32) {
        let block = self.blocks.get_mut(&hash).expect("order assigned to unknown block");
        block.set_order(order);
        self.order.insert(order, hash);
    }

    pub(crate) fn set_height(&mut self, hash: &BlockHash, height: u64) {
        self.blocks.get_mut(hash).expect("height assigned to unknown block").set_height(height);
    }

    pub(crate) fn set_weight(&mut self, hash: &BlockHash, weight: u64) {
        self.blocks.get_mut(hash).expect("weight assigned to unknown block").set_weight(weight);
    }

    pub(crate) fn set_main_parent(&mut self, hash: &BlockHash, parent: BlockHash) {
        self.blocks
            .get_mut(hash)
            .expect("main parent assigned to unknown block")
            .set_main_parent(parent);
    }
}

/// The block DAG bound to one consensus algorithm for its lifetime.
pub struct BlockDag {
    store: DagStore,
    instance: Box<dyn DagAlgorithm>,
}

impl BlockDag {
    /// Create a DAG driven by the named algorithm with default parameters.
    pub fn new(dag_type: DagType) -> Self {
        Self::with_instance(new_dag_algorithm(dag_type))
    }

    /// Create a DAG driven by a pre-built algorithm instance.
    pub fn with_instance(mut instance: Box<dyn DagAlgorithm>) -> Self {
        let mut store = DagStore::default();
        instance.init(&mut store);
        store.last_time = unix_now();
        Self { store, instance }
    }

    /// Name of the bound algorithm
    pub fn name(&self) -> &'static str {
        self.instance.name()
    }

    pub fn store(&self) -> &DagStore {
        &self.store
    }

    /// Insert a block offered by a producer.
    ///
    /// Structural rejections (duplicate hash, missing or empty parents on a
    /// non-empty DAG, invalid parent list, capacity) drop the input without
    /// mutation and return `None`: upstream validation decides whether that
    /// is an error. On success, returns the hashes whose global order was
    /// newly assigned or revised, in announcement order.
    pub fn add_block(&mut self, data: &dyn BlockData) -> Option<Vec<BlockHash>> {
        let hash = data.hash();
        if self.store.has_block(&hash) {
            debug!(block = %hash, "duplicate block dropped");
            return None;
        }
        let mut parents = Vec::new();
        if self.store.block_total() > 0 {
            parents = data.parents();
            if parents.is_empty() {
                return None;
            }
            if !self.store.has_blocks(&parents) {
                return None;
            }
        } else if !data.parents().is_empty() {
            // Only a parentless genesis can found the DAG
            return None;
        }
        if !Self::is_dag(&hash, &parents) {
            return None;
        }
        if self.store.block_total() > MAX_BLOCK_ORDER as u64 {
            return None;
        }

        let id = self.store.block_total();
        let mut block = Block::new(id, hash, parents.clone());
        if !parents.is_empty() {
            let mut max_layer = 0;
            for parent_hash in &parents {
                let parent =
                    self.store.block_mut(parent_hash).expect("parent vanished after presence check");
                parent.add_child(hash);
                max_layer = max_layer.max(parent.layer());
            }
            block.set_layer(max_layer + 1);
        }

        self.store.insert_block(block);
        self.instance.create_block(&mut self.store, &hash);
        self.store.update_tips(&hash);
        let timestamp = data.timestamp();
        if timestamp > self.store.last_time {
            self.store.last_time = timestamp;
        }
        Some(self.instance.add_block(&mut self.store, &hash))
    }

    /// Validity hook for the declared parent list: rejects duplicates and
    /// self-reference. Deeper cycles cannot be constructed because every
    /// parent must already be present under a unique hash.
    fn is_dag(hash: &BlockHash, parents: &[BlockHash]) -> bool {
        for (i, parent) in parents.iter().enumerate() {
            if parent == hash || parents[..i].contains(parent) {
                return false;
            }
        }
        true
    }

    pub fn has_block(&self, hash: &BlockHash) -> bool {
        self.store.has_block(hash)
    }

    pub fn has_blocks(&self, hashes: &[BlockHash]) -> bool {
        self.store.has_blocks(hashes)
    }

    pub fn block(&self, hash: &BlockHash) -> Option<&Block> {
        self.store.block(hash)
    }

    pub fn block_total(&self) -> u64 {
        self.store.block_total()
    }

    pub fn genesis_hash(&self) -> &BlockHash {
        self.store.genesis_hash()
    }

    pub fn genesis(&self) -> Option<&Block> {
        self.store.block(&self.store.genesis)
    }

    pub fn tips(&self) -> &BlockSet {
        self.store.tips()
    }

    /// The algorithm's tip restriction, or every tip when it has none.
    pub fn tips_list(&self) -> Vec<&Block> {
        if let Some(tips) = self.instance.tips_list(&self.store) {
            return tips;
        }
        self.store.tips().iter().map(|h| &self.store.blocks[h]).collect()
    }

    pub fn last_time(&self) -> i64 {
        self.store.last_time()
    }

    /// Hash at the given global order index.
    pub fn block_by_order(&self, order: u32) -> Option<BlockHash> {
        self.instance
            .block_by_order(&self.store, order)
            .or_else(|| self.store.order_hash(order))
    }

    /// The block holding the last position of the global sequence.
    pub fn last_block(&self) -> Option<&Block> {
        if self.store.block_total() == 0 {
            return None;
        }
        let last = (self.store.block_total() - 1) as u32;
        self.block_by_order(last).and_then(|h| self.store.block(&h))
    }

    /// Hash preceding `hash` in the global sequence; None for genesis, an
    /// unknown block, or a block at position 0.
    pub fn previous(&self, hash: &BlockHash) -> Option<BlockHash> {
        if hash == self.store.genesis_hash() {
            return None;
        }
        let block = self.store.block(hash)?;
        let order = block.order().unwrap_or(0);
        if order == 0 {
            return None;
        }
        self.block_by_order(order - 1)
    }

    pub fn layer(&self, hash: &BlockHash) -> Option<u32> {
        self.store.block(hash).map(|b| b.layer())
    }

    pub fn future_set(&self, out: &mut BlockSet, hash: &BlockHash) {
        self.store.future_set(out, hash)
    }

    pub fn anticone(&self, hash: &BlockHash, exclude: Option<&BlockSet>) -> BlockSet {
        self.store.anticone(hash, exclude)
    }

    pub fn is_on_main_chain(&self, hash: &BlockHash) -> bool {
        self.instance.is_on_main_chain(&self.store, hash)
    }

    pub fn main_chain_tip(&self) -> Option<&Block> {
        self.instance.main_chain_tip(&self.store)
    }

    /// Out of a set of candidate parents, the one that would continue the
    /// main chain under the bound algorithm.
    pub fn main_parent(&self, candidates: &BlockSet) -> Option<&Block> {
        self.instance.main_parent(&self.store, candidates)
    }

    /// Current general description of the whole DAG state.
    pub fn graph_state(&self) -> GraphState {
        let mut state = GraphState::default();
        for tip in self.store.tips().iter() {
            state.tips.insert(*tip);
            state.layer = state.layer.max(self.store.blocks[tip].layer());
        }
        state.total = self.store.block_total();
        state.main_height = self.main_chain_tip().map(|b| b.height()).unwrap_or(0);
        state
    }

    /// Blocks a peer with the given state is missing, lowest (order, id)
    /// first, at most `max_hashes` of them. Empty when the peer's view is
    /// strictly ahead of ours.
    ///
    /// Backward BFS from our tips: a node is admitted once all of its
    /// children are admitted and none of them is already a peer tip;
    /// everything at or below a peer tip is already known over there.
    pub fn locate_blocks(&self, peer: &GraphState, max_hashes: usize) -> Vec<BlockHash> {
        if peer.is_excellent(&self.graph_state()) {
            return Vec::new();
        }
        let mut queue: VecDeque<BlockHash> = VecDeque::new();
        let mut found = BlockSet::new();
        for tip in self.store.tips().iter() {
            queue.push_back(*tip);
            found.add(*tip);
        }

        while let Some(current) = queue.pop_front() {
            if peer.tips.contains(&current) {
                continue;
            }
            let block = &self.store.blocks[&current];
            let admissible = block
                .children()
                .iter()
                .all(|child| !peer.tips.contains(child) && found.has(child));
            if admissible {
                found.add(current);
                for parent in block.parents() {
                    if !found.has(parent) {
                        queue.push_back(*parent);
                    }
                }
            }
        }

        let mut result = self.sort_blocks(found.iter().copied().collect());
        result.truncate(max_hashes);
        result
    }

    /// Confirmation count of a block.
    ///
    /// A main chain block counts the distance to the main chain tip; any
    /// other block searches forward for its first main chain descendant and
    /// counts from there plus one. A block with no such descendant reports
    /// zero, itself included.
    pub fn confirmations(&self, hash: &BlockHash) -> u64 {
        let Some(block) = self.store.block(hash) else {
            return 0;
        };
        let Some(main_tip) = self.main_chain_tip() else {
            return 0;
        };
        let main_height = main_tip.height();
        if self.is_on_main_chain(hash) {
            return main_height - block.height();
        }
        if !block.has_children() {
            return 0;
        }

        let mut queue: VecDeque<&Block> = VecDeque::new();
        queue.push_back(block);
        while let Some(current) = queue.pop_front() {
            if self.is_on_main_chain(current.hash()) {
                return 1 + main_height - current.height();
            }
            if !current.has_children() {
                return 0;
            }
            for child in current.children().iter() {
                queue.push_back(&self.store.blocks[child]);
            }
        }
        0
    }

    /// Sort known blocks by (order, id) ascending; unknown hashes are
    /// dropped.
    pub fn sort_blocks(&self, hashes: Vec<BlockHash>) -> Vec<BlockHash> {
        let mut known: Vec<&Block> =
            hashes.iter().filter_map(|h| self.store.block(h)).collect();
        known.sort_by_key(|b| b.sort_key());
        known.iter().map(|b| *b.hash()).collect()
    }

    /// Build the parent merkle store from the current tips, deepest hash
    /// first.
    pub fn merkle_store_from_tips(&self) -> Vec<BlockHash> {
        let parents = self.store.tips().sorted(true);
        merkle::build_parents_merkle_store(&parents)
    }
}

fn unix_now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or_default()
}
