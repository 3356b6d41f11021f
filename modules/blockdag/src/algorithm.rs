//! Strategy boundary between the DAG framework and the consensus
//! algorithms.
//!
//! The framework owns every block; an algorithm keeps whatever side state
//! its protocol needs (blue sets, mergeset records, subtree weights) in its
//! own tables keyed by hash, and annotates blocks through the store
//! accessors. Exactly one algorithm instance is bound for the lifetime of
//! a [`BlockDag`](crate::dag::BlockDag).

use crate::block::Block;
use crate::block_set::BlockSet;
use crate::conflux::Conflux;
use crate::dag::DagStore;
use crate::dag_error::DagError;
use crate::phantom::Phantom;
use crate::phantom_v2::PhantomV2;
use crate::spectre::Spectre;
use braid_common::BlockHash;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// The decisions the framework delegates to the bound algorithm.
pub trait DagAlgorithm: Send {
    /// Protocol name
    fn name(&self) -> &'static str;

    /// One-time initialisation, invoked before any block is added
    fn init(&mut self, store: &mut DagStore);

    /// Install the variant record for a block the framework just inserted
    fn create_block(&mut self, store: &mut DagStore, hash: &BlockHash);

    /// Absorb a new block: update colouring, weights and the main chain,
    /// and revise the global order. Returns the hashes whose order was
    /// newly assigned or changed, ascending by new order.
    fn add_block(&mut self, store: &mut DagStore, hash: &BlockHash) -> Vec<BlockHash>;

    /// Tip restriction; None requests the framework default (all tips)
    fn tips_list<'a>(&self, store: &'a DagStore) -> Option<Vec<&'a Block>>;

    /// Fast order lookup; None requests the framework's order map
    fn block_by_order(&self, store: &DagStore, order: u32) -> Option<BlockHash>;

    /// Whether the block lies on the main chain
    fn is_on_main_chain(&self, store: &DagStore, hash: &BlockHash) -> bool;

    /// Tip of the main chain
    fn main_chain_tip<'a>(&self, store: &'a DagStore) -> Option<&'a Block>;

    /// Out of a set of candidates, the one that would continue the main
    /// chain
    fn main_parent<'a>(&self, store: &'a DagStore, candidates: &BlockSet) -> Option<&'a Block>;
}

/// Available DAG algorithm types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DagType {
    /// A scalable BlockDAG protocol
    Phantom,

    /// PHANTOM refinement with incremental mergeset colouring
    PhantomV2,

    /// The order of all blocks is solely determined by the tree graph
    Conflux,

    /// Confirming blocks via recursive elections
    Spectre,
}

impl FromStr for DagType {
    type Err = DagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "phantom" => Ok(DagType::Phantom),
            "phantom_v2" => Ok(DagType::PhantomV2),
            "conflux" => Ok(DagType::Conflux),
            "spectre" => Ok(DagType::Spectre),
            _ => Err(DagError::UnknownDagType(s.to_string())),
        }
    }
}

impl Display for DagType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DagType::Phantom => write!(f, "phantom"),
            DagType::PhantomV2 => write!(f, "phantom_v2"),
            DagType::Conflux => write!(f, "conflux"),
            DagType::Spectre => write!(f, "spectre"),
        }
    }
}

/// Create the algorithm instance for a DAG type, with default parameters.
pub fn new_dag_algorithm(dag_type: DagType) -> Box<dyn DagAlgorithm> {
    match dag_type {
        DagType::Phantom => Box::new(Phantom::default()),
        DagType::PhantomV2 => Box::new(PhantomV2::default()),
        DagType::Conflux => Box::new(Conflux::default()),
        DagType::Spectre => Box::new(Spectre::default()),
    }
}

/// Write a freshly computed total order into the store and report which
/// blocks moved, ascending by new position.
pub(crate) fn commit_order(store: &mut DagStore, new_order: &[BlockHash]) -> Vec<BlockHash> {
    let mut changed = Vec::new();
    for (index, hash) in new_order.iter().enumerate() {
        let index = index as u32;
        if store.block(hash).and_then(|b| b.order()) != Some(index) {
            store.set_order(*hash, index);
            changed.push(*hash);
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dag_type_parses_protocol_names() {
        for name in ["phantom", "phantom_v2", "conflux", "spectre"] {
            let dag_type: DagType = name.parse().unwrap();
            assert_eq!(dag_type.to_string(), name);
        }
    }

    #[test]
    fn unknown_dag_type_is_an_error() {
        let err = "ghost".parse::<DagType>().unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn factory_names_match_types() {
        for dag_type in
            [DagType::Phantom, DagType::PhantomV2, DagType::Conflux, DagType::Spectre]
        {
            assert_eq!(new_dag_algorithm(dag_type).name(), dag_type.to_string());
        }
    }
}
