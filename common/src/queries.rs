//! State query definitions, per queryable module

pub mod dag {
    use crate::types::{BlockHash, GraphState};

    pub const DEFAULT_DAG_QUERY_TOPIC: (&str, &str) = ("dag-query-topic", "braid.query.dag");

    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub enum DagStateQuery {
        /// Summary of the local DAG for peer exchange
        GetGraphState,

        /// Blocks a peer with the given state is missing, lowest order
        /// first, at most `max_hashes` of them
        LocateBlocks {
            state: GraphState,
            max_hashes: u32,
        },

        /// Confirmation count of a block
        GetConfirmations {
            hash: BlockHash,
        },

        /// Position of a block in the global sequence
        GetBlockOrder {
            hash: BlockHash,
        },
    }

    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub enum DagStateQueryResponse {
        GraphState(GraphState),
        Blocks(Vec<BlockHash>),
        Confirmations(u64),
        BlockOrder(u32),
        NotFound,
        Error(String),
    }
}
