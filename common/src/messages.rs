//! Definition of Braid messages

use crate::queries::dag::{DagStateQuery, DagStateQueryResponse};
use crate::types::{BlockData, BlockHash};

/// New block announcement message
///
/// Carries everything the DAG core needs to insert the block; body bytes
/// travel separately and are not a concern of the core.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BlockAvailableMessage {
    /// Block hash
    pub hash: BlockHash,

    /// Declared parent hashes, main parent first
    pub parents: Vec<BlockHash>,

    /// Unix timestamp (seconds)
    pub timestamp: i64,
}

impl BlockData for BlockAvailableMessage {
    fn hash(&self) -> BlockHash {
        self.hash
    }

    fn parents(&self) -> Vec<BlockHash> {
        self.parents.clone()
    }

    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

/// One entry of an ordered-blocks publication
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OrderedBlockEntry {
    /// Block hash
    pub hash: BlockHash,

    /// Newly assigned or revised position in the global sequence
    pub order: u32,
}

/// Message announcing blocks whose global order was assigned or revised,
/// in announcement order
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BlocksOrderedMessage {
    /// Ordered set of entries
    pub blocks: Vec<OrderedBlockEntry>,
}

/// DAG message enum
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum DagMessage {
    BlockAvailable(BlockAvailableMessage), // Block offered for insertion
    BlocksOrdered(BlocksOrderedMessage),   // Linearisation changed
}

/// State query enum, one variant per queryable module
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum StateQuery {
    Dag(DagStateQuery),
}

/// State query response enum
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum StateQueryResponse {
    Dag(DagStateQueryResponse),
}

// === Global message enum ===
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum Message {
    None(()), // Just so we have a simple default

    // Generic messages, get of jail free cards
    String(String),          // Simple string
    JSON(serde_json::Value), // JSON object

    // DAG messages
    Dag(DagMessage),

    // State queries
    StateQuery(StateQuery),
    StateQueryResponse(StateQueryResponse),
}

impl Default for Message {
    fn default() -> Self {
        Self::None(())
    }
}
