//! Braid BlockDAG module for Caryatid
//! Maintains the block DAG, its linearisation and peer sync queries

pub mod algorithm;
pub mod block;
pub mod block_set;
pub mod conflux;
pub mod dag;
pub mod dag_error;
pub mod merkle;
pub mod phantom;
pub mod phantom_v2;
pub mod spectre;

use crate::algorithm::DagType;
use crate::dag::BlockDag;
use crate::phantom::Phantom;
use crate::phantom_v2::PhantomV2;
use anyhow::Result;
use braid_common::messages::{
    BlocksOrderedMessage, DagMessage, Message, OrderedBlockEntry, StateQuery, StateQueryResponse,
};
use braid_common::queries::dag::{DagStateQuery, DagStateQueryResponse, DEFAULT_DAG_QUERY_TOPIC};
use caryatid_sdk::{module, Context};
use config::Config;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, info_span, warn, Instrument};

const DEFAULT_SUBSCRIBE_TOPIC: &str = "braid.block.available";
const DEFAULT_PUBLISH_TOPIC: &str = "braid.block.ordered";
const DEFAULT_DAG_TYPE: &str = "phantom";

/// BlockDAG module
/// Parameterised by the outer message enum used on the bus
#[module(
    message_type(Message),
    name = "blockdag",
    description = "Block DAG state and ordering"
)]
pub struct BlockDagModule;

impl BlockDagModule {
    /// Main init function
    pub async fn init(&self, context: Arc<Context<Message>>, config: Arc<Config>) -> Result<()> {
        // Get configuration
        let subscribe_topic =
            config.get_string("subscribe-topic").unwrap_or(DEFAULT_SUBSCRIBE_TOPIC.to_string());
        info!("Creating block subscriber on '{subscribe_topic}'");

        let publish_topic =
            config.get_string("publish-topic").unwrap_or(DEFAULT_PUBLISH_TOPIC.to_string());
        info!("Publishing ordered blocks on '{publish_topic}'");

        let query_topic = config
            .get_string(DEFAULT_DAG_QUERY_TOPIC.0)
            .unwrap_or(DEFAULT_DAG_QUERY_TOPIC.1.to_string());

        let dag_type: DagType =
            config.get_string("dag-type").unwrap_or(DEFAULT_DAG_TYPE.to_string()).parse()?;
        info!("DAG algorithm: {dag_type}");

        let dag = match dag_type {
            DagType::Phantom => {
                let k = blue_anticone_limit(&config);
                BlockDag::with_instance(Box::new(Phantom::new(k)))
            }
            DagType::PhantomV2 => {
                let k = blue_anticone_limit(&config);
                BlockDag::with_instance(Box::new(PhantomV2::new(k)))
            }
            _ => BlockDag::new(dag_type),
        };
        let dag = Arc::new(Mutex::new(dag));

        // Handle state queries
        let query_dag = dag.clone();
        context.handle(&query_topic, move |request| {
            let query_dag = query_dag.clone();
            async move {
                let Message::StateQuery(StateQuery::Dag(query)) = request.as_ref() else {
                    return Arc::new(Message::StateQueryResponse(StateQueryResponse::Dag(
                        DagStateQueryResponse::Error("Invalid message for dag-state".into()),
                    )));
                };
                let dag = query_dag.lock().await;
                let response = match query {
                    DagStateQuery::GetGraphState => {
                        DagStateQueryResponse::GraphState(dag.graph_state())
                    }
                    DagStateQuery::LocateBlocks { state, max_hashes } => {
                        DagStateQueryResponse::Blocks(
                            dag.locate_blocks(state, *max_hashes as usize),
                        )
                    }
                    DagStateQuery::GetConfirmations { hash } => {
                        if dag.has_block(hash) {
                            DagStateQueryResponse::Confirmations(dag.confirmations(hash))
                        } else {
                            DagStateQueryResponse::NotFound
                        }
                    }
                    DagStateQuery::GetBlockOrder { hash } => {
                        match dag.block(hash).and_then(|b| b.order()) {
                            Some(order) => DagStateQueryResponse::BlockOrder(order),
                            None => DagStateQueryResponse::NotFound,
                        }
                    }
                };
                Arc::new(Message::StateQueryResponse(StateQueryResponse::Dag(response)))
            }
        });

        // Subscribe for incoming blocks
        let mut subscription = context.subscribe(&subscribe_topic).await?;
        context.clone().run(async move {
            loop {
                let Ok((_, message)) = subscription.read().await else {
                    error!("Block message read failed");
                    return;
                };
                match message.as_ref() {
                    Message::Dag(DagMessage::BlockAvailable(block)) => {
                        let span = info_span!("blockdag", block = %block.hash);
                        async {
                            let mut dag = dag.lock().await;
                            match dag.add_block(block) {
                                Some(ordered) => {
                                    let blocks: Vec<OrderedBlockEntry> = ordered
                                        .iter()
                                        .filter_map(|h| {
                                            dag.block(h).and_then(|b| b.order()).map(|order| {
                                                OrderedBlockEntry { hash: *h, order }
                                            })
                                        })
                                        .collect();
                                    let message = Arc::new(Message::Dag(
                                        DagMessage::BlocksOrdered(BlocksOrderedMessage {
                                            blocks,
                                        }),
                                    ));
                                    context
                                        .message_bus
                                        .publish(&publish_topic, message)
                                        .await
                                        .unwrap_or_else(|e| error!("Failed to publish: {e}"));
                                }
                                // Structural rejection: upstream validation
                                // decides whether this was an error
                                None => warn!(block = %block.hash, "block rejected"),
                            }
                        }
                        .instrument(span)
                        .await;
                    }

                    _ => error!("Unexpected message type: {message:?}"),
                }
            }
        });

        Ok(())
    }
}

fn blue_anticone_limit(config: &Config) -> u32 {
    config.get_int("phantom-k").unwrap_or(phantom::DEFAULT_BLUE_ANTICONE_LIMIT as i64) as u32
}
