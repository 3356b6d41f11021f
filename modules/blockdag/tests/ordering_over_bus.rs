//! Integration test: feed blocks to the BlockDAG module over the Caryatid
//! bus and watch the ordered publications come back.
#![cfg(test)]
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::Result;
use caryatid_sdk::{module, Context};
use config::{Config, Environment, File};
use tokio::{sync::watch, time::timeout};
use tracing::info;

use braid_common::messages::{BlockAvailableMessage, DagMessage, Message};
use braid_common::BlockHash;
use braid_module_blockdag::BlockDagModule;
use caryatid_process::Process;

// --------- shared test completion signaling ---------
static TEST_COMPLETION_TX: Mutex<Option<watch::Sender<bool>>> = Mutex::new(None);
pub fn signal_test_completion() {
    if let Ok(tx) = TEST_COMPLETION_TX.lock() {
        if let Some(sender) = tx.as_ref() {
            let _ = sender.send(true);
        }
    }
}

fn hash(n: u8) -> BlockHash {
    let mut bytes = [0u8; 32];
    bytes[0] = n;
    BlockHash::from(bytes)
}

fn block(n: u8, parents: &[u8]) -> BlockAvailableMessage {
    BlockAvailableMessage {
        hash: hash(n),
        parents: parents.iter().map(|p| hash(*p)).collect(),
        timestamp: 1_700_000_000 + n as i64,
    }
}

/// Driver module: publishes a small diamond and waits for the ordered
/// publications to cover it.
#[module(
    message_type(Message),
    name = "dag-driver",
    description = "BlockDAG test driver"
)]
struct DagDriver;

impl DagDriver {
    async fn init(&self, context: Arc<Context<Message>>, config: Arc<Config>) -> Result<()> {
        let blocks_topic =
            config.get_string("blocks-topic").unwrap_or("braid.block.available".to_string());
        let ordered_topic =
            config.get_string("ordered-topic").unwrap_or("braid.block.ordered".to_string());

        // Subscribe for the orderings *before* publishing to avoid races.
        let mut ordered_sub = context.subscribe(&ordered_topic).await?;

        info!("Driving blocks on '{}'", blocks_topic);

        let message_bus = context.message_bus.clone();
        context.run(async move {
            let fixture =
                [block(1, &[]), block(2, &[1]), block(3, &[1]), block(4, &[2, 3])];
            for b in fixture {
                message_bus
                    .publish(
                        &blocks_topic,
                        Arc::new(Message::Dag(DagMessage::BlockAvailable(b))),
                    )
                    .await
                    .expect("Failed to publish block");
            }

            // One ordered publication per accepted block; the last one
            // must place the merge block.
            let mut publications = 0;
            while let Ok((_, message)) = ordered_sub.read().await {
                if let Message::Dag(DagMessage::BlocksOrdered(ordered)) = message.as_ref() {
                    publications += 1;
                    if publications == 4 {
                        assert!(ordered.blocks.iter().any(|e| e.hash == hash(4)));
                        assert!(ordered.blocks.iter().all(|e| e.order < 4));
                        signal_test_completion();
                        break;
                    }
                }
            }
        });
        Ok(())
    }
}

// -------------- the test --------------
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn diamond_is_ordered_over_the_bus() -> Result<()> {
    // Read the config
    let config = Arc::new(
        Config::builder()
            .add_source(File::with_name("test"))
            .add_source(Environment::with_prefix("BRAID"))
            .build()
            .unwrap(),
    );

    let (completion_tx, mut completion_rx) = watch::channel(false);

    {
        let mut tx = TEST_COMPLETION_TX.lock().unwrap();
        *tx = Some(completion_tx);
    }

    // Create the process
    let mut process = Process::<Message>::create(config).await;

    // Register modules
    BlockDagModule::register(&mut process);
    DagDriver::register(&mut process);

    // Run the process until the driver signals completion, with a timeout
    // to avoid hanging the test indefinitely
    match timeout(Duration::from_secs(5), async {
        tokio::select! {
            result = process.run() => {
                result
            }
            _ = completion_rx.changed() => {
                Ok(())
            }
        }
    })
    .await
    {
        Ok(result) => result?,
        Err(_) => {
            panic!("Test timed out after 5 seconds");
        }
    }
    Ok(())
}
