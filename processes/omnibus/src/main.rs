//! 'main' for the Braid omnibus process

use anyhow::Result;
use braid_common::messages::Message;
use caryatid_process::Process;
use config::{Config, Environment, File};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber;

// External modules
use braid_module_blockdag::BlockDagModule;

/// Standard main
#[tokio::main]
pub async fn main() -> Result<()> {
    // Initialise tracing
    tracing_subscriber::fmt::init();

    info!("Braid omnibus process");

    // Read the config
    let config = Arc::new(
        Config::builder()
            .add_source(File::with_name("omnibus"))
            .add_source(Environment::with_prefix("BRAID"))
            .build()
            .unwrap(),
    );

    // Create the process
    let mut process = Process::<Message>::create(config).await;

    // Register modules
    BlockDagModule::register(&mut process);

    // Run it
    process.run().await?;

    // Bye!
    info!("Exiting");
    Ok(())
}
