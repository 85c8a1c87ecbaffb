//! Runs a single cloudnet node until interrupted.
//!
//! Usage: `cloudnet-node [config.json]`

use anyhow::Context;
use cloudnet::NodeContext;
use cloudnet::config::NodeConfig;

fn main() -> anyhow::Result<()> {
    cloudnet::logging::init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "config.json".to_string());
    let mut config = NodeConfig::load(&path).with_context(|| format!("loading {}", path))?;
    config.apply_env()?;

    let node = NodeContext::builder(config).build()?;
    tracing::info!(
        node = %node.node_id(),
        groups = node.groups().all().len(),
        tasks = node.tasks().all().len(),
        "node started"
    );

    node.io()
        .handle()
        .block_on(tokio::signal::ctrl_c())
        .context("waiting for ctrl-c")?;

    node.shutdown();
    Ok(())
}
