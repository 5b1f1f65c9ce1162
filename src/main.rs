mod console;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use dance_sync::simulated::SimulatedTransport;
use dance_sync::{Control, InstanceIdentity, LeaderElection, SharedClock, SyncConfig, SyncNode, SystemClock};

const DEFAULT_CATALOG: &[&str] = &["SongA", "SongB", "SongC"];

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .init();

    let identity = InstanceIdentity::from_env();
    log::info!("Starting dance sync instance {}", identity.index);

    let config = SyncConfig::from_env();

    // Missing bus directory only means running unsynchronized
    if let Err(e) = std::fs::create_dir_all(config.bus_dir()) {
        log::error!("Cannot create bus directory {:?}: {}", config.bus_dir(), e);
    }

    let catalog: Vec<String> = match std::env::var("DANCE_SYNC_CATALOG") {
        Ok(list) => list
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => DEFAULT_CATALOG.iter().map(|s| s.to_string()).collect(),
    };
    log::info!("Simulated player catalog: {:?}", catalog);

    let clock: SharedClock = Arc::new(SystemClock);
    let election = LeaderElection::new(&config.bus_dir(), &config.app_id, identity);
    let transport = SimulatedTransport::new(clock.clone(), catalog);
    let node = SyncNode::new(config, election, transport, clock);

    let (tx, rx) = mpsc::unbounded_channel();
    console::spawn(tx.clone(), node.status());

    // Ctrl+C stops the poll loop, which releases the hold and the leader lock
    ctrlc::set_handler(move || {
        log::info!("Received interrupt signal (Ctrl+C), stopping sync...");
        if tx.send(Control::Shutdown).is_err() {
            std::process::exit(0);
        }
    })
    .context("Failed to set Ctrl+C handler")?;

    let node = node.run(rx).await;
    log::info!("Stopped; final status: {:?}", *node.status().read());
    Ok(())
}
