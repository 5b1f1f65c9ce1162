#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dance_sync::simulated::SimulatedTransport;
use dance_sync::{
    InstanceIdentity, LeaderElection, ManualClock, SharedClock, SyncConfig, SyncMode, SyncNode,
};

pub const T0: f64 = 1_000.0;
pub const POLL: f64 = 0.1;
pub const CATALOG: [&str; 3] = ["SongA", "SongB", "SongC"];

pub fn config(root: &Path, mode: SyncMode) -> SyncConfig {
    let mut config = SyncConfig::with_root(root);
    config.mode = mode;
    config.poll_interval = Duration::from_millis(100);
    config.lead_time = Duration::from_millis(1000);
    config.read_retry_delay = Duration::from_millis(1);
    config
}

pub fn node_with(config: SyncConfig, index: u32, leader: bool, clock: &Arc<ManualClock>) -> SyncNode<SimulatedTransport> {
    let clock: SharedClock = clock.clone();
    let transport = SimulatedTransport::new(clock.clone(), CATALOG);
    let election = LeaderElection::fixed(InstanceIdentity::new(index), leader);
    SyncNode::new(config, election, transport, clock)
}

pub fn leader(root: &Path, mode: SyncMode, clock: &Arc<ManualClock>) -> SyncNode<SimulatedTransport> {
    node_with(config(root, mode), 0, true, clock)
}

pub fn follower(root: &Path, mode: SyncMode, clock: &Arc<ManualClock>) -> SyncNode<SimulatedTransport> {
    node_with(config(root, mode), 1, false, clock)
}

/// Set the clock to `T0 + steps * POLL` and tick every node in order.
pub fn tick_at(clock: &ManualClock, steps: u32, nodes: &mut [&mut SyncNode<SimulatedTransport>]) {
    clock.set(T0 + f64::from(steps) * POLL);
    for node in nodes.iter_mut() {
        node.tick();
    }
}
