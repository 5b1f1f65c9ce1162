use std::sync::Arc;

use parking_lot::RwLock;

use crate::follower::FollowerPhase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    Follower,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BusHealth {
    Unknown,
    Healthy,
    Unavailable(String),
}

/// Snapshot of a node, refreshed every tick for the host UI.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    pub enabled: bool,
    pub role: Role,
    pub phase: FollowerPhase,
    pub last_applied_version: u64,
    pub last_broadcast_version: u64,
    pub broadcast_enabled: bool,
    pub muted: bool,
    pub frozen: bool,
    pub bus: BusHealth,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            enabled: true,
            role: Role::Follower,
            phase: FollowerPhase::Idle,
            last_applied_version: 0,
            last_broadcast_version: 0,
            broadcast_enabled: true,
            muted: false,
            frozen: false,
            bus: BusHealth::Unknown,
        }
    }
}

pub type SharedStatus = Arc<RwLock<SyncStatus>>;

pub fn create_status() -> SharedStatus {
    Arc::new(RwLock::new(SyncStatus::default()))
}
