//! Cross-instance dance playback synchronizer.
//!
//! Several copies of the desktop mate run side by side. One of them wins the
//! leader lock and writes a small JSON bus file; the others poll it and
//! mirror play/stop/next/prev at the same scheduled wall-clock instant.

pub mod bus;
pub mod change;
pub mod clock;
pub mod config;
pub mod election;
pub mod error;
pub mod follower;
pub mod hold;
pub mod identity;
pub mod leader;
pub mod node;
pub mod scheduler;
pub mod simulated;
pub mod state;
pub mod transport;
pub mod types;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{SyncConfig, SyncMode};
pub use election::{BroadcastGate, LeaderElection};
pub use error::{Result, SyncError, TransportError};
pub use follower::FollowerPhase;
pub use identity::InstanceIdentity;
pub use leader::BroadcastOutcome;
pub use node::{Control, SyncNode};
pub use state::{Role, SharedStatus, SyncStatus};
pub use transport::{AudioLevels, DanceTransport};
pub use types::{CommandKind, CommandMessage, Intent, PlaybackStateMessage};
