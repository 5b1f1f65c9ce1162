use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the sync core.
///
/// None of these are fatal to the poll loop: the node logs them at the tick
/// boundary and keeps running, possibly unsynchronized.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("bus unavailable at {path:?}: {source}")]
    BusUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed bus document at {path:?}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("lock error at {path:?}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("transport call failed: {0}")]
    Transport(#[from] TransportError),
    #[error("a broadcast is already in flight until {until:.3}")]
    Busy { until: f64 },
    #[error("only the leader instance may start actions")]
    NotLeader,
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

/// Failure reported by the avatar/audio host behind [`crate::transport::DanceTransport`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    /// The host does not implement this call. Callers treat it as a no-op.
    #[error("{0} is not supported by this host")]
    Unsupported(&'static str),
    #[error("media not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Failed(String),
}

impl TransportError {
    pub fn is_unsupported(&self) -> bool {
        matches!(self, TransportError::Unsupported(_))
    }
}
