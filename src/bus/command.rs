use std::path::{Path, PathBuf};

use crate::bus::atomic;
use crate::error::{Result, SyncError};
use crate::types::CommandMessage;

const WRITE_ATTEMPTS: u32 = 3;

/// File-backed single-slot command mailbox.
#[derive(Debug, Clone)]
pub struct CommandBus {
    path: PathBuf,
}

impl CommandBus {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current message, distinguishing "nothing there" from failures.
    ///
    /// A missing or empty file is `Ok(None)`: nobody has broadcast yet, or a
    /// write is in progress.
    pub fn try_read(&self) -> Result<Option<CommandMessage>> {
        let bytes = atomic::read_optional(&self.path).map_err(|source| SyncError::BusUnavailable {
            path: self.path.clone(),
            source,
        })?;

        match bytes {
            None => Ok(None),
            Some(b) if b.iter().all(|c| c.is_ascii_whitespace()) => Ok(None),
            Some(b) => serde_json::from_slice(&b)
                .map(Some)
                .map_err(|source| SyncError::Malformed {
                    path: self.path.clone(),
                    source,
                }),
        }
    }

    /// Read the current message; every failure reads as "no new command".
    pub fn read(&self) -> Option<CommandMessage> {
        match self.try_read() {
            Ok(msg) => msg,
            Err(e) => {
                log::debug!("Command bus read skipped: {}", e);
                None
            }
        }
    }

    /// Version the next broadcast must carry.
    ///
    /// Derived from the bus itself so a restarted leader continues the
    /// sequence; `floor` is the highest version this writer already wrote and
    /// covers a bus that became unreadable under us.
    pub fn next_version(&self, floor: u64) -> u64 {
        let on_bus = self.read().map(|m| m.version).unwrap_or(0);
        on_bus.max(floor) + 1
    }

    /// Atomically replace the bus content with `msg`.
    pub fn write(&self, msg: &CommandMessage) -> Result<()> {
        let data = serde_json::to_vec(msg).map_err(|source| SyncError::Malformed {
            path: self.path.clone(),
            source,
        })?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match atomic::replace(&self.path, &data) {
                Ok(()) => {
                    log::debug!("Command bus v{} written ({:?})", msg.version, msg.command);
                    return Ok(());
                }
                // Retried at once, without sleeping on the poll thread.
                Err(e) if attempt < WRITE_ATTEMPTS => {
                    log::debug!("Command bus write attempt {} failed: {}", attempt, e);
                }
                Err(source) => {
                    return Err(SyncError::BusUnavailable {
                        path: self.path.clone(),
                        source,
                    })
                }
            }
        }
    }
}
