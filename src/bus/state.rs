use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bus::atomic;
use crate::error::{Result, SyncError};
use crate::types::PlaybackStateMessage;

/// File-backed playback state register, rewritten every tick by the main instance.
#[derive(Debug, Clone)]
pub struct StateBus {
    path: PathBuf,
    read_retries: u32,
    retry_delay: Duration,
    /// Consecutive empty or damaged reads of the canonical file.
    failed_reads: u32,
    /// Highest version this reader has handed out.
    highest_seen: u64,
    /// `writeUtc` of the last document handed out.
    last_written_at: f64,
}

impl StateBus {
    pub fn new(path: impl Into<PathBuf>, read_retries: u32, retry_delay: Duration) -> Self {
        Self {
            path: path.into(),
            read_retries,
            retry_delay,
            failed_reads: 0,
            highest_seen: 0,
            last_written_at: f64::NEG_INFINITY,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, msg: &PlaybackStateMessage) -> Result<()> {
        let data = serde_json::to_vec(msg).map_err(|source| SyncError::Malformed {
            path: self.path.clone(),
            source,
        })?;
        atomic::replace_with_backup(&self.path, &data).map_err(|source| SyncError::BusUnavailable {
            path: self.path.clone(),
            source,
        })
    }

    fn parse(path: &Path) -> Result<Option<PlaybackStateMessage>> {
        let bytes = atomic::read_optional(path).map_err(|source| SyncError::BusUnavailable {
            path: path.to_path_buf(),
            source,
        })?;

        match bytes {
            None => Ok(None),
            Some(b) if b.iter().all(|c| c.is_ascii_whitespace()) => Ok(None),
            Some(b) => serde_json::from_slice(&b)
                .map(Some)
                .map_err(|source| SyncError::Malformed {
                    path: path.to_path_buf(),
                    source,
                }),
        }
    }

    /// Read the latest state, or `None` for "no change this tick".
    ///
    /// Never sleeps. An empty or damaged canonical file yields `None` and
    /// arms [`retry_pending`](Self::retry_pending); the caller reads again
    /// after [`retry_delay`](Self::retry_delay). Once `read_retries` re-reads
    /// have failed, the `.bak` copy is consulted instead.
    ///
    /// A document older than one already returned is discarded, so versions
    /// seen through one reader never go backwards. The exception is a lower
    /// version written later than the last one returned: the bus was
    /// recreated and a new sequence started.
    pub fn read(&mut self) -> Option<PlaybackStateMessage> {
        let found = match Self::parse(&self.path) {
            Ok(Some(msg)) => {
                self.failed_reads = 0;
                msg
            }
            // Nobody has published yet: nothing to retry for.
            Ok(None) if !self.path.exists() => {
                self.failed_reads = 0;
                return None;
            }
            other => {
                self.failed_reads += 1;
                match other {
                    Err(e) => log::debug!("State bus read attempt {} failed: {}", self.failed_reads, e),
                    _ => log::trace!("State bus empty on attempt {}", self.failed_reads),
                }
                if self.failed_reads <= self.read_retries {
                    return None;
                }
                self.failed_reads = 0;
                Self::parse(&atomic::backup_path(&self.path)).ok().flatten()?
            }
        };
        self.accept(found)
    }

    fn accept(&mut self, msg: PlaybackStateMessage) -> Option<PlaybackStateMessage> {
        if msg.version < self.highest_seen {
            if msg.written_at_utc <= self.last_written_at {
                log::debug!(
                    "Discarding state v{} older than already seen v{}",
                    msg.version,
                    self.highest_seen
                );
                return None;
            }
            log::info!(
                "State bus restarted at v{} (was v{}), following the new sequence",
                msg.version,
                self.highest_seen
            );
        }
        self.highest_seen = msg.version;
        self.last_written_at = msg.written_at_utc;
        Some(msg)
    }

    /// Whether the last read hit an empty or damaged file and wants a re-read.
    pub fn retry_pending(&self) -> bool {
        self.failed_reads > 0
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Forget the monotonic floor, e.g. after this node stopped publishing.
    pub fn reset_floor(&mut self) {
        self.highest_seen = 0;
        self.last_written_at = f64::NEG_INFINITY;
        self.failed_reads = 0;
    }

    pub fn highest_seen(&self) -> u64 {
        self.highest_seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Instant;

    fn state(version: u64, key: &str) -> PlaybackStateMessage {
        PlaybackStateMessage {
            media_key: key.into(),
            is_playing: !key.is_empty(),
            version,
            written_at_utc: version as f64,
            ..Default::default()
        }
    }

    fn bus(dir: &tempfile::TempDir) -> StateBus {
        StateBus::new(dir.path().join("dance_state.json"), 2, Duration::from_millis(1))
    }

    #[test]
    fn missing_file_is_no_change() {
        let dir = tempfile::tempdir().unwrap();
        let mut reader = bus(&dir);
        assert!(reader.read().is_none());
        assert!(!reader.retry_pending());
    }

    #[test]
    fn damaged_canonical_falls_back_to_backup() {
        let dir = tempfile::tempdir().unwrap();
        let mut reader = bus(&dir);
        let writer = bus(&dir);

        writer.write(&state(1, "SongA")).unwrap();
        writer.write(&state(2, "SongB")).unwrap();
        fs::write(writer.path(), b"{\"key\":\"Son").unwrap();

        // Two re-reads are allowed before the backup is used.
        assert!(reader.read().is_none());
        assert!(reader.retry_pending());
        assert!(reader.read().is_none());

        let msg = reader.read().unwrap();
        assert_eq!(msg.version, 1);
        assert_eq!(msg.media_key, "SongA");
        assert!(!reader.retry_pending());
    }

    #[test]
    fn damaged_read_returns_without_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dance_state.json");
        fs::write(&path, b"").unwrap();

        let mut reader = StateBus::new(&path, 3, Duration::from_secs(5));
        let started = Instant::now();
        for _ in 0..4 {
            assert!(reader.read().is_none());
        }
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn reads_never_go_backwards() {
        let dir = tempfile::tempdir().unwrap();
        let mut reader = bus(&dir);
        let writer = bus(&dir);

        writer.write(&state(1, "SongA")).unwrap();
        writer.write(&state(2, "SongB")).unwrap();
        assert_eq!(reader.read().unwrap().version, 2);

        // Canonical damaged, backup still holds v1.
        fs::write(writer.path(), b"").unwrap();
        for _ in 0..3 {
            assert!(reader.read().is_none());
        }
        assert_eq!(reader.highest_seen(), 2);
    }

    #[test]
    fn recreated_bus_starts_a_new_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let mut reader = bus(&dir);
        let writer = bus(&dir);

        writer.write(&state(7, "SongA")).unwrap();
        assert_eq!(reader.read().unwrap().version, 7);

        fs::remove_dir_all(dir.path()).unwrap();
        let mut fresh = state(1, "SongC");
        fresh.written_at_utc = 50.0;
        writer.write(&fresh).unwrap();

        let msg = reader.read().unwrap();
        assert_eq!(msg.version, 1);
        assert_eq!(msg.media_key, "SongC");
        assert_eq!(reader.highest_seen(), 1);
    }
}
