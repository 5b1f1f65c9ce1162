use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Which bus the instances coordinate over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Leader writes one command per user action.
    Command,
    /// Leader rewrites its full playback state every tick.
    State,
}

impl FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "command" | "cmd" => Ok(SyncMode::Command),
            "state" => Ok(SyncMode::State),
            other => Err(format!("unknown sync mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Per-user durable data root shared by every instance.
    pub data_root: PathBuf,
    pub bus_subdir: String,
    pub command_file: String,
    pub state_file: String,
    /// Application identity; names the leader lock.
    pub app_id: String,
    pub mode: SyncMode,
    pub poll_interval: Duration,
    /// Delay between a broadcast and its synchronized execution.
    pub lead_time: Duration,
    /// Followers only seek when further than this from the leader.
    pub drift_threshold: Duration,
    /// Keep follower audio silent while mirroring the leader.
    pub mute_followers: bool,
    /// Re-reads of an empty or damaged state bus before `.bak` is used.
    pub read_retries: u32,
    /// Wait before each re-read; the poll loop keeps running meanwhile.
    pub read_retry_delay: Duration,
    /// Failed applications of one bus event before it is abandoned.
    pub max_apply_attempts: u32,
    /// Followers retry the leader lock every N ticks; 0 disables takeover.
    pub reelect_every: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let data_root = dirs::data_local_dir()
            .map(|d| d.join("mate"))
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            data_root,
            bus_subdir: "Sync".to_string(),
            command_file: "dance_command.json".to_string(),
            state_file: "dance_state.json".to_string(),
            app_id: "mate-dance-sync".to_string(),
            mode: SyncMode::Command,
            poll_interval: Duration::from_millis(100),
            lead_time: Duration::from_millis(1000),
            drift_threshold: Duration::from_millis(150),
            mute_followers: false,
            read_retries: 3,
            read_retry_delay: Duration::from_millis(10),
            max_apply_attempts: 3,
            reelect_every: 20,
        }
    }
}

impl SyncConfig {
    /// Defaults rooted at `data_root` instead of the user data directory.
    pub fn with_root(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            ..Self::default()
        }
    }

    /// Defaults overridden by `DANCE_SYNC_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().apply_env(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`; bad values are logged and skipped.
    pub fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(root) = lookup("DANCE_SYNC_DATA_ROOT") {
            log::info!("Using sync data root: {}", root);
            self.data_root = PathBuf::from(root);
        }
        if let Some(id) = lookup("DANCE_SYNC_APP_ID") {
            self.app_id = id;
        }
        if let Some(mode) = parse_var(&lookup, "DANCE_SYNC_MODE") {
            self.mode = mode;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "DANCE_SYNC_POLL_MS") {
            self.poll_interval = Duration::from_millis(ms.max(1));
        }
        if let Some(ms) = parse_var(&lookup, "DANCE_SYNC_LEAD_MS") {
            self.lead_time = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, "DANCE_SYNC_DRIFT_MS") {
            self.drift_threshold = Duration::from_millis(ms);
        }
        if let Some(mute) = parse_var(&lookup, "DANCE_SYNC_MUTE_FOLLOWERS") {
            self.mute_followers = mute;
        }
        if let Some(ticks) = parse_var(&lookup, "DANCE_SYNC_REELECT_TICKS") {
            self.reelect_every = ticks;
        }
        self
    }

    /// Furthest a bus deadline may lie beyond its write time, in seconds.
    /// Anything later is treated as a damaged document.
    pub fn schedule_horizon(&self) -> f64 {
        (self.lead_time.as_secs_f64() * 10.0).max(1.0)
    }

    pub fn bus_dir(&self) -> PathBuf {
        self.data_root.join(&self.bus_subdir)
    }

    pub fn command_path(&self) -> PathBuf {
        self.bus_dir().join(&self.command_file)
    }

    pub fn state_path(&self) -> PathBuf {
        self.bus_dir().join(&self.state_file)
    }

    /// Path of whichever bus `mode` uses.
    pub fn bus_path(&self) -> PathBuf {
        match self.mode {
            SyncMode::Command => self.command_path(),
            SyncMode::State => self.state_path(),
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(e) => {
            log::warn!("Ignoring {}={:?}: {}", key, raw, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn env_overrides_defaults() {
        let cfg = SyncConfig::with_root("/tmp/mate").apply_env(env(&[
            ("DANCE_SYNC_MODE", "state"),
            ("DANCE_SYNC_LEAD_MS", "750"),
            ("DANCE_SYNC_MUTE_FOLLOWERS", "true"),
        ]));
        assert_eq!(cfg.mode, SyncMode::State);
        assert_eq!(cfg.lead_time, Duration::from_millis(750));
        assert!(cfg.mute_followers);
        assert_eq!(cfg.state_path(), PathBuf::from("/tmp/mate/Sync/dance_state.json"));
    }

    #[test]
    fn invalid_values_keep_defaults() {
        let cfg = SyncConfig::with_root("/tmp/mate").apply_env(env(&[
            ("DANCE_SYNC_POLL_MS", "fast"),
            ("DANCE_SYNC_MODE", "carrier-pigeon"),
        ]));
        assert_eq!(cfg.poll_interval, Duration::from_millis(100));
        assert_eq!(cfg.mode, SyncMode::Command);
    }
}
