use serde::{Deserialize, Serialize};

/// Transport command carried on the command bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    #[serde(rename = "play")]
    PlayCurrentOrFirst,
    #[serde(rename = "play_id")]
    PlayByKey,
    Stop,
    Next,
    Prev,
}

impl CommandKind {
    pub fn is_stop(self) -> bool {
        self == CommandKind::Stop
    }
}

/// What a user asked the leader to do.
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub kind: CommandKind,
    pub key: Option<String>,
    pub index: Option<u32>,
    pub title: Option<String>,
}

impl Intent {
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            key: None,
            index: None,
            title: None,
        }
    }

    pub fn play_by_key(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            ..Self::new(CommandKind::PlayByKey)
        }
    }

    pub fn play() -> Self {
        Self::new(CommandKind::PlayCurrentOrFirst)
    }

    pub fn stop() -> Self {
        Self::new(CommandKind::Stop)
    }

    pub fn next() -> Self {
        Self::new(CommandKind::Next)
    }

    pub fn prev() -> Self {
        Self::new(CommandKind::Prev)
    }
}

/// The single-slot command bus document.
///
/// Wire shape: `{version, cmd, sid, title, index, atUtc, writeUtc}` with
/// `index == -1` meaning "no ordinal".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandMessage {
    pub version: u64,
    #[serde(rename = "cmd")]
    pub command: CommandKind,
    #[serde(rename = "sid", default)]
    pub target_key: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "index", with = "index_sentinel", default)]
    pub target_index: Option<u32>,
    #[serde(rename = "atUtc")]
    pub scheduled_at_utc: f64,
    #[serde(rename = "writeUtc")]
    pub written_at_utc: f64,
}

impl CommandMessage {
    /// Build the next bus message for `intent`.
    ///
    /// Stop executes immediately; everything else is deferred by `lead` seconds.
    pub fn from_intent(version: u64, intent: &Intent, now: f64, lead: f64) -> Self {
        let scheduled_at_utc = if intent.kind.is_stop() {
            now
        } else {
            now + lead.max(0.0)
        };
        Self {
            version,
            command: intent.kind,
            target_key: intent.key.clone(),
            title: intent.title.clone(),
            target_index: intent.index,
            scheduled_at_utc,
            written_at_utc: now,
        }
    }

    /// Whether the timestamps are finite and the deadline is at most
    /// `horizon` seconds after the write.
    pub fn schedules_within(&self, horizon: f64) -> bool {
        self.written_at_utc.is_finite()
            && self.scheduled_at_utc.is_finite()
            && self.scheduled_at_utc - self.written_at_utc <= horizon
    }

    pub fn intent(&self) -> Intent {
        Intent {
            kind: self.command,
            key: self.target_key.clone(),
            index: self.target_index,
            title: self.title.clone(),
        }
    }
}

mod index_sentinel {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<u32>, ser: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(index) => ser.serialize_i64(i64::from(*index)),
            None => ser.serialize_i64(-1),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Option<u32>, D::Error> {
        let raw = Option::<i64>::deserialize(de)?;
        Ok(raw.and_then(|v| u32::try_from(v).ok()))
    }
}

/// The state bus document, rewritten by the main instance every tick.
///
/// Wire shape: `{key, time, playing, version, writeUtc, hasStart, startUtc, ev}`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlaybackStateMessage {
    /// Empty when nothing is playing.
    #[serde(rename = "key", default)]
    pub media_key: String,
    #[serde(rename = "time", default)]
    pub position_seconds: f64,
    #[serde(rename = "playing", default)]
    pub is_playing: bool,
    #[serde(default)]
    pub version: u64,
    #[serde(rename = "writeUtc", default)]
    pub written_at_utc: f64,
    #[serde(rename = "hasStart", default)]
    pub has_scheduled_start: bool,
    #[serde(rename = "startUtc", default)]
    pub scheduled_start_utc: f64,
    #[serde(rename = "ev", default)]
    pub event_id: u64,
}

impl PlaybackStateMessage {
    /// Whether the timestamps are finite and any scheduled start is at most
    /// `horizon` seconds after the write.
    pub fn schedules_within(&self, horizon: f64) -> bool {
        if !self.written_at_utc.is_finite() || !self.position_seconds.is_finite() {
            return false;
        }
        !self.has_scheduled_start
            || (self.scheduled_start_utc.is_finite()
                && self.scheduled_start_utc - self.written_at_utc <= horizon)
    }

    /// Leader position extrapolated to `now`, compensating for polling latency.
    pub fn predicted_position(&self, now: f64) -> f64 {
        if !self.is_playing {
            return self.position_seconds;
        }
        // Nothing audible before the scheduled start.
        let since = if self.has_scheduled_start && self.scheduled_start_utc > self.written_at_utc {
            now - self.scheduled_start_utc
        } else {
            self.position_seconds + (now - self.written_at_utc)
        };
        since.max(0.0)
    }
}
