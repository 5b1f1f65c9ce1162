//! What changed on the bus since a follower last applied it.

use crate::types::{CommandMessage, PlaybackStateMessage};

/// Per-follower record of the last applied bus content. Not persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciliationCursor {
    pub last_applied_version: u64,
    pub last_key: String,
    pub last_playing: bool,
    pub scheduled_event_applied: u64,
    /// `writeUtc` of the last applied command.
    pub last_written_at: f64,
}

impl ReconciliationCursor {
    /// Whether `msg` is a command this follower has not applied yet.
    ///
    /// A lower version written later than the last applied one means the bus
    /// was recreated and a new sequence started.
    pub fn is_new_command(&self, msg: &CommandMessage) -> bool {
        msg.version > self.last_applied_version || msg.written_at_utc > self.last_written_at
    }

    pub fn record_command(&mut self, msg: &CommandMessage) {
        self.last_applied_version = msg.version;
        self.last_written_at = msg.written_at_utc;
    }

    /// Whether `msg` belongs to an older position in the sequence than what was
    /// applied. State reads never go backwards, so this means a new sequence.
    pub fn is_behind(&self, msg: &PlaybackStateMessage) -> bool {
        msg.version < self.last_applied_version || msg.event_id < self.scheduled_event_applied
    }

    /// Forget applied versions and events; key and playing flag are kept so a
    /// stop on the new sequence is still noticed.
    pub fn restart_sequence(&mut self) {
        self.last_applied_version = 0;
        self.scheduled_event_applied = 0;
    }

    pub fn record_state(&mut self, msg: &PlaybackStateMessage) {
        self.last_applied_version = self.last_applied_version.max(msg.version);
        self.last_key = msg.media_key.clone();
        self.last_playing = msg.is_playing;
        if msg.has_scheduled_start {
            self.scheduled_event_applied = self.scheduled_event_applied.max(msg.event_id);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    None,
    NewScheduledStart,
    MediaChanged,
    PlayingStopped,
}

/// Classify `new` against what `cursor` last applied.
///
/// Only `(version, media_key, is_playing)` and the scheduled-start event
/// count; position and timestamps move every tick and are not events.
pub fn detect(cursor: &ReconciliationCursor, new: &PlaybackStateMessage) -> ChangeKind {
    if !new.is_playing {
        return if cursor.last_playing {
            ChangeKind::PlayingStopped
        } else {
            ChangeKind::None
        };
    }

    if new.media_key.is_empty() {
        return ChangeKind::None;
    }

    if new.has_scheduled_start && new.event_id > cursor.scheduled_event_applied {
        return ChangeKind::NewScheduledStart;
    }

    if new.media_key != cursor.last_key || !cursor.last_playing {
        return ChangeKind::MediaChanged;
    }

    ChangeKind::None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playing(key: &str, version: u64) -> PlaybackStateMessage {
        PlaybackStateMessage {
            media_key: key.into(),
            is_playing: true,
            version,
            ..Default::default()
        }
    }

    fn applied(msg: &PlaybackStateMessage) -> ReconciliationCursor {
        let mut c = ReconciliationCursor::default();
        c.record_state(msg);
        c
    }

    #[test]
    fn steady_state_ticks_are_not_events() {
        let first = playing("SongA", 3);
        let cursor = applied(&first);

        let mut later = first.clone();
        later.position_seconds = 12.5;
        later.written_at_utc = 999.0;
        assert_eq!(detect(&cursor, &later), ChangeKind::None);
    }

    #[test]
    fn scheduled_start_fires_once_per_event() {
        let mut msg = playing("SongA", 4);
        msg.has_scheduled_start = true;
        msg.event_id = 4;
        assert_eq!(detect(&ReconciliationCursor::default(), &msg), ChangeKind::NewScheduledStart);
        assert_eq!(detect(&applied(&msg), &msg), ChangeKind::None);
    }

    #[test]
    fn restarted_sequence_starts_over() {
        let mut old = playing("SongA", 6);
        old.has_scheduled_start = true;
        old.event_id = 6;
        let mut cursor = applied(&old);

        let mut fresh = playing("SongC", 1);
        fresh.has_scheduled_start = true;
        fresh.event_id = 1;
        assert!(cursor.is_behind(&fresh));

        cursor.restart_sequence();
        assert!(!cursor.is_behind(&fresh));
        assert_eq!(detect(&cursor, &fresh), ChangeKind::NewScheduledStart);
    }

    #[test]
    fn key_change_without_stop_is_new_media() {
        let cursor = applied(&playing("SongA", 1));
        assert_eq!(detect(&cursor, &playing("SongB", 2)), ChangeKind::MediaChanged);
    }

    #[test]
    fn stop_only_matters_after_playing() {
        let idle = PlaybackStateMessage::default();
        assert_eq!(detect(&ReconciliationCursor::default(), &idle), ChangeKind::None);

        let cursor = applied(&playing("SongA", 1));
        assert_eq!(detect(&cursor, &idle), ChangeKind::PlayingStopped);
    }

    #[test]
    fn playing_without_key_is_ignored() {
        assert_eq!(detect(&ReconciliationCursor::default(), &playing("", 5)), ChangeKind::None);
    }

    #[test]
    fn duplicate_command_reads_are_not_new() {
        let msg = CommandMessage::from_intent(5, &crate::types::Intent::next(), 10.0, 1.0);
        let mut cursor = ReconciliationCursor::default();
        assert!(cursor.is_new_command(&msg));
        cursor.record_command(&msg);
        assert!(!cursor.is_new_command(&msg));
    }

    #[test]
    fn recreated_bus_starts_a_new_sequence() {
        let mut cursor = ReconciliationCursor::default();
        cursor.record_command(&CommandMessage::from_intent(40, &crate::types::Intent::play(), 10.0, 1.0));

        let restarted = CommandMessage::from_intent(1, &crate::types::Intent::stop(), 20.0, 1.0);
        assert!(cursor.is_new_command(&restarted));
    }
}
