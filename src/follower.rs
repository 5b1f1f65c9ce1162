//! Follower reconciliation: mirror whatever the leader put on the bus.
//!
//! Every path here is idempotent. The same bus content read on any number of
//! ticks triggers at most one local action, because an action is either
//! pending in the scheduler for that version/event or recorded in the cursor.

use crate::change::{detect, ChangeKind};
use crate::error::SyncError;
use crate::node::{Origin, Scheduled, SyncNode};
use crate::scheduler::Channel;
use crate::state::BusHealth;
use crate::transport::{tolerate, DanceTransport};
use crate::types::PlaybackStateMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowerPhase {
    Idle,
    /// Media selected (or stopped, for commands), muted and frozen until the deadline.
    AwaitingScheduledStart,
    Playing,
    /// Mirroring the leader with local audio kept silent.
    Muted,
}

impl<T: DanceTransport> SyncNode<T> {
    /// Treat whatever is on the bus at startup as history, unless its
    /// synchronized instant is still ahead of us.
    pub(crate) fn prime_cursor(&mut self) {
        let now = self.now();
        if let Some(msg) = self.command_bus.read() {
            if msg.scheduled_at_utc < now {
                log::debug!("Skipping command v{} already executed by others", msg.version);
                self.cursor.record_command(&msg);
            }
        }
        self.state_bus.reset_floor();
    }

    pub(crate) fn follow_commands(&mut self, now: f64) {
        let msg = match self.command_bus.try_read() {
            Ok(Some(msg)) => {
                self.bus_health = BusHealth::Healthy;
                msg
            }
            Ok(None) => return,
            Err(e) => {
                log::debug!("No command this tick: {}", e);
                if matches!(e, SyncError::BusUnavailable { .. }) {
                    self.bus_health = BusHealth::Unavailable(e.to_string());
                }
                return;
            }
        };

        if !self.cursor.is_new_command(&msg) {
            return;
        }

        if !msg.schedules_within(self.config.schedule_horizon()) {
            log::warn!(
                "Ignoring command v{} scheduled for {} (written {}), outside the lead horizon",
                msg.version,
                msg.scheduled_at_utc,
                msg.written_at_utc
            );
            self.cursor.record_command(&msg);
            return;
        }

        if let Some(Scheduled::Execute { message, .. }) = self.scheduler.pending(Channel::Command) {
            if message.version == msg.version && message.written_at_utc == msg.written_at_utc {
                return;
            }
        }

        log::info!(
            "Leader broadcast v{} {:?}, executing at {:.3} (in {:.3}s)",
            msg.version,
            msg.command,
            msg.scheduled_at_utc,
            msg.scheduled_at_utc - now
        );

        if !msg.command.is_stop() {
            // Silence and pause now so nothing plays out of step during the lead window.
            self.hold.mute(&mut self.transport);
            if tolerate("is_playing", self.transport.is_playing()).unwrap_or(false) {
                tolerate("stop", self.transport.stop());
            }
            self.hold.freeze(&mut self.transport);
            self.phase = FollowerPhase::AwaitingScheduledStart;
        }

        let deadline = msg.scheduled_at_utc;
        self.scheduler.schedule_at(
            Channel::Command,
            deadline,
            Scheduled::Execute {
                message: msg,
                origin: Origin::Bus,
            },
        );
    }

    pub(crate) fn follow_state(&mut self, now: f64) {
        let read = self.state_bus.read();
        self.reread_at = self
            .state_bus
            .retry_pending()
            .then(|| now + self.state_bus.retry_delay().as_secs_f64());
        let Some(msg) = read else {
            return;
        };
        self.bus_health = BusHealth::Healthy;

        if !msg.schedules_within(self.config.schedule_horizon()) {
            log::debug!("Ignoring state v{} with out-of-range timestamps", msg.version);
            return;
        }

        if self.cursor.is_behind(&msg) {
            log::info!(
                "Leader state restarted at v{} (applied v{}), following the new sequence",
                msg.version,
                self.cursor.last_applied_version
            );
            self.cursor.restart_sequence();
            self.clear_attempts();
        }

        if msg.is_playing && msg.media_key.is_empty() {
            log::warn!("Leader state v{} is playing without a media key, waiting", msg.version);
            return;
        }

        let awaiting = self.scheduler.is_pending(Channel::AnimatorResume);
        let change = match detect(&self.cursor, &msg) {
            ChangeKind::None if !msg.is_playing && awaiting => ChangeKind::PlayingStopped,
            other => other,
        };

        match change {
            ChangeKind::None => {
                if msg.is_playing && matches!(self.phase, FollowerPhase::Playing | FollowerPhase::Muted) {
                    self.correct_drift(&msg, now);
                }
            }
            ChangeKind::PlayingStopped => self.stop_mirroring(&msg),
            ChangeKind::NewScheduledStart | ChangeKind::MediaChanged => {
                self.begin_mirrored_start(msg, change, now)
            }
        }
    }

    fn begin_mirrored_start(&mut self, msg: PlaybackStateMessage, change: ChangeKind, now: f64) {
        if let Some(Scheduled::Resume { state, .. }) = self.scheduler.pending(Channel::AnimatorResume) {
            if state.media_key == msg.media_key && state.event_id == msg.event_id {
                return;
            }
        }

        self.hold.engage(&mut self.transport);
        let key = msg.media_key.as_str();
        let failure = match self.transport.play_by_id_or_index_or_title(Some(key), None, Some(key)) {
            Ok(true) => None,
            Ok(false) => Some(format!("media {:?} not available locally", key)),
            Err(e) => Some(format!("failed to select {:?}: {}", key, e)),
        };
        if let Some(reason) = failure {
            log::warn!("Cannot mirror leader start: {}", reason);
            self.scheduler.cancel(Channel::AnimatorResume);
            self.hold.release(&mut self.transport);
            self.phase = FollowerPhase::Idle;
            let event = (msg.event_id, msg.version);
            self.note_failed_attempt(event, |cursor| cursor.record_state(&msg));
            return;
        }

        let deadline = if change == ChangeKind::NewScheduledStart {
            msg.scheduled_start_utc
        } else {
            now
        };
        log::info!(
            "Mirroring {:?} (v{}, {:?}), audible at {:.3}",
            msg.media_key,
            msg.version,
            change,
            deadline
        );

        self.phase = FollowerPhase::AwaitingScheduledStart;
        self.scheduler.schedule_at(
            Channel::AnimatorResume,
            deadline,
            Scheduled::Resume {
                state: msg,
                origin: Origin::Bus,
            },
        );
    }

    fn stop_mirroring(&mut self, msg: &PlaybackStateMessage) {
        log::info!("Leader stopped (v{}), stopping local playback", msg.version);
        self.scheduler.cancel_all();
        match self.transport.stop() {
            Ok(()) => {
                self.cursor.record_state(msg);
                self.clear_attempts();
            }
            Err(e) => {
                log::warn!("Failed to stop local playback: {}", e);
                let event = (msg.event_id, msg.version);
                self.note_failed_attempt(event, |cursor| cursor.record_state(msg));
            }
        }
        self.hold.release(&mut self.transport);
        self.phase = FollowerPhase::Idle;
    }

    /// Flip held playback to audible at its synchronized start.
    pub(crate) fn resume_playback(&mut self, state: PlaybackStateMessage, origin: Origin) {
        let target = state.predicted_position(self.now());
        tolerate("seek", self.transport.seek(target));
        self.settle_started(origin);
        if origin == Origin::Bus {
            self.cursor.record_state(&state);
            self.clear_attempts();
        }
        log::info!("Playback of {:?} started in sync at {:.3}s", state.media_key, target);
    }

    /// Nudge the local position toward the leader's predicted position.
    ///
    /// Returns whether a seek was issued.
    pub(crate) fn correct_drift(&mut self, msg: &PlaybackStateMessage, now: f64) -> bool {
        let Some(local) = tolerate("playback_time_seconds", self.transport.playback_time_seconds()) else {
            return false;
        };
        let predicted = msg.predicted_position(now);
        let drift = local - predicted;
        if drift.abs() <= self.config.drift_threshold.as_secs_f64() {
            return false;
        }

        log::debug!(
            "Drift {:+.3}s on {:?} (local {:.3}, leader {:.3}), seeking",
            drift,
            msg.media_key,
            local,
            predicted
        );
        tolerate("seek", self.transport.seek(predicted)).is_some()
    }
}
