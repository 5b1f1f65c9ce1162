//! Leader side: broadcasting user actions with a shared future deadline and
//! publishing playback state.

use crate::config::SyncMode;
use crate::error::{Result, SyncError};
use crate::follower::FollowerPhase;
use crate::node::{Origin, Scheduled, SyncNode};
use crate::scheduler::Channel;
use crate::state::{BusHealth, Role};
use crate::transport::{tolerate, DanceTransport};
use crate::types::{CommandMessage, Intent, PlaybackStateMessage};

/// What `begin_action` ended up doing.
#[derive(Debug, Clone, PartialEq)]
pub enum BroadcastOutcome {
    /// Written to the bus; every instance executes at `at_utc`.
    Broadcast { version: u64, at_utc: f64 },
    /// Executed here only, unsynchronized.
    LocalOnly,
}

/// Last published playback state of the main instance.
#[derive(Debug, Clone, Default)]
pub struct PublisherState {
    pub version: u64,
    pub key: String,
    pub playing: bool,
    pub has_start: bool,
    pub start_utc: f64,
    pub event_id: u64,
}

impl<T: DanceTransport> SyncNode<T> {
    /// Continue the bus version sequence after (re)gaining leadership.
    pub(crate) fn resume_sequence(&mut self) {
        self.last_written_version = self
            .last_written_version
            .max(self.command_bus.read().map(|m| m.version).unwrap_or(0));

        let floor = self.state_bus.read().map(|s| s.version).unwrap_or(0);
        self.publisher.version = self.publisher.version.max(floor);
        self.publisher.event_id = self.publisher.event_id.max(floor);
    }

    /// Whether a UI control may start an action now.
    ///
    /// False while a previous broadcast's lead window is still open.
    pub fn accepts_input(&self) -> bool {
        self.now() >= self.guard_until
    }

    /// Debounced [`begin_action`](Self::begin_action) for UI input: non-stop
    /// intents are rejected while a lead window is open.
    pub fn try_begin_action(&mut self, intent: Intent) -> Result<BroadcastOutcome> {
        if self.enabled && !intent.kind.is_stop() && !self.accepts_input() {
            return Err(SyncError::Busy {
                until: self.guard_until,
            });
        }
        self.begin_action(intent)
    }

    /// Start a user-initiated transport action on every instance at once.
    ///
    /// Non-stop actions are deferred by the lead time; meanwhile this
    /// instance holds (stops/freezes) exactly like the followers do. A new
    /// action replaces one still waiting for its deadline.
    pub fn begin_action(&mut self, intent: Intent) -> Result<BroadcastOutcome> {
        if !self.enabled {
            return self.execute_locally(intent);
        }
        if self.role != Role::Leader {
            return Err(SyncError::NotLeader);
        }

        let now = self.now();
        if !self.gate.allows_broadcast() {
            log::info!("Broadcast disabled, running {:?} locally", intent.kind);
            return self.execute_locally(intent);
        }

        match self.config.mode {
            SyncMode::Command => self.broadcast_command(intent, now),
            SyncMode::State => self.broadcast_state_start(intent, now),
        }
    }

    fn execute_locally(&mut self, intent: Intent) -> Result<BroadcastOutcome> {
        self.scheduler.cancel_all();
        self.hold.release(&mut self.transport);
        self.apply_intent(&intent)?;
        Ok(BroadcastOutcome::LocalOnly)
    }

    fn broadcast_command(&mut self, intent: Intent, now: f64) -> Result<BroadcastOutcome> {
        let version = self.command_bus.next_version(self.last_written_version);
        let message = CommandMessage::from_intent(version, &intent, now, self.config.lead_time.as_secs_f64());
        let at_utc = message.scheduled_at_utc;

        let outcome = match self.command_bus.write(&message) {
            Ok(()) => {
                self.last_written_version = version;
                self.bus_health = BusHealth::Healthy;
                log::info!("Broadcast v{} {:?} for {:.3}", version, intent.kind, at_utc);
                BroadcastOutcome::Broadcast { version, at_utc }
            }
            Err(e) => {
                log::warn!("Broadcast failed, acting unsynchronized: {}", e);
                self.bus_health = BusHealth::Unavailable(e.to_string());
                BroadcastOutcome::LocalOnly
            }
        };

        if intent.kind.is_stop() {
            self.scheduler.cancel_all();
            self.guard_until = now;
            let result = self.apply_intent(&intent);
            self.hold.release(&mut self.transport);
            self.phase = FollowerPhase::Idle;
            result?;
            return Ok(outcome);
        }

        // Local hold: pause with everyone else for the lead window.
        self.scheduler.cancel(Channel::AnimatorResume);
        if tolerate("is_playing", self.transport.is_playing()).unwrap_or(false) {
            tolerate("stop", self.transport.stop());
        }
        self.hold.freeze(&mut self.transport);
        self.phase = FollowerPhase::AwaitingScheduledStart;
        self.guard_until = at_utc;
        self.scheduler.schedule_at(
            Channel::Command,
            at_utc,
            Scheduled::Execute {
                message,
                origin: Origin::Local,
            },
        );
        Ok(outcome)
    }

    fn broadcast_state_start(&mut self, intent: Intent, now: f64) -> Result<BroadcastOutcome> {
        if intent.kind.is_stop() {
            self.scheduler.cancel_all();
            self.guard_until = now;
            let result = self.apply_intent(&intent);
            self.hold.release(&mut self.transport);
            self.phase = FollowerPhase::Idle;
            result?;
            self.publish_state(now);
            return Ok(BroadcastOutcome::Broadcast {
                version: self.publisher.version,
                at_utc: now,
            });
        }

        // Select right away but silent and frozen; audible at the shared start.
        self.hold.engage(&mut self.transport);
        if let Err(e) = self.apply_intent(&intent) {
            self.scheduler.cancel(Channel::AnimatorResume);
            self.hold.release(&mut self.transport);
            self.phase = FollowerPhase::Idle;
            return Err(e.into());
        }

        let start_utc = now + self.config.lead_time.as_secs_f64();
        let key = tolerate("current_media_key", self.transport.current_media_key()).unwrap_or_default();
        self.publisher.version += 1;
        self.publisher.key = key;
        self.publisher.playing = true;
        self.publisher.has_start = true;
        self.publisher.start_utc = start_utc;
        self.publisher.event_id = self.publisher.version;
        self.guard_until = start_utc;
        self.phase = FollowerPhase::AwaitingScheduledStart;

        let state = self.write_state(now, 0.0);
        self.scheduler.schedule_at(
            Channel::AnimatorResume,
            start_utc,
            Scheduled::Resume {
                state,
                origin: Origin::Local,
            },
        );

        log::info!(
            "Broadcast start of {:?} (v{}) for {:.3}",
            self.publisher.key,
            self.publisher.version,
            start_utc
        );
        Ok(BroadcastOutcome::Broadcast {
            version: self.publisher.version,
            at_utc: start_utc,
        })
    }

    /// Rewrite the state bus from the local player. Called every tick.
    pub(crate) fn publish_state(&mut self, now: f64) {
        let playing = tolerate("is_playing", self.transport.is_playing()).unwrap_or(false);
        let key = if playing {
            tolerate("current_media_key", self.transport.current_media_key()).unwrap_or_default()
        } else {
            String::new()
        };

        if key != self.publisher.key || playing != self.publisher.playing {
            self.publisher.version += 1;
            self.publisher.key = key;
            self.publisher.playing = playing;
            log::debug!(
                "Playback changed to {:?} (playing: {}), state v{}",
                self.publisher.key,
                playing,
                self.publisher.version
            );
        }

        // Position is meaningless while held before a scheduled start.
        let position = if self.scheduler.is_pending(Channel::AnimatorResume) {
            0.0
        } else {
            tolerate("playback_time_seconds", self.transport.playback_time_seconds()).unwrap_or(0.0)
        };
        self.write_state(now, position);
    }

    fn write_state(&mut self, now: f64, position: f64) -> PlaybackStateMessage {
        let state = PlaybackStateMessage {
            media_key: self.publisher.key.clone(),
            position_seconds: position,
            is_playing: self.publisher.playing,
            version: self.publisher.version,
            written_at_utc: now,
            has_scheduled_start: self.publisher.has_start,
            scheduled_start_utc: self.publisher.start_utc,
            event_id: self.publisher.event_id,
        };

        match self.state_bus.write(&state) {
            Ok(()) => self.bus_health = BusHealth::Healthy,
            Err(e) => {
                log::debug!("State publish failed, retrying next tick: {}", e);
                self.bus_health = BusHealth::Unavailable(e.to_string());
            }
        }
        state
    }
}
