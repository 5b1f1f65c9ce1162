//! One synchronizer instance: election, bus polling, scheduling and the
//! local side effects, all driven from a single poll loop.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::bus::{CommandBus, StateBus};
use crate::change::ReconciliationCursor;
use crate::clock::SharedClock;
use crate::config::{SyncConfig, SyncMode};
use crate::election::{BroadcastGate, LeaderElection};
use crate::error::{Result, TransportError};
use crate::follower::FollowerPhase;
use crate::hold::LocalHold;
use crate::leader::PublisherState;
use crate::scheduler::Scheduler;
use crate::state::{create_status, BusHealth, Role, SharedStatus};
use crate::transport::DanceTransport;
use crate::types::{CommandKind, CommandMessage, Intent, PlaybackStateMessage};

/// Who asked for a scheduled action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// This node's own broadcast.
    Local,
    /// Mirrored from the bus.
    Bus,
}

#[derive(Debug, Clone)]
pub(crate) enum Scheduled {
    /// Run a transport command at its synchronized instant.
    Execute { message: CommandMessage, origin: Origin },
    /// Make held playback audible at the synchronized start.
    Resume { state: PlaybackStateMessage, origin: Origin },
}

/// Identifies one bus event for the retry budget.
pub(crate) type EventKey = (u64, u64);

/// Requests delivered to a running node.
#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    Intent(Intent),
    SetBroadcastEnabled(bool),
    SetEnabled(bool),
    Shutdown,
}

pub struct SyncNode<T: DanceTransport> {
    pub(crate) config: SyncConfig,
    pub(crate) election: LeaderElection,
    pub(crate) gate: BroadcastGate,
    pub(crate) transport: T,
    pub(crate) clock: SharedClock,
    pub(crate) scheduler: Scheduler<Scheduled>,
    pub(crate) hold: LocalHold,
    pub(crate) command_bus: CommandBus,
    pub(crate) state_bus: StateBus,
    pub(crate) cursor: ReconciliationCursor,
    pub(crate) phase: FollowerPhase,
    /// Failed applications of `attempt_event`.
    pub(crate) attempts: u32,
    pub(crate) attempt_event: Option<EventKey>,
    /// When to re-read a state bus that was empty or damaged.
    pub(crate) reread_at: Option<f64>,
    pub(crate) last_written_version: u64,
    pub(crate) publisher: PublisherState,
    /// End of the current broadcast guard window.
    pub(crate) guard_until: f64,
    pub(crate) ticks: u64,
    pub(crate) enabled: bool,
    pub(crate) role: Role,
    pub(crate) bus_health: BusHealth,
    pub(crate) status: SharedStatus,
}

impl<T: DanceTransport> SyncNode<T> {
    /// Build a node and run the initial election.
    pub fn new(config: SyncConfig, mut election: LeaderElection, transport: T, clock: SharedClock) -> Self {
        let command_bus = CommandBus::new(config.command_path());
        let state_bus = StateBus::new(config.state_path(), config.read_retries, config.read_retry_delay);
        let gate = BroadcastGate::for_bus(&config.bus_path());

        let role = if election.try_acquire() {
            Role::Leader
        } else {
            Role::Follower
        };
        log::info!(
            "Instance {} starting as {:?} ({:?} bus at {:?})",
            election.identity().index,
            role,
            config.mode,
            config.bus_path()
        );

        let mut node = Self {
            config,
            election,
            gate,
            transport,
            clock,
            scheduler: Scheduler::new(),
            hold: LocalHold::default(),
            command_bus,
            state_bus,
            cursor: ReconciliationCursor::default(),
            phase: FollowerPhase::Idle,
            attempts: 0,
            attempt_event: None,
            reread_at: None,
            last_written_version: 0,
            publisher: PublisherState::default(),
            guard_until: 0.0,
            ticks: 0,
            enabled: true,
            role,
            bus_health: BusHealth::Unknown,
            status: create_status(),
        };

        match role {
            Role::Leader => node.resume_sequence(),
            Role::Follower => node.prime_cursor(),
        }
        node.refresh_status();
        node
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }

    pub fn phase(&self) -> FollowerPhase {
        self.phase
    }

    pub fn cursor(&self) -> &ReconciliationCursor {
        &self.cursor
    }

    pub fn hold(&self) -> &LocalHold {
        &self.hold
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn status(&self) -> SharedStatus {
        self.status.clone()
    }

    pub fn next_deadline(&self) -> Option<f64> {
        self.scheduler.next_deadline()
    }

    /// Earliest instant the loop must wake: a scheduled action or a bus re-read.
    pub fn next_wake(&self) -> Option<f64> {
        match (self.scheduler.next_deadline(), self.reread_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn now(&self) -> f64 {
        self.clock.now_utc()
    }

    /// One poll step: election upkeep, bus I/O, then anything now due.
    pub fn tick(&mut self) {
        self.ticks += 1;
        if !self.enabled {
            return;
        }

        self.maybe_reelect();

        let now = self.now();
        match (self.role, self.config.mode) {
            (Role::Leader, SyncMode::State) => self.publish_state(now),
            (Role::Leader, SyncMode::Command) => {}
            (Role::Follower, SyncMode::Command) => self.follow_commands(now),
            (Role::Follower, SyncMode::State) => self.follow_state(now),
        }

        self.fire_due();
        self.refresh_status();
    }

    /// Execute every scheduled action whose deadline has passed.
    pub fn fire_due(&mut self) {
        let now = self.now();
        for (channel, action) in self.scheduler.take_due(now) {
            log::debug!("Firing {:?} action at {:.3}", channel, now);
            match action {
                Scheduled::Execute { message, origin } => self.execute_command(message, origin),
                Scheduled::Resume { state, origin } => self.resume_playback(state, origin),
            }
        }
    }

    /// Between-tick wake: re-read a damaged state bus if due, then fire deadlines.
    pub fn wake(&mut self) {
        let now = self.now();
        if self.reread_at.is_some_and(|at| at <= now) {
            self.reread_at = None;
            if self.enabled && self.role == Role::Follower && self.config.mode == SyncMode::State {
                self.follow_state(now);
            }
        }
        self.fire_due();
        self.refresh_status();
    }

    pub(crate) fn apply_intent(&mut self, intent: &Intent) -> std::result::Result<(), TransportError> {
        match intent.kind {
            CommandKind::PlayCurrentOrFirst => self.transport.play_current_or_first(),
            CommandKind::PlayByKey => {
                let found = self.transport.play_by_id_or_index_or_title(
                    intent.key.as_deref(),
                    intent.index,
                    intent.title.as_deref(),
                )?;
                if found {
                    Ok(())
                } else {
                    let wanted = intent
                        .key
                        .clone()
                        .or_else(|| intent.title.clone())
                        .or_else(|| intent.index.map(|i| format!("#{}", i)))
                        .unwrap_or_default();
                    Err(TransportError::NotFound(wanted))
                }
            }
            CommandKind::Stop => self.transport.stop(),
            CommandKind::Next => self.transport.next(),
            CommandKind::Prev => self.transport.prev(),
        }
    }

    /// Leave playback audible (or muted, for muting followers) after a start.
    pub(crate) fn settle_started(&mut self, origin: Origin) {
        self.hold.unfreeze(&mut self.transport);
        if origin == Origin::Bus && self.config.mute_followers {
            self.hold.mute(&mut self.transport);
            self.phase = FollowerPhase::Muted;
        } else {
            self.hold.unmute(&mut self.transport);
            self.phase = FollowerPhase::Playing;
        }
    }

    fn execute_command(&mut self, message: CommandMessage, origin: Origin) {
        let intent = message.intent();
        match self.apply_intent(&intent) {
            Ok(()) => {
                log::info!("Executed {:?} v{} ({:?})", message.command, message.version, origin);
                if intent.kind.is_stop() {
                    self.hold.release(&mut self.transport);
                    self.phase = FollowerPhase::Idle;
                } else {
                    self.settle_started(origin);
                }
                if origin == Origin::Bus {
                    self.cursor.record_command(&message);
                    self.clear_attempts();
                }
            }
            Err(e) => {
                log::warn!("Failed to execute {:?} v{}: {}", message.command, message.version, e);
                self.hold.release(&mut self.transport);
                self.phase = FollowerPhase::Idle;
                if origin == Origin::Bus {
                    let event = (message.version, message.written_at_utc.to_bits());
                    self.note_failed_attempt(event, |cursor| cursor.record_command(&message));
                }
            }
        }
    }

    /// Count a failed application of `event`; past the budget, mark it applied anyway.
    ///
    /// The count starts over whenever a different event fails.
    pub(crate) fn note_failed_attempt(
        &mut self,
        event: EventKey,
        abandon: impl FnOnce(&mut ReconciliationCursor),
    ) {
        if self.attempt_event != Some(event) {
            self.attempt_event = Some(event);
            self.attempts = 0;
        }
        self.attempts += 1;
        if self.attempts >= self.config.max_apply_attempts.max(1) {
            log::warn!("Abandoning bus event after {} failed attempts", self.attempts);
            abandon(&mut self.cursor);
            self.clear_attempts();
        }
    }

    pub(crate) fn clear_attempts(&mut self) {
        self.attempts = 0;
        self.attempt_event = None;
    }

    /// Failed applications counted against the event currently retried.
    pub fn failed_attempts(&self) -> u32 {
        self.attempts
    }

    fn maybe_reelect(&mut self) {
        if self.role == Role::Leader || self.config.reelect_every == 0 {
            return;
        }
        if self.ticks % self.config.reelect_every != 0 {
            return;
        }
        if self.election.try_acquire() {
            log::info!("Leader lock became free, promoting to leader");
            self.promote();
        }
    }

    fn promote(&mut self) {
        self.scheduler.cancel_all();
        self.hold.release(&mut self.transport);
        self.phase = FollowerPhase::Idle;
        self.clear_attempts();
        self.reread_at = None;
        self.role = Role::Leader;
        self.resume_sequence();
    }

    /// Stop synchronizing. Nothing is left frozen or muted.
    pub fn disable(&mut self) {
        if !self.enabled {
            return;
        }
        log::info!("Dance sync disabled");
        self.enabled = false;
        self.scheduler.cancel_all();
        self.reread_at = None;
        self.hold.release(&mut self.transport);
        self.phase = FollowerPhase::Idle;
        self.refresh_status();
    }

    pub fn enable(&mut self) {
        if self.enabled {
            return;
        }
        log::info!("Dance sync enabled");
        self.enabled = true;
        match self.role {
            Role::Leader => self.resume_sequence(),
            Role::Follower => self.prime_cursor(),
        }
        self.refresh_status();
    }

    pub fn set_broadcast_enabled(&mut self, enabled: bool) -> Result<()> {
        let result = self.gate.set_enabled(enabled);
        self.refresh_status();
        result
    }

    /// Disable and give up leadership.
    pub fn shutdown(&mut self) {
        self.disable();
        self.election.release();
        self.role = Role::Follower;
        self.refresh_status();
    }

    pub fn handle_control(&mut self, control: Control) {
        match control {
            Control::Intent(intent) => {
                match self.try_begin_action(intent) {
                    Ok(outcome) => log::debug!("Action outcome: {:?}", outcome),
                    Err(e) => log::warn!("Action rejected: {}", e),
                }
                self.refresh_status();
            }
            Control::SetBroadcastEnabled(enabled) => {
                if let Err(e) = self.set_broadcast_enabled(enabled) {
                    log::error!("Failed to toggle broadcast: {}", e);
                }
            }
            Control::SetEnabled(true) => self.enable(),
            Control::SetEnabled(false) => self.disable(),
            Control::Shutdown => self.shutdown(),
        }
    }

    pub(crate) fn refresh_status(&self) {
        let mut status = self.status.write();
        status.enabled = self.enabled;
        status.role = self.role;
        status.phase = self.phase;
        status.last_applied_version = self.cursor.last_applied_version;
        status.last_broadcast_version = self.last_written_version.max(self.publisher.version);
        status.broadcast_enabled = self.gate.is_enabled();
        status.muted = self.hold.is_muted();
        status.frozen = self.hold.is_frozen();
        status.bus = self.bus_health.clone();
    }

    /// Drive the node until `Control::Shutdown` or the sender is dropped.
    ///
    /// Ticks on `poll_interval` and additionally wakes exactly at the nearest
    /// scheduled deadline. Returns the node so the host can inspect it.
    pub async fn run(mut self, mut controls: mpsc::UnboundedReceiver<Control>) -> Self {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let poll = self.config.poll_interval;
            let wake = self
                .next_wake()
                .map(|at| wake_delay(at - self.now(), poll));

            tokio::select! {
                _ = interval.tick() => self.tick(),
                _ = sleep_for(wake) => self.wake(),
                control = controls.recv() => match control {
                    None | Some(Control::Shutdown) => break,
                    Some(control) => self.handle_control(control),
                },
            }
        }

        log::info!("Poll loop stopping");
        self.shutdown();
        self
    }
}

/// Sleep before a wake `secs` away, never longer than one poll interval.
///
/// Deadlines come from other processes; one too far out (or not a number)
/// must not overflow the timer.
pub(crate) fn wake_delay(secs: f64, poll: Duration) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0))
        .unwrap_or(poll)
        .min(poll)
}

async fn sleep_for(wake: Option<Duration>) {
    match wake {
        Some(delay) => tokio::time::sleep(delay).await,
        None => std::future::pending::<()>().await,
    }
}

impl<T: DanceTransport> Drop for SyncNode<T> {
    fn drop(&mut self) {
        // Never leave the host frozen or silent.
        self.scheduler.cancel_all();
        self.hold.release(&mut self.transport);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wake_delay_is_capped_at_one_poll() {
        let poll = Duration::from_millis(100);
        assert_eq!(wake_delay(0.03, poll), Duration::from_millis(30));
        assert_eq!(wake_delay(-2.0, poll), Duration::ZERO);
        assert_eq!(wake_delay(5.0, poll), poll);
        assert_eq!(wake_delay(1e300, poll), poll);
        assert_eq!(wake_delay(f64::NAN, poll), Duration::ZERO);
    }
}
