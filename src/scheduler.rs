//! Deadline scheduling with one pending slot per channel.
//!
//! Arming a channel replaces whatever was pending there, so a burst of user
//! actions only ever executes the latest. The poll loop asks for the nearest
//! deadline, sleeps on the wall clock until then, and collects what is due.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Transport command execution (play/stop/next/prev).
    Command,
    /// Releasing a hold: unfreeze the animator and make audio audible.
    AnimatorResume,
}

#[derive(Debug)]
struct Pending<A> {
    deadline: f64,
    action: A,
}

#[derive(Debug)]
pub struct Scheduler<A> {
    pending: HashMap<Channel, Pending<A>>,
}

impl<A> Default for Scheduler<A> {
    fn default() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }
}

impl<A> Scheduler<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `channel` for `deadline_utc`, returning the action it displaced.
    pub fn schedule_at(&mut self, channel: Channel, deadline_utc: f64, action: A) -> Option<A> {
        self.pending
            .insert(
                channel,
                Pending {
                    deadline: deadline_utc,
                    action,
                },
            )
            .map(|p| p.action)
    }

    pub fn cancel(&mut self, channel: Channel) -> Option<A> {
        self.pending.remove(&channel).map(|p| p.action)
    }

    pub fn cancel_all(&mut self) {
        self.pending.clear();
    }

    pub fn is_pending(&self, channel: Channel) -> bool {
        self.pending.contains_key(&channel)
    }

    pub fn pending(&self, channel: Channel) -> Option<&A> {
        self.pending.get(&channel).map(|p| &p.action)
    }

    pub fn deadline(&self, channel: Channel) -> Option<f64> {
        self.pending.get(&channel).map(|p| p.deadline)
    }

    pub fn next_deadline(&self) -> Option<f64> {
        self.pending
            .values()
            .map(|p| p.deadline)
            .min_by(|a, b| a.total_cmp(b))
    }

    /// Seconds to wait before the nearest deadline, never negative.
    pub fn delay_until_next(&self, now: f64) -> Option<f64> {
        self.next_deadline().map(|d| (d - now).max(0.0))
    }

    /// Remove and return every action whose deadline has passed, earliest first.
    pub fn take_due(&mut self, now: f64) -> Vec<(Channel, A)> {
        let mut due: Vec<(Channel, f64)> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(c, p)| (*c, p.deadline))
            .collect();
        due.sort_by(|a, b| a.1.total_cmp(&b.1));

        due.into_iter()
            .filter_map(|(channel, _)| self.pending.remove(&channel).map(|p| (channel, p.action)))
            .collect()
    }
}
