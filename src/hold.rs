//! Local side effects of a leader-originated action: muting and freezing.
//!
//! While a synchronized start is pending, local audio is silenced and the
//! animation clock is frozen so the instance neither double-plays nor runs
//! ahead. Every mute is paired with exactly one restore.

use crate::transport::{tolerate, AudioLevels, DanceTransport};

/// Volume levels captured before muting.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MuteShadow {
    saved: Option<AudioLevels>,
    muted: bool,
}

impl MuteShadow {
    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn saved(&self) -> Option<AudioLevels> {
        self.saved
    }

    /// Save the current levels and silence output. No-op when already muted.
    pub fn mute<T: DanceTransport + ?Sized>(&mut self, transport: &mut T) -> bool {
        if self.muted {
            return false;
        }
        self.muted = true;

        // Without a readable level there is nothing to restore, so leave the
        // volume alone rather than silencing it for good.
        let Some(levels) = tolerate("audio_levels", transport.audio_levels()) else {
            return true;
        };
        self.saved = Some(levels);
        tolerate("set_audio_levels", transport.set_audio_levels(AudioLevels::SILENT));
        log::debug!("Muted local audio (saved {:?})", levels);
        true
    }

    /// Restore the saved levels. No-op when not muted.
    pub fn unmute<T: DanceTransport + ?Sized>(&mut self, transport: &mut T) -> bool {
        if !self.muted {
            return false;
        }
        self.muted = false;

        if let Some(levels) = self.saved.take() {
            tolerate("set_audio_levels", transport.set_audio_levels(levels));
            log::debug!("Restored local audio to {:?}", levels);
        }
        true
    }
}

/// Combined mute + animator freeze owned by one node.
#[derive(Debug, Default)]
pub struct LocalHold {
    mute: MuteShadow,
    frozen: bool,
}

impl LocalHold {
    pub fn is_muted(&self) -> bool {
        self.mute.is_muted()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn is_engaged(&self) -> bool {
        self.frozen || self.mute.is_muted()
    }

    pub fn mute<T: DanceTransport + ?Sized>(&mut self, transport: &mut T) {
        self.mute.mute(transport);
    }

    pub fn unmute<T: DanceTransport + ?Sized>(&mut self, transport: &mut T) {
        self.mute.unmute(transport);
    }

    pub fn freeze<T: DanceTransport + ?Sized>(&mut self, transport: &mut T) {
        if !self.frozen {
            self.frozen = true;
            tolerate("set_animator_time_scale", transport.set_animator_time_scale(0.0));
        }
    }

    pub fn unfreeze<T: DanceTransport + ?Sized>(&mut self, transport: &mut T) {
        if self.frozen {
            self.frozen = false;
            tolerate("set_animator_time_scale", transport.set_animator_time_scale(1.0));
        }
    }

    /// Mute and freeze.
    pub fn engage<T: DanceTransport + ?Sized>(&mut self, transport: &mut T) {
        self.mute(transport);
        self.freeze(transport);
    }

    /// Unfreeze and unmute; nothing is left suspended afterwards.
    pub fn release<T: DanceTransport + ?Sized>(&mut self, transport: &mut T) {
        self.unfreeze(transport);
        self.unmute(transport);
    }
}
