//! The narrow seam to the avatar/animation host.
//!
//! The sync core never touches animation or audio primitives except through
//! this trait. Optional calls default to [`TransportError::Unsupported`],
//! which the core treats as a logged no-op.

use crate::error::TransportError;

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Volume levels saved before muting and restored afterwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioLevels {
    /// The user-facing volume control.
    pub slider: f32,
    /// The audio source volume actually applied.
    pub audio: f32,
}

impl AudioLevels {
    pub const SILENT: AudioLevels = AudioLevels {
        slider: 0.0,
        audio: 0.0,
    };
}

pub trait DanceTransport {
    fn play_current_or_first(&mut self) -> TransportResult<()>;

    /// Select media by stable id, then ordinal, then display title.
    /// Returns `false` when nothing matched.
    fn play_by_id_or_index_or_title(
        &mut self,
        id: Option<&str>,
        index: Option<u32>,
        title: Option<&str>,
    ) -> TransportResult<bool>;

    fn stop(&mut self) -> TransportResult<()>;

    fn next(&mut self) -> TransportResult<()>;

    fn prev(&mut self) -> TransportResult<()>;

    fn playback_time_seconds(&self) -> TransportResult<f64>;

    /// Stable identifier of the current media, empty when none.
    fn current_media_key(&self) -> TransportResult<String>;

    fn is_playing(&self) -> TransportResult<bool>;

    fn seek(&mut self, _seconds: f64) -> TransportResult<()> {
        Err(TransportError::Unsupported("seek"))
    }

    /// `0.0` freezes the animation clock, `1.0` resumes it.
    fn set_animator_time_scale(&mut self, _scale: f32) -> TransportResult<()> {
        Err(TransportError::Unsupported("set_animator_time_scale"))
    }

    fn audio_levels(&self) -> TransportResult<AudioLevels> {
        Err(TransportError::Unsupported("audio_levels"))
    }

    fn set_audio_levels(&mut self, _levels: AudioLevels) -> TransportResult<()> {
        Err(TransportError::Unsupported("set_audio_levels"))
    }
}

/// Log a failed optional call; unsupported calls are silent no-ops.
pub(crate) fn tolerate<T>(call: &str, result: TransportResult<T>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) if e.is_unsupported() => {
            log::trace!("{} unavailable on this host", call);
            None
        }
        Err(e) => {
            log::warn!("{} failed: {}", call, e);
            None
        }
    }
}
