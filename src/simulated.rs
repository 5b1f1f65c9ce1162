//! In-process stand-in for the avatar/audio host.
//!
//! Keeps a catalog of media keys and a wall-clock driven playback position,
//! and records every call so runs can be inspected afterwards.

use crate::clock::SharedClock;
use crate::error::TransportError;
use crate::transport::{AudioLevels, DanceTransport, TransportResult};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    PlayCurrentOrFirst,
    PlayBy {
        id: Option<String>,
        index: Option<u32>,
        title: Option<String>,
    },
    Stop,
    Next,
    Prev,
    Seek(f64),
    AnimatorScale(f32),
    SetLevels(AudioLevels),
}

impl Call {
    pub fn is_play(&self) -> bool {
        matches!(
            self,
            Call::PlayCurrentOrFirst | Call::PlayBy { .. } | Call::Next | Call::Prev
        )
    }
}

pub struct SimulatedTransport {
    clock: SharedClock,
    catalog: Vec<String>,
    current: Option<usize>,
    playing: bool,
    /// Position at `anchor_utc`.
    position: f64,
    anchor_utc: f64,
    levels: AudioLevels,
    animator_scale: f32,
    calls: Vec<(f64, Call)>,
    failures: u32,
}

impl SimulatedTransport {
    pub fn new(clock: SharedClock, catalog: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let now = clock.now_utc();
        Self {
            clock,
            catalog: catalog.into_iter().map(Into::into).collect(),
            current: None,
            playing: false,
            position: 0.0,
            anchor_utc: now,
            levels: AudioLevels {
                slider: 0.8,
                audio: 0.8,
            },
            animator_scale: 1.0,
            calls: Vec::new(),
            failures: 0,
        }
    }

    /// Make the next `count` play-type calls fail.
    pub fn fail_next(&mut self, count: u32) {
        self.failures = count;
    }

    pub fn calls(&self) -> &[(f64, Call)] {
        &self.calls
    }

    pub fn play_calls(&self) -> Vec<(f64, Call)> {
        self.calls.iter().filter(|(_, c)| c.is_play()).cloned().collect()
    }

    pub fn seek_count(&self) -> usize {
        self.calls.iter().filter(|(_, c)| matches!(c, Call::Seek(_))).count()
    }

    pub fn levels(&self) -> AudioLevels {
        self.levels
    }

    pub fn animator_scale(&self) -> f32 {
        self.animator_scale
    }

    pub fn current_key(&self) -> Option<&str> {
        self.current.map(|i| self.catalog[i].as_str())
    }

    /// Shift the local position, as a stuttering host would.
    pub fn inject_drift(&mut self, secs: f64) {
        self.position += secs;
    }

    fn now(&self) -> f64 {
        self.clock.now_utc()
    }

    fn position_now(&self) -> f64 {
        if self.playing {
            self.position + (self.now() - self.anchor_utc)
        } else {
            self.position
        }
    }

    fn record(&mut self, call: Call) {
        let now = self.now();
        self.calls.push((now, call));
    }

    fn check_failure(&mut self) -> TransportResult<()> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err(TransportError::Failed("simulated failure".into()));
        }
        Ok(())
    }

    fn start(&mut self, index: usize) {
        self.current = Some(index);
        self.playing = true;
        self.position = 0.0;
        self.anchor_utc = self.now();
        log::info!("[Player] Playing {}", self.catalog[index]);
    }

    fn step(&mut self, forward: bool) -> TransportResult<()> {
        if self.catalog.is_empty() {
            return Err(TransportError::NotFound("empty catalog".into()));
        }
        let len = self.catalog.len();
        let index = match (self.current, forward) {
            (None, _) => 0,
            (Some(i), true) => (i + 1) % len,
            (Some(i), false) => (i + len - 1) % len,
        };
        self.start(index);
        Ok(())
    }
}

impl DanceTransport for SimulatedTransport {
    fn play_current_or_first(&mut self) -> TransportResult<()> {
        self.record(Call::PlayCurrentOrFirst);
        self.check_failure()?;
        if self.catalog.is_empty() {
            return Err(TransportError::NotFound("empty catalog".into()));
        }
        self.start(self.current.unwrap_or(0));
        Ok(())
    }

    fn play_by_id_or_index_or_title(
        &mut self,
        id: Option<&str>,
        index: Option<u32>,
        title: Option<&str>,
    ) -> TransportResult<bool> {
        self.record(Call::PlayBy {
            id: id.map(str::to_string),
            index,
            title: title.map(str::to_string),
        });
        self.check_failure()?;

        let found = id
            .and_then(|id| self.catalog.iter().position(|k| k == id))
            .or_else(|| index.map(|i| i as usize).filter(|i| *i < self.catalog.len()))
            .or_else(|| {
                title.and_then(|t| self.catalog.iter().position(|k| k.eq_ignore_ascii_case(t)))
            });

        match found {
            Some(i) => {
                self.start(i);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn stop(&mut self) -> TransportResult<()> {
        self.record(Call::Stop);
        if self.playing {
            log::info!("[Player] Stopped");
        }
        self.playing = false;
        self.position = 0.0;
        Ok(())
    }

    fn next(&mut self) -> TransportResult<()> {
        self.record(Call::Next);
        self.check_failure()?;
        self.step(true)
    }

    fn prev(&mut self) -> TransportResult<()> {
        self.record(Call::Prev);
        self.check_failure()?;
        self.step(false)
    }

    fn playback_time_seconds(&self) -> TransportResult<f64> {
        Ok(self.position_now())
    }

    fn current_media_key(&self) -> TransportResult<String> {
        Ok(match (self.playing, self.current_key()) {
            (true, Some(key)) => key.to_string(),
            _ => String::new(),
        })
    }

    fn is_playing(&self) -> TransportResult<bool> {
        Ok(self.playing)
    }

    fn seek(&mut self, seconds: f64) -> TransportResult<()> {
        self.record(Call::Seek(seconds));
        self.position = seconds.max(0.0);
        self.anchor_utc = self.now();
        Ok(())
    }

    fn set_animator_time_scale(&mut self, scale: f32) -> TransportResult<()> {
        self.record(Call::AnimatorScale(scale));
        self.animator_scale = scale;
        Ok(())
    }

    fn audio_levels(&self) -> TransportResult<AudioLevels> {
        Ok(self.levels)
    }

    fn set_audio_levels(&mut self, levels: AudioLevels) -> TransportResult<()> {
        self.record(Call::SetLevels(levels));
        self.levels = levels;
        Ok(())
    }
}
