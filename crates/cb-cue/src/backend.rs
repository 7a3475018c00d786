//! Playback backend seam
//!
//! The engine never decodes or mixes audio itself. It hands encoded wave
//! data to an `AudioBackend`, starts channels on it and pushes parameters
//! every tick. Backend failures are logged and treated as no-ops.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::voice::{FILTER_OPEN_HZ, NO_REVERB};

/// Backend sound object (decoded or streamable wave data)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoundHandle(pub u64);

/// Backend playing channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelHandle(pub u64);

/// Backend error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Invalid sound handle {0}")]
    InvalidSound(u64),

    #[error("Invalid channel handle {0}")]
    InvalidChannel(u64),

    #[error("Backend device error: {0}")]
    Device(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Live parameters pushed to a channel every tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceParams {
    /// Linear volume (backends clamp to 0..3)
    pub volume: f32,
    /// Low-pass cutoff in Hz
    pub low_pass_cutoff: f32,
    /// Pitch offset in semitones
    pub pitch_semitones: f32,
    /// Reverb level (`NO_REVERB` = dry)
    pub reverb: f32,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            volume: 1.0,
            low_pass_cutoff: FILTER_OPEN_HZ,
            pitch_semitones: 0.0,
            reverb: NO_REVERB,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BACKEND TRAIT
// ═══════════════════════════════════════════════════════════════════════════════

/// Native playback library driven by the engine
pub trait AudioBackend: Send {
    /// Create a sound from encoded wave bytes
    fn create_sound(&mut self, bytes: &[u8]) -> BackendResult<SoundHandle>;

    /// Release a sound created by `create_sound`
    fn release_sound(&mut self, sound: SoundHandle) -> BackendResult<()>;

    /// Start a sound on a new channel
    fn play(&mut self, sound: SoundHandle, looping: bool) -> BackendResult<ChannelHandle>;

    /// Stop a channel; the handle becomes invalid
    fn stop(&mut self, channel: ChannelHandle) -> BackendResult<()>;

    fn set_paused(&mut self, channel: ChannelHandle, paused: bool) -> BackendResult<()>;

    /// True while the channel is playing or paused
    fn is_playing(&self, channel: ChannelHandle) -> bool;

    fn is_paused(&self, channel: ChannelHandle) -> bool;

    /// Push live parameters to a channel
    fn apply(&mut self, channel: ChannelHandle, params: &VoiceParams) -> BackendResult<()>;

    /// Per-tick housekeeping
    fn update(&mut self) -> BackendResult<()> {
        Ok(())
    }

    /// Tear down and reinitialize the backend connection
    fn reset(&mut self) -> BackendResult<()>;
}

/// Log a failed backend call and turn it into an `Option`
pub(crate) trait LogBackendError<T> {
    fn logged(self, op: &str) -> Option<T>;
}

impl<T> LogBackendError<T> for BackendResult<T> {
    fn logged(self, op: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("[Backend] {} failed: {}", op, e);
                None
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MEMORY BACKEND
// ═══════════════════════════════════════════════════════════════════════════════

/// Recorded channel state
#[derive(Debug, Clone)]
pub struct ChannelRecord {
    pub sound: SoundHandle,
    pub looping: bool,
    pub playing: bool,
    pub paused: bool,
    /// Last parameters pushed with `apply`
    pub params: Option<VoiceParams>,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: u64,
    sounds: HashMap<u64, usize>,
    channels: HashMap<u64, ChannelRecord>,
    sounds_created: usize,
    sounds_released: usize,
    plays: usize,
    updates: usize,
    resets: usize,
    failing: bool,
}

impl MemoryState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn check(&self) -> BackendResult<()> {
        if self.failing {
            return Err(BackendError::Device("simulated failure".into()));
        }
        Ok(())
    }

    fn channel_mut(&mut self, channel: ChannelHandle) -> BackendResult<&mut ChannelRecord> {
        self.channels
            .get_mut(&channel.0)
            .ok_or(BackendError::InvalidChannel(channel.0))
    }
}

/// Headless backend that records every call
///
/// Clones share state, so a test can keep one clone for inspection after
/// handing another to the engine. Channels play until stopped or until
/// `finish` simulates natural completion.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every fallible call fail until cleared
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().failing = failing;
    }

    /// Simulate a channel reaching its end
    pub fn finish(&self, channel: ChannelHandle) {
        if let Some(record) = self.state.lock().channels.get_mut(&channel.0) {
            record.playing = false;
            record.paused = false;
        }
    }

    /// Finish every non-looping channel
    pub fn finish_all(&self) {
        for record in self.state.lock().channels.values_mut() {
            if !record.looping {
                record.playing = false;
                record.paused = false;
            }
        }
    }

    pub fn channel(&self, channel: ChannelHandle) -> Option<ChannelRecord> {
        self.state.lock().channels.get(&channel.0).cloned()
    }

    /// Channels currently playing or paused, in creation order
    pub fn active_channels(&self) -> Vec<ChannelHandle> {
        let state = self.state.lock();
        let mut ids: Vec<u64> = state
            .channels
            .iter()
            .filter(|(_, r)| r.playing)
            .map(|(&id, _)| id)
            .collect();
        ids.sort_unstable();
        ids.into_iter().map(ChannelHandle).collect()
    }

    /// Byte length of a live sound
    pub fn sound_len(&self, sound: SoundHandle) -> Option<usize> {
        self.state.lock().sounds.get(&sound.0).copied()
    }

    pub fn live_sounds(&self) -> usize {
        self.state.lock().sounds.len()
    }

    pub fn sounds_created(&self) -> usize {
        self.state.lock().sounds_created
    }

    pub fn sounds_released(&self) -> usize {
        self.state.lock().sounds_released
    }

    pub fn play_count(&self) -> usize {
        self.state.lock().plays
    }

    pub fn update_count(&self) -> usize {
        self.state.lock().updates
    }

    pub fn reset_count(&self) -> usize {
        self.state.lock().resets
    }
}

impl AudioBackend for MemoryBackend {
    fn create_sound(&mut self, bytes: &[u8]) -> BackendResult<SoundHandle> {
        let mut state = self.state.lock();
        state.check()?;
        let id = state.next_id();
        state.sounds.insert(id, bytes.len());
        state.sounds_created += 1;
        Ok(SoundHandle(id))
    }

    fn release_sound(&mut self, sound: SoundHandle) -> BackendResult<()> {
        let mut state = self.state.lock();
        state
            .sounds
            .remove(&sound.0)
            .ok_or(BackendError::InvalidSound(sound.0))?;
        state.sounds_released += 1;
        // Channels die with their sound
        for record in state.channels.values_mut() {
            if record.sound == sound {
                record.playing = false;
                record.paused = false;
            }
        }
        Ok(())
    }

    fn play(&mut self, sound: SoundHandle, looping: bool) -> BackendResult<ChannelHandle> {
        let mut state = self.state.lock();
        state.check()?;
        if !state.sounds.contains_key(&sound.0) {
            return Err(BackendError::InvalidSound(sound.0));
        }
        let id = state.next_id();
        state.channels.insert(
            id,
            ChannelRecord {
                sound,
                looping,
                playing: true,
                paused: false,
                params: None,
            },
        );
        state.plays += 1;
        Ok(ChannelHandle(id))
    }

    fn stop(&mut self, channel: ChannelHandle) -> BackendResult<()> {
        let mut state = self.state.lock();
        let record = state.channel_mut(channel)?;
        record.playing = false;
        record.paused = false;
        Ok(())
    }

    fn set_paused(&mut self, channel: ChannelHandle, paused: bool) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.check()?;
        let record = state.channel_mut(channel)?;
        if record.playing {
            record.paused = paused;
        }
        Ok(())
    }

    fn is_playing(&self, channel: ChannelHandle) -> bool {
        self.state
            .lock()
            .channels
            .get(&channel.0)
            .is_some_and(|r| r.playing)
    }

    fn is_paused(&self, channel: ChannelHandle) -> bool {
        self.state
            .lock()
            .channels
            .get(&channel.0)
            .is_some_and(|r| r.playing && r.paused)
    }

    fn apply(&mut self, channel: ChannelHandle, params: &VoiceParams) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.check()?;
        state.channel_mut(channel)?.params = Some(*params);
        Ok(())
    }

    fn update(&mut self) -> BackendResult<()> {
        self.state.lock().updates += 1;
        Ok(())
    }

    fn reset(&mut self) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.channels.clear();
        state.sounds.clear();
        state.resets += 1;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
