//! Playing Voices
//!
//! A voice is the live realization of one sound for one play:
//!
//! ```text
//! reroll ──► start ──► update (every tick) ──► stop / natural end
//!   │          │          │
//!   │          │          ├─ start streams that finished reading
//!   │          │          ├─ evaluate RPC curves → RpcMix
//!   │          │          └─ push VoiceParams to every live channel
//!   │          └─ resident tracks play now, streamed tracks queue a read
//!   └─ per track: pick a wave, roll volume/pitch variance
//! ```
//!
//! Lock order: voice, then backend. The I/O thread never locks either.

use std::sync::{Arc, Weak};

use cb_core::{clamp_channel_volume, db_to_gain};
use parking_lot::Mutex;

use crate::backend::{AudioBackend, ChannelHandle, LogBackendError, SoundHandle, VoiceParams};
use crate::cue::CueVariables;
use crate::engine::AudioEngine;
use crate::settings::{RpcCurve, RpcParameter, VariableSource};
use crate::sound::{SoundDefinition, TrackDefinition};
use crate::sound_bank::SoundBankShared;
use crate::stream::{StreamBuffer, StreamRead};
use crate::wave_bank::{ResidentWave, WaveSource};

/// Filter cutoff meaning "no filtering" (Hz)
pub const FILTER_OPEN_HZ: f32 = 20000.0;

/// Reverb level meaning "dry"
pub const NO_REVERB: f32 = -10000.0;

// ═══════════════════════════════════════════════════════════════════════════════
// PARAMETER PIPELINE
// ═══════════════════════════════════════════════════════════════════════════════

/// Combined output of a sound's RPC curves
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RpcMix {
    /// Weighted sum of volume curves (dB * 100)
    pub volume_centibels: f32,
    /// Most restrictive filter curve (Hz)
    pub filter_cutoff: f32,
    /// Last reverb curve
    pub reverb: f32,
}

impl Default for RpcMix {
    fn default() -> Self {
        Self {
            volume_centibels: 0.0,
            filter_cutoff: FILTER_OPEN_HZ,
            reverb: NO_REVERB,
        }
    }
}

impl RpcMix {
    /// Evaluate every curve against the cue's variables
    ///
    /// Curves bound to a variable the cue cannot provide are skipped.
    pub fn evaluate(curves: &[Arc<RpcCurve>], cue: &dyn VariableSource, volume_weight: f32) -> Self {
        let mut mix = Self::default();
        for curve in curves {
            let value = match curve.value(cue) {
                Ok(value) => value,
                Err(e) => {
                    log::debug!("[Voice] skipping curve '{}': {}", curve.name(), e);
                    continue;
                }
            };
            match curve.parameter() {
                RpcParameter::Volume => mix.volume_centibels += volume_weight * value,
                RpcParameter::Filter => mix.filter_cutoff = mix.filter_cutoff.min(value),
                RpcParameter::Reverb => mix.reverb = value,
            }
        }
        mix
    }
}

/// Parameters for one track of a playing sound
///
/// `volume_variance` (dB) and `pitch_variance` (semitones) are the values
/// rolled when the voice started.
pub fn mix_track(
    sound: &SoundDefinition,
    track: &TrackDefinition,
    volume_variance: f32,
    pitch_variance: f32,
    mix: &RpcMix,
) -> VoiceParams {
    let db = mix.volume_centibels / 100.0 + volume_variance;
    let volume = sound.gain() * sound.category.gain() * db_to_gain(db);
    let cutoff = match track.filter_cutoff() {
        Some(frequency) => mix.filter_cutoff.min(frequency),
        None => mix.filter_cutoff,
    };
    VoiceParams {
        volume: clamp_channel_volume(volume),
        low_pass_cutoff: cutoff,
        pitch_semitones: pitch_variance + sound.pitch_semitones(),
        reverb: mix.reverb,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRACK VOICE
// ═══════════════════════════════════════════════════════════════════════════════

/// Runtime state of one track
#[derive(Debug, Default)]
struct TrackVoice {
    source: Option<WaveSource>,
    volume_variance: f32,
    pitch_variance: f32,
    channel: Option<ChannelHandle>,
    /// Read in flight for a streamed entry
    stream: Option<Arc<StreamRead>>,
    /// Streamed bytes backing `owned_sound`
    stream_buffer: Option<StreamBuffer>,
    /// Sound created for this voice alone
    owned_sound: Option<SoundHandle>,
}

impl TrackVoice {
    /// Playing, paused, or waiting on a stream read
    fn is_active(&self, backend: &dyn AudioBackend) -> bool {
        self.stream.as_ref().is_some_and(|s| !s.is_failed())
            || self.channel.is_some_and(|c| backend.is_playing(c))
    }

    fn release(&mut self, backend: &mut dyn AudioBackend) {
        if let Some(stream) = self.stream.take() {
            stream.abort();
        }
        if let Some(channel) = self.channel.take() {
            if backend.is_playing(channel) {
                backend.stop(channel).logged("stop");
            }
        }
        if let Some(sound) = self.owned_sound.take() {
            backend.release_sound(sound).logged("release_sound");
        }
        self.stream_buffer = None;
    }

    fn holds_backend_resources(&self) -> bool {
        self.channel.is_some() || self.owned_sound.is_some()
    }
}

/// What a finished stream read starts playing
enum StreamStart {
    Resident(Arc<ResidentWave>),
    Owned(StreamBuffer),
}

// ═══════════════════════════════════════════════════════════════════════════════
// PLAYING VOICE
// ═══════════════════════════════════════════════════════════════════════════════

/// Voice lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Idle,
    Playing,
    Paused,
    Stopped,
    Disposed,
}

pub(crate) struct PlayingVoice {
    engine: AudioEngine,
    bank: Weak<SoundBankShared>,
    sound: Arc<SoundDefinition>,
    variables: CueVariables,
    tracks: Vec<TrackVoice>,
    state: VoiceState,
    /// Registered in the bank's updating set
    updating: bool,
}

impl PlayingVoice {
    /// Pick a wave and roll variances for every track
    fn reroll(&mut self) {
        let engine = self.engine.clone();
        let mut rng = engine.rng();
        let tracks: Vec<TrackVoice> = self
            .sound
            .tracks
            .iter()
            .map(|def| {
                let source = def.select(&mut **rng).and_then(|wave| {
                    engine
                        .loaded_wave_bank(&wave.bank_name)
                        .and_then(|bank| bank.resolve(wave.index))
                });
                TrackVoice {
                    source,
                    volume_variance: def.roll_volume(&mut **rng),
                    pitch_variance: def.roll_pitch(&mut **rng),
                    ..Default::default()
                }
            })
            .collect();
        drop(rng);
        self.tracks = tracks;
    }

    /// Start every resolved track
    fn start(&mut self) {
        let engine = self.engine.clone();

        for track in &mut self.tracks {
            if let Some(WaveSource::Stream { path, size, .. }) = &track.source {
                track.stream = Some(StreamRead::start(
                    engine.io(),
                    engine.stream_pool(),
                    path.clone(),
                    *size,
                ));
            }
        }

        let mut backend = engine.backend();
        for (def, track) in self.sound.tracks.iter().zip(&mut self.tracks) {
            match &track.source {
                Some(WaveSource::Resident(wave)) => {
                    if let Some(sound) = wave.sound(&mut **backend) {
                        track.channel = backend.play(sound, def.is_looping()).logged("play");
                    }
                }
                Some(WaveSource::Stream { .. }) => {}
                None => log::debug!("[Voice] track has no wave, bank probably still streaming"),
            }
        }
    }

    /// Take finished stream reads, promoting persistent entries
    fn collect_streams(&mut self, retired: &mut Vec<WaveSource>) -> Vec<(usize, StreamStart)> {
        let mut starts = Vec::new();
        for (i, track) in self.tracks.iter_mut().enumerate() {
            let Some(read) = &track.stream else { continue };
            if let Some(buffer) = read.take() {
                track.stream = None;
                let promoted = match &track.source {
                    Some(WaveSource::Stream {
                        bank,
                        index,
                        persist: true,
                        ..
                    }) => bank.promote(*index, buffer.as_slice().to_vec()),
                    _ => None,
                };
                match promoted {
                    Some(wave) => {
                        if let Some(old) = track.source.replace(WaveSource::Resident(Arc::clone(&wave))) {
                            retired.push(old);
                        }
                        starts.push((i, StreamStart::Resident(wave)));
                    }
                    None => starts.push((i, StreamStart::Owned(buffer))),
                }
            } else if read.is_failed() || read.is_aborted() {
                track.stream = None;
            }
        }
        starts
    }

    /// Refresh parameters; returns true while any track is live
    ///
    /// Finished stream reads are only started when `start_streams` is set,
    /// so a streamed track never starts within the play call itself.
    fn refresh(&mut self, retired: &mut Vec<WaveSource>, start_streams: bool) -> bool {
        if self.state != VoiceState::Playing {
            return false;
        }

        let starts = if start_streams {
            self.collect_streams(retired)
        } else {
            Vec::new()
        };
        let mix = RpcMix::evaluate(
            &self.sound.rpcs,
            &self.variables,
            self.engine.config().rpc_volume_weight,
        );

        let engine = self.engine.clone();
        let mut backend = engine.backend();

        for (i, start) in starts {
            let looping = self.sound.tracks[i].is_looping();
            let track = &mut self.tracks[i];
            let sound = match start {
                StreamStart::Resident(wave) => wave.sound(&mut **backend),
                StreamStart::Owned(buffer) => {
                    let sound = backend
                        .create_sound(buffer.as_slice())
                        .logged("create_sound");
                    track.owned_sound = sound;
                    track.stream_buffer = Some(buffer);
                    sound
                }
            };
            if let Some(sound) = sound {
                track.channel = backend.play(sound, looping).logged("play");
            }
        }

        let mut live = false;
        for (def, track) in self.sound.tracks.iter().zip(&self.tracks) {
            if !track.is_active(&**backend) {
                continue;
            }
            live = true;
            if let Some(channel) = track.channel {
                let params = mix_track(
                    &self.sound,
                    def,
                    track.volume_variance,
                    track.pitch_variance,
                    &mix,
                );
                backend.apply(channel, &params).logged("apply");
            }
        }

        if !live {
            // Natural completion
            for track in &mut self.tracks {
                track.release(&mut **backend);
            }
            self.state = VoiceState::Stopped;
        }
        live
    }

    fn release_tracks(&mut self) {
        let engine = self.engine.clone();
        let mut backend = engine.backend();
        for track in &mut self.tracks {
            track.release(&mut **backend);
        }
    }

    fn set_channels_paused(&mut self, paused: bool) {
        let engine = self.engine.clone();
        let mut backend = engine.backend();
        for track in &self.tracks {
            if let Some(channel) = track.channel {
                if backend.is_playing(channel) {
                    backend.set_paused(channel, paused).logged("set_paused");
                }
            }
        }
    }

    fn active_tracks(&self) -> Vec<usize> {
        let backend = self.engine.backend();
        self.tracks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_active(&**backend))
            .map(|(i, _)| i)
            .collect()
    }
}

impl Drop for PlayingVoice {
    fn drop(&mut self) {
        for track in &mut self.tracks {
            if let Some(stream) = track.stream.take() {
                stream.abort();
            }
        }
        if !self.tracks.iter().any(TrackVoice::holds_backend_resources) {
            return;
        }
        match self.engine.try_backend() {
            Some(mut backend) => {
                for track in &mut self.tracks {
                    track.release(&mut **backend);
                }
            }
            None => log::warn!("[Voice] dropped while the backend was busy, channels not stopped"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VOICE HANDLE
// ═══════════════════════════════════════════════════════════════════════════════

/// Shared handle to a playing voice
#[derive(Clone)]
pub(crate) struct Voice(Arc<Mutex<PlayingVoice>>);

impl Voice {
    pub(crate) fn new(
        engine: &AudioEngine,
        bank: Weak<SoundBankShared>,
        sound: Arc<SoundDefinition>,
        variables: CueVariables,
    ) -> Self {
        let voice = Self(Arc::new(Mutex::new(PlayingVoice {
            engine: engine.clone(),
            bank,
            sound,
            variables,
            tracks: Vec::new(),
            state: VoiceState::Idle,
            updating: false,
        })));
        engine.register_voice(voice.downgrade());
        voice
    }

    pub(crate) fn from_weak(weak: &Weak<Mutex<PlayingVoice>>) -> Option<Self> {
        weak.upgrade().map(Self)
    }

    pub(crate) fn downgrade(&self) -> Weak<Mutex<PlayingVoice>> {
        Arc::downgrade(&self.0)
    }

    pub(crate) fn ptr_eq(&self, other: &Voice) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Reroll, start and push initial parameters
    ///
    /// Returns the tracks that are live after starting.
    pub(crate) fn play(&self) -> Vec<usize> {
        {
            let mut voice = self.0.lock();
            if voice.state == VoiceState::Disposed {
                return Vec::new();
            }
            voice.reroll();
            voice.start();
            voice.state = VoiceState::Playing;
        }
        if !self.refresh(false) {
            return Vec::new();
        }
        self.0.lock().active_tracks()
    }

    /// Per-tick refresh; returns true while the voice is live
    pub(crate) fn update(&self) -> bool {
        self.refresh(true)
    }

    fn refresh(&self, start_streams: bool) -> bool {
        let mut retired = Vec::new();
        let live = self.0.lock().refresh(&mut retired, start_streams);
        self.set_updating(live);
        drop(retired);
        live
    }

    pub(crate) fn pause(&self) {
        {
            let mut voice = self.0.lock();
            if voice.state != VoiceState::Playing {
                return;
            }
            voice.set_channels_paused(true);
            voice.state = VoiceState::Paused;
        }
        self.set_updating(false);
    }

    pub(crate) fn resume(&self) {
        {
            let mut voice = self.0.lock();
            if voice.state != VoiceState::Paused {
                return;
            }
            voice.set_channels_paused(false);
            voice.state = VoiceState::Playing;
        }
        self.update();
    }

    pub(crate) fn stop(&self) {
        {
            let mut voice = self.0.lock();
            if matches!(voice.state, VoiceState::Disposed | VoiceState::Stopped) {
                return;
            }
            voice.release_tracks();
            voice.state = VoiceState::Stopped;
        }
        self.set_updating(false);
    }

    pub(crate) fn dispose(&self) {
        {
            let mut voice = self.0.lock();
            if voice.state == VoiceState::Disposed {
                return;
            }
            voice.release_tracks();
            voice.state = VoiceState::Disposed;
        }
        self.set_updating(false);
    }

    pub(crate) fn state(&self) -> VoiceState {
        self.0.lock().state
    }

    /// Any track playing or waiting on a stream
    pub(crate) fn is_playing(&self) -> bool {
        let voice = self.0.lock();
        matches!(voice.state, VoiceState::Playing | VoiceState::Paused)
            && !voice.active_tracks().is_empty()
    }

    pub(crate) fn track_is_active(&self, track: usize) -> bool {
        let voice = self.0.lock();
        if !matches!(voice.state, VoiceState::Playing | VoiceState::Paused) {
            return false;
        }
        let backend = voice.engine.backend();
        voice
            .tracks
            .get(track)
            .is_some_and(|t| t.is_active(&**backend))
    }

    fn set_updating(&self, wanted: bool) {
        let bank = {
            let mut voice = self.0.lock();
            if voice.updating == wanted {
                return;
            }
            voice.updating = wanted;
            voice.bank.clone()
        };
        if let Some(bank) = bank.upgrade() {
            if wanted {
                if !bank.register(self.clone()) {
                    self.0.lock().updating = false;
                }
            } else {
                bank.deregister(self);
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
