//! Cue-based audio playback engine
//!
//! Loads compiled audio projects and plays them through a pluggable
//! backend:
//! - Global settings: categories, variables and RPC curves
//! - Wave banks, resident or streamed from per-entry files
//! - Sound banks: sounds, tracks and cues
//! - Cue playback with variation selection and instance limits
//! - Per-tick parameter pipeline (category, RPC, variance)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      CUE ENGINE ARCHITECTURE                     │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │   Control Thread                       I/O Thread                │
//! │   ┌─────────────────┐                ┌─────────────────┐        │
//! │   │ WaveBank::new() │───load job────▶│ IoWorker        │        │
//! │   │ Cue::play()     │                │ bank files      │        │
//! │   │ engine.tick()   │───stream read─▶│ stream entries  │        │
//! │   └────────┬────────┘                └────────┬────────┘        │
//! │            │                                  │                  │
//! │            ▼                                  ▼                  │
//! │   ┌─────────────────┐                ┌─────────────────┐        │
//! │   │ PlayingVoice    │◀──StreamRead───│ StreamBufferPool│        │
//! │   │ tracks/params   │                │ 2 slots + heap  │        │
//! │   └────────┬────────┘                └─────────────────┘        │
//! │            │                                                     │
//! │            ▼                                                     │
//! │   ┌─────────────────┐                                           │
//! │   │ AudioBackend    │  sounds, channels, volume/filter/pitch    │
//! │   └─────────────────┘                                           │
//! │                                                                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cb_cue::{AudioEngine, EngineConfig, MemoryBackend, SoundBank, WaveBank};
//!
//! let engine = AudioEngine::new("Game.xgs", EngineConfig::default(), Box::new(MemoryBackend::new()))?;
//! let _waves = WaveBank::new(&engine, "Sfx.xwb");
//! let sounds = SoundBank::new(&engine, "Sfx.xsb")?;
//!
//! if let Some(mut cue) = sounds.get_cue("Explosion") {
//!     cue.apply_3d([0.0; 3], [10.0, 0.0, 0.0]);
//!     cue.play();
//! }
//!
//! // Once per frame
//! engine.tick();
//! ```

#![allow(clippy::new_without_default)]

pub mod backend;
pub mod config;
pub mod cue;
pub mod engine;
pub mod selection;
pub mod settings;
pub mod sound;
pub mod sound_bank;
pub mod stream;
pub mod voice;
pub mod wave_bank;

// Re-exports
pub use backend::{
    AudioBackend, BackendError, BackendResult, ChannelHandle, ChannelRecord, MemoryBackend,
    SoundHandle, VoiceParams,
};
pub use config::{
    DEFAULT_CATEGORY_VOLUME_BOOST, DEFAULT_RPC_VOLUME_WEIGHT, DEFAULT_STREAM_BUFFER_SIZE,
    DEFAULT_STREAM_EXTENSION, DEFAULT_STREAM_POOL_SLOTS, EngineConfig,
};
pub use cue::{Cue, CueDefinition, CueVariables, UNLIMITED_INSTANCES, adaptive_instance_cap};
pub use engine::AudioEngine;
pub use selection::{SelectionCursor, VariationMode};
pub use settings::{
    AudioCategory, GlobalSettings, RpcCurve, RpcCurveKind, RpcParameter, RpcPoint, Variable,
    VariableSource,
};
pub use sound::{INFINITE_LOOP_COUNT, SoundDefinition, TrackDefinition, WaveRef};
pub use sound_bank::{SoundBank, SoundBankData};
pub use stream::{IoWorker, StreamBuffer, StreamBufferPool, StreamRead};
pub use voice::{FILTER_OPEN_HZ, NO_REVERB, RpcMix, VoiceState, mix_track};
pub use wave_bank::{
    ResidentWave, StreamMode, WaveBank, WaveBankState, WaveSource, encode_streaming_wave_bank,
    encode_wave_bank,
};

pub use cb_core::{CueError, CueResult};
