//! Shared fixtures: a small project written to a temp directory
//!
//! Layout:
//! - `Game.xgs`: categories Default/Music, variables Distance/Intensity,
//!   three curves
//! - `Effects.xwb`: resident, entries of 10/20/30 bytes
//! - `Music.xwb` + `Streaming/<i>.mp3`: streamed, entries of 100 bytes
//! - `Sfx.xsb`: one sound per entry plus layered, looping, curve-driven
//!   and streamed sounds, with a cue per scenario

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cb_cue::{
    AudioCategory, AudioEngine, ChannelHandle, CueDefinition, EngineConfig, GlobalSettings,
    MemoryBackend, RpcCurve, RpcCurveKind, RpcParameter, RpcPoint, SoundBank, SoundBankData,
    SoundDefinition, StreamMode, TrackDefinition, UNLIMITED_INSTANCES, Variable, VariationMode,
    WaveBank, WaveRef, encode_streaming_wave_bank, encode_wave_bank,
};
use tempfile::TempDir;

/// Resident entry sizes; a channel's sound length identifies its entry
pub const EFFECT_SIZES: [usize; 3] = [10, 20, 30];

/// Size of every streamed entry
pub const STREAM_ENTRY_SIZE: usize = 100;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ═══════════════════════════════════════════════════════════════════════════════
// DEFINITIONS
// ═══════════════════════════════════════════════════════════════════════════════

pub fn settings() -> GlobalSettings {
    let distance = Arc::new(Variable::new("Distance", false, 0.0, 1000.0));
    let intensity = Arc::new(Variable::new("Intensity", true, 0.0, 1.0));

    let curves = vec![
        RpcCurve::new(
            "DistanceAtten",
            Arc::clone(&distance),
            vec![
                RpcPoint::new(0.0, 0.0, RpcCurveKind::Linear),
                RpcPoint::new(100.0, -1000.0, RpcCurveKind::Linear),
            ],
            RpcParameter::Volume,
        ),
        RpcCurve::new(
            "DistanceFilter",
            Arc::clone(&distance),
            vec![
                RpcPoint::new(0.0, 20000.0, RpcCurveKind::Linear),
                RpcPoint::new(100.0, 2000.0, RpcCurveKind::Linear),
            ],
            RpcParameter::Filter,
        ),
        RpcCurve::new(
            "IntensityReverb",
            Arc::clone(&intensity),
            vec![
                RpcPoint::new(0.0, -10000.0, RpcCurveKind::Linear),
                RpcPoint::new(1.0, 0.0, RpcCurveKind::Linear),
            ],
            RpcParameter::Reverb,
        ),
    ];

    GlobalSettings {
        categories: vec![
            Arc::new(AudioCategory::new("Default", 0, 2.5)),
            Arc::new(AudioCategory::new("Music", -600, 2.5)),
        ],
        variables: vec![distance, intensity],
        curves: curves
            .into_iter()
            .map(|c| c.map(Arc::new))
            .collect::<Result<_, _>>()
            .unwrap(),
    }
}

fn track(bank: &str, index: usize) -> TrackDefinition {
    TrackDefinition::new(vec![WaveRef {
        bank_name: bank.to_string(),
        index,
        weight: 1,
    }])
}

/// Sound indices in the fixture bank
pub mod sound {
    pub const EFFECT_0: usize = 0;
    pub const EFFECT_1: usize = 1;
    pub const EFFECT_2: usize = 2;
    pub const LAYERED: usize = 3;
    pub const ATTENUATED: usize = 4;
    pub const LOOPING: usize = 5;
    pub const STREAMED: usize = 6;
    pub const MUSIC: usize = 7;
}

pub fn sound_bank_data(settings: &GlobalSettings) -> SoundBankData {
    let default = Arc::clone(settings.category("Default").unwrap());
    let music = Arc::clone(settings.category("Music").unwrap());

    let mut attenuated = SoundDefinition::new(Arc::clone(&default), vec![track("Effects", 0)]);
    attenuated.rpcs = ["DistanceAtten", "DistanceFilter", "IntensityReverb"]
        .iter()
        .map(|name| Arc::clone(settings.curve(name).unwrap()))
        .collect();

    let sounds: Vec<Arc<SoundDefinition>> = vec![
        SoundDefinition::new(Arc::clone(&default), vec![track("Effects", 0)]),
        SoundDefinition::new(Arc::clone(&default), vec![track("Effects", 1)]),
        SoundDefinition::new(Arc::clone(&default), vec![track("Effects", 2)]),
        SoundDefinition::new(
            Arc::clone(&default),
            vec![track("Effects", 0), track("Effects", 1)],
        ),
        attenuated,
        SoundDefinition::new(
            Arc::clone(&default),
            vec![track("Effects", 2).with_loop_count(cb_cue::INFINITE_LOOP_COUNT)],
        ),
        SoundDefinition::new(Arc::clone(&default), vec![track("Music", 0)]),
        SoundDefinition::new(music, vec![track("Effects", 1)]),
    ]
    .into_iter()
    .map(Arc::new)
    .collect();

    let cue = |name: &str, indices: Vec<usize>, variation, max| {
        Arc::new(CueDefinition::new(name, indices, &sounds, variation, max).unwrap())
    };
    let effects = vec![sound::EFFECT_0, sound::EFFECT_1, sound::EFFECT_2];
    let cues = vec![
        cue("Ordered", effects.clone(), VariationMode::Ordered, UNLIMITED_INSTANCES),
        cue("Random", effects.clone(), VariationMode::Random, UNLIMITED_INSTANCES),
        cue(
            "NoRepeat",
            effects.clone(),
            VariationMode::RandomNoImmediateRepeat,
            UNLIMITED_INSTANCES,
        ),
        cue("Shuffle", effects, VariationMode::Shuffle, UNLIMITED_INSTANCES),
        cue("Single", vec![sound::EFFECT_0], VariationMode::Ordered, 1),
        cue("Layered", vec![sound::LAYERED], VariationMode::Ordered, 1),
        cue("Attenuated", vec![sound::ATTENUATED], VariationMode::Ordered, UNLIMITED_INSTANCES),
        cue("Loop", vec![sound::LOOPING], VariationMode::Ordered, UNLIMITED_INSTANCES),
        cue("Stream", vec![sound::STREAMED], VariationMode::Ordered, UNLIMITED_INSTANCES),
        cue("StreamSingle", vec![sound::STREAMED], VariationMode::Ordered, 1),
        cue("Music", vec![sound::MUSIC], VariationMode::Ordered, UNLIMITED_INSTANCES),
    ];

    SoundBankData { sounds, cues }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROJECT
// ═══════════════════════════════════════════════════════════════════════════════

/// Engine plus files on disk; banks are opened on demand
pub struct Project {
    pub dir: TempDir,
    pub backend: MemoryBackend,
    pub engine: AudioEngine,
}

impl Project {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        init_logging();
        let dir = tempfile::tempdir().unwrap();
        let settings = settings();

        std::fs::write(dir.path().join("Game.xgs"), settings.encode()).unwrap();
        std::fs::write(
            dir.path().join("Sfx.xsb"),
            sound_bank_data(&settings).encode(),
        )
        .unwrap();

        let payloads: Vec<Vec<u8>> = EFFECT_SIZES
            .iter()
            .enumerate()
            .map(|(i, &size)| vec![i as u8; size])
            .collect();
        std::fs::write(dir.path().join("Effects.xwb"), encode_wave_bank(&payloads)).unwrap();

        let sizes = [STREAM_ENTRY_SIZE; 2];
        std::fs::write(dir.path().join("Music.xwb"), encode_streaming_wave_bank(&sizes)).unwrap();
        for mode in [StreamMode::Streaming, StreamMode::Deferred] {
            let folder = dir.path().join(mode.folder());
            std::fs::create_dir_all(&folder).unwrap();
            for i in 0..sizes.len() {
                std::fs::write(folder.join(format!("{}.mp3", i)), vec![0xAB; STREAM_ENTRY_SIZE])
                    .unwrap();
            }
        }

        let backend = MemoryBackend::new();
        let engine = AudioEngine::new(
            dir.path().join("Game.xgs"),
            config.with_seed(7),
            Box::new(backend.clone()),
        )
        .unwrap();

        Self {
            dir,
            backend,
            engine,
        }
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.dir.path().join(file)
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Resident effects bank, loaded
    pub fn effects(&self) -> WaveBank {
        let bank = WaveBank::new(&self.engine, self.path("Effects.xwb"));
        self.engine.wait_for_io();
        assert!(bank.is_loaded());
        bank
    }

    /// Streamed music bank, size table loaded
    pub fn music(&self, mode: StreamMode) -> WaveBank {
        let bank = WaveBank::streaming(&self.engine, self.path("Music.xwb"), mode);
        self.engine.wait_for_io();
        assert!(bank.is_loaded());
        bank
    }

    pub fn sounds(&self) -> SoundBank {
        SoundBank::new(&self.engine, self.path("Sfx.xsb")).unwrap()
    }

    /// Entry index of the resident sound a channel plays
    pub fn effect_on(&self, channel: ChannelHandle) -> usize {
        let record = self.backend.channel(channel).unwrap();
        let len = self.backend.sound_len(record.sound).unwrap();
        EFFECT_SIZES.iter().position(|&s| s == len).unwrap()
    }

    /// Entry index of the single playing channel
    pub fn playing_effect(&self) -> usize {
        let channels = self.backend.active_channels();
        assert_eq!(channels.len(), 1, "expected exactly one playing channel");
        self.effect_on(channels[0])
    }
}
