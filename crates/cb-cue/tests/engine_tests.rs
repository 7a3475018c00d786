//! AudioEngine and bank loading integration tests
//!
//! Tests for:
//! - Settings and sound bank files on disk (load, errors, re-encode)
//! - Wave/sound bank registries
//! - Backend reset and engine dispose

mod common;

use std::sync::Arc;

use cb_core::BankWriter;
use cb_cue::{
    AudioEngine, CueError, EngineConfig, MemoryBackend, RpcParameter, SoundBank, SoundBankData,
    VariationMode, WaveBank, WaveBankState,
};
use common::{Project, settings, sound_bank_data};

// ═══════════════════════════════════════════════════════════════════════════════
// SETTINGS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_engine_loads_settings_file() {
    let project = Project::new();
    let engine = &project.engine;

    assert_eq!(engine.settings().categories.len(), 2);
    assert_eq!(engine.settings().variables.len(), 2);
    assert_eq!(
        engine.rpc("DistanceAtten").unwrap().parameter(),
        RpcParameter::Volume
    );
    assert_eq!(engine.category("Music").unwrap().name(), "Music");
    assert!(matches!(
        engine.category("Voice"),
        Err(CueError::NotFound { .. })
    ));
}

#[test]
fn test_settings_file_round_trips() {
    let project = Project::new();
    let bytes = std::fs::read(project.path("Game.xgs")).unwrap();
    assert_eq!(project.engine.settings().encode(), bytes);
}

#[test]
fn test_missing_settings_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = AudioEngine::new(
        dir.path().join("Missing.xgs"),
        EngineConfig::default(),
        Box::new(MemoryBackend::new()),
    );
    assert!(matches!(result, Err(CueError::Io(_))));
}

#[test]
fn test_settings_version_mismatch() {
    let mut writer = BankWriter::new();
    writer.write_i32(2).write_count(0);
    let result = AudioEngine::from_bytes(
        writer.as_bytes(),
        EngineConfig::default(),
        Box::new(MemoryBackend::new()),
    );
    match result {
        Err(CueError::FormatVersion {
            expected, found, ..
        }) => {
            assert_eq!(expected, 1);
            assert_eq!(found, 2);
        }
        other => panic!("expected version error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_global_variable_drives_curves() {
    let project = Project::new();
    project
        .engine
        .set_global_variable("Intensity", 0.25)
        .unwrap();
    assert_eq!(project.engine.global_variable("Intensity").unwrap(), 0.25);

    let curve = project.engine.rpc("IntensityReverb").unwrap();
    // Global variables ignore the cue's own values
    let cue_values = cb_cue::CueVariables::default();
    assert_eq!(curve.value(&cue_values).unwrap(), -7500.0);

    assert!(matches!(
        project.engine.set_global_variable("Distance", 1.0),
        Err(CueError::InvalidOperation(_))
    ));
}

// ═══════════════════════════════════════════════════════════════════════════════
// SOUND BANKS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_sound_bank_loads_and_round_trips() {
    let project = Project::new();
    let bank = project.sounds();

    assert_eq!(bank.name(), "Sfx");
    assert_eq!(bank.sounds().len(), 8);
    assert_eq!(bank.cues().len(), 11);
    assert_eq!(bank.sounds()[4].rpcs.len(), 3);
    // Sounds share the engine's category objects
    assert!(Arc::ptr_eq(
        &bank.sounds()[7].category,
        &project.engine.category("Music").unwrap()
    ));

    let bytes = std::fs::read(project.path("Sfx.xsb")).unwrap();
    assert_eq!(bank.encode(), bytes);
}

#[test]
fn test_sound_bank_unresolved_category() {
    let project = Project::new();
    let mut reduced = settings();
    reduced.categories.retain(|c| c.name() != "Music");
    let engine = AudioEngine::from_settings(
        reduced,
        EngineConfig::default().with_seed(1),
        Box::new(MemoryBackend::new()),
    );

    let bytes = std::fs::read(project.path("Sfx.xsb")).unwrap();
    match SoundBank::from_bytes(&engine, "Sfx", &bytes) {
        Err(CueError::UnresolvedReference { kind, name }) => {
            assert_eq!(kind, "category");
            assert_eq!(name, "Music");
        }
        other => panic!("expected unresolved category, got {:?}", other.map(|_| ())),
    }
    assert!(engine.sound_banks().is_empty());
}

#[test]
fn test_sound_bank_unresolved_curve() {
    let mut reduced = settings();
    reduced.curves.retain(|c| c.name() != "DistanceFilter");
    let bytes = sound_bank_data(&settings()).encode();

    assert!(matches!(
        SoundBankData::parse(&bytes, &reduced),
        Err(CueError::UnresolvedReference {
            kind: "RPC curve",
            ..
        })
    ));
}

#[test]
fn test_sound_bank_bad_cue_index() {
    let mut writer = BankWriter::new();
    writer
        .write_i32(4)
        .write_count(0)
        .write_count(1)
        .write_string("Broken")
        .write_i32(0)
        .write_count(1)
        .write_i32(3)
        .write_i32(-1);

    match SoundBankData::parse(writer.as_bytes(), &settings()) {
        Err(CueError::IndexOutOfRange { index, len, .. }) => {
            assert_eq!(index, 3);
            assert_eq!(len, 0);
        }
        other => panic!("expected index error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_truncated_sound_bank() {
    let mut bytes = sound_bank_data(&settings()).encode();
    bytes.truncate(bytes.len() / 2);
    let err = SoundBankData::parse(&bytes, &settings()).unwrap_err();
    assert!(matches!(err, CueError::Truncated { .. }));
    assert!(err.is_content_error());
}

#[test]
fn test_oversized_sound_count_is_truncated() {
    let mut writer = BankWriter::new();
    writer.write_i32(4).write_i32(i32::MAX).write_i32(0);

    match SoundBankData::parse(writer.as_bytes(), &settings()) {
        Err(CueError::Truncated { needed, available, .. }) => {
            assert_eq!(available, 4);
            assert!(needed > available);
        }
        other => panic!("expected truncation, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_oversized_cue_sound_count_is_truncated() {
    let mut writer = BankWriter::new();
    writer
        .write_i32(4)
        .write_count(0)
        .write_count(1)
        .write_string("Huge")
        .write_i32(0)
        .write_i32(i32::MAX)
        .write_i32(-1);

    let err = SoundBankData::parse(writer.as_bytes(), &settings()).unwrap_err();
    assert!(matches!(err, CueError::Truncated { .. }));
}

/// Offset of the variation code stored right after a cue's name
fn variation_offset(bytes: &[u8], cue: &str) -> usize {
    let mut needle = (cue.len() as i16).to_le_bytes().to_vec();
    needle.extend_from_slice(cue.as_bytes());
    let start = bytes
        .windows(needle.len())
        .position(|window| window == needle.as_slice())
        .unwrap();
    start + needle.len()
}

#[test]
fn test_sound_bank_tolerates_stored_variation_codes() {
    let mut bytes = sound_bank_data(&settings()).encode();
    let single = variation_offset(&bytes, "Single");
    bytes[single..single + 4].copy_from_slice(&1i32.to_le_bytes());
    let ordered = variation_offset(&bytes, "Ordered");
    bytes[ordered..ordered + 4].copy_from_slice(&7i32.to_le_bytes());

    let data = SoundBankData::parse(&bytes, &settings()).unwrap();
    let cue = |name: &str| data.cues.iter().find(|cue| cue.name() == name).unwrap();
    assert_eq!(cue("Single").variation(), VariationMode::Ordered);
    assert_eq!(cue("Ordered").variation(), VariationMode::Ordered);
    assert_eq!(cue("Shuffle").variation(), VariationMode::Shuffle);
    assert_eq!(data.encode(), bytes);
}

// ═══════════════════════════════════════════════════════════════════════════════
// REGISTRIES
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_wave_bank_registry() {
    let project = Project::new();
    let effects = project.effects();

    assert_eq!(project.engine.wave_banks().len(), 1);
    assert!(project.engine.loaded_wave_bank("Effects").is_some());
    assert!(project.engine.loaded_wave_bank("Music").is_none());

    // Dropping the last handle unloads the bank
    drop(effects);
    assert!(project.engine.wave_banks().is_empty());
}

#[test]
fn test_unloaded_bank_is_not_resolved() {
    let project = Project::new();
    let missing = WaveBank::new(&project.engine, project.path("Effects2.xwb"));
    project.engine.wait_for_io();

    assert_eq!(missing.state(), WaveBankState::NotLoaded);
    assert!(project.engine.loaded_wave_bank("Effects2").is_none());
    assert_eq!(project.engine.wave_banks().len(), 1);
}

#[test]
fn test_sound_bank_registry() {
    let project = Project::new();
    let bank = project.sounds();
    assert_eq!(project.engine.sound_banks().len(), 1);

    bank.dispose();
    assert!(bank.is_disposed());
    assert!(project.engine.sound_banks().is_empty());
    assert!(bank.get_cue("Ordered").is_none());
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESET AND DISPOSE
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_reset_backend_stops_everything() {
    let project = Project::new();
    let _effects = project.effects();
    let bank = project.sounds();

    let mut looped = bank.get_cue("Loop").unwrap();
    let mut ordered = bank.get_cue("Ordered").unwrap();
    assert!(looped.play());
    assert!(ordered.play());
    assert_eq!(project.backend.live_sounds(), 2);

    project.engine.reset_backend();
    assert_eq!(project.backend.reset_count(), 1);
    assert_eq!(project.backend.live_sounds(), 0);
    assert!(project.backend.active_channels().is_empty());
    assert!(looped.is_stopped());
    assert_eq!(project.engine.live_voice_count(), 0);

    // Shared sounds are recreated on the next play
    assert!(looped.play());
    assert_eq!(project.backend.live_sounds(), 1);
    assert_eq!(project.backend.active_channels().len(), 1);
}

#[test]
fn test_sound_bank_dispose_stops_voices() {
    let project = Project::new();
    let _effects = project.effects();
    let bank = project.sounds();

    let mut cue = bank.get_cue("Loop").unwrap();
    assert!(cue.play());
    bank.dispose();

    assert!(project.backend.active_channels().is_empty());
    assert!(!cue.play());
}

#[test]
fn test_engine_dispose() {
    let project = Project::new();
    let effects = project.effects();
    let bank = project.sounds();

    let mut looped = bank.get_cue("Loop").unwrap();
    let mut paused = bank.get_cue("Loop").unwrap();
    assert!(looped.play());
    assert!(paused.play());
    paused.pause();

    project.engine.dispose();
    project.engine.dispose();

    assert!(project.engine.is_disposed());
    assert!(bank.is_disposed());
    assert!(effects.is_disposed());
    assert!(project.backend.active_channels().is_empty());
    assert_eq!(project.backend.live_sounds(), 0);
    assert!(project.engine.sound_banks().is_empty());
    assert!(project.engine.wave_banks().is_empty());
}

#[test]
fn test_tick_reaches_backend() {
    let project = Project::new();
    for _ in 0..3 {
        project.engine.tick();
    }
    assert_eq!(project.backend.update_count(), 3);
}
