//! Streaming wave bank integration tests
//!
//! Tests for:
//! - Size-table-only loading of streaming banks
//! - Streamed playback starting on the tick after the read completes
//! - Deferred entries promoted to resident after first use
//! - Buffer pool exhaustion falling back to the heap
//! - Abort of reads whose voice stopped first

mod common;

use cb_cue::{EngineConfig, StreamMode, WaveSource};
use common::{Project, STREAM_ENTRY_SIZE};

#[test]
fn test_streaming_bank_loads_size_table_only() {
    let project = Project::new();
    let music = project.music(StreamMode::Streaming);

    assert_eq!(music.stream_mode(), Some(StreamMode::Streaming));
    assert_eq!(music.entry_count(), 2);
    assert_eq!(music.entry_size(0), Some(STREAM_ENTRY_SIZE));
    match music.resolve(1) {
        Some(WaveSource::Stream { path, persist, .. }) => {
            assert_eq!(path, project.root().join("Streaming").join("1.mp3"));
            assert!(!persist);
        }
        other => panic!("expected stream entry, got {:?}", other),
    }
}

#[test]
fn test_streamed_cue_starts_after_read() {
    let project = Project::new();
    let _music = project.music(StreamMode::Streaming);
    let bank = project.sounds();
    let mut cue = bank.get_cue("Stream").unwrap();

    assert!(cue.play());
    // Requested but not started yet
    assert!(cue.is_playing());
    assert_eq!(project.backend.play_count(), 0);

    project.engine.wait_for_io();
    project.engine.tick();

    assert_eq!(project.backend.play_count(), 1);
    let channel = project.backend.active_channels()[0];
    let record = project.backend.channel(channel).unwrap();
    assert_eq!(project.backend.sound_len(record.sound), Some(STREAM_ENTRY_SIZE));
    assert!(record.params.is_some());

    // The voice owns its streamed sound
    cue.stop();
    assert_eq!(project.backend.live_sounds(), 0);
}

#[test]
fn test_pending_stream_counts_for_admission() {
    let project = Project::new();
    let _music = project.music(StreamMode::Streaming);
    let bank = project.sounds();

    let mut a = bank.get_cue("StreamSingle").unwrap();
    let mut b = bank.get_cue("StreamSingle").unwrap();
    assert!(a.play());
    assert!(!b.play());

    project.engine.wait_for_io();
    project.engine.tick();
    assert_eq!(project.backend.play_count(), 1);
}

#[test]
fn test_streaming_entries_stay_streamed() {
    let project = Project::new();
    let music = project.music(StreamMode::Streaming);
    let bank = project.sounds();
    let mut cue = bank.get_cue("Stream").unwrap();

    assert!(cue.play());
    project.engine.wait_for_io();
    project.engine.tick();
    assert!(matches!(music.resolve(0), Some(WaveSource::Stream { .. })));
}

#[test]
fn test_deferred_entry_promoted_after_first_play() {
    let project = Project::new();
    let music = project.music(StreamMode::Deferred);
    let bank = project.sounds();

    let mut first = bank.get_cue("Stream").unwrap();
    assert!(first.play());
    project.engine.wait_for_io();
    project.engine.tick();
    assert_eq!(project.backend.play_count(), 1);
    assert!(matches!(music.resolve(0), Some(WaveSource::Resident(_))));

    // Resident now: the next play starts immediately
    let mut second = bank.get_cue("Stream").unwrap();
    assert!(second.play());
    assert_eq!(project.backend.play_count(), 2);
    // Both voices share one backend sound
    assert_eq!(project.backend.live_sounds(), 1);
}

#[test]
fn test_stream_pool_falls_back_to_heap() {
    let project = Project::with_config(
        EngineConfig::default()
            .with_stream_buffer_size(STREAM_ENTRY_SIZE)
            .with_stream_pool_slots(2),
    );
    let _music = project.music(StreamMode::Streaming);
    let bank = project.sounds();

    let mut cues: Vec<_> = (0..3).map(|_| bank.get_cue("Stream").unwrap()).collect();
    for cue in &mut cues {
        assert!(cue.play());
    }
    project.engine.wait_for_io();
    assert_eq!(project.engine.stream_pool_usage(), (2, 1));

    project.engine.tick();
    assert_eq!(project.backend.active_channels().len(), 3);

    for cue in &mut cues {
        cue.stop();
    }
    assert_eq!(project.engine.stream_pool_usage().0, 0);
}

#[test]
fn test_stop_before_read_completes() {
    let project = Project::new();
    let _music = project.music(StreamMode::Streaming);
    let bank = project.sounds();
    let mut cue = bank.get_cue("Stream").unwrap();

    assert!(cue.play());
    cue.stop();
    project.engine.wait_for_io();
    project.engine.tick();

    assert_eq!(project.backend.play_count(), 0);
    assert_eq!(project.engine.stream_pool_usage().0, 0);
    assert!(cue.is_stopped());
}

#[test]
fn test_missing_stream_file_ends_voice() {
    let project = Project::new();
    let _music = project.music(StreamMode::Streaming);
    std::fs::remove_file(project.root().join("Streaming").join("0.mp3")).unwrap();
    let bank = project.sounds();
    let mut cue = bank.get_cue("Stream").unwrap();

    assert!(cue.play());
    project.engine.wait_for_io();
    project.engine.tick();

    assert_eq!(project.backend.play_count(), 0);
    assert!(cue.is_stopped());
    assert_eq!(project.engine.live_voice_count(), 0);
}
