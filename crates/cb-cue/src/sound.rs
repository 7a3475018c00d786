//! Sound and track definitions
//!
//! A sound is 1..N tracks played together. Each track picks one of its
//! weighted wave references per play and carries its own volume/pitch
//! variance ranges, optional low-pass filter and loop count.

use std::sync::Arc;

use cb_core::{BankReader, BankWriter, CueError, CueResult, centibels_to_gain};
use parking_lot::Mutex;
use rand::Rng;

use crate::selection::{SelectionCursor, VariationMode, uniform_between};
use crate::settings::{AudioCategory, GlobalSettings, RpcCurve};

/// Smallest encoded sound: no tracks, no curves, empty strings
pub(crate) const SOUND_RECORD_MIN: usize = 24;

/// Smallest encoded track: no entries
const TRACK_RECORD_MIN: usize = 46;

/// Track loop count meaning "loop forever"
pub const INFINITE_LOOP_COUNT: i32 = 255;

/// Reference to one entry of a wave bank
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaveRef {
    pub bank_name: String,
    pub index: usize,
    pub weight: u8,
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRACK
// ═══════════════════════════════════════════════════════════════════════════════

/// One layer of a sound
#[derive(Debug)]
pub struct TrackDefinition {
    pub entries: Vec<WaveRef>,
    /// Base volume offset (dB * 100)
    pub volume_centibels: i32,
    pub variation: VariationMode,
    pub filtered: bool,
    /// Low-pass cutoff (Hz) when `filtered`
    pub filter_frequency: f32,
    pub filter_q: f32,
    /// Per-play pitch variance range (semitones * 100)
    pub pitch_variance_centisemitones: (i32, i32),
    /// Per-play volume variance range (dB * 100)
    pub volume_variance_centibels: (i32, i32),
    pub loop_count: i32,
    /// Variation code as stored in the bank
    variation_code: i32,
    weights: Vec<u8>,
    cursor: Mutex<SelectionCursor>,
}

impl TrackDefinition {
    pub fn new(entries: Vec<WaveRef>) -> Self {
        let weights = entries.iter().map(|e| e.weight).collect();
        Self {
            entries,
            volume_centibels: 0,
            variation: VariationMode::Ordered,
            filtered: false,
            filter_frequency: crate::voice::FILTER_OPEN_HZ,
            filter_q: 1.0,
            pitch_variance_centisemitones: (0, 0),
            volume_variance_centibels: (0, 0),
            loop_count: 0,
            variation_code: VariationMode::Ordered.code(),
            weights,
            cursor: Mutex::new(SelectionCursor::new()),
        }
    }

    pub fn with_variation(mut self, variation: VariationMode) -> Self {
        self.variation = variation;
        self.variation_code = variation.code();
        self
    }

    pub fn with_volume(mut self, centibels: i32) -> Self {
        self.volume_centibels = centibels;
        self
    }

    pub fn with_filter(mut self, frequency: f32, q: f32) -> Self {
        self.filtered = true;
        self.filter_frequency = frequency;
        self.filter_q = q;
        self
    }

    pub fn with_pitch_variance(mut self, min: i32, max: i32) -> Self {
        self.pitch_variance_centisemitones = (min, max);
        self
    }

    pub fn with_volume_variance(mut self, min: i32, max: i32) -> Self {
        self.volume_variance_centibels = (min, max);
        self
    }

    pub fn with_loop_count(mut self, loop_count: i32) -> Self {
        self.loop_count = loop_count;
        self
    }

    fn read(reader: &mut BankReader<'_>) -> CueResult<Self> {
        let count = reader.read_count("track entry", 7)?;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let bank_name = reader.read_string()?;
            let index = reader.read_i32()?;
            let index = usize::try_from(index).map_err(|_| {
                CueError::Malformed(format!("negative wave index {} into '{}'", index, bank_name))
            })?;
            let weight = reader.read_u8()?;
            entries.push(WaveRef {
                bank_name,
                index,
                weight,
            });
        }

        let volume_centibels = reader.read_i32()?;
        let code = reader.read_u8()? as i32;
        let variation = VariationMode::decode(code, entries.len(), "track");
        let filtered = reader.read_bool()?;
        let filter_frequency = reader.read_f64()? as f32;
        let filter_q = reader.read_f64()? as f32;
        let pitch_min = reader.read_i32()?;
        let pitch_max = reader.read_i32()?;
        let volume_min = reader.read_i32()?;
        let volume_max = reader.read_i32()?;
        let loop_count = reader.read_i32()?;

        Ok(Self {
            volume_centibels,
            variation,
            filtered,
            filter_frequency,
            filter_q,
            pitch_variance_centisemitones: (pitch_min, pitch_max),
            volume_variance_centibels: (volume_min, volume_max),
            loop_count,
            variation_code: code,
            ..Self::new(entries)
        })
    }

    fn write(&self, writer: &mut BankWriter) {
        writer.write_count(self.entries.len());
        for entry in &self.entries {
            writer
                .write_string(&entry.bank_name)
                .write_i32(entry.index as i32)
                .write_u8(entry.weight);
        }
        writer
            .write_i32(self.volume_centibels)
            .write_u8(
                self.variation
                    .stored_code(self.variation_code, self.entries.len()) as u8,
            )
            .write_bool(self.filtered)
            .write_f64(self.filter_frequency as f64)
            .write_f64(self.filter_q as f64)
            .write_i32(self.pitch_variance_centisemitones.0)
            .write_i32(self.pitch_variance_centisemitones.1)
            .write_i32(self.volume_variance_centibels.0)
            .write_i32(self.volume_variance_centibels.1)
            .write_i32(self.loop_count);
    }

    /// Pick the wave reference for this play
    pub fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&WaveRef> {
        let index = self
            .cursor
            .lock()
            .next_weighted(self.variation, &self.weights, rng)?;
        self.entries.get(index)
    }

    /// Per-play volume offset in dB: base volume plus a variance roll
    pub fn roll_volume<R: Rng + ?Sized>(&self, rng: &mut R) -> f32 {
        let (min, max) = self.volume_variance_centibels;
        uniform_between(min as f32 / 100.0, max as f32 / 100.0, rng)
            + self.volume_centibels as f32 / 100.0
    }

    /// Per-play pitch offset in semitones
    pub fn roll_pitch<R: Rng + ?Sized>(&self, rng: &mut R) -> f32 {
        let (min, max) = self.pitch_variance_centisemitones;
        uniform_between(min as f32 / 100.0, max as f32 / 100.0, rng)
    }

    pub fn is_looping(&self) -> bool {
        self.loop_count == INFINITE_LOOP_COUNT
    }

    /// Filter cutoff this track imposes, if any
    pub fn filter_cutoff(&self) -> Option<f32> {
        self.filtered.then_some(self.filter_frequency)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SOUND
// ═══════════════════════════════════════════════════════════════════════════════

/// Playable composition of tracks
#[derive(Debug)]
pub struct SoundDefinition {
    /// 0 = highest
    pub priority: u8,
    /// Volume (dB * 100)
    pub volume_centibels: i32,
    /// Pitch offset (semitones * 100)
    pub pitch_centisemitones: i32,
    pub tracks: Vec<TrackDefinition>,
    pub category: Arc<AudioCategory>,
    pub rpcs: Vec<Arc<RpcCurve>>,
    pub effect: String,
}

impl SoundDefinition {
    pub fn new(category: Arc<AudioCategory>, tracks: Vec<TrackDefinition>) -> Self {
        Self {
            priority: 0,
            volume_centibels: 0,
            pitch_centisemitones: 0,
            tracks,
            category,
            rpcs: Vec::new(),
            effect: String::new(),
        }
    }

    pub(crate) fn read(reader: &mut BankReader<'_>, settings: &GlobalSettings) -> CueResult<Self> {
        let priority = reader.read_i32()?;
        let priority = u8::try_from(priority)
            .map_err(|_| CueError::Malformed(format!("sound priority {} out of range", priority)))?;
        let volume_centibels = reader.read_i32()?;
        let pitch_centisemitones = reader.read_i32()?;

        let count = reader.read_count("track", TRACK_RECORD_MIN)?;
        let mut tracks = Vec::with_capacity(count);
        for _ in 0..count {
            tracks.push(TrackDefinition::read(reader)?);
        }

        let category_name = reader.read_string()?;
        let category = settings
            .category(&category_name)
            .map_err(|_| CueError::UnresolvedReference {
                kind: "category",
                name: category_name.clone(),
            })?
            .clone();

        let count = reader.read_count("RPC reference", 2)?;
        let mut rpcs = Vec::with_capacity(count);
        for _ in 0..count {
            let name = reader.read_string()?;
            let curve = settings
                .curve(&name)
                .map_err(|_| CueError::UnresolvedReference {
                    kind: "RPC curve",
                    name: name.clone(),
                })?;
            rpcs.push(Arc::clone(curve));
        }

        let effect = reader.read_string()?;

        Ok(Self {
            priority,
            volume_centibels,
            pitch_centisemitones,
            tracks,
            category,
            rpcs,
            effect,
        })
    }

    pub(crate) fn write(&self, writer: &mut BankWriter) {
        writer
            .write_i32(self.priority as i32)
            .write_i32(self.volume_centibels)
            .write_i32(self.pitch_centisemitones)
            .write_count(self.tracks.len());
        for track in &self.tracks {
            track.write(writer);
        }
        writer
            .write_string(self.category.name())
            .write_count(self.rpcs.len());
        for curve in &self.rpcs {
            writer.write_string(curve.name());
        }
        writer.write_string(&self.effect);
    }

    /// Linear gain from the stored volume
    pub fn gain(&self) -> f32 {
        centibels_to_gain(self.volume_centibels)
    }

    pub fn pitch_semitones(&self) -> f32 {
        self.pitch_centisemitones as f32 / 100.0
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
