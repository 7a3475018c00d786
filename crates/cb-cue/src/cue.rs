//! Cues
//!
//! A `CueDefinition` is the shared, loaded description of a cue: its
//! candidate sounds, variation mode and instance limit. Variation cursor
//! and admission counters live on the definition, so every `Cue` handle
//! for the same name advances one sequence and shares one limit.
//!
//! A `Cue` is the caller's handle. Each `play` disposes the handle's
//! previous voice and starts a fresh one.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use cb_core::{BankReader, BankWriter, CueError, CueResult};
use parking_lot::Mutex;

use crate::selection::{SelectionCursor, VariationMode};
use crate::settings::VariableSource;
use crate::sound::SoundDefinition;
use crate::sound_bank::SoundBank;
use crate::voice::{PlayingVoice, Voice, VoiceState};

/// Smallest encoded cue: empty name, no sounds
pub(crate) const CUE_RECORD_MIN: usize = 14;

/// Instance limit value meaning "no limit"
pub const UNLIMITED_INSTANCES: i32 = -1;

// ═══════════════════════════════════════════════════════════════════════════════
// ADMISSION
// ═══════════════════════════════════════════════════════════════════════════════

/// Adaptive instance cap: `floor(max * total_instances / total_plays)`
///
/// Multi-track sounds occupy more than one tracked instance per play; the
/// running ratio scales the limit to match. Returns `max` before any play.
pub fn adaptive_instance_cap(max_instances: u32, total_instances: u64, total_plays: u64) -> usize {
    if total_plays == 0 {
        return max_instances as usize;
    }
    (max_instances as u64 * total_instances / total_plays) as usize
}

#[derive(Debug)]
struct TrackedInstance {
    voice: Weak<Mutex<PlayingVoice>>,
    track: usize,
}

impl TrackedInstance {
    fn is_active(&self) -> bool {
        Voice::from_weak(&self.voice).is_some_and(|v| v.track_is_active(self.track))
    }
}

#[derive(Debug, Default)]
struct Admission {
    tracked: Vec<TrackedInstance>,
    total_plays: u64,
    total_instances: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// CUE DEFINITION
// ═══════════════════════════════════════════════════════════════════════════════

/// Loaded cue description
#[derive(Debug)]
pub struct CueDefinition {
    name: String,
    sound_indices: Vec<usize>,
    sounds: Vec<Arc<SoundDefinition>>,
    variation: VariationMode,
    /// Variation code as stored in the bank
    variation_code: i32,
    max_instances: i32,
    cursor: Mutex<SelectionCursor>,
    admission: Mutex<Admission>,
}

impl CueDefinition {
    pub fn new(
        name: impl Into<String>,
        sound_indices: Vec<usize>,
        sounds: &[Arc<SoundDefinition>],
        variation: VariationMode,
        max_instances: i32,
    ) -> CueResult<Self> {
        let name = name.into();
        if max_instances < UNLIMITED_INSTANCES {
            return Err(CueError::Malformed(format!(
                "cue '{}' has max instances {}",
                name, max_instances
            )));
        }
        let resolved = sound_indices
            .iter()
            .map(|&i| {
                sounds.get(i).cloned().ok_or(CueError::IndexOutOfRange {
                    what: "sound",
                    index: i as i64,
                    len: sounds.len(),
                })
            })
            .collect::<CueResult<Vec<_>>>()?;

        Ok(Self {
            name,
            sound_indices,
            sounds: resolved,
            variation,
            variation_code: variation.code(),
            max_instances,
            cursor: Mutex::new(SelectionCursor::new()),
            admission: Mutex::new(Admission::default()),
        })
    }

    pub(crate) fn read(
        reader: &mut BankReader<'_>,
        sounds: &[Arc<SoundDefinition>],
    ) -> CueResult<Self> {
        let name = reader.read_string()?;
        let code = reader.read_i32()?;

        let count = reader.read_count("cue sound", 4)?;
        let mut indices = Vec::with_capacity(count);
        for _ in 0..count {
            let index = reader.read_i32()?;
            let index = usize::try_from(index).map_err(|_| CueError::IndexOutOfRange {
                what: "sound",
                index: index as i64,
                len: sounds.len(),
            })?;
            indices.push(index);
        }
        let max_instances = reader.read_i32()?;

        let variation = VariationMode::decode(code, indices.len(), &format!("cue '{}'", name));
        let mut definition = Self::new(name, indices, sounds, variation, max_instances)?;
        definition.variation_code = code;
        Ok(definition)
    }

    pub(crate) fn write(&self, writer: &mut BankWriter) {
        writer
            .write_string(&self.name)
            .write_i32(
                self.variation
                    .stored_code(self.variation_code, self.sound_indices.len()),
            )
            .write_count(self.sound_indices.len());
        for &index in &self.sound_indices {
            writer.write_i32(index as i32);
        }
        writer.write_i32(self.max_instances);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sounds(&self) -> &[Arc<SoundDefinition>] {
        &self.sounds
    }

    /// Indices into the owning bank's sound table
    pub fn sound_indices(&self) -> &[usize] {
        &self.sound_indices
    }

    pub fn variation(&self) -> VariationMode {
        self.variation
    }

    /// None when unlimited
    pub fn instance_limit(&self) -> Option<u32> {
        u32::try_from(self.max_instances).ok()
    }

    /// (total plays, total tracked instances) since load
    pub fn play_counters(&self) -> (u64, u64) {
        let admission = self.admission.lock();
        (admission.total_plays, admission.total_instances)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CUE VARIABLES
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-cue variable values, shared with the cue's voices
#[derive(Debug, Clone, Default)]
pub struct CueVariables {
    distance: Arc<AtomicU32>,
}

impl CueVariables {
    /// Name of the only per-cue variable
    pub const DISTANCE: &'static str = "Distance";

    pub fn distance(&self) -> f32 {
        f32::from_bits(self.distance.load(Ordering::Relaxed))
    }

    pub fn set_distance(&self, value: f32) {
        self.distance.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl VariableSource for CueVariables {
    fn variable(&self, name: &str) -> CueResult<f32> {
        if name == Self::DISTANCE {
            Ok(self.distance())
        } else {
            Err(CueError::UnsupportedVariable(name.to_string()))
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CUE
// ═══════════════════════════════════════════════════════════════════════════════

/// Playable handle returned by `SoundBank::get_cue`
pub struct Cue {
    definition: Arc<CueDefinition>,
    bank: SoundBank,
    voice: Option<Voice>,
    variables: CueVariables,
    disposed: bool,
}

impl std::fmt::Debug for Cue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cue")
            .field("name", &self.definition.name)
            .field("playing", &self.is_playing())
            .field("disposed", &self.disposed)
            .finish()
    }
}

impl Cue {
    pub(crate) fn new(definition: Arc<CueDefinition>, bank: SoundBank) -> Self {
        Self {
            definition,
            bank,
            voice: None,
            variables: CueVariables::default(),
            disposed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &Arc<CueDefinition> {
        &self.definition
    }

    /// Start a new play of this cue
    ///
    /// Returns false when the play was refused: the instance limit is
    /// reached, the cue has no sounds, or the cue or its bank is disposed.
    pub fn play(&mut self) -> bool {
        if self.disposed || self.bank.is_disposed() {
            log::warn!("[Cue] play on disposed cue '{}'", self.definition.name);
            return false;
        }

        let definition = Arc::clone(&self.definition);
        let mut admission = definition.admission.lock();

        if let Some(max) = definition.instance_limit() {
            if admission.total_plays > 0 {
                // A cap of 0 would lock the cue for good after a play that
                // resolved no wave, so at least one instance is admitted
                let cap = adaptive_instance_cap(
                    max,
                    admission.total_instances,
                    admission.total_plays,
                )
                .max(1);
                if admission.tracked.len() >= cap {
                    admission.tracked.retain(TrackedInstance::is_active);
                    if admission.tracked.len() >= cap {
                        log::debug!(
                            "[Cue] '{}' dropped, {} of {} instances playing",
                            definition.name,
                            admission.tracked.len(),
                            cap
                        );
                        return false;
                    }
                }
            }
        }
        let before = admission.tracked.len();

        let engine = self.bank.engine().clone();
        let choice = {
            let mut rng = engine.rng();
            definition.cursor.lock().next_uniform(
                definition.variation,
                definition.sounds.len(),
                &mut **rng,
            )
        };
        let Some(index) = choice else {
            log::warn!("[Cue] '{}' has no sounds", definition.name);
            return false;
        };

        if let Some(previous) = self.voice.take() {
            previous.dispose();
        }

        let voice = Voice::new(
            &engine,
            self.bank.downgrade(),
            Arc::clone(&definition.sounds[index]),
            self.variables.clone(),
        );
        for track in voice.play() {
            admission.tracked.push(TrackedInstance {
                voice: voice.downgrade(),
                track,
            });
        }

        admission.total_plays += 1;
        admission.total_instances += admission.tracked.len().saturating_sub(before) as u64;
        if definition.instance_limit().is_none() {
            admission.tracked.clear();
        }
        drop(admission);

        log::debug!("[Cue] '{}' playing sound {}", definition.name, index);
        self.voice = Some(voice);
        true
    }

    pub fn pause(&mut self) {
        if let Some(voice) = &self.voice {
            voice.pause();
        }
    }

    /// Continue a paused play without rerolling
    pub fn resume(&mut self) {
        if let Some(voice) = &self.voice {
            voice.resume();
        }
    }

    pub fn stop(&mut self) {
        if let Some(voice) = &self.voice {
            voice.stop();
        }
    }

    /// Set a per-cue variable (only "Distance" is supported)
    pub fn set_variable(&mut self, name: &str, value: f32) -> CueResult<()> {
        if name != CueVariables::DISTANCE {
            return Err(CueError::UnsupportedVariable(name.to_string()));
        }
        self.variables.set_distance(value);
        Ok(())
    }

    pub fn get_variable(&self, name: &str) -> CueResult<f32> {
        self.variables.variable(name)
    }

    /// Set "Distance" from listener and emitter positions
    pub fn apply_3d(&mut self, listener: [f32; 3], emitter: [f32; 3]) {
        let distance = listener
            .iter()
            .zip(&emitter)
            .map(|(l, e)| (l - e) * (l - e))
            .sum::<f32>()
            .sqrt();
        self.variables.set_distance(distance);
    }

    /// Stop and release the current voice; the cue cannot play again
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        if let Some(voice) = self.voice.take() {
            voice.dispose();
        }
        self.disposed = true;
    }

    /// Playing or paused
    pub fn is_playing(&self) -> bool {
        self.voice.as_ref().is_some_and(Voice::is_playing)
    }

    pub fn is_paused(&self) -> bool {
        self.voice
            .as_ref()
            .is_some_and(|v| v.state() == VoiceState::Paused)
    }

    pub fn is_stopped(&self) -> bool {
        !self.is_playing()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::AudioCategory;
    use approx::assert_relative_eq;

    fn sounds(n: usize) -> Vec<Arc<SoundDefinition>> {
        let category = Arc::new(AudioCategory::new("Default", 0, 2.5));
        (0..n)
            .map(|_| Arc::new(SoundDefinition::new(Arc::clone(&category), Vec::new())))
            .collect()
    }

    #[test]
    fn test_adaptive_cap_literal_ratio() {
        assert_eq!(adaptive_instance_cap(1, 0, 0), 1);
        assert_eq!(adaptive_instance_cap(1, 1, 1), 1);
        // Two-track sound: two instances per play
        assert_eq!(adaptive_instance_cap(1, 2, 1), 2);
        assert_eq!(adaptive_instance_cap(3, 5, 4), 3);
        assert_eq!(adaptive_instance_cap(2, 3, 4), 1);
        // Nothing resolved yet
        assert_eq!(adaptive_instance_cap(4, 0, 3), 0);
    }

    #[test]
    fn test_definition_resolves_indices() {
        let sounds = sounds(3);
        let def = CueDefinition::new("Hit", vec![2, 0], &sounds, VariationMode::Random, 4).unwrap();
        assert!(Arc::ptr_eq(&def.sounds()[0], &sounds[2]));
        assert_eq!(def.instance_limit(), Some(4));
        assert_eq!(def.play_counters(), (0, 0));
    }

    #[test]
    fn test_definition_bad_index() {
        let sounds = sounds(2);
        match CueDefinition::new("Hit", vec![0, 5], &sounds, VariationMode::Ordered, -1) {
            Err(CueError::IndexOutOfRange { index, len, .. }) => {
                assert_eq!(index, 5);
                assert_eq!(len, 2);
            }
            other => panic!("expected index error, got {:?}", other),
        }
    }

    fn cue_record(code: i32, indices: &[i32]) -> BankWriter {
        let mut writer = BankWriter::new();
        writer.write_string("Hit").write_i32(code).write_count(indices.len());
        for &index in indices {
            writer.write_i32(index);
        }
        writer.write_i32(-1);
        writer
    }

    #[test]
    fn test_read_single_sound_cue_any_variation() {
        let sounds = sounds(2);
        // Authoring tools store 1 (ordered-from-random) on single-sound cues
        let writer = cue_record(1, &[1]);
        let mut reader = BankReader::new(writer.as_bytes(), "sound bank");
        let def = CueDefinition::read(&mut reader, &sounds).unwrap();
        assert_eq!(def.variation(), VariationMode::Ordered);

        let mut out = BankWriter::new();
        def.write(&mut out);
        assert_eq!(out.as_bytes(), writer.as_bytes());
    }

    #[test]
    fn test_read_unknown_variation_plays_ordered() {
        let sounds = sounds(3);
        let writer = cue_record(1, &[0, 1, 2]);
        let mut reader = BankReader::new(writer.as_bytes(), "sound bank");
        let def = CueDefinition::read(&mut reader, &sounds).unwrap();
        assert_eq!(def.variation(), VariationMode::Ordered);
        assert_eq!(reader.remaining(), 0);

        let writer = cue_record(4, &[0, 1, 2]);
        let mut reader = BankReader::new(writer.as_bytes(), "sound bank");
        let def = CueDefinition::read(&mut reader, &sounds).unwrap();
        assert_eq!(def.variation(), VariationMode::Shuffle);
    }

    #[test]
    fn test_unlimited_instances() {
        let sounds = sounds(1);
        let def = CueDefinition::new("Amb", vec![0], &sounds, VariationMode::Ordered, -1).unwrap();
        assert_eq!(def.instance_limit(), None);
        assert!(CueDefinition::new("Bad", vec![0], &sounds, VariationMode::Ordered, -2).is_err());
    }

    #[test]
    fn test_cue_variables() {
        let vars = CueVariables::default();
        assert_eq!(vars.variable("Distance").unwrap(), 0.0);
        vars.set_distance(12.5);
        assert_relative_eq!(vars.clone().variable("Distance").unwrap(), 12.5);
        assert!(matches!(
            vars.variable("Speed"),
            Err(CueError::UnsupportedVariable(name)) if name == "Speed"
        ));
    }
}
