//! Sound Banks
//!
//! Compiled container of sound and cue definitions. Sounds resolve their
//! category and RPC curves against the engine's global settings; cues
//! resolve sound indices against the bank's own sound table.
//!
//! The bank also owns the set of voices currently producing sound, which
//! `tick` refreshes once per frame.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use cb_core::{BankReader, BankWriter, CueResult, SOUND_BANK_FORMAT_VERSION};
use parking_lot::Mutex;

use crate::cue::{CUE_RECORD_MIN, Cue, CueDefinition};
use crate::engine::AudioEngine;
use crate::settings::GlobalSettings;
use crate::sound::{SOUND_RECORD_MIN, SoundDefinition};
use crate::voice::Voice;

/// Parsed contents of a sound bank file
#[derive(Debug, Default)]
pub struct SoundBankData {
    pub sounds: Vec<Arc<SoundDefinition>>,
    pub cues: Vec<Arc<CueDefinition>>,
}

impl SoundBankData {
    pub fn parse(bytes: &[u8], settings: &GlobalSettings) -> CueResult<Self> {
        let mut reader = BankReader::new(bytes, "sound bank");
        reader.expect_version(SOUND_BANK_FORMAT_VERSION)?;

        let count = reader.read_count("sound", SOUND_RECORD_MIN)?;
        let mut sounds = Vec::with_capacity(count);
        for _ in 0..count {
            sounds.push(Arc::new(SoundDefinition::read(&mut reader, settings)?));
        }

        let count = reader.read_count("cue", CUE_RECORD_MIN)?;
        let mut cues = Vec::with_capacity(count);
        for _ in 0..count {
            cues.push(Arc::new(CueDefinition::read(&mut reader, &sounds)?));
        }

        Ok(Self { sounds, cues })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut writer = BankWriter::new();
        writer
            .write_i32(SOUND_BANK_FORMAT_VERSION)
            .write_count(self.sounds.len());
        for sound in &self.sounds {
            sound.write(&mut writer);
        }
        writer.write_count(self.cues.len());
        for cue in &self.cues {
            cue.write(&mut writer);
        }
        writer.into_bytes()
    }
}

pub(crate) struct SoundBankShared {
    name: String,
    engine: AudioEngine,
    data: SoundBankData,
    updating: Mutex<Vec<Voice>>,
    disposed: AtomicBool,
}

impl SoundBankShared {
    /// Add a voice to the updating set; refused once disposed
    pub(crate) fn register(&self, voice: Voice) -> bool {
        if self.disposed.load(Ordering::Acquire) {
            return false;
        }
        let mut updating = self.updating.lock();
        if !updating.iter().any(|v| v.ptr_eq(&voice)) {
            updating.push(voice);
        }
        true
    }

    pub(crate) fn deregister(&self, voice: &Voice) {
        self.updating.lock().retain(|v| !v.ptr_eq(voice));
    }
}

/// Handle to a loaded sound bank
#[derive(Clone)]
pub struct SoundBank {
    shared: Arc<SoundBankShared>,
}

impl std::fmt::Debug for SoundBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoundBank")
            .field("name", &self.shared.name)
            .field("sounds", &self.shared.data.sounds.len())
            .field("cues", &self.shared.data.cues.len())
            .finish()
    }
}

impl SoundBank {
    /// Load a sound bank file and register it with the engine
    pub fn new(engine: &AudioEngine, path: impl AsRef<Path>) -> CueResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::from_bytes(engine, name, &bytes)
    }

    pub fn from_bytes(engine: &AudioEngine, name: impl Into<String>, bytes: &[u8]) -> CueResult<Self> {
        let data = SoundBankData::parse(bytes, engine.settings())?;
        let bank = Self {
            shared: Arc::new(SoundBankShared {
                name: name.into(),
                engine: engine.clone(),
                data,
                updating: Mutex::new(Vec::new()),
                disposed: AtomicBool::new(false),
            }),
        };
        engine.register_sound_bank(Arc::downgrade(&bank.shared));
        log::info!(
            "[SoundBank] '{}' loaded ({} sounds, {} cues)",
            bank.shared.name,
            bank.shared.data.sounds.len(),
            bank.shared.data.cues.len()
        );
        Ok(bank)
    }

    pub(crate) fn from_shared(shared: Arc<SoundBankShared>) -> Self {
        Self { shared }
    }

    pub(crate) fn downgrade(&self) -> Weak<SoundBankShared> {
        Arc::downgrade(&self.shared)
    }

    pub(crate) fn engine(&self) -> &AudioEngine {
        &self.shared.engine
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn sounds(&self) -> &[Arc<SoundDefinition>] {
        &self.shared.data.sounds
    }

    pub fn cues(&self) -> &[Arc<CueDefinition>] {
        &self.shared.data.cues
    }

    /// New handle for the named cue; None if the bank has no such cue
    pub fn get_cue(&self, name: &str) -> Option<Cue> {
        if self.is_disposed() {
            return None;
        }
        let definition = self.shared.data.cues.iter().find(|c| c.name() == name);
        match definition {
            Some(definition) => Some(Cue::new(Arc::clone(definition), self.clone())),
            None => {
                log::debug!("[SoundBank] '{}' has no cue '{}'", self.shared.name, name);
                None
            }
        }
    }

    /// Refresh every voice producing sound; finished voices drop out
    pub fn tick(&self) {
        let voices = self.shared.updating.lock().clone();
        for voice in voices {
            voice.update();
        }
    }

    /// Voices currently in the updating set
    pub fn live_voice_count(&self) -> usize {
        self.shared.updating.lock().len()
    }

    /// Serialize back to the sound bank file format
    pub fn encode(&self) -> Vec<u8> {
        self.shared.data.encode()
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Stop every live voice and unregister from the engine
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let voices = std::mem::take(&mut *self.shared.updating.lock());
        for voice in voices {
            voice.dispose();
        }
        self.shared.engine.unregister_sound_bank(&self.shared);
        log::debug!("[SoundBank] '{}' disposed", self.shared.name);
    }
}
