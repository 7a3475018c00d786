//! Audio Engine
//!
//! Process-wide root: global settings, the playback backend, the injected
//! RNG, the I/O worker and streaming buffer pool, and the registries of
//! wave banks, sound banks and voices.
//!
//! `AudioEngine` is a cheap clonable handle. Banks and voices hold a
//! strong handle to the engine; the engine only holds weak references
//! back, so dropping every bank handle unloads the bank.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use cb_core::{CueError, CueResult};
use parking_lot::{Mutex, MutexGuard};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::backend::{AudioBackend, LogBackendError, SoundHandle};
use crate::config::EngineConfig;
use crate::settings::{AudioCategory, GlobalSettings, RpcCurve};
use crate::sound_bank::{SoundBank, SoundBankShared};
use crate::stream::{IoWorker, StreamBufferPool};
use crate::voice::{PlayingVoice, Voice};
use crate::wave_bank::{WaveBank, WaveBankShared};

pub(crate) type EngineRng = Box<dyn RngCore + Send>;

struct EngineShared {
    config: EngineConfig,
    settings: GlobalSettings,
    backend: Mutex<Box<dyn AudioBackend>>,
    rng: Mutex<EngineRng>,
    stream_pool: Arc<StreamBufferPool>,
    io: IoWorker,
    wave_banks: Mutex<Vec<Weak<WaveBankShared>>>,
    sound_banks: Mutex<Vec<Weak<SoundBankShared>>>,
    voices: Mutex<Vec<Weak<Mutex<PlayingVoice>>>>,
    /// Sounds whose wave bank dropped while the backend was locked
    orphaned_sounds: Mutex<Vec<SoundHandle>>,
    disposed: AtomicBool,
}

/// Engine handle
#[derive(Clone)]
pub struct AudioEngine {
    shared: Arc<EngineShared>,
}

impl std::fmt::Debug for AudioEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioEngine")
            .field("categories", &self.shared.settings.categories.len())
            .field("curves", &self.shared.settings.curves.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl AudioEngine {
    /// Load global settings from a file
    pub fn new(
        settings_path: impl AsRef<Path>,
        config: EngineConfig,
        backend: Box<dyn AudioBackend>,
    ) -> CueResult<Self> {
        let bytes = std::fs::read(settings_path.as_ref())?;
        Self::from_bytes(&bytes, config, backend)
    }

    /// Load global settings from an in-memory blob
    pub fn from_bytes(
        bytes: &[u8],
        config: EngineConfig,
        backend: Box<dyn AudioBackend>,
    ) -> CueResult<Self> {
        let settings = GlobalSettings::parse(bytes, config.category_volume_boost)?;
        Ok(Self::from_settings(settings, config, backend))
    }

    pub fn from_settings(
        settings: GlobalSettings,
        config: EngineConfig,
        backend: Box<dyn AudioBackend>,
    ) -> Self {
        let rng: EngineRng = match config.seed {
            Some(seed) => Box::new(StdRng::seed_from_u64(seed)),
            None => Box::new(StdRng::from_os_rng()),
        };
        let stream_pool = Arc::new(StreamBufferPool::new(
            config.stream_pool_slots,
            config.stream_buffer_size,
        ));

        Self {
            shared: Arc::new(EngineShared {
                settings,
                backend: Mutex::new(backend),
                rng: Mutex::new(rng),
                stream_pool,
                io: IoWorker::new("cb-cue-io"),
                wave_banks: Mutex::new(Vec::new()),
                sound_banks: Mutex::new(Vec::new()),
                voices: Mutex::new(Vec::new()),
                orphaned_sounds: Mutex::new(Vec::new()),
                disposed: AtomicBool::new(false),
                config,
            }),
        }
    }

    /// Replace the random source used for variation and variance rolls
    pub fn with_rng(self, rng: impl RngCore + Send + 'static) -> Self {
        *self.shared.rng.lock() = Box::new(rng);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn settings(&self) -> &GlobalSettings {
        &self.shared.settings
    }

    // ───────────────────────────────────────────────────────────────────────
    // Global definitions
    // ───────────────────────────────────────────────────────────────────────

    pub fn category(&self, name: &str) -> CueResult<Arc<AudioCategory>> {
        self.shared.settings.category(name).cloned()
    }

    pub fn rpc(&self, name: &str) -> CueResult<Arc<RpcCurve>> {
        self.shared.settings.curve(name).cloned()
    }

    /// Set a global variable; fails for per-cue variables
    pub fn set_global_variable(&self, name: &str, value: f32) -> CueResult<()> {
        let variable = self.shared.settings.variable(name)?;
        if !variable.is_global() {
            return Err(CueError::InvalidOperation(format!(
                "variable '{}' is not global",
                name
            )));
        }
        variable.set(value);
        Ok(())
    }

    pub fn global_variable(&self, name: &str) -> CueResult<f32> {
        let variable = self.shared.settings.variable(name)?;
        if !variable.is_global() {
            return Err(CueError::InvalidOperation(format!(
                "variable '{}' is not global",
                name
            )));
        }
        Ok(variable.value())
    }

    // ───────────────────────────────────────────────────────────────────────
    // Frame loop
    // ───────────────────────────────────────────────────────────────────────

    /// Per-frame update: backend housekeeping, then every live voice
    pub fn tick(&self) {
        if self.is_disposed() {
            return;
        }
        {
            let mut backend = self.backend();
            self.release_orphaned_sounds(&mut **backend);
            backend.update().logged("update");
        }
        for bank in self.sound_banks() {
            bank.tick();
        }
    }

    /// Block until every queued file read has completed
    pub fn wait_for_io(&self) {
        self.shared.io.wait_idle();
    }

    /// Voices producing sound across all sound banks
    pub fn live_voice_count(&self) -> usize {
        self.sound_banks()
            .iter()
            .map(SoundBank::live_voice_count)
            .sum()
    }

    /// Silence everything and reinitialize the backend
    ///
    /// Stops every voice, releases every shared wave sound, then resets
    /// the backend connection.
    pub fn reset_backend(&self) {
        let voices = self.live_voices();
        let stopped = voices.len();
        for voice in voices {
            voice.stop();
        }

        for bank in self.wave_banks() {
            bank.release_all();
        }

        let mut backend = self.backend();
        self.release_orphaned_sounds(&mut **backend);
        backend.reset().logged("reset");
        drop(backend);
        log::info!("[Engine] backend reset, {} voices stopped", stopped);
    }

    /// Dispose every sound bank, then every wave bank
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        for bank in self.sound_banks() {
            bank.dispose();
        }
        // Paused voices are outside every updating set
        for voice in self.live_voices() {
            voice.dispose();
        }
        for bank in self.wave_banks() {
            bank.dispose();
        }
        let mut backend = self.backend();
        self.release_orphaned_sounds(&mut **backend);
        drop(backend);
        log::debug!("[Engine] disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    // ───────────────────────────────────────────────────────────────────────
    // Registries
    // ───────────────────────────────────────────────────────────────────────

    /// Live wave banks, in registration order
    pub fn wave_banks(&self) -> Vec<WaveBank> {
        let mut registry = self.shared.wave_banks.lock();
        registry.retain(|b| b.strong_count() > 0);
        registry
            .iter()
            .filter_map(Weak::upgrade)
            .map(WaveBank::from_shared)
            .collect()
    }

    /// Live sound banks, in registration order
    pub fn sound_banks(&self) -> Vec<SoundBank> {
        let mut registry = self.shared.sound_banks.lock();
        registry.retain(|b| b.strong_count() > 0);
        registry
            .iter()
            .filter_map(Weak::upgrade)
            .map(SoundBank::from_shared)
            .collect()
    }

    /// First loaded wave bank with this name
    pub fn loaded_wave_bank(&self, name: &str) -> Option<WaveBank> {
        self.wave_banks()
            .into_iter()
            .find(|b| b.name() == name && b.is_loaded())
    }

    pub(crate) fn register_wave_bank(&self, bank: Weak<WaveBankShared>) {
        self.shared.wave_banks.lock().push(bank);
    }

    pub(crate) fn unregister_wave_bank(&self, bank: &Arc<WaveBankShared>) {
        self.shared
            .wave_banks
            .lock()
            .retain(|b| !std::ptr::eq(b.as_ptr(), Arc::as_ptr(bank)));
    }

    pub(crate) fn register_sound_bank(&self, bank: Weak<SoundBankShared>) {
        self.shared.sound_banks.lock().push(bank);
    }

    pub(crate) fn unregister_sound_bank(&self, bank: &Arc<SoundBankShared>) {
        self.shared
            .sound_banks
            .lock()
            .retain(|b| !std::ptr::eq(b.as_ptr(), Arc::as_ptr(bank)));
    }

    fn live_voices(&self) -> Vec<Voice> {
        let mut registry = self.shared.voices.lock();
        registry.retain(|v| v.strong_count() > 0);
        registry.iter().filter_map(Voice::from_weak).collect()
    }

    pub(crate) fn register_voice(&self, voice: Weak<Mutex<PlayingVoice>>) {
        let mut voices = self.shared.voices.lock();
        voices.retain(|v| v.strong_count() > 0);
        voices.push(voice);
    }

    // ───────────────────────────────────────────────────────────────────────
    // Shared resources
    // ───────────────────────────────────────────────────────────────────────

    pub(crate) fn backend(&self) -> MutexGuard<'_, Box<dyn AudioBackend>> {
        self.shared.backend.lock()
    }

    /// Backend lock if free; used from drop paths
    pub(crate) fn try_backend(&self) -> Option<MutexGuard<'_, Box<dyn AudioBackend>>> {
        self.shared.backend.try_lock()
    }

    /// Hand sounds over for release on the next tick, reset or dispose
    pub(crate) fn defer_sound_release(&self, sounds: Vec<SoundHandle>) {
        if !sounds.is_empty() {
            self.shared.orphaned_sounds.lock().extend(sounds);
        }
    }

    pub(crate) fn orphaned_sound_count(&self) -> usize {
        self.shared.orphaned_sounds.lock().len()
    }

    fn release_orphaned_sounds(&self, backend: &mut dyn AudioBackend) {
        let sounds = std::mem::take(&mut *self.shared.orphaned_sounds.lock());
        if sounds.is_empty() {
            return;
        }
        log::debug!("[Engine] releasing {} orphaned sounds", sounds.len());
        for sound in sounds {
            backend.release_sound(sound).logged("release_sound");
        }
    }

    pub(crate) fn rng(&self) -> MutexGuard<'_, EngineRng> {
        self.shared.rng.lock()
    }

    pub(crate) fn io(&self) -> &IoWorker {
        &self.shared.io
    }

    pub(crate) fn stream_pool(&self) -> &Arc<StreamBufferPool> {
        &self.shared.stream_pool
    }

    /// Streaming buffer pool statistics: (pooled buffers in use, heap fallbacks)
    pub fn stream_pool_usage(&self) -> (usize, usize) {
        (
            self.shared.stream_pool.in_use(),
            self.shared.stream_pool.fallback_count(),
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
