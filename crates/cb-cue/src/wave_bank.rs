//! Wave Banks
//!
//! A wave bank is a header, a size table and the encoded payload of every
//! entry. Banks load asynchronously on the engine's I/O worker:
//!
//! ```text
//! resident:   NotLoaded → Loading → (header, sizes, every payload) → Loaded
//! streaming:  NotLoaded → Loading → (header, sizes) → Loaded
//! any state → Disposed
//! ```
//!
//! Load failures (missing file, version mismatch, truncation) are logged
//! and leave the bank `NotLoaded`. Callers poll `is_loaded`.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use cb_core::{BankReader, BankWriter, CueError, CueResult, WAVE_BANK_FORMAT_VERSION};
use parking_lot::{Mutex, RwLock};

use crate::backend::{AudioBackend, LogBackendError, SoundHandle};
use crate::engine::AudioEngine;

// ═══════════════════════════════════════════════════════════════════════════════
// STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Load state of a wave bank
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WaveBankState {
    NotLoaded = 0,
    Loading = 1,
    Loaded = 2,
    Disposed = 3,
}

impl From<u8> for WaveBankState {
    fn from(v: u8) -> Self {
        match v {
            1 => WaveBankState::Loading,
            2 => WaveBankState::Loaded,
            3 => WaveBankState::Disposed,
            _ => WaveBankState::NotLoaded,
        }
    }
}

/// Where a streaming bank reads its entries from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Read from `<bankFolder>/Streaming/` on every play
    Streaming,
    /// Read from `<bankFolder>/Deferred/` once, then keep resident
    Deferred,
}

impl StreamMode {
    pub fn folder(self) -> &'static str {
        match self {
            StreamMode::Streaming => "Streaming",
            StreamMode::Deferred => "Deferred",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENTRIES
// ═══════════════════════════════════════════════════════════════════════════════

/// Entry payload held in memory
///
/// The backend sound is created on first play and shared by every voice
/// playing this entry.
#[derive(Debug)]
pub struct ResidentWave {
    bytes: Vec<u8>,
    sound: Mutex<Option<SoundHandle>>,
}

impl ResidentWave {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            sound: Mutex::new(None),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Backend sound for this entry, created on first use
    pub(crate) fn sound(&self, backend: &mut dyn AudioBackend) -> Option<SoundHandle> {
        let mut sound = self.sound.lock();
        if sound.is_none() {
            *sound = backend.create_sound(&self.bytes).logged("create_sound");
        }
        *sound
    }

    fn release(&self, backend: &mut dyn AudioBackend) {
        if let Some(sound) = self.take_sound() {
            backend.release_sound(sound).logged("release_sound");
        }
    }

    fn take_sound(&self) -> Option<SoundHandle> {
        self.sound.lock().take()
    }

    pub fn has_sound(&self) -> bool {
        self.sound.lock().is_some()
    }
}

#[derive(Debug, Clone)]
enum WaveEntry {
    Resident(Arc<ResidentWave>),
    Streamed { size: usize },
    /// Zero-length entry, never playable
    Empty,
}

/// What a voice plays for a resolved wave reference
#[derive(Debug, Clone)]
pub enum WaveSource {
    /// In-memory payload with a shared backend sound
    Resident(Arc<ResidentWave>),
    /// Payload read from disk when the voice starts
    Stream {
        bank: WaveBank,
        index: usize,
        path: PathBuf,
        size: usize,
        /// Promote to resident once read
        persist: bool,
    },
}

// ═══════════════════════════════════════════════════════════════════════════════
// WAVE BANK
// ═══════════════════════════════════════════════════════════════════════════════

pub(crate) struct WaveBankShared {
    name: String,
    path: PathBuf,
    mode: Option<StreamMode>,
    state: AtomicU8,
    entries: RwLock<Vec<WaveEntry>>,
    engine: AudioEngine,
}

impl WaveBankShared {
    fn state(&self) -> WaveBankState {
        WaveBankState::from(self.state.load(Ordering::Acquire))
    }

    /// Move Loading → `to`, leaving a concurrent dispose in place
    fn finish_loading(&self, to: WaveBankState) -> bool {
        self.state
            .compare_exchange(
                WaveBankState::Loading as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn load(&self) {
        match self.read_file() {
            Ok(entries) => {
                let count = entries.len();
                *self.entries.write() = entries;
                if self.finish_loading(WaveBankState::Loaded) {
                    log::info!(
                        "[WaveBank] '{}' loaded ({} entries, {})",
                        self.name,
                        count,
                        self.mode.map_or("resident", StreamMode::folder)
                    );
                } else {
                    // Disposed mid-load
                    self.entries.write().clear();
                }
            }
            Err(e) => {
                match &e {
                    CueError::Io(io) if io.kind() == io::ErrorKind::NotFound => {
                        log::warn!(
                            "[WaveBank] '{}' not found at {}",
                            self.name,
                            self.path.display()
                        );
                    }
                    _ => log::error!("[WaveBank] '{}' failed to load: {}", self.name, e),
                }
                self.finish_loading(WaveBankState::NotLoaded);
            }
        }
    }

    fn read_file(&self) -> CueResult<Vec<WaveEntry>> {
        let mut file = File::open(&self.path)?;

        let mut header = [0u8; 8];
        read_exact(&mut file, &mut header)?;
        let mut reader = BankReader::new(&header, "wave bank");
        reader.expect_version(WAVE_BANK_FORMAT_VERSION)?;
        let count = reader.read_unbounded_count("wave entry")?;

        let file_len = file.metadata()?.len() as usize;
        let table_len = count.saturating_mul(8);
        if table_len > file_len.saturating_sub(header.len()) {
            return Err(CueError::Truncated {
                what: "wave bank size table",
                needed: table_len,
                available: file_len.saturating_sub(header.len()),
            });
        }
        let mut table = vec![0u8; table_len];
        read_exact(&mut file, &mut table)?;
        let mut reader = BankReader::new(&table, "wave bank size table");
        let mut sizes = Vec::with_capacity(count);
        for index in 0..count {
            let size = reader.read_i64()?;
            let size = usize::try_from(size).map_err(|_| {
                CueError::Malformed(format!("wave entry {} has size {}", index, size))
            })?;
            sizes.push(size);
        }

        if self.mode.is_some() {
            return Ok(sizes
                .into_iter()
                .map(|size| match size {
                    0 => WaveEntry::Empty,
                    size => WaveEntry::Streamed { size },
                })
                .collect());
        }

        let mut remaining = file_len - header.len() - table_len;
        let mut entries = Vec::with_capacity(count);
        for (index, size) in sizes.into_iter().enumerate() {
            if self.state() == WaveBankState::Disposed {
                return Ok(Vec::new());
            }
            if size == 0 {
                log::warn!("[WaveBank] '{}' entry {} is empty", self.name, index);
                entries.push(WaveEntry::Empty);
                continue;
            }
            if size > remaining {
                return Err(CueError::Truncated {
                    what: "wave bank payload",
                    needed: size,
                    available: remaining,
                });
            }
            remaining -= size;
            let mut bytes = vec![0u8; size];
            read_exact(&mut file, &mut bytes)?;
            entries.push(WaveEntry::Resident(Arc::new(ResidentWave::new(bytes))));
        }
        Ok(entries)
    }

    fn stream_path(&self, mode: StreamMode, index: usize) -> PathBuf {
        let folder = self.path.parent().unwrap_or_else(|| Path::new(""));
        folder.join(mode.folder()).join(format!(
            "{}.{}",
            index,
            self.engine.config().stream_extension
        ))
    }

    fn release_sounds(&self, backend: &mut dyn AudioBackend) {
        for entry in self.entries.read().iter() {
            if let WaveEntry::Resident(wave) = entry {
                wave.release(backend);
            }
        }
    }
}

impl Drop for WaveBankShared {
    fn drop(&mut self) {
        // The backend may be locked further up this thread's stack
        if let Some(mut backend) = self.engine.try_backend() {
            self.release_sounds(&mut **backend);
            return;
        }
        let sounds: Vec<SoundHandle> = self
            .entries
            .get_mut()
            .iter()
            .filter_map(|entry| match entry {
                WaveEntry::Resident(wave) => wave.take_sound(),
                _ => None,
            })
            .collect();
        log::debug!(
            "[WaveBank] '{}' dropped while the backend was busy, {} sounds deferred",
            self.name,
            sounds.len()
        );
        self.engine.defer_sound_release(sounds);
    }
}

/// Read exactly `buf.len()` bytes, reporting a short file as truncation
fn read_exact(file: &mut File, buf: &mut [u8]) -> CueResult<()> {
    file.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => CueError::Truncated {
            what: "wave bank",
            needed: buf.len(),
            available: 0,
        },
        _ => CueError::Io(e),
    })
}

/// Handle to a loaded or loading wave bank
///
/// Clones share the bank. The bank unloads when disposed or when the last
/// handle (including in-flight loads and streams) is dropped.
#[derive(Clone)]
pub struct WaveBank {
    shared: Arc<WaveBankShared>,
}

impl std::fmt::Debug for WaveBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaveBank")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .finish()
    }
}

impl WaveBank {
    /// Start loading a resident bank
    pub fn new(engine: &AudioEngine, path: impl AsRef<Path>) -> Self {
        Self::open(engine, path.as_ref(), None)
    }

    /// Start loading a streaming bank (size table only)
    pub fn streaming(engine: &AudioEngine, path: impl AsRef<Path>, mode: StreamMode) -> Self {
        Self::open(engine, path.as_ref(), Some(mode))
    }

    fn open(engine: &AudioEngine, path: &Path, mode: Option<StreamMode>) -> Self {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let shared = Arc::new(WaveBankShared {
            name,
            path: path.to_path_buf(),
            mode,
            state: AtomicU8::new(WaveBankState::Loading as u8),
            entries: RwLock::new(Vec::new()),
            engine: engine.clone(),
        });
        engine.register_wave_bank(Arc::downgrade(&shared));

        let job = Arc::clone(&shared);
        engine.io().submit(move || job.load());

        log::debug!("[WaveBank] '{}' queued from {}", shared.name, path.display());
        Self { shared }
    }

    pub(crate) fn from_shared(shared: Arc<WaveBankShared>) -> Self {
        Self { shared }
    }

    /// Bank name (file stem), matched by sound bank wave references
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// None for resident banks
    pub fn stream_mode(&self) -> Option<StreamMode> {
        self.shared.mode
    }

    pub fn state(&self) -> WaveBankState {
        self.shared.state()
    }

    pub fn is_loaded(&self) -> bool {
        self.state() == WaveBankState::Loaded
    }

    pub fn is_disposed(&self) -> bool {
        self.state() == WaveBankState::Disposed
    }

    /// Number of entries (0 until loaded)
    pub fn entry_count(&self) -> usize {
        self.shared.entries.read().len()
    }

    /// Payload size of an entry
    pub fn entry_size(&self, index: usize) -> Option<usize> {
        match self.shared.entries.read().get(index)? {
            WaveEntry::Resident(wave) => Some(wave.bytes().len()),
            WaveEntry::Streamed { size } => Some(*size),
            WaveEntry::Empty => Some(0),
        }
    }

    /// Resolve an entry to something a voice can play
    ///
    /// None while the bank is not loaded, for an out-of-range index and for
    /// empty entries.
    pub fn resolve(&self, index: usize) -> Option<WaveSource> {
        if !self.is_loaded() {
            return None;
        }
        match self.shared.entries.read().get(index)? {
            WaveEntry::Resident(wave) => Some(WaveSource::Resident(Arc::clone(wave))),
            WaveEntry::Streamed { size } => {
                let mode = self.shared.mode?;
                Some(WaveSource::Stream {
                    bank: self.clone(),
                    index,
                    path: self.shared.stream_path(mode, index),
                    size: *size,
                    persist: mode == StreamMode::Deferred,
                })
            }
            WaveEntry::Empty => None,
        }
    }

    /// Keep a streamed entry in memory from now on
    pub(crate) fn promote(&self, index: usize, bytes: Vec<u8>) -> Option<Arc<ResidentWave>> {
        if self.is_disposed() {
            return None;
        }
        let mut entries = self.shared.entries.write();
        let entry = entries.get_mut(index)?;
        match entry {
            WaveEntry::Resident(wave) => Some(Arc::clone(wave)),
            WaveEntry::Streamed { .. } => {
                let wave = Arc::new(ResidentWave::new(bytes));
                *entry = WaveEntry::Resident(Arc::clone(&wave));
                log::debug!("[WaveBank] '{}' entry {} now resident", self.name(), index);
                Some(wave)
            }
            WaveEntry::Empty => None,
        }
    }

    /// Release every shared backend sound; entries stay loaded
    pub fn release_all(&self) {
        let mut backend = self.shared.engine.backend();
        self.shared.release_sounds(&mut **backend);
    }

    /// Unload the bank; voices already playing its sounds are stopped
    pub fn dispose(&self) {
        let previous = self
            .shared
            .state
            .swap(WaveBankState::Disposed as u8, Ordering::AcqRel);
        if previous == WaveBankState::Disposed as u8 {
            return;
        }
        self.release_all();
        self.shared.entries.write().clear();
        self.shared.engine.unregister_wave_bank(&self.shared);
        log::debug!("[WaveBank] '{}' disposed", self.name());
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENCODING
// ═══════════════════════════════════════════════════════════════════════════════

/// Build a resident wave bank file
pub fn encode_wave_bank<B: AsRef<[u8]>>(entries: &[B]) -> Vec<u8> {
    let mut writer = BankWriter::new();
    writer
        .write_i32(WAVE_BANK_FORMAT_VERSION)
        .write_count(entries.len());
    for entry in entries {
        writer.write_i64(entry.as_ref().len() as i64);
    }
    for entry in entries {
        writer.write_bytes(entry.as_ref());
    }
    writer.into_bytes()
}

/// Build a streaming wave bank file (header and size table only)
pub fn encode_streaming_wave_bank(sizes: &[usize]) -> Vec<u8> {
    let mut writer = BankWriter::new();
    writer
        .write_i32(WAVE_BANK_FORMAT_VERSION)
        .write_count(sizes.len());
    for &size in sizes {
        writer.write_i64(size as i64);
    }
    writer.into_bytes()
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
