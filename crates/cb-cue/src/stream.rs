//! Asynchronous I/O and streaming buffers
//!
//! ```text
//! control thread                      I/O thread
//! ──────────────                      ──────────
//! IoWorker::submit(job) ──channel──►  job()
//! StreamRead::start ───────────────►  read file into pooled buffer
//! StreamRead::take  ◄──── state ────  Ready / Failed / Released (aborted)
//! ```
//!
//! Completions never call into the backend. They only publish results
//! that the control thread picks up on its next tick.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use parking_lot::Mutex;

// ═══════════════════════════════════════════════════════════════════════════════
// I/O WORKER
// ═══════════════════════════════════════════════════════════════════════════════

type IoJob = Box<dyn FnOnce() + Send + 'static>;

enum IoCommand {
    Run(IoJob),
    Shutdown,
}

/// Single background thread running file reads in submission order
pub struct IoWorker {
    sender: Sender<IoCommand>,
    handle: Option<JoinHandle<()>>,
}

impl IoWorker {
    pub fn new(name: &str) -> Self {
        let (sender, receiver) = unbounded();
        let handle = match thread::Builder::new()
            .name(name.to_string())
            .spawn(move || Self::worker_loop(receiver))
        {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::error!(
                    "[IO] Failed to spawn I/O thread: {}. Reads will run inline.",
                    e
                );
                None
            }
        };
        Self { sender, handle }
    }

    fn worker_loop(receiver: Receiver<IoCommand>) {
        while let Ok(command) = receiver.recv() {
            match command {
                IoCommand::Run(job) => job(),
                IoCommand::Shutdown => break,
            }
        }
    }

    /// Queue a job behind every job submitted before it
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        if self.handle.is_none() {
            job();
            return;
        }
        if let Err(e) = self.sender.send(IoCommand::Run(Box::new(job))) {
            // Worker gone; run on the caller so the request still completes
            if let IoCommand::Run(job) = e.into_inner() {
                job();
            }
        }
    }

    /// Block until every job submitted so far has run
    pub fn wait_idle(&self) {
        if self.is_worker_thread() {
            return;
        }
        let (done_tx, done_rx) = bounded::<()>(1);
        self.submit(move || {
            let _ = done_tx.send(());
        });
        let _ = done_rx.recv();
    }

    fn is_worker_thread(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|h| h.thread().id() == thread::current().id())
    }
}

impl Drop for IoWorker {
    fn drop(&mut self) {
        let _ = self.sender.send(IoCommand::Shutdown);
        // The last engine handle may be released by a job on the worker itself
        if self.is_worker_thread() {
            return;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUFFER POOL
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
struct PoolSlots {
    in_use: usize,
    spare: Vec<Vec<u8>>,
}

/// Small fixed pool of streaming buffers
///
/// Every slot is allocated up front at `buffer_size` and reused. At most
/// `slots` pooled buffers are handed out at once. A request beyond that, or
/// larger than `buffer_size`, gets a one-off heap buffer.
#[derive(Debug)]
pub struct StreamBufferPool {
    buffer_size: usize,
    slots: usize,
    state: Mutex<PoolSlots>,
    fallbacks: AtomicUsize,
}

impl StreamBufferPool {
    pub fn new(slots: usize, buffer_size: usize) -> Self {
        Self {
            buffer_size,
            slots,
            state: Mutex::new(PoolSlots {
                in_use: 0,
                spare: (0..slots).map(|_| Vec::with_capacity(buffer_size)).collect(),
            }),
            fallbacks: AtomicUsize::new(0),
        }
    }

    /// Get a zeroed buffer of `len` bytes
    pub fn acquire(self: &Arc<Self>, len: usize) -> StreamBuffer {
        if len <= self.buffer_size {
            let mut state = self.state.lock();
            if state.in_use < self.slots {
                state.in_use += 1;
                let mut data = state
                    .spare
                    .pop()
                    .unwrap_or_else(|| Vec::with_capacity(self.buffer_size));
                drop(state);
                data.clear();
                data.resize(len, 0);
                return StreamBuffer {
                    data,
                    pool: Some(Arc::clone(self)),
                };
            }
        }

        self.fallbacks.fetch_add(1, Ordering::Relaxed);
        log::info!(
            "[Stream] pool exhausted or entry too large ({} bytes), using heap buffer",
            len
        );
        StreamBuffer {
            data: vec![0; len],
            pool: None,
        }
    }

    fn release(&self, data: Vec<u8>) {
        let mut state = self.state.lock();
        state.in_use = state.in_use.saturating_sub(1);
        if state.spare.len() < self.slots {
            state.spare.push(data);
        }
    }

    /// Pooled buffers currently handed out
    pub fn in_use(&self) -> usize {
        self.state.lock().in_use
    }

    /// Heap fallbacks since creation
    pub fn fallback_count(&self) -> usize {
        self.fallbacks.load(Ordering::Relaxed)
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

/// Buffer from a `StreamBufferPool`, returned to it on drop
#[derive(Debug)]
pub struct StreamBuffer {
    data: Vec<u8>,
    pool: Option<Arc<StreamBufferPool>>,
}

impl StreamBuffer {
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True if this buffer occupies a pool slot
    pub fn is_pooled(&self) -> bool {
        self.pool.is_some()
    }
}

impl Drop for StreamBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.release(std::mem::take(&mut self.data));
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STREAM READ
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
enum ReadState {
    Pending,
    Ready(StreamBuffer),
    Failed,
    /// Taken by the voice or dropped after an abort
    Released,
}

/// In-flight read of one streamed wave entry
#[derive(Debug)]
pub struct StreamRead {
    path: PathBuf,
    abort: AtomicBool,
    state: Mutex<ReadState>,
}

impl StreamRead {
    /// Queue a read of `path` on the I/O worker
    ///
    /// `expected_len` is the size recorded in the bank's size table.
    pub fn start(
        worker: &IoWorker,
        pool: &Arc<StreamBufferPool>,
        path: PathBuf,
        expected_len: usize,
    ) -> Arc<Self> {
        let read = Arc::new(Self {
            path,
            abort: AtomicBool::new(false),
            state: Mutex::new(ReadState::Pending),
        });

        let job_read = Arc::clone(&read);
        let pool = Arc::clone(pool);
        worker.submit(move || job_read.complete(&pool, expected_len));
        read
    }

    fn complete(&self, pool: &Arc<StreamBufferPool>, expected_len: usize) {
        let result = if self.abort.load(Ordering::Acquire) {
            None
        } else {
            match read_entry(&self.path, pool, expected_len) {
                Ok(buffer) => Some(buffer),
                Err(e) => {
                    log::warn!("[Stream] read of {} failed: {}", self.path.display(), e);
                    *self.state.lock() = ReadState::Failed;
                    return;
                }
            }
        };

        let mut state = self.state.lock();
        match result {
            Some(buffer) if !self.abort.load(Ordering::Acquire) => {
                *state = ReadState::Ready(buffer);
            }
            _ => {
                log::debug!("[Stream] {} aborted, releasing", self.path.display());
                *state = ReadState::Released;
            }
        }
    }

    /// Ask the completion to drop its data instead of publishing it
    pub fn abort(&self) {
        self.abort.store(true, Ordering::Release);
        let mut state = self.state.lock();
        if matches!(*state, ReadState::Ready(_)) {
            *state = ReadState::Released;
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.state.lock(), ReadState::Pending)
    }

    pub fn is_failed(&self) -> bool {
        matches!(*self.state.lock(), ReadState::Failed)
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }

    /// Take the completed data, if any
    pub fn take(&self) -> Option<StreamBuffer> {
        let mut state = self.state.lock();
        if !matches!(*state, ReadState::Ready(_)) {
            return None;
        }
        match std::mem::replace(&mut *state, ReadState::Released) {
            ReadState::Ready(buffer) => Some(buffer),
            _ => None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_entry(
    path: &Path,
    pool: &Arc<StreamBufferPool>,
    expected_len: usize,
) -> std::io::Result<StreamBuffer> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len() as usize;
    if len != expected_len {
        log::warn!(
            "[Stream] {} is {} bytes, size table says {}",
            path.display(),
            len,
            expected_len
        );
    }
    let mut buffer = pool.acquire(len);
    file.read_exact(buffer.as_mut_slice())?;
    Ok(buffer)
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_runs_in_order() {
        let worker = IoWorker::new("test-io");
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..10 {
            let log = Arc::clone(&log);
            worker.submit(move || log.lock().push(i));
        }
        worker.wait_idle();
        assert_eq!(*log.lock(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_worker_drop_drains() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let worker = IoWorker::new("test-io");
            for _ in 0..5 {
                let count = Arc::clone(&count);
                worker.submit(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                });
            }
        }
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_pool_two_slots_then_heap() {
        let pool = Arc::new(StreamBufferPool::new(2, 64));

        let a = pool.acquire(10);
        let b = pool.acquire(64);
        let c = pool.acquire(10);
        assert!(a.is_pooled());
        assert!(b.is_pooled());
        assert!(!c.is_pooled());
        assert_eq!(pool.in_use(), 2);
        assert_eq!(pool.fallback_count(), 1);

        drop(a);
        assert_eq!(pool.in_use(), 1);
        let d = pool.acquire(5);
        assert!(d.is_pooled());
        assert_eq!(d.len(), 5);
        assert!(d.as_slice().iter().all(|&x| x == 0));
    }

    #[test]
    fn test_pool_slots_allocated_up_front() {
        let pool = Arc::new(StreamBufferPool::new(2, 64));
        {
            let state = pool.state.lock();
            assert_eq!(state.spare.len(), 2);
            assert!(state.spare.iter().all(|buffer| buffer.capacity() >= 64));
        }

        let first = pool.acquire(8);
        assert!(first.data.capacity() >= 64);
        let reused = first.data.as_ptr();
        drop(first);

        // The same allocation comes back, sized for the largest entry
        let again = pool.acquire(64);
        assert_eq!(again.data.as_ptr(), reused);
        assert_eq!(pool.fallback_count(), 0);
    }

    #[test]
    fn test_pool_oversized_goes_to_heap() {
        let pool = Arc::new(StreamBufferPool::new(2, 16));
        let big = pool.acquire(17);
        assert!(!big.is_pooled());
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.fallback_count(), 1);
    }

    #[test]
    fn test_stream_read_completes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.mp3");
        std::fs::write(&path, [7u8; 32]).unwrap();

        let worker = IoWorker::new("test-io");
        let pool = Arc::new(StreamBufferPool::new(2, 1024));
        let read = StreamRead::start(&worker, &pool, path, 32);
        worker.wait_idle();

        assert!(!read.is_pending());
        let buffer = read.take().unwrap();
        assert_eq!(buffer.as_slice(), &[7u8; 32]);
        assert!(read.take().is_none());
        drop(buffer);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_stream_read_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let worker = IoWorker::new("test-io");
        let pool = Arc::new(StreamBufferPool::new(2, 1024));
        let read = StreamRead::start(&worker, &pool, dir.path().join("missing.mp3"), 4);
        worker.wait_idle();

        assert!(read.is_failed());
        assert!(read.take().is_none());
    }

    #[test]
    fn test_abort_releases_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.mp3");
        std::fs::write(&path, [1u8; 16]).unwrap();

        let worker = IoWorker::new("test-io");
        let pool = Arc::new(StreamBufferPool::new(2, 1024));

        // Abort after completion
        let read = StreamRead::start(&worker, &pool, path.clone(), 16);
        worker.wait_idle();
        read.abort();
        assert!(read.take().is_none());
        assert_eq!(pool.in_use(), 0);

        // Abort while queued behind a blocked job
        let (gate_tx, gate_rx) = bounded::<()>(0);
        worker.submit(move || {
            let _ = gate_rx.recv();
        });
        let read = StreamRead::start(&worker, &pool, path, 16);
        read.abort();
        let _ = gate_tx.send(());
        worker.wait_idle();
        assert!(read.is_aborted());
        assert!(read.take().is_none());
        assert_eq!(pool.in_use(), 0);
    }
}
