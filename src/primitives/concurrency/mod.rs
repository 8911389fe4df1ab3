#![forbid(unsafe_code)]
//! Page latches.
//!
//! A [`PageLatch`] pairs an exclusive writer latch with a seqlock-style
//! generation counter. Writers serialize on the latch and bump the generation
//! to an odd value while they hold it, and back to even when they release it.
//! Readers never block: they capture a [`ReadStamp`], read, and then ask the
//! latch whether the stamp is still valid. A stale stamp means a writer may
//! have touched the bytes mid-read and the read has to be redone.

use std::sync::atomic::{fence, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// Seqlock generation plus writer latch guarding one page.
#[derive(Clone, Default)]
pub struct PageLatch {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    generation: AtomicU64,
    state: Mutex<LatchState>,
    released: Condvar,
}

#[derive(Default, Debug)]
struct LatchState {
    writer: bool,
    waiting_writers: u32,
}

/// Generation observed at the start of an optimistic read.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ReadStamp(u64);

impl ReadStamp {
    /// Whether a writer held the latch when this stamp was taken.
    pub fn is_write_in_progress(self) -> bool {
        self.0 & 1 == 1
    }
}

/// Snapshot of latch state for observability.
#[derive(Default, Debug, Clone, Copy)]
pub struct LatchSnapshot {
    /// Current generation counter.
    pub generation: u64,
    /// Whether a writer currently holds the latch.
    pub writer: bool,
    /// Number of writers blocked waiting for the latch.
    pub waiting_writers: u32,
}

/// Guard representing a held writer latch. Dropping it publishes the write.
pub struct WriteLatch {
    inner: Arc<Inner>,
}

impl PageLatch {
    /// Creates an unlatched page latch at generation zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Captures the current generation for an optimistic read.
    pub fn begin_read(&self) -> ReadStamp {
        ReadStamp(self.inner.generation.load(Ordering::Acquire))
    }

    /// Returns `true` when no writer started or finished since `stamp` was taken.
    pub fn validate(&self, stamp: ReadStamp) -> bool {
        if stamp.is_write_in_progress() {
            return false;
        }
        fence(Ordering::Acquire);
        self.inner.generation.load(Ordering::Relaxed) == stamp.0
    }

    /// Acquires the writer latch, blocking while another writer holds it.
    pub fn acquire_write(&self) -> WriteLatch {
        let mut state = self.inner.state.lock();
        while state.writer {
            state.waiting_writers += 1;
            self.inner.released.wait(&mut state);
            state.waiting_writers -= 1;
        }
        state.writer = true;
        drop(state);
        self.open_generation();
        WriteLatch {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Whether a writer currently holds the latch.
    pub fn is_write_locked(&self) -> bool {
        self.inner.state.lock().writer
    }

    /// Returns a snapshot of the latch state.
    pub fn snapshot(&self) -> LatchSnapshot {
        let state = self.inner.state.lock();
        LatchSnapshot {
            generation: self.inner.generation.load(Ordering::Acquire),
            writer: state.writer,
            waiting_writers: state.waiting_writers,
        }
    }

    // Writers are serialized by the latch, so a plain load/store pair suffices.
    fn open_generation(&self) {
        let current = self.inner.generation.load(Ordering::Relaxed);
        self.inner
            .generation
            .store(current.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);
    }
}

impl Drop for WriteLatch {
    fn drop(&mut self) {
        let current = self.inner.generation.load(Ordering::Relaxed);
        self.inner
            .generation
            .store(current.wrapping_add(1), Ordering::Release);
        let mut state = self.inner.state.lock();
        state.writer = false;
        if state.waiting_writers > 0 {
            self.inner.released.notify_one();
        }
    }
}
