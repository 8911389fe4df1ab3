use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use crate::primitives::concurrency::PageLatch;
use crate::types::PageId;

/// One resident page: its bytes, its latch and its bookkeeping flags.
///
/// Bytes are individually atomic so optimistic readers may race writers
/// without undefined behaviour; the latch generation tells them when to retry.
pub struct Frame {
    pub id: PageId,
    pub latch: PageLatch,
    bytes: Box<[AtomicU8]>,
    pub dirty: AtomicBool,
    pub pin_count: AtomicU32,
}

impl Frame {
    pub fn new(id: PageId, page_size: usize) -> Self {
        Self {
            id,
            latch: PageLatch::new(),
            bytes: (0..page_size).map(|_| AtomicU8::new(0)).collect(),
            dirty: AtomicBool::new(false),
            pin_count: AtomicU32::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    // Callers bounds-check `addr..addr + dst.len()` against the cursor window first.
    pub fn load(&self, addr: usize, dst: &mut [u8]) {
        let src = &self.bytes[addr..addr + dst.len()];
        for (out, cell) in dst.iter_mut().zip(src) {
            *out = cell.load(Ordering::Relaxed);
        }
    }

    pub fn store(&self, addr: usize, src: &[u8]) {
        let dst = &self.bytes[addr..addr + src.len()];
        for (cell, byte) in dst.iter().zip(src) {
            cell.store(*byte, Ordering::Relaxed);
        }
    }

    pub fn fill(&self, addr: usize, len: usize, byte: u8) {
        for cell in &self.bytes[addr..addr + len] {
            cell.store(byte, Ordering::Relaxed);
        }
    }

    pub fn pin(&self) {
        self.pin_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn unpin(&self) {
        self.pin_count.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }
}
