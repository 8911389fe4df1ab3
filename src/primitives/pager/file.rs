use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;
use tracing::debug;

use super::cursor::{PageAccess, PageCursor};
use super::frame::Frame;
use crate::storage::{NoopMetrics, StoreMetrics};
use crate::types::{PageId, Result, StrandError};

/// Default page size in bytes.
pub const DEFAULT_PAGE_SIZE: u32 = 8192;
/// Smallest page size accepted by [`PagerOptions::validate`].
pub const MIN_PAGE_SIZE: u32 = 64;
/// Largest page size accepted by [`PagerOptions::validate`].
pub const MAX_PAGE_SIZE: u32 = 1 << 20;

/// Configuration options for a [`PagedFile`].
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PagerOptions {
    /// Size of each page in bytes. Must be a power of two.
    pub page_size: u32,
    /// Number of zeroed pages allocated when the file is opened.
    pub initial_pages: u64,
    /// Upper bound on the number of pages, if any.
    pub max_pages: Option<u64>,
}

impl Default for PagerOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            initial_pages: 0,
            max_pages: None,
        }
    }
}

impl PagerOptions {
    /// Sets the page size.
    pub fn page_size(mut self, bytes: u32) -> Self {
        self.page_size = bytes;
        self
    }

    /// Sets the number of pages allocated up front.
    pub fn initial_pages(mut self, pages: u64) -> Self {
        self.initial_pages = pages;
        self
    }

    /// Caps the number of pages the file may grow to.
    pub fn max_pages(mut self, pages: u64) -> Self {
        self.max_pages = Some(pages);
        self
    }

    /// Checks the page size and page limits.
    pub fn validate(&self) -> Result<()> {
        if !self.page_size.is_power_of_two() {
            return Err(StrandError::Config(format!(
                "page size {} is not a power of two",
                self.page_size
            )));
        }
        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.page_size) {
            return Err(StrandError::Config(format!(
                "page size {} outside [{MIN_PAGE_SIZE}, {MAX_PAGE_SIZE}]",
                self.page_size
            )));
        }
        if let Some(max) = self.max_pages {
            if self.initial_pages > max {
                return Err(StrandError::Config(format!(
                    "initial pages {} exceed max pages {max}",
                    self.initial_pages
                )));
            }
        }
        Ok(())
    }
}

/// Snapshot of paged file statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PagerStats {
    /// Page size in bytes.
    pub page_size: u32,
    /// Pages currently allocated.
    pub pages: u64,
    /// Pages with at least one bound cursor.
    pub pinned: u64,
    /// Pages written since allocation.
    pub dirty: u64,
    /// Pages whose write latch is held.
    pub write_locked: u64,
    /// Writers blocked on a page latch, summed over all pages.
    pub waiting_writers: u64,
}

/// In-memory page cache backing one store.
///
/// Pages are allocated on demand and never evicted. Cursors obtained through
/// [`PagedFile::io`] bind to one page at a time.
pub struct PagedFile {
    options: PagerOptions,
    frames: RwLock<Vec<Arc<Frame>>>,
    metrics: Arc<dyn StoreMetrics>,
}

impl PagedFile {
    /// Opens an empty paged file with no metrics.
    pub fn new(options: PagerOptions) -> Result<Arc<Self>> {
        Self::with_metrics(options, Arc::new(NoopMetrics))
    }

    /// Opens an empty paged file reporting to `metrics`.
    pub fn with_metrics(options: PagerOptions, metrics: Arc<dyn StoreMetrics>) -> Result<Arc<Self>> {
        options.validate()?;
        let file = Self {
            options,
            frames: RwLock::new(Vec::new()),
            metrics,
        };
        if file.options.initial_pages > 0 {
            file.ensure_page(PageId(file.options.initial_pages - 1))?;
        }
        debug!(
            page_size = file.options.page_size,
            initial_pages = file.options.initial_pages,
            "pager.open"
        );
        Ok(Arc::new(file))
    }

    /// Returns the page size in bytes.
    pub fn page_size(&self) -> usize {
        self.options.page_size as usize
    }

    /// Returns the number of allocated pages.
    pub fn page_count(&self) -> u64 {
        self.frames.read().len() as u64
    }

    /// Appends a zeroed page and returns its id.
    pub fn allocate_page(&self) -> Result<PageId> {
        let mut frames = self.frames.write();
        let id = PageId(frames.len() as u64);
        self.grow_to(&mut frames, id)?;
        Ok(id)
    }

    /// Grows the file until `id` is a valid page.
    pub fn ensure_page(&self, id: PageId) -> Result<()> {
        if id.0 < self.page_count() {
            return Ok(());
        }
        let mut frames = self.frames.write();
        self.grow_to(&mut frames, id)
    }

    /// Opens a cursor that will bind `start` on its first [`PageCursor::next`].
    pub fn io(self: &Arc<Self>, start: PageId, access: PageAccess) -> PageCursor {
        PageCursor::new(Arc::clone(self), start, access)
    }

    /// Whether the page's write latch is currently held.
    pub fn is_write_locked(&self, id: PageId) -> Result<bool> {
        let frame = self.frame(id).ok_or(StrandError::NotFound("page"))?;
        Ok(frame.latch.is_write_locked())
    }

    /// Returns a snapshot of file statistics.
    pub fn stats(&self) -> PagerStats {
        let frames = self.frames.read();
        let mut stats = PagerStats {
            page_size: self.options.page_size,
            pages: frames.len() as u64,
            ..PagerStats::default()
        };
        for frame in frames.iter() {
            if frame.pin_count.load(std::sync::atomic::Ordering::Acquire) > 0 {
                stats.pinned += 1;
            }
            if frame.dirty.load(std::sync::atomic::Ordering::Acquire) {
                stats.dirty += 1;
            }
            let latch = frame.latch.snapshot();
            if latch.writer {
                stats.write_locked += 1;
            }
            stats.waiting_writers += u64::from(latch.waiting_writers);
        }
        stats
    }

    pub(crate) fn frame(&self, id: PageId) -> Option<Arc<Frame>> {
        let idx = usize::try_from(id.0).ok()?;
        self.frames.read().get(idx).cloned()
    }

    pub(crate) fn metrics(&self) -> &Arc<dyn StoreMetrics> {
        &self.metrics
    }

    fn grow_to(&self, frames: &mut Vec<Arc<Frame>>, id: PageId) -> Result<()> {
        if let Some(max) = self.options.max_pages {
            if id.0 >= max {
                return Err(StrandError::Invalid("paged file reached its page limit"));
            }
        }
        while (frames.len() as u64) <= id.0 {
            let next = PageId(frames.len() as u64);
            frames.push(Arc::new(Frame::new(next, self.page_size())));
            self.metrics.page_allocated();
            debug!(page = next.0, "pager.allocate_page");
        }
        Ok(())
    }
}

impl fmt::Display for PagerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "page_size={} pages={} pinned={} dirty={} write_locked={} waiting_writers={}",
            self.page_size,
            self.pages,
            self.pinned,
            self.dirty,
            self.write_locked,
            self.waiting_writers
        )
    }
}
