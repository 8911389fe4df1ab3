use std::mem::size_of;
use std::sync::Arc;

use tracing::trace;

use super::file::PagedFile;
use super::frame::Frame;
use crate::primitives::concurrency::{ReadStamp, WriteLatch};
use crate::types::{PageId, Result, StrandError};

/// How a [`PageCursor`] intends to use the pages it binds.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PageAccess {
    /// Optimistic, non-blocking reads validated with [`PageCursor::should_retry`].
    Read,
    /// Exclusive writes; binding takes the page write latch.
    Write,
}

struct Bound {
    frame: Arc<Frame>,
    base: usize,
    len: usize,
    stamp: ReadStamp,
    latch: Option<WriteLatch>,
}

/// A rebindable, bounds-checked window over one page.
///
/// Every access is addressed relative to the window base and checked against
/// the window length; nothing is clamped. All integers are big-endian.
///
/// Readers follow the optimistic protocol: bind, read, then call
/// [`PageCursor::should_retry`] and redo the reads while it returns `true`.
pub struct PageCursor {
    file: Arc<PagedFile>,
    access: PageAccess,
    next_id: Option<PageId>,
    bound: Option<Bound>,
    offset: usize,
}

macro_rules! scalar_access {
    ($($get:ident, $get_next:ident, $put:ident, $put_next:ident => $ty:ty;)*) => {
        $(
            #[doc = concat!("Reads a `", stringify!($ty), "` at `offset`.")]
            pub fn $get(&self, offset: usize) -> Result<$ty> {
                Ok(<$ty>::from_be_bytes(self.read_array(offset)?))
            }

            #[doc = concat!("Reads a `", stringify!($ty), "` at the running offset and advances it.")]
            pub fn $get_next(&mut self) -> Result<$ty> {
                let value = self.$get(self.offset)?;
                self.offset += size_of::<$ty>();
                Ok(value)
            }

            #[doc = concat!("Writes a `", stringify!($ty), "` at `offset`.")]
            pub fn $put(&mut self, offset: usize, value: $ty) -> Result<()> {
                self.write_at(offset, &value.to_be_bytes())
            }

            #[doc = concat!("Writes a `", stringify!($ty), "` at the running offset and advances it.")]
            pub fn $put_next(&mut self, value: $ty) -> Result<()> {
                self.$put(self.offset, value)?;
                self.offset += size_of::<$ty>();
                Ok(())
            }
        )*
    };
}

macro_rules! array_access {
    ($($get:ident, $put:ident => $ty:ty;)*) => {
        $(
            #[doc = concat!("Fills `dst` with consecutive `", stringify!($ty), "` values starting at `offset`.")]
            pub fn $get(&self, offset: usize, dst: &mut [$ty]) -> Result<()> {
                const WIDTH: usize = size_of::<$ty>();
                let size = self.array_size(offset, dst.len(), WIDTH)?;
                let (frame, addr) = self.locate(offset, size)?;
                let mut raw = [0u8; WIDTH];
                for (i, slot) in dst.iter_mut().enumerate() {
                    frame.load(addr + i * WIDTH, &mut raw);
                    *slot = <$ty>::from_be_bytes(raw);
                }
                Ok(())
            }

            #[doc = concat!("Writes `src` as consecutive `", stringify!($ty), "` values starting at `offset`.")]
            pub fn $put(&mut self, offset: usize, src: &[$ty]) -> Result<()> {
                const WIDTH: usize = size_of::<$ty>();
                self.ensure_writable()?;
                let size = self.array_size(offset, src.len(), WIDTH)?;
                let (frame, addr) = self.locate(offset, size)?;
                for (i, value) in src.iter().enumerate() {
                    frame.store(addr + i * WIDTH, &value.to_be_bytes());
                }
                Ok(())
            }
        )*
    };
}

impl PageCursor {
    pub(crate) fn new(file: Arc<PagedFile>, start: PageId, access: PageAccess) -> Self {
        Self {
            file,
            access,
            next_id: Some(start),
            bound: None,
            offset: 0,
        }
    }

    /// Binds the next page in sequence; the first call binds the start page.
    ///
    /// Read cursors return `false` past the end of the file. Write cursors
    /// grow the file instead.
    pub fn next(&mut self) -> Result<bool> {
        let Some(id) = self.next_id else {
            return Ok(false);
        };
        let bound = self.bind(id)?;
        if bound {
            self.next_id = Some(PageId(id.0 + 1));
        }
        Ok(bound)
    }

    /// Rebinds the cursor to `id`.
    pub fn next_page(&mut self, id: PageId) -> Result<bool> {
        self.next_id = Some(id);
        self.next()
    }

    /// Returns `true` when a concurrent writer may have changed the page since
    /// it was bound or since the last `true` result. The caller must discard
    /// everything read since then and read again; the running offset is reset
    /// to zero. Write cursors never need to retry.
    pub fn should_retry(&mut self) -> Result<bool> {
        let bound = self.bound.as_mut().ok_or(StrandError::NotInitialized)?;
        if bound.latch.is_some() || bound.frame.latch.validate(bound.stamp) {
            return Ok(false);
        }
        let mut stamp = bound.frame.latch.begin_read();
        while stamp.is_write_in_progress() {
            std::thread::yield_now();
            stamp = bound.frame.latch.begin_read();
        }
        bound.stamp = stamp;
        self.offset = 0;
        self.file.metrics().optimistic_retry();
        trace!(page = bound.frame.id.0, "pager.cursor.retry");
        Ok(true)
    }

    /// Narrows the accessible window to `len` bytes starting at `base`.
    pub fn restrict(&mut self, base: usize, len: usize) -> Result<()> {
        let bound = self.bound.as_mut().ok_or(StrandError::NotInitialized)?;
        let page_len = bound.frame.len();
        match base.checked_add(len) {
            Some(end) if end <= page_len => {
                bound.base = base;
                bound.len = len;
                self.offset = 0;
                Ok(())
            }
            _ => Err(StrandError::OutOfBounds {
                offset: base,
                size: len,
                bound: page_len,
            }),
        }
    }

    /// Widens the window back to the whole page.
    pub fn unrestrict(&mut self) -> Result<()> {
        let bound = self.bound.as_mut().ok_or(StrandError::NotInitialized)?;
        bound.base = 0;
        bound.len = bound.frame.len();
        Ok(())
    }

    /// Id of the bound page.
    pub fn page_id(&self) -> Option<PageId> {
        self.bound.as_ref().map(|bound| bound.frame.id)
    }

    /// Page size of the underlying file.
    pub fn page_size(&self) -> usize {
        self.file.page_size()
    }

    /// Length of the accessible window.
    pub fn bound(&self) -> Result<usize> {
        self.bound
            .as_ref()
            .map(|bound| bound.len)
            .ok_or(StrandError::NotInitialized)
    }

    /// Whether the cursor currently holds the bound page's write latch.
    pub fn is_write_locked(&self) -> bool {
        self.bound
            .as_ref()
            .is_some_and(|bound| bound.latch.is_some())
    }

    /// Access mode the cursor was opened with.
    pub fn access(&self) -> PageAccess {
        self.access
    }

    /// Current running offset used by the sequential accessors.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Moves the running offset.
    pub fn set_offset(&mut self, offset: usize) {
        self.offset = offset;
    }

    scalar_access! {
        get_u8, get_u8_next, put_u8, put_u8_next => u8;
        get_i8, get_i8_next, put_i8, put_i8_next => i8;
        get_u16, get_u16_next, put_u16, put_u16_next => u16;
        get_i16, get_i16_next, put_i16, put_i16_next => i16;
        get_u32, get_u32_next, put_u32, put_u32_next => u32;
        get_i32, get_i32_next, put_i32, put_i32_next => i32;
        get_u64, get_u64_next, put_u64, put_u64_next => u64;
        get_i64, get_i64_next, put_i64, put_i64_next => i64;
    }

    array_access! {
        get_u16s, put_u16s => u16;
        get_u32s, put_u32s => u32;
        get_u64s, put_u64s => u64;
    }

    /// Reads a two-byte character (one UTF-16 code unit outside the surrogate range).
    pub fn get_char(&self, offset: usize) -> Result<char> {
        let unit = self.get_u16(offset)?;
        char::from_u32(u32::from(unit)).ok_or(StrandError::Corruption(
            "surrogate code unit stored as char",
        ))
    }

    /// Writes a two-byte character. Characters outside the basic plane are rejected.
    pub fn put_char(&mut self, offset: usize, value: char) -> Result<()> {
        let unit = u16::try_from(u32::from(value))
            .map_err(|_| StrandError::Invalid("char does not fit in two bytes"))?;
        self.put_u16(offset, unit)
    }

    /// Copies `dst.len()` bytes starting at `offset` into `dst`.
    pub fn get_bytes(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        let (frame, addr) = self.locate(offset, dst.len())?;
        frame.load(addr, dst);
        Ok(())
    }

    /// Reads into `dst` at the running offset and advances it.
    pub fn get_bytes_next(&mut self, dst: &mut [u8]) -> Result<()> {
        self.get_bytes(self.offset, dst)?;
        self.offset += dst.len();
        Ok(())
    }

    /// Writes `src` starting at `offset`.
    pub fn put_bytes(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        self.write_at(offset, src)
    }

    /// Writes `src` at the running offset and advances it.
    pub fn put_bytes_next(&mut self, src: &[u8]) -> Result<()> {
        self.write_at(self.offset, src)?;
        self.offset += src.len();
        Ok(())
    }

    /// Stamps `len` bytes starting at `offset` with `byte`.
    pub fn fill(&mut self, offset: usize, len: usize, byte: u8) -> Result<()> {
        self.ensure_writable()?;
        let (frame, addr) = self.locate(offset, len)?;
        frame.fill(addr, len, byte);
        Ok(())
    }

    /// Zero-fills the whole window, as if the page were freshly allocated.
    pub fn zap_page(&mut self) -> Result<()> {
        let len = self.bound()?;
        self.fill(0, len, 0)
    }

    /// Copies `len` bytes from `src_offset` in this window to `target_offset`
    /// in `target`'s window. Both cursors must be bound and both ranges must
    /// be in bounds; nothing is copied otherwise. Returns the bytes copied.
    pub fn copy_to(
        &self,
        src_offset: usize,
        target: &mut PageCursor,
        target_offset: usize,
        len: usize,
    ) -> Result<usize> {
        let (frame, addr) = self.locate(src_offset, len)?;
        target.ensure_writable()?;
        target.locate(target_offset, len)?;
        let mut buf = vec![0u8; len];
        frame.load(addr, &mut buf);
        target.write_at(target_offset, &buf)?;
        Ok(len)
    }

    /// Copies this whole window to the start of `target`'s window.
    pub fn transfer_to(&self, target: &mut PageCursor) -> Result<usize> {
        let len = self.bound()?;
        self.copy_to(0, target, 0, len)
    }

    /// Unbinds the cursor, releasing any write latch.
    pub fn close(&mut self) {
        self.release();
        self.next_id = None;
    }

    fn bind(&mut self, id: PageId) -> Result<bool> {
        self.release();
        let frame = match self.access {
            PageAccess::Read => match self.file.frame(id) {
                Some(frame) => frame,
                None => return Ok(false),
            },
            PageAccess::Write => {
                self.file.ensure_page(id)?;
                self.file
                    .frame(id)
                    .ok_or(StrandError::Corruption("page missing after allocation"))?
            }
        };
        frame.pin();
        let latch = match self.access {
            PageAccess::Write => Some(frame.latch.acquire_write()),
            PageAccess::Read => None,
        };
        let mut stamp = frame.latch.begin_read();
        if latch.is_none() {
            while stamp.is_write_in_progress() {
                std::thread::yield_now();
                stamp = frame.latch.begin_read();
            }
        }
        self.file
            .metrics()
            .page_bound(matches!(self.access, PageAccess::Write));
        trace!(page = id.0, access = ?self.access, "pager.cursor.bind");
        let len = frame.len();
        self.bound = Some(Bound {
            frame,
            base: 0,
            len,
            stamp,
            latch,
        });
        self.offset = 0;
        Ok(true)
    }

    fn release(&mut self) {
        if let Some(bound) = self.bound.take() {
            if let Some(latch) = bound.latch {
                bound.frame.mark_dirty();
                drop(latch);
            }
            bound.frame.unpin();
        }
    }

    fn locate(&self, offset: usize, size: usize) -> Result<(&Frame, usize)> {
        let bound = self.bound.as_ref().ok_or(StrandError::NotInitialized)?;
        match offset.checked_add(size) {
            Some(end) if end <= bound.len => Ok((&bound.frame, bound.base + offset)),
            _ => Err(StrandError::OutOfBounds {
                offset,
                size,
                bound: bound.len,
            }),
        }
    }

    fn array_size(&self, offset: usize, count: usize, width: usize) -> Result<usize> {
        count.checked_mul(width).ok_or(StrandError::OutOfBounds {
            offset,
            size: usize::MAX,
            bound: self.bound().unwrap_or(0),
        })
    }

    fn read_array<const N: usize>(&self, offset: usize) -> Result<[u8; N]> {
        let (frame, addr) = self.locate(offset, N)?;
        let mut buf = [0u8; N];
        frame.load(addr, &mut buf);
        Ok(buf)
    }

    fn write_at(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        let (frame, addr) = self.locate(offset, src.len())?;
        frame.store(addr, src);
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        match self.access {
            PageAccess::Write => Ok(()),
            PageAccess::Read => Err(StrandError::Invalid("page cursor opened for read")),
        }
    }
}

impl Drop for PageCursor {
    fn drop(&mut self) {
        self.release();
    }
}
