#![forbid(unsafe_code)]
//! In-memory paged files and the bounded cursors that read and write them.

mod cursor;
mod file;
mod frame;

pub use cursor::{PageAccess, PageCursor};
pub use file::{
    PagedFile, PagerOptions, PagerStats, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, MIN_PAGE_SIZE,
};
