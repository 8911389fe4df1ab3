#![forbid(unsafe_code)]

use std::sync::{Arc, Once};

use proptest::prelude::*;
use strand::primitives::pager::{PageAccess, PagedFile, PagerOptions};
use strand::types::{PageId, Result, StrandError};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("strand::primitives::pager=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

fn small_file() -> Arc<PagedFile> {
    PagedFile::new(PagerOptions::default().page_size(64).initial_pages(2)).unwrap()
}

#[test]
fn long_written_within_bound_reads_back() -> Result<()> {
    init_tracing();
    let file = small_file();
    let mut write = file.io(PageId(0), PageAccess::Write);
    assert!(write.next()?);
    write.restrict(0, 16)?;
    assert_eq!(write.bound()?, 16);
    write.put_i64(0, 123_456_789)?;
    assert_eq!(write.get_i64(0)?, 123_456_789);
    write.close();

    let mut read = file.io(PageId(0), PageAccess::Read);
    assert!(read.next()?);
    read.restrict(0, 16)?;
    let value = loop {
        let value = read.get_i64(0)?;
        if !read.should_retry()? {
            break value;
        }
    };
    assert_eq!(value, 123_456_789);
    Ok(())
}

#[test]
fn bytes_past_bound_are_out_of_bounds() -> Result<()> {
    init_tracing();
    let file = small_file();
    let mut read = file.io(PageId(0), PageAccess::Read);
    assert!(read.next()?);
    read.restrict(0, 16)?;
    let mut dst = [0u8; 8];
    match read.get_bytes(10, &mut dst) {
        Err(StrandError::OutOfBounds {
            offset,
            size,
            bound,
        }) => assert_eq!((offset, size, bound), (10, 8, 16)),
        other => panic!("expected OutOfBounds, got {other:?}"),
    }
    // The read that fits is not clamped or shifted.
    read.get_bytes(8, &mut dst)?;
    Ok(())
}

#[test]
fn unbound_cursor_reports_not_initialized() {
    let file = small_file();
    let mut cursor = file.io(PageId(0), PageAccess::Write);
    assert!(matches!(cursor.get_u32(0), Err(StrandError::NotInitialized)));
    assert!(matches!(cursor.put_u8(0, 1), Err(StrandError::NotInitialized)));
    assert!(matches!(cursor.should_retry(), Err(StrandError::NotInitialized)));
}

#[test]
fn sequential_access_walks_pages() -> Result<()> {
    let file = small_file();
    let mut write = file.io(PageId(0), PageAccess::Write);
    for page in 0..4u64 {
        assert!(write.next()?);
        assert_eq!(write.page_id(), Some(PageId(page)));
        write.put_u64_next(page * 10)?;
        write.put_u16_next(0xBEEF)?;
    }
    write.close();
    assert_eq!(file.page_count(), 4);

    let mut read = file.io(PageId(0), PageAccess::Read);
    let mut seen = Vec::new();
    while read.next()? {
        loop {
            let head = read.get_u64_next()?;
            let tail = read.get_u16_next()?;
            if !read.should_retry()? {
                seen.push((head, tail));
                break;
            }
        }
    }
    assert_eq!(seen, vec![(0, 0xBEEF), (10, 0xBEEF), (20, 0xBEEF), (30, 0xBEEF)]);
    Ok(())
}

#[test]
fn writes_are_big_endian() -> Result<()> {
    let file = small_file();
    let mut write = file.io(PageId(1), PageAccess::Write);
    assert!(write.next()?);
    write.put_u32(4, 0x0102_0304)?;
    let mut raw = [0u8; 4];
    write.get_bytes(4, &mut raw)?;
    assert_eq!(raw, [1, 2, 3, 4]);
    Ok(())
}

#[test]
fn write_cursor_holds_page_latch_until_moved() -> Result<()> {
    let file = small_file();
    let mut write = file.io(PageId(0), PageAccess::Write);
    assert!(write.next()?);
    assert!(write.is_write_locked());
    assert!(file.is_write_locked(PageId(0))?);
    assert!(write.next()?);
    assert!(!file.is_write_locked(PageId(0))?);
    assert!(file.is_write_locked(PageId(1))?);
    drop(write);
    assert!(!file.is_write_locked(PageId(1))?);
    Ok(())
}

proptest! {
    #[test]
    fn window_access_fails_exactly_past_the_bound(
        bound in 1usize..=64,
        offset in 0usize..80,
        len in 0usize..24,
    ) {
        let file = small_file();
        let mut cursor = file.io(PageId(0), PageAccess::Write);
        prop_assert!(cursor.next().unwrap());
        cursor.restrict(0, bound).unwrap();
        let src = vec![0xA5u8; len];
        let result = cursor.put_bytes(offset, &src);
        if offset + len <= bound {
            prop_assert!(result.is_ok());
            let mut dst = vec![0u8; len];
            cursor.get_bytes(offset, &mut dst).unwrap();
            prop_assert_eq!(dst, src);
        } else {
            let is_out_of_bounds = matches!(result, Err(StrandError::OutOfBounds { .. }));
            prop_assert!(is_out_of_bounds);
        }
    }
}
