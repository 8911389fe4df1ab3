//! Record loading over a paged file.

use std::marker::PhantomData;
use std::sync::Arc;

use super::format::RecordFormat;
use super::record::{Record, RelationshipRecord};
use crate::primitives::pager::{PageAccess, PageCursor, PagedFile};
use crate::types::{PageId, RelId, Result, StrandError};

/// What to do when a requested record is absent or freed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RecordLoad {
    /// The record must exist; absence is [`StrandError::RecordNotInUse`].
    Normal,
    /// Absence is reported as `Ok(false)` with the record cleared.
    Check,
}

/// Source of relationship records for chain walks.
pub trait RecordLoader {
    /// Loads relationship `id` into `record`.
    ///
    /// Returns `true` when the record is in use. With [`RecordLoad::Check`]
    /// an absent record yields `false` and a cleared `record`.
    fn load_relationship(
        &mut self,
        id: RelId,
        record: &mut RelationshipRecord,
        mode: RecordLoad,
    ) -> Result<bool>;
}

/// Reusable reader for one record type over one paged file.
///
/// Each load binds the record's page, restricts the window to the record,
/// reads the raw fields until the read validates, and only then decodes.
pub struct RecordCursor<R: Record> {
    file: Arc<PagedFile>,
    format: RecordFormat,
    page: PageCursor,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> RecordCursor<R> {
    /// Opens a reader over `file` using `format`.
    pub fn new(file: Arc<PagedFile>, format: RecordFormat) -> Self {
        let page = file.io(PageId(0), PageAccess::Read);
        Self {
            file,
            format,
            page,
            _record: PhantomData,
        }
    }

    /// Loads record `id` into `record`, honouring `mode` for absent records.
    pub fn next(&mut self, id: u64, record: &mut R, mode: RecordLoad) -> Result<bool> {
        let (page, offset) = self
            .format
            .locate(id, R::size(self.format), self.file.page_size())?;
        if !self.page.next_page(page)? {
            return absent(id, record, mode);
        }
        self.page.restrict(offset, R::size(self.format))?;
        let raw = loop {
            let raw = R::read(&self.page, self.format)?;
            if !self.page.should_retry()? {
                break raw;
            }
        };
        record.decode(id, &raw, self.format);
        self.file.metrics().record_loaded(R::KIND);
        if record.is_in_use() {
            Ok(true)
        } else {
            absent(id, record, mode)
        }
    }

    /// Record layout this cursor decodes.
    pub fn format(&self) -> RecordFormat {
        self.format
    }

    /// Releases the bound page. The cursor can still be used afterwards.
    pub fn close(&mut self) {
        self.page.close();
    }
}

impl RecordLoader for RecordCursor<RelationshipRecord> {
    fn load_relationship(
        &mut self,
        id: RelId,
        record: &mut RelationshipRecord,
        mode: RecordLoad,
    ) -> Result<bool> {
        self.next(id.0, record, mode)
    }
}

fn absent<R: Record>(id: u64, record: &mut R, mode: RecordLoad) -> Result<bool> {
    *record = R::empty(id);
    match mode {
        RecordLoad::Normal => Err(StrandError::RecordNotInUse { kind: R::KIND, id }),
        RecordLoad::Check => Ok(false),
    }
}

/// Writes one record into its slot, taking the page write latch for the
/// duration of the write.
pub(crate) fn write_record<R: Record>(file: &Arc<PagedFile>, format: RecordFormat, record: &R) -> Result<()> {
    let size = R::size(format);
    let (page, offset) = format.locate(record.raw_id(), size, file.page_size())?;
    let mut cursor = file.io(page, PageAccess::Write);
    if !cursor.next()? {
        return Err(StrandError::Corruption("write cursor failed to bind"));
    }
    cursor.restrict(offset, size)?;
    record.write(&mut cursor, format)
}
