//! On-page record layouts.
//!
//! Records are packed back to back from the start of each page with no page
//! header. Record `id` lives on page `id / records_per_page` at offset
//! `(id % records_per_page) * record_size`. All fields are big-endian.
//!
//! | field | standard | high limit |
//! |---|---|---|
//! | relationship record | 32 bytes | 64 bytes |
//! | flags | u8 @ 0 | u8 @ 0 |
//! | type | u16 @ 1 | u32 @ 4 |
//! | first / second node | u32 @ 3 / 7 | u64 @ 8 / 16 |
//! | first prev / next | u32 @ 11 / 15 | u64 @ 24 / 32 |
//! | second prev / next | u32 @ 19 / 23 | u64 @ 40 / 48 |
//! | next property | u32 @ 27 | u64 @ 56 |
//! | node record | 16 bytes | 16 bytes |
//! | node first relationship | u32 @ 4 | u64 @ 8 |
//!
//! Relationship flag bits: 0 in use, 1 first in first chain, 2 first in
//! second chain. Node flag bit 0 is in use.

use serde::Deserialize;

use crate::primitives::pager::PageCursor;
use crate::types::{PageId, Result, StrandError};

pub(crate) const FLAG_IN_USE: u8 = 1;
pub(crate) const FLAG_FIRST_IN_FIRST_CHAIN: u8 = 1 << 1;
pub(crate) const FLAG_FIRST_IN_SECOND_CHAIN: u8 = 1 << 2;

const NODE_RECORD_SIZE: usize = 16;

/// Closed set of record layouts, chosen once when a store is opened.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordFormat {
    /// 32-byte relationship records with 32-bit ids and 16-bit types.
    #[default]
    Standard,
    /// 64-byte relationship records with 64-bit ids and 32-bit types.
    HighLimit,
}

/// Relationship record fields exactly as stored, before any interpretation.
///
/// Ids are widened to `u64`; the format's null reference marks an absent link.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RawRelationship {
    /// Flag bits.
    pub flags: u8,
    /// Relationship type token.
    pub rel_type: u32,
    /// Source node.
    pub first_node: u64,
    /// Target node.
    pub second_node: u64,
    /// Source chain prev slot: degree on a chain head, else a record id.
    pub first_prev: u64,
    /// Source chain next record.
    pub first_next: u64,
    /// Target chain prev slot.
    pub second_prev: u64,
    /// Target chain next record.
    pub second_next: u64,
    /// First property record.
    pub next_prop: u64,
}

/// Node record fields exactly as stored.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RawNode {
    /// Flag bits.
    pub flags: u8,
    /// Head of the relationship chain.
    pub first_rel: u64,
}

impl RecordFormat {
    /// Size of one relationship record in bytes.
    pub fn relationship_size(self) -> usize {
        match self {
            RecordFormat::Standard => 32,
            RecordFormat::HighLimit => 64,
        }
    }

    /// Size of one node record in bytes.
    pub fn node_size(self) -> usize {
        NODE_RECORD_SIZE
    }

    /// Stored value meaning "no record". All ones in the id width.
    pub fn null_ref(self) -> u64 {
        match self {
            RecordFormat::Standard => u64::from(u32::MAX),
            RecordFormat::HighLimit => u64::MAX,
        }
    }

    /// Largest record id the format can address.
    pub fn max_id(self) -> u64 {
        self.null_ref() - 1
    }

    /// Largest relationship type id the format can store.
    pub fn max_type(self) -> u32 {
        match self {
            RecordFormat::Standard => u32::from(u16::MAX),
            RecordFormat::HighLimit => u32::MAX,
        }
    }

    /// Largest degree a first-in-chain prev slot can hold.
    pub fn max_degree(self) -> u64 {
        match self {
            RecordFormat::Standard => u64::from(u32::MAX),
            RecordFormat::HighLimit => u64::MAX,
        }
    }

    /// Page and in-page offset of record `id` for records of `record_size`.
    pub fn locate(self, id: u64, record_size: usize, page_size: usize) -> Result<(PageId, usize)> {
        if id > self.max_id() {
            return Err(StrandError::Invalid("record id exceeds the format's id width"));
        }
        let per_page = (page_size / record_size) as u64;
        if per_page == 0 {
            return Err(StrandError::Config(format!(
                "page size {page_size} cannot hold a {record_size}-byte record"
            )));
        }
        let offset = (id % per_page) as usize * record_size;
        Ok((PageId(id / per_page), offset))
    }

    pub(crate) fn read_relationship(self, cursor: &PageCursor) -> Result<RawRelationship> {
        Ok(match self {
            RecordFormat::Standard => RawRelationship {
                flags: cursor.get_u8(0)?,
                rel_type: u32::from(cursor.get_u16(1)?),
                first_node: u64::from(cursor.get_u32(3)?),
                second_node: u64::from(cursor.get_u32(7)?),
                first_prev: u64::from(cursor.get_u32(11)?),
                first_next: u64::from(cursor.get_u32(15)?),
                second_prev: u64::from(cursor.get_u32(19)?),
                second_next: u64::from(cursor.get_u32(23)?),
                next_prop: u64::from(cursor.get_u32(27)?),
            },
            RecordFormat::HighLimit => RawRelationship {
                flags: cursor.get_u8(0)?,
                rel_type: cursor.get_u32(4)?,
                first_node: cursor.get_u64(8)?,
                second_node: cursor.get_u64(16)?,
                first_prev: cursor.get_u64(24)?,
                first_next: cursor.get_u64(32)?,
                second_prev: cursor.get_u64(40)?,
                second_next: cursor.get_u64(48)?,
                next_prop: cursor.get_u64(56)?,
            },
        })
    }

    pub(crate) fn write_relationship(self, cursor: &mut PageCursor, raw: &RawRelationship) -> Result<()> {
        match self {
            RecordFormat::Standard => {
                cursor.zap_page()?;
                cursor.put_u8(0, raw.flags)?;
                cursor.put_u16(1, narrow(raw.rel_type.into(), u16::MAX.into())? as u16)?;
                let mut at = 3;
                for value in [
                    raw.first_node,
                    raw.second_node,
                    raw.first_prev,
                    raw.first_next,
                    raw.second_prev,
                    raw.second_next,
                    raw.next_prop,
                ] {
                    cursor.put_u32(at, narrow(value, u32::MAX.into())? as u32)?;
                    at += 4;
                }
            }
            RecordFormat::HighLimit => {
                cursor.zap_page()?;
                cursor.put_u8(0, raw.flags)?;
                cursor.put_u32(4, raw.rel_type)?;
                cursor.put_u64s(
                    8,
                    &[
                        raw.first_node,
                        raw.second_node,
                        raw.first_prev,
                        raw.first_next,
                        raw.second_prev,
                        raw.second_next,
                        raw.next_prop,
                    ],
                )?;
            }
        }
        Ok(())
    }

    pub(crate) fn read_node(self, cursor: &PageCursor) -> Result<RawNode> {
        let first_rel = match self {
            RecordFormat::Standard => u64::from(cursor.get_u32(4)?),
            RecordFormat::HighLimit => cursor.get_u64(8)?,
        };
        Ok(RawNode {
            flags: cursor.get_u8(0)?,
            first_rel,
        })
    }

    pub(crate) fn write_node(self, cursor: &mut PageCursor, raw: &RawNode) -> Result<()> {
        cursor.zap_page()?;
        cursor.put_u8(0, raw.flags)?;
        match self {
            RecordFormat::Standard => {
                cursor.put_u32(4, narrow(raw.first_rel, u32::MAX.into())? as u32)
            }
            RecordFormat::HighLimit => cursor.put_u64(8, raw.first_rel),
        }
    }
}

fn narrow(value: u64, max: u64) -> Result<u64> {
    if value > max {
        Err(StrandError::Invalid("value exceeds the record format's field width"))
    } else {
        Ok(value)
    }
}
