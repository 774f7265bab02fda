//! # log
//!
//! why: describe what one replicated entry looks like, in memory and on disk
//! relations: written by tickraft-storage, shipped inside AppendEntries
//! what: EntryType, the fixed 16-byte IndexRecord, LogEntry

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Term;

/// Size of one encoded [`IndexRecord`].
pub const LOG_RECORD_SIZE: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("unknown entry type {0}")]
    UnknownType(u32),
}

/// What an entry's payload means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EntryType {
    /// Opaque application bytes
    #[default]
    Data,
    /// Encoded member set replacing the cluster configuration
    Configuration,
    /// Carries nothing
    NoOp,
}

impl EntryType {
    pub fn as_u32(self) -> u32 {
        match self {
            Self::Data => 0,
            Self::Configuration => 1,
            Self::NoOp => 2,
        }
    }
}

impl TryFrom<u32> for EntryType {
    type Error = RecordError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(Self::Data),
            1 => Ok(Self::Configuration),
            2 => Ok(Self::NoOp),
            other => Err(RecordError::UnknownType(other)),
        }
    }
}

/// Fixed-layout index record: `term, type, offset, size`, four bytes each.
///
/// `offset`/`size` locate the payload inside the data region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct IndexRecord {
    pub term: Term,
    pub kind: EntryType,
    pub offset: u32,
    pub size: u32,
}

impl IndexRecord {
    pub fn new(term: Term, kind: EntryType, offset: u32, size: u32) -> Self {
        Self { term, kind, offset, size }
    }

    /// Data-region position right after this record's payload, or `None`
    /// when it lies past the 32-bit address space.
    pub fn end(&self) -> Option<u32> {
        self.offset.checked_add(self.size)
    }

    pub fn to_bytes(&self) -> [u8; LOG_RECORD_SIZE] {
        let mut buf = [0u8; LOG_RECORD_SIZE];
        LittleEndian::write_i32(&mut buf[0..4], self.term);
        LittleEndian::write_u32(&mut buf[4..8], self.kind.as_u32());
        LittleEndian::write_u32(&mut buf[8..12], self.offset);
        LittleEndian::write_u32(&mut buf[12..16], self.size);
        buf
    }

    pub fn from_bytes(buf: &[u8; LOG_RECORD_SIZE]) -> Result<Self, RecordError> {
        Ok(Self {
            term: LittleEndian::read_i32(&buf[0..4]),
            kind: EntryType::try_from(LittleEndian::read_u32(&buf[4..8]))?,
            offset: LittleEndian::read_u32(&buf[8..12]),
            size: LittleEndian::read_u32(&buf[12..16]),
        })
    }
}

/// A single entry in the replicated log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub record: IndexRecord,
    pub data: Vec<u8>,
}

impl LogEntry {
    pub fn new(term: Term, kind: EntryType, data: Vec<u8>) -> Self {
        let size = data.len() as u32;
        Self {
            record: IndexRecord::new(term, kind, 0, size),
            data,
        }
    }

    pub fn term(&self) -> Term {
        self.record.term
    }

    pub fn kind(&self) -> EntryType {
        self.record.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_layout_is_term_type_offset_size() {
        let record = IndexRecord::new(2, EntryType::Configuration, 0x10, 3);
        let bytes = record.to_bytes();
        assert_eq!(&bytes[0..4], &2i32.to_le_bytes());
        assert_eq!(&bytes[4..8], &1u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &0x10u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &3u32.to_le_bytes());
        assert_eq!(IndexRecord::from_bytes(&bytes), Ok(record));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let mut bytes = IndexRecord::default().to_bytes();
        bytes[4] = 9;
        assert_eq!(IndexRecord::from_bytes(&bytes), Err(RecordError::UnknownType(9)));
    }

    #[test]
    fn new_entry_sizes_payload() {
        let entry = LogEntry::new(4, EntryType::Data, vec![1, 2, 3]);
        assert_eq!(entry.record.size, 3);
        assert_eq!(entry.term(), 4);
        assert_eq!(entry.kind(), EntryType::Data);
    }
}
