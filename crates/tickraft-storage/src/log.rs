//! # log
//!
//! why: the replicated log must be durable and crash-safe: a payload is on
//! stable storage before any index record points at it, and every term/vote
//! change is flushed before anyone can act on it
//! relations: owned by the tickraft-server tick engine; records and entries
//! come from tickraft-core
//! what: Log (open/recover, append, pop, lookups, apply, close)

use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::fmt;
use std::path::Path;

use tickraft_core::{
    EntryType, IndexRecord, LogEntry, LogIndex, NodeId, PeerConfig, Term, LOG_RECORD_SIZE,
};
use tracing::{debug, info, warn};

use crate::error::{Result, StorageError};
use crate::region::{MemoryRegion, Region};
use crate::superblock::{encode_members, Superblock, SUPER_BLOCK_SIZE};

/// Minimum capacity of the in-memory index array once it has to grow.
pub const LOG_DEFAULT_CAPACITY: usize = 65536;

const INDEX_FILE: &str = "index";
const DATA_FILE: &str = "data";

/// Durable, append-only sequence of term-tagged entries plus a superblock.
pub struct Log {
    index: Option<Box<dyn Region>>,
    data: Option<Box<dyn Region>>,
    state: Superblock,
    records: Vec<IndexRecord>,
}

impl Log {
    /// Open a log over an index region and a data region, recovering
    /// whatever the index region already holds.
    pub fn open(index: impl Region + 'static, data: impl Region + 'static) -> Result<Self> {
        let mut log = Self {
            index: Some(Box::new(index)),
            data: Some(Box::new(data)),
            state: Superblock::default(),
            records: Vec::new(),
        };

        if log.index_region()?.is_empty()? {
            log.create_superblock()?;
        } else {
            log.recover()?;
        }
        Ok(log)
    }

    /// Open (or create) the `index` and `data` files inside `dir`.
    pub fn open_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let open = |name: &str| {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(dir.join(name))
        };
        Self::open(open(INDEX_FILE)?, open(DATA_FILE)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::open(MemoryRegion::new(), MemoryRegion::new())
    }

    fn create_superblock(&mut self) -> Result<()> {
        let block = Superblock::default();
        self.write_superblock(&block)?;
        self.state = block;
        self.records = Vec::with_capacity(LOG_DEFAULT_CAPACITY);
        info!("initialized empty log");
        Ok(())
    }

    fn recover(&mut self) -> Result<()> {
        let index = self.index_region()?;
        let len = index.len()?;
        if len < SUPER_BLOCK_SIZE as u64 {
            return Err(StorageError::Corrupt(format!(
                "index region holds {len} bytes, smaller than the superblock"
            )));
        }

        let mut block = vec![0u8; SUPER_BLOCK_SIZE];
        index.seek(SeekFrom::Start(0))?;
        index.read_exact(&mut block)?;
        let state = Superblock::decode(&block)?;

        let body = len - SUPER_BLOCK_SIZE as u64;
        let count = body / LOG_RECORD_SIZE as u64;
        if body % LOG_RECORD_SIZE as u64 != 0 {
            let keep = SUPER_BLOCK_SIZE as u64 + count * LOG_RECORD_SIZE as u64;
            warn!(
                bytes = len - keep,
                "dropping partial trailing index record"
            );
            index.set_len(keep)?;
            index.sync()?;
        }

        let count = usize::try_from(count)
            .map_err(|_| StorageError::Corrupt(format!("{count} records do not fit in memory")))?;
        let mut raw = vec![0u8; count * LOG_RECORD_SIZE];
        index.seek(SeekFrom::Start(SUPER_BLOCK_SIZE as u64))?;
        index.read_exact(&mut raw)?;

        let mut records = Vec::with_capacity(count);
        let mut expected_offset = 0u32;
        for (i, chunk) in raw.chunks_exact(LOG_RECORD_SIZE).enumerate() {
            let mut bytes = [0u8; LOG_RECORD_SIZE];
            bytes.copy_from_slice(chunk);
            let record = IndexRecord::from_bytes(&bytes)
                .map_err(|e| StorageError::Corrupt(format!("record {}: {e}", i + 1)))?;
            if record.offset != expected_offset {
                return Err(StorageError::Corrupt(format!(
                    "record {} starts at {} instead of {expected_offset}",
                    i + 1,
                    record.offset
                )));
            }
            expected_offset = record.end().ok_or_else(|| {
                StorageError::Corrupt(format!(
                    "record {} runs past the 32-bit data region ({} + {})",
                    i + 1,
                    record.offset,
                    record.size
                ))
            })?;
            records.push(record);
        }

        let data_len = self.data_region()?.len()?;
        if data_len < u64::from(expected_offset) {
            return Err(StorageError::Corrupt(format!(
                "index references {expected_offset} payload bytes, data region holds {data_len}"
            )));
        }

        info!(
            term = state.term,
            records = records.len(),
            applied = state.applied_index,
            peers = state.peers.len(),
            "recovered log"
        );
        self.state = state;
        self.records = records;
        Ok(())
    }

    // -- superblock --

    pub fn term(&self) -> Term {
        self.state.term
    }

    pub fn voted_for(&self) -> Option<NodeId> {
        self.state.voted_for
    }

    pub fn applied_index(&self) -> LogIndex {
        self.state.applied_index
    }

    pub fn peers(&self) -> &[PeerConfig] {
        &self.state.peers
    }

    /// Persist a new term and vote before returning.
    pub fn update_state(&mut self, term: Term, voted_for: Option<NodeId>) -> Result<()> {
        let next = Superblock {
            term,
            voted_for,
            ..self.state.clone()
        };
        self.persist(next)
    }

    /// Replace the persisted peer set.
    pub fn update_peers(&mut self, peers: &[PeerConfig]) -> Result<()> {
        let next = Superblock {
            peers: peers.to_vec(),
            ..self.state.clone()
        };
        self.persist(next)
    }

    fn persist(&mut self, next: Superblock) -> Result<()> {
        self.write_superblock(&next)?;
        self.state = next;
        Ok(())
    }

    fn write_superblock(&mut self, block: &Superblock) -> Result<()> {
        let bytes = block.encode()?;
        let index = self.index_region()?;
        index.seek(SeekFrom::Start(0))?;
        index.write_all(&bytes)?;
        index.sync()?;
        Ok(())
    }

    // -- records --

    /// Number of entries.
    pub fn len(&self) -> LogIndex {
        self.records.len() as LogIndex
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.records.capacity()
    }

    /// Where the next payload will be written.
    pub fn data_position(&self) -> u32 {
        // every held record was bounds-checked by recover or push
        self.records
            .last()
            .and_then(IndexRecord::end)
            .unwrap_or(0)
    }

    pub fn last_index(&self) -> LogIndex {
        self.len()
    }

    pub fn last_term(&self) -> Term {
        self.get_term(self.len())
    }

    /// Record at 1-based `key`, `None` for 0 or past the end.
    pub fn get_index(&self, key: LogIndex) -> Option<IndexRecord> {
        if key == 0 {
            return None;
        }
        self.records.get(key as usize - 1).copied()
    }

    /// Term at `key`, 0 when there is no such entry.
    pub fn get_term(&self, key: LogIndex) -> Term {
        self.get_index(key).map_or(0, |record| record.term)
    }

    pub fn read_data(&mut self, record: &IndexRecord) -> Result<Vec<u8>> {
        let data = self.data_region()?;
        let mut buf = vec![0u8; record.size as usize];
        data.seek(SeekFrom::Start(u64::from(record.offset)))?;
        data.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn get_entry(&mut self, key: LogIndex) -> Result<Option<LogEntry>> {
        let Some(record) = self.get_index(key) else {
            return Ok(None);
        };
        let data = self.read_data(&record)?;
        Ok(Some(LogEntry { record, data }))
    }

    /// Entries in `(start, end]`, clamped to the log; empty when the range
    /// is empty or inverted.
    pub fn get_entries(&mut self, start: LogIndex, end: LogIndex) -> Result<Vec<LogEntry>> {
        let end = end.min(self.len());
        if start >= end {
            return Ok(Vec::new());
        }
        let mut entries = Vec::with_capacity((end - start) as usize);
        for key in start + 1..=end {
            if let Some(entry) = self.get_entry(key)? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// A configuration entry exists that has not been applied yet.
    pub fn has_pending_configuration(&self) -> bool {
        let applied = (self.state.applied_index as usize).min(self.records.len());
        self.records[applied..]
            .iter()
            .any(|record| record.kind == EntryType::Configuration)
    }

    // -- mutation --

    /// Append a new entry in `term`.
    pub fn append(&mut self, term: Term, kind: EntryType, payload: &[u8]) -> Result<LogEntry> {
        let mut entry = LogEntry::new(term, kind, payload.to_vec());
        entry.record = self.push(&entry)?;
        Ok(entry)
    }

    pub fn append_data(&mut self, term: Term, payload: &[u8]) -> Result<LogEntry> {
        self.append(term, EntryType::Data, payload)
    }

    /// Append a configuration entry carrying the full new member set.
    pub fn append_configuration(&mut self, term: Term, members: &[PeerConfig]) -> Result<LogEntry> {
        let payload = encode_members(members)?;
        self.append(term, EntryType::Configuration, &payload)
    }

    /// Append `entry` at the end of the log. The payload is written and
    /// flushed before the index record that references it; the stored
    /// offset is always the current data position.
    pub fn push(&mut self, entry: &LogEntry) -> Result<IndexRecord> {
        let position = self.data_position();
        let record = u32::try_from(entry.data.len())
            .ok()
            .map(|size| IndexRecord {
                offset: position,
                size,
                ..entry.record
            })
            .filter(|record| record.end().is_some())
            .ok_or(StorageError::DataRegionFull {
                position,
                size: entry.data.len(),
            })?;
        let slot = SUPER_BLOCK_SIZE as u64 + u64::from(self.len()) * LOG_RECORD_SIZE as u64;

        let data = self.data_region()?;
        data.seek(SeekFrom::Start(u64::from(record.offset)))?;
        data.write_all(&entry.data)?;
        data.sync()?;

        let index = self.index_region()?;
        index.seek(SeekFrom::Start(slot))?;
        index.write_all(&record.to_bytes())?;
        index.sync()?;

        self.ensure_capacity(self.records.len() + 1);
        self.records.push(record);
        debug!(
            index = self.len(),
            term = record.term,
            kind = ?record.kind,
            size = record.size,
            "appended entry"
        );
        Ok(record)
    }

    /// Discard the last entry.
    pub fn pop(&mut self) -> Result<()> {
        if self.records.is_empty() {
            return Err(StorageError::EmptyLog);
        }
        let keep = SUPER_BLOCK_SIZE as u64 + (self.records.len() as u64 - 1) * LOG_RECORD_SIZE as u64;
        let index = self.index_region()?;
        index.set_len(keep)?;
        index.sync()?;
        self.records.pop();
        debug!(length = self.len(), "popped entry");
        Ok(())
    }

    /// Mark `key` as applied. Returns the entry the first time, `None` when
    /// it was already applied or does not exist.
    pub fn apply_index(&mut self, key: LogIndex) -> Result<Option<LogEntry>> {
        if key <= self.state.applied_index || key > self.len() {
            return Ok(None);
        }
        let entry = self.get_entry(key)?;
        self.mark_applied(key)?;
        Ok(entry)
    }

    /// Persist `key` as the applied index without reading the entry.
    /// Returns false when `key` was already applied or is past the end.
    pub fn mark_applied(&mut self, key: LogIndex) -> Result<bool> {
        if key <= self.state.applied_index || key > self.len() {
            return Ok(false);
        }
        let next = Superblock {
            applied_index: key,
            ..self.state.clone()
        };
        self.persist(next)?;
        Ok(true)
    }

    fn ensure_capacity(&mut self, size: usize) {
        let capacity = self.records.capacity();
        if capacity >= size {
            return;
        }
        let mut next = (capacity * 3 / 2).max(LOG_DEFAULT_CAPACITY);
        while next < size {
            next = next * 3 / 2;
        }
        self.records.reserve_exact(next - self.records.len());
    }

    // -- lifecycle --

    /// Release both regions. Every write was already flushed, so nothing is
    /// written here; later calls fail with [`StorageError::Closed`].
    pub fn close(&mut self) {
        self.index = None;
        self.data = None;
    }

    pub fn is_closed(&self) -> bool {
        self.index.is_none()
    }

    fn index_region(&mut self) -> Result<&mut Box<dyn Region>> {
        self.index.as_mut().ok_or(StorageError::Closed)
    }

    fn data_region(&mut self) -> Result<&mut Box<dyn Region>> {
        self.data.as_mut().ok_or(StorageError::Closed)
    }
}

impl fmt::Debug for Log {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Log")
            .field("term", &self.state.term)
            .field("voted_for", &self.state.voted_for)
            .field("applied_index", &self.state.applied_index)
            .field("peers", &self.state.peers)
            .field("length", &self.records.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_log_is_empty_with_default_state() {
        let log = Log::in_memory().unwrap();
        assert_eq!(log.len(), 0);
        assert_eq!(log.term(), 0);
        assert_eq!(log.voted_for(), None);
        assert_eq!(log.applied_index(), 0);
        assert!(log.peers().is_empty());
        assert_eq!(log.capacity(), LOG_DEFAULT_CAPACITY);
    }

    #[test]
    fn append_places_payload_after_previous() {
        let mut log = Log::in_memory().unwrap();
        let first = log.append_data(1, b"abc").unwrap();
        let second = log.append_data(1, b"de").unwrap();
        assert_eq!(first.record.offset, 0);
        assert_eq!(first.record.size, 3);
        assert_eq!(second.record.offset, 3);
        assert_eq!(log.data_position(), 5);
    }

    #[test]
    fn lookups_outside_range_are_sentinels() {
        let mut log = Log::in_memory().unwrap();
        log.append_data(3, b"x").unwrap();
        assert_eq!(log.get_index(0), None);
        assert_eq!(log.get_index(2), None);
        assert_eq!(log.get_term(0), 0);
        assert_eq!(log.get_term(5), 0);
        assert_eq!(log.get_term(1), 3);
        assert!(log.get_entry(2).unwrap().is_none());
    }

    #[test]
    fn pop_on_empty_log_fails() {
        let mut log = Log::in_memory().unwrap();
        assert!(matches!(log.pop(), Err(StorageError::EmptyLog)));
    }

    #[test]
    fn pushed_entry_is_restamped_at_data_position() {
        let mut log = Log::in_memory().unwrap();
        log.append_data(1, b"aaaa").unwrap();
        let mut foreign = LogEntry::new(1, EntryType::Data, b"bb".to_vec());
        foreign.record.offset = 999;
        let record = log.push(&foreign).unwrap();
        assert_eq!(record.offset, 4);
    }

    #[test]
    fn capacity_grows_by_half() {
        let mut log = Log::in_memory().unwrap();
        log.ensure_capacity(LOG_DEFAULT_CAPACITY + 1);
        assert!(log.capacity() >= LOG_DEFAULT_CAPACITY * 3 / 2);
    }

    #[test]
    fn closed_log_rejects_writes() {
        let mut log = Log::in_memory().unwrap();
        log.close();
        assert!(log.is_closed());
        assert!(matches!(log.append_data(1, b"x"), Err(StorageError::Closed)));
        assert!(matches!(log.update_state(2, None), Err(StorageError::Closed)));
    }
}
