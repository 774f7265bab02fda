//! # comprehensive storage tests
//!
//! why: verify the log keeps its durability guarantees across restarts
//! relations: tests tickraft-storage crate
//! what: persistence, crash recovery, truncation, growth, edge cases

use std::io::{Seek, SeekFrom, Write};

use tempfile::tempdir;
use tickraft_core::{EntryType, IndexRecord, LogEntry, NodeId, PeerConfig, LOG_RECORD_SIZE};
use tickraft_storage::{
    decode_members, Log, MemoryRegion, Region, StorageError, LOG_DEFAULT_CAPACITY, SUPER_BLOCK_SIZE,
};

fn shared_regions() -> (MemoryRegion, MemoryRegion) {
    (MemoryRegion::new(), MemoryRegion::new())
}

fn reopen(index: &MemoryRegion, data: &MemoryRegion) -> Log {
    Log::open(index.reopen(), data.reopen()).unwrap()
}

// =============================================================================
// SECTION 1: SUPERBLOCK STATE
// =============================================================================

mod superblock_state {
    use super::*;

    #[test]
    fn new_log_writes_superblock() {
        let (index, data) = shared_regions();
        let _log = reopen(&index, &data);

        assert_eq!(index.len().unwrap(), SUPER_BLOCK_SIZE as u64);
        assert_eq!(data.len().unwrap(), 0);
    }

    #[test]
    fn term_and_vote_survive_reopen() {
        let (index, data) = shared_regions();
        {
            let mut log = reopen(&index, &data);
            log.update_state(7, Some(NodeId(3))).unwrap();
        }

        let log = reopen(&index, &data);
        assert_eq!(log.term(), 7);
        assert_eq!(log.voted_for(), Some(NodeId(3)));
    }

    #[test]
    fn clearing_vote_is_persisted() {
        let (index, data) = shared_regions();
        {
            let mut log = reopen(&index, &data);
            log.update_state(1, Some(NodeId(1))).unwrap();
            log.update_state(2, None).unwrap();
        }

        let log = reopen(&index, &data);
        assert_eq!(log.term(), 2);
        assert_eq!(log.voted_for(), None);
    }

    #[test]
    fn peers_survive_reopen() {
        let (index, data) = shared_regions();
        let peers = vec![PeerConfig::local(1), PeerConfig::local(2), PeerConfig::local(3)];
        {
            let mut log = reopen(&index, &data);
            log.update_peers(&peers).unwrap();
        }

        let log = reopen(&index, &data);
        assert_eq!(log.peers(), peers.as_slice());
    }

    #[test]
    fn failed_superblock_write_leaves_state_untouched() {
        let mut log = Log::in_memory().unwrap();
        log.update_peers(&[PeerConfig::local(1)]).unwrap();

        let too_many: Vec<_> = (0..80i32)
            .map(|i| PeerConfig::new(i, "[::1]:7000".parse().unwrap()))
            .collect();
        assert!(matches!(
            log.update_peers(&too_many),
            Err(StorageError::SuperblockOverflow { .. })
        ));
        assert_eq!(log.peers(), &[PeerConfig::local(1)]);
    }
}

// =============================================================================
// SECTION 2: APPEND AND LOOKUP
// =============================================================================

mod append_and_lookup {
    use super::*;

    #[test]
    fn offsets_chain_through_the_data_region() {
        let mut log = Log::in_memory().unwrap();
        for (i, payload) in [&b"one"[..], b"", b"three", b"4"].iter().enumerate() {
            log.append_data(i as i32 + 1, payload).unwrap();
        }

        assert_eq!(log.len(), 4);
        assert_eq!(log.get_index(1).unwrap().offset, 0);
        for key in 2..=log.len() {
            let prev = log.get_index(key - 1).unwrap();
            let cur = log.get_index(key).unwrap();
            assert_eq!(cur.offset, prev.offset + prev.size);
        }
    }

    #[test]
    fn entries_read_back_their_payload() {
        let mut log = Log::in_memory().unwrap();
        log.append_data(1, b"alpha").unwrap();
        log.append_data(2, b"beta").unwrap();

        let entry = log.get_entry(2).unwrap().unwrap();
        assert_eq!(entry.data, b"beta");
        assert_eq!(entry.term(), 2);
        assert_eq!(entry.kind(), EntryType::Data);
    }

    #[test]
    fn range_lookup_is_half_open() {
        let mut log = Log::in_memory().unwrap();
        for i in 1..=5u8 {
            log.append_data(1, &[i]).unwrap();
        }

        let entries = log.get_entries(1, 3).unwrap();
        let payloads: Vec<_> = entries.iter().map(|e| e.data[0]).collect();
        assert_eq!(payloads, vec![2, 3]);
    }

    #[test]
    fn range_lookup_clamps_and_handles_empty_ranges() {
        let mut log = Log::in_memory().unwrap();
        log.append_data(1, b"a").unwrap();
        log.append_data(1, b"b").unwrap();

        assert_eq!(log.get_entries(0, 100).unwrap().len(), 2);
        assert!(log.get_entries(2, 2).unwrap().is_empty());
        assert!(log.get_entries(2, 1).unwrap().is_empty());
    }

    #[test]
    fn last_index_and_term_track_the_tail() {
        let mut log = Log::in_memory().unwrap();
        assert_eq!(log.last_index(), 0);
        assert_eq!(log.last_term(), 0);

        log.append_data(4, b"x").unwrap();
        log.append_data(6, b"y").unwrap();
        assert_eq!(log.last_index(), 2);
        assert_eq!(log.last_term(), 6);
    }

    #[test]
    fn pushed_entry_keeps_term_and_kind() {
        let mut log = Log::in_memory().unwrap();
        let entry = LogEntry::new(2, EntryType::NoOp, Vec::new());
        let record = log.push(&entry).unwrap();
        assert_eq!(record.term, 2);
        assert_eq!(record.kind, EntryType::NoOp);
        assert_eq!(record.size, 0);
    }

    #[test]
    fn configuration_entry_carries_member_set() {
        let mut log = Log::in_memory().unwrap();
        let members = vec![PeerConfig::local(1), PeerConfig::local(4)];
        let entry = log.append_configuration(3, &members).unwrap();

        assert_eq!(entry.kind(), EntryType::Configuration);
        assert_eq!(decode_members(&entry.data).unwrap(), members);
        assert!(log.has_pending_configuration());
    }
}

// =============================================================================
// SECTION 3: POP AND APPLY
// =============================================================================

mod pop_and_apply {
    use super::*;

    #[test]
    fn pop_shrinks_the_index_region() {
        let (index, data) = shared_regions();
        let mut log = reopen(&index, &data);
        log.append_data(1, b"a").unwrap();
        log.append_data(1, b"b").unwrap();

        log.pop().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(
            index.len().unwrap(),
            (SUPER_BLOCK_SIZE + LOG_RECORD_SIZE) as u64
        );
    }

    #[test]
    fn append_after_pop_reuses_data_position() {
        let mut log = Log::in_memory().unwrap();
        log.append_data(1, b"keep").unwrap();
        log.append_data(1, b"drop me").unwrap();
        log.pop().unwrap();

        let entry = log.append_data(2, b"new").unwrap();
        assert_eq!(entry.record.offset, 4);
        assert_eq!(log.get_entry(2).unwrap().unwrap().data, b"new");
    }

    #[test]
    fn pop_until_empty_then_error() {
        let mut log = Log::in_memory().unwrap();
        log.append_data(1, b"a").unwrap();
        log.pop().unwrap();
        assert!(log.is_empty());
        assert!(matches!(log.pop(), Err(StorageError::EmptyLog)));
    }

    #[test]
    fn apply_index_returns_entry_once() {
        let mut log = Log::in_memory().unwrap();
        log.append_data(1, b"a").unwrap();
        log.append_data(1, b"b").unwrap();

        let first = log.apply_index(1).unwrap();
        assert_eq!(first.map(|e| e.data), Some(b"a".to_vec()));
        assert!(log.apply_index(1).unwrap().is_none());
        assert_eq!(log.applied_index(), 1);
    }

    #[test]
    fn apply_index_past_the_end_is_ignored() {
        let mut log = Log::in_memory().unwrap();
        log.append_data(1, b"a").unwrap();
        assert!(log.apply_index(2).unwrap().is_none());
        assert_eq!(log.applied_index(), 0);
    }

    #[test]
    fn mark_applied_moves_forward_only() {
        let mut log = Log::in_memory().unwrap();
        log.append_data(1, b"a").unwrap();
        log.append_data(1, b"b").unwrap();

        assert!(log.mark_applied(2).unwrap());
        assert!(!log.mark_applied(1).unwrap());
        assert!(!log.mark_applied(3).unwrap());
        assert_eq!(log.applied_index(), 2);
    }

    #[test]
    fn applied_index_survives_reopen() {
        let (index, data) = shared_regions();
        {
            let mut log = reopen(&index, &data);
            log.append_data(1, b"a").unwrap();
            log.append_data(1, b"b").unwrap();
            log.apply_index(2).unwrap();
        }

        let log = reopen(&index, &data);
        assert_eq!(log.applied_index(), 2);
    }

    #[test]
    fn applied_configuration_is_no_longer_pending() {
        let mut log = Log::in_memory().unwrap();
        log.append_data(1, b"a").unwrap();
        log.append_configuration(1, &[PeerConfig::local(1)]).unwrap();
        assert!(log.has_pending_configuration());

        log.apply_index(1).unwrap();
        assert!(log.has_pending_configuration());
        log.apply_index(2).unwrap();
        assert!(!log.has_pending_configuration());
    }
}

// =============================================================================
// SECTION 4: CRASH RECOVERY
// =============================================================================

mod crash_recovery {
    use super::*;

    #[test]
    fn entries_survive_reopen() {
        let (index, data) = shared_regions();
        {
            let mut log = reopen(&index, &data);
            log.append_data(1, b"first").unwrap();
            log.append_data(2, b"second").unwrap();
        }

        let mut log = reopen(&index, &data);
        assert_eq!(log.len(), 2);
        assert_eq!(log.get_term(2), 2);
        assert_eq!(log.get_entry(1).unwrap().unwrap().data, b"first");
        assert_eq!(log.data_position(), 11);
    }

    #[test]
    fn partial_trailing_record_is_dropped() {
        let (index, data) = shared_regions();
        {
            let mut log = reopen(&index, &data);
            log.append_data(1, b"whole").unwrap();
        }

        // a crash halfway through writing the second record
        let mut raw = index.reopen();
        raw.seek(SeekFrom::End(0)).unwrap();
        raw.write_all(&[1, 0, 0, 0, 0, 0]).unwrap();

        let log = reopen(&index, &data);
        assert_eq!(log.len(), 1);
        assert_eq!(
            index.len().unwrap(),
            (SUPER_BLOCK_SIZE + LOG_RECORD_SIZE) as u64
        );
    }

    #[test]
    fn orphan_payload_without_record_is_overwritten() {
        let (index, data) = shared_regions();
        {
            let mut log = reopen(&index, &data);
            log.append_data(1, b"ok").unwrap();
        }

        // payload flushed but its record never written
        let mut raw = data.reopen();
        raw.seek(SeekFrom::End(0)).unwrap();
        raw.write_all(b"orphan").unwrap();

        let mut log = reopen(&index, &data);
        assert_eq!(log.len(), 1);
        let entry = log.append_data(1, b"next").unwrap();
        assert_eq!(entry.record.offset, 2);
        assert_eq!(log.get_entry(2).unwrap().unwrap().data, b"next");
    }

    #[test]
    fn missing_payload_bytes_are_corrupt() {
        let (index, data) = shared_regions();
        {
            let mut log = reopen(&index, &data);
            log.append_data(1, b"payload").unwrap();
        }
        data.reopen().set_len(3).unwrap();

        let result = Log::open(index.reopen(), data.reopen());
        assert!(matches!(result, Err(StorageError::Corrupt(_))));
    }

    #[test]
    fn record_past_32_bit_data_region_is_corrupt() {
        let (index, data) = shared_regions();
        drop(reopen(&index, &data));

        // chained offsets, but the second record ends past u32::MAX
        let mut raw = index.reopen();
        raw.seek(SeekFrom::End(0)).unwrap();
        raw.write_all(&IndexRecord::new(1, EntryType::Data, 0, u32::MAX).to_bytes())
            .unwrap();
        raw.write_all(&IndexRecord::new(1, EntryType::Data, u32::MAX, 1).to_bytes())
            .unwrap();

        let result = Log::open(index.reopen(), data.reopen());
        assert!(matches!(result, Err(StorageError::Corrupt(_))));
    }

    #[test]
    fn short_index_region_is_corrupt() {
        let mut index = MemoryRegion::new();
        index.write_all(&[0u8; 100]).unwrap();
        let result = Log::open(index, MemoryRegion::new());
        assert!(matches!(result, Err(StorageError::Corrupt(_))));
    }

    #[test]
    fn recovered_records_grow_on_first_append() {
        let (index, data) = shared_regions();
        {
            let mut log = reopen(&index, &data);
            log.append_data(1, b"a").unwrap();
            log.append_data(1, b"b").unwrap();
        }
        let mut log = reopen(&index, &data);
        assert!(log.capacity() < LOG_DEFAULT_CAPACITY);

        log.append_data(1, b"c").unwrap();
        assert!(log.capacity() >= LOG_DEFAULT_CAPACITY);
    }
}

// =============================================================================
// SECTION 5: FILE-BACKED LOG
// =============================================================================

mod file_log {
    use super::*;

    #[test]
    fn creates_index_and_data_files() {
        let dir = tempdir().unwrap();
        let _log = Log::open_dir(dir.path().join("node-1")).unwrap();

        assert!(dir.path().join("node-1/index").exists());
        assert!(dir.path().join("node-1/data").exists());
    }

    #[test]
    fn survives_restart() {
        let dir = tempdir().unwrap();
        {
            let mut log = Log::open_dir(dir.path()).unwrap();
            log.update_state(10, Some(NodeId(1))).unwrap();
            log.update_peers(&[PeerConfig::local(1), PeerConfig::local(2)]).unwrap();
            log.append_data(10, b"command").unwrap();
            log.append_data(10, b"another").unwrap();
            log.apply_index(1).unwrap();
            log.close();
        }

        let mut log = Log::open_dir(dir.path()).unwrap();
        assert_eq!(log.term(), 10);
        assert_eq!(log.voted_for(), Some(NodeId(1)));
        assert_eq!(log.peers().len(), 2);
        assert_eq!(log.len(), 2);
        assert_eq!(log.applied_index(), 1);
        assert_eq!(log.get_entry(2).unwrap().unwrap().data, b"another");
    }

    #[test]
    fn pop_is_durable() {
        let dir = tempdir().unwrap();
        {
            let mut log = Log::open_dir(dir.path()).unwrap();
            log.append_data(1, b"a").unwrap();
            log.append_data(2, b"b").unwrap();
            log.pop().unwrap();
        }

        let log = Log::open_dir(dir.path()).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log.last_term(), 1);
    }
}

// =============================================================================
// SECTION 6: LIFECYCLE
// =============================================================================

mod lifecycle {
    use super::*;

    #[test]
    fn reads_after_close_fail() {
        let mut log = Log::in_memory().unwrap();
        log.append_data(1, b"a").unwrap();
        log.close();

        assert!(matches!(log.get_entry(1), Err(StorageError::Closed)));
        assert!(matches!(log.pop(), Err(StorageError::Closed)));
        // in-memory lookups stay available
        assert_eq!(log.get_term(1), 1);
    }

    #[test]
    fn close_twice_is_harmless() {
        let mut log = Log::in_memory().unwrap();
        log.close();
        log.close();
        assert!(log.is_closed());
    }
}
