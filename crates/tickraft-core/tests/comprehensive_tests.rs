//! # comprehensive core tests
//!
//! why: verify the shared vocabulary behaves the same way every crate expects
//! relations: tests tickraft-core crate
//! what: records, messages, config, peer tracking, quorum math, scheduling

use std::cell::RefCell;
use std::rc::Rc;

use tickraft_core::{
    majority, quorum_match_index, AddServerReply, AddServerRequest, AddServerStatus,
    AppendEntriesReply, AppendEntriesRequest, EntryType, Envelope, IndexRecord, LogEntry, Mode,
    NodeId, NodeState, Peer, PeerConfig, RaftConfig, RaftMessage, RecordError, Scheduler, Step,
    Task, VoteReply, VoteRequest, LOG_RECORD_SIZE,
};

// =============================================================================
// SECTION 1: IDENTITIES AND ROLES
// =============================================================================

mod identities {
    use super::*;

    #[test]
    fn node_ids_order_numerically() {
        let mut ids = vec![NodeId(3), NodeId(1), NodeId(2)];
        ids.sort();
        assert_eq!(ids, vec![NodeId(1), NodeId(2), NodeId(3)]);
    }

    #[test]
    fn local_peers_get_distinct_ports() {
        let a = PeerConfig::local(1);
        let b = PeerConfig::local(2);
        assert_ne!(a.addr, b.addr);
        assert_eq!(a.addr.port(), 7001);
    }

    #[test]
    fn peer_display_names_id_and_address() {
        assert_eq!(PeerConfig::local(4).to_string(), "n4@127.0.0.1:7004");
    }

    #[test]
    fn fresh_role_is_stopped() {
        assert_eq!(NodeState::default(), NodeState::Stopped);
        assert_eq!(NodeState::Leader.to_string(), "leader");
    }
}

// =============================================================================
// SECTION 2: LOG RECORDS
// =============================================================================

mod records {
    use super::*;

    #[test]
    fn record_layout_is_four_little_endian_words() {
        let record = IndexRecord::new(2, EntryType::Configuration, 0x0102, 7);
        let bytes = record.to_bytes();
        assert_eq!(bytes.len(), LOG_RECORD_SIZE);
        assert_eq!(&bytes[0..4], &2i32.to_le_bytes());
        assert_eq!(&bytes[4..8], &1u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &0x0102u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &7u32.to_le_bytes());
    }

    #[test]
    fn unknown_type_is_rejected() {
        let mut bytes = IndexRecord::new(1, EntryType::Data, 0, 0).to_bytes();
        bytes[4] = 9;
        assert_eq!(
            IndexRecord::from_bytes(&bytes),
            Err(RecordError::UnknownType(9))
        );
    }

    #[test]
    fn record_end_follows_payload() {
        let record = IndexRecord::new(1, EntryType::Data, 10, 5);
        assert_eq!(record.end(), Some(15));
    }

    #[test]
    fn record_end_past_address_space_is_none() {
        assert_eq!(IndexRecord::new(1, EntryType::Data, u32::MAX, 1).end(), None);
        assert_eq!(IndexRecord::new(1, EntryType::Data, 1, u32::MAX).end(), None);
        assert_eq!(
            IndexRecord::new(1, EntryType::Data, 0, u32::MAX).end(),
            Some(u32::MAX)
        );
    }

    #[test]
    fn new_entry_sizes_itself() {
        let entry = LogEntry::new(3, EntryType::Data, vec![1, 2, 3, 4]);
        assert_eq!(entry.record.size, 4);
        assert_eq!(entry.record.offset, 0);
        assert_eq!(entry.term(), 3);
        assert_eq!(entry.kind(), EntryType::Data);
    }

    #[test]
    fn entry_types_have_stable_codes() {
        for kind in [EntryType::Data, EntryType::Configuration, EntryType::NoOp] {
            assert_eq!(EntryType::try_from(kind.as_u32()), Ok(kind));
        }
        assert_eq!(EntryType::NoOp.as_u32(), 2);
    }
}

// =============================================================================
// SECTION 3: MESSAGES
// =============================================================================

mod messages {
    use super::*;

    #[test]
    fn vote_messages_carry_term() {
        let request: RaftMessage = VoteRequest {
            term: 4,
            candidate_id: NodeId(1),
            last_log_index: 0,
            last_log_term: 0,
        }
        .into();
        let reply: RaftMessage = VoteReply {
            term: 5,
            granted: false,
        }
        .into();
        assert_eq!(request.term(), Some(4));
        assert_eq!(reply.term(), Some(5));
    }

    #[test]
    fn membership_messages_carry_no_term() {
        let request: RaftMessage = AddServerRequest {
            new_server: PeerConfig::local(4),
        }
        .into();
        let reply: RaftMessage = AddServerReply {
            status: AddServerStatus::NotLeader,
            leader_hint: None,
        }
        .into();
        assert_eq!(request.term(), None);
        assert_eq!(reply.term(), None);
    }

    #[test]
    fn envelope_survives_json() {
        let envelope = Envelope::new(
            PeerConfig::local(1),
            AppendEntriesRequest {
                term: 2,
                leader_id: NodeId(1),
                prev_log_index: 0,
                prev_log_term: 0,
                entries: vec![LogEntry::new(2, EntryType::Data, vec![5])],
                leader_commit: 0,
            },
        );
        let json = serde_json::to_string(&envelope).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, envelope);
        assert_eq!(back.message.name(), "append_entries_request");
    }

    #[test]
    fn reply_names_are_distinct() {
        let reply: RaftMessage = AppendEntriesReply {
            term: 1,
            success: true,
            match_index: 3,
        }
        .into();
        assert_eq!(reply.name(), "append_entries_reply");
    }
}

// =============================================================================
// SECTION 4: CONFIGURATION
// =============================================================================

mod configuration {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(RaftConfig::default().validate().is_ok());
    }

    #[test]
    fn seed_is_optional() {
        let config = RaftConfig::from_json("{}").unwrap();
        assert_eq!(config.seed, None);
        assert_eq!(config.with_seed(42).seed, Some(42));
    }

    #[test]
    fn zero_rpc_timeout_is_invalid() {
        assert!(RaftConfig::from_json(r#"{ "rpc_timeout": 0 }"#).is_err());
    }

    #[test]
    fn zero_join_rounds_is_invalid() {
        assert!(RaftConfig::from_json(r#"{ "join_rounds": 0 }"#).is_err());
    }
}

// =============================================================================
// SECTION 5: QUORUM MATH
// =============================================================================

mod quorum {
    use super::*;

    #[test]
    fn majority_of_three_node_cluster() {
        // two peers plus self
        assert_eq!(majority(2), 2);
    }

    #[test]
    fn majority_of_five_node_cluster() {
        assert_eq!(majority(4), 3);
    }

    #[test]
    fn quorum_index_ignores_lagging_minority() {
        // three nodes: leader at 5, one peer at 5, one at 0
        assert_eq!(quorum_match_index([5, 0], 5), 5);
    }

    #[test]
    fn quorum_index_waits_for_majority() {
        // five nodes: only the leader and one peer hold index 4
        assert_eq!(quorum_match_index([4, 0, 0, 0], 4), 0);
        assert_eq!(quorum_match_index([4, 4, 0, 0], 4), 4);
    }
}

// =============================================================================
// SECTION 6: PEER TRACKING
// =============================================================================

mod peer_tracking {
    use super::*;

    #[test]
    fn new_peer_starts_at_first_entry() {
        let peer = Peer::new(PeerConfig::local(2));
        assert_eq!(peer.id(), NodeId(2));
        assert_eq!(peer.next_index, 1);
        assert_eq!(peer.match_index, 0);
        assert!(!peer.vote_granted);
    }

    #[test]
    fn failures_walk_back_towards_agreement() {
        let mut peer = Peer::new(PeerConfig::local(2));
        peer.reset_known_logs(4);
        for expected in [4, 3, 2, 1, 1] {
            peer.record_failure();
            assert_eq!(peer.next_index, expected);
        }
    }

    #[test]
    fn success_unblocks_the_peer() {
        let mut peer = Peer::new(PeerConfig::local(2));
        peer.mark_sent(0, 50, 50);
        assert!(!peer.ready_to_send(10));
        peer.record_success(2);
        assert!(peer.ready_to_send(10));
        assert_eq!(peer.next_index, 3);
    }

    #[test]
    fn reset_vote_clears_grant() {
        let mut peer = Peer::new(PeerConfig::local(2));
        peer.vote_granted = true;
        peer.rpc_due = 99;
        peer.reset_vote();
        assert!(!peer.vote_granted);
        assert!(peer.ready_to_send(0));
    }
}

// =============================================================================
// SECTION 7: COOPERATIVE SCHEDULING
// =============================================================================

mod scheduling {
    use super::*;

    #[test]
    fn task_waits_for_condition_on_context() {
        let mut scheduler = Scheduler::new();
        let mut counter = 0u32;
        let seen = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&seen);
        scheduler.queue(
            Task::new("wait-for-three", move |counter: &mut u32| {
                if *counter < 3 {
                    return Step::Yield;
                }
                *sink.borrow_mut() = Some(*counter);
                Step::Done
            }),
            Mode::Concurrent,
        );

        for _ in 0..5 {
            counter += 1;
            scheduler.run(&mut counter);
        }
        assert_eq!(*seen.borrow(), Some(3));
        assert!(scheduler.is_idle());
    }

    #[test]
    fn sequential_queue_preserves_order() {
        let mut scheduler = Scheduler::new();
        let mut trace: Vec<&'static str> = Vec::new();
        for name in ["first", "second", "third"] {
            let mut stepped = false;
            scheduler.queue(
                Task::new(name, move |trace: &mut Vec<&'static str>| {
                    if !stepped {
                        stepped = true;
                        trace.push(name);
                        return Step::Yield;
                    }
                    Step::Done
                }),
                Mode::Sequential,
            );
        }

        for _ in 0..3 {
            scheduler.run(&mut trace);
        }
        assert_eq!(trace, vec!["first", "second", "third"]);
    }

    #[test]
    fn tasks_queued_after_clear_still_run() {
        let mut scheduler: Scheduler<u32> = Scheduler::new();
        let mut value = 0;
        scheduler.queue(Task::new("stale", |_: &mut u32| Step::Yield), Mode::Sequential);
        scheduler.clear();
        scheduler.run(&mut value);
        assert!(scheduler.is_idle());

        scheduler.queue(
            Task::new("fresh", |v: &mut u32| {
                *v = 7;
                Step::Done
            }),
            Mode::Sequential,
        );
        scheduler.run(&mut value);
        assert_eq!(value, 7);
    }

    #[test]
    fn finished_task_is_not_stepped_again() {
        let mut task: Task<u32> = Task::new("once", |v: &mut u32| {
            *v += 1;
            Step::Done
        });
        let mut value = 0;
        task.signal(&mut value);
        task.signal(&mut value);
        assert!(task.is_done());
        assert_eq!(value, 1);
        assert_eq!(task.name(), "once");
    }
}
