//! # tickraft-core
//!
//! why: shared vocabulary of the tick-driven raft engine, free of any i/o
//! relations: used by tickraft-storage for the on-disk record shapes and by
//! tickraft-server for roles, replication and scheduling
//! what: ids and states, log records, rpc messages, config, peer tracker,
//! cooperative scheduler

pub mod config;
pub mod log;
pub mod message;
pub mod node;
pub mod replication;
pub mod scheduler;

pub use config::{ConfigError, RaftConfig};
pub use log::{EntryType, IndexRecord, LogEntry, RecordError, LOG_RECORD_SIZE};
pub use message::{
    AddServerReply, AddServerRequest, AddServerStatus, AppendEntriesReply, AppendEntriesRequest,
    Envelope, RaftMessage, VoteReply, VoteRequest,
};
pub use node::{NodeId, NodeState, PeerConfig};
pub use replication::{majority, quorum_match_index, Peer};
pub use scheduler::{Mode, Scheduler, Step, Task};

/// Election epoch. Stored as a 32-bit signed integer on disk.
pub type Term = i32;

/// 1-based position in the replicated log; 0 means "no entry".
pub type LogIndex = u32;

/// Discrete time unit driven by the caller.
pub type Tick = u64;
