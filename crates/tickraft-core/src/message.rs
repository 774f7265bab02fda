//! # message
//!
//! why: define all raft rpc message types for node communication
//! relations: produced and consumed by tickraft-server roles, carried by any
//! transport
//! what: vote, append-entries and add-server requests/replies, Envelope

use serde::{Deserialize, Serialize};

use crate::{LogEntry, LogIndex, NodeId, PeerConfig, Term};

/// Request a vote during leader election
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub term: Term,
    pub candidate_id: NodeId,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
}

/// Response to a vote request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteReply {
    pub term: Term,
    pub granted: bool,
}

/// Replicate log entries (also serves as heartbeat when entries is empty)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    pub term: Term,
    pub leader_id: NodeId,
    pub prev_log_index: LogIndex,
    pub prev_log_term: Term,
    pub entries: Vec<LogEntry>,
    pub leader_commit: LogIndex,
}

/// Response to AppendEntries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesReply {
    pub term: Term,
    pub success: bool,
    pub match_index: LogIndex,
}

/// Ask the leader to add `new_server` to the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddServerRequest {
    pub new_server: PeerConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddServerStatus {
    Ok,
    NotLeader,
    TimedOut,
}

/// Outcome of a membership change, sent to the joining server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddServerReply {
    pub status: AddServerStatus,
    pub leader_hint: Option<PeerConfig>,
}

/// All possible Raft messages between nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaftMessage {
    VoteRequest(VoteRequest),
    VoteReply(VoteReply),
    AppendEntriesRequest(AppendEntriesRequest),
    AppendEntriesReply(AppendEntriesReply),
    AddServerRequest(AddServerRequest),
    AddServerReply(AddServerReply),
}

impl RaftMessage {
    /// Term carried by the message, if it carries one.
    pub fn term(&self) -> Option<Term> {
        match self {
            Self::VoteRequest(m) => Some(m.term),
            Self::VoteReply(m) => Some(m.term),
            Self::AppendEntriesRequest(m) => Some(m.term),
            Self::AppendEntriesReply(m) => Some(m.term),
            Self::AddServerRequest(_) | Self::AddServerReply(_) => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::VoteRequest(_) => "vote_request",
            Self::VoteReply(_) => "vote_reply",
            Self::AppendEntriesRequest(_) => "append_entries_request",
            Self::AppendEntriesReply(_) => "append_entries_reply",
            Self::AddServerRequest(_) => "add_server_request",
            Self::AddServerReply(_) => "add_server_reply",
        }
    }
}

macro_rules! impl_from_message {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for RaftMessage {
                fn from(message: $variant) -> Self {
                    Self::$variant(message)
                }
            }
        )*
    };
}

impl_from_message!(
    VoteRequest,
    VoteReply,
    AppendEntriesRequest,
    AppendEntriesReply,
    AddServerRequest,
    AddServerReply,
);

/// A message together with the member that sent it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub from: PeerConfig,
    pub message: RaftMessage,
}

impl Envelope {
    pub fn new(from: PeerConfig, message: impl Into<RaftMessage>) -> Self {
        Self {
            from,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntryType;

    #[test]
    fn replies_without_term_report_none() {
        let reply = RaftMessage::from(AddServerReply {
            status: AddServerStatus::NotLeader,
            leader_hint: None,
        });
        assert_eq!(reply.term(), None);
        assert_eq!(reply.name(), "add_server_reply");
    }

    #[test]
    fn append_entries_survives_json() {
        let request = AppendEntriesRequest {
            term: 3,
            leader_id: NodeId(1),
            prev_log_index: 4,
            prev_log_term: 2,
            entries: vec![LogEntry::new(3, EntryType::Data, vec![9, 8])],
            leader_commit: 4,
        };
        let envelope = Envelope::new(PeerConfig::local(1), request);
        let json = serde_json::to_string(&envelope).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, envelope);
        assert_eq!(back.message.term(), Some(3));
    }
}
