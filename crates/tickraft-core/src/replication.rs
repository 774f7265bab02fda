//! # replication
//!
//! why: the leader needs a per-peer view of how far each log has caught up
//! relations: owned by the server context, mutated by candidate and leader
//! roles in tickraft-server
//! what: Peer tracker (next/match index, vote, rpc and heartbeat timers),
//! quorum arithmetic

use crate::{LogIndex, PeerConfig, Tick};

/// Votes needed to win, counting self: `floor((peers + 1) / 2) + 1`.
pub fn majority(peer_count: usize) -> usize {
    (peer_count + 1) / 2 + 1
}

/// Highest index held by a majority, given each peer's match index and the
/// leader's own log length.
pub fn quorum_match_index<I>(peer_matches: I, own_length: LogIndex) -> LogIndex
where
    I: IntoIterator<Item = LogIndex>,
{
    let mut indexes: Vec<LogIndex> = peer_matches.into_iter().collect();
    let peers = indexes.len();
    indexes.push(own_length);
    indexes.sort_unstable();
    indexes[peers / 2]
}

/// Replication view of one other cluster member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub config: PeerConfig,
    pub next_index: LogIndex,
    pub match_index: LogIndex,
    pub vote_granted: bool,
    /// Tick until which an rpc to this peer is considered outstanding
    pub rpc_due: Tick,
    pub next_heartbeat: Tick,
}

impl Peer {
    pub fn new(config: PeerConfig) -> Self {
        Self {
            config,
            next_index: 1,
            match_index: 0,
            vote_granted: false,
            rpc_due: 0,
            next_heartbeat: 0,
        }
    }

    pub fn id(&self) -> crate::NodeId {
        self.config.id
    }

    /// Forget everything learned about the peer's log; next send starts
    /// right after `log_length`.
    pub fn reset_known_logs(&mut self, log_length: LogIndex) {
        self.next_index = log_length + 1;
        self.match_index = 0;
        self.rpc_due = 0;
        self.next_heartbeat = 0;
    }

    pub fn reset_vote(&mut self) {
        self.vote_granted = false;
        self.rpc_due = 0;
    }

    /// No rpc is outstanding.
    pub fn ready_to_send(&self, now: Tick) -> bool {
        self.rpc_due <= now
    }

    pub fn heartbeat_due(&self, now: Tick) -> bool {
        self.next_heartbeat <= now
    }

    pub fn mark_sent(&mut self, now: Tick, rpc_timeout: u64, heartbeat_interval: u64) {
        self.rpc_due = now + rpc_timeout;
        self.next_heartbeat = now + heartbeat_interval;
    }

    pub fn record_success(&mut self, match_index: LogIndex) {
        self.match_index = self.match_index.max(match_index);
        self.next_index = match_index + 1;
        self.rpc_due = 0;
    }

    /// Step one entry back and retry on the next update.
    pub fn record_failure(&mut self) {
        self.next_index = self.next_index.saturating_sub(1).max(1);
        self.next_heartbeat = 0;
        self.rpc_due = 0;
    }
}
