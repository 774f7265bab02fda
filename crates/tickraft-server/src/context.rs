//! # context
//!
//! why: every role and every scheduled task works on the same server state;
//! keeping it in one place lets roles be swapped without moving data around
//! relations: owned by Server, passed to role handlers and scheduler tasks
//! what: Node (identity, log, transport, clock), Context (peers, commit
//! index advancement, membership apply, step down)

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tickraft_core::{
    majority, quorum_match_index, AddServerReply, AddServerStatus, AppendEntriesRequest,
    EntryType, Envelope, LogEntry, LogIndex, NodeId, NodeState, Peer, PeerConfig, RaftConfig,
    RaftMessage, Term, Tick, VoteRequest,
};
use tickraft_storage::{decode_members, Log};
use tracing::{debug, info};

use crate::error::Result;
use crate::state_machine::StateMachine;
use crate::transport::Transport;

const SEED_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

/// What a server owns regardless of its role.
pub struct Node {
    pub(crate) me: PeerConfig,
    pub(crate) config: RaftConfig,
    pub(crate) log: Log,
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) tick: Tick,
    pub(crate) commit_index: LogIndex,
    /// Last server known to lead the current term
    pub(crate) leader: Option<PeerConfig>,
    rng: StdRng,
}

impl Node {
    pub(crate) fn new(
        me: PeerConfig,
        config: RaftConfig,
        log: Log,
        transport: Box<dyn Transport>,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => {
                StdRng::seed_from_u64(seed ^ (me.id.0 as u64).wrapping_mul(SEED_MIX))
            }
            None => StdRng::from_entropy(),
        };
        Self {
            me,
            config,
            log,
            transport,
            tick: 0,
            commit_index: 0,
            leader: None,
            rng,
        }
    }

    pub fn id(&self) -> NodeId {
        self.me.id
    }

    pub fn term(&self) -> Term {
        self.log.term()
    }

    pub(crate) fn send(&mut self, to: NodeId, message: impl Into<RaftMessage>) -> Result<()> {
        let envelope = Envelope::new(self.me.clone(), message);
        debug!(
            node = %self.me.id,
            %to,
            message = envelope.message.name(),
            "send"
        );
        self.transport.send(to, envelope)?;
        Ok(())
    }

    /// A fresh election deadline drawn from the configured range.
    pub(crate) fn election_deadline(&mut self) -> Tick {
        let timeout = self
            .rng
            .gen_range(self.config.election_timeout_min..self.config.election_timeout_max);
        self.tick + timeout
    }

    /// Everything from `peer.next_index` to the end of the log, plus the
    /// term of the entry just before it.
    pub(crate) fn send_append_entries(&mut self, peer: &mut Peer) -> Result<()> {
        let prev_log_index = peer.next_index.saturating_sub(1);
        let request = AppendEntriesRequest {
            term: self.term(),
            leader_id: self.me.id,
            prev_log_index,
            prev_log_term: self.log.get_term(prev_log_index),
            entries: self.log.get_entries(prev_log_index, self.log.len())?,
            leader_commit: self.commit_index,
        };
        peer.mark_sent(
            self.tick,
            self.config.rpc_timeout,
            self.config.heartbeat_interval,
        );
        self.send(peer.id(), request)
    }

    pub(crate) fn send_vote_request(&mut self, peer: &mut Peer) -> Result<()> {
        let request = VoteRequest {
            term: self.term(),
            candidate_id: self.me.id,
            last_log_index: self.log.last_index(),
            last_log_term: self.log.last_term(),
        };
        peer.mark_sent(
            self.tick,
            self.config.rpc_timeout,
            self.config.heartbeat_interval,
        );
        self.send(peer.id(), request)
    }

    pub(crate) fn send_add_server_reply(
        &mut self,
        to: NodeId,
        status: AddServerStatus,
        leader_hint: Option<PeerConfig>,
    ) -> Result<()> {
        self.send(to, AddServerReply { status, leader_hint })
    }
}

/// Shared state handed to roles and scheduled tasks.
pub struct Context {
    pub(crate) node: Node,
    pub(crate) peers: Vec<Peer>,
    pub(crate) state: NodeState,
    pub(crate) pending_role: Option<NodeState>,
    /// Set while this server waits to be added to a cluster
    pub(crate) joining: bool,
    pub(crate) join_status: Option<AddServerStatus>,
    /// Latest AddServerReply, consumed by the join task
    pub(crate) join_reply: Option<(PeerConfig, AddServerReply)>,
    state_machine: Box<dyn StateMachine>,
}

impl Context {
    pub(crate) fn new(node: Node, state_machine: Box<dyn StateMachine>) -> Self {
        Self {
            node,
            peers: Vec::new(),
            state: NodeState::Stopped,
            pending_role: None,
            joining: false,
            join_status: None,
            join_reply: None,
            state_machine,
        }
    }

    pub(crate) fn set_state_machine(&mut self, state_machine: Box<dyn StateMachine>) {
        self.state_machine = state_machine;
    }

    // -- read access for tasks --

    pub fn id(&self) -> NodeId {
        self.node.me.id
    }

    pub fn me(&self) -> &PeerConfig {
        &self.node.me
    }

    pub fn config(&self) -> &RaftConfig {
        &self.node.config
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn term(&self) -> Term {
        self.node.term()
    }

    pub fn tick(&self) -> Tick {
        self.node.tick
    }

    pub fn commit_index(&self) -> LogIndex {
        self.node.commit_index
    }

    pub fn log(&self) -> &Log {
        &self.node.log
    }

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn leader_hint(&self) -> Option<&PeerConfig> {
        self.node.leader.as_ref()
    }

    pub fn is_joining(&self) -> bool {
        self.joining
    }

    pub fn join_status(&self) -> Option<AddServerStatus> {
        self.join_status
    }

    /// Send a message from this server.
    pub fn send(&mut self, to: NodeId, message: impl Into<RaftMessage>) -> Result<()> {
        self.node.send(to, message)
    }

    // -- role support --

    /// Votes needed to win an election, counting self.
    pub fn majority(&self) -> usize {
        majority(self.peers.len())
    }

    pub(crate) fn peer_mut(&mut self, id: NodeId) -> Option<&mut Peer> {
        self.peers.iter_mut().find(|peer| peer.id() == id)
    }

    pub(crate) fn transition(&mut self, next: NodeState) {
        self.pending_role = Some(next);
    }

    /// Adopt `remote_term` and fall back to Follower if it is newer than
    /// ours. Returns whether that happened.
    pub(crate) fn step_down(&mut self, remote_term: Term) -> Result<bool> {
        let term = self.node.term();
        if remote_term <= term {
            return Ok(false);
        }
        info!(
            node = %self.node.me.id,
            term,
            remote_term,
            role = %self.state,
            "stepping down"
        );
        self.node.log.update_state(remote_term, None)?;
        self.transition(NodeState::Follower);
        Ok(true)
    }

    /// Commit the highest index a majority holds, if it is from this term.
    pub(crate) fn advance_commits(&mut self) -> Result<()> {
        let n = quorum_match_index(
            self.peers.iter().map(|peer| peer.match_index),
            self.node.log.len(),
        );
        if self.node.log.get_term(n) == self.node.term() {
            self.advance_to_commit(n.max(self.node.commit_index))?;
        }
        Ok(())
    }

    /// Move the commit index to `target` (clamped to the log and never below
    /// what was already applied) and apply every entry in between in order.
    ///
    /// The applied index is persisted only after an entry was applied, so an
    /// entry whose apply fails is retried on the next call.
    pub(crate) fn advance_to_commit(&mut self, target: LogIndex) -> Result<bool> {
        let applied = self.node.log.applied_index();
        let target = target.min(self.node.log.len()).max(applied);
        let from = self.node.commit_index;
        if target <= from {
            return Ok(false);
        }

        for index in applied + 1..=target {
            let Some(entry) = self.node.log.get_entry(index)? else {
                break;
            };
            self.apply_entry(index, &entry)?;
            self.node.log.mark_applied(index)?;
            self.node.commit_index = self.node.commit_index.max(index);
        }
        self.node.commit_index = self.node.commit_index.max(target);
        debug!(
            node = %self.node.me.id,
            from,
            to = target,
            "advanced commit index"
        );
        Ok(true)
    }

    fn apply_entry(&mut self, index: LogIndex, entry: &LogEntry) -> Result<()> {
        match entry.kind() {
            EntryType::Data => self.state_machine.apply(index, entry),
            EntryType::NoOp => {}
            EntryType::Configuration => self.apply_configuration(index, entry)?,
        }
        Ok(())
    }

    /// Merge a committed member set into the peer list. Members are only
    /// ever added. Nothing changes in memory until the merged set is
    /// persisted.
    fn apply_configuration(&mut self, index: LogIndex, entry: &LogEntry) -> Result<()> {
        let members = decode_members(&entry.data)?;
        let me = self.node.me.clone();
        let mut persisted = self.node.log.peers().to_vec();
        for member in &members {
            if !persisted.iter().any(|known| known.id == member.id) {
                persisted.push(member.clone());
            }
        }
        if persisted.as_slice() != self.node.log.peers() {
            self.node.log.update_peers(&persisted)?;
        }

        let mut added = Vec::new();
        for member in members {
            if member.id == me.id {
                if self.joining {
                    info!(node = %me.id, index, "joined cluster");
                    self.joining = false;
                    self.join_status = Some(AddServerStatus::Ok);
                }
                continue;
            }
            if self.peer_mut(member.id).is_none() {
                let mut peer = Peer::new(member.clone());
                peer.reset_known_logs(self.node.log.len());
                self.peers.push(peer);
                added.push(member);
            }
        }
        info!(
            node = %me.id,
            index,
            members = persisted.len(),
            added = added.len(),
            "applied configuration"
        );

        if self.state == NodeState::Leader {
            for member in added {
                self.node
                    .send_add_server_reply(member.id, AddServerStatus::Ok, Some(me.clone()))?;
            }
        }
        Ok(())
    }
}
