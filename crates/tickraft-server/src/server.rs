//! # server
//!
//! why: one place that moves time forward; every inbound message, role
//! update and scheduled task of a tick happens inside `advance`
//! relations: owns the Context, the current Role and the Scheduler
//! what: Server lifecycle (initialize, advance, change_state, shutdown),
//! client writes, membership join, scheduled tasks, status snapshots

use serde::Serialize;
use tickraft_core::{
    AddServerReply, AddServerRequest, AddServerStatus, Envelope, LogIndex, Mode, NodeId,
    NodeState, Peer, PeerConfig, RaftConfig, RaftMessage, Scheduler, Step, Task, Term, Tick,
};
use tickraft_storage::Log;
use tracing::{debug, info, warn};

use crate::context::{Context, Node};
use crate::error::{Result, ServerError};
use crate::state::Role;
use crate::state_machine::{NoopStateMachine, StateMachine};
use crate::transport::Transport;

/// A message can move through at most this many roles before it is dropped;
/// one step down plus the role that finally handles it.
const MAX_DISPATCH: usize = 3;

/// Point-in-time view of a server, for logs and dashboards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerStatus {
    pub id: NodeId,
    pub state: NodeState,
    pub term: Term,
    pub voted_for: Option<NodeId>,
    pub tick: Tick,
    pub log_length: LogIndex,
    pub commit_index: LogIndex,
    pub applied_index: LogIndex,
    pub leader: Option<PeerConfig>,
    pub peers: Vec<PeerStatus>,
    pub pending_joins: usize,
    pub joining: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerStatus {
    pub id: NodeId,
    pub next_index: LogIndex,
    pub match_index: LogIndex,
}

/// One raft participant driven by discrete ticks.
pub struct Server {
    ctx: Context,
    role: Role,
    scheduler: Scheduler<Context>,
    initialized: bool,
    shut_down: bool,
}

impl Server {
    pub fn new(
        me: PeerConfig,
        config: RaftConfig,
        log: Log,
        transport: impl Transport + 'static,
    ) -> Self {
        let node = Node::new(me, config, log, Box::new(transport));
        Self {
            ctx: Context::new(node, Box::new(NoopStateMachine)),
            role: Role::default(),
            scheduler: Scheduler::new(),
            initialized: false,
            shut_down: false,
        }
    }

    /// Like [`Server::new`], rejecting an invalid config.
    pub fn try_new(
        me: PeerConfig,
        config: RaftConfig,
        log: Log,
        transport: impl Transport + 'static,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(me, config, log, transport))
    }

    pub fn with_state_machine(mut self, state_machine: impl StateMachine + 'static) -> Self {
        self.ctx.set_state_machine(Box::new(state_machine));
        self
    }

    /// One-time setup. `peers` replaces the persisted peer set when given;
    /// otherwise the set recovered from the log is used. Starts as Follower.
    pub fn initialize(&mut self, peers: &[PeerConfig]) -> Result<()> {
        if self.shut_down {
            return Err(ServerError::ShutDown);
        }
        if self.initialized {
            return Err(ServerError::AlreadyInitialized);
        }

        let log = &mut self.ctx.node.log;
        if !peers.is_empty() {
            log.update_peers(peers)?;
        }
        let me = self.ctx.node.me.id;
        let length = log.len();
        self.ctx.peers = log
            .peers()
            .iter()
            .filter(|peer| peer.id != me)
            .map(|config| {
                let mut peer = Peer::new(config.clone());
                peer.reset_known_logs(length);
                peer
            })
            .collect();
        self.ctx.node.commit_index = log.applied_index();
        self.initialized = true;

        info!(
            node = %me,
            term = self.ctx.term(),
            peers = self.ctx.peers.len(),
            log_length = length,
            applied = self.ctx.node.commit_index,
            "initialized"
        );
        self.change_state(NodeState::Follower)
    }

    // -- time --

    /// Move one tick forward: deliver inbound messages, run the role's
    /// update, then step scheduled tasks once.
    pub fn advance(&mut self) -> Result<()> {
        self.ensure_running()?;
        self.ctx.node.tick += 1;

        let me = self.ctx.node.me.id;
        let inbound = self.ctx.node.transport.receive(me)?;
        for envelope in inbound {
            self.dispatch(envelope)?;
        }

        self.role.as_state().update(&mut self.ctx)?;
        self.apply_transitions()?;

        self.scheduler.run(&mut self.ctx);
        Ok(())
    }

    pub fn advance_by(&mut self, ticks: u64) -> Result<()> {
        for _ in 0..ticks {
            self.advance()?;
        }
        Ok(())
    }

    pub fn advance_to(&mut self, tick: Tick) -> Result<()> {
        while self.ctx.node.tick < tick {
            self.advance()?;
        }
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shut_down {
            return Err(ServerError::ShutDown);
        }
        if !self.initialized {
            return Err(ServerError::NotInitialized);
        }
        Ok(())
    }

    fn dispatch(&mut self, envelope: Envelope) -> Result<()> {
        let Envelope { from, message } = envelope;
        debug!(
            node = %self.ctx.node.me.id,
            from = %from.id,
            message = message.name(),
            "received"
        );

        if let RaftMessage::AddServerReply(reply) = message {
            self.record_join_reply(from, reply);
            return Ok(());
        }

        for _ in 0..MAX_DISPATCH {
            let state = self.role.as_state();
            let ctx = &mut self.ctx;
            let handled = match &message {
                RaftMessage::VoteRequest(m) => state.vote_request(ctx, &from, m)?,
                RaftMessage::VoteReply(m) => state.vote_reply(ctx, &from, m)?,
                RaftMessage::AppendEntriesRequest(m) => {
                    state.append_entries_request(ctx, &from, m)?
                }
                RaftMessage::AppendEntriesReply(m) => state.append_entries_reply(ctx, &from, m)?,
                RaftMessage::AddServerRequest(m) => state.add_server_request(ctx, &from, m)?,
                RaftMessage::AddServerReply(_) => true,
            };
            self.apply_transitions()?;
            if handled {
                return Ok(());
            }
        }
        warn!(node = %self.ctx.node.me.id, from = %from.id, "message bounced between roles");
        Ok(())
    }

    fn record_join_reply(&mut self, from: PeerConfig, reply: AddServerReply) {
        if !self.ctx.joining {
            debug!(node = %self.ctx.node.me.id, status = ?reply.status, "unexpected join reply");
            return;
        }
        self.ctx.join_reply = Some((from, reply));
    }

    // -- roles --

    /// Swap the current role, running its exit and the new role's enter.
    pub fn change_state(&mut self, next: NodeState) -> Result<()> {
        self.ctx.transition(next);
        self.apply_transitions()
    }

    fn apply_transitions(&mut self) -> Result<()> {
        while let Some(next) = self.ctx.pending_role.take() {
            let previous = self.role.kind();
            self.role.as_state().exit(&mut self.ctx)?;
            self.role = Role::new(next);
            self.ctx.state = next;
            info!(
                node = %self.ctx.node.me.id,
                term = self.ctx.term(),
                from = %previous,
                to = %next,
                "role changed"
            );
            self.role.as_state().enter(&mut self.ctx)?;
        }
        Ok(())
    }

    // -- client operations --

    /// Append `payload` as a Data entry. Only the leader accepts writes.
    pub fn propose(&mut self, payload: &[u8]) -> Result<LogIndex> {
        self.ensure_running()?;
        if self.ctx.state != NodeState::Leader {
            return Err(ServerError::NotLeader {
                hint: self.ctx.node.leader.clone(),
            });
        }
        let term = self.ctx.term();
        self.ctx.node.log.append_data(term, payload)?;
        Ok(self.ctx.node.log.len())
    }

    /// Ask `target` to add this server to its cluster. The request is
    /// retried every `election_timeout_max` ticks and follows leader hints;
    /// the outcome shows up in [`Server::join_status`].
    pub fn join(&mut self, target: PeerConfig) -> Result<()> {
        self.ensure_running()?;
        self.ctx.joining = true;
        self.ctx.join_status = None;
        self.ctx.join_reply = None;
        info!(node = %self.ctx.node.me.id, target = %target, "joining cluster");

        let mut target = target;
        let mut attempts_left = self.ctx.node.config.join_rounds;
        let mut next_send: Tick = 0;
        let task = Task::new("join", move |ctx: &mut Context| {
            // a committed configuration naming this server ends the join too
            if !ctx.joining {
                return Step::Done;
            }
            if let Some((from, reply)) = ctx.join_reply.take() {
                match reply.status {
                    AddServerStatus::Ok => {
                        info!(node = %ctx.id(), leader = %from, "join accepted");
                        ctx.join_status = Some(AddServerStatus::Ok);
                        ctx.joining = false;
                        return Step::Done;
                    }
                    AddServerStatus::TimedOut => {
                        warn!(node = %ctx.id(), leader = %from, "join timed out");
                        ctx.join_status = Some(AddServerStatus::TimedOut);
                        ctx.joining = false;
                        return Step::Done;
                    }
                    AddServerStatus::NotLeader => match reply.leader_hint {
                        Some(hint) if hint != target => {
                            debug!(node = %ctx.id(), leader = %hint, "following leader hint");
                            target = hint;
                            next_send = 0;
                        }
                        _ => ctx.join_status = Some(AddServerStatus::NotLeader),
                    },
                }
            }

            if ctx.tick() < next_send {
                return Step::Yield;
            }
            if attempts_left == 0 {
                warn!(node = %ctx.id(), "giving up on join");
                ctx.join_status = Some(AddServerStatus::TimedOut);
                ctx.joining = false;
                return Step::Done;
            }
            attempts_left -= 1;
            next_send = ctx.tick() + ctx.config().election_timeout_max;

            let request = AddServerRequest {
                new_server: ctx.me().clone(),
            };
            if let Err(err) = ctx.send(target.id, request) {
                warn!(node = %ctx.id(), error = %err, "failed to send join request");
            }
            Step::Yield
        });
        self.scheduler.queue(task, Mode::Sequential);
        Ok(())
    }

    /// Run `callback` once the commit index reaches `index`.
    pub fn when_committed(
        &mut self,
        index: LogIndex,
        callback: impl FnOnce(&mut Context) + 'static,
    ) {
        let mut callback = Some(callback);
        let task = Task::new("when-committed", move |ctx: &mut Context| {
            if ctx.commit_index() < index {
                return Step::Yield;
            }
            if let Some(callback) = callback.take() {
                callback(ctx);
            }
            Step::Done
        });
        self.scheduler.queue(task, Mode::Concurrent);
    }

    pub fn queue_task(&mut self, task: Task<Context>, mode: Mode) {
        self.scheduler.queue(task, mode);
    }

    /// Drop every scheduled task on the next pass.
    pub fn cancel_tasks(&mut self) {
        self.scheduler.clear();
    }

    pub fn pending_tasks(&self) -> usize {
        self.scheduler.pending()
    }

    // -- lifecycle --

    /// Release transport and storage, in that order. Safe to call twice.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        if self.role.kind() != NodeState::Stopped {
            self.change_state(NodeState::Stopped)?;
        }
        let me = self.ctx.node.me.id;
        self.ctx.node.transport.shutdown(me);
        self.ctx.node.log.close();
        self.shut_down = true;
        info!(node = %me, "shut down");
        Ok(())
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    // -- accessors --

    pub fn id(&self) -> NodeId {
        self.ctx.node.me.id
    }

    pub fn me(&self) -> &PeerConfig {
        &self.ctx.node.me
    }

    pub fn config(&self) -> &RaftConfig {
        &self.ctx.node.config
    }

    pub fn state(&self) -> NodeState {
        self.ctx.state
    }

    pub fn term(&self) -> Term {
        self.ctx.term()
    }

    pub fn voted_for(&self) -> Option<NodeId> {
        self.ctx.node.log.voted_for()
    }

    pub fn commit_index(&self) -> LogIndex {
        self.ctx.node.commit_index
    }

    pub fn tick(&self) -> Tick {
        self.ctx.node.tick
    }

    pub fn log(&self) -> &Log {
        &self.ctx.node.log
    }

    pub fn log_mut(&mut self) -> &mut Log {
        &mut self.ctx.node.log
    }

    pub fn peers(&self) -> &[Peer] {
        &self.ctx.peers
    }

    pub fn leader_hint(&self) -> Option<&PeerConfig> {
        self.ctx.node.leader.as_ref()
    }

    pub fn pending_joins(&self) -> usize {
        self.role.leader().map_or(0, |leader| leader.pending_joins())
    }

    pub fn is_joining(&self) -> bool {
        self.ctx.joining
    }

    pub fn join_status(&self) -> Option<AddServerStatus> {
        self.ctx.join_status
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn status(&self) -> ServerStatus {
        let log = &self.ctx.node.log;
        ServerStatus {
            id: self.id(),
            state: self.state(),
            term: log.term(),
            voted_for: log.voted_for(),
            tick: self.tick(),
            log_length: log.len(),
            commit_index: self.commit_index(),
            applied_index: log.applied_index(),
            leader: self.ctx.node.leader.clone(),
            peers: self
                .ctx
                .peers
                .iter()
                .map(|peer| PeerStatus {
                    id: peer.id(),
                    next_index: peer.next_index,
                    match_index: peer.match_index,
                })
                .collect(),
            pending_joins: self.pending_joins(),
            joining: self.ctx.joining,
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("term", &self.term())
            .field("tick", &self.tick())
            .field("commit_index", &self.commit_index())
            .field("log", &self.ctx.node.log)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}
