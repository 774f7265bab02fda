use tickraft_core::{
    AddServerRequest, AddServerStatus, AppendEntriesReply, AppendEntriesRequest, LogIndex,
    NodeState, Peer, PeerConfig, Tick, VoteReply, VoteRequest,
};
use tracing::{debug, info, warn};

use super::State;
use crate::context::Context;
use crate::error::Result;

/// A server being caught up before it is added to the configuration.
#[derive(Debug, Clone)]
pub struct ServerJoin {
    pub peer: Peer,
    pub rounds_remaining: u32,
    /// Match index at the end of the previous round
    pub last_round_index: LogIndex,
    pub next_round_deadline: Tick,
}

/// Replicates the log, advances the commit index and runs membership
/// additions.
#[derive(Debug, Default)]
pub struct Leader {
    joins: Vec<ServerJoin>,
}

impl Leader {
    pub fn pending_joins(&self) -> usize {
        self.joins.len()
    }

    fn should_send(peer: &Peer, tick: Tick, log_length: LogIndex) -> bool {
        peer.heartbeat_due(tick) || (peer.next_index <= log_length && peer.ready_to_send(tick))
    }

    /// Judge a joining server after one of its replies: a round ends when
    /// its deadline passes or the server has caught up with the commit
    /// index.
    fn evaluate_join(&mut self, ctx: &mut Context, at: usize) -> Result<()> {
        let tick = ctx.node.tick;
        let commit = ctx.node.commit_index;
        let join = &mut self.joins[at];
        let caught_up = join.peer.match_index >= commit;
        if join.next_round_deadline > tick && !caught_up {
            return Ok(());
        }
        join.rounds_remaining = join.rounds_remaining.saturating_sub(1);

        if !caught_up {
            let matched = join.peer.match_index;
            if join.rounds_remaining == 0 || join.last_round_index == matched {
                let joiner = join.peer.id();
                warn!(
                    node = %ctx.id(),
                    joiner = %joiner,
                    matched,
                    commit,
                    "join timed out"
                );
                self.joins.remove(at);
                let me = ctx.node.me.clone();
                ctx.node
                    .send_add_server_reply(joiner, AddServerStatus::TimedOut, Some(me))?;
            } else {
                join.last_round_index = matched;
                join.next_round_deadline = tick + ctx.node.config.election_timeout_min;
            }
            return Ok(());
        }

        if ctx.node.log.has_pending_configuration() {
            // wait for the change in flight without running out of rounds
            join.rounds_remaining = ctx.node.config.join_rounds;
            return Ok(());
        }

        let joiner = self.joins.remove(at).peer.config;
        let mut members = Vec::with_capacity(ctx.peers.len() + 2);
        members.push(ctx.node.me.clone());
        members.extend(ctx.peers.iter().map(|peer| peer.config.clone()));
        members.push(joiner.clone());

        let term = ctx.term();
        ctx.node.log.append_configuration(term, &members)?;
        info!(
            node = %ctx.id(),
            joiner = %joiner,
            index = ctx.node.log.len(),
            members = members.len(),
            "appended configuration"
        );
        Ok(())
    }
}

impl State for Leader {
    fn enter(&mut self, ctx: &mut Context) -> Result<()> {
        let length = ctx.node.log.len();
        let votes = 1 + ctx.peers.iter().filter(|peer| peer.vote_granted).count();
        for peer in ctx.peers.iter_mut() {
            peer.reset_known_logs(length);
        }
        ctx.node.leader = Some(ctx.node.me.clone());
        info!(node = %ctx.id(), term = ctx.term(), votes, "became leader");
        Ok(())
    }

    fn exit(&mut self, ctx: &mut Context) -> Result<()> {
        for join in self.joins.drain(..) {
            ctx.node
                .send_add_server_reply(join.peer.id(), AddServerStatus::NotLeader, None)?;
        }
        Ok(())
    }

    fn update(&mut self, ctx: &mut Context) -> Result<()> {
        ctx.advance_commits()?;

        let tick = ctx.node.tick;
        let length = ctx.node.log.len();
        for peer in ctx.peers.iter_mut() {
            if Self::should_send(peer, tick, length) {
                ctx.node.send_append_entries(peer)?;
            }
        }
        for join in self.joins.iter_mut() {
            if Self::should_send(&join.peer, tick, length) {
                debug!(node = %ctx.node.me.id, joiner = %join.peer.id(), "catching up");
                ctx.node.send_append_entries(&mut join.peer)?;
            }
        }
        Ok(())
    }

    fn vote_request(
        &mut self,
        ctx: &mut Context,
        from: &PeerConfig,
        request: &VoteRequest,
    ) -> Result<bool> {
        if ctx.step_down(request.term)? {
            return Ok(false);
        }
        let term = ctx.term();
        ctx.node.send(from.id, VoteReply { term, granted: false })?;
        Ok(true)
    }

    fn vote_reply(&mut self, ctx: &mut Context, _: &PeerConfig, reply: &VoteReply) -> Result<bool> {
        Ok(!ctx.step_down(reply.term)?)
    }

    fn append_entries_request(
        &mut self,
        ctx: &mut Context,
        from: &PeerConfig,
        request: &AppendEntriesRequest,
    ) -> Result<bool> {
        if ctx.step_down(request.term)? {
            return Ok(false);
        }
        if request.term == ctx.term() {
            warn!(
                node = %ctx.id(),
                other = %from.id,
                term = request.term,
                "another leader claims this term"
            );
            ctx.transition(NodeState::Follower);
            return Ok(false);
        }
        let reply = AppendEntriesReply {
            term: ctx.term(),
            success: false,
            match_index: ctx.commit_index(),
        };
        ctx.node.send(from.id, reply)?;
        Ok(true)
    }

    fn append_entries_reply(
        &mut self,
        ctx: &mut Context,
        from: &PeerConfig,
        reply: &AppendEntriesReply,
    ) -> Result<bool> {
        if ctx.step_down(reply.term)? {
            return Ok(false);
        }
        if reply.term < ctx.term() {
            return Ok(true);
        }

        let joining = self.joins.iter().position(|join| join.peer.id() == from.id);
        let peer = match joining {
            Some(at) => &mut self.joins[at].peer,
            None => match ctx.peers.iter_mut().find(|peer| peer.id() == from.id) {
                Some(peer) => peer,
                None => {
                    warn!(node = %ctx.node.me.id, from = %from.id, "reply from unknown server");
                    return Ok(true);
                }
            },
        };

        if reply.success {
            peer.record_success(reply.match_index);
        } else {
            peer.record_failure();
        }

        if let Some(at) = joining {
            self.evaluate_join(ctx, at)?;
        }
        Ok(true)
    }

    fn add_server_request(
        &mut self,
        ctx: &mut Context,
        _: &PeerConfig,
        request: &AddServerRequest,
    ) -> Result<bool> {
        let new_server = &request.new_server;
        let me = ctx.node.me.clone();
        if new_server.id == me.id || ctx.peers.iter().any(|peer| peer.id() == new_server.id) {
            ctx.node
                .send_add_server_reply(new_server.id, AddServerStatus::Ok, Some(me))?;
            return Ok(true);
        }
        if self.joins.iter().any(|join| join.peer.id() == new_server.id) {
            return Ok(true);
        }

        let mut peer = Peer::new(new_server.clone());
        peer.reset_known_logs(ctx.node.log.len());
        let rounds = ctx.node.config.join_rounds;
        self.joins.push(ServerJoin {
            peer,
            rounds_remaining: rounds,
            last_round_index: 0,
            next_round_deadline: ctx.node.tick + ctx.node.config.election_timeout_min,
        });
        info!(node = %me.id, joiner = %new_server, rounds, "queued join");
        Ok(true)
    }
}
