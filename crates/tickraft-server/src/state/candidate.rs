use tickraft_core::{
    AddServerRequest, AddServerStatus, AppendEntriesReply, AppendEntriesRequest, NodeState,
    PeerConfig, Tick, VoteReply, VoteRequest,
};
use tracing::{debug, info};

use super::State;
use crate::context::Context;
use crate::error::Result;

/// Asks every peer for a vote; re-runs the election each time its deadline
/// passes without a majority.
#[derive(Debug, Default)]
pub struct Candidate {
    election_deadline: Tick,
}

impl Candidate {
    fn start_election(&mut self, ctx: &mut Context) -> Result<()> {
        let term = ctx.term() + 1;
        let me = ctx.id();
        ctx.node.log.update_state(term, Some(me))?;
        ctx.node.leader = None;
        for peer in ctx.peers.iter_mut() {
            peer.reset_vote();
        }
        self.election_deadline = ctx.node.election_deadline();
        info!(node = %me, term, peers = ctx.peers.len(), "starting election");

        self.check_votes(ctx);
        self.request_votes(ctx)
    }

    fn request_votes(&mut self, ctx: &mut Context) -> Result<()> {
        let tick = ctx.node.tick;
        for peer in ctx.peers.iter_mut() {
            if !peer.vote_granted && peer.ready_to_send(tick) {
                ctx.node.send_vote_request(peer)?;
            }
        }
        Ok(())
    }

    fn votes(ctx: &Context) -> usize {
        1 + ctx.peers.iter().filter(|peer| peer.vote_granted).count()
    }

    fn check_votes(&self, ctx: &mut Context) {
        let votes = Self::votes(ctx);
        if votes >= ctx.majority() {
            info!(
                node = %ctx.id(),
                term = ctx.term(),
                votes,
                majority = ctx.majority(),
                "won election"
            );
            ctx.transition(NodeState::Leader);
        }
    }
}

impl State for Candidate {
    fn enter(&mut self, ctx: &mut Context) -> Result<()> {
        self.start_election(ctx)
    }

    fn update(&mut self, ctx: &mut Context) -> Result<()> {
        if ctx.pending_role.is_some() {
            return Ok(());
        }
        if ctx.node.tick >= self.election_deadline {
            return self.start_election(ctx);
        }
        self.request_votes(ctx)
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
        // already voted for ourselves this term
        let term = ctx.term();
        ctx.node.send(from.id, VoteReply { term, granted: false })?;
        Ok(true)
    }

    fn vote_reply(&mut self, ctx: &mut Context, from: &PeerConfig, reply: &VoteReply) -> Result<bool> {
        if ctx.step_down(reply.term)? {
            return Ok(false);
        }
        if reply.term != ctx.term() || !reply.granted {
            return Ok(true);
        }
        let Some(peer) = ctx.peer_mut(from.id) else {
            debug!(node = %ctx.id(), from = %from.id, "vote from unknown server");
            return Ok(true);
        };
        peer.vote_granted = true;
        self.check_votes(ctx);
        Ok(true)
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
            // someone else won this term
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
        _: &PeerConfig,
        reply: &AppendEntriesReply,
    ) -> Result<bool> {
        Ok(!ctx.step_down(reply.term)?)
    }

    fn add_server_request(
        &mut self,
        ctx: &mut Context,
        _: &PeerConfig,
        request: &AddServerRequest,
    ) -> Result<bool> {
        ctx.node
            .send_add_server_reply(request.new_server.id, AddServerStatus::NotLeader, None)?;
        Ok(true)
    }
}
