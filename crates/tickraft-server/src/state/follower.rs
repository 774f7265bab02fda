use tickraft_core::{
    AddServerRequest, AddServerStatus, AppendEntriesReply, AppendEntriesRequest, NodeState,
    PeerConfig, Tick, VoteReply, VoteRequest,
};
use tracing::debug;

use super::State;
use crate::context::Context;
use crate::error::Result;

/// Passive role: accepts entries from the leader and votes when asked.
#[derive(Debug, Default)]
pub struct Follower {
    election_deadline: Tick,
}

impl Follower {
    fn reject(ctx: &mut Context, to: &PeerConfig) -> Result<()> {
        let reply = AppendEntriesReply {
            term: ctx.term(),
            success: false,
            match_index: ctx.commit_index(),
        };
        ctx.node.send(to.id, reply)
    }
}

impl State for Follower {
    fn enter(&mut self, ctx: &mut Context) -> Result<()> {
        self.election_deadline = ctx.node.election_deadline();
        Ok(())
    }

    fn update(&mut self, ctx: &mut Context) -> Result<()> {
        // a server waiting to be added has no say in elections yet
        if ctx.joining {
            return Ok(());
        }
        if ctx.node.tick >= self.election_deadline {
            debug!(node = %ctx.id(), term = ctx.term(), "election timeout");
            ctx.transition(NodeState::Candidate);
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
        let log = &ctx.node.log;
        let free = log
            .voted_for()
            .map_or(true, |voted| voted == request.candidate_id);
        let up_to_date = request.last_log_term > log.last_term()
            || (request.last_log_term == log.last_term()
                && request.last_log_index >= log.last_index());
        let granted = request.term >= term && free && up_to_date;

        if granted {
            ctx.node
                .log
                .update_state(term, Some(request.candidate_id))?;
            self.election_deadline = ctx.node.election_deadline();
        }
        debug!(
            node = %ctx.id(),
            candidate = %request.candidate_id,
            term,
            granted,
            "vote request"
        );
        ctx.node.send(from.id, VoteReply { term, granted })?;
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
        if request.term < ctx.term() {
            Self::reject(ctx, from)?;
            return Ok(true);
        }

        ctx.node.leader = Some(from.clone());
        self.election_deadline = ctx.node.election_deadline();

        let prev = request.prev_log_index;
        if prev > 0 && ctx.node.log.get_term(prev) != request.prev_log_term {
            debug!(
                node = %ctx.id(),
                prev,
                expected = request.prev_log_term,
                found = ctx.node.log.get_term(prev),
                "log mismatch"
            );
            Self::reject(ctx, from)?;
            return Ok(true);
        }

        let log = &mut ctx.node.log;
        let mut index = prev;
        for entry in &request.entries {
            index += 1;
            if let Some(existing) = log.get_index(index) {
                if existing.term == entry.term() {
                    continue;
                }
                // conflicting suffix: drop it one entry at a time
                while log.len() >= index {
                    log.pop()?;
                }
            }
            log.push(entry)?;
        }

        let last_new = prev + request.entries.len() as u32;
        ctx.advance_to_commit(request.leader_commit.min(last_new))?;

        let reply = AppendEntriesReply {
            term: ctx.term(),
            success: true,
            match_index: last_new,
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
        let hint = ctx.node.leader.clone();
        ctx.node
            .send_add_server_reply(request.new_server.id, AddServerStatus::NotLeader, hint)?;
        Ok(true)
    }
}
