//! # state
//!
//! why: each role reacts to the same five rpcs differently; swapping a whole
//! role object on transition keeps those rules apart
//! relations: roles operate on the shared Context; Server owns the current
//! Role and applies the transitions roles request
//! what: State trait, Role tagged union, Stopped placeholder role

mod candidate;
mod follower;
mod leader;

pub use candidate::Candidate;
pub use follower::Follower;
pub use leader::{Leader, ServerJoin};

use tickraft_core::{
    AddServerRequest, AppendEntriesReply, AppendEntriesRequest, NodeState, PeerConfig, VoteReply,
    VoteRequest,
};

use crate::context::Context;
use crate::error::Result;

/// Behaviour of one role.
///
/// Handlers return `true` when the message was consumed. `false` means the
/// role asked for a transition (usually a step down) and the message must be
/// handed to the next role.
pub trait State {
    fn enter(&mut self, _ctx: &mut Context) -> Result<()> {
        Ok(())
    }

    fn exit(&mut self, _ctx: &mut Context) -> Result<()> {
        Ok(())
    }

    /// Per-tick behaviour.
    fn update(&mut self, ctx: &mut Context) -> Result<()>;

    fn vote_request(
        &mut self,
        ctx: &mut Context,
        from: &PeerConfig,
        request: &VoteRequest,
    ) -> Result<bool>;

    fn vote_reply(&mut self, ctx: &mut Context, from: &PeerConfig, reply: &VoteReply)
        -> Result<bool>;

    fn append_entries_request(
        &mut self,
        ctx: &mut Context,
        from: &PeerConfig,
        request: &AppendEntriesRequest,
    ) -> Result<bool>;

    fn append_entries_reply(
        &mut self,
        ctx: &mut Context,
        from: &PeerConfig,
        reply: &AppendEntriesReply,
    ) -> Result<bool>;

    fn add_server_request(
        &mut self,
        ctx: &mut Context,
        from: &PeerConfig,
        request: &AddServerRequest,
    ) -> Result<bool>;
}

/// Before initialization: handles nothing.
#[derive(Debug, Default)]
pub struct Stopped;

impl State for Stopped {
    fn update(&mut self, _ctx: &mut Context) -> Result<()> {
        Ok(())
    }

    fn vote_request(&mut self, _: &mut Context, _: &PeerConfig, _: &VoteRequest) -> Result<bool> {
        Ok(true)
    }

    fn vote_reply(&mut self, _: &mut Context, _: &PeerConfig, _: &VoteReply) -> Result<bool> {
        Ok(true)
    }

    fn append_entries_request(
        &mut self,
        _: &mut Context,
        _: &PeerConfig,
        _: &AppendEntriesRequest,
    ) -> Result<bool> {
        Ok(true)
    }

    fn append_entries_reply(
        &mut self,
        _: &mut Context,
        _: &PeerConfig,
        _: &AppendEntriesReply,
    ) -> Result<bool> {
        Ok(true)
    }

    fn add_server_request(
        &mut self,
        _: &mut Context,
        _: &PeerConfig,
        _: &AddServerRequest,
    ) -> Result<bool> {
        Ok(true)
    }
}

/// The role a server currently plays, swapped wholesale on transition.
#[derive(Debug)]
pub enum Role {
    Stopped(Stopped),
    Follower(Follower),
    Candidate(Candidate),
    Leader(Leader),
}

impl Role {
    pub fn new(kind: NodeState) -> Self {
        match kind {
            NodeState::Stopped => Self::Stopped(Stopped),
            NodeState::Follower => Self::Follower(Follower::default()),
            NodeState::Candidate => Self::Candidate(Candidate::default()),
            NodeState::Leader => Self::Leader(Leader::default()),
        }
    }

    pub fn kind(&self) -> NodeState {
        match self {
            Self::Stopped(_) => NodeState::Stopped,
            Self::Follower(_) => NodeState::Follower,
            Self::Candidate(_) => NodeState::Candidate,
            Self::Leader(_) => NodeState::Leader,
        }
    }

    pub fn as_state(&mut self) -> &mut dyn State {
        match self {
            Self::Stopped(state) => state,
            Self::Follower(state) => state,
            Self::Candidate(state) => state,
            Self::Leader(state) => state,
        }
    }

    pub fn leader(&self) -> Option<&Leader> {
        match self {
            Self::Leader(leader) => Some(leader),
            _ => None,
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Self::Stopped(Stopped)
    }
}
