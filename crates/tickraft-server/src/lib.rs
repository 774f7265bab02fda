//! # tickraft-server
//!
//! why: run one raft participant deterministically, advancing only when the
//! caller hands it a tick
//! relations: builds on tickraft-core (messages, tracker, scheduler) and
//! tickraft-storage (durable log)
//! what: Server tick engine, Follower/Candidate/Leader roles, shared
//! Context, Transport trait with an in-memory network, StateMachine hook

pub mod context;
pub mod error;
pub mod memory;
pub mod server;
mod state;
pub mod state_machine;
pub mod transport;

pub use context::Context;
pub use error::{Result, ServerError};
pub use memory::MemoryNetwork;
pub use server::{PeerStatus, Server, ServerStatus};
pub use state::ServerJoin;
pub use state_machine::{NoopStateMachine, StateMachine};
pub use transport::{Transport, TransportError};
