//! # node
//!
//! why: name the participants of a cluster and the roles they can hold
//! relations: PeerConfig is persisted by tickraft-storage, NodeState drives
//! role swapping in tickraft-server
//! what: NodeId, PeerConfig, NodeState

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// Numeric identity of a server, stable across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub i32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl From<i32> for NodeId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

/// A cluster member: its id plus the network address it listens on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerConfig {
    pub id: NodeId,
    pub addr: SocketAddr,
}

impl PeerConfig {
    pub fn new(id: impl Into<NodeId>, addr: SocketAddr) -> Self {
        Self { id: id.into(), addr }
    }

    /// Loopback member listening on `7000 + id`, handy for local clusters.
    pub fn local(id: i32) -> Self {
        let port = u16::try_from(7000 + id).unwrap_or(7000);
        Self::new(id, SocketAddr::from(([127, 0, 0, 1], port)))
    }
}

impl fmt::Display for PeerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.addr)
    }
}

/// The role a server currently plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum NodeState {
    /// Not yet initialized; handles no rpcs
    #[default]
    Stopped,
    /// Passive state - listens for heartbeats, votes when asked
    Follower,
    /// Transitional state - requesting votes to become leader
    Candidate,
    /// Active state - manages log replication, sends heartbeats
    Leader,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Follower => "follower",
            Self::Candidate => "candidate",
            Self::Leader => "leader",
        };
        f.write_str(name)
    }
}
