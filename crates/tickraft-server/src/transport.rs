//! # transport
//!
//! why: the engine never touches sockets; whatever carries envelopes between
//! servers plugs in behind one small trait
//! relations: owned by the server context, implemented by MemoryNetwork
//! what: Transport trait, TransportError

use thiserror::Error;
use tickraft_core::{Envelope, NodeId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport for {0} is shut down")]
    Closed(NodeId),

    #[error("transport state is poisoned")]
    Poisoned,
}

/// Delivers envelopes between servers.
///
/// Delivery is datagram-like: a message may be dropped or delayed and the
/// protocol's own retries cover it.
pub trait Transport {
    /// Queue `envelope` for `to`. The sender is `envelope.from`.
    fn send(&mut self, to: NodeId, envelope: Envelope) -> Result<(), TransportError>;

    /// Every envelope currently deliverable to `id`. Never blocks.
    fn receive(&mut self, id: NodeId) -> Result<Vec<Envelope>, TransportError>;

    /// Stop sending and receiving on behalf of `id`.
    fn shutdown(&mut self, id: NodeId);
}
