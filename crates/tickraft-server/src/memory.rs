//! # memory
//!
//! why: clusters in tests run inside one process with deterministic delivery
//! relations: implements Transport; cloned once per server sharing one state
//! what: MemoryNetwork with per-node queues, transit delay, partitions

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tickraft_core::{Envelope, NodeId};
use tracing::trace;

use crate::transport::{Transport, TransportError};

#[derive(Debug)]
struct InFlight {
    envelope: Envelope,
    /// Receive calls by the destination still to wait out
    remaining: u64,
}

#[derive(Debug, Default)]
struct NetworkState {
    queues: HashMap<NodeId, VecDeque<InFlight>>,
    isolated: HashSet<NodeId>,
    shut_down: HashSet<NodeId>,
    delay: u64,
    sent: u64,
    dropped: u64,
}

/// In-process network. Clones are handles onto the same queues.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages wait `delay` receive calls at the destination before delivery.
    pub fn with_delay(delay: u64) -> Self {
        let network = Self::new();
        network.set_delay(delay);
        network
    }

    pub fn set_delay(&self, delay: u64) {
        if let Ok(mut state) = self.lock() {
            state.delay = delay;
        }
    }

    /// Drop everything to or from `id` until healed, including messages
    /// already queued for it.
    pub fn isolate(&self, id: NodeId) {
        if let Ok(mut state) = self.lock() {
            state.isolated.insert(id);
            let queued = state.queues.remove(&id).map_or(0, |q| q.len() as u64);
            state.dropped += queued;
        }
    }

    pub fn heal(&self, id: NodeId) {
        if let Ok(mut state) = self.lock() {
            state.isolated.remove(&id);
        }
    }

    pub fn heal_all(&self) {
        if let Ok(mut state) = self.lock() {
            state.isolated.clear();
        }
    }

    pub fn is_isolated(&self, id: NodeId) -> bool {
        self.lock().map_or(false, |state| state.isolated.contains(&id))
    }

    /// Messages accepted for delivery so far.
    pub fn sent(&self) -> u64 {
        self.lock().map_or(0, |state| state.sent)
    }

    pub fn dropped(&self) -> u64 {
        self.lock().map_or(0, |state| state.dropped)
    }

    /// Messages queued for `id` and not yet received.
    pub fn in_flight(&self, id: NodeId) -> usize {
        self.lock()
            .map_or(0, |state| state.queues.get(&id).map_or(0, VecDeque::len))
    }

    fn lock(&self) -> Result<MutexGuard<'_, NetworkState>, TransportError> {
        self.state.lock().map_err(|_| TransportError::Poisoned)
    }
}

impl Transport for MemoryNetwork {
    fn send(&mut self, to: NodeId, envelope: Envelope) -> Result<(), TransportError> {
        let from = envelope.from.id;
        let mut state = self.lock()?;
        if state.shut_down.contains(&from) {
            return Err(TransportError::Closed(from));
        }
        if state.shut_down.contains(&to)
            || state.isolated.contains(&to)
            || state.isolated.contains(&from)
        {
            state.dropped += 1;
            trace!(%from, %to, message = envelope.message.name(), "dropped");
            return Ok(());
        }

        let remaining = state.delay;
        state.sent += 1;
        state
            .queues
            .entry(to)
            .or_default()
            .push_back(InFlight { envelope, remaining });
        Ok(())
    }

    fn receive(&mut self, id: NodeId) -> Result<Vec<Envelope>, TransportError> {
        let mut state = self.lock()?;
        if state.shut_down.contains(&id) {
            return Err(TransportError::Closed(id));
        }
        let Some(queue) = state.queues.get_mut(&id) else {
            return Ok(Vec::new());
        };

        let mut ready = Vec::new();
        let mut waiting = VecDeque::with_capacity(queue.len());
        for mut message in queue.drain(..) {
            if message.remaining == 0 {
                ready.push(message.envelope);
            } else {
                message.remaining -= 1;
                waiting.push_back(message);
            }
        }
        *queue = waiting;
        Ok(ready)
    }

    fn shutdown(&mut self, id: NodeId) {
        if let Ok(mut state) = self.lock() {
            state.shut_down.insert(id);
            let queued = state.queues.remove(&id).map_or(0, |q| q.len() as u64);
            state.dropped += queued;
        }
    }
}
