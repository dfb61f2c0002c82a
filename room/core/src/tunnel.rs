//! Per-client tunnel multiplexing: each service a Player has opened gets a
//! bounded, lossy-on-overflow outbound queue of payload slots. Frames marked
//! with the client's tunnel-select nibble (`0xFX`) route here instead of
//! through the command interpreter.

use std::collections::VecDeque;

pub const MAX_QUEUED_SLOTS: usize = 32;
/// Cap on bytes buffered client→service between ticks.
pub const MAX_TO_SERVICE_BYTES: usize = 4096;

/// A single open tunnel to a backend service. `outbound` carries
/// service→client payload slots (one ring-buffer flush per tick);
/// `to_service` carries raw client→service bytes collected from `0xFX`
/// framed tunnel bytes, drained to the backend socket each tick.
pub struct Tunnel {
    pub service_id: u8,
    /// Set once the runner has connected the backend socket and sent the
    /// tunnel `LOGIN` frame. `START_SERVICE` only stages the tunnel; the
    /// runner does the actual connect on the next service pass.
    pub backend_online: bool,
    outbound: VecDeque<Vec<u8>>,
    to_service: VecDeque<u8>,
}

impl Tunnel {
    pub fn new(service_id: u8) -> Tunnel {
        Tunnel { service_id, backend_online: false, outbound: VecDeque::new(), to_service: VecDeque::new() }
    }

    /// Enqueues a payload bound for the client. Drops the oldest slot on
    /// overflow rather than blocking — tunnel queues are bounded and lossy,
    /// per the design note on bespoke ring buffers.
    pub fn push(&mut self, payload: Vec<u8>) {
        if self.outbound.len() >= MAX_QUEUED_SLOTS {
            self.outbound.pop_front();
        }
        self.outbound.push_back(payload);
    }

    /// Drains at most one slot, matching the per-tick "at most one ring-buffer
    /// slot per service tunnel" flush discipline (spec.md §4.3.2 step 4).
    pub fn drain_one(&mut self) -> Option<Vec<u8>> {
        self.outbound.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty()
    }

    /// Appends bytes arriving from the client (a `0xFX`-framed tunnel
    /// payload) to the queue bound for the backend. Oldest bytes are dropped
    /// on overflow — same lossy-on-overflow discipline as the client-bound
    /// side.
    pub fn queue_to_service(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if self.to_service.len() >= MAX_TO_SERVICE_BYTES {
                self.to_service.pop_front();
            }
            self.to_service.push_back(b);
        }
    }

    pub fn has_queued_to_service(&self) -> bool {
        !self.to_service.is_empty()
    }

    /// Drains everything queued for the backend, for a single tick's worth
    /// of outbound `DATA` frames.
    pub fn drain_to_service(&mut self) -> Vec<u8> {
        self.to_service.drain(..).collect()
    }
}

/// The suspension state for an operation that cannot complete within a
/// single tick (e.g. `GET_FILE_CHUNK`, which hands off to a worker thread).
/// The command interpreter checks this before resuming normal dispatch.
pub enum AsyncState {
    Idle,
    Awaiting { service_id: u8, opcode: u8, request: Vec<u8> },
    Completed { response: Vec<u8> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_drops_oldest_slot() {
        let mut tunnel = Tunnel::new(1);
        for i in 0..(MAX_QUEUED_SLOTS + 2) {
            tunnel.push(vec![i as u8]);
        }
        assert_eq!(tunnel.drain_one(), Some(vec![2u8]));
    }

    #[test]
    fn drains_in_fifo_order() {
        let mut tunnel = Tunnel::new(1);
        tunnel.push(vec![1]);
        tunnel.push(vec![2]);
        assert_eq!(tunnel.drain_one(), Some(vec![1]));
        assert_eq!(tunnel.drain_one(), Some(vec![2]));
        assert_eq!(tunnel.drain_one(), None);
    }

    #[test]
    fn to_service_queue_drains_whole_and_clears() {
        let mut tunnel = Tunnel::new(1);
        assert!(!tunnel.has_queued_to_service());
        tunnel.queue_to_service(b"abc");
        tunnel.queue_to_service(b"def");
        assert!(tunnel.has_queued_to_service());
        assert_eq!(tunnel.drain_to_service(), b"abcdef".to_vec());
        assert!(!tunnel.has_queued_to_service());
    }

    #[test]
    fn to_service_queue_drops_oldest_on_overflow() {
        let mut tunnel = Tunnel::new(1);
        for _ in 0..(MAX_TO_SERVICE_BYTES + 3) {
            tunnel.queue_to_service(&[0xAA]);
        }
        tunnel.queue_to_service(&[0xBB]);
        let drained = tunnel.drain_to_service();
        assert_eq!(drained.len(), MAX_TO_SERVICE_BYTES);
        assert_eq!(*drained.last().unwrap(), 0xBB);
    }
}
