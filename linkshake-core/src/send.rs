//! Outbound send requests: one owned buffer per in-flight frame, released exactly once.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use crate::address::MacAddr;
use crate::wire::{self, FrameKind, SequenceCounters, HEADER_LEN};

/// Correlation id for one outbound frame. Monotonic per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SendId(u64);

impl SendId {
    pub fn from_raw(raw: u64) -> Self {
        SendId(raw)
    }

    pub fn as_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One in-flight send: destination plus the encoded frame.
#[derive(Debug)]
pub struct SendRequest {
    pub id: SendId,
    pub destination: MacAddr,
    pub buffer: Vec<u8>,
    /// Session tick at allocation.
    pub allocated_at: u64,
}

impl SendRequest {
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Owner of every buffer between allocation and release.
/// Completions carry only a destination, so requests are also queued per destination in send order.
#[derive(Debug, Default)]
pub struct PendingSends {
    next_id: u64,
    requests: HashMap<SendId, SendRequest>,
    by_destination: HashMap<MacAddr, VecDeque<SendId>>,
}

impl PendingSends {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a buffer of HEADER_LEN + payload, encode the frame into it and take ownership.
    /// `now` is the session tick, used to reclaim requests whose completion never arrives.
    pub fn allocate(
        &mut self,
        destination: MacAddr,
        counters: &mut SequenceCounters,
        payload: &[u8],
        now: u64,
    ) -> Result<SendId, SendError> {
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(HEADER_LEN + payload.len())
            .map_err(|_| SendError::OutOfMemory)?;
        self.requests
            .try_reserve(1)
            .map_err(|_| SendError::OutOfMemory)?;
        match self.by_destination.get_mut(&destination) {
            Some(queue) => queue.try_reserve(1).map_err(|_| SendError::OutOfMemory)?,
            None => {
                let mut queue = VecDeque::new();
                queue.try_reserve(1).map_err(|_| SendError::OutOfMemory)?;
                self.by_destination
                    .try_reserve(1)
                    .map_err(|_| SendError::OutOfMemory)?;
                self.by_destination.insert(destination, queue);
            }
        }
        let queue = self.by_destination.entry(destination).or_default();

        wire::encode_frame(
            FrameKind::for_destination(&destination),
            counters,
            payload,
            &mut buffer,
        );
        let id = SendId(self.next_id);
        self.next_id += 1;
        queue.push_back(id);
        self.requests.insert(
            id,
            SendRequest {
                id,
                destination,
                buffer,
                allocated_at: now,
            },
        );
        Ok(id)
    }

    /// Encoded frame for an in-flight request.
    pub fn frame(&self, id: SendId) -> Option<&[u8]> {
        self.requests.get(&id).map(|r| r.buffer.as_slice())
    }

    /// Release a request the transport never accepted. None if already released.
    pub fn release(&mut self, id: SendId) -> Option<SendRequest> {
        let request = self.requests.remove(&id)?;
        if let Some(queue) = self.by_destination.get_mut(&request.destination) {
            queue.retain(|q| *q != id);
            if queue.is_empty() {
                self.by_destination.remove(&request.destination);
            }
        }
        Some(request)
    }

    /// Release the oldest in-flight request to `destination` after its completion was observed.
    pub fn complete(&mut self, destination: &MacAddr) -> Option<SendRequest> {
        let queue = self.by_destination.get_mut(destination)?;
        let id = queue.pop_front();
        if queue.is_empty() {
            self.by_destination.remove(destination);
        }
        self.requests.remove(&id?)
    }

    /// Release every request allocated more than `max_age` ticks before `now`.
    /// Their completions were lost, e.g. dropped on a full event queue.
    pub fn reclaim_expired(&mut self, now: u64, max_age: u64) -> Vec<SendRequest> {
        let mut expired: Vec<SendId> = self
            .requests
            .values()
            .filter(|r| now.saturating_sub(r.allocated_at) > max_age)
            .map(|r| r.id)
            .collect();
        expired.sort();
        expired.into_iter().filter_map(|id| self.release(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("out of memory allocating send buffer")]
    OutOfMemory,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::decode_frame;

    const PEER: MacAddr = MacAddr::new([0x34, 0x85, 0x18, 0xb9, 0x1b, 0x9c]);

    #[test]
    fn allocate_sizes_buffer_exactly() {
        let mut pending = PendingSends::new();
        let mut counters = SequenceCounters::new();
        let id = pending.allocate(PEER, &mut counters, b"RTS\0", 0).unwrap();
        let frame = pending.frame(id).unwrap();
        assert_eq!(frame.len(), HEADER_LEN + 4);
        let decoded = decode_frame(frame).unwrap();
        assert_eq!(decoded.kind, FrameKind::Unicast);
        assert_eq!(decoded.payload, b"RTS\0");
    }

    #[test]
    fn broadcast_destination_encodes_broadcast_kind() {
        let mut pending = PendingSends::new();
        let mut counters = SequenceCounters::new();
        let id = pending
            .allocate(MacAddr::BROADCAST, &mut counters, b"add_me\0", 0)
            .unwrap();
        let decoded = decode_frame(pending.frame(id).unwrap()).unwrap();
        assert_eq!(decoded.kind, FrameKind::Broadcast);
        assert_eq!(counters.peek(FrameKind::Broadcast), 1);
        assert_eq!(counters.peek(FrameKind::Unicast), 0);
    }

    #[test]
    fn release_is_exactly_once() {
        let mut pending = PendingSends::new();
        let mut counters = SequenceCounters::new();
        let id = pending.allocate(PEER, &mut counters, b"CTS\0", 0).unwrap();
        assert!(pending.release(id).is_some());
        assert!(pending.release(id).is_none());
        assert!(pending.complete(&PEER).is_none());
        assert!(pending.is_empty());
    }

    #[test]
    fn completions_release_in_send_order() {
        let mut pending = PendingSends::new();
        let mut counters = SequenceCounters::new();
        let first = pending.allocate(PEER, &mut counters, b"RTS\0", 0).unwrap();
        let other = pending
            .allocate(MacAddr::BROADCAST, &mut counters, b"add_me\0", 0)
            .unwrap();
        let second = pending.allocate(PEER, &mut counters, b"ACK\0", 0).unwrap();
        assert_eq!(pending.len(), 3);

        assert_eq!(pending.complete(&PEER).map(|r| r.id), Some(first));
        assert_eq!(pending.complete(&PEER).map(|r| r.id), Some(second));
        assert!(pending.complete(&PEER).is_none());
        assert_eq!(pending.complete(&MacAddr::BROADCAST).map(|r| r.id), Some(other));
        assert!(pending.is_empty());
    }

    #[test]
    fn release_skips_over_in_completion_queue() {
        let mut pending = PendingSends::new();
        let mut counters = SequenceCounters::new();
        let rejected = pending.allocate(PEER, &mut counters, b"RTS\0", 0).unwrap();
        let accepted = pending.allocate(PEER, &mut counters, b"RTS\0", 0).unwrap();
        pending.release(rejected);
        assert_eq!(pending.complete(&PEER).map(|r| r.id), Some(accepted));
        assert!(pending.by_destination.is_empty());
    }

    #[test]
    fn lost_completions_are_reclaimed_by_age() {
        let mut pending = PendingSends::new();
        let mut counters = SequenceCounters::new();
        let lost = pending.allocate(PEER, &mut counters, b"CTS\0", 1).unwrap();
        let recent = pending.allocate(PEER, &mut counters, b"ACK\0", 4).unwrap();

        assert!(pending.reclaim_expired(4, 3).is_empty());
        let reclaimed: Vec<SendId> = pending.reclaim_expired(5, 3).iter().map(|r| r.id).collect();
        assert_eq!(reclaimed, vec![lost]);
        assert_eq!(pending.complete(&PEER).map(|r| r.id), Some(recent));
        assert!(pending.is_empty());
        assert!(pending.by_destination.is_empty());
    }
}
