//! The intermediate buffer a synchronizer drains into and ships out as
//! one contiguous block.
//!
//! Mirrors `sst/core/syncQueue.h`: activities accumulate in a plain
//! vector as they're queued for the far side of a boundary, and
//! `get_data` serializes the whole batch, header first, as the unit that
//! crosses that boundary. `Header` matches the reference struct's three
//! fields; the wire encoding is bincode instead of the raw memcpy the
//! reference implementation performs, since targets here are not
//! guaranteed to share endianness or pointer width.

use serde::{Deserialize, Serialize};

use crate::event::{EventEnvelope, WireEvent};

/// Prefixed onto every batch `SyncQueue::get_data` produces.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Header {
    pub mode: u32,
    pub count: u32,
    pub buffer_size: u32,
}

/// Accumulates outbound events for one destination until the owning
/// synchronizer is ready to ship them as a batch.
#[derive(Debug, Default)]
pub struct SyncQueue {
    pending: Vec<EventEnvelope>,
    mode: u32,
}

impl SyncQueue {
    pub fn new(mode: u32) -> Self {
        Self {
            pending: Vec::new(),
            mode,
        }
    }

    pub fn insert(&mut self, event: EventEnvelope) {
        self.pending.push(event);
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Serialize the pending batch as `Header` followed by bincode-
    /// encoded [`WireEvent`]s, and clear the queue. Returns an error if
    /// any pending event is addressed locally (it should never have been
    /// queued here in the first place).
    pub fn get_data(&mut self) -> anyhow::Result<Vec<u8>> {
        let wire_events = self
            .pending
            .iter()
            .map(WireEvent::from_envelope)
            .collect::<anyhow::Result<Vec<_>>>()?;
        let body = bincode::serialize(&wire_events)?;
        let header = Header {
            mode: self.mode,
            count: wire_events.len() as u32,
            buffer_size: body.len() as u32,
        };
        let mut out = bincode::serialize(&header)?;
        out.extend_from_slice(&body);
        self.pending.clear();
        Ok(out)
    }

    /// Inverse of `get_data`: split a received buffer back into its
    /// header and the batch of events it carries.
    pub fn decode(buf: &[u8]) -> anyhow::Result<(Header, Vec<EventEnvelope>)> {
        let header: Header = bincode::deserialize(buf)?;
        let header_size = bincode::serialized_size(&header)? as usize;
        let body = &buf[header_size..header_size + header.buffer_size as usize];
        let wire_events: Vec<WireEvent> = bincode::deserialize(body)?;
        let events = wire_events.into_iter().map(WireEvent::into_envelope).collect();
        Ok((header, events))
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Take the pending events without going through the wire encoding.
    /// Used by [`crate::thread_sync::ThreadSync`], which forwards events
    /// to in-process links directly instead of shipping bytes.
    pub fn drain(&mut self) -> Vec<EventEnvelope> {
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::DeliveryInfo;
    use crate::link::LinkId;

    #[test]
    fn roundtrips_a_batch_through_get_data_and_decode() {
        let mut queue = SyncQueue::new(1);
        queue.insert(EventEnvelope::new(10, DeliveryInfo::Remote(LinkId(1)), vec![1, 2]));
        queue.insert(EventEnvelope::new(20, DeliveryInfo::Remote(LinkId(2)), vec![3]));
        assert_eq!(queue.len(), 2);

        let bytes = queue.get_data().unwrap();
        assert!(queue.is_empty());

        let (header, events) = SyncQueue::decode(&bytes).unwrap();
        assert_eq!(header.mode, 1);
        assert_eq!(header.count, 2);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].header.delivery_time, 10);
        assert_eq!(events[1].payload, vec![3]);
    }

    #[test]
    fn empty_queue_still_produces_a_valid_header() {
        let mut queue = SyncQueue::new(0);
        let bytes = queue.get_data().unwrap();
        let (header, events) = SyncQueue::decode(&bytes).unwrap();
        assert_eq!(header.count, 0);
        assert!(events.is_empty());
    }
}
