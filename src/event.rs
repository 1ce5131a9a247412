//! Events: activities that carry a payload from one component to another.
//!
//! The reference system keeps `delivery_info` as a `uintptr_t` that is
//! reinterpreted as either a handler pointer (local delivery) or a peer
//! Link pointer (cross-boundary delivery, resolved after deserializing on
//! the far side). That is modeled here as the tagged [`DeliveryInfo`]
//! enum instead -- no raw pointers anywhere.
//!
//! The payload itself is kept as an opaque `Vec<u8>`. Whatever component
//! layer sits on top of this crate (out of scope per its charter, see
//! spec §1) is responsible for encoding/decoding it; the sync core only
//! ever copies or forwards the bytes, exactly as `SyncQueue::getData()`
//! does in the reference implementation.

use serde::{Deserialize, Serialize};

use crate::activity::{ActivityHeader, Priority};
use crate::link::LinkId;

/// Identifies a locally-registered delivery handler. Opaque to the sync
/// core; assigned and interpreted entirely by the component layer above
/// it.
pub type HandlerId = u32;

/// Where an event goes once it reaches the front of a TimeVortex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryInfo {
    /// Deliver directly to a handler on this thread.
    Local(HandlerId),
    /// Forward across a thread or rank boundary via this link.
    Remote(LinkId),
}

/// An event in flight: a header for ordering, a destination, and an
/// opaque payload.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub header: ActivityHeader,
    pub delivery_info: DeliveryInfo,
    pub payload: Vec<u8>,
}

impl EventEnvelope {
    pub fn new(delivery_time: u64, delivery_info: DeliveryInfo, payload: Vec<u8>) -> Self {
        Self {
            header: ActivityHeader::new(delivery_time, Priority::Event, 0),
            delivery_info,
            payload,
        }
    }

    pub fn link_id(&self) -> Option<LinkId> {
        match self.delivery_info {
            DeliveryInfo::Remote(id) => Some(id),
            DeliveryInfo::Local(_) => None,
        }
    }
}

/// The over-the-wire shape of an [`EventEnvelope`] crossing a thread or
/// rank boundary. `delivery_info` is never serialized as `Local`: a
/// locally-addressed event never leaves its thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEvent {
    pub delivery_time: u64,
    pub order_tag: u32,
    pub link_id: u32,
    pub payload: Vec<u8>,
}

impl WireEvent {
    pub fn from_envelope(event: &EventEnvelope) -> anyhow::Result<Self> {
        let link_id = match event.delivery_info {
            DeliveryInfo::Remote(id) => id.0,
            DeliveryInfo::Local(_) => {
                anyhow::bail!("cannot put a locally-addressed event on the wire")
            }
        };
        Ok(Self {
            delivery_time: event.header.delivery_time,
            order_tag: event.header.order_tag(),
            link_id,
            payload: event.payload.clone(),
        })
    }

    pub fn into_envelope(self) -> EventEnvelope {
        let mut header = ActivityHeader::new(self.delivery_time, Priority::Event, self.order_tag);
        header.set_order_tag(self.order_tag);
        EventEnvelope {
            header,
            delivery_info: DeliveryInfo::Remote(LinkId(self.link_id)),
            payload: self.payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_roundtrip_preserves_ordering_key_and_payload() {
        let envelope = EventEnvelope::new(42, DeliveryInfo::Remote(LinkId(7)), vec![1, 2, 3]);
        let wire = WireEvent::from_envelope(&envelope).unwrap();
        let encoded = bincode::serialize(&wire).unwrap();
        let decoded: WireEvent = bincode::deserialize(&encoded).unwrap();
        let roundtripped = decoded.into_envelope();
        assert_eq!(roundtripped.header.delivery_time, envelope.header.delivery_time);
        assert_eq!(roundtripped.header.order_tag(), envelope.header.order_tag());
        assert_eq!(roundtripped.payload, envelope.payload);
        assert_eq!(roundtripped.link_id(), Some(LinkId(7)));
    }

    #[test]
    fn local_events_refuse_wire_encoding() {
        let envelope = EventEnvelope::new(1, DeliveryInfo::Local(3), vec![]);
        assert!(WireEvent::from_envelope(&envelope).is_err());
    }
}
