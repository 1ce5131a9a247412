//! Links: the static, bidirectional wiring between two points that can
//! exchange events, and the latency that makes lookahead possible.
//!
//! Mirrors `sst/core/link.h`: a `Link` is owned by the sender side and
//! knows its latency and its destination's reach (same thread, another
//! thread in this rank, or another rank entirely). Unlike the reference
//! implementation, destination resolution is not a runtime pointer-chase
//! through a `ConfigLink` table -- it is decided once, during
//! `finalize_configuration`, and baked into the `Link` as a
//! [`Destination`].

use std::collections::HashMap;

use crate::error::{Result, SyncError};
use crate::event::{DeliveryInfo, EventEnvelope, HandlerId};
use crate::time::{TimeConverter, TimeLord};

/// Identifies a [`Link`] within a process. Stable across a run; used as
/// the order tag for cross-boundary events so that ties between two
/// links delivering at the same time resolve the same way every time
/// (spec §4.1/§9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkId(pub u32);

/// Where a [`Link`] delivers to, decided once at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// Same thread: handed straight to a local handler, no queue involved.
    Local(HandlerId),
    /// Another thread in this rank: goes through that thread's inbound
    /// [`crate::sync_queue::SyncQueue`].
    Thread { rank_local_thread: u32, handler: HandlerId },
    /// Another rank: goes through [`crate::rank_sync::RankSync`].
    Rank { rank: u32, handler: HandlerId },
}

/// One endpoint of a point-to-point connection between components.
#[derive(Debug, Clone)]
pub struct Link {
    pub id: LinkId,
    latency: u64,
    time_base: TimeConverter,
    destination: Option<Destination>,
}

impl Link {
    pub fn new(id: LinkId, time_base: TimeConverter) -> Self {
        Self {
            id,
            latency: 0,
            time_base,
            destination: None,
        }
    }

    /// Set the additional latency, in this link's own timebase units,
    /// applied to every event sent down it.
    pub fn set_latency(&mut self, latency_units: u64) {
        self.latency = latency_units;
    }

    /// Latency converted to core cycles -- what lookahead and
    /// min-partition computations are built out of (spec §2/§4).
    pub fn latency_in_core_cycles(&self) -> u64 {
        self.time_base.convert_to_core_time(self.latency)
    }

    pub fn destination(&self) -> Option<Destination> {
        self.destination
    }

    /// The handler id this link ultimately delivers to, regardless of
    /// whether that handler sits on this thread, another thread on this
    /// rank, or another rank -- used by [`crate::thread_sync::ThreadSync`]
    /// and the rank-sync receive path to resolve an event arriving from
    /// across a boundary into a local delivery, without re-deriving a new
    /// delivery time the way the first-hop [`Link::send`] does.
    pub fn local_handler(&self) -> Option<HandlerId> {
        match self.destination? {
            Destination::Local(handler) => Some(handler),
            Destination::Thread { handler, .. } => Some(handler),
            Destination::Rank { handler, .. } => Some(handler),
        }
    }

    /// Finalize where this link delivers. Cross-boundary destinations
    /// (`Thread`/`Rank`) with zero latency are rejected: a zero-latency
    /// cross-boundary link would let an activity time-travel behind the
    /// window the synchronizer already promised was safe to skip to.
    pub fn finalize_configuration(&mut self, destination: Destination) -> Result<()> {
        let crosses_boundary = !matches!(destination, Destination::Local(_));
        if crosses_boundary && self.latency_in_core_cycles() == 0 {
            return Err(SyncError::Configuration(format!(
                "link {:?} crosses a thread/rank boundary with zero latency",
                self.id
            )));
        }
        self.destination = Some(destination);
        Ok(())
    }

    /// Build the envelope that `delay` core cycles from `current_time`
    /// this link's destination should receive.
    pub fn send(&self, current_time: u64, delay: u64, payload: Vec<u8>) -> Result<EventEnvelope> {
        let destination = self.destination.ok_or_else(|| {
            SyncError::Configuration(format!("link {:?} sent on before configuration", self.id))
        })?;
        let total_delay = delay + self.latency_in_core_cycles();
        let delivery_time = current_time + total_delay;
        let delivery_info = match destination {
            Destination::Local(handler) => DeliveryInfo::Local(handler),
            Destination::Thread { .. } | Destination::Rank { .. } => DeliveryInfo::Remote(self.id),
        };
        let mut event = EventEnvelope::new(delivery_time, delivery_info, payload);
        event.header.set_order_tag(self.id.0);
        Ok(event)
    }
}

/// Process-wide registry of links, keyed by [`LinkId`]. Built during
/// wire-up and treated as read-only once the run starts, same discipline
/// as [`crate::time::TimeLord`].
#[derive(Debug, Default)]
pub struct LinkTable {
    links: HashMap<LinkId, Link>,
}

impl LinkTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, link: Link) {
        self.links.insert(link.id, link);
    }

    pub fn get(&self, id: LinkId) -> Option<&Link> {
        self.links.get(&id)
    }

    pub fn get_mut(&mut self, id: LinkId) -> Option<&mut Link> {
        self.links.get_mut(&id)
    }

    /// The lookahead this table guarantees: the minimum latency across
    /// every link that crosses a thread or rank boundary (spec §2/§4.3).
    /// `None` if there are no cross-boundary links at all.
    pub fn min_cross_boundary_latency(&self) -> Option<u64> {
        self.links
            .values()
            .filter(|link| !matches!(link.destination, Some(Destination::Local(_)) | None))
            .map(Link::latency_in_core_cycles)
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn converter(factor: u64) -> TimeConverter {
        TimeLord::get_time_converter(factor)
    }

    #[test]
    fn zero_latency_cross_boundary_link_is_rejected() {
        let mut link = Link::new(LinkId(1), converter(1));
        link.set_latency(0);
        let result = link.finalize_configuration(Destination::Rank { rank: 1, handler: 0 });
        assert!(result.is_err());
    }

    #[test]
    fn local_link_may_have_zero_latency() {
        let mut link = Link::new(LinkId(2), converter(1));
        link.set_latency(0);
        assert!(link.finalize_configuration(Destination::Local(9)).is_ok());
    }

    #[test]
    fn send_adds_latency_and_stamps_order_tag() {
        let mut link = Link::new(LinkId(3), converter(10));
        link.set_latency(5);
        link.finalize_configuration(Destination::Rank { rank: 2, handler: 0 })
            .unwrap();
        let event = link.send(100, 0, vec![]).unwrap();
        assert_eq!(event.header.delivery_time, 150);
        assert_eq!(event.header.order_tag(), 3);
        assert_eq!(event.link_id(), Some(LinkId(3)));
    }

    #[test]
    fn min_cross_boundary_latency_ignores_local_links() {
        let mut table = LinkTable::new();
        let mut local = Link::new(LinkId(1), converter(1));
        local.set_latency(0);
        local.finalize_configuration(Destination::Local(0)).unwrap();
        table.register(local);

        let mut remote = Link::new(LinkId(2), converter(1));
        remote.set_latency(7);
        remote
            .finalize_configuration(Destination::Rank { rank: 1, handler: 0 })
            .unwrap();
        table.register(remote);

        assert_eq!(table.min_cross_boundary_latency(), Some(7));
    }
}
