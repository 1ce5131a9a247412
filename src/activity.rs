//! The base ordering substrate shared by everything a [`crate::time_vortex::TimeVortex`]
//! can hold.
//!
//! The reference implementation models `Activity` as a class hierarchy
//! (`Activity` -> `Event` / `Action` -> concrete subclasses) with a virtual
//! `execute()`. The set of things that ever get scheduled into a
//! TimeVortex by this crate is closed, so it is represented here as a
//! sealed enum instead (see DESIGN.md) -- ordering is derived once on the
//! shared header, and the per-thread run loop matches on the variant
//! rather than calling a virtual method.

use std::cmp::Ordering;

use crate::event::EventEnvelope;

/// Simulated time, in cycles since epoch.
pub type SimTime = u64;

/// Monotonically assigned insertion sequence, used as the final ordering
/// tie-break.
pub type QueueOrder = u64;

/// Fixed priority classes, in increasing numeric (= increasing delivery
/// precedence for ties) order. Matches the priority bands used by the
/// system this crate's synchronization core is modeled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum Priority {
    ThreadSync = 20,
    Sync = 25,
    StopAction = 30,
    Clock = 40,
    Event = 50,
    Barrier = 75,
    OneShot = 80,
    StatisticsClock = 85,
    FinalEvent = 98,
    Exit = 99,
}

/// The `(delivery_time, priority_order, queue_order)` ordering key shared
/// by every Activity. `priority_order` packs the priority class into the
/// high 32 bits and an order tag (a link tag for cross-boundary events,
/// 0 otherwise) into the low 32 bits, exactly as in the source system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityHeader {
    pub delivery_time: SimTime,
    priority_order: u64,
    queue_order: QueueOrder,
}

impl ActivityHeader {
    pub fn new(delivery_time: SimTime, priority: Priority, order_tag: u32) -> Self {
        Self {
            delivery_time,
            priority_order: ((priority as u64) << 32) | order_tag as u64,
            queue_order: 0,
        }
    }

    pub fn priority_order(&self) -> u64 {
        self.priority_order
    }

    pub fn order_tag(&self) -> u32 {
        (self.priority_order & 0xFFFF_FFFF) as u32
    }

    /// Used by `Link::send` to stamp the destination link's tag onto a
    /// cross-boundary event so ordering is stable across the boundary.
    pub fn set_order_tag(&mut self, tag: u32) {
        self.priority_order = (self.priority_order & 0xFFFF_FFFF_0000_0000) | tag as u64;
    }

    pub fn queue_order(&self) -> QueueOrder {
        self.queue_order
    }

    pub(crate) fn set_queue_order(&mut self, order: QueueOrder) {
        self.queue_order = order;
    }

    fn sort_key(&self) -> (SimTime, u64, QueueOrder) {
        (self.delivery_time, self.priority_order, self.queue_order)
    }
}

impl PartialOrd for ActivityHeader {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ActivityHeader {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

/// Sentinel inserted at TimeVortex construction; firing it means the
/// vortex ran dry and the thread's main loop should terminate cleanly.
#[derive(Debug, Clone)]
pub struct StopAction {
    pub header: ActivityHeader,
    pub reason: &'static str,
}

impl StopAction {
    /// The sentinel every `TimeVortex` seeds itself with (spec §4.1/§4.7):
    /// ordered behind every real activity by carrying the maximum possible
    /// delivery time, so it only ever surfaces once nothing real is left.
    pub fn queue_empty() -> Self {
        Self {
            header: ActivityHeader::new(SimTime::MAX, Priority::StopAction, 0),
            reason: "event queue empty",
        }
    }
}

/// A tick placed into the vortex to wake the owning thread's
/// [`crate::sync_manager::SyncManager`].
#[derive(Debug, Clone, Copy)]
pub struct SyncManagerTick {
    pub header: ActivityHeader,
}

/// The closed set of things a TimeVortex ever holds.
#[derive(Debug, Clone)]
pub enum Activity {
    StopAction(StopAction),
    SyncManagerTick(SyncManagerTick),
    Event(EventEnvelope),
}

impl Activity {
    pub fn header(&self) -> &ActivityHeader {
        match self {
            Activity::StopAction(a) => &a.header,
            Activity::SyncManagerTick(a) => &a.header,
            Activity::Event(e) => &e.header,
        }
    }

    pub(crate) fn header_mut(&mut self) -> &mut ActivityHeader {
        match self {
            Activity::StopAction(a) => &mut a.header,
            Activity::SyncManagerTick(a) => &mut a.header,
            Activity::Event(e) => &mut e.header,
        }
    }

    pub fn delivery_time(&self) -> SimTime {
        self.header().delivery_time
    }
}

impl PartialEq for Activity {
    fn eq(&self, other: &Self) -> bool {
        self.header() == other.header()
    }
}
impl Eq for Activity {}

impl PartialOrd for Activity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Activity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.header().cmp(other.header())
    }
}
