//! The per-thread ordered activity queue.
//!
//! Mirrors `sst/core/timeVortex.h`: a priority queue ordered by
//! `(delivery_time, priority_order, queue_order)`, backed here by a
//! binary heap instead of the reference's boost intrusive containers.
//! `insert` stamps each activity with a fresh, monotonically increasing
//! `queue_order` so insertion order breaks ties deterministically, and
//! `pop` enforces the invariant that delivery time never goes backwards.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::activity::{Activity, QueueOrder, SimTime, StopAction};
use crate::error::{Result, SyncError};
use crate::link::LinkId;

/// Min-ordered wrapper: `BinaryHeap` is a max-heap, and activities order
/// earliest-first, so every entry is held behind `Reverse`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct HeapEntry(Activity);

pub struct TimeVortex {
    heap: BinaryHeap<Reverse<HeapEntry>>,
    next_queue_order: QueueOrder,
    last_popped_time: Option<SimTime>,
    max_depth: usize,
}

impl TimeVortex {
    /// A fresh vortex already holds one thing: the `StopAction` sentinel
    /// (spec §4.1/§4.7), so `pop()` never silently returns `None` while
    /// real activities remain and instead fires the sentinel once they're
    /// exhausted, ending the run with an "event queue empty" diagnostic.
    pub fn new() -> Self {
        let mut vortex = Self {
            heap: BinaryHeap::new(),
            next_queue_order: 0,
            last_popped_time: None,
            max_depth: 0,
        };
        vortex.insert(Activity::StopAction(StopAction::queue_empty()));
        vortex
    }

    /// Insert `activity`, assigning it the next queue-order tie-break.
    pub fn insert(&mut self, mut activity: Activity) {
        activity.header_mut().set_queue_order(self.next_queue_order);
        self.next_queue_order += 1;
        self.heap.push(Reverse(HeapEntry(activity)));
        self.max_depth = self.max_depth.max(self.len());
    }

    /// Remove and return the earliest-ordered activity, checking the
    /// monotonic delivery-time invariant as it goes (spec §4.1/§7/§8).
    pub fn pop(&mut self) -> Result<Option<Activity>> {
        let Some(Reverse(HeapEntry(activity))) = self.heap.pop() else {
            return Ok(None);
        };
        let popped_time = activity.delivery_time();
        if let Some(last) = self.last_popped_time {
            if popped_time < last {
                let link = match &activity {
                    Activity::Event(event) => event.link_id(),
                    _ => None,
                };
                return Err(SyncError::Invariant {
                    popped: popped_time,
                    last,
                    link,
                });
            }
        }
        self.last_popped_time = Some(popped_time);
        Ok(Some(activity))
    }

    /// Peek at the next activity's delivery time without removing it.
    pub fn front(&self) -> Option<SimTime> {
        self.heap.peek().map(|Reverse(HeapEntry(a))| a.delivery_time())
    }

    /// Whether any *real* activity is still pending; the built-in
    /// `StopAction` sentinel itself never counts.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of real (non-sentinel) activities still pending.
    pub fn len(&self) -> usize {
        self.heap.len().saturating_sub(1)
    }

    /// High-water mark of queue depth, for the diagnostics the reference
    /// `TimeVortex::getMaxDepth()` exposes.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }
}

impl Default for TimeVortex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{ActivityHeader, Priority, StopAction};
    use crate::event::{DeliveryInfo, EventEnvelope};
    use proptest::prelude::*;

    fn stop(time: SimTime) -> Activity {
        Activity::StopAction(StopAction {
            header: ActivityHeader::new(time, Priority::Exit, 0),
            reason: "test",
        })
    }

    fn event(time: SimTime, link: u32) -> Activity {
        Activity::Event(EventEnvelope::new(time, DeliveryInfo::Remote(LinkId(link)), vec![]))
    }

    #[test]
    fn fresh_vortex_pops_the_seeded_stop_action_once_otherwise_empty() {
        let mut vortex = TimeVortex::new();
        assert!(vortex.is_empty());

        let activity = vortex.pop().unwrap().unwrap();
        assert!(matches!(activity, Activity::StopAction(ref a) if a.reason == "event queue empty"));
        assert_eq!(vortex.pop().unwrap(), None);
    }

    #[test]
    fn pops_in_delivery_time_order() {
        let mut vortex = TimeVortex::new();
        vortex.insert(stop(30));
        vortex.insert(event(10, 1));
        vortex.insert(event(20, 2));

        assert_eq!(vortex.pop().unwrap().unwrap().delivery_time(), 10);
        assert_eq!(vortex.pop().unwrap().unwrap().delivery_time(), 20);
        assert_eq!(vortex.pop().unwrap().unwrap().delivery_time(), 30);
        assert!(vortex.is_empty());
    }

    #[test]
    fn same_time_ties_break_by_priority_then_insertion_order() {
        let mut vortex = TimeVortex::new();
        vortex.insert(event(10, 1)); // Priority::Event = 50, inserted first
        vortex.insert(stop(10)); // Priority::Exit = 99
        vortex.insert(event(10, 2)); // Priority::Event = 50, inserted third

        let first = vortex.pop().unwrap().unwrap();
        let second = vortex.pop().unwrap().unwrap();
        let third = vortex.pop().unwrap().unwrap();

        assert!(matches!(first, Activity::Event(ref e) if e.link_id() == Some(LinkId(1))));
        assert!(matches!(second, Activity::Event(ref e) if e.link_id() == Some(LinkId(2))));
        assert!(matches!(third, Activity::StopAction(_)));
    }

    #[test]
    fn front_reports_without_removing() {
        let mut vortex = TimeVortex::new();
        vortex.insert(event(5, 1));
        assert_eq!(vortex.front(), Some(5));
        assert_eq!(vortex.len(), 1);
    }

    proptest! {
        #[test]
        fn pop_order_is_always_nondecreasing(times in proptest::collection::vec(0u64..1000, 1..200)) {
            let mut vortex = TimeVortex::new();
            for (i, t) in times.iter().enumerate() {
                vortex.insert(event(*t, i as u32));
            }
            let mut last = None;
            while let Some(activity) = vortex.pop().unwrap() {
                let t = activity.delivery_time();
                if let Some(last) = last {
                    prop_assert!(t >= last);
                }
                last = Some(t);
            }
        }
    }
}
