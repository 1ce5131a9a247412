//! Intra-process, cross-thread synchronization.
//!
//! Mirrors `sst/core/threadSyncSimpleSkip.cc`: each thread owns one
//! `ThreadSync`, which in turn owns one outbound [`SyncQueue`] per peer
//! thread. `execute()` is called once per sync interval from every
//! thread and barriers the whole set through `before()` (drain every
//! queue onto its link) and `after()` (recompute the next sync time from
//! the global minimum next-activity time plus this link's max period).

use std::sync::{Arc, Barrier};

use tracing::{trace, warn};

use crate::activity::SimTime;
use crate::error::{Result, SyncError};
use crate::event::{DeliveryInfo, EventEnvelope};
use crate::link::{Link, LinkId, LinkTable};
use crate::sync_queue::SyncQueue;

/// Per-rank fan-out for events that just crossed a thread boundary: one
/// `crossbeam-channel` per destination thread, shared (by clone) across
/// every `ThreadSync` on the rank so any thread's `before()` can hand an
/// event straight to its destination without routing back through a
/// TimeVortex it doesn't own.
#[derive(Clone)]
pub struct ThreadInboxes {
    senders: Arc<Vec<crossbeam_channel::Sender<EventEnvelope>>>,
}

impl ThreadInboxes {
    /// Build the fan-out table for `num_threads` threads, returning it
    /// alongside each thread's own receiver (in thread-id order).
    pub fn new(num_threads: u32) -> (Self, Vec<crossbeam_channel::Receiver<EventEnvelope>>) {
        let mut senders = Vec::with_capacity(num_threads as usize);
        let mut receivers = Vec::with_capacity(num_threads as usize);
        for _ in 0..num_threads {
            let (tx, rx) = crossbeam_channel::unbounded();
            senders.push(tx);
            receivers.push(rx);
        }
        (Self { senders: Arc::new(senders) }, receivers)
    }

    /// Hand `event` to thread `dest`'s inbox. A disconnected receiver
    /// means that thread has already shut down; dropping the event is
    /// the right call there rather than treating it as fatal.
    fn send(&self, dest: u32, event: EventEnvelope) {
        if let Some(sender) = self.senders.get(dest as usize) {
            if sender.send(event).is_err() {
                warn!(dest, "thread inbox closed, dropping in-flight event");
            }
        }
    }
}

/// Which skip-ahead discipline a `ThreadSync` uses to pick its next sync
/// point (spec §9 Open Questions: `SkipAhead` is the default, matching
/// the reference's preferred `ThreadSyncDirectSkip` family over plain
/// fixed-interval `SimpleSkip`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadSyncStrategy {
    /// Resync every `max_period` cycles regardless of activity.
    FixedInterval,
    /// Resync at `max(local_minimum_next_activity_time, last + max_period)`.
    SkipAhead,
}

impl Default for ThreadSyncStrategy {
    fn default() -> Self {
        ThreadSyncStrategy::SkipAhead
    }
}

/// Barriers shared by every thread in a rank, one per phase of
/// `execute()`. `Arc`-shared so each `ThreadSync` can wait on the same
/// three-phase handshake.
#[derive(Clone)]
pub struct ThreadBarriers {
    before: Arc<Barrier>,
    after: Arc<Barrier>,
    done: Arc<Barrier>,
}

impl ThreadBarriers {
    pub fn new(num_threads: usize) -> Self {
        Self {
            before: Arc::new(Barrier::new(num_threads)),
            after: Arc::new(Barrier::new(num_threads)),
            done: Arc::new(Barrier::new(num_threads)),
        }
    }
}

pub struct ThreadSync {
    thread: u32,
    num_threads: u32,
    queues: Vec<SyncQueue>,
    barriers: ThreadBarriers,
    strategy: ThreadSyncStrategy,
    max_period: SimTime,
    next_sync_time: SimTime,
    inboxes: ThreadInboxes,
    inbox: crossbeam_channel::Receiver<EventEnvelope>,
}

impl ThreadSync {
    pub fn new(
        thread: u32,
        num_threads: u32,
        barriers: ThreadBarriers,
        max_period: SimTime,
        inboxes: ThreadInboxes,
        inbox: crossbeam_channel::Receiver<EventEnvelope>,
    ) -> Self {
        let queues = (0..num_threads).map(|_| SyncQueue::new(0)).collect();
        Self {
            thread,
            num_threads,
            queues,
            barriers,
            strategy: ThreadSyncStrategy::default(),
            max_period,
            next_sync_time: max_period,
            inboxes,
            inbox,
        }
    }

    pub fn with_strategy(mut self, strategy: ThreadSyncStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn next_sync_time(&self) -> SimTime {
        self.next_sync_time
    }

    /// The outbound queue this thread uses to stage events addressed to
    /// peer thread `tid`.
    pub fn queue_for_thread(&mut self, tid: u32) -> &mut SyncQueue {
        &mut self.queues[tid as usize]
    }

    /// Drain every outbound queue, resolving each pending event against its
    /// link and handing it straight to the destination thread's inbox.
    /// Called once per sync interval, after the `before` barrier opens.
    pub(crate) fn before(&mut self, link_table: &LinkTable, current_time: SimTime) -> Result<()> {
        for (dest_thread, queue) in self.queues.iter_mut().enumerate() {
            if queue.is_empty() {
                continue;
            }
            for event in queue.drain() {
                let Some(link_id) = event.link_id() else {
                    continue;
                };
                let link = link_table.get(link_id).ok_or_else(|| {
                    SyncError::Configuration(format!("no link registered for {:?}", link_id))
                })?;
                let Some(handler) = link.local_handler() else {
                    continue;
                };
                let resolved = EventEnvelope {
                    header: event.header,
                    delivery_info: DeliveryInfo::Local(handler),
                    payload: event.payload,
                };
                self.inboxes.send(dest_thread as u32, resolved);
            }
        }
        trace!(thread = self.thread, current_time, "thread sync drained outbound queues");
        Ok(())
    }

    /// Take everything delivered to this thread's own inbox since the last
    /// drain -- both events `before()` just routed here on this rank, and
    /// (once resolved by the caller's `LinkTable`) events handed in from
    /// [`crate::rank_sync::RankSync::drain_local`].
    pub fn drain_inbox(&mut self) -> Vec<EventEnvelope> {
        self.inbox.try_iter().collect()
    }

    /// Recompute `next_sync_time` once every thread has drained. `SkipAhead`
    /// follows spec §4.4(ii) exactly: `max(local_next_activity_time,
    /// current_time) + interthread_min_latency`, so a thread with nothing
    /// of its own due soon still only skips ahead by one lookahead period
    /// past whichever is later, the current time or its own local minimum.
    pub(crate) fn after(&mut self, local_minimum_next_activity_time: SimTime, current_time: SimTime) {
        self.next_sync_time = match self.strategy {
            ThreadSyncStrategy::FixedInterval => current_time + self.max_period,
            ThreadSyncStrategy::SkipAhead => local_minimum_next_activity_time.max(current_time) + self.max_period,
        };
        trace!(thread = self.thread, next_sync_time = self.next_sync_time, "thread sync advanced");
    }

    /// The three-phase barrier handshake every thread performs once per
    /// sync interval: drain queues, compute the next sync point, then
    /// rendezvous once more before returning control to the caller.
    pub fn execute(
        &mut self,
        link_table: &LinkTable,
        current_time: SimTime,
        local_minimum_next_activity_time: SimTime,
    ) -> Result<()> {
        self.barriers.before.wait();
        self.before(link_table, current_time)?;
        self.barriers.after.wait();
        self.after(local_minimum_next_activity_time, current_time);
        self.barriers.done.wait();
        Ok(())
    }

    pub fn num_threads(&self) -> u32 {
        self.num_threads
    }

    /// Rendezvous on the `before` barrier without running `before()`'s
    /// side effects. Exposed so [`crate::sync_manager::SyncManager`] can
    /// interleave a rank-sync exchange between two of the three
    /// barriers instead of going through the bundled `execute()`
    /// (spec §4.6, which reuses these same three rendezvous points five
    /// times over the course of a RANK round).
    pub(crate) fn rendezvous_before(&self) {
        self.barriers.before.wait();
    }

    pub(crate) fn rendezvous_after(&self) {
        self.barriers.after.wait();
    }

    pub(crate) fn rendezvous_done(&self) {
        self.barriers.done.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{DeliveryInfo, EventEnvelope};
    use crate::link::Destination;
    use crate::time::TimeLord;

    fn table_with_one_remote_link(id: u32, latency: u64) -> LinkTable {
        let mut table = LinkTable::new();
        let mut link = Link::new(LinkId(id), TimeLord::get_time_converter(1));
        link.set_latency(latency);
        link.finalize_configuration(Destination::Thread {
            rank_local_thread: 1,
            handler: 0,
        })
        .unwrap();
        table.register(link);
        table
    }

    fn single_thread_sync(num_threads: u32, max_period: SimTime) -> ThreadSync {
        let barriers = ThreadBarriers::new(num_threads as usize);
        let (inboxes, mut receivers) = ThreadInboxes::new(num_threads);
        ThreadSync::new(0, num_threads, barriers, max_period, inboxes, receivers.remove(0))
    }

    #[test]
    fn skip_ahead_adds_the_period_to_the_larger_of_local_minimum_and_current_time() {
        let mut sync = single_thread_sync(1, 100);
        sync.after(5_000, 1_000);
        assert_eq!(sync.next_sync_time(), 5_100);

        sync.after(50, 1_000);
        assert_eq!(sync.next_sync_time(), 1_100);
    }

    #[test]
    fn fixed_interval_ignores_local_minimum() {
        let mut sync = single_thread_sync(1, 100).with_strategy(ThreadSyncStrategy::FixedInterval);
        sync.after(999_999, 1_000);
        assert_eq!(sync.next_sync_time(), 1_100);
    }

    #[test]
    fn before_drains_queued_events_onto_their_links() {
        let table = table_with_one_remote_link(1, 1);
        let barriers = ThreadBarriers::new(2);
        let (inboxes, mut receivers) = ThreadInboxes::new(2);
        let mut sync0 = ThreadSync::new(0, 2, barriers, 100, inboxes, receivers.remove(0));
        let mut sync1_inbox = receivers.remove(0);

        sync0.queue_for_thread(1).insert(EventEnvelope::new(
            10,
            DeliveryInfo::Remote(LinkId(1)),
            vec![9],
        ));

        sync0.before(&table, 0).unwrap();
        assert!(sync0.queue_for_thread(1).is_empty());

        let delivered: Vec<_> = sync1_inbox.try_iter().collect();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].payload, vec![9]);
        assert_eq!(delivered[0].delivery_info, DeliveryInfo::Local(0));
    }
}
