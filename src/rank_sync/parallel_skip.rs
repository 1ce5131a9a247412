//! `RankSyncParallelSkip`: thread 0 still drives the single cross-rank
//! exchange, but incoming events are fanned out into per-local-thread
//! queues so every thread can deliver its own share concurrently instead
//! of thread 0 delivering everything serially.
//!
//! Mirrors `rankSyncParallelSkip.cc`: `comm_recv_map` is keyed by
//! `(remote_rank, local_thread)` there; here the fan-out target is kept
//! directly on the wire as a `local_thread` tag on [`EventEnvelope`]'s
//! order tag, since every cross-rank event already carries a `LinkId`
//! order tag and a link is always registered against exactly one local
//! thread. Each per-thread inbox is a [`crossbeam_queue::ArrayQueue`],
//! matching the reference's own choice of a lock-free unbounded queue
//! (`Core::ThreadSafe::UnboundedQueue`) for this same fan-out.

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

use crate::activity::SimTime;
use crate::error::{Result, SyncError};
use crate::event::EventEnvelope;
use crate::link::LinkId;
use crate::rank_sync::transport::RankTransport;
use crate::rank_sync::{RankSync, SignalState};
use crate::sync_queue::SyncQueue;
use crate::time::TimeConverter;

/// Capacity of each per-thread inbox. Chosen generously relative to a
/// typical sync interval's batch size; `execute` surfaces
/// [`SyncError::Overflow`] rather than silently dropping events if a
/// thread falls behind and its inbox fills.
const INBOX_CAPACITY: usize = 4096;

struct LinkRegistration {
    to_rank: u32,
    local_thread: u32,
}

pub struct RankSyncParallelSkip<T: RankTransport> {
    transport: T,
    max_period: TimeConverter,
    send_queues: HashMap<u32, SyncQueue>,
    links: HashMap<LinkId, LinkRegistration>,
    inboxes: HashMap<u32, Arc<ArrayQueue<EventEnvelope>>>,
    next_sync_time: SimTime,
    signals: SignalState,
}

impl<T: RankTransport> RankSyncParallelSkip<T> {
    pub fn new(transport: T, max_period: TimeConverter, num_local_threads: u32) -> Self {
        let inboxes = (0..num_local_threads)
            .map(|thread| (thread, Arc::new(ArrayQueue::new(INBOX_CAPACITY))))
            .collect();
        Self {
            transport,
            next_sync_time: max_period.factor(),
            max_period,
            send_queues: HashMap::new(),
            links: HashMap::new(),
            inboxes,
            signals: SignalState::default(),
        }
    }

    pub fn queue_for_rank(&mut self, rank: u32) -> &mut SyncQueue {
        self.send_queues.entry(rank).or_insert_with(|| SyncQueue::new(0))
    }

    /// Register a link bound for `to_rank`, delivered locally on
    /// `local_thread` once it arrives.
    pub fn register_link_for_thread(&mut self, to_rank: u32, local_thread: u32, link_id: LinkId) {
        self.links.insert(link_id, LinkRegistration { to_rank, local_thread });
        self.send_queues.entry(to_rank).or_insert_with(|| SyncQueue::new(0));
    }

    /// Drain events that arrived for `thread` during the last exchange.
    /// Safe to call concurrently from every thread with a distinct
    /// `thread` id -- each has its own queue.
    pub fn drain_for_thread(&self, thread: u32) -> Vec<EventEnvelope> {
        let Some(inbox) = self.inboxes.get(&thread) else {
            return Vec::new();
        };
        let mut drained = Vec::new();
        while let Some(event) = inbox.pop() {
            drained.push(event);
        }
        drained
    }

    fn fan_out(&self, event: EventEnvelope) -> Result<()> {
        let Some(link_id) = event.link_id() else {
            return Ok(());
        };
        let Some(registration) = self.links.get(&link_id) else {
            return Ok(());
        };
        let inbox = self
            .inboxes
            .get(&registration.local_thread)
            .ok_or_else(|| SyncError::Configuration(format!(
                "no inbox registered for local thread {}",
                registration.local_thread
            )))?;
        inbox.push(event).map_err(|_| SyncError::Overflow {
            peer: registration.to_rank,
            requested: inbox.len() as u32 + 1,
            cap: INBOX_CAPACITY as u32,
        })
    }
}

#[async_trait::async_trait]
impl<T: RankTransport> RankSync for RankSyncParallelSkip<T> {
    fn register_link(&mut self, to_rank: u32, link_id: LinkId) {
        self.register_link_for_thread(to_rank, 0, link_id);
    }

    async fn execute(&mut self, thread: u32, current_time: SimTime, local_minimum_next_activity_time: SimTime) -> Result<()> {
        if thread != 0 {
            return Ok(());
        }

        let peer_ranks: Vec<u32> = self.send_queues.keys().copied().collect();
        for &peer in &peer_ranks {
            let bytes = self
                .send_queues
                .get_mut(&peer)
                .expect("peer queue registered above")
                .get_data()
                .map_err(|source| SyncError::Transport { rank: peer, source })?;
            self.transport.send(peer, 1, bytes).await?;
        }

        for &peer in &peer_ranks {
            let bytes = self.transport.recv(peer, 1).await?;
            let (_, events) = SyncQueue::decode(&bytes).map_err(|source| SyncError::Transport { rank: peer, source })?;
            for event in events {
                self.fan_out(event)?;
            }
        }

        for queue in self.send_queues.values_mut() {
            queue.clear();
        }

        let global_min = self.transport.allreduce_min(local_minimum_next_activity_time).await?;
        self.next_sync_time = global_min + self.max_period.factor();

        let global_signals = self.transport.allreduce_max(self.signals.as_array()).await?;
        self.signals = SignalState::from_array(global_signals);

        let _ = current_time;
        Ok(())
    }

    async fn exchange_link_untimed_data(&mut self, thread: u32, local_message_count: &mut i64) -> Result<()> {
        if thread != 0 {
            return Ok(());
        }
        let peer_ranks: Vec<u32> = self.send_queues.keys().copied().collect();
        for &peer in &peer_ranks {
            let bytes = self
                .send_queues
                .get_mut(&peer)
                .expect("peer queue registered above")
                .get_data()
                .map_err(|source| SyncError::Transport { rank: peer, source })?;
            self.transport.send(peer, 1, bytes).await?;
        }
        let mut received = 0i64;
        for &peer in &peer_ranks {
            let bytes = self.transport.recv(peer, 1).await?;
            let (header, events) = SyncQueue::decode(&bytes).map_err(|source| SyncError::Transport { rank: peer, source })?;
            received += header.count as i64;
            for event in events {
                self.fan_out(event)?;
            }
        }
        for queue in self.send_queues.values_mut() {
            queue.clear();
        }
        *local_message_count += received;
        *local_message_count = self.transport.allreduce_sum(*local_message_count).await?;
        Ok(())
    }

    fn finalize_link_configurations(&mut self) {}

    fn prepare_for_complete(&mut self) {}

    fn next_sync_time(&self) -> SimTime {
        self.next_sync_time
    }

    fn signals(&self) -> SignalState {
        self.signals
    }

    fn set_local_signals(&mut self, signals: SignalState) {
        self.signals = signals;
    }

    fn data_size(&self) -> u64 {
        self.send_queues.values().map(|q| q.len() as u64).sum()
    }

    fn drain_local(&mut self, thread: u32) -> Vec<EventEnvelope> {
        self.drain_for_thread(thread)
    }

    async fn allreduce_exit_sum(&self, local: i64) -> Result<i64> {
        self.transport.allreduce_sum(local).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{DeliveryInfo, EventEnvelope};
    use crate::rank_sync::transport::LoopbackTransport;
    use crate::time::TimeLord;

    #[tokio::test]
    async fn fanned_out_events_land_in_the_registered_threads_inbox() {
        let mut ranks = LoopbackTransport::mesh(2);
        let rank1 = ranks.pop().unwrap();
        let rank0 = ranks.pop().unwrap();

        let period = TimeLord::get_time_converter(10);
        let mut sync0 = RankSyncParallelSkip::new(rank0, period, 2);
        let mut sync1 = RankSyncParallelSkip::new(rank1, period, 2);
        sync0.register_link_for_thread(1, 1, LinkId(5));
        sync1.register_link_for_thread(0, 1, LinkId(5));

        sync0
            .queue_for_rank(1)
            .insert(EventEnvelope::new(30, DeliveryInfo::Remote(LinkId(5)), vec![7]));

        let handle0 = tokio::spawn(async move { sync0.execute(0, 0, 0).await.unwrap() });
        let handle1 = tokio::spawn(async move {
            sync1.execute(0, 0, 0).await.unwrap();
            sync1
        });
        handle0.await.unwrap();
        let sync1 = handle1.await.unwrap();

        let delivered = sync1.drain_for_thread(1);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].payload, vec![7]);
        assert!(sync1.drain_for_thread(0).is_empty());
    }

    #[test]
    fn overflowing_an_inbox_surfaces_a_typed_error() {
        let ranks = LoopbackTransport::mesh(1);
        let rank0 = ranks.into_iter().next().unwrap();
        let period = TimeLord::get_time_converter(1);
        let mut sync = RankSyncParallelSkip::new(rank0, period, 1);
        sync.register_link_for_thread(0, 0, LinkId(1));
        for _ in 0..INBOX_CAPACITY {
            sync.fan_out(EventEnvelope::new(1, DeliveryInfo::Remote(LinkId(1)), vec![])).unwrap();
        }
        let result = sync.fan_out(EventEnvelope::new(1, DeliveryInfo::Remote(LinkId(1)), vec![]));
        assert!(matches!(result, Err(SyncError::Overflow { .. })));
    }
}
