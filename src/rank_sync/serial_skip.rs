//! `RankSyncSerialSkip`: one `SyncQueue` per peer rank, a single
//! send-then-wait-then-allreduce round per sync interval.
//!
//! Mirrors `rankSyncSerialSkip.cc::exchange`: for every peer this rank
//! has a link to, serialize that peer's pending batch, send it, receive
//! the peer's batch back, deliver everything locally, then allreduce the
//! local minimum next-activity-time (MIN) and the signal triple (MAX).
//! The reference's grow-buffer mode byte (`hdr->mode`) is folded into
//! [`crate::sync_queue::SyncQueue`]'s own bincode framing here, since
//! payload length travels with the data rather than a fixed-size remote
//! buffer the far side must pre-size -- TCP and the loopback channel
//! both deliver whole messages, so there is no pre-allocated receive
//! buffer to outgrow.

use std::collections::HashMap;

use crate::activity::SimTime;
use crate::error::{Result, SyncError};
use crate::event::EventEnvelope;
use crate::link::LinkId;
use crate::rank_sync::transport::RankTransport;
use crate::rank_sync::{RankSync, SignalState};
use crate::sync_queue::SyncQueue;
use crate::time::TimeConverter;

pub struct RankSyncSerialSkip<T: RankTransport> {
    transport: T,
    max_period: TimeConverter,
    queues: HashMap<u32, SyncQueue>,
    link_to_rank: HashMap<LinkId, u32>,
    next_sync_time: SimTime,
    signals: SignalState,
    received: Vec<EventEnvelope>,
}

impl<T: RankTransport> RankSyncSerialSkip<T> {
    pub fn new(transport: T, max_period: TimeConverter) -> Self {
        Self {
            transport,
            next_sync_time: max_period.factor(),
            max_period,
            queues: HashMap::new(),
            link_to_rank: HashMap::new(),
            signals: SignalState::default(),
            received: Vec::new(),
        }
    }

    pub fn queue_for_rank(&mut self, rank: u32) -> &mut SyncQueue {
        self.queues.entry(rank).or_insert_with(|| SyncQueue::new(0))
    }
}

#[async_trait::async_trait]
impl<T: RankTransport> RankSync for RankSyncSerialSkip<T> {
    fn register_link(&mut self, to_rank: u32, link_id: LinkId) {
        self.link_to_rank.insert(link_id, to_rank);
        self.queues.entry(to_rank).or_insert_with(|| SyncQueue::new(0));
    }

    async fn execute(&mut self, thread: u32, current_time: SimTime, local_minimum_next_activity_time: SimTime) -> Result<()> {
        if thread != 0 {
            return Ok(());
        }

        let my_rank = self.transport.my_rank();
        let peer_ranks: Vec<u32> = self.queues.keys().copied().collect();

        for &peer in &peer_ranks {
            let bytes = self
                .queues
                .get_mut(&peer)
                .expect("peer queue registered above")
                .get_data()
                .map_err(|source| SyncError::Transport { rank: peer, source })?;
            self.transport.send(peer, 1, bytes).await?;
        }

        for &peer in &peer_ranks {
            let bytes = self.transport.recv(peer, 1).await?;
            let (_, events) = SyncQueue::decode(&bytes).map_err(|source| SyncError::Transport { rank: peer, source })?;
            // Local delivery happens one layer up, in SyncManager, which
            // owns the LinkTable; this rank sync only hands events back
            // still addressed by LinkId.
            self.received.extend(events);
        }

        for queue in self.queues.values_mut() {
            queue.clear();
        }

        let global_min = self.transport.allreduce_min(local_minimum_next_activity_time).await?;
        self.next_sync_time = global_min + self.max_period.factor();

        let global_signals = self.transport.allreduce_max(self.signals.as_array()).await?;
        self.signals = SignalState::from_array(global_signals);

        tracing::trace!(rank = my_rank, next_sync_time = self.next_sync_time, "rank sync (serial skip) advanced");
        Ok(())
    }

    async fn exchange_link_untimed_data(&mut self, thread: u32, local_message_count: &mut i64) -> Result<()> {
        if thread != 0 {
            return Ok(());
        }
        let peer_ranks: Vec<u32> = self.queues.keys().copied().collect();
        for &peer in &peer_ranks {
            let bytes = self
                .queues
                .get_mut(&peer)
                .expect("peer queue registered above")
                .get_data()
                .map_err(|source| SyncError::Transport { rank: peer, source })?;
            self.transport.send(peer, 1, bytes).await?;
        }
        let mut received = 0i64;
        for &peer in &peer_ranks {
            let bytes = self.transport.recv(peer, 1).await?;
            let (header, _events) = SyncQueue::decode(&bytes).map_err(|source| SyncError::Transport { rank: peer, source })?;
            received += header.count as i64;
        }
        for queue in self.queues.values_mut() {
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
        self.queues.values().map(|q| q.len() as u64).sum()
    }

    fn drain_local(&mut self, thread: u32) -> Vec<EventEnvelope> {
        // Serial-skip performs all transport on thread 0 and never
        // multiplexes arrivals by local thread (spec §9 Open Question,
        // recorded in DESIGN.md): everything lands on thread 0.
        if thread == 0 {
            std::mem::take(&mut self.received)
        } else {
            Vec::new()
        }
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
    async fn exchange_converges_next_sync_time_to_global_minimum_plus_period() {
        let mut ranks = LoopbackTransport::mesh(2);
        let rank1 = ranks.pop().unwrap();
        let rank0 = ranks.pop().unwrap();

        let period = TimeLord::get_time_converter(100);
        let mut sync0 = RankSyncSerialSkip::new(rank0, period);
        let mut sync1 = RankSyncSerialSkip::new(rank1, period);
        sync0.register_link(1, LinkId(1));
        sync1.register_link(0, LinkId(2));

        let handle0 = tokio::spawn(async move {
            sync0.execute(0, 1_000, 5_000).await.unwrap();
            sync0
        });
        let handle1 = tokio::spawn(async move {
            sync1.execute(0, 1_000, 2_000).await.unwrap();
            sync1
        });

        let sync0 = handle0.await.unwrap();
        let sync1 = handle1.await.unwrap();
        assert_eq!(sync0.next_sync_time(), 2_100);
        assert_eq!(sync1.next_sync_time(), 2_100);
    }

    #[tokio::test]
    async fn pending_events_are_delivered_to_the_correct_peer() {
        let mut ranks = LoopbackTransport::mesh(2);
        let rank1 = ranks.pop().unwrap();
        let rank0 = ranks.pop().unwrap();

        let period = TimeLord::get_time_converter(10);
        let mut sync0 = RankSyncSerialSkip::new(rank0, period);
        let mut sync1 = RankSyncSerialSkip::new(rank1, period);
        sync0.register_link(1, LinkId(1));
        sync1.register_link(0, LinkId(2));

        sync0
            .queue_for_rank(1)
            .insert(EventEnvelope::new(50, DeliveryInfo::Remote(LinkId(1)), vec![42]));

        let handle0 = tokio::spawn(async move {
            sync0.execute(0, 0, 0).await.unwrap();
            sync0
        });
        let handle1 = tokio::spawn(async move {
            sync1.execute(0, 0, 0).await.unwrap();
            sync1
        });
        let mut sync0 = handle0.await.unwrap();
        let mut sync1 = handle1.await.unwrap();

        assert!(sync0.drain_local(0).is_empty());
        let delivered = sync1.drain_local(0);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].payload, vec![42]);
        assert_eq!(delivered[0].link_id(), Some(LinkId(1)));
    }
}
