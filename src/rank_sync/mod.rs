//! Inter-rank synchronization: exchanging batched events and computing
//! the next safe skip point across process boundaries.
//!
//! Mirrors `sst/core/sync/rankSync.cc` and its two strategies,
//! `rankSyncSerialSkip.cc` and `rankSyncParallelSkip.cc`. Both
//! strategies are generic over a [`transport::RankTransport`] so the
//! protocol logic is identical whether ranks are processes talking TCP
//! or tasks sharing a [`transport::LoopbackTransport`] in one binary.

pub mod parallel_skip;
pub mod serial_skip;
pub mod transport;

use crate::activity::SimTime;
use crate::error::Result;
use crate::event::EventEnvelope;
use crate::link::LinkId;

pub use parallel_skip::RankSyncParallelSkip;
pub use serial_skip::RankSyncSerialSkip;

/// Which concrete [`RankSync`] strategy a run selects (spec §4.5,
/// `SyncConfig::rank_sync`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankSyncVariant {
    Serial,
    Parallel,
}

/// The end/user/alarm signal triple every rank ORs into its local state
/// and allreduces with MAX once per exchange, so that any rank seeing a
/// signal causes every rank to observe it (spec §5).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignalState {
    pub end: i32,
    pub user: i32,
    pub alarm: i32,
}

impl SignalState {
    pub fn as_array(&self) -> [i32; 3] {
        [self.end, self.user, self.alarm]
    }

    pub fn from_array(values: [i32; 3]) -> Self {
        Self {
            end: values[0],
            user: values[1],
            alarm: values[2],
        }
    }

    pub fn any(&self) -> bool {
        self.end != 0 || self.user != 0 || self.alarm != 0
    }
}

/// Behavior common to both rank-sync strategies, dispatched on by
/// [`crate::sync_manager::SyncManager`]. Only thread 0 of a rank ever
/// drives the cross-rank exchange; other threads' `execute` calls are
/// no-ops, matching `RankSyncSerialSkip::execute`.
#[async_trait::async_trait]
pub trait RankSync: Send + Sync {
    /// Register a link whose destination is a handler on `to_rank`.
    fn register_link(&mut self, to_rank: u32, link_id: LinkId);

    /// Drive one synchronization interval. Only `thread == 0` performs
    /// the actual cross-rank exchange; every thread must still call this
    /// (and [`RankSync::drain_local`] afterwards) once per round.
    async fn execute(&mut self, thread: u32, current_time: SimTime, local_minimum_next_activity_time: SimTime) -> Result<()>;

    /// Take whatever arrived for `thread` during the last [`RankSync::execute`]
    /// round, still addressed by [`LinkId`] (not yet resolved to a local
    /// handler -- the caller does that with its own `LinkTable`, which
    /// `RankSync` itself never holds).
    fn drain_local(&mut self, thread: u32) -> Vec<EventEnvelope>;

    /// Untimed (init-phase) data exchange, used before the simulation
    /// clock starts running.
    async fn exchange_link_untimed_data(&mut self, thread: u32, local_message_count: &mut i64) -> Result<()>;

    fn finalize_link_configurations(&mut self);

    fn prepare_for_complete(&mut self);

    fn next_sync_time(&self) -> SimTime;

    fn signals(&self) -> SignalState;

    fn set_local_signals(&mut self, signals: SignalState);

    fn data_size(&self) -> u64;

    /// Allreduce(sum) `local` across every rank over this `RankSync`'s own
    /// transport, for [`crate::exit_action::ExitAction::check`]. Only
    /// meaningful from thread 0, same restriction as [`RankSync::execute`].
    async fn allreduce_exit_sum(&self, local: i64) -> Result<i64>;
}
