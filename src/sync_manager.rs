//! The per-thread driver that ties [`crate::thread_sync::ThreadSync`] and
//! [`crate::rank_sync::RankSync`] together.
//!
//! Mirrors `sst/core/syncManager.h`/`.cc`: a `SyncManager` is not its own
//! thread or task, it is an [`crate::activity::Activity`] like any other
//! -- the owning thread's run loop pops it from the [`crate::time_vortex::TimeVortex`]
//! just like an `Event`, calls [`SyncManager::execute`], and reschedules
//! it at whatever `next_sync_type`'s sync point comes next. Unlike the
//! reference, which picks `RANK` vs `THREAD` implicitly through a
//! `static` class hierarchy selected at compile time for single- vs.
//! multi-rank builds, this crate always carries both and switches on an
//! explicit `SyncType` (spec §4.6), since a Rust build does not get to
//! recompile itself per deployment.

use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tracing::trace;

use crate::activity::SimTime;
use crate::error::{Result, SyncError};
use crate::event::{DeliveryInfo, EventEnvelope, HandlerId};
use crate::exit_action::ExitAction;
use crate::link::{Destination, LinkId, LinkTable};
use crate::rank_sync::RankSync;
use crate::thread_sync::ThreadSync;

/// One endpoint of a [`crate::link::Link`] during wire-up: which rank and
/// which thread on that rank. Spec §6's `register_link(to, from, name,
/// link_ptr)` takes a pair of these -- `to`, the link's destination, and
/// `from`, the registering thread's own address -- to decide whether the
/// link crosses a rank boundary, a thread boundary, or neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub rank: u32,
    pub thread: u32,
}

/// Which exchange a [`SyncManager`] will drive the next time it fires,
/// recomputed at the end of every `execute()` call (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncType {
    Rank,
    Thread,
}

/// What the owning thread's run loop should do after a round completes:
/// events now resolved to a local handler and ready to insert into this
/// thread's TimeVortex, the time to reschedule the `SyncManager` at, and
/// whether the global exit allreduce converged to zero.
#[derive(Debug, Default)]
pub struct SyncOutcome {
    pub delivered: Vec<EventEnvelope>,
    pub next_sync_time: SimTime,
    pub should_terminate: bool,
}

pub struct SyncManager<R: RankSync> {
    rank: u32,
    thread: u32,
    single_rank: bool,
    thread_sync: ThreadSync,
    rank_sync: Arc<AsyncMutex<R>>,
    exit: Arc<ExitAction>,
    next_sync_type: SyncType,
}

impl<R: RankSync> SyncManager<R> {
    pub fn new(
        rank: u32,
        thread: u32,
        single_rank: bool,
        thread_sync: ThreadSync,
        rank_sync: Arc<AsyncMutex<R>>,
        exit: Arc<ExitAction>,
    ) -> Self {
        Self {
            rank,
            thread,
            single_rank,
            thread_sync,
            rank_sync,
            exit,
            next_sync_type: SyncType::Thread,
        }
    }

    pub fn next_sync_type(&self) -> SyncType {
        self.next_sync_type
    }

    /// Spec §6's unified wire-up entry point: `register_link(to, from,
    /// name, link_ptr)`. Dispatches to [`RankSync::register_link`] when
    /// `to` crosses a rank boundary relative to `from`; a thread-crossing
    /// link needs no equivalent registration here, since
    /// [`ThreadSync::before`] already resolves cross-thread deliveries
    /// from the [`LinkTable`] passed to it at call time rather than from
    /// a name-keyed table of its own (see DESIGN.md). Returns the
    /// [`Destination`] the caller's `Link::finalize_configuration` should
    /// be given -- the Rust-safe stand-in for "the ActivityQueue the Link
    /// should deliver into", since a `Destination` alone determines which
    /// queue `Link::send` will target.
    pub async fn register_link(&mut self, to: Endpoint, from: Endpoint, link_id: LinkId, handler: HandlerId) -> Destination {
        if to.rank != from.rank {
            self.rank_sync.lock().await.register_link(to.rank, link_id);
            Destination::Rank { rank: to.rank, handler }
        } else if to.thread != from.thread {
            Destination::Thread { rank_local_thread: to.thread, handler }
        } else {
            Destination::Local(handler)
        }
    }

    /// Drive one synchronization round, dispatching on `next_sync_type`
    /// (spec §4.6), and compute the next one.
    pub async fn execute(
        &mut self,
        link_table: &LinkTable,
        current_time: SimTime,
        local_minimum_next_activity_time: SimTime,
    ) -> Result<SyncOutcome> {
        let mut outcome = match self.next_sync_type {
            SyncType::Rank => {
                self.execute_rank(link_table, current_time, local_minimum_next_activity_time)
                    .await?
            }
            SyncType::Thread => {
                self.execute_thread(link_table, current_time, local_minimum_next_activity_time)
                    .await?
            }
        };

        let rank_next = self.rank_sync.lock().await.next_sync_time();
        let thread_next = self.thread_sync.next_sync_time();
        self.next_sync_type = if rank_next <= thread_next { SyncType::Rank } else { SyncType::Thread };
        outcome.next_sync_time = self.next_sync_type_time(rank_next, thread_next);

        trace!(
            rank = self.rank,
            thread = self.thread,
            next_sync_type = ?self.next_sync_type,
            next_sync_time = outcome.next_sync_time,
            "sync manager advanced"
        );
        Ok(outcome)
    }

    fn next_sync_type_time(&self, rank_next: SimTime, thread_next: SimTime) -> SimTime {
        match self.next_sync_type {
            SyncType::Rank => rank_next,
            SyncType::Thread => thread_next,
        }
    }

    /// `barrier; thread_sync.before(); barrier; rank_sync.execute(thread);
    /// barrier; thread_sync.after(); barrier; thread-0 checks Exit;
    /// barrier` (spec §4.6). The three `ThreadBarriers` rendezvous points
    /// owned by `thread_sync` are reused across the five handshakes: a
    /// `std::sync::Barrier` resets itself once every thread has passed
    /// through, so cycling through the same three objects several times
    /// in lockstep is equivalent to having five distinct ones.
    async fn execute_rank(
        &mut self,
        link_table: &LinkTable,
        current_time: SimTime,
        local_minimum_next_activity_time: SimTime,
    ) -> Result<SyncOutcome> {
        self.thread_sync.rendezvous_before();
        self.thread_sync.before(link_table, current_time)?;
        self.thread_sync.rendezvous_after();

        {
            let mut rank_sync = self.rank_sync.lock().await;
            rank_sync
                .execute(self.thread, current_time, local_minimum_next_activity_time)
                .await?;
        }
        self.thread_sync.rendezvous_done();

        self.thread_sync.after(local_minimum_next_activity_time, current_time);
        self.thread_sync.rendezvous_before();

        if self.thread == 0 {
            let local = self.exit.local_ref_count() as i64;
            let global = if self.single_rank {
                local
            } else {
                let rank_sync = self.rank_sync.lock().await;
                rank_sync.allreduce_exit_sum(local).await?
            };
            self.exit.set_global_count(global as u32);
        }
        self.thread_sync.rendezvous_after();

        let mut delivered = self.thread_sync.drain_inbox();
        let rank_delivered = self.rank_sync.lock().await.drain_local(self.thread);
        delivered.extend(self.resolve(link_table, rank_delivered)?);

        Ok(SyncOutcome {
            delivered,
            next_sync_time: 0,
            should_terminate: self.exit.global_count() == 0,
        })
    }

    /// `thread_sync.execute()` (its own three-phase barrier); then a
    /// single-rank fast-path exit check (spec §4.6) -- with only one
    /// rank there is nothing to allreduce, so every thread may safely
    /// recompute the sum locally.
    async fn execute_thread(
        &mut self,
        link_table: &LinkTable,
        current_time: SimTime,
        local_minimum_next_activity_time: SimTime,
    ) -> Result<SyncOutcome> {
        self.thread_sync
            .execute(link_table, current_time, local_minimum_next_activity_time)?;

        if self.single_rank {
            self.exit.check_local();
        }

        Ok(SyncOutcome {
            delivered: self.thread_sync.drain_inbox(),
            next_sync_time: 0,
            should_terminate: self.single_rank && self.exit.global_count() == 0,
        })
    }

    /// Resolve rank-sync-delivered events (still addressed by `LinkId`)
    /// into locally-addressed envelopes. An event whose link is unknown
    /// here signals an asymmetric wire-up (spec §4.7) and is fatal.
    fn resolve(&self, link_table: &LinkTable, events: Vec<EventEnvelope>) -> Result<Vec<EventEnvelope>> {
        events
            .into_iter()
            .map(|event| {
                let link_id = event.link_id().ok_or_else(|| {
                    SyncError::Configuration("rank sync delivered an event with no link id".to_string())
                })?;
                let link = link_table.get(link_id).ok_or_else(|| {
                    SyncError::Configuration(format!(
                        "event arrived for unknown {link_id:?}: asymmetric wire-up between ranks"
                    ))
                })?;
                let handler = link.local_handler().ok_or_else(|| {
                    SyncError::Configuration(format!("{link_id:?} has no local handler registered"))
                })?;
                Ok(EventEnvelope {
                    header: event.header,
                    delivery_info: DeliveryInfo::Local(handler),
                    payload: event.payload,
                })
            })
            .collect()
    }
}
