//! Termination detection: tracks outstanding "keep running" references
//! across every thread on a rank, and across every rank.
//!
//! Mirrors `sst/core/exit.h`/`exit.cc`: components bump a per-thread
//! reference count when they have in-flight work that must not be cut
//! off by an idle TimeVortex, and drop it when that work finishes. Once
//! every thread's local count is zero, `check()` allreduces the sum
//! across ranks (spec §4.9); a global zero means the simulation may end.
//!
//! Unlike the reference, which schedules `Exit` itself as an `Action` so
//! it fires once more in the TimeVortex to latch `end_time`, this crate
//! stamps `end_time` the instant the *local* count first reaches zero
//! (CAS-guarded so only the dropping-to-zero caller wins the race) --
//! there being no outstanding local activity left to order it against,
//! a dedicated TimeVortex entry adds a hop without adding meaning.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::activity::SimTime;
use crate::error::Result;
use crate::rank_sync::transport::RankTransport;

const NO_END_TIME: u64 = u64::MAX;

pub struct ExitAction {
    thread_counts: Vec<AtomicU32>,
    end_time: AtomicU64,
    global_count: AtomicU32,
    single_rank: bool,
}

impl ExitAction {
    pub fn new(num_threads: u32, single_rank: bool) -> Self {
        Self {
            thread_counts: (0..num_threads).map(|_| AtomicU32::new(0)).collect(),
            end_time: AtomicU64::new(NO_END_TIME),
            global_count: AtomicU32::new(0),
            single_rank,
        }
    }

    pub fn ref_inc(&self, thread: u32) {
        self.thread_counts[thread as usize].fetch_add(1, Ordering::SeqCst);
    }

    /// Decrement `thread`'s local count. If this is the call that drops
    /// the *entire rank's* local count to zero, latch `current_time` as
    /// the candidate end time.
    pub fn ref_dec(&self, thread: u32, current_time: SimTime) {
        let previous = self.thread_counts[thread as usize].fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "ref_dec on thread {thread} without a matching ref_inc");
        if self.local_ref_count() == 0 {
            let _ = self.end_time.compare_exchange(
                NO_END_TIME,
                current_time,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
        }
    }

    pub fn local_ref_count(&self) -> u32 {
        self.thread_counts.iter().map(|c| c.load(Ordering::SeqCst)).sum()
    }

    pub fn end_time(&self) -> Option<SimTime> {
        match self.end_time.load(Ordering::SeqCst) {
            NO_END_TIME => None,
            time => Some(time),
        }
    }

    /// Synchronize across ranks: allreduce(sum) the local count. Only
    /// meaningful to call from thread 0 (mirrors `Exit::check`, which
    /// `SyncManager::execute` only calls when `rank.thread == 0`).
    pub async fn check<R: RankTransport + ?Sized>(&self, transport: &R) -> Result<()> {
        let local = self.local_ref_count() as i64;
        let global = if self.single_rank {
            local
        } else {
            transport.allreduce_sum(local).await?
        };
        self.global_count.store(global as u32, Ordering::SeqCst);
        Ok(())
    }

    pub fn global_count(&self) -> u32 {
        self.global_count.load(Ordering::SeqCst)
    }

    /// Record an already-reduced global count, for callers (like
    /// [`crate::sync_manager::SyncManager`]) that drive the allreduce
    /// themselves through [`crate::rank_sync::RankSync::allreduce_exit_sum`]
    /// rather than through [`ExitAction::check`].
    pub fn set_global_count(&self, count: u32) {
        self.global_count.store(count, Ordering::SeqCst);
    }

    /// Single-rank fast path (spec §4.6): with only one rank there is no
    /// allreduce to perform, so the local count already is the global one.
    pub fn check_local(&self) {
        self.global_count.store(self.local_ref_count(), Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rank_sync::transport::LoopbackTransport;

    #[test]
    fn ref_dec_to_zero_latches_end_time_once() {
        let exit = ExitAction::new(1, true);
        exit.ref_inc(0);
        exit.ref_inc(0);
        exit.ref_inc(0);
        assert_eq!(exit.local_ref_count(), 3);

        exit.ref_dec(0, 10);
        exit.ref_dec(0, 12);
        assert_eq!(exit.end_time(), None);
        exit.ref_dec(0, 15);
        assert_eq!(exit.local_ref_count(), 0);
        assert_eq!(exit.end_time(), Some(15));

        // a later ref_inc/ref_dec cycle must not move the latched time
        exit.ref_inc(0);
        exit.ref_dec(0, 99);
        assert_eq!(exit.end_time(), Some(15));
    }

    #[test]
    fn counts_across_threads_sum_for_the_local_total() {
        let exit = ExitAction::new(2, true);
        exit.ref_inc(0);
        exit.ref_inc(1);
        assert_eq!(exit.local_ref_count(), 2);
        exit.ref_dec(0, 5);
        assert_eq!(exit.local_ref_count(), 1);
        assert_eq!(exit.end_time(), None);
        exit.ref_dec(1, 7);
        assert_eq!(exit.end_time(), Some(7));
    }

    #[tokio::test]
    async fn check_sums_the_local_count_across_ranks() {
        let ranks = LoopbackTransport::mesh(2);
        let exits = [ExitAction::new(1, false), ExitAction::new(1, false)];
        exits[0].ref_inc(0);
        exits[0].ref_inc(0);
        exits[1].ref_inc(0);

        let mut handles = Vec::new();
        for (exit, transport) in exits.into_iter().zip(ranks.into_iter()) {
            handles.push(tokio::spawn(async move {
                exit.check(&transport).await.unwrap();
                exit.global_count()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), 3);
        }
    }
}
