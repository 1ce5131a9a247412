//! The narrow slice of synchronization state that survives a checkpoint.
//!
//! Per spec §9: outbound queues are only ever non-empty between two
//! adjacent barriers, so a checkpoint taken at the (only) safe point --
//! right after a sync round completes -- always finds them empty. What
//! genuinely needs to persist is the pair of clocks that would otherwise
//! have to be recomputed from the full event history, plus the set of
//! registered link names per remote rank/thread so a restored run can
//! re-validate its wire-up before resuming.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::activity::SimTime;

/// A registered cross-boundary link, recorded by name for checkpoint
/// validation rather than by its runtime [`crate::link::LinkId`], which
/// is only guaranteed stable within a single process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredLink {
    pub name: String,
    pub remote_rank: u32,
    pub remote_thread: u32,
}

/// Persisted synchronization state for one rank.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    pub next_rank_sync_time: SimTime,
    pub max_period: SimTime,
    pub links: Vec<RegisteredLink>,
}

impl SyncCheckpoint {
    pub fn new(next_rank_sync_time: SimTime, max_period: SimTime) -> Self {
        Self {
            next_rank_sync_time,
            max_period,
            links: Vec::new(),
        }
    }

    pub fn register_link(&mut self, name: impl Into<String>, remote_rank: u32, remote_thread: u32) {
        self.links.push(RegisteredLink {
            name: name.into(),
            remote_rank,
            remote_thread,
        });
    }

    /// Whether `other`'s registered link set matches this checkpoint's,
    /// ignoring order -- used to validate a restored run's wire-up
    /// against the checkpoint it's resuming from.
    pub fn links_match(&self, other: &SyncCheckpoint) -> bool {
        let ours: BTreeMap<_, _> = self.links.iter().map(|l| (l.name.clone(), (l.remote_rank, l.remote_thread))).collect();
        let theirs: BTreeMap<_, _> = other.links.iter().map(|l| (l.name.clone(), (l.remote_rank, l.remote_thread))).collect();
        ours == theirs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let mut checkpoint = SyncCheckpoint::new(1_000, 10);
        checkpoint.register_link("link0", 1, 0);
        let encoded = serde_json::to_string(&checkpoint).unwrap();
        let decoded: SyncCheckpoint = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.next_rank_sync_time, 1_000);
        assert!(decoded.links_match(&checkpoint));
    }

    #[test]
    fn links_match_ignores_order() {
        let mut a = SyncCheckpoint::new(0, 1);
        a.register_link("x", 1, 0);
        a.register_link("y", 2, 1);
        let mut b = SyncCheckpoint::new(0, 1);
        b.register_link("y", 2, 1);
        b.register_link("x", 1, 0);
        assert!(a.links_match(&b));
    }

    #[test]
    fn links_match_detects_asymmetric_wireup() {
        let mut a = SyncCheckpoint::new(0, 1);
        a.register_link("x", 1, 0);
        let b = SyncCheckpoint::new(0, 1);
        assert!(!a.links_match(&b));
    }
}
