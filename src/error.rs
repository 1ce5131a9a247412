//! Fatal error taxonomy for the synchronization core (see spec §7).
//!
//! Application glue (binaries, wiring code) is free to wrap these in
//! `anyhow::Error` the way the rest of the crate's call sites do; the sync
//! core itself always returns a typed `SyncError` so callers can match on
//! the failure kind.

use thiserror::Error;

use crate::activity::SimTime;
use crate::link::LinkId;

/// The fatal error kinds the synchronization core can raise.
///
/// `Signal` (operator-requested shutdown) is deliberately not a variant
/// here: it is not a failure, it is carried out of band as a
/// [`crate::signals::ShutdownReason`].
#[derive(Debug, Error)]
pub enum SyncError {
    /// Something about the static wire-up is wrong: an asymmetric
    /// registration, or a cross-boundary link with zero latency.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A `RankTransport` operation failed mid-exchange.
    #[error("transport error during rank {rank} exchange: {source}")]
    Transport {
        rank: u32,
        #[source]
        source: anyhow::Error,
    },

    /// A receive buffer needed to grow past an implementation-chosen cap.
    #[error("receive buffer for peer {peer} would grow to {requested} bytes, exceeding cap {cap}")]
    Overflow {
        peer: u32,
        requested: u32,
        cap: u32,
    },

    /// A TimeVortex pop returned an activity whose delivery time regressed
    /// past the last-popped activity -- always a producer bug.
    #[error("TimeVortex invariant violated: popped delivery_time {popped} < last {last} (link {link:?})")]
    Invariant {
        popped: SimTime,
        last: SimTime,
        link: Option<LinkId>,
    },
}

pub type Result<T> = std::result::Result<T, SyncError>;
