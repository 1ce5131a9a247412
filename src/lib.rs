//! A parallel discrete-event simulation synchronization core.
//!
//! This crate is the machinery that keeps many per-thread event queues
//! (`TimeVortex`es), spread across OS threads and ranks (OS processes),
//! advancing in simulated time without ever letting one thread receive
//! an event addressed to its own past. It is modeled on the
//! synchronization layer of `sst/core` (activity ordering, link-based
//! dispatch, rank/thread exchange, lookahead-driven skip-ahead), rebuilt
//! around Rust ownership instead of the reference implementation's
//! pointer-chasing class hierarchy.
//!
//! # Module map
//!
//! - [`activity`] / [`event`]: the closed set of things a `TimeVortex`
//!   schedules, and the ordering key shared by all of them.
//! - [`time_vortex`]: the per-thread ordered queue itself.
//! - [`link`]: static wiring between two points that can exchange
//!   events, and the latency that bounds lookahead.
//! - [`sync_queue`]: the outbound buffer a synchronizer drains.
//! - [`thread_sync`]: cross-thread exchange within one rank.
//! - [`rank_sync`]: cross-rank exchange, with serial and parallel
//!   strategies generic over a [`rank_sync::transport::RankTransport`].
//! - [`sync_manager`]: the per-thread driver that alternates between the
//!   two.
//! - [`exit_action`]: reference-counted termination detection.
//! - [`time`]: the process-global timebase registry.
//! - [`checkpoint`]: the narrow slice of sync state that survives a
//!   checkpoint.
//! - [`signals`] / [`config`] / [`error`]: the ambient stack --
//!   OS-signal plumbing, topology configuration, and the fatal error
//!   taxonomy.
//! - [`component`]: a minimal event-driven harness for the toy
//!   components a `Link` delivers into; everything above the `Link`
//!   boundary is out of scope for the sync core itself.

pub mod activity;
pub mod checkpoint;
pub mod component;
pub mod config;
pub mod error;
pub mod event;
pub mod exit_action;
pub mod link;
pub mod rank_sync;
pub mod signals;
pub mod sync_manager;
pub mod sync_queue;
pub mod thread_sync;
pub mod time;
pub mod time_vortex;
