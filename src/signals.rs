//! OS signal plumbing: turns `SIGINT`/`SIGTERM`/`SIGUSR1`/`SIGUSR2`/`SIGALRM`
//! into the end/user/alarm signal triple [`crate::rank_sync::SignalState`]
//! allreduces across ranks (spec §5, SPEC_FULL.md §5.1 supplement). The
//! wire contract only carries three slots, so `SIGUSR1` and `SIGUSR2`
//! both fold into the `user` bit -- the reference system's status-print
//! and checkpoint-request signals are distinct `RealTimeAction`s but
//! share one in-band signal here, same ambiguity noted in spec §9.
//!
//! The reference implementation installs C signal handlers directly;
//! here a dedicated tokio runtime thread owns `tokio::signal::unix`
//! listeners and ORs each delivery into a shared [`AtomicU8`] bitset,
//! which the sync manager's own thread polls -- no signal-unsafe code
//! runs on the simulation threads themselves.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::info;

const END_BIT: u8 = 0b001;
const USER_BIT: u8 = 0b010;
const ALARM_BIT: u8 = 0b100;

/// Why the run is being asked to stop, derived from the signal bitset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Interrupted,
    UserSignal,
    Alarm,
}

/// Shared bitset the listener thread ORs signal deliveries into and the
/// owning thread drains from.
#[derive(Clone)]
pub struct SignalBits(Arc<AtomicU8>);

impl SignalBits {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(0)))
    }

    pub fn take_end(&self) -> bool {
        self.0.fetch_and(!END_BIT, Ordering::SeqCst) & END_BIT != 0
    }

    pub fn take_user(&self) -> bool {
        self.0.fetch_and(!USER_BIT, Ordering::SeqCst) & USER_BIT != 0
    }

    pub fn take_alarm(&self) -> bool {
        self.0.fetch_and(!ALARM_BIT, Ordering::SeqCst) & ALARM_BIT != 0
    }

    pub fn peek_any(&self) -> Option<ShutdownReason> {
        let bits = self.0.load(Ordering::SeqCst);
        if bits & END_BIT != 0 {
            Some(ShutdownReason::Interrupted)
        } else if bits & USER_BIT != 0 {
            Some(ShutdownReason::UserSignal)
        } else if bits & ALARM_BIT != 0 {
            Some(ShutdownReason::Alarm)
        } else {
            None
        }
    }
}

impl Default for SignalBits {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn a dedicated single-threaded tokio runtime that listens for
/// `SIGINT`, `SIGTERM`, `SIGUSR1`, `SIGUSR2`, and `SIGALRM` for the
/// lifetime of the process and ORs each into `bits`. Returns the
/// background thread's handle so a test harness (or a clean shutdown
/// path) can join it after dropping the last `SignalBits` clone forces
/// the listeners to end.
#[cfg(unix)]
pub fn spawn_signal_listener(bits: SignalBits) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()
            .expect("failed to build signal listener runtime");
        runtime.block_on(async move {
            use tokio::signal::unix::{signal, SignalKind};

            let mut int = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
            let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
            let mut usr1 = signal(SignalKind::user_defined1()).expect("failed to install SIGUSR1 handler");
            let mut usr2 = signal(SignalKind::user_defined2()).expect("failed to install SIGUSR2 handler");
            let mut alrm = signal(SignalKind::alarm()).expect("failed to install SIGALRM handler");

            loop {
                tokio::select! {
                    _ = int.recv() => {
                        info!("received SIGINT");
                        bits.0.fetch_or(END_BIT, Ordering::SeqCst);
                    }
                    _ = term.recv() => {
                        info!("received SIGTERM");
                        bits.0.fetch_or(END_BIT, Ordering::SeqCst);
                    }
                    _ = usr1.recv() => {
                        info!("received SIGUSR1");
                        bits.0.fetch_or(USER_BIT, Ordering::SeqCst);
                    }
                    _ = usr2.recv() => {
                        info!("received SIGUSR2");
                        bits.0.fetch_or(USER_BIT, Ordering::SeqCst);
                    }
                    _ = alrm.recv() => {
                        info!("received SIGALRM");
                        bits.0.fetch_or(ALARM_BIT, Ordering::SeqCst);
                    }
                }
            }
        });
    })
}

impl SignalBits {
    /// Snapshot and clear every bit in one shot, producing the
    /// [`crate::rank_sync::SignalState`] thread 0 ORs into its local
    /// state before the next rank-sync allreduce (spec §4.5.3/§6).
    pub fn take_signal_state(&self) -> crate::rank_sync::SignalState {
        crate::rank_sync::SignalState {
            end: self.take_end() as i32,
            user: self.take_user() as i32,
            alarm: self.take_alarm() as i32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_clears_only_its_own_bit() {
        let bits = SignalBits::new();
        bits.0.store(END_BIT | ALARM_BIT, Ordering::SeqCst);
        assert!(bits.take_end());
        assert!(!bits.take_end());
        assert!(bits.take_alarm());
        assert!(!bits.take_user());
    }

    #[test]
    fn peek_any_prioritizes_end_over_user_over_alarm() {
        let bits = SignalBits::new();
        bits.0.store(USER_BIT | ALARM_BIT, Ordering::SeqCst);
        assert_eq!(bits.peek_any(), Some(ShutdownReason::UserSignal));
    }

    #[test]
    fn take_signal_state_drains_every_bit_into_the_allreduce_triple() {
        let bits = SignalBits::new();
        bits.0.store(END_BIT | USER_BIT, Ordering::SeqCst);
        let state = bits.take_signal_state();
        assert_eq!(state.end, 1);
        assert_eq!(state.user, 1);
        assert_eq!(state.alarm, 0);
        assert_eq!(bits.take_signal_state().as_array(), [0, 0, 0]);
    }
}
