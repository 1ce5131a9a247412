//! Process-global time-base registry ("TimeLord") and the conversion
//! handles it hands out.
//!
//! The original implementation this is distilled from keeps a single
//! global `TimeLord` that maps timebases (named or raw factors) onto a
//! common internal cycle resolution. It is built once, before any thread
//! starts, and treated as read-only for the rest of the run -- the same
//! discipline applies here, enforced by convention rather than the type
//! system since the table is legitimately populated incrementally during
//! wire-up.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

/// A handle that converts a count in some link- or clock-local unit into
/// core simulation cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeConverter {
    factor: u64,
}

impl TimeConverter {
    /// Cycles per unit for this converter.
    pub fn factor(&self) -> u64 {
        self.factor
    }

    /// Convert `n` units (expressed in this converter's timebase) to core
    /// cycles.
    pub fn convert_to_core_time(&self, n: u64) -> u64 {
        n * self.factor
    }
}

#[derive(Default)]
struct Registry {
    by_factor: HashMap<u64, TimeConverter>,
}

/// Process-global registry of timebases. Populated during wire-up,
/// read-only afterwards.
pub struct TimeLord {
    registry: Mutex<Registry>,
}

static TIME_LORD: OnceLock<TimeLord> = OnceLock::new();

impl TimeLord {
    fn global() -> &'static TimeLord {
        TIME_LORD.get_or_init(|| TimeLord {
            registry: Mutex::new(Registry::default()),
        })
    }

    /// Return the converter for `factor` cycles-per-unit, creating it if
    /// this is the first request for that factor. Idempotent: repeated
    /// calls with the same factor return an equal `TimeConverter`.
    pub fn get_time_converter(factor: u64) -> TimeConverter {
        let lord = Self::global();
        let mut registry = lord.registry.lock().expect("TimeLord mutex poisoned");
        *registry
            .by_factor
            .entry(factor)
            .or_insert(TimeConverter { factor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotent_for_same_factor() {
        let a = TimeLord::get_time_converter(1000);
        let b = TimeLord::get_time_converter(1000);
        assert_eq!(a, b);
        assert_eq!(a.convert_to_core_time(3), 3000);
    }

    #[test]
    fn distinct_factors_distinct_converters() {
        let a = TimeLord::get_time_converter(10);
        let b = TimeLord::get_time_converter(20);
        assert_ne!(a, b);
    }
}
