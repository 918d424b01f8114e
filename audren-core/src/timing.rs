//! Clock ticks in the 19.2 MHz system counter domain
//!
//! The ADSP measures render time and stamps performance entries in counter
//! ticks. `HostClock` derives ticks from a monotonic host clock;
//! `ManualClock` only moves when told to, which keeps time-budget behavior
//! deterministic in tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// System counter frequency
pub const CLOCK_RATE_HZ: u64 = 19_200_000;

/// Convert counter ticks to nanoseconds
pub fn ticks_to_ns(ticks: u64) -> u64 {
    ((ticks as u128 * 1_000_000_000) / CLOCK_RATE_HZ as u128) as u64
}

/// Convert counter ticks to microseconds
pub fn ticks_to_us(ticks: u64) -> u64 {
    ((ticks as u128 * 1_000_000) / CLOCK_RATE_HZ as u128) as u64
}

/// Convert nanoseconds to counter ticks
pub fn ns_to_ticks(ns: u64) -> u64 {
    ((ns as u128 * CLOCK_RATE_HZ as u128) / 1_000_000_000) as u64
}

/// Source of counter ticks
pub trait Clock: Send + Sync {
    fn clock_ticks(&self) -> u64;
}

/// Monotonic host clock
pub struct HostClock {
    epoch: Instant,
}

impl HostClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for HostClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for HostClock {
    fn clock_ticks(&self) -> u64 {
        ns_to_ticks(self.epoch.elapsed().as_nanos() as u64)
    }
}

/// Clock advanced explicitly by the caller.
///
/// Cloning shares the same counter.
#[derive(Clone, Default)]
pub struct ManualClock {
    ticks: Arc<AtomicU64>,
    /// Ticks added every time the clock is read
    step: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance by `ticks`
    pub fn advance(&self, ticks: u64) {
        self.ticks.fetch_add(ticks, Ordering::SeqCst);
    }

    /// Advance by `ns` nanoseconds
    pub fn advance_ns(&self, ns: u64) {
        self.advance(ns_to_ticks(ns));
    }

    /// Make every read advance the clock by `ns` afterwards
    pub fn set_auto_advance_ns(&self, ns: u64) {
        self.step.store(ns_to_ticks(ns), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn clock_ticks(&self) -> u64 {
        let step = self.step.load(Ordering::SeqCst);
        self.ticks.fetch_add(step, Ordering::SeqCst)
    }
}
