//! # Tick Clock
//!
//! The scheduling clock is a monotonic counter owned by the timer interrupt;
//! this core only ever reads it.

use crate::Tick;
use core::sync::atomic::{AtomicU64, Ordering};

/// Read-only view of the scheduling clock.
pub trait TickSource: Send + Sync {
    /// Current tick count.
    fn now(&self) -> Tick;
}

/// The standard tick counter, bumped once per timer interrupt.
pub struct TickCounter {
    ticks: AtomicU64,
}

impl TickCounter {
    /// Create a counter starting at zero.
    pub const fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
        }
    }

    /// Advance by one tick. Called from the timer interrupt path.
    pub fn tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Advance by `n` ticks.
    pub fn advance(&self, n: Tick) {
        self.ticks.fetch_add(n, Ordering::Relaxed);
    }
}

impl Default for TickCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for TickCounter {
    fn now(&self) -> Tick {
        self.ticks.load(Ordering::Relaxed)
    }
}
