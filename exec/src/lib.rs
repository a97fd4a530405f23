//! # Minos Execution Core
//!
//! The execution core manages:
//! - The process table and the process state machine
//! - Per-state time accounting against the tick clock
//! - Aging-adjusted priority scheduling across CPUs
//! - The sleep/wakeup channel primitive
//! - The priority (`nice`) service
//! - The priority-donating mutex pool
//!
//! ## Key Principle
//!
//! Everything that touches process state goes through the process table and
//! its single coarse lock. The CPU-level mechanics (context switching,
//! address spaces, per-process resources) are external collaborators reached
//! through the [`platform::Platform`] trait.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod clock;
pub mod lifecycle;
pub mod mutex;
pub mod nice;
pub mod platform;
pub mod process;
pub mod scheduler;
pub mod syscall;
pub mod table;

#[cfg(test)]
pub(crate) mod testing;

use static_assertions::const_assert;

/// Capacity of the process table.
pub const NPROC: usize = 64;

/// Capacity of the mutex pool.
pub const NMUTEX: usize = 100;

/// Most urgent `nice` value.
pub const NICE_MIN: i32 = 0;

/// Least urgent `nice` value.
pub const NICE_MAX: i32 = 31;

/// `nice` assigned to freshly allocated processes.
pub const NICE_DEFAULT: i32 = 15;

/// Ticks of waiting that offset one point of `nice` in the aging formula.
pub const AGING_DIVISOR: f64 = 20.0;

const_assert!(NPROC > 0);
const_assert!(NICE_MIN <= NICE_DEFAULT && NICE_DEFAULT <= NICE_MAX);

/// Monotonic scheduling-clock unit.
pub type Tick = u64;

/// Index of a processing unit.
pub type CpuId = usize;

/// Process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(u32);

impl Pid {
    /// The reserved id marking a free table slot.
    pub const NONE: Self = Self(0);

    /// Create a PID from a raw value.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw id value.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for Pid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "pid:{}", self.0)
    }
}

/// Execution result type
pub type ExecResult<T> = Result<T, ExecError>;

/// Execution errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecError {
    /// The process table has no free slot
    OutOfProcs,
    /// The mutex pool has no free slot
    PoolExhausted,
    /// No process with the given pid
    NotFound,
    /// Mutex handle out of range or unused
    InvalidHandle,
    /// The caller has no children to wait for
    NoChildren,
    /// The caller has a pending kill
    Killed,
    /// A backing resource (stack, address space) could not be obtained
    OutOfMemory,
}

pub use clock::{TickCounter, TickSource};
pub use lifecycle::WaitReport;
pub use mutex::{MutexHandle, MutexPool};
pub use platform::{AddrSpace, Context, Platform};
pub use process::{Channel, Proc, ProcFlags, ProcState};
pub use syscall::ExecCore;
pub use table::{ProcInfo, ProcTable, TableInner};
