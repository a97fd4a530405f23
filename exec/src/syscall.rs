//! # Service Interface
//!
//! [`ExecCore`] bundles the process table and the mutex pool behind the call
//! surface a trap handler dispatches to. Every entry point takes the calling
//! process explicitly; the trap layer knows who is on the CPU, this core does
//! not.

use crate::clock::TickSource;
use crate::lifecycle::WaitReport;
use crate::mutex::{MutexHandle, MutexPool};
use crate::platform::Platform;
use crate::table::{ProcInfo, ProcTable};
use crate::{CpuId, ExecResult, Pid};
use alloc::sync::Arc;
use alloc::vec::Vec;

/// The assembled execution core.
pub struct ExecCore {
    table: ProcTable,
    mutexes: MutexPool,
}

impl ExecCore {
    /// Wire up a core for `ncpu` processing units.
    pub fn new(clock: Arc<dyn TickSource>, platform: Arc<dyn Platform>, ncpu: usize) -> Self {
        Self {
            table: ProcTable::new(clock, platform, ncpu),
            mutexes: MutexPool::new(),
        }
    }

    /// The process table.
    pub fn table(&self) -> &ProcTable {
        &self.table
    }

    /// Create the initial process.
    pub fn spawn_init(&self, name: &str) -> ExecResult<Pid> {
        self.table.spawn_init(name)
    }

    /// Duplicate `caller` into a new child.
    pub fn fork(&self, caller: Pid) -> ExecResult<Pid> {
        self.table.fork(caller)
    }

    /// Terminate `caller`. Never returns.
    pub fn exit(&self, caller: Pid) -> ! {
        self.table.exit(caller)
    }

    /// Reap a terminated child of `caller`.
    pub fn wait(&self, caller: Pid) -> ExecResult<WaitReport> {
        self.table.wait(caller)
    }

    /// Adjust a process priority.
    pub fn nice(&self, caller: Pid, target: Pid, delta: i32) -> ExecResult<i32> {
        self.table.nice(caller, target, delta)
    }

    /// Mark a process for termination.
    pub fn kill(&self, target: Pid) -> ExecResult<()> {
        self.table.kill(target)
    }

    /// Give up the CPU for one scheduling round.
    pub fn yield_now(&self, caller: Pid) {
        self.table.yield_now(caller);
    }

    /// Run the scheduler loop on `cpu`. Never returns.
    pub fn run(&self, cpu: CpuId) -> ! {
        self.table.run(cpu)
    }

    /// One scheduling iteration on `cpu`.
    pub fn schedule_once(&self, cpu: CpuId) -> Option<Pid> {
        self.table.schedule_once(cpu)
    }

    /// Claim a mutex from the pool.
    pub fn mutex_create(&self) -> ExecResult<MutexHandle> {
        self.mutexes.create()
    }

    /// Acquire a mutex, blocking `caller` if it is held.
    pub fn mutex_acquire(&self, caller: Pid, handle: MutexHandle) -> ExecResult<()> {
        self.mutexes.acquire(&self.table, caller, handle)
    }

    /// Release a mutex.
    pub fn mutex_release(&self, caller: Pid, handle: MutexHandle) -> ExecResult<()> {
        self.mutexes.release(&self.table, caller, handle)
    }

    /// Return a mutex to the pool.
    pub fn mutex_destroy(&self, handle: MutexHandle) -> ExecResult<()> {
        self.mutexes.destroy(handle)
    }

    /// Snapshot of every live process.
    pub fn snapshot(&self) -> Vec<ProcInfo> {
        self.table.snapshot()
    }

    /// Log the process listing.
    pub fn dump(&self) {
        self.table.dump();
    }
}
