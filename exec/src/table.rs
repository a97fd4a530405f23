//! # Process Table
//!
//! Fixed-capacity array of process records behind one coarse lock. The lock
//! is the sole authority for state transitions and table scans; nothing in
//! this crate touches a record without holding it. The sleep/wakeup channel
//! primitive lives here because both sides of it are table scans.

use crate::clock::TickSource;
use crate::platform::Platform;
use crate::process::{Channel, Proc, ProcFlags, ProcState};
use crate::{ExecError, ExecResult, Pid, Tick, NPROC};
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::{Mutex, MutexGuard};

/// The table state guarded by the coarse lock.
///
/// Reachable only through a held [`ProcTable`] guard, or inside
/// [`Platform::switch`], which runs within the same critical section.
pub struct TableInner {
    slots: Vec<Proc>,
    next_pid: u32,
    init: Option<Pid>,
}

impl TableInner {
    fn new() -> Self {
        Self {
            slots: (0..NPROC).map(|_| Proc::unused()).collect(),
            next_pid: 1,
            init: None,
        }
    }

    /// All slots, free ones included.
    pub fn slots(&self) -> &[Proc] {
        &self.slots
    }

    /// The init process, once spawned.
    pub fn init_pid(&self) -> Option<Pid> {
        self.init
    }

    pub(crate) fn set_init(&mut self, pid: Pid) {
        self.init = Some(pid);
    }

    pub(crate) fn index_of(&self, pid: Pid) -> Option<usize> {
        if pid == Pid::NONE {
            return None;
        }
        self.slots
            .iter()
            .position(|p| p.state() != ProcState::Unused && p.pid == pid)
    }

    /// Look up a live record by pid.
    pub fn proc(&self, pid: Pid) -> Option<&Proc> {
        self.index_of(pid).map(|i| &self.slots[i])
    }

    /// Look up a live record by pid, mutably.
    pub fn proc_mut(&mut self, pid: Pid) -> Option<&mut Proc> {
        self.index_of(pid).map(move |i| &mut self.slots[i])
    }

    pub(crate) fn slot_mut(&mut self, idx: usize) -> &mut Proc {
        &mut self.slots[idx]
    }

    pub(crate) fn slots_mut(&mut self) -> &mut [Proc] {
        &mut self.slots
    }

    /// Mark the first free slot Embryo and stamp its identity and accounting.
    pub(crate) fn alloc_locked(&mut self, name: &str, now: Tick) -> Option<Pid> {
        let idx = self
            .slots
            .iter()
            .position(|p| p.state() == ProcState::Unused)?;
        let pid = Pid::from_raw(self.next_pid);
        self.next_pid += 1;

        let p = &mut self.slots[idx];
        p.set_state(ProcState::Embryo, now);
        p.pid = pid;
        p.name = name.to_string();
        p.nice = crate::NICE_DEFAULT;
        p.ctime = now;
        p.sstime = now;
        p.etime = 0;
        p.rutime = 0;
        p.retime = 0;
        p.sltime = 0;
        Some(pid)
    }

    /// Transition every sleeper on `chan` to Runnable. Broadcast semantics;
    /// woken processes must re-check their wait condition.
    pub fn wakeup_locked(&mut self, chan: Channel, now: Tick) {
        for p in &mut self.slots {
            if p.state() == ProcState::Sleeping && p.chan == Some(chan) {
                p.set_state(ProcState::Runnable, now);
            }
        }
    }
}

/// A line of the process listing.
#[derive(Debug, Clone)]
pub struct ProcInfo {
    /// Process id.
    pub pid: Pid,
    /// Process name.
    pub name: String,
    /// State at snapshot time.
    pub state: ProcState,
    /// Static priority.
    pub nice: i32,
    /// Parent, if any.
    pub parent: Option<Pid>,
}

/// The process table and its coarse lock.
pub struct ProcTable {
    inner: Mutex<TableInner>,
    clock: Arc<dyn TickSource>,
    platform: Arc<dyn Platform>,
    ncpu: usize,
}

impl ProcTable {
    /// Create an empty table for `ncpu` processing units.
    pub fn new(clock: Arc<dyn TickSource>, platform: Arc<dyn Platform>, ncpu: usize) -> Self {
        Self {
            inner: Mutex::new(TableInner::new()),
            clock,
            platform,
            ncpu,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, TableInner> {
        self.inner.lock()
    }

    pub(crate) fn platform(&self) -> &dyn Platform {
        &*self.platform
    }

    pub(crate) fn now(&self) -> Tick {
        self.clock.now()
    }

    /// Number of processing units the scheduler runs on.
    pub fn ncpu(&self) -> usize {
        self.ncpu
    }

    /// Allocate an Embryo record: pid assigned, accounting reset, context
    /// prepared to land in the fork-return entry point on first dispatch.
    ///
    /// The kernel stack and context come from the platform outside the table
    /// lock; if the platform fails, the slot is rolled back to Unused.
    pub(crate) fn allocate(&self, name: &str) -> ExecResult<Pid> {
        let now = self.now();
        let pid = self
            .lock()
            .alloc_locked(name, now)
            .ok_or(ExecError::OutOfProcs)?;

        match self.platform.prepare_context(pid) {
            Ok(ctx) => {
                let mut inner = self.lock();
                if let Some(p) = inner.proc_mut(pid) {
                    p.context = ctx;
                }
                Ok(pid)
            }
            Err(err) => {
                let mut inner = self.lock();
                if let Some(p) = inner.proc_mut(pid) {
                    p.release_slot();
                }
                Err(err)
            }
        }
    }

    /// Atomically release `lk` and block `pid` on `chan`; re-acquire `lk`
    /// once woken and dispatched again.
    ///
    /// The table lock is taken before the caller's guard is dropped, so a
    /// concurrent `wakeup` cannot slip into the gap: it would spin on the
    /// table lock until this process is Sleeping.
    pub fn sleep_on<'a, T>(
        &self,
        pid: Pid,
        chan: Channel,
        lk: &'a Mutex<T>,
        guard: MutexGuard<'a, T>,
    ) -> MutexGuard<'a, T> {
        let mut inner = self.lock();
        drop(guard);
        self.sleep_locked(&mut inner, pid, chan);
        drop(inner);
        lk.lock()
    }

    /// Sleep for callers already inside the table lock (`wait`).
    pub(crate) fn sleep_locked(&self, inner: &mut TableInner, pid: Pid, chan: Channel) {
        let now = self.now();
        match inner.proc_mut(pid) {
            Some(p) => {
                if p.state() != ProcState::Running {
                    panic!("sleep: {pid} is not the running process");
                }
                p.chan = Some(chan);
                p.set_state(ProcState::Sleeping, now);
            }
            None => panic!("sleep: no record for {pid}"),
        }

        self.sched_locked(inner, pid);

        // Woken and dispatched again.
        if let Some(p) = inner.proc_mut(pid) {
            p.chan = None;
        }
    }

    /// Wake every process sleeping on `chan`.
    pub fn wakeup(&self, chan: Channel) {
        let now = self.now();
        self.lock().wakeup_locked(chan, now);
    }

    /// Mark `pid` for termination; advisory. A sleeping target is woken so it
    /// reaches a kill check; it must unwind itself.
    pub fn kill(&self, pid: Pid) -> ExecResult<()> {
        let now = self.now();
        let mut inner = self.lock();
        match inner.proc_mut(pid) {
            Some(p) => {
                p.flags.insert(ProcFlags::KILL_PENDING);
                if p.state() == ProcState::Sleeping {
                    p.set_state(ProcState::Runnable, now);
                }
                Ok(())
            }
            None => Err(ExecError::NotFound),
        }
    }

    /// Snapshot of every live record.
    pub fn snapshot(&self) -> Vec<ProcInfo> {
        let inner = self.lock();
        inner
            .slots()
            .iter()
            .filter(|p| p.state() != ProcState::Unused)
            .map(|p| ProcInfo {
                pid: p.pid,
                name: p.name.clone(),
                state: p.state(),
                nice: p.nice,
                parent: p.parent,
            })
            .collect()
    }

    /// Log the process listing. Debugging aid.
    pub fn dump(&self) {
        for info in self.snapshot() {
            log::info!(
                "{} {} nice={} {}",
                info.pid,
                info.state.label(),
                info.nice,
                info.name
            );
        }
    }
}
