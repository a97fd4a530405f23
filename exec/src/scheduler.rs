//! # Scheduler
//!
//! Per-CPU selection loop. Every processing unit runs the same algorithm
//! independently against the shared table: pick the Runnable record with the
//! lowest aging-adjusted priority and hand it the CPU via context transfer.
//!
//! Ties break by scan order (first found wins), which keeps selection
//! deterministic for a given table layout.

use crate::process::ProcState;
use crate::table::{ProcTable, TableInner};
use crate::{CpuId, Pid, Tick};

/// Index of the Runnable record with the minimum effective priority
/// `nice - waited_ticks / 20.0`, or `None` if nothing is Runnable.
pub(crate) fn select_locked(inner: &TableInner, now: Tick) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, p) in inner.slots().iter().enumerate() {
        if p.state() != ProcState::Runnable {
            continue;
        }
        let eff = p.effective_priority(now);
        match best {
            Some((_, min)) if eff >= min => {}
            _ => best = Some((idx, eff)),
        }
    }
    best.map(|(idx, _)| idx)
}

impl ProcTable {
    /// One scheduling iteration on `cpu`: dispatch the most urgent Runnable
    /// record and return its pid once it has yielded the CPU back, or return
    /// `None` without dispatching if nothing is Runnable.
    pub fn schedule_once(&self, cpu: CpuId) -> Option<Pid> {
        self.platform().enable_interrupts();

        let mut inner = self.lock();
        let now = self.now();
        let idx = select_locked(&inner, now)?;

        let (pid, ctx, aspace) = {
            let p = inner.slot_mut(idx);
            p.cpu = Some(cpu);
            p.set_state(ProcState::Running, now);
            (p.pid, p.context, p.aspace)
        };

        if let Some(aspace) = aspace {
            self.platform().activate_address_space(aspace);
        }

        // The process runs until it yields, blocks, or exits; the critical
        // section travels with the context transfer and comes back with it.
        self.platform()
            .switch(self.platform().scheduler_context(cpu), ctx, &mut inner);

        self.platform().activate_kernel_space();
        if let Some(p) = inner.proc_mut(pid) {
            if p.cpu == Some(cpu) {
                p.cpu = None;
            }
        }
        Some(pid)
    }

    /// The scheduler loop for one processing unit. Never returns.
    pub fn run(&self, cpu: CpuId) -> ! {
        log::info!("scheduler: cpu {cpu} entering the selection loop");
        loop {
            if self.schedule_once(cpu).is_none() {
                self.platform().wait_for_interrupt();
            }
        }
    }

    /// Give up the CPU for one scheduling round.
    pub fn yield_now(&self, pid: Pid) {
        let now = self.now();
        let mut inner = self.lock();
        match inner.proc_mut(pid) {
            Some(p) => p.set_state(ProcState::Runnable, now),
            None => panic!("yield: no record for {pid}"),
        }
        self.sched_locked(&mut inner, pid);
    }

    /// Enter the scheduler. The caller must hold the table lock (expressed by
    /// `inner`) and must already have moved `pid` off the Running state.
    pub(crate) fn sched_locked(&self, inner: &mut TableInner, pid: Pid) {
        let (ctx, cpu) = match inner.proc(pid) {
            Some(p) => {
                if p.state() == ProcState::Running {
                    panic!("sched: {pid} is still running");
                }
                match p.cpu {
                    Some(cpu) => (p.context, cpu),
                    None => panic!("sched: {pid} has no cpu binding"),
                }
            }
            None => panic!("sched: no record for {pid}"),
        };
        self.platform()
            .switch(ctx, self.platform().scheduler_context(cpu), inner);
    }
}
