//! # Process Lifecycle
//!
//! Creation, termination, and reaping. Termination is split across two
//! processes: `exit` leaves a Zombie carrying the accounting totals, and the
//! parent's `wait` reaps it, reclaiming the slot and reporting the totals.
//! Orphans are re-parented to init, which is expected to sit in a `wait`
//! loop and never exit.

use crate::process::{Channel, ProcState};
use crate::table::ProcTable;
use crate::{ExecError, ExecResult, Pid, Tick};

/// Accounting totals of a reaped child, as returned by [`ProcTable::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitReport {
    /// The reaped child.
    pub pid: Pid,
    /// Ticks the child spent Running.
    pub running: Tick,
    /// Ticks the child spent Sleeping.
    pub sleeping: Tick,
    /// Ticks the child spent Runnable.
    pub runnable: Tick,
    /// Ticks from creation to termination.
    pub turnaround: Tick,
}

impl ProcTable {
    /// Create the initial process. It has no parent and adopts every orphan.
    pub fn spawn_init(&self, name: &str) -> ExecResult<Pid> {
        let pid = self.allocate(name)?;
        let aspace = match self.platform().new_address_space() {
            Ok(aspace) => aspace,
            Err(err) => {
                let mut inner = self.lock();
                if let Some(p) = inner.proc_mut(pid) {
                    self.platform().drop_context(p.context);
                    p.release_slot();
                }
                return Err(err);
            }
        };

        let now = self.now();
        let mut inner = self.lock();
        inner.set_init(pid);
        if let Some(p) = inner.proc_mut(pid) {
            p.aspace = Some(aspace);
            p.set_state(ProcState::Runnable, now);
        }
        log::info!("init spawned as {pid}");
        Ok(pid)
    }

    /// Duplicate `parent` into a new Runnable child and return the child's
    /// pid. The child inherits the parent's name, nice, address space image,
    /// and open resources.
    pub fn fork(&self, parent: Pid) -> ExecResult<Pid> {
        let (parent_aspace, parent_nice, parent_name) = {
            let inner = self.lock();
            match inner.proc(parent) {
                Some(p) => (p.aspace, p.nice, p.name.clone()),
                None => return Err(ExecError::NotFound),
            }
        };

        let child = self.allocate(&parent_name)?;

        let child_aspace = match parent_aspace {
            Some(aspace) => match self.platform().dup_address_space(aspace) {
                Ok(copy) => Some(copy),
                Err(err) => {
                    let mut inner = self.lock();
                    if let Some(p) = inner.proc_mut(child) {
                        self.platform().drop_context(p.context);
                        p.release_slot();
                    }
                    return Err(err);
                }
            },
            None => None,
        };
        self.platform().dup_resources(parent, child);

        let now = self.now();
        let mut inner = self.lock();
        if let Some(p) = inner.proc_mut(child) {
            p.aspace = child_aspace;
            p.parent = Some(parent);
            p.nice = parent_nice;
            p.set_state(ProcState::Runnable, now);
        }
        log::debug!("fork: {parent} -> {child}");
        Ok(child)
    }

    /// Terminate the calling process. Its record stays behind as a Zombie
    /// until the parent reaps it; its children are handed to init. Control
    /// never returns to the caller.
    ///
    /// Init must not exit; that is a fatal error.
    pub fn exit(&self, caller: Pid) -> ! {
        {
            let inner = self.lock();
            if inner.init_pid() == Some(caller) {
                panic!("init exiting");
            }
            if inner.proc(caller).is_none() {
                panic!("exit: no record for {caller}");
            }
        }

        self.platform().release_resources(caller);

        let now = self.now();
        let mut inner = self.lock();
        let init = inner.init_pid();

        // The parent may be sleeping in wait.
        if let Some(parent) = inner.proc(caller).and_then(|p| p.parent) {
            inner.wakeup_locked(Channel::Proc(parent), now);
        }

        // Hand children to init; a Zombie orphan needs init to reap it.
        let mut zombie_orphan = false;
        for p in inner.slots_mut() {
            if p.state() != ProcState::Unused && p.parent == Some(caller) {
                p.parent = init;
                if p.state() == ProcState::Zombie {
                    zombie_orphan = true;
                }
            }
        }
        if zombie_orphan {
            if let Some(init) = init {
                inner.wakeup_locked(Channel::Proc(init), now);
            }
        }

        if let Some(p) = inner.proc_mut(caller) {
            p.set_state(ProcState::Zombie, now);
        }
        self.sched_locked(&mut inner, caller);
        panic!("zombie process resumed");
    }

    /// Block until a child of `caller` terminates, reap it, and return its
    /// accounting totals. Fails immediately if the caller has no children,
    /// and stops waiting if the caller is killed.
    pub fn wait(&self, caller: Pid) -> ExecResult<WaitReport> {
        let mut inner = self.lock();
        loop {
            let mut have_kids = false;
            let mut zombie = None;
            for (idx, p) in inner.slots().iter().enumerate() {
                if p.state() != ProcState::Unused && p.parent == Some(caller) {
                    have_kids = true;
                    if p.state() == ProcState::Zombie {
                        zombie = Some(idx);
                        break;
                    }
                }
            }

            if let Some(idx) = zombie {
                let report = {
                    let p = &inner.slots()[idx];
                    WaitReport {
                        pid: p.pid,
                        running: p.rutime,
                        sleeping: p.sltime,
                        runnable: p.retime,
                        turnaround: p.etime - p.ctime,
                    }
                };
                log::info!(
                    "{} reaped: ran {} slept {} waited {} turnaround {}",
                    report.pid,
                    report.running,
                    report.sleeping,
                    report.runnable,
                    report.turnaround
                );

                let ctx = inner.slots()[idx].context;
                let aspace = inner.slots()[idx].aspace;
                self.platform().drop_context(ctx);
                if let Some(aspace) = aspace {
                    self.platform().destroy_address_space(aspace);
                }
                inner.slot_mut(idx).release_slot();
                return Ok(report);
            }

            if !have_kids {
                return Err(ExecError::NoChildren);
            }
            let killed = inner.proc(caller).map(|p| p.killed()).unwrap_or(false);
            if killed {
                return Err(ExecError::Killed);
            }

            // Children exist but none has exited yet; exit wakes this channel.
            self.sleep_locked(&mut inner, caller, Channel::Proc(caller));
        }
    }
}
