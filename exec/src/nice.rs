//! # Priority Service
//!
//! Read and adjust the static `nice` of any process. An adjustment that makes
//! a Runnable target strictly more urgent than every other Runnable process
//! asks the Running caller to yield, so the boost takes effect without
//! waiting for the caller's time slice to end. The hint is cooperative; on a
//! multi-CPU system another unit may still dispatch the target first.

use crate::process::ProcState;
use crate::table::{ProcTable, TableInner};
use crate::{ExecError, ExecResult, Pid, NICE_MAX, NICE_MIN};

impl ProcTable {
    /// Adjust `target`'s nice by `delta`, clamped to `[NICE_MIN, NICE_MAX]`,
    /// and return the resulting value. A zero `delta` is a pure read.
    pub fn nice(&self, caller: Pid, target: Pid, delta: i32) -> ExecResult<i32> {
        let mut inner = self.lock();
        self.nice_locked(&mut inner, caller, target, delta)
    }

    /// [`ProcTable::nice`] for callers already inside the table lock.
    pub(crate) fn nice_locked(
        &self,
        inner: &mut TableInner,
        caller: Pid,
        target: Pid,
        delta: i32,
    ) -> ExecResult<i32> {
        let now = self.now();
        let Some(target_idx) = inner.index_of(target) else {
            log::debug!("nice: no record for {target}");
            return Err(ExecError::NotFound);
        };

        if delta == 0 {
            return Ok(inner.slots()[target_idx].nice);
        }

        let new_nice = (inner.slots()[target_idx].nice + delta).clamp(NICE_MIN, NICE_MAX);
        inner.slot_mut(target_idx).nice = new_nice;

        if inner.slots()[target_idx].state() == ProcState::Runnable {
            // Lowest nice among the caller and every other Runnable process.
            let mut min = inner.proc(caller).map(|p| p.nice).unwrap_or(NICE_MAX);
            for p in inner.slots() {
                if p.pid != target && p.state() == ProcState::Runnable {
                    min = min.min(p.nice);
                }
            }

            let caller_running = inner
                .proc(caller)
                .map(|p| p.state() == ProcState::Running)
                .unwrap_or(false);

            if new_nice < min && caller_running {
                log::debug!("nice: {target} now leads at {new_nice}; {caller} yields");
                if let Some(p) = inner.proc_mut(caller) {
                    p.set_state(ProcState::Runnable, now);
                }
                self.sched_locked(inner, caller);
            }
        }

        Ok(new_nice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture, spawn_running, Fixture};

    fn spawn_runnable(table: &ProcTable, name: &str, nice: i32) -> Pid {
        let pid = table.allocate(name).unwrap();
        let mut inner = table.lock();
        let p = inner.proc_mut(pid).unwrap();
        p.nice = nice;
        p.set_state(ProcState::Runnable, 0);
        pid
    }

    #[test]
    fn zero_delta_reads_without_writing() {
        let Fixture { table, .. } = fixture();
        let caller = spawn_running(&table, "caller");
        let target = spawn_runnable(&table, "target", 20);

        assert_eq!(table.nice(caller, target, 0), Ok(20));
        assert_eq!(table.lock().proc(target).unwrap().nice, 20);
    }

    #[test]
    fn adjustments_clamp_to_the_valid_range() {
        let Fixture { table, .. } = fixture();
        let caller = spawn_running(&table, "caller");
        let target = spawn_running(&table, "target");

        assert_eq!(table.nice(caller, target, 1000), Ok(NICE_MAX));
        assert_eq!(table.nice(caller, target, -1000), Ok(NICE_MIN));
    }

    #[test]
    fn unknown_target_is_an_error() {
        let Fixture { table, .. } = fixture();
        let caller = spawn_running(&table, "caller");
        assert_eq!(
            table.nice(caller, Pid::from_raw(404), -1),
            Err(ExecError::NotFound)
        );
    }

    #[test]
    fn boosting_a_runnable_target_past_everyone_preempts_the_caller() {
        let Fixture {
            table, platform, ..
        } = fixture();
        let caller = spawn_running(&table, "caller");
        let target = spawn_runnable(&table, "target", 20);
        let _other = spawn_runnable(&table, "other", 10);

        // While the caller is parked, the scheduler side re-dispatches it.
        platform.script(move |inner| {
            assert_eq!(inner.proc(caller).unwrap().state(), ProcState::Runnable);
            inner
                .proc_mut(caller)
                .unwrap()
                .set_state(ProcState::Running, 0);
        });

        // Target drops to 2, below the caller (15) and the other Runnable
        // process (10), so the caller steps aside.
        assert_eq!(table.nice(caller, target, -18), Ok(2));
        assert_eq!(platform.switches(), 1);
        assert_eq!(
            table.lock().proc(caller).unwrap().state(),
            ProcState::Running
        );
    }

    #[test]
    fn no_preemption_when_the_target_stays_behind() {
        let Fixture {
            table, platform, ..
        } = fixture();
        let caller = spawn_running(&table, "caller");
        let target = spawn_runnable(&table, "target", 20);
        let _other = spawn_runnable(&table, "other", 10);

        // 20 -> 12 still trails the other Runnable process at 10.
        assert_eq!(table.nice(caller, target, -8), Ok(12));
        assert_eq!(platform.switches(), 0);
    }

    #[test]
    fn no_preemption_for_a_sleeping_target() {
        let Fixture {
            table, platform, ..
        } = fixture();
        let caller = spawn_running(&table, "caller");
        let target = spawn_running(&table, "target");
        {
            let mut inner = table.lock();
            let p = inner.proc_mut(target).unwrap();
            p.chan = Some(crate::Channel::Resource(1));
            p.set_state(ProcState::Sleeping, 0);
        }

        assert_eq!(table.nice(caller, target, -15), Ok(0));
        assert_eq!(platform.switches(), 0);
    }
}
