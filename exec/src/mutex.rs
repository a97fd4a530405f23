//! # Mutex Pool
//!
//! A fixed pool of counting locks with FIFO hand-off and priority donation.
//! A blocked acquirer that is more urgent than the holder donates its `nice`
//! to the holder for the duration of the hold; release restores the holder's
//! original value and wakes exactly the head of the wait queue, which sleeps
//! on its own process identity.
//!
//! Ownership is not verified: any process may release any held mutex. The
//! donation bookkeeping assumes the releasing process is the holder.

use crate::process::Channel;
use crate::table::ProcTable;
#[cfg(test)]
use crate::table::TableInner;
use crate::{ExecError, ExecResult, Pid, NMUTEX, NPROC};
use alloc::vec::Vec;
use heapless::Deque;
use spin::Mutex;

/// Index into the pool, handed out by [`MutexPool::create`].
pub type MutexHandle = usize;

struct MutexSlot {
    used: bool,
    /// Counting value: 1 free, 0 held, negative while processes wait.
    value: i32,
    /// Blocked acquirers in arrival order.
    queue: Deque<Pid, NPROC>,
    /// Last process to complete an acquire.
    holder: Option<Pid>,
    /// The holder's nice as last written by the donation bookkeeping.
    curnice: i32,
    /// The holder's nice at acquire time, restored on release.
    orinice: i32,
}

impl MutexSlot {
    const fn vacant() -> Self {
        Self {
            used: false,
            value: 0,
            queue: Deque::new(),
            holder: None,
            curnice: 0,
            orinice: 0,
        }
    }
}

/// The pool of [`NMUTEX`] mutex records, each behind its own lock.
///
/// Lock order is always mutex record first, then the process table.
pub struct MutexPool {
    slots: Vec<Mutex<MutexSlot>>,
}

impl MutexPool {
    /// Create a pool of vacant records.
    pub fn new() -> Self {
        Self {
            slots: (0..NMUTEX).map(|_| Mutex::new(MutexSlot::vacant())).collect(),
        }
    }

    fn slot(&self, handle: MutexHandle) -> ExecResult<&Mutex<MutexSlot>> {
        self.slots.get(handle).ok_or(ExecError::InvalidHandle)
    }

    /// Claim a vacant record and return its handle.
    pub fn create(&self) -> ExecResult<MutexHandle> {
        for (handle, lk) in self.slots.iter().enumerate() {
            let mut s = lk.lock();
            if !s.used {
                *s = MutexSlot::vacant();
                s.used = true;
                s.value = 1;
                log::debug!("mutex {handle} created");
                return Ok(handle);
            }
        }
        Err(ExecError::PoolExhausted)
    }

    /// Return a record to the pool. Waiters, if any, are abandoned.
    pub fn destroy(&self, handle: MutexHandle) -> ExecResult<()> {
        let mut s = self.slot(handle)?.lock();
        if !s.used {
            return Err(ExecError::InvalidHandle);
        }
        *s = MutexSlot::vacant();
        log::debug!("mutex {handle} destroyed");
        Ok(())
    }

    /// Acquire the mutex for `caller`, blocking if it is held.
    ///
    /// A more-urgent blocked caller donates its nice to the holder before
    /// sleeping, so the holder cannot be starved out from under the lock by
    /// intermediate-priority processes.
    pub fn acquire(&self, table: &ProcTable, caller: Pid, handle: MutexHandle) -> ExecResult<()> {
        let lk = self.slot(handle)?;
        let mut s = lk.lock();
        if !s.used {
            return Err(ExecError::InvalidHandle);
        }

        s.value -= 1;
        if s.value < 0 {
            if s.queue.push_back(caller).is_err() {
                panic!("mutex {handle}: waiter queue overflow");
            }
            let caller_nice = table.nice(caller, caller, 0)?;
            if let Some(holder) = s.holder {
                if s.curnice > caller_nice {
                    s.curnice = table.nice(caller, holder, caller_nice - s.curnice)?;
                    log::info!(
                        "mutex {handle}: {caller} donates nice {} to holder {holder}",
                        s.curnice
                    );
                }
            }
            // Sleep on our own identity so the hand-off wakes exactly us.
            s = table.sleep_on(caller, Channel::Proc(caller), lk, s);
        }

        let nice = table.nice(caller, caller, 0)?;
        s.holder = Some(caller);
        s.curnice = nice;
        s.orinice = nice;
        Ok(())
    }

    /// Release the mutex, waking the longest-waiting acquirer if any, and
    /// undo any outstanding donation to the holder.
    pub fn release(&self, table: &ProcTable, caller: Pid, handle: MutexHandle) -> ExecResult<()> {
        let mut s = self.slot(handle)?.lock();
        if !s.used {
            return Err(ExecError::InvalidHandle);
        }

        s.value += 1;
        if s.value <= 0 {
            if let Some(waiter) = s.queue.pop_front() {
                table.wakeup(Channel::Proc(waiter));
            }
        }

        if s.orinice > s.curnice {
            if let Some(holder) = s.holder {
                table.nice(caller, holder, s.orinice - s.curnice)?;
                log::info!("mutex {handle}: holder {holder} restored to nice {}", s.orinice);
                s.curnice = s.orinice;
            }
        }
        Ok(())
    }

    /// [`MutexPool::release`] for a context already inside the table lock.
    #[cfg(test)]
    pub(crate) fn release_locked(
        &self,
        table: &ProcTable,
        inner: &mut TableInner,
        caller: Pid,
        handle: MutexHandle,
    ) -> ExecResult<()> {
        let mut s = self.slot(handle)?.lock();
        if !s.used {
            return Err(ExecError::InvalidHandle);
        }

        s.value += 1;
        if s.value <= 0 {
            if let Some(waiter) = s.queue.pop_front() {
                inner.wakeup_locked(Channel::Proc(waiter), table.now());
            }
        }

        if s.orinice > s.curnice {
            if let Some(holder) = s.holder {
                table.nice_locked(inner, caller, holder, s.orinice - s.curnice)?;
                s.curnice = s.orinice;
            }
        }
        Ok(())
    }
}

impl Default for MutexPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcState;
    use crate::testing::{fixture, spawn_running, Fixture};
    use std::sync::Arc;

    #[test]
    fn create_hands_out_distinct_handles_until_the_pool_is_empty() {
        let pool = MutexPool::new();
        let mut handles = Vec::new();
        for _ in 0..NMUTEX {
            handles.push(pool.create().unwrap());
        }
        handles.sort_unstable();
        handles.dedup();
        assert_eq!(handles.len(), NMUTEX);

        assert_eq!(pool.create(), Err(ExecError::PoolExhausted));
    }

    #[test]
    fn destroy_returns_the_record_to_the_pool() {
        let pool = MutexPool::new();
        for _ in 0..NMUTEX {
            pool.create().unwrap();
        }
        pool.destroy(42).unwrap();
        assert_eq!(pool.create(), Ok(42));
    }

    #[test]
    fn stale_and_out_of_range_handles_are_rejected() {
        let Fixture { table, .. } = fixture();
        let pid = spawn_running(&table, "p");
        let pool = MutexPool::new();

        assert_eq!(pool.destroy(NMUTEX), Err(ExecError::InvalidHandle));
        assert_eq!(pool.acquire(&table, pid, 0), Err(ExecError::InvalidHandle));
        assert_eq!(pool.release(&table, pid, 0), Err(ExecError::InvalidHandle));

        let h = pool.create().unwrap();
        pool.destroy(h).unwrap();
        assert_eq!(pool.acquire(&table, pid, h), Err(ExecError::InvalidHandle));
    }

    #[test]
    fn uncontended_acquire_and_release_keep_the_books() {
        let Fixture { table, .. } = fixture();
        let pid = spawn_running(&table, "p");
        let pool = MutexPool::new();
        let h = pool.create().unwrap();

        pool.acquire(&table, pid, h).unwrap();
        {
            let s = pool.slots[h].lock();
            assert_eq!(s.value, 0);
            assert_eq!(s.holder, Some(pid));
            assert_eq!(s.curnice, crate::NICE_DEFAULT);
            assert_eq!(s.orinice, crate::NICE_DEFAULT);
        }

        pool.release(&table, pid, h).unwrap();
        let s = pool.slots[h].lock();
        assert_eq!(s.value, 1);
        assert!(s.queue.is_empty());
    }

    #[test]
    fn blocked_acquire_donates_and_the_handoff_restores() {
        let Fixture {
            table, platform, ..
        } = fixture();
        let pool = Arc::new(MutexPool::new());
        let h = pool.create().unwrap();

        // a holds the mutex at nice 20; b arrives at nice 5.
        let a = spawn_running(&table, "a");
        table.lock().proc_mut(a).unwrap().nice = 20;
        pool.acquire(&table, a, h).unwrap();

        let b = spawn_running(&table, "b");
        table.lock().proc_mut(b).unwrap().nice = 5;

        let script_pool = pool.clone();
        let script_table = table.clone();
        platform.script(move |inner| {
            // b donated before sleeping: the holder now runs at b's urgency.
            assert_eq!(inner.proc(a).unwrap().nice, 5);
            assert_eq!(inner.proc(b).unwrap().state(), ProcState::Sleeping);

            // a finishes its critical section and releases.
            script_pool
                .release_locked(&script_table, inner, a, h)
                .unwrap();
            assert_eq!(inner.proc(a).unwrap().nice, 20);
            assert_eq!(inner.proc(b).unwrap().state(), ProcState::Runnable);
            inner.proc_mut(b).unwrap().set_state(ProcState::Running, 0);
        });

        pool.acquire(&table, b, h).unwrap();
        assert_eq!(platform.switches(), 1);

        let s = pool.slots[h].lock();
        assert_eq!(s.value, 0);
        assert_eq!(s.holder, Some(b));
        assert_eq!(s.curnice, 5);
        assert_eq!(s.orinice, 5);
        drop(s);
        assert_eq!(table.lock().proc(a).unwrap().nice, 20);
    }

    #[test]
    fn handoff_is_first_come_first_served() {
        let Fixture { table, .. } = fixture();
        let pool = MutexPool::new();
        let h = pool.create().unwrap();

        let a = spawn_running(&table, "a");
        pool.acquire(&table, a, h).unwrap();

        // Two waiters queued in arrival order, parked on their identities.
        let b = spawn_running(&table, "b");
        let c = spawn_running(&table, "c");
        {
            let mut s = pool.slots[h].lock();
            s.value -= 2;
            s.queue.push_back(b).unwrap();
            s.queue.push_back(c).unwrap();
        }
        {
            let mut inner = table.lock();
            for pid in [b, c] {
                let p = inner.proc_mut(pid).unwrap();
                p.chan = Some(Channel::Proc(pid));
                p.set_state(ProcState::Sleeping, 0);
            }
        }

        pool.release(&table, a, h).unwrap();
        {
            let inner = table.lock();
            assert_eq!(inner.proc(b).unwrap().state(), ProcState::Runnable);
            assert_eq!(inner.proc(c).unwrap().state(), ProcState::Sleeping);
        }

        pool.release(&table, a, h).unwrap();
        let inner = table.lock();
        assert_eq!(inner.proc(c).unwrap().state(), ProcState::Runnable);
    }

    #[test]
    fn no_donation_from_a_less_urgent_waiter() {
        let Fixture {
            table, platform, ..
        } = fixture();
        let pool = MutexPool::new();
        let h = pool.create().unwrap();

        // The holder is already the more urgent of the two.
        let a = spawn_running(&table, "a");
        table.lock().proc_mut(a).unwrap().nice = 5;
        pool.acquire(&table, a, h).unwrap();

        let b = spawn_running(&table, "b");
        table.lock().proc_mut(b).unwrap().nice = 20;

        platform.script(move |inner| {
            assert_eq!(inner.proc(a).unwrap().nice, 5);
            inner.wakeup_locked(Channel::Proc(b), 0);
            inner.proc_mut(b).unwrap().set_state(ProcState::Running, 0);
        });

        pool.acquire(&table, b, h).unwrap();
        assert_eq!(table.lock().proc(a).unwrap().nice, 5);
    }
}
