//! Shared test fixtures: a stub platform and a pre-wired table.
//!
//! The stub's `switch` runs scripted closures against the locked table, which
//! lets a single-threaded test play the part of every other process while the
//! caller is suspended.

use crate::clock::TickCounter;
use crate::platform::{AddrSpace, Context, Platform};
use crate::process::ProcState;
use crate::table::{ProcTable, TableInner};
use crate::{CpuId, ExecError, ExecResult, Pid};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

type Script = Box<dyn FnMut(&mut TableInner) + Send>;

/// Platform stub. Context and address-space handles are opaque counters;
/// context transfer pops and runs the next script, if any.
pub struct StubPlatform {
    scripts: spin::Mutex<VecDeque<Script>>,
    switches: AtomicUsize,
    fail_context: AtomicBool,
    next_handle: AtomicU64,
}

impl StubPlatform {
    pub fn new() -> Self {
        Self {
            scripts: spin::Mutex::new(VecDeque::new()),
            switches: AtomicUsize::new(0),
            fail_context: AtomicBool::new(false),
            // Low handles are reserved for scheduler contexts.
            next_handle: AtomicU64::new(0x100),
        }
    }

    /// Queue a closure to run inside the next context transfer.
    pub fn script(&self, f: impl FnMut(&mut TableInner) + Send + 'static) {
        self.scripts.lock().push_back(Box::new(f));
    }

    /// Make the next `prepare_context` call fail.
    pub fn fail_next_context(&self) {
        self.fail_context.store(true, Ordering::SeqCst);
    }

    /// Number of context transfers performed so far.
    pub fn switches(&self) -> usize {
        self.switches.load(Ordering::SeqCst)
    }

    fn fresh(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for StubPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for StubPlatform {
    fn prepare_context(&self, _pid: Pid) -> ExecResult<Context> {
        if self.fail_context.swap(false, Ordering::SeqCst) {
            return Err(ExecError::OutOfMemory);
        }
        Ok(Context(self.fresh()))
    }

    fn drop_context(&self, _ctx: Context) {}

    fn scheduler_context(&self, cpu: CpuId) -> Context {
        Context(cpu as u64)
    }

    fn switch(&self, _from: Context, _to: Context, table: &mut TableInner) {
        self.switches.fetch_add(1, Ordering::SeqCst);
        // Pop before running so a script can trigger a nested switch.
        let script = self.scripts.lock().pop_front();
        if let Some(mut script) = script {
            script(table);
        }
    }

    fn new_address_space(&self) -> ExecResult<AddrSpace> {
        Ok(AddrSpace(self.fresh()))
    }

    fn dup_address_space(&self, _from: AddrSpace) -> ExecResult<AddrSpace> {
        Ok(AddrSpace(self.fresh()))
    }

    fn destroy_address_space(&self, _aspace: AddrSpace) {}

    fn activate_address_space(&self, _aspace: AddrSpace) {}

    fn activate_kernel_space(&self) {}

    fn dup_resources(&self, _parent: Pid, _child: Pid) {}

    fn release_resources(&self, _pid: Pid) {}
}

/// A table wired to a stub platform and a test-controlled clock.
pub struct Fixture {
    pub table: Arc<ProcTable>,
    pub clock: Arc<TickCounter>,
    pub platform: Arc<StubPlatform>,
}

pub fn fixture() -> Fixture {
    let clock = Arc::new(TickCounter::new());
    let platform = Arc::new(StubPlatform::new());
    let table = Arc::new(ProcTable::new(clock.clone(), platform.clone(), 2));
    Fixture {
        table,
        clock,
        platform,
    }
}

/// Allocate a record and walk it to Running on cpu 0.
pub fn spawn_running(table: &ProcTable, name: &str) -> Pid {
    let pid = table.allocate(name).unwrap();
    let now = table.now();
    let mut inner = table.lock();
    let p = inner.proc_mut(pid).unwrap();
    p.set_state(ProcState::Runnable, now);
    p.set_state(ProcState::Running, now);
    p.cpu = Some(0);
    pid
}
