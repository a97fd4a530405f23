//! # Platform Collaborators
//!
//! The external interfaces this core consumes: execution-context capture and
//! transfer, address spaces, kernel stacks, and per-process resource
//! duplication. The core treats all of them as opaque; a real port backs
//! them with assembly and page tables, the test suite backs them with stubs.

use crate::table::TableInner;
use crate::{CpuId, ExecResult, Pid};

/// Opaque execution-context handle.
///
/// The platform decides what the value means; the core only stores it in the
/// process record and passes it to [`Platform::switch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context(pub u64);

/// Opaque address-space handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddrSpace(pub u64);

/// External collaborator interface.
///
/// Context transfer is atomic from the core's perspective: [`Platform::switch`]
/// is called while the process-table lock is held, and the flow that resumes
/// on the other side inherits that critical section. The locked table state is
/// passed through so the receiving side (the scheduler loop, or a test
/// script standing in for it) can act inside the same critical section.
pub trait Platform: Send + Sync {
    /// Build a fresh execution context whose first resumption lands in the
    /// fork-return entry point. Allocates the kernel stack backing it.
    fn prepare_context(&self, pid: Pid) -> ExecResult<Context>;

    /// Release a context and its kernel stack.
    fn drop_context(&self, ctx: Context);

    /// The scheduling context of a processing unit.
    fn scheduler_context(&self, cpu: CpuId) -> Context;

    /// Transfer control from `from` to `to`. Returns when `from` is next
    /// dispatched. Called with the process table locked; see the trait docs.
    fn switch(&self, from: Context, to: Context, table: &mut TableInner);

    /// Create an empty address space.
    fn new_address_space(&self) -> ExecResult<AddrSpace>;

    /// Duplicate an address space (fork).
    fn dup_address_space(&self, from: AddrSpace) -> ExecResult<AddrSpace>;

    /// Destroy an address space.
    fn destroy_address_space(&self, aspace: AddrSpace);

    /// Install a process address space on the current CPU.
    fn activate_address_space(&self, aspace: AddrSpace);

    /// Switch the current CPU back to the kernel address space.
    fn activate_kernel_space(&self);

    /// Duplicate the parent's open resources (files, working directory)
    /// into the child. Reference-counted; opaque to this core.
    fn dup_resources(&self, parent: Pid, child: Pid);

    /// Release every open resource of a process.
    fn release_resources(&self, pid: Pid);

    /// Enable interrupts on the current CPU.
    fn enable_interrupts(&self) {}

    /// Idle the current CPU until the next interrupt.
    fn wait_for_interrupt(&self) {}
}
