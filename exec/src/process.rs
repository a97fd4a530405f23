//! # Process Records
//!
//! The process control block and its state machine. A record is owned
//! exclusively by the table slot it occupies; state only ever changes through
//! [`Proc::set_state`], and only while the table lock is held.

use crate::platform::{AddrSpace, Context};
use crate::{CpuId, Pid, Tick, NICE_DEFAULT};
use alloc::string::String;
use bitflags::bitflags;

/// Process state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    /// Slot is free
    Unused,
    /// Slot is allocated but setup is incomplete
    Embryo,
    /// Ready to be dispatched
    Runnable,
    /// Currently on a CPU
    Running,
    /// Blocked on a channel
    Sleeping,
    /// Exited, waiting to be reaped
    Zombie,
}

impl ProcState {
    /// Short label used by the process listing.
    pub fn label(self) -> &'static str {
        match self {
            ProcState::Unused => "unused",
            ProcState::Embryo => "embryo",
            ProcState::Runnable => "runble",
            ProcState::Running => "run",
            ProcState::Sleeping => "sleep",
            ProcState::Zombie => "zombie",
        }
    }
}

/// Blocking-channel identifier.
///
/// A sleeping process is matched to a wakeup by channel equality. Sleeping on
/// one's own process identity narrows the broadcast primitive to a targeted
/// wake; the mutex hand-off and `wait` both rely on that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// A process identity (targeted wake).
    Proc(Pid),
    /// An arbitrary resource identity.
    Resource(u64),
}

bitflags! {
    /// Process flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProcFlags: u32 {
        /// Process should terminate at the next safe point
        const KILL_PENDING = 1 << 0;
    }
}

/// A process control block.
pub struct Proc {
    /// Process id; [`Pid::NONE`] while the slot is free.
    pub pid: Pid,
    /// Human-readable name.
    pub name: String,
    /// Current state. Mutated only by [`Proc::set_state`].
    state: ProcState,
    /// Static priority in `[NICE_MIN, NICE_MAX]`; lower is more urgent.
    pub nice: i32,
    /// Creating process; re-parented to init on exit. Never owning.
    pub parent: Option<Pid>,
    /// Blocking channel; meaningful only while Sleeping.
    pub chan: Option<Channel>,
    /// Advisory flags.
    pub flags: ProcFlags,
    /// Creation tick.
    pub ctime: Tick,
    /// Tick the current state began.
    pub sstime: Tick,
    /// Tick Zombie was entered.
    pub etime: Tick,
    /// Accumulated ticks spent Running.
    pub rutime: Tick,
    /// Accumulated ticks spent Runnable.
    pub retime: Tick,
    /// Accumulated ticks spent Sleeping.
    pub sltime: Tick,
    /// Execution context handle; interpreted by the platform.
    pub context: Context,
    /// Address space handle, if one has been attached.
    pub aspace: Option<AddrSpace>,
    /// CPU the process is bound to while Running.
    pub cpu: Option<CpuId>,
}

impl Proc {
    /// A free slot.
    pub fn unused() -> Self {
        Self {
            pid: Pid::NONE,
            name: String::new(),
            state: ProcState::Unused,
            nice: NICE_DEFAULT,
            parent: None,
            chan: None,
            flags: ProcFlags::empty(),
            ctime: 0,
            sstime: 0,
            etime: 0,
            rutime: 0,
            retime: 0,
            sltime: 0,
            context: Context(0),
            aspace: None,
            cpu: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> ProcState {
        self.state
    }

    /// Whether a kill is pending.
    pub fn killed(&self) -> bool {
        self.flags.contains(ProcFlags::KILL_PENDING)
    }

    /// The single authorized state mutator.
    ///
    /// Charges the ticks spent in the state being left to its accumulator and
    /// restamps `sstime`. Same-state transitions are no-ops so time is never
    /// double counted. Two edges are invariant violations and panic:
    /// Sleeping -> Running (a sleeper must be woken Runnable first) and
    /// Runnable -> Sleeping (only a Running process may choose to sleep).
    pub fn set_state(&mut self, to: ProcState, now: Tick) {
        let from = self.state;
        if from == to {
            return;
        }

        match from {
            ProcState::Sleeping => {
                if to == ProcState::Running {
                    panic!("set_state: illegal transition Sleeping -> Running");
                }
                self.sltime += now - self.sstime;
                self.sstime = now;
            }
            ProcState::Runnable => {
                if to == ProcState::Sleeping {
                    panic!("set_state: illegal transition Runnable -> Sleeping");
                }
                self.retime += now - self.sstime;
                self.sstime = now;
            }
            ProcState::Running => {
                self.rutime += now - self.sstime;
                self.sstime = now;
            }
            _ => {
                self.sstime = now;
            }
        }

        if to == ProcState::Zombie {
            self.etime = now;
        }
        self.state = to;
    }

    /// Aging-adjusted priority: `nice - waited_ticks / 20.0`.
    ///
    /// Linear aging makes a record more urgent the longer it has sat in its
    /// current state, which bounds starvation even without a `nice` change.
    pub fn effective_priority(&self, now: Tick) -> f64 {
        self.nice as f64 - (now - self.sstime) as f64 / crate::AGING_DIVISOR
    }

    /// Reset the record to a free slot.
    ///
    /// The reap path (Zombie -> Unused in `wait`) and the allocation rollback
    /// path both bypass [`Proc::set_state`]: a reclaimed slot carries no
    /// history.
    pub fn release_slot(&mut self) {
        *self = Self::unused();
    }
}
