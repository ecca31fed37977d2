//! # KeOS scheduling core
//!
//! This crate decides, on every CPU, which thread runs next. It is consulted
//! on every timer tick and whenever the running thread gives up the CPU by
//! yielding, sleeping or exiting.
//!
//! Two scheduling disciplines are active at the same time:
//!
//! - A **multi-level feedback queue** ([`Mlfq`]) serves interactive and
//!   general purpose work. Tasks start at the highest priority level and are
//!   demoted as they burn their allotment. A periodic boost moves everyone
//!   back to the top so that nobody starves.
//! - A **stride scheduler** ([`StrideScheduler`]) serves tasks that reserved
//!   a fixed share of the CPU with `set_cpu_share`. Each task advances a
//!   virtual "pass" by `1 / tickets` whenever it runs, and the smallest pass
//!   runs next.
//!
//! A third stride scheduler, the [`MasterArbiter`], divides the CPU between
//! the two disciplines. The MLFQ bucket starts with every ticket; admitting a
//! task to the stride discipline moves tickets from the MLFQ bucket to the
//! stride bucket, and the MLFQ bucket never drops below a configured floor.
//!
//! The unit the disciplines schedule is a **thread group**: a master task and
//! the lightweight threads that share its address space. The group is
//! scheduled as one unit and round-robins among its members internally (see
//! [`ThreadGroup`]).
//!
//! ## Collaborators
//!
//! Task creation, address spaces, the context switch primitive and the timer
//! interrupt live outside of this crate. The per-CPU loop in
//! [`Scheduler::schedule_once`] reaches them through the [`Machine`] trait,
//! and the running thread reports back through the relinquish points
//! ([`Scheduler::yield_now`], [`Scheduler::sleep`], [`Scheduler::exit`],
//! [`Scheduler::timer_tick`]).
//!
//! ## Locking
//!
//! All scheduler state lives behind a single [`SpinLock`]. It is never held
//! across a context switch.
//!
//! [`Mlfq`]: sched::mlfq::Mlfq
//! [`StrideScheduler`]: sched::stride::StrideScheduler
//! [`MasterArbiter`]: sched::master::MasterArbiter
//! [`ThreadGroup`]: thread::group::ThreadGroup
//! [`Machine`]: thread::scheduler::Machine
//! [`Scheduler::schedule_once`]: thread::scheduler::Scheduler::schedule_once
//! [`Scheduler::yield_now`]: thread::scheduler::Scheduler::yield_now
//! [`Scheduler::sleep`]: thread::scheduler::Scheduler::sleep
//! [`Scheduler::exit`]: thread::scheduler::Scheduler::exit
//! [`Scheduler::timer_tick`]: thread::scheduler::Scheduler::timer_tick
//! [`SpinLock`]: sync::SpinLock

#![cfg_attr(not(test), no_std)]
#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

/// Halts the scheduler when `cond` does not hold.
///
/// Used for states that can only be reached through a logic error: a task
/// missing from the queue it claims to be in, ticket totals that no longer add
/// up, or a full structure whose capacity is supposed to cover every task.
#[macro_export]
macro_rules! invariant {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::halt!($($arg)+);
        }
    };
}

/// Halts the scheduler unconditionally. See [`invariant!`].
#[macro_export]
macro_rules! halt {
    ($($arg:tt)+) => {
        $crate::__halt(format_args!($($arg)+), core::panic::Location::caller())
    };
}

pub mod config;
pub mod sched;
pub mod sync;
pub mod syscall;
pub mod thread;

pub use config::SchedConfig;
pub use thread::{
    Discipline, TaskState, Tid,
    scheduler::{LoopState, Machine, Relinquish, Scheduler, Shares, Switch, SwitchKind, TaskInfo},
};

use core::sync::atomic::{AtomicBool, Ordering};

/// The maximum number of CPUs the scheduler serves.
pub const MAX_CPU: usize = 8;
/// The maximum number of tasks alive at once.
pub const NPROC: usize = 64;
/// The maximum number of members in a thread group, the master included.
pub const NTHREAD: usize = 16;
/// The number of MLFQ priority levels.
pub const NLEVEL: usize = 3;
/// Upper bound of any ticket pool.
pub const STRIDE_MAX_TICKET: usize = 100;

/// Enum representing errors that can occur during a scheduling operation.
///
/// These errors are returned to the caller, and eventually to the user
/// program through [`KernelError::into_usize`]. Broken scheduler invariants
/// are not errors: they halt the kernel through [`invariant!`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum KernelError {
    /// Operation is not permitted. (EPERM)
    OperationNotPermitted,
    /// No such task. (ESRCH)
    NoSuchTask,
    /// The requested share cannot be granted right now. (EAGAIN)
    ShareUnavailable,
    /// Device or resource busy. (EBUSY)
    Busy,
    /// Entry already exists. (EEXIST)
    AlreadyExists,
    /// Invalid argument. (EINVAL)
    InvalidArgument,
    /// No space left in a fixed-capacity table. (ENOSPC)
    NoSpace,
    /// Invalid system call number. (ENOSYS)
    NoSuchSyscall,
    /// No such entry. (ENOENT)
    NoSuchEntry,
    /// Operation is not supported. (ENOTSUPP)
    NotSupportedOperation,
}

impl KernelError {
    /// Converts the [`KernelError`] enum into a corresponding `usize` error
    /// code, as returned to the user program.
    pub fn into_usize(self) -> usize {
        (match self {
            KernelError::OperationNotPermitted => -1isize,
            KernelError::NoSuchEntry => -2,
            KernelError::NoSuchTask => -3,
            KernelError::ShareUnavailable => -11,
            KernelError::Busy => -16,
            KernelError::AlreadyExists => -17,
            KernelError::InvalidArgument => -22,
            KernelError::NoSpace => -28,
            KernelError::NoSuchSyscall => -38,
            KernelError::NotSupportedOperation => -524,
        }) as usize
    }
}

/// The given `isize` does not indicate an [`KernelError`].
#[derive(Debug, Eq, PartialEq)]
pub struct TryFromError {
    e: isize,
}

impl TryFrom<isize> for KernelError {
    type Error = TryFromError;

    fn try_from(value: isize) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Self::OperationNotPermitted),
            -2 => Ok(Self::NoSuchEntry),
            -3 => Ok(Self::NoSuchTask),
            -11 => Ok(Self::ShareUnavailable),
            -16 => Ok(Self::Busy),
            -17 => Ok(Self::AlreadyExists),
            -22 => Ok(Self::InvalidArgument),
            -28 => Ok(Self::NoSpace),
            -38 => Ok(Self::NoSuchSyscall),
            -524 => Ok(Self::NotSupportedOperation),
            e => Err(TryFromError { e }),
        }
    }
}

/// Set once a scheduler invariant failed.
///
/// Lock guards consult it so that unwinding out of a critical section does
/// not turn into a double panic.
pub static PANICKING: AtomicBool = AtomicBool::new(false);

/// Reports a violated invariant and panics. Use [`invariant!`] instead.
#[doc(hidden)]
pub fn __halt(args: core::fmt::Arguments<'_>, location: &'static core::panic::Location<'static>) -> ! {
    PANICKING.store(true, Ordering::SeqCst);
    log::error!("scheduler invariant violated at {}: {}", location, args);
    panic!("scheduler invariant violated: {}", args);
}
