//! Scheduling system calls.
//!
//! User programs reach the scheduler through three system calls:
//!
//! | Number | Name            | Argument        | Returns                      |
//! |--------|-----------------|-----------------|------------------------------|
//! | 1      | `yield`         |                 | 0                            |
//! | 2      | `getlev`        |                 | MLFQ level of the caller     |
//! | 3      | `set_cpu_share` | tickets         | 0                            |
//!
//! The kernel decodes the system call number and argument from the registers
//! into a [`SyscallFrame`] and calls [`Scheduler::syscall`]. On failure the
//! return value is the error code of [`KernelError::into_usize`].

use crate::{
    KernelError,
    thread::{
        Discipline,
        scheduler::{Relinquish, Scheduler},
    },
};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// System call numbers of the scheduler.
#[derive(Clone, Copy, Eq, PartialEq, Debug, IntoPrimitive, TryFromPrimitive)]
#[repr(usize)]
pub enum SchedSyscall {
    /// Give up the CPU.
    Yield = 1,
    /// Query the MLFQ level of the calling group.
    GetLevel = 2,
    /// Reserve a share of the CPU for the calling group.
    SetCpuShare = 3,
}

/// The arguments and the return value of a system call.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Default)]
pub struct SyscallFrame {
    /// The system call number.
    pub sysno: usize,
    /// First argument.
    pub arg1: usize,
    /// The value returned to the user program.
    pub ret: usize,
}

impl SyscallFrame {
    /// Creates a frame for system call `sysno` with `arg1`.
    pub fn new(sysno: usize, arg1: usize) -> Self {
        Self { sysno, arg1, ret: 0 }
    }

    /// Sets the return value: the value itself on success, the error code of
    /// [`KernelError::into_usize`] otherwise.
    pub fn set_return_value(&mut self, return_val: Result<usize, KernelError>) {
        self.ret = match return_val {
            Ok(value) => value,
            Err(e) => e.into_usize(),
        };
    }
}

impl Scheduler {
    /// Serves a scheduling system call issued by the thread running on `cpu`.
    ///
    /// The return value is stored into `frame`. The returned [`Relinquish`]
    /// tells the caller what to do before returning to the user program.
    pub fn syscall(&self, cpu: usize, frame: &mut SyscallFrame) -> Relinquish {
        let mut relinquish = Relinquish::Continue;
        let result = match SchedSyscall::try_from(frame.sysno) {
            Ok(SchedSyscall::Yield) => {
                relinquish = self.yield_now(cpu);
                Ok(0)
            }
            Ok(SchedSyscall::GetLevel) => self.get_level(cpu),
            Ok(SchedSyscall::SetCpuShare) => self
                .current(cpu)
                .ok_or(KernelError::NoSuchTask)
                .and_then(|tid| self.admit_share(tid, frame.arg1))
                .map(|_| 0),
            Err(_) => Err(KernelError::NoSuchSyscall),
        };
        frame.set_return_value(result);
        relinquish
    }

    fn get_level(&self, cpu: usize) -> Result<usize, KernelError> {
        let tid = self.current(cpu).ok_or(KernelError::NoSuchTask)?;
        let info = self.task_info(tid).ok_or(KernelError::NoSuchTask)?;
        match info.discipline {
            Discipline::Mlfq => Ok(info.level),
            Discipline::Stride => Err(KernelError::NotSupportedOperation),
        }
    }
}
