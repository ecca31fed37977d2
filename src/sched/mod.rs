//! Scheduling disciplines.
//!
//! The per-CPU loop does not know how a discipline picks or charges a thread
//! group. It talks to both through the [`Policy`] trait:
//!
//! - [`Mlfq`]: the multi-level feedback queue, default home of every group.
//! - [`StrideScheduler`]: proportional share, for groups that reserved a
//!   share of the CPU.
//!
//! The [`MasterArbiter`] decides which of the two serves each tick.
//!
//! [`Mlfq`]: mlfq::Mlfq
//! [`StrideScheduler`]: stride::StrideScheduler
//! [`MasterArbiter`]: master::MasterArbiter

pub mod heap;
pub mod master;
pub mod mlfq;
pub mod stride;

use crate::{
    NPROC,
    thread::{Discipline, TaskState, TaskTable, Tid},
};

/// The stride scheduler over thread groups.
pub type TaskStride = stride::StrideScheduler<Tid, NPROC>;

/// A scheduling discipline as seen by the scheduling loop.
///
/// Every method receives the task table, which holds the per-group
/// metadata the disciplines read and update.
pub trait Policy {
    /// The discipline this policy implements.
    fn discipline(&self) -> Discipline;

    /// Picks the group to run next, if any group has a runnable member. The
    /// group stays enrolled.
    fn pick(&mut self, tasks: &TaskTable) -> Option<Tid>;

    /// Charges the run of `master` from `start` to `end`. Returns whether
    /// the group is expired.
    fn account(&mut self, tasks: &mut TaskTable, master: Tid, start: u64, end: u64) -> bool;

    /// Removes `master` and returns the tickets it held. The group must be
    /// enrolled.
    fn evict(&mut self, tasks: &mut TaskTable, master: Tid) -> usize;
}

impl Policy for mlfq::Mlfq {
    fn discipline(&self) -> Discipline {
        Discipline::Mlfq
    }

    fn pick(&mut self, tasks: &TaskTable) -> Option<Tid> {
        self.top(tasks)
    }

    fn account(&mut self, tasks: &mut TaskTable, master: Tid, start: u64, end: u64) -> bool {
        self.next(tasks, master, start, end)
    }

    fn evict(&mut self, tasks: &mut TaskTable, master: Tid) -> usize {
        self.remove(tasks, master);
        0
    }
}

impl Policy for TaskStride {
    fn discipline(&self) -> Discipline {
        Discipline::Stride
    }

    fn pick(&mut self, tasks: &TaskTable) -> Option<Tid> {
        self.top_runnable(|master| tasks.has_runnable(master))
    }

    /// Stride groups run one quantum per selection, so they always expire.
    /// A killed or exited group is not charged.
    fn account(&mut self, tasks: &mut TaskTable, master: Tid, _start: u64, _end: u64) -> bool {
        let live = tasks
            .get(master)
            .is_some_and(|task| task.state != TaskState::Zombie);
        if live && !tasks.is_killed(master) {
            crate::invariant!(self.advance(master), "{} is missing from the stride heap", master);
        }
        true
    }

    fn evict(&mut self, _tasks: &mut TaskTable, master: Tid) -> usize {
        let Some(usage) = self.remove(master) else {
            crate::halt!("{} is missing from the stride heap", master);
        };
        usage
    }
}
