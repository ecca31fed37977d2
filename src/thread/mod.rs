//! Tasks and the task table.
//!
//! ## The threading model
//!
//! Every schedulable entity is a [`Task`] living in a slot of the central
//! [`TaskTable`]. A task is either the *master* of a thread group or a
//! lightweight thread belonging to some master's group. Only masters are
//! queued in the disciplines; threads are reached through their master's
//! [`ThreadGroup`].
//!
//! Tasks are named by [`Tid`] handles instead of references. A handle carries
//! the generation of the slot it was issued for, so once a slot is reaped and
//! reused every old handle stops resolving.
//!
//! [`ThreadGroup`]: group::ThreadGroup
pub mod group;
pub mod scheduler;

use crate::{KernelError, NPROC};
use arrayvec::ArrayString;
use bitflags::bitflags;
use core::fmt;
use group::ThreadGroup;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Handle of a task.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Tid {
    index: u32,
    generation: u32,
}

impl Tid {
    /// Creates a handle of the slot `index` at `generation`.
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// The slot of the task table.
    #[inline]
    pub const fn index(&self) -> usize {
        self.index as usize
    }

    /// How many times the slot was handed out.
    #[inline]
    pub const fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.index, self.generation)
    }
}

/// A possible state of the task.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum TaskState {
    /// The slot is free.
    Unused,
    /// Allocated; the execution context is not ready yet.
    Embryo,
    /// Blocked until a wakeup.
    Sleeping,
    /// Ready to run.
    Runnable,
    /// Running on some CPU.
    Running,
    /// Exited; waiting to be reaped.
    Zombie,
}

/// The scheduling discipline governing a thread group.
///
/// Encoded as a `usize`; decoding an unknown value fails.
#[derive(Clone, Copy, Eq, PartialEq, Debug, IntoPrimitive, TryFromPrimitive)]
#[repr(usize)]
pub enum Discipline {
    /// Multi-level feedback queue.
    Mlfq = 0,
    /// Stride scheduling.
    Stride = 1,
}

impl Default for Discipline {
    fn default() -> Self {
        Discipline::Mlfq
    }
}

impl Discipline {
    /// The other discipline.
    pub fn other(self) -> Self {
        match self {
            Discipline::Mlfq => Discipline::Stride,
            Discipline::Stride => Discipline::Mlfq,
        }
    }
}

bitflags! {
    /// Flags of a task.
    pub struct TaskFlags: u8 {
        /// The task gave up the CPU voluntarily since its last accounting.
        const YIELDED = 1 << 0;
        /// The task was killed and exits at its next checkpoint.
        const KILLED = 1 << 1;
        /// The group is dispatched on some CPU. Only set on masters.
        const ON_CPU = 1 << 2;
    }
}

/// Scheduling metadata of a task. Only meaningful for masters.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Default)]
pub struct SchedMeta {
    /// The discipline serving the group.
    pub discipline: Discipline,
    /// MLFQ level.
    pub level: usize,
    /// Ticks accumulated at the current level.
    pub execution_ticks: u64,
    /// Tick of the last dispatch of the group.
    pub last_scheduled_tick: u64,
}

/// A task.
#[derive(Clone, Debug)]
pub struct Task {
    /// Handle of this task.
    pub tid: Tid,
    /// Name, truncated to 16 bytes.
    pub name: ArrayString<16>,
    /// Lifecycle state.
    pub state: TaskState,
    /// Flags.
    pub flags: TaskFlags,
    /// Scheduling metadata.
    pub meta: SchedMeta,
    /// Master of the group the task belongs to. A master is its own master.
    pub master: Tid,
}

impl Task {
    fn vacant(index: usize) -> Self {
        let tid = Tid::new(index as u32, 0);
        Self {
            tid,
            name: ArrayString::new(),
            state: TaskState::Unused,
            flags: TaskFlags::empty(),
            meta: SchedMeta::default(),
            master: tid,
        }
    }

    /// Returns true if the task is the master of its group.
    #[inline]
    pub fn is_master(&self) -> bool {
        self.master == self.tid
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?} {}", self.tid, self.state, self.name)?;
        if self.is_master() {
            write!(
                f,
                " {:?} level {} ticks {}",
                self.meta.discipline, self.meta.level, self.meta.execution_ticks
            )?;
        } else {
            write!(f, " in {}", self.master)?;
        }
        if self.flags.contains(TaskFlags::KILLED) {
            write!(f, " killed")?;
        }
        Ok(())
    }
}

/// The central table owning every task and every thread group.
pub struct TaskTable {
    tasks: [Task; NPROC],
    groups: [ThreadGroup; NPROC],
}

impl Default for TaskTable {
    fn default() -> Self {
        Self::new()
    }
}

fn runnable(tasks: &[Task; NPROC], tid: Tid) -> bool {
    let task = &tasks[tid.index()];
    task.tid == tid && task.state == TaskState::Runnable
}

impl TaskTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            tasks: core::array::from_fn(Task::vacant),
            groups: core::array::from_fn(|_| ThreadGroup::default()),
        }
    }

    /// Allocates an Embryo task.
    ///
    /// Without `master`, the task is a master with a fresh group of its own.
    /// Otherwise it joins the group of `master`.
    ///
    /// # Errors
    ///
    /// - [`KernelError::NoSpace`]: no free slot, or the group is full.
    /// - [`KernelError::NoSuchTask`]: `master` is not a live master.
    pub fn alloc(&mut self, name: &str, master: Option<Tid>) -> Result<Tid, KernelError> {
        if let Some(master) = master {
            let task = self.get(master).ok_or(KernelError::NoSuchTask)?;
            if !task.is_master() || task.state == TaskState::Zombie {
                return Err(KernelError::NoSuchTask);
            }
        }
        let index = self
            .tasks
            .iter()
            .position(|task| task.state == TaskState::Unused)
            .ok_or(KernelError::NoSpace)?;
        let tid = Tid::new(index as u32, self.tasks[index].tid.generation.wrapping_add(1));
        match master {
            Some(master) => self.groups[master.index()].join(tid)?,
            None => self.groups[index].reset(tid),
        }

        let task = &mut self.tasks[index];
        task.tid = tid;
        task.name.clear();
        for c in name.chars() {
            if task.name.try_push(c).is_err() {
                break;
            }
        }
        task.state = TaskState::Embryo;
        task.flags = TaskFlags::empty();
        task.meta = SchedMeta::default();
        task.master = master.unwrap_or(tid);
        Ok(tid)
    }

    /// Releases the slot of `tid`. A master's group is emptied, a thread
    /// leaves its group.
    pub fn free(&mut self, tid: Tid) {
        let Some(task) = self.get(tid) else {
            return;
        };
        let master = task.master;
        if master == tid {
            self.groups[tid.index()].clear();
        } else {
            self.groups[master.index()].leave(tid);
        }
        let task = &mut self.tasks[tid.index()];
        task.state = TaskState::Unused;
        task.flags = TaskFlags::empty();
    }

    /// The task `tid` refers to, if it is still alive.
    pub fn get(&self, tid: Tid) -> Option<&Task> {
        self.tasks
            .get(tid.index())
            .filter(|task| task.tid == tid && task.state != TaskState::Unused)
    }

    /// The task `tid` refers to, if it is still alive.
    pub fn get_mut(&mut self, tid: Tid) -> Option<&mut Task> {
        self.tasks
            .get_mut(tid.index())
            .filter(|task| task.tid == tid && task.state != TaskState::Unused)
    }

    /// State of `tid`.
    pub fn state(&self, tid: Tid) -> Option<TaskState> {
        self.get(tid).map(|task| task.state)
    }

    /// Updates the state of `tid`.
    ///
    /// # Errors
    ///
    /// [`KernelError::NoSuchTask`] when `tid` is stale.
    pub fn set_state(&mut self, tid: Tid, state: TaskState) -> Result<(), KernelError> {
        self.get_mut(tid).ok_or(KernelError::NoSuchTask)?.state = state;
        Ok(())
    }

    /// Master of the group of `tid`.
    pub fn master_of(&self, tid: Tid) -> Option<Tid> {
        self.get(tid).map(|task| task.master)
    }

    /// Returns true if `tid` or its master was killed.
    pub fn is_killed(&self, tid: Tid) -> bool {
        let Some(task) = self.get(tid) else {
            return false;
        };
        task.flags.contains(TaskFlags::KILLED)
            || self
                .get(task.master)
                .is_some_and(|master| master.flags.contains(TaskFlags::KILLED))
    }

    /// Returns true if `tid` is Runnable.
    pub fn is_runnable(&self, tid: Tid) -> bool {
        runnable(&self.tasks, tid)
    }

    /// The group anchored at `master`.
    pub fn group(&self, master: Tid) -> Option<&ThreadGroup> {
        self.get(master)
            .filter(|task| task.is_master())
            .map(|_| &self.groups[master.index()])
    }

    /// Returns true if the group of `master` can be dispatched: no CPU runs
    /// it and some member is Runnable.
    pub fn has_runnable(&self, master: Tid) -> bool {
        if self.is_on_cpu(master) {
            return false;
        }
        self.group(master)
            .and_then(|group| group.peek(|tid| runnable(&self.tasks, tid)))
            .is_some()
    }

    /// Returns true if the group of `master` is dispatched on some CPU.
    pub fn is_on_cpu(&self, master: Tid) -> bool {
        self.get(master)
            .is_some_and(|task| task.flags.contains(TaskFlags::ON_CPU))
    }

    /// Picks the member of the group of `master` to run next.
    pub fn dispatch(&mut self, master: Tid) -> Option<Tid> {
        self.group(master)?;
        let Self { tasks, groups } = self;
        groups[master.index()].dispatch(|tid| runnable(tasks, tid))
    }

    /// Picks a runnable member of the group of `master` other than `from`,
    /// falling back to `from` itself.
    pub fn rotate(&mut self, master: Tid, from: Tid) -> Option<Tid> {
        self.group(master)?;
        let Self { tasks, groups } = self;
        groups[master.index()].rotate(from, |tid| runnable(tasks, tid))
    }

    /// Iterates over the live tasks.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks
            .iter()
            .filter(|task| task.state != TaskState::Unused)
    }

    /// Iterates over the live masters.
    pub fn masters(&self) -> impl Iterator<Item = &Task> {
        self.iter().filter(|task| task.is_master())
    }
}

impl fmt::Display for TaskTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for task in self.iter() {
            writeln!(f, "{}", task)?;
        }
        Ok(())
    }
}
