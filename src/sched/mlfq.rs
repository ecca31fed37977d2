//! Multi-level feedback queue.
//!
//! Thread groups enter at level 0, the highest priority. A group that burns
//! the allotment of its level moves one level down; a group that uses up its
//! quantum, yields or sleeps goes to the tail of its level. Every
//! `boosting_period` ticks all groups are moved back to level 0 so that work
//! stuck at low levels cannot starve.
//!
//! Each level is a fixed [`MlfqQueue`] ring sized to hold every task at once.

use crate::{
    KernelError, NLEVEL, NPROC, SchedConfig,
    thread::{Discipline, SchedMeta, TaskFlags, TaskState, TaskTable, Tid},
};
use core::fmt;

/// Slots of a queue ring. One slot always stays empty.
const CAPACITY: usize = NPROC + 1;

/// A bounded FIFO ring of thread groups.
///
/// ```text
///        head            tail
///         ▼               ▼
///   ┌───┬───┬───┬───┬───┬───┬───┐
///   │   │ A │ B │ C │ D │   │   │
///   └───┴───┴───┴───┴───┴───┴───┘
///       dequeue         enqueue
/// ```
///
/// The ring holds at most `CAPACITY - 1` entries; `tail` never catches up
/// with `head` from behind.
#[derive(Debug)]
pub struct MlfqQueue {
    slots: [Option<Tid>; CAPACITY],
    /// The oldest entry.
    head: usize,
    /// The next free slot.
    tail: usize,
    len: usize,
}

impl Default for MlfqQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MlfqQueue {
    /// Creates an empty queue.
    pub const fn new() -> Self {
        Self {
            slots: [None; CAPACITY],
            head: 0,
            tail: 0,
            len: 0,
        }
    }

    /// Maximum number of entries.
    #[inline]
    pub const fn capacity(&self) -> usize {
        CAPACITY - 1
    }

    /// Number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the queue has no entry.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns true if another enqueue would fail.
    #[inline]
    pub fn is_full(&self) -> bool {
        (self.tail + 1) % CAPACITY == self.head
    }

    /// Appends `tid` at the tail.
    ///
    /// # Errors
    ///
    /// [`KernelError::NoSpace`] when the queue is full.
    pub fn enqueue(&mut self, tid: Tid) -> Result<(), KernelError> {
        if self.is_full() {
            return Err(KernelError::NoSpace);
        }
        self.slots[self.tail] = Some(tid);
        self.tail = (self.tail + 1) % CAPACITY;
        self.len += 1;
        Ok(())
    }

    /// Removes the entry at the head.
    ///
    /// # Errors
    ///
    /// [`KernelError::NoSuchEntry`] when the queue is empty.
    pub fn dequeue(&mut self) -> Result<Tid, KernelError> {
        if self.is_empty() {
            return Err(KernelError::NoSuchEntry);
        }
        let tid = self.slots[self.head].take().ok_or(KernelError::NoSuchEntry)?;
        self.head = (self.head + 1) % CAPACITY;
        self.len -= 1;
        Ok(tid)
    }

    /// The entry at the head.
    pub fn front(&self) -> Option<Tid> {
        if self.is_empty() {
            None
        } else {
            self.slots[self.head]
        }
    }

    /// Moves the head entry to the tail and returns it.
    pub fn rotate(&mut self) -> Option<Tid> {
        let tid = self.dequeue().ok()?;
        // Cannot fail: a slot was just freed.
        self.enqueue(tid).ok()?;
        Some(tid)
    }

    /// Iterates from head to tail.
    pub fn iter(&self) -> impl Iterator<Item = Tid> + '_ {
        (0..self.len).filter_map(move |offset| self.slots[(self.head + offset) % CAPACITY])
    }

    /// Returns true if `tid` is queued.
    pub fn contains(&self, tid: Tid) -> bool {
        self.iter().any(|t| t == tid)
    }
}

/// The multi-level feedback queue.
pub struct Mlfq {
    queues: [MlfqQueue; NLEVEL],
    quantum: [u64; NLEVEL],
    allotment: [u64; NLEVEL - 1],
    boosting_period: u64,
    next_boost: u64,
}

impl Mlfq {
    /// Creates an empty MLFQ tuned by `config`.
    pub fn new(config: &SchedConfig) -> Self {
        Self {
            queues: core::array::from_fn(|_| MlfqQueue::new()),
            quantum: config.quantum,
            allotment: config.allotment,
            boosting_period: config.boosting_period,
            next_boost: config.boosting_period,
        }
    }

    /// The queue of `level`.
    pub fn queue(&self, level: usize) -> &MlfqQueue {
        &self.queues[level]
    }

    /// Number of groups at `level`.
    pub fn size(&self, level: usize) -> usize {
        self.queues[level].len()
    }

    /// Number of groups at every level.
    pub fn len(&self) -> usize {
        self.queues.iter().map(MlfqQueue::len).sum()
    }

    /// Returns true if no group is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The level `tid` is queued at.
    pub fn level_of(&self, tid: Tid) -> Option<usize> {
        self.queues.iter().position(|queue| queue.contains(tid))
    }

    /// Quantum of `level`.
    pub fn quantum(&self, level: usize) -> u64 {
        self.quantum[level]
    }

    /// Tick of the next priority boost.
    pub fn next_boost(&self) -> u64 {
        self.next_boost
    }

    /// Appends `master` at the tail of `level`, records the level and clears
    /// the yield mark.
    ///
    /// # Errors
    ///
    /// - [`KernelError::NoSpace`]: the level is full.
    /// - [`KernelError::NoSuchTask`]: `master` is stale.
    pub fn enqueue(&mut self, tasks: &mut TaskTable, level: usize, master: Tid) -> Result<(), KernelError> {
        let task = tasks.get_mut(master).ok_or(KernelError::NoSuchTask)?;
        self.queues[level].enqueue(master)?;
        task.meta.level = level;
        task.flags.remove(TaskFlags::YIELDED);
        Ok(())
    }

    /// Resets the scheduling metadata of `master` and queues it at level 0.
    ///
    /// # Errors
    ///
    /// See [`Mlfq::enqueue`].
    pub fn push(&mut self, tasks: &mut TaskTable, master: Tid) -> Result<(), KernelError> {
        let task = tasks.get_mut(master).ok_or(KernelError::NoSuchTask)?;
        if self.queues[0].is_full() {
            return Err(KernelError::NoSpace);
        }
        task.meta = SchedMeta {
            discipline: Discipline::Mlfq,
            ..SchedMeta::default()
        };
        self.enqueue(tasks, 0, master)
    }

    /// The first group, from the highest level down, that has a runnable
    /// member.
    ///
    /// Within a level, groups without a runnable member are rotated to the
    /// tail until a runnable one reaches the head. The pick stays queued.
    pub fn top(&mut self, tasks: &TaskTable) -> Option<Tid> {
        for queue in self.queues.iter_mut() {
            for _ in 0..queue.len() {
                let front = queue.front()?;
                if tasks.has_runnable(front) {
                    return Some(front);
                }
                queue.rotate();
            }
        }
        None
    }

    /// Removes `master` from the level it is recorded at. The other groups
    /// keep their order.
    pub fn remove(&mut self, tasks: &TaskTable, master: Tid) {
        let level = tasks.get(master).map(|task| task.meta.level);
        let Some(level) = level.filter(|level| *level < NLEVEL) else {
            crate::halt!("removing {} which is not a task under MLFQ", master);
        };
        let queue = &mut self.queues[level];
        let mut found = false;
        for _ in 0..queue.len() {
            match queue.dequeue() {
                Ok(tid) if tid == master => found = true,
                Ok(tid) => {
                    if queue.enqueue(tid).is_err() {
                        crate::halt!("level {} overflowed while removing {}", level, master);
                    }
                }
                Err(_) => break,
            }
        }
        crate::invariant!(found, "{} is missing from MLFQ level {}", master, level);
    }

    /// Accounts the run of `master` from `start` to `end` and returns whether
    /// the group is expired, that is, the next tick must select again.
    ///
    /// A killed or exited group is expired without accounting. A run that
    /// ended with a yield is charged one extra tick so that quick yields are
    /// never free.
    pub fn next(&mut self, tasks: &mut TaskTable, master: Tid, start: u64, end: u64) -> bool {
        let Some(task) = tasks.get(master) else {
            return true;
        };
        if tasks.is_killed(master) || task.state == TaskState::Zombie {
            return true;
        }
        let yielded = task.flags.contains(TaskFlags::YIELDED);
        let level = task.meta.level;
        let elapsed = end.saturating_sub(start) + u64::from(yielded);
        let ran = tasks
            .group(master)
            .and_then(|group| group.current())
            .unwrap_or(master);
        let sleeping = tasks.state(ran) == Some(TaskState::Sleeping);

        let Some(task) = tasks.get_mut(master) else {
            return true;
        };
        task.meta.execution_ticks += elapsed;
        if level + 1 < NLEVEL && task.meta.execution_ticks >= self.allotment[level] {
            task.meta.execution_ticks = 0;
            self.requeue(tasks, master, level, level + 1);
            log::debug!("mlfq: {} demoted to level {}", master, level + 1);
            return true;
        }

        let expired = elapsed >= self.quantum[level] || yielded || sleeping;
        if expired {
            self.requeue(tasks, master, level, level);
        }

        if self.next_boost <= end {
            self.boost(tasks);
            self.next_boost = end + self.boosting_period;
        }
        expired
    }

    /// Moves every group above level 0 to the tail of level 0 and resets
    /// their counters.
    pub fn boost(&mut self, tasks: &mut TaskTable) {
        let mut moved = 0;
        for level in 1..NLEVEL {
            while let Ok(tid) = self.queues[level].dequeue() {
                if let Some(task) = tasks.get_mut(tid) {
                    task.meta.execution_ticks = 0;
                }
                if self.enqueue(tasks, 0, tid).is_err() {
                    crate::halt!("level 0 overflowed while boosting {}", tid);
                }
                moved += 1;
            }
        }
        log::debug!("mlfq: boosted {} groups", moved);
    }

    fn requeue(&mut self, tasks: &mut TaskTable, master: Tid, from: usize, to: usize) {
        let queue = &mut self.queues[from];
        let mut rotations = 0;
        while queue.front() != Some(master) && rotations < queue.len() {
            queue.rotate();
            rotations += 1;
        }
        crate::invariant!(
            queue.dequeue() == Ok(master),
            "{} is missing from MLFQ level {}",
            master,
            from
        );
        if self.enqueue(tasks, to, master).is_err() {
            crate::halt!("MLFQ level {} overflowed", to);
        }
    }
}

impl fmt::Display for Mlfq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (level, queue) in self.queues.iter().enumerate() {
            write!(f, "level {} ({}):", level, queue.len())?;
            for tid in queue.iter() {
                write!(f, " {}", tid)?;
            }
            writeln!(f)?;
        }
        write!(f, "next boost at {}", self.next_boost)
    }
}
