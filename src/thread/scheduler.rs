//! Thread scheduler.
//!
//! Every CPU runs [`Scheduler::run`], which repeatedly
//!
//! 1. asks the [`MasterArbiter`] which discipline serves this tick,
//! 2. keeps running the previous thread group if it is neither expired nor
//!    blocked, otherwise lets the serving discipline pick a new one (or the
//!    other discipline, if the serving one has nothing runnable),
//! 3. lets the group pick a runnable member and switches to it,
//! 4. charges the run to the group's discipline when the CPU comes back.
//!
//! While a thread runs, it comes back to the scheduler through one of the
//! relinquish points: [`Scheduler::yield_now`], [`Scheduler::sleep`],
//! [`Scheduler::exit`] and [`Scheduler::timer_tick`]. Each of them answers
//! with a [`Relinquish`] telling the caller whether to keep running, to
//! perform a light switch to a sibling thread, or to return to the loop.
//!
//! The hardware side (timer, interrupts and the context switch primitive) is
//! reached through the [`Machine`] trait.
//!
//! [`MasterArbiter`]: crate::sched::master::MasterArbiter

use super::{Discipline, TaskFlags, TaskState, TaskTable, Tid};
use crate::{
    KernelError, MAX_CPU, NTHREAD, SchedConfig,
    sched::{Policy, TaskStride, master::MasterArbiter, mlfq::Mlfq},
    sync::SpinLock,
};
use arrayvec::ArrayVec;

/// A trait for the machine the scheduler runs on.
///
/// The [`Machine`] trait is the boundary between the scheduling decisions of
/// this crate and the mechanisms of the kernel: the clock, interrupt control
/// and the context switch. The scheduler never touches hardware by itself.
pub trait Machine {
    /// Ticks since boot.
    fn uptime(&self) -> u64;

    /// Enables interrupts on `cpu`.
    fn enable_interrupts(&self, cpu: usize);

    /// Waits on `cpu`, interrupts enabled, until the next interrupt.
    fn idle(&self, cpu: usize);

    /// Runs `switch.to` on `cpu`.
    ///
    /// Returns when the thread running on `cpu` gives the CPU back to the
    /// scheduling loop, that is, when a relinquish point answered
    /// [`Relinquish::Reschedule`]. Light switches requested in the meantime
    /// happen inside this call.
    fn switch(&self, cpu: usize, switch: Switch);
}

/// How much of the execution context a switch replaces.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum SwitchKind {
    /// Into another thread group: the address space is reloaded.
    Full,
    /// Between members of one thread group: only the stack and the identity
    /// of the current task change.
    Light,
}

/// A context switch requested by the scheduler.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct Switch {
    /// Full or light.
    pub kind: SwitchKind,
    /// The thread giving up the CPU, `None` for the scheduling loop.
    pub from: Option<Tid>,
    /// The thread to run.
    pub to: Tid,
    /// The master whose address space `to` runs in.
    pub space: Tid,
}

/// The answer of a relinquish point.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum Relinquish {
    /// Keep running the current thread.
    Continue,
    /// Switch to a sibling thread of the same group.
    Switch(Switch),
    /// Return to the scheduling loop.
    Reschedule,
}

/// The state the per-CPU loop carries between iterations.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct LoopState {
    unit: Option<Tid>,
    expired: bool,
}

impl Default for LoopState {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopState {
    /// The state of a loop that has not run anything yet.
    pub const fn new() -> Self {
        Self {
            unit: None,
            expired: true,
        }
    }

    /// The thread group run by the previous iteration.
    pub fn unit(&self) -> Option<Tid> {
        self.unit
    }

    /// Whether the previous group must give way on the next iteration.
    pub fn expired(&self) -> bool {
        self.expired
    }
}

/// A snapshot of the scheduling view of a task.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct TaskInfo {
    /// The task.
    pub tid: Tid,
    /// Master of its group.
    pub master: Tid,
    /// Lifecycle state.
    pub state: TaskState,
    /// Discipline of the group.
    pub discipline: Discipline,
    /// MLFQ level of the group.
    pub level: usize,
    /// Ticks the group accumulated at its level.
    pub execution_ticks: u64,
    /// Tick of the last dispatch of the group.
    pub last_scheduled_tick: u64,
    /// Tickets of the group, if it is stride scheduled.
    pub tickets: Option<usize>,
    /// Whether the task or its master was killed.
    pub killed: bool,
}

/// How the ticket pool is split between the disciplines.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct Shares {
    /// Tickets of the MLFQ bucket.
    pub mlfq: usize,
    /// Tickets of the Stride bucket.
    pub stride: usize,
}

#[derive(Clone, Copy, Default, Debug)]
struct CpuState {
    /// The thread running on the CPU.
    current: Option<Tid>,
}

/// Everything protected by the scheduling lock.
pub struct SchedState {
    config: SchedConfig,
    tasks: TaskTable,
    mlfq: Mlfq,
    stride: TaskStride,
    arbiter: MasterArbiter,
    cpus: [CpuState; MAX_CPU],
}

impl SchedState {
    fn new(config: SchedConfig) -> Self {
        Self {
            config,
            tasks: TaskTable::new(),
            mlfq: Mlfq::new(&config),
            stride: TaskStride::new(config.stride_pool()),
            arbiter: MasterArbiter::new(config.max_ticket, config.mlfq_min_ticket),
            cpus: [CpuState::default(); MAX_CPU],
        }
    }

    /// The configuration.
    pub fn config(&self) -> &SchedConfig {
        &self.config
    }

    /// The task table.
    pub fn tasks(&self) -> &TaskTable {
        &self.tasks
    }

    /// The multi-level feedback queue.
    pub fn mlfq(&self) -> &Mlfq {
        &self.mlfq
    }

    /// The stride scheduler of thread groups.
    pub fn stride(&self) -> &TaskStride {
        &self.stride
    }

    /// The master arbiter.
    pub fn arbiter(&self) -> &MasterArbiter {
        &self.arbiter
    }

    /// The thread running on `cpu`.
    pub fn current(&self, cpu: usize) -> Option<Tid> {
        self.cpus.get(cpu).and_then(|c| c.current)
    }

    fn policy(&mut self, discipline: Discipline) -> (&mut TaskTable, &mut dyn Policy) {
        match discipline {
            Discipline::Mlfq => (&mut self.tasks, &mut self.mlfq as &mut dyn Policy),
            Discipline::Stride => (&mut self.tasks, &mut self.stride as &mut dyn Policy),
        }
    }

    fn pick(&mut self, discipline: Discipline) -> Option<Tid> {
        let (tasks, policy) = self.policy(discipline);
        policy.pick(tasks)
    }

    /// Returns true if `master` is queued in the discipline it records.
    fn enrolled(&self, master: Tid) -> bool {
        match self.tasks.get(master).map(|task| task.meta.discipline) {
            Some(Discipline::Mlfq) => self.mlfq.level_of(master).is_some(),
            Some(Discipline::Stride) => self.stride.position(master).is_some(),
            None => false,
        }
    }

    fn evict(&mut self, master: Tid) -> Result<(), KernelError> {
        let discipline = self
            .tasks
            .get(master)
            .ok_or(KernelError::NoSuchTask)?
            .meta
            .discipline;
        if !self.enrolled(master) {
            return Err(KernelError::NoSuchEntry);
        }
        let (tasks, policy) = self.policy(discipline);
        let usage = policy.evict(tasks, master);
        if usage > 0 {
            self.arbiter.reclaim(usage);
        }
        log::debug!("{} evicted from {:?}", master, discipline);
        Ok(())
    }

    fn is_due(&self, master: Tid, now: u64) -> bool {
        let Some(task) = self.tasks.get(master) else {
            return true;
        };
        if self.tasks.is_killed(master) || task.state == TaskState::Zombie {
            return true;
        }
        let quantum = match task.meta.discipline {
            Discipline::Mlfq => self.mlfq.quantum(task.meta.level),
            Discipline::Stride => self.config.stride_quantum,
        };
        now.saturating_sub(task.meta.last_scheduled_tick) >= quantum
    }

    /// Chooses the group and the member to run on this iteration.
    fn select(&mut self, state: &LoopState) -> Option<(Tid, Tid)> {
        let serving = self.arbiter.select();
        let kept = state.unit.filter(|unit| {
            !state.expired
                && self
                    .tasks
                    .get(*unit)
                    .is_some_and(|task| task.meta.discipline == serving)
                && self.enrolled(*unit)
                && self.tasks.has_runnable(*unit)
        });
        let unit = match kept {
            Some(unit) => unit,
            None => self
                .pick(serving)
                .or_else(|| self.pick(serving.other()))?,
        };
        let Some(thread) = self.tasks.dispatch(unit) else {
            crate::halt!("{} was picked without a runnable member", unit);
        };
        Some((unit, thread))
    }

    fn launch(&mut self, cpu: usize, unit: Tid, thread: Tid, now: u64) {
        if let Some(task) = self.tasks.get_mut(thread) {
            task.state = TaskState::Running;
        }
        if let Some(task) = self.tasks.get_mut(unit) {
            task.meta.last_scheduled_tick = now;
            task.flags.insert(TaskFlags::ON_CPU);
        }
        self.cpus[cpu].current = Some(thread);
    }

    /// Cleans up after the CPU came back to the loop and charges the run.
    /// Returns whether the group is expired.
    fn settle(&mut self, cpu: usize, unit: Tid, start: u64, end: u64) -> bool {
        if let Some(current) = self.cpus[cpu].current.take() {
            // Still Running: preempted.
            if let Some(task) = self.tasks.get_mut(current) {
                if task.state == TaskState::Running {
                    task.state = TaskState::Runnable;
                }
            }
        }
        if let Some(task) = self.tasks.get_mut(unit) {
            task.flags.remove(TaskFlags::ON_CPU);
        }
        if !self.enrolled(unit) {
            return true;
        }
        let Some(discipline) = self.tasks.get(unit).map(|task| task.meta.discipline) else {
            return true;
        };
        let (tasks, policy) = self.policy(discipline);
        policy.account(tasks, unit, start, end)
    }

    /// Hands the CPU to another runnable member of the group of `current`.
    fn switch_within(&mut self, cpu: usize, current: Tid) -> Relinquish {
        let Some(master) = self.tasks.master_of(current) else {
            return Relinquish::Reschedule;
        };
        match self.tasks.rotate(master, current) {
            Some(next) if next != current => {
                if let Some(task) = self.tasks.get_mut(next) {
                    task.state = TaskState::Running;
                }
                self.cpus[cpu].current = Some(next);
                log::trace!("cpu {}: light switch {} -> {}", cpu, current, next);
                Relinquish::Switch(Switch {
                    kind: SwitchKind::Light,
                    from: Some(current),
                    to: next,
                    space: master,
                })
            }
            _ => Relinquish::Reschedule,
        }
    }

    /// Wakes the sleeping members of the group of `master`.
    fn wake_group(&mut self, master: Tid) {
        let members = self
            .tasks
            .group(master)
            .map(|group| group.members().iter().copied().collect::<ArrayVec<Tid, NTHREAD>>())
            .unwrap_or_default();
        for member in members {
            if let Some(task) = self.tasks.get_mut(member) {
                if task.state == TaskState::Sleeping {
                    task.state = TaskState::Runnable;
                }
            }
        }
    }
}

/// The scheduler shared by every CPU.
///
/// All of its state is protected by one [`SpinLock`]. The lock is never held
/// across a context switch.
pub struct Scheduler {
    state: SpinLock<SchedState>,
}

impl Scheduler {
    /// Creates a scheduler tuned by `config`.
    ///
    /// # Errors
    ///
    /// [`KernelError::InvalidArgument`] when `config` does not validate.
    pub fn new(config: SchedConfig) -> Result<Self, KernelError> {
        config.validate()?;
        Ok(Self {
            state: SpinLock::new(SchedState::new(config)),
        })
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut SchedState) -> R) -> R {
        let mut guard = self.state.lock();
        let result = f(&mut *guard);
        guard.unlock();
        result
    }

    /// Creates a master task named `name` and queues it at MLFQ level 0. The
    /// task stays Embryo until [`Scheduler::make_runnable`].
    ///
    /// # Errors
    ///
    /// [`KernelError::NoSpace`] when the task table is full.
    pub fn spawn(&self, name: &str) -> Result<Tid, KernelError> {
        self.with_state(|state| {
            let tid = state.tasks.alloc(name, None)?;
            if let Err(e) = state.mlfq.push(&mut state.tasks, tid) {
                state.tasks.free(tid);
                return Err(e);
            }
            log::debug!("spawned {} ({})", tid, name);
            Ok(tid)
        })
    }

    /// Creates a thread named `name` in the group of `master`.
    ///
    /// # Errors
    ///
    /// - [`KernelError::NoSuchTask`]: `master` is not a live master.
    /// - [`KernelError::NoSpace`]: the task table or the group is full.
    pub fn spawn_thread(&self, master: Tid, name: &str) -> Result<Tid, KernelError> {
        self.with_state(|state| {
            let tid = state.tasks.alloc(name, Some(master))?;
            log::debug!("spawned {} ({}) in {}", tid, name, master);
            Ok(tid)
        })
    }

    /// Marks an Embryo task Runnable once its context is ready.
    ///
    /// # Errors
    ///
    /// - [`KernelError::NoSuchTask`]: `tid` is stale.
    /// - [`KernelError::InvalidArgument`]: the task is not Embryo.
    pub fn make_runnable(&self, tid: Tid) -> Result<(), KernelError> {
        self.with_state(|state| {
            let task = state.tasks.get_mut(tid).ok_or(KernelError::NoSuchTask)?;
            if task.state != TaskState::Embryo {
                return Err(KernelError::InvalidArgument);
            }
            task.state = TaskState::Runnable;
            Ok(())
        })
    }

    /// Reserves `usage` tickets for the group of `tid` under the stride
    /// discipline.
    ///
    /// An MLFQ group leaves the MLFQ and joins the stride scheduler. A group
    /// already under stride scheduling has its reservation changed to
    /// `usage`. Either way the MLFQ bucket must keep at least its floor.
    ///
    /// # Errors
    ///
    /// - [`KernelError::NoSuchTask`]: `tid` is stale or exited.
    /// - [`KernelError::InvalidArgument`]: `usage` is zero or larger than the
    ///   whole ticket pool, or the group is not enrolled.
    /// - [`KernelError::ShareUnavailable`]: the MLFQ bucket would fall below
    ///   its floor.
    ///
    /// Nothing changes on error.
    pub fn admit_share(&self, tid: Tid, usage: usize) -> Result<(), KernelError> {
        self.with_state(|state| {
            let master = state.tasks.master_of(tid).ok_or(KernelError::NoSuchTask)?;
            let Some(task) = state.tasks.get(master) else {
                return Err(KernelError::NoSuchTask);
            };
            if task.state == TaskState::Zombie || state.tasks.is_killed(master) {
                return Err(KernelError::NoSuchTask);
            }
            let discipline = task.meta.discipline;
            if usage == 0 || usage > state.arbiter.max_ticket() || !state.enrolled(master) {
                return Err(KernelError::InvalidArgument);
            }
            match discipline {
                Discipline::Mlfq => {
                    if !state.arbiter.can_grant(usage) {
                        log::info!(
                            "share of {} tickets for {} rejected: mlfq holds {}",
                            usage,
                            master,
                            state.arbiter.usage(Discipline::Mlfq)
                        );
                        return Err(KernelError::ShareUnavailable);
                    }
                    state.stride.push(master, usage)?;
                    if let Err(e) = state.arbiter.grant(usage) {
                        state.stride.remove(master);
                        return Err(e);
                    }
                    state.mlfq.remove(&state.tasks, master);
                    if let Some(task) = state.tasks.get_mut(master) {
                        task.meta.discipline = Discipline::Stride;
                        task.meta.execution_ticks = 0;
                    }
                }
                Discipline::Stride => {
                    let (Some(index), Some(old)) =
                        (state.stride.position(master), state.stride.usage_of(master))
                    else {
                        crate::halt!("{} is missing from the stride heap", master);
                    };
                    if let Err(e) = state.arbiter.regrant(old, usage) {
                        log::info!(
                            "share change {} -> {} for {} rejected",
                            old,
                            usage,
                            master
                        );
                        return Err(e);
                    }
                    if let Err(e) = state.stride.change_usage(index, usage) {
                        crate::halt!("cannot resize the share of {}: {:?}", master, e);
                    }
                }
            }
            state.arbiter.check();
            log::info!("{} holds {} tickets", master, usage);
            Ok(())
        })
    }

    /// Moves the stride-scheduled group of `tid` back to MLFQ level 0 and
    /// returns its tickets to the MLFQ bucket.
    ///
    /// # Errors
    ///
    /// - [`KernelError::NoSuchTask`]: `tid` is stale.
    /// - [`KernelError::InvalidArgument`]: the group is not stride scheduled.
    pub fn release_share(&self, tid: Tid) -> Result<(), KernelError> {
        self.with_state(|state| {
            let master = state.tasks.master_of(tid).ok_or(KernelError::NoSuchTask)?;
            if state.tasks.get(master).map(|task| task.meta.discipline) != Some(Discipline::Stride)
                || !state.enrolled(master)
            {
                return Err(KernelError::InvalidArgument);
            }
            state.evict(master)?;
            if let Err(e) = state.mlfq.push(&mut state.tasks, master) {
                crate::halt!("cannot requeue {}: {:?}", master, e);
            }
            log::info!("{} released its share", master);
            Ok(())
        })
    }

    /// Removes the group of master `tid` from whichever discipline holds it,
    /// returning its tickets, if any, to the MLFQ bucket.
    ///
    /// # Errors
    ///
    /// - [`KernelError::NoSuchTask`]: `tid` is stale.
    /// - [`KernelError::InvalidArgument`]: `tid` is not a master.
    /// - [`KernelError::NoSuchEntry`]: the group was already removed.
    pub fn remove_task(&self, tid: Tid) -> Result<(), KernelError> {
        self.with_state(|state| {
            let task = state.tasks.get(tid).ok_or(KernelError::NoSuchTask)?;
            if !task.is_master() {
                return Err(KernelError::InvalidArgument);
            }
            state.evict(tid)
        })
    }

    /// Frees the slot of the exited task `tid`.
    ///
    /// Reaping a master removes its group from its discipline and frees every
    /// member. All members must have exited.
    ///
    /// # Errors
    ///
    /// - [`KernelError::NoSuchTask`]: `tid` is stale.
    /// - [`KernelError::Busy`]: `tid`, or a member of its group, has not
    ///   exited, or a CPU has not left the group yet.
    pub fn reap(&self, tid: Tid) -> Result<(), KernelError> {
        self.with_state(|state| {
            let task = state.tasks.get(tid).ok_or(KernelError::NoSuchTask)?;
            if task.state != TaskState::Zombie || state.tasks.is_on_cpu(tid) {
                return Err(KernelError::Busy);
            }
            if task.is_master() {
                let members = state
                    .tasks
                    .group(tid)
                    .map(|group| group.members().iter().copied().collect::<ArrayVec<Tid, NTHREAD>>())
                    .unwrap_or_default();
                if members
                    .iter()
                    .any(|member| state.tasks.state(*member) != Some(TaskState::Zombie))
                {
                    return Err(KernelError::Busy);
                }
                if state.enrolled(tid) {
                    state.evict(tid)?;
                }
                for member in members.iter().skip(1) {
                    state.tasks.free(*member);
                }
            }
            state.tasks.free(tid);
            log::debug!("reaped {}", tid);
            Ok(())
        })
    }

    /// Whether the group of `tid` used up its quantum at `now`. Killed and
    /// exited groups are always due.
    pub fn is_task_due(&self, tid: Tid, now: u64) -> bool {
        self.with_state(|state| match state.tasks.master_of(tid) {
            Some(master) => state.is_due(master, now),
            None => true,
        })
    }

    /// The running thread of `cpu` gives up the CPU voluntarily.
    ///
    /// The CPU goes to another runnable member of the group if there is one.
    /// Either way the group is charged as having yielded at its next
    /// accounting.
    pub fn yield_now(&self, cpu: usize) -> Relinquish {
        self.with_state(|state| {
            let Some(current) = state.current(cpu) else {
                return Relinquish::Reschedule;
            };
            let Some(task) = state.tasks.get_mut(current) else {
                return Relinquish::Reschedule;
            };
            task.state = TaskState::Runnable;
            let master = task.master;
            if let Some(task) = state.tasks.get_mut(master) {
                task.flags.insert(TaskFlags::YIELDED);
            }
            state.switch_within(cpu, current)
        })
    }

    /// The running thread of `cpu` blocks until [`Scheduler::wakeup`].
    pub fn sleep(&self, cpu: usize) -> Relinquish {
        self.with_state(|state| {
            let Some(current) = state.current(cpu) else {
                return Relinquish::Reschedule;
            };
            let Some(task) = state.tasks.get_mut(current) else {
                return Relinquish::Reschedule;
            };
            task.state = TaskState::Sleeping;
            log::trace!("cpu {}: {} sleeps", cpu, current);
            state.switch_within(cpu, current)
        })
    }

    /// The running thread of `cpu` exits.
    ///
    /// The exit of a master kills the rest of its group.
    pub fn exit(&self, cpu: usize) -> Relinquish {
        self.with_state(|state| {
            let Some(current) = state.current(cpu) else {
                return Relinquish::Reschedule;
            };
            let Some(task) = state.tasks.get_mut(current) else {
                return Relinquish::Reschedule;
            };
            task.state = TaskState::Zombie;
            if task.is_master() {
                task.flags.insert(TaskFlags::KILLED);
                state.wake_group(current);
            }
            log::debug!("{} exited", current);
            state.switch_within(cpu, current)
        })
    }

    /// Timer interrupt on `cpu` at tick `now`.
    ///
    /// A group that used up its quantum returns to the loop. Otherwise the
    /// group round-robins among its members.
    pub fn timer_tick(&self, cpu: usize, now: u64) -> Relinquish {
        self.with_state(|state| {
            let Some(current) = state.current(cpu) else {
                return Relinquish::Continue;
            };
            let Some(master) = state.tasks.master_of(current) else {
                return Relinquish::Reschedule;
            };
            if state.is_due(master, now) {
                if let Some(task) = state.tasks.get_mut(current) {
                    if task.state == TaskState::Running {
                        task.state = TaskState::Runnable;
                    }
                }
                return Relinquish::Reschedule;
            }
            if state.tasks.group(master).is_none_or(|group| group.len() == 1) {
                return Relinquish::Continue;
            }
            let Some(task) = state.tasks.get_mut(current) else {
                return Relinquish::Reschedule;
            };
            task.state = TaskState::Runnable;
            match state.switch_within(cpu, current) {
                Relinquish::Reschedule => {
                    if let Some(task) = state.tasks.get_mut(current) {
                        task.state = TaskState::Running;
                    }
                    Relinquish::Continue
                }
                relinquish => relinquish,
            }
        })
    }

    /// Wakes the sleeping task `tid`. Returns false if it was not sleeping.
    ///
    /// # Errors
    ///
    /// [`KernelError::NoSuchTask`] when `tid` is stale.
    pub fn wakeup(&self, tid: Tid) -> Result<bool, KernelError> {
        self.with_state(|state| {
            let task = state.tasks.get_mut(tid).ok_or(KernelError::NoSuchTask)?;
            if task.state != TaskState::Sleeping {
                return Ok(false);
            }
            task.state = TaskState::Runnable;
            Ok(true)
        })
    }

    /// Kills `tid`. The task exits at its next checkpoint; a sleeping task is
    /// woken up so that it reaches one. Killing a master kills its group.
    ///
    /// # Errors
    ///
    /// [`KernelError::NoSuchTask`] when `tid` is stale.
    pub fn kill(&self, tid: Tid) -> Result<(), KernelError> {
        self.with_state(|state| {
            let task = state.tasks.get_mut(tid).ok_or(KernelError::NoSuchTask)?;
            task.flags.insert(TaskFlags::KILLED);
            if task.state == TaskState::Sleeping {
                task.state = TaskState::Runnable;
            }
            if task.is_master() {
                state.wake_group(tid);
            }
            log::debug!("killed {}", tid);
            Ok(())
        })
    }

    /// The thread running on `cpu`.
    pub fn current(&self, cpu: usize) -> Option<Tid> {
        self.with_state(|state| state.current(cpu))
    }

    /// A snapshot of `tid`.
    pub fn task_info(&self, tid: Tid) -> Option<TaskInfo> {
        self.with_state(|state| {
            let task = state.tasks.get(tid)?;
            let master = state.tasks.get(task.master)?;
            Some(TaskInfo {
                tid,
                master: master.tid,
                state: task.state,
                discipline: master.meta.discipline,
                level: master.meta.level,
                execution_ticks: master.meta.execution_ticks,
                last_scheduled_tick: master.meta.last_scheduled_tick,
                tickets: state.stride.usage_of(master.tid),
                killed: state.tasks.is_killed(tid),
            })
        })
    }

    /// The current split of the ticket pool.
    pub fn shares(&self) -> Shares {
        self.with_state(|state| Shares {
            mlfq: state.arbiter.usage(Discipline::Mlfq),
            stride: state.arbiter.usage(Discipline::Stride),
        })
    }

    /// Runs `f` on the scheduler state with the lock held.
    ///
    /// `f` must not call back into the scheduler.
    pub fn inspect<R>(&self, f: impl FnOnce(&SchedState) -> R) -> R {
        self.with_state(|state| f(state))
    }

    /// Logs the task table, the MLFQ levels and both stride heaps.
    pub fn dump(&self) {
        self.with_state(|state| {
            log::info!("tasks:\n{}", state.tasks);
            log::info!("mlfq:\n{}", state.mlfq);
            log::info!("[stride] {}", state.stride);
            log::info!("{}", state.arbiter);
        })
    }

    /// One iteration of the scheduling loop of `cpu`.
    ///
    /// Returns false if nothing was runnable and the CPU idled.
    pub fn schedule_once(&self, machine: &impl Machine, cpu: usize, state: &mut LoopState) -> bool {
        crate::invariant!(cpu < MAX_CPU, "cpu {} out of range", cpu);
        machine.enable_interrupts(cpu);

        let mut guard = self.state.lock();
        let Some((unit, thread)) = guard.select(state) else {
            guard.unlock();
            state.unit = None;
            state.expired = true;
            machine.idle(cpu);
            return false;
        };
        let start = machine.uptime();
        guard.launch(cpu, unit, thread, start);
        guard.unlock();
        log::trace!("cpu {}: run {} of {} at {}", cpu, thread, unit, start);

        machine.switch(
            cpu,
            Switch {
                kind: SwitchKind::Full,
                from: None,
                to: thread,
                space: unit,
            },
        );

        let end = machine.uptime();
        let mut guard = self.state.lock();
        let expired = guard.settle(cpu, unit, start, end);
        guard.unlock();
        state.unit = Some(unit);
        state.expired = expired;
        true
    }

    /// The scheduling loop of `cpu`.
    pub fn run(&self, machine: &impl Machine, cpu: usize) -> ! {
        let mut state = LoopState::new();
        loop {
            self.schedule_once(machine, cpu, &mut state);
        }
    }
}
