mod common;

use common::{SPIN, Sim, Step, assert_close, spawn};
use keos_sched::{
    KernelError, LoopState, Machine, Relinquish, SchedConfig, Scheduler, Shares, Switch,
    TaskState, Tid,
    syscall::{SchedSyscall, SyscallFrame},
};
use std::{
    cell::{Cell, RefCell},
    sync::atomic::AtomicU64,
};

/// Tests the loop when there is nothing to run.
///
/// This test ensures that:
/// - The loop idles while no thread is runnable.
/// - Embryo tasks are never dispatched.
#[test]
fn idles_without_runnable_threads() {
    let sched = Scheduler::new(SchedConfig::default()).unwrap();
    let clock = AtomicU64::new(0);
    let sim = Sim::new(&sched, &clock, |_| SPIN);
    assert_eq!(sim.run(0, 3), 0);
    assert_eq!(sim.idles(), 3);

    let t = sched.spawn("embryo").unwrap();
    assert_eq!(sched.task_info(t).unwrap().state, TaskState::Embryo);
    assert_eq!(sim.run(0, 2), 0);

    sched.make_runnable(t).unwrap();
    assert_eq!(sched.make_runnable(t), Err(KernelError::InvalidArgument));
    assert_eq!(sim.run(0, 2), 2);
    assert_eq!(sim.dispatches(), [t, t]);
    assert_eq!(sim.idles(), 5);
}

/// Tests the split of the CPU between the two disciplines.
///
/// This test ensures that:
/// - The arbiter serves each discipline in proportion to its bucket.
/// - Groups of each discipline get the turns of their discipline.
#[test]
fn arbiter_splits_the_cpu() {
    let sched = Scheduler::new(SchedConfig::default()).unwrap();
    let clock = AtomicU64::new(0);
    let a = spawn(&sched, "mlfq");
    let b = spawn(&sched, "stride");
    sched.admit_share(b, 50).unwrap();
    assert_eq!(sched.shares(), Shares { mlfq: 50, stride: 50 });

    let sim = Sim::new(&sched, &clock, |_| SPIN);
    assert_eq!(sim.run(0, 2_000), 2_000);
    assert_close(sim.dispatches_of(a), 1_000.0);
    assert_close(sim.dispatches_of(b), 1_000.0);
}

/// Tests that the loop never idles while a thread is runnable.
///
/// This test ensures that:
/// - The turns of a discipline without runnable groups go to the other.
/// - A woken group gets its share back.
#[test]
fn turns_are_never_wasted() {
    let sched = Scheduler::new(SchedConfig::default()).unwrap();
    let clock = AtomicU64::new(0);
    let a = spawn(&sched, "mlfq");
    let b = spawn(&sched, "stride");
    sched.admit_share(b, 60).unwrap();
    let slept = Cell::new(false);
    let sim = Sim::new(&sched, &clock, |tid| {
        if tid == b && !slept.replace(true) {
            Step::Sleep(0)
        } else {
            SPIN
        }
    });

    assert_eq!(sim.run(0, 10), 10);
    assert_eq!(sim.idles(), 0);
    assert_eq!(sim.dispatches_of(b), 1);
    assert_eq!(sim.ticks_of(b), 0);
    assert_eq!(sim.dispatches_of(a), 9);

    assert_eq!(sched.wakeup(b), Ok(true));
    let before = sim.dispatches_of(b);
    sim.run(0, 100);
    assert_close(sim.dispatches_of(b) - before, 60.0);
}

/// Tests killing a sleeping thread.
///
/// This test ensures that:
/// - Killing a sleeping thread wakes it up.
/// - A killed group is rescheduled at its first tick.
#[test]
fn kill_wakes_sleepers() {
    let sched = Scheduler::new(SchedConfig::default()).unwrap();
    let clock = AtomicU64::new(0);
    let t = spawn(&sched, "t");
    let runs = Cell::new(0);
    let sim = Sim::new(&sched, &clock, |_| {
        runs.set(runs.get() + 1);
        if runs.get() == 1 { Step::Sleep(1) } else { SPIN }
    });
    sim.run(0, 1);
    assert_eq!(sched.task_info(t).unwrap().state, TaskState::Sleeping);
    assert_eq!(sim.run(0, 1), 0);

    sched.kill(t).unwrap();
    let info = sched.task_info(t).unwrap();
    assert_eq!(info.state, TaskState::Runnable);
    assert!(info.killed);
    sim.run(0, 1);
    assert_eq!(sim.ticks_of(t), 2);
    assert!(sched.is_task_due(t, 0));
}

/// Tests invalid configurations.
///
/// This test ensures that:
/// - A scheduler cannot be built from a configuration that does not validate.
#[test]
fn rejects_bad_configuration() {
    let bad = [
        SchedConfig::default().with_tickets(100, 100),
        SchedConfig::default().with_tickets(101, 20),
        SchedConfig::default().with_quantum([0, 10, 20]),
        SchedConfig::default().with_boosting_period(0),
    ];
    for config in bad {
        assert!(matches!(
            Scheduler::new(config),
            Err(KernelError::InvalidArgument)
        ));
    }
    let sched = Scheduler::new(SchedConfig::default().with_tickets(50, 10)).unwrap();
    assert_eq!(sched.shares(), Shares { mlfq: 50, stride: 0 });
}

/// A machine whose threads issue system calls and return to the loop.
struct Syscalls<'a> {
    sched: &'a Scheduler,
    calls: Vec<(usize, usize)>,
    results: RefCell<Vec<(usize, Relinquish)>>,
}

impl Machine for Syscalls<'_> {
    fn uptime(&self) -> u64 {
        0
    }

    fn enable_interrupts(&self, _cpu: usize) {}

    fn idle(&self, _cpu: usize) {}

    fn switch(&self, cpu: usize, _switch: Switch) {
        for (sysno, arg1) in self.calls.iter().copied() {
            let mut frame = SyscallFrame::new(sysno, arg1);
            let relinquish = self.sched.syscall(cpu, &mut frame);
            self.results.borrow_mut().push((frame.ret, relinquish));
        }
    }
}

/// Tests the scheduling system calls.
///
/// This test ensures that:
/// - `getlev` reports the MLFQ level, and fails under stride scheduling.
/// - `set_cpu_share` reports admission failures to the caller.
/// - `yield` returns to the loop when the group has no other member.
/// - Unknown system calls fail.
#[test]
fn system_calls() {
    let sched = Scheduler::new(SchedConfig::default()).unwrap();
    let t = spawn(&sched, "t");
    let machine = Syscalls {
        sched: &sched,
        calls: vec![
            (SchedSyscall::GetLevel.into(), 0),
            (SchedSyscall::SetCpuShare.into(), 30),
            (SchedSyscall::GetLevel.into(), 0),
            (SchedSyscall::SetCpuShare.into(), 90),
            (9, 0),
            (SchedSyscall::Yield.into(), 0),
        ],
        results: RefCell::new(Vec::new()),
    };
    let mut state = keos_sched::LoopState::new();
    assert!(sched.schedule_once(&machine, 1, &mut state));
    assert_eq!(state.unit(), Some(t));

    let results = machine.results.into_inner();
    assert_eq!(
        results,
        [
            (0, Relinquish::Continue),
            (0, Relinquish::Continue),
            (KernelError::NotSupportedOperation.into_usize(), Relinquish::Continue),
            (KernelError::ShareUnavailable.into_usize(), Relinquish::Continue),
            (KernelError::NoSuchSyscall.into_usize(), Relinquish::Continue),
            (0, Relinquish::Reschedule),
        ]
    );
    assert_eq!(sched.shares(), Shares { mlfq: 70, stride: 30 });
    assert_eq!(sched.task_info(t).unwrap().state, TaskState::Runnable);
    assert_eq!(sched.current(1), None);

    // Without a running thread there is no caller.
    let mut frame = SyscallFrame::new(SchedSyscall::GetLevel.into(), 0);
    sched.syscall(1, &mut frame);
    assert_eq!(frame.ret, KernelError::NoSuchTask.into_usize());
}

/// A machine on which CPU 1 runs one iteration of its loop while CPU 0 is
/// inside its first switch. With `exit` set, the thread on CPU 0 exits and
/// tries to reap its group before CPU 1 runs.
struct Nested<'a> {
    sched: &'a Scheduler,
    exit: bool,
    nested: Cell<bool>,
    dispatches: RefCell<Vec<(usize, Tid, Tid)>>,
    idles: Cell<usize>,
    reaped: Cell<Option<Result<(), KernelError>>>,
}

impl<'a> Nested<'a> {
    fn new(sched: &'a Scheduler, exit: bool) -> Self {
        Self {
            sched,
            exit,
            nested: Cell::new(false),
            dispatches: RefCell::new(Vec::new()),
            idles: Cell::new(0),
            reaped: Cell::new(None),
        }
    }
}

impl Machine for Nested<'_> {
    fn uptime(&self) -> u64 {
        0
    }

    fn enable_interrupts(&self, _cpu: usize) {}

    fn idle(&self, _cpu: usize) {
        self.idles.set(self.idles.get() + 1);
    }

    fn switch(&self, cpu: usize, switch: Switch) {
        self.dispatches
            .borrow_mut()
            .push((cpu, switch.space, switch.to));
        if cpu != 0 || self.nested.replace(true) {
            return;
        }
        if self.exit {
            assert_eq!(self.sched.exit(0), Relinquish::Reschedule);
            self.reaped.set(Some(self.sched.reap(switch.space)));
        }
        self.sched.schedule_once(self, 1, &mut LoopState::new());
    }
}

/// Tests that a thread group runs on one CPU at a time.
///
/// This test ensures that:
/// - A group dispatched on one CPU is not picked by another CPU, even when
///   another of its members is runnable.
/// - The other CPU runs a different group instead, or idles if there is
///   none.
/// - The group can be dispatched again once its CPU comes back to the loop.
#[test]
fn groups_run_on_one_cpu_at_a_time() {
    let sched = Scheduler::new(SchedConfig::default()).unwrap();
    let m = spawn(&sched, "m");
    common::spawn_thread(&sched, m, "m.1");
    let other = spawn(&sched, "other");
    let machine = Nested::new(&sched, false);
    assert!(sched.schedule_once(&machine, 0, &mut LoopState::new()));
    assert_eq!(*machine.dispatches.borrow(), [(0, m, m), (1, other, other)]);
    assert_eq!(sched.current(0), None);
    assert_eq!(sched.current(1), None);
    assert!(sched.inspect(|state| state.tasks().has_runnable(m)));

    let sched = Scheduler::new(SchedConfig::default()).unwrap();
    let m = spawn(&sched, "m");
    common::spawn_thread(&sched, m, "m.1");
    let machine = Nested::new(&sched, false);
    assert!(sched.schedule_once(&machine, 0, &mut LoopState::new()));
    assert_eq!(*machine.dispatches.borrow(), [(0, m, m)]);
    assert_eq!(machine.idles.get(), 1);
    assert!(sched.inspect(|state| !state.tasks().is_on_cpu(m)));
}

/// Tests reaping a group that exited on another CPU.
///
/// This test ensures that:
/// - An exited group cannot be reaped while its CPU has not left it.
/// - It is reaped once the CPU came back to the loop.
#[test]
fn exited_group_is_reaped_after_its_cpu_leaves() {
    let sched = Scheduler::new(SchedConfig::default()).unwrap();
    let m = spawn(&sched, "m");
    let machine = Nested::new(&sched, true);
    assert!(sched.schedule_once(&machine, 0, &mut LoopState::new()));
    assert_eq!(machine.reaped.get(), Some(Err(KernelError::Busy)));
    assert_eq!(*machine.dispatches.borrow(), [(0, m, m)]);
    assert_eq!(machine.idles.get(), 1);

    assert_eq!(sched.task_info(m).unwrap().state, TaskState::Zombie);
    sched.reap(m).unwrap();
    assert_eq!(sched.task_info(m), None);
    assert!(sched.inspect(|state| state.mlfq().is_empty()));
}

/// Tests the loop on several CPUs sharing one scheduler.
///
/// This test ensures that:
/// - Every group gets turns when two CPUs run the loop concurrently.
/// - No thread is left running and the ticket split is intact once both
///   CPUs stop.
#[test]
fn several_cpus() {
    let sched = Scheduler::new(SchedConfig::default()).unwrap();
    let clock = AtomicU64::new(0);
    let tids = (0..4)
        .map(|i| spawn(&sched, &format!("t{i}")))
        .collect::<Vec<Tid>>();
    sched.admit_share(tids[3], 40).unwrap();

    let dispatches = std::thread::scope(|s| {
        let handles = (0..2)
            .map(|cpu| {
                let (sched, clock) = (&sched, &clock);
                s.spawn(move || {
                    let sim = Sim::new(sched, clock, |_| SPIN);
                    sim.run(cpu, 300);
                    sim.dispatches()
                })
            })
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect::<Vec<Tid>>()
    });

    for tid in &tids {
        assert!(dispatches.contains(tid));
        assert_eq!(sched.task_info(*tid).unwrap().state, TaskState::Runnable);
    }
    assert_eq!(sched.current(0), None);
    assert_eq!(sched.current(1), None);
    assert_eq!(sched.shares(), Shares { mlfq: 60, stride: 40 });
}

/// Tests the state dumps.
///
/// This test ensures that:
/// - The task table, the MLFQ levels and the arbiter describe the current
///   state.
/// - Dumping through the log does not disturb the scheduler.
#[test]
fn dumps_describe_the_state() {
    let sched = Scheduler::new(SchedConfig::default()).unwrap();
    let shell = spawn(&sched, "shell");
    spawn(&sched, "worker");
    let thread = common::spawn_thread(&sched, shell, "shell.1");
    sched.admit_share(Tid::new(1, 1), 30).unwrap();

    let (tasks, mlfq, arbiter) = sched.inspect(|state| {
        (
            format!("{}", state.tasks()),
            format!("{}", state.mlfq()),
            format!("{}", state.arbiter()),
        )
    });
    assert_eq!(shell, Tid::new(0, 1));
    assert!(tasks.contains("0#1 Runnable shell Mlfq level 0"));
    assert!(tasks.contains("1#1 Runnable worker Stride"));
    assert!(tasks.contains(&format!("{thread} Runnable shell.1 in 0#1")));
    assert!(mlfq.starts_with("level 0 (1): 0#1\n"));
    assert!(mlfq.ends_with("next boost at 100"));
    assert!(arbiter.starts_with("[master] floor: 20 max_ticket: 100"));
    assert!(arbiter.contains("total_usage: 100"));

    sched.dump();
    assert_eq!(sched.shares(), Shares { mlfq: 70, stride: 30 });
}
