mod common;

use common::{SPIN, Sim, Step, spawn, spawn_thread};
use keos_sched::{KernelError, SchedConfig, Scheduler};
use std::{cell::Cell, sync::atomic::AtomicU64};

/// Tests that a CPU-bound group sinks through the levels and is boosted back.
///
/// This test ensures that:
/// - A group is demoted once it used up the allotment of its level.
/// - The last level keeps the group without demotion.
/// - The periodic boost moves the group back to level 0 with a fresh
///   allotment.
#[test]
fn demotion_and_boost() {
    let sched = Scheduler::new(SchedConfig::default()).unwrap();
    let clock = AtomicU64::new(0);
    let t = spawn(&sched, "cpu-bound");
    let sim = Sim::new(&sched, &clock, |_| SPIN);

    // Four quanta of 5 ticks use up the allotment of level 0.
    assert_eq!(sim.run(0, 3), 3);
    assert_eq!(sched.task_info(t).unwrap().level, 0);
    sim.run(0, 1);
    assert_eq!(sched.task_info(t).unwrap().level, 1);
    assert_eq!(sched.task_info(t).unwrap().execution_ticks, 0);

    // Four quanta of 10 ticks use up the allotment of level 1.
    sim.run(0, 4);
    assert_eq!(sched.task_info(t).unwrap().level, 2);

    // Quanta of 20 ticks. The boost is due at tick 100.
    sim.run(0, 1);
    assert_eq!(sched.task_info(t).unwrap().level, 2);
    assert_eq!(sched.task_info(t).unwrap().execution_ticks, 20);
    sim.run(0, 1);
    let info = sched.task_info(t).unwrap();
    assert_eq!(info.level, 0);
    assert_eq!(info.execution_ticks, 0);
    assert_eq!(sim.ticks_of(t), 100);
    assert_eq!(sched.inspect(|state| state.mlfq().next_boost()), 200);
}

/// Tests the yield path of the MLFQ.
///
/// This test ensures that:
/// - A group that yields before its quantum goes to the tail of its level.
/// - A yield is charged one extra tick.
#[test]
fn yield_goes_to_the_tail() {
    let sched = Scheduler::new(SchedConfig::default()).unwrap();
    let clock = AtomicU64::new(0);
    let a = spawn(&sched, "a");
    let b = spawn(&sched, "b");
    let sim = Sim::new(&sched, &clock, |tid| if tid == a { Step::Yield(1) } else { SPIN });

    sim.run(0, 1);
    assert_eq!(
        sched.inspect(|state| state.mlfq().queue(0).iter().collect::<Vec<_>>()),
        [b, a]
    );
    sim.run(0, 3);
    assert_eq!(sim.dispatches(), [a, b, a, b]);
    assert_eq!(sim.ticks_of(a), 2);
    assert_eq!(sched.task_info(a).unwrap().execution_ticks, 4);
    assert_eq!(sched.task_info(b).unwrap().execution_ticks, 10);
}

/// Tests the priority between levels.
///
/// This test ensures that:
/// - A new group starts at level 0 and runs before a demoted group.
/// - Once demoted too, the new group queues behind the older one.
#[test]
fn higher_levels_run_first() {
    let sched = Scheduler::new(SchedConfig::default()).unwrap();
    let clock = AtomicU64::new(0);
    let b = spawn(&sched, "b");
    let sim = Sim::new(&sched, &clock, |_| SPIN);
    sim.run(0, 4);
    assert_eq!(sched.task_info(b).unwrap().level, 1);

    let a = spawn(&sched, "a");
    sim.run(0, 5);
    assert_eq!(sim.dispatches(), [b, b, b, b, a, a, a, a, b]);
    assert_eq!(sched.task_info(a).unwrap().level, 1);
}

/// Tests that sleeping groups are skipped.
///
/// This test ensures that:
/// - A group whose thread went to sleep gives up the rest of its quantum.
/// - The group is not dispatched while it has no runnable member.
/// - A wakeup makes it eligible again.
#[test]
fn sleeping_group_is_skipped() {
    let sched = Scheduler::new(SchedConfig::default()).unwrap();
    let clock = AtomicU64::new(0);
    let a = spawn(&sched, "a");
    let b = spawn(&sched, "b");
    let slept = Cell::new(false);
    let sim = Sim::new(&sched, &clock, |tid| {
        if tid == a && !slept.replace(true) {
            Step::Sleep(2)
        } else {
            SPIN
        }
    });

    sim.run(0, 6);
    assert_eq!(sim.dispatches_of(a), 1);
    assert_eq!(sim.dispatches_of(b), 5);
    assert_eq!(sim.ticks_of(a), 2);
    assert_eq!(sched.task_info(a).unwrap().state, keos_sched::TaskState::Sleeping);

    assert_eq!(sched.wakeup(a), Ok(true));
    assert_eq!(sched.wakeup(a), Ok(false));
    sim.run(0, 1);
    assert_eq!(sim.dispatches().last(), Some(&a));
}

/// Tests removing groups from the MLFQ.
///
/// This test ensures that:
/// - A removed group leaves its level and is never dispatched again.
/// - Removing twice, or removing a non-master thread, fails.
#[test]
fn remove_task() {
    let sched = Scheduler::new(SchedConfig::default()).unwrap();
    let clock = AtomicU64::new(0);
    let tids = [spawn(&sched, "a"), spawn(&sched, "b"), spawn(&sched, "c")];
    let thread = spawn_thread(&sched, tids[0], "a.1");

    assert_eq!(sched.remove_task(tids[1]), Ok(()));
    assert_eq!(sched.remove_task(tids[1]), Err(KernelError::NoSuchEntry));
    assert_eq!(sched.remove_task(thread), Err(KernelError::InvalidArgument));
    assert_eq!(sched.inspect(|state| state.mlfq().size(0)), 2);
    assert_eq!(sched.inspect(|state| state.mlfq().level_of(tids[1])), None);

    let sim = Sim::new(&sched, &clock, |_| SPIN);
    sim.run(0, 10);
    assert_eq!(sim.dispatches_of(tids[1]), 0);
    assert!(sim.dispatches_of(tids[0]) > 0);
    assert!(sim.dispatches_of(tids[2]) > 0);
}
