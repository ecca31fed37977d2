//! A simulated machine for driving the scheduling loop in tests.
#![allow(dead_code)]

use keos_sched::{LoopState, Machine, Relinquish, Scheduler, Switch, Tid};
use std::{
    cell::{Cell, RefCell},
    sync::atomic::{AtomicU64, Ordering},
};

/// What the running thread does next.
#[derive(Clone, Copy, Debug)]
pub enum Step {
    /// Burns the given number of ticks.
    Run(u64),
    /// Burns the given number of ticks, then yields.
    Yield(u64),
    /// Burns the given number of ticks, then sleeps.
    Sleep(u64),
    /// Burns the given number of ticks, then exits.
    Exit(u64),
}

/// Runs forever.
pub const SPIN: Step = Step::Run(u64::MAX);

enum Burn {
    Done,
    Switched,
    Preempted,
}

/// A machine whose threads follow a script.
///
/// Every tick advances the shared clock, records the running thread and
/// delivers a timer interrupt. The script is asked for the next step of a
/// thread whenever it starts running or finishes its previous step.
pub struct Sim<'a> {
    sched: &'a Scheduler,
    clock: &'a AtomicU64,
    script: RefCell<Box<dyn FnMut(Tid) -> Step + 'a>>,
    state: Cell<LoopState>,
    ticks: RefCell<Vec<Tid>>,
    dispatches: RefCell<Vec<Tid>>,
    lights: RefCell<Vec<Switch>>,
    idles: Cell<usize>,
}

impl<'a> Sim<'a> {
    pub fn new(
        sched: &'a Scheduler,
        clock: &'a AtomicU64,
        script: impl FnMut(Tid) -> Step + 'a,
    ) -> Self {
        Self {
            sched,
            clock,
            script: RefCell::new(Box::new(script)),
            state: Cell::new(LoopState::new()),
            ticks: RefCell::new(Vec::new()),
            dispatches: RefCell::new(Vec::new()),
            lights: RefCell::new(Vec::new()),
            idles: Cell::new(0),
        }
    }

    /// Runs `iterations` iterations of the loop of `cpu`. Returns how many
    /// of them dispatched a thread.
    pub fn run(&self, cpu: usize, iterations: usize) -> usize {
        let mut state = self.state.get();
        let ran = (0..iterations)
            .filter(|_| self.sched.schedule_once(self, cpu, &mut state))
            .count();
        self.state.set(state);
        ran
    }

    /// The thread that ran on each tick.
    pub fn ticks(&self) -> Vec<Tid> {
        self.ticks.borrow().clone()
    }

    /// Ticks run by `tid`.
    pub fn ticks_of(&self, tid: Tid) -> usize {
        self.ticks.borrow().iter().filter(|t| **t == tid).count()
    }

    /// Threads dispatched by the loop, in order.
    pub fn dispatches(&self) -> Vec<Tid> {
        self.dispatches.borrow().clone()
    }

    /// Loop dispatches of `tid`.
    pub fn dispatches_of(&self, tid: Tid) -> usize {
        self.dispatches.borrow().iter().filter(|t| **t == tid).count()
    }

    /// Light switches, in order.
    pub fn lights(&self) -> Vec<Switch> {
        self.lights.borrow().clone()
    }

    /// Number of times the loop idled.
    pub fn idles(&self) -> usize {
        self.idles.get()
    }

    fn step(&self, current: Tid) -> Step {
        let mut script = self.script.borrow_mut();
        (&mut **script)(current)
    }

    fn burn(&self, cpu: usize, current: &mut Tid, ticks: u64) -> Burn {
        for _ in 0..ticks {
            let now = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
            self.ticks.borrow_mut().push(*current);
            match self.sched.timer_tick(cpu, now) {
                Relinquish::Continue => {}
                Relinquish::Switch(switch) => {
                    self.lights.borrow_mut().push(switch);
                    *current = switch.to;
                    return Burn::Switched;
                }
                Relinquish::Reschedule => return Burn::Preempted,
            }
        }
        Burn::Done
    }
}

impl Machine for Sim<'_> {
    fn uptime(&self) -> u64 {
        self.clock.load(Ordering::SeqCst)
    }

    fn enable_interrupts(&self, _cpu: usize) {}

    fn idle(&self, _cpu: usize) {
        self.idles.set(self.idles.get() + 1);
        self.clock.fetch_add(1, Ordering::SeqCst);
    }

    fn switch(&self, cpu: usize, switch: Switch) {
        self.dispatches.borrow_mut().push(switch.to);
        let mut current = switch.to;
        loop {
            let (ticks, relinquish): (u64, Option<fn(&Scheduler, usize) -> Relinquish>) =
                match self.step(current) {
                    Step::Run(n) => (n, None),
                    Step::Yield(n) => (n, Some(Scheduler::yield_now)),
                    Step::Sleep(n) => (n, Some(Scheduler::sleep)),
                    Step::Exit(n) => (n, Some(Scheduler::exit)),
                };
            match self.burn(cpu, &mut current, ticks) {
                Burn::Done => {}
                Burn::Switched => continue,
                Burn::Preempted => return,
            }
            let Some(relinquish) = relinquish else {
                continue;
            };
            match relinquish(self.sched, cpu) {
                Relinquish::Continue => {}
                Relinquish::Switch(switch) => {
                    self.lights.borrow_mut().push(switch);
                    current = switch.to;
                }
                Relinquish::Reschedule => return,
            }
        }
    }
}

/// Spawns a master and makes it runnable.
pub fn spawn(sched: &Scheduler, name: &str) -> Tid {
    let tid = sched.spawn(name).unwrap();
    sched.make_runnable(tid).unwrap();
    tid
}

/// Spawns a thread in the group of `master` and makes it runnable.
pub fn spawn_thread(sched: &Scheduler, master: Tid, name: &str) -> Tid {
    let tid = sched.spawn_thread(master, name).unwrap();
    sched.make_runnable(tid).unwrap();
    tid
}

/// Asserts that `observed` is within 5% of `expected`.
pub fn assert_close(observed: usize, expected: f64) {
    let error = (observed as f64 - expected).abs();
    assert!(
        error <= expected * 0.05,
        "observed {observed}, expected {expected:.1}"
    );
}
