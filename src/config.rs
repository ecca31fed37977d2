//! Tunables of the scheduler.
//!
//! The defaults reproduce the classic configuration of the teaching kernel:
//! three MLFQ levels with quanta of 5, 10 and 20 ticks, allotments of 20 and
//! 40 ticks, a priority boost every 100 ticks, and a pool of 100 tickets of
//! which the MLFQ always keeps at least 20.

use crate::{KernelError, NLEVEL, STRIDE_MAX_TICKET};

/// Scheduler configuration.
///
/// Build one with [`SchedConfig::default`] and the `with_*` setters, then hand
/// it to [`Scheduler::new`], which calls [`SchedConfig::validate`].
///
/// [`Scheduler::new`]: crate::Scheduler::new
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedConfig {
    /// Ticks a task may run at each level before it is requeued at the
    /// same level.
    pub quantum: [u64; NLEVEL],
    /// Cumulative ticks a task may run at each level before demotion. The
    /// lowest level has no allotment.
    pub allotment: [u64; NLEVEL - 1],
    /// Ticks between two priority boosts.
    pub boosting_period: u64,
    /// Size of the ticket pool shared by the two disciplines.
    pub max_ticket: usize,
    /// Tickets the MLFQ bucket always keeps.
    pub mlfq_min_ticket: usize,
    /// Ticks a stride-scheduled group may run before it is due.
    pub stride_quantum: u64,
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self {
            quantum: [5, 10, 20],
            allotment: [20, 40],
            boosting_period: 100,
            max_ticket: STRIDE_MAX_TICKET,
            mlfq_min_ticket: 20,
            stride_quantum: 5,
        }
    }
}

impl SchedConfig {
    /// Overrides the per-level quanta.
    pub fn with_quantum(mut self, quantum: [u64; NLEVEL]) -> Self {
        self.quantum = quantum;
        self
    }

    /// Overrides the per-level allotments.
    pub fn with_allotment(mut self, allotment: [u64; NLEVEL - 1]) -> Self {
        self.allotment = allotment;
        self
    }

    /// Overrides the boosting period.
    pub fn with_boosting_period(mut self, period: u64) -> Self {
        self.boosting_period = period;
        self
    }

    /// Overrides the ticket pool and the MLFQ floor.
    pub fn with_tickets(mut self, max_ticket: usize, mlfq_min_ticket: usize) -> Self {
        self.max_ticket = max_ticket;
        self.mlfq_min_ticket = mlfq_min_ticket;
        self
    }

    /// Overrides the stride quantum.
    pub fn with_stride_quantum(mut self, quantum: u64) -> Self {
        self.stride_quantum = quantum;
        self
    }

    /// Tickets available to stride-scheduled tasks.
    pub fn stride_pool(&self) -> usize {
        self.max_ticket - self.mlfq_min_ticket
    }

    /// Checks that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidArgument`] when a quantum or the
    /// boosting period is zero, when an allotment is shorter than the quantum
    /// of its level, or when the ticket pool leaves no room for either
    /// discipline.
    pub fn validate(&self) -> Result<(), KernelError> {
        if self.quantum.iter().any(|q| *q == 0) || self.stride_quantum == 0 {
            return Err(KernelError::InvalidArgument);
        }
        if self
            .allotment
            .iter()
            .zip(self.quantum.iter())
            .any(|(allot, quantum)| allot < quantum)
        {
            return Err(KernelError::InvalidArgument);
        }
        if self.boosting_period == 0 {
            return Err(KernelError::InvalidArgument);
        }
        if self.max_ticket > STRIDE_MAX_TICKET
            || self.mlfq_min_ticket == 0
            || self.mlfq_min_ticket >= self.max_ticket
        {
            return Err(KernelError::InvalidArgument);
        }
        Ok(())
    }
}
