//! The master arbiter.
//!
//! A stride scheduler with two participants, the MLFQ bucket and the Stride
//! bucket. On every scheduling decision it picks the discipline that serves
//! the tick. The ticket split mirrors the admitted shares: the Stride bucket
//! holds exactly the sum of the tickets of admitted tasks and the MLFQ bucket
//! holds the rest of the pool.
//!
//! A bucket never holds zero tickets. When the last stride task leaves, the
//! Stride bucket is removed and recreated on the next admission.

use super::stride::StrideScheduler;
use crate::{KernelError, thread::Discipline};
use core::fmt;

/// Arbitrates the CPU between the two disciplines and performs admission
/// control.
pub struct MasterArbiter {
    stride: StrideScheduler<Discipline, 2>,
    floor: usize,
}

impl MasterArbiter {
    /// Creates an arbiter whose MLFQ bucket holds the whole pool of
    /// `max_ticket` tickets and never drops below `floor`.
    pub fn new(max_ticket: usize, floor: usize) -> Self {
        let mut stride = StrideScheduler::new(max_ticket);
        if let Err(e) = stride.push(Discipline::Mlfq, max_ticket) {
            crate::halt!("cannot seed the MLFQ bucket: {:?}", e);
        }
        Self { stride, floor }
    }

    /// Picks the discipline serving this tick and advances its pass.
    pub fn select(&mut self) -> Discipline {
        let Some(discipline) = self.stride.advance_top() else {
            crate::halt!("the master arbiter lost its MLFQ bucket");
        };
        discipline
    }

    /// Tickets held by the bucket of `discipline`.
    pub fn usage(&self, discipline: Discipline) -> usize {
        self.stride.usage_of(discipline).unwrap_or(0)
    }

    /// Size of the ticket pool.
    pub fn max_ticket(&self) -> usize {
        self.stride.max_ticket()
    }

    /// Tickets the MLFQ bucket always keeps.
    pub fn floor(&self) -> usize {
        self.floor
    }

    /// Whether the MLFQ bucket can give up `delta` tickets without falling
    /// below the floor.
    pub fn can_grant(&self, delta: usize) -> bool {
        self.usage(Discipline::Mlfq)
            .checked_sub(delta)
            .is_some_and(|rest| rest >= self.floor)
    }

    /// Moves `usage` tickets from the MLFQ bucket to the Stride bucket.
    ///
    /// # Errors
    ///
    /// [`KernelError::ShareUnavailable`] when the MLFQ bucket would fall
    /// below the floor. Nothing changes in that case.
    pub fn grant(&mut self, usage: usize) -> Result<(), KernelError> {
        if !self.can_grant(usage) {
            return Err(KernelError::ShareUnavailable);
        }
        let (mlfq, stride) = (self.usage(Discipline::Mlfq), self.usage(Discipline::Stride));
        // Shrink first so that the total never exceeds the pool.
        self.resize(Discipline::Mlfq, mlfq - usage);
        self.resize(Discipline::Stride, stride + usage);
        self.check();
        Ok(())
    }

    /// Re-splits the pool after an admitted task changes its share from `old`
    /// to `new` tickets.
    ///
    /// # Errors
    ///
    /// [`KernelError::ShareUnavailable`] when the MLFQ bucket would fall
    /// below the floor. Nothing changes in that case.
    pub fn regrant(&mut self, old: usize, new: usize) -> Result<(), KernelError> {
        let (mlfq, stride) = (self.usage(Discipline::Mlfq), self.usage(Discipline::Stride));
        crate::invariant!(
            stride >= old,
            "stride bucket ({}) smaller than an admitted share ({})",
            stride,
            old
        );
        if new > old {
            if !self.can_grant(new - old) {
                return Err(KernelError::ShareUnavailable);
            }
            self.resize(Discipline::Mlfq, mlfq - (new - old));
            self.resize(Discipline::Stride, stride + (new - old));
        } else if new < old {
            self.resize(Discipline::Stride, stride - (old - new));
            self.resize(Discipline::Mlfq, mlfq + (old - new));
        }
        self.check();
        Ok(())
    }

    /// Returns `usage` tickets of a departing stride task to the MLFQ bucket.
    pub fn reclaim(&mut self, usage: usize) {
        let (mlfq, stride) = (self.usage(Discipline::Mlfq), self.usage(Discipline::Stride));
        crate::invariant!(
            stride >= usage,
            "reclaiming {} tickets from a stride bucket of {}",
            usage,
            stride
        );
        self.resize(Discipline::Stride, stride - usage);
        self.resize(Discipline::Mlfq, mlfq + usage);
        self.check();
    }

    /// Halts unless the buckets add up to the pool and the MLFQ bucket holds
    /// at least the floor.
    pub fn check(&self) {
        let (mlfq, stride) = (self.usage(Discipline::Mlfq), self.usage(Discipline::Stride));
        crate::invariant!(
            mlfq + stride == self.max_ticket() && mlfq >= self.floor,
            "ticket split broken: mlfq {} + stride {} != {} (floor {})",
            mlfq,
            stride,
            self.max_ticket(),
            self.floor
        );
    }

    fn resize(&mut self, discipline: Discipline, usage: usize) {
        let result = match (self.stride.position(discipline), usage) {
            (Some(_), 0) => self.stride.remove(discipline).map(|_| ()).ok_or(KernelError::NoSuchEntry),
            (Some(index), usage) => self.stride.change_usage(index, usage),
            (None, 0) => Ok(()),
            (None, usage) => self.stride.push(discipline, usage),
        };
        if let Err(e) = result {
            crate::halt!(
                "cannot resize the {:?} bucket to {} tickets: {:?}",
                discipline,
                usage,
                e
            );
        }
    }
}

impl fmt::Display for MasterArbiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[master] floor: {} {}", self.floor, self.stride)
    }
}
