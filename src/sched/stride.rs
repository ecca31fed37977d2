//! Stride scheduling.
//!
//! Every participant holds a number of tickets (its *usage*). Its *stride* is
//! the reciprocal of the tickets, and its *pass* (the heap key) advances by
//! the stride whenever it runs. The participant with the smallest pass runs
//! next, so over time each one runs in proportion to its tickets.
//!
//! The same type serves two roles: it schedules the stride-disciplined thread
//! groups, and, with the two disciplines as payloads, it is the
//! [`MasterArbiter`] deciding which discipline serves a tick.
//!
//! [`MasterArbiter`]: super::master::MasterArbiter

use super::heap::{HeapElement, PriorityHeap};
use crate::{KernelError, STRIDE_MAX_TICKET};
use core::fmt;

/// A proportional-share scheduler over at most `N` payloads.
pub struct StrideScheduler<P, const N: usize> {
    heap: PriorityHeap<P, N>,
    total_usage: usize,
    max_ticket: usize,
    min_usage: usize,
    stride: [f64; STRIDE_MAX_TICKET + 1],
}

impl<P: Copy + PartialEq, const N: usize> StrideScheduler<P, N> {
    /// Creates an empty scheduler distributing `max_ticket` tickets.
    pub fn new(max_ticket: usize) -> Self {
        crate::invariant!(
            max_ticket > 0 && max_ticket <= STRIDE_MAX_TICKET,
            "ticket pool of {} is out of range",
            max_ticket
        );
        let mut stride = [0.0; STRIDE_MAX_TICKET + 1];
        for (tickets, slot) in stride.iter_mut().enumerate().take(max_ticket + 1).skip(1) {
            *slot = 1.0 / tickets as f64;
        }
        Self {
            heap: PriorityHeap::new(),
            total_usage: 0,
            max_ticket,
            // No participant: the sentinel is the whole pool.
            min_usage: max_ticket,
            stride,
        }
    }

    /// Sum of the usages of every participant.
    #[inline]
    pub fn total_usage(&self) -> usize {
        self.total_usage
    }

    /// Size of the ticket pool.
    #[inline]
    pub fn max_ticket(&self) -> usize {
        self.max_ticket
    }

    /// Smallest usage among participants, or the pool size when empty.
    #[inline]
    pub fn min_usage(&self) -> usize {
        self.min_usage
    }

    /// Number of participants.
    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns true if there is no participant.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// The stride of a participant holding `usage` tickets.
    #[inline]
    pub fn stride_of(&self, usage: usize) -> f64 {
        self.stride[usage]
    }

    /// Index of `payload` in the underlying heap.
    pub fn position(&self, payload: P) -> Option<usize> {
        self.heap.position(|e| e.payload == payload)
    }

    /// The heap entry of `payload`.
    pub fn get(&self, payload: P) -> Option<&HeapElement<P>> {
        self.position(payload).and_then(|index| self.heap.get(index))
    }

    /// Tickets held by `payload`.
    pub fn usage_of(&self, payload: P) -> Option<usize> {
        self.get(payload).map(|e| e.usage)
    }

    /// Iterates over every participant in heap order.
    pub fn iter(&self) -> impl Iterator<Item = &HeapElement<P>> {
        self.heap.iter()
    }

    /// Admits `payload` with `usage` tickets.
    ///
    /// The newcomer starts one minimum stride past the current smallest pass,
    /// so it joins the pack instead of monopolizing the CPU until it catches
    /// up.
    ///
    /// # Errors
    ///
    /// - [`KernelError::InvalidArgument`]: `usage` is zero.
    /// - [`KernelError::AlreadyExists`]: `payload` already participates.
    /// - [`KernelError::ShareUnavailable`]: the pool cannot cover `usage`.
    /// - [`KernelError::NoSpace`]: the heap is full.
    ///
    /// Nothing changes on error.
    pub fn push(&mut self, payload: P, usage: usize) -> Result<(), KernelError> {
        if usage == 0 {
            return Err(KernelError::InvalidArgument);
        }
        if self.position(payload).is_some() {
            return Err(KernelError::AlreadyExists);
        }
        if self.total_usage + usage > self.max_ticket {
            return Err(KernelError::ShareUnavailable);
        }
        let min_usage = self.min_usage.min(usage);
        let base = self.heap.top().map(|e| e.key).unwrap_or(0.0);
        self.heap
            .push(HeapElement::new(base + self.stride[min_usage], payload, usage))?;
        self.total_usage += usage;
        self.min_usage = min_usage;
        Ok(())
    }

    /// The participant with the smallest pass.
    pub fn top(&self) -> Option<&HeapElement<P>> {
        self.heap.top()
    }

    /// The participant with the smallest pass among those for which
    /// `runnable` holds. Nothing is removed or advanced.
    pub fn top_runnable(&self, mut runnable: impl FnMut(P) -> bool) -> Option<P> {
        let mut best: Option<&HeapElement<P>> = None;
        for element in self.heap.iter() {
            if best.is_some_and(|best| best.key <= element.key) {
                continue;
            }
            if runnable(element.payload) {
                best = Some(element);
            }
        }
        best.map(|e| e.payload)
    }

    /// Charges one run to `payload`: its pass grows by its stride.
    ///
    /// Returns false if `payload` does not participate.
    pub fn advance(&mut self, payload: P) -> bool {
        match self.position(payload) {
            Some(index) => {
                let stride = self.heap.get(index).map(|e| self.stride[e.usage]);
                stride.and_then(|s| self.heap.increase_key(index, s)).is_some()
            }
            None => false,
        }
    }

    /// Charges one run to the participant with the smallest pass and returns
    /// it.
    pub fn advance_top(&mut self) -> Option<P> {
        let mut top = *self.heap.top()?;
        top.key += self.stride[top.usage];
        self.heap.update_top(top).ok()?;
        Some(top.payload)
    }

    /// Changes the usage of the participant at heap `index`.
    ///
    /// # Errors
    ///
    /// - [`KernelError::NoSuchEntry`]: no participant at `index`.
    /// - [`KernelError::InvalidArgument`]: `usage` is zero.
    /// - [`KernelError::ShareUnavailable`]: the new total would exceed the
    ///   pool.
    pub fn change_usage(&mut self, index: usize, usage: usize) -> Result<(), KernelError> {
        let old = self.heap.get(index).ok_or(KernelError::NoSuchEntry)?.usage;
        if usage == 0 {
            return Err(KernelError::InvalidArgument);
        }
        let total = self.total_usage - old + usage;
        if total > self.max_ticket {
            return Err(KernelError::ShareUnavailable);
        }
        self.heap.set_usage(index, usage);
        self.total_usage = total;
        if old == self.min_usage || usage < self.min_usage {
            self.update_min_usage();
        }
        Ok(())
    }

    /// Removes `payload`, returning the usage it held.
    pub fn remove(&mut self, payload: P) -> Option<usize> {
        let index = self.position(payload)?;
        let usage = self.heap.remove_at(index)?.usage;
        self.total_usage -= usage;
        if usage == self.min_usage {
            self.update_min_usage();
        }
        Some(usage)
    }

    fn update_min_usage(&mut self) {
        self.min_usage = self
            .heap
            .iter()
            .map(|e| e.usage)
            .min()
            .unwrap_or(self.max_ticket);
    }
}

impl<P: fmt::Debug, const N: usize> fmt::Display for StrideScheduler<P, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "max_ticket: {} min_usage: {} total_usage: {} size: {}",
            self.max_ticket,
            self.min_usage,
            self.total_usage,
            self.heap.len()
        )?;
        for element in self.heap.iter() {
            write!(
                f,
                "{:.3}({:?}, {}) ",
                element.key, element.payload, element.usage
            )?;
        }
        Ok(())
    }
}
