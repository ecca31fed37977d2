//! Synchronization primitives used by the scheduler.
//!
//! Scheduling state is shared among the per-CPU loops. It is protected by one
//! [`SpinLock`] whose guard must be released explicitly with
//! [`SpinLockGuard::unlock`]. The loop releases the lock around every context
//! switch, so a guard silently living across a switch is always a bug.

pub mod spinlock;

pub use spinlock::{SpinLock, SpinLockGuard, WouldBlock};
