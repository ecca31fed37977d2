//! Thread groups.
//!
//! A thread group is a master task plus the lightweight threads sharing its
//! address space. The disciplines only ever see the master: the group is one
//! schedulable unit. Which member actually runs is decided here, round-robin.
//!
//! The group only holds [`Tid`]s. The tasks themselves live in the
//! [`TaskTable`], so reaping a member can never leave a dangling reference
//! behind: a stale [`Tid`] simply stops resolving.
//!
//! [`TaskTable`]: super::TaskTable

use super::Tid;
use crate::{KernelError, NTHREAD};
use arrayvec::ArrayVec;

/// The members of a thread group and the round-robin cursor over them.
///
/// `members[0]` is the master. The cursor points at the member that is
/// examined first on the next dispatch.
#[derive(Debug, Default)]
pub struct ThreadGroup {
    members: ArrayVec<Tid, NTHREAD>,
    cursor: usize,
    current: Option<Tid>,
}

impl ThreadGroup {
    /// Forgets every member and makes `master` the only one.
    pub fn reset(&mut self, master: Tid) {
        self.members.clear();
        self.members.push(master);
        self.cursor = 0;
        self.current = None;
    }

    /// Forgets every member.
    pub fn clear(&mut self) {
        self.members.clear();
        self.cursor = 0;
        self.current = None;
    }

    /// The master of the group.
    pub fn master(&self) -> Option<Tid> {
        self.members.first().copied()
    }

    /// Members in round-robin order, the master first.
    pub fn members(&self) -> &[Tid] {
        &self.members
    }

    /// Number of members, the master included.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns true if the group has no member.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// The member most recently dispatched.
    pub fn current(&self) -> Option<Tid> {
        self.current
    }

    /// Returns true if `tid` belongs to the group.
    pub fn contains(&self, tid: Tid) -> bool {
        self.members.contains(&tid)
    }

    /// Adds `tid` at the end of the round-robin order.
    ///
    /// # Errors
    ///
    /// [`KernelError::NoSpace`] when the group already has [`NTHREAD`]
    /// members.
    pub fn join(&mut self, tid: Tid) -> Result<(), KernelError> {
        self.members.try_push(tid).map_err(|_| KernelError::NoSpace)
    }

    /// Removes `tid` from the group. The cursor keeps pointing at the same
    /// member, or at the successor of `tid` if it pointed at `tid`.
    pub fn leave(&mut self, tid: Tid) -> bool {
        let Some(index) = self.members.iter().position(|m| *m == tid) else {
            return false;
        };
        self.members.remove(index);
        if self.cursor > index {
            self.cursor -= 1;
        }
        if self.cursor >= self.members.len() {
            self.cursor = 0;
        }
        if self.current == Some(tid) {
            self.current = None;
        }
        true
    }

    /// The member the next [`dispatch`] would pick.
    ///
    /// [`dispatch`]: Self::dispatch
    pub fn peek(&self, runnable: impl FnMut(Tid) -> bool) -> Option<Tid> {
        self.scan(self.cursor, self.members.len(), runnable)
            .map(|index| self.members[index])
    }

    /// Picks the first runnable member starting from the cursor, wrapping
    /// once. The pick becomes current and the cursor moves past it.
    pub fn dispatch(&mut self, runnable: impl FnMut(Tid) -> bool) -> Option<Tid> {
        let index = self.scan(self.cursor, self.members.len(), runnable)?;
        Some(self.select(index))
    }

    /// Picks another runnable member than `from`, starting right after it.
    /// `from` itself is considered last.
    pub fn rotate(&mut self, from: Tid, runnable: impl FnMut(Tid) -> bool) -> Option<Tid> {
        let start = match self.members.iter().position(|m| *m == from) {
            Some(index) => index + 1,
            None => self.cursor,
        };
        let index = self.scan(start, self.members.len(), runnable)?;
        Some(self.select(index))
    }

    fn scan(&self, start: usize, count: usize, mut runnable: impl FnMut(Tid) -> bool) -> Option<usize> {
        let len = self.members.len();
        (0..count)
            .map(|offset| (start + offset) % len)
            .find(|index| runnable(self.members[*index]))
    }

    fn select(&mut self, index: usize) -> Tid {
        let tid = self.members[index];
        self.current = Some(tid);
        self.cursor = (index + 1) % self.members.len();
        tid
    }
}
