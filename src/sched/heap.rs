//! Fixed-capacity binary min-heap keyed by pass values.
//!
//! The heap never grows: a push into a full heap fails and leaves both the
//! heap and the element untouched. Elements with equal keys come out in an
//! arbitrary order. Callers must not rely on any tie-breaking.

use crate::KernelError;
use arrayvec::ArrayVec;

/// An entry of the [`PriorityHeap`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeapElement<P> {
    /// The pass value. Smaller runs sooner.
    pub key: f64,
    /// Identity of the scheduled entity.
    pub payload: P,
    /// Ticket weight of the entity.
    pub usage: usize,
}

impl<P> HeapElement<P> {
    /// Creates a new element.
    pub const fn new(key: f64, payload: P, usage: usize) -> Self {
        Self {
            key,
            payload,
            usage,
        }
    }
}

/// A binary min-heap over [`HeapElement`]s with room for `N` elements.
///
/// The root (index 0) holds the smallest key.
pub struct PriorityHeap<P, const N: usize> {
    data: ArrayVec<HeapElement<P>, N>,
}

impl<P, const N: usize> Default for PriorityHeap<P, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P, const N: usize> PriorityHeap<P, N> {
    /// Creates an empty heap.
    pub const fn new() -> Self {
        Self {
            data: ArrayVec::new_const(),
        }
    }

    /// Number of elements in the heap.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the heap holds no element.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns true if another push would fail.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.data.is_full()
    }

    /// Maximum number of elements.
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// The element with the smallest key.
    pub fn top(&self) -> Option<&HeapElement<P>> {
        self.data.first()
    }

    /// The element at `index`, in heap order.
    pub fn get(&self, index: usize) -> Option<&HeapElement<P>> {
        self.data.get(index)
    }

    /// Iterates over the elements in heap (not sorted) order.
    pub fn iter(&self) -> impl Iterator<Item = &HeapElement<P>> {
        self.data.iter()
    }

    /// Index of the first element, in heap order, matching `pred`.
    pub fn position(&self, pred: impl FnMut(&HeapElement<P>) -> bool) -> Option<usize> {
        self.data.iter().position(pred)
    }

    /// Inserts `element` and returns the index it settled at.
    ///
    /// # Errors
    ///
    /// [`KernelError::NoSpace`] when the heap is full.
    pub fn push(&mut self, element: HeapElement<P>) -> Result<usize, KernelError> {
        self.data
            .try_push(element)
            .map_err(|_| KernelError::NoSpace)?;
        Ok(self.sift_up(self.data.len() - 1))
    }

    /// Removes and returns the element with the smallest key.
    pub fn pop(&mut self) -> Option<HeapElement<P>> {
        if self.data.is_empty() {
            return None;
        }
        // The last element takes the root's place.
        let root = self.data.swap_remove(0);
        self.sift_down(0);
        Some(root)
    }

    /// Overwrites the root with `element` and restores the heap order.
    ///
    /// # Errors
    ///
    /// [`KernelError::NoSuchEntry`] when the heap is empty.
    pub fn update_top(&mut self, element: HeapElement<P>) -> Result<(), KernelError> {
        let root = self.data.first_mut().ok_or(KernelError::NoSuchEntry)?;
        *root = element;
        self.sift_down(0);
        Ok(())
    }

    /// Adds `delta` (non-negative) to the key at `index` and restores the heap
    /// order. Returns the new index of the element.
    pub fn increase_key(&mut self, index: usize, delta: f64) -> Option<usize> {
        let element = self.data.get_mut(index)?;
        element.key += delta;
        Some(self.sift_down(index))
    }

    /// Replaces the usage of the element at `index`, returning the previous
    /// usage. Usage does not take part in the ordering.
    pub fn set_usage(&mut self, index: usize, usage: usize) -> Option<usize> {
        let element = self.data.get_mut(index)?;
        Some(core::mem::replace(&mut element.usage, usage))
    }

    /// Removes the element at `index`.
    ///
    /// The key is forced below every other key, the element is sifted up to
    /// the root and popped.
    pub fn remove_at(&mut self, index: usize) -> Option<HeapElement<P>> {
        let element = self.data.get_mut(index)?;
        let key = core::mem::replace(&mut element.key, f64::NEG_INFINITY);
        let root = self.sift_up(index);
        crate::invariant!(root == 0, "heap element did not reach the root");
        self.pop().map(|mut element| {
            element.key = key;
            element
        })
    }

    fn sift_up(&mut self, mut index: usize) -> usize {
        while index > 0 {
            let parent = (index - 1) / 2;
            if self.data[index].key < self.data[parent].key {
                self.data.swap(index, parent);
                index = parent;
            } else {
                break;
            }
        }
        index
    }

    fn sift_down(&mut self, mut index: usize) -> usize {
        let len = self.data.len();
        loop {
            let (left, right) = (2 * index + 1, 2 * index + 2);
            let mut smallest = index;
            if left < len && self.data[left].key < self.data[smallest].key {
                smallest = left;
            }
            if right < len && self.data[right].key < self.data[smallest].key {
                smallest = right;
            }
            if smallest == index {
                return index;
            }
            self.data.swap(index, smallest);
            index = smallest;
        }
    }
}
