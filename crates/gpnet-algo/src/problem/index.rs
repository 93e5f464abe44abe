//! Global index allocation.
//!
//! One [`IndexAllocator`] exists per segment (equations, states, controls,
//! constraints). Components reserve contiguous ranges in a fixed arena order,
//! so within a segment the reserved ranges partition `[0, total)`.

use serde::{Deserialize, Serialize};

/// Half-open range `[start, end)` of global indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndexRange {
    pub start: usize,
    pub end: usize,
}

impl IndexRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    pub fn contains(&self, index: usize) -> bool {
        self.start <= index && index < self.end
    }

    pub fn indices(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }
}

/// Hands out consecutive ranges of one segment.
#[derive(Debug, Clone, Default)]
pub struct IndexAllocator {
    next: usize,
}

impl IndexAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reserve(&mut self, count: usize) -> IndexRange {
        let range = IndexRange::new(self.next, self.next + count);
        self.next += count;
        range
    }

    /// Total number of indices handed out so far.
    pub fn total(&self) -> usize {
        self.next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservations_are_contiguous() {
        let mut alloc = IndexAllocator::new();
        let a = alloc.reserve(3);
        let empty = alloc.reserve(0);
        let b = alloc.reserve(2);
        assert_eq!(a, IndexRange::new(0, 3));
        assert!(empty.is_empty());
        assert_eq!(b, IndexRange::new(3, 5));
        assert_eq!(alloc.total(), 5);
        assert!(b.contains(4) && !b.contains(5));
    }
}
