//! Two-dimensional storage for per-slot, per-worker objects.

use std::ops::{Index, IndexMut};

/// Row-major grid addressed by `(frame_slot, worker)`.
///
/// Every access is bounds-checked on both axes, so an out-of-range worker
/// index can never alias into the next slot's row.
#[derive(Debug, Clone)]
pub struct SlotGrid<T> {
    slots: usize,
    workers: usize,
    cells: Vec<T>,
}

impl<T> SlotGrid<T> {
    /// Build a grid by calling `init(slot, worker)` for every cell.
    pub fn try_from_fn<E>(
        slots: usize,
        workers: usize,
        mut init: impl FnMut(usize, usize) -> Result<T, E>,
    ) -> Result<Self, E> {
        let mut cells = Vec::with_capacity(slots * workers);
        for slot in 0..slots {
            for worker in 0..workers {
                cells.push(init(slot, worker)?);
            }
        }
        Ok(Self {
            slots,
            workers,
            cells,
        })
    }

    pub fn from_fn(slots: usize, workers: usize, mut init: impl FnMut(usize, usize) -> T) -> Self {
        let grid: Result<Self, std::convert::Infallible> =
            Self::try_from_fn(slots, workers, |s, w| Ok(init(s, w)));
        match grid {
            Ok(grid) => grid,
            Err(never) => match never {},
        }
    }

    #[inline]
    pub fn slots(&self) -> usize {
        self.slots
    }

    #[inline]
    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn get(&self, slot: usize, worker: usize) -> Option<&T> {
        self.offset(slot, worker).map(|i| &self.cells[i])
    }

    pub fn get_mut(&mut self, slot: usize, worker: usize) -> Option<&mut T> {
        self.offset(slot, worker).map(move |i| &mut self.cells[i])
    }

    /// All workers' cells for one frame slot.
    pub fn row(&self, slot: usize) -> &[T] {
        assert!(slot < self.slots, "slot {} out of range ({} slots)", slot, self.slots);
        &self.cells[slot * self.workers..(slot + 1) * self.workers]
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.cells.iter()
    }

    /// Consume the grid, yielding cells in row-major order.
    pub fn into_cells(self) -> Vec<T> {
        self.cells
    }

    fn offset(&self, slot: usize, worker: usize) -> Option<usize> {
        (slot < self.slots && worker < self.workers).then(|| slot * self.workers + worker)
    }
}

impl<T> Index<(usize, usize)> for SlotGrid<T> {
    type Output = T;

    fn index(&self, (slot, worker): (usize, usize)) -> &T {
        match self.get(slot, worker) {
            Some(cell) => cell,
            None => panic!(
                "grid index ({}, {}) out of range ({} x {})",
                slot, worker, self.slots, self.workers
            ),
        }
    }
}

impl<T> IndexMut<(usize, usize)> for SlotGrid<T> {
    fn index_mut(&mut self, (slot, worker): (usize, usize)) -> &mut T {
        let (slots, workers) = (self.slots, self.workers);
        match self.get_mut(slot, worker) {
            Some(cell) => cell,
            None => panic!(
                "grid index ({}, {}) out of range ({} x {})",
                slot, worker, slots, workers
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cells_are_addressed_by_slot_then_worker() {
        let grid = SlotGrid::from_fn(3, 4, |s, w| (s, w));
        assert_eq!(grid[(2, 1)], (2, 1));
        assert_eq!(grid.row(1), &[(1, 0), (1, 1), (1, 2), (1, 3)]);
        assert_eq!(grid.iter().count(), 12);
    }

    #[test]
    fn worker_overflow_does_not_alias_next_slot() {
        let grid = SlotGrid::from_fn(2, 3, |s, w| s * 10 + w);
        // (0, 3) would be flat index 3 == (1, 0) with manual arithmetic.
        assert!(grid.get(0, 3).is_none());
        assert!(grid.get(2, 0).is_none());
        assert_eq!(grid.get(1, 0), Some(&10));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn indexing_out_of_range_panics() {
        let grid = SlotGrid::from_fn(2, 2, |_, _| 0u8);
        let _ = grid[(0, 2)];
    }

    #[test]
    fn fallible_construction_stops_at_first_error() {
        let mut built = 0;
        let result: Result<SlotGrid<u32>, &str> = SlotGrid::try_from_fn(2, 2, |s, w| {
            if (s, w) == (1, 0) {
                Err("boom")
            } else {
                built += 1;
                Ok(0)
            }
        });
        assert_eq!(result.unwrap_err(), "boom");
        assert_eq!(built, 2);
    }

    #[test]
    fn mutation_through_index() {
        let mut grid = SlotGrid::from_fn(2, 2, |_, _| 0);
        grid[(1, 1)] = 7;
        assert_eq!(grid.into_cells(), vec![0, 0, 0, 7]);
    }
}
