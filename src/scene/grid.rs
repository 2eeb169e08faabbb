//! NX x NY instance layout.
//!
//! Instance `n` occupies cell `(n % NX, n / NX)` of the framebuffer. Cells are
//! computed with integer edges so neighbouring viewports share a border but
//! never overlap.

use crate::frame::Extent;

/// Pixel rectangle inside the framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceGrid {
    pub nx: u32,
    pub ny: u32,
}

impl InstanceGrid {
    pub fn new(nx: u32, ny: u32) -> Self {
        Self {
            nx: nx.max(1),
            ny: ny.max(1),
        }
    }

    /// Total draw instances.
    #[inline]
    pub fn count(&self) -> usize {
        self.nx as usize * self.ny as usize
    }

    pub fn cell(&self, n: usize) -> (u32, u32) {
        let nx = self.nx as usize;
        ((n % nx) as u32, (n / nx) as u32)
    }

    /// Viewport of instance `n` for a framebuffer of `extent`.
    pub fn cell_rect(&self, n: usize, extent: Extent) -> CellRect {
        assert!(n < self.count(), "instance {} outside a {}x{} grid", n, self.nx, self.ny);
        let (col, row) = self.cell(n);

        let edge = |i: u32, cells: u32, size: u32| (u64::from(i) * u64::from(size) / u64::from(cells)) as u32;
        let x0 = edge(col, self.nx, extent.width);
        let x1 = edge(col + 1, self.nx, extent.width);
        let y0 = edge(row, self.ny, extent.height);
        let y1 = edge(row + 1, self.ny, extent.height);

        CellRect {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cells_are_row_major() {
        let grid = InstanceGrid::new(3, 3);
        assert_eq!(grid.count(), 9);
        assert_eq!(grid.cell(0), (0, 0));
        assert_eq!(grid.cell(4), (1, 1));
        assert_eq!(grid.cell(5), (2, 1));
        assert_eq!(grid.cell(8), (2, 2));
    }

    #[test]
    fn cells_tile_the_framebuffer_without_overlap() {
        let grid = InstanceGrid::new(3, 2);
        let extent = Extent::new(100, 51);
        let mut covered = vec![0u8; 100 * 51];

        for n in 0..grid.count() {
            let rect = grid.cell_rect(n, extent);
            for y in rect.y..rect.y + rect.height {
                for x in rect.x..rect.x + rect.width {
                    covered[(y * 100 + x) as usize] += 1;
                }
            }
        }
        assert!(covered.iter().all(|&c| c == 1));
    }

    #[test]
    fn zero_dimensions_are_raised_to_one() {
        let grid = InstanceGrid::new(0, 4);
        assert_eq!(grid.nx, 1);
        assert_eq!(grid.count(), 4);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn huge_grids_count_without_overflow() {
        let grid = InstanceGrid::new(70_000, 70_000);
        assert_eq!(grid.count(), 4_900_000_000);
        assert_eq!(grid.cell(4_899_999_999), (69_999, 69_999));
    }

    #[test]
    #[should_panic(expected = "outside")]
    fn instance_past_the_grid_panics() {
        InstanceGrid::new(2, 2).cell_rect(4, Extent::new(10, 10));
    }
}
