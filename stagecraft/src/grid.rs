//! Row-major cell storage used by tile layers.
//!
//! Out-of-range reads return `None` and out-of-range writes are ignored, so
//! callers never have to bounds-check before touching a cell.

/// A cell position (grid coordinates). Negative values are valid inputs and simply fall outside the grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GridCoord {
    pub x: i32,
    pub y: i32,
}

impl GridCoord {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Fixed-size grid storing one value per cell.
#[derive(Clone, Debug, PartialEq)]
pub struct Grid<T> {
    width: usize,
    height: usize,
    cells: Vec<T>, // Row-major: [y * width + x]
}

impl<T: Clone> Grid<T> {
    pub fn new(width: usize, height: usize, default: T) -> Self {
        Self {
            width,
            height,
            cells: vec![default; width * height],
        }
    }

    /// Build a grid from nested rows. The width is taken from the first row;
    /// shorter rows are padded with `default` and longer rows are truncated.
    pub fn from_rows(rows: &[Vec<T>], default: T) -> Self {
        let height = rows.len();
        let width = rows.first().map_or(0, Vec::len);
        let mut cells = Vec::with_capacity(width * height);
        for row in rows {
            cells.extend(row.iter().take(width).cloned());
            cells.extend(std::iter::repeat(default.clone()).take(width.saturating_sub(row.len())));
        }
        Self {
            width,
            height,
            cells,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn is_valid(&self, coord: &GridCoord) -> bool {
        coord.x >= 0
            && coord.x < self.width as i32
            && coord.y >= 0
            && coord.y < self.height as i32
    }

    fn index(&self, coord: GridCoord) -> Option<usize> {
        self.is_valid(&coord)
            .then(|| (coord.y as usize) * self.width + (coord.x as usize))
    }

    pub fn get(&self, coord: GridCoord) -> Option<&T> {
        self.index(coord).and_then(|i| self.cells.get(i))
    }

    pub fn get_mut(&mut self, coord: GridCoord) -> Option<&mut T> {
        self.index(coord).and_then(move |i| self.cells.get_mut(i))
    }

    /// Set the cell at `coord`. Returns `false` if the coordinate is out of bounds.
    pub fn set(&mut self, coord: GridCoord, value: T) -> bool {
        if let Some(cell) = self.get_mut(coord) {
            *cell = value;
            true
        } else {
            false
        }
    }

    /// Change the dimensions, keeping the values of cells that exist in both sizes.
    pub fn resize(&mut self, width: usize, height: usize, default: T) {
        if width == self.width && height == self.height {
            return;
        }
        let mut next = Grid::new(width, height, default);
        for y in 0..height.min(self.height) {
            for x in 0..width.min(self.width) {
                let coord = GridCoord::new(x as i32, y as i32);
                if let Some(value) = self.get(coord) {
                    next.set(coord, value.clone());
                }
            }
        }
        *self = next;
    }

    /// Iterate over all coordinates in row-major order.
    pub fn iter_coords(&self) -> impl Iterator<Item = GridCoord> {
        let width = self.width as i32;
        let height = self.height as i32;
        (0..height).flat_map(move |y| (0..width).map(move |x| GridCoord::new(x, y)))
    }

    /// Iterate over all cells with their coordinates.
    pub fn iter(&self) -> impl Iterator<Item = (GridCoord, &T)> {
        self.iter_coords().zip(self.cells.iter())
    }
}
