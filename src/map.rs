use crate::{
    error::{LocalizationError, Result},
    sensors::SensorReading,
    utility::{clamp, Point, Pose},
};
use bitvec::prelude::*;
use log::info;
use rand::Rng;
use std::{fmt, path::Path};

/// Probability that an interior cell is generated as an obstacle.
pub const DEFAULT_OBSTACLE_DENSITY: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cell {
    Free,
    Occupied,
}

/// A grid of free and occupied square cells covering `width` x `height`.
///
/// The outer ring of cells is always occupied, so anything cast or moved inside
/// the map stays inside it. Row 0 is at `y = 0` and "up" means decreasing `y`.
#[derive(Debug, Clone)]
pub struct OccupancyMap {
    pub width: f64,
    pub height: f64,
    pub cell_size: f64,
    rows: usize,
    cols: usize,
    occupied: BitVec,
}

impl OccupancyMap {
    /// Creates a map with a free interior and an occupied border.
    pub fn new(width: f64, height: f64, cell_size: f64) -> Result<Self> {
        for (name, value) in [("width", width), ("height", height), ("cell size", cell_size)] {
            if !value.is_finite() || value <= 0. {
                return Err(LocalizationError::Configuration(format!(
                    "map {} must be a positive number, got {}",
                    name, value
                )));
            }
        }
        let rows = (height / cell_size).floor() as usize;
        let cols = (width / cell_size).floor() as usize;
        if rows <= 2 || cols <= 2 {
            return Err(LocalizationError::Configuration(format!(
                "a {}x{} map with cell size {} has {} rows and {} columns, \
                 at least 3 of each are needed to fit a border and an interior",
                width, height, cell_size, rows, cols
            )));
        }
        let mut map = Self {
            width,
            height,
            cell_size,
            rows,
            cols,
            occupied: BitVec::repeat(false, rows * cols),
        };
        map.seal_border();
        Ok(map)
    }

    /// Creates a map and fills it with random obstacles, see [`OccupancyMap::generate`].
    pub fn random<R: Rng>(
        width: f64,
        height: f64,
        cell_size: f64,
        density: f64,
        rng: &mut R,
    ) -> Result<Self> {
        let mut map = Self::new(width, height, cell_size)?;
        map.generate(rng, density)?;
        Ok(map)
    }

    /// Makes every interior cell an obstacle independently with probability `density`,
    /// then seals the border.
    pub fn generate<R: Rng>(&mut self, rng: &mut R, density: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&density) {
            return Err(LocalizationError::Configuration(format!(
                "obstacle density must be within [0, 1], got {}",
                density
            )));
        }
        for idx in 0..self.occupied.len() {
            self.occupied.set(idx, rng.gen_bool(density));
        }
        self.seal_border();
        info!(
            "Generated {}x{} grid ({} free cells, density {})",
            self.cols,
            self.rows,
            self.free_cell_count(),
            density
        );
        Ok(())
    }

    /// Parses a map from a text layout with one line per row,
    /// `#` for an occupied cell and `.` for a free cell. For example,
    /// ```text
    /// #####
    /// #..##
    /// #...#
    /// #####
    /// ```
    /// Blank lines are skipped. The border is sealed regardless of what the layout says.
    pub fn parse(cell_size: f64, layout: &str) -> Result<Self> {
        let lines: Vec<&str> = layout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        let cols = lines.first().map_or(0, |line| line.chars().count());
        if let Some((idx, line)) = lines
            .iter()
            .enumerate()
            .find(|(_, line)| line.chars().count() != cols)
        {
            return Err(LocalizationError::Configuration(format!(
                "map row {} has {} cells but row 0 has {}",
                idx,
                line.chars().count(),
                cols
            )));
        }
        let mut map = Self::new(
            cols as f64 * cell_size,
            lines.len() as f64 * cell_size,
            cell_size,
        )?;
        for (row, line) in lines.iter().enumerate() {
            for (col, symbol) in line.chars().enumerate() {
                let cell = match symbol {
                    '#' => Cell::Occupied,
                    '.' => Cell::Free,
                    other => {
                        return Err(LocalizationError::Configuration(format!(
                            "unexpected map symbol {:?} at row {}, column {}",
                            other, row, col
                        )))
                    }
                };
                map.set_cell(row, col, cell);
            }
        }
        Ok(map)
    }

    /// Reads a layout file in the format accepted by [`OccupancyMap::parse`].
    pub fn from_file<P: AsRef<Path>>(path: P, cell_size: f64) -> Result<Self> {
        let layout = std::fs::read_to_string(path)?;
        Self::parse(cell_size, &layout)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Returns `Cell::Occupied` for indices outside of the grid
    pub fn cell(&self, row: usize, col: usize) -> Cell {
        if row >= self.rows || col >= self.cols || self.occupied[row * self.cols + col] {
            Cell::Occupied
        } else {
            Cell::Free
        }
    }

    /// Sets an interior cell. Border and out-of-grid writes are ignored.
    pub fn set_cell(&mut self, row: usize, col: usize, cell: Cell) {
        if row == 0 || col == 0 || row + 1 >= self.rows || col + 1 >= self.cols {
            return;
        }
        self.occupied.set(row * self.cols + col, cell == Cell::Occupied);
    }

    /// The `(row, col)` of the cell containing `point`, clamped to the grid.
    pub fn cell_index(&self, point: Point) -> (usize, usize) {
        let row = clamp(
            (point.y / self.cell_size).floor() as isize,
            0,
            Some(self.rows as isize),
        );
        let col = clamp(
            (point.x / self.cell_size).floor() as isize,
            0,
            Some(self.cols as isize),
        );
        (row as usize, col as usize)
    }

    pub fn cell_center(&self, row: usize, col: usize) -> Point {
        Point {
            x: (col as f64 + 0.5) * self.cell_size,
            y: (row as f64 + 0.5) * self.cell_size,
        }
    }

    /// Whether `(x, y)` lies on the grid inside a free cell.
    pub fn is_free(&self, x: f64, y: f64) -> bool {
        let inside = x >= 0.
            && y >= 0.
            && x < self.cols as f64 * self.cell_size
            && y < self.rows as f64 * self.cell_size;
        if !inside {
            return false;
        }
        let (row, col) = self.cell_index((x, y).into());
        self.cell(row, col) == Cell::Free
    }

    pub fn is_free_pose(&self, pose: &Pose) -> bool {
        self.is_free(pose.position.x, pose.position.y)
    }

    pub fn free_cells(&self) -> Vec<(usize, usize)> {
        self.occupied
            .iter_zeros()
            .map(|idx| (idx / self.cols, idx % self.cols))
            .collect()
    }

    pub fn free_cell_count(&self) -> usize {
        self.occupied.count_zeros()
    }

    /// Distances from `(x, y)` to the nearest occupied cell face in each cardinal direction.
    ///
    /// Whole free cells are counted outward from the containing cell and the count is
    /// corrected by the offset of `(x, y)` inside its cell, so readings vary continuously
    /// with position. Positions off the grid are clamped onto it first.
    pub fn ray_cast(&self, x: f64, y: f64) -> SensorReading {
        let (row, col) = self.cell_index((x, y).into());
        let x_offset = (x - col as f64 * self.cell_size).max(0.).min(self.cell_size);
        let y_offset = (y - row as f64 * self.cell_size).max(0.).min(self.cell_size);
        let run = |d_row: isize, d_col: isize| -> f64 {
            self.free_run(row, col, d_row, d_col) as f64 * self.cell_size
        };
        SensorReading {
            up: (run(-1, 0) - self.cell_size + y_offset).max(0.),
            down: (run(1, 0) - y_offset).max(0.),
            left: (run(0, -1) - self.cell_size + x_offset).max(0.),
            right: (run(0, 1) - x_offset).max(0.),
        }
    }

    /// Number of consecutive free cells starting at (and including) `(row, col)`.
    fn free_run(&self, row: usize, col: usize, d_row: isize, d_col: isize) -> usize {
        let (mut row, mut col) = (row as isize, col as isize);
        let mut count = 0;
        while row >= 0 && col >= 0 && self.cell(row as usize, col as usize) == Cell::Free {
            count += 1;
            row += d_row;
            col += d_col;
        }
        count
    }

    fn seal_border(&mut self) {
        let (rows, cols) = (self.rows, self.cols);
        for col in 0..cols {
            self.occupied.set(col, true);
            self.occupied.set((rows - 1) * cols + col, true);
        }
        for row in 0..rows {
            self.occupied.set(row * cols, true);
            self.occupied.set(row * cols + cols - 1, true);
        }
    }
}

impl fmt::Display for OccupancyMap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        const OCCUPIED_TILE: char = '◾';
        const FREE_TILE: char = '◽';
        for row in 0..self.rows {
            let line = (0..self.cols)
                .map(|col| match self.cell(row, col) {
                    Cell::Occupied => OCCUPIED_TILE,
                    Cell::Free => FREE_TILE,
                })
                .collect::<String>();
            if row + 1 < self.rows {
                writeln!(f, "{}", line)?;
            } else {
                write!(f, "{}", line)?;
            }
        }
        Ok(())
    }
}
