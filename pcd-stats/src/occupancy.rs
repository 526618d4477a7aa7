//! Sparse 2-D occupancy bitmap.
//!
//! Cells are `floor(coordinate / spacing)` pairs. The row of the first cell
//! becomes the grid's row anchor and every row anchors its columns on the
//! first cell it receives, so storage only ever exists near touched cells:
//!
//! ```text
//!            row >= anchor        row < anchor
//!          +---------------+    +---------------+
//!  per row | minus | plus  |    | minus | plus  |   <- 32-bit words,
//!          +---------------+    +---------------+      split at the row's
//!                                                      column anchor
//! ```

use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
};

use pcd_core::pointcloud::point::PointRecord;

use crate::{
    error::StatsError,
    sparse::{grow_to, join_offset, split_offset, GrowthPolicy, Side},
};

const WORD_BITS: usize = 32;

/// Inclusive bounding box of touched cells.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CellBounds {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl CellBounds {
    fn cell(x: i32, y: i32) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
        }
    }

    fn include(&mut self, x: i32, y: i32) {
        if x < self.min_x {
            self.min_x = x;
        } else if x > self.max_x {
            self.max_x = x;
        }
        if y < self.min_y {
            self.min_y = y;
        } else if y > self.max_y {
            self.max_y = y;
        }
    }

    pub fn columns(&self) -> u64 {
        (self.max_x as i64 - self.min_x as i64 + 1) as u64
    }

    pub fn rows(&self) -> u64 {
        (self.max_y as i64 - self.min_y as i64 + 1) as u64
    }
}

#[derive(Debug, Clone, Default)]
struct Row {
    col_anchor: Option<i32>,
    plus: Vec<u32>,
    minus: Vec<u32>,
}

impl Row {
    fn words(&self, side: Side) -> &Vec<u32> {
        match side {
            Side::Plus => &self.plus,
            Side::Minus => &self.minus,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Band {
    rows: Vec<Row>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum GridState {
    Unanchored,
    Anchored { row_anchor: i32, bounds: CellBounds },
}

#[derive(Debug, Clone)]
pub struct OccupancyGrid {
    spacing: f64,
    state: GridState,
    above: Band,
    below: Band,
    num_occupied: u64,
    growth: GrowthPolicy,
}

impl OccupancyGrid {
    pub fn new(spacing: f64) -> Result<Self, StatsError> {
        if !(spacing.is_finite() && spacing > 0.0) {
            return Err(StatsError::InvalidSpacing(spacing));
        }
        Ok(Self {
            spacing,
            state: GridState::Unanchored,
            above: Band::default(),
            below: Band::default(),
            num_occupied: 0,
            growth: GrowthPolicy::default(),
        })
    }

    pub fn with_growth(mut self, growth: GrowthPolicy) -> Self {
        self.growth = growth;
        self
    }

    pub fn spacing(&self) -> f64 {
        self.spacing
    }

    pub fn is_anchored(&self) -> bool {
        matches!(self.state, GridState::Anchored { .. })
    }

    /// Bounding box of all touched cells, `None` before the first insert.
    pub fn bounds(&self) -> Option<CellBounds> {
        match self.state {
            GridState::Anchored { bounds, .. } => Some(bounds),
            GridState::Unanchored => None,
        }
    }

    pub fn num_occupied(&self) -> u64 {
        self.num_occupied
    }

    pub fn cell_of(&self, x: f64, y: f64) -> (i32, i32) {
        (
            (x / self.spacing).floor() as i32,
            (y / self.spacing).floor() as i32,
        )
    }

    /// Marks the cell under the point. Returns `true` if the cell was empty.
    pub fn add_point(&mut self, point: &PointRecord) -> Result<bool, StatsError> {
        let (x, y) = self.cell_of(point.x, point.y);
        self.add_cell(x, y)
    }

    /// Marks cell `(x, y)`. Returns `true` if the cell was empty.
    pub fn add_cell(&mut self, x: i32, y: i32) -> Result<bool, StatsError> {
        let row_anchor = self.anchor_on(x, y);
        let (side, row_index) = split_offset(y as i64 - row_anchor as i64);
        let band = match side {
            Side::Plus => &mut self.above,
            Side::Minus => &mut self.below,
        };
        if grow_to(&mut band.rows, row_index, self.growth.rows, "occupancy rows")? {
            log::debug!("occupancy band grew to {} rows", band.rows.len());
        }

        let row = &mut band.rows[row_index];
        let col_anchor = *row.col_anchor.get_or_insert(x);
        let (col_side, bit_index) = split_offset(x as i64 - col_anchor as i64);
        let words = match col_side {
            Side::Plus => &mut row.plus,
            Side::Minus => &mut row.minus,
        };
        let word = bit_index / WORD_BITS;
        let bit = 1u32 << (bit_index % WORD_BITS);
        grow_to(words, word, self.growth.words, "occupancy words")?;
        if words[word] & bit != 0 {
            return Ok(false);
        }
        words[word] |= bit;
        self.num_occupied += 1;
        Ok(true)
    }

    fn anchor_on(&mut self, x: i32, y: i32) -> i32 {
        if let GridState::Anchored { row_anchor, bounds } = &mut self.state {
            bounds.include(x, y);
            return *row_anchor;
        }
        log::debug!("occupancy grid anchored at row {}", y);
        self.state = GridState::Anchored {
            row_anchor: y,
            bounds: CellBounds::cell(x, y),
        };
        y
    }

    pub fn occupied_point(&self, point: &PointRecord) -> bool {
        let (x, y) = self.cell_of(point.x, point.y);
        self.occupied_cell(x, y)
    }

    /// Whether cell `(x, y)` has been marked. Never allocates.
    pub fn occupied_cell(&self, x: i32, y: i32) -> bool {
        let GridState::Anchored { row_anchor, .. } = self.state else {
            return false;
        };
        let (side, row_index) = split_offset(y as i64 - row_anchor as i64);
        let Some(row) = self.band(side).rows.get(row_index) else {
            return false;
        };
        let Some(col_anchor) = row.col_anchor else {
            return false;
        };
        let (col_side, bit_index) = split_offset(x as i64 - col_anchor as i64);
        row.words(col_side)
            .get(bit_index / WORD_BITS)
            .is_some_and(|word| word & (1u32 << (bit_index % WORD_BITS)) != 0)
    }

    fn band(&self, side: Side) -> &Band {
        match side {
            Side::Plus => &self.above,
            Side::Minus => &self.below,
        }
    }

    /// All occupied cells, in storage order.
    pub fn cells(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        let row_anchor = match self.state {
            GridState::Anchored { row_anchor, .. } => row_anchor as i64,
            GridState::Unanchored => 0,
        };
        [Side::Plus, Side::Minus]
            .into_iter()
            .flat_map(move |side| {
                self.band(side)
                    .rows
                    .iter()
                    .enumerate()
                    .map(move |(i, row)| ((row_anchor + join_offset(side, i)) as i32, row))
            })
            .flat_map(|(y, row)| {
                let col_anchor = row.col_anchor.unwrap_or(0) as i64;
                [Side::Plus, Side::Minus]
                    .into_iter()
                    .flat_map(move |side| {
                        row.words(side)
                            .iter()
                            .enumerate()
                            .filter(|(_, word)| **word != 0)
                            .flat_map(move |(w, &word)| {
                                (0..WORD_BITS)
                                    .filter(move |bit| word & (1u32 << bit) != 0)
                                    .map(move |bit| join_offset(side, w * WORD_BITS + bit))
                            })
                    })
                    .map(move |offset| ((col_anchor + offset) as i32, y))
            })
    }

    pub fn allocated_rows(&self) -> usize {
        self.above.rows.len() + self.below.rows.len()
    }

    /// Bitset words currently allocated over all rows.
    pub fn allocated_words(&self) -> usize {
        self.above
            .rows
            .iter()
            .chain(self.below.rows.iter())
            .map(|row| row.plus.len() + row.minus.len())
            .sum()
    }

    /// Drops all cells and storage. The next insert anchors the grid anew.
    pub fn reset(&mut self) {
        self.state = GridState::Unanchored;
        self.above = Band::default();
        self.below = Band::default();
        self.num_occupied = 0;
    }

    /// Marks every cell of `other`, which must use the same spacing.
    pub fn merge(&mut self, other: &OccupancyGrid) -> Result<(), StatsError> {
        if self.spacing != other.spacing {
            return Err(StatsError::IncompatibleMerge(format!(
                "occupancy grid with spacing {} into spacing {}",
                other.spacing, self.spacing
            )));
        }
        for (x, y) in other.cells() {
            self.add_cell(x, y)?;
        }
        Ok(())
    }

    /// Writes the bounding box of the grid as an ESRI ASCII grid with
    /// `1` for occupied and `0` for empty cells. The output is dense, so
    /// check [`bounds`](Self::bounds) before calling this on spread-out data.
    pub fn write_asc_grid<P: AsRef<Path>>(&self, path: P) -> Result<(), StatsError> {
        let path = path.as_ref();
        let io_error = |source| StatsError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::create(path).map_err(io_error)?;
        let mut writer = BufWriter::new(file);
        self.write_asc(&mut writer).map_err(io_error)?;
        writer.flush().map_err(io_error)?;
        log::info!("wrote occupancy grid to {:?}", path);
        Ok(())
    }

    pub fn write_asc<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let bounds = self.bounds().unwrap_or_default();
        writeln!(w, "ncols {}", bounds.columns())?;
        writeln!(w, "nrows {}", bounds.rows())?;
        writeln!(w, "xllcorner {:.6}", self.spacing * bounds.min_x as f64)?;
        writeln!(w, "yllcorner {:.6}", self.spacing * bounds.min_y as f64)?;
        writeln!(w, "cellsize {:.6}", self.spacing)?;
        writeln!(w, "NODATA_value 0")?;
        writeln!(w)?;
        for y in bounds.min_y..=bounds.max_y {
            for x in bounds.min_x..=bounds.max_x {
                let token = if self.occupied_cell(x, y) { "1 " } else { "0 " };
                w.write_all(token.as_bytes())?;
            }
            writeln!(w)?;
        }
        Ok(())
    }
}
