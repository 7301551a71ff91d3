//! Frame grids and their text wire format.
//!
//! A frame is one simulation snapshot: a fixed-shape grid of cell ids where
//! 0 means dead. On the wire it is a single line of comma-separated integers,
//! row after row, terminated by a newline.

use std::fmt;

use crate::error::{CfsError, CfsResult};

/// A fixed-shape grid of cell ids, stored row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: usize,
    height: usize,
    cells: Vec<i32>,
}

impl Frame {
    /// An all-dead frame.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            cells: vec![0; width * height],
        }
    }

    /// Wrap existing row-major cells. The cell count must match the shape.
    pub fn from_cells(width: usize, height: usize, cells: Vec<i32>) -> CfsResult<Self> {
        if cells.len() != width * height {
            return Err(CfsError::InvalidWire(format!(
                "expected {} cells, got {}",
                width * height,
                cells.len()
            )));
        }
        Ok(Self {
            width,
            height,
            cells,
        })
    }

    /// Build a frame from a closure over `(row, col)`.
    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> i32) -> Self {
        let cells = (0..height)
            .flat_map(|row| (0..width).map(move |col| (row, col)))
            .map(|(row, col)| f(row, col))
            .collect();
        Self {
            width,
            height,
            cells,
        }
    }

    /// Parse a wire line into a `width` x `height` frame.
    ///
    /// Fewer values than cells are zero-padded at the end; more is an error.
    pub fn from_wire(line: &str, width: usize, height: usize) -> CfsResult<Self> {
        let values = parse_values(line)?;
        if values.len() > width * height {
            return Err(CfsError::InvalidWire(format!(
                "{} values do not fit a {}x{} frame",
                values.len(),
                width,
                height
            )));
        }
        let mut frame = Self::new(width, height);
        frame.cells[..values.len()].copy_from_slice(&values);
        Ok(frame)
    }

    /// Parse a wire line describing a `src_width` x `src_height` grid and
    /// place it in the top-left corner of a `width` x `height` frame.
    ///
    /// The simulation grid can be smaller than the sector shape; the rest of
    /// the sector stays dead.
    pub fn from_wire_sized(
        line: &str,
        src_width: usize,
        src_height: usize,
        width: usize,
        height: usize,
    ) -> CfsResult<Self> {
        if src_width > width || src_height > height {
            return Err(CfsError::FrameShape {
                expected_width: width,
                expected_height: height,
                width: src_width,
                height: src_height,
            });
        }
        let src = Self::from_wire(line, src_width, src_height)?;
        Ok(Self::from_fn(width, height, |row, col| {
            if row < src_height && col < src_width {
                src.get(row, col)
            } else {
                0
            }
        }))
    }

    /// Serialize to the wire format, including the trailing newline.
    pub fn to_wire(&self) -> String {
        let mut line = self
            .cells
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(",");
        line.push('\n');
        line
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn cells(&self) -> &[i32] {
        &self.cells
    }

    pub fn get(&self, row: usize, col: usize) -> i32 {
        self.cells[row * self.width + col]
    }

    /// Iterate over rows.
    pub fn rows(&self) -> impl Iterator<Item = &[i32]> {
        self.cells.chunks(self.width.max(1))
    }

    /// Number of live (non-zero) cells.
    pub fn live_cells(&self) -> usize {
        self.cells.iter().filter(|&&c| c != 0).count()
    }
}

/// Column-aligned table, one row per line.
impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .cells
            .iter()
            .map(|c| c.to_string().len())
            .max()
            .unwrap_or(1);
        for row in self.rows() {
            let line = row
                .iter()
                .map(|c| format!("{:<width$}", c, width = width))
                .collect::<Vec<_>>()
                .join(" ");
            writeln!(f, "{}", line.trim_end())?;
        }
        Ok(())
    }
}

fn parse_values(line: &str) -> CfsResult<Vec<i32>> {
    let line = line.trim_end_matches(['\n', '\r']);
    if line.trim().is_empty() {
        return Ok(Vec::new());
    }
    line.split(',')
        .map(|token| {
            let token = token.trim();
            token
                .parse::<i32>()
                .map_err(|_| CfsError::InvalidWire(format!("not an integer: '{}'", token)))
        })
        .collect()
}
