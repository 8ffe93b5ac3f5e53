//! Pixel grid and its packed byte representation.
//!
//! The display controller scans column by column. Each column is split into
//! blocks of eight vertically stacked pixels and every block becomes one byte,
//! most significant bit on top:
//!
//! ```text
//! column x:  y = 0 ─ bit 7 ┐
//!            y = 1 ─ bit 6 │ byte x * BLOCKS + 0
//!            ...           │
//!            y = 7 ─ bit 0 ┘
//!            y = 8 ─ bit 7 ┐ byte x * BLOCKS + 1
//!            ...           ┘
//! ```

use std::fmt;

use crate::{ProtoError, ProtoResult};

/// Number of pixel columns on the panel.
pub const WIDTH: usize = 84;
/// Number of pixel rows on the panel.
pub const HEIGHT: usize = 16;

const _: () = assert!(HEIGHT % 8 == 0, "grid height must be a multiple of 8");

/// Packed bytes per column.
pub const BLOCKS_PER_COLUMN: usize = HEIGHT / 8;
/// Length of a packed bitmap, and the only length a picture frame may declare.
pub const PACKED_LEN: usize = BLOCKS_PER_COLUMN * WIDTH;

/// Fixed-size monochrome pixel matrix, addressed as `(x, y)` with the origin
/// in the top-left corner.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelGrid {
    columns: [[bool; HEIGHT]; WIDTH],
}

impl PixelGrid {
    /// All pixels off.
    pub fn new() -> Self {
        Self::filled(false)
    }

    pub fn filled(on: bool) -> Self {
        Self {
            columns: [[on; HEIGHT]; WIDTH],
        }
    }

    pub fn get(&self, x: usize, y: usize) -> Option<bool> {
        self.columns.get(x).and_then(|column| column.get(y)).copied()
    }

    pub fn set(&mut self, x: usize, y: usize, on: bool) -> ProtoResult<()> {
        let pixel = self
            .columns
            .get_mut(x)
            .and_then(|column| column.get_mut(y))
            .ok_or(ProtoError::OutOfBounds { x, y })?;
        *pixel = on;
        Ok(())
    }

    /// Flips one pixel and returns its new value.
    pub fn toggle(&mut self, x: usize, y: usize) -> ProtoResult<bool> {
        let current = self.get(x, y).ok_or(ProtoError::OutOfBounds { x, y })?;
        self.set(x, y, !current)?;
        Ok(!current)
    }

    pub fn fill(&mut self, on: bool) {
        for column in self.columns.iter_mut() {
            column.fill(on);
        }
    }

    pub fn lit_count(&self) -> usize {
        self.columns
            .iter()
            .map(|column| column.iter().filter(|on| **on).count())
            .sum()
    }

    /// Text rendering, one line per row. `invert` swaps lit and dark the way
    /// the device does when its invert flag is set.
    pub fn render(&self, invert: bool) -> String {
        let mut out = String::with_capacity((WIDTH + 1) * HEIGHT);
        for y in 0..HEIGHT {
            for column in &self.columns {
                out.push(if column[y] != invert { '#' } else { '.' });
            }
            out.push('\n');
        }
        out
    }
}

impl Default for PixelGrid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PixelGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "PixelGrid {}x{} ({} lit)", WIDTH, HEIGHT, self.lit_count())?;
        f.write_str(&self.render(false))
    }
}

/// Packs the grid into [`PACKED_LEN`] bytes, column-major, MSB on top.
pub fn encode(grid: &PixelGrid) -> Vec<u8> {
    let mut out = Vec::with_capacity(PACKED_LEN);
    for column in &grid.columns {
        for block in column.chunks_exact(8) {
            let byte = block
                .iter()
                .enumerate()
                .filter(|(_, on)| **on)
                .fold(0u8, |acc, (bit, _)| acc | (0x80 >> bit));
            out.push(byte);
        }
    }
    out
}

/// Inverse of [`encode`]. Fails only when the input is not exactly
/// [`PACKED_LEN`] bytes long.
pub fn decode(bytes: &[u8]) -> ProtoResult<PixelGrid> {
    if bytes.len() != PACKED_LEN {
        return Err(ProtoError::LengthMismatch {
            expected: PACKED_LEN,
            actual: bytes.len(),
        });
    }

    let mut grid = PixelGrid::new();
    for (column, packed) in grid
        .columns
        .iter_mut()
        .zip(bytes.chunks_exact(BLOCKS_PER_COLUMN))
    {
        for (block, byte) in column.chunks_exact_mut(8).zip(packed) {
            for (bit, pixel) in block.iter_mut().enumerate() {
                *pixel = byte & (0x80 >> bit) != 0;
            }
        }
    }
    Ok(grid)
}
