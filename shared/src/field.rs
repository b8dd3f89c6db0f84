//! Raster collision grid and thick segment scan conversion.
//!
//! The same grid type backs two layers during a round: the trail field,
//! where a cell holds `player_index + 1`, and the hole field, where a cell
//! holds the id of the hole segment drawn over it. Both start zeroed.

use crate::movement::Position;
use std::fmt;

/// Side length of the square field in cells.
pub const FIELD_SIZE: usize = 1000;

/// Returned by [`Field::draw_segment`] when any covered cell lies outside
/// the grid. Larger than every storable cell value.
pub const OUTSIDE: u16 = 256;

/// Width in cells of the probe drawn into the hole field.
pub const HOLE_PROBE_WIDTH: f64 = 4.0;

/// What to do with the cells covered by a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// Raise covered cells to at least this value.
    Paint(u8),
    /// Set covered cells to this value, whatever they held.
    Overwrite(u8),
    /// Only report what is already there.
    Probe,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Field {
    size: usize,
    cells: Vec<u8>,
}

impl Field {
    pub fn new() -> Self {
        Self::with_size(FIELD_SIZE)
    }

    pub fn with_size(size: usize) -> Self {
        Self {
            size,
            cells: vec![0; size * size],
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn clear(&mut self) {
        self.cells.fill(0);
    }

    pub fn get(&self, x: usize, y: usize) -> Option<u8> {
        if x < self.size && y < self.size {
            Some(self.cells[y * self.size + x])
        } else {
            None
        }
    }

    /// Row-major cell storage, row 0 first.
    pub fn cells(&self) -> &[u8] {
        &self.cells
    }

    /// Number of cells currently holding `value`.
    pub fn count(&self, value: u8) -> usize {
        self.cells.iter().filter(|&&c| c == value).count()
    }

    /// Draws the thick segment from `p` to `q` and returns the largest value
    /// found under it before drawing, or [`OUTSIDE`] if any covered cell is
    /// off the grid.
    ///
    /// The segment becomes a quadrilateral whose ends are perpendicular to
    /// the heading stored in each position, so consecutive segments of one
    /// trail share an end edge exactly. Cells are sampled at their centres
    /// with half-open spans, which gives every cell on a shared edge to
    /// exactly one of the two neighbours.
    pub fn draw_segment(&mut self, p: &Position, q: &Position, thickness: f64, fill: Fill) -> u16 {
        let scale = self.size as f64;
        let h = 0.5 * thickness;
        let (px, py) = (p.x * scale, p.y * scale);
        let (qx, qy) = (q.x * scale, q.y * scale);
        let (ps, pc) = p.a.sin_cos();
        let (qs, qc) = q.a.sin_cos();

        let corners = [
            (px - h * ps, py + h * pc),
            (qx - h * qs, qy + h * qc),
            (qx + h * qs, qy - h * qc),
            (px + h * ps, py - h * pc),
        ];
        self.fill_polygon(&corners, fill)
    }

    fn fill_polygon(&mut self, corners: &[(f64, f64)], fill: Fill) -> u16 {
        if corners.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
            return OUTSIDE;
        }

        let edges: Vec<Edge> = corners
            .iter()
            .zip(corners.iter().cycle().skip(1))
            .filter_map(|(&a, &b)| Edge::new(a, b))
            .collect();

        let ymin = corners.iter().map(|c| c.1).fold(f64::INFINITY, f64::min);
        let ymax = corners.iter().map(|c| c.1).fold(f64::NEG_INFINITY, f64::max);

        let size = self.size as i64;
        let first_row = (ymin - 0.5).ceil() as i64;
        let end_row = (ymax - 0.5).ceil() as i64;

        let mut outside = first_row < -1 || end_row > size + 1;
        let mut result: u16 = 0;
        let mut xs: Vec<f64> = Vec::with_capacity(4);

        for row in first_row.max(-1)..end_row.min(size + 1) {
            let yc = row as f64 + 0.5;

            xs.clear();
            xs.extend(edges.iter().filter_map(|e| e.crossing(yc)));
            xs.sort_by(|a, b| a.total_cmp(b));

            for span in xs.chunks_exact(2) {
                let start = (span[0] - 0.5).ceil() as i64;
                let end = (span[1] - 0.5).ceil() as i64;
                if start >= end {
                    continue;
                }
                if row < 0 || row >= size || start < 0 || end > size {
                    outside = true;
                }
                if row < 0 || row >= size {
                    continue;
                }

                let base = row as usize * self.size;
                for col in start.max(0)..end.min(size) {
                    let cell = &mut self.cells[base + col as usize];
                    result = result.max(u16::from(*cell));
                    match fill {
                        Fill::Paint(value) => *cell = (*cell).max(value),
                        Fill::Overwrite(value) => *cell = value,
                        Fill::Probe => {}
                    }
                }
            }
        }

        if outside {
            OUTSIDE
        } else {
            result
        }
    }
}

impl Default for Field {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("size", &self.size)
            .field("occupied", &self.cells.iter().filter(|&&c| c != 0).count())
            .finish()
    }
}

/// Polygon edge with its endpoints in canonical (x, then y) order, so the
/// same edge yields bit-identical crossings whichever polygon it belongs to.
struct Edge {
    x0: f64,
    y0: f64,
    x1: f64,
    y1: f64,
}

impl Edge {
    fn new(a: (f64, f64), b: (f64, f64)) -> Option<Self> {
        if a.1 == b.1 {
            return None;
        }
        let (lo, hi) = if a.0 < b.0 || (a.0 == b.0 && a.1 < b.1) {
            (a, b)
        } else {
            (b, a)
        };
        Some(Self {
            x0: lo.0,
            y0: lo.1,
            x1: hi.0,
            y1: hi.1,
        })
    }

    fn crossing(&self, yc: f64) -> Option<f64> {
        let (top, bottom) = if self.y0 < self.y1 {
            (self.y0, self.y1)
        } else {
            (self.y1, self.y0)
        };
        if yc >= top && yc < bottom {
            Some(self.x0 + (yc - self.y0) * (self.x1 - self.x0) / (self.y1 - self.y0))
        } else {
            None
        }
    }
}
