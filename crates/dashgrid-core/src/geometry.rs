#![forbid(unsafe_code)]

//! Grid geometry primitives.

use serde::{Deserialize, Serialize};

/// Number of columns in a dashboard grid row.
pub const GRID_COLUMN_COUNT: u32 = 24;

/// A positioned rectangle inside a dashboard grid.
///
/// Uses grid units (0-indexed, origin at top-left). The serialized form
/// matches the persisted `gridPos` object (`{x, y, w, h}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct GridPos {
    /// Left column (inclusive).
    pub x: u32,
    /// Top row (inclusive).
    pub y: u32,
    /// Width in columns.
    pub w: u32,
    /// Height in rows.
    pub h: u32,
}

impl GridPos {
    /// Create a new grid position.
    #[inline]
    pub const fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    /// A full-width row header at `y`.
    #[inline]
    pub const fn row_header(y: u32) -> Self {
        Self::new(0, y, GRID_COLUMN_COUNT, 1)
    }

    /// Right edge (exclusive).
    #[inline]
    pub const fn right(&self) -> u32 {
        self.x.saturating_add(self.w)
    }

    /// Bottom edge (exclusive).
    #[inline]
    pub const fn bottom(&self) -> u32 {
        self.y.saturating_add(self.h)
    }

    /// Check if the rectangle has zero area.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }

    /// Whether two rectangles share at least one cell.
    #[inline]
    pub const fn overlaps(&self, other: &GridPos) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// Copy with a different top row.
    #[inline]
    #[must_use]
    pub const fn with_y(self, y: u32) -> Self {
        Self { y, ..self }
    }

    /// Copy with a different height.
    #[inline]
    #[must_use]
    pub const fn with_height(self, h: u32) -> Self {
        Self { h, ..self }
    }

    /// Copy moved vertically by `delta` rows, clamped at row 0.
    #[must_use]
    pub fn shifted(self, delta: i64) -> Self {
        let y = (i64::from(self.y) + delta).clamp(0, i64::from(u32::MAX));
        self.with_y(y as u32)
    }
}

/// Bottom edge of the lowest rectangle, or `None` for an empty iterator.
pub fn max_bottom<'a>(positions: impl IntoIterator<Item = &'a GridPos>) -> Option<u32> {
    positions.into_iter().map(GridPos::bottom).max()
}

/// Top edge of the highest rectangle, or `None` for an empty iterator.
pub fn min_top<'a>(positions: impl IntoIterator<Item = &'a GridPos>) -> Option<u32> {
    positions.into_iter().map(|pos| pos.y).min()
}
