#![forbid(unsafe_code)]

//! Geometry policies for repeated content.
//!
//! The repeat primitive only decides *how many* clones exist. Where they go
//! is delegated to a [`RepeatGeometry`]: [`FlowGeometry`] lays panel clones
//! out in a horizontal or vertical flow inside one grid item, and
//! [`RowStackGeometry`] stacks row clones below the source row.

use dashgrid_core::GridPos;
use serde::{Deserialize, Serialize};

/// Clones per row in a horizontal flow when unset.
pub const DEFAULT_MAX_PER_ROW: u32 = 4;

/// Height of one panel clone when unset.
pub const DEFAULT_ITEM_HEIGHT: u32 = 10;

/// Flow direction of repeated panels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RepeatDirection {
    #[default]
    #[serde(rename = "h")]
    Horizontal,
    #[serde(rename = "v")]
    Vertical,
}

/// Vertical extent and offsets of a sequence of clones.
pub trait RepeatGeometry {
    /// Rows of the grid occupied by `count` clones.
    fn extent(&self, count: usize) -> u32;

    /// Vertical offset of clone `index` from the first clone.
    fn offset(&self, index: usize) -> u32;
}

fn count_u32(count: usize) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}

// ============================================================================
// FlowGeometry
// ============================================================================

/// Panel clones flowing inside a single grid item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowGeometry {
    pub direction: RepeatDirection,
    pub max_per_row: u32,
    pub item_height: u32,
}

impl Default for FlowGeometry {
    fn default() -> Self {
        Self {
            direction: RepeatDirection::Horizontal,
            max_per_row: DEFAULT_MAX_PER_ROW,
            item_height: DEFAULT_ITEM_HEIGHT,
        }
    }
}

impl FlowGeometry {
    #[must_use]
    pub fn new(direction: RepeatDirection, max_per_row: Option<u32>, item_height: Option<u32>) -> Self {
        Self {
            direction,
            max_per_row: max_per_row.unwrap_or(DEFAULT_MAX_PER_ROW).max(1),
            item_height: item_height.unwrap_or(DEFAULT_ITEM_HEIGHT),
        }
    }

    /// Number of flow rows needed for `count` clones.
    #[must_use]
    pub fn rows(&self, count: usize) -> u32 {
        let count = count_u32(count);
        match self.direction {
            RepeatDirection::Horizontal => count.div_ceil(self.max_per_row.max(1)),
            RepeatDirection::Vertical => count,
        }
    }

    /// Height of the containing grid item.
    #[must_use]
    pub fn container_height(&self, count: usize) -> u32 {
        self.extent(count)
    }

    /// Per-clone height implied by an externally chosen container height.
    ///
    /// Returns the current item height when there is nothing to divide by.
    #[must_use]
    pub fn item_height_for(&self, height: u32, count: usize) -> u32 {
        match self.rows(count) {
            0 => self.item_height,
            rows => height.div_ceil(rows),
        }
    }

    /// Absolute rectangle of every clone inside `container`.
    ///
    /// Horizontal flows split the container width over
    /// `min(count, max_per_row)` columns; the last column absorbs the
    /// remainder.
    #[must_use]
    pub fn clone_positions(&self, container: GridPos, count: usize) -> Vec<GridPos> {
        if count == 0 {
            return Vec::new();
        }
        match self.direction {
            RepeatDirection::Vertical => (0..count)
                .map(|i| {
                    GridPos::new(
                        container.x,
                        container.y + self.offset(i),
                        container.w,
                        self.item_height,
                    )
                })
                .collect(),
            RepeatDirection::Horizontal => {
                let per_row = count_u32(count).min(self.max_per_row.max(1));
                let col_width = container.w / per_row;
                (0..count)
                    .map(|i| {
                        let col = count_u32(i) % per_row;
                        let x = container.x + col * col_width;
                        let w = if col + 1 == per_row {
                            container.w - col * col_width
                        } else {
                            col_width
                        };
                        GridPos::new(x, container.y + self.offset(i), w, self.item_height)
                    })
                    .collect()
            }
        }
    }
}

impl RepeatGeometry for FlowGeometry {
    fn extent(&self, count: usize) -> u32 {
        self.rows(count) * self.item_height
    }

    fn offset(&self, index: usize) -> u32 {
        let index = count_u32(index);
        let row = match self.direction {
            RepeatDirection::Horizontal => index / self.max_per_row.max(1),
            RepeatDirection::Vertical => index,
        };
        row * self.item_height
    }
}

// ============================================================================
// RowStackGeometry
// ============================================================================

/// Row clones stacked directly below the source row.
///
/// An expanded row occupies its header plus its content; a collapsed row
/// occupies only its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RowStackGeometry {
    /// `max(y + h) - min(y)` over the row's children.
    pub content_height: u32,
    pub collapsed: bool,
}

impl RowStackGeometry {
    #[must_use]
    pub fn from_children(children: &[GridPos], collapsed: bool) -> Self {
        let content_height = match (
            dashgrid_core::geometry::max_bottom(children),
            dashgrid_core::geometry::min_top(children),
        ) {
            (Some(bottom), Some(top)) => bottom - top,
            _ => 0,
        };
        Self {
            content_height,
            collapsed,
        }
    }

    /// Distance between two consecutive row headers.
    #[must_use]
    pub fn stride(&self) -> u32 {
        if self.collapsed {
            1
        } else {
            self.content_height + 1
        }
    }
}

impl RepeatGeometry for RowStackGeometry {
    fn extent(&self, count: usize) -> u32 {
        count_u32(count) * self.stride()
    }

    fn offset(&self, index: usize) -> u32 {
        count_u32(index) * self.stride()
    }
}

// ============================================================================
// Compaction
// ============================================================================

/// A top-level unit of compaction: a lone item, or a row header together
/// with the items it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutBlock {
    pub head: GridPos,
    /// Items below a row header; empty for a lone item.
    pub items: Vec<GridPos>,
    /// Whether `head` is a row header. Later blocks never rise above it.
    pub is_row: bool,
}

impl LayoutBlock {
    #[must_use]
    pub fn item(pos: GridPos) -> Self {
        Self {
            head: pos,
            items: Vec::new(),
            is_row: false,
        }
    }

    #[must_use]
    pub fn row(header: GridPos, items: Vec<GridPos>) -> Self {
        Self {
            head: header,
            items,
            is_row: true,
        }
    }
}

/// Lift `item` as far as `floor` while the cell above is free, then drop it
/// below anything in `placed` it still collides with.
fn settle(mut item: GridPos, floor: u32, placed: &[GridPos]) -> GridPos {
    item.y = item.y.max(floor);
    while item.y > floor && !placed.iter().any(|p| p.overlaps(&item.with_y(item.y - 1))) {
        item.y -= 1;
    }
    while let Some(hit) = placed.iter().find(|p| p.overlaps(&item)) {
        item.y = hit.bottom();
    }
    item
}

fn by_position(positions: &[GridPos]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..positions.len()).collect();
    order.sort_by_key(|&i| (positions[i].y, positions[i].x));
    order
}

/// Compact `blocks` upward without reordering them.
///
/// Blocks are placed in `(y, x)` order of their heads. A row's items move
/// with its header and are then compacted no higher than the line below
/// it; a lone item placed after a row stays below that row's header. The
/// result is returned in input order.
#[must_use]
pub fn compact_blocks(blocks: &[LayoutBlock]) -> Vec<LayoutBlock> {
    let heads: Vec<GridPos> = blocks.iter().map(|b| b.head).collect();
    let mut placed: Vec<GridPos> = Vec::new();
    let mut out = blocks.to_vec();
    let mut barrier = 0;

    for i in by_position(&heads) {
        let block = &blocks[i];
        let head = settle(block.head, if block.is_row { 0 } else { barrier }, &placed);
        placed.push(head);

        let delta = i64::from(head.y) - i64::from(block.head.y);
        let mut items = block.items.clone();
        for j in by_position(&block.items) {
            let item = settle(block.items[j].shifted(delta), head.bottom(), &placed);
            placed.push(item);
            items[j] = item;
        }
        if block.is_row {
            barrier = head.bottom();
        }
        out[i] = LayoutBlock {
            head,
            items,
            is_row: block.is_row,
        };
    }
    out
}

/// Compact loose `items` upward without reordering them, resolving overlaps
/// by pushing later items down. The result is returned in input order.
#[must_use]
pub fn compact_vertical(items: &[GridPos]) -> Vec<GridPos> {
    let blocks: Vec<LayoutBlock> = items.iter().copied().map(LayoutBlock::item).collect();
    compact_blocks(&blocks).into_iter().map(|b| b.head).collect()
}
