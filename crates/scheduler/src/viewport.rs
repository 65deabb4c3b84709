//! Viewport-to-index range mapping
//!
//! Maps a scroll position over a fixed-row-height grid onto three nested
//! half-open index ranges:
//! 1. Visible: rows intersecting the viewport
//! 2. Load: visible rows plus `load_buffer_rows` on each side; these items
//!    should hold a live decode resource
//! 3. Keep-alive: visible rows plus `unload_buffer_rows` on each side; an
//!    already-live resource is kept until its item leaves this window
//!
//! The gap between the load and keep-alive windows is the hysteresis margin
//! that stops resources flapping when the user jitters around a row edge.

use std::ops::Range;

use serde::{Deserialize, Serialize};

/// Rejected viewport geometry
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ViewportError {
    #[error("row height must be a positive finite number, got {0}")]
    InvalidRowHeight(f64),
    #[error("column count must be at least 1")]
    ZeroColumns,
    #[error("viewport extent must be a positive finite number, got {0}")]
    InvalidExtent(f64),
    #[error("scroll offset must be finite, got {0}")]
    InvalidOffset(f64),
    #[error("unload buffer ({unload} rows) must be larger than load buffer ({load} rows)")]
    BufferOrder { load: usize, unload: usize },
}

/// Geometry and buffer policy of the scrolling grid
///
/// Recomputed on every scroll tick, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewportState {
    /// Distance scrolled from the top of the grid
    pub scroll_offset: f64,

    /// Height of the visible window
    pub viewport_extent: f64,

    /// Number of items per row
    pub column_count: usize,

    /// Height of one grid row (uniform)
    pub row_height: f64,

    /// Rows beyond the viewport (each side) whose items get loaded
    pub load_buffer_rows: usize,

    /// Rows beyond the viewport (each side) whose live items are retained
    pub unload_buffer_rows: usize,
}

impl Default for ViewportState {
    fn default() -> Self {
        Self {
            scroll_offset: 0.0,
            viewport_extent: 720.0,
            column_count: 4,
            row_height: 240.0,
            load_buffer_rows: 3,
            unload_buffer_rows: 25,
        }
    }
}

impl ViewportState {
    /// Create a viewport at the top of the grid with default buffers
    pub fn new(viewport_extent: f64, column_count: usize, row_height: f64) -> Self {
        Self {
            viewport_extent,
            column_count,
            row_height,
            ..Default::default()
        }
    }

    /// Set the scroll offset
    pub fn with_scroll_offset(mut self, scroll_offset: f64) -> Self {
        self.scroll_offset = scroll_offset;
        self
    }

    /// Set both buffer sizes in rows
    pub fn with_buffers(mut self, load_buffer_rows: usize, unload_buffer_rows: usize) -> Self {
        self.load_buffer_rows = load_buffer_rows;
        self.unload_buffer_rows = unload_buffer_rows;
        self
    }

    /// Check the geometry contract
    pub fn validate(&self) -> Result<(), ViewportError> {
        if !(self.row_height.is_finite() && self.row_height > 0.0) {
            return Err(ViewportError::InvalidRowHeight(self.row_height));
        }
        if self.column_count == 0 {
            return Err(ViewportError::ZeroColumns);
        }
        if !(self.viewport_extent.is_finite() && self.viewport_extent > 0.0) {
            return Err(ViewportError::InvalidExtent(self.viewport_extent));
        }
        if !self.scroll_offset.is_finite() {
            return Err(ViewportError::InvalidOffset(self.scroll_offset));
        }
        if self.unload_buffer_rows <= self.load_buffer_rows {
            return Err(ViewportError::BufferOrder {
                load: self.load_buffer_rows,
                unload: self.unload_buffer_rows,
            });
        }
        Ok(())
    }

    /// Number of rows needed for `item_count` items
    pub fn total_rows(&self, item_count: usize) -> usize {
        if self.column_count == 0 {
            return 0;
        }
        item_count.div_ceil(self.column_count)
    }

    /// Largest meaningful scroll offset for `item_count` items
    pub fn max_scroll_offset(&self, item_count: usize) -> f64 {
        let content = self.total_rows(item_count) as f64 * self.row_height;
        (content - self.viewport_extent).max(0.0)
    }

    /// Compute the visible, load and keep-alive ranges for `item_count` items
    pub fn compute_ranges(&self, item_count: usize) -> Result<GridRanges, ViewportError> {
        self.validate()?;

        let total_rows = self.total_rows(item_count);
        if total_rows == 0 {
            return Ok(GridRanges::default());
        }

        // An offset past the end (e.g. after a filter shrank the list) pins
        // the viewport to the last page.
        let offset = self.scroll_offset.clamp(0.0, self.max_scroll_offset(item_count));

        let first_row = ((offset / self.row_height).floor() as usize).min(total_rows);
        let last_row = (((offset + self.viewport_extent) / self.row_height).ceil() as usize)
            .clamp(first_row, total_rows);

        let visible_rows = first_row..last_row;
        let load_rows = expand(&visible_rows, self.load_buffer_rows, total_rows);
        let keep_alive_rows = expand(&visible_rows, self.unload_buffer_rows, total_rows);

        Ok(GridRanges {
            visible: self.rows_to_items(&visible_rows, item_count),
            load: self.rows_to_items(&load_rows, item_count),
            keep_alive: self.rows_to_items(&keep_alive_rows, item_count),
            visible_rows,
            load_rows,
            keep_alive_rows,
        })
    }

    fn rows_to_items(&self, rows: &Range<usize>, item_count: usize) -> Range<usize> {
        let start = (rows.start * self.column_count).min(item_count);
        let end = (rows.end * self.column_count).min(item_count);
        start..end
    }
}

fn expand(rows: &Range<usize>, by: usize, total_rows: usize) -> Range<usize> {
    rows.start.saturating_sub(by)..rows.end.saturating_add(by).min(total_rows)
}

/// Nested half-open ranges over the ordered id list
///
/// `visible ⊆ load ⊆ keep_alive` always holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridRanges {
    /// Item indices intersecting the viewport
    pub visible: Range<usize>,

    /// Item indices that should hold a live resource
    pub load: Range<usize>,

    /// Item indices whose live resources are retained
    pub keep_alive: Range<usize>,

    /// Row indices intersecting the viewport
    pub visible_rows: Range<usize>,

    /// Row indices of the load window
    pub load_rows: Range<usize>,

    /// Row indices of the keep-alive window
    pub keep_alive_rows: Range<usize>,
}

impl GridRanges {
    pub fn is_empty(&self) -> bool {
        self.keep_alive.is_empty()
    }

    /// True if `index` falls in the visible range
    pub fn is_visible(&self, index: usize) -> bool {
        self.visible.contains(&index)
    }
}

/// Compute ranges over an ordered id list
pub fn compute_ranges<T>(
    ordered_ids: &[T],
    viewport: &ViewportState,
) -> Result<GridRanges, ViewportError> {
    viewport.compute_ranges(ordered_ids.len())
}
