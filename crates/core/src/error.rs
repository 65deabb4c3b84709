//! Error type for the grid engine

use crate::item::ItemId;
use clipgrid_cache::ThumbnailError;
use clipgrid_scheduler::ViewportError;
use std::io;

/// Errors surfaced by [`GridEngine`](crate::GridEngine) and its configuration.
///
/// Malformed item records and decode failures are not errors: the former are
/// dropped during ingest, the latter live in the per-item resource state.
#[derive(Debug, thiserror::Error)]
pub enum GridError {
    /// Viewport geometry rejected at the scheduler boundary
    #[error("invalid viewport: {0}")]
    Viewport(#[from] ViewportError),

    /// Thumbnail cache could not be indexed
    #[error("thumbnail cache: {0}")]
    Thumbnail(#[from] ThumbnailError),

    /// Configuration value out of range or unparsable
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Operation addressed an id that is not in the item store
    #[error("unknown item: {0}")]
    UnknownItem(ItemId),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for grid operations
pub type GridResult<T> = Result<T, GridError>;
