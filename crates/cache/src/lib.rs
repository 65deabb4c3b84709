//! Clipgrid Cache Library
//!
//! Bookkeeping for the two kinds of per-item artefacts the grid juggles: the
//! bounded registry of live decode resources and the placeholder thumbnails
//! shown for everything else.

pub mod lru;
pub mod thumbnail;

pub use lru::{LruRegistry, RegistryStats};
pub use thumbnail::{
    ThumbnailBinder, ThumbnailCache, ThumbnailError, ThumbnailHandle, ThumbnailStats,
    THUMBNAIL_EXTENSIONS,
};
