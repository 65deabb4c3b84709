//! Clipgrid Core Library
//!
//! Item model, filter and sort, slot reconciliation and the [`GridEngine`]
//! facade that drives the scheduler for a scrolling grid of video clips.

pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod item;
pub mod reconcile;
pub mod sort;
pub mod store;

pub use config::EngineConfig;
pub use engine::{EngineStats, GridEngine};
pub use error::{GridError, GridResult};
pub use filter::{CompiledFilter, FilterCriteria, TagMode};
pub use item::{AnnotationPatch, ItemId, ItemRecord, MAX_RATING};
pub use reconcile::{reconcile, ElementHandle, OperationBatcher, RenderSlot, SlotOp, SlotTable};
pub use sort::{filter_and_sort, ActiveSort, ShuffleOrder, SortMode};
pub use store::{IngestReport, ItemStore};

// Types that appear in the engine's public API
pub use clipgrid_cache::{ThumbnailCache, ThumbnailHandle};
pub use clipgrid_scheduler::{
    CancellationToken, EventDisposition, GridRanges, LoadIntent, LoadPriority, ResourceEvent,
    ResourceState, UnloadIntent, UnloadReason, ViewportError, ViewportState,
};
