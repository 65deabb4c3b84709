//! Clipgrid Scheduler Library
//!
//! Viewport range computation and the bounded decode-resource lifecycle.
//!
//! The grid recomputes three nested index ranges on every scroll tick
//! (visible, load, keep-alive) and feeds them to a
//! [`ResourceLifecycleManager`], which admits and evicts live decode units
//! with hysteresis and emits load/unload intents for the host.
//!
//! # Example
//!
//! ```
//! use clipgrid_scheduler::{
//!     LifecycleConfig, ResidencyWindow, ResourceLifecycleManager, ViewportState,
//! };
//! use std::time::Instant;
//!
//! let ids: Vec<u32> = (0..200).collect();
//! let viewport = ViewportState::new(400.0, 4, 100.0)
//!     .with_scroll_offset(400.0)
//!     .with_buffers(3, 25);
//!
//! let ranges = viewport.compute_ranges(ids.len()).unwrap();
//! assert_eq!(ranges.visible, 16..32);
//!
//! let mut lifecycle = ResourceLifecycleManager::new(LifecycleConfig::default());
//! lifecycle.plan(ResidencyWindow::from_ranges(&ids, &ranges), Instant::now());
//!
//! // Unloads are always taken before loads
//! let _unloads = lifecycle.drain_unload_intents();
//! let loads = lifecycle.drain_load_intents();
//! assert_eq!(loads.len(), 30);
//! ```

mod backoff;
mod cancel;
mod lifecycle;
mod priority;
mod throttle;
mod viewport;

// Re-export public API
pub use backoff::{
    RetryPolicy, RetryQueue, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_BASE, DEFAULT_RETRY_JITTER,
};
pub use cancel::{CancellationRegistry, CancellationToken};
pub use lifecycle::{
    EventDisposition, LifecycleConfig, LifecycleStats, LoadIntent, ResidencyWindow,
    ResourceEvent, ResourceLifecycleManager, ResourceState, UnloadIntent, UnloadReason,
    DEFAULT_MAX_LIVE,
};
pub use priority::LoadPriority;
pub use throttle::{ScrollThrottle, DEFAULT_SCROLL_CADENCE};
pub use viewport::{compute_ranges, GridRanges, ViewportError, ViewportState};
