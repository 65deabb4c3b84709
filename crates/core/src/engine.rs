//! Grid engine
//!
//! [`GridEngine`] runs the whole pipeline on the scheduling thread:
//!
//! 1. Item store filters and sorts into the ordered id list
//! 2. Viewport ranges are computed over that list
//! 3. Slots are reconciled against the load range
//! 4. The lifecycle manager plans loads and unloads
//!
//! The host pulls operations and intents after each call and pushes decode
//! signals back through [`GridEngine::report_resource_event`]. Every
//! time-dependent call has an `_at` variant taking an explicit `Instant`.

use crate::config::EngineConfig;
use crate::error::{GridError, GridResult};
use crate::filter::FilterCriteria;
use crate::item::{AnnotationPatch, ItemId, ItemRecord};
use crate::reconcile::{reconcile, RenderSlot, SlotOp, SlotTable};
use crate::sort::SortMode;
use crate::store::{IngestReport, ItemStore};
use clipgrid_cache::{ThumbnailBinder, ThumbnailCache, ThumbnailHandle};
use clipgrid_scheduler::{
    EventDisposition, GridRanges, LifecycleStats, LoadIntent, ResidencyWindow, ResourceEvent,
    ResourceLifecycleManager, ResourceState, ScrollThrottle, UnloadIntent, ViewportError,
    ViewportState,
};
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info};

/// Snapshot of engine counters
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EngineStats {
    pub items: usize,
    pub ordered: usize,
    pub slots: usize,
    pub lifecycle: LifecycleStats,
    pub scroll_coalesced: u64,
    pub thumbnail_hits: u64,
    pub thumbnail_misses: u64,
}

/// The grid engine facade
pub struct GridEngine {
    config: EngineConfig,
    store: ItemStore,
    viewport: ViewportState,
    throttle: ScrollThrottle,
    lifecycle: ResourceLifecycleManager<ItemId>,
    slots: SlotTable,
    thumbnails: ThumbnailBinder,
    ordered: Vec<ItemId>,
    ranges: GridRanges,
    operations: Vec<SlotOp>,
}

impl GridEngine {
    /// Build an engine with its own thumbnail cache.
    ///
    /// If `config.thumbnail_dir` is set the directory is indexed now.
    ///
    /// # Errors
    /// Invalid configuration, or an unreadable thumbnail directory.
    pub fn new(config: EngineConfig) -> GridResult<Self> {
        let cache = ThumbnailCache::new();
        if let Some(dir) = &config.thumbnail_dir {
            cache.scan_dir(dir)?;
        }
        Self::with_thumbnail_cache(config, cache)
    }

    /// Build an engine reading placeholders from a cache the host populates
    pub fn with_thumbnail_cache(config: EngineConfig, cache: ThumbnailCache) -> GridResult<Self> {
        config.validate()?;
        info!(
            max_live = config.max_live,
            load_buffer_rows = config.load_buffer_rows,
            unload_buffer_rows = config.unload_buffer_rows,
            "grid engine created"
        );

        Ok(Self {
            store: ItemStore::new(config.shuffle_seed),
            viewport: config.viewport(),
            throttle: ScrollThrottle::new(config.scroll_cadence()),
            lifecycle: ResourceLifecycleManager::new(config.lifecycle()),
            slots: SlotTable::new(),
            thumbnails: cache.binder(),
            ordered: Vec::new(),
            ranges: GridRanges::default(),
            operations: Vec::new(),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Replace the item set (load or rescan) and recompute
    pub fn set_items(&mut self, items: Vec<ItemRecord>) -> GridResult<IngestReport> {
        self.set_items_at(items, Instant::now())
    }

    pub fn set_items_at(&mut self, items: Vec<ItemRecord>, now: Instant) -> GridResult<IngestReport> {
        let report = self.store.set_items(items);
        self.recompute(now)?;
        Ok(report)
    }

    pub fn set_filter(&mut self, criteria: FilterCriteria) -> GridResult<()> {
        self.set_filter_at(criteria, Instant::now())
    }

    pub fn set_filter_at(&mut self, criteria: FilterCriteria, now: Instant) -> GridResult<()> {
        self.store.set_filter(criteria);
        self.recompute(now)
    }

    pub fn set_sort(&mut self, mode: SortMode) -> GridResult<()> {
        self.set_sort_at(mode, Instant::now())
    }

    /// Activate a sort mode. Selecting shuffle draws a new permutation.
    pub fn set_sort_at(&mut self, mode: SortMode, now: Instant) -> GridResult<()> {
        self.store.set_sort(mode);
        self.recompute(now)
    }

    /// Offer a scroll offset. Returns `true` if it was applied immediately,
    /// `false` if it is held for the next [`tick`](Self::tick).
    pub fn on_scroll(&mut self, offset: f64) -> GridResult<bool> {
        self.on_scroll_at(offset, Instant::now())
    }

    pub fn on_scroll_at(&mut self, offset: f64, now: Instant) -> GridResult<bool> {
        if !offset.is_finite() {
            return Err(ViewportError::InvalidOffset(offset).into());
        }
        match self.throttle.offer(offset, now) {
            Some(offset) => {
                self.apply_scroll(offset, now)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Change viewport extent and column count.
    ///
    /// Invalid geometry is rejected and leaves the engine unchanged.
    pub fn on_resize(&mut self, viewport_extent: f64, column_count: usize) -> GridResult<()> {
        self.on_resize_at(viewport_extent, column_count, Instant::now())
    }

    pub fn on_resize_at(
        &mut self,
        viewport_extent: f64,
        column_count: usize,
        now: Instant,
    ) -> GridResult<()> {
        let mut viewport = self.viewport;
        viewport.viewport_extent = viewport_extent;
        viewport.column_count = column_count;
        viewport.validate()?;

        self.viewport = viewport;
        self.replan(now)
    }

    /// Flush a held scroll offset, fire due retries and run the stall sweep.
    ///
    /// Returns `true` if a held scroll offset was applied.
    pub fn tick(&mut self, now: Instant) -> GridResult<bool> {
        let scrolled = match self.throttle.poll(now) {
            Some(offset) => {
                self.apply_scroll(offset, now)?;
                true
            }
            None => false,
        };
        self.lifecycle.tick(now);
        self.sweep_stalled(now);
        self.sync_slot_states();
        Ok(scrolled)
    }

    /// Earliest instant at which [`tick`](Self::tick) has work to do
    pub fn next_wakeup(&self) -> Option<Instant> {
        match (self.throttle.next_due(), self.lifecycle.next_retry_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Apply an annotation change from the metadata store.
    ///
    /// Returns whether the record changed; a change recomputes the grid.
    pub fn patch_annotations(&mut self, id: &ItemId, patch: &AnnotationPatch) -> GridResult<bool> {
        self.patch_annotations_at(id, patch, Instant::now())
    }

    pub fn patch_annotations_at(
        &mut self,
        id: &ItemId,
        patch: &AnnotationPatch,
        now: Instant,
    ) -> GridResult<bool> {
        let changed = self
            .store
            .patch(id, patch)
            .ok_or_else(|| GridError::UnknownItem(id.clone()))?;
        if changed {
            self.recompute(now)?;
        }
        Ok(changed)
    }

    /// Mark exactly `ids` as favorites, clearing the flag everywhere else.
    ///
    /// Recomputes once if anything changed. Returns the number of records
    /// changed; unknown ids are skipped.
    pub fn set_favorites<I>(&mut self, ids: I) -> GridResult<usize>
    where
        I: IntoIterator<Item = ItemId>,
    {
        self.set_favorites_at(ids, Instant::now())
    }

    pub fn set_favorites_at<I>(&mut self, ids: I, now: Instant) -> GridResult<usize>
    where
        I: IntoIterator<Item = ItemId>,
    {
        let changed = self.store.set_favorites(ids);
        if changed > 0 {
            self.recompute(now)?;
        }
        Ok(changed)
    }

    /// Mark exactly `ids` as hidden, like [`set_favorites`](Self::set_favorites)
    pub fn set_hidden<I>(&mut self, ids: I) -> GridResult<usize>
    where
        I: IntoIterator<Item = ItemId>,
    {
        self.set_hidden_at(ids, Instant::now())
    }

    pub fn set_hidden_at<I>(&mut self, ids: I, now: Instant) -> GridResult<usize>
    where
        I: IntoIterator<Item = ItemId>,
    {
        let changed = self.store.set_hidden(ids);
        if changed > 0 {
            self.recompute(now)?;
        }
        Ok(changed)
    }

    /// Drop every item and release every resource.
    ///
    /// Queues a Remove for each slot and an unload intent for each live
    /// resource, and cancels every outstanding load token. Filter, sort and
    /// geometry are kept; the scroll offset returns to the top.
    pub fn reset(&mut self) {
        let removes = self.slots.slots().iter().map(|slot| SlotOp::Remove {
            id: slot.id.clone(),
        });
        self.operations.extend(removes);
        self.slots.clear();

        self.lifecycle.reset();
        self.store.clear();
        self.throttle.discard();
        self.ordered.clear();
        self.ranges = GridRanges::default();
        self.viewport.scroll_offset = 0.0;
        info!("grid engine reset");
    }

    /// Push a decode signal from the host
    pub fn report_resource_event(&mut self, id: &ItemId, event: ResourceEvent) -> EventDisposition {
        self.report_resource_event_at(id, event, Instant::now())
    }

    pub fn report_resource_event_at(
        &mut self,
        id: &ItemId,
        event: ResourceEvent,
        now: Instant,
    ) -> EventDisposition {
        let disposition = self.lifecycle.report(id, event, now);
        self.sync_slot_states();
        disposition
    }

    /// Manual retry for an item in the error state
    pub fn retry(&mut self, id: &ItemId) -> GridResult<bool> {
        self.retry_at(id, Instant::now())
    }

    pub fn retry_at(&mut self, id: &ItemId, now: Instant) -> GridResult<bool> {
        if !self.store.contains(id) {
            return Err(GridError::UnknownItem(id.clone()));
        }
        let retried = self.lifecycle.retry(id, now);
        self.sync_slot_states();
        Ok(retried)
    }

    /// Take the slot operations produced since the last call, in apply order
    pub fn operations(&mut self) -> Vec<SlotOp> {
        std::mem::take(&mut self.operations)
    }

    /// Take pending load intents. Take unload intents first.
    pub fn load_intents(&mut self) -> Vec<LoadIntent<ItemId>> {
        self.lifecycle.drain_load_intents()
    }

    pub fn unload_intents(&mut self) -> Vec<UnloadIntent<ItemId>> {
        self.lifecycle.drain_unload_intents()
    }

    /// Placeholder image for an item without a live resource
    pub fn placeholder_for(&self, id: &ItemId) -> Option<ThumbnailHandle> {
        self.thumbnails.placeholder_for(id.as_str())
    }

    pub fn state_of(&self, id: &ItemId) -> ResourceState {
        self.lifecycle.state_of(id)
    }

    pub fn slots(&self) -> &[RenderSlot] {
        self.slots.slots()
    }

    pub fn ranges(&self) -> &GridRanges {
        &self.ranges
    }

    pub fn ordered_ids(&self) -> &[ItemId] {
        &self.ordered
    }

    pub fn viewport(&self) -> &ViewportState {
        &self.viewport
    }

    pub fn items(&self) -> &[ItemRecord] {
        self.store.items()
    }

    pub fn item(&self, id: &ItemId) -> Option<&ItemRecord> {
        self.store.get(id)
    }

    pub fn criteria(&self) -> &FilterCriteria {
        self.store.criteria()
    }

    pub fn sort_mode(&self) -> SortMode {
        self.store.sort_mode()
    }

    pub fn folders(&self) -> Vec<String> {
        self.store.folders()
    }

    pub fn tags(&self) -> Vec<String> {
        self.store.tags()
    }

    pub fn stats(&self) -> EngineStats {
        let thumbnails = self.thumbnails.stats();
        EngineStats {
            items: self.store.len(),
            ordered: self.ordered.len(),
            slots: self.slots.len(),
            lifecycle: self.lifecycle.stats(),
            scroll_coalesced: self.throttle.coalesced(),
            thumbnail_hits: thumbnails.hits,
            thumbnail_misses: thumbnails.misses,
        }
    }

    fn apply_scroll(&mut self, offset: f64, now: Instant) -> GridResult<()> {
        let max = self.viewport.max_scroll_offset(self.ordered.len());
        self.viewport.scroll_offset = offset.clamp(0.0, max);
        self.replan(now)
    }

    /// Re-run filter and sort, then everything downstream
    fn recompute(&mut self, now: Instant) -> GridResult<()> {
        self.ordered = self.store.ordered_ids();
        let max = self.viewport.max_scroll_offset(self.ordered.len());
        self.viewport.scroll_offset = self.viewport.scroll_offset.clamp(0.0, max);
        self.replan(now)
    }

    /// Recompute ranges, reconcile slots and plan resources
    fn replan(&mut self, now: Instant) -> GridResult<()> {
        let ranges = self.viewport.compute_ranges(self.ordered.len())?;

        let ops = reconcile(self.slots.slots(), ranges.load.clone(), &self.ordered);
        self.slots.apply(&ops);
        self.operations.extend(ops);

        self.lifecycle
            .plan(ResidencyWindow::from_ranges(&self.ordered, &ranges), now);
        debug!(
            visible = ?ranges.visible,
            load = ?ranges.load,
            keep_alive = ?ranges.keep_alive,
            "grid replanned"
        );
        self.ranges = ranges;

        self.sweep_stalled(now);
        self.sync_slot_states();
        Ok(())
    }

    fn sweep_stalled(&self, now: Instant) {
        if let Some(threshold) = self.config.stall_threshold() {
            self.lifecycle.stalled_loads(now, threshold);
        }
    }

    fn sync_slot_states(&mut self) {
        let lifecycle = &self.lifecycle;
        self.slots.sync_states(|id| lifecycle.state_of(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipgrid_scheduler::UnloadReason;
    use std::time::Duration;

    fn items(count: usize) -> Vec<ItemRecord> {
        (0..count)
            .map(|i| {
                ItemRecord::new(format!("item{i:04}"), format!("{i}.mp4")).with_mtime(count as u64 - i as u64)
            })
            .collect()
    }

    fn engine(config: EngineConfig) -> GridEngine {
        GridEngine::new(config.with_shuffle_seed(1).with_jitter_seed(2)).unwrap()
    }

    fn small_config() -> EngineConfig {
        // 4 columns, 100px rows, 400px viewport: 16 visible items
        EngineConfig::default()
            .with_row_height(100.0)
            .with_geometry(400.0, 4)
            .with_buffers(1, 3)
            .with_max_live(100)
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        assert!(matches!(
            GridEngine::new(EngineConfig::default().with_buffers(4, 2)),
            Err(GridError::Viewport(_))
        ));
    }

    #[test]
    fn test_initial_items_produce_adds_and_loads() {
        let mut engine = engine(small_config());
        let now = Instant::now();
        engine.set_items_at(items(100), now).unwrap();

        // visible rows 0..4, load rows 0..5
        assert_eq!(engine.ranges().visible, 0..16);
        assert_eq!(engine.ranges().load, 0..20);

        let ops = engine.operations();
        assert_eq!(ops.len(), 20);
        assert!(ops.iter().all(|op| matches!(op, SlotOp::Add { .. })));
        assert_eq!(engine.load_intents().len(), 20);
        assert_eq!(engine.slots().len(), 20);
        assert!(engine.slots().iter().all(|s| s.state == ResourceState::Loading));
    }

    #[test]
    fn test_scroll_is_throttled_and_flushed_by_tick() {
        let mut engine = engine(small_config());
        let start = Instant::now();
        engine.set_items_at(items(400), start).unwrap();
        engine.operations();

        assert!(engine.on_scroll_at(100.0, start).unwrap());
        assert!(!engine.on_scroll_at(200.0, start + Duration::from_millis(5)).unwrap());
        assert!(!engine.on_scroll_at(1000.0, start + Duration::from_millis(10)).unwrap());
        assert_eq!(engine.viewport().scroll_offset, 100.0);

        assert!(engine.tick(start + Duration::from_millis(16)).unwrap());
        assert_eq!(engine.viewport().scroll_offset, 1000.0);
        assert_eq!(engine.ranges().visible, 40..56);
        assert_eq!(engine.stats().scroll_coalesced, 1);
    }

    #[test]
    fn test_scroll_rejects_nan_and_keeps_state() {
        let mut engine = engine(small_config());
        engine.set_items(items(50)).unwrap();
        let before = engine.ranges().clone();

        assert!(engine.on_scroll(f64::NAN).is_err());
        assert_eq!(engine.ranges(), &before);
    }

    #[test]
    fn test_resize_rejects_zero_columns() {
        let mut engine = engine(small_config());
        engine.set_items(items(50)).unwrap();

        assert!(matches!(
            engine.on_resize(400.0, 0),
            Err(GridError::Viewport(ViewportError::ZeroColumns))
        ));
        assert_eq!(engine.viewport().column_count, 4);

        engine.on_resize(400.0, 2).unwrap();
        assert_eq!(engine.ranges().visible, 0..8);
    }

    #[test]
    fn test_unloads_precede_loads_when_scrolling_far() {
        let mut engine = engine(small_config());
        let now = Instant::now();
        engine.set_items_at(items(1000), now).unwrap();
        engine.load_intents();

        engine.on_scroll_at(10_000.0, now).unwrap();
        let unloads = engine.unload_intents();
        let loads = engine.load_intents();
        assert_eq!(unloads.len(), 20);
        assert_eq!(loads.len(), 24);
    }

    #[test]
    fn test_stale_completion_after_scroll_is_ignored() {
        let mut engine = engine(small_config());
        let now = Instant::now();
        engine.set_items_at(items(1000), now).unwrap();
        let loads = engine.load_intents();
        let first = loads[0].id.clone();

        engine.on_scroll_at(10_000.0, now).unwrap();
        assert!(loads[0].token.is_cancelled());
        assert_eq!(
            engine.report_resource_event_at(&first, ResourceEvent::Ready, now),
            EventDisposition::Ignored
        );
        assert_eq!(engine.state_of(&first), ResourceState::Unloaded);
    }

    #[test]
    fn test_filter_change_keeps_playing_element() {
        let mut engine = engine(small_config());
        let now = Instant::now();
        let mut records = items(40);
        records[5] = records[5].clone().with_favorite(true);
        records[30] = records[30].clone().with_favorite(true);
        engine.set_items_at(records, now).unwrap();
        engine.operations();

        let id = ItemId::from("item0005");
        engine.report_resource_event_at(&id, ResourceEvent::Ready, now);
        engine.report_resource_event_at(&id, ResourceEvent::Playing, now);
        let element = engine.slots().iter().find(|s| s.id == id).map(|s| s.element);

        engine
            .set_filter_at(FilterCriteria::new().favorites_only(), now)
            .unwrap();
        let ops = engine.operations();
        assert!(ops.contains(&SlotOp::Move {
            id: id.clone(),
            from: 5,
            to: 0
        }));
        assert_eq!(engine.state_of(&id), ResourceState::Playing);
        assert_eq!(engine.slots().iter().find(|s| s.id == id).map(|s| s.element), element);
        assert!(engine.unload_intents().iter().all(|u| u.id != id));
    }

    #[test]
    fn test_reset_removes_slots_and_unloads() {
        let mut engine = engine(small_config());
        let now = Instant::now();
        engine.set_items_at(items(100), now).unwrap();
        let mut loads = engine.load_intents();
        engine.on_scroll_at(200.0, now).unwrap();
        engine.on_scroll_at(300.0, now).unwrap();
        loads.extend(engine.load_intents());
        engine.operations();
        engine.unload_intents();
        assert!(engine.next_wakeup().is_some());

        let slots_before = engine.slots().len();
        let live_before = engine.stats().lifecycle.live;
        engine.reset();

        let ops = engine.operations();
        assert_eq!(ops.len(), slots_before);
        assert!(ops.iter().all(|op| matches!(op, SlotOp::Remove { .. })));
        let unloads = engine.unload_intents();
        assert_eq!(unloads.len(), live_before);
        assert!(unloads.iter().all(|u| u.reason == UnloadReason::Reset));
        assert!(loads.iter().all(|l| l.token.is_cancelled()));

        assert!(engine.slots().is_empty());
        assert!(engine.ordered_ids().is_empty());
        assert_eq!(engine.stats().items, 0);
        assert_eq!(engine.stats().lifecycle.live, 0);
        assert_eq!(engine.viewport().scroll_offset, 0.0);
        assert_eq!(engine.next_wakeup(), None);

        // Usable again afterwards
        engine.set_items_at(items(8), now).unwrap();
        assert_eq!(engine.load_intents().len(), 8);
    }

    #[test]
    fn test_dropping_engine_cancels_outstanding_loads() {
        let mut engine = engine(small_config());
        engine.set_items(items(4)).unwrap();
        let loads = engine.load_intents();
        assert!(loads.iter().all(|l| !l.token.is_cancelled()));

        drop(engine);
        assert!(loads.iter().all(|l| l.token.is_cancelled()));
    }

    #[test]
    fn test_bulk_favorites_recompute_once() {
        let mut engine = engine(small_config());
        let now = Instant::now();
        engine.set_items_at(items(40), now).unwrap();
        engine
            .set_filter_at(FilterCriteria::new().favorites_only(), now)
            .unwrap();
        assert!(engine.ordered_ids().is_empty());
        engine.operations();

        let favorites = ["item0003", "item0030"].map(ItemId::from);
        assert_eq!(engine.set_favorites_at(favorites.clone(), now).unwrap(), 2);
        assert_eq!(engine.ordered_ids(), &favorites[..]);
        assert_eq!(engine.operations().len(), 2);

        // Same set again changes nothing and emits nothing
        assert_eq!(engine.set_favorites_at(favorites, now).unwrap(), 0);
        assert!(engine.operations().is_empty());
    }

    #[test]
    fn test_bulk_hidden_removes_items_from_grid() {
        let mut engine = engine(small_config());
        engine.set_items(items(10)).unwrap();

        let hidden = ["item0000", "item0001"].map(ItemId::from);
        assert_eq!(engine.set_hidden(hidden).unwrap(), 2);
        assert_eq!(engine.ordered_ids().len(), 8);
        assert_eq!(engine.ordered_ids()[0], ItemId::from("item0002"));

        assert_eq!(engine.set_hidden(std::iter::empty()).unwrap(), 2);
        assert_eq!(engine.ordered_ids().len(), 10);
    }

    #[test]
    fn test_patch_annotations() {
        let mut engine = engine(small_config());
        engine.set_items(items(10)).unwrap();

        let id = ItemId::from("item0003");
        assert!(engine.patch_annotations(&id, &AnnotationPatch::hidden(true)).unwrap());
        assert!(!engine.ordered_ids().contains(&id));

        assert!(matches!(
            engine.patch_annotations(&ItemId::from("nope"), &AnnotationPatch::hidden(true)),
            Err(GridError::UnknownItem(_))
        ));
    }

    #[test]
    fn test_retry_unknown_item() {
        let mut engine = engine(small_config());
        assert!(matches!(
            engine.retry(&ItemId::from("ghost")),
            Err(GridError::UnknownItem(_))
        ));
    }

    #[test]
    fn test_placeholder_lookup() {
        let cache = ThumbnailCache::new();
        cache.insert("item0001", ThumbnailHandle::new("/thumbs/it/item0001.jpg", 10));
        let mut engine = GridEngine::with_thumbnail_cache(small_config(), cache).unwrap();
        engine.set_items(items(4)).unwrap();

        assert!(engine.placeholder_for(&ItemId::from("item0001")).is_some());
        assert!(engine.placeholder_for(&ItemId::from("item0002")).is_none());
        assert_eq!(engine.stats().thumbnail_hits, 1);
        assert_eq!(engine.stats().thumbnail_misses, 1);
    }

    #[test]
    fn test_next_wakeup_tracks_retries() {
        let mut engine = engine(small_config());
        let now = Instant::now();
        engine.set_items_at(items(4), now).unwrap();
        assert_eq!(engine.next_wakeup(), None);

        let id = ItemId::from("item0000");
        engine.report_resource_event_at(&id, ResourceEvent::Error, now);
        let wakeup = engine.next_wakeup().unwrap();
        assert!(wakeup >= now + Duration::from_millis(500));
        assert_eq!(engine.slots()[0].state, ResourceState::Error(1));
    }
}
