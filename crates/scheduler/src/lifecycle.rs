//! Resource lifecycle management
//!
//! Decides which grid items hold one of the host's scarce decode units.
//! Each pass takes a [`ResidencyWindow`] (the load range in grid order plus
//! the visible and keep-alive sets) and produces unload and load intents:
//!
//! 1. Live ids outside keep-alive are unloaded and their tokens cancelled
//! 2. Retry timers for ids outside the load range are invalidated
//! 3. Visible ids are touched in the LRU registry
//! 4. Ids in the load range that need a resource are admitted in priority
//!    order, evicting the least recently visible live id outside the load
//!    range when the pool is full, or declining admission when every live
//!    id is still required
//!
//! Unload intents of a pass are always queued before its load intents so a
//! saturated pool frees capacity within the same tick.

use crate::backoff::{RetryPolicy, RetryQueue};
use crate::cancel::{CancellationRegistry, CancellationToken};
use crate::priority::LoadPriority;
use crate::viewport::GridRanges;
use clipgrid_cache::LruRegistry;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default cap on simultaneously live decode units
pub const DEFAULT_MAX_LIVE: usize = 30;

/// Per-item resource state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    /// No decode unit held
    Unloaded,

    /// Load intent issued, waiting for the host
    Loading,

    /// Decoded and attached, not playing
    Ready,

    /// Decoded and playing
    Playing,

    /// Failed this many consecutive times
    Error(u32),
}

impl ResourceState {
    /// True for states that occupy a slot in the live pool
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            ResourceState::Loading | ResourceState::Ready | ResourceState::Playing
        )
    }
}

impl Default for ResourceState {
    fn default() -> Self {
        ResourceState::Unloaded
    }
}

/// Signal pushed back by the host's decode backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceEvent {
    Ready,
    Playing,
    Paused,
    Error,
}

/// Why an unload intent was issued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnloadReason {
    /// The item scrolled (or was filtered) out of the keep-alive window
    LeftKeepAlive,

    /// The slot was reclaimed for a newly required item
    Evicted,

    /// The engine was reset
    Reset,
}

/// Instruction to start decoding an item
#[derive(Debug, Clone)]
pub struct LoadIntent<K> {
    pub id: K,
    pub priority: LoadPriority,

    /// 1-based attempt number (retries count up)
    pub attempt: u32,

    /// Cancelled if the load becomes unwanted before it completes
    pub token: CancellationToken,
}

/// Instruction to release an item's decode unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnloadIntent<K> {
    pub id: K,
    pub reason: UnloadReason,
}

/// What happened to a reported resource event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDisposition {
    /// The item moved to this state
    Applied(ResourceState),

    /// A retry was scheduled after this delay
    RetryScheduled { attempt: u32, delay: Duration },

    /// The attempt limit was reached; only a manual retry re-admits the item
    Exhausted { failures: u32 },

    /// Stale or out-of-window event, nothing changed
    Ignored,
}

/// Lifecycle tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// Maximum simultaneously live decode units (Loading counts)
    pub max_live: usize,

    /// Backoff policy for failed loads
    pub retry: RetryPolicy,

    /// Seed for retry jitter; entropy when `None`
    pub jitter_seed: Option<u64>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_live: DEFAULT_MAX_LIVE,
            retry: RetryPolicy::default(),
            jitter_seed: None,
        }
    }
}

impl LifecycleConfig {
    pub fn with_max_live(mut self, max_live: usize) -> Self {
        self.max_live = max_live;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_jitter_seed(mut self, seed: u64) -> Self {
        self.jitter_seed = Some(seed);
        self
    }
}

/// The ids one scheduling pass cares about
#[derive(Debug, Clone)]
pub struct ResidencyWindow<K> {
    /// Ids in the load range, in grid order
    load: Vec<K>,
    load_set: HashSet<K>,
    visible: HashSet<K>,
    keep_alive: HashSet<K>,
}

impl<K: Clone + Eq + Hash> ResidencyWindow<K> {
    /// Build a window from the ordered ids and the ranges computed over them
    pub fn from_ranges(ordered: &[K], ranges: &GridRanges) -> Self {
        let clamp = |range: &std::ops::Range<usize>| {
            let end = range.end.min(ordered.len());
            range.start.min(end)..end
        };

        let load: Vec<K> = ordered[clamp(&ranges.load)].to_vec();
        Self {
            load_set: load.iter().cloned().collect(),
            load,
            visible: ordered[clamp(&ranges.visible)].iter().cloned().collect(),
            keep_alive: ordered[clamp(&ranges.keep_alive)].iter().cloned().collect(),
        }
    }

    pub fn load_ids(&self) -> &[K] {
        &self.load
    }

    pub fn in_load(&self, id: &K) -> bool {
        self.load_set.contains(id)
    }

    pub fn is_visible(&self, id: &K) -> bool {
        self.visible.contains(id)
    }

    pub fn in_keep_alive(&self, id: &K) -> bool {
        self.keep_alive.contains(id)
    }
}

impl<K> Default for ResidencyWindow<K> {
    fn default() -> Self {
        Self {
            load: Vec::new(),
            load_set: HashSet::new(),
            visible: HashSet::new(),
            keep_alive: HashSet::new(),
        }
    }
}

/// Snapshot of lifecycle counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LifecycleStats {
    pub live: usize,
    pub capacity: usize,
    pub loading: usize,
    pub ready: usize,
    pub playing: usize,
    pub errored: usize,
    pub exhausted: usize,
    pub admissions_declined: u64,
    pub evictions: u64,
    pub retries_scheduled: u64,
    pub stale_events: u64,
}

#[derive(Debug, Clone, Default)]
struct Entry {
    state: ResourceState,
    failures: u32,
    exhausted: bool,
    loading_since: Option<Instant>,
}

/// Owns the bounded live-resource pool
///
/// Single-threaded: called from the scheduling thread only. Time is always
/// passed in.
pub struct ResourceLifecycleManager<K> {
    config: LifecycleConfig,
    entries: HashMap<K, Entry>,
    registry: LruRegistry<K>,
    tokens: CancellationRegistry<K>,
    retries: RetryQueue<K>,
    rng: StdRng,
    window: ResidencyWindow<K>,
    load_intents: Vec<LoadIntent<K>>,
    unload_intents: Vec<UnloadIntent<K>>,
    retries_scheduled: u64,
    stale_events: u64,
}

impl<K> ResourceLifecycleManager<K>
where
    K: Clone + Eq + Hash + fmt::Debug,
{
    pub fn new(config: LifecycleConfig) -> Self {
        let rng = match config.jitter_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            registry: LruRegistry::new(config.max_live),
            config,
            entries: HashMap::new(),
            tokens: CancellationRegistry::new(),
            retries: RetryQueue::new(),
            rng,
            window: ResidencyWindow::default(),
            load_intents: Vec::new(),
            unload_intents: Vec::new(),
            retries_scheduled: 0,
            stale_events: 0,
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Run one scheduling pass against a new window
    pub fn plan(&mut self, window: ResidencyWindow<K>, now: Instant) {
        self.window = window;

        // Unload everything that left keep-alive
        let leaving: Vec<K> = self
            .registry
            .iter()
            .filter(|id| !self.window.in_keep_alive(id))
            .cloned()
            .collect();
        for id in leaving {
            self.registry.remove(&id);
            self.release(id, UnloadReason::LeftKeepAlive);
        }

        // Invalidate retry timers and forget items outside the windows
        let window = &self.window;
        let retries = &mut self.retries;
        self.entries.retain(|id, entry| {
            if !window.in_load(id) && retries.cancel(id) {
                debug!(id = ?id, failures = entry.failures, "retry timer invalidated");
            }
            window.in_keep_alive(id)
        });

        // A lowered cap is enforced by evicting outside the load range
        while self.registry.len() > self.registry.capacity() {
            let window = &self.window;
            match self.registry.evict_where(|id| !window.in_load(id)) {
                Some(victim) => self.release(victim, UnloadReason::Evicted),
                None => break,
            }
        }

        for id in &self.window.load {
            if self.window.visible.contains(id) {
                self.registry.touch(id);
            }
        }

        for id in self.retries.take_due(now) {
            debug!(id = ?id, "retry timer fired");
        }

        self.admit(now);
    }

    /// Fire due retry timers and admit what they unblocked
    pub fn tick(&mut self, now: Instant) {
        let due = self.retries.take_due(now);
        if due.is_empty() {
            return;
        }
        for id in &due {
            debug!(id = ?id, "retry timer fired");
        }
        self.admit(now);
    }

    /// Apply a host signal for `id`
    pub fn report(&mut self, id: &K, event: ResourceEvent, now: Instant) -> EventDisposition {
        if !self.window.in_keep_alive(id) {
            return self.ignore(id, event, "outside keep-alive window");
        }
        let Some(entry) = self.entries.get_mut(id) else {
            return self.ignore(id, event, "no resource outstanding");
        };

        match (event, entry.state) {
            (ResourceEvent::Ready, ResourceState::Loading) => {
                entry.state = ResourceState::Ready;
                entry.failures = 0;
                entry.loading_since = None;
                self.tokens.release(id);
                debug!(id = ?id, "resource ready");
                EventDisposition::Applied(ResourceState::Ready)
            }
            (ResourceEvent::Playing, ResourceState::Ready | ResourceState::Playing) => {
                entry.state = ResourceState::Playing;
                EventDisposition::Applied(ResourceState::Playing)
            }
            (ResourceEvent::Paused, ResourceState::Playing | ResourceState::Ready) => {
                entry.state = ResourceState::Ready;
                EventDisposition::Applied(ResourceState::Ready)
            }
            (ResourceEvent::Error, state) if state.is_live() => {
                entry.failures += 1;
                entry.loading_since = None;
                let failures = entry.failures;
                entry.state = ResourceState::Error(failures);

                let disposition = if self.config.retry.is_exhausted(failures) {
                    entry.exhausted = true;
                    warn!(id = ?id, failures, "resource load failed permanently");
                    EventDisposition::Exhausted { failures }
                } else if self.window.in_load(id) {
                    let delay = self.config.retry.delay_for(failures, &mut self.rng);
                    self.retries.schedule(id.clone(), now + delay);
                    self.retries_scheduled += 1;
                    debug!(
                        id = ?id,
                        attempt = failures + 1,
                        delay_ms = delay.as_millis() as u64,
                        "resource load failed, retry scheduled"
                    );
                    EventDisposition::RetryScheduled {
                        attempt: failures + 1,
                        delay,
                    }
                } else {
                    debug!(id = ?id, failures, "resource load failed outside load range");
                    EventDisposition::Applied(ResourceState::Error(failures))
                };

                self.registry.remove(id);
                self.tokens.release(id);
                // The freed unit may unblock a declined admission
                self.admit(now);
                disposition
            }
            _ => self.ignore(id, event, "event does not apply to current state"),
        }
    }

    /// Manual retry for an item in the error state.
    ///
    /// Clears its failure history and re-admits it if it is still in the
    /// load range. Returns `false` if the item was not in the error state.
    pub fn retry(&mut self, id: &K, now: Instant) -> bool {
        let Some(entry) = self.entries.get(id) else {
            return false;
        };
        if !matches!(entry.state, ResourceState::Error(_)) {
            return false;
        }
        self.entries.remove(id);
        self.retries.cancel(id);
        info!(id = ?id, "manual retry requested");
        self.admit(now);
        true
    }

    /// Unload every live id and forget all per-item state.
    ///
    /// Outstanding tokens are cancelled, retry timers dropped and undrained
    /// load intents discarded. Counters are kept.
    pub fn reset(&mut self) {
        let live: Vec<K> = self.registry.iter().cloned().collect();
        self.registry.clear();
        for id in live {
            self.release(id, UnloadReason::Reset);
        }
        let cancelled = self.tokens.cancel_all();
        self.retries.clear();
        self.entries.clear();
        self.load_intents.clear();
        self.window = ResidencyWindow::default();
        info!(cancelled, "lifecycle reset");
    }

    /// Change the pool cap. Takes effect on the next pass.
    pub fn set_max_live(&mut self, max_live: usize) {
        self.config.max_live = max_live;
        self.registry.set_capacity(max_live);
    }

    pub fn state_of(&self, id: &K) -> ResourceState {
        self.entries
            .get(id)
            .map(|entry| entry.state)
            .unwrap_or(ResourceState::Unloaded)
    }

    /// True once the item used up its automatic retries
    pub fn is_exhausted(&self, id: &K) -> bool {
        self.entries.get(id).is_some_and(|entry| entry.exhausted)
    }

    /// Ids holding a live unit, least recently visible first
    pub fn live_ids(&self) -> impl Iterator<Item = &K> {
        self.registry.iter()
    }

    pub fn next_retry_deadline(&self) -> Option<Instant> {
        self.retries.next_deadline()
    }

    pub fn has_pending_retry(&self, id: &K) -> bool {
        self.retries.contains(id)
    }

    /// Take the load intents queued since the last drain
    pub fn drain_load_intents(&mut self) -> Vec<LoadIntent<K>> {
        std::mem::take(&mut self.load_intents)
    }

    /// Take the unload intents queued since the last drain
    pub fn drain_unload_intents(&mut self) -> Vec<UnloadIntent<K>> {
        std::mem::take(&mut self.unload_intents)
    }

    /// Loads outstanding for longer than `threshold`. Diagnostic only.
    pub fn stalled_loads(&self, now: Instant, threshold: Duration) -> Vec<K> {
        let stalled: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, entry)| {
                entry
                    .loading_since
                    .is_some_and(|since| now.saturating_duration_since(since) > threshold)
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stalled {
            warn!(id = ?id, threshold_ms = threshold.as_millis() as u64, "load stalled");
        }
        stalled
    }

    pub fn stats(&self) -> LifecycleStats {
        let registry = self.registry.stats();
        let mut stats = LifecycleStats {
            live: registry.live,
            capacity: registry.capacity,
            admissions_declined: registry.rejected,
            evictions: registry.evictions,
            retries_scheduled: self.retries_scheduled,
            stale_events: self.stale_events,
            ..LifecycleStats::default()
        };
        for entry in self.entries.values() {
            match entry.state {
                ResourceState::Loading => stats.loading += 1,
                ResourceState::Ready => stats.ready += 1,
                ResourceState::Playing => stats.playing += 1,
                ResourceState::Error(_) => stats.errored += 1,
                ResourceState::Unloaded => {}
            }
            if entry.exhausted {
                stats.exhausted += 1;
            }
        }
        stats
    }

    fn admit(&mut self, now: Instant) {
        let mut candidates: Vec<(LoadPriority, K)> = self
            .window
            .load
            .iter()
            .filter(|id| self.needs_load(id))
            .map(|id| (LoadPriority::for_visibility(self.window.is_visible(id)), id.clone()))
            .collect();
        // Stable: grid order is kept within a priority
        candidates.sort_by(|a, b| b.0.cmp(&a.0));

        let mut declined = 0usize;
        for (priority, id) in candidates {
            if self.registry.is_full() {
                let window = &self.window;
                if let Some(victim) = self.registry.evict_where(|live| !window.in_load(live)) {
                    debug!(victim = ?victim, admitted = ?id, "evicting least recently visible");
                    self.release(victim, UnloadReason::Evicted);
                }
            }
            // Prefetched ids were never on screen, so they queue for eviction
            // ahead of anything that was
            let inserted = match priority {
                LoadPriority::Visible => self.registry.try_insert(id.clone()),
                LoadPriority::Buffer => self.registry.try_insert_cold(id.clone()),
            };
            if !inserted {
                declined += 1;
                continue;
            }

            let token = self.tokens.register(id.clone());
            let entry = self.entries.entry(id.clone()).or_default();
            entry.state = ResourceState::Loading;
            entry.loading_since = Some(now);
            let attempt = entry.failures + 1;

            debug!(id = ?id, ?priority, attempt, "load admitted");
            self.load_intents.push(LoadIntent {
                id,
                priority,
                attempt,
                token,
            });
        }

        if declined > 0 {
            warn!(
                declined,
                live = self.registry.len(),
                capacity = self.registry.capacity(),
                "pool saturated by required items, admission declined"
            );
        }
    }

    fn needs_load(&self, id: &K) -> bool {
        match self.entries.get(id) {
            None => true,
            Some(entry) => match entry.state {
                ResourceState::Unloaded => true,
                ResourceState::Error(_) => !entry.exhausted && !self.retries.contains(id),
                _ => false,
            },
        }
    }

    /// Drop the live unit of `id` (already removed from the registry)
    fn release(&mut self, id: K, reason: UnloadReason) {
        self.tokens.cancel(&id);
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.state = ResourceState::Unloaded;
            entry.loading_since = None;
        }
        debug!(id = ?id, ?reason, "unload");
        self.unload_intents.push(UnloadIntent { id, reason });
    }

    fn ignore(&mut self, id: &K, event: ResourceEvent, why: &str) -> EventDisposition {
        self.stale_events += 1;
        warn!(id = ?id, ?event, reason = why, "ignoring resource event");
        EventDisposition::Ignored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(range: std::ops::Range<u32>) -> Vec<u32> {
        range.collect()
    }

    fn ranges(visible: std::ops::Range<usize>, load: std::ops::Range<usize>, keep: std::ops::Range<usize>) -> GridRanges {
        GridRanges {
            visible,
            load,
            keep_alive: keep,
            ..GridRanges::default()
        }
    }

    fn manager(max_live: usize) -> ResourceLifecycleManager<u32> {
        ResourceLifecycleManager::new(
            LifecycleConfig::default()
                .with_max_live(max_live)
                .with_jitter_seed(7),
        )
    }

    fn load_ids(intents: &[LoadIntent<u32>]) -> Vec<u32> {
        intents.iter().map(|intent| intent.id).collect()
    }

    #[test]
    fn test_window_from_ranges_clamps() {
        let ordered = ids(0..10);
        let window = ResidencyWindow::from_ranges(&ordered, &ranges(2..4, 0..6, 0..50));

        assert_eq!(window.load_ids(), &[0, 1, 2, 3, 4, 5]);
        assert!(window.is_visible(&3));
        assert!(!window.is_visible(&4));
        assert!(window.in_keep_alive(&9));
    }

    #[test]
    fn test_visible_items_load_first() {
        let ordered = ids(0..20);
        let mut mgr = manager(10);
        let now = Instant::now();

        mgr.plan(ResidencyWindow::from_ranges(&ordered, &ranges(4..8, 0..12, 0..20)), now);

        let loads = mgr.drain_load_intents();
        assert_eq!(load_ids(&loads[..4]), vec![4, 5, 6, 7]);
        assert!(loads[..4].iter().all(|l| l.priority == LoadPriority::Visible));
        assert!(loads[4..].iter().all(|l| l.priority == LoadPriority::Buffer));
        // Pool of 10: 4 visible + first 6 buffer ids in grid order
        assert_eq!(load_ids(&loads[4..]), vec![0, 1, 2, 3, 8, 9]);
        assert_eq!(mgr.stats().admissions_declined, 2);
        assert_eq!(mgr.state_of(&10), ResourceState::Unloaded);
    }

    #[test]
    fn test_hysteresis_keeps_live_until_keep_alive_exit() {
        let ordered = ids(0..100);
        let mut mgr = manager(30);
        let now = Instant::now();

        mgr.plan(ResidencyWindow::from_ranges(&ordered, &ranges(0..4, 0..8, 0..40)), now);
        assert_eq!(mgr.drain_load_intents().len(), 8);
        mgr.report(&0, ResourceEvent::Ready, now);

        // Item 0 leaves the load range but stays inside keep-alive
        mgr.plan(ResidencyWindow::from_ranges(&ordered, &ranges(10..14, 6..18, 0..50)), now);
        assert!(mgr.drain_unload_intents().is_empty());
        assert_eq!(mgr.state_of(&0), ResourceState::Ready);

        // Now it leaves keep-alive
        mgr.plan(ResidencyWindow::from_ranges(&ordered, &ranges(60..64, 56..68, 30..90)), now);
        let unloads = mgr.drain_unload_intents();
        assert!(unloads.contains(&UnloadIntent {
            id: 0,
            reason: UnloadReason::LeftKeepAlive
        }));
        assert_eq!(mgr.state_of(&0), ResourceState::Unloaded);
    }

    #[test]
    fn test_leaving_keep_alive_cancels_token_and_ignores_completion() {
        let ordered = ids(0..100);
        let mut mgr = manager(30);
        let now = Instant::now();

        mgr.plan(ResidencyWindow::from_ranges(&ordered, &ranges(0..2, 0..2, 0..4)), now);
        let loads = mgr.drain_load_intents();
        let token = loads[0].token.clone();

        mgr.plan(ResidencyWindow::from_ranges(&ordered, &ranges(50..52, 50..52, 48..54)), now);
        assert!(token.is_cancelled());

        assert_eq!(mgr.report(&0, ResourceEvent::Ready, now), EventDisposition::Ignored);
        assert_eq!(mgr.state_of(&0), ResourceState::Unloaded);
        assert_eq!(mgr.stats().stale_events, 1);
    }

    #[test]
    fn test_saturated_pool_declines_then_admits_when_capacity_frees() {
        let ordered = ids(0..40);
        let mut mgr = manager(4);
        let now = Instant::now();

        mgr.plan(ResidencyWindow::from_ranges(&ordered, &ranges(0..4, 0..4, 0..10)), now);
        assert_eq!(mgr.drain_load_intents().len(), 4);

        // A fifth required id with every live id still required
        mgr.plan(ResidencyWindow::from_ranges(&ordered, &ranges(0..5, 0..5, 0..10)), now);
        assert!(mgr.drain_load_intents().is_empty());
        assert!(mgr.drain_unload_intents().is_empty());
        assert_eq!(mgr.state_of(&4), ResourceState::Unloaded);

        // Item 0 leaves the load range: it becomes the eviction victim
        mgr.plan(ResidencyWindow::from_ranges(&ordered, &ranges(1..5, 1..5, 0..10)), now);
        let unloads = mgr.drain_unload_intents();
        assert_eq!(
            unloads,
            vec![UnloadIntent {
                id: 0,
                reason: UnloadReason::Evicted
            }]
        );
        assert_eq!(load_ids(&mgr.drain_load_intents()), vec![4]);
        assert!(mgr.stats().live <= 4);
    }

    #[test]
    fn test_eviction_picks_least_recently_visible_outside_load() {
        let ordered = ids(0..40);
        let mut mgr = manager(4);
        let now = Instant::now();

        mgr.plan(ResidencyWindow::from_ranges(&ordered, &ranges(0..2, 0..2, 0..30)), now);
        mgr.plan(ResidencyWindow::from_ranges(&ordered, &ranges(2..4, 2..4, 0..30)), now);
        mgr.drain_load_intents();

        // Seeing 1 again leaves 0 as the least recently visible live id
        mgr.plan(ResidencyWindow::from_ranges(&ordered, &ranges(1..2, 1..4, 0..30)), now);
        mgr.plan(ResidencyWindow::from_ranges(&ordered, &ranges(10..11, 10..11, 0..30)), now);

        let unloads = mgr.drain_unload_intents();
        assert_eq!(unloads.len(), 1);
        assert_eq!(unloads[0].id, 0);
        assert_eq!(load_ids(&mgr.drain_load_intents()), vec![10]);
    }

    #[test]
    fn test_three_failures_are_terminal() {
        let ordered = ids(0..10);
        let mut mgr = manager(30);
        let start = Instant::now();
        let window = || ResidencyWindow::from_ranges(&ordered, &ranges(0..1, 0..1, 0..5));

        mgr.plan(window(), start);
        assert_eq!(mgr.drain_load_intents()[0].attempt, 1);

        let first = mgr.report(&0, ResourceEvent::Error, start);
        let EventDisposition::RetryScheduled { attempt, delay } = first else {
            panic!("expected retry, got {first:?}");
        };
        assert_eq!(attempt, 2);
        assert!(delay >= Duration::from_millis(500) && delay < Duration::from_millis(750));
        assert_eq!(mgr.state_of(&0), ResourceState::Error(1));

        // Nothing before the deadline
        mgr.tick(start + Duration::from_millis(499));
        assert!(mgr.drain_load_intents().is_empty());

        let t1 = start + Duration::from_millis(750);
        mgr.tick(t1);
        let loads = mgr.drain_load_intents();
        assert_eq!(loads.len(), 1);
        assert_eq!(loads[0].attempt, 2);

        let second = mgr.report(&0, ResourceEvent::Error, t1);
        let EventDisposition::RetryScheduled { delay, .. } = second else {
            panic!("expected retry, got {second:?}");
        };
        assert!(delay >= Duration::from_millis(1000) && delay < Duration::from_millis(1250));

        let t2 = t1 + Duration::from_millis(1250);
        mgr.tick(t2);
        assert_eq!(mgr.drain_load_intents()[0].attempt, 3);

        assert_eq!(
            mgr.report(&0, ResourceEvent::Error, t2),
            EventDisposition::Exhausted { failures: 3 }
        );
        assert_eq!(mgr.state_of(&0), ResourceState::Error(3));
        assert!(mgr.is_exhausted(&0));

        // No automatic retry, even across passes
        mgr.tick(t2 + Duration::from_secs(60));
        mgr.plan(window(), t2 + Duration::from_secs(60));
        assert!(mgr.drain_load_intents().is_empty());
        assert_eq!(mgr.stats().exhausted, 1);
        assert_eq!(mgr.stats().live, 0);
    }

    #[test]
    fn test_manual_retry_readmits_exhausted_item() {
        let ordered = ids(0..10);
        let policy = RetryPolicy::new(Duration::from_millis(10), Duration::ZERO, 1);
        let mut mgr = ResourceLifecycleManager::new(LifecycleConfig::default().with_retry(policy));
        let now = Instant::now();

        mgr.plan(ResidencyWindow::from_ranges(&ordered, &ranges(0..1, 0..1, 0..5)), now);
        mgr.drain_load_intents();
        mgr.report(&0, ResourceEvent::Error, now);
        assert!(mgr.is_exhausted(&0));

        assert!(mgr.retry(&0, now));
        let loads = mgr.drain_load_intents();
        assert_eq!(load_ids(&loads), vec![0]);
        assert_eq!(loads[0].attempt, 1);
        assert!(!mgr.retry(&0, now));
    }

    #[test]
    fn test_retry_timer_invalidated_when_leaving_load_range() {
        let ordered = ids(0..100);
        let mut mgr = manager(30);
        let now = Instant::now();

        mgr.plan(ResidencyWindow::from_ranges(&ordered, &ranges(0..1, 0..1, 0..10)), now);
        mgr.drain_load_intents();
        mgr.report(&0, ResourceEvent::Error, now);
        assert!(mgr.has_pending_retry(&0));

        mgr.plan(ResidencyWindow::from_ranges(&ordered, &ranges(5..6, 5..6, 0..10)), now);
        assert!(!mgr.has_pending_retry(&0));
        assert_eq!(mgr.state_of(&0), ResourceState::Error(1));
    }

    #[test]
    fn test_failure_frees_capacity_for_declined_item() {
        let ordered = ids(0..10);
        let mut mgr = manager(2);
        let now = Instant::now();

        mgr.plan(ResidencyWindow::from_ranges(&ordered, &ranges(0..3, 0..3, 0..5)), now);
        assert_eq!(load_ids(&mgr.drain_load_intents()), vec![0, 1]);

        mgr.report(&1, ResourceEvent::Error, now);
        assert_eq!(load_ids(&mgr.drain_load_intents()), vec![2]);
    }

    #[test]
    fn test_playing_and_paused_transitions() {
        let ordered = ids(0..4);
        let mut mgr = manager(4);
        let now = Instant::now();

        mgr.plan(ResidencyWindow::from_ranges(&ordered, &ranges(0..1, 0..1, 0..4)), now);

        // Playing before Ready is stale
        assert_eq!(mgr.report(&0, ResourceEvent::Playing, now), EventDisposition::Ignored);

        mgr.report(&0, ResourceEvent::Ready, now);
        assert_eq!(
            mgr.report(&0, ResourceEvent::Playing, now),
            EventDisposition::Applied(ResourceState::Playing)
        );
        assert_eq!(
            mgr.report(&0, ResourceEvent::Paused, now),
            EventDisposition::Applied(ResourceState::Ready)
        );
        assert_eq!(mgr.stats().ready, 1);
    }

    #[test]
    fn test_stalled_loads() {
        let ordered = ids(0..4);
        let mut mgr = manager(4);
        let now = Instant::now();

        mgr.plan(ResidencyWindow::from_ranges(&ordered, &ranges(0..2, 0..2, 0..4)), now);
        mgr.report(&0, ResourceEvent::Ready, now);

        let later = now + Duration::from_secs(5);
        assert_eq!(mgr.stalled_loads(later, Duration::from_secs(1)), vec![1]);
        assert!(mgr.stalled_loads(later, Duration::from_secs(10)).is_empty());
    }

    #[test]
    fn test_prefetched_ids_are_evicted_before_previously_visible() {
        let ordered = ids(0..40);
        let mut mgr = manager(4);
        let now = Instant::now();

        // 0 on screen, 1 and 2 only prefetched
        mgr.plan(ResidencyWindow::from_ranges(&ordered, &ranges(0..1, 0..3, 0..30)), now);
        mgr.plan(ResidencyWindow::from_ranges(&ordered, &ranges(5..6, 5..6, 0..30)), now);
        mgr.drain_load_intents();

        mgr.plan(ResidencyWindow::from_ranges(&ordered, &ranges(6..7, 6..7, 0..30)), now);
        let unloads = mgr.drain_unload_intents();
        assert_eq!(unloads.len(), 1);
        assert_eq!(unloads[0].id, 2);
        assert_eq!(mgr.state_of(&0), ResourceState::Loading);
    }

    #[test]
    fn test_reset_unloads_everything_and_cancels_tokens() {
        let ordered = ids(0..20);
        let mut mgr = manager(8);
        let now = Instant::now();

        mgr.plan(ResidencyWindow::from_ranges(&ordered, &ranges(0..4, 0..6, 0..10)), now);
        let loads = mgr.drain_load_intents();
        mgr.report(&0, ResourceEvent::Ready, now);
        mgr.report(&1, ResourceEvent::Error, now);
        assert!(mgr.next_retry_deadline().is_some());

        mgr.reset();

        let unloads = mgr.drain_unload_intents();
        // 1 failed and already gave its unit back
        assert_eq!(unloads.len(), 5);
        assert!(unloads.iter().all(|u| u.reason == UnloadReason::Reset));
        assert!(loads.iter().filter(|l| l.id > 1).all(|l| l.token.is_cancelled()));
        assert_eq!(mgr.stats().live, 0);
        assert_eq!(mgr.state_of(&1), ResourceState::Unloaded);
        assert_eq!(mgr.next_retry_deadline(), None);
        assert!(mgr.drain_load_intents().is_empty());

        // A stale completion after reset is ignored
        assert_eq!(mgr.report(&2, ResourceEvent::Ready, now), EventDisposition::Ignored);
    }

    #[test]
    fn test_dropping_manager_cancels_outstanding_loads() {
        let ordered = ids(0..4);
        let mut mgr = manager(4);
        mgr.plan(ResidencyWindow::from_ranges(&ordered, &ranges(0..2, 0..2, 0..4)), Instant::now());
        let loads = mgr.drain_load_intents();

        drop(mgr);
        assert!(loads.iter().all(|l| l.token.is_cancelled()));
    }

    #[test]
    fn test_lowered_cap_evicts_outside_load() {
        let ordered = ids(0..10);
        let mut mgr = manager(6);
        let now = Instant::now();

        mgr.plan(ResidencyWindow::from_ranges(&ordered, &ranges(0..6, 0..6, 0..10)), now);
        mgr.drain_load_intents();

        mgr.set_max_live(3);
        mgr.plan(ResidencyWindow::from_ranges(&ordered, &ranges(0..3, 0..3, 0..10)), now);
        assert_eq!(mgr.drain_unload_intents().len(), 3);
        assert_eq!(mgr.stats().live, 3);
        assert!(mgr.live_ids().all(|id| *id < 3));
    }
}
