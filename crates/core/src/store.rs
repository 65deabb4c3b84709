//! Item store
//!
//! Holds the current item array and the active filter and sort. Malformed
//! records are dropped on ingest with a warning; they never abort the
//! recompute.

use crate::filter::FilterCriteria;
use crate::item::{clamp_rating, AnnotationPatch, ItemId, ItemRecord};
use crate::sort::{filter_and_sort, ActiveSort, SortMode};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info, warn};

/// Outcome of [`ItemStore::set_items`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct IngestReport {
    /// Records stored
    pub accepted: usize,

    /// Records dropped as malformed (empty id or name, duplicate id)
    pub dropped: usize,

    /// Records whose rating was clamped into range
    pub clamped: usize,
}

/// Owner of the item array and the active criteria
pub struct ItemStore {
    items: Vec<ItemRecord>,
    index: HashMap<ItemId, usize>,
    criteria: FilterCriteria,
    sort: ActiveSort,
    rng: StdRng,
}

impl ItemStore {
    /// Create an empty store. `shuffle_seed` makes shuffles reproducible.
    pub fn new(shuffle_seed: Option<u64>) -> Self {
        let rng = match shuffle_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            items: Vec::new(),
            index: HashMap::new(),
            criteria: FilterCriteria::default(),
            sort: ActiveSort::default(),
            rng,
        }
    }

    /// Replace the item array wholesale (load or rescan).
    ///
    /// An active shuffle keeps its permutation; ids it has not seen are
    /// appended until shuffle is activated again.
    pub fn set_items(&mut self, records: Vec<ItemRecord>) -> IngestReport {
        let mut report = IngestReport::default();
        let mut items = Vec::with_capacity(records.len());
        let mut index = HashMap::with_capacity(records.len());

        for mut record in records {
            if record.id.is_empty() {
                warn!(name = %record.name, path = %record.path, "dropping item without id");
                report.dropped += 1;
                continue;
            }
            if record.name.trim().is_empty() {
                warn!(id = %record.id, "dropping item without name");
                report.dropped += 1;
                continue;
            }
            if index.contains_key(&record.id) {
                warn!(id = %record.id, name = %record.name, "dropping duplicate item id");
                report.dropped += 1;
                continue;
            }

            let rating = clamp_rating(&record.id, record.rating);
            if rating != record.rating {
                record.rating = rating;
                report.clamped += 1;
            }

            index.insert(record.id.clone(), items.len());
            items.push(record);
        }

        report.accepted = items.len();
        self.items = items;
        self.index = index;

        info!(
            accepted = report.accepted,
            dropped = report.dropped,
            clamped = report.clamped,
            "items ingested"
        );
        report
    }

    pub fn items(&self) -> &[ItemRecord] {
        &self.items
    }

    pub fn get(&self, id: &ItemId) -> Option<&ItemRecord> {
        self.index.get(id).map(|&i| &self.items[i])
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn criteria(&self) -> &FilterCriteria {
        &self.criteria
    }

    pub fn set_filter(&mut self, criteria: FilterCriteria) {
        self.criteria = criteria;
    }

    pub fn sort_mode(&self) -> SortMode {
        self.sort.mode()
    }

    /// Activate a sort mode. Selecting shuffle always draws a new permutation.
    pub fn set_sort(&mut self, mode: SortMode) {
        self.sort = ActiveSort::activate(mode, &self.items, &mut self.rng);
    }

    /// Apply an annotation change to one record.
    ///
    /// Returns `None` for an unknown id, otherwise whether anything changed.
    pub fn patch(&mut self, id: &ItemId, patch: &AnnotationPatch) -> Option<bool> {
        let &i = self.index.get(id)?;
        Some(self.items[i].apply(patch))
    }

    /// Mark exactly `ids` as favorites and clear the flag on every other
    /// record. Returns how many records changed.
    pub fn set_favorites<I>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = ItemId>,
    {
        self.sync_flag(ids.into_iter().collect(), "favorite", |record| &mut record.favorite)
    }

    /// Mark exactly `ids` as hidden, like [`set_favorites`](Self::set_favorites)
    pub fn set_hidden<I>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = ItemId>,
    {
        self.sync_flag(ids.into_iter().collect(), "hidden", |record| &mut record.hidden)
    }

    /// Drop every record. Filter and sort stay active.
    pub fn clear(&mut self) {
        self.items.clear();
        self.index.clear();
    }

    fn sync_flag(
        &mut self,
        ids: HashSet<ItemId>,
        flag_name: &'static str,
        flag: fn(&mut ItemRecord) -> &mut bool,
    ) -> usize {
        let unknown = ids.iter().filter(|id| !self.index.contains_key(*id)).count();
        if unknown > 0 {
            debug!(flag = flag_name, unknown, "ignoring unknown ids in bulk sync");
        }

        let mut changed = 0;
        for record in &mut self.items {
            let wanted = ids.contains(&record.id);
            let value = flag(record);
            if *value != wanted {
                *value = wanted;
                changed += 1;
            }
        }
        changed
    }

    /// Ids passing the active filter, in the active order
    pub fn ordered_ids(&self) -> Vec<ItemId> {
        filter_and_sort(&self.items, &self.criteria, &self.sort)
    }

    /// Distinct folder names, sorted
    pub fn folders(&self) -> Vec<String> {
        self.items
            .iter()
            .filter_map(|item| item.folder.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Distinct tags across all items, sorted
    pub fn tags(&self) -> Vec<String> {
        self.items
            .iter()
            .flat_map(|item| item.tags.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

impl Default for ItemStore {
    fn default() -> Self {
        Self::new(None)
    }
}
