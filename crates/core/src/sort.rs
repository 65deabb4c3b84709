//! Filtering and ordering of the item set
//!
//! [`filter_and_sort`] is the pure pipeline step from the item array to the
//! ordered id list the viewport indexes into.

use crate::filter::FilterCriteria;
use crate::item::{ItemId, ItemRecord};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Grid order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortMode {
    /// Folder name ascending (root items last), newest first within a folder
    #[default]
    FolderRecency,

    /// Newest first
    Recency,

    /// Fixed random permutation, drawn when the mode is activated
    Shuffle,

    /// Input order
    Unsorted,
}

/// Random permutation of the ids present when shuffle was activated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShuffleOrder {
    permutation: Vec<ItemId>,
    members: HashSet<ItemId>,
}

impl ShuffleOrder {
    /// Draw a Fisher-Yates permutation of `ids`
    pub fn new<R: Rng + ?Sized>(ids: impl IntoIterator<Item = ItemId>, rng: &mut R) -> Self {
        let mut permutation: Vec<ItemId> = ids.into_iter().collect();
        permutation.shuffle(rng);
        Self {
            members: permutation.iter().cloned().collect(),
            permutation,
        }
    }

    pub fn ids(&self) -> &[ItemId] {
        &self.permutation
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.members.contains(id)
    }

    pub fn len(&self) -> usize {
        self.permutation.len()
    }

    pub fn is_empty(&self) -> bool {
        self.permutation.is_empty()
    }
}

/// Sort mode with any materialized state it needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActiveSort {
    FolderRecency,
    Recency,
    Shuffle(ShuffleOrder),
    Unsorted,
}

impl ActiveSort {
    /// Activate `mode`, drawing a new permutation for shuffle
    pub fn activate<'a, R: Rng + ?Sized>(
        mode: SortMode,
        items: impl IntoIterator<Item = &'a ItemRecord>,
        rng: &mut R,
    ) -> Self {
        match mode {
            SortMode::FolderRecency => ActiveSort::FolderRecency,
            SortMode::Recency => ActiveSort::Recency,
            SortMode::Unsorted => ActiveSort::Unsorted,
            SortMode::Shuffle => ActiveSort::Shuffle(ShuffleOrder::new(
                items.into_iter().map(|item| item.id.clone()),
                rng,
            )),
        }
    }

    pub fn mode(&self) -> SortMode {
        match self {
            ActiveSort::FolderRecency => SortMode::FolderRecency,
            ActiveSort::Recency => SortMode::Recency,
            ActiveSort::Shuffle(_) => SortMode::Shuffle,
            ActiveSort::Unsorted => SortMode::Unsorted,
        }
    }
}

impl Default for ActiveSort {
    fn default() -> Self {
        ActiveSort::FolderRecency
    }
}

fn by_recency(a: &ItemRecord, b: &ItemRecord) -> Ordering {
    b.mtime.cmp(&a.mtime).then_with(|| a.id.cmp(&b.id))
}

fn by_folder_recency(a: &ItemRecord, b: &ItemRecord) -> Ordering {
    let folder = match (&a.folder, &b.folder) {
        (Some(x), Some(y)) => x.cmp(y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    folder.then_with(|| by_recency(a, b))
}

/// Filter `items` by `criteria` and order the survivors.
///
/// Output is duplicate-free (the first record of a repeated id wins) and a
/// subset of the input ids.
///
/// # Example
///
/// ```
/// use clipgrid_core::{filter_and_sort, ActiveSort, FilterCriteria, ItemRecord};
///
/// let items = vec![
///     ItemRecord::new("old", "old.mp4").with_mtime(1),
///     ItemRecord::new("new", "new.mp4").with_mtime(2),
/// ];
/// let ids = filter_and_sort(&items, &FilterCriteria::default(), &ActiveSort::Recency);
/// assert_eq!(ids[0].as_str(), "new");
/// ```
pub fn filter_and_sort(
    items: &[ItemRecord],
    criteria: &FilterCriteria,
    sort: &ActiveSort,
) -> Vec<ItemId> {
    let filter = criteria.compile();
    let mut seen: HashSet<&ItemId> = HashSet::with_capacity(items.len());
    let mut kept: Vec<&ItemRecord> = items
        .iter()
        .filter(|item| filter.matches(item))
        .filter(|item| seen.insert(&item.id))
        .collect();

    match sort {
        ActiveSort::FolderRecency => kept.sort_by(|a, b| by_folder_recency(a, b)),
        ActiveSort::Recency => kept.sort_by(|a, b| by_recency(a, b)),
        ActiveSort::Unsorted => {}
        ActiveSort::Shuffle(order) => return walk_permutation(&kept, order),
    }

    kept.into_iter().map(|item| item.id.clone()).collect()
}

/// Ids in permutation order, then ids the permutation predates in input order
fn walk_permutation(kept: &[&ItemRecord], order: &ShuffleOrder) -> Vec<ItemId> {
    let passing: HashSet<&ItemId> = kept.iter().map(|item| &item.id).collect();

    let mut ids: Vec<ItemId> = order
        .ids()
        .iter()
        .filter(|id| passing.contains(*id))
        .cloned()
        .collect();
    ids.extend(
        kept.iter()
            .filter(|item| !order.contains(&item.id))
            .map(|item| item.id.clone()),
    );
    ids
}
