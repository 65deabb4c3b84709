//! Slot reconciliation
//!
//! Diffs the slots handed to the host last pass against the ids now in the
//! load range and produces a minimal operation list. Resource-bearing
//! elements are addressed by item id, so a playing clip survives reordering
//! and filter changes as long as it is still required.
//!
//! Operations are ordered Removes, Adds, Moves, Updates. Doing removes first
//! lets the host recycle a removed element for an added id instead of
//! destroying and recreating it.

use crate::item::ItemId;
use clipgrid_scheduler::ResourceState;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use tracing::warn;

/// Host element identity. Opaque to the host beyond equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementHandle(pub u64);

/// One instantiated grid position
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderSlot {
    pub id: ItemId,

    /// Index into the ordered id list
    pub index: usize,

    pub element: ElementHandle,
    pub state: ResourceState,
}

/// Element tree mutation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SlotOp {
    Add { id: ItemId, index: usize },
    Remove { id: ItemId },
    Move { id: ItemId, from: usize, to: usize },
    Update { id: ItemId, index: usize },
}

impl SlotOp {
    pub fn id(&self) -> &ItemId {
        match self {
            SlotOp::Add { id, .. }
            | SlotOp::Remove { id }
            | SlotOp::Move { id, .. }
            | SlotOp::Update { id, .. } => id,
        }
    }
}

/// Groups operations into apply order: removes, adds, moves, updates
#[derive(Debug, Default)]
pub struct OperationBatcher {
    removes: Vec<SlotOp>,
    adds: Vec<SlotOp>,
    moves: Vec<SlotOp>,
    updates: Vec<SlotOp>,
}

impl OperationBatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: SlotOp) {
        match op {
            SlotOp::Remove { .. } => self.removes.push(op),
            SlotOp::Add { .. } => self.adds.push(op),
            SlotOp::Move { .. } => self.moves.push(op),
            SlotOp::Update { .. } => self.updates.push(op),
        }
    }

    pub fn len(&self) -> usize {
        self.removes.len() + self.adds.len() + self.moves.len() + self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn finish(self) -> Vec<SlotOp> {
        let mut ops = self.removes;
        ops.extend(self.adds);
        ops.extend(self.moves);
        ops.extend(self.updates);
        ops
    }
}

impl Extend<SlotOp> for OperationBatcher {
    fn extend<T: IntoIterator<Item = SlotOp>>(&mut self, iter: T) {
        for op in iter {
            self.push(op);
        }
    }
}

/// Diff `previous` against the ids of `ordered` inside `next_load`.
///
/// Every required id gets exactly one of Add, Move or Update; every
/// previously held id no longer required gets a Remove. Duplicate ids in
/// `previous` keep their first slot.
///
/// # Example
///
/// ```
/// use clipgrid_core::{reconcile, ItemId, SlotOp};
///
/// let ordered: Vec<ItemId> = ["a", "b", "c"].into_iter().map(ItemId::from).collect();
/// let ops = reconcile(&[], 0..2, &ordered);
/// assert_eq!(ops, vec![
///     SlotOp::Add { id: ItemId::from("a"), index: 0 },
///     SlotOp::Add { id: ItemId::from("b"), index: 1 },
/// ]);
/// ```
pub fn reconcile(previous: &[RenderSlot], next_load: Range<usize>, ordered: &[ItemId]) -> Vec<SlotOp> {
    let mut previous_index: HashMap<&ItemId, usize> = HashMap::with_capacity(previous.len());
    let mut previous_order: Vec<&ItemId> = Vec::with_capacity(previous.len());
    for slot in previous {
        if previous_index.contains_key(&slot.id) {
            warn!(id = %slot.id, index = slot.index, "duplicate slot ignored");
            continue;
        }
        previous_index.insert(&slot.id, slot.index);
        previous_order.push(&slot.id);
    }

    let end = next_load.end.min(ordered.len());
    let start = next_load.start.min(end);

    let mut batcher = OperationBatcher::new();
    let mut required: HashSet<&ItemId> = HashSet::with_capacity(end - start);
    for (index, id) in ordered[start..end].iter().enumerate() {
        let index = start + index;
        if !required.insert(id) {
            continue;
        }
        match previous_index.get(id) {
            Some(&from) if from != index => batcher.push(SlotOp::Move {
                id: id.clone(),
                from,
                to: index,
            }),
            Some(_) => batcher.push(SlotOp::Update {
                id: id.clone(),
                index,
            }),
            None => batcher.push(SlotOp::Add {
                id: id.clone(),
                index,
            }),
        }
    }

    batcher.extend(
        previous_order
            .into_iter()
            .filter(|id| !required.contains(*id))
            .map(|id| SlotOp::Remove { id: id.clone() }),
    );

    batcher.finish()
}

/// The engine's copy of the slots handed to the host
///
/// Applying each operation list keeps this in step with the host's element
/// tree, so the next pass diffs against what the host actually holds.
/// Elements freed by removals are reused for additions in the same batch.
#[derive(Debug, Default)]
pub struct SlotTable {
    slots: Vec<RenderSlot>,
    free: Vec<ElementHandle>,
    next_element: u64,
}

impl SlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slots in grid order
    pub fn slots(&self) -> &[RenderSlot] {
        &self.slots
    }

    pub fn get(&self, id: &ItemId) -> Option<&RenderSlot> {
        self.slots.iter().find(|slot| &slot.id == id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ItemId> {
        self.slots.iter().map(|slot| &slot.id)
    }

    /// Apply an operation list produced by [`reconcile`]
    pub fn apply(&mut self, ops: &[SlotOp]) {
        for op in ops {
            match op {
                SlotOp::Remove { id } => {
                    if let Some(pos) = self.slots.iter().position(|slot| &slot.id == id) {
                        let slot = self.slots.remove(pos);
                        self.free.push(slot.element);
                    }
                }
                SlotOp::Add { id, index } => {
                    let element = self.allocate();
                    self.slots.push(RenderSlot {
                        id: id.clone(),
                        index: *index,
                        element,
                        state: ResourceState::Unloaded,
                    });
                }
                SlotOp::Move { id, to, .. } => {
                    if let Some(slot) = self.slots.iter_mut().find(|slot| &slot.id == id) {
                        slot.index = *to;
                    }
                }
                SlotOp::Update { .. } => {}
            }
        }
        self.slots.sort_by_key(|slot| slot.index);
    }

    /// Refresh the rendered resource state of every slot
    pub fn sync_states<F>(&mut self, state_of: F)
    where
        F: Fn(&ItemId) -> ResourceState,
    {
        for slot in &mut self.slots {
            slot.state = state_of(&slot.id);
        }
    }

    /// Drop every slot
    pub fn clear(&mut self) {
        let elements: Vec<ElementHandle> = self.slots.drain(..).map(|slot| slot.element).collect();
        self.free.extend(elements);
    }

    fn allocate(&mut self) -> ElementHandle {
        match self.free.pop() {
            Some(element) => element,
            None => {
                self.next_element += 1;
                ElementHandle(self.next_element)
            }
        }
    }
}
