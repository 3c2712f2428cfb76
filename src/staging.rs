// used as the "is modified" set, since indices are small dense integers
use roaring::RoaringBitmap;

use crate::datatype::{BinaryInterface, Values};

/// Indices kept in the list before the tracker falls back to its bitmap.
pub const MODIFICATION_LIST_CAPACITY: usize = 64;

/// Elements touched by the current assignment: a short index list backed by a
/// bitmap once the list would grow past its capacity.
#[derive(Debug, Clone)]
pub struct ModificationTracker {
    capacity: usize,
    modified: RoaringBitmap,
    list: Vec<u32>,
    overflowed: bool,
}

impl ModificationTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            modified: RoaringBitmap::new(),
            list: Vec::with_capacity(capacity.min(MODIFICATION_LIST_CAPACITY)),
            overflowed: false,
        }
    }
    pub fn is_marked(&self, idx: usize) -> bool {
        self.modified.contains(idx as u32)
    }
    /// Marks `idx` as modified, returning false if it already was.
    pub fn mark(&mut self, idx: usize) -> bool {
        if idx >= self.capacity || !self.modified.insert(idx as u32) {
            return false;
        }
        if !self.overflowed {
            if self.list.len() < MODIFICATION_LIST_CAPACITY {
                self.list.push(idx as u32);
            } else {
                self.overflowed = true;
            }
        }
        true
    }
    pub fn pending(&self) -> usize {
        self.modified.len() as usize
    }
    /// Modified indices in ascending order. Once the list has overflowed they
    /// are recomputed by scanning the bitmap.
    pub fn indices(&self) -> Vec<usize> {
        if self.overflowed {
            self.modified.iter().map(|i| i as usize).collect()
        } else {
            let mut indices: Vec<usize> = self.list.iter().map(|&i| i as usize).collect();
            indices.sort_unstable();
            indices
        }
    }
    pub fn clear(&mut self) {
        if self.overflowed || self.pending() > self.capacity / 2 {
            self.modified.clear();
        } else {
            for &idx in &self.list {
                self.modified.remove(idx);
            }
        }
        self.list.clear();
        self.overflowed = false;
    }
}

/// Saved values plus the tracker of one item.
#[derive(Debug, Clone)]
pub struct StagingRecord {
    saved: Values,
    tracker: ModificationTracker,
}

impl StagingRecord {
    pub fn new(live: &Values) -> Self {
        Self {
            saved: live.clone(),
            tracker: ModificationTracker::new(live.slots()),
        }
    }

    /// Snapshots every not yet modified element of `low..=high`. Elements
    /// written earlier in the same assignment keep their first snapshot.
    pub fn stage(&mut self, live: &Values, low: usize, high: usize) {
        for idx in low..=high {
            if self.tracker.mark(idx) {
                self.saved.copy_slot(live, idx);
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.tracker.pending()
    }

    pub fn modified(&self) -> Vec<usize> {
        self.tracker.indices()
    }

    pub fn saved(&self) -> &Values {
        &self.saved
    }

    pub fn commit(&mut self) {
        self.tracker.clear();
    }

    /// Restores every staged element in index order, then forgets them.
    pub fn rollback(&mut self, live: &mut Values, interface: Option<&dyn BinaryInterface>) {
        for idx in self.tracker.indices() {
            match interface {
                Some(bi) => {
                    if let (Some(source), Some(target)) =
                        (self.saved.element_bytes(idx), live.element_bytes_mut(idx))
                    {
                        bi.copy(source, target);
                    }
                }
                None => live.copy_slot(&self.saved, idx),
            }
        }
        self.tracker.clear();
    }
}
