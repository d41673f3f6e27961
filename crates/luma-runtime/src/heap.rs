//! The managed heap
//!
//! A non-moving arena of slots with stable indices: a live object keeps its
//! [`ObjId`] for its whole lifetime, and freed slots are recycled through a
//! free list. Collection is a precise mark-sweep - the VM feeds roots in,
//! marking spreads through a grey worklist, and sweep returns every
//! unmarked slot to the free list.

use crate::object::ObjData;
use crate::value::Value;
use std::collections::BTreeMap;

/// Collection threshold: bytes allocated since the last sweep
pub const GC_THRESHOLD: usize = 1024 * 1024;

/// Stable, non-owning handle to a heap object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjId(u32);

impl ObjId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// GC header plus payload for one heap slot
#[derive(Debug)]
struct HeapSlot {
    marked: bool,
    data: ObjData,
}

/// Snapshot of heap state, used by tests and embedders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapStats {
    /// Number of live objects
    pub live_objects: usize,
    /// Recycled slots available for reuse
    pub free_slots: usize,
    /// Total arena capacity (live + free)
    pub total_slots: usize,
    /// Live objects broken down by kind name
    pub objects_by_kind: BTreeMap<&'static str, usize>,
    /// Bytes allocated since the last collection
    pub bytes_allocated: usize,
}

/// The arena heap
#[derive(Debug, Default)]
pub struct Heap {
    slots: Vec<Option<HeapSlot>>,
    free: Vec<u32>,
    grey: Vec<ObjId>,
    scratch: Vec<Value>,
    bytes_allocated: usize,
}

impl Heap {
    /// Create an empty heap
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the allocation accounting has crossed the threshold
    pub fn wants_collection(&self) -> bool {
        self.bytes_allocated > GC_THRESHOLD
    }

    /// Allocate a new object, returning its stable handle
    ///
    /// Callers that can reach the collector are expected to check
    /// [`Heap::wants_collection`] first; allocation itself never collects.
    pub fn alloc(&mut self, data: ObjData) -> ObjId {
        self.bytes_allocated += data.size_estimate();
        let slot = HeapSlot {
            marked: false,
            data,
        };
        match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(slot);
                ObjId(index)
            }
            None => {
                self.slots.push(Some(slot));
                ObjId((self.slots.len() - 1) as u32)
            }
        }
    }

    /// Borrow an object's payload
    ///
    /// Panics on a dangling handle; the VM only holds handles the collector
    /// has proven reachable.
    pub fn get(&self, id: ObjId) -> &ObjData {
        &self.slots[id.index()].as_ref().expect("dangling heap handle").data
    }

    /// Mutably borrow an object's payload
    pub fn get_mut(&mut self, id: ObjId) -> &mut ObjData {
        &mut self.slots[id.index()].as_mut().expect("dangling heap handle").data
    }

    // === Mark-sweep ===

    /// Phase 1: clear every mark bit
    pub fn clear_marks(&mut self) {
        for slot in self.slots.iter_mut().flatten() {
            slot.marked = false;
        }
        self.grey.clear();
    }

    /// Phase 2/3: mark a root value and everything reachable from it
    pub fn mark_value(&mut self, value: Value) {
        if let Value::Obj(id) = value {
            self.mark_object(id);
        }
        self.drain_grey();
    }

    fn mark_object(&mut self, id: ObjId) {
        let slot = self.slots[id.index()].as_mut().expect("dangling heap handle");
        if !slot.marked {
            slot.marked = true;
            self.grey.push(id);
        }
    }

    /// Drain the grey worklist, greying each object's children
    fn drain_grey(&mut self) {
        while let Some(id) = self.grey.pop() {
            let mut scratch = std::mem::take(&mut self.scratch);
            scratch.clear();
            self.slots[id.index()]
                .as_ref()
                .expect("dangling heap handle")
                .data
                .children(&mut |child| scratch.push(child));
            for child in &scratch {
                if let Value::Obj(child_id) = child {
                    self.mark_object(*child_id);
                }
            }
            self.scratch = scratch;
        }
    }

    /// Phase 4: free every unmarked object and reset the byte accounting
    ///
    /// Returns the number of objects freed.
    pub fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for (index, entry) in self.slots.iter_mut().enumerate() {
            if let Some(slot) = entry {
                if !slot.marked {
                    *entry = None;
                    self.free.push(index as u32);
                    freed += 1;
                }
            }
        }
        self.bytes_allocated = 0;
        freed
    }

    /// Number of live objects
    pub fn live_objects(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Snapshot the heap state
    pub fn stats(&self) -> HeapStats {
        let mut objects_by_kind: BTreeMap<&'static str, usize> = BTreeMap::new();
        for slot in self.slots.iter().flatten() {
            *objects_by_kind.entry(slot.data.kind_name()).or_insert(0) += 1;
        }
        HeapStats {
            live_objects: self.live_objects(),
            free_slots: self.free.len(),
            total_slots: self.slots.len(),
            objects_by_kind,
            bytes_allocated: self.bytes_allocated,
        }
    }
}
