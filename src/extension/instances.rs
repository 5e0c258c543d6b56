//! Per-thread storage for host instances attached to native objects.
//!
//! The engine stores an opaque pointer per object; we hand it a packed
//! generational handle rather than a real address, so a pointer the engine
//! keeps after the instance is freed resolves to nothing.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use enginebridge_core::{InstancePtr, Words};
use rustc_hash::FxHashMap;

use super::entry::InstanceCell;

// The packed handle needs the full 32-bit generation next to the index.
#[cfg(not(target_pointer_width = "64"))]
compile_error!("instance handles are packed into 64-bit pointers");

/// Handle to a slot in the instance heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct InstanceHandle {
    pub index: u32,
    pub generation: u32,
}

impl InstanceHandle {
    /// Pack into the pointer the engine stores. Never null.
    pub fn to_ptr(self) -> InstancePtr {
        let packed = (u64::from(self.generation) << 32) | (u64::from(self.index) + 1);
        packed as usize as InstancePtr
    }

    pub fn from_ptr(ptr: InstancePtr) -> Option<Self> {
        let packed = ptr as usize as u64;
        let low = (packed & 0xffff_ffff) as u32;
        if low == 0 {
            return None;
        }
        Some(Self {
            index: low - 1,
            generation: (packed >> 32) as u32,
        })
    }
}

struct HeapSlot {
    generation: u32,
    value: Option<Rc<InstanceCell>>,
}

/// Generational arena of live instances, indexed by native object as well.
pub(crate) struct InstanceHeap {
    slots: Vec<HeapSlot>,
    free_list: Vec<u32>,
    by_object: FxHashMap<u64, InstanceHandle>,
}

impl InstanceHeap {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            by_object: FxHashMap::default(),
        }
    }

    pub fn insert(&mut self, cell: InstanceCell) -> InstanceHandle {
        let object = cell.object;
        let cell = Rc::new(cell);
        let handle = if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(cell);
            InstanceHandle {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(HeapSlot {
                generation: 0,
                value: Some(cell),
            });
            InstanceHandle {
                index,
                generation: 0,
            }
        };
        self.by_object.insert(object.0[0], handle);
        handle
    }

    pub fn get(&self, handle: InstanceHandle) -> Option<Rc<InstanceCell>> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.clone()
    }

    pub fn find(&self, object: Words<1>) -> Option<Rc<InstanceCell>> {
        let handle = *self.by_object.get(&object.0[0])?;
        self.get(handle)
    }

    pub fn remove(&mut self, handle: InstanceHandle) -> Option<Rc<InstanceCell>> {
        if let Some(slot) = self.slots.get_mut(handle.index as usize)
            && slot.generation == handle.generation
            && let Some(cell) = slot.value.take()
        {
            slot.generation = slot.generation.wrapping_add(1);
            self.free_list.push(handle.index);
            if self.by_object.get(&cell.object.0[0]) == Some(&handle) {
                self.by_object.remove(&cell.object.0[0]);
            }
            return Some(cell);
        }
        None
    }
}

impl fmt::Debug for InstanceHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceHeap")
            .field("slot_count", &self.slots.len())
            .field("free_count", &self.free_list.len())
            .finish()
    }
}

thread_local! {
    static INSTANCES: RefCell<InstanceHeap> = RefCell::new(InstanceHeap::new());
}

pub(crate) fn insert(cell: InstanceCell) -> InstanceHandle {
    INSTANCES.with(|heap| heap.borrow_mut().insert(cell))
}

pub(crate) fn get(handle: InstanceHandle) -> Option<Rc<InstanceCell>> {
    INSTANCES.with(|heap| heap.borrow().get(handle))
}

pub(crate) fn find(object: Words<1>) -> Option<Rc<InstanceCell>> {
    INSTANCES.with(|heap| heap.borrow().find(object))
}

/// Remove an instance. The caller drops the returned cell after the heap is
/// released, so instance destructors may use the heap.
pub(crate) fn remove(handle: InstanceHandle) -> Option<Rc<InstanceCell>> {
    INSTANCES.with(|heap| heap.borrow_mut().remove(handle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_pointers_are_never_null() {
        let handle = InstanceHandle {
            index: 0,
            generation: 0,
        };
        assert!(!handle.to_ptr().is_null());
        assert_eq!(InstanceHandle::from_ptr(handle.to_ptr()), Some(handle));
        assert_eq!(InstanceHandle::from_ptr(std::ptr::null_mut()), None);
    }

    #[test]
    fn widest_handle_survives_packing() {
        let handle = InstanceHandle {
            index: u32::MAX - 1,
            generation: u32::MAX,
        };
        assert_eq!(InstanceHandle::from_ptr(handle.to_ptr()), Some(handle));
    }

    #[test]
    fn generation_survives_packing() {
        let handle = InstanceHandle {
            index: 41,
            generation: 7,
        };
        assert_eq!(InstanceHandle::from_ptr(handle.to_ptr()), Some(handle));
    }
}
