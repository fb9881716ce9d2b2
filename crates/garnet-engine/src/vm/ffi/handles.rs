//! Handle tables
//!
//! A handle is a slot index into a table owned by one foreign call context.
//! The collector rewrites slots in place, so a handle keeps resolving to the
//! right object after its referent moves. Handles die with their table.

use crate::vm::gc::roots::HandleRoots;
use crate::vm::value::Value;
use crate::vm::{VmError, VmResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

static NEXT_TABLE_ID: AtomicU32 = AtomicU32::new(1);

/// Identity of a handle table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableId(u32);

impl TableId {
    fn next() -> Self {
        TableId(NEXT_TABLE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A GC-safe reference usable by foreign code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    table: TableId,
    index: u32,
}

impl Handle {
    /// Table that issued this handle
    pub fn table(&self) -> TableId {
        self.table
    }

    /// Slot index within the table
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

/// Slot storage shared with the collector
#[derive(Debug)]
pub struct SlotStore {
    values: Vec<Value>,
    live: bool,
}

impl SlotStore {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
            live: true,
        }
    }

    pub(crate) fn values(&self) -> &[Value] {
        &self.values
    }

    pub(crate) fn values_mut(&mut self) -> &mut [Value] {
        &mut self.values
    }
}

pub(crate) type SharedSlots = Arc<Mutex<SlotStore>>;

/// An ordered, growable sequence of object slots
#[derive(Debug)]
pub struct HandleTable {
    id: TableId,
    slots: SharedSlots,
}

impl HandleTable {
    /// Create a table and register its slots as a collector root set
    pub fn new(roots: &mut HandleRoots, capacity: usize) -> VmResult<Self> {
        let mut store = SlotStore::new(0);
        store.values.try_reserve(capacity).map_err(|_| {
            VmError::ResourceExhausted(format!("handle table of {} slots", capacity))
        })?;

        let slots = Arc::new(Mutex::new(store));
        roots.register(&slots);

        Ok(Self {
            id: TableId::next(),
            slots,
        })
    }

    /// Identity of this table
    pub fn id(&self) -> TableId {
        self.id
    }

    /// Append a slot holding `value`
    pub fn allocate(&self, value: Value) -> VmResult<Handle> {
        let mut store = self.slots.lock();
        if !store.live {
            return Err(VmError::RuntimeError("handle table already released".into()));
        }
        if store.values.len() == store.values.capacity() {
            let additional = store.values.len().max(1);
            store
                .values
                .try_reserve(additional)
                .map_err(|_| VmError::ResourceExhausted("handle table growth".into()))?;
        }
        let index = store.values.len() as u32;
        store.values.push(value);
        Ok(Handle {
            table: self.id,
            index,
        })
    }

    /// Current value in the slot named by `handle`
    pub fn resolve(&self, handle: Handle) -> VmResult<Value> {
        if handle.table != self.id {
            return Err(VmError::InvalidHandle(handle));
        }
        let store = self.slots.lock();
        if !store.live {
            return Err(VmError::InvalidHandle(handle));
        }
        store
            .values
            .get(handle.index())
            .copied()
            .ok_or(VmError::InvalidHandle(handle))
    }

    /// Overwrite the slot named by `handle`
    pub fn set(&self, handle: Handle, value: Value) -> VmResult<()> {
        if handle.table != self.id {
            return Err(VmError::InvalidHandle(handle));
        }
        let mut store = self.slots.lock();
        if !store.live {
            return Err(VmError::InvalidHandle(handle));
        }
        match store.values.get_mut(handle.index()) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(VmError::InvalidHandle(handle)),
        }
    }

    /// Number of issued handles
    pub fn len(&self) -> usize {
        self.slots.lock().values.len()
    }

    /// Whether no handle has been issued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the table still accepts and resolves handles
    pub fn is_live(&self) -> bool {
        self.slots.lock().live
    }

    /// Release every slot. Later resolves fail with `InvalidHandle`.
    pub fn release(&self) {
        let mut store = self.slots.lock();
        store.live = false;
        store.values.clear();
        store.values.shrink_to_fit();
    }
}

impl Drop for HandleTable {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::gc::heap::Heap;
    use crate::vm::object::{HeapObject, ObjectBody};
    use crate::vm::value::ModuleId;

    #[test]
    fn test_allocate_and_resolve() {
        let mut roots = HandleRoots::new();
        let table = HandleTable::new(&mut roots, 2).unwrap();

        let a = table.allocate(Value::Fixnum(1)).unwrap();
        let b = table.allocate(Value::True).unwrap();
        let c = table.allocate(Value::Nil).unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.resolve(a).unwrap(), Value::Fixnum(1));
        assert_eq!(table.resolve(b).unwrap(), Value::True);
        assert_eq!(table.resolve(c).unwrap(), Value::Nil);
    }

    #[test]
    fn test_foreign_handle_rejected() {
        let mut roots = HandleRoots::new();
        let one = HandleTable::new(&mut roots, 1).unwrap();
        let two = HandleTable::new(&mut roots, 1).unwrap();

        let h = one.allocate(Value::Fixnum(7)).unwrap();
        assert!(matches!(two.resolve(h), Err(VmError::InvalidHandle(_))));
    }

    #[test]
    fn test_release_invalidates() {
        let mut roots = HandleRoots::new();
        let table = HandleTable::new(&mut roots, 1).unwrap();
        let h = table.allocate(Value::Fixnum(7)).unwrap();

        table.release();
        assert!(!table.is_live());
        assert!(matches!(table.resolve(h), Err(VmError::InvalidHandle(_))));
        assert!(table.allocate(Value::Nil).is_err());
    }

    #[test]
    fn test_slots_follow_evacuation() {
        let mut roots = HandleRoots::new();
        let mut heap = Heap::new(None);
        let obj = heap
            .allocate(HeapObject::new(ModuleId::from_index(0), ObjectBody::Generic))
            .unwrap();

        let table = HandleTable::new(&mut roots, 1).unwrap();
        let h = table.allocate(Value::Object(obj)).unwrap();

        let fwd = heap.evacuate();
        roots.update(&fwd);

        let moved = table.resolve(h).unwrap();
        assert_eq!(moved, Value::Object(fwd.forward(obj)));
        assert_ne!(moved, Value::Object(obj));
    }

    #[test]
    fn test_dropped_table_stops_rooting() {
        let mut roots = HandleRoots::new();
        {
            let table = HandleTable::new(&mut roots, 1).unwrap();
            table.allocate(Value::Fixnum(1)).unwrap();
            assert_eq!(roots.live_tables(), 1);
        }
        assert_eq!(roots.live_tables(), 0);
    }
}
