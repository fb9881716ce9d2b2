//! Moving object heap
//!
//! Objects are addressed by `ObjectRef`. Every evacuation hands survivors
//! fresh addresses, so anything holding a reference across a collection
//! must be reachable through a root that the collector rewrites.

use crate::vm::defaults::{HEAP_ADDRESS_STRIDE, HEAP_BASE_ADDRESS};
use crate::vm::object::{Executable, HeapObject};
use crate::vm::value::{ObjectRef, Value};
use crate::vm::{VmError, VmResult};
use rustc_hash::FxHashMap;

/// Old address -> new address mapping produced by an evacuation
#[derive(Debug, Default)]
pub struct Forwarding {
    moved: FxHashMap<ObjectRef, ObjectRef>,
}

impl Forwarding {
    /// New location of `r` (unchanged if it did not move)
    #[inline]
    pub fn forward(&self, r: ObjectRef) -> ObjectRef {
        self.moved.get(&r).copied().unwrap_or(r)
    }

    /// Did `r` survive the collection that produced this table?
    #[inline]
    pub fn survived(&self, r: ObjectRef) -> bool {
        self.moved.contains_key(&r)
    }

    /// Rewrite a slot in place
    #[inline]
    pub fn update(&self, slot: &mut ObjectRef) {
        *slot = self.forward(*slot);
    }

    /// Rewrite a value in place (immediates untouched)
    #[inline]
    pub fn update_value(&self, value: &mut Value) {
        if let Some(slot) = value.object_slot_mut() {
            self.update(slot);
        }
    }

    /// Number of relocated objects
    pub fn len(&self) -> usize {
        self.moved.len()
    }

    /// Whether nothing moved
    pub fn is_empty(&self) -> bool {
        self.moved.is_empty()
    }
}

/// The managed object heap
#[derive(Debug)]
pub struct Heap {
    objects: FxHashMap<ObjectRef, HeapObject>,
    next_address: u64,
    limit: Option<usize>,
}

impl Heap {
    /// Create an empty heap, optionally bounded to `limit` live objects
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            objects: FxHashMap::default(),
            next_address: HEAP_BASE_ADDRESS,
            limit,
        }
    }

    fn next_ref(&mut self) -> ObjectRef {
        let r = ObjectRef::from_address(self.next_address);
        self.next_address += HEAP_ADDRESS_STRIDE;
        r
    }

    /// Allocate an object
    pub fn allocate(&mut self, object: HeapObject) -> VmResult<ObjectRef> {
        if let Some(limit) = self.limit {
            if self.objects.len() >= limit {
                return Err(VmError::ResourceExhausted(format!(
                    "heap limit of {} objects reached",
                    limit
                )));
            }
        }
        let r = self.next_ref();
        self.objects.insert(r, object);
        Ok(r)
    }

    /// Get an object
    pub fn get(&self, r: ObjectRef) -> Option<&HeapObject> {
        self.objects.get(&r)
    }

    /// Get an object mutably
    pub fn get_mut(&mut self, r: ObjectRef) -> Option<&mut HeapObject> {
        self.objects.get_mut(&r)
    }

    /// Whether `r` names a live object
    pub fn contains(&self, r: ObjectRef) -> bool {
        self.objects.contains_key(&r)
    }

    /// The executable stored at `r`
    pub fn executable(&self, r: ObjectRef) -> VmResult<&Executable> {
        self.get(r)
            .and_then(HeapObject::as_executable)
            .ok_or_else(|| VmError::TypeError(format!("{} is not an executable", r)))
    }

    /// The executable stored at `r`, mutably
    pub fn executable_mut(&mut self, r: ObjectRef) -> VmResult<&mut Executable> {
        self.get_mut(r)
            .and_then(HeapObject::as_executable_mut)
            .ok_or_else(|| VmError::TypeError(format!("{} is not an executable", r)))
    }

    /// Number of live objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the heap holds no objects
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Approximate number of bytes in use
    pub fn allocated_bytes(&self) -> usize {
        self.objects.values().map(HeapObject::size_in_bytes).sum()
    }

    /// Iterate over every live reference
    pub fn refs(&self) -> impl Iterator<Item = ObjectRef> + '_ {
        self.objects.keys().copied()
    }

    /// Free every object not in `live`; returns (objects, bytes) freed
    pub(crate) fn sweep(&mut self, is_live: impl Fn(ObjectRef) -> bool) -> (usize, usize) {
        let dead: Vec<ObjectRef> = self.objects.keys().copied().filter(|r| !is_live(*r)).collect();
        let mut bytes = 0;
        for r in &dead {
            if let Some(obj) = self.objects.remove(r) {
                bytes += obj.size_in_bytes();
            }
        }
        (dead.len(), bytes)
    }

    /// Move every surviving object to a fresh address and rewrite the
    /// references objects hold to each other.
    pub(crate) fn evacuate(&mut self) -> Forwarding {
        let mut survivors: Vec<ObjectRef> = self.objects.keys().copied().collect();
        survivors.sort();

        let mut forwarding = Forwarding::default();
        for old in &survivors {
            let new = self.next_ref();
            forwarding.moved.insert(*old, new);
        }

        let old_objects = std::mem::take(&mut self.objects);
        for (old, mut object) in old_objects {
            object.for_each_ref_mut(&mut |slot| forwarding.update(slot));
            self.objects.insert(forwarding.forward(old), object);
        }

        forwarding
    }
}
