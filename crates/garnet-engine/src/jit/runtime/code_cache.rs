//! Function-dispatch table for compiled code
//!
//! Maps each code resource to the artifact that compiled callers enter
//! through. Deoptimizing a method marks its slot dead so dispatch falls
//! back to the interpreter; the slot itself is detached only when the
//! collector cleans up the owning resource.

use crate::jit::backend::traits::CompiledArtifact;
use crate::jit::runtime::runtime_data::ResourceId;
use log::trace;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;

struct Slot {
    artifact: Arc<CompiledArtifact>,
    live: bool,
}

#[derive(Default)]
struct Table {
    slots: FxHashMap<ResourceId, Slot>,
    code_bytes: usize,
}

/// Entry points of every installed code resource
pub struct CodeCache {
    table: Mutex<Table>,
    limit: usize,
}

impl CodeCache {
    /// Create a table holding at most `limit` bytes of code
    pub fn new(limit: usize) -> Self {
        Self {
            table: Mutex::new(Table::default()),
            limit,
        }
    }

    /// Make `artifact` the entry point of `resource`, replacing any previous
    /// one. False (and nothing changes) if the limit would be exceeded.
    pub fn insert(&self, resource: ResourceId, artifact: Arc<CompiledArtifact>) -> bool {
        let mut table = self.table.lock();
        let replaced = table
            .slots
            .get(&resource)
            .map_or(0, |slot| slot.artifact.code_size());
        let code_bytes = table.code_bytes - replaced + artifact.code_size();
        if code_bytes > self.limit {
            return false;
        }
        table.code_bytes = code_bytes;
        table.slots.insert(
            resource,
            Slot {
                artifact,
                live: true,
            },
        );
        true
    }

    /// The entry point of `resource`, unless it was deoptimized or detached
    pub fn get(&self, resource: ResourceId) -> Option<Arc<CompiledArtifact>> {
        let table = self.table.lock();
        table
            .slots
            .get(&resource)
            .filter(|slot| slot.live)
            .map(|slot| slot.artifact.clone())
    }

    /// Whether `resource` can still be entered
    pub fn contains(&self, resource: ResourceId) -> bool {
        self.get(resource).is_some()
    }

    /// Stop dispatching into `resource`; the slot stays until `remove`
    pub fn invalidate(&self, resource: ResourceId) {
        if let Some(slot) = self.table.lock().slots.get_mut(&resource) {
            if slot.live {
                trace!("deoptimized {}", resource);
            }
            slot.live = false;
        }
    }

    /// Detach the slot of a cleaned-up resource; returns whether one existed
    pub fn remove(&self, resource: ResourceId) -> bool {
        let mut table = self.table.lock();
        match table.slots.remove(&resource) {
            Some(slot) => {
                table.code_bytes -= slot.artifact.code_size();
                true
            }
            None => false,
        }
    }
}
