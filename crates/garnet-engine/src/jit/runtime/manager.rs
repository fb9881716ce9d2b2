//! Registry of code resources and their collector bookkeeping

use crate::jit::backend::traits::CompiledArtifact;
use crate::jit::runtime::code_cache::CodeCache;
use crate::jit::runtime::runtime_data::{CodeResource, ResourceId, RuntimeDataHolder};
use crate::vm::gc::heap::Forwarding;
use crate::vm::value::ObjectRef;
use log::{debug, warn};
use rustc_hash::FxHashMap;
use std::time::Duration;

/// JIT statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JitInfo {
    /// Methods compiled and installed
    pub methods_jitted: usize,
    /// Total bytes of code generated
    pub code_bytes: usize,
    /// Time spent in the backend
    pub time_compiling: Duration,
    /// Resources currently registered
    pub holders_live: usize,
    /// Resources released by the collector
    pub holders_cleaned: usize,
}

#[derive(Debug)]
struct Slot {
    resource: Box<dyn CodeResource>,
    marked: bool,
}

/// Owns every registered code resource
#[derive(Debug, Default)]
pub struct CodeManager {
    resources: FxHashMap<ResourceId, Slot>,
    next_id: u64,
    info: JitInfo,
}

impl CodeManager {
    /// Create an empty manager
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> ResourceId {
        self.next_id += 1;
        ResourceId::from_raw(self.next_id)
    }

    /// Register a holder for `artifact` and attach the artifact to the
    /// dispatch table
    pub fn register(
        &mut self,
        cache: &CodeCache,
        artifact: CompiledArtifact,
        serial: u64,
    ) -> ResourceId {
        let id = self.next_id();
        let holder = RuntimeDataHolder::new(id, artifact, serial);
        if let Some(function) = holder.function() {
            if !cache.insert(id, function.clone()) {
                warn!("code cache full, {} is not dispatchable", id);
            }
        }
        self.add(Box::new(holder));
        id
    }

    /// Register any code resource
    pub fn add(&mut self, resource: Box<dyn CodeResource>) {
        let id = resource.id();
        self.resources.insert(
            id,
            Slot {
                resource,
                marked: false,
            },
        );
    }

    /// The registered resource
    pub fn get(&self, id: ResourceId) -> Option<&dyn CodeResource> {
        self.resources.get(&id).map(|slot| slot.resource.as_ref())
    }

    /// The registered resource as a runtime-data holder
    pub fn holder(&self, id: ResourceId) -> Option<&RuntimeDataHolder> {
        self.get(id)?.as_any().downcast_ref()
    }

    /// Mutable access to a runtime-data holder
    pub fn holder_mut(&mut self, id: ResourceId) -> Option<&mut RuntimeDataHolder> {
        self.resources
            .get_mut(&id)?
            .resource
            .as_any_mut()
            .downcast_mut()
    }

    /// Whether `id` is still registered
    pub fn contains(&self, id: ResourceId) -> bool {
        self.resources.contains_key(&id)
    }

    /// Number of registered resources
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Account for one installed compilation
    pub fn record_compile(&mut self, code_bytes: usize, elapsed: Duration) {
        self.info.methods_jitted += 1;
        self.info.code_bytes += code_bytes;
        self.info.time_compiling += elapsed;
    }

    /// Current statistics
    pub fn jit_info(&self) -> JitInfo {
        JitInfo {
            holders_live: self.resources.len(),
            ..self.info.clone()
        }
    }

    pub(crate) fn clear_marks(&mut self) {
        for slot in self.resources.values_mut() {
            slot.marked = false;
        }
    }

    /// Mark `id`; on first mark, mark everything it references.
    pub(crate) fn mark(&mut self, id: ResourceId, mark: &mut dyn FnMut(ObjectRef)) {
        if let Some(slot) = self.resources.get_mut(&id) {
            if !slot.marked {
                slot.marked = true;
                slot.resource.mark_all(mark);
            }
        }
    }

    /// Clean up and drop every unmarked resource; returns how many
    pub(crate) fn sweep(&mut self, cache: &CodeCache) -> usize {
        let dead: Vec<ResourceId> = self
            .resources
            .iter()
            .filter(|(_, slot)| !slot.marked)
            .map(|(id, _)| *id)
            .collect();

        for id in &dead {
            if let Some(mut slot) = self.resources.remove(id) {
                debug!("cleaning up {} ({})", id, slot.resource.kind());
                slot.resource.cleanup(cache);
            }
        }
        self.info.holders_cleaned += dead.len();
        dead.len()
    }

    pub(crate) fn run_write_barriers(&mut self, forwarding: &Forwarding) {
        for slot in self.resources.values_mut() {
            slot.resource.run_write_barrier(forwarding);
        }
    }
}
