//! Code resources: compiled artifacts bound to the objects they reference
//!
//! A holder owns its artifact outright. The artifact has no pointer back,
//! and the collector reaches the holder through the method that was
//! compiled (`Executable::jit`), never the other way around.

use crate::jit::backend::traits::CompiledArtifact;
use crate::jit::runtime::code_cache::CodeCache;
use crate::vm::gc::heap::Forwarding;
use crate::vm::symbol::Symbol;
use crate::vm::value::{ModuleId, ObjectRef};
use log::trace;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Identity of a registered code resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        ResourceId(raw)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resource#{}", self.0)
    }
}

/// A method referenced by compiled code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeData {
    /// The method (updated by the write barrier when it moves)
    pub method: ObjectRef,
    /// Selector it was found under
    pub name: Symbol,
    /// Module it was found in
    pub module: ModuleId,
}

/// Something the collector must visit alongside the heap
pub trait CodeResource: Send + fmt::Debug {
    /// Short description for diagnostics
    fn kind(&self) -> &'static str;

    /// Registration id
    fn id(&self) -> ResourceId;

    /// Mark every object this resource keeps alive
    fn mark_all(&self, mark: &mut dyn FnMut(ObjectRef));

    /// Visit every runtime-data record
    fn visit_all(&self, visit: &mut dyn FnMut(&RuntimeData));

    /// Rewrite internal references after objects moved
    fn run_write_barrier(&mut self, forwarding: &Forwarding);

    /// Release compiled code and detach it from the dispatch table
    fn cleanup(&mut self, cache: &CodeCache);

    /// Downcasting support
    fn as_any(&self) -> &dyn Any;

    /// Mutable downcasting support
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Owns one compiled artifact and the runtime data it refers to
#[derive(Debug)]
pub struct RuntimeDataHolder {
    id: ResourceId,
    runtime_data: Vec<RuntimeData>,
    function: Option<Arc<CompiledArtifact>>,
    serial: u64,
}

impl RuntimeDataHolder {
    /// Create a holder owning `artifact`, with no runtime data yet
    pub fn new(id: ResourceId, artifact: CompiledArtifact, serial: u64) -> Self {
        Self {
            id,
            runtime_data: Vec::new(),
            function: Some(Arc::new(artifact)),
            serial,
        }
    }

    /// Record a referenced method
    pub fn add_runtime_data(&mut self, method: ObjectRef, name: Symbol, module: ModuleId) {
        self.runtime_data.push(RuntimeData {
            method,
            name,
            module,
        });
    }

    /// Referenced methods
    pub fn runtime_data(&self) -> &[RuntimeData] {
        &self.runtime_data
    }

    /// The compiled artifact, until cleanup
    pub fn function(&self) -> Option<&Arc<CompiledArtifact>> {
        self.function.as_ref()
    }

    /// Method serial the code was compiled against
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Whether cleanup already ran
    pub fn is_cleaned(&self) -> bool {
        self.function.is_none()
    }
}

impl CodeResource for RuntimeDataHolder {
    fn kind(&self) -> &'static str {
        "jit runtime data"
    }

    fn id(&self) -> ResourceId {
        self.id
    }

    fn mark_all(&self, mark: &mut dyn FnMut(ObjectRef)) {
        for rd in &self.runtime_data {
            mark(rd.method);
        }
    }

    fn visit_all(&self, visit: &mut dyn FnMut(&RuntimeData)) {
        for rd in &self.runtime_data {
            visit(rd);
        }
    }

    fn run_write_barrier(&mut self, forwarding: &Forwarding) {
        for rd in &mut self.runtime_data {
            forwarding.update(&mut rd.method);
        }
    }

    fn cleanup(&mut self, cache: &CodeCache) {
        cache.remove(self.id);
        if let Some(function) = self.function.take() {
            trace!(
                "{} released {} bytes of compiled code",
                self.id,
                function.code_size()
            );
        }
        self.runtime_data.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
