//! Method-table mutation
//!
//! Every mutation stamps a fresh global serial and clears both dispatch
//! cache layers for the selector. The invalidation is always the last step,
//! after the table change is in place.

use crate::vm::interpreter::World;
use crate::vm::model::module::MethodEntry;
use crate::vm::model::scope::StaticScope;
use crate::vm::object::{Executable, ExecutableKind, HeapObject, ObjectBody, Visibility};
use crate::vm::symbol::Symbol;
use crate::vm::value::{ModuleId, ObjectRef, Value};
use crate::vm::{VmError, VmResult};
use log::{debug, trace};

impl World {
    /// Store an executable in the heap
    pub fn new_method(&mut self, executable: Executable) -> VmResult<ObjectRef> {
        let class = self.model.method_class;
        self.heap
            .allocate(HeapObject::new(class, ObjectBody::Method(executable)))
    }

    /// Advance the global method serial
    pub fn inc_global_serial(&mut self) -> u64 {
        self.caches.inc_serial()
    }

    /// Clear both cache layers for `selector`
    pub fn reset_method_cache(&mut self, selector: Symbol) -> Symbol {
        self.caches.invalidate(selector);
        selector
    }

    /// Bind `method` into `module`'s table under `selector`.
    ///
    /// Replacing a different implementation deoptimizes the old one.
    pub fn add_method(
        &mut self,
        module: ModuleId,
        selector: Symbol,
        method: ObjectRef,
        visibility: Visibility,
    ) -> VmResult<()> {
        let serial = self.caches.inc_serial();
        self.heap.executable_mut(method)?.serial = serial;

        let previous = self.model.get_mut(module).methods.insert(
            selector,
            MethodEntry::Concrete {
                executable: method,
                visibility,
            },
        );
        if let Some(MethodEntry::Concrete { executable: old, .. }) = previous {
            if old != method && self.heap.contains(old) {
                self.deoptimize_inliners(old)?;
            }
        }
        trace!(
            "{}#{} bound at serial {}",
            self.model.name_of(module),
            self.symbols.resolve(selector),
            serial
        );
        Ok(())
    }

    /// Define `method` in the scope's definition target.
    ///
    /// Methods defined into a class are specialized for that class's
    /// instance layout.
    pub fn attach_method(
        &mut self,
        selector: Symbol,
        method: ObjectRef,
        scope: &StaticScope,
        visibility: Visibility,
    ) -> VmResult<ObjectRef> {
        let target = scope.for_method_definition();
        let layout = self
            .model
            .get(target)
            .class_info()
            .map(|info| info.instance_kind);

        let exec = self.heap.executable_mut(method)?;
        exec.scope = Some(target);
        if let Some(kind) = layout {
            exec.formalized = true;
            exec.specialized_for = Some(kind);
        }

        self.add_method(target, selector, method, visibility)?;
        self.reset_method_cache(selector);
        Ok(method)
    }

    /// Define `method` on `receiver`'s singleton class. No layout
    /// specialization.
    pub fn attach_singleton_method(
        &mut self,
        selector: Symbol,
        method: ObjectRef,
        scope: &StaticScope,
        receiver: Value,
    ) -> VmResult<ObjectRef> {
        let target = self.object_metaclass(receiver)?;
        let exec = self.heap.executable_mut(method)?;
        exec.scope = Some(target);
        trace!(
            "singleton method {} defined from scope of {}",
            self.symbols.resolve(selector),
            self.model.name_of(scope.module())
        );

        self.add_method(target, selector, method, Visibility::Public)?;
        self.reset_method_cache(selector);
        Ok(method)
    }

    /// Publicly bind a primitive-backed method into `module`, or into its
    /// metaclass when `meta` is set
    pub fn attach_primitive(
        &mut self,
        module: ModuleId,
        meta: bool,
        name: Symbol,
        primitive: Symbol,
    ) -> VmResult<ObjectRef> {
        if self.primitive(primitive).is_none() {
            return Err(VmError::NameError(format!(
                "unknown primitive {}",
                self.symbols.resolve(primitive)
            )));
        }
        let target = if meta {
            self.model.metaclass_of(module)
        } else {
            module
        };
        let mut exec = Executable::new(name, ExecutableKind::Primitive(primitive));
        exec.scope = Some(target);
        let method = self.new_method(exec)?;

        self.add_method(target, name, method, Visibility::Public)?;
        self.reset_method_cache(name);
        Ok(method)
    }

    /// Change the visibility of `selector` as seen through `module`.
    ///
    /// A method defined directly in `module` is updated in place; an
    /// inherited one gets a visibility stub.
    pub fn set_visibility(
        &mut self,
        module: ModuleId,
        selector: Symbol,
        visibility: Visibility,
    ) -> VmResult<()> {
        let local = self.model.get(module).local_method(selector).copied();
        let entry = match local {
            Some(MethodEntry::Concrete { executable, .. }) => MethodEntry::Concrete {
                executable,
                visibility,
            },
            Some(MethodEntry::VisibilityStub(_)) => MethodEntry::VisibilityStub(visibility),
            Some(MethodEntry::Undefined) | None => {
                let defined = self
                    .model
                    .lookup_chain(module)
                    .find_map(|m| match self.model.method_entry(m, selector) {
                        Some(MethodEntry::VisibilityStub(_)) | None => None,
                        Some(entry) => Some(*entry),
                    });
                match defined {
                    Some(MethodEntry::Concrete { .. }) if local.is_none() => {
                        MethodEntry::VisibilityStub(visibility)
                    }
                    _ => {
                        return Err(VmError::NameError(format!(
                            "undefined method {} for {}",
                            self.symbols.resolve(selector),
                            self.model.name_of(module)
                        )))
                    }
                }
            }
        };

        self.model.get_mut(module).methods.insert(selector, entry);
        self.caches.inc_serial();
        self.reset_method_cache(selector);
        Ok(())
    }

    /// Mark `selector` as removed at `module`, hiding inherited definitions
    pub fn undefine_method(&mut self, module: ModuleId, selector: Symbol) -> VmResult<()> {
        let previous = self
            .model
            .get_mut(module)
            .methods
            .insert(selector, MethodEntry::Undefined);
        if let Some(MethodEntry::Concrete { executable, .. }) = previous {
            if self.heap.contains(executable) {
                self.deoptimize_inliners(executable)?;
            }
        }
        self.caches.inc_serial();
        self.reset_method_cache(selector);
        Ok(())
    }

    /// Drop compiled code of `method` and of every method that inlined it.
    /// Returns how many inliners were cleared.
    pub fn deoptimize_inliners(&mut self, method: ObjectRef) -> VmResult<usize> {
        let exec = self.heap.executable_mut(method)?;
        let inliners = std::mem::take(&mut exec.inliners);
        if let Some(id) = exec.jit.take() {
            self.code_cache.invalidate(id);
        }

        for inliner in &inliners {
            if let Ok(exec) = self.heap.executable_mut(*inliner) {
                if let Some(id) = exec.jit.take() {
                    self.code_cache.invalidate(id);
                }
            }
        }
        if !inliners.is_empty() {
            debug!("deoptimized {} inliners of {}", inliners.len(), method);
        }
        Ok(inliners.len())
    }
}
