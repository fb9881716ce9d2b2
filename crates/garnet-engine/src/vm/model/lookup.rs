//! Method lookup and callability checks
//!
//! Every walk follows the superclass chain from a lookup origin, reading
//! include proxies through to the module they stand for. Visibility stubs
//! are transparent: the walk continues past them, but the first visibility
//! rule met is the one that applies.

use crate::vm::dispatch::CacheEntry;
use crate::vm::interpreter::{State, World};
use crate::vm::model::module::MethodEntry;
use crate::vm::model::registry::ObjectModel;
use crate::vm::object::Visibility;
use crate::vm::symbol::Symbol;
use crate::vm::value::{ModuleId, ObjectRef, Value};
use crate::vm::{MissingReason, VmResult};

/// Iterator over a superclass chain, include proxies included
pub struct LookupChain<'a> {
    model: &'a ObjectModel,
    next: Option<ModuleId>,
}

impl Iterator for LookupChain<'_> {
    type Item = ModuleId;

    fn next(&mut self) -> Option<ModuleId> {
        let current = self.next?;
        self.next = self.model.get(current).superclass();
        Some(current)
    }
}

impl ObjectModel {
    /// Walk from `start` up to the root
    pub fn lookup_chain(&self, start: ModuleId) -> LookupChain<'_> {
        LookupChain {
            model: self,
            next: Some(start),
        }
    }
}

impl World {
    fn resolve_from(&self, origin: ModuleId, selector: Symbol) -> Option<CacheEntry> {
        let mut visibility = None;
        for module in self.model.lookup_chain(origin) {
            match self.model.method_entry(module, selector) {
                None => continue,
                Some(MethodEntry::Undefined) => return None,
                Some(MethodEntry::VisibilityStub(vis)) => {
                    visibility.get_or_insert(*vis);
                }
                Some(MethodEntry::Concrete {
                    executable,
                    visibility: vis,
                }) => {
                    return Some(CacheEntry {
                        method: *executable,
                        module: self.model.origin_module(module),
                        visibility: visibility.unwrap_or(*vis),
                        serial: self.caches.serial(),
                    });
                }
            }
        }
        None
    }

    /// Privileged lookup: ignores visibility, stops at tombstones
    pub fn find_method(
        &self,
        receiver: Value,
        selector: Symbol,
    ) -> VmResult<Option<(ObjectRef, ModuleId)>> {
        let origin = self.lookup_origin(receiver)?;
        Ok(self
            .resolve_from(origin, selector)
            .map(|entry| (entry.method, entry.module)))
    }

    /// Lookup through the global cache
    pub fn resolve_method(
        &mut self,
        receiver: Value,
        selector: Symbol,
    ) -> VmResult<Option<CacheEntry>> {
        let origin = self.lookup_origin(receiver)?;
        if let Some(entry) = self.caches.global.lookup(origin, selector) {
            return Ok(Some(entry));
        }
        let resolved = self.resolve_from(origin, selector);
        if let Some(entry) = resolved {
            self.caches.global.insert(origin, selector, entry);
        }
        Ok(resolved)
    }

    /// Whether `value` is an instance of `module` or includes it
    pub fn kind_of(&self, value: Value, module: ModuleId) -> VmResult<bool> {
        let origin = self.lookup_origin(value)?;
        Ok(self
            .model
            .lookup_chain(origin)
            .any(|entry| entry == module || self.model.origin_module(entry) == module))
    }

    /// Walk the chain from `receiver`'s lookup origin applying visibility as
    /// seen from `caller`; `None` means an outside caller (public only).
    fn callable(
        &self,
        receiver: Value,
        selector: Symbol,
        caller: Option<Value>,
    ) -> VmResult<Result<(), MissingReason>> {
        let origin = self.lookup_origin(receiver)?;
        let mut skip_visibility = false;

        for module in self.model.lookup_chain(origin) {
            let entry = match self.model.method_entry(module, selector) {
                None => continue,
                Some(MethodEntry::Undefined) => return Ok(Err(MissingReason::Normal)),
                Some(entry) => entry,
            };

            if !skip_visibility {
                match entry.visibility() {
                    Some(Visibility::Private) if caller != Some(receiver) => {
                        return Ok(Err(MissingReason::Private));
                    }
                    Some(Visibility::Protected) => {
                        let defining = self.model.origin_module(module);
                        let related = match caller {
                            Some(caller) => self.kind_of(caller, defining)?,
                            None => false,
                        };
                        if !related {
                            return Ok(Err(MissingReason::Protected));
                        }
                    }
                    _ => {}
                }
            }

            // A stub only changes visibility; keep walking for the body but
            // do not apply deeper visibility rules.
            match entry {
                MethodEntry::VisibilityStub(_) => skip_visibility = true,
                _ => return Ok(Ok(())),
            }
        }
        Ok(Err(MissingReason::Normal))
    }

    /// Whether `invoking_self` may send `selector` to `receiver`; on failure
    /// the reason the method counts as missing
    pub fn check_callable(
        &self,
        receiver: Value,
        selector: Symbol,
        invoking_self: Value,
    ) -> VmResult<Result<(), MissingReason>> {
        self.callable(receiver, selector, Some(invoking_self))
    }

    /// Whether a `super` call from `current_module` for `selector` has a
    /// target. Visibility is not checked.
    pub fn check_super_callable(&self, current_module: ModuleId, selector: Symbol) -> bool {
        let Some(start) = self.model.get(current_module).superclass() else {
            return false;
        };
        for module in self.model.lookup_chain(start) {
            match self.model.method_entry(module, selector) {
                None | Some(MethodEntry::VisibilityStub(_)) => continue,
                Some(MethodEntry::Undefined) => return false,
                Some(MethodEntry::Concrete { .. }) => return true,
            }
        }
        false
    }

    /// Whether `value` publicly responds to `selector`
    pub fn respond_to(&self, value: Value, selector: Symbol) -> VmResult<bool> {
        Ok(self.callable(value, selector, None)?.is_ok())
    }
}

impl State {
    /// `World::check_callable`, recording the missing reason on failure
    pub fn check_callable(
        &mut self,
        receiver: Value,
        selector: Symbol,
        invoking_self: Value,
    ) -> VmResult<bool> {
        match self
            .world()
            .check_callable(receiver, selector, invoking_self)?
        {
            Ok(()) => Ok(true),
            Err(reason) => {
                self.set_missing_reason(reason);
                Ok(false)
            }
        }
    }

    /// `World::check_super_callable`, recording `Super` on failure
    pub fn check_super_callable(&mut self, current_module: ModuleId, selector: Symbol) -> bool {
        let callable = self.world().check_super_callable(current_module, selector);
        if !callable {
            self.set_missing_reason(MissingReason::Super);
        }
        callable
    }
}
