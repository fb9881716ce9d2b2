//! Constant binding and resolution

use crate::vm::interpreter::{Invoker, State, World};
use crate::vm::model::scope::StaticScope;
use crate::vm::symbol::Symbol;
use crate::vm::value::{ModuleId, Value};
use crate::vm::{VmError, VmResult};
use log::trace;

impl World {
    /// Bind constant `name` in `module`
    pub fn const_set(&mut self, module: ModuleId, name: Symbol, value: Value) {
        self.model.get_mut(module).constants.insert(name, value);
    }

    /// Resolve `name` from a lexical scope: enclosing scopes innermost
    /// first, then the ancestors of the innermost module, then `Object`
    pub fn const_get(&self, scope: &StaticScope, name: Symbol) -> Option<Value> {
        scope
            .chain()
            .find_map(|level| self.model.get(level.module()).constant(name))
            .or_else(|| self.const_get_under(scope.module(), name))
            .or_else(|| self.model.get(self.model.object).constant(name))
    }

    /// Resolve `name` in `under` and its ancestors
    pub fn const_get_under(&self, under: ModuleId, name: Symbol) -> Option<Value> {
        self.model
            .lookup_chain(under)
            .find_map(|entry| self.model.get(self.model.origin_module(entry)).constant(name))
    }

    fn missing_constant(&self, under: Option<ModuleId>, name: Symbol) -> VmError {
        let name = self.symbols.resolve(name);
        VmError::NameError(match under {
            Some(module) => format!(
                "uninitialized constant {}",
                self.model.qualified_name(module, name)
            ),
            None => format!("uninitialized constant {}", name),
        })
    }
}

impl State {
    /// Resolve a constant from a lexical scope; NameError on a miss
    pub fn const_defined(&mut self, scope: &StaticScope, name: Symbol) -> VmResult<Value> {
        let world = self.world();
        world
            .const_get(scope, name)
            .ok_or_else(|| world.missing_constant(None, name))
    }

    /// Resolve a constant under an explicit module.
    ///
    /// On a miss with `send_const_missing` set, `const_missing(name)` is sent
    /// to the module and its result returned.
    pub fn const_defined_under(
        &mut self,
        invoker: &mut dyn Invoker,
        under: ModuleId,
        name: Symbol,
        send_const_missing: bool,
    ) -> VmResult<Value> {
        let world = self.world();
        if let Some(value) = world.const_get_under(under, name) {
            return Ok(value);
        }
        if !send_const_missing {
            return Err(world.missing_constant(Some(under), name));
        }

        let hook = world.symbols.intern("const_missing");
        trace!(
            "sending const_missing({}) to {}",
            world.symbols.resolve(name),
            world.model.name_of(under)
        );
        invoker.send(self, Value::Module(under), hook, &[Value::Symbol(name)])
    }
}
