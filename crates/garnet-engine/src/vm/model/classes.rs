//! Class and module creation, object classes and singleton classes

use crate::vm::interpreter::World;
use crate::vm::model::module::ModuleKind;
use crate::vm::model::scope::StaticScope;
use crate::vm::object::{HeapObject, ObjectBody, ObjectKind};
use crate::vm::symbol::Symbol;
use crate::vm::value::{ModuleId, ObjectRef, Value};
use crate::vm::{VmError, VmResult};
use log::debug;

impl World {
    /// Open (or create) class `name` in the scope's module, or under
    /// `Object` without a scope
    pub fn open_class(
        &mut self,
        name: Symbol,
        superclass: Option<ModuleId>,
        scope: Option<&StaticScope>,
    ) -> VmResult<ModuleId> {
        let under = scope.map_or(self.model.object, StaticScope::module);
        self.open_class_under(name, superclass, under)
    }

    /// Open (or create) class `name` as a constant of `under`.
    ///
    /// Reopening without a superclass returns the existing class. Reopening
    /// with one requires it to match the recorded superclass.
    pub fn open_class_under(
        &mut self,
        name: Symbol,
        superclass: Option<ModuleId>,
        under: ModuleId,
    ) -> VmResult<ModuleId> {
        if let Some(sup) = superclass {
            if !self.model.get(sup).is_class() {
                return Err(VmError::WrongConstantKind {
                    name: self.model.name_of(sup),
                    expected: "class",
                });
            }
        }

        if let Some(existing) = self.model.get(under).constant(name) {
            let class = match existing.as_module() {
                Some(id) if self.model.get(id).is_class() => id,
                _ => {
                    return Err(VmError::WrongConstantKind {
                        name: self.symbols.resolve(name).to_string(),
                        expected: "class",
                    })
                }
            };
            let Some(sup) = superclass else {
                return Ok(class);
            };
            let recorded = self.model.true_superclass(class);
            if recorded != Some(sup) {
                return Err(VmError::SuperclassMismatch {
                    given: self.model.name_of(sup),
                    previous: recorded.map_or_else(|| "nil".to_string(), |r| self.model.name_of(r)),
                });
            }
            return Ok(class);
        }

        let sup = superclass.unwrap_or(self.model.object);
        let full_name = self.model.qualified_name(under, self.symbols.resolve(name));
        let class = self.model.new_class(Some(full_name), sup);
        self.model
            .get_mut(under)
            .constants
            .insert(name, Value::Module(class));
        debug!(
            "created class {} < {}",
            self.model.name_of(class),
            self.model.name_of(sup)
        );
        Ok(class)
    }

    /// Open (or create) module `name` in the scope's module
    pub fn open_module(
        &mut self,
        name: Symbol,
        scope: Option<&StaticScope>,
    ) -> VmResult<ModuleId> {
        let under = scope.map_or(self.model.object, StaticScope::module);
        self.open_module_under(name, under)
    }

    /// Open (or create) module `name` as a constant of `under`
    pub fn open_module_under(&mut self, name: Symbol, under: ModuleId) -> VmResult<ModuleId> {
        if let Some(existing) = self.model.get(under).constant(name) {
            return match existing.as_module() {
                Some(id) if !self.model.get(id).is_included_module() => Ok(id),
                _ => Err(VmError::WrongConstantKind {
                    name: self.symbols.resolve(name).to_string(),
                    expected: "module",
                }),
            };
        }

        let full_name = self.model.qualified_name(under, self.symbols.resolve(name));
        let module = self.model.new_module(Some(full_name));
        self.model
            .get_mut(under)
            .constants
            .insert(name, Value::Module(module));
        debug!("created module {}", self.model.name_of(module));
        Ok(module)
    }

    fn heap_object(&self, r: ObjectRef) -> VmResult<&HeapObject> {
        self.heap
            .get(r)
            .ok_or_else(|| VmError::RuntimeError(format!("dangling reference {}", r)))
    }

    /// The class of `value`, never a singleton class
    pub fn object_class(&self, value: Value) -> VmResult<ModuleId> {
        let model = &self.model;
        Ok(match value {
            Value::Nil => model.nil_class,
            Value::True => model.true_class,
            Value::False => model.false_class,
            Value::Fixnum(_) => model.fixnum_class,
            Value::Symbol(_) => model.symbol_class,
            Value::Module(id) => model.class_of_module(id),
            Value::Object(r) => self.heap_object(r)?.header.class,
        })
    }

    /// Where method lookup for `value` starts: its singleton class if it
    /// has one, otherwise its class
    pub fn lookup_origin(&self, value: Value) -> VmResult<ModuleId> {
        match value {
            Value::Object(r) => {
                let header = &self.heap_object(r)?.header;
                Ok(header.singleton.unwrap_or(header.class))
            }
            Value::Module(id) => Ok(self
                .model
                .get(id)
                .metaclass()
                .unwrap_or_else(|| self.model.class_of_module(id))),
            other => self.object_class(other),
        }
    }

    /// The singleton class of `value`, created on demand. nil, true and
    /// false use their classes; other immediates have none.
    pub fn object_metaclass(&mut self, value: Value) -> VmResult<ModuleId> {
        match value {
            Value::Nil => Ok(self.model.nil_class),
            Value::True => Ok(self.model.true_class),
            Value::False => Ok(self.model.false_class),
            Value::Module(id) => Ok(self.model.metaclass_of(id)),
            Value::Object(r) => {
                let header = &self.heap_object(r)?.header;
                if let Some(singleton) = header.singleton {
                    return Ok(singleton);
                }
                let class = header.class;
                let singleton = self.model.new_singleton(value, class);
                if let Some(object) = self.heap.get_mut(r) {
                    object.header.singleton = Some(singleton);
                }
                Ok(singleton)
            }
            Value::Fixnum(_) | Value::Symbol(_) => Err(VmError::TypeError(
                "immediate values have no singleton class".to_string(),
            )),
        }
    }

    /// Alias of `object_metaclass`
    pub fn singleton_class(&mut self, value: Value) -> VmResult<ModuleId> {
        self.object_metaclass(value)
    }

    /// Change the class of a heap object. The target class must declare the
    /// object's representation kind and, for packed objects, its field count.
    pub fn set_object_class(&mut self, object: Value, class: ModuleId) -> VmResult<Value> {
        let Value::Object(r) = object else {
            return Err(VmError::TypeError(
                "only heap objects can change class".to_string(),
            ));
        };
        let info = self
            .model
            .get(class)
            .class_info()
            .ok_or_else(|| VmError::WrongConstantKind {
                name: self.model.name_of(class),
                expected: "class",
            })?;
        let (expected_kind, expected_packed) = (info.instance_kind, info.packed_size);

        let obj = self.heap_object(r)?;
        if obj.kind() != expected_kind {
            return Err(VmError::IncompatibleLayout {
                expected: expected_kind,
                found: obj.kind(),
            });
        }
        if expected_kind == ObjectKind::Packed && obj.packed_size() != expected_packed {
            return Err(VmError::PackedSizeMismatch {
                expected: expected_packed,
                found: obj.packed_size(),
            });
        }

        let singleton = obj.header.singleton;
        if let Some(object) = self.heap.get_mut(r) {
            object.header.class = class;
        }

        // Re-point the singleton past any extended modules, at the new class
        if let Some(singleton) = singleton {
            let mut link = singleton;
            while let Some(next) = self.model.get(link).superclass() {
                if !self.model.get(next).is_included_module() {
                    break;
                }
                link = next;
            }
            self.model.get_mut(link).superclass = Some(class);
            self.caches.clear_all();
            self.caches.inc_serial();
        }
        Ok(object)
    }

    /// Allocate an empty instance laid out the way `class` declares
    pub fn allocate_instance(&mut self, class: ModuleId) -> VmResult<ObjectRef> {
        let info = self
            .model
            .get(class)
            .class_info()
            .ok_or_else(|| VmError::TypeError(format!(
                "{} is not a class",
                self.model.name_of(class)
            )))?;
        let body = match info.instance_kind {
            ObjectKind::Generic => ObjectBody::Generic,
            ObjectKind::Packed => ObjectBody::Packed(vec![Value::Nil; info.packed_size]),
            ObjectKind::String => ObjectBody::Str(String::new()),
            ObjectKind::Array => ObjectBody::Array(Vec::new()),
            ObjectKind::Method => {
                return Err(VmError::TypeError(
                    "methods are created with new_method".to_string(),
                ))
            }
        };
        self.heap.allocate(HeapObject::new(class, body))
    }

    /// Declare the instance representation of `class`
    pub fn set_instance_layout(
        &mut self,
        class: ModuleId,
        kind: ObjectKind,
        packed_size: usize,
    ) -> VmResult<()> {
        let name = self.model.name_of(class);
        let info = self
            .model
            .get_mut(class)
            .class_info_mut()
            .ok_or_else(|| VmError::TypeError(format!("{} is not a class", name)))?;
        info.instance_kind = kind;
        info.packed_size = if kind == ObjectKind::Packed { packed_size } else { 0 };
        Ok(())
    }

    /// Include `module` into `target`'s lookup chain. Returns false if it
    /// was already there.
    pub fn include_module(&mut self, target: ModuleId, module: ModuleId) -> VmResult<bool> {
        if !matches!(self.model.get(module).kind(), ModuleKind::Module) {
            return Err(VmError::WrongConstantKind {
                name: self.model.name_of(module),
                expected: "module",
            });
        }
        if !self.model.insert_include(target, module) {
            return Ok(false);
        }

        let selectors: Vec<Symbol> = self.model.get(module).selectors().collect();
        for selector in selectors {
            self.caches.invalidate(selector);
        }
        self.caches.inc_serial();
        debug!(
            "included {} into {}",
            self.model.name_of(module),
            self.model.name_of(target)
        );
        Ok(true)
    }

    /// Include `module` into `value`'s singleton class
    pub fn extend_object(&mut self, value: Value, module: ModuleId) -> VmResult<bool> {
        let singleton = self.object_metaclass(value)?;
        self.include_module(singleton, module)
    }

    /// Modules included into `value`'s singleton class, most recent first.
    /// `None` when `value` has no singleton class.
    pub fn extended_modules(&self, value: Value) -> VmResult<Option<Vec<ModuleId>>> {
        let singleton = match value {
            Value::Object(r) => self.heap_object(r)?.header.singleton,
            Value::Module(id) => self.model.get(id).metaclass(),
            _ => None,
        };
        let Some(singleton) = singleton else {
            return Ok(None);
        };

        let mut modules = Vec::new();
        let mut link = self.model.get(singleton).superclass();
        while let Some(id) = link {
            match self.model.get(id).kind() {
                ModuleKind::IncludedModule { module } => modules.push(*module),
                _ => break,
            }
            link = self.model.get(id).superclass();
        }
        Ok(Some(modules))
    }

    /// Approximate bytes used by a heap object and its ivars; 0 otherwise
    pub fn memory_size(&self, value: Value) -> usize {
        value
            .as_object()
            .and_then(|r| self.heap.get(r))
            .map_or(0, HeapObject::size_in_bytes)
    }

    /// Allocate a string
    pub fn new_string(&mut self, text: &str) -> VmResult<ObjectRef> {
        let class = self.model.string_class;
        self.heap
            .allocate(HeapObject::new(class, ObjectBody::Str(text.to_string())))
    }

    /// Allocate an array
    pub fn new_array(&mut self, elements: Vec<Value>) -> VmResult<ObjectRef> {
        let class = self.model.array_class;
        self.heap
            .allocate(HeapObject::new(class, ObjectBody::Array(elements)))
    }
}

#[cfg(test)]
mod tests {
    use crate::vm::interpreter::{SharedState, State};
    use crate::vm::model::StaticScope;
    use crate::vm::object::ObjectKind;
    use crate::vm::value::Value;
    use crate::vm::{VmError, VmOptions};

    fn state() -> State {
        State::new(SharedState::new(VmOptions::default())).unwrap()
    }

    #[test]
    fn test_nested_class_names() {
        let mut state = state();
        let world = state.world();
        let outer_sym = world.symbols.intern("Outer");
        let inner_sym = world.symbols.intern("Inner");

        let outer = world.open_module(outer_sym, None).unwrap();
        let scope = StaticScope::top(outer);
        let inner = world.open_class(inner_sym, None, Some(&*scope)).unwrap();

        assert_eq!(world.model.get(inner).name(), Some("Outer::Inner"));
        assert_eq!(world.model.get(outer).constant(inner_sym), Some(Value::Module(inner)));
        assert_eq!(world.open_module(outer_sym, None).unwrap(), outer);
    }

    #[test]
    fn test_wrong_constant_kinds() {
        let mut state = state();
        let world = state.world();
        let helpers = world.symbols.intern("Helpers");
        let module = world.open_module(helpers, None).unwrap();

        assert!(matches!(
            world.open_class(helpers, None, None),
            Err(VmError::WrongConstantKind { expected: "class", .. })
        ));
        let name = world.symbols.intern("Widget");
        assert!(matches!(
            world.open_class(name, Some(module), None),
            Err(VmError::WrongConstantKind { expected: "class", .. })
        ));

        let limit = world.symbols.intern("LIMIT");
        let object = world.model.object;
        world.const_set(object, limit, Value::Fixnum(3));
        assert!(matches!(
            world.open_module(limit, None),
            Err(VmError::WrongConstantKind { expected: "module", .. })
        ));
    }

    #[test]
    fn test_object_metaclass_rules() {
        let mut state = state();
        let world = state.world();
        let object = world.model.object;

        assert_eq!(world.object_metaclass(Value::Nil).unwrap(), world.model.nil_class);
        assert_eq!(world.object_metaclass(Value::True).unwrap(), world.model.true_class);
        assert!(matches!(
            world.object_metaclass(Value::Fixnum(1)),
            Err(VmError::TypeError(_))
        ));

        let obj = Value::Object(world.allocate_instance(object).unwrap());
        assert_eq!(world.extended_modules(obj).unwrap(), None);
        let singleton = world.object_metaclass(obj).unwrap();
        assert_eq!(world.object_metaclass(obj).unwrap(), singleton);
        assert_eq!(world.object_class(obj).unwrap(), object);
        assert_eq!(world.lookup_origin(obj).unwrap(), singleton);
        assert_eq!(world.extended_modules(obj).unwrap(), Some(Vec::new()));
    }

    #[test]
    fn test_extended_modules_in_lookup_order() {
        let mut state = state();
        let world = state.world();
        let object = world.model.object;
        let walk = world.symbols.intern("Walk");
        let swim = world.symbols.intern("Swim");
        let walker = world.open_module(walk, None).unwrap();
        let swimmer = world.open_module(swim, None).unwrap();

        let duck = Value::Object(world.allocate_instance(object).unwrap());
        assert!(world.extend_object(duck, walker).unwrap());
        assert!(world.extend_object(duck, swimmer).unwrap());
        assert!(!world.extend_object(duck, walker).unwrap());

        assert_eq!(
            world.extended_modules(duck).unwrap(),
            Some(vec![swimmer, walker])
        );
        assert!(world.kind_of(duck, walker).unwrap());
    }

    #[test]
    fn test_set_object_class_checks_layout() {
        let mut state = state();
        let world = state.world();
        let point_sym = world.symbols.intern("Point");
        let pair_sym = world.symbols.intern("Pair");
        let triple_sym = world.symbols.intern("Triple");

        let point = world.open_class(point_sym, None, None).unwrap();
        let pair = world.open_class(pair_sym, None, None).unwrap();
        let triple = world.open_class(triple_sym, None, None).unwrap();
        world.set_instance_layout(point, ObjectKind::Packed, 2).unwrap();
        world.set_instance_layout(pair, ObjectKind::Packed, 2).unwrap();
        world.set_instance_layout(triple, ObjectKind::Packed, 3).unwrap();

        let p = Value::Object(world.allocate_instance(point).unwrap());
        assert_eq!(world.set_object_class(p, pair).unwrap(), p);
        assert_eq!(world.object_class(p).unwrap(), pair);

        assert!(matches!(
            world.set_object_class(p, triple),
            Err(VmError::PackedSizeMismatch { expected: 3, found: 2 })
        ));
        let string_class = world.model.string_class;
        assert!(matches!(
            world.set_object_class(p, string_class),
            Err(VmError::IncompatibleLayout { .. })
        ));
        assert_eq!(world.object_class(p).unwrap(), pair);
        assert!(world.set_object_class(Value::Fixnum(1), pair).is_err());
    }

    #[test]
    fn test_memory_size() {
        let mut state = state();
        let world = state.world();
        let small = Value::Object(world.new_string("a").unwrap());
        let large = Value::Object(world.new_string(&"a".repeat(100)).unwrap());
        assert!(world.memory_size(large) > world.memory_size(small));
        assert_eq!(world.memory_size(Value::Fixnum(7)), 0);
    }
}
