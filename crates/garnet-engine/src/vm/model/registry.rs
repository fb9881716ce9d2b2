//! Module arena and bootstrap hierarchy
//!
//! Modules never move: they are addressed by `ModuleId` and live for the
//! lifetime of the runtime. Every class and module gets its metaclass
//! eagerly; instances get a singleton class only when one is asked for.

use crate::vm::gc::heap::Forwarding;
use crate::vm::model::module::{ClassInfo, MethodEntry, Module, ModuleKind};
use crate::vm::object::ObjectKind;
use crate::vm::symbol::{Symbol, SymbolTable};
use crate::vm::value::{ModuleId, ObjectRef, Value};
use log::debug;

/// The class/module arena plus the bootstrap classes
#[derive(Debug)]
pub struct ObjectModel {
    modules: Vec<Module>,
    /// Root of the class hierarchy
    pub object: ModuleId,
    /// Class of plain modules
    pub module: ModuleId,
    /// Class of classes
    pub class: ModuleId,
    /// Class of nil
    pub nil_class: ModuleId,
    /// Class of true
    pub true_class: ModuleId,
    /// Class of false
    pub false_class: ModuleId,
    /// Class of tagged integers
    pub fixnum_class: ModuleId,
    /// Class of symbols
    pub symbol_class: ModuleId,
    /// Class of strings
    pub string_class: ModuleId,
    /// Class of arrays
    pub array_class: ModuleId,
    /// Class of method bodies
    pub method_class: ModuleId,
}

impl ObjectModel {
    /// Build the bootstrap hierarchy and bind its constants under `Object`
    pub fn new(symbols: &mut SymbolTable) -> Self {
        let mut model = ObjectModel {
            modules: Vec::new(),
            object: ModuleId::from_index(0),
            module: ModuleId::from_index(0),
            class: ModuleId::from_index(0),
            nil_class: ModuleId::from_index(0),
            true_class: ModuleId::from_index(0),
            false_class: ModuleId::from_index(0),
            fixnum_class: ModuleId::from_index(0),
            symbol_class: ModuleId::from_index(0),
            string_class: ModuleId::from_index(0),
            array_class: ModuleId::from_index(0),
            method_class: ModuleId::from_index(0),
        };

        let object = model.push_class("Object", None, ObjectKind::Generic);
        model.object = object;
        model.module = model.push_class("Module", Some(object), ObjectKind::Generic);
        model.class = model.push_class("Class", Some(model.module), ObjectKind::Generic);
        model.nil_class = model.push_class("NilClass", Some(object), ObjectKind::Generic);
        model.true_class = model.push_class("TrueClass", Some(object), ObjectKind::Generic);
        model.false_class = model.push_class("FalseClass", Some(object), ObjectKind::Generic);
        model.fixnum_class = model.push_class("Fixnum", Some(object), ObjectKind::Generic);
        model.symbol_class = model.push_class("Symbol", Some(object), ObjectKind::Generic);
        model.string_class = model.push_class("String", Some(object), ObjectKind::String);
        model.array_class = model.push_class("Array", Some(object), ObjectKind::Array);
        model.method_class =
            model.push_class("CompiledMethod", Some(object), ObjectKind::Method);

        // Metaclasses need Class to exist, so they come second. Creation
        // order guarantees a superclass's metaclass exists first.
        for index in 0..model.modules.len() {
            model.attach_metaclass(ModuleId::from_index(index));
        }

        for index in 0..model.modules.len() {
            let id = ModuleId::from_index(index);
            if let Some(name) = model.modules[index].name.clone() {
                let sym = symbols.intern(&name);
                model.get_mut(object).constants.insert(sym, Value::Module(id));
            }
        }

        model
    }

    fn push(&mut self, name: Option<String>, kind: ModuleKind) -> ModuleId {
        let id = ModuleId::from_index(self.modules.len());
        self.modules.push(Module::new(id, name, kind));
        id
    }

    fn push_class(
        &mut self,
        name: &str,
        superclass: Option<ModuleId>,
        kind: ObjectKind,
    ) -> ModuleId {
        let id = self.push(
            Some(name.to_string()),
            ModuleKind::Class(ClassInfo::new(kind, 0)),
        );
        if let Some(sup) = superclass {
            self.get_mut(id).superclass = Some(sup);
            self.add_subclass(sup, id);
        }
        id
    }

    fn attach_metaclass(&mut self, id: ModuleId) -> ModuleId {
        let (is_class, is_meta) = (self.get(id).is_class(), self.get(id).is_metaclass());
        let parent = self.get(id).superclass;
        let superclass = if is_class {
            match parent {
                Some(sup) => self.metaclass_of(sup),
                None => self.class,
            }
        } else if is_meta {
            self.class
        } else {
            self.module
        };
        let meta = self.push(
            None,
            ModuleKind::MetaClass {
                attached: Value::Module(id),
            },
        );
        self.get_mut(meta).superclass = Some(superclass);
        self.get_mut(id).metaclass = Some(meta);
        meta
    }

    fn add_subclass(&mut self, superclass: ModuleId, subclass: ModuleId) {
        if let Some(info) = self.get_mut(superclass).class_info_mut() {
            info.subclasses.push(subclass);
        }
    }

    /// Borrow a module
    pub fn get(&self, id: ModuleId) -> &Module {
        &self.modules[id.index()]
    }

    /// Borrow a module mutably
    pub fn get_mut(&mut self, id: ModuleId) -> &mut Module {
        &mut self.modules[id.index()]
    }

    /// Number of modules in the arena (metaclasses and proxies included)
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether the arena is empty (never true after bootstrap)
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Create a class under `superclass`, inheriting its instance layout,
    /// and register it in the superclass's subclass index.
    pub fn new_class(&mut self, name: Option<String>, superclass: ModuleId) -> ModuleId {
        let (kind, packed_size) = self
            .get(superclass)
            .class_info()
            .map(|info| (info.instance_kind, info.packed_size))
            .unwrap_or((ObjectKind::Generic, 0));

        let id = self.push(name, ModuleKind::Class(ClassInfo::new(kind, packed_size)));
        self.get_mut(id).superclass = Some(superclass);
        self.add_subclass(superclass, id);
        self.attach_metaclass(id);
        id
    }

    /// Create a plain module
    pub fn new_module(&mut self, name: Option<String>) -> ModuleId {
        let id = self.push(name, ModuleKind::Module);
        self.attach_metaclass(id);
        id
    }

    /// Create the singleton class of a heap object whose class is `class`
    pub fn new_singleton(&mut self, attached: Value, class: ModuleId) -> ModuleId {
        let id = self.push(None, ModuleKind::MetaClass { attached });
        self.get_mut(id).superclass = Some(class);
        id
    }

    /// Metaclass of a module, created on demand for metaclasses themselves
    pub fn metaclass_of(&mut self, id: ModuleId) -> ModuleId {
        let existing = self.get(id).metaclass;
        match existing {
            Some(meta) => meta,
            None => self.attach_metaclass(id),
        }
    }

    /// Class of a module value
    pub fn class_of_module(&self, id: ModuleId) -> ModuleId {
        match self.get(id).kind {
            ModuleKind::Class(_) | ModuleKind::MetaClass { .. } => self.class,
            ModuleKind::Module | ModuleKind::IncludedModule { .. } => self.module,
        }
    }

    /// First non-proxy ancestor
    pub fn true_superclass(&self, id: ModuleId) -> Option<ModuleId> {
        let mut current = self.get(id).superclass;
        while let Some(sup) = current {
            if !self.get(sup).is_included_module() {
                return Some(sup);
            }
            current = self.get(sup).superclass;
        }
        None
    }

    /// The module a chain entry stands for (proxies resolve to their module)
    pub fn origin_module(&self, id: ModuleId) -> ModuleId {
        match self.get(id).kind {
            ModuleKind::IncludedModule { module } => module,
            _ => id,
        }
    }

    /// Method-table entry for `name` at chain entry `id`
    pub fn method_entry(&self, id: ModuleId, name: Symbol) -> Option<&MethodEntry> {
        self.get(self.origin_module(id)).methods.get(&name)
    }

    /// Splice a proxy for `module` directly above `target`.
    /// Returns false if `module` is already in the chain.
    pub fn insert_include(&mut self, target: ModuleId, module: ModuleId) -> bool {
        let already = self
            .lookup_chain(target)
            .any(|entry| entry == module || self.origin_module(entry) == module);
        if already {
            return false;
        }
        let proxy = self.push(None, ModuleKind::IncludedModule { module });
        let previous = self.get(target).superclass;
        self.get_mut(proxy).superclass = previous;
        self.get_mut(target).superclass = Some(proxy);
        true
    }

    /// Name used in diagnostics
    pub fn name_of(&self, id: ModuleId) -> String {
        let module = self.get(id);
        match (&module.name, &module.kind) {
            (Some(name), _) => name.clone(),
            (None, ModuleKind::MetaClass { attached }) => match attached {
                Value::Module(m) => format!("#<Class:{}>", self.name_of(*m)),
                _ => "#<Class:instance>".to_string(),
            },
            (None, ModuleKind::IncludedModule { module }) => self.name_of(*module),
            (None, _) => format!("#<Module:{}>", id.index()),
        }
    }

    /// Name for a constant `name` defined under `under`
    pub fn qualified_name(&self, under: ModuleId, name: &str) -> String {
        if under == self.object {
            name.to_string()
        } else {
            format!("{}::{}", self.name_of(under), name)
        }
    }

    /// Visit every heap reference the model keeps alive.
    ///
    /// Singleton classes of heap objects are not roots: their tables are
    /// reached through the attached object (`for_each_module_ref`).
    pub fn for_each_root(&self, f: &mut dyn FnMut(Value)) {
        for module in &self.modules {
            if Self::attached_object(module).is_some() {
                continue;
            }
            Self::visit_module(module, f);
        }
    }

    /// Visit the heap references held by one module's tables
    pub fn for_each_module_ref(&self, id: ModuleId, f: &mut dyn FnMut(Value)) {
        if let Some(module) = self.modules.get(id.index()) {
            Self::visit_module(module, f);
        }
    }

    fn visit_module(module: &Module, f: &mut dyn FnMut(Value)) {
        for value in module.constants.values() {
            f(*value);
        }
        for (_, value) in &module.ivars {
            f(*value);
        }
        for entry in module.methods.values() {
            if let Some(exec) = entry.executable() {
                f(Value::Object(exec));
            }
        }
    }

    fn attached_object(module: &Module) -> Option<ObjectRef> {
        match &module.kind {
            ModuleKind::MetaClass {
                attached: Value::Object(r),
            } => Some(*r),
            _ => None,
        }
    }

    /// Empty the singleton classes whose object did not survive `forwarding`.
    /// The arena slot stays (ids are pinned) but its tables are released.
    /// Returns how many singletons were released.
    pub fn release_dead_singletons(&mut self, forwarding: &Forwarding) -> usize {
        let mut released = 0;
        for module in &mut self.modules {
            let Some(r) = Self::attached_object(module) else {
                continue;
            };
            if forwarding.survived(r) {
                continue;
            }
            module.methods.clear();
            module.constants.clear();
            module.ivars.clear();
            module.kind = ModuleKind::MetaClass {
                attached: Value::Nil,
            };
            released += 1;
        }
        if released > 0 {
            debug!("released {} singleton classes of dead objects", released);
        }
        released
    }

    /// Rewrite every heap reference after an evacuation
    pub fn update_refs(&mut self, forwarding: &Forwarding) {
        for module in &mut self.modules {
            for value in module.constants.values_mut() {
                forwarding.update_value(value);
            }
            for (_, value) in &mut module.ivars {
                forwarding.update_value(value);
            }
            for entry in module.methods.values_mut() {
                if let MethodEntry::Concrete { executable, .. } = entry {
                    forwarding.update(executable);
                }
            }
            if let ModuleKind::MetaClass { attached } = &mut module.kind {
                forwarding.update_value(attached);
            }
        }
    }
}
