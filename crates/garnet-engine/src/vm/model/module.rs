//! Module, class and method-table entities

use crate::vm::object::{ObjectKind, Visibility};
use crate::vm::symbol::Symbol;
use crate::vm::value::{ModuleId, ObjectRef, Value};
use rustc_hash::FxHashMap;

/// One method-table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodEntry {
    /// A real implementation
    Concrete {
        /// The executable object
        executable: ObjectRef,
        /// Visibility at this level of the chain
        visibility: Visibility,
    },
    /// Tombstone: the selector is explicitly removed here
    Undefined,
    /// Visibility override with no implementation of its own
    VisibilityStub(Visibility),
}

impl MethodEntry {
    /// Visibility rule of this entry (none for tombstones)
    pub fn visibility(&self) -> Option<Visibility> {
        match self {
            MethodEntry::Concrete { visibility, .. } => Some(*visibility),
            MethodEntry::VisibilityStub(visibility) => Some(*visibility),
            MethodEntry::Undefined => None,
        }
    }

    /// The executable, if this entry has one
    pub fn executable(&self) -> Option<ObjectRef> {
        match self {
            MethodEntry::Concrete { executable, .. } => Some(*executable),
            _ => None,
        }
    }
}

/// Class-only attributes
#[derive(Debug, Clone)]
pub struct ClassInfo {
    /// Representation kind of instances
    pub instance_kind: ObjectKind,
    /// Inline field count for `Packed` instances
    pub packed_size: usize,
    /// Direct subclasses, in creation order
    pub subclasses: Vec<ModuleId>,
}

impl ClassInfo {
    pub(crate) fn new(instance_kind: ObjectKind, packed_size: usize) -> Self {
        Self {
            instance_kind,
            packed_size,
            subclasses: Vec::new(),
        }
    }
}

/// What kind of module-like entity this is
#[derive(Debug, Clone)]
pub enum ModuleKind {
    /// Plain module
    Module,
    /// Class with an instance layout
    Class(ClassInfo),
    /// Singleton class of one value
    MetaClass {
        /// The value this singleton belongs to (not a root)
        attached: Value,
    },
    /// Proxy spliced into a lookup chain by `include`
    IncludedModule {
        /// The module whose tables the proxy shares
        module: ModuleId,
    },
}

/// A module or class in the pinned module arena
#[derive(Debug, Clone)]
pub struct Module {
    pub(crate) id: ModuleId,
    pub(crate) name: Option<String>,
    pub(crate) kind: ModuleKind,
    pub(crate) superclass: Option<ModuleId>,
    pub(crate) constants: FxHashMap<Symbol, Value>,
    pub(crate) methods: FxHashMap<Symbol, MethodEntry>,
    pub(crate) metaclass: Option<ModuleId>,
    pub(crate) ivars: Vec<(Symbol, Value)>,
}

impl Module {
    pub(crate) fn new(id: ModuleId, name: Option<String>, kind: ModuleKind) -> Self {
        Self {
            id,
            name,
            kind,
            superclass: None,
            constants: FxHashMap::default(),
            methods: FxHashMap::default(),
            metaclass: None,
            ivars: Vec::new(),
        }
    }

    /// Arena id
    pub fn id(&self) -> ModuleId {
        self.id
    }

    /// Fully qualified name, if named
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Entity kind
    pub fn kind(&self) -> &ModuleKind {
        &self.kind
    }

    /// Next entry in the lookup chain (may be an include proxy)
    pub fn superclass(&self) -> Option<ModuleId> {
        self.superclass
    }

    /// Singleton class, if one was created
    pub fn metaclass(&self) -> Option<ModuleId> {
        self.metaclass
    }

    /// Whether this is a (non-singleton) class
    pub fn is_class(&self) -> bool {
        matches!(self.kind, ModuleKind::Class(_))
    }

    /// Whether this is a singleton class
    pub fn is_metaclass(&self) -> bool {
        matches!(self.kind, ModuleKind::MetaClass { .. })
    }

    /// Whether this is an include proxy
    pub fn is_included_module(&self) -> bool {
        matches!(self.kind, ModuleKind::IncludedModule { .. })
    }

    /// Class attributes, for classes
    pub fn class_info(&self) -> Option<&ClassInfo> {
        match &self.kind {
            ModuleKind::Class(info) => Some(info),
            _ => None,
        }
    }

    pub(crate) fn class_info_mut(&mut self) -> Option<&mut ClassInfo> {
        match &mut self.kind {
            ModuleKind::Class(info) => Some(info),
            _ => None,
        }
    }

    /// Direct subclasses (empty for non-classes)
    pub fn subclasses(&self) -> &[ModuleId] {
        self.class_info().map(|c| c.subclasses.as_slice()).unwrap_or(&[])
    }

    /// A constant defined directly in this module
    pub fn constant(&self, name: Symbol) -> Option<Value> {
        self.constants.get(&name).copied()
    }

    /// A method-table entry defined directly in this module
    pub fn local_method(&self, name: Symbol) -> Option<&MethodEntry> {
        self.methods.get(&name)
    }

    /// Selectors with an entry in this module's table
    pub fn selectors(&self) -> impl Iterator<Item = Symbol> + '_ {
        self.methods.keys().copied()
    }

    /// Read a module-level instance variable
    pub fn get_ivar(&self, name: Symbol) -> Option<Value> {
        self.ivars.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)
    }

    /// Write a module-level instance variable
    pub fn set_ivar(&mut self, name: Symbol, value: Value) {
        match self.ivars.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.ivars.push((name, value)),
        }
    }
}
