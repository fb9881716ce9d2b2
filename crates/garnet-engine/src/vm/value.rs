//! Managed values
//!
//! A `Value` is either an immediate (nil, booleans, fixnums, symbols) or a
//! reference. Heap references (`ObjectRef`) are addresses into the moving
//! object heap and change when the collector evacuates; module references
//! (`ModuleId`) index the pinned module arena and never change.

use crate::vm::symbol::Symbol;
use std::fmt;

/// Address of an object in the managed heap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef(u64);

impl ObjectRef {
    /// Wrap a raw heap address
    #[inline]
    pub(crate) fn from_address(address: u64) -> Self {
        ObjectRef(address)
    }

    /// The raw heap address
    #[inline]
    pub fn address(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Index of a module or class in the module arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(u32);

impl ModuleId {
    #[inline]
    pub(crate) fn from_index(index: usize) -> Self {
        ModuleId(index as u32)
    }

    /// Arena index
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A managed value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Value {
    /// The nil object
    #[default]
    Nil,
    /// The true object
    True,
    /// The false object
    False,
    /// Tagged integer
    Fixnum(i64),
    /// Interned symbol
    Symbol(Symbol),
    /// Heap object (may move during collection)
    Object(ObjectRef),
    /// Module or class (pinned)
    Module(ModuleId),
}

impl Value {
    /// Create a boolean value
    #[inline]
    pub fn bool(b: bool) -> Self {
        if b {
            Value::True
        } else {
            Value::False
        }
    }

    /// Is this a reference (heap object or module)?
    #[inline]
    pub fn is_reference(&self) -> bool {
        matches!(self, Value::Object(_) | Value::Module(_))
    }

    /// Does this value point into the moving heap?
    #[inline]
    pub fn is_heap_allocated(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    /// Everything except nil and false is truthy
    #[inline]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::False)
    }

    /// The heap reference, if any
    #[inline]
    pub fn as_object(&self) -> Option<ObjectRef> {
        match self {
            Value::Object(r) => Some(*r),
            _ => None,
        }
    }

    /// The module reference, if any
    #[inline]
    pub fn as_module(&self) -> Option<ModuleId> {
        match self {
            Value::Module(id) => Some(*id),
            _ => None,
        }
    }

    /// The integer, if this is a fixnum
    #[inline]
    pub fn as_fixnum(&self) -> Option<i64> {
        match self {
            Value::Fixnum(n) => Some(*n),
            _ => None,
        }
    }

    /// Mutable access to the heap reference, for collectors rewriting slots
    #[inline]
    pub fn object_slot_mut(&mut self) -> Option<&mut ObjectRef> {
        match self {
            Value::Object(r) => Some(r),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Fixnum(n)
    }
}

impl From<ObjectRef> for Value {
    fn from(r: ObjectRef) -> Self {
        Value::Object(r)
    }
}

impl From<ModuleId> for Value {
    fn from(id: ModuleId) -> Self {
        Value::Module(id)
    }
}
