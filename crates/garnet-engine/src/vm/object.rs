//! Heap object layout and executables

use crate::jit::runtime::ResourceId;
use crate::vm::ffi::{Handle, NativeEnv};
use crate::vm::symbol::Symbol;
use crate::vm::value::{ModuleId, ObjectRef, Value};
use crate::vm::VmResult;
use std::fmt;

/// Low-level representation kind of a heap object.
///
/// Every class declares the kind its instances use; an object may only be
/// re-classed into a class declaring the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// Fields live in the ivar table only
    Generic,
    /// Fixed number of inline fields
    Packed,
    /// Byte string
    String,
    /// Growable value array
    Array,
    /// Executable (method body)
    Method,
}

/// Method visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    /// Callable from anywhere
    Public,
    /// Callable only with the receiver as self
    Private,
    /// Callable from instances of the defining module's kind
    Protected,
}

/// Signature of natively implemented methods.
///
/// Arguments arrive as handles of the call's context so they stay valid
/// across collections; read them with `NativeEnv::resolve` or `NativeEnv::arg`.
pub type NativeFn = fn(&mut NativeEnv<'_>, &[Handle]) -> VmResult<Value>;

/// A method implemented in Rust
#[derive(Clone, Copy)]
pub struct NativeMethod {
    /// Expected argument count (-1 = variadic)
    pub arity: i32,
    /// The implementation
    pub func: NativeFn,
}

impl fmt::Debug for NativeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeMethod")
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// What an executable runs
#[derive(Debug, Clone)]
pub enum ExecutableKind {
    /// Bytecode interpreted by the (external) interpreter loop
    Bytecode {
        /// Encoded instructions
        code: Vec<u8>,
        /// Literal pool
        literals: Vec<Value>,
    },
    /// Foreign method invoked through a foreign call context
    Native(NativeMethod),
    /// Named VM primitive
    Primitive(Symbol),
}

/// A method body stored in the heap
#[derive(Debug, Clone)]
pub struct Executable {
    /// Name the method was defined with
    pub name: Symbol,
    /// Body
    pub kind: ExecutableKind,
    /// Serial stamped when the method was attached
    pub serial: u64,
    /// Module the method was attached to
    pub scope: Option<ModuleId>,
    /// Arguments were formalized against a class
    pub formalized: bool,
    /// Instance layout the method was specialized for
    pub specialized_for: Option<ObjectKind>,
    /// JIT code resource, if compiled
    pub jit: Option<ResourceId>,
    /// Compiled methods that inlined this one
    pub inliners: Vec<ObjectRef>,
}

impl Executable {
    /// Create an unattached executable
    pub fn new(name: Symbol, kind: ExecutableKind) -> Self {
        Self {
            name,
            kind,
            serial: 0,
            scope: None,
            formalized: false,
            specialized_for: None,
            jit: None,
            inliners: Vec::new(),
        }
    }

    /// Create a native executable
    pub fn native(name: Symbol, arity: i32, func: NativeFn) -> Self {
        Self::new(name, ExecutableKind::Native(NativeMethod { arity, func }))
    }

    /// Create a bytecode executable
    pub fn bytecode(name: Symbol, code: Vec<u8>, literals: Vec<Value>) -> Self {
        Self::new(name, ExecutableKind::Bytecode { code, literals })
    }

    /// The native implementation, if this is a foreign method
    pub fn as_native(&self) -> Option<NativeMethod> {
        match &self.kind {
            ExecutableKind::Native(native) => Some(*native),
            _ => None,
        }
    }

    fn for_each_ref(&self, f: &mut dyn FnMut(ObjectRef)) {
        if let ExecutableKind::Bytecode { literals, .. } = &self.kind {
            for r in literals.iter().filter_map(Value::as_object) {
                f(r);
            }
        }
        for r in &self.inliners {
            f(*r);
        }
    }

    fn for_each_ref_mut(&mut self, f: &mut dyn FnMut(&mut ObjectRef)) {
        if let ExecutableKind::Bytecode { literals, .. } = &mut self.kind {
            for r in literals.iter_mut().filter_map(Value::object_slot_mut) {
                f(r);
            }
        }
        for r in &mut self.inliners {
            f(r);
        }
    }
}

/// Per-object header
#[derive(Debug, Clone)]
pub struct ObjectHeader {
    /// Class (never a singleton class)
    pub class: ModuleId,
    /// Singleton class, created on first singleton mutation
    pub singleton: Option<ModuleId>,
    /// Instance variables in definition order
    pub ivars: Vec<(Symbol, Value)>,
}

/// Object payload
#[derive(Debug, Clone)]
pub enum ObjectBody {
    /// No inline storage
    Generic,
    /// Fixed inline fields
    Packed(Vec<Value>),
    /// String bytes
    Str(String),
    /// Array elements
    Array(Vec<Value>),
    /// Method body
    Method(Executable),
}

/// A heap-allocated object
#[derive(Debug, Clone)]
pub struct HeapObject {
    /// Header
    pub header: ObjectHeader,
    /// Payload
    pub body: ObjectBody,
}

impl HeapObject {
    /// Create an object of `class` with the given body
    pub fn new(class: ModuleId, body: ObjectBody) -> Self {
        Self {
            header: ObjectHeader {
                class,
                singleton: None,
                ivars: Vec::new(),
            },
            body,
        }
    }

    /// Representation kind of this object
    pub fn kind(&self) -> ObjectKind {
        match self.body {
            ObjectBody::Generic => ObjectKind::Generic,
            ObjectBody::Packed(_) => ObjectKind::Packed,
            ObjectBody::Str(_) => ObjectKind::String,
            ObjectBody::Array(_) => ObjectKind::Array,
            ObjectBody::Method(_) => ObjectKind::Method,
        }
    }

    /// Number of inline packed fields (0 for other kinds)
    pub fn packed_size(&self) -> usize {
        match &self.body {
            ObjectBody::Packed(fields) => fields.len(),
            _ => 0,
        }
    }

    /// The executable, if this object is a method
    pub fn as_executable(&self) -> Option<&Executable> {
        match &self.body {
            ObjectBody::Method(exec) => Some(exec),
            _ => None,
        }
    }

    /// Mutable executable access
    pub fn as_executable_mut(&mut self) -> Option<&mut Executable> {
        match &mut self.body {
            ObjectBody::Method(exec) => Some(exec),
            _ => None,
        }
    }

    /// Read an instance variable
    pub fn get_ivar(&self, name: Symbol) -> Option<Value> {
        self.header
            .ivars
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
    }

    /// Write an instance variable
    pub fn set_ivar(&mut self, name: Symbol, value: Value) {
        match self.header.ivars.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.header.ivars.push((name, value)),
        }
    }

    /// Approximate size in bytes, including ivars
    pub fn size_in_bytes(&self) -> usize {
        let value_size = std::mem::size_of::<Value>();
        let body = match &self.body {
            ObjectBody::Generic => 0,
            ObjectBody::Packed(fields) | ObjectBody::Array(fields) => fields.len() * value_size,
            ObjectBody::Str(s) => s.len(),
            ObjectBody::Method(exec) => match &exec.kind {
                ExecutableKind::Bytecode { code, literals } => {
                    code.len() + literals.len() * value_size
                }
                _ => 0,
            },
        };
        std::mem::size_of::<HeapObject>()
            + body
            + self.header.ivars.len() * std::mem::size_of::<(Symbol, Value)>()
    }

    /// Visit every heap reference held by this object
    pub fn for_each_ref(&self, f: &mut dyn FnMut(ObjectRef)) {
        for r in self.header.ivars.iter().filter_map(|(_, v)| v.as_object()) {
            f(r);
        }
        match &self.body {
            ObjectBody::Packed(values) | ObjectBody::Array(values) => {
                for r in values.iter().filter_map(Value::as_object) {
                    f(r);
                }
            }
            ObjectBody::Method(exec) => exec.for_each_ref(f),
            ObjectBody::Generic | ObjectBody::Str(_) => {}
        }
    }

    /// Rewrite every heap reference held by this object
    pub fn for_each_ref_mut(&mut self, f: &mut dyn FnMut(&mut ObjectRef)) {
        for r in self
            .header
            .ivars
            .iter_mut()
            .filter_map(|(_, v)| v.object_slot_mut())
        {
            f(r);
        }
        match &mut self.body {
            ObjectBody::Packed(values) | ObjectBody::Array(values) => {
                for r in values.iter_mut().filter_map(Value::object_slot_mut) {
                    f(r);
                }
            }
            ObjectBody::Method(exec) => exec.for_each_ref_mut(f),
            ObjectBody::Generic | ObjectBody::Str(_) => {}
        }
    }
}
