//! Garnet VM core runtime
//!
//! This module provides:
//! - Managed values, symbols and the moving object heap
//! - Foreign call contexts and their handle tables
//! - The class/module object model and method lookup
//! - Global and call-site dispatch caches
//! - The global execution lock and process control (fork/exec/wait/signals)
//! - A collector driver that treats handle tables and code resources as roots

pub mod config;
pub mod defaults;
pub mod dispatch;
pub mod ffi;
pub mod gc;
pub mod interpreter;
pub mod model;
pub mod object;
pub mod process;
pub mod symbol;
pub mod value;

pub use config::{ConfigValue, VmOptions};
pub use ffi::{CallMessage, ForeignCallContext, Handle, HandleTable, NativeEnv};
pub use interpreter::{Frame, Invoker, NativeDispatcher, SharedState, State, UnitId, World};
pub use model::{MethodEntry, ModuleKind, StaticScope};
pub use object::{Executable, HeapObject, ObjectKind, Visibility};
pub use process::{GlobalLock, LockStatus};
pub use symbol::{Symbol, SymbolTable};
pub use value::{ModuleId, ObjectRef, Value};

/// A failed system call
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{call} failed: {}", os_error(.errno))]
pub struct SystemError {
    /// Name of the failing call
    pub call: &'static str,
    /// `errno` captured right after the call
    pub errno: i32,
}

impl SystemError {
    /// Capture the current `errno` for `call`
    pub fn last(call: &'static str) -> Self {
        Self {
            call,
            errno: std::io::Error::last_os_error().raw_os_error().unwrap_or(0),
        }
    }
}

fn os_error(errno: &i32) -> std::io::Error {
    std::io::Error::from_raw_os_error(*errno)
}

/// A non-local control transfer travelling through the error channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unwind {
    /// A raised exception object
    Exception(Value),
    /// `throw tag, value`
    Throw {
        /// Tag matched by `catch`
        tag: Value,
        /// Value handed to the matching `catch`
        value: Value,
    },
    /// Process exit request
    Exit(i32),
}

/// Why the most recent dispatch found no callable method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingReason {
    /// No failure recorded
    #[default]
    None,
    /// Method exists but is private
    Private,
    /// Method exists but is protected
    Protected,
    /// `super` had no target
    Super,
    /// Variable-like call with no receiver
    VCall,
    /// Method not found (or undefined)
    Normal,
}

/// VM errors
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    /// Reopening a class with a different explicit superclass
    #[error("Superclass mismatch: given {given} but previously set to {previous}")]
    SuperclassMismatch {
        /// Name of the superclass passed to the reopen
        given: String,
        /// Name of the recorded superclass
        previous: String,
    },

    /// A constant exists but is not the kind of module the caller asked for
    #[error("{name} is not a {expected}")]
    WrongConstantKind {
        /// Constant name
        name: String,
        /// "class" or "module"
        expected: &'static str,
    },

    /// Object representation does not match the target class
    #[error("Incompatible layout: class expects {expected:?} but object is {found:?}")]
    IncompatibleLayout {
        /// Representation declared by the class
        expected: ObjectKind,
        /// Representation of the object
        found: ObjectKind,
    },

    /// Packed field counts differ
    #[error("Packed size mismatch: class expects {expected} fields but object has {found}")]
    PackedSizeMismatch {
        /// Field count declared by the class
        expected: usize,
        /// Field count of the object
        found: usize,
    },

    /// Allocation of a stack buffer, handle table or heap object failed
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Handle not issued by a live table
    #[error("Invalid handle: {0:?}")]
    InvalidHandle(Handle),

    /// A system call failed
    #[error(transparent)]
    System(#[from] SystemError),

    /// Non-local control transfer (not a failure)
    #[error("Unwinding: {0:?}")]
    Unwind(Unwind),

    /// Type error
    #[error("Type error: {0}")]
    TypeError(String),

    /// Name error (missing constant or method)
    #[error("Name error: {0}")]
    NameError(String),

    /// Dispatch found no callable method
    #[error("No method {name} ({reason:?})")]
    NoMethod {
        /// Selector name
        name: String,
        /// Why lookup failed
        reason: MissingReason,
    },

    /// Wrong number of arguments to a native method
    #[error("Wrong number of arguments (given {given}, expected {expected})")]
    ArgumentCount {
        /// Declared arity
        expected: usize,
        /// Arguments passed
        given: usize,
    },

    /// Runtime error
    #[error("Runtime error: {0}")]
    RuntimeError(String),
}

impl VmError {
    /// Is this a control transfer rather than a real failure?
    pub fn is_unwind(&self) -> bool {
        matches!(self, VmError::Unwind(_))
    }
}

impl From<Unwind> for VmError {
    fn from(unwind: Unwind) -> Self {
        VmError::Unwind(unwind)
    }
}

/// VM execution result
pub type VmResult<T> = Result<T, VmError>;
