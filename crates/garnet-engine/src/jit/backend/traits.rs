//! Backend-agnostic code generation traits
//!
//! Defines the `JitBackend` trait that pluggable backends implement, along
//! with the request they receive and the opaque artifact they return.

use crate::jit::runtime::RuntimeData;
use crate::vm::object::ObjectKind;
use crate::vm::symbol::Symbol;
use crate::vm::value::{ModuleId, ObjectRef};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ARTIFACT_ID: AtomicU64 = AtomicU64::new(1);

/// Error during code generation
#[derive(Debug, thiserror::Error)]
pub enum CodegenError {
    /// The backend failed
    #[error("Backend error: {0}")]
    BackendError(String),
    /// The method cannot be compiled by this backend
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// Everything a backend needs to compile one method.
///
/// Requests carry owned data only, so they can cross to the compiler
/// thread without touching the world.
#[derive(Debug, Clone)]
pub struct CompileRequest {
    /// Method being compiled (address at request time)
    pub method: ObjectRef,
    /// Selector the method is installed under
    pub name: Symbol,
    /// Module the method is attached to
    pub module: Option<ModuleId>,
    /// Method serial at request time
    pub serial: u64,
    /// Bytecode to compile
    pub bytecode: Vec<u8>,
    /// Instance layout the method was specialized for
    pub layout: Option<ObjectKind>,
    /// Callees the backend may inline
    pub inline_candidates: Vec<RuntimeData>,
}

/// Identity of a compiled artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArtifactId(u64);

/// Opaque compiled code. Holds no reference back to its owner.
#[derive(Debug)]
pub struct CompiledArtifact {
    id: ArtifactId,
    code: Box<[u8]>,
    entry_offset: usize,
}

impl CompiledArtifact {
    /// Wrap generated code
    pub fn new(code: Vec<u8>, entry_offset: usize) -> Self {
        Self {
            id: ArtifactId(NEXT_ARTIFACT_ID.fetch_add(1, Ordering::Relaxed)),
            code: code.into_boxed_slice(),
            entry_offset,
        }
    }

    /// Artifact identity
    pub fn id(&self) -> ArtifactId {
        self.id
    }

    /// Generated bytes
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Size of the generated code
    pub fn code_size(&self) -> usize {
        self.code.len()
    }

    /// Offset of the entry point within the code
    pub fn entry_offset(&self) -> usize {
        self.entry_offset
    }
}

/// What a backend returns: the artifact plus every managed object the code
/// refers to, to be kept alive through a code resource holder
#[derive(Debug)]
pub struct CompileOutput {
    /// The compiled code
    pub artifact: CompiledArtifact,
    /// Methods referenced (the compiled method first, then inlined callees)
    pub runtime_data: Vec<RuntimeData>,
}

/// The backend-agnostic code generation trait
pub trait JitBackend: Send + Sync {
    /// Backend name (for diagnostics)
    fn name(&self) -> &str;

    /// Compile one method
    fn compile(&self, request: &CompileRequest) -> Result<CompileOutput, CodegenError>;
}
