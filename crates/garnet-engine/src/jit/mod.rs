//! JIT support
//!
//! Code generation itself is pluggable (`backend::JitBackend`). This module
//! owns what surrounds it:
//! - the background compiler thread and its fork/exec lifecycle
//! - code resources that keep the objects compiled code refers to alive
//! - the code cache that dispatches to compiled artifacts

pub mod backend;
pub mod compiler;
pub mod runtime;

pub use backend::{CodegenError, CompileOutput, CompileRequest, CompiledArtifact, JitBackend};
pub use compiler::{BackgroundCompiler, CompileResult, CompilerState};
pub use runtime::{CodeCache, CodeManager, CodeResource, JitInfo, ResourceId, RuntimeData};
