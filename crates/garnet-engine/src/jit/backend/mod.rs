//! Backend-agnostic code generation traits and implementations

pub mod stub;
pub mod traits;

pub use stub::StubBackend;
pub use traits::{
    ArtifactId, CodegenError, CompileOutput, CompileRequest, CompiledArtifact, JitBackend,
};
