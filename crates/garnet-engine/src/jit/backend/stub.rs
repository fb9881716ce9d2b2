//! Stub backend for exercising the code-resource lifecycle without real codegen
//!
//! Produces placeholder machine code (one INT3 per bytecode byte) and
//! "inlines" every candidate it is offered.

use super::traits::*;
use crate::jit::runtime::RuntimeData;

/// A stub backend that produces placeholder code
pub struct StubBackend;

impl JitBackend for StubBackend {
    fn name(&self) -> &str {
        "stub"
    }

    fn compile(&self, request: &CompileRequest) -> Result<CompileOutput, CodegenError> {
        if request.bytecode.is_empty() {
            return Err(CodegenError::Unsupported("empty method body".to_string()));
        }

        let mut runtime_data = Vec::with_capacity(request.inline_candidates.len() + 1);
        if let Some(module) = request.module {
            runtime_data.push(RuntimeData {
                method: request.method,
                name: request.name,
                module,
            });
        }
        runtime_data.extend(request.inline_candidates.iter().copied());

        Ok(CompileOutput {
            artifact: CompiledArtifact::new(vec![0xCC; request.bytecode.len()], 0),
            runtime_data,
        })
    }
}
