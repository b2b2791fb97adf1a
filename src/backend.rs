//! The external kernel-compiler collaborator.
//!
//! The IR core never generates or executes kernels itself: dispatch hands a
//! normalized attribute record and inferred types to a [`KernelCompiler`]
//! and caches the opaque handle it returns. The compiler is assumed
//! deterministic for identical inputs.

use std::sync::Arc;

use crate::error::Result;
use crate::op::dispatch::{OpEnv, Signature};

/// Opaque handle to a compiled, backend-specific executable for one
/// operator specialization, plus the output buffer shapes the executor must
/// allocate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledKernel {
    pub op: String,
    /// Backend-assigned identifier; only meaningful to the backend.
    pub id: u64,
    pub out_shapes: Vec<Vec<i64>>,
}

impl CompiledKernel {
    pub fn new(op: impl Into<String>, id: u64, out_shapes: Vec<Vec<i64>>) -> Self {
        Self {
            op: op.into(),
            id,
            out_shapes,
        }
    }
}

/// Compiles one operator specialization down to an executable kernel.
///
/// Implementations live outside this crate (or in test code). Failures are
/// surfaced unchanged through the kernel cache to every caller waiting on
/// the same specialization.
pub trait KernelCompiler: Send + Sync {
    fn compile(&self, op: &str, env: &OpEnv, sig: &Signature) -> Result<Arc<CompiledKernel>>;
}
