//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lyre::prelude::*;

pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Backend stub that counts compilations and hands out kernels whose output
/// shapes mirror the inferred signature.
pub struct CountingCompiler {
    calls: AtomicUsize,
    /// Artificial compile latency, to widen race windows in threaded tests.
    pub delay: Option<Duration>,
}

impl CountingCompiler {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Some(delay),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn out_shapes(sig: &Signature) -> Vec<Vec<i64>> {
    match &sig.out_type {
        Type::Tensor(t) => vec![t.shape.clone()],
        Type::Tuple(fields) => fields
            .iter()
            .filter_map(|f| f.as_tensor())
            .map(|t| t.shape.clone())
            .collect(),
    }
}

impl KernelCompiler for CountingCompiler {
    fn compile(&self, op: &str, _env: &OpEnv, sig: &Signature) -> Result<Arc<CompiledKernel>> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(CompiledKernel::new(op, n as u64, out_shapes(sig))))
    }
}

/// Fails the first compilation, succeeds afterwards.
pub struct FailOnceCompiler {
    failed: AtomicBool,
    calls: AtomicUsize,
    pub delay: Option<Duration>,
}

impl FailOnceCompiler {
    pub fn new() -> Self {
        Self {
            failed: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl KernelCompiler for FailOnceCompiler {
    fn compile(&self, op: &str, _env: &OpEnv, sig: &Signature) -> Result<Arc<CompiledKernel>> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.failed.swap(true, Ordering::SeqCst) {
            return Err(Error::Backend {
                op: op.to_string(),
                message: "backend unavailable".to_string(),
            });
        }
        Ok(Arc::new(CompiledKernel::new(op, n as u64, out_shapes(sig))))
    }
}
