//! Process-wide kernel cache with single-flight compilation.
//!
//! The cache maps `(op, HashKey)` to a compiled kernel handle. Hits are
//! concurrent-safe reads; a miss compiles behind a per-key slot lock, so
//! racing misses on the same key block behind one in-flight compilation
//! instead of compiling redundantly. Successful entries are never
//! invalidated for the life of the process, which is what makes
//! handle-equality a valid cache-correctness test. A failed compilation is
//! reported to every thread waiting on that key and then forgotten, so a
//! later dispatch may retry.

use std::sync::{Arc, Mutex};

use log::{debug, trace};
use rustc_hash::FxHashMap;

use crate::backend::CompiledKernel;
use crate::error::{Error, Result};
use crate::op::dispatch::HashKey;

/// Cache key: operator identity plus the folded attribute/type key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    op: String,
    key: HashKey,
}

impl CacheKey {
    pub fn new(op: String, key: HashKey) -> Self {
        Self { op, key }
    }

    pub fn op(&self) -> &str {
        &self.op
    }
}

enum SlotState {
    Pending,
    Ready(Arc<CompiledKernel>),
    Failed(String),
}

struct Slot {
    state: Mutex<SlotState>,
}

/// Grow-only map from [`CacheKey`] to compiled kernels.
#[derive(Default)]
pub struct KernelCache {
    slots: Mutex<FxHashMap<CacheKey, Arc<Slot>>>,
}

impl KernelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with a resolved (successful or in-flight) slot.
    pub fn len(&self) -> usize {
        self.slots.lock().expect("kernel cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the cached kernel for `key`, or runs `compile` to produce it.
    ///
    /// At most one compilation runs per distinct key: the winner compiles
    /// while holding the key's slot lock, and every racing caller blocks on
    /// that lock and then reads the result. On failure the error reaches
    /// all current waiters and the key is removed so later calls retry.
    pub fn get_or_compile<F>(&self, key: CacheKey, compile: F) -> Result<Arc<CompiledKernel>>
    where
        F: FnOnce() -> Result<Arc<CompiledKernel>>,
    {
        let slot = {
            let mut slots = self.slots.lock().expect("kernel cache poisoned");
            slots
                .entry(key.clone())
                .or_insert_with(|| {
                    Arc::new(Slot {
                        state: Mutex::new(SlotState::Pending),
                    })
                })
                .clone()
        };

        // The outer map lock is released here; only this key's slot lock is
        // held while compiling, so distinct keys compile concurrently.
        let mut state = slot.state.lock().expect("cache slot poisoned");
        match &*state {
            SlotState::Ready(kernel) => {
                trace!("kernel cache hit: {} ", key.op());
                Ok(kernel.clone())
            }
            SlotState::Failed(message) => Err(Error::Backend {
                op: key.op().to_string(),
                message: message.clone(),
            }),
            SlotState::Pending => {
                debug!("kernel cache miss: {}, compiling", key.op());
                match compile() {
                    Ok(kernel) => {
                        *state = SlotState::Ready(kernel.clone());
                        Ok(kernel)
                    }
                    Err(err) => {
                        *state = SlotState::Failed(err.to_string());
                        let mut slots = self.slots.lock().expect("kernel cache poisoned");
                        slots.remove(&key);
                        Err(err)
                    }
                }
            }
        }
    }
}
