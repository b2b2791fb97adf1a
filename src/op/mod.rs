//! Operator registry: per-operator schemas and pluggable dispatch hooks.
//!
//! An [`Op`] bundles a name, an argument schema, the normalizer/typer/hasher
//! trio consumed by dispatch, and an optional gradient rule. The registry is
//! an explicit value: it is built once at startup (usually via
//! [`OpRegistry::with_builtins`]), then passed by reference into dispatch and
//! autodiff call sites and treated as read-only.

pub mod cache;
pub mod dispatch;
pub mod library;
pub mod schema;

use log::warn;
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::grad::GradFn;
use dispatch::{HashFn, NormalizeFn, TypeFn};
use schema::OpSchema;

/// A globally registered operator.
#[derive(Debug)]
pub struct Op {
    pub name: String,
    pub schema: OpSchema,
    pub normalizer: NormalizeFn,
    pub typer: TypeFn,
    pub hasher: HashFn,
    pub grad: Option<GradFn>,
}

/// Append-only name → operator table.
#[derive(Default)]
pub struct OpRegistry {
    ops: FxHashMap<String, Op>,
}

impl OpRegistry {
    /// An empty registry. Most callers want [`OpRegistry::with_builtins`].
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the built-in operator library.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        library::install(&mut registry);
        registry
    }

    /// Registers an operator. Registration must complete before any
    /// dispatch or autodiff; re-registering a name replaces the previous
    /// definition and is almost always a mistake, so it is logged.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        schema: OpSchema,
        normalizer: NormalizeFn,
        typer: TypeFn,
        hasher: HashFn,
        grad: Option<GradFn>,
    ) -> &mut Self {
        let name = name.into();
        let op = Op {
            name: name.clone(),
            schema,
            normalizer,
            typer,
            hasher,
            grad,
        };
        if self.ops.insert(name.clone(), op).is_some() {
            warn!("operator `{name}` was registered twice; replacing");
        }
        self
    }

    pub fn get(&self, name: &str) -> Result<&Op> {
        self.ops
            .get(name)
            .ok_or_else(|| Error::Lookup(format!("unknown operator `{name}`")))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ops.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
