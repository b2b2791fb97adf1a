//! Core intermediate representation of a tensor-program compiler.
//!
//! Programs are expression graphs in let-normal form, stored in a
//! hash-consing [`ir::Arena`] and addressed by id. On top of the IR sit:
//!
//! - an explicit [`op::OpRegistry`] of operator schemas with pluggable
//!   normalize/type/hash hooks per operator,
//! - a [`op::dispatch::Dispatcher`] that resolves concrete calls to
//!   compiled kernels through a thread-safe, single-flight kernel cache,
//! - table-driven reverse-mode autodiff ([`grad::gradient`]), and
//! - module-level rewrite passes ([`pass::inplace_update`],
//!   [`pass::rename_vars`]).
//!
//! The backend compiler is abstract: anything implementing
//! [`backend::KernelCompiler`] can sit behind the dispatcher.

pub mod backend;
pub mod error;
pub mod grad;
pub mod ir;
pub mod op;
pub mod pass;
pub mod value;

pub use error::{Error, Result};

/// Commonly used items, for glob import in tests and downstream code.
pub mod prelude {
    pub use crate::backend::{CompiledKernel, KernelCompiler};
    pub use crate::error::{Error, Result};
    pub use crate::grad::gradient;
    pub use crate::ir::anf::LetList;
    pub use crate::ir::ty::{DType, TensorType, Type};
    pub use crate::ir::{Arena, AttrValue, Attrs, ExprId, ExprKind, Literal, Module, VarId};
    pub use crate::op::dispatch::{CallValues, Dispatcher, OpEnv, Signature};
    pub use crate::op::OpRegistry;
    pub use crate::pass::{inplace_update, rename_vars};
    pub use crate::value::{TensorValue, Value};
}
