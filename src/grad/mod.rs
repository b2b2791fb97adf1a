//! Reverse-mode symbolic autodiff.
//!
//! Gradient construction is table-driven: each differentiable operator
//! registers a [`GradFn`] that rewrites a forward call into backward IR, and
//! the driver in [`backward`] threads gradients through a function's
//! let-list in reverse. Rules build expressions, never numbers; the result
//! is ordinary IR that dispatches through the same kernel cache as the
//! forward program.

pub mod backward;
pub mod rules;

use crate::error::Result;
use crate::ir::{Arena, ExprId};

/// Per-operator gradient rule.
///
/// Given the forward call, the variable holding its output, and the
/// variable holding the output gradient, produces exactly one
/// gradient-computing expression per declared differentiable input, in the
/// order those inputs appear in the forward call.
pub type GradFn = fn(arena: &mut Arena, orig_call: ExprId, y: ExprId, dy: ExprId) -> Result<Vec<ExprId>>;

pub use backward::gradient;
