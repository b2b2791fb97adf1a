//! Module-to-module rewrite passes.
//!
//! A pass consumes a module and produces a new one; the input module and
//! every expression it references stay valid, since the arena only ever
//! interns new nodes. Functions a pass does not touch come back under the
//! same ids.

pub mod inplace_update;
pub mod rename_vars;

pub use inplace_update::inplace_update;
pub use rename_vars::rename_vars;

use crate::error::Result;
use crate::ir::{Arena, ExprId, Module};

/// Builds a new module by applying `f` to every function, preserving
/// definition order.
pub(crate) fn map_functions(
    arena: &mut Arena,
    module: &Module,
    mut f: impl FnMut(&mut Arena, ExprId) -> Result<ExprId>,
) -> Result<Module> {
    let functions: Vec<(String, ExprId)> = module
        .iter()
        .map(|(name, func)| (name.to_string(), func))
        .collect();
    let mut out = Module::new();
    for (name, func) in functions {
        out.insert(name, f(arena, func)?);
    }
    Ok(out)
}
