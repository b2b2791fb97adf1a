//! Let-normal-form extraction and reconstruction.
//!
//! A chain of nested `Let`s is viewed as an ordered list of `(var, value)`
//! bindings plus a terminal body expression. Extraction then reconstruction
//! is the identity on any expression already in let-normal form; with the
//! hash-consing arena this holds at the level of ids, not just shapes.

use rustc_hash::FxHashSet;

use crate::error::{Error, Result};
use crate::ir::printer::render;
use crate::ir::{Arena, ExprId, ExprKind, VarId};

/// Linear ordered view of a chain of nested let-bindings.
#[derive(Debug, Clone)]
pub struct LetList {
    pub vars: Vec<VarId>,
    pub exprs: Vec<ExprId>,
    /// Terminal expression after the last binding.
    pub body: ExprId,
}

impl LetList {
    /// Flattens a `Let` chain into an ordered binding list and a tail.
    ///
    /// A non-`Let` expression yields an empty binding list with itself as
    /// the tail. Binding the same variable identity twice is malformed IR.
    pub fn extract(arena: &Arena, expr: ExprId) -> Result<LetList> {
        let mut vars = Vec::new();
        let mut exprs = Vec::new();
        let mut seen: FxHashSet<VarId> = FxHashSet::default();
        let mut cursor = expr;
        while let ExprKind::Let { var, value, body } = *arena.kind(cursor) {
            if !seen.insert(var) {
                return Err(Error::malformed(format!(
                    "variable `%{}` is bound twice in {}",
                    arena.var_info(var).name_hint,
                    render(arena, expr),
                )));
            }
            vars.push(var);
            exprs.push(value);
            cursor = body;
        }
        Ok(LetList {
            vars,
            exprs,
            body: cursor,
        })
    }

    /// Reconstructs the nested `Let` chain in the original binding order.
    pub fn rebuild(&self, arena: &mut Arena) -> ExprId {
        let mut body = self.body;
        for (&var, &value) in self.vars.iter().zip(self.exprs.iter()).rev() {
            body = arena.let_(var, value, body);
        }
        body
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}
