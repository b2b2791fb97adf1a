//! Canonical variable renaming.
//!
//! Gives every let-bound variable a canonical `a1`, `a2`, ... name hint in
//! binding order, so two alpha-equivalent functions render identically.
//! Function parameters keep their names verbatim, or take the
//! caller-chosen name from an external table; they are the stable
//! interface of the function. May-share annotations are carried over, with
//! the target remapped to its renamed counterpart.

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::ir::printer::render_var;
use crate::ir::visit::ExprMutator;
use crate::ir::{Arena, ExprId, ExprKind, Module, VarId};
use crate::pass::map_functions;

#[derive(Default)]
struct Renamer {
    var_map: FxHashMap<VarId, VarId>,
    /// Caller-chosen names for free variables, kept verbatim.
    names: FxHashMap<VarId, String>,
    next: usize,
}

impl Renamer {
    /// Introduces the canonical replacement for a let-bound variable.
    fn bind(&mut self, arena: &mut Arena, var: VarId) -> Result<VarId> {
        if self.var_map.contains_key(&var) {
            return Err(Error::malformed(format!(
                "variable {} is bound twice",
                render_var(arena, var)
            )));
        }
        self.next += 1;
        let name = format!("a{}", self.next);
        let fresh = match arena.may_share(var) {
            Some(target) => {
                let target = self.lookup(arena, target)?;
                arena.fresh_var_may_share(name, target)
            }
            None => arena.fresh_var(name),
        };
        self.var_map.insert(var, fresh);
        Ok(fresh)
    }

    fn lookup(&self, arena: &Arena, var: VarId) -> Result<VarId> {
        self.var_map.get(&var).copied().ok_or_else(|| {
            Error::Lookup(format!(
                "use of unbound variable {}",
                render_var(arena, var)
            ))
        })
    }
}

impl ExprMutator for Renamer {
    fn mutate_var(&mut self, arena: &mut Arena, _id: ExprId, var: VarId) -> Result<ExprId> {
        let renamed = self.lookup(arena, var)?;
        Ok(arena.var(renamed))
    }

    fn mutate_let(
        &mut self,
        arena: &mut Arena,
        _id: ExprId,
        var: VarId,
        value: ExprId,
        body: ExprId,
    ) -> Result<ExprId> {
        // Let is non-recursive: the value is renamed in the outer scope.
        let value = self.mutate(arena, value)?;
        let var = self.bind(arena, var)?;
        let body = self.mutate(arena, body)?;
        Ok(arena.let_(var, value, body))
    }

    fn mutate_function(
        &mut self,
        arena: &mut Arena,
        _id: ExprId,
        params: Vec<VarId>,
        body: ExprId,
    ) -> Result<ExprId> {
        let mut new_params = Vec::with_capacity(params.len());
        for &p in &params {
            // Parameters keep their caller-visible names: either verbatim,
            // or replaced by the external name table's entry.
            let renamed = match self.names.get(&p) {
                Some(name) => arena.fresh_var(name.clone()),
                None => p,
            };
            if self.var_map.insert(p, renamed).is_some() {
                return Err(Error::malformed(format!(
                    "parameter {} is bound twice",
                    render_var(arena, p)
                )));
            }
            new_params.push(renamed);
        }
        let body = self.mutate(arena, body)?;
        Ok(arena.function(new_params, body))
    }
}

/// Renames one function. Parameters keep their names; every let-bound
/// variable becomes `a1`, `a2`, ... in binding order.
pub fn rename_vars_function(arena: &mut Arena, func: ExprId) -> Result<ExprId> {
    rename_vars_function_with(arena, func, &FxHashMap::default())
}

/// Like [`rename_vars_function`], with an external table of caller-chosen
/// names applied to the parameters it covers.
pub fn rename_vars_function_with(
    arena: &mut Arena,
    func: ExprId,
    names: &FxHashMap<VarId, String>,
) -> Result<ExprId> {
    if !matches!(arena.kind(func), ExprKind::Function { .. }) {
        return Err(Error::malformed(
            "rename expects a function".to_string(),
        ));
    }
    let mut renamer = Renamer {
        names: names.clone(),
        ..Renamer::default()
    };
    renamer.mutate(arena, func)
}

/// Runs canonical renaming over every function of a module.
pub fn rename_vars(arena: &mut Arena, module: &Module) -> Result<Module> {
    map_functions(arena, module, rename_vars_function)
}
