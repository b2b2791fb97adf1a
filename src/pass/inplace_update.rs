//! Storage sharing: rewrites eligible allocations into in-place updates.
//!
//! A variable carrying a *may-share* annotation is permitted to alias the
//! storage of the annotated target. The pass looks for the allocation
//! pattern the VM emits,
//!
//! ```text
//! let %s = alloc_storage(...);
//! let %t = op(%s, ...);        // %t may_share %x
//! ```
//!
//! and, when `%s` feeds no other binding, deletes both bindings and
//! replaces every use of `%t` with `%x`, so the operator writes directly
//! into `%x`'s storage. Sharing is an optimization, never an obligation:
//! when another binding also consumes the storage the pattern is left
//! alone. A reference to the deleted storage variable that survives the
//! rewrite anyway is malformed IR.

use log::{debug, trace};
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::ir::anf::LetList;
use crate::ir::printer::render_var;
use crate::ir::visit::{ExprMutator, UseCounter};
use crate::ir::{Arena, ExprId, ExprKind, Module, VarId};
use crate::pass::map_functions;

const ALLOC_STORAGE: &str = "alloc_storage";

/// Per-function analysis state over the top-level let-list.
struct ShareAnalysis {
    /// Bound expression of each let-variable, in binding order.
    binding: FxHashMap<VarId, ExprId>,
    /// Copy-chain and tuple-projection shortcuts: a variable bound to
    /// another variable (or to a field of a known tuple) resolves to the
    /// root variable that actually names the value.
    simplify: FxHashMap<VarId, VarId>,
    /// Rewrite verdicts. `Some(target)` replaces every use; `None` marks a
    /// storage variable whose binding is deleted and which must not be
    /// referenced anywhere else.
    vmap: FxHashMap<VarId, Option<VarId>>,
}

impl ShareAnalysis {
    fn new() -> Self {
        Self {
            binding: FxHashMap::default(),
            simplify: FxHashMap::default(),
            vmap: FxHashMap::default(),
        }
    }

    fn resolve(&self, var: VarId) -> VarId {
        self.simplify.get(&var).copied().unwrap_or(var)
    }

    /// Records the simplification shortcut for one binding, if any.
    fn note_binding(&mut self, arena: &Arena, var: VarId, value: ExprId) {
        match *arena.kind(value) {
            ExprKind::Var(src) => {
                let root = self.resolve(src);
                self.simplify.insert(var, root);
            }
            ExprKind::TupleGetItem { tuple, index } => {
                if let ExprKind::Var(tv) = *arena.kind(tuple) {
                    let root = self.resolve(tv);
                    if let Some(&bound) = self.binding.get(&root) {
                        if let ExprKind::Tuple(fields) = arena.kind(bound) {
                            if let Some(&field) = fields.get(index) {
                                if let ExprKind::Var(fv) = *arena.kind(field) {
                                    let froot = self.resolve(fv);
                                    self.simplify.insert(var, froot);
                                }
                            }
                        }
                    }
                }
            }
            _ => {}
        }
        self.binding.insert(var, value);
    }

    /// The storage variable feeding `value`'s first argument, when `value`
    /// is a call consuming a fresh `alloc_storage` result.
    fn storage_of(&self, arena: &Arena, value: ExprId) -> Option<VarId> {
        let ExprKind::Call { op, args, .. } = arena.kind(value) else {
            return None;
        };
        if op == ALLOC_STORAGE {
            return None;
        }
        let ExprKind::Var(sv) = *arena.kind(*args.first()?) else {
            return None;
        };
        let storage = self.resolve(sv);
        match self.binding.get(&storage).map(|&e| arena.kind(e)) {
            Some(ExprKind::Call { op, .. }) if op == ALLOC_STORAGE => Some(storage),
            _ => None,
        }
    }

    fn run(&mut self, arena: &Arena, list: &LetList) {
        for (&var, &value) in list.vars.iter().zip(list.exprs.iter()) {
            self.note_binding(arena, var, value);

            let Some(share) = arena.may_share(var) else {
                continue;
            };
            // The annotation may sit on a copy (or tuple projection) of the
            // consuming call; resolve it to the binding that holds the call
            // and record the verdict against that root.
            let root = self.resolve(var);
            let Some(&consumer) = self.binding.get(&root) else {
                continue;
            };
            let Some(storage) = self.storage_of(arena, consumer) else {
                trace!(
                    "inplace: {} may share {} but is not an allocation consumer",
                    render_var(arena, var),
                    render_var(arena, share)
                );
                continue;
            };
            // No other binding may consume the storage, or deleting its
            // allocation would break that consumer. Aliases bound to the
            // storage are part of its family: each alias binding is itself
            // one use, and the family's bindings go away with the
            // allocation. A reference that survives outside the bindings
            // (in the tail, say) is caught fatally by the rewriter instead.
            let mut family = vec![storage];
            family.extend(
                self.simplify
                    .iter()
                    .filter(|&(_, &root)| root == storage)
                    .map(|(&alias, _)| alias),
            );
            let binding_uses: usize = family
                .iter()
                .map(|&v| UseCounter::count_in(arena, v, &list.exprs))
                .sum();
            // Expected: one use per alias binding plus the consumer itself.
            if binding_uses != family.len() {
                debug!(
                    "inplace: {} feeds another binding, keeping allocation",
                    render_var(arena, storage)
                );
                continue;
            }
            // Follow an already-shared target so chains collapse fully.
            let target = match self.vmap.get(&share) {
                Some(&Some(t)) => t,
                _ => share,
            };
            debug!(
                "inplace: {} reuses storage of {}",
                render_var(arena, root),
                render_var(arena, target)
            );
            self.vmap.insert(root, Some(target));
            for &v in &family {
                self.vmap.insert(v, None);
            }
        }
    }
}

/// Applies the analysis verdicts: deletes the rewritten bindings and
/// redirects variable uses.
struct ShareRewriter {
    vmap: FxHashMap<VarId, Option<VarId>>,
}

impl ExprMutator for ShareRewriter {
    fn mutate_var(&mut self, arena: &mut Arena, id: ExprId, var: VarId) -> Result<ExprId> {
        match self.vmap.get(&var) {
            None => Ok(id),
            Some(&Some(target)) => Ok(arena.var(target)),
            Some(&None) => Err(Error::malformed(format!(
                "storage variable {} escapes its in-place rewrite",
                render_var(arena, var)
            ))),
        }
    }

    fn mutate_let(
        &mut self,
        arena: &mut Arena,
        _id: ExprId,
        var: VarId,
        value: ExprId,
        body: ExprId,
    ) -> Result<ExprId> {
        if self.vmap.contains_key(&var) {
            return self.mutate(arena, body);
        }
        let value = self.mutate(arena, value)?;
        let body = self.mutate(arena, body)?;
        Ok(arena.let_(var, value, body))
    }
}

/// Rewrites one function in let-normal form.
pub fn inplace_update_function(arena: &mut Arena, func: ExprId) -> Result<ExprId> {
    let ExprKind::Function { params, body } = arena.kind(func).clone() else {
        return Err(Error::malformed(
            "inplace update expects a function".to_string(),
        ));
    };
    let list = LetList::extract(arena, body)?;
    let mut analysis = ShareAnalysis::new();
    analysis.run(arena, &list);
    if analysis.vmap.is_empty() {
        return Ok(func);
    }
    let mut rewriter = ShareRewriter {
        vmap: analysis.vmap,
    };
    let body = rewriter.mutate(arena, body)?;
    Ok(arena.function(params, body))
}

/// Runs the storage-sharing rewrite over every function of a module.
pub fn inplace_update(arena: &mut Arena, module: &Module) -> Result<Module> {
    map_functions(arena, module, inplace_update_function)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{AttrValue, Attrs};

    /// Builds the canonical pattern:
    ///
    /// fn(x, b):
    ///   let s = alloc_storage(size=64);
    ///   let t = add(s, x);            // t may_share b
    ///   let u = relu(t);
    ///   u
    fn sharing_function(arena: &mut Arena) -> (ExprId, VarId, VarId) {
        let x = arena.fresh_var("x");
        let b = arena.fresh_var("b");
        let s = arena.fresh_var("s");
        let t = arena.fresh_var_may_share("t", b);
        let u = arena.fresh_var("u");

        let alloc = arena.call(
            "alloc_storage",
            vec![],
            Attrs::new().set("size", AttrValue::Int(64)),
        );
        let se = arena.var(s);
        let xe = arena.var(x);
        let add = arena.call("add", vec![se, xe], Attrs::new());
        let te = arena.var(t);
        let relu = arena.call("relu", vec![te], Attrs::new());
        let ue = arena.var(u);

        let l3 = arena.let_(u, relu, ue);
        let l2 = arena.let_(t, add, l3);
        let l1 = arena.let_(s, alloc, l2);
        let func = arena.function(vec![x, b], l1);
        (func, b, s)
    }

    #[test]
    fn test_sharing_deletes_allocation_and_redirects_uses() {
        let mut arena = Arena::new();
        let (func, b, s) = sharing_function(&mut arena);

        let out = inplace_update_function(&mut arena, func).unwrap();
        assert_ne!(out, func);

        let ExprKind::Function { body, .. } = arena.kind(out).clone() else {
            panic!("expected a function");
        };
        let list = LetList::extract(&arena, body).unwrap();
        // Both the storage and the tensor binding are gone.
        assert_eq!(list.len(), 1);
        let roots: Vec<ExprId> = list.exprs.iter().copied().chain([list.body]).collect();
        assert_eq!(UseCounter::count_in(&arena, s, &roots), 0);
        // The surviving relu now reads the share target directly.
        let ExprKind::Call { op, args, .. } = arena.kind(list.exprs[0]).clone() else {
            panic!("expected a call");
        };
        assert_eq!(op, "relu");
        assert_eq!(args, vec![arena.var(b)]);
    }

    #[test]
    fn test_storage_feeding_second_binding_is_left_alone() {
        let mut arena = Arena::new();
        let x = arena.fresh_var("x");
        let b = arena.fresh_var("b");
        let s = arena.fresh_var("s");
        let t = arena.fresh_var_may_share("t", b);
        let w = arena.fresh_var("w");

        let alloc = arena.call(
            "alloc_storage",
            vec![],
            Attrs::new().set("size", AttrValue::Int(64)),
        );
        let se = arena.var(s);
        let xe = arena.var(x);
        let add = arena.call("add", vec![se, xe], Attrs::new());
        let relu = arena.call("relu", vec![se], Attrs::new());
        let te = arena.var(t);
        let we = arena.var(w);
        let tail = arena.tuple(vec![te, we]);

        let l3 = arena.let_(w, relu, tail);
        let l2 = arena.let_(t, add, l3);
        let l1 = arena.let_(s, alloc, l2);
        let func = arena.function(vec![x, b], l1);

        // A second binding consumes the storage: sharing must not fire.
        let out = inplace_update_function(&mut arena, func).unwrap();
        assert_eq!(out, func);
    }

    #[test]
    fn test_storage_escaping_to_tail_is_malformed() {
        let mut arena = Arena::new();
        let x = arena.fresh_var("x");
        let b = arena.fresh_var("b");
        let s = arena.fresh_var("s");
        let t = arena.fresh_var_may_share("t", b);

        let alloc = arena.call(
            "alloc_storage",
            vec![],
            Attrs::new().set("size", AttrValue::Int(64)),
        );
        let se = arena.var(s);
        let xe = arena.var(x);
        let add = arena.call("add", vec![se, xe], Attrs::new());
        let te = arena.var(t);
        // The storage leaks past its consuming binding.
        let tail = arena.tuple(vec![te, se]);

        let l2 = arena.let_(t, add, tail);
        let l1 = arena.let_(s, alloc, l2);
        let func = arena.function(vec![x, b], l1);

        let err = inplace_update_function(&mut arena, func).unwrap_err();
        assert!(matches!(err, Error::MalformedIr { .. }));
    }

    #[test]
    fn test_no_annotation_means_no_rewrite() {
        let mut arena = Arena::new();
        let x = arena.fresh_var("x");
        let s = arena.fresh_var("s");
        let t = arena.fresh_var("t"); // no may_share

        let alloc = arena.call(
            "alloc_storage",
            vec![],
            Attrs::new().set("size", AttrValue::Int(64)),
        );
        let se = arena.var(s);
        let xe = arena.var(x);
        let add = arena.call("add", vec![se, xe], Attrs::new());
        let te = arena.var(t);

        let l2 = arena.let_(t, add, te);
        let l1 = arena.let_(s, alloc, l2);
        let func = arena.function(vec![x], l1);

        let out = inplace_update_function(&mut arena, func).unwrap();
        assert_eq!(out, func);
    }

    #[test]
    fn test_copy_chain_resolves_to_storage_root() {
        // The storage reaches the consumer through an intermediate copy:
        //   let s = alloc_storage(); let c = s; let t = add(c, x);
        let mut arena = Arena::new();
        let x = arena.fresh_var("x");
        let b = arena.fresh_var("b");
        let s = arena.fresh_var("s");
        let c = arena.fresh_var("c");
        let t = arena.fresh_var_may_share("t", b);

        let alloc = arena.call(
            "alloc_storage",
            vec![],
            Attrs::new().set("size", AttrValue::Int(64)),
        );
        let se = arena.var(s);
        let ce = arena.var(c);
        let xe = arena.var(x);
        let add = arena.call("add", vec![ce, xe], Attrs::new());
        let te = arena.var(t);

        let l3 = arena.let_(t, add, te);
        let l2 = arena.let_(c, se, l3);
        let l1 = arena.let_(s, alloc, l2);
        let func = arena.function(vec![x, b], l1);

        let out = inplace_update_function(&mut arena, func).unwrap();
        assert_ne!(out, func);
        let ExprKind::Function { body, .. } = arena.kind(out).clone() else {
            panic!("expected a function");
        };
        // The storage, its copy alias, and the tensor binding all go away;
        // the tail reads the share target directly.
        let list = LetList::extract(&arena, body).unwrap();
        assert!(list.is_empty());
        assert_eq!(list.body, arena.var(b));
    }

    #[test]
    fn test_annotation_on_copy_of_consumer_is_rewritten() {
        // The annotation sits on a copy of the consuming call:
        //   let s = alloc_storage(); let r = add(s, x);
        //   let t = r;               // t may_share b
        //   let u = relu(t);
        let mut arena = Arena::new();
        let x = arena.fresh_var("x");
        let b = arena.fresh_var("b");
        let s = arena.fresh_var("s");
        let r = arena.fresh_var("r");
        let t = arena.fresh_var_may_share("t", b);
        let u = arena.fresh_var("u");

        let alloc = arena.call(
            "alloc_storage",
            vec![],
            Attrs::new().set("size", AttrValue::Int(64)),
        );
        let se = arena.var(s);
        let xe = arena.var(x);
        let add = arena.call("add", vec![se, xe], Attrs::new());
        let re = arena.var(r);
        let te = arena.var(t);
        let relu = arena.call("relu", vec![te], Attrs::new());
        let ue = arena.var(u);

        let l4 = arena.let_(u, relu, ue);
        let l3 = arena.let_(t, re, l4);
        let l2 = arena.let_(r, add, l3);
        let l1 = arena.let_(s, alloc, l2);
        let func = arena.function(vec![x, b], l1);

        let out = inplace_update_function(&mut arena, func).unwrap();
        assert_ne!(out, func);
        let ExprKind::Function { body, .. } = arena.kind(out).clone() else {
            panic!("expected a function");
        };
        // The allocation and the consuming call are gone; the copy now
        // reads the share target directly.
        let list = LetList::extract(&arena, body).unwrap();
        assert_eq!(list.len(), 2);
        let roots: Vec<ExprId> = list.exprs.iter().copied().chain([list.body]).collect();
        assert_eq!(UseCounter::count_in(&arena, s, &roots), 0);
        assert_eq!(list.exprs[0], arena.var(b));
    }

    #[test]
    fn test_module_entry_point_preserves_names() {
        let mut arena = Arena::new();
        let (func, _, _) = sharing_function(&mut arena);
        let mut module = Module::new();
        module.insert("main", func);

        let out = inplace_update(&mut arena, &module).unwrap();
        assert_eq!(out.len(), 1);
        assert_ne!(out.get("main").unwrap(), func);
    }
}
