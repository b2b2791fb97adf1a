//! Reverse-mode driver: threads gradients backward through a let-list.
//!
//! The driver walks a function's bindings in reverse, asking each call's
//! registered gradient rule for the contributions to its inputs. A variable
//! feeding several downstream uses receives the *sum* of all contributions
//! (multivariate chain rule). Traversal order is fixed — binding order
//! forward, reversed — so differentiating the same forward IR twice yields
//! byte-identical backward IR, which in turn caches identically at
//! dispatch time.

use log::{debug, trace};
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::ir::anf::LetList;
use crate::ir::printer::{render, render_var};
use crate::ir::{Arena, Attrs, ExprId, ExprKind, VarId};
use crate::op::OpRegistry;

struct Tape {
    /// Backward bindings, appended in emission order.
    bindings: Vec<(VarId, ExprId)>,
    /// Current accumulated gradient (a `Var` expression) per forward variable.
    grads: FxHashMap<VarId, ExprId>,
    fresh: usize,
}

impl Tape {
    fn new() -> Self {
        Self {
            bindings: Vec::new(),
            grads: FxHashMap::default(),
            fresh: 0,
        }
    }

    fn bind_fresh(&mut self, arena: &mut Arena, expr: ExprId) -> ExprId {
        let g = arena.fresh_var(format!("g{}", self.fresh));
        self.fresh += 1;
        self.bindings.push((g, expr));
        arena.var(g)
    }

    /// Binds `expr` (and any nested non-atomic subexpression a rule built)
    /// to fresh gradient variables, restoring let-normal form. Plain
    /// variable references pass through unchanged.
    fn as_var(&mut self, arena: &mut Arena, expr: ExprId) -> ExprId {
        match arena.kind(expr).clone() {
            ExprKind::Var(_) => expr,
            ExprKind::Call { op, args, attrs } => {
                let args = args
                    .into_iter()
                    .map(|a| self.atomize(arena, a))
                    .collect();
                let call = arena.call(op, args, attrs);
                self.bind_fresh(arena, call)
            }
            ExprKind::TupleGetItem { tuple, index } => {
                let tuple = self.atomize(arena, tuple);
                let item = arena.tuple_get_item(tuple, index);
                self.bind_fresh(arena, item)
            }
            _ => self.bind_fresh(arena, expr),
        }
    }

    /// Like [`Tape::as_var`] but leaves constants inline.
    fn atomize(&mut self, arena: &mut Arena, expr: ExprId) -> ExprId {
        match arena.kind(expr) {
            ExprKind::Var(_) | ExprKind::Constant(_) => expr,
            _ => self.as_var(arena, expr),
        }
    }

    /// Adds one contribution to `var`'s gradient, summing with any prior
    /// contribution in arrival order.
    fn accumulate(&mut self, arena: &mut Arena, var: VarId, contribution: ExprId) {
        let contribution = self.as_var(arena, contribution);
        let total = match self.grads.get(&var) {
            None => contribution,
            Some(&prior) => {
                let sum = arena.call("add", vec![prior, contribution], Attrs::new());
                self.as_var(arena, sum)
            }
        };
        trace!("grad[{}] <- {}", render_var(arena, var), render(arena, total));
        self.grads.insert(var, total);
    }
}

/// Differentiates a function in let-normal form.
///
/// Returns a new function with the original parameters plus one trailing
/// output-gradient parameter, whose body re-runs the forward bindings and
/// then computes the gradient of every original parameter, returning them
/// as a tuple in parameter order. Parameters the output does not depend on
/// get an explicit `zeros_like` gradient.
///
/// Fails with [`Error::UnsupportedGradient`] when an operator on the
/// backward path has no registered rule; a zero gradient is never silently
/// substituted for a missing rule.
pub fn gradient(arena: &mut Arena, registry: &OpRegistry, func: ExprId) -> Result<ExprId> {
    let ExprKind::Function { params, body } = arena.kind(func).clone() else {
        return Err(Error::malformed(format!(
            "gradient expects a function, got {}",
            render(arena, func)
        )));
    };

    let mut forward = LetList::extract(arena, body)?;
    debug!("gradient: {} forward bindings", forward.len());

    // The tail must be a variable so it can seed the gradient map; bind it
    // when the function returns a bare expression.
    let result = match *arena.kind(forward.body) {
        ExprKind::Var(v) => v,
        _ => {
            let ret = arena.fresh_var("ret");
            forward.vars.push(ret);
            forward.exprs.push(forward.body);
            forward.body = arena.var(ret);
            ret
        }
    };

    let dy = arena.fresh_var("dy");
    let mut tape = Tape::new();
    let seed = arena.var(dy);
    tape.grads.insert(result, seed);

    // Bindings of each forward variable, for routing tuple projections.
    let bound: FxHashMap<VarId, ExprId> = forward
        .vars
        .iter()
        .copied()
        .zip(forward.exprs.iter().copied())
        .collect();

    for (&var, &expr) in forward.vars.iter().zip(forward.exprs.iter()).rev() {
        let Some(&grad) = tape.grads.get(&var) else {
            continue; // the output does not depend on this binding
        };
        match arena.kind(expr).clone() {
            ExprKind::Call { ref op, ref args, .. } => {
                let op_def = registry.get(op)?;
                let rule = op_def.grad.ok_or_else(|| Error::UnsupportedGradient {
                    op: op.clone(),
                    context: render(arena, expr),
                })?;
                let y = arena.var(var);
                let contributions = rule(arena, expr, y, grad)?;
                let expected = op_def.schema.diff_inputs.len();
                if contributions.len() != expected {
                    return Err(Error::malformed(format!(
                        "gradient rule for `{op}` produced {} expressions, expected {expected}",
                        contributions.len()
                    )));
                }
                for (&pos, contribution) in
                    op_def.schema.diff_inputs.iter().zip(contributions)
                {
                    let arg = args.get(pos).copied().ok_or_else(|| {
                        Error::malformed(format!(
                            "differentiable input {pos} of `{op}` is missing in {}",
                            render(arena, expr)
                        ))
                    })?;
                    match *arena.kind(arg) {
                        ExprKind::Var(av) => tape.accumulate(arena, av, contribution),
                        ExprKind::Constant(_) => {} // constants take no gradient
                        _ => {
                            return Err(Error::malformed(format!(
                                "argument of `{op}` is not in let-normal form: {}",
                                render(arena, arg)
                            )));
                        }
                    }
                }
            }
            ExprKind::Var(src) => tape.accumulate(arena, src, grad),
            ExprKind::Tuple(fields) => {
                for (i, field) in fields.iter().enumerate() {
                    if let ExprKind::Var(fv) = *arena.kind(*field) {
                        let slot = arena.tuple_get_item(grad, i);
                        tape.accumulate(arena, fv, slot);
                    }
                }
            }
            ExprKind::TupleGetItem { tuple, index } => {
                let routed = match *arena.kind(tuple) {
                    ExprKind::Var(tv) => bound.get(&tv).and_then(|&e| match arena.kind(e) {
                        ExprKind::Tuple(fields) => fields.get(index).copied(),
                        _ => None,
                    }),
                    _ => None,
                };
                match routed.map(|f| arena.kind(f).clone()) {
                    Some(ExprKind::Var(fv)) => tape.accumulate(arena, fv, grad),
                    _ => {
                        return Err(Error::UnsupportedGradient {
                            op: "tuple projection".into(),
                            context: render(arena, expr),
                        });
                    }
                }
            }
            ExprKind::Constant(_) => {}
            other => {
                return Err(Error::UnsupportedGradient {
                    op: kind_label(&other).into(),
                    context: render(arena, expr),
                });
            }
        }
    }

    // Gradients of the parameters, in declaration order; parameters the
    // output never touched get an explicit zero.
    let mut param_grads = Vec::with_capacity(params.len());
    for &p in &params {
        let g = match tape.grads.get(&p) {
            Some(&g) => g,
            None => {
                let pe = arena.var(p);
                let zeros = arena.call("zeros_like", vec![pe], Attrs::new());
                tape.as_var(arena, zeros)
            }
        };
        param_grads.push(g);
    }

    let tail = arena.tuple(param_grads);
    let backward = LetList {
        vars: forward
            .vars
            .iter()
            .copied()
            .chain(tape.bindings.iter().map(|(v, _)| *v))
            .collect(),
        exprs: forward
            .exprs
            .iter()
            .copied()
            .chain(tape.bindings.iter().map(|(_, e)| *e))
            .collect(),
        body: tail,
    };
    let body = backward.rebuild(arena);

    let mut new_params = params;
    new_params.push(dy);
    Ok(arena.function(new_params, body))
}

fn kind_label(kind: &ExprKind) -> &'static str {
    match kind {
        ExprKind::Var(_) => "variable",
        ExprKind::Constant(_) => "constant",
        ExprKind::Global(_) => "global",
        ExprKind::Tuple(_) => "tuple",
        ExprKind::Call { .. } => "call",
        ExprKind::Let { .. } => "let",
        ExprKind::If { .. } => "if",
        ExprKind::TupleGetItem { .. } => "tuple projection",
        ExprKind::Function { .. } => "function",
        ExprKind::RefCreate(_) => "ref",
        ExprKind::RefRead(_) => "ref read",
        ExprKind::RefWrite { .. } => "ref write",
    }
}
