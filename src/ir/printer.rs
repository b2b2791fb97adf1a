//! Compact text rendering of expressions, used in diagnostics and tests.

use std::fmt::Write;

use crate::ir::{Arena, AttrValue, ExprId, ExprKind, Literal, VarId};

/// Renders `%hint` for a variable. Hints are cosmetic; when two distinct
/// variables share a hint the identity suffix disambiguates them.
pub fn render_var(arena: &Arena, var: VarId) -> String {
    let hint = &arena.var_info(var).name_hint;
    if hint.is_empty() {
        format!("%_{}", var.index())
    } else {
        format!("%{hint}")
    }
}

fn render_attr(out: &mut String, value: &AttrValue) {
    match value {
        AttrValue::Int(v) => {
            let _ = write!(out, "{v}");
        }
        AttrValue::Float(v) => {
            let _ = write!(out, "{v}");
        }
        AttrValue::Bool(v) => {
            let _ = write!(out, "{v}");
        }
        AttrValue::Str(v) => {
            let _ = write!(out, "\"{v}\"");
        }
        AttrValue::Ints(v) => {
            let _ = write!(out, "{v:?}");
        }
        AttrValue::Dtype(v) => {
            let _ = write!(out, "{v}");
        }
    }
}

/// Renders an expression on one line, nesting let-bodies with `;`.
pub fn render(arena: &Arena, id: ExprId) -> String {
    let mut out = String::new();
    render_into(arena, id, &mut out);
    out
}

fn render_into(arena: &Arena, id: ExprId, out: &mut String) {
    match arena.kind(id) {
        ExprKind::Var(v) => out.push_str(&render_var(arena, *v)),
        ExprKind::Constant(Literal::Int(v)) => {
            let _ = write!(out, "{v}");
        }
        ExprKind::Constant(Literal::Float(v)) => {
            let _ = write!(out, "{v}f");
        }
        ExprKind::Constant(Literal::Bool(v)) => {
            let _ = write!(out, "{v}");
        }
        ExprKind::Global(name) => {
            let _ = write!(out, "@{name}");
        }
        ExprKind::Tuple(fields) => {
            out.push('(');
            for (i, f) in fields.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                render_into(arena, *f, out);
            }
            out.push(')');
        }
        ExprKind::Call { op, args, attrs } => {
            out.push_str(op);
            out.push('(');
            for (i, a) in args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                render_into(arena, *a, out);
            }
            for (name, value) in attrs.iter() {
                if !out.ends_with('(') {
                    out.push_str(", ");
                }
                let _ = write!(out, "{name}=");
                render_attr(out, value);
            }
            out.push(')');
        }
        ExprKind::Let { var, value, body } => {
            let _ = write!(out, "let {} = ", render_var(arena, *var));
            render_into(arena, *value, out);
            out.push_str("; ");
            render_into(arena, *body, out);
        }
        ExprKind::If {
            cond,
            then_branch,
            else_branch,
        } => {
            out.push_str("if ");
            render_into(arena, *cond, out);
            out.push_str(" { ");
            render_into(arena, *then_branch, out);
            out.push_str(" } else { ");
            render_into(arena, *else_branch, out);
            out.push_str(" }");
        }
        ExprKind::TupleGetItem { tuple, index } => {
            render_into(arena, *tuple, out);
            let _ = write!(out, ".{index}");
        }
        ExprKind::Function { params, body } => {
            out.push_str("fn(");
            for (i, p) in params.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&render_var(arena, *p));
            }
            out.push_str(") { ");
            render_into(arena, *body, out);
            out.push_str(" }");
        }
        ExprKind::RefCreate(v) => {
            out.push_str("ref(");
            render_into(arena, *v, out);
            out.push(')');
        }
        ExprKind::RefRead(v) => {
            render_into(arena, *v, out);
            out.push_str(".read()");
        }
        ExprKind::RefWrite { target, value } => {
            render_into(arena, *target, out);
            out.push_str(" <- ");
            render_into(arena, *value, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Attrs;

    #[test]
    fn test_render_let_chain() {
        let mut arena = Arena::new();
        let x = arena.fresh_var("x");
        let y = arena.fresh_var("y");
        let xe = arena.var(x);
        let call = arena.call(
            "take",
            vec![xe, xe],
            Attrs::new().set("axis", AttrValue::Int(0)),
        );
        let ye = arena.var(y);
        let expr = arena.let_(y, call, ye);
        assert_eq!(render(&arena, expr), "let %y = take(%x, %x, axis=0); %y");
    }
}
