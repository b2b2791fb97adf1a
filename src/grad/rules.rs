//! Gradient rules for the built-in operator library.
//!
//! Each rule mirrors the shape of its forward operator: elementwise ops
//! build elementwise backward expressions (collapsed over broadcast axes),
//! and ops with a dedicated backward kernel rewrite to a single call of it,
//! forwarding the original input, output, output gradient, and the
//! forward call's own attributes.

use crate::error::{Error, Result};
use crate::ir::printer::render;
use crate::ir::{Arena, AttrValue, Attrs, ExprId, ExprKind};

/// Destructures a call expression, failing on anything else.
fn call_parts(arena: &Arena, id: ExprId) -> Result<(String, Vec<ExprId>, Attrs)> {
    match arena.kind(id).clone() {
        ExprKind::Call { op, args, attrs } => Ok((op, args, attrs)),
        _ => Err(Error::malformed(format!(
            "gradient rule applied to a non-call expression: {}",
            render(arena, id)
        ))),
    }
}

fn nth_arg(op: &str, args: &[ExprId], n: usize) -> Result<ExprId> {
    args.get(n).copied().ok_or_else(|| {
        Error::malformed(format!("call to `{op}` is missing argument {n}"))
    })
}

/// Collapses a broadcast gradient back to the shape of `like`.
fn collapse(arena: &mut Arena, grad: ExprId, like: ExprId) -> ExprId {
    arena.call("collapse_sum_like", vec![grad, like], Attrs::new())
}

/// add(x1, x2): dx1 = dy, dx2 = dy, each collapsed over broadcast axes.
pub fn add_grad(arena: &mut Arena, orig_call: ExprId, _y: ExprId, dy: ExprId) -> Result<Vec<ExprId>> {
    let (op, args, _) = call_parts(arena, orig_call)?;
    let x1 = nth_arg(&op, &args, 0)?;
    let x2 = nth_arg(&op, &args, 1)?;
    Ok(vec![collapse(arena, dy, x1), collapse(arena, dy, x2)])
}

/// subtract(x1, x2): dx1 = dy, dx2 = -dy.
pub fn subtract_grad(
    arena: &mut Arena,
    orig_call: ExprId,
    _y: ExprId,
    dy: ExprId,
) -> Result<Vec<ExprId>> {
    let (op, args, _) = call_parts(arena, orig_call)?;
    let x1 = nth_arg(&op, &args, 0)?;
    let x2 = nth_arg(&op, &args, 1)?;
    let neg = arena.call("negative", vec![dy], Attrs::new());
    Ok(vec![collapse(arena, dy, x1), collapse(arena, neg, x2)])
}

/// multiply(x1, x2): dx1 = dy * x2, dx2 = dy * x1.
pub fn multiply_grad(
    arena: &mut Arena,
    orig_call: ExprId,
    _y: ExprId,
    dy: ExprId,
) -> Result<Vec<ExprId>> {
    let (op, args, _) = call_parts(arena, orig_call)?;
    let x1 = nth_arg(&op, &args, 0)?;
    let x2 = nth_arg(&op, &args, 1)?;
    let d1 = arena.call("multiply", vec![dy, x2], Attrs::new());
    let d2 = arena.call("multiply", vec![dy, x1], Attrs::new());
    Ok(vec![collapse(arena, d1, x1), collapse(arena, d2, x2)])
}

/// negative(x): dx = -dy.
pub fn negative_grad(
    arena: &mut Arena,
    _orig_call: ExprId,
    _y: ExprId,
    dy: ExprId,
) -> Result<Vec<ExprId>> {
    Ok(vec![arena.call("negative", vec![dy], Attrs::new())])
}

/// relu(x): rewrites to the dedicated backward operator relu_dx(x, y, dy).
pub fn relu_grad(arena: &mut Arena, orig_call: ExprId, y: ExprId, dy: ExprId) -> Result<Vec<ExprId>> {
    let (op, args, _) = call_parts(arena, orig_call)?;
    let x = nth_arg(&op, &args, 0)?;
    Ok(vec![arena.call("relu_dx", vec![x, y, dy], Attrs::new())])
}

/// mean(x, axis, keepdims): one call of mean_dx forwarding the reduction's
/// own axis/keepdims attributes.
pub fn mean_grad(arena: &mut Arena, orig_call: ExprId, y: ExprId, dy: ExprId) -> Result<Vec<ExprId>> {
    let (op, args, attrs) = call_parts(arena, orig_call)?;
    let x = nth_arg(&op, &args, 0)?;
    Ok(vec![arena.call("mean_dx", vec![x, y, dy], attrs)])
}

/// take(x, indices, axis): take_dx(x, y, dy, indices) with the forward
/// axis; out-of-range scatter positions wrap, matching the backward kernel.
pub fn take_grad(arena: &mut Arena, orig_call: ExprId, y: ExprId, dy: ExprId) -> Result<Vec<ExprId>> {
    let (op, args, attrs) = call_parts(arena, orig_call)?;
    let x = nth_arg(&op, &args, 0)?;
    let indices = nth_arg(&op, &args, 1)?;
    let mut dx_attrs = Attrs::new();
    if let Some(axis) = attrs.get("axis") {
        dx_attrs = dx_attrs.set("axis", axis.clone());
    }
    dx_attrs = dx_attrs.set("mode", AttrValue::Str("wrap".into()));
    Ok(vec![arena.call("take_dx", vec![x, y, dy, indices], dx_attrs)])
}

/// transpose(x, axes): transpose_dx(x, y, dy) forwarding the axes.
pub fn transpose_grad(
    arena: &mut Arena,
    orig_call: ExprId,
    y: ExprId,
    dy: ExprId,
) -> Result<Vec<ExprId>> {
    let (op, args, attrs) = call_parts(arena, orig_call)?;
    let x = nth_arg(&op, &args, 0)?;
    Ok(vec![arena.call("transpose_dx", vec![x, y, dy], attrs)])
}

/// matmul(x1, x2): dx1 = matmul(dy, transpose(x2)),
/// dx2 = matmul(transpose(x1), dy).
pub fn matmul_grad(
    arena: &mut Arena,
    orig_call: ExprId,
    _y: ExprId,
    dy: ExprId,
) -> Result<Vec<ExprId>> {
    let (op, args, _) = call_parts(arena, orig_call)?;
    let x1 = nth_arg(&op, &args, 0)?;
    let x2 = nth_arg(&op, &args, 1)?;
    let x2t = arena.call("transpose", vec![x2], Attrs::new());
    let x1t = arena.call("transpose", vec![x1], Attrs::new());
    let d1 = arena.call("matmul", vec![dy, x2t], Attrs::new());
    let d2 = arena.call("matmul", vec![x1t, dy], Attrs::new());
    Ok(vec![d1, d2])
}

/// clip(x, a_min, a_max): clip_dx(x, dy) forwarding the clip range.
pub fn clip_grad(arena: &mut Arena, orig_call: ExprId, _y: ExprId, dy: ExprId) -> Result<Vec<ExprId>> {
    let (op, args, attrs) = call_parts(arena, orig_call)?;
    let x = nth_arg(&op, &args, 0)?;
    Ok(vec![arena.call("clip_dx", vec![x, dy], attrs)])
}
