//! Built-in operator definitions.
//!
//! Each operator is registered with its argument schema, a normalizer that
//! flattens tensor arguments and builds the backend attribute record, a
//! typer that infers parameter/output types, a hasher, and (where the
//! operator is differentiable) a gradient rule. Most operators share the
//! generic normalizer and the generic, attribute-total hasher; the ones
//! that resolve extra defaults (take's clip mode, cast's dtype parse) carry
//! their own normalizer.

use crate::error::{Error, Result};
use crate::grad::rules;
use crate::ir::ty::{broadcast_shapes, DType, Type};
use crate::ir::{AttrValue, Attrs};
use crate::op::dispatch::{generic_hasher, OpEnv, Signature};
use crate::op::schema::{ArgKind, OpSchema};
use crate::op::OpRegistry;
use crate::value::Value;

// ----------------------------------------------------------------------------
// Shared normalizer/typer helpers
// ----------------------------------------------------------------------------

fn attr_of(op: &str, name: &str, value: &Value) -> Result<AttrValue> {
    Ok(match value {
        Value::Int(v) => AttrValue::Int(*v),
        Value::Float(v) => AttrValue::Float(*v),
        Value::Bool(v) => AttrValue::Bool(*v),
        Value::Str(v) => AttrValue::Str(v.clone()),
        Value::Ints(v) => AttrValue::Ints(v.clone()),
        other => {
            return Err(Error::schema(
                op,
                format!("attribute `{name}` has non-literal value ({})", other.kind_name()),
            ));
        }
    })
}

/// Flattens tensor-kinded arguments into the input list, in schema order,
/// and turns every present literal argument into an attribute named after
/// its descriptor.
fn generic_normalizer(op: &str, schema: &OpSchema, args: &[Value]) -> Result<OpEnv> {
    let mut inputs = Vec::new();
    let mut attrs = Attrs::new();
    for (desc, value) in schema.args.iter().zip(args) {
        match desc.kind {
            ArgKind::Tensor => {
                let t = value.as_tensor().ok_or_else(|| {
                    Error::schema(op, format!("argument `{}` must be a tensor", desc.name))
                })?;
                inputs.push(t.clone());
            }
            ArgKind::TensorList => {
                let Value::Tuple(fields) = value else {
                    return Err(Error::schema(
                        op,
                        format!("argument `{}` must be a tuple of tensors", desc.name),
                    ));
                };
                for f in fields {
                    let t = f.as_tensor().ok_or_else(|| {
                        Error::schema(op, format!("argument `{}` mixes non-tensors", desc.name))
                    })?;
                    inputs.push(t.clone());
                }
            }
            _ => {
                if !value.is_none() {
                    attrs = attrs.set(desc.name, attr_of(op, desc.name, value)?);
                }
            }
        }
    }
    Ok(OpEnv::new(inputs, attrs))
}

fn signature(env: &OpEnv, out_type: Type) -> Signature {
    Signature {
        param_types: env.inputs.iter().map(|t| t.ty()).collect(),
        out_type,
    }
}

fn input<'a>(op: &str, env: &'a OpEnv, i: usize) -> Result<&'a crate::value::TensorValue> {
    env.inputs.get(i).ok_or_else(|| {
        Error::schema(op, format!("expected at least {} tensor inputs", i + 1))
    })
}

fn same_dtype(op: &str, a: DType, b: DType) -> Result<DType> {
    if a == b {
        Ok(a)
    } else {
        Err(Error::type_error(op, format!("dtype mismatch: {a} vs {b}")))
    }
}

/// Resolves a possibly negative axis against `rank`.
fn resolve_axis(op: &str, axis: i64, rank: usize) -> Result<usize> {
    let rank = rank as i64;
    let resolved = if axis < 0 { axis + rank } else { axis };
    if resolved < 0 || resolved >= rank {
        return Err(Error::type_error(
            op,
            format!("axis {axis} is out of range for rank {rank}"),
        ));
    }
    Ok(resolved as usize)
}

fn attr_int(env: &OpEnv, name: &str) -> Option<i64> {
    match env.attrs.get(name) {
        Some(AttrValue::Int(v)) => Some(*v),
        _ => None,
    }
}

fn attr_ints(env: &OpEnv, name: &str) -> Vec<i64> {
    match env.attrs.get(name) {
        Some(AttrValue::Ints(v)) => v.clone(),
        _ => Vec::new(),
    }
}

fn attr_bool(env: &OpEnv, name: &str) -> bool {
    matches!(env.attrs.get(name), Some(AttrValue::Bool(true)))
}

// ----------------------------------------------------------------------------
// Elementwise
// ----------------------------------------------------------------------------

fn broadcast_typer(op: &str, env: &OpEnv) -> Result<Signature> {
    let x1 = input(op, env, 0)?;
    let x2 = input(op, env, 1)?;
    let dtype = same_dtype(op, x1.dtype, x2.dtype)?;
    let shape = broadcast_shapes(op, &x1.shape, &x2.shape)?;
    Ok(signature(env, Type::tensor(shape, dtype)))
}

/// Output type equals the type of input `i`.
fn like_input_typer(i: usize) -> impl Fn(&str, &OpEnv) -> Result<Signature> {
    move |op, env| {
        let t = input(op, env, i)?;
        Ok(signature(env, Type::Tensor(t.ty())))
    }
}

fn unary_typer(op: &str, env: &OpEnv) -> Result<Signature> {
    like_input_typer(0)(op, env)
}

fn dx_typer(op: &str, env: &OpEnv) -> Result<Signature> {
    // Backward kernels produce a gradient shaped like the forward input.
    like_input_typer(0)(op, env)
}

fn collapse_sum_like_typer(op: &str, env: &OpEnv) -> Result<Signature> {
    let x = input(op, env, 0)?;
    let like = input(op, env, 1)?;
    same_dtype(op, x.dtype, like.dtype)?;
    Ok(signature(env, Type::Tensor(like.ty())))
}

// ----------------------------------------------------------------------------
// Reductions
// ----------------------------------------------------------------------------

fn mean_typer(op: &str, env: &OpEnv) -> Result<Signature> {
    let x = input(op, env, 0)?;
    if !x.dtype.is_float() {
        return Err(Error::type_error(
            op,
            format!("expected a float tensor, got {}", x.dtype),
        ));
    }
    let keepdims = attr_bool(env, "keepdims");
    let axes = attr_ints(env, "axis");
    let axes = if axes.is_empty() {
        (0..x.shape.len()).collect::<Vec<_>>()
    } else {
        let mut resolved = axes
            .iter()
            .map(|&a| resolve_axis(op, a, x.shape.len()))
            .collect::<Result<Vec<_>>>()?;
        resolved.sort_unstable();
        resolved.dedup();
        resolved
    };
    let mut shape = Vec::new();
    for (i, &d) in x.shape.iter().enumerate() {
        if axes.contains(&i) {
            if keepdims {
                shape.push(1);
            }
        } else {
            shape.push(d);
        }
    }
    Ok(signature(env, Type::tensor(shape, x.dtype)))
}

// ----------------------------------------------------------------------------
// Indexing and layout
// ----------------------------------------------------------------------------

fn check_index_dtype(op: &str, indices: &crate::value::TensorValue) -> Result<()> {
    match indices.dtype {
        DType::I32 | DType::I64 => Ok(()),
        other => Err(Error::type_error(
            op,
            format!("indices must be integer, got {other}"),
        )),
    }
}

fn take_normalizer(op: &str, schema: &OpSchema, args: &[Value]) -> Result<OpEnv> {
    let env = generic_normalizer(op, schema, args)?;
    // Forward take clips out-of-range indices; the backward kernel wraps.
    let attrs = env.attrs.set("mode", AttrValue::Str("clip".into()));
    Ok(OpEnv::new(env.inputs, attrs))
}

fn take_dx_normalizer(op: &str, schema: &OpSchema, args: &[Value]) -> Result<OpEnv> {
    let env = generic_normalizer(op, schema, args)?;
    let attrs = env.attrs.set("mode", AttrValue::Str("wrap".into()));
    Ok(OpEnv::new(env.inputs, attrs))
}

fn take_typer(op: &str, env: &OpEnv) -> Result<Signature> {
    let x = input(op, env, 0)?;
    let indices = input(op, env, 1)?;
    check_index_dtype(op, indices)?;
    let shape = match attr_int(env, "axis") {
        // No axis: index into the flattened input.
        None => indices.shape.clone(),
        Some(axis) => {
            let axis = resolve_axis(op, axis, x.shape.len())?;
            let mut shape = x.shape[..axis].to_vec();
            shape.extend_from_slice(&indices.shape);
            shape.extend_from_slice(&x.shape[axis + 1..]);
            shape
        }
    };
    Ok(signature(env, Type::tensor(shape, x.dtype)))
}

fn take_dx_typer(op: &str, env: &OpEnv) -> Result<Signature> {
    let x = input(op, env, 0)?;
    check_index_dtype(op, input(op, env, 3)?)?;
    Ok(signature(env, Type::Tensor(x.ty())))
}

fn transpose_typer(op: &str, env: &OpEnv) -> Result<Signature> {
    let x = input(op, env, 0)?;
    let axes = attr_ints(env, "axes");
    let shape = if axes.is_empty() {
        let mut s = x.shape.clone();
        s.reverse();
        s
    } else {
        if axes.len() != x.shape.len() {
            return Err(Error::type_error(
                op,
                format!("axes {axes:?} is not a permutation of rank {}", x.shape.len()),
            ));
        }
        let mut seen = vec![false; axes.len()];
        let mut shape = Vec::with_capacity(axes.len());
        for &a in &axes {
            let a = resolve_axis(op, a, x.shape.len())?;
            if seen[a] {
                return Err(Error::type_error(op, format!("axes {axes:?} repeats {a}")));
            }
            seen[a] = true;
            shape.push(x.shape[a]);
        }
        shape
    };
    Ok(signature(env, Type::tensor(shape, x.dtype)))
}

fn reshape_typer(op: &str, env: &OpEnv) -> Result<Signature> {
    let x = input(op, env, 0)?;
    let shape = attr_ints(env, "shape");
    let new_numel: i64 = shape.iter().product();
    if new_numel != x.ty().numel() {
        return Err(Error::type_error(
            op,
            format!("cannot reshape {:?} into {:?}", x.shape, shape),
        ));
    }
    Ok(signature(env, Type::tensor(shape, x.dtype)))
}

fn concatenate_typer(op: &str, env: &OpEnv) -> Result<Signature> {
    let first = input(op, env, 0)?;
    let axis = resolve_axis(op, attr_int(env, "axis").unwrap_or(0), first.shape.len())?;
    let mut out = first.shape.clone();
    for t in &env.inputs[1..] {
        same_dtype(op, first.dtype, t.dtype)?;
        if t.shape.len() != first.shape.len() {
            return Err(Error::type_error(op, "inputs differ in rank".to_string()));
        }
        for (i, (&a, &b)) in first.shape.iter().zip(&t.shape).enumerate() {
            if i == axis {
                out[axis] += b;
            } else if a != b {
                return Err(Error::type_error(
                    op,
                    format!("inputs differ in non-concatenated dimension {i}"),
                ));
            }
        }
    }
    Ok(signature(env, Type::tensor(out, first.dtype)))
}

fn matmul_typer(op: &str, env: &OpEnv) -> Result<Signature> {
    let x1 = input(op, env, 0)?;
    let x2 = input(op, env, 1)?;
    let dtype = same_dtype(op, x1.dtype, x2.dtype)?;
    match (x1.shape.as_slice(), x2.shape.as_slice()) {
        ([m, k1], [k2, n]) if k1 == k2 => Ok(signature(env, Type::tensor(vec![*m, *n], dtype))),
        _ => Err(Error::type_error(
            op,
            format!("cannot multiply {:?} by {:?}", x1.shape, x2.shape),
        )),
    }
}

// ----------------------------------------------------------------------------
// Dtype conversion and clipping
// ----------------------------------------------------------------------------

fn cast_normalizer(op: &str, schema: &OpSchema, args: &[Value]) -> Result<OpEnv> {
    let env = generic_normalizer(op, schema, args)?;
    // Replace the raw dtype string with the parsed dtype so the hasher and
    // the backend see a canonical value.
    let Some(AttrValue::Str(name)) = env.attrs.get("dtype") else {
        return Err(Error::schema(op, "missing dtype".to_string()));
    };
    let dtype = DType::parse(name, op)?;
    Ok(OpEnv::new(
        env.inputs,
        Attrs::new().set("dtype", AttrValue::Dtype(dtype)),
    ))
}

fn cast_typer(op: &str, env: &OpEnv) -> Result<Signature> {
    let x = input(op, env, 0)?;
    let Some(AttrValue::Dtype(dtype)) = env.attrs.get("dtype") else {
        return Err(Error::schema(op, "missing dtype".to_string()));
    };
    Ok(signature(env, Type::tensor(x.shape.clone(), *dtype)))
}

fn clip_typer(op: &str, env: &OpEnv) -> Result<Signature> {
    unary_typer(op, env)
}

// ----------------------------------------------------------------------------
// VM allocation ops (consumed by the storage-sharing pass)
// ----------------------------------------------------------------------------

fn alloc_storage_typer(op: &str, env: &OpEnv) -> Result<Signature> {
    let size = attr_int(env, "size")
        .ok_or_else(|| Error::schema(op, "missing size".to_string()))?;
    Ok(signature(env, Type::tensor(vec![size], DType::U8)))
}

fn alloc_tensor_typer(op: &str, env: &OpEnv) -> Result<Signature> {
    let shape = attr_ints(env, "shape");
    let dtype = match env.attrs.get("dtype") {
        Some(AttrValue::Str(name)) => DType::parse(name, op)?,
        _ => DType::F32,
    };
    Ok(signature(env, Type::tensor(shape, dtype)))
}

// ----------------------------------------------------------------------------
// Registration
// ----------------------------------------------------------------------------

fn unary_schema() -> OpSchema {
    OpSchema::new().arg("x", ArgKind::Tensor).diff(&[0])
}

fn binary_schema() -> OpSchema {
    OpSchema::new()
        .arg("x1", ArgKind::Tensor)
        .arg("x2", ArgKind::Tensor)
        .diff(&[0, 1])
}

fn dx_schema() -> OpSchema {
    OpSchema::new()
        .arg("x", ArgKind::Tensor)
        .arg("y", ArgKind::Tensor)
        .arg("dy", ArgKind::Tensor)
}

/// Installs the built-in operator library into `registry`.
pub fn install(registry: &mut OpRegistry) {
    fn like0(op: &str, env: &OpEnv) -> Result<Signature> {
        like_input_typer(0)(op, env)
    }

    registry
        .register(
            "add",
            binary_schema(),
            generic_normalizer,
            broadcast_typer,
            generic_hasher,
            Some(rules::add_grad),
        )
        .register(
            "subtract",
            binary_schema(),
            generic_normalizer,
            broadcast_typer,
            generic_hasher,
            Some(rules::subtract_grad),
        )
        .register(
            "multiply",
            binary_schema(),
            generic_normalizer,
            broadcast_typer,
            generic_hasher,
            Some(rules::multiply_grad),
        )
        .register(
            "negative",
            unary_schema(),
            generic_normalizer,
            unary_typer,
            generic_hasher,
            Some(rules::negative_grad),
        )
        .register(
            "relu",
            unary_schema(),
            generic_normalizer,
            unary_typer,
            generic_hasher,
            Some(rules::relu_grad),
        )
        .register(
            "relu_dx",
            dx_schema(),
            generic_normalizer,
            dx_typer,
            generic_hasher,
            None,
        )
        .register(
            "zeros_like",
            OpSchema::new().arg("x", ArgKind::Tensor),
            generic_normalizer,
            unary_typer,
            generic_hasher,
            None,
        )
        .register(
            "collapse_sum_like",
            OpSchema::new()
                .arg("x", ArgKind::Tensor)
                .arg("like", ArgKind::Tensor),
            generic_normalizer,
            collapse_sum_like_typer,
            generic_hasher,
            None,
        )
        .register(
            "mean",
            OpSchema::new()
                .arg("x", ArgKind::Tensor)
                .optional("axis", ArgKind::IntTuple, Value::Ints(vec![]))
                .optional("keepdims", ArgKind::Bool, Value::Bool(false))
                .diff(&[0]),
            generic_normalizer,
            mean_typer,
            generic_hasher,
            Some(rules::mean_grad),
        )
        .register(
            "mean_dx",
            OpSchema::new()
                .arg("x", ArgKind::Tensor)
                .arg("y", ArgKind::Tensor)
                .arg("dy", ArgKind::Tensor)
                .optional("axis", ArgKind::IntTuple, Value::Ints(vec![]))
                .optional("keepdims", ArgKind::Bool, Value::Bool(false)),
            generic_normalizer,
            dx_typer,
            generic_hasher,
            None,
        )
        .register(
            "take",
            OpSchema::new()
                .arg("x", ArgKind::Tensor)
                .arg("indices", ArgKind::Tensor)
                .optional("axis", ArgKind::Int, Value::None)
                .diff(&[0]),
            take_normalizer,
            take_typer,
            generic_hasher,
            Some(rules::take_grad),
        )
        .register(
            "take_dx",
            OpSchema::new()
                .arg("x", ArgKind::Tensor)
                .arg("y", ArgKind::Tensor)
                .arg("dy", ArgKind::Tensor)
                .arg("indices", ArgKind::Tensor)
                .optional("axis", ArgKind::Int, Value::None),
            take_dx_normalizer,
            take_dx_typer,
            generic_hasher,
            None,
        )
        .register(
            "transpose",
            OpSchema::new()
                .arg("x", ArgKind::Tensor)
                .optional("axes", ArgKind::IntTuple, Value::Ints(vec![]))
                .diff(&[0]),
            generic_normalizer,
            transpose_typer,
            generic_hasher,
            Some(rules::transpose_grad),
        )
        .register(
            "transpose_dx",
            OpSchema::new()
                .arg("x", ArgKind::Tensor)
                .arg("y", ArgKind::Tensor)
                .arg("dy", ArgKind::Tensor)
                .optional("axes", ArgKind::IntTuple, Value::Ints(vec![])),
            generic_normalizer,
            dx_typer,
            generic_hasher,
            None,
        )
        .register(
            "reshape",
            OpSchema::new()
                .arg("x", ArgKind::Tensor)
                .arg("shape", ArgKind::IntTuple),
            generic_normalizer,
            reshape_typer,
            generic_hasher,
            None,
        )
        .register(
            "concatenate",
            OpSchema::new()
                .arg("x", ArgKind::TensorList)
                .optional("axis", ArgKind::Int, Value::Int(0)),
            generic_normalizer,
            concatenate_typer,
            generic_hasher,
            None,
        )
        .register(
            "matmul",
            binary_schema(),
            generic_normalizer,
            matmul_typer,
            generic_hasher,
            Some(rules::matmul_grad),
        )
        .register(
            "clip",
            OpSchema::new()
                .arg("x", ArgKind::Tensor)
                .arg("a_min", ArgKind::Float)
                .arg("a_max", ArgKind::Float)
                .diff(&[0]),
            generic_normalizer,
            clip_typer,
            generic_hasher,
            Some(rules::clip_grad),
        )
        .register(
            "clip_dx",
            OpSchema::new()
                .arg("x", ArgKind::Tensor)
                .arg("dy", ArgKind::Tensor)
                .optional("a_min", ArgKind::Float, Value::None)
                .optional("a_max", ArgKind::Float, Value::None),
            generic_normalizer,
            like0,
            generic_hasher,
            None,
        )
        .register(
            "cast",
            OpSchema::new()
                .arg("data", ArgKind::Tensor)
                .arg("dtype", ArgKind::Str),
            cast_normalizer,
            cast_typer,
            generic_hasher,
            None,
        )
        .register(
            "alloc_storage",
            OpSchema::new()
                .arg("size", ArgKind::Int)
                .optional("alignment", ArgKind::Int, Value::Int(64)),
            generic_normalizer,
            alloc_storage_typer,
            generic_hasher,
            None,
        )
        .register(
            "alloc_tensor",
            OpSchema::new()
                .arg("storage", ArgKind::Tensor)
                .arg("shape", ArgKind::IntTuple)
                .optional("dtype", ArgKind::Str, Value::Str("float32".into())),
            generic_normalizer,
            alloc_tensor_typer,
            generic_hasher,
            None,
        );
}
