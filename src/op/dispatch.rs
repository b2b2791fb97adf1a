//! Call normalization, type inference, and cache-key hashing.
//!
//! Dispatching a concrete operator call runs four steps, in order:
//!
//! 1. **Normalize** — validate the bound arguments against the operator's
//!    schema, flatten the tensor-valued ones into an ordered input list,
//!    and build the backend attribute record.
//! 2. **Type** — infer the flattened parameter types and the output type.
//! 3. **Hash** — fold parameter types, output type, and every non-tensor
//!    literal attribute into a [`HashKey`].
//! 4. **Cache** — look up `(op, HashKey)` in the kernel cache, invoking the
//!    external backend compiler at most once per distinct key.
//!
//! The hash must be sensitive to every attribute that changes generated
//! kernel behavior; the default [`generic_hasher`] is therefore total over
//! the attribute record, and an operator that narrows its key must say so
//! explicitly with its own hasher.

use std::sync::Arc;

use log::debug;
use rustc_hash::FxHashMap;

use crate::backend::{CompiledKernel, KernelCompiler};
use crate::error::{Error, Result};
use crate::ir::printer::render;
use crate::ir::ty::{DType, TensorType, Type};
use crate::ir::{Arena, AttrValue, Attrs, ExprId, ExprKind, VarId};
use crate::op::cache::{CacheKey, KernelCache};
use crate::op::schema::{ArgKind, OpSchema};
use crate::op::OpRegistry;
use crate::value::{TensorValue, Value};

// ----------------------------------------------------------------------------
// HashKey
// ----------------------------------------------------------------------------

/// Accumulator for a kernel-cache key.
///
/// Values are folded as tagged bytes so that adjacent fields cannot run into
/// each other (`[1, 23]` and `[12, 3]` must not collide). A `HashKey` is
/// only ever a cache key; it is never an identity for IR values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct HashKey {
    bytes: Vec<u8>,
}

impl HashKey {
    pub fn new() -> Self {
        Self::default()
    }

    fn tag(&mut self, t: u8) -> &mut Self {
        self.bytes.push(t);
        self
    }

    pub fn i64(&mut self, v: i64) -> &mut Self {
        self.tag(1).bytes.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn f64(&mut self, v: f64) -> &mut Self {
        self.tag(2)
            .bytes
            .extend_from_slice(&v.to_bits().to_le_bytes());
        self
    }

    pub fn bool(&mut self, v: bool) -> &mut Self {
        self.tag(3).bytes.push(v as u8);
        self
    }

    pub fn str(&mut self, v: &str) -> &mut Self {
        self.tag(4).i64(v.len() as i64);
        self.bytes.extend_from_slice(v.as_bytes());
        self
    }

    pub fn ints(&mut self, v: &[i64]) -> &mut Self {
        self.tag(5).i64(v.len() as i64);
        for &x in v {
            self.i64(x);
        }
        self
    }

    pub fn dtype(&mut self, v: DType) -> &mut Self {
        self.tag(6).str(v.as_str());
        self
    }

    pub fn tensor_type(&mut self, t: &TensorType) -> &mut Self {
        self.tag(7).dtype(t.dtype).ints(&t.shape);
        self
    }

    pub fn ty(&mut self, t: &Type) -> &mut Self {
        match t {
            Type::Tensor(tt) => self.tensor_type(tt),
            Type::Tuple(fields) => {
                self.tag(8).i64(fields.len() as i64);
                for f in fields {
                    self.ty(f);
                }
                self
            }
        }
    }

    pub fn attr(&mut self, name: &str, value: &AttrValue) -> &mut Self {
        self.str(name);
        match value {
            AttrValue::Int(v) => self.i64(*v),
            AttrValue::Float(v) => self.f64(*v),
            AttrValue::Bool(v) => self.bool(*v),
            AttrValue::Str(v) => self.str(v),
            AttrValue::Ints(v) => self.ints(v),
            AttrValue::Dtype(v) => self.dtype(*v),
        }
    }
}

// ----------------------------------------------------------------------------
// Normalized call environment
// ----------------------------------------------------------------------------

/// A concrete operator call: the operator name plus positional argument
/// values in schema order.
#[derive(Debug, Clone)]
pub struct CallValues {
    pub op: String,
    pub args: Vec<Value>,
}

impl CallValues {
    pub fn new(op: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            op: op.into(),
            args,
        }
    }

    /// Builds positional call values from an IR call expression and a
    /// variable environment.
    ///
    /// Tensor-kinded schema positions are filled from the call's arguments
    /// (variables resolved through `env`); attribute-kinded positions are
    /// filled from the call's attribute record by descriptor name.
    pub fn from_call(
        arena: &Arena,
        registry: &OpRegistry,
        call: ExprId,
        env: &FxHashMap<VarId, Value>,
    ) -> Result<CallValues> {
        let ExprKind::Call { op, args, attrs } = arena.kind(call).clone() else {
            return Err(Error::malformed(format!(
                "expected a call expression, got {}",
                render(arena, call)
            )));
        };
        let schema = &registry.get(&op)?.schema;

        let resolve = |id: ExprId| -> Result<Value> {
            match arena.kind(id) {
                ExprKind::Var(v) => env.get(v).cloned().ok_or_else(|| {
                    Error::Lookup(format!(
                        "unbound variable {} in {}",
                        render(arena, id),
                        render(arena, call)
                    ))
                }),
                _ => Err(Error::schema(
                    &op,
                    format!("tensor argument is not a variable: {}", render(arena, id)),
                )),
            }
        };

        let mut ir_args = args.iter().copied();
        let mut values = Vec::with_capacity(schema.args.len());
        for desc in &schema.args {
            match desc.kind {
                ArgKind::Tensor => {
                    let id = ir_args.next().ok_or_else(|| {
                        Error::schema(&op, format!("missing tensor argument `{}`", desc.name))
                    })?;
                    values.push(resolve(id)?);
                }
                ArgKind::TensorList => {
                    let id = ir_args.next().ok_or_else(|| {
                        Error::schema(&op, format!("missing tensor argument `{}`", desc.name))
                    })?;
                    let ExprKind::Tuple(fields) = arena.kind(id).clone() else {
                        return Err(Error::schema(
                            &op,
                            format!("argument `{}` expects a tuple of tensors", desc.name),
                        ));
                    };
                    let fields = fields
                        .into_iter()
                        .map(|f| resolve(f))
                        .collect::<Result<Vec<_>>>()?;
                    values.push(Value::Tuple(fields));
                }
                _ => values.push(match attrs.get(desc.name) {
                    Some(AttrValue::Int(v)) => Value::Int(*v),
                    Some(AttrValue::Float(v)) => Value::Float(*v),
                    Some(AttrValue::Bool(v)) => Value::Bool(*v),
                    Some(AttrValue::Str(v)) => Value::Str(v.clone()),
                    Some(AttrValue::Ints(v)) => Value::Ints(v.clone()),
                    Some(AttrValue::Dtype(v)) => Value::Str(v.as_str().to_string()),
                    None => Value::None,
                }),
            }
        }
        Ok(CallValues::new(op, values))
    }
}

/// Backend-ready descriptor produced by an operator's normalizer: the
/// flattened tensor inputs in order, plus the literal attribute record.
#[derive(Debug, Clone)]
pub struct OpEnv {
    pub inputs: Vec<TensorValue>,
    pub attrs: Attrs,
}

impl OpEnv {
    pub fn new(inputs: Vec<TensorValue>, attrs: Attrs) -> Self {
        Self { inputs, attrs }
    }
}

/// Inferred types of a normalized call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub param_types: Vec<TensorType>,
    pub out_type: Type,
}

/// Validates schema-bound values and produces the [`OpEnv`].
pub type NormalizeFn = fn(op: &str, schema: &OpSchema, args: &[Value]) -> Result<OpEnv>;
/// Infers parameter and output types from the normalized environment.
pub type TypeFn = fn(op: &str, env: &OpEnv) -> Result<Signature>;
/// Folds the signature and attributes into a cache key.
pub type HashFn = fn(sig: &Signature, env: &OpEnv) -> HashKey;

/// Folds only the parameter and output types. Per-operator hashers start
/// from this and append their attributes.
pub fn generic_type_key(sig: &Signature) -> HashKey {
    let mut key = HashKey::new();
    for t in &sig.param_types {
        key.tensor_type(t);
    }
    key.ty(&sig.out_type);
    key
}

/// The default hasher: types plus *every* attribute in the record, names
/// included. An operator whose hasher narrows this key is opting into
/// cache collisions for the attributes it drops, and must do so in its own
/// named hasher rather than here.
pub fn generic_hasher(sig: &Signature, env: &OpEnv) -> HashKey {
    let mut key = generic_type_key(sig);
    for (name, value) in env.attrs.iter() {
        key.attr(name, value);
    }
    key
}

// ----------------------------------------------------------------------------
// Dispatcher
// ----------------------------------------------------------------------------

/// Ties a registry, a kernel cache, and a backend compiler together.
///
/// The registry is borrowed: it is built once at startup and read-only
/// afterwards. The cache is owned and shared across threads via the
/// dispatcher itself.
pub struct Dispatcher<'r> {
    registry: &'r OpRegistry,
    compiler: Arc<dyn KernelCompiler>,
    cache: KernelCache,
}

impl<'r> Dispatcher<'r> {
    pub fn new(registry: &'r OpRegistry, compiler: Arc<dyn KernelCompiler>) -> Self {
        Self {
            registry,
            compiler,
            cache: KernelCache::new(),
        }
    }

    pub fn registry(&self) -> &OpRegistry {
        self.registry
    }

    /// Number of compiled kernels currently cached.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Normalizes, types, hashes, and resolves a call to a compiled kernel,
    /// compiling at most once per distinct `(op, HashKey)`.
    pub fn dispatch(&self, call: &CallValues) -> Result<Arc<CompiledKernel>> {
        let op = self.registry.get(&call.op)?;
        let bound = op.schema.bind(&op.name, &call.args)?;
        let env = (op.normalizer)(&op.name, &op.schema, &bound)?;
        let sig = (op.typer)(&op.name, &env)?;
        let key = CacheKey::new(op.name.clone(), (op.hasher)(&sig, &env));
        debug!(
            "dispatch {}: {} inputs, out {}",
            op.name,
            env.inputs.len(),
            sig.out_type
        );
        self.cache
            .get_or_compile(key, || self.compiler.compile(&op.name, &env, &sig))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(attrs: Attrs) -> (Signature, OpEnv) {
        let t = TensorValue::new(vec![4, 3], DType::F32);
        let sig = Signature {
            param_types: vec![t.ty()],
            out_type: Type::Tensor(t.ty()),
        };
        (sig, OpEnv::new(vec![t], attrs))
    }

    #[test]
    fn test_generic_hasher_is_total_over_attributes() {
        let (sig, base) = env(
            Attrs::new()
                .set("axis", AttrValue::Int(0))
                .set("keepdims", AttrValue::Bool(false)),
        );
        let same = generic_hasher(&sig, &base);
        assert_eq!(same, generic_hasher(&sig, &base));

        for other in [
            Attrs::new()
                .set("axis", AttrValue::Int(1))
                .set("keepdims", AttrValue::Bool(false)),
            Attrs::new()
                .set("axis", AttrValue::Int(0))
                .set("keepdims", AttrValue::Bool(true)),
            Attrs::new().set("axis", AttrValue::Int(0)),
            Attrs::new()
                .set("axis", AttrValue::Int(0))
                .set("keepdims", AttrValue::Bool(false))
                .set("dtype", AttrValue::Dtype(DType::F16)),
        ] {
            let (_, changed) = env(other);
            assert_ne!(same, generic_hasher(&sig, &changed));
        }
    }

    #[test]
    fn test_hash_key_fields_do_not_run_together() {
        let mut a = HashKey::new();
        a.ints(&[1, 23]);
        let mut b = HashKey::new();
        b.ints(&[12, 3]);
        assert_ne!(a, b);

        let mut c = HashKey::new();
        c.str("ab").str("c");
        let mut d = HashKey::new();
        d.str("a").str("bc");
        assert_ne!(c, d);
    }

    #[test]
    fn test_hash_key_covers_types() {
        let (sig32, env32) = env(Attrs::new());
        let t64 = TensorValue::new(vec![4, 3], DType::F64);
        let sig64 = Signature {
            param_types: vec![t64.ty()],
            out_type: Type::Tensor(t64.ty()),
        };
        assert_ne!(
            generic_hasher(&sig32, &env32),
            generic_hasher(&sig64, &env32)
        );
    }
}
