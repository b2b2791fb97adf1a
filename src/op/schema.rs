//! Explicit per-operator argument schemas.
//!
//! Every operator declares an ordered descriptor list (name, semantic kind,
//! optional default) consumed uniformly by its normalizer, typer, and
//! hasher, plus the positions of its differentiable inputs. There is no
//! generated code: the descriptor list is the single source of truth for
//! argument validation.

use crate::error::{Error, Result};
use crate::value::Value;

/// Semantic kind of one operator argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Tensor,
    /// A variadic list of tensors (e.g. concatenate's inputs).
    TensorList,
    Int,
    Float,
    Bool,
    Str,
    /// A literal tuple of ints (axes, shapes).
    IntTuple,
}

/// One positional argument of an operator.
#[derive(Debug, Clone)]
pub struct ArgDescriptor {
    pub name: &'static str,
    pub kind: ArgKind,
    /// `Some` makes the argument optional; the default is substituted when
    /// the caller passes [`Value::None`] or omits trailing arguments.
    pub default: Option<Value>,
}

/// Ordered argument descriptors plus differentiability of inputs.
#[derive(Debug, Clone, Default)]
pub struct OpSchema {
    pub args: Vec<ArgDescriptor>,
    /// Positions (into `args`) of the differentiable inputs, in forward
    /// order. A gradient rule must produce exactly one expression per
    /// position, in this order.
    pub diff_inputs: Vec<usize>,
}

impl OpSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a required argument.
    pub fn arg(mut self, name: &'static str, kind: ArgKind) -> Self {
        self.args.push(ArgDescriptor {
            name,
            kind,
            default: None,
        });
        self
    }

    /// Declares an optional argument with a default value.
    pub fn optional(mut self, name: &'static str, kind: ArgKind, default: Value) -> Self {
        self.args.push(ArgDescriptor {
            name,
            kind,
            default: Some(default),
        });
        self
    }

    /// Declares which positional inputs are differentiable.
    pub fn diff(mut self, positions: &[usize]) -> Self {
        self.diff_inputs = positions.to_vec();
        self
    }

    fn kind_matches(kind: ArgKind, value: &Value) -> bool {
        match kind {
            ArgKind::Tensor => matches!(value, Value::Tensor(_)),
            ArgKind::TensorList => match value {
                Value::Tuple(fields) => fields.iter().all(|f| matches!(f, Value::Tensor(_))),
                _ => false,
            },
            ArgKind::Int => matches!(value, Value::Int(_)),
            ArgKind::Float => matches!(value, Value::Float(_) | Value::Int(_)),
            ArgKind::Bool => matches!(value, Value::Bool(_)),
            ArgKind::Str => matches!(value, Value::Str(_)),
            ArgKind::IntTuple => matches!(value, Value::Ints(_)),
        }
    }

    /// Validates the caller's positional values against the schema and fills
    /// defaults, producing one value per descriptor.
    ///
    /// Fails with a schema error when a required argument is missing, an
    /// extra argument is supplied, or a value's kind contradicts its
    /// descriptor.
    pub fn bind(&self, op: &str, args: &[Value]) -> Result<Vec<Value>> {
        if args.len() > self.args.len() {
            return Err(Error::schema(
                op,
                format!(
                    "expected at most {} arguments, got {}",
                    self.args.len(),
                    args.len()
                ),
            ));
        }
        let mut bound = Vec::with_capacity(self.args.len());
        for (i, desc) in self.args.iter().enumerate() {
            let supplied = args.get(i).filter(|v| !v.is_none());
            match (supplied, &desc.default) {
                (Some(value), _) => {
                    if !Self::kind_matches(desc.kind, value) {
                        return Err(Error::schema(
                            op,
                            format!(
                                "argument `{}` expects {:?}, got {}",
                                desc.name,
                                desc.kind,
                                value.kind_name()
                            ),
                        ));
                    }
                    bound.push(value.clone());
                }
                (None, Some(default)) => bound.push(default.clone()),
                (None, None) => {
                    return Err(Error::schema(
                        op,
                        format!("missing required argument `{}`", desc.name),
                    ));
                }
            }
        }
        Ok(bound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ty::DType;

    fn take_schema() -> OpSchema {
        OpSchema::new()
            .arg("x", ArgKind::Tensor)
            .arg("indices", ArgKind::Tensor)
            .optional("axis", ArgKind::Int, Value::None)
            .diff(&[0])
    }

    #[test]
    fn test_bind_fills_defaults() {
        let schema = take_schema();
        let bound = schema
            .bind(
                "take",
                &[
                    Value::tensor(vec![4, 3], DType::F32),
                    Value::tensor(vec![2], DType::I64),
                ],
            )
            .unwrap();
        assert_eq!(bound.len(), 3);
        assert!(bound[2].is_none());
    }

    #[test]
    fn test_bind_rejects_missing_required() {
        let schema = take_schema();
        let err = schema
            .bind("take", &[Value::tensor(vec![4], DType::F32)])
            .unwrap_err();
        assert!(err.to_string().contains("indices"));
    }

    #[test]
    fn test_bind_rejects_ill_typed_scalar() {
        let schema = take_schema();
        let err = schema
            .bind(
                "take",
                &[
                    Value::tensor(vec![4], DType::F32),
                    Value::tensor(vec![2], DType::I64),
                    Value::Str("zero".into()),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, Error::Schema { .. }));
    }
}
