//! Runtime argument values bound to an operator call at dispatch time.
//!
//! The concrete numerical buffers live outside this crate; dispatch only
//! needs each tensor's metadata (shape and dtype) to normalize, type, and
//! hash a call.

use crate::ir::ty::{DType, TensorType};

/// Metadata of a concrete tensor argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorValue {
    pub shape: Vec<i64>,
    pub dtype: DType,
}

impl TensorValue {
    pub fn new(shape: Vec<i64>, dtype: DType) -> Self {
        Self { shape, dtype }
    }

    pub fn ty(&self) -> TensorType {
        TensorType::new(self.shape.clone(), self.dtype)
    }
}

/// A bound argument value. `None` stands for an optional argument that the
/// caller left unset.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Tensor(TensorValue),
    Tuple(Vec<Value>),
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Ints(Vec<i64>),
    None,
}

impl Value {
    pub fn tensor(shape: Vec<i64>, dtype: DType) -> Self {
        Value::Tensor(TensorValue::new(shape, dtype))
    }

    pub fn as_tensor(&self) -> Option<&TensorValue> {
        match self {
            Value::Tensor(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_ints(&self) -> Option<&[i64]> {
        match self {
            Value::Ints(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Short tag used in schema error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Tensor(_) => "tensor",
            Value::Tuple(_) => "tuple",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Str(_) => "str",
            Value::Ints(_) => "int tuple",
            Value::None => "none",
        }
    }
}
