//! Tensor types and element dtypes.

use std::fmt;

use crate::error::{Error, Result};

/// Element data type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F16,
    F32,
    F64,
    I32,
    I64,
    U8,
    Bool,
}

impl DType {
    /// Canonical lowercase name, as accepted by [`DType::parse`].
    pub fn as_str(self) -> &'static str {
        match self {
            DType::F16 => "float16",
            DType::F32 => "float32",
            DType::F64 => "float64",
            DType::I32 => "int32",
            DType::I64 => "int64",
            DType::U8 => "uint8",
            DType::Bool => "bool",
        }
    }

    /// Parses a dtype name such as `"float32"`. The `op` name is only used
    /// for the error message.
    pub fn parse(s: &str, op: &str) -> Result<DType> {
        match s {
            "float16" => Ok(DType::F16),
            "float32" => Ok(DType::F32),
            "float64" => Ok(DType::F64),
            "int32" => Ok(DType::I32),
            "int64" => Ok(DType::I64),
            "uint8" => Ok(DType::U8),
            "bool" => Ok(DType::Bool),
            _ => Err(Error::schema(op, format!("unknown dtype `{s}`"))),
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::F16 | DType::F32 | DType::F64)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape and dtype of a single tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorType {
    pub shape: Vec<i64>,
    pub dtype: DType,
}

impl TensorType {
    pub fn new(shape: Vec<i64>, dtype: DType) -> Self {
        Self { shape, dtype }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Total number of elements.
    pub fn numel(&self) -> i64 {
        self.shape.iter().product()
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor[(")?;
        for (i, d) in self.shape.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "), {}]", self.dtype)
    }
}

/// Inferred type of an operator call result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Tensor(TensorType),
    Tuple(Vec<Type>),
}

impl Type {
    pub fn tensor(shape: Vec<i64>, dtype: DType) -> Self {
        Type::Tensor(TensorType::new(shape, dtype))
    }

    pub fn as_tensor(&self) -> Option<&TensorType> {
        match self {
            Type::Tensor(t) => Some(t),
            Type::Tuple(_) => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Tensor(t) => t.fmt(f),
            Type::Tuple(fields) => {
                write!(f, "(")?;
                for (i, t) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    t.fmt(f)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Numpy-style broadcast of two shapes, aligned from the trailing dimension.
pub fn broadcast_shapes(op: &str, lhs: &[i64], rhs: &[i64]) -> Result<Vec<i64>> {
    let rank = lhs.len().max(rhs.len());
    let mut out = Vec::with_capacity(rank);
    for i in 0..rank {
        let a = lhs.len().checked_sub(rank - i).map_or(1, |j| lhs[j]);
        let b = rhs.len().checked_sub(rank - i).map_or(1, |j| rhs[j]);
        if a == b || b == 1 {
            out.push(a);
        } else if a == 1 {
            out.push(b);
        } else {
            return Err(Error::type_error(
                op,
                format!("cannot broadcast shapes {lhs:?} and {rhs:?}"),
            ));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_parse_roundtrip() {
        for d in [DType::F32, DType::I64, DType::Bool] {
            assert_eq!(DType::parse(d.as_str(), "cast").unwrap(), d);
        }
        assert!(DType::parse("complex128", "cast").is_err());
    }

    #[test]
    fn test_broadcast() {
        assert_eq!(
            broadcast_shapes("add", &[4, 1, 3], &[2, 1]).unwrap(),
            vec![4, 2, 3]
        );
        assert_eq!(broadcast_shapes("add", &[], &[5]).unwrap(), vec![5]);
        assert!(broadcast_shapes("add", &[2, 3], &[4, 3]).is_err());
    }

    #[test]
    fn test_type_display() {
        let t = Type::tensor(vec![2, 3], DType::F32);
        assert_eq!(t.to_string(), "Tensor[(2, 3), float32]");
    }
}
