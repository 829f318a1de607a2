use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Represents all possible column types. Every column is stored with a fixed byte length,
/// for [`Type::String`] that length is chosen by the table definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Int,
    BigInt,
    Float,
    String,
}

/// Error returned when parsing a type name fails.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown column type: '{0}'")]
pub struct UnknownTypeError(pub String);

impl Type {
    /// Returns the on-disk size of the type if it is the same for every column of this type.
    /// `None` means that the length has to be declared per column.
    pub fn fixed_len(&self) -> Option<usize> {
        match self {
            Type::Int => Some(size_of::<i32>()),
            Type::BigInt => Some(size_of::<i64>()),
            Type::Float => Some(size_of::<f64>()),
            Type::String => None,
        }
    }

    /// Returns `true` if a column of this type can be declared with `len` bytes.
    pub fn accepts_len(&self, len: usize) -> bool {
        match self.fixed_len() {
            Some(fixed) => fixed == len,
            None => len > 0,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "INT"),
            Type::BigInt => write!(f, "BIGINT"),
            Type::Float => write!(f, "FLOAT"),
            Type::String => write!(f, "STRING"),
        }
    }
}

impl FromStr for Type {
    type Err = UnknownTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INT" | "INTEGER" => Ok(Type::Int),
            "BIGINT" => Ok(Type::BigInt),
            "FLOAT" => Ok(Type::Float),
            "STRING" | "CHAR" => Ok(Type::String),
            _ => Err(UnknownTypeError(s.into())),
        }
    }
}
