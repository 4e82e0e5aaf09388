use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::IrError;

/// Element types an operator can be instantiated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Float16,
    Float32,
    Float64,
    Int8,
    UInt8,
    Int16,
    Int32,
    Int64,
    UInt32,
}

impl DType {
    /// Width of one element in bits.
    pub fn bits(&self) -> usize {
        match self {
            DType::Int8 | DType::UInt8 => 8,
            DType::Float16 | DType::Int16 => 16,
            DType::Float32 | DType::Int32 | DType::UInt32 => 32,
            DType::Float64 | DType::Int64 => 64,
        }
    }

    /// Width of one element in bytes.
    pub fn size_in_bytes(&self) -> usize {
        self.bits() / 8
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::Float16 | DType::Float32 | DType::Float64)
    }

    /// The canonical lowercase name (`"float32"`, `"int8"`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            DType::Float16 => "float16",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
            DType::Int8 => "int8",
            DType::UInt8 => "uint8",
            DType::Int16 => "int16",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::UInt32 => "uint32",
        }
    }
}

impl FromStr for DType {
    type Err = IrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "float16" => Ok(DType::Float16),
            "float32" => Ok(DType::Float32),
            "float64" => Ok(DType::Float64),
            "int8" => Ok(DType::Int8),
            "uint8" => Ok(DType::UInt8),
            "int16" => Ok(DType::Int16),
            "int32" => Ok(DType::Int32),
            "int64" => Ok(DType::Int64),
            "uint32" => Ok(DType::UInt32),
            other => Err(IrError::UnknownDType(other.to_string())),
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_and_bytes() {
        assert_eq!(DType::Float32.bits(), 32);
        assert_eq!(DType::Float16.size_in_bytes(), 2);
        assert_eq!(DType::Int8.size_in_bytes(), 1);
        assert_eq!(DType::Int64.size_in_bytes(), 8);
    }

    #[test]
    fn test_parse_names() {
        for dtype in [DType::Float32, DType::Int8, DType::UInt8, DType::Int32] {
            assert_eq!(dtype.as_str().parse::<DType>().unwrap(), dtype);
        }
    }

    #[test]
    fn test_parse_unknown() {
        assert_eq!(
            "bfloat7".parse::<DType>(),
            Err(IrError::UnknownDType("bfloat7".to_string()))
        );
    }

    #[test]
    fn test_is_float() {
        assert!(DType::Float16.is_float());
        assert!(!DType::Int32.is_float());
    }
}
