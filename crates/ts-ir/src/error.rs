use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IrError {
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: String, got: String },
    #[error("invalid axis {axis} for tensor with {ndim} dimensions")]
    InvalidAxis { axis: usize, ndim: usize },
    #[error("dimension {axis} of '{tensor}' is symbolic where a known extent is required")]
    SymbolicExtent { tensor: String, axis: usize },
    #[error("unknown dtype: {0}")]
    UnknownDType(String),
    #[error("unknown target: {0}")]
    UnknownTarget(String),
    #[error("invalid target option '{option}': {reason}")]
    InvalidTargetOption { option: String, reason: String },
    #[error("op '{op}' reads '{input}', which is neither a placeholder nor an earlier op")]
    DanglingInput { op: String, input: String },
    #[error("duplicate tensor name: {0}")]
    DuplicateName(String),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, IrError>;
