use std::fmt;

use crate::dtype::DType;
use crate::shape::Shape;

/// Shape and dtype of a tensor flowing into an operator.
///
/// Carries no data. The graph layer hands these to strategy resolution so
/// builders can inspect input shapes (kernel size, channel counts, batch).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorDesc {
    name: String,
    shape: Shape,
    dtype: DType,
}

impl TensorDesc {
    pub fn new(name: impl Into<String>, shape: impl Into<Shape>, dtype: DType) -> Self {
        TensorDesc {
            name: name.into(),
            shape: shape.into(),
            dtype,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }
}

impl fmt::Display for TensorDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}{}", self.name, self.dtype, self.shape)
    }
}
