use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{IrError, Result};

/// Stand-in size used by sizing heuristics when a dimension is symbolic.
///
/// Only heuristics may look at this value. Anything that needs the real
/// runtime extent must keep treating the dimension as [`DimExtent::Symbolic`].
pub const SYMBOLIC_CANONICAL_EXTENT: usize = 16;

/// Extent of one loop or tensor dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DimExtent {
    /// A compile-time constant extent.
    Known(usize),
    /// An extent only known at runtime (e.g. a dynamic batch).
    Symbolic,
}

impl DimExtent {
    /// Returns the constant extent, if there is one.
    pub fn known(&self) -> Option<usize> {
        match self {
            DimExtent::Known(n) => Some(*n),
            DimExtent::Symbolic => None,
        }
    }

    pub fn is_symbolic(&self) -> bool {
        matches!(self, DimExtent::Symbolic)
    }

    /// The size heuristics should plan for.
    ///
    /// Known extents are returned as-is; symbolic extents are replaced by
    /// [`SYMBOLIC_CANONICAL_EXTENT`].
    pub fn heuristic_size(&self) -> usize {
        match self {
            DimExtent::Known(n) => *n,
            DimExtent::Symbolic => SYMBOLIC_CANONICAL_EXTENT,
        }
    }

    /// Product of two extents. A symbolic operand makes the result symbolic;
    /// `None` when two known extents overflow `usize`.
    pub fn checked_mul(self, other: DimExtent) -> Option<DimExtent> {
        match (self, other) {
            (DimExtent::Known(a), DimExtent::Known(b)) => a.checked_mul(b).map(DimExtent::Known),
            _ => Some(DimExtent::Symbolic),
        }
    }

    /// Exact division. Returns `None` when a known extent is not a multiple
    /// of `factor` or `factor` is zero.
    pub fn div_exact(self, factor: usize) -> Option<DimExtent> {
        if factor == 0 {
            return None;
        }
        match self {
            DimExtent::Known(n) if n % factor == 0 => Some(DimExtent::Known(n / factor)),
            DimExtent::Known(_) => None,
            DimExtent::Symbolic => Some(DimExtent::Symbolic),
        }
    }
}

impl From<usize> for DimExtent {
    fn from(n: usize) -> Self {
        DimExtent::Known(n)
    }
}

impl fmt::Display for DimExtent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimExtent::Known(n) => write!(f, "{}", n),
            DimExtent::Symbolic => write!(f, "?"),
        }
    }
}

/// A tensor shape whose dimensions may be symbolic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    dims: Vec<DimExtent>,
}

impl Shape {
    pub fn new(dims: Vec<DimExtent>) -> Self {
        Shape { dims }
    }

    /// Create a fully static shape.
    pub fn from_known(dims: &[usize]) -> Self {
        Shape {
            dims: dims.iter().map(|&d| DimExtent::Known(d)).collect(),
        }
    }

    /// Number of dimensions (rank).
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Returns the extent of dimension `i`.
    ///
    /// # Panics
    /// Panics if `i >= ndim()`.
    pub fn dim(&self, i: usize) -> DimExtent {
        self.dims[i]
    }

    /// Checked variant of [`Shape::dim`].
    pub fn try_dim(&self, i: usize) -> Result<DimExtent> {
        self.dims.get(i).copied().ok_or(IrError::InvalidAxis {
            axis: i,
            ndim: self.dims.len(),
        })
    }

    pub fn dims(&self) -> &[DimExtent] {
        &self.dims
    }

    /// True when every dimension is known.
    pub fn is_static(&self) -> bool {
        self.dims.iter().all(|d| !d.is_symbolic())
    }

    /// Total element count, or `None` for a shape with symbolic dimensions
    /// or one whose element count overflows `usize`.
    pub fn numel(&self) -> Option<usize> {
        self.dims
            .iter()
            .try_fold(1usize, |acc, d| d.known().and_then(|n| acc.checked_mul(n)))
    }

    /// All dimensions as constants.
    ///
    /// # Errors
    /// Returns [`IrError::SymbolicExtent`] naming the first symbolic axis.
    pub fn known_dims(&self, tensor: &str) -> Result<Vec<usize>> {
        self.dims
            .iter()
            .enumerate()
            .map(|(axis, d)| {
                d.known().ok_or_else(|| IrError::SymbolicExtent {
                    tensor: tensor.to_string(),
                    axis,
                })
            })
            .collect()
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape::from_known(&dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::from_known(dims)
    }
}

impl From<Vec<DimExtent>> for Shape {
    fn from(dims: Vec<DimExtent>) -> Self {
        Shape::new(dims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_shape() {
        let s = Shape::from_known(&[2, 3, 4]);
        assert_eq!(s.ndim(), 3);
        assert_eq!(s.numel(), Some(24));
        assert_eq!(s.dim(1), DimExtent::Known(3));
        assert!(s.is_static());
        assert_eq!(Shape::from_known(&[usize::MAX, 2]).numel(), None);
    }

    #[test]
    fn test_symbolic_shape() {
        let s = Shape::new(vec![DimExtent::Symbolic, DimExtent::Known(8)]);
        assert!(!s.is_static());
        assert_eq!(s.numel(), None);
        assert_eq!(s.to_string(), "[?, 8]");
        assert_eq!(
            s.known_dims("x"),
            Err(IrError::SymbolicExtent {
                tensor: "x".to_string(),
                axis: 0
            })
        );
    }

    #[test]
    fn test_heuristic_size() {
        assert_eq!(DimExtent::Known(33).heuristic_size(), 33);
        assert_eq!(DimExtent::Symbolic.heuristic_size(), SYMBOLIC_CANONICAL_EXTENT);
        // Canonicalization is a sizing hint, never a known extent.
        assert_eq!(DimExtent::Symbolic.known(), None);
    }

    #[test]
    fn test_mul_and_div() {
        assert_eq!(DimExtent::Known(4).checked_mul(DimExtent::Known(8)), Some(DimExtent::Known(32)));
        assert_eq!(DimExtent::Known(4).checked_mul(DimExtent::Symbolic), Some(DimExtent::Symbolic));
        assert_eq!(DimExtent::Known(usize::MAX).checked_mul(DimExtent::Known(2)), None);
        assert_eq!(DimExtent::Known(32).div_exact(8), Some(DimExtent::Known(4)));
        assert_eq!(DimExtent::Known(33).div_exact(8), None);
        assert_eq!(DimExtent::Symbolic.div_exact(8), Some(DimExtent::Symbolic));
        assert_eq!(DimExtent::Known(8).div_exact(0), None);
    }

    #[test]
    fn test_try_dim_out_of_range() {
        let s = Shape::from_known(&[1]);
        assert_eq!(s.try_dim(3), Err(IrError::InvalidAxis { axis: 3, ndim: 1 }));
    }
}
