use std::collections::HashSet;

use crate::dtype::DType;
use crate::error::{IrError, Result};
use crate::shape::{DimExtent, Shape};
use crate::tensor::TensorDesc;

/// Whether an iteration axis produces output elements or is summed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisKind {
    Spatial,
    Reduce,
}

/// One iteration axis of a compute op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Axis {
    pub name: String,
    pub extent: DimExtent,
    pub kind: AxisKind,
}

impl Axis {
    pub fn spatial(name: impl Into<String>, extent: DimExtent) -> Self {
        Axis {
            name: name.into(),
            extent,
            kind: AxisKind::Spatial,
        }
    }

    pub fn reduce(name: impl Into<String>, extent: DimExtent) -> Self {
        Axis {
            name: name.into(),
            extent,
            kind: AxisKind::Reduce,
        }
    }
}

/// A single tensor-expression node as far as scheduling is concerned: its
/// iteration domain, what it reads, and a tag templates use to find it.
///
/// The arithmetic body lives in the external expression language and is not
/// represented here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeOp {
    pub name: String,
    pub tag: String,
    pub axes: Vec<Axis>,
    pub reduce_axes: Vec<Axis>,
    pub inputs: Vec<String>,
    pub dtype: DType,
}

impl ComputeOp {
    /// Create an op over `shape`, naming its spatial axes `ax0`, `ax1`, ...
    pub fn new(name: impl Into<String>, tag: impl Into<String>, shape: &Shape, dtype: DType) -> Self {
        let axes = shape
            .dims()
            .iter()
            .enumerate()
            .map(|(i, &d)| Axis::spatial(format!("ax{}", i), d))
            .collect();
        ComputeOp {
            name: name.into(),
            tag: tag.into(),
            axes,
            reduce_axes: Vec::new(),
            inputs: Vec::new(),
            dtype,
        }
    }

    /// Rename the spatial axes. Extra names are ignored.
    pub fn with_axis_names(mut self, names: &[&str]) -> Self {
        for (axis, name) in self.axes.iter_mut().zip(names) {
            axis.name = name.to_string();
        }
        self
    }

    pub fn with_reduce_axis(mut self, name: impl Into<String>, extent: DimExtent) -> Self {
        self.reduce_axes.push(Axis::reduce(name, extent));
        self
    }

    pub fn reads(mut self, input: impl Into<String>) -> Self {
        self.inputs.push(input.into());
        self
    }

    /// Shape of the tensor this op produces.
    pub fn output_shape(&self) -> Shape {
        Shape::new(self.axes.iter().map(|a| a.extent).collect())
    }

    pub fn output(&self) -> TensorDesc {
        TensorDesc::new(self.name.clone(), self.output_shape(), self.dtype)
    }
}

/// A topologically ordered set of compute ops over named placeholders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComputeGraph {
    placeholders: Vec<TensorDesc>,
    ops: Vec<ComputeOp>,
    outputs: Vec<String>,
}

impl ComputeGraph {
    pub fn new(placeholders: Vec<TensorDesc>) -> Self {
        ComputeGraph {
            placeholders,
            ops: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Append an op. Every input must already be defined, which keeps the
    /// op list in producer-before-consumer order. The newest op becomes the
    /// graph output unless outputs are set explicitly.
    pub fn push(&mut self, op: ComputeOp) -> Result<()> {
        if self.contains(&op.name) {
            return Err(IrError::DuplicateName(op.name));
        }
        for input in &op.inputs {
            if !self.contains(input) {
                return Err(IrError::DanglingInput {
                    op: op.name.clone(),
                    input: input.clone(),
                });
            }
        }
        self.outputs = vec![op.name.clone()];
        self.ops.push(op);
        Ok(())
    }

    /// Builder-style [`ComputeGraph::push`].
    pub fn with_op(mut self, op: ComputeOp) -> Result<Self> {
        self.push(op)?;
        Ok(self)
    }

    pub fn set_outputs(&mut self, outputs: Vec<String>) -> Result<()> {
        for name in &outputs {
            if self.op(name).is_none() {
                return Err(IrError::Other(format!("output '{}' is not a compute op", name)));
            }
        }
        self.outputs = outputs;
        Ok(())
    }

    fn contains(&self, name: &str) -> bool {
        self.placeholders.iter().any(|p| p.name() == name) || self.op(name).is_some()
    }

    pub fn placeholders(&self) -> &[TensorDesc] {
        &self.placeholders
    }

    pub fn ops(&self) -> &[ComputeOp] {
        &self.ops
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    pub fn op(&self, name: &str) -> Option<&ComputeOp> {
        self.ops.iter().find(|op| op.name == name)
    }

    /// First op whose tag equals `tag`.
    pub fn find_by_tag(&self, tag: &str) -> Option<&ComputeOp> {
        self.ops.iter().find(|op| op.tag == tag)
    }

    /// Ops that read `name`.
    pub fn consumers(&self, name: &str) -> Vec<&ComputeOp> {
        self.ops
            .iter()
            .filter(|op| op.inputs.iter().any(|i| i == name))
            .collect()
    }

    /// Names of ops that feed `name`, skipping placeholders.
    pub fn op_inputs(&self, name: &str) -> Vec<&str> {
        let ops: HashSet<&str> = self.ops.iter().map(|op| op.name.as_str()).collect();
        self.op(name)
            .map(|op| {
                op.inputs
                    .iter()
                    .map(String::as_str)
                    .filter(|i| ops.contains(i))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matmul_graph() -> ComputeGraph {
        let a = TensorDesc::new("a", vec![4, 8], DType::Float32);
        let b = TensorDesc::new("b", vec![8, 2], DType::Float32);
        let mut g = ComputeGraph::new(vec![a, b]);
        let op = ComputeOp::new("c", "matmul", &Shape::from_known(&[4, 2]), DType::Float32)
            .with_axis_names(&["y", "x"])
            .with_reduce_axis("k", DimExtent::Known(8))
            .reads("a")
            .reads("b");
        g.push(op).unwrap();
        g
    }

    #[test]
    fn test_push_and_lookup() {
        let g = matmul_graph();
        let c = g.find_by_tag("matmul").unwrap();
        assert_eq!(c.name, "c");
        assert_eq!(c.axes[0].name, "y");
        assert_eq!(c.reduce_axes[0].kind, AxisKind::Reduce);
        assert_eq!(c.output_shape(), Shape::from_known(&[4, 2]));
        assert_eq!(g.outputs(), &["c".to_string()]);
    }

    #[test]
    fn test_dangling_input_rejected() {
        let mut g = matmul_graph();
        let op = ComputeOp::new("d", "relu", &Shape::from_known(&[4, 2]), DType::Float32).reads("e");
        assert!(matches!(g.push(op), Err(IrError::DanglingInput { .. })));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut g = matmul_graph();
        let op = ComputeOp::new("a", "copy", &Shape::from_known(&[4, 8]), DType::Float32);
        assert_eq!(g.push(op), Err(IrError::DuplicateName("a".to_string())));
    }

    #[test]
    fn test_consumers_and_op_inputs() {
        let mut g = matmul_graph();
        let relu = ComputeOp::new("d", "relu", &Shape::from_known(&[4, 2]), DType::Float32).reads("c");
        g.push(relu).unwrap();
        assert_eq!(g.consumers("c").len(), 1);
        assert_eq!(g.op_inputs("d"), vec!["c"]);
        assert!(g.op_inputs("c").is_empty());
        assert_eq!(g.outputs(), &["d".to_string()]);
    }
}
