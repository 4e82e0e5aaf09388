//! `ts-ir` - IR-side inputs of the tensor scheduler.
//!
//! This crate provides:
//! - `DType` and the `DimExtent` sum type for known/symbolic dimensions
//! - `Shape` and `TensorDesc` input descriptors
//! - A scheduling-level view of tensor expressions (`ComputeGraph`)
//! - `Target` identifiers with their specialization chain

pub mod compute;
pub mod dtype;
pub mod error;
pub mod shape;
pub mod target;
pub mod tensor;

pub use compute::{Axis, AxisKind, ComputeGraph, ComputeOp};
pub use dtype::DType;
pub use error::{IrError, Result};
pub use shape::{DimExtent, Shape, SYMBOLIC_CANONICAL_EXTENT};
pub use target::{Target, TargetKind};
pub use tensor::TensorDesc;
