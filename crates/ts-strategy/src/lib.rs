//! `ts-strategy` - Per-target operator strategy dispatch.
//!
//! This crate provides:
//! - Raw operator attributes (`Attrs`) and their validated, typed form (`AttributeSet`)
//! - `ImplementationRecord`s pairing compute and schedule builders with a priority
//! - `OpStrategy`, the ordered candidate set for one operator instance
//! - The immutable `StrategyRegistry` resolving `(operator, target)` to a strategy
//! - Built-in strategies for generic, x86, Mali Bifrost, HLS and OpenGL targets

pub mod attribute_set;
pub mod attrs;
pub mod compute;
pub mod error;
pub mod implementation;
pub mod layout;
pub mod op;
pub mod registry;
pub mod strategy;

pub use attribute_set::{
    AttributeSet, BatchMatmulAttrs, Conv2dAttrs, Conv2dTransposeAttrs, Conv3dAttrs, DenseAttrs, SoftmaxAttrs,
};
pub use attrs::{AttrValue, Attrs};
pub use error::{Result, StrategyError};
pub use implementation::{
    BuiltImplementation, ComputeFn, ImplementationRecord, OpStrategy, ScheduleFn, DEFAULT_PLEVEL,
};
pub use layout::Layout;
pub use op::OpKind;
pub use registry::{default_registry, RegistryBuilder, StrategyFn, StrategyRegistry, GENERIC_KEY};
