//! CPU strategies with tunable x86 templates.

use ts_ir::{Target, TensorDesc};
use ts_schedule::template::{
    conv2d_nchwc, dense_nopack, dense_pack, schedule_conv_nchwc, schedule_dense_nopack, schedule_dense_pack,
    Conv2dWorkload, ConvOutputLayout,
};
use ts_schedule::{ComputeOutput, TuningContext};

use super::{generic, untuned};
use crate::attribute_set::AttributeSet;
use crate::compute;
use crate::error::{Result, StrategyError};
use crate::implementation::{ImplementationRecord, DEFAULT_PLEVEL};
use crate::layout::Layout;
use crate::op::OpKind;
use crate::registry::RegistryBuilder;

pub const CPU_KEY: &str = "cpu";

/// Smallest static batch for which packing the weight pays off.
pub const DENSE_PACK_MIN_BATCH: usize = 16;
/// Packed dense ranks below the unpacked template.
pub const DENSE_PACK_PLEVEL: i32 = 5;
/// A linked BLAS library outranks both dense templates.
pub const CBLAS_PLEVEL: i32 = 15;

pub fn register(builder: RegistryBuilder) -> RegistryBuilder {
    builder
        .register(OpKind::Dense, CPU_KEY, dense_strategy)
        .register(OpKind::Conv2d, CPU_KEY, conv2d_strategy)
}

fn dense_nopack_compute(inputs: &[TensorDesc], attrs: &AttributeSet, ctx: &TuningContext) -> Result<ComputeOutput> {
    Ok(dense_nopack(inputs, attrs.as_dense()?.out_dtype, ctx)?)
}

fn dense_pack_compute(inputs: &[TensorDesc], attrs: &AttributeSet, ctx: &TuningContext) -> Result<ComputeOutput> {
    Ok(dense_pack(inputs, attrs.as_dense()?.out_dtype, ctx)?)
}

/// Unpacked dense always; packed dense for large static batches; an
/// external BLAS call when the target links one.
pub fn dense_strategy(
    _attrs: &AttributeSet,
    inputs: &[TensorDesc],
    target: &Target,
) -> Result<Vec<ImplementationRecord>> {
    let mut records = vec![ImplementationRecord::new(
        "dense_nopack.x86",
        DEFAULT_PLEVEL,
        dense_nopack_compute,
        |_: &Target, out: &ComputeOutput| Ok(schedule_dense_nopack(out)?),
    )];

    let batch = inputs.first().and_then(|t| t.shape().dims().first()).and_then(|d| d.known());
    if batch.is_some_and(|m| m >= DENSE_PACK_MIN_BATCH) {
        records.push(ImplementationRecord::new(
            "dense_pack.x86",
            DENSE_PACK_PLEVEL,
            dense_pack_compute,
            |_: &Target, out: &ComputeOutput| Ok(schedule_dense_pack(out)?),
        ));
    }
    if target.libs().contains(&"cblas") {
        records.push(untuned("dense_cblas.x86", CBLAS_PLEVEL, compute::dense_extern));
    }
    Ok(records)
}

fn conv2d_nchwc_compute(inputs: &[TensorDesc], attrs: &AttributeSet, ctx: &TuningContext) -> Result<ComputeOutput> {
    let conv = attrs.as_conv2d()?;
    let (data, kernel) = match inputs {
        [data, kernel, ..] => (data, kernel),
        _ => return Err(StrategyError::invalid("inputs", "expected data and kernel")),
    };
    let wkl = Conv2dWorkload::from_nchw(data, kernel, conv.strides, conv.padding, conv.dilation)?;
    Ok(conv2d_nchwc(inputs, &wkl, ConvOutputLayout::Nchw, conv.out_dtype, ctx)?)
}

/// Channel-blocked convolution for plain `NCHW`/`OIHW`; every other
/// layout and group count is served as on the generic path.
pub fn conv2d_strategy(
    attrs: &AttributeSet,
    inputs: &[TensorDesc],
    target: &Target,
) -> Result<Vec<ImplementationRecord>> {
    let conv = attrs.as_conv2d()?;
    if conv.groups == 1 && conv.data_layout == Layout::Nchw && conv.kernel_layout == Layout::Oihw {
        return Ok(vec![ImplementationRecord::new(
            "conv2d_NCHWc.x86",
            DEFAULT_PLEVEL,
            conv2d_nchwc_compute,
            |_: &Target, out: &ComputeOutput| Ok(schedule_conv_nchwc(out)?),
        )]);
    }
    generic::conv2d_strategy(attrs, inputs, target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::Attrs;
    use ts_ir::{DType, DimExtent};

    fn dense_inputs(batch: DimExtent) -> Vec<TensorDesc> {
        vec![
            TensorDesc::new("data", vec![batch, DimExtent::Known(64)], DType::Float32),
            TensorDesc::new("weight", vec![32, 64], DType::Float32),
        ]
    }

    fn names(records: &[ImplementationRecord]) -> Vec<&str> {
        records.iter().map(|r| r.name()).collect()
    }

    #[test]
    fn test_dense_candidates() {
        let target = Target::parse("llvm").unwrap();
        let small = dense_inputs(DimExtent::Known(4));
        let set = AttributeSet::normalize(OpKind::Dense, &Attrs::new(), &small).unwrap();
        assert_eq!(names(&dense_strategy(&set, &small, &target).unwrap()), vec!["dense_nopack.x86"]);

        let large = dense_inputs(DimExtent::Known(16));
        let r = dense_strategy(&set, &large, &target).unwrap();
        assert_eq!(names(&r), vec!["dense_nopack.x86", "dense_pack.x86"]);

        let symbolic = dense_inputs(DimExtent::Symbolic);
        assert_eq!(dense_strategy(&set, &symbolic, &target).unwrap().len(), 1);

        let blas = Target::parse("llvm -libs=cblas").unwrap();
        let r = dense_strategy(&set, &large, &blas).unwrap();
        assert_eq!(r.iter().map(|r| r.plevel()).max(), Some(CBLAS_PLEVEL));
    }

    #[test]
    fn test_conv2d_delegates_other_layouts() {
        let target = Target::parse("llvm").unwrap();
        let inputs = vec![
            TensorDesc::new("data", vec![1, 8, 8, 16], DType::Float32),
            TensorDesc::new("kernel", vec![3, 3, 16, 8], DType::Float32),
        ];
        let attrs = Attrs::new().with("data_layout", "NHWC").with("kernel_layout", "HWIO");
        let set = AttributeSet::normalize(OpKind::Conv2d, &attrs, &inputs).unwrap();
        assert_eq!(names(&conv2d_strategy(&set, &inputs, &target).unwrap()), vec!["conv2d_nhwc.generic"]);

        let inputs = vec![
            TensorDesc::new("data", vec![1, 16, 8, 8], DType::Float32),
            TensorDesc::new("kernel", vec![8, 16, 3, 3], DType::Float32),
        ];
        let set = AttributeSet::normalize(OpKind::Conv2d, &Attrs::new(), &inputs).unwrap();
        assert_eq!(names(&conv2d_strategy(&set, &inputs, &target).unwrap()), vec!["conv2d_NCHWc.x86"]);
    }
}
