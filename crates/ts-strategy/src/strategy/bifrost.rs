//! Mali Bifrost GPU strategies.

use ts_ir::{Target, TensorDesc};

use super::{unsupported, unsupported_groups, unsupported_layout, untuned};
use crate::attribute_set::{AttributeSet, Conv2dAttrs};
use crate::compute;
use crate::error::Result;
use crate::implementation::{ImplementationRecord, DEFAULT_PLEVEL};
use crate::layout::Layout;
use crate::op::OpKind;
use crate::registry::RegistryBuilder;

pub const BIFROST_KEY: &str = "bifrost";

/// Priority of the Winograd implementation over spatial packing.
pub const WINOGRAD_PLEVEL: i32 = 15;

pub fn register(builder: RegistryBuilder) -> RegistryBuilder {
    builder
        .register(OpKind::Conv2d, BIFROST_KEY, conv2d_strategy)
        .register(
            OpKind::Conv2dWinogradWithoutWeightTransform,
            BIFROST_KEY,
            conv2d_winograd_without_weight_transform_strategy,
        )
        .register(OpKind::Dense, BIFROST_KEY, dense_strategy)
}

fn winograd_applicable(conv: &Conv2dAttrs) -> bool {
    conv.kernel_size == [3, 3] && conv.strides == [1, 1] && conv.dilation == [1, 1]
}

fn require_oihw(conv: &Conv2dAttrs, target: &Target) -> Result<()> {
    if conv.kernel_layout != Layout::Oihw {
        return Err(unsupported_layout(
            "conv2d",
            format!("{}/{}", conv.data_layout, conv.kernel_layout),
            target,
        ));
    }
    Ok(())
}

/// `NCHW` only. Plain convolutions get spatial packing, plus Winograd at a
/// higher priority for unit-stride 3x3 kernels. Depthwise is supported,
/// other grouped convolutions are not.
pub fn conv2d_strategy(
    attrs: &AttributeSet,
    _inputs: &[TensorDesc],
    target: &Target,
) -> Result<Vec<ImplementationRecord>> {
    let conv = attrs.as_conv2d()?;
    if conv.groups == 1 {
        if conv.data_layout != Layout::Nchw {
            return Err(unsupported_layout("conv2d", &conv.data_layout, target));
        }
        require_oihw(conv, target)?;
        let mut records = vec![untuned(
            "conv2d_nchw_spatial_pack.bifrost",
            DEFAULT_PLEVEL,
            compute::conv2d,
        )];
        if winograd_applicable(conv) {
            records.push(untuned(
                "conv2d_nchw_winograd.bifrost",
                WINOGRAD_PLEVEL,
                compute::conv2d_winograd,
            ));
        }
        Ok(records)
    } else if conv.is_depthwise() {
        if conv.data_layout != Layout::Nchw {
            return Err(unsupported_layout("depthwise_conv2d", &conv.data_layout, target));
        }
        require_oihw(conv, target)?;
        Ok(vec![untuned(
            "depthwise_conv2d_nchw.bifrost",
            DEFAULT_PLEVEL,
            compute::conv2d,
        )])
    } else {
        Err(unsupported_groups("conv2d", conv.groups, target))
    }
}

pub fn conv2d_winograd_without_weight_transform_strategy(
    attrs: &AttributeSet,
    _inputs: &[TensorDesc],
    target: &Target,
) -> Result<Vec<ImplementationRecord>> {
    let op = "conv2d_winograd_without_weight_transform";
    let conv = attrs.as_conv2d()?;
    if conv.dilation != [1, 1] {
        return Err(unsupported(op, target, "dilation is not supported"));
    }
    if conv.groups != 1 {
        return Err(unsupported_groups(op, conv.groups, target));
    }
    if conv.data_layout != Layout::Nchw {
        return Err(unsupported_layout(op, &conv.data_layout, target));
    }
    if !winograd_applicable(conv) {
        return Err(unsupported(op, target, "needs a 3x3 kernel with unit stride"));
    }
    Ok(vec![untuned(
        "conv2d_nchw_winograd.bifrost",
        DEFAULT_PLEVEL,
        compute::conv2d_winograd_pretransformed,
    )])
}

pub fn dense_strategy(
    _attrs: &AttributeSet,
    _inputs: &[TensorDesc],
    _target: &Target,
) -> Result<Vec<ImplementationRecord>> {
    Ok(vec![untuned("dense.bifrost", DEFAULT_PLEVEL, compute::dense)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::Attrs;
    use crate::error::StrategyError;
    use ts_ir::DType;

    fn conv(kernel: Vec<usize>, attrs: Attrs) -> Result<Vec<ImplementationRecord>> {
        let inputs = vec![
            TensorDesc::new("data", vec![1, 16, 14, 14], DType::Float32),
            TensorDesc::new("kernel", kernel, DType::Float32),
        ];
        let set = AttributeSet::normalize(OpKind::Conv2d, &attrs, &inputs)?;
        conv2d_strategy(&set, &inputs, &Target::parse("opencl -device=bifrost").unwrap())
    }

    #[test]
    fn test_winograd_only_for_unit_stride_3x3() {
        assert_eq!(conv(vec![32, 16, 3, 3], Attrs::new()).unwrap().len(), 2);
        assert_eq!(conv(vec![32, 16, 3, 3], Attrs::new().with("strides", 2i64)).unwrap().len(), 1);
        assert_eq!(conv(vec![32, 16, 5, 5], Attrs::new()).unwrap().len(), 1);
    }

    #[test]
    fn test_kernel_layout_must_be_oihw() {
        let err = conv(vec![3, 3, 16, 32], Attrs::new().with("kernel_layout", "HWIO")).unwrap_err();
        assert!(matches!(err, StrategyError::UnsupportedLayout { .. }));
    }

    #[test]
    fn test_depthwise_supported() {
        let r = conv(vec![16, 1, 3, 3], Attrs::new().with("groups", 16i64)).unwrap();
        assert_eq!(r[0].name(), "depthwise_conv2d_nchw.bifrost");
    }

    #[test]
    fn test_pretransformed_winograd() {
        let inputs = vec![
            TensorDesc::new("data", vec![1, 16, 14, 14], DType::Float32),
            TensorDesc::new("kernel", vec![4, 4, 16, 32], DType::Float32),
        ];
        let target = Target::parse("opencl -device=bifrost").unwrap();
        let attrs = Attrs::new().with("kernel_size", [3i64, 3]).with("padding", 1i64);
        let op = OpKind::Conv2dWinogradWithoutWeightTransform;
        let set = AttributeSet::normalize(op, &attrs, &inputs).unwrap();
        let r = conv2d_winograd_without_weight_transform_strategy(&set, &inputs, &target).unwrap();
        assert_eq!(r[0].name(), "conv2d_nchw_winograd.bifrost");

        let attrs = attrs.with("dilation", 2i64);
        let set = AttributeSet::normalize(op, &attrs, &inputs).unwrap();
        let err = conv2d_winograd_without_weight_transform_strategy(&set, &inputs, &target).unwrap_err();
        assert!(err.is_unsupported_configuration());
    }
}
