//! FPGA strategies through high-level synthesis.

use ts_ir::{Target, TensorDesc};

use super::{generic, untuned};
use crate::attribute_set::AttributeSet;
use crate::compute;
use crate::error::Result;
use crate::implementation::{ImplementationRecord, DEFAULT_PLEVEL};
use crate::op::OpKind;
use crate::registry::RegistryBuilder;

pub const HLS_KEY: &str = "hls";

pub fn register(builder: RegistryBuilder) -> RegistryBuilder {
    builder
        .register(OpKind::Conv2dTranspose, HLS_KEY, conv2d_transpose_strategy)
        .register(OpKind::Dense, HLS_KEY, dense_strategy)
        .register(OpKind::Softmax, HLS_KEY, softmax_strategy)
}

pub fn conv2d_transpose_strategy(
    attrs: &AttributeSet,
    _inputs: &[TensorDesc],
    target: &Target,
) -> Result<Vec<ImplementationRecord>> {
    generic::conv2d_transpose_checked(attrs, target)?;
    Ok(vec![untuned(
        "conv2d_transpose_nchw.hls",
        DEFAULT_PLEVEL,
        compute::conv2d_transpose,
    )])
}

pub fn dense_strategy(
    _attrs: &AttributeSet,
    _inputs: &[TensorDesc],
    _target: &Target,
) -> Result<Vec<ImplementationRecord>> {
    Ok(vec![untuned("dense.hls", DEFAULT_PLEVEL, compute::dense)])
}

pub fn softmax_strategy(
    _attrs: &AttributeSet,
    _inputs: &[TensorDesc],
    _target: &Target,
) -> Result<Vec<ImplementationRecord>> {
    Ok(vec![untuned("softmax.hls", DEFAULT_PLEVEL, compute::softmax)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::Attrs;
    use crate::error::StrategyError;
    use ts_ir::DType;
    use ts_schedule::TuningContext;

    fn sdaccel() -> Target {
        Target::parse("sdaccel").unwrap()
    }

    fn transpose_inputs() -> Vec<TensorDesc> {
        vec![
            TensorDesc::new("data", vec![1, 8, 7, 7], DType::Float32),
            TensorDesc::new("kernel", vec![8, 4, 3, 3], DType::Float32),
        ]
    }

    fn transpose(attrs: Attrs) -> Result<Vec<ImplementationRecord>> {
        let inputs = transpose_inputs();
        let set = AttributeSet::normalize(OpKind::Conv2dTranspose, &attrs, &inputs)?;
        conv2d_transpose_strategy(&set, &inputs, &sdaccel())
    }

    #[test]
    fn test_conv2d_transpose_builds() {
        let attrs = Attrs::new().with("strides", 2i64).with("padding", 1i64);
        let records = transpose(attrs.clone()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name(), "conv2d_transpose_nchw.hls");

        let inputs = transpose_inputs();
        let set = AttributeSet::normalize(OpKind::Conv2dTranspose, &attrs, &inputs).unwrap();
        let ctx = TuningContext::new(sdaccel());
        let built = records[0].build(&inputs, &set, &ctx).unwrap();
        let out = &built.output.graph.outputs()[0];
        // (7 - 1) * 2 + 3 - 2
        assert_eq!(
            built.output.graph.op(out).unwrap().output_shape(),
            ts_ir::Shape::from_known(&[1, 4, 13, 13])
        );
    }

    #[test]
    fn test_conv2d_transpose_rejects_layout() {
        let err = transpose(Attrs::new().with("data_layout", "NHWC")).unwrap_err();
        assert!(matches!(err, StrategyError::UnsupportedLayout { ref layout, .. } if layout == "NHWC"));
    }

    #[test]
    fn test_conv2d_transpose_rejects_dilation() {
        let err = transpose(Attrs::new().with("dilation", 2i64)).unwrap_err();
        assert!(matches!(err, StrategyError::UnsupportedConfiguration { .. }));
    }

    #[test]
    fn test_conv2d_transpose_rejects_groups() {
        let err = transpose(Attrs::new().with("groups", 2i64)).unwrap_err();
        assert!(matches!(err, StrategyError::UnsupportedGroupCount { groups: 2, .. }));
    }

    #[test]
    fn test_dense_and_softmax() {
        let inputs = vec![
            TensorDesc::new("data", vec![4, 16], DType::Float32),
            TensorDesc::new("weight", vec![8, 16], DType::Float32),
        ];
        let set = AttributeSet::normalize(OpKind::Dense, &Attrs::new(), &inputs).unwrap();
        let records = dense_strategy(&set, &inputs, &sdaccel()).unwrap();
        assert_eq!(records[0].name(), "dense.hls");

        let set = AttributeSet::normalize(OpKind::Softmax, &Attrs::new(), &inputs[..1]).unwrap();
        let records = softmax_strategy(&set, &inputs[..1], &sdaccel()).unwrap();
        assert_eq!(records[0].name(), "softmax.hls");
    }
}
