//! Target-independent strategies every target falls back to.

use ts_ir::{Target, TensorDesc};

use super::{unsupported, unsupported_groups, unsupported_layout, untuned};
use crate::attribute_set::AttributeSet;
use crate::compute;
use crate::error::Result;
use crate::implementation::{ImplementationRecord, DEFAULT_PLEVEL};
use crate::layout::Layout;
use crate::op::OpKind;
use crate::registry::{RegistryBuilder, GENERIC_KEY};

pub fn register(builder: RegistryBuilder) -> RegistryBuilder {
    builder
        .register(OpKind::Conv2d, GENERIC_KEY, conv2d_strategy)
        .register(OpKind::Conv3d, GENERIC_KEY, conv3d_strategy)
        .register(OpKind::Conv2dTranspose, GENERIC_KEY, conv2d_transpose_strategy)
        .register(OpKind::Dense, GENERIC_KEY, dense_strategy)
        .register(OpKind::BatchMatmul, GENERIC_KEY, batch_matmul_strategy)
        .register(OpKind::Softmax, GENERIC_KEY, softmax_strategy)
}

/// Direct convolution in `NCHW`, `NCHW4c`, `NHWC` or `HWCN`; depthwise in
/// `NCHW` or `NHWC`/`HWOI`; grouped in `NCHW`/`NCHW4c`.
pub fn conv2d_strategy(
    attrs: &AttributeSet,
    _inputs: &[TensorDesc],
    target: &Target,
) -> Result<Vec<ImplementationRecord>> {
    let conv = attrs.as_conv2d()?;
    let layout = &conv.data_layout;
    if !matches!(layout, Layout::Nchw | Layout::NchwC(4) | Layout::Nhwc | Layout::Hwcn) {
        return Err(unsupported_layout("conv2d", layout, target));
    }

    let name = if conv.groups == 1 {
        match layout {
            Layout::Nhwc => "conv2d_nhwc.generic",
            Layout::Hwcn => "conv2d_hwcn.generic",
            _ => "conv2d_nchw.generic",
        }
    } else if conv.is_depthwise() && *layout == Layout::Nchw {
        "depthwise_conv2d_nchw.generic"
    } else if conv.is_depthwise() && *layout == Layout::Nhwc && conv.kernel_layout == Layout::Hwoi {
        "depthwise_conv2d_nhwc.generic"
    } else if matches!(layout, Layout::Nchw | Layout::NchwC(4)) {
        "group_conv2d_nchw.generic"
    } else {
        return Err(unsupported_groups("conv2d", conv.groups, target));
    };
    Ok(vec![untuned(name, DEFAULT_PLEVEL, compute::conv2d)])
}

pub fn conv3d_strategy(
    attrs: &AttributeSet,
    _inputs: &[TensorDesc],
    target: &Target,
) -> Result<Vec<ImplementationRecord>> {
    let conv = attrs.as_conv3d()?;
    let name = match conv.data_layout {
        Layout::Ncdhw => "conv3d_ncdhw.generic",
        Layout::Ndhwc => "conv3d_ndhwc.generic",
        ref other => return Err(unsupported_layout("conv3d", other, target)),
    };
    if conv.groups != 1 {
        return Err(unsupported_groups("conv3d", conv.groups, target));
    }
    Ok(vec![untuned(name, DEFAULT_PLEVEL, compute::conv3d)])
}

/// Transposed convolution in `NCHW` without dilation or groups.
pub fn conv2d_transpose_strategy(
    attrs: &AttributeSet,
    _inputs: &[TensorDesc],
    target: &Target,
) -> Result<Vec<ImplementationRecord>> {
    conv2d_transpose_checked(attrs, target)?;
    Ok(vec![untuned(
        "conv2d_transpose_nchw.generic",
        DEFAULT_PLEVEL,
        compute::conv2d_transpose,
    )])
}

/// Restrictions shared by every transposed-convolution implementation.
pub(crate) fn conv2d_transpose_checked(attrs: &AttributeSet, target: &Target) -> Result<()> {
    let conv = attrs.as_conv2d_transpose()?;
    if conv.data_layout != Layout::Nchw {
        return Err(unsupported_layout("conv2d_transpose", &conv.data_layout, target));
    }
    if conv.dilation != [1, 1] {
        return Err(unsupported(
            "conv2d_transpose",
            target,
            format!("dilation {:?} is not supported", conv.dilation),
        ));
    }
    if conv.groups != 1 {
        return Err(unsupported_groups("conv2d_transpose", conv.groups, target));
    }
    Ok(())
}

pub fn dense_strategy(
    _attrs: &AttributeSet,
    _inputs: &[TensorDesc],
    _target: &Target,
) -> Result<Vec<ImplementationRecord>> {
    Ok(vec![untuned("dense.generic", DEFAULT_PLEVEL, compute::dense)])
}

pub fn batch_matmul_strategy(
    _attrs: &AttributeSet,
    _inputs: &[TensorDesc],
    _target: &Target,
) -> Result<Vec<ImplementationRecord>> {
    Ok(vec![untuned("batch_matmul.generic", DEFAULT_PLEVEL, compute::batch_matmul)])
}

pub fn softmax_strategy(
    _attrs: &AttributeSet,
    _inputs: &[TensorDesc],
    _target: &Target,
) -> Result<Vec<ImplementationRecord>> {
    Ok(vec![untuned("softmax.generic", DEFAULT_PLEVEL, compute::softmax)])
}
