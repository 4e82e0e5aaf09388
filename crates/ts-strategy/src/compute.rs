//! Compute builders for implementations without tunable knobs.
//!
//! Each builder infers output shapes from the normalized attributes and
//! emits the stages a lowering pass would see, including padding and
//! transform stages, so that a schedule can address them by name or tag.

use ts_ir::{ComputeGraph, ComputeOp, DType, DimExtent, Shape, TensorDesc};
use ts_schedule::{ComputeOutput, TuningContext};

use crate::attribute_set::{AttributeSet, Conv2dAttrs};
use crate::error::{Result, StrategyError};
use crate::layout::Layout;

/// Output tile edge of the Winograd F(2x2, 3x3) transform.
pub const WINOGRAD_TILE: usize = 2;
/// Kernel edge the Winograd transform is defined for.
pub const WINOGRAD_KERNEL: usize = 3;
/// Transformed tile edge, `WINOGRAD_TILE + WINOGRAD_KERNEL - 1`.
pub const WINOGRAD_ALPHA: usize = WINOGRAD_TILE + WINOGRAD_KERNEL - 1;

struct SpatialAxis {
    axis: char,
    kernel: usize,
    stride: usize,
    pad: [usize; 2],
    dilation: usize,
}

struct ConvPlan<'a> {
    name: String,
    data_layout: &'a Layout,
    spatial: Vec<SpatialAxis>,
    out_channels: usize,
    reduce_channels: usize,
    out_dtype: DType,
}

fn known(d: DimExtent, what: &str) -> Result<usize> {
    d.known()
        .ok_or_else(|| StrategyError::invalid(what, "extent must be known at compile time"))
}

fn checked(v: Option<usize>, what: &str) -> Result<usize> {
    v.ok_or_else(|| StrategyError::invalid(what, "extent overflows"))
}

fn padded_extent(input: usize, pad: [usize; 2]) -> Result<usize> {
    checked(input.checked_add(pad[0]).and_then(|v| v.checked_add(pad[1])), "padding")
}

fn dilated_extent(kernel: usize, dilation: usize) -> Result<usize> {
    checked(
        kernel.saturating_sub(1).checked_mul(dilation).and_then(|v| v.checked_add(1)),
        "dilation",
    )
}

fn operands(inputs: &[TensorDesc]) -> Result<(&TensorDesc, &TensorDesc)> {
    match inputs {
        [a, b, ..] => Ok((a, b)),
        _ => Err(StrategyError::invalid(
            "inputs",
            format!("expected two tensors, got {}", inputs.len()),
        )),
    }
}

fn names_ref(names: &[String]) -> Vec<&str> {
    names.iter().map(String::as_str).collect()
}

fn conv_out_extent(input: usize, s: &SpatialAxis) -> Result<usize> {
    let dilated = dilated_extent(s.kernel, s.dilation)?;
    let padded = padded_extent(input, s.pad)?;
    if padded < dilated {
        return Err(StrategyError::invalid(
            "kernel_size",
            format!(
                "dilated kernel {} exceeds padded input {} on axis {}",
                dilated, padded, s.axis
            ),
        ));
    }
    Ok((padded - dilated) / s.stride + 1)
}

fn axis_name(c: char) -> String {
    if c.is_ascii_lowercase() {
        format!("{}b", c)
    } else {
        c.to_ascii_lowercase().to_string()
    }
}

/// Direct convolution over any layout spelled in primal axis letters plus an
/// optional channel block.
fn conv_graph(data: &TensorDesc, kernel: &TensorDesc, plan: &ConvPlan<'_>) -> Result<ComputeOutput> {
    let layout = plan.data_layout.to_string();
    let chars: Vec<char> = layout.chars().filter(|c| c.is_ascii_alphabetic()).collect();
    if chars.len() != data.ndim() {
        return Err(StrategyError::invalid(
            "data_layout",
            format!("{} does not match input shape {}", layout, data.shape()),
        ));
    }
    let block = match plan.data_layout {
        Layout::NchwC(bn) => Some(*bn),
        _ => None,
    };

    let mut padded = Vec::with_capacity(chars.len());
    let mut out = Vec::with_capacity(chars.len());
    let mut names = Vec::with_capacity(chars.len());
    for (i, &c) in chars.iter().enumerate() {
        let d = data.shape().try_dim(i)?;
        names.push(axis_name(c));
        if let Some(s) = plan.spatial.iter().find(|s| s.axis == c) {
            let extent = known(d, "data")?;
            padded.push(DimExtent::Known(padded_extent(extent, s.pad)?));
            out.push(DimExtent::Known(conv_out_extent(extent, s)?));
        } else if c == 'C' {
            padded.push(d);
            let chunks = match block {
                Some(bn) if plan.out_channels % bn != 0 => {
                    return Err(StrategyError::invalid(
                        "kernel",
                        format!("{} output channels do not fill blocks of {}", plan.out_channels, bn),
                    ))
                }
                Some(bn) => plan.out_channels / bn,
                None => plan.out_channels,
            };
            out.push(DimExtent::Known(chunks));
        } else {
            padded.push(d);
            out.push(d);
        }
    }

    let mut graph = ComputeGraph::new(vec![data.clone(), kernel.clone()]);
    let mut source = data.name().to_string();
    if plan.spatial.iter().any(|s| s.pad != [0, 0]) {
        graph.push(
            ComputeOp::new("pad_temp", "pad", &Shape::new(padded), data.dtype())
                .with_axis_names(&names_ref(&names))
                .reads(data.name()),
        )?;
        source = "pad_temp".to_string();
    }

    let mut op = ComputeOp::new(plan.name.clone(), plan.name.clone(), &Shape::new(out), plan.out_dtype)
        .with_axis_names(&names_ref(&names));
    if plan.reduce_channels > 1 {
        op = op.with_reduce_axis("rc", DimExtent::Known(plan.reduce_channels));
    }
    for s in &plan.spatial {
        op = op.with_reduce_axis(format!("r{}", s.axis.to_ascii_lowercase()), DimExtent::Known(s.kernel));
    }
    graph.push(op.reads(source).reads(kernel.name()))?;
    Ok(ComputeOutput::new(graph))
}

/// Input channel count of `data`, folding the channel block back in.
fn in_channels(data: &TensorDesc, layout: &Layout) -> Result<usize> {
    let c = layout
        .axis_index('C')
        .ok_or_else(|| StrategyError::invalid("data_layout", format!("{} has no channel axis", layout)))?;
    let mut channels = known(data.shape().try_dim(c)?, "data")?;
    if let Some(cb) = layout.axis_index('c') {
        channels = checked(channels.checked_mul(known(data.shape().try_dim(cb)?, "data")?), "data")?;
    }
    Ok(channels)
}

fn conv2d_out_channels(kernel: &TensorDesc, conv: &Conv2dAttrs) -> Result<usize> {
    if conv.is_depthwise() {
        return Ok(conv.kernel_out_depth);
    }
    let k = kernel.shape().known_dims(kernel.name())?;
    match (conv.kernel_layout.axis_index('O'), k.len()) {
        (Some(o), 4) => Ok(k[o]),
        // Blocked kernels: [oc_chunk, ic_chunk, kh, kw, ic_bn, oc_bn].
        (_, 6) => checked(k[0].checked_mul(k[5]), "kernel"),
        _ => Err(StrategyError::invalid(
            "kernel_layout",
            format!("cannot infer output channels from {} {}", conv.kernel_layout, kernel.shape()),
        )),
    }
}

fn conv2d_tag(conv: &Conv2dAttrs) -> String {
    let layout = conv.data_layout.to_string().to_lowercase();
    if conv.is_depthwise() {
        format!("depthwise_conv2d_{}", layout)
    } else if conv.groups > 1 {
        format!("group_conv2d_{}", layout)
    } else {
        format!("conv2d_{}", layout)
    }
}

/// Direct 2-D convolution, covering plain, depthwise and grouped variants.
pub fn conv2d(inputs: &[TensorDesc], attrs: &AttributeSet, _ctx: &TuningContext) -> Result<ComputeOutput> {
    let conv = attrs.as_conv2d()?;
    let (data, kernel) = operands(inputs)?;
    let channels = in_channels(data, &conv.data_layout)?;
    if channels % conv.groups != 0 {
        return Err(StrategyError::invalid(
            "groups",
            format!("{} input channels are not divisible into {} groups", channels, conv.groups),
        ));
    }
    let plan = ConvPlan {
        name: conv2d_tag(conv),
        data_layout: &conv.data_layout,
        spatial: (0..2)
            .map(|i| SpatialAxis {
                axis: ['H', 'W'][i],
                kernel: conv.kernel_size[i],
                stride: conv.strides[i],
                pad: [conv.padding[i], conv.padding[i + 2]],
                dilation: conv.dilation[i],
            })
            .collect(),
        out_channels: conv2d_out_channels(kernel, conv)?,
        reduce_channels: if conv.is_depthwise() { 1 } else { channels / conv.groups },
        out_dtype: conv.out_dtype,
    };
    conv_graph(data, kernel, &plan)
}

/// Direct 3-D convolution in `NCDHW` or `NDHWC`.
pub fn conv3d(inputs: &[TensorDesc], attrs: &AttributeSet, _ctx: &TuningContext) -> Result<ComputeOutput> {
    let conv = attrs.as_conv3d()?;
    let (data, kernel) = operands(inputs)?;
    let k = kernel.shape().known_dims(kernel.name())?;
    let kernel_axis = |c: char| -> Result<usize> {
        conv.kernel_layout
            .axis_index(c)
            .and_then(|i| k.get(i).copied())
            .ok_or_else(|| {
                StrategyError::invalid(
                    "kernel_layout",
                    format!("axis {} not found in {} {}", c, conv.kernel_layout, kernel.shape()),
                )
            })
    };
    let plan = ConvPlan {
        name: format!("conv3d_{}", conv.data_layout.to_string().to_lowercase()),
        data_layout: &conv.data_layout,
        spatial: ['D', 'H', 'W']
            .iter()
            .enumerate()
            .map(|(i, &axis)| {
                Ok(SpatialAxis {
                    axis,
                    kernel: kernel_axis(axis)?,
                    stride: conv.strides[i],
                    pad: [conv.padding[i], conv.padding[i + 3]],
                    dilation: conv.dilation[i],
                })
            })
            .collect::<Result<Vec<_>>>()?,
        out_channels: kernel_axis('O')?,
        reduce_channels: in_channels(data, &conv.data_layout)?,
        out_dtype: conv.out_dtype,
    };
    conv_graph(data, kernel, &plan)
}

/// Transposed 2-D convolution in `NCHW`. The kernel is laid out
/// `[in_channels, out_channels, kh, kw]`.
pub fn conv2d_transpose(inputs: &[TensorDesc], attrs: &AttributeSet, _ctx: &TuningContext) -> Result<ComputeOutput> {
    let conv = attrs.as_conv2d_transpose()?;
    let (data, kernel) = operands(inputs)?;
    let d = data.shape().known_dims(data.name())?;
    let k = kernel.shape().known_dims(kernel.name())?;
    let (batch, in_c, in_h, in_w) = match d.as_slice() {
        [n, c, h, w] => (*n, *c, *h, *w),
        _ => return Err(StrategyError::invalid("data", format!("expected NCHW, got {}", data.shape()))),
    };
    let (out_c, kh, kw) = match k.as_slice() {
        [_, o, h, w] => (checked(o.checked_mul(conv.groups), "groups")?, *h, *w),
        _ => return Err(StrategyError::invalid("kernel", format!("expected rank 4, got {}", kernel.shape()))),
    };

    let extent = |input: usize, k: usize, i: usize| -> Result<(usize, usize)> {
        let dilated = dilated_extent(k, conv.dilation[i])?;
        let full = checked(
            input
                .saturating_sub(1)
                .checked_mul(conv.strides[i])
                .and_then(|v| v.checked_add(dilated))
                .and_then(|v| v.checked_add(conv.output_padding[i])),
            "strides",
        )?;
        let pad = padded_extent(0, [conv.padding[i], conv.padding[i + 2]])?;
        if full <= pad {
            return Err(StrategyError::invalid("padding", format!("{} removes the whole output", pad)));
        }
        let out = full - pad;
        Ok((out, checked(out.checked_add(dilated - 1), "padding")?))
    };
    let (out_h, pad_h) = extent(in_h, kh, 0)?;
    let (out_w, pad_w) = extent(in_w, kw, 1)?;

    let graph = ComputeGraph::new(vec![data.clone(), kernel.clone()])
        .with_op(
            ComputeOp::new("data_pad", "pad", &Shape::from_known(&[batch, in_c, pad_h, pad_w]), data.dtype())
                .with_axis_names(&["n", "c", "h", "w"])
                .reads(data.name()),
        )?
        .with_op(
            ComputeOp::new(
                "conv2d_transpose_nchw",
                "conv2d_transpose_nchw",
                &Shape::from_known(&[batch, out_c, out_h, out_w]),
                conv.out_dtype,
            )
            .with_axis_names(&["n", "c", "h", "w"])
            .with_reduce_axis("rc", DimExtent::Known(in_c))
            .with_reduce_axis("rh", DimExtent::Known(kh))
            .with_reduce_axis("rw", DimExtent::Known(kw))
            .reads("data_pad")
            .reads(kernel.name()),
        )?;
    Ok(ComputeOutput::new(graph))
}

/// `data [M, K]` times `weight [N, K]` transposed.
pub fn dense(inputs: &[TensorDesc], attrs: &AttributeSet, _ctx: &TuningContext) -> Result<ComputeOutput> {
    let dense = attrs.as_dense()?;
    let (data, weight) = operands(inputs)?;
    let (m, k, n) = matmul_dims(data, weight, 2)?;
    if let (Some(units), Some(n)) = (dense.units, n.known()) {
        if units != n {
            return Err(StrategyError::invalid(
                "units",
                format!("{} does not match weight rows {}", units, n),
            ));
        }
    }
    let graph = ComputeGraph::new(vec![data.clone(), weight.clone()]).with_op(
        ComputeOp::new("T_dense", "dense", &Shape::new(vec![m[0], n]), dense.out_dtype)
            .with_axis_names(&["i", "j"])
            .with_reduce_axis("k", k)
            .reads(data.name())
            .reads(weight.name()),
    )?;
    Ok(ComputeOutput::new(graph))
}

/// Dense through an external BLAS call: one opaque stage with no loops to
/// transform.
pub fn dense_extern(inputs: &[TensorDesc], attrs: &AttributeSet, _ctx: &TuningContext) -> Result<ComputeOutput> {
    let dense = attrs.as_dense()?;
    let (data, weight) = operands(inputs)?;
    let (m, _, n) = matmul_dims(data, weight, 2)?;
    let graph = ComputeGraph::new(vec![data.clone(), weight.clone()]).with_op(
        ComputeOp::new("T_dense_cblas", "dense_cblas", &Shape::new(vec![m[0], n]), dense.out_dtype)
            .with_axis_names(&["i", "j"])
            .reads(data.name())
            .reads(weight.name()),
    )?;
    Ok(ComputeOutput::new(graph))
}

/// `x [B, M, K]` times `y [B, N, K]` transposed, batch by batch.
pub fn batch_matmul(inputs: &[TensorDesc], attrs: &AttributeSet, _ctx: &TuningContext) -> Result<ComputeOutput> {
    let (x, y) = operands(inputs)?;
    let out_dtype = attrs.out_dtype().unwrap_or(x.dtype());
    let (lead, k, n) = matmul_dims(x, y, 3)?;
    let (batch, m) = (lead[0], lead[1]);
    if let (Some(a), Some(b)) = (batch.known(), y.shape().dim(0).known()) {
        if a != b {
            return Err(StrategyError::invalid("inputs", format!("batch sizes {} and {} differ", a, b)));
        }
    }
    let graph = ComputeGraph::new(vec![x.clone(), y.clone()]).with_op(
        ComputeOp::new("T_batch_matmul", "batch_matmul", &Shape::new(vec![batch, m, n]), out_dtype)
            .with_axis_names(&["b", "i", "j"])
            .with_reduce_axis("k", k)
            .reads(x.name())
            .reads(y.name()),
    )?;
    Ok(ComputeOutput::new(graph))
}

/// Leading dims of `a`, the shared reduction extent, and the row count of `b`.
fn matmul_dims(a: &TensorDesc, b: &TensorDesc, rank: usize) -> Result<(Vec<DimExtent>, DimExtent, DimExtent)> {
    if a.ndim() != rank || b.ndim() != rank {
        return Err(StrategyError::invalid(
            "inputs",
            format!("expected rank {} operands, got {} and {}", rank, a.shape(), b.shape()),
        ));
    }
    let ka = a.shape().dim(rank - 1);
    let kb = b.shape().dim(rank - 1);
    if let (Some(x), Some(y)) = (ka.known(), kb.known()) {
        if x != y {
            return Err(StrategyError::invalid(
                "inputs",
                format!("reduction extents {} and {} differ", x, y),
            ));
        }
    }
    let k = if ka.is_symbolic() { kb } else { ka };
    Ok((a.shape().dims()[..rank - 1].to_vec(), k, b.shape().dim(rank - 2)))
}

/// Numerically stable softmax: max, exponentiate, sum, normalize.
pub fn softmax(inputs: &[TensorDesc], attrs: &AttributeSet, _ctx: &TuningContext) -> Result<ComputeOutput> {
    let axis = attrs.as_softmax()?.axis;
    let x = inputs
        .first()
        .ok_or_else(|| StrategyError::invalid("inputs", "softmax needs one input"))?;
    let full = x.shape().clone();
    let reduce_extent = full.try_dim(axis)?;
    let mut reduced = full.dims().to_vec();
    reduced.remove(axis);
    let reduced = Shape::new(reduced);
    let dtype = x.dtype();

    let graph = ComputeGraph::new(vec![x.clone()])
        .with_op(
            ComputeOp::new("T_softmax_maxelem", "softmax_maxelem", &reduced, dtype)
                .with_reduce_axis("k1", reduce_extent)
                .reads(x.name()),
        )?
        .with_op(
            ComputeOp::new("T_softmax_exp", "softmax_exp", &full, dtype)
                .reads(x.name())
                .reads("T_softmax_maxelem"),
        )?
        .with_op(
            ComputeOp::new("T_softmax_expsum", "softmax_expsum", &reduced, dtype)
                .with_reduce_axis("k2", reduce_extent)
                .reads("T_softmax_exp"),
        )?
        .with_op(
            ComputeOp::new("T_softmax_norm", "softmax_output", &full, dtype)
                .reads("T_softmax_exp")
                .reads("T_softmax_expsum"),
        )?;
    Ok(ComputeOutput::new(graph))
}

/// Winograd F(2x2, 3x3) convolution in `NCHW`, transforming the kernel.
pub fn conv2d_winograd(inputs: &[TensorDesc], attrs: &AttributeSet, _ctx: &TuningContext) -> Result<ComputeOutput> {
    winograd(inputs, attrs.as_conv2d()?, false)
}

/// Winograd convolution whose kernel input is already
/// `[alpha, alpha, in_channels, out_channels]`.
pub fn conv2d_winograd_pretransformed(
    inputs: &[TensorDesc],
    attrs: &AttributeSet,
    _ctx: &TuningContext,
) -> Result<ComputeOutput> {
    winograd(inputs, attrs.as_conv2d()?, true)
}

fn winograd(inputs: &[TensorDesc], conv: &Conv2dAttrs, pre_transformed: bool) -> Result<ComputeOutput> {
    let (data, kernel) = operands(inputs)?;
    if conv.kernel_size != [WINOGRAD_KERNEL; 2] || conv.strides != [1, 1] || conv.dilation != [1, 1] {
        return Err(StrategyError::invalid(
            "kernel_size",
            "winograd needs a 3x3 kernel with unit stride and dilation",
        ));
    }
    let (m, alpha) = (WINOGRAD_TILE, WINOGRAD_ALPHA);
    if data.ndim() != 4 {
        return Err(StrategyError::invalid("data", format!("expected NCHW, got {}", data.shape())));
    }
    let batch = data.shape().dim(0);
    let in_c = known(data.shape().dim(1), "data")?;
    let in_h = known(data.shape().dim(2), "data")?;
    let in_w = known(data.shape().dim(3), "data")?;

    let k = kernel.shape().known_dims(kernel.name())?;
    let out_c = match (pre_transformed, k.as_slice()) {
        (true, [a, b, ci, co]) if *a == alpha && *b == alpha && *ci == in_c => *co,
        (false, [co, ci, _, _]) if *ci == in_c => *co,
        _ => {
            return Err(StrategyError::invalid(
                "kernel",
                format!("unexpected winograd kernel shape {}", kernel.shape()),
            ))
        }
    };

    let out_h = padded_extent(in_h, [conv.padding[0], conv.padding[2]])?
        .checked_sub(WINOGRAD_KERNEL - 1)
        .ok_or_else(|| StrategyError::invalid("data", "input smaller than the kernel"))?;
    let out_w = padded_extent(in_w, [conv.padding[1], conv.padding[3]])?
        .checked_sub(WINOGRAD_KERNEL - 1)
        .ok_or_else(|| StrategyError::invalid("data", "input smaller than the kernel"))?;
    let tiles_h = out_h.div_ceil(m);
    let tiles_w = out_w.div_ceil(m);
    let tiles = batch
        .checked_mul(DimExtent::Known(checked(tiles_h.checked_mul(tiles_w), "data")?))
        .ok_or_else(|| StrategyError::invalid("data", "tile count overflows"))?;
    // A padded tile edge is `tiles * m + alpha - m`.
    let tile_edge = |tiles: usize| checked(tiles.checked_mul(m).and_then(|v| v.checked_add(alpha - m)), "padding");

    let mut graph = ComputeGraph::new(vec![data.clone(), kernel.clone()]);
    graph.push(
        ComputeOp::new(
            "data_pad",
            "pad",
            &Shape::new(vec![
                batch,
                DimExtent::Known(in_c),
                DimExtent::Known(tile_edge(tiles_h)?),
                DimExtent::Known(tile_edge(tiles_w)?),
            ]),
            data.dtype(),
        )
        .with_axis_names(&["n", "c", "h", "w"])
        .reads(data.name()),
    )?;

    let packed_kernel = if pre_transformed {
        kernel.name().to_string()
    } else {
        graph.push(
            ComputeOp::new(
                "kernel_pack",
                "winograd_kernel_pack",
                &Shape::from_known(&[alpha, alpha, in_c, out_c]),
                kernel.dtype(),
            )
            .with_axis_names(&["eps", "nu", "ci", "co"])
            .with_reduce_axis("r_kh", DimExtent::Known(WINOGRAD_KERNEL))
            .with_reduce_axis("r_kw", DimExtent::Known(WINOGRAD_KERNEL))
            .reads(kernel.name()),
        )?;
        "kernel_pack".to_string()
    };

    let transform_shape = |c: usize| {
        Shape::new(vec![
            DimExtent::Known(alpha),
            DimExtent::Known(alpha),
            DimExtent::Known(c),
            tiles,
        ])
    };
    graph.push(
        ComputeOp::new("data_pack", "winograd_data_pack", &transform_shape(in_c), data.dtype())
            .with_axis_names(&["eps", "nu", "ci", "p"])
            .with_reduce_axis("r_a", DimExtent::Known(alpha))
            .with_reduce_axis("r_b", DimExtent::Known(alpha))
            .reads("data_pad"),
    )?;
    graph.push(
        ComputeOp::new("bgemm", "winograd_bgemm", &transform_shape(out_c), conv.out_dtype)
            .with_axis_names(&["eps", "nu", "co", "p"])
            .with_reduce_axis("ci", DimExtent::Known(in_c))
            .reads(packed_kernel)
            .reads("data_pack"),
    )?;
    graph.push(
        ComputeOp::new(
            "inverse",
            "winograd_inverse",
            &Shape::new(vec![DimExtent::Known(m), DimExtent::Known(m), DimExtent::Known(out_c), tiles]),
            conv.out_dtype,
        )
        .with_axis_names(&["vh", "vw", "co", "p"])
        .with_reduce_axis("r_a", DimExtent::Known(alpha))
        .with_reduce_axis("r_b", DimExtent::Known(alpha))
        .reads("bgemm"),
    )?;
    graph.push(
        ComputeOp::new(
            "output",
            "conv2d_nchw_winograd",
            &Shape::new(vec![
                batch,
                DimExtent::Known(out_c),
                DimExtent::Known(out_h),
                DimExtent::Known(out_w),
            ]),
            conv.out_dtype,
        )
        .with_axis_names(&["n", "co", "h", "w"])
        .reads("inverse"),
    )?;
    Ok(ComputeOutput::new(graph))
}
