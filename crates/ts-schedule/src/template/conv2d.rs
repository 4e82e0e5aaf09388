use tracing::debug;
use ts_ir::{ComputeGraph, ComputeOp, DType, DimExtent, IrError, Shape, TensorDesc};

use crate::error::{ConfigSpaceError, Result};
use crate::records::{TuningContext, Workload};
use crate::schedule::Schedule;
use crate::space::ConfigSpace;
use crate::template::ComputeOutput;

pub const CONV2D_NCHWC_TASK: &str = "conv2d_NCHWc.x86";

/// Static geometry of an NCHW convolution with an OIHW kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conv2dWorkload {
    pub batch: usize,
    pub in_filter: usize,
    pub height: usize,
    pub width: usize,
    pub out_filter: usize,
    pub kernel: [usize; 2],
    /// Top, left, bottom, right.
    pub padding: [usize; 4],
    pub strides: [usize; 2],
    pub dilation: [usize; 2],
}

impl Conv2dWorkload {
    pub fn from_nchw(
        data: &TensorDesc,
        kernel: &TensorDesc,
        strides: [usize; 2],
        padding: [usize; 4],
        dilation: [usize; 2],
    ) -> Result<Self> {
        let d = data.shape().known_dims(data.name())?;
        let k = kernel.shape().known_dims(kernel.name())?;
        let ([n, c, h, w], [o, i, kh, kw]) = match (d.as_slice(), k.as_slice()) {
            (&[n, c, h, w], &[o, i, kh, kw]) => ([n, c, h, w], [o, i, kh, kw]),
            _ => {
                return Err(IrError::ShapeMismatch {
                    expected: "NCHW data with OIHW kernel".to_string(),
                    got: format!("{} and {}", data.shape(), kernel.shape()),
                }
                .into())
            }
        };
        if i != c {
            return Err(IrError::ShapeMismatch {
                expected: format!("kernel input channels {}", c),
                got: i.to_string(),
            }
            .into());
        }
        let wkl = Conv2dWorkload {
            batch: n,
            in_filter: c,
            height: h,
            width: w,
            out_filter: o,
            kernel: [kh, kw],
            padding,
            strides,
            dilation,
        };
        if wkl.padded_height().is_none()
            || wkl.padded_width().is_none()
            || wkl.dilated_kernel(0).is_none()
            || wkl.dilated_kernel(1).is_none()
        {
            return Err(padding_overflow(&wkl).into());
        }
        if wkl.out_height() == 0 || wkl.out_width() == 0 {
            return Err(IrError::ShapeMismatch {
                expected: "kernel no larger than the padded input".to_string(),
                got: format!("{} over {}", kernel.shape(), data.shape()),
            }
            .into());
        }
        Ok(wkl)
    }

    fn dilated_kernel(&self, i: usize) -> Option<usize> {
        (self.kernel[i].max(1) - 1).checked_mul(self.dilation[i])?.checked_add(1)
    }

    /// Input height after padding, `None` on overflow.
    pub fn padded_height(&self) -> Option<usize> {
        self.height.checked_add(self.padding[0])?.checked_add(self.padding[2])
    }

    /// Input width after padding, `None` on overflow.
    pub fn padded_width(&self) -> Option<usize> {
        self.width.checked_add(self.padding[1])?.checked_add(self.padding[3])
    }

    /// Zero when the dilated kernel does not fit the padded input.
    fn out_extent(&self, padded: Option<usize>, i: usize) -> usize {
        match (padded, self.dilated_kernel(i)) {
            (Some(padded), Some(dk)) if padded >= dk && self.strides[i] != 0 => (padded - dk) / self.strides[i] + 1,
            _ => 0,
        }
    }

    pub fn out_height(&self) -> usize {
        self.out_extent(self.padded_height(), 0)
    }

    pub fn out_width(&self) -> usize {
        self.out_extent(self.padded_width(), 1)
    }

    fn params(&self) -> Vec<i64> {
        self.strides
            .iter()
            .chain(self.padding.iter())
            .chain(self.dilation.iter())
            .map(|&v| v as i64)
            .collect()
    }
}

fn padding_overflow(wkl: &Conv2dWorkload) -> IrError {
    IrError::ShapeMismatch {
        expected: "padded extents within usize".to_string(),
        got: format!(
            "{}x{} input with padding {:?} and dilation {:?}",
            wkl.height, wkl.width, wkl.padding, wkl.dilation
        ),
    }
}

/// Layout of the tensor the convolution hands to its consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvOutputLayout {
    /// The blocked convolution result is unpacked back to NCHW.
    Nchw,
    /// The blocked `NCHW[x]c` result is the output.
    Nchwc,
}

fn blocks(extent: usize, bn: usize, knob: &str) -> Result<DimExtent> {
    DimExtent::Known(extent).div_exact(bn).ok_or_else(|| {
        ConfigSpaceError::NonDivisibleSplit {
            axis: knob.to_string(),
            extent,
            factor: bn,
        }
        .into()
    })
}

/// Channel-blocked convolution: data and kernel are packed into
/// `ic_bn`/`oc_bn` channel blocks, convolved in `NCHW[oc_bn]c`, and
/// optionally unpacked.
pub fn conv2d_nchwc(
    inputs: &[TensorDesc],
    wkl: &Conv2dWorkload,
    layout: ConvOutputLayout,
    out_dtype: DType,
    ctx: &TuningContext,
) -> Result<ComputeOutput> {
    let (data, kernel) = match inputs {
        [data, kernel, ..] => (data, kernel),
        _ => return Err(IrError::Other("conv2d expects data and kernel".to_string()).into()),
    };
    let (oh, ow) = (wkl.out_height(), wkl.out_width());
    let mut space = ConfigSpace::new();
    space.declare_split("tile_ic", DimExtent::Known(wkl.in_filter), 2)?;
    space.declare_split("tile_oc", DimExtent::Known(wkl.out_filter), 2)?;
    space.declare_split("tile_ow", DimExtent::Known(ow), 2)?;
    space.declare_flag("unroll_kw")?;
    let workload = Workload::new(CONV2D_NCHWC_TASK, &inputs[..2]).with_params(&wkl.params());
    let selected = ctx.query(&workload, &space);

    let ic_bn = selected.entity.split("tile_ic")?.inner();
    let oc_bn = selected.entity.split("tile_oc")?.inner();
    let ic_chunks = blocks(wkl.in_filter, ic_bn, "tile_ic")?;
    let oc_chunks = blocks(wkl.out_filter, oc_bn, "tile_oc")?;
    let known = DimExtent::Known;
    let padded_h = wkl.padded_height().ok_or_else(|| padding_overflow(wkl))?;
    let padded_w = wkl.padded_width().ok_or_else(|| padding_overflow(wkl))?;

    let data_vec = ComputeOp::new(
        "data_vec",
        "data_vec",
        &Shape::new(vec![known(wkl.batch), ic_chunks, known(padded_h), known(padded_w), known(ic_bn)]),
        data.dtype(),
    )
    .with_axis_names(&["n", "C", "h", "w", "c"])
    .reads(data.name());
    let kernel_vec = ComputeOp::new(
        "kernel_vec",
        "kernel_vec",
        &Shape::new(vec![
            oc_chunks,
            ic_chunks,
            known(wkl.kernel[0]),
            known(wkl.kernel[1]),
            known(ic_bn),
            known(oc_bn),
        ]),
        kernel.dtype(),
    )
    .with_axis_names(&["OC", "IC", "kh", "kw", "ic", "oc"])
    .reads(kernel.name());
    let conv = ComputeOp::new(
        "conv2d_NCHWc",
        "conv2d_NCHWc",
        &Shape::new(vec![known(wkl.batch), oc_chunks, known(oh), known(ow), known(oc_bn)]),
        out_dtype,
    )
    .with_axis_names(&["n", "oc_chunk", "oh", "ow", "oc_block"])
    .with_reduce_axis("ic", known(wkl.in_filter))
    .with_reduce_axis("kh", known(wkl.kernel[0]))
    .with_reduce_axis("kw", known(wkl.kernel[1]))
    .reads("data_vec")
    .reads("kernel_vec");

    let mut graph = ComputeGraph::new(inputs[..2].to_vec())
        .with_op(data_vec)?
        .with_op(kernel_vec)?
        .with_op(conv)?;
    if layout == ConvOutputLayout::Nchw {
        graph.push(
            ComputeOp::new(
                "output_unpack",
                "conv2d_nchw",
                &Shape::from_known(&[wkl.batch, wkl.out_filter, oh, ow]),
                out_dtype,
            )
            .with_axis_names(&["n", "c", "h", "w"])
            .reads("conv2d_NCHWc"),
        )?;
    }
    Ok(ComputeOutput::with_config(graph, selected))
}

/// Register-blocked schedule for [`conv2d_nchwc`].
///
/// The convolution accumulates into a cached block computed per output-width
/// chunk. When the result is unpacked, the convolution itself is computed
/// inside the parallel loop of the unpack stage.
pub fn schedule_conv_nchwc(output: &ComputeOutput) -> Result<Schedule> {
    let cfg = output.entity()?;
    let reg_n = cfg.split("tile_ow")?.inner();
    let ic_bn = cfg.split("tile_ic")?.inner();
    let oc_bn = cfg.split("tile_oc")?.inner();
    let unroll_kw = cfg.flag("unroll_kw")?;
    let mut s = Schedule::create(&output.graph);
    debug!(config = %cfg, "applying conv2d_NCHWc template");

    let data_vec = s.stage_by_tag("data_vec")?;
    let n = s.axis(data_vec, 0)?;
    let ic_chunk = s.axis(data_vec, 1)?;
    let ih = s.axis(data_vec, 2)?;
    let fused = s.fuse(data_vec, n, ic_chunk)?;
    let fused = s.fuse(data_vec, fused, ih)?;
    s.parallel(data_vec, fused)?;

    let c = s.stage_by_tag("conv2d_NCHWc")?;
    let last = match output.graph.outputs().first() {
        Some(name) => s.stage(name)?,
        None => c,
    };

    let cc = s.cache_write(c)?;
    let batch = s.axis(c, 0)?;
    let oc_chunk = s.axis(c, 1)?;
    let oh = s.axis(c, 2)?;
    let ow = s.axis(c, 3)?;
    let oc_block = s.axis(c, 4)?;
    let (ow_chunk, ow_block) = s.split(c, ow, reg_n)?;
    s.reorder(c, &[oc_chunk, oh, ow_chunk, ow_block, oc_block])?;
    let parallel_axis = s.fuse(c, batch, oc_chunk)?;
    let parallel_axis = s.fuse(c, parallel_axis, oh)?;
    s.vectorize(c, oc_block)?;
    if c == last {
        s.parallel(c, parallel_axis)?;
    }

    s.compute_at(cc, c, ow_chunk)?;
    let oc_chunk = s.axis(cc, 1)?;
    let oh = s.axis(cc, 2)?;
    let ow = s.axis(cc, 3)?;
    let oc_block = s.axis(cc, 4)?;
    let ic = s.reduce_axis(cc, 0)?;
    let kh = s.reduce_axis(cc, 1)?;
    let kw = s.reduce_axis(cc, 2)?;
    let (ow_chunk, ow_block) = s.split(cc, ow, reg_n)?;
    let (ic_chunk, ic_block) = s.split(cc, ic, ic_bn)?;
    if unroll_kw {
        s.reorder(
            cc,
            &[oc_chunk, oh, ow_chunk, ic_chunk, kh, ic_block, kw, ow_block, oc_block],
        )?;
        s.unroll(cc, kw)?;
    } else {
        s.reorder(
            cc,
            &[oc_chunk, oh, ow_chunk, ic_chunk, kh, kw, ic_block, ow_block, oc_block],
        )?;
    }
    s.vectorize(cc, oc_block)?;
    s.unroll(cc, ow_block)?;

    if c != last {
        let batch = s.axis(last, 0)?;
        let channel = s.axis(last, 1)?;
        let oh = s.axis(last, 2)?;
        let ow = s.axis(last, 3)?;
        let (oc_chunk, oc_block) = s.split(last, channel, oc_bn)?;
        let (ow_chunk, ow_block) = s.split(last, ow, reg_n)?;
        s.reorder(last, &[oc_chunk, oh, ow_chunk, ow_block, oc_block])?;
        let parallel_axis = s.fuse(last, batch, oc_chunk)?;
        let parallel_axis = s.fuse(last, parallel_axis, oh)?;
        s.compute_at(c, last, parallel_axis)?;
        s.vectorize(last, oc_block)?;
        s.parallel(last, parallel_axis)?;
    }
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScheduleError;
    use crate::records::MemoryRecords;
    use crate::schedule::{Annotation, AttachPoint};
    use crate::space::ConfigEntity;
    use std::sync::Arc;
    use ts_ir::Target;

    fn resnet_block() -> (Vec<TensorDesc>, Conv2dWorkload) {
        let data = TensorDesc::new("data", vec![1, 64, 56, 56], DType::Float32);
        let kernel = TensorDesc::new("kernel", vec![64, 64, 3, 3], DType::Float32);
        let wkl = Conv2dWorkload::from_nchw(&data, &kernel, [1, 1], [1, 1, 1, 1], [1, 1]).unwrap();
        (vec![data, kernel], wkl)
    }

    #[test]
    fn test_workload_geometry() {
        let (_, wkl) = resnet_block();
        assert_eq!((wkl.out_height(), wkl.out_width()), (56, 56));
        let data = TensorDesc::new("data", vec![1, 3, 224, 224], DType::Float32);
        let kernel = TensorDesc::new("kernel", vec![64, 3, 7, 7], DType::Float32);
        let wkl = Conv2dWorkload::from_nchw(&data, &kernel, [2, 2], [3, 3, 3, 3], [1, 1]).unwrap();
        assert_eq!(wkl.out_height(), 112);
        let dilated = Conv2dWorkload::from_nchw(&data, &kernel, [1, 1], [0, 0, 0, 0], [2, 2]).unwrap();
        assert_eq!(dilated.out_width(), 224 - 13 + 1);
    }

    #[test]
    fn test_rejects_channel_mismatch() {
        let data = TensorDesc::new("data", vec![1, 3, 8, 8], DType::Float32);
        let kernel = TensorDesc::new("kernel", vec![4, 5, 3, 3], DType::Float32);
        assert!(Conv2dWorkload::from_nchw(&data, &kernel, [1, 1], [0; 4], [1, 1]).is_err());
    }

    #[test]
    fn test_rejects_overflowing_padding() {
        let data = TensorDesc::new("data", vec![1, 3, 8, 8], DType::Float32);
        let kernel = TensorDesc::new("kernel", vec![4, 3, 3, 3], DType::Float32);
        let huge = usize::MAX / 2;
        let err = Conv2dWorkload::from_nchw(&data, &kernel, [1, 1], [huge, 0, huge, 0], [1, 1]).unwrap_err();
        assert!(matches!(err, ScheduleError::Ir(IrError::ShapeMismatch { .. })));
        let err = Conv2dWorkload::from_nchw(&data, &kernel, [1, 1], [0; 4], [usize::MAX, 1]).unwrap_err();
        assert!(matches!(err, ScheduleError::Ir(IrError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_compute_shapes() {
        let (inputs, wkl) = resnet_block();
        let ctx = TuningContext::new(Target::parse("llvm").unwrap());
        let out = conv2d_nchwc(&inputs, &wkl, ConvOutputLayout::Nchw, DType::Float32, &ctx).unwrap();
        assert_eq!(
            out.graph.op("data_vec").unwrap().output_shape(),
            Shape::from_known(&[1, 8, 58, 58, 8])
        );
        assert_eq!(
            out.graph.op("conv2d_NCHWc").unwrap().output_shape(),
            Shape::from_known(&[1, 8, 56, 56, 8])
        );
        assert_eq!(out.graph.outputs(), &["output_unpack".to_string()]);
    }

    #[test]
    fn test_schedule_with_unpack() {
        let (inputs, wkl) = resnet_block();
        let ctx = TuningContext::new(Target::parse("llvm").unwrap());
        let out = conv2d_nchwc(&inputs, &wkl, ConvOutputLayout::Nchw, DType::Float32, &ctx).unwrap();
        let s = schedule_conv_nchwc(&out).unwrap();
        let c = s.stage("conv2d_NCHWc").unwrap();
        let cc = s.stage("conv2d_NCHWc.global").unwrap();
        let last = s.stage("output_unpack").unwrap();

        assert!(s.parallel_axis(c).is_none());
        let parallel = s.parallel_axis(last).unwrap();
        assert_eq!(s.get(c).attach(), AttachPoint::At { consumer: last, axis: parallel });
        assert!(matches!(s.get(cc).attach(), AttachPoint::At { consumer, .. } if consumer == c));
        assert_eq!(
            s.leaf_names(cc)[1..],
            [
                "oc_chunk",
                "oh",
                "ow.outer",
                "ic.outer",
                "kh",
                "kw",
                "ic.inner",
                "ow.inner",
                "oc_block",
            ]
        );
        s.validate().unwrap();
    }

    #[test]
    fn test_schedule_blocked_output_with_unrolled_kw() {
        let (inputs, wkl) = resnet_block();
        let target = Target::parse("llvm").unwrap();
        let workload = Workload::new(CONV2D_NCHWC_TASK, &inputs).with_params(&wkl.params());
        let mut records = MemoryRecords::new();
        records.insert(
            &target,
            workload,
            ConfigEntity::new()
                .with_split("tile_ic", vec![16, 4])
                .with_split("tile_oc", vec![4, 16])
                .with_split("tile_ow", vec![4, 14])
                .with_flag("unroll_kw", true),
        );
        let ctx = TuningContext::with_records(target, Arc::new(records));
        let out = conv2d_nchwc(&inputs, &wkl, ConvOutputLayout::Nchwc, DType::Float32, &ctx).unwrap();
        let s = schedule_conv_nchwc(&out).unwrap();
        let c = s.stage("conv2d_NCHWc").unwrap();
        let cc = s.stage("conv2d_NCHWc.global").unwrap();

        assert_eq!(s.get(c).attach(), AttachPoint::Root);
        assert!(s.parallel_axis(c).is_some());
        let names = s.leaf_names(cc);
        assert_eq!(names[5..8], ["kh", "ic.inner", "kw"]);
        let kw = s.get(cc).leaves()[7];
        assert_eq!(s.annotation(cc, kw), Some(Annotation::Unroll));
        assert_eq!(s.iter_var(s.get(cc).leaves()[8]).extent, DimExtent::Known(14));
        s.validate().unwrap();
    }
}
